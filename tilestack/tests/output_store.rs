#![allow(missing_docs)]

use std::{error::Error, path::Path, sync::Arc, time::Duration};

use ndarray::{ArrayD, Dimension, IxDyn};
use serde_json::json;
use tilestack::{
    ConfigError, DataType, Mask, MaskedArray, MetatilingPyramid, OutputConfig, OutputStore,
    StoreError, TileAddress, ValidationError,
};

fn store(
    root: &Path,
    pyramid: MetatilingPyramid,
    configure: impl FnOnce(OutputConfig) -> OutputConfig,
) -> Result<OutputStore<MetatilingPyramid>, Box<dyn Error>> {
    let config = configure(OutputConfig::new(root, DataType::UInt8, 3, 3)?);
    Ok(OutputStore::new(config, pyramid)?)
}

fn tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = files_below(root)
        .into_iter()
        .map(|path| {
            let bytes = std::fs::read(&path).unwrap();
            (path.display().to_string(), bytes)
        })
        .collect();
    files.sort();
    files
}

fn files_below(root: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(files_below(&path));
        } else {
            files.push(path);
        }
    }
    files
}

#[test]
fn write_read_buffered_tile() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(256, 1, 10);
    let store = store(dir.path(), pyramid, |config| config)?;
    let tile = pyramid.process_tile(TileAddress::new(5, 1, 1));

    assert!(!store.tiles_exist(&tile));
    let written = store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[3, 276, 276])))?;
    assert_eq!(written, vec![TileAddress::new(5, 1, 1)]);
    assert!(store.tiles_exist(&tile));
    assert!(dir.path().join("5/1/1.tspk").is_file());

    let mut input = store.open::<u8>(TileAddress::new(5, 1, 1))?;
    let array = input.read()?;
    assert_eq!(array.shape(), &[1, 3, 256, 256]);
    assert_eq!(array.mask(), &Mask::Uniform(false));
    assert!(array.data().iter().all(|&value| value == 1));
    assert!(!input.is_empty());
    Ok(())
}

#[test]
fn deleted_tile_reads_empty() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(256, 1, 0);
    let store = store(dir.path(), pyramid, |config| config)?;
    let tile = pyramid.process_tile(TileAddress::new(5, 1, 1));
    store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[3, 256, 256])))?;

    std::fs::remove_file(store.path(&TileAddress::new(5, 1, 1)))?;
    assert!(!store.tiles_exist(&tile));

    let mut input = store.open::<u8>(TileAddress::new(5, 1, 1))?;
    assert!(input.is_empty());
    let array = input.read()?;
    assert_eq!(array.shape(), &[1, 3, 256, 256]);
    assert_eq!(array.layer(0), store.empty::<u8>(&tile)?);
    assert!(array.is_fully_masked());
    assert!(array.data().iter().all(|&value| value == 0));
    assert_eq!(input.read_raw()?, None);
    Ok(())
}

#[test]
fn close_gaps_keeps_newest_valid_value() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(4, 1, 0);
    let config = OutputConfig::new(dir.path(), DataType::Int16, 1, 3)?
        .with_nodata(-1.0)?
        .with_close_gaps(true);
    let store = OutputStore::new(config, pyramid)?;
    let tile = pyramid.process_tile(TileAddress::new(3, 2, 1));

    // x is valid in the top half, y on the diagonal
    let x = ArrayD::from_shape_fn(IxDyn(&[1, 4, 4]), |index| {
        if index[1] < 2 { 10 + index[2] as i16 } else { -1 }
    });
    let y = ArrayD::from_shape_fn(IxDyn(&[1, 4, 4]), |index| {
        if index[1] == index[2] { 20i16 } else { -1 }
    });
    store.write(&tile, x.clone())?;
    store.write(&tile, y.clone())?;

    let mut input = store.open::<i16>(TileAddress::new(3, 2, 1))?;
    let stack = input.read()?;
    let top = stack.layer(0);
    let top_mask = top.full_mask();
    for row in 0..4usize {
        for col in 0..4usize {
            let index = [0, row, col];
            let expected = if y[index] != -1 {
                Some(y[index])
            } else if x[index] != -1 {
                Some(x[index])
            } else {
                None
            };
            let value = (!top_mask[index]).then(|| top.data()[index]);
            assert_eq!(value, expected, "pixel {row}, {col}");
        }
    }
    Ok(())
}

#[test]
fn empty_write_is_noop() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let root = dir.path().join("out");
    let pyramid = MetatilingPyramid::new(8, 2, 0);
    let store = store(&root, pyramid, |config| config)?;
    let tile = pyramid.process_tile(TileAddress::new(2, 0, 1));

    assert!(store.write(&tile, ArrayD::<u8>::zeros(IxDyn(&[3, 16, 16])))?.is_empty());
    let masked = MaskedArray::fully_masked(&[3, 16, 16], 7u8);
    assert!(store.write(&tile, masked.clone())?.is_empty());
    assert!(!root.exists());
    assert!(!store.tiles_exist(&tile));

    store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[3, 16, 16])))?;
    assert!(store.tiles_exist(&tile));
    let before = tree(&root);
    assert_eq!(before.len(), 4);
    assert!(store.write(&tile, ArrayD::<u8>::zeros(IxDyn(&[3, 16, 16])))?.is_empty());
    assert!(store.write(&tile, masked)?.is_empty());
    assert_eq!(tree(&root), before);
    Ok(())
}

#[test]
fn partially_empty_write_skips_empty_destinations() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(8, 2, 0);
    let store = store(dir.path(), pyramid, |config| config)?;
    let tile = pyramid.process_tile(TileAddress::new(2, 0, 0));

    // Only the top left output tile has data
    let data = ArrayD::from_shape_fn(IxDyn(&[3, 16, 16]), |index| {
        u8::from(index[1] < 8 && index[2] < 8)
    });
    assert_eq!(store.write(&tile, data)?, vec![TileAddress::new(2, 0, 0)]);
    assert!(!store.tiles_exist(&tile));
    assert_eq!(store.stored_tiles(None), vec![TileAddress::new(2, 0, 0)]);
    Ok(())
}

#[test]
fn stack_grows_newest_first() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(4, 1, 0);
    let store = store(dir.path(), pyramid, |config| config)?;
    let tile = pyramid.process_tile(TileAddress::new(1, 0, 0));

    for value in 1..=4u8 {
        store.write(&tile, ArrayD::from_elem(IxDyn(&[3, 4, 4]), value))?;
    }
    let mut input = store.open::<u8>(tile.address())?;
    let stack = input.read()?;
    assert_eq!(stack.shape(), &[4, 3, 4, 4]);
    for (index, layer) in stack.layers().enumerate() {
        assert!(layer.data().iter().all(|&value| usize::from(value) == 4 - index));
    }
    Ok(())
}

#[test]
fn write_multiple_layers() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(4, 1, 0);
    let store = store(dir.path(), pyramid, |config| config)?;
    let tile = pyramid.process_tile(TileAddress::new(1, 0, 0));

    // newest first
    let layers = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4, 4]), |index| 2 - index[0] as u8);
    store.write(&tile, layers.clone())?;
    store.write(&tile, ArrayD::from_elem(IxDyn(&[3, 4, 4]), 3u8))?;

    let mut input = store.open::<u8>(tile.address())?;
    let stack = input.read()?;
    assert_eq!(stack.num_layers(), 3);
    assert!(stack.layer(0).data().iter().all(|&value| value == 3));
    assert_eq!(stack.layer(1).data(), &layers.index_axis(ndarray::Axis(0), 0));
    assert_eq!(stack.layer(2).data(), &layers.index_axis(ndarray::Axis(0), 1));
    Ok(())
}

#[test]
fn write_masked_array() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(2, 1, 0);
    let store = store(dir.path(), pyramid, |config| config)?;
    let tile = pyramid.process_tile(TileAddress::new(0, 0, 0));

    let mut mask = ArrayD::from_elem(IxDyn(&[3, 2, 2]), false);
    mask[[0, 0, 0]] = true;
    let mut data = ArrayD::from_elem(IxDyn(&[3, 2, 2]), 5u8);
    data[[1, 1, 1]] = 0;
    store.write(&tile, MaskedArray::new(data, Mask::Full(mask))?)?;

    let mut input = store.open::<u8>(tile.address())?;
    let stack = input.read()?;
    let invalid: Vec<_> = stack
        .full_mask()
        .indexed_iter()
        .filter(|(_, invalid)| **invalid)
        .map(|(index, _)| index.slice().to_vec())
        .collect();
    assert_eq!(invalid, vec![vec![0, 0, 0, 0], vec![0, 1, 1, 1]]);
    Ok(())
}

#[test]
fn write_validation_errors() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let root = dir.path().join("out");
    let pyramid = MetatilingPyramid::new(4, 1, 0);
    let store = store(&root, pyramid, |config| config)?;
    let tile = pyramid.process_tile(TileAddress::new(1, 0, 0));

    assert!(matches!(
        store.write(&tile, ArrayD::<f32>::ones(IxDyn(&[3, 4, 4]))),
        Err(StoreError::Validation(ValidationError::DataType(_)))
    ));
    assert!(matches!(
        store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[4]))),
        Err(StoreError::Validation(ValidationError::Dimensionality { got: 1, ndim: 3 }))
    ));
    assert!(matches!(
        store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[1, 1, 3, 4, 4]))),
        Err(StoreError::Validation(ValidationError::Dimensionality { got: 5, ndim: 3 }))
    ));
    // a missing leading axis is a single band
    assert!(matches!(
        store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[4, 4]))),
        Err(StoreError::Validation(ValidationError::Shape { .. }))
    ));
    assert!(matches!(
        store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[2, 4, 4]))),
        Err(StoreError::Validation(ValidationError::Shape { .. }))
    ));
    assert!(matches!(
        store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[2, 3, 4, 5]))),
        Err(StoreError::Validation(ValidationError::Shape { .. }))
    ));
    assert!(!root.exists());
    Ok(())
}

#[test]
fn incompatible_stored_stack() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(4, 1, 0);
    let store_a = store(dir.path(), pyramid, |config| config)?;
    let tile = pyramid.process_tile(TileAddress::new(1, 0, 0));
    store_a.write(&tile, ArrayD::<u8>::ones(IxDyn(&[3, 4, 4])))?;

    let config = OutputConfig::new(dir.path(), DataType::UInt8, 2, 3)?;
    let store_b = OutputStore::new(config, pyramid)?;
    assert!(matches!(
        store_b.write(&tile, ArrayD::<u8>::ones(IxDyn(&[2, 4, 4]))),
        Err(StoreError::Stack(_))
    ));

    let config = OutputConfig::new(dir.path(), DataType::UInt16, 3, 3)?;
    let store_c = OutputStore::new(config, pyramid)?;
    assert!(matches!(
        store_c.write(&tile, ArrayD::<u16>::ones(IxDyn(&[3, 4, 4]))),
        Err(StoreError::Decode { .. })
    ));
    Ok(())
}

fn count_valid<T: tilestack::Element>(array: &MaskedArray<T>) -> usize {
    array.full_mask().iter().filter(|invalid| !**invalid).count()
}

#[test]
fn single_band_without_band_axis() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(4, 1, 0);
    let config = OutputConfig::new(dir.path(), DataType::Float32, 1, 3)?.with_nodata(f64::NAN)?;
    let store = OutputStore::new(config, pyramid)?;
    let tile = pyramid.process_tile(TileAddress::new(1, 0, 0));

    let mut data = ArrayD::from_elem(IxDyn(&[4, 4]), 0.5f32);
    data[[0, 0]] = f32::NAN;
    store.write(&tile, data)?;

    let mut input = store.open::<f32>(tile.address())?;
    let stack = input.read()?;
    assert_eq!(stack.shape(), &[1, 1, 4, 4]);
    assert_eq!(count_valid(stack), 15);
    assert_eq!(store.empty::<f32>(&tile)?.shape(), &[1, 4, 4]);
    Ok(())
}

#[test]
fn two_dimensional_tiles() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(4, 1, 0);
    let tile = pyramid.process_tile(TileAddress::new(1, 0, 0));

    let config = OutputConfig::new(dir.path().join("single"), DataType::UInt8, 1, 2)?;
    let store = OutputStore::new(config, pyramid)?;
    assert_eq!(store.empty::<u8>(&tile)?.shape(), &[1, 4, 4]);
    store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[4, 4])))?;
    store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[1, 4, 4])))?;
    assert_eq!(store.open::<u8>(tile.address())?.read()?.shape(), &[2, 1, 4, 4]);

    let config = OutputConfig::new(dir.path().join("bands"), DataType::UInt8, 3, 2)?;
    let store = OutputStore::new(config, pyramid)?;
    assert_eq!(store.empty::<u8>(&tile)?.shape(), &[3, 4, 4]);
    store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[3, 4, 4])))?;
    assert_eq!(store.open::<u8>(tile.address())?.read()?.shape(), &[1, 3, 4, 4]);
    Ok(())
}

#[test]
fn leading_axes_up_to_ndim() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(4, 1, 0);
    let config = OutputConfig::new(dir.path(), DataType::UInt8, 3, 4)?;
    let store = OutputStore::new(config, pyramid)?;
    let tile = pyramid.process_tile(TileAddress::new(1, 0, 0));

    assert_eq!(store.empty::<u8>(&tile)?.shape(), &[1, 3, 4, 4]);
    store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[3, 4, 4])))?;
    store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[1, 3, 4, 4])))?;
    store.write(&tile, ArrayD::<u8>::ones(IxDyn(&[2, 1, 3, 4, 4])))?;
    let mut input = store.open::<u8>(tile.address())?;
    assert_eq!(input.read()?.shape(), &[4, 1, 3, 4, 4]);
    Ok(())
}

#[test]
fn metatile_splits_into_output_tiles() -> Result<(), Box<dyn Error>> {
    for parallel_writes in [false, true] {
        let dir = tempfile::TempDir::new()?;
        let pyramid = MetatilingPyramid::new(8, 2, 2);
        let store = store(dir.path(), pyramid, |config| {
            config.with_parallel_writes(parallel_writes)
        })?;
        let tile = pyramid.process_tile(TileAddress::new(4, 1, 2));
        let data = ArrayD::from_shape_fn(IxDyn(&[3, 20, 20]), |index| {
            1 + u8::from(index[1] >= 10) * 2 + u8::from(index[2] >= 10)
        });

        let mut written = store.write(&tile, data)?;
        written.sort();
        let expected = vec![
            TileAddress::new(4, 2, 4),
            TileAddress::new(4, 2, 5),
            TileAddress::new(4, 3, 4),
            TileAddress::new(4, 3, 5),
        ];
        assert_eq!(written, expected);
        assert_eq!(store.stored_tiles(Some(4)), expected);
        assert!(store.stored_tiles(Some(3)).is_empty());
        assert!(store.tiles_exist(&tile));

        for (value, address) in (1u8..).zip(&expected) {
            let mut input = store.open::<u8>(*address)?;
            let stack = input.read()?;
            assert_eq!(stack.shape(), &[1, 3, 8, 8]);
            assert!(stack.data().iter().all(|&v| v == value), "tile {address}");
        }
    }
    Ok(())
}

#[test]
fn concurrent_writes_to_one_tile() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(4, 1, 0);
    let store = store(dir.path(), pyramid, |config| config)?;
    let tile = pyramid.process_tile(TileAddress::new(1, 0, 0));

    std::thread::scope(|scope| {
        for value in 1..=8u8 {
            let (store, tile) = (&store, &tile);
            scope.spawn(move || {
                store
                    .write(tile, ArrayD::from_elem(IxDyn(&[3, 4, 4]), value))
                    .unwrap();
            });
        }
    });

    let mut input = store.open::<u8>(tile.address())?;
    let stack = input.read()?;
    assert_eq!(stack.num_layers(), 8);
    let mut values: Vec<_> = stack.layers().map(|layer| layer.data()[[0, 0, 0]]).collect();
    values.sort_unstable();
    assert_eq!(values, (1..=8).collect::<Vec<u8>>());
    Ok(())
}

#[test]
fn detached_writes() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let pyramid = MetatilingPyramid::new(4, 2, 0);
    let store = Arc::new(store(dir.path(), pyramid, |config| config)?);

    let tile = pyramid.process_tile(TileAddress::new(3, 0, 0));
    let pending = store.write_detached(&tile, ArrayD::<u8>::ones(IxDyn(&[3, 8, 8])))?;
    assert_eq!(pending.len(), 4);
    let mut written = pending.wait_all()?;
    written.sort();
    assert_eq!(written, store.stored_tiles(Some(3)));
    assert_eq!(written.len(), 4);

    let pending = store.write_detached(&tile, ArrayD::<u8>::zeros(IxDyn(&[3, 8, 8])))?;
    assert!(pending.is_empty());
    assert!(pending.wait().is_empty());

    // fire and forget, then poll
    let tile = pyramid.process_tile(TileAddress::new(3, 1, 1));
    drop(store.write_detached(&tile, ArrayD::<u8>::ones(IxDyn(&[3, 8, 8])))?);
    let mut attempts = 0;
    while !store.tiles_exist(&tile) {
        attempts += 1;
        assert!(attempts < 500, "detached writes did not complete");
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(matches!(
        store.write_detached(&tile, ArrayD::<u8>::ones(IxDyn(&[3, 4, 4]))),
        Err(StoreError::Validation(_))
    ));
    Ok(())
}

#[test]
fn configuration_validation() {
    let value = json!({
        "format": "tilestack",
        "bands": 3,
        "path": "/data/out",
        "dtype": "float32",
        "ndim": 4,
        "nodata": -9999.0,
        "single_file": false
    });
    assert!(OutputStore::<MetatilingPyramid>::is_valid_configuration(&value).unwrap());
    for ndim in [2, 3] {
        let mut value = value.clone();
        value["ndim"] = json!(ndim);
        assert!(OutputStore::<MetatilingPyramid>::is_valid_configuration(&value).unwrap());
    }

    let mut missing = value.clone();
    missing.as_object_mut().unwrap().remove("dtype");
    assert!(matches!(
        OutputStore::<MetatilingPyramid>::is_valid_configuration(&missing),
        Err(ConfigError::MissingKey("dtype"))
    ));

    let mut malformed = value;
    malformed["single_file"] = json!("no");
    assert!(matches!(
        OutputStore::<MetatilingPyramid>::is_valid_configuration(&malformed),
        Err(ConfigError::InvalidValue { key: "single_file", .. })
    ));
}

#[test]
fn invalid_root_path() -> Result<(), Box<dyn Error>> {
    let file = tempfile::NamedTempFile::new()?;
    let config = OutputConfig::new(file.path(), DataType::UInt8, 1, 3)?;
    assert!(matches!(
        OutputStore::new(config, MetatilingPyramid::new(4, 1, 0)),
        Err(StoreError::Filesystem(_))
    ));
    Ok(())
}
