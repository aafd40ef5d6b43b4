//! Tiles and the tile geometry collaborators of an [`OutputStore`](crate::OutputStore).
//!
//! The store never computes pyramid geometry or resamples rasters itself.
//! It consumes them through [`TilePyramid`] and [`RasterExtract`].
//! [`MetatilingPyramid`] is a same-CRS implementation of both in which a process tile is a square block of output tiles with an optional pixel buffer.

use thiserror::Error;
use tilestack_codec::Element;
use tilestack_filesystem::TileAddress;

use crate::MaskedArray;

/// A tile: an address plus its pixel geometry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tile {
    address: TileAddress,
    height: usize,
    width: usize,
    pixelbuffer: usize,
    crs: Option<String>,
}

impl Tile {
    /// Create a new unbuffered tile of `height` × `width` pixels.
    #[must_use]
    pub const fn new(address: TileAddress, height: usize, width: usize) -> Self {
        Self {
            address,
            height,
            width,
            pixelbuffer: 0,
            crs: None,
        }
    }

    /// Set the pixel buffer added on every side of the tile.
    #[must_use]
    pub const fn with_pixelbuffer(mut self, pixelbuffer: usize) -> Self {
        self.pixelbuffer = pixelbuffer;
        self
    }

    /// Set the coordinate reference system identifier.
    #[must_use]
    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    /// Return the address.
    #[must_use]
    pub const fn address(&self) -> TileAddress {
        self.address
    }

    /// Return the zoom level.
    #[must_use]
    pub const fn zoom(&self) -> u32 {
        self.address.zoom
    }

    /// Return the row.
    #[must_use]
    pub const fn row(&self) -> u64 {
        self.address.row
    }

    /// Return the column.
    #[must_use]
    pub const fn col(&self) -> u64 {
        self.address.col
    }

    /// Return the unbuffered height in pixels.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Return the unbuffered width in pixels.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Return the pixel buffer.
    #[must_use]
    pub const fn pixelbuffer(&self) -> usize {
        self.pixelbuffer
    }

    /// Return the coordinate reference system identifier, opaque to the store.
    #[must_use]
    pub fn crs(&self) -> Option<&str> {
        self.crs.as_deref()
    }

    /// Return the buffered pixel shape `(rows, cols)`.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (
            self.height + 2 * self.pixelbuffer,
            self.width + 2 * self.pixelbuffer,
        )
    }
}

/// Output pyramid geometry.
pub trait TilePyramid {
    /// Return the output tiles intersecting `tile`.
    fn intersecting(&self, tile: &Tile) -> Vec<Tile>;

    /// Return the output tile at `address`.
    fn tile(&self, address: TileAddress) -> Tile;
}

/// Raster extraction between tiles.
pub trait RasterExtract {
    /// Extract the part of `data`, covering `source`, that falls within the footprint of `destination`.
    ///
    /// The leading axes of `data` are preserved, the last two axes are the tile rows and columns.
    ///
    /// # Errors
    /// Returns an [`ExtractError`] if `data` does not cover `source` or `destination` does not lie within it.
    fn extract_from_tile<T: Element>(
        &self,
        source: &Tile,
        data: &MaskedArray<T>,
        destination: &Tile,
    ) -> Result<MaskedArray<T>, ExtractError>;
}

/// A raster extraction error.
#[derive(Clone, Debug, Error)]
pub enum ExtractError {
    /// The destination tile does not lie within the source tile.
    #[error("tile {destination} does not lie within tile {source_tile}")]
    NotIntersecting {
        /// The source tile address.
        source_tile: TileAddress,
        /// The destination tile address.
        destination: TileAddress,
    },
    /// The data does not have the shape of the source tile.
    #[error("data of shape {got:?} does not cover a tile of shape {expected:?}")]
    ShapeMismatch {
        /// The buffered tile shape.
        expected: (usize, usize),
        /// The data shape.
        got: Vec<usize>,
    },
    /// Other
    #[error("{_0}")]
    Other(String),
}

/// A same-CRS pyramid whose process tiles are square blocks of `metatiling` × `metatiling` output tiles.
///
/// Process tile `(zoom, row, col)` covers output tiles `(zoom, row * metatiling + i, col * metatiling + j)`.
/// Output tiles are unbuffered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetatilingPyramid {
    tile_size: usize,
    metatiling: u64,
    pixelbuffer: usize,
}

impl MetatilingPyramid {
    /// Create a new pyramid with output tiles of `tile_size` × `tile_size` pixels.
    ///
    /// # Panics
    /// Panics if `tile_size` or `metatiling` is zero.
    #[must_use]
    pub fn new(tile_size: usize, metatiling: u64, pixelbuffer: usize) -> Self {
        assert!(tile_size > 0, "tile size must be positive");
        assert!(metatiling > 0, "metatiling must be positive");
        Self {
            tile_size,
            metatiling,
            pixelbuffer,
        }
    }

    /// Return the output tile size.
    #[must_use]
    pub const fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Return the metatiling factor.
    #[must_use]
    pub const fn metatiling(&self) -> u64 {
        self.metatiling
    }

    /// Return the process tile at `address`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn process_tile(&self, address: TileAddress) -> Tile {
        let size = self.tile_size * self.metatiling as usize;
        Tile::new(address, size, size).with_pixelbuffer(self.pixelbuffer)
    }

    /// The number of output tiles along each axis of `tile`.
    fn factor(&self, tile: &Tile) -> (u64, u64) {
        let factor = |pixels: usize| (pixels / self.tile_size).max(1) as u64;
        (factor(tile.height()), factor(tile.width()))
    }
}

impl TilePyramid for MetatilingPyramid {
    fn intersecting(&self, tile: &Tile) -> Vec<Tile> {
        let (rows, cols) = self.factor(tile);
        let mut tiles = Vec::new();
        for i in 0..rows {
            for j in 0..cols {
                tiles.push(self.tile(TileAddress::new(
                    tile.zoom(),
                    tile.row() * rows + i,
                    tile.col() * cols + j,
                )));
            }
        }
        tiles
    }

    fn tile(&self, address: TileAddress) -> Tile {
        Tile::new(address, self.tile_size, self.tile_size)
    }
}

impl RasterExtract for MetatilingPyramid {
    #[allow(clippy::cast_possible_truncation)]
    fn extract_from_tile<T: Element>(
        &self,
        source: &Tile,
        data: &MaskedArray<T>,
        destination: &Tile,
    ) -> Result<MaskedArray<T>, ExtractError> {
        let shape = data.shape();
        if shape.len() < 2 || shape[shape.len() - 2..] != [source.shape().0, source.shape().1] {
            return Err(ExtractError::ShapeMismatch {
                expected: source.shape(),
                got: shape.to_vec(),
            });
        }

        let not_intersecting = || ExtractError::NotIntersecting {
            source_tile: source.address(),
            destination: destination.address(),
        };
        if source.zoom() != destination.zoom() {
            return Err(not_intersecting());
        }
        let (rows, cols) = self.factor(source);
        let (i, j) = (
            destination
                .row()
                .checked_sub(source.row() * rows)
                .filter(|i| *i < rows)
                .ok_or_else(not_intersecting)?,
            destination
                .col()
                .checked_sub(source.col() * cols)
                .filter(|j| *j < cols)
                .ok_or_else(not_intersecting)?,
        );

        // Offsets into the buffered source, widened by the destination buffer
        let start = |offset: u64, size: usize| {
            (source.pixelbuffer() + offset as usize * size)
                .checked_sub(destination.pixelbuffer())
                .ok_or_else(not_intersecting)
        };
        let (rows_start, cols_start) = (
            start(i, destination.height())?,
            start(j, destination.width())?,
        );
        let (height, width) = destination.shape();
        if rows_start + height > source.shape().0 || cols_start + width > source.shape().1 {
            return Err(not_intersecting());
        }
        Ok(data.window(
            rows_start..rows_start + height,
            cols_start..cols_start + width,
        ))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    #[test]
    fn tile_shape() {
        let tile = Tile::new(TileAddress::new(5, 1, 1), 256, 128).with_pixelbuffer(10);
        assert_eq!(tile.shape(), (276, 148));
        assert_eq!(tile.crs(), None);
        assert_eq!(tile.with_crs("EPSG:4326").crs(), Some("EPSG:4326"));
    }

    #[test]
    fn metatiling_intersecting() {
        let pyramid = MetatilingPyramid::new(256, 2, 0);
        let process_tile = pyramid.process_tile(TileAddress::new(5, 1, 3));
        assert_eq!(process_tile.shape(), (512, 512));
        let addresses: Vec<_> = pyramid
            .intersecting(&process_tile)
            .iter()
            .map(Tile::address)
            .collect();
        assert_eq!(
            addresses,
            vec![
                TileAddress::new(5, 2, 6),
                TileAddress::new(5, 2, 7),
                TileAddress::new(5, 3, 6),
                TileAddress::new(5, 3, 7),
            ]
        );

        // An output tile intersects itself only
        let tile = pyramid.tile(TileAddress::new(5, 2, 6));
        assert_eq!(pyramid.intersecting(&tile), vec![tile]);
    }

    #[test]
    fn metatiling_extract() {
        let pyramid = MetatilingPyramid::new(2, 2, 1);
        let source = pyramid.process_tile(TileAddress::new(1, 0, 0));
        assert_eq!(source.shape(), (6, 6));
        let data = ArrayD::from_shape_vec(IxDyn(&[1, 6, 6]), (0u16..36).collect()).unwrap();
        let data = MaskedArray::valid(data);

        let destination = pyramid.tile(TileAddress::new(1, 1, 0));
        let extracted = pyramid
            .extract_from_tile(&source, &data, &destination)
            .unwrap();
        assert_eq!(extracted.shape(), &[1, 2, 2]);
        assert_eq!(
            extracted.data().iter().copied().collect::<Vec<_>>(),
            vec![19, 20, 25, 26]
        );

        let outside = pyramid.tile(TileAddress::new(1, 2, 0));
        assert!(matches!(
            pyramid.extract_from_tile(&source, &data, &outside),
            Err(ExtractError::NotIntersecting { .. })
        ));

        let unbuffered = MaskedArray::valid(ArrayD::<u16>::zeros(IxDyn(&[1, 4, 4])));
        assert!(matches!(
            pyramid.extract_from_tile(&source, &unbuffered, &destination),
            Err(ExtractError::ShapeMismatch { .. })
        ));
    }
}
