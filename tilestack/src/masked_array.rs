//! Masked arrays.
//!
//! A [`MaskedArray`] pairs an n-dimensional [`ndarray::ArrayD`] with a validity [`Mask`] in which `true` marks an invalid (absent) element.
//! Fully valid and fully invalid masks are held as a single flag and expanded to the data shape on demand.

use derive_more::From;
use std::ops::Range;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice, Zip};
use thiserror::Error;
use tilestack_codec::{ArrayBytes, CodecError, Element, MaskBytes};

/// A validity mask. `true` marks an invalid element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mask {
    /// Every element has the same validity.
    Uniform(bool),
    /// One flag per element.
    Full(ArrayD<bool>),
}

impl Mask {
    /// Create a mask from per-element flags, compacting it to [`Mask::Uniform`] where possible.
    #[must_use]
    pub fn from_full(mask: ArrayD<bool>) -> Self {
        if mask.iter().all(|&invalid| invalid) {
            Self::Uniform(true)
        } else if mask.iter().all(|&invalid| !invalid) {
            Self::Uniform(false)
        } else {
            Self::Full(mask)
        }
    }

    /// Returns true if every element is invalid.
    #[must_use]
    pub fn all(&self) -> bool {
        match self {
            Self::Uniform(invalid) => *invalid,
            Self::Full(mask) => mask.iter().all(|&invalid| invalid),
        }
    }

    /// Returns true if no element is invalid.
    #[must_use]
    pub fn none(&self) -> bool {
        match self {
            Self::Uniform(invalid) => !*invalid,
            Self::Full(mask) => mask.iter().all(|&invalid| !invalid),
        }
    }

    /// Expand the mask to per-element flags for data of `shape`.
    #[must_use]
    pub fn to_full(&self, shape: &[usize]) -> ArrayD<bool> {
        match self {
            Self::Uniform(invalid) => ArrayD::from_elem(IxDyn(shape), *invalid),
            Self::Full(mask) => mask.clone(),
        }
    }
}

/// The mask shape does not match the data shape.
#[derive(Clone, Debug, Error)]
#[error("mask shape {mask:?} does not match data shape {data:?}")]
pub struct MaskShapeError {
    data: Vec<usize>,
    mask: Vec<usize>,
}

/// An n-dimensional array with a validity mask.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskedArray<T> {
    data: ArrayD<T>,
    mask: Mask,
}

impl<T: Element> MaskedArray<T> {
    /// Create a masked array.
    ///
    /// # Errors
    /// Returns [`MaskShapeError`] if `mask` is a [`Mask::Full`] with a shape other than the shape of `data`.
    pub fn new(data: ArrayD<T>, mask: Mask) -> Result<Self, MaskShapeError> {
        if let Mask::Full(full) = &mask {
            if full.shape() != data.shape() {
                return Err(MaskShapeError {
                    data: data.shape().to_vec(),
                    mask: full.shape().to_vec(),
                });
            }
        }
        Ok(Self { data, mask })
    }

    /// Create a masked array with every element valid.
    #[must_use]
    pub fn valid(data: ArrayD<T>) -> Self {
        Self {
            data,
            mask: Mask::Uniform(false),
        }
    }

    /// Create a masked array where elements equal to `nodata` are invalid.
    #[must_use]
    pub fn from_nodata(data: ArrayD<T>, nodata: T) -> Self {
        let mask = Mask::from_full(data.mapv(|value| value.is_nodata(nodata)));
        Self { data, mask }
    }

    /// Create a masked array of `shape` filled with `fill` and every element invalid.
    #[must_use]
    pub fn fully_masked(shape: &[usize], fill: T) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(shape), fill),
            mask: Mask::Uniform(true),
        }
    }

    /// Additionally mark elements equal to `nodata` invalid.
    #[must_use]
    pub fn mask_nodata(self, nodata: T) -> Self {
        if self.mask.all() {
            return self;
        }
        let mut mask = self.full_mask();
        Zip::from(&mut mask)
            .and(&self.data)
            .for_each(|invalid, &value| *invalid |= value.is_nodata(nodata));
        Self {
            data: self.data,
            mask: Mask::from_full(mask),
        }
    }

    /// Return the data.
    #[must_use]
    pub const fn data(&self) -> &ArrayD<T> {
        &self.data
    }

    /// Return the mask.
    #[must_use]
    pub const fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Return the mask expanded to per-element flags.
    #[must_use]
    pub fn full_mask(&self) -> ArrayD<bool> {
        self.mask.to_full(self.data.shape())
    }

    /// Return the shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Return the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Returns true if every element is invalid.
    #[must_use]
    pub fn is_fully_masked(&self) -> bool {
        self.mask.all()
    }

    /// Return the data with invalid elements replaced by `fill`.
    #[must_use]
    pub fn filled(&self, fill: T) -> ArrayD<T> {
        match &self.mask {
            Mask::Uniform(true) => ArrayD::from_elem(self.data.raw_dim(), fill),
            Mask::Uniform(false) => self.data.clone(),
            Mask::Full(mask) => Zip::from(&self.data)
                .and(mask)
                .map_collect(|&value, &invalid| if invalid { fill } else { value }),
        }
    }

    /// Return the length of the leading (layer) axis, zero for a scalar.
    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.data.shape().first().copied().unwrap_or(0)
    }

    /// Return layer `index` of the leading axis.
    ///
    /// # Panics
    /// Panics if the array is a scalar or `index` is out of bounds.
    #[must_use]
    pub fn layer(&self, index: usize) -> Self {
        let data = self.data.index_axis(Axis(0), index).to_owned();
        let mask = match &self.mask {
            Mask::Uniform(invalid) => Mask::Uniform(*invalid),
            Mask::Full(mask) => Mask::from_full(mask.index_axis(Axis(0), index).to_owned()),
        };
        Self { data, mask }
    }

    /// Iterate over the layers of the leading axis.
    pub fn layers(&self) -> impl Iterator<Item = Self> + '_ {
        (0..self.num_layers()).map(|index| self.layer(index))
    }

    /// Keep the first `count` layers of the leading axis.
    ///
    /// # Panics
    /// Panics if the array is a scalar or `count` exceeds the number of layers.
    #[must_use]
    pub fn truncate_layers(self, count: usize) -> Self {
        let layers = Slice::from(0..count);
        let mask = match self.mask {
            Mask::Full(mask) => Mask::from_full(mask.slice_axis(Axis(0), layers).to_owned()),
            uniform @ Mask::Uniform(_) => uniform,
        };
        Self {
            data: self.data.slice_axis(Axis(0), layers).to_owned(),
            mask,
        }
    }

    /// Insert a new axis of length one at `axis`.
    ///
    /// # Panics
    /// Panics if `axis` is greater than the number of dimensions.
    #[must_use]
    pub fn insert_axis(self, axis: usize) -> Self {
        let mask = match self.mask {
            Mask::Full(mask) => Mask::Full(mask.insert_axis(Axis(axis))),
            uniform @ Mask::Uniform(_) => uniform,
        };
        Self {
            data: self.data.insert_axis(Axis(axis)),
            mask,
        }
    }

    /// Return the window `rows` × `cols` of the last two axes.
    ///
    /// # Panics
    /// Panics if the array has fewer than two axes or a range is out of bounds.
    #[must_use]
    pub fn window(&self, rows: Range<usize>, cols: Range<usize>) -> Self {
        let data = window(self.data.view(), &rows, &cols);
        let mask = match &self.mask {
            Mask::Uniform(invalid) => Mask::Uniform(*invalid),
            Mask::Full(mask) => Mask::from_full(window(mask.view(), &rows, &cols)),
        };
        Self { data, mask }
    }

    /// Stack arrays of identical shape along a new leading axis.
    ///
    /// # Errors
    /// Returns [`ndarray::ShapeError`] if `arrays` is empty or the shapes differ.
    pub fn stack(arrays: &[Self]) -> Result<Self, ndarray::ShapeError> {
        let data = ndarray::stack(
            Axis(0),
            &arrays.iter().map(|array| array.data.view()).collect::<Vec<_>>(),
        )?;
        let mask = Self::combine_masks(arrays, |masks| {
            ndarray::stack(
                Axis(0),
                &masks.iter().map(|m| m.view()).collect::<Vec<_>>(),
            )
        })?;
        Ok(Self { data, mask })
    }

    /// Concatenate arrays along the leading axis.
    ///
    /// # Errors
    /// Returns [`ndarray::ShapeError`] if `arrays` is empty or the trailing shapes differ.
    pub fn concatenate(arrays: &[Self]) -> Result<Self, ndarray::ShapeError> {
        let data = ndarray::concatenate(
            Axis(0),
            &arrays.iter().map(|array| array.data.view()).collect::<Vec<_>>(),
        )?;
        let mask = Self::combine_masks(arrays, |masks| {
            ndarray::concatenate(
                Axis(0),
                &masks.iter().map(|m| m.view()).collect::<Vec<_>>(),
            )
        })?;
        Ok(Self { data, mask })
    }

    fn combine_masks(
        arrays: &[Self],
        combine: impl FnOnce(&[ArrayD<bool>]) -> Result<ArrayD<bool>, ndarray::ShapeError>,
    ) -> Result<Mask, ndarray::ShapeError> {
        if let Some(first) = arrays.first().map(|array| &array.mask) {
            if matches!(first, Mask::Uniform(_)) && arrays.iter().all(|array| array.mask == *first)
            {
                return Ok(first.clone());
            }
        }
        let masks: Vec<ArrayD<bool>> = arrays.iter().map(Self::full_mask).collect();
        Ok(Mask::from_full(combine(&masks)?))
    }

    /// Convert to the type-erased representation used by codecs.
    ///
    /// With `store_mask` false the mask is omitted and is derived from the nodata value when decoded.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if the array cannot be represented.
    pub fn to_array_bytes(&self, store_mask: bool) -> Result<ArrayBytes, CodecError> {
        let mask = match (&self.mask, store_mask) {
            (_, false) => MaskBytes::Implicit,
            (Mask::Uniform(invalid), true) => MaskBytes::Uniform(*invalid),
            (Mask::Full(mask), true) => MaskBytes::Bits(mask.iter().copied().collect()),
        };
        Ok(ArrayBytes::from_elements(
            self.data.shape().to_vec(),
            self.data.iter().copied(),
            mask,
        )?)
    }

    /// Create a masked array from its type-erased representation.
    ///
    /// An implicit mask marks elements equal to `nodata` invalid.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if `T` does not match the data type of `array_bytes`.
    pub fn from_array_bytes(array_bytes: ArrayBytes, nodata: T) -> Result<Self, CodecError> {
        let (shape, elements, mask) = array_bytes.into_elements::<T>()?;
        let data = ArrayD::from_shape_vec(IxDyn(&shape), elements)
            .map_err(|err| CodecError::Other(err.to_string()))?;
        match mask {
            MaskBytes::Implicit => Ok(Self::from_nodata(data, nodata)),
            MaskBytes::Uniform(invalid) => Ok(Self {
                data,
                mask: Mask::Uniform(invalid),
            }),
            MaskBytes::Bits(bits) => {
                let mask = ArrayD::from_shape_vec(IxDyn(&shape), bits)
                    .map_err(|err| CodecError::Other(err.to_string()))?;
                Ok(Self {
                    data,
                    mask: Mask::from_full(mask),
                })
            }
        }
    }
}

fn window<A: Clone>(view: ArrayViewD<'_, A>, rows: &Range<usize>, cols: &Range<usize>) -> ArrayD<A> {
    let ndim = view.ndim();
    view.slice_each_axis(|axis| {
        let index = axis.axis.index();
        if index + 2 == ndim {
            Slice::from(rows.clone())
        } else if index + 1 == ndim {
            Slice::from(cols.clone())
        } else {
            Slice::from(..)
        }
    })
    .to_owned()
}

/// Tile data handed to a store: a plain numeric array or a masked array.
///
/// Plain arrays are masked with the configured nodata value when written.
#[derive(Clone, Debug, From)]
pub enum TileData<T> {
    /// A numeric array without a mask.
    Plain(ArrayD<T>),
    /// A masked array.
    Masked(MaskedArray<T>),
}

impl<T: Element> TileData<T> {
    /// Return the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        match self {
            Self::Plain(data) => data.ndim(),
            Self::Masked(array) => array.ndim(),
        }
    }

    /// Convert to a masked array in which elements equal to `nodata` are invalid.
    #[must_use]
    pub fn into_masked(self, nodata: T) -> MaskedArray<T> {
        match self {
            Self::Plain(data) => MaskedArray::from_nodata(data, nodata),
            Self::Masked(array) => array.mask_nodata(nodata),
        }
    }
}
