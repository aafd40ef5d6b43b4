use thiserror::Error;

use super::{DataType, Element, ElementError, bytes_to_elements, elements_to_bytes};

/// The validity mask of [`ArrayBytes`]. `true` marks an invalid element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaskBytes {
    /// No mask is stored, validity is derived from a nodata value on decode.
    Implicit,
    /// Every element is valid (`false`) or invalid (`true`).
    Uniform(bool),
    /// One flag per element, in C order.
    Bits(Vec<bool>),
}

/// The type-erased representation of a masked array: data type, shape, little-endian element bytes and mask.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayBytes {
    data_type: DataType,
    shape: Vec<usize>,
    bytes: Vec<u8>,
    mask: MaskBytes,
}

/// An [`ArrayBytes`] creation error.
#[derive(Clone, Debug, Error)]
pub enum ArrayBytesError {
    /// The number of bytes does not match the shape and data type.
    #[error("got {len} bytes, expected {expected_len} for shape {shape:?} and data type {data_type}")]
    InvalidBytesLength {
        /// The number of bytes.
        len: usize,
        /// The expected number of bytes.
        expected_len: usize,
        /// The shape.
        shape: Vec<usize>,
        /// The data type.
        data_type: DataType,
    },
    /// The number of mask flags does not match the shape.
    #[error("got {len} mask flags, expected {expected_len}")]
    InvalidMaskLength {
        /// The number of mask flags.
        len: usize,
        /// The number of elements.
        expected_len: usize,
    },
    /// The number of elements or bytes of the shape overflows `usize`.
    #[error("shape {_0:?} is too large")]
    ShapeOverflow(Vec<usize>),
    /// An element error.
    #[error(transparent)]
    ElementError(#[from] ElementError),
}

/// Return the number of elements of `shape`, or [`None`] on overflow.
pub(crate) fn checked_num_elements(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &size| acc.checked_mul(size))
}

impl ArrayBytes {
    /// Create a new [`ArrayBytes`].
    ///
    /// # Errors
    /// Returns an [`ArrayBytesError`] if `shape` is too large or the length of `bytes` or of a [`MaskBytes::Bits`] mask does not match `shape`.
    pub fn new(
        data_type: DataType,
        shape: Vec<usize>,
        bytes: Vec<u8>,
        mask: MaskBytes,
    ) -> Result<Self, ArrayBytesError> {
        let Some((num_elements, expected_len)) = checked_num_elements(&shape).and_then(|num_elements| {
            num_elements
                .checked_mul(data_type.size())
                .map(|expected_len| (num_elements, expected_len))
        }) else {
            return Err(ArrayBytesError::ShapeOverflow(shape));
        };
        if bytes.len() != expected_len {
            return Err(ArrayBytesError::InvalidBytesLength {
                len: bytes.len(),
                expected_len,
                shape,
                data_type,
            });
        }
        if let MaskBytes::Bits(bits) = &mask {
            if bits.len() != num_elements {
                return Err(ArrayBytesError::InvalidMaskLength {
                    len: bits.len(),
                    expected_len: num_elements,
                });
            }
        }
        Ok(Self {
            data_type,
            shape,
            bytes,
            mask,
        })
    }

    /// Create [`ArrayBytes`] from typed elements in C order.
    ///
    /// # Errors
    /// Returns an [`ArrayBytesError`] if the number of elements or mask flags does not match `shape`.
    pub fn from_elements<T: Element>(
        shape: Vec<usize>,
        elements: impl IntoIterator<Item = T>,
        mask: MaskBytes,
    ) -> Result<Self, ArrayBytesError> {
        Self::new(T::DATA_TYPE, shape, elements_to_bytes(elements), mask)
    }

    /// Return the data type.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Return the shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Return the number of elements.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Return the little-endian element bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Return the mask.
    #[must_use]
    pub const fn mask(&self) -> &MaskBytes {
        &self.mask
    }

    /// Decompose into the shape, elements and mask.
    ///
    /// # Errors
    /// Returns an [`ElementError`] if `T` does not match the data type.
    pub fn into_elements<T: Element>(self) -> Result<(Vec<usize>, Vec<T>, MaskBytes), ElementError> {
        T::validate_data_type(self.data_type)?;
        let elements = bytes_to_elements(&self.bytes)?;
        Ok((self.shape, elements, self.mask))
    }
}
