//! Array element types.

use std::fmt::Debug;

use thiserror::Error;

use super::DataType;

/// An element error.
#[derive(Clone, Debug, Error)]
pub enum ElementError {
    /// Incompatible element type for data type.
    #[error("incompatible element type {element} for data type {data_type}")]
    IncompatibleElementType {
        /// The data type the element type maps onto.
        element: DataType,
        /// The requested data type.
        data_type: DataType,
    },
    /// The number of bytes is not a multiple of the element size.
    #[error("got {len} bytes, which is not a multiple of the element size {size}")]
    InvalidBytesLength {
        /// The number of bytes.
        len: usize,
        /// The element size.
        size: usize,
    },
}

/// A trait representing an array element type.
///
/// Elements are serialised little-endian irrespective of the host.
pub trait Element:
    Copy + PartialEq + PartialOrd + Debug + Default + Send + Sync + num::NumCast + 'static
{
    /// The data type of the element.
    const DATA_TYPE: DataType;

    /// Append the little-endian bytes of `self` to `out`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Read an element from exactly [`DataType::size`] little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Returns true if `self` matches the `nodata` sentinel.
    ///
    /// Floats treat a `NaN` sentinel as matching any `NaN`.
    fn is_nodata(self, nodata: Self) -> bool {
        self == nodata
    }

    /// Validate the data type.
    ///
    /// # Errors
    /// Returns an [`ElementError`] if the data type is incompatible with [`Element`].
    fn validate_data_type(data_type: DataType) -> Result<(), ElementError> {
        if data_type == Self::DATA_TYPE {
            Ok(())
        } else {
            Err(ElementError::IncompatibleElementType {
                element: Self::DATA_TYPE,
                data_type,
            })
        }
    }

    /// Convert a configured nodata value into an element.
    ///
    /// Returns [`None`] if `value` is not representable.
    fn from_nodata(value: f64) -> Option<Self> {
        if Self::DATA_TYPE.can_represent(value) {
            num::NumCast::from(value)
        } else {
            None
        }
    }
}

macro_rules! impl_element_int {
    ($raw_type:ty, $data_type:expr) => {
        impl Element for $raw_type {
            const DATA_TYPE: DataType = $data_type;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; size_of::<$raw_type>()];
                buf.copy_from_slice(bytes);
                <$raw_type>::from_le_bytes(buf)
            }
        }
    };
}

macro_rules! impl_element_float {
    ($raw_type:ty, $data_type:expr) => {
        impl Element for $raw_type {
            const DATA_TYPE: DataType = $data_type;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; size_of::<$raw_type>()];
                buf.copy_from_slice(bytes);
                <$raw_type>::from_le_bytes(buf)
            }

            fn is_nodata(self, nodata: Self) -> bool {
                self == nodata || (self.is_nan() && nodata.is_nan())
            }
        }
    };
}

impl_element_int!(i8, DataType::Int8);
impl_element_int!(i16, DataType::Int16);
impl_element_int!(i32, DataType::Int32);
impl_element_int!(i64, DataType::Int64);
impl_element_int!(u8, DataType::UInt8);
impl_element_int!(u16, DataType::UInt16);
impl_element_int!(u32, DataType::UInt32);
impl_element_int!(u64, DataType::UInt64);
impl_element_float!(f32, DataType::Float32);
impl_element_float!(f64, DataType::Float64);

/// Serialise elements to little-endian bytes.
pub fn elements_to_bytes<T: Element>(elements: impl IntoIterator<Item = T>) -> Vec<u8> {
    let elements = elements.into_iter();
    let mut out = Vec::with_capacity(elements.size_hint().0 * T::DATA_TYPE.size());
    for element in elements {
        element.write_le(&mut out);
    }
    out
}

/// Deserialise little-endian bytes into elements.
///
/// # Errors
/// Returns [`ElementError::InvalidBytesLength`] if `bytes` is not a whole number of elements.
pub fn bytes_to_elements<T: Element>(bytes: &[u8]) -> Result<Vec<T>, ElementError> {
    let size = T::DATA_TYPE.size();
    if bytes.len() % size != 0 {
        return Err(ElementError::InvalidBytesLength {
            len: bytes.len(),
            size,
        });
    }
    Ok(bytes.chunks_exact(size).map(T::read_le).collect())
}
