//! Tile data types.
//!
//! The names follow `numpy`, so an output configuration written for other
//! raster tooling (e.g. `"dtype": "uint16"`) parses unchanged.

use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A fixed-width numeric data type.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// `int8`
    #[display("int8")]
    Int8,
    /// `int16`
    #[display("int16")]
    Int16,
    /// `int32`
    #[display("int32")]
    Int32,
    /// `int64`
    #[display("int64")]
    Int64,
    /// `uint8`
    #[display("uint8")]
    UInt8,
    /// `uint16`
    #[display("uint16")]
    UInt16,
    /// `uint32`
    #[display("uint32")]
    UInt32,
    /// `uint64`
    #[display("uint64")]
    UInt64,
    /// `float32`
    #[display("float32")]
    Float32,
    /// `float64`
    #[display("float64")]
    Float64,
}

/// An unknown data type name.
#[derive(Clone, Debug, Error)]
#[error("unknown data type {_0}")]
pub struct UnknownDataTypeError(String);

/// An unknown data type identifier in an encoded tile.
#[derive(Clone, Copy, Debug, Error)]
#[error("unknown data type identifier {_0}")]
pub struct UnknownDataTypeIdError(u8);

impl DataType {
    /// Every supported data type.
    pub const ALL: [Self; 10] = [
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Float32,
        Self::Float64,
    ];

    /// The size of an element in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Returns true for `float32` and `float64`.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// The identifier of the data type in the packed tile format.
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::Int8 => 0,
            Self::Int16 => 1,
            Self::Int32 => 2,
            Self::Int64 => 3,
            Self::UInt8 => 4,
            Self::UInt16 => 5,
            Self::UInt32 => 6,
            Self::UInt64 => 7,
            Self::Float32 => 8,
            Self::Float64 => 9,
        }
    }

    /// Create a data type from its packed tile format identifier.
    ///
    /// # Errors
    /// Returns [`UnknownDataTypeIdError`] if `id` does not identify a data type.
    pub fn from_id(id: u8) -> Result<Self, UnknownDataTypeIdError> {
        Self::ALL
            .into_iter()
            .find(|data_type| data_type.id() == id)
            .ok_or(UnknownDataTypeIdError(id))
    }

    /// Returns true if `value` can be stored in this data type without loss.
    ///
    /// `NaN` and infinities are representable by the float data types only.
    #[must_use]
    pub fn can_represent(self, value: f64) -> bool {
        // `end` is exclusive, the 64-bit maxima round up to a power of two as `f64`
        let integer_range =
            |start: f64, end: f64| value.fract() == 0.0 && value >= start && value < end;
        match self {
            Self::Float64 => true,
            Self::Float32 => {
                !value.is_finite() || (value >= f64::from(f32::MIN) && value <= f64::from(f32::MAX))
            }
            Self::Int8 => integer_range(i8::MIN.into(), f64::from(i8::MAX) + 1.0),
            Self::Int16 => integer_range(i16::MIN.into(), f64::from(i16::MAX) + 1.0),
            Self::Int32 => integer_range(i32::MIN.into(), f64::from(i32::MAX) + 1.0),
            Self::Int64 => integer_range(-(2f64.powi(63)), 2f64.powi(63)),
            Self::UInt8 => integer_range(0.0, f64::from(u8::MAX) + 1.0),
            Self::UInt16 => integer_range(0.0, f64::from(u16::MAX) + 1.0),
            Self::UInt32 => integer_range(0.0, f64::from(u32::MAX) + 1.0),
            Self::UInt64 => integer_range(0.0, 2f64.powi(64)),
        }
    }
}

impl FromStr for DataType {
    type Err = UnknownDataTypeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|data_type| data_type.to_string() == name)
            .ok_or_else(|| UnknownDataTypeError(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_names() {
        for data_type in DataType::ALL {
            assert_eq!(data_type.to_string().parse::<DataType>().unwrap(), data_type);
            let json = serde_json::to_string(&data_type).unwrap();
            assert_eq!(json, format!("\"{data_type}\""));
        }
        assert!("float16".parse::<DataType>().is_err());
        assert!("Float32".parse::<DataType>().is_err());
    }

    #[test]
    fn data_type_ids() {
        for data_type in DataType::ALL {
            assert_eq!(DataType::from_id(data_type.id()).unwrap(), data_type);
        }
        assert!(DataType::from_id(200).is_err());
    }

    #[test]
    fn data_type_can_represent() {
        assert!(DataType::UInt8.can_represent(0.0));
        assert!(DataType::UInt8.can_represent(255.0));
        assert!(!DataType::UInt8.can_represent(-1.0));
        assert!(!DataType::UInt8.can_represent(256.0));
        assert!(!DataType::Int16.can_represent(0.5));
        assert!(!DataType::Int32.can_represent(f64::NAN));
        assert!(DataType::Float32.can_represent(f64::NAN));
        assert!(DataType::Float32.can_represent(-9999.0));
        assert!(!DataType::Float32.can_represent(1e300));
    }

    #[test]
    fn data_type_can_represent_64_bit_limits() {
        assert!(DataType::Int64.can_represent(-9_223_372_036_854_775_808.0));
        assert!(!DataType::Int64.can_represent(9_223_372_036_854_775_808.0));
        assert!(DataType::Int64.can_represent(9_223_372_036_854_774_784.0));
        assert!(!DataType::UInt64.can_represent(18_446_744_073_709_551_616.0));
        assert!(DataType::UInt64.can_represent(18_446_744_073_709_549_568.0));
        assert!(!DataType::UInt64.can_represent(-1.0));
    }
}
