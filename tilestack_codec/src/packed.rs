//! The packed tile format.
//!
//! ```text
//! magic "TSPK" | version u8 | data type id u8 | compression id u8 | mask kind u8 | ndim u8
//! shape: ndim x u64
//! data length u64 | data
//! mask length u64 | mask          (mask kind 3 only)
//! crc32c u32
//! ```
//!
//! Integers are little-endian. The data section holds the little-endian element bytes and the mask section holds one bit per element (least significant bit first), both compressed with the configured [`Compression`].
//! The checksum covers every preceding byte.

use super::{
    ArrayBytes, ArrayBytesError, CodecError, Compression, DataType, MaskBytes, TileCodecTraits,
    array_bytes::checked_num_elements,
};

const MAGIC: &[u8; 4] = b"TSPK";
const VERSION: u8 = 1;
const CHECKSUM_SIZE: usize = size_of::<u32>();

const MASK_IMPLICIT: u8 = 0;
const MASK_UNIFORM_VALID: u8 = 1;
const MASK_UNIFORM_INVALID: u8 = 2;
const MASK_BITS: u8 = 3;

/// The default tile codec.
#[derive(Clone, Debug, Default)]
pub struct PackedCodec {
    compression: Compression,
}

impl PackedCodec {
    /// Create a new packed codec with `compression`.
    ///
    /// # Errors
    /// Returns [`CodecError::CompressionLevel`] if the compression level is not supported.
    pub fn new(compression: Compression) -> Result<Self, CodecError> {
        compression.validate()?;
        Ok(Self { compression })
    }

    /// Return the compression.
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut packed = vec![0u8; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
        packed[i / 8] |= 1 << (i % 8);
    }
    packed
}

fn unpack_bits(packed: &[u8], len: usize) -> Vec<bool> {
    (0..len).map(|i| packed[i / 8] & (1 << (i % 8)) != 0).collect()
}

fn write_section(out: &mut Vec<u8>, section: &[u8]) {
    out.extend_from_slice(&(section.len() as u64).to_le_bytes());
    out.extend_from_slice(section);
}

/// A cursor over an encoded value reporting truncation as [`CodecError::Truncated`].
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        let available = self.bytes.len() - self.offset;
        if needed > available {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed,
                available,
            });
        }
        let taken = &self.bytes[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(taken)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn usize(&mut self) -> Result<usize, CodecError> {
        let value = self.u64()?;
        usize::try_from(value)
            .map_err(|_| CodecError::Other(format!("{value} does not fit in usize")))
    }

    fn section(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.usize()?;
        self.take(len)
    }
}

impl TileCodecTraits for PackedCodec {
    fn file_extension(&self) -> &str {
        "tspk"
    }

    fn encode(&self, array: &ArrayBytes) -> Result<Vec<u8>, CodecError> {
        let ndim = u8::try_from(array.shape().len()).map_err(|_| {
            CodecError::Other(format!("dimensionality {} exceeds 255", array.shape().len()))
        })?;
        let mask_kind = match array.mask() {
            MaskBytes::Implicit => MASK_IMPLICIT,
            MaskBytes::Uniform(false) => MASK_UNIFORM_VALID,
            MaskBytes::Uniform(true) => MASK_UNIFORM_INVALID,
            MaskBytes::Bits(_) => MASK_BITS,
        };

        let mut out = Vec::with_capacity(array.bytes().len() / 2 + 64);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&[
            VERSION,
            array.data_type().id(),
            self.compression.id(),
            mask_kind,
            ndim,
        ]);
        for &size in array.shape() {
            out.extend_from_slice(&(size as u64).to_le_bytes());
        }
        write_section(&mut out, &self.compression.compress(array.bytes())?);
        if let MaskBytes::Bits(bits) = array.mask() {
            write_section(&mut out, &self.compression.compress(&pack_bits(bits))?);
        }
        let checksum = crc32c::crc32c(&out).to_le_bytes();
        out.extend_from_slice(&checksum);
        Ok(out)
    }

    fn decode(&self, encoded_value: &[u8]) -> Result<ArrayBytes, CodecError> {
        if encoded_value.len() < MAGIC.len() || &encoded_value[..MAGIC.len()] != MAGIC {
            return Err(CodecError::InvalidMagic);
        }
        if encoded_value.len() < MAGIC.len() + CHECKSUM_SIZE {
            return Err(CodecError::Truncated {
                offset: MAGIC.len(),
                needed: CHECKSUM_SIZE,
                available: encoded_value.len() - MAGIC.len(),
            });
        }
        let (body, checksum_stored) = encoded_value.split_at(encoded_value.len() - CHECKSUM_SIZE);
        if crc32c::crc32c(body).to_le_bytes() != checksum_stored {
            return Err(CodecError::InvalidChecksum);
        }

        let mut reader = Reader {
            bytes: body,
            offset: MAGIC.len(),
        };
        let version = reader.u8()?;
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let data_type = DataType::from_id(reader.u8()?)?;
        let compression_id = reader.u8()?;
        let mask_kind = reader.u8()?;
        let ndim = reader.u8()?;
        let shape = (0..ndim)
            .map(|_| reader.usize())
            .collect::<Result<Vec<_>, _>>()?;
        let Some(num_elements) = checked_num_elements(&shape) else {
            return Err(ArrayBytesError::ShapeOverflow(shape).into());
        };

        let bytes = Compression::decompress(compression_id, reader.section()?)?;
        let mask = match mask_kind {
            MASK_IMPLICIT => MaskBytes::Implicit,
            MASK_UNIFORM_VALID => MaskBytes::Uniform(false),
            MASK_UNIFORM_INVALID => MaskBytes::Uniform(true),
            MASK_BITS => {
                let packed = Compression::decompress(compression_id, reader.section()?)?;
                if packed.len() != num_elements.div_ceil(8) {
                    return Err(CodecError::Other(format!(
                        "mask section holds {} bytes, expected {}",
                        packed.len(),
                        num_elements.div_ceil(8)
                    )));
                }
                MaskBytes::Bits(unpack_bits(&packed, num_elements))
            }
            _ => return Err(CodecError::UnknownMaskKind(mask_kind)),
        };
        if reader.offset != body.len() {
            return Err(CodecError::TrailingBytes(body.len() - reader.offset));
        }

        Ok(ArrayBytes::new(data_type, shape, bytes, mask)?)
    }
}
