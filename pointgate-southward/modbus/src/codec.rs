use super::types::Endianness;
use pointgate_sdk::{DataType, PointValue, ValueCastError};
use thiserror::Error;

/// Failure converting between register words and a typed value.
///
/// Carries no point context; [`crate::field::Field`] attaches the point name.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("insufficient words for {data_type}: need {needed}, got {got}")]
    InsufficientWords {
        data_type: DataType,
        needed: usize,
        got: usize,
    },
    #[error("cannot encode as {data_type}: {source}")]
    Cast {
        data_type: DataType,
        #[source]
        source: ValueCastError,
    },
}

/// Register codec converting between typed values and 16-bit register words.
///
/// Decoding first normalizes the words into a big-endian byte string, then reads the
/// primitive with `from_be_bytes`. Encoding runs the same steps backwards.
///
/// - `byte_order` controls the two bytes inside each register.
/// - `word_order` controls the order of registers within a multi-register value.
pub struct ModbusCodec;

impl ModbusCodec {
    /// Convert registers to raw bytes honoring byte and word order.
    ///
    /// For `word_order = LittleEndian`, words are reversed before byte extraction.
    #[inline]
    pub fn words_to_bytes(
        words: &[u16],
        byte_order: Endianness,
        word_order: Endianness,
    ) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::with_capacity(words.len() * 2);
        let mut push = |w: u16| {
            let [b0, b1] = w.to_be_bytes();
            let (hi, lo) = Self::read_word((b0, b1), byte_order);
            out.push(hi);
            out.push(lo);
        };
        if matches!(word_order, Endianness::LittleEndian) {
            words.iter().rev().copied().for_each(&mut push);
        } else {
            words.iter().copied().for_each(&mut push);
        }
        out
    }

    /// Convert a byte slice into register words.
    /// If the number of bytes is odd, the last word is padded with zero.
    #[inline]
    pub fn bytes_to_words_from_slice(
        bytes: &[u8],
        byte_order: Endianness,
        word_order: Endianness,
    ) -> Vec<u16> {
        let mut words: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| {
                let (b0, b1) = (pair[0], pair.get(1).copied().unwrap_or(0));
                let (hi, lo) = Self::read_word((b0, b1), byte_order);
                u16::from_be_bytes([hi, lo])
            })
            .collect();
        if words.len() > 1 && matches!(word_order, Endianness::LittleEndian) {
            words.reverse();
        }
        words
    }

    #[inline(always)]
    pub fn read_word(bytes: (u8, u8), byte_order: Endianness) -> (u8, u8) {
        match byte_order {
            Endianness::BigEndian => (bytes.0, bytes.1),
            Endianness::LittleEndian => (bytes.1, bytes.0),
        }
    }

    /// Gather exactly `N` canonical big-endian bytes from the leading words.
    #[inline]
    fn canonical<const N: usize>(
        words: &[u16],
        data_type: DataType,
        byte_order: Endianness,
        word_order: Endianness,
    ) -> Result<[u8; N], CodecError> {
        let needed = N / 2;
        if words.len() < needed {
            return Err(Self::cold_insufficient(data_type, needed, words.len()));
        }
        let bytes = Self::words_to_bytes(&words[..needed], byte_order, word_order);
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Convert a register slice to a strongly-typed `PointValue`.
    ///
    /// Any bit pattern decodes; the only failure is a slice shorter than the type's width.
    pub fn parse_register_value(
        words: &[u16],
        data_type: DataType,
        byte_order: Endianness,
        word_order: Endianness,
    ) -> Result<PointValue, CodecError> {
        let (bo, wo) = (byte_order, word_order);
        Ok(match data_type {
            DataType::Int16 => {
                PointValue::Int16(i16::from_be_bytes(Self::canonical(words, data_type, bo, wo)?))
            }
            DataType::UInt16 => {
                PointValue::UInt16(u16::from_be_bytes(Self::canonical(words, data_type, bo, wo)?))
            }
            DataType::Int32 => {
                PointValue::Int32(i32::from_be_bytes(Self::canonical(words, data_type, bo, wo)?))
            }
            DataType::UInt32 => {
                PointValue::UInt32(u32::from_be_bytes(Self::canonical(words, data_type, bo, wo)?))
            }
            DataType::Int64 => {
                PointValue::Int64(i64::from_be_bytes(Self::canonical(words, data_type, bo, wo)?))
            }
            DataType::UInt64 => {
                PointValue::UInt64(u64::from_be_bytes(Self::canonical(words, data_type, bo, wo)?))
            }
            DataType::Float32 => {
                PointValue::Float32(f32::from_be_bytes(Self::canonical(words, data_type, bo, wo)?))
            }
            DataType::Float64 => {
                PointValue::Float64(f64::from_be_bytes(Self::canonical(words, data_type, bo, wo)?))
            }
        })
    }

    /// Encode registers from a strongly-typed `PointValue`.
    ///
    /// The value is range checked against `data_type` first; integers never lose precision,
    /// floats are rounded when the target is an integer type.
    pub fn encode_registers_from_value(
        value: &PointValue,
        data_type: DataType,
        byte_order: Endianness,
        word_order: Endianness,
    ) -> Result<Vec<u16>, CodecError> {
        let cast = value
            .cast(data_type)
            .map_err(|source| CodecError::Cast { data_type, source })?;
        let bytes: Vec<u8> = match cast {
            PointValue::Int16(v) => v.to_be_bytes().to_vec(),
            PointValue::UInt16(v) => v.to_be_bytes().to_vec(),
            PointValue::Int32(v) => v.to_be_bytes().to_vec(),
            PointValue::UInt32(v) => v.to_be_bytes().to_vec(),
            PointValue::Int64(v) => v.to_be_bytes().to_vec(),
            PointValue::UInt64(v) => v.to_be_bytes().to_vec(),
            PointValue::Float32(v) => v.to_be_bytes().to_vec(),
            PointValue::Float64(v) => v.to_be_bytes().to_vec(),
        };
        Ok(Self::bytes_to_words_from_slice(
            &bytes, byte_order, word_order,
        ))
    }

    #[inline(never)]
    #[cold]
    fn cold_insufficient(data_type: DataType, needed: usize, got: usize) -> CodecError {
        CodecError::InsufficientWords {
            data_type,
            needed,
            got,
        }
    }
}
