use crate::DataType;
use serde::{Serialize, Serializer};
use std::fmt;

/// Error returned when converting a `PointValue` into a concrete Rust primitive.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueCastError {
    /// Numeric value is NaN/Inf and cannot be represented in target type.
    #[error("numeric value is not finite")]
    NotFinite,
    /// Numeric value is out of the representable range of the target type.
    #[error("numeric value out of range for {target}")]
    OutOfRange { target: &'static str },
    /// Float with a fractional part offered to an integer target.
    #[error("{value} is not an integer, required by {target}")]
    NotIntegral { target: &'static str, value: f64 },
    /// JSON input is not a number.
    #[error("expected a number for {target}, got {value}")]
    NotNumeric { target: &'static str, value: String },
}

/// A strongly-typed point value, one variant per register data type.
///
/// Integer variants hold the exact device value; 64-bit integers never pass
/// through a float on the decode path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointValue {
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
}

impl PointValue {
    /// Return the corresponding `DataType` for this value.
    #[inline]
    pub fn data_type(&self) -> DataType {
        match self {
            PointValue::Int16(_) => DataType::Int16,
            PointValue::UInt16(_) => DataType::UInt16,
            PointValue::Int32(_) => DataType::Int32,
            PointValue::UInt32(_) => DataType::UInt32,
            PointValue::Int64(_) => DataType::Int64,
            PointValue::UInt64(_) => DataType::UInt64,
            PointValue::Float32(_) => DataType::Float32,
            PointValue::Float64(_) => DataType::Float64,
        }
    }

    /// Lossy view as `f64`, used by scaling transforms.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match *self {
            PointValue::Int16(v) => v as f64,
            PointValue::UInt16(v) => v as f64,
            PointValue::Int32(v) => v as f64,
            PointValue::UInt32(v) => v as f64,
            PointValue::Int64(v) => v as f64,
            PointValue::UInt64(v) => v as f64,
            PointValue::Float32(v) => v as f64,
            PointValue::Float64(v) => v,
        }
    }

    /// Whether the value is numerically zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        match *self {
            PointValue::Float32(v) => v == 0.0,
            PointValue::Float64(v) => v == 0.0,
            PointValue::Int64(v) => v == 0,
            PointValue::UInt64(v) => v == 0,
            other => other.as_f64() == 0.0,
        }
    }

    /// Convert into the variant matching `target`, with range checks.
    pub fn cast(&self, target: DataType) -> Result<PointValue, ValueCastError> {
        Ok(match target {
            DataType::Int16 => PointValue::Int16(i16::try_from(self)?),
            DataType::UInt16 => PointValue::UInt16(u16::try_from(self)?),
            DataType::Int32 => PointValue::Int32(i32::try_from(self)?),
            DataType::UInt32 => PointValue::UInt32(u32::try_from(self)?),
            DataType::Int64 => PointValue::Int64(i64::try_from(self)?),
            DataType::UInt64 => PointValue::UInt64(u64::try_from(self)?),
            DataType::Float32 => PointValue::Float32(f32::try_from(self)?),
            DataType::Float64 => PointValue::Float64(f64::from(self)),
        })
    }

    /// Convert this value into a `serde_json::Value` for the platform RPC layer.
    ///
    /// Non-finite floats become `null`.
    pub fn to_json_value(&self) -> serde_json::Value {
        match *self {
            PointValue::Int16(v) => serde_json::Value::Number((v as i64).into()),
            PointValue::UInt16(v) => serde_json::Value::Number((v as u64).into()),
            PointValue::Int32(v) => serde_json::Value::Number((v as i64).into()),
            PointValue::UInt32(v) => serde_json::Value::Number((v as u64).into()),
            PointValue::Int64(v) => serde_json::Value::Number(v.into()),
            PointValue::UInt64(v) => serde_json::Value::Number(v.into()),
            PointValue::Float32(v) => {
                serde_json::Number::from_f64(v as f64).map_or(serde_json::Value::Null, Into::into)
            }
            PointValue::Float64(v) => {
                serde_json::Number::from_f64(v).map_or(serde_json::Value::Null, Into::into)
            }
        }
    }

    /// Convert a JSON number into a value of the `expected` type.
    ///
    /// Integers are range checked; floats are accepted for integer targets when they
    /// round into range.
    pub fn from_json(expected: DataType, v: &serde_json::Value) -> Result<Self, ValueCastError> {
        let raw = if let Some(u) = v.as_u64() {
            PointValue::UInt64(u)
        } else if let Some(i) = v.as_i64() {
            PointValue::Int64(i)
        } else if let Some(f) = v.as_f64() {
            PointValue::Float64(f)
        } else {
            return Err(ValueCastError::NotNumeric {
                target: expected.name(),
                value: v.to_string(),
            });
        };
        raw.cast(expected)
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Int16(v) => write!(f, "{v}"),
            PointValue::UInt16(v) => write!(f, "{v}"),
            PointValue::Int32(v) => write!(f, "{v}"),
            PointValue::UInt32(v) => write!(f, "{v}"),
            PointValue::Int64(v) => write!(f, "{v}"),
            PointValue::UInt64(v) => write!(f, "{v}"),
            PointValue::Float32(v) => write!(f, "{v}"),
            PointValue::Float64(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for PointValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match *self {
            PointValue::Int16(v) => serializer.serialize_i16(v),
            PointValue::UInt16(v) => serializer.serialize_u16(v),
            PointValue::Int32(v) => serializer.serialize_i32(v),
            PointValue::UInt32(v) => serializer.serialize_u32(v),
            PointValue::Int64(v) => serializer.serialize_i64(v),
            PointValue::UInt64(v) => serializer.serialize_u64(v),
            PointValue::Float32(v) => serializer.serialize_f32(v),
            PointValue::Float64(v) => serializer.serialize_f64(v),
        }
    }
}

macro_rules! impl_from_primitive {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for PointValue {
                #[inline]
                fn from(v: $t) -> Self {
                    PointValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_primitive!(
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

/// Largest distance from the nearest integer still accepted for integer targets.
const INTEGRAL_TOLERANCE: f64 = 1e-6;

// `max_excl` is `MAX + 1`, exact in f64 for every integer width.
#[inline]
fn float_to_int(
    f: f64,
    min: f64,
    max_excl: f64,
    target: &'static str,
) -> Result<f64, ValueCastError> {
    if !f.is_finite() {
        return Err(ValueCastError::NotFinite);
    }
    let r = f.round();
    if (f - r).abs() > INTEGRAL_TOLERANCE {
        return Err(ValueCastError::NotIntegral { target, value: f });
    }
    if r < min || r >= max_excl {
        return Err(ValueCastError::OutOfRange { target });
    }
    Ok(r)
}

#[inline]
fn out_of_range<E>(target: &'static str) -> impl Fn(E) -> ValueCastError {
    move |_| ValueCastError::OutOfRange { target }
}

macro_rules! impl_try_from_int {
    ($($t:ty => $name:literal),* $(,)?) => {
        $(
            impl TryFrom<&PointValue> for $t {
                type Error = ValueCastError;

                #[inline]
                fn try_from(v: &PointValue) -> Result<Self, Self::Error> {
                    match *v {
                        PointValue::Int16(x) => <$t>::try_from(x).map_err(out_of_range($name)),
                        PointValue::UInt16(x) => <$t>::try_from(x).map_err(out_of_range($name)),
                        PointValue::Int32(x) => <$t>::try_from(x).map_err(out_of_range($name)),
                        PointValue::UInt32(x) => <$t>::try_from(x).map_err(out_of_range($name)),
                        PointValue::Int64(x) => <$t>::try_from(x).map_err(out_of_range($name)),
                        PointValue::UInt64(x) => <$t>::try_from(x).map_err(out_of_range($name)),
                        PointValue::Float32(x) => {
                            float_to_int(x as f64, <$t>::MIN as f64, <$t>::MAX as f64 + 1.0, $name)
                                .map(|r| r as $t)
                        }
                        PointValue::Float64(x) => {
                            float_to_int(x, <$t>::MIN as f64, <$t>::MAX as f64 + 1.0, $name)
                                .map(|r| r as $t)
                        }
                    }
                }
            }
        )*
    };
}

impl_try_from_int!(
    i16 => "i16",
    u16 => "u16",
    i32 => "i32",
    u32 => "u32",
    i64 => "i64",
    u64 => "u64",
);

impl From<&PointValue> for f64 {
    #[inline]
    fn from(v: &PointValue) -> Self {
        v.as_f64()
    }
}

impl TryFrom<&PointValue> for f32 {
    type Error = ValueCastError;

    #[inline]
    fn try_from(v: &PointValue) -> Result<Self, Self::Error> {
        match *v {
            PointValue::Float32(x) => Ok(x),
            PointValue::Float64(x) => {
                if x.is_finite() && x.abs() > f32::MAX as f64 {
                    Err(ValueCastError::OutOfRange { target: "f32" })
                } else {
                    Ok(x as f32)
                }
            }
            other => Ok(other.as_f64() as f32),
        }
    }
}
