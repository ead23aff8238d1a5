use super::{
    codec::{CodecError, ModbusCodec},
    types::{Endianness, RegisterArea},
};
use pointgate_sdk::{AccessMode, DataType, DriverError, DriverResult, PointValue};

/// Value conversion applied between the register representation and the caller.
///
/// `apply` runs after decoding, `invert` before encoding.
#[derive(Debug, Clone, Copy, Default)]
pub enum Transform {
    #[default]
    Identity,
    /// Linear scale: the caller sees `raw * multiplier` as a float.
    Scale(f64),
    /// Explicit pair of pure functions.
    Custom {
        decode: fn(PointValue) -> PointValue,
        encode: fn(PointValue) -> PointValue,
    },
}

impl Transform {
    #[inline]
    pub fn apply(&self, raw: PointValue) -> PointValue {
        match self {
            Transform::Identity => raw,
            Transform::Scale(m) => PointValue::Float64(raw.as_f64() * m),
            Transform::Custom { decode, .. } => decode(raw),
        }
    }

    #[inline]
    pub fn invert(&self, value: PointValue) -> PointValue {
        match self {
            Transform::Identity => value,
            Transform::Scale(m) => PointValue::Float64(value.as_f64() / m),
            Transform::Custom { encode, .. } => encode(value),
        }
    }
}

/// Register mapping backing one named point.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    /// Declared register address, interpreted by the table's addressing convention
    pub address: u16,
    pub data_type: DataType,
    /// Display only
    pub units: String,
    /// Display only
    pub precision: u8,
    pub transform: Transform,
    pub access_mode: AccessMode,
    /// Applies to bytes within a register and to register order
    pub byte_order: Endianness,
    pub description: Option<String>,
    area: Option<RegisterArea>,
}

impl Field {
    /// Read-write, big-endian, holding-register field with identity transform.
    pub fn new(name: impl Into<String>, address: u16, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            address,
            data_type,
            units: String::new(),
            precision: 2,
            transform: Transform::Identity,
            access_mode: AccessMode::ReadWrite,
            byte_order: Endianness::BigEndian,
            description: None,
            area: None,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    pub fn with_byte_order(mut self, byte_order: Endianness) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_area(mut self, area: RegisterArea) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Registers occupied by this field.
    #[inline]
    pub fn width(&self) -> u16 {
        self.data_type.register_width()
    }

    /// Register bank holding this field.
    ///
    /// Read-only fields default to input registers, everything else to holding registers.
    #[inline]
    pub fn register_area(&self) -> RegisterArea {
        self.area.unwrap_or(match self.access_mode {
            AccessMode::Read => RegisterArea::Input,
            AccessMode::Write | AccessMode::ReadWrite => RegisterArea::Holding,
        })
    }

    /// Fails with `Permission` if the access mode excludes writing.
    pub fn validate_write(&self) -> DriverResult<()> {
        if self.access_mode.is_writable() {
            Ok(())
        } else {
            Err(DriverError::Permission {
                point: self.name.clone(),
                access: self.access_mode,
                operation: "write",
            })
        }
    }

    /// Fails with `Permission` if the access mode excludes reading.
    pub fn validate_read(&self) -> DriverResult<()> {
        if self.access_mode.is_readable() {
            Ok(())
        } else {
            Err(DriverError::Permission {
                point: self.name.clone(),
                access: self.access_mode,
                operation: "read",
            })
        }
    }

    /// Reassemble `width` words into the typed value, then apply the transform.
    pub fn decode(&self, words: &[u16]) -> DriverResult<PointValue> {
        let raw = ModbusCodec::parse_register_value(
            words,
            self.data_type,
            self.byte_order,
            self.byte_order,
        )
        .map_err(|e| self.codec_error(e))?;
        Ok(self.transform.apply(raw))
    }

    /// Invert the transform, then split the value into `width` words.
    pub fn encode(&self, value: &PointValue) -> DriverResult<Vec<u16>> {
        let mut raw = self.transform.invert(*value);
        if matches!(self.transform, Transform::Scale(_)) && !self.data_type.is_float() {
            // quotients like -12.3 / 0.1 are not exactly integral
            raw = PointValue::Float64(raw.as_f64().round());
        }
        ModbusCodec::encode_registers_from_value(
            &raw,
            self.data_type,
            self.byte_order,
            self.byte_order,
        )
        .map_err(|e| self.codec_error(e))
    }

    #[cold]
    fn codec_error(&self, err: CodecError) -> DriverError {
        match err {
            CodecError::Cast { data_type, source } => DriverError::Range {
                point: self.name.clone(),
                data_type,
                reason: source.to_string(),
            },
            e @ CodecError::InsufficientWords { .. } => DriverError::Protocol {
                context: format!("point '{}'", self.name),
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(dt: DataType, order: Endianness) -> Field {
        Field::new("p", 0, dt).with_byte_order(order)
    }

    #[test]
    fn decode_encode_round_trip_at_type_limits() {
        let cases = [
            (DataType::UInt16, vec![PointValue::UInt16(0), PointValue::UInt16(u16::MAX)]),
            (DataType::Int16, vec![PointValue::Int16(i16::MIN), PointValue::Int16(i16::MAX)]),
            (DataType::UInt32, vec![PointValue::UInt32(0), PointValue::UInt32(u32::MAX)]),
            (DataType::Int32, vec![PointValue::Int32(i32::MIN), PointValue::Int32(i32::MAX)]),
            (DataType::UInt64, vec![PointValue::UInt64(0), PointValue::UInt64(u64::MAX)]),
            (DataType::Int64, vec![PointValue::Int64(i64::MIN), PointValue::Int64(i64::MAX)]),
            (
                DataType::Float32,
                vec![PointValue::Float32(f32::MIN), PointValue::Float32(f32::MAX), PointValue::Float32(0.0)],
            ),
        ];
        for order in [Endianness::BigEndian, Endianness::LittleEndian] {
            for (dt, values) in &cases {
                let f = field(*dt, order);
                for v in values {
                    let words = f.encode(v).unwrap();
                    assert_eq!(words.len(), f.width() as usize);
                    assert_eq!(f.decode(&words).unwrap(), *v);
                }
            }
        }
    }

    #[test]
    fn values_outside_type_range_fail_with_range_error() {
        let f = field(DataType::UInt16, Endianness::BigEndian);
        let err = f.encode(&PointValue::UInt32(1 << 16)).unwrap_err();
        assert!(matches!(err, DriverError::Range { ref point, data_type: DataType::UInt16, .. } if point == "p"));

        let f = field(DataType::Int32, Endianness::BigEndian);
        assert!(matches!(
            f.encode(&PointValue::Int64(i32::MIN as i64 - 1)),
            Err(DriverError::Range { .. })
        ));
        assert!(matches!(
            f.encode(&PointValue::Float64(f64::INFINITY)),
            Err(DriverError::Range { .. })
        ));
    }

    #[test]
    fn integer_values_are_coerced_into_field_type() {
        // the platform hands over JSON numbers, which arrive as the widest integer type
        let f = field(DataType::Int16, Endianness::BigEndian);
        let words = f.encode(&PointValue::Int64(-32768)).unwrap();
        assert_eq!(f.decode(&words).unwrap(), PointValue::Int16(i16::MIN));
    }

    #[test]
    fn write_permission() {
        let ro = Field::new("ro", 0, DataType::UInt16).with_access_mode(AccessMode::Read);
        assert!(matches!(
            ro.validate_write(),
            Err(DriverError::Permission { operation: "write", .. })
        ));
        assert!(ro.validate_read().is_ok());

        let wo = Field::new("wo", 0, DataType::UInt16).with_access_mode(AccessMode::Write);
        assert!(wo.validate_write().is_ok());
        assert!(wo.validate_read().is_err());
    }

    #[test]
    fn area_defaults_from_access_mode() {
        let ro = Field::new("ro", 0, DataType::UInt16).with_access_mode(AccessMode::Read);
        assert_eq!(ro.register_area(), RegisterArea::Input);
        assert_eq!(
            ro.with_area(RegisterArea::Holding).register_area(),
            RegisterArea::Holding
        );
        assert_eq!(
            Field::new("rw", 0, DataType::UInt16).register_area(),
            RegisterArea::Holding
        );
    }

    #[test]
    fn scale_transform() {
        let f = Field::new("temp", 0, DataType::Int16).with_transform(Transform::Scale(0.1));
        let words = f.encode(&PointValue::Float64(-12.3)).unwrap();
        assert_eq!(words, vec![(-123i16) as u16]);
        match f.decode(&words).unwrap() {
            PointValue::Float64(v) => assert!((v + 12.3).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fractional_value_for_integer_field_is_a_range_error() {
        let f = Field::new("count", 0, DataType::UInt16);
        match f.encode(&PointValue::Float64(1.7)) {
            Err(DriverError::Range { point, data_type, .. }) => {
                assert_eq!(point, "count");
                assert_eq!(data_type, DataType::UInt16);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.encode(&PointValue::Float64(2.0)).unwrap(), vec![2]);
    }

    #[test]
    fn float_at_i64_bound_is_a_range_error() {
        let f = Field::new("p", 0, DataType::Int64);
        assert!(matches!(
            f.encode(&PointValue::Float64(9_223_372_036_854_775_808.0)),
            Err(DriverError::Range { .. })
        ));
        let f = Field::new("p", 0, DataType::UInt64);
        assert!(matches!(
            f.encode(&PointValue::Float64(18_446_744_073_709_551_616.0)),
            Err(DriverError::Range { .. })
        ));
    }

    #[test]
    fn custom_transform() {
        fn to_celsius(v: PointValue) -> PointValue {
            PointValue::Float64(v.as_f64() - 273.0)
        }
        fn to_kelvin(v: PointValue) -> PointValue {
            PointValue::Float64(v.as_f64() + 273.0)
        }
        let f = Field::new("t", 0, DataType::UInt16).with_transform(Transform::Custom {
            decode: to_celsius,
            encode: to_kelvin,
        });
        let words = f.encode(&PointValue::Float64(20.0)).unwrap();
        assert_eq!(words, vec![293]);
        assert_eq!(f.decode(&words).unwrap(), PointValue::Float64(20.0));
    }

    #[test]
    fn short_response_is_a_protocol_error() {
        let f = field(DataType::UInt32, Endianness::BigEndian);
        assert!(matches!(f.decode(&[1]), Err(DriverError::Protocol { .. })));
    }
}
