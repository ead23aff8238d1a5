use super::{
    field::Field,
    types::{Addressing, RegisterArea},
};
use pointgate_sdk::{DriverError, DriverResult};
use std::collections::HashMap;

/// Ordered set of fields for one slave unit.
///
/// Built once per device definition through [`RegisterTableBuilder`] and shared by every
/// I/O call afterwards. Construction guarantees unique names, resolvable addresses and
/// non-overlapping register ranges within each register area.
#[derive(Debug, Clone)]
pub struct RegisterTable {
    slave_id: u8,
    addressing: Addressing,
    base_address: u16,
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl RegisterTable {
    pub fn builder(slave_id: u8) -> RegisterTableBuilder {
        RegisterTableBuilder {
            slave_id,
            addressing: Addressing::Offset,
            base_address: 0,
            fields: Vec::new(),
        }
    }

    #[inline]
    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    #[inline]
    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Fields in declaration order.
    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn field_by_name(&self, name: &str) -> DriverResult<&Field> {
        self.index
            .get(name)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| DriverError::NotFound {
                name: name.to_string(),
            })
    }

    /// Wire address of the first register of `field`.
    pub fn resolve_address(&self, field: &Field) -> DriverResult<u16> {
        resolve(self.addressing, self.base_address, field).map(|(start, _)| start)
    }
}

/// Returns the inclusive wire range `(start, end)` occupied by `field`.
fn resolve(addressing: Addressing, base: u16, field: &Field) -> DriverResult<(u16, u16)> {
    let start = match addressing {
        Addressing::Offset => base.checked_add(field.address),
        Addressing::Absolute => Some(field.address),
    };
    start
        .and_then(|s| s.checked_add(field.width() - 1).map(|e| (s, e)))
        .ok_or_else(|| {
            DriverError::Configuration(format!(
                "point '{}' at address {} (base {}, width {}) exceeds the register address space",
                field.name,
                field.address,
                base,
                field.width()
            ))
        })
}

pub struct RegisterTableBuilder {
    slave_id: u8,
    addressing: Addressing,
    base_address: u16,
    fields: Vec<Field>,
}

impl RegisterTableBuilder {
    pub fn addressing(mut self, addressing: Addressing) -> Self {
        self.addressing = addressing;
        self
    }

    /// Table base used by offset addressing.
    pub fn base_address(mut self, base_address: u16) -> Self {
        self.base_address = base_address;
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Validate and freeze the table.
    ///
    /// Fails with `Configuration` on duplicate names, out-of-space addresses or writable
    /// input registers, and with `Conflict` when two fields share a register.
    pub fn build(self) -> DriverResult<RegisterTable> {
        let mut index = HashMap::with_capacity(self.fields.len());
        let mut spans: Vec<(RegisterArea, u16, u16, usize)> = Vec::with_capacity(self.fields.len());

        for (i, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(DriverError::Configuration(format!(
                    "field at address {} has an empty name",
                    field.address
                )));
            }
            if index.insert(field.name.clone(), i).is_some() {
                return Err(DriverError::Configuration(format!(
                    "duplicate point name '{}' for slave {}",
                    field.name, self.slave_id
                )));
            }
            let area = field.register_area();
            if area == RegisterArea::Input && field.access_mode.is_writable() {
                return Err(DriverError::Configuration(format!(
                    "point '{}' is writable but mapped to input registers",
                    field.name
                )));
            }
            let (start, end) = resolve(self.addressing, self.base_address, field)?;
            spans.push((area, start, end, i));
        }

        spans.sort_by_key(|&(area, start, _, _)| (area, start));
        for pair in spans.windows(2) {
            let (area_a, _, end_a, a) = pair[0];
            let (area_b, start_b, end_b, b) = pair[1];
            if area_a == area_b && start_b <= end_a {
                return Err(DriverError::Conflict {
                    point: self.fields[b].name.clone(),
                    other: self.fields[a].name.clone(),
                    start: start_b,
                    end: end_a.min(end_b),
                });
            }
        }

        Ok(RegisterTable {
            slave_id: self.slave_id,
            addressing: self.addressing,
            base_address: self.base_address,
            fields: self.fields,
            index,
        })
    }
}
