use super::{
    field::Field,
    types::{ReadBatch, RegisterArea, MAX_READ_REGISTERS},
};
use std::collections::BTreeMap;

/// Configuration for ModbusPlanner planning behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusPlannerConfig {
    /// Maximum number of unused registers bridged when coalescing adjacent fields.
    pub max_gap: u16,
    /// Maximum quantity (span) allowed per merged batch.
    pub max_batch: u16,
}

impl Default for ModbusPlannerConfig {
    fn default() -> Self {
        Self {
            max_gap: 0,
            max_batch: MAX_READ_REGISTERS,
        }
    }
}

/// Request planner for batched register reads.
///
/// Groups fields by register area, sorts by wire address, and coalesces adjacent
/// (or within-gap) fields into range reads while respecting the maximum span.
/// Performs no I/O.
pub struct ModbusPlanner;

impl ModbusPlanner {
    /// Plan read batches for `(wire_address, field)` pairs.
    ///
    /// Batches come out ordered by area, then by start address. A field wider than
    /// `max_batch` still gets a batch of its own.
    pub fn plan_read_batches<'a>(
        cfg: ModbusPlannerConfig,
        fields: &[(u16, &'a Field)],
    ) -> Vec<ReadBatch<'a>> {
        if fields.is_empty() {
            return Vec::new();
        }
        let max_batch = u32::from(cfg.max_batch.clamp(1, MAX_READ_REGISTERS));
        let max_gap = u32::from(cfg.max_gap);

        let mut groups = BTreeMap::<RegisterArea, Vec<(u16, &'a Field)>>::new();
        for &(addr, f) in fields {
            groups.entry(f.register_area()).or_default().push((addr, f));
        }

        let mut batches = Vec::with_capacity(fields.len() / 4 + 1);

        // spans are computed in u32 so fields near 0xFFFF cannot wrap
        let last_of = |addr: u16, f: &Field| u32::from(addr) + u32::from(f.width()) - 1;

        for (area, mut group) in groups {
            group.sort_by_key(|&(addr, _)| addr);
            let mut iter = group.into_iter().peekable();
            while let Some((first_addr, first)) = iter.next() {
                let batch_start = u32::from(first_addr);
                let mut batch_end = last_of(first_addr, first);
                let mut batch_fields = vec![(first_addr, first)];

                while let Some(&(next_addr, next)) = iter.peek() {
                    let next_end = last_of(next_addr, next);
                    let span_if_merged = next_end.max(batch_end) - batch_start + 1;
                    let gap = u32::from(next_addr).saturating_sub(batch_end + 1);
                    if gap <= max_gap && span_if_merged <= max_batch {
                        batch_fields.push((next_addr, next));
                        batch_end = batch_end.max(next_end);
                        iter.next();
                    } else {
                        break;
                    }
                }

                batches.push(ReadBatch {
                    area,
                    start_addr: first_addr,
                    quantity: u16::try_from(batch_end - batch_start + 1).unwrap_or(u16::MAX),
                    fields: batch_fields,
                });
            }
        }

        batches
    }

    /// One batch per field, used when the transport cannot coalesce.
    pub fn plan_single_reads<'a>(fields: &[(u16, &'a Field)]) -> Vec<ReadBatch<'a>> {
        fields
            .iter()
            .map(|&(addr, f)| ReadBatch {
                area: f.register_area(),
                start_addr: addr,
                quantity: f.width(),
                fields: vec![(addr, f)],
            })
            .collect()
    }
}
