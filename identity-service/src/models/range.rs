//! Range model - per-partition allocation cursor.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::identifier::{Identifier, COUNTER_BITS, RESERVED_SYSTEM_IDS};

/// Next-unallocated cursor of one partition, stored as the two 64-bit halves
/// of the next id to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Range {
    pub partition_index: i32,
    pub msb: i64,
    pub lsb: i64,
}

impl Range {
    /// Starting cursor for a partition. Partition zero starts above the
    /// reserved system ids.
    pub fn initial(partition: u16) -> Self {
        let start = if partition == 0 { RESERVED_SYSTEM_IDS } else { 0 };
        Self::at(Identifier::from_parts(partition, start))
    }

    fn at(next: Identifier) -> Self {
        let (msb, lsb) = next.to_halves();
        Self {
            partition_index: next.partition() as i32,
            msb,
            lsb,
        }
    }

    pub fn partition(&self) -> u16 {
        self.partition_index as u16
    }

    /// Next id this cursor will hand out.
    pub fn peek(&self) -> Identifier {
        Identifier::from_halves(self.msb, self.lsb)
    }

    /// Advance the cursor by `count`, returning the ids passed over in
    /// increasing order. Returns `None` and leaves the cursor untouched when
    /// the partition cannot supply `count` more ids. The top counter value is
    /// never issued so the cursor always stays inside its partition.
    pub fn advance(&mut self, count: u64) -> Option<Vec<Identifier>> {
        let start = self.peek().counter();
        let end = start.checked_add(count as u128)?;
        if end >= 1u128 << COUNTER_BITS {
            return None;
        }

        let partition = self.partition();
        let ids = (start..end)
            .map(|counter| Identifier::from_parts(partition, counter))
            .collect();
        *self = Self::at(Identifier::from_parts(partition, end));
        Some(ids)
    }
}

/// Outcome of one scroll over a set of partitions.
#[derive(Debug, Clone, Default)]
pub struct ScrollResult {
    /// Newly minted ids, grouped by partition in increasing order.
    pub ids: Vec<Identifier>,
    /// Partitions that could not supply the requested count.
    pub exhausted: Vec<u16>,
}
