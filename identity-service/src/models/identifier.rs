//! Identifier model - 128-bit ids split into a partition index and a counter.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of bits holding the per-partition counter.
pub const COUNTER_BITS: u32 = 112;

/// Total number of partitions addressable by the high 16 bits.
pub const PARTITION_COUNT: u32 = 1 << 16;

/// Counters below this value under partition zero are reserved for well-known
/// system ids and are never handed out by the allocator.
pub const RESERVED_SYSTEM_IDS: u128 = 1024;

const COUNTER_MASK: u128 = (1u128 << COUNTER_BITS) - 1;

/// Globally unique identifier of a securable object or principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(Uuid);

impl Identifier {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Build an id from a partition index and a counter within that partition.
    /// Counter bits above the low 112 are discarded.
    pub fn from_parts(partition: u16, counter: u128) -> Self {
        let value = ((partition as u128) << COUNTER_BITS) | (counter & COUNTER_MASK);
        Self(Uuid::from_u128(value))
    }

    /// Well-known system id with the given counter under partition zero.
    pub const fn system(counter: u16) -> Self {
        Self(Uuid::from_u128(counter as u128))
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn partition(&self) -> u16 {
        (self.0.as_u128() >> COUNTER_BITS) as u16
    }

    pub fn counter(&self) -> u128 {
        self.0.as_u128() & COUNTER_MASK
    }

    /// True for ids in the reserved low sub-range of partition zero.
    pub fn is_reserved(&self) -> bool {
        self.partition() == 0 && self.counter() < RESERVED_SYSTEM_IDS
    }

    /// High and low 64-bit halves, as persisted by the range store.
    pub fn to_halves(&self) -> (i64, i64) {
        let value = self.0.as_u128();
        ((value >> 64) as u64 as i64, value as u64 as i64)
    }

    pub fn from_halves(msb: i64, lsb: i64) -> Self {
        let value = ((msb as u64 as u128) << 64) | (lsb as u64 as u128);
        Self(Uuid::from_u128(value))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for Identifier {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<Identifier> for Uuid {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
