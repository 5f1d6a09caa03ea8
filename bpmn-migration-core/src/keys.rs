use crate::types::Key;

/// Number of low bits available to the per-partition counter.
const KEY_BITS: u32 = 51;

/// Generates keys unique across partitions by encoding the partition id in
/// the upper bits.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    partition_id: u16,
    next: i64,
}

impl KeyGenerator {
    /// Partition id reserved for deployment keys.
    pub const DEPLOYMENT_PARTITION: u16 = 0;

    pub fn new(partition_id: u16) -> Self {
        Self {
            partition_id,
            next: 1,
        }
    }

    pub fn partition_id(&self) -> u16 {
        self.partition_id
    }

    pub fn next_key(&mut self) -> Key {
        let key = ((self.partition_id as i64) << KEY_BITS) + self.next;
        self.next += 1;
        key
    }
}

/// The partition that generated `key`.
pub fn partition_of(key: Key) -> u16 {
    (key >> KEY_BITS) as u16
}
