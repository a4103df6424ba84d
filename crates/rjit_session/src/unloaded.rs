use ahash::AHashSet;

use crate::ids::ClassId;

/// Addresses the client reported as unloaded.
///
/// Scoped to one session; the same number in another client's set refers
/// to unrelated memory.
#[derive(Debug, Clone, Default)]
pub struct UnloadedAddressSet {
    addresses: AHashSet<u64>,
    ranges: Vec<(u64, u64)>,
}

impl UnloadedAddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: u64) -> bool {
        self.addresses.insert(address)
    }

    pub fn insert_class(&mut self, class: ClassId) -> bool {
        self.insert(class.address())
    }

    /// Record a half-open address range, e.g. the method table of an
    /// unloaded class
    pub fn insert_range(&mut self, start: u64, end: u64) {
        if start < end {
            self.ranges.push((start, end));
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        self.addresses.contains(&address)
            || self
                .ranges
                .iter()
                .any(|&(start, end)| start <= address && address < end)
    }

    pub fn contains_class(&self, class: ClassId) -> bool {
        self.contains(class.address())
    }

    pub fn len(&self) -> usize {
        self.addresses.len() + self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.ranges.is_empty()
    }
}
