use std::collections::BTreeMap;

use blinksim_core::soc::MemorySink;

/// Byte-addressable sink covering the whole 32-bit space.
#[derive(Debug, Default, Clone)]
pub struct SparseMemory {
    bytes: BTreeMap<u32, u8>,
    writes: usize,
}

impl SparseMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte at `addr`, or `None` if never written.
    pub fn get(&self, addr: u32) -> Option<u8> {
        self.bytes.get(&addr).copied()
    }

    /// `len` bytes starting at `addr`; unwritten bytes read as `None`.
    pub fn range(&self, addr: u32, len: usize) -> Vec<Option<u8>> {
        (0..len)
            .map(|i| self.get(addr.wrapping_add(i as u32)))
            .collect()
    }

    /// Every written byte, in address order.
    pub fn contents(&self) -> Vec<(u32, u8)> {
        self.bytes.iter().map(|(a, b)| (*a, *b)).collect()
    }

    /// Number of `write_u8` calls.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn is_untouched(&self) -> bool {
        self.writes == 0
    }
}

impl MemorySink for SparseMemory {
    fn write_u8(&mut self, addr: u32, val: u8) {
        self.writes += 1;
        let _ = self.bytes.insert(addr, val);
    }

    fn read_u8(&self, addr: u32) -> Option<u8> {
        self.get(addr)
    }
}
