//! Device memory regions.
//!
//! This module implements the two regions the harness touches. It provides:
//! 1. **Flash:** A writable program-flash window mapped at a fixed base address.
//! 2. **Boot ROM:** A read-only boot program region mapped at address zero.
//!
//! Both regions decode absolute device addresses; anything outside their window
//! reads as `None` and writes are dropped.

use tracing::trace;

use crate::soc::traits::MemorySink;

/// Value of an erased flash byte.
pub const ERASED: u8 = 0xFF;

/// Program flash window.
#[derive(Debug, Clone)]
pub struct Flash {
    /// The base address where this window is mapped.
    base: u32,
    /// Backing storage, one byte per address.
    data: Vec<u8>,
    /// Writes that fell outside the window.
    dropped: u64,
}

impl Flash {
    /// Creates an erased flash window of `size` bytes at `base`.
    ///
    /// # Arguments
    ///
    /// * `base` - Absolute address of the first byte.
    /// * `size` - Window length in bytes.
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            data: vec![ERASED; size],
            dropped: 0,
        }
    }

    /// Returns the base address.
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Returns the window length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for a zero-length window.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the raw contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Number of writes dropped because they fell outside the window.
    pub const fn dropped_writes(&self) -> u64 {
        self.dropped
    }

    fn offset(&self, addr: u32) -> Option<usize> {
        let off = addr.checked_sub(self.base)? as usize;
        (off < self.data.len()).then_some(off)
    }
}

impl MemorySink for Flash {
    fn write_u8(&mut self, addr: u32, val: u8) {
        if let Some(off) = self.offset(addr) {
            self.data[off] = val;
        } else {
            self.dropped += 1;
            trace!("flash write to {addr:#010x} outside window dropped");
        }
    }

    fn read_u8(&self, addr: u32) -> Option<u8> {
        self.offset(addr).map(|off| self.data[off])
    }
}

/// Read-only boot program region mapped at address zero.
#[derive(Debug, Clone, Default)]
pub struct BootRom {
    data: Vec<u8>,
}

impl BootRom {
    /// Creates a ROM holding `image`.
    pub fn new(image: &[u8]) -> Self {
        Self {
            data: image.to_vec(),
        }
    }

    /// Reads one byte, or `None` past the end of the image.
    pub fn read_u8(&self, addr: u32) -> Option<u8> {
        self.data.get(addr as usize).copied()
    }

    /// Returns the ROM size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no ROM is installed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
