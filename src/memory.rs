//! The story's address space, split at the static-memory boundary.
//!
//! Addresses below the boundary land in a persistent dynamic region;
//! addresses at or above it read from a shared immutable block. Writes into
//! the static region are a story-file contract violation and fail.

use std::sync::Arc;

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::util::{high_byte, low_byte, word_from_bytes};

#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    dynamic: ByteBuffer,
    static_bytes: Arc<[u8]>,
}

impl Memory {
    pub fn new(dynamic: Vec<u8>, static_bytes: Vec<u8>) -> Memory {
        Memory {
            dynamic: ByteBuffer::new(dynamic),
            static_bytes: static_bytes.into(),
        }
    }

    /// First address of the read-only region; equals the dynamic length.
    pub fn static_offset(&self) -> usize {
        self.dynamic.len()
    }

    /// Total image length, dynamic plus static.
    pub fn len(&self) -> usize {
        self.dynamic.len() + self.static_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many dynamic bytes differ from the loaded image.
    pub fn edit_count(&self) -> usize {
        self.dynamic.edit_count()
    }

    pub fn read_byte(&self, addr: usize) -> Result<u8> {
        if addr < self.static_offset() {
            self.dynamic.read_byte(addr)
        } else {
            self.static_bytes
                .get(addr - self.static_offset())
                .copied()
                .ok_or(Error::AddressOutOfRange(addr))
        }
    }

    /// Big-endian word read; may straddle the dynamic/static boundary.
    pub fn read_word(&self, addr: usize) -> Result<u16> {
        Ok(word_from_bytes(
            self.read_byte(addr)?,
            self.read_byte(addr + 1)?,
        ))
    }

    /// Successor memory with one dynamic byte changed. Writing at or above
    /// the static offset fails.
    pub fn write_byte(&self, addr: usize, value: u8) -> Result<Memory> {
        if addr >= self.static_offset() {
            return Err(Error::WriteToStaticMemory(addr));
        }
        Ok(Memory {
            dynamic: self.dynamic.write_byte(addr, value)?,
            static_bytes: Arc::clone(&self.static_bytes),
        })
    }

    /// Big-endian word write as two byte writes.
    pub fn write_word(&self, addr: usize, value: u16) -> Result<Memory> {
        self.write_byte(addr, high_byte(value))?
            .write_byte(addr + 1, low_byte(value))
    }
}
