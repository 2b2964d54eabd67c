//! The 64-byte story-file header.
//!
//! Multi-byte fields are big-endian. The structural accessors on `Story`
//! re-read these offsets on demand; `Header` is the parsed summary view a
//! host can display.

use std::fmt::Display;
use std::fmt::Formatter;

use crate::error::Result;
use crate::memory::Memory;

pub const HEADER_LENGTH: usize = 64;

pub const VERSION: usize = 0x00;
pub const RELEASE: usize = 0x02;
pub const HIGH_MEMORY_BASE: usize = 0x04;
pub const INITIAL_PC: usize = 0x06;
pub const DICTIONARY_BASE: usize = 0x08;
pub const OBJECT_TABLE_BASE: usize = 0x0A;
pub const GLOBAL_TABLE_BASE: usize = 0x0C;
pub const STATIC_MEMORY_BASE: usize = 0x0E;
pub const SERIAL: usize = 0x12;
pub const ABBREVIATIONS_BASE: usize = 0x18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub release: u16,
    pub serial: String,
    pub high_memory_base: usize,
    pub initial_pc: usize,
    pub dictionary_base: usize,
    pub object_table_base: usize,
    pub global_table_base: usize,
    pub static_memory_base: usize,
    pub abbreviations_base: usize,
}

impl Header {
    pub fn parse(memory: &Memory) -> Result<Header> {
        let mut serial = String::new();
        for offset in SERIAL..SERIAL + 6 {
            serial.push(memory.read_byte(offset)? as char);
        }
        Ok(Header {
            version: memory.read_byte(VERSION)?,
            release: memory.read_word(RELEASE)?,
            serial,
            high_memory_base: memory.read_word(HIGH_MEMORY_BASE)? as usize,
            initial_pc: memory.read_word(INITIAL_PC)? as usize,
            dictionary_base: memory.read_word(DICTIONARY_BASE)? as usize,
            object_table_base: memory.read_word(OBJECT_TABLE_BASE)? as usize,
            global_table_base: memory.read_word(GLOBAL_TABLE_BASE)? as usize,
            static_memory_base: memory.read_word(STATIC_MEMORY_BASE)? as usize,
            abbreviations_base: memory.read_word(ABBREVIATIONS_BASE)? as usize,
        })
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "
Z-code version:           {}
Release number:           {}
Serial number:            {}
Size of resident memory:  {:#06x}
Start PC:                 {:#06x}
Dictionary address:       {:#06x}
Object table address:     {:#06x}
Global variables address: {:#06x}
Size of dynamic memory:   {:#06x}
Abbreviations address:    {:#06x}
",
            self.version,
            self.release,
            self.serial,
            self.high_memory_base,
            self.initial_pc,
            self.dictionary_base,
            self.object_table_base,
            self.global_table_base,
            self.static_memory_base,
            self.abbreviations_base,
        )
    }
}
