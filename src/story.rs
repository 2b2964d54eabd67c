//! A Z-Machine story image and its structural views.
//!
//! `Story` owns the split memory and derives everything else from
//! header-indicated offsets on demand. Writes go through the persistent
//! memory layer, so every mutation hands back a successor story and the
//! previous value stays usable.

use log::debug;

use crate::error::{Error, Result};
use crate::header;
use crate::header::Header;
use crate::instruction::Instruction;
use crate::memory::Memory;
use crate::text;

/// Globals are numbered 16..=255, 240 words at the global table base.
pub const GLOBAL_LOW: u16 = 16;
pub const GLOBAL_HIGH: u16 = 255;

/// Locals-count byte at the head of a routine may not exceed this.
pub const MAX_LOCALS: u8 = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    memory: Memory,
}

impl Story {
    /// Validate a raw story blob and split it at the static-memory base.
    pub fn load(bytes: &[u8]) -> Result<Story> {
        if bytes.len() < header::HEADER_LENGTH {
            return Err(Error::InvalidStoryFile(format!(
                "file is {} bytes, shorter than the 64-byte header",
                bytes.len()
            )));
        }
        let version = bytes[header::VERSION];
        if version != 3 {
            return Err(Error::InvalidStoryFile(format!(
                "unsupported z-machine version {}",
                version
            )));
        }
        let static_base = ((bytes[header::STATIC_MEMORY_BASE] as usize) << 8)
            | bytes[header::STATIC_MEMORY_BASE + 1] as usize;
        if static_base < header::HEADER_LENGTH || static_base > bytes.len() {
            return Err(Error::InvalidStoryFile(format!(
                "static memory base {:#06x} inconsistent with file length {:#06x}",
                static_base,
                bytes.len()
            )));
        }
        debug!(
            "loaded story: {} bytes, dynamic below {:#06x}",
            bytes.len(),
            static_base
        );
        Ok(Story {
            memory: Memory::new(
                bytes[..static_base].to_vec(),
                bytes[static_base..].to_vec(),
            ),
        })
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Parsed header summary for display.
    pub fn header(&self) -> Result<Header> {
        Header::parse(&self.memory)
    }

    pub fn version(&self) -> Result<u8> {
        self.memory.read_byte(header::VERSION)
    }

    pub fn high_memory_base(&self) -> Result<usize> {
        Ok(self.memory.read_word(header::HIGH_MEMORY_BASE)? as usize)
    }

    pub fn initial_pc(&self) -> Result<usize> {
        Ok(self.memory.read_word(header::INITIAL_PC)? as usize)
    }

    pub fn dictionary_base(&self) -> Result<usize> {
        Ok(self.memory.read_word(header::DICTIONARY_BASE)? as usize)
    }

    pub fn object_table_base(&self) -> Result<usize> {
        Ok(self.memory.read_word(header::OBJECT_TABLE_BASE)? as usize)
    }

    pub fn global_table_base(&self) -> Result<usize> {
        Ok(self.memory.read_word(header::GLOBAL_TABLE_BASE)? as usize)
    }

    pub fn static_memory_base(&self) -> Result<usize> {
        Ok(self.memory.read_word(header::STATIC_MEMORY_BASE)? as usize)
    }

    pub fn abbreviations_base(&self) -> Result<usize> {
        Ok(self.memory.read_word(header::ABBREVIATIONS_BASE)? as usize)
    }

    pub fn read_byte(&self, addr: usize) -> Result<u8> {
        self.memory.read_byte(addr)
    }

    pub fn read_word(&self, addr: usize) -> Result<u16> {
        self.memory.read_word(addr)
    }

    pub fn write_byte(&self, addr: usize, value: u8) -> Result<Story> {
        Ok(Story {
            memory: self.memory.write_byte(addr, value)?,
        })
    }

    pub fn write_word(&self, addr: usize, value: u16) -> Result<Story> {
        Ok(Story {
            memory: self.memory.write_word(addr, value)?,
        })
    }

    fn global_addr(&self, number: u16) -> Result<usize> {
        if !(GLOBAL_LOW..=GLOBAL_HIGH).contains(&number) {
            return Err(Error::InvalidGlobal(number));
        }
        Ok(self.global_table_base()? + 2 * (number - GLOBAL_LOW) as usize)
    }

    pub fn read_global(&self, number: u16) -> Result<u16> {
        let addr = self.global_addr(number)?;
        self.memory.read_word(addr)
    }

    pub fn write_global(&self, number: u16, value: u16) -> Result<Story> {
        let addr = self.global_addr(number)?;
        self.write_word(addr, value)
    }

    /// Byte address of abbreviation `index`'s text. Entries store word
    /// addresses, so the packed value is doubled.
    pub fn abbreviation_addr(&self, index: usize) -> Result<usize> {
        if index >= text::ABBREVIATION_COUNT {
            return Err(Error::InvalidAbbreviationIndex(index));
        }
        let entry = self.abbreviations_base()? + 2 * index;
        Ok(self.memory.read_word(entry)? as usize * 2)
    }

    /// Decode one abbreviation's text. Abbreviation contents may not chain
    /// into further abbreviations.
    pub fn abbreviation_text(&self, index: usize) -> Result<String> {
        let addr = self.abbreviation_addr(index)?;
        let (decoded, _) =
            text::decode_string(&self.memory, addr, &mut |_| Err(Error::NestedAbbreviation(addr)))?;
        Ok(decoded)
    }

    /// Decode the string at `addr`, returning the text and its encoded
    /// length in bytes.
    pub fn decode_string(&self, addr: usize) -> Result<(String, usize)> {
        text::decode_string(&self.memory, addr, &mut |index| self.abbreviation_text(index))
    }

    pub fn decode_instruction(&self, addr: usize) -> Result<Instruction> {
        Instruction::decode(self, addr)
    }

    /// v3 packed addresses unpack by doubling.
    pub fn unpack(&self, packed: u16) -> usize {
        packed as usize * 2
    }

    /// The locals-count byte at the head of a routine.
    pub fn routine_locals_count(&self, addr: usize) -> Result<u8> {
        let count = self.memory.read_byte(addr)?;
        if count > MAX_LOCALS {
            return Err(Error::TooManyLocals { addr, count });
        }
        Ok(count)
    }

    /// The declared default values for a routine's locals.
    pub fn routine_default_locals(&self, addr: usize) -> Result<Vec<u16>> {
        let count = self.routine_locals_count(addr)?;
        let mut defaults = Vec::with_capacity(count as usize);
        for n in 0..count as usize {
            defaults.push(self.memory.read_word(addr + 1 + 2 * n)?);
        }
        Ok(defaults)
    }

    /// Address of a routine's first instruction.
    pub fn routine_entry_point(&self, addr: usize) -> Result<usize> {
        let count = self.routine_locals_count(addr)?;
        Ok(addr + 1 + 2 * count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{set_word, test_story, test_story_bytes, ABBREV_STRINGS};

    #[test]
    fn rejects_truncated_file() {
        assert!(matches!(
            Story::load(&[3u8; 32]),
            Err(Error::InvalidStoryFile(_))
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut bytes = test_story_bytes();
        bytes[0] = 5;
        assert!(matches!(
            Story::load(&bytes),
            Err(Error::InvalidStoryFile(_))
        ));
    }

    #[test]
    fn rejects_static_base_past_file_end() {
        let mut bytes = test_story_bytes();
        set_word(&mut bytes, header::STATIC_MEMORY_BASE, 0x7FFF);
        assert!(matches!(
            Story::load(&bytes),
            Err(Error::InvalidStoryFile(_))
        ));
    }

    #[test]
    fn splits_at_static_base() {
        let mut bytes = test_story_bytes();
        set_word(&mut bytes, header::STATIC_MEMORY_BASE, 0x1A00);
        let mut grown = bytes;
        grown.resize(0x2000, 0);
        grown[0x1A00] = 0x42;
        let story = Story::load(&grown).unwrap();
        assert_eq!(story.static_memory_base().unwrap(), 0x1A00);
        assert_eq!(story.memory().static_offset(), 0x1A00);
        assert_eq!(story.read_byte(0x1A00).unwrap(), 0x42);
        assert!(story.write_byte(0x1A00, 1).is_err());
    }

    #[test]
    fn globals_live_at_the_table_base() {
        let story = test_story();
        let base = story.global_table_base().unwrap();
        let story = story.write_global(16, 0xABCD).unwrap();
        assert_eq!(story.read_word(base).unwrap(), 0xABCD);
        let story = story.write_global(255, 0x1234).unwrap();
        assert_eq!(story.read_word(base + 2 * 239).unwrap(), 0x1234);
        assert_eq!(story.read_global(255).unwrap(), 0x1234);
    }

    #[test]
    fn global_numbers_are_bounded() {
        let story = test_story();
        assert_eq!(story.read_global(15), Err(Error::InvalidGlobal(15)));
        assert!(story.write_global(0, 1).is_err());
    }

    #[test]
    fn writes_produce_successors() {
        let story = test_story();
        let base = story.global_table_base().unwrap();
        let story2 = story.write_word(base, 7).unwrap();
        assert_eq!(story.read_word(base).unwrap(), 0);
        assert_eq!(story2.read_word(base).unwrap(), 7);
    }

    #[test]
    fn abbreviation_index_is_bounded() {
        let story = test_story();
        assert_eq!(
            story.abbreviation_addr(96),
            Err(Error::InvalidAbbreviationIndex(96))
        );
    }

    #[test]
    fn expands_abbreviations_in_strings() {
        let story = test_story();
        // abbreviation 0 in the fixture decodes to "the"
        assert_eq!(story.abbreviation_text(0).unwrap(), "the");
        // a string using escape 1 + z-char 0 expands it inline
        let zchars = [1u8, 0, 0, 6];
        let words = crate::text::pack_zchars(&zchars);
        let mut bytes = test_story_bytes();
        let addr = ABBREV_STRINGS + 0x20;
        for (i, w) in words.iter().enumerate() {
            set_word(&mut bytes, addr + 2 * i, *w);
        }
        let story = Story::load(&bytes).unwrap();
        let (decoded, _) = story.decode_string(addr).unwrap();
        assert_eq!(decoded, "the a");
    }

    #[test]
    fn nested_abbreviations_are_rejected() {
        // point abbreviation 1's text at a sequence that itself uses an
        // abbreviation escape
        let mut bytes = test_story_bytes();
        let abbrev_base = {
            let story = Story::load(&bytes).unwrap();
            story.abbreviations_base().unwrap()
        };
        let nested_text = ABBREV_STRINGS + 0x30;
        let words = crate::text::pack_zchars(&[1u8, 0, 0]);
        for (i, w) in words.iter().enumerate() {
            set_word(&mut bytes, nested_text + 2 * i, *w);
        }
        set_word(&mut bytes, abbrev_base + 2, (nested_text / 2) as u16);
        let story = Story::load(&bytes).unwrap();
        assert!(matches!(
            story.abbreviation_text(1),
            Err(Error::NestedAbbreviation(_))
        ));
    }

    #[test]
    fn routine_header_reads() {
        let story = test_story();
        // the fixture routine at ROUTINE_ADDR has two locals
        let addr = crate::test_utils::ROUTINE_ADDR;
        assert_eq!(story.routine_locals_count(addr).unwrap(), 2);
        assert_eq!(story.routine_entry_point(addr).unwrap(), addr + 5);
    }

    #[test]
    fn too_many_locals_rejected() {
        let mut bytes = test_story_bytes();
        let addr = crate::test_utils::ROUTINE_ADDR;
        bytes[addr] = 16;
        let story = Story::load(&bytes).unwrap();
        assert_eq!(
            story.routine_locals_count(addr),
            Err(Error::TooManyLocals { addr, count: 16 })
        );
    }
}
