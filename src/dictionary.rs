//! The dictionary: word separators, entry geometry and lookup.

use std::fmt::Display;
use std::fmt::Formatter;

use crate::error::Result;
use crate::story::Story;
use crate::text;

/// Parsed view of the dictionary header; entries stay in the story and are
/// read through it.
#[derive(Debug, Clone)]
pub struct Dictionary {
    pub separators: Vec<u8>,
    pub entry_length: u8,
    pub entry_count: u16,
    entry_base: usize,
}

impl Story {
    pub fn dictionary(&self) -> Result<Dictionary> {
        let mut cursor = self.dictionary_base()?;
        let separator_count = self.read_byte(cursor)? as usize;
        cursor += 1;
        let mut separators = Vec::with_capacity(separator_count);
        for _ in 0..separator_count {
            separators.push(self.read_byte(cursor)?);
            cursor += 1;
        }
        let entry_length = self.read_byte(cursor)?;
        let entry_count = self.read_word(cursor + 1)?;
        Ok(Dictionary {
            separators,
            entry_length,
            entry_count,
            entry_base: cursor + 3,
        })
    }
}

impl Dictionary {
    pub fn entry_addr(&self, index: u16) -> usize {
        self.entry_base + index as usize * self.entry_length as usize
    }

    pub fn is_separator(&self, ch: u8) -> bool {
        self.separators.contains(&ch)
    }

    /// Find the entry whose 4-byte encoded form matches `word`, returning
    /// its byte address. Entries are few enough in v3 files that a linear
    /// scan is fine.
    pub fn lookup(&self, story: &Story, word: &str) -> Result<Option<u16>> {
        let encoded = text::encode_dictionary_word(word);
        for index in 0..self.entry_count {
            let addr = self.entry_addr(index);
            let mut matches = true;
            for (offset, expected) in encoded.iter().enumerate() {
                if story.read_byte(addr + offset)? != *expected {
                    matches = false;
                    break;
                }
            }
            if matches {
                return Ok(Some(addr as u16));
            }
        }
        Ok(None)
    }
}

impl Display for Dictionary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} separators, {} entries of {} bytes",
            self.separators.len(),
            self.entry_count,
            self.entry_length
        )
    }
}
