//! Human-readable listings of decoded instructions and routines.

use std::fmt::Write;

use crate::error::Result;
use crate::story::Story;

pub struct Disassembler<'a> {
    story: &'a Story,
}

impl<'a> Disassembler<'a> {
    pub fn new(story: &'a Story) -> Self {
        Disassembler { story }
    }

    /// One instruction: address, raw bytes, then the decoded rendering.
    pub fn instruction_line(&self, addr: usize) -> Result<String> {
        let inst = self.story.decode_instruction(addr)?;
        let mut bytes = String::new();
        for offset in 0..inst.length.min(8) {
            write!(bytes, "{:02x} ", self.story.read_byte(addr + offset)?).unwrap();
        }
        if inst.length > 8 {
            bytes.push_str("... ");
        }
        Ok(format!("{:05x}: {:<24} {}", addr, bytes, inst))
    }

    /// Every reachable instruction of the routine at `routine`, in address
    /// order, with a small header naming its locals.
    pub fn routine_listing(&self, routine: usize) -> Result<String> {
        let mut out = String::new();
        let count = self.story.routine_locals_count(routine)?;
        writeln!(out, "; routine {:05x}, {} locals", routine, count).unwrap();
        for (n, value) in self
            .story
            .routine_default_locals(routine)?
            .iter()
            .enumerate()
        {
            writeln!(out, ";   local{} = {:04x}", n + 1, value).unwrap();
        }
        let entry = self.story.routine_entry_point(routine)?;
        for addr in self.story.reachable_addresses(entry)? {
            writeln!(out, "{}", self.instruction_line(addr)?).unwrap();
        }
        Ok(out)
    }

    /// The top-level code followed by every routine reachable from it.
    pub fn listing(&self) -> Result<String> {
        let mut out = String::new();
        let initial_pc = self.story.initial_pc()?;
        writeln!(out, "; main code at {:05x}", initial_pc).unwrap();
        for addr in self.story.reachable_addresses(initial_pc)? {
            writeln!(out, "{}", self.instruction_line(addr)?).unwrap();
        }
        for routine in self.story.all_routines()? {
            writeln!(out).unwrap();
            out.push_str(&self.routine_listing(routine)?);
        }
        Ok(out)
    }
}

impl Story {
    /// Convenience single-line rendering used by hosts and debuggers.
    pub fn display_instruction(&self, addr: usize) -> Result<String> {
        Disassembler::new(self).instruction_line(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{story_with_code, CODE_BASE};

    #[test]
    fn renders_instruction_lines() {
        let story = story_with_code(&[0x14, 0x03, 0x05, 0x00]);
        let line = story.display_instruction(CODE_BASE).unwrap();
        assert!(line.starts_with(&format!("{:05x}: 14 03 05 00", CODE_BASE)));
        assert!(line.ends_with("add #03 #05 -> sp"));
    }

    #[test]
    fn lists_whole_programs() {
        let story = story_with_code(&[
            0xE0, 0x3F, 0x02, 0x20, 0x00, // call #0440 -> sp
            0xBA, // quit
        ]);
        let listing = Disassembler::new(&story).listing().unwrap();
        assert!(listing.contains("; main code"));
        assert!(listing.contains("call #0440 -> sp"));
        assert!(listing.contains("quit"));
        assert!(listing.contains("; routine 00440, 2 locals"));
        assert!(listing.contains("rtrue"));
    }
}
