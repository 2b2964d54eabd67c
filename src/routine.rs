//! Reachability analysis over routines.
//!
//! Two pure closures over the story: the instruction addresses reachable
//! within a routine by stepping and branching, and the set of routines
//! reachable from the initial program counter by following call targets.
//! Both feed the disassembler's listings.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::instruction::{BranchTarget, Instruction, Operand};
use crate::opcode_tables::Opcode;
use crate::story::Story;

impl Story {
    /// Static successors of an instruction within its routine: the next
    /// instruction when execution can fall through, plus any branch or
    /// jump target. Call targets are not successors; calls come back.
    pub fn instruction_successors(&self, inst: &Instruction) -> Vec<usize> {
        let mut out = Vec::new();
        if inst.opcode.continues() {
            out.push(inst.next_addr());
        }
        if let Some(branch) = &inst.branch {
            if let BranchTarget::Address(target) = branch.target {
                out.push(target);
            }
        }
        if inst.opcode == Opcode::Jump {
            if let Some(Operand::Large(target)) = inst.operands.first() {
                out.push(*target as usize);
            }
        }
        out
    }

    /// Transitive closure of `instruction_successors` from `addr`, sorted.
    pub fn reachable_addresses(&self, addr: usize) -> Result<Vec<usize>> {
        let mut seen = BTreeSet::new();
        let mut work = vec![addr];
        while let Some(current) = work.pop() {
            if !seen.insert(current) {
                continue;
            }
            let inst = self.decode_instruction(current)?;
            work.extend(self.instruction_successors(&inst));
        }
        Ok(seen.into_iter().collect())
    }

    /// Unpacked addresses of the routines called with statically-known
    /// targets anywhere in the code reachable from `addr`.
    pub fn call_targets_from(&self, addr: usize) -> Result<Vec<usize>> {
        let mut targets = BTreeSet::new();
        for current in self.reachable_addresses(addr)? {
            let inst = self.decode_instruction(current)?;
            if inst.opcode.is_call() {
                if let Some(Operand::Large(target)) = inst.operands.first() {
                    if *target != 0 {
                        targets.insert(*target as usize);
                    }
                }
            }
        }
        Ok(targets.into_iter().collect())
    }

    /// Fixed point over call-target extraction seeded from the code at the
    /// initial program counter: every routine reachable from the top.
    pub fn all_routines(&self) -> Result<Vec<usize>> {
        let mut routines = BTreeSet::new();
        let mut work = self.call_targets_from(self.initial_pc()?)?;
        while let Some(routine) = work.pop() {
            if !routines.insert(routine) {
                continue;
            }
            let entry = self.routine_entry_point(routine)?;
            for target in self.call_targets_from(entry)? {
                if !routines.contains(&target) {
                    work.push(target);
                }
            }
        }
        Ok(routines.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{story_with_code, CODE_BASE, ROUTINE_ADDR};

    fn fixture() -> Story {
        // call the fixture routine, hop over a dead rtrue, then quit
        story_with_code(&[
            0xE0, 0x3F, 0x02, 0x20, 0x00, // call #0440 -> sp
            0x8C, 0x00, 0x04, //             jump +4 (lands two past next)
            0xB0, //                         rtrue (unreachable)
            0x00, //                         padding
            0xBA, //                         quit
        ])
    }

    #[test]
    fn successors_follow_fallthrough_and_jumps() {
        let story = fixture();
        let call = story.decode_instruction(CODE_BASE).unwrap();
        assert_eq!(story.instruction_successors(&call), vec![CODE_BASE + 5]);
        let jump = story.decode_instruction(CODE_BASE + 5).unwrap();
        assert_eq!(story.instruction_successors(&jump), vec![CODE_BASE + 10]);
        let quit = story.decode_instruction(CODE_BASE + 10).unwrap();
        assert!(story.instruction_successors(&quit).is_empty());
    }

    #[test]
    fn branch_targets_are_successors() {
        // je #01 #02 branching forward 6
        let story = story_with_code(&[0x01, 0x01, 0x02, 0xC6, 0xBA]);
        let je = story.decode_instruction(CODE_BASE).unwrap();
        let successors = story.instruction_successors(&je);
        assert_eq!(successors, vec![CODE_BASE + 4, CODE_BASE + 4 + 6 - 2]);
    }

    #[test]
    fn reachable_skips_dead_code() {
        let story = fixture();
        assert_eq!(
            story.reachable_addresses(CODE_BASE).unwrap(),
            vec![CODE_BASE, CODE_BASE + 5, CODE_BASE + 10]
        );
    }

    #[test]
    fn collects_call_targets() {
        let story = fixture();
        assert_eq!(
            story.call_targets_from(CODE_BASE).unwrap(),
            vec![ROUTINE_ADDR]
        );
    }

    #[test]
    fn all_routines_reaches_fixed_point() {
        let story = fixture();
        assert_eq!(story.all_routines().unwrap(), vec![ROUTINE_ADDR]);
    }
}
