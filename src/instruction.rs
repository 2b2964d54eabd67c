//! The instruction decoder.
//!
//! Given a story and a byte address this produces the full decoded record:
//! opcode identity, operands, store target, branch spec and inline text,
//! plus the total encoded length so the next instruction's address is
//! always `addr + length`.

use std::fmt;

use log::trace;

use crate::error::{Error, Result};
use crate::opcode_tables::{Opcode, OP0_TABLE, OP1_TABLE, OP2_TABLE, VAR_TABLE};
use crate::story::Story;
use crate::util::{fetch_bit, fetch_bits, signed_word};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    Long,
    Short,
    Variable,
}

/// A variable reference: the evaluation stack, a routine local (1..=15) or
/// a global (16..=255).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Stack,
    Local(u8),
    Global(u8),
}

impl Variable {
    pub fn decode(byte: u8) -> Variable {
        match byte {
            0 => Variable::Stack,
            1..=15 => Variable::Local(byte),
            _ => Variable::Global(byte),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Stack => write!(f, "sp"),
            Variable::Local(n) => write!(f, "local{}", n),
            Variable::Global(n) => write!(f, "g{:02x}", n - 16),
        }
    }
}

/// A decoded operand. Large constants are widened to 32 bits because the
/// jump/call munging below rewrites them into absolute byte addresses,
/// which can exceed 16 bits in a v3 image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Large(u32),
    Small(u8),
    Variable(Variable),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Large(v) => write!(f, "#{:04x}", v),
            Operand::Small(v) => write!(f, "#{:02x}", v),
            Operand::Variable(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchTarget {
    ReturnFalse,
    ReturnTrue,
    Address(usize),
}

/// Branch spec: transfer happens when the tested condition equals `sense`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub sense: bool,
    pub target: BranchTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandType {
    Large,
    Small,
    Variable,
    Omitted,
}

fn operand_type(bits: u8) -> OperandType {
    match bits & 0b11 {
        0b00 => OperandType::Large,
        0b01 => OperandType::Small,
        0b10 => OperandType::Variable,
        _ => OperandType::Omitted,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub form: Form,
    pub addr: usize,
    pub length: usize,
    pub operands: Vec<Operand>,
    pub store: Option<Variable>,
    pub branch: Option<Branch>,
    pub text: Option<String>,
}

impl Instruction {
    /// The address of the instruction that follows in memory.
    pub fn next_addr(&self) -> usize {
        self.addr + self.length
    }

    pub fn decode(story: &Story, addr: usize) -> Result<Instruction> {
        let first = story.read_byte(addr)?;
        let mut cursor = addr + 1;

        let (form, opcode, types) = match first >> 6 {
            0b11 => {
                let opcode = if first & 0x20 != 0 {
                    VAR_TABLE[(first & 0x1F) as usize]
                } else {
                    OP2_TABLE[(first & 0x1F) as usize]
                };
                let type_byte = story.read_byte(cursor)?;
                cursor += 1;
                let mut types = Vec::new();
                for shift in [6u8, 4, 2, 0] {
                    match operand_type(type_byte >> shift) {
                        OperandType::Omitted => break,
                        t => types.push(t),
                    }
                }
                (Form::Variable, opcode, types)
            }
            0b10 => match operand_type(fetch_bits(first as u16, 5, 2) as u8) {
                OperandType::Omitted => (Form::Short, OP0_TABLE[(first & 0x0F) as usize], vec![]),
                t => (Form::Short, OP1_TABLE[(first & 0x0F) as usize], vec![t]),
            },
            _ => {
                let first_type = if first & 0x40 != 0 {
                    OperandType::Variable
                } else {
                    OperandType::Small
                };
                let second_type = if first & 0x20 != 0 {
                    OperandType::Variable
                } else {
                    OperandType::Small
                };
                (
                    Form::Long,
                    OP2_TABLE[(first & 0x1F) as usize],
                    vec![first_type, second_type],
                )
            }
        };

        let mut operands = Vec::with_capacity(types.len());
        for t in types {
            match t {
                OperandType::Large => {
                    operands.push(Operand::Large(story.read_word(cursor)? as u32));
                    cursor += 2;
                }
                OperandType::Small => {
                    operands.push(Operand::Small(story.read_byte(cursor)?));
                    cursor += 1;
                }
                OperandType::Variable => {
                    operands.push(Operand::Variable(Variable::decode(story.read_byte(cursor)?)));
                    cursor += 1;
                }
                OperandType::Omitted => unreachable!(),
            }
        }

        let store = if opcode.has_store() {
            let byte = story.read_byte(cursor)?;
            cursor += 1;
            Some(Variable::decode(byte))
        } else {
            None
        };

        // Branch offsets are relative to the end of the whole instruction,
        // so resolution waits until the length is known.
        let raw_branch = if opcode.has_branch() {
            let first_byte = story.read_byte(cursor)?;
            cursor += 1;
            let sense = first_byte & 0x80 != 0;
            let offset: i32 = if first_byte & 0x40 != 0 {
                (first_byte & 0x3F) as i32
            } else {
                let second_byte = story.read_byte(cursor)?;
                cursor += 1;
                let raw = (((first_byte & 0x3F) as u16) << 8) | second_byte as u16;
                if fetch_bit(raw, 13) {
                    raw as i32 - 16384
                } else {
                    raw as i32
                }
            };
            Some((sense, offset))
        } else {
            None
        };

        let text = if opcode.has_text() {
            let (decoded, byte_length) = story.decode_string(cursor)?;
            cursor += byte_length;
            Some(decoded)
        } else {
            None
        };

        let length = cursor - addr;

        let branch = match raw_branch {
            None => None,
            Some((sense, 0)) => Some(Branch {
                sense,
                target: BranchTarget::ReturnFalse,
            }),
            Some((sense, 1)) => Some(Branch {
                sense,
                target: BranchTarget::ReturnTrue,
            }),
            Some((sense, offset)) => {
                let target = addr as i64 + length as i64 + offset as i64 - 2;
                if target < 0 {
                    return Err(Error::BadOperandShape {
                        addr,
                        reason: "branch target before start of memory",
                    });
                }
                Some(Branch {
                    sense,
                    target: BranchTarget::Address(target as usize),
                })
            }
        };

        // Operand munging: jump's relative word becomes an absolute target,
        // and a call's statically-known packed routine address is unpacked.
        match opcode {
            Opcode::Jump => {
                let raw = match operands.first().copied() {
                    Some(Operand::Large(raw)) if operands.len() == 1 => raw,
                    _ => {
                        return Err(Error::BadOperandShape {
                            addr,
                            reason: "jump needs a single large constant operand",
                        })
                    }
                };
                let target = addr as i64 + length as i64 + signed_word(raw as i32) as i64 - 2;
                if target < 0 {
                    return Err(Error::BadOperandShape {
                        addr,
                        reason: "jump target before start of memory",
                    });
                }
                operands[0] = Operand::Large(target as u32);
            }
            op if op.is_call() => {
                if let Some(Operand::Large(packed)) = operands.first().copied() {
                    operands[0] = Operand::Large(packed * 2);
                }
            }
            _ => {}
        }

        let instruction = Instruction {
            opcode,
            form,
            addr,
            length,
            operands,
            store,
            branch,
            text,
        };
        trace!("decoded at {:04x}: {}", addr, instruction);
        Ok(instruction)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.name())?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        if let Some(store) = &self.store {
            write!(f, " -> {}", store)?;
        }
        if let Some(branch) = &self.branch {
            let polarity = if branch.sense { "" } else { "~" };
            match branch.target {
                BranchTarget::ReturnFalse => write!(f, " ?{}rfalse", polarity)?,
                BranchTarget::ReturnTrue => write!(f, " ?{}rtrue", polarity)?,
                BranchTarget::Address(a) => write!(f, " ?{}{:04x}", polarity, a)?,
            }
        }
        if let Some(text) = &self.text {
            write!(f, " \"{}\"", text.replace('\n', "^"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{story_with_code, CODE_BASE};

    #[test]
    fn decodes_short_form_jump() {
        // jump with a large constant of -5
        let story = story_with_code(&[0x8C, 0xFF, 0xFB]);
        let inst = Instruction::decode(&story, CODE_BASE).unwrap();
        assert_eq!(inst.opcode, Opcode::Jump);
        assert_eq!(inst.form, Form::Short);
        assert_eq!(inst.length, 3);
        let expected = CODE_BASE + 3 - 5 - 2;
        assert_eq!(inst.operands, vec![Operand::Large(expected as u32)]);
        assert!(inst.store.is_none() && inst.branch.is_none());
    }

    #[test]
    fn decodes_variable_form_call() {
        // call with types [large, small, small]; store to the stack
        let story = story_with_code(&[0xE0, 0x17, 0x2A, 0x3C, 0x01, 0x02, 0x00]);
        let inst = Instruction::decode(&story, CODE_BASE).unwrap();
        assert_eq!(inst.opcode, Opcode::Call);
        assert_eq!(inst.form, Form::Variable);
        assert_eq!(inst.length, 7);
        assert_eq!(
            inst.operands,
            vec![
                Operand::Large(0x2A3C * 2),
                Operand::Small(0x01),
                Operand::Small(0x02)
            ]
        );
        assert_eq!(inst.store, Some(Variable::Stack));
    }

    #[test]
    fn decodes_long_form_je_with_branch() {
        // je #05 #07, branch on true, short offset 3
        let story = story_with_code(&[0x01, 0x05, 0x07, 0xC3]);
        let inst = Instruction::decode(&story, CODE_BASE).unwrap();
        assert_eq!(inst.opcode, Opcode::Je);
        assert_eq!(inst.form, Form::Long);
        assert_eq!(inst.length, 4);
        assert_eq!(inst.operands, vec![Operand::Small(5), Operand::Small(7)]);
        assert_eq!(
            inst.branch,
            Some(Branch {
                sense: true,
                target: BranchTarget::Address(CODE_BASE + 4 + 3 - 2),
            })
        );
    }

    #[test]
    fn long_form_variable_operand_bits() {
        // bit 6 set: first operand is a variable reference (local 1)
        let story = story_with_code(&[0x41, 0x01, 0x02, 0x80]);
        let inst = Instruction::decode(&story, CODE_BASE).unwrap();
        assert_eq!(
            inst.operands,
            vec![
                Operand::Variable(Variable::Local(1)),
                Operand::Small(0x02)
            ]
        );
        // offset 0 means return false; sense bit 7 set
        assert_eq!(
            inst.branch,
            Some(Branch {
                sense: true,
                target: BranchTarget::ReturnFalse,
            })
        );
    }

    #[test]
    fn branch_return_true_offset() {
        let story = story_with_code(&[0x01, 0x05, 0x05, 0x41]);
        let inst = Instruction::decode(&story, CODE_BASE).unwrap();
        assert_eq!(
            inst.branch,
            Some(Branch {
                sense: false,
                target: BranchTarget::ReturnTrue,
            })
        );
    }

    #[test]
    fn long_branch_offset_is_fourteen_bit_signed() {
        // je with two-byte branch: bits 5..0 of 0x3F and the following byte
        // make 0x3FFF = 16383, i.e. -1 after sign adjustment
        let story = story_with_code(&[0x01, 0x05, 0x05, 0x3F, 0xFF]);
        let inst = Instruction::decode(&story, CODE_BASE).unwrap();
        assert_eq!(inst.length, 5);
        assert_eq!(
            inst.branch,
            Some(Branch {
                sense: false,
                target: BranchTarget::Address(CODE_BASE + 5 - 1 - 2),
            })
        );
    }

    #[test]
    fn decodes_add_with_store() {
        let story = story_with_code(&[0x14, 0x03, 0x05, 0x00]);
        let inst = Instruction::decode(&story, CODE_BASE).unwrap();
        assert_eq!(inst.opcode, Opcode::Add);
        assert_eq!(inst.length, 4);
        assert_eq!(inst.store, Some(Variable::Stack));
    }

    #[test]
    fn decodes_inline_text() {
        // print "hi": h=13 i=14, one padded end-flagged word
        let word: u16 = 0x8000 | (13 << 10) | (14 << 5) | 5;
        let bytes = word.to_be_bytes();
        let story = story_with_code(&[0xB2, bytes[0], bytes[1]]);
        let inst = Instruction::decode(&story, CODE_BASE).unwrap();
        assert_eq!(inst.opcode, Opcode::Print);
        assert_eq!(inst.text.as_deref(), Some("hi"));
        assert_eq!(inst.length, 3);
    }

    #[test]
    fn jump_through_variable_is_rejected() {
        // jump with a variable operand (short form, type bits 10)
        let story = story_with_code(&[0xAC, 0x01]);
        assert!(matches!(
            Instruction::decode(&story, CODE_BASE),
            Err(Error::BadOperandShape { .. })
        ));
    }

    #[test]
    fn op2_slot_zero_decodes_as_illegal() {
        let story = story_with_code(&[0x00, 0x01, 0x02]);
        let inst = Instruction::decode(&story, CODE_BASE).unwrap();
        assert_eq!(inst.opcode, Opcode::Illegal);
    }

    #[test]
    fn lengths_chain_instructions_together() {
        // add #03 #05 -> sp ; sub sp #01 -> local1 ; rtrue
        let story = story_with_code(&[
            0x14, 0x03, 0x05, 0x00, //
            0x55, 0x00, 0x01, 0x01, //
            0xB0,
        ]);
        let first = Instruction::decode(&story, CODE_BASE).unwrap();
        let second = Instruction::decode(&story, first.next_addr()).unwrap();
        let third = Instruction::decode(&story, second.next_addr()).unwrap();
        assert_eq!(first.opcode, Opcode::Add);
        assert_eq!(second.opcode, Opcode::Sub);
        assert_eq!(third.opcode, Opcode::Rtrue);
        assert_eq!(third.addr, CODE_BASE + 9 - 1);
    }

    #[test]
    fn renders_readably() {
        let story = story_with_code(&[0xE0, 0x17, 0x2A, 0x3C, 0x01, 0x02, 0x00]);
        let inst = Instruction::decode(&story, CODE_BASE).unwrap();
        assert_eq!(inst.to_string(), "call #5478 #01 #02 -> sp");
    }
}
