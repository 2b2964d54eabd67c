//! The step machine: call frames, operand evaluation and opcode dispatch.
//!
//! An `Interpreter` is a value. `step` decodes one instruction at the
//! program counter and returns a successor interpreter; the receiver is
//! never touched, so a host can keep any number of old snapshots and
//! rewind by simply holding on to them. Input is an interrupt, not a
//! blocking read: `sread` parks the machine in `WaitingForInput` and the
//! host resumes it one key at a time through `step_with_input`.

use std::fmt;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::instruction::{BranchTarget, Instruction, Operand, Variable};
use crate::opcode_tables::Opcode;
use crate::story::Story;
use crate::text;
use crate::util::signed_word;

/// Seed for the default generator, so freshly-made interpreters replay
/// deterministically until a game asks for real randomness.
const DEFAULT_RANDOM_SEED: u64 = 0x5EED;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    WaitingForInput,
    Halted,
}

/// One activation record: evaluation stack, locals, the address of the
/// calling instruction and the caller's pending store target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    stack: Vec<u16>,
    locals: Vec<u16>,
    caller: usize,
    store: Option<Variable>,
}

impl Frame {
    fn root() -> Frame {
        Frame {
            stack: Vec::new(),
            locals: Vec::new(),
            caller: 0,
            store: None,
        }
    }

    pub fn stack(&self) -> &[u16] {
        &self.stack
    }

    pub fn locals(&self) -> &[u16] {
        &self.locals
    }

    pub fn caller(&self) -> usize {
        self.caller
    }

    pub fn store(&self) -> Option<Variable> {
        self.store
    }

    fn push(&mut self, value: u16) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<u16> {
        self.stack.pop().ok_or(Error::StackUnderflow)
    }

    fn peek(&self) -> Result<u16> {
        self.stack.last().copied().ok_or(Error::StackUnderflow)
    }

    fn replace_top(&mut self, value: u16) -> Result<()> {
        let top = self.stack.last_mut().ok_or(Error::StackUnderflow)?;
        *top = value;
        Ok(())
    }

    pub fn local(&self, index: u8) -> Result<u16> {
        if index == 0 || index as usize > self.locals.len() {
            return Err(Error::InvalidLocal(index));
        }
        Ok(self.locals[index as usize - 1])
    }

    fn set_local(&mut self, index: u8, value: u16) -> Result<()> {
        if index == 0 || index as usize > self.locals.len() {
            return Err(Error::InvalidLocal(index));
        }
        self.locals[index as usize - 1] = value;
        Ok(())
    }
}

/// The `random` opcode's generator. Part of the interpreter value, so a
/// snapshot replays the same sequence its original would have produced.
#[derive(Clone)]
struct ZRandom {
    rng: StdRng,
}

impl ZRandom {
    fn seeded(seed: u64) -> ZRandom {
        ZRandom {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn from_entropy() -> ZRandom {
        ZRandom {
            rng: StdRng::from_entropy(),
        }
    }

    fn next_in_range(&mut self, upper: u16) -> u16 {
        self.rng.gen_range(1..=upper)
    }
}

impl fmt::Debug for ZRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ZRandom")
    }
}

/// An `sread` in flight: buffer addresses from the instruction's operands
/// and the keys collected so far.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingRead {
    text_addr: u16,
    parse_addr: u16,
    line: String,
    length: usize,
}

#[derive(Debug, Clone)]
pub struct Interpreter {
    story: Story,
    pc: usize,
    frames: Vec<Frame>,
    state: RunState,
    screen: String,
    pending_read: Option<PendingRead>,
    rng: ZRandom,
}

impl Interpreter {
    /// A fresh machine: one root frame, program counter at the header's
    /// initial PC.
    pub fn make(story: Story) -> Result<Interpreter> {
        let pc = story.initial_pc()?;
        Ok(Interpreter {
            story,
            pc,
            frames: vec![Frame::root()],
            state: RunState::Running,
            screen: String::new(),
            pending_read: None,
            rng: ZRandom::seeded(DEFAULT_RANDOM_SEED),
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn program_counter(&self) -> usize {
        self.pc
    }

    pub fn story(&self) -> &Story {
        &self.story
    }

    pub fn current_frame(&self) -> &Frame {
        // the frame stack is never empty by construction
        &self.frames[self.frames.len() - 1]
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Everything the print opcodes have emitted so far. The host decides
    /// how much of it has already been shown.
    pub fn screen_output(&self) -> &str {
        &self.screen
    }

    /// Execute one instruction and hand back the successor machine.
    pub fn step(&self) -> Result<Interpreter> {
        if self.state != RunState::Running {
            return Err(Error::NotRunning);
        }
        let inst = self.story.decode_instruction(self.pc)?;
        trace!("{:05x}: {}", self.pc, inst);
        let mut next = self.clone();
        next.execute(&inst)?;
        Ok(next)
    }

    /// Feed one key to a machine parked in `WaitingForInput`. A newline
    /// completes the pending read.
    pub fn step_with_input(&self, key: char) -> Result<Interpreter> {
        if self.state != RunState::WaitingForInput {
            return Err(Error::NotWaitingForInput);
        }
        let mut next = self.clone();
        let mut pending = next.pending_read.take().ok_or(Error::NotWaitingForInput)?;
        if key == '\n' {
            next.finish_read(pending)?;
        } else {
            pending.line.push(key);
            next.pending_read = Some(pending);
        }
        Ok(next)
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    fn emit(&mut self, output: &str) {
        self.screen.push_str(output);
    }

    // ---- variables and operands ----

    fn read_variable(&mut self, variable: Variable) -> Result<u16> {
        match variable {
            Variable::Stack => self.frame_mut().pop(),
            Variable::Local(n) => self.current_frame().local(n),
            Variable::Global(n) => self.story.read_global(n as u16),
        }
    }

    fn write_variable(&mut self, variable: Variable, value: u16) -> Result<()> {
        match variable {
            Variable::Stack => {
                self.frame_mut().push(value);
                Ok(())
            }
            Variable::Local(n) => self.frame_mut().set_local(n, value),
            Variable::Global(n) => {
                self.story = self.story.write_global(n as u16, value)?;
                Ok(())
            }
        }
    }

    /// Indirect variable references (`load`, `store`, `pull`, `inc`,
    /// `dec`, `inc_chk`, `dec_chk`) treat the stack as its top slot in
    /// place instead of pushing or popping.
    fn read_variable_in_place(&mut self, variable: Variable) -> Result<u16> {
        match variable {
            Variable::Stack => self.current_frame().peek(),
            other => self.read_variable(other),
        }
    }

    fn write_variable_in_place(&mut self, variable: Variable, value: u16) -> Result<()> {
        match variable {
            Variable::Stack => self.frame_mut().replace_top(value),
            other => self.write_variable(other, value),
        }
    }

    fn eval(&mut self, operand: &Operand) -> Result<u16> {
        match operand {
            Operand::Large(value) => Ok(*value as u16),
            Operand::Small(value) => Ok(*value as u16),
            Operand::Variable(variable) => self.read_variable(*variable),
        }
    }

    /// Evaluate operands left to right, threading the machine through each
    /// so stack pops happen in listed order.
    fn eval_operands(&mut self, inst: &Instruction) -> Result<Vec<u16>> {
        let mut values = Vec::with_capacity(inst.operands.len());
        for operand in &inst.operands {
            values.push(self.eval(operand)?);
        }
        Ok(values)
    }

    fn store_result(&mut self, inst: &Instruction, value: u16) -> Result<()> {
        if let Some(variable) = inst.store {
            self.write_variable(variable, value)?;
        }
        Ok(())
    }

    fn advance(&mut self, inst: &Instruction) {
        self.pc = inst.next_addr();
    }

    fn branch_on(&mut self, inst: &Instruction, condition: bool) -> Result<()> {
        let branch = match &inst.branch {
            Some(branch) => branch,
            None => {
                return Err(Error::BadOperandShape {
                    addr: inst.addr,
                    reason: "missing branch spec",
                })
            }
        };
        if condition == branch.sense {
            match branch.target {
                BranchTarget::ReturnFalse => self.do_return(0),
                BranchTarget::ReturnTrue => self.do_return(1),
                BranchTarget::Address(target) => {
                    self.pc = target;
                    Ok(())
                }
            }
        } else {
            self.advance(inst);
            Ok(())
        }
    }

    // ---- calling and returning ----

    fn do_call(&mut self, inst: &Instruction) -> Result<()> {
        let mut operands = inst.operands.iter();
        let routine = match operands.next() {
            None => {
                return Err(Error::BadOperandShape {
                    addr: inst.addr,
                    reason: "call needs a routine address",
                })
            }
            // a large constant was unpacked by the decoder
            Some(Operand::Large(target)) => *target as usize,
            Some(operand) => {
                let packed = self.eval(operand)?;
                self.story.unpack(packed)
            }
        };
        let mut args = Vec::with_capacity(inst.operands.len() - 1);
        for operand in operands {
            args.push(self.eval(operand)?);
        }
        if routine == 0 {
            // calling nowhere yields false
            self.store_result(inst, 0)?;
            self.advance(inst);
            return Ok(());
        }
        let count = self.story.routine_locals_count(routine)? as usize;
        let mut locals = self.story.routine_default_locals(routine)?;
        for (index, arg) in args.iter().enumerate() {
            if index < count {
                locals[index] = *arg;
            } else {
                debug!("call {:05x}: argument {:04x} discarded", routine, arg);
            }
        }
        debug!("call {:05x} {:?} from {:05x}", routine, args, inst.addr);
        self.frames.push(Frame {
            stack: Vec::new(),
            locals,
            caller: inst.addr,
            store: inst.store,
        });
        self.pc = self.story.routine_entry_point(routine)?;
        Ok(())
    }

    /// Pop the top frame and resume the caller just past its call
    /// instruction, depositing `value` in the caller's store target.
    fn do_return(&mut self, value: u16) -> Result<()> {
        if self.frames.len() <= 1 {
            return Err(Error::CallStackUnderflow);
        }
        let frame = self.frames.pop().ok_or(Error::CallStackUnderflow)?;
        let caller = self.story.decode_instruction(frame.caller)?;
        debug!("return {:04x} to {:05x}", value, caller.next_addr());
        if let Some(variable) = frame.store {
            self.write_variable(variable, value)?;
        }
        self.pc = caller.next_addr();
        Ok(())
    }

    // ---- reading a line of input ----

    fn finish_read(&mut self, pending: PendingRead) -> Result<()> {
        let text_addr = pending.text_addr as usize;
        let capacity = self.story.read_byte(text_addr)? as usize;
        let ascii: Vec<u8> = pending
            .line
            .to_lowercase()
            .chars()
            .take(capacity.saturating_sub(1))
            .map(|ch| if ch.is_ascii() { ch as u8 } else { b'?' })
            .collect();

        let mut story = self.story.clone();
        for (index, byte) in ascii.iter().enumerate() {
            story = story.write_byte(text_addr + 1 + index, *byte)?;
        }
        story = story.write_byte(text_addr + 1 + ascii.len(), 0)?;

        let dictionary = story.dictionary()?;
        let tokens = tokenize(&ascii, &dictionary);
        let parse_addr = pending.parse_addr as usize;
        let max_tokens = story.read_byte(parse_addr)? as usize;
        let kept = tokens.len().min(max_tokens);
        story = story.write_byte(parse_addr + 1, kept as u8)?;
        for (index, (word, position)) in tokens.iter().take(max_tokens).enumerate() {
            let entry = dictionary.lookup(&story, word)?.unwrap_or(0);
            let record = parse_addr + 2 + 4 * index;
            story = story.write_word(record, entry)?;
            story = story.write_byte(record + 2, word.len() as u8)?;
            // positions count from the first text-buffer byte after the
            // capacity byte
            story = story.write_byte(record + 3, *position as u8 + 1)?;
        }
        debug!("sread {:?}: {} of {} words kept", pending.line, kept, tokens.len());

        self.story = story;
        self.pc += pending.length;
        self.state = RunState::Running;
        Ok(())
    }

    // ---- dispatch ----

    fn execute(&mut self, inst: &Instruction) -> Result<()> {
        match inst.opcode {
            Opcode::Call => self.do_call(inst),
            Opcode::Jump => match inst.operands.as_slice() {
                [Operand::Large(target)] => {
                    self.pc = *target as usize;
                    Ok(())
                }
                _ => Err(Error::BadOperandShape {
                    addr: inst.addr,
                    reason: "jump needs a single large constant operand",
                }),
            },
            _ => {
                let values = self.eval_operands(inst)?;
                self.execute_with(inst, &values)
            }
        }
    }

    fn execute_with(&mut self, inst: &Instruction, values: &[u16]) -> Result<()> {
        match inst.opcode {
            // ---- arithmetic and logic ----
            Opcode::Add => self.arith(inst, values, |a, b| Ok(a.wrapping_add(b))),
            Opcode::Sub => self.arith(inst, values, |a, b| Ok(a.wrapping_sub(b))),
            Opcode::Mul => self.arith(inst, values, |a, b| Ok(a.wrapping_mul(b))),
            Opcode::Div => self.arith(inst, values, |a, b| {
                if b == 0 {
                    Err(Error::DivideByZero)
                } else {
                    Ok(a.wrapping_div(b))
                }
            }),
            Opcode::Mod => self.arith(inst, values, |a, b| {
                if b == 0 {
                    Err(Error::DivideByZero)
                } else {
                    Ok(a.wrapping_rem(b))
                }
            }),
            Opcode::Or => {
                let [a, b] = exactly(inst, values)?;
                self.store_result(inst, a | b)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::And => {
                let [a, b] = exactly(inst, values)?;
                self.store_result(inst, a & b)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::Not => {
                let [a] = exactly(inst, values)?;
                self.store_result(inst, !a)?;
                self.advance(inst);
                Ok(())
            }

            // ---- comparisons and tests ----
            Opcode::Je => {
                if values.len() < 2 {
                    return Err(Error::BadOperandShape {
                        addr: inst.addr,
                        reason: "je needs at least two operands",
                    });
                }
                let condition = values[1..].contains(&values[0]);
                self.branch_on(inst, condition)
            }
            Opcode::Jl => {
                let [a, b] = exactly(inst, values)?;
                self.branch_on(inst, (a as i16) < (b as i16))
            }
            Opcode::Jg => {
                let [a, b] = exactly(inst, values)?;
                self.branch_on(inst, (a as i16) > (b as i16))
            }
            Opcode::Jz => {
                let [a] = exactly(inst, values)?;
                self.branch_on(inst, a == 0)
            }
            Opcode::Jin => {
                let [child, parent] = exactly(inst, values)?;
                let condition = self.story.object_parent(child)? == parent;
                self.branch_on(inst, condition)
            }
            Opcode::Test => {
                let [bitmap, flags] = exactly(inst, values)?;
                self.branch_on(inst, bitmap & flags == flags)
            }
            Opcode::TestAttr => {
                let [object, attribute] = exactly(inst, values)?;
                let condition = self.story.object_attribute(object, attribute)?;
                self.branch_on(inst, condition)
            }
            Opcode::IncChk => {
                let [variable, limit] = exactly(inst, values)?;
                let variable = variable_number(inst, variable)?;
                let next = self.read_variable_in_place(variable)?.wrapping_add(1);
                self.write_variable_in_place(variable, next)?;
                self.branch_on(inst, (next as i16) > (limit as i16))
            }
            Opcode::DecChk => {
                let [variable, limit] = exactly(inst, values)?;
                let variable = variable_number(inst, variable)?;
                let next = self.read_variable_in_place(variable)?.wrapping_sub(1);
                self.write_variable_in_place(variable, next)?;
                self.branch_on(inst, (next as i16) < (limit as i16))
            }

            // ---- memory and variables ----
            Opcode::Store => {
                let [variable, value] = exactly(inst, values)?;
                let variable = variable_number(inst, variable)?;
                self.write_variable_in_place(variable, value)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::Load => {
                let [variable] = exactly(inst, values)?;
                let variable = variable_number(inst, variable)?;
                let value = self.read_variable_in_place(variable)?;
                self.store_result(inst, value)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::Inc => {
                let [variable] = exactly(inst, values)?;
                let variable = variable_number(inst, variable)?;
                let next = self.read_variable_in_place(variable)?.wrapping_add(1);
                self.write_variable_in_place(variable, next)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::Dec => {
                let [variable] = exactly(inst, values)?;
                let variable = variable_number(inst, variable)?;
                let next = self.read_variable_in_place(variable)?.wrapping_sub(1);
                self.write_variable_in_place(variable, next)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::Push => {
                let [value] = exactly(inst, values)?;
                self.frame_mut().push(value);
                self.advance(inst);
                Ok(())
            }
            Opcode::Pull => {
                let [variable] = exactly(inst, values)?;
                let variable = variable_number(inst, variable)?;
                let value = self.frame_mut().pop()?;
                self.write_variable_in_place(variable, value)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::Pop => {
                self.frame_mut().pop()?;
                self.advance(inst);
                Ok(())
            }
            Opcode::Loadw => {
                let [array, index] = exactly(inst, values)?;
                let value = self
                    .story
                    .read_word(array as usize + 2 * index as usize)?;
                self.store_result(inst, value)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::Loadb => {
                let [array, index] = exactly(inst, values)?;
                let value = self.story.read_byte(array as usize + index as usize)?;
                self.store_result(inst, value as u16)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::Storew => {
                let [array, index, value] = exactly(inst, values)?;
                self.story = self
                    .story
                    .write_word(array as usize + 2 * index as usize, value)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::Storeb => {
                let [array, index, value] = exactly(inst, values)?;
                self.story = self
                    .story
                    .write_byte(array as usize + index as usize, (value & 0xFF) as u8)?;
                self.advance(inst);
                Ok(())
            }

            // ---- objects ----
            Opcode::GetParent => {
                let [object] = exactly(inst, values)?;
                let parent = self.story.object_parent(object)?;
                self.store_result(inst, parent)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::GetSibling => {
                let [object] = exactly(inst, values)?;
                let sibling = self.story.object_sibling(object)?;
                self.store_result(inst, sibling)?;
                self.branch_on(inst, sibling != 0)
            }
            Opcode::GetChild => {
                let [object] = exactly(inst, values)?;
                let child = self.story.object_child(object)?;
                self.store_result(inst, child)?;
                self.branch_on(inst, child != 0)
            }
            Opcode::SetAttr => {
                let [object, attribute] = exactly(inst, values)?;
                self.story = self.story.object_set_attribute(object, attribute)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::ClearAttr => {
                let [object, attribute] = exactly(inst, values)?;
                self.story = self.story.object_clear_attribute(object, attribute)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::InsertObj => {
                let [object, destination] = exactly(inst, values)?;
                self.story = self.story.insert_object(object, destination)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::RemoveObj => {
                let [object] = exactly(inst, values)?;
                self.story = self.story.remove_object(object)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::GetProp => {
                let [object, property] = exactly(inst, values)?;
                let value = self
                    .story
                    .property_value(object, property_number(inst, property)?)?;
                self.store_result(inst, value)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::GetPropAddr => {
                let [object, property] = exactly(inst, values)?;
                let addr = self
                    .story
                    .property_data_addr(object, property_number(inst, property)?)?;
                self.store_result(inst, addr)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::GetNextProp => {
                let [object, property] = exactly(inst, values)?;
                let next = self
                    .story
                    .next_property(object, property_number(inst, property)?)?;
                self.store_result(inst, next)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::GetPropLen => {
                let [addr] = exactly(inst, values)?;
                let length = self.story.property_length_at(addr)?;
                self.store_result(inst, length)?;
                self.advance(inst);
                Ok(())
            }
            Opcode::PutProp => {
                let [object, property, value] = exactly(inst, values)?;
                self.story =
                    self.story
                        .put_property(object, property_number(inst, property)?, value)?;
                self.advance(inst);
                Ok(())
            }

            // ---- output ----
            Opcode::Print => {
                let text = inst.text.clone().unwrap_or_default();
                self.emit(&text);
                self.advance(inst);
                Ok(())
            }
            Opcode::PrintRet => {
                let text = inst.text.clone().unwrap_or_default();
                self.emit(&text);
                self.emit("\n");
                self.do_return(1)
            }
            Opcode::PrintAddr => {
                let [addr] = exactly(inst, values)?;
                let (text, _) = self.story.decode_string(addr as usize)?;
                self.emit(&text);
                self.advance(inst);
                Ok(())
            }
            Opcode::PrintPaddr => {
                let [packed] = exactly(inst, values)?;
                let addr = self.story.unpack(packed);
                let (text, _) = self.story.decode_string(addr)?;
                self.emit(&text);
                self.advance(inst);
                Ok(())
            }
            Opcode::PrintObj => {
                let [object] = exactly(inst, values)?;
                let name = self.story.object_name(object)?;
                self.emit(&name);
                self.advance(inst);
                Ok(())
            }
            Opcode::PrintChar => {
                let [code] = exactly(inst, values)?;
                let ch = text::zscii_char(code);
                self.emit(&ch.to_string());
                self.advance(inst);
                Ok(())
            }
            Opcode::PrintNum => {
                let [value] = exactly(inst, values)?;
                self.emit(&(value as i16).to_string());
                self.advance(inst);
                Ok(())
            }
            Opcode::NewLine => {
                self.emit("\n");
                self.advance(inst);
                Ok(())
            }

            // ---- control ----
            Opcode::Ret => {
                let [value] = exactly(inst, values)?;
                self.do_return(value)
            }
            Opcode::Rtrue => self.do_return(1),
            Opcode::Rfalse => self.do_return(0),
            Opcode::RetPopped => {
                let value = self.frame_mut().pop()?;
                self.do_return(value)
            }
            Opcode::Nop => {
                self.advance(inst);
                Ok(())
            }
            Opcode::Quit => {
                debug!("quit at {:05x}", inst.addr);
                self.state = RunState::Halted;
                Ok(())
            }
            Opcode::Verify | Opcode::Piracy => self.branch_on(inst, true),

            // ---- input ----
            Opcode::Sread => {
                let [text_addr, parse_addr] = exactly(inst, values)?;
                self.pending_read = Some(PendingRead {
                    text_addr,
                    parse_addr,
                    line: String::new(),
                    length: inst.length,
                });
                self.state = RunState::WaitingForInput;
                Ok(())
            }

            // ---- misc ----
            Opcode::Random => {
                let [range] = exactly(inst, values)?;
                let range = range as i16;
                let value = if range > 0 {
                    self.rng.next_in_range(range as u16)
                } else if range < 0 {
                    self.rng = ZRandom::seeded(-(range as i32) as u64);
                    0
                } else {
                    self.rng = ZRandom::from_entropy();
                    0
                };
                self.store_result(inst, value)?;
                self.advance(inst);
                Ok(())
            }

            // the renderer lives outside the core; accept and move on
            Opcode::ShowStatus
            | Opcode::SplitWindow
            | Opcode::SetWindow
            | Opcode::OutputStream
            | Opcode::InputStream
            | Opcode::SoundEffect => {
                debug!("{} {:?} ignored", inst.opcode.name(), values);
                self.advance(inst);
                Ok(())
            }

            _ => Err(Error::IllegalInstruction(inst.addr)),
        }
    }

    fn arith<F>(&mut self, inst: &Instruction, values: &[u16], op: F) -> Result<()>
    where
        F: Fn(i16, i16) -> Result<i16>,
    {
        let [a, b] = exactly(inst, values)?;
        let result = op(signed_word(a as i32), signed_word(b as i32))?;
        self.store_result(inst, result as u16)?;
        self.advance(inst);
        Ok(())
    }
}

fn exactly<const N: usize>(inst: &Instruction, values: &[u16]) -> Result<[u16; N]> {
    <[u16; N]>::try_from(values).map_err(|_| Error::BadOperandShape {
        addr: inst.addr,
        reason: "unexpected operand count",
    })
}

fn variable_number(inst: &Instruction, value: u16) -> Result<Variable> {
    let byte = u8::try_from(value).map_err(|_| Error::BadOperandShape {
        addr: inst.addr,
        reason: "variable number out of range",
    })?;
    Ok(Variable::decode(byte))
}

fn property_number(inst: &Instruction, value: u16) -> Result<u8> {
    u8::try_from(value).map_err(|_| Error::BadOperandShape {
        addr: inst.addr,
        reason: "property number out of range",
    })
}

/// Split a line into dictionary tokens: spaces divide, separators are
/// words of their own. Positions index into the stored line.
fn tokenize(input: &[u8], dictionary: &Dictionary) -> Vec<(String, usize)> {
    let mut tokens = Vec::new();
    let mut index = 0;
    while index < input.len() {
        let byte = input[index];
        if byte == b' ' {
            index += 1;
            continue;
        }
        if dictionary.is_separator(byte) {
            tokens.push(((byte as char).to_string(), index));
            index += 1;
            continue;
        }
        let start = index;
        while index < input.len() && input[index] != b' ' && !dictionary.is_separator(input[index])
        {
            index += 1;
        }
        tokens.push((
            String::from_utf8_lossy(&input[start..index]).into_owned(),
            start,
        ));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{interpreter_with_code, CODE_BASE};

    #[test]
    fn frames_validate_local_indices() {
        let mut frame = Frame::root();
        frame.locals = vec![5, 7];
        assert_eq!(frame.local(1).unwrap(), 5);
        assert_eq!(frame.local(2).unwrap(), 7);
        assert_eq!(frame.local(0), Err(Error::InvalidLocal(0)));
        assert_eq!(frame.local(3), Err(Error::InvalidLocal(3)));
        assert!(frame.set_local(3, 0).is_err());
    }

    #[test]
    fn stack_operations_underflow_cleanly() {
        let mut frame = Frame::root();
        assert_eq!(frame.pop(), Err(Error::StackUnderflow));
        frame.push(9);
        assert_eq!(frame.peek().unwrap(), 9);
        frame.replace_top(10).unwrap();
        assert_eq!(frame.pop().unwrap(), 10);
    }

    #[test]
    fn seeded_generators_replay() {
        let mut a = ZRandom::seeded(99);
        let mut b = ZRandom::seeded(99);
        for _ in 0..16 {
            assert_eq!(a.next_in_range(100), b.next_in_range(100));
        }
        let v = a.next_in_range(6);
        assert!((1..=6).contains(&v));
    }

    #[test]
    fn add_stores_to_stack() {
        // add #03 #04 -> sp ; quit
        let vm = interpreter_with_code(&[0x14, 0x03, 0x04, 0x00, 0xBA]);
        let vm = vm.step().unwrap();
        assert_eq!(vm.current_frame().stack(), &[7]);
        assert_eq!(vm.program_counter(), CODE_BASE + 4);
    }

    #[test]
    fn signed_arithmetic_wraps() {
        // add #7fff #0001 -> sp (large constants via variable form add)
        let vm = interpreter_with_code(&[0xD4, 0x0F, 0x7F, 0xFF, 0x00, 0x01, 0x00]);
        let vm = vm.step().unwrap();
        assert_eq!(vm.current_frame().stack(), &[0x8000]);
    }

    #[test]
    fn division_by_zero_fails_without_corrupting_the_caller() {
        let vm = interpreter_with_code(&[0x17, 0x09, 0x00, 0x00]);
        assert_eq!(vm.step().unwrap_err(), Error::DivideByZero);
        // the receiver is untouched and still at the same pc
        assert_eq!(vm.program_counter(), CODE_BASE);
        assert_eq!(vm.state(), RunState::Running);
    }

    #[test]
    fn division_truncates_toward_zero() {
        // div #fff9 #0002 -> sp  (-7 / 2 = -3)
        let vm = interpreter_with_code(&[0xD7, 0x0F, 0xFF, 0xF9, 0x00, 0x02, 0x00]);
        let vm = vm.step().unwrap();
        assert_eq!(vm.current_frame().stack(), &[(-3i16) as u16]);
    }

    #[test]
    fn stack_operands_pop_left_to_right() {
        // push #000a ; push #0003 ; sub sp sp -> sp
        // first listed operand pops first, so the subtraction is 3 - 10
        let vm = interpreter_with_code(&[
            0xE8, 0x3F, 0x00, 0x0A, // push #000a
            0xE8, 0x3F, 0x00, 0x03, // push #0003
            0x75, 0x00, 0x00, 0x00, // sub sp sp -> sp
        ]);
        let vm = vm.step().unwrap().step().unwrap().step().unwrap();
        assert_eq!(vm.current_frame().stack(), &[0xFFF9]);
    }

    #[test]
    fn store_and_load_treat_stack_in_place() {
        // push #0009 ; store sp #0041 replaces the top without popping
        let vm = interpreter_with_code(&[
            0xE8, 0x3F, 0x00, 0x09, // push #0009
            0x0D, 0x00, 0x41, // store (sp) #41
        ]);
        let vm = vm.step().unwrap().step().unwrap();
        assert_eq!(vm.current_frame().stack(), &[0x41]);
    }

    #[test]
    fn globals_flow_through_the_story() {
        // store g00 #0063
        let vm = interpreter_with_code(&[0x0D, 0x10, 0x63, 0xBA]);
        let vm = vm.step().unwrap();
        assert_eq!(vm.story().read_global(16).unwrap(), 0x63);
    }

    #[test]
    fn quit_halts_and_stays_halted() {
        let vm = interpreter_with_code(&[0xBA]);
        let vm = vm.step().unwrap();
        assert_eq!(vm.state(), RunState::Halted);
        assert_eq!(vm.step().unwrap_err(), Error::NotRunning);
    }

    #[test]
    fn print_appends_to_the_screen() {
        // print "hi" ; new_line ; print_num #-5
        let word: u16 = 0x8000 | (13 << 10) | (14 << 5) | 5;
        let bytes = word.to_be_bytes();
        let vm = interpreter_with_code(&[
            0xB2, bytes[0], bytes[1], // print "hi"
            0xBB, // new_line
            0xE6, 0x3F, 0xFF, 0xFB, // print_num #fffb
        ]);
        let vm = vm.step().unwrap().step().unwrap().step().unwrap();
        assert_eq!(vm.screen_output(), "hi\n-5");
    }

    #[test]
    fn tokenizer_splits_on_spaces_and_separators() {
        let story = crate::test_utils::test_story();
        let dictionary = story.dictionary().unwrap();
        let tokens = tokenize(b"look, take  all", &dictionary);
        assert_eq!(
            tokens,
            vec![
                ("look".to_string(), 0),
                (",".to_string(), 4),
                ("take".to_string(), 6),
                ("all".to_string(), 12),
            ]
        );
    }

    #[test]
    fn unimplemented_opcodes_are_illegal() {
        // save (0OP 0x05) is outside the executable v3 core
        let vm = interpreter_with_code(&[0xB5, 0x40]);
        assert_eq!(
            vm.step().unwrap_err(),
            Error::IllegalInstruction(CODE_BASE)
        );
    }
}
