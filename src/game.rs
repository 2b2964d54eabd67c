//! Glue between a host and the interpreter core: loading, a keystroke
//! queue, a run loop and screen-output draining.
//!
//! The core itself never blocks; `Game` steps it until it halts or wants
//! a key the queue cannot supply, then hands control back to the host.

use std::collections::VecDeque;

use log::debug;

use crate::error::Result;
use crate::interpreter::{Interpreter, RunState};
use crate::story::Story;

pub struct Game {
    interpreter: Interpreter,
    pending_keys: VecDeque<char>,
    consumed: usize,
}

impl Game {
    /// Validate a story blob and boot an interpreter for it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Game> {
        let story = Story::load(bytes)?;
        debug!("booting:{}", story.header()?);
        Ok(Game {
            interpreter: Interpreter::make(story)?,
            pending_keys: VecDeque::new(),
            consumed: 0,
        })
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Swap in an older snapshot; the host owns whatever history it keeps.
    pub fn restore_snapshot(&mut self, snapshot: Interpreter) {
        self.consumed = self.consumed.min(snapshot.screen_output().len());
        self.interpreter = snapshot;
    }

    /// Queue keys for the next read. Hosts append a newline to submit a
    /// whole command.
    pub fn queue_input(&mut self, text: &str) {
        self.pending_keys.extend(text.chars());
    }

    /// True when the machine wants a key the queue cannot supply.
    pub fn wants_input(&self) -> bool {
        self.interpreter.state() == RunState::WaitingForInput && self.pending_keys.is_empty()
    }

    /// Advance by one instruction, or feed one queued key.
    pub fn step(&mut self) -> Result<RunState> {
        match self.interpreter.state() {
            RunState::Running => {
                self.interpreter = self.interpreter.step()?;
            }
            RunState::WaitingForInput => {
                if let Some(key) = self.pending_keys.pop_front() {
                    self.interpreter = self.interpreter.step_with_input(key)?;
                }
            }
            RunState::Halted => {}
        }
        Ok(self.interpreter.state())
    }

    /// Run until the game halts or asks for input the queue cannot
    /// supply.
    pub fn run(&mut self) -> Result<RunState> {
        loop {
            match self.interpreter.state() {
                RunState::Halted => return Ok(RunState::Halted),
                RunState::WaitingForInput if self.pending_keys.is_empty() => {
                    return Ok(RunState::WaitingForInput)
                }
                _ => {
                    self.step()?;
                }
            }
        }
    }

    /// Screen output emitted since the last drain.
    pub fn take_output(&mut self) -> String {
        let screen = self.interpreter.screen_output();
        let fresh = screen[self.consumed..].to_string();
        self.consumed = screen.len();
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::story_bytes_with_code;

    #[test]
    fn runs_to_halt_and_drains_output() {
        // print "hi" ; quit
        let word: u16 = 0x8000 | (13 << 10) | (14 << 5) | 5;
        let bytes = word.to_be_bytes();
        let image = story_bytes_with_code(&[0xB2, bytes[0], bytes[1], 0xBA]);
        let mut game = Game::from_bytes(&image).unwrap();
        assert_eq!(game.run().unwrap(), RunState::Halted);
        assert_eq!(game.take_output(), "hi");
        assert_eq!(game.take_output(), "");
    }

    #[test]
    fn snapshot_restore_rewinds() {
        let image = story_bytes_with_code(&[
            0xE8, 0x3F, 0x00, 0x01, // push #0001
            0xE8, 0x3F, 0x00, 0x02, // push #0002
            0xBA, // quit
        ]);
        let mut game = Game::from_bytes(&image).unwrap();
        game.step().unwrap();
        let snapshot = game.interpreter().clone();
        game.step().unwrap();
        assert_eq!(game.interpreter().current_frame().stack(), &[1, 2]);
        game.restore_snapshot(snapshot);
        assert_eq!(game.interpreter().current_frame().stack(), &[1]);
    }
}
