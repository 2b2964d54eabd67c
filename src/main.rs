use std::env;
use std::fs::File;
use std::io::{self, prelude::*};
use std::process::exit;

use lantern::disassembler::Disassembler;
use lantern::game::Game;
use lantern::interpreter::RunState;
use lantern::story::Story;

fn main() -> io::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: lantern STORY-FILE [--disassemble]");
        exit(2);
    }

    let mut file = File::open(&args[1])?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    if args.iter().any(|a| a == "--disassemble") {
        return disassemble(&bytes);
    }
    play(&bytes)
}

fn disassemble(bytes: &[u8]) -> io::Result<()> {
    let story = match Story::load(bytes) {
        Ok(story) => story,
        Err(e) => {
            eprintln!("error: {}", e);
            exit(1);
        }
    };
    match Disassembler::new(&story).listing() {
        Ok(listing) => {
            println!("{}", story.header().map(|h| h.to_string()).unwrap_or_default());
            println!("{}", listing);
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {}", e);
            exit(1);
        }
    }
}

fn play(bytes: &[u8]) -> io::Result<()> {
    let mut game = match Game::from_bytes(bytes) {
        Ok(game) => game,
        Err(e) => {
            eprintln!("error: {}", e);
            exit(1);
        }
    };

    let stdin = io::stdin();
    loop {
        let state = match game.run() {
            Ok(state) => state,
            Err(e) => {
                eprintln!("execution error: {}", e);
                exit(1);
            }
        };
        print!("{}", game.take_output());
        io::stdout().flush()?;
        match state {
            RunState::Halted => break,
            RunState::WaitingForInput => {
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break; // end of input
                }
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                game.queue_input(&line);
            }
            RunState::Running => {}
        }
    }
    Ok(())
}
