//! Builders for the synthetic story images the unit tests run against.
//!
//! The fixture is a deliberately small v3 image with a populated header,
//! one abbreviation, a four-object tree, a three-word dictionary and a
//! two-local routine. Tests that need code poke it in at `CODE_BASE`.

use crate::interpreter::Interpreter;
use crate::story::Story;
use crate::text;

pub const IMAGE_LEN: usize = 0x0800;
/// Static memory base; everything below is dynamic.
pub const DYNAMIC_TOP: usize = 0x0400;
pub const ABBREV_TABLE: usize = 0x0040;
pub const ABBREV_STRINGS: usize = 0x0100;
pub const OBJECT_TABLE: usize = 0x0140;
/// Free dynamic bytes for read/write scratch buffers.
pub const SCRATCH: usize = 0x01D0;
pub const GLOBALS: usize = 0x0200;
pub const DICTIONARY: usize = 0x03E0;
/// A routine with two locals defaulting to 5 and 7; body is `rtrue`.
pub const ROUTINE_ADDR: usize = 0x0440;
/// Where `story_with_code` places code; also the fixture's initial PC.
pub const CODE_BASE: usize = 0x0480;

pub fn set_word(bytes: &mut [u8], addr: usize, value: u16) {
    bytes[addr] = (value >> 8) as u8;
    bytes[addr + 1] = (value & 0xFF) as u8;
}

fn write_zscii(bytes: &mut [u8], addr: usize, text: &str) -> usize {
    let words = text::encode_string(text);
    for (i, w) in words.iter().enumerate() {
        set_word(bytes, addr + 2 * i, *w);
    }
    words.len() * 2
}

pub fn test_story_bytes() -> Vec<u8> {
    let mut bytes = vec![0u8; IMAGE_LEN];

    // header
    bytes[0x00] = 3;
    set_word(&mut bytes, 0x02, 1); // release
    set_word(&mut bytes, 0x04, DYNAMIC_TOP as u16); // high memory base
    set_word(&mut bytes, 0x06, CODE_BASE as u16); // initial pc
    set_word(&mut bytes, 0x08, DICTIONARY as u16);
    set_word(&mut bytes, 0x0A, OBJECT_TABLE as u16);
    set_word(&mut bytes, 0x0C, GLOBALS as u16);
    set_word(&mut bytes, 0x0E, DYNAMIC_TOP as u16); // static memory base
    for (i, b) in b"260802".iter().enumerate() {
        bytes[0x12 + i] = *b;
    }
    set_word(&mut bytes, 0x18, ABBREV_TABLE as u16);

    // abbreviation 0: "the"
    set_word(&mut bytes, ABBREV_TABLE, (ABBREV_STRINGS / 2) as u16);
    write_zscii(&mut bytes, ABBREV_STRINGS, "the");

    // object table: 31 default properties, then four 9-byte entries.
    // Default for property 2 is 0x0042.
    set_word(&mut bytes, OBJECT_TABLE + 2, 0x0042);
    let tree = OBJECT_TABLE + 31 * 2;
    let entry = |n: usize| tree + (n - 1) * 9;
    let props1 = tree + 4 * 9; // property blocks start right after the tree

    // object 1 "box": attributes 0 and 9, children 3 and 4
    bytes[entry(1)] = 0x80;
    bytes[entry(1) + 1] = 0x40;
    bytes[entry(1) + 4] = 0; // parent
    bytes[entry(1) + 5] = 2; // sibling
    bytes[entry(1) + 6] = 3; // child
    set_word(&mut bytes, entry(1) + 7, props1 as u16);

    // property block 1: name "box", prop 5 = 0x1234 (2 bytes), prop 3 = 0x42
    bytes[props1] = 1;
    write_zscii(&mut bytes, props1 + 1, "box");
    bytes[props1 + 3] = (2 - 1) << 5 | 5;
    set_word(&mut bytes, props1 + 4, 0x1234);
    bytes[props1 + 6] = 3;
    bytes[props1 + 7] = 0x42;
    bytes[props1 + 8] = 0;

    // object 2 "ball": no relations, prop 5 = 0x99 (1 byte)
    let props2 = props1 + 9;
    set_word(&mut bytes, entry(2) + 7, props2 as u16);
    bytes[props2] = 2;
    write_zscii(&mut bytes, props2 + 1, "ball");
    bytes[props2 + 5] = 5;
    bytes[props2 + 6] = 0x99;
    bytes[props2 + 7] = 0;

    // objects 3 and 4: children of 1, empty property lists
    let props3 = props2 + 8;
    bytes[entry(3) + 4] = 1;
    bytes[entry(3) + 5] = 4;
    set_word(&mut bytes, entry(3) + 7, props3 as u16);
    bytes[props3] = 0;
    bytes[props3 + 1] = 0;
    let props4 = props3 + 2;
    bytes[entry(4) + 4] = 1;
    set_word(&mut bytes, entry(4) + 7, props4 as u16);
    bytes[props4] = 0;
    bytes[props4 + 1] = 0;

    // dictionary: separators '.' and ',', 7-byte entries, three words
    let mut cursor = DICTIONARY;
    bytes[cursor] = 2;
    bytes[cursor + 1] = b'.';
    bytes[cursor + 2] = b',';
    bytes[cursor + 3] = 7;
    set_word(&mut bytes, cursor + 4, 3);
    cursor += 6;
    for word in ["go", "look", "take"] {
        let encoded = text::encode_dictionary_word(word);
        bytes[cursor..cursor + 4].copy_from_slice(&encoded);
        cursor += 7;
    }

    // routine: two locals defaulting to 5 and 7, body rtrue
    bytes[ROUTINE_ADDR] = 2;
    set_word(&mut bytes, ROUTINE_ADDR + 1, 5);
    set_word(&mut bytes, ROUTINE_ADDR + 3, 7);
    bytes[ROUTINE_ADDR + 5] = 0xB0;

    bytes
}

pub fn test_story() -> Story {
    Story::load(&test_story_bytes()).unwrap()
}

pub fn story_bytes_with_code(code: &[u8]) -> Vec<u8> {
    let mut bytes = test_story_bytes();
    bytes[CODE_BASE..CODE_BASE + code.len()].copy_from_slice(code);
    bytes
}

pub fn story_with_code(code: &[u8]) -> Story {
    Story::load(&story_bytes_with_code(code)).unwrap()
}

/// A fixture image big enough to hold `code` at an arbitrary address, for
/// tests that check address arithmetic at literal offsets.
pub fn story_with_code_at(addr: usize, code: &[u8]) -> Story {
    let mut bytes = test_story_bytes();
    bytes.resize((addr + code.len() + 0x40).max(IMAGE_LEN), 0);
    bytes[addr..addr + code.len()].copy_from_slice(code);
    Story::load(&bytes).unwrap()
}

pub fn interpreter_with_code(code: &[u8]) -> Interpreter {
    Interpreter::make(story_with_code(code)).unwrap()
}
