//! The ZSCII string codec.
//!
//! Encoded text is a run of big-endian words, each packing three 5-bit
//! z-characters; the top bit of a word marks the end of the string. The
//! decoder is a small state machine over the three alphabets, the
//! abbreviation escapes and the 10-bit literal escape. The encoder exists
//! for dictionary lookups and produces the fixed two-word form v3
//! dictionaries store.

use bitreader::BitReader;
use log::trace;

use crate::error::Result;
use crate::memory::Memory;

/// Alphabet rows for z-characters 6..=31.
const ALPHABET_A0: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHABET_A1: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// Slot 0 (z-char 6) is the 10-bit escape, slot 1 (z-char 7) is newline;
/// both are handled before table lookup.
const ALPHABET_A2: &[u8; 26] = b" \n0123456789.,!?_#'\"/\\-:()";

/// Number of abbreviation table entries (three banks of 32).
pub const ABBREVIATION_COUNT: usize = 96;

/// The three z-characters of one encoded word, plus its end-of-string bit.
#[derive(Debug, Clone, Copy)]
struct PackedChars {
    last: bool,
    chars: [u8; 3],
}

/// Lop the end bit off a word and split out its three 5-bit z-characters.
fn split_zchars(word: u16) -> PackedChars {
    let bytes = word.to_be_bytes();
    let mut reader = BitReader::new(&bytes);
    // two bytes always hold the flag bit and three z-chars
    let last = reader.read_u8(1).unwrap_or(0) == 1;
    let mut chars = [0u8; 3];
    for c in chars.iter_mut() {
        *c = reader.read_u8(5).unwrap_or(0);
    }
    PackedChars { last, chars }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Reading characters from alphabet 0, 1 or 2.
    Alphabet(u8),
    /// Saw an abbreviation escape; the payload carries the bank base
    /// (0, 32 or 64).
    Abbreviation(u8),
    /// Saw the 10-bit escape; waiting for the high half.
    Leading,
    /// Holding the high half; waiting for the low half.
    Trailing(u8),
}

fn alphabet_char(alphabet: u8, zchar: u8) -> char {
    let table = match alphabet {
        0 => ALPHABET_A0,
        1 => ALPHABET_A1,
        _ => ALPHABET_A2,
    };
    table[(zchar - 6) as usize] as char
}

/// Printable ZSCII to text: newline, the ASCII range, '?' for the rest.
pub fn zscii_char(code: u16) -> char {
    match code {
        13 => '\n',
        32..=126 => (code as u8) as char,
        _ => '?',
    }
}

/// Decode the string starting at `addr`, expanding abbreviations through
/// `expand`, which receives the abbreviation index (bank base plus the
/// z-character that followed the escape). Returns the text and the number
/// of bytes consumed.
pub fn decode_string<F>(memory: &Memory, addr: usize, expand: &mut F) -> Result<(String, usize)>
where
    F: FnMut(usize) -> Result<String>,
{
    let mut out = String::new();
    let mut state = DecodeState::Alphabet(0);
    let mut cursor = addr;
    loop {
        let word = memory.read_word(cursor)?;
        cursor += 2;
        let packed = split_zchars(word);
        trace!("z-word {:04x} -> {:?}", word, packed);
        for &z in packed.chars.iter() {
            state = match (state, z) {
                (DecodeState::Alphabet(_), 0) => {
                    out.push(' ');
                    state
                }
                (DecodeState::Alphabet(_), 1) => DecodeState::Abbreviation(0),
                (DecodeState::Alphabet(_), 2) => DecodeState::Abbreviation(32),
                (DecodeState::Alphabet(_), 3) => DecodeState::Abbreviation(64),
                (DecodeState::Alphabet(_), 4) => DecodeState::Alphabet(1),
                (DecodeState::Alphabet(_), 5) => DecodeState::Alphabet(2),
                (DecodeState::Alphabet(2), 6) => DecodeState::Leading,
                (DecodeState::Alphabet(2), 7) => {
                    out.push('\n');
                    DecodeState::Alphabet(0)
                }
                (DecodeState::Alphabet(a), z) => {
                    out.push(alphabet_char(a, z));
                    DecodeState::Alphabet(0)
                }
                (DecodeState::Abbreviation(base), z) => {
                    out.push_str(&expand(base as usize + z as usize)?);
                    DecodeState::Alphabet(0)
                }
                (DecodeState::Leading, z) => DecodeState::Trailing(z),
                (DecodeState::Trailing(high), z) => {
                    out.push(zscii_char((high as u16) * 32 + z as u16));
                    DecodeState::Alphabet(0)
                }
            };
        }
        if packed.last {
            return Ok((out, cursor - addr));
        }
    }
}

/// Translate text into z-characters: alphabet 0 directly, digits and
/// punctuation through a shift into alphabet 2, anything else through the
/// 10-bit literal escape. Uppercase input is folded first.
pub fn encode_zchars(text: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for ch in text.to_lowercase().chars() {
        if ch == ' ' {
            out.push(0);
        } else if let Some(index) = ALPHABET_A0.iter().position(|&c| c as char == ch) {
            out.push(6 + index as u8);
        } else if ch == '\n' {
            out.extend_from_slice(&[5, 7]);
        } else if let Some(index) = ALPHABET_A2[2..].iter().position(|&c| c as char == ch) {
            out.extend_from_slice(&[5, 8 + index as u8]);
        } else {
            let code = if ch.is_ascii() { ch as u16 } else { b'?' as u16 };
            out.extend_from_slice(&[5, 6, (code >> 5) as u8, (code & 0x1F) as u8]);
        }
    }
    out
}

/// Pack z-characters three to a word, padding with shift-5, and set the
/// end bit on the last word.
pub fn pack_zchars(zchars: &[u8]) -> Vec<u16> {
    let mut padded = zchars.to_vec();
    while padded.len() % 3 != 0 || padded.is_empty() {
        padded.push(5);
    }
    let mut words: Vec<u16> = padded
        .chunks(3)
        .map(|c| ((c[0] as u16) << 10) | ((c[1] as u16) << 5) | c[2] as u16)
        .collect();
    if let Some(last) = words.last_mut() {
        *last |= 0x8000;
    }
    words
}

/// Encode a whole string into its word sequence.
pub fn encode_string(text: &str) -> Vec<u16> {
    pack_zchars(&encode_zchars(text))
}

/// The fixed 4-byte form a v3 dictionary entry begins with: six
/// z-characters in two words, end bit on the second.
pub fn encode_dictionary_word(text: &str) -> [u8; 4] {
    let mut zchars = encode_zchars(text);
    zchars.truncate(6);
    while zchars.len() < 6 {
        zchars.push(5);
    }
    let words = pack_zchars(&zchars);
    let mut out = [0u8; 4];
    out[..2].copy_from_slice(&words[0].to_be_bytes());
    out[2..].copy_from_slice(&words[1].to_be_bytes());
    out
}
