//! ToUnicode CMaps
//!
//! Only the parts text extraction needs are read: the width of the first
//! codespace range and the `bfchar` / `bfrange` mappings. Destinations are
//! UTF-16BE.

use std::collections::HashMap;

/// Largest `bfrange` expanded; wider ranges are clamped
const MAX_RANGE: u32 = 0xFFFF;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToUnicode {
    code_len: Option<usize>,
    map: HashMap<u32, String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Hex(Vec<u8>),
    Open,
    Close,
    Word(Vec<u8>),
}

impl ToUnicode {
    pub fn parse(data: &[u8]) -> Self {
        let tokens = tokenize(data);
        let mut cmap = ToUnicode::default();
        let mut iter = tokens.iter().peekable();

        while let Some(token) = iter.next() {
            let Token::Word(word) = token else { continue };
            match word.as_slice() {
                b"begincodespacerange" => {
                    while let Some(Token::Hex(low)) = iter.peek() {
                        cmap.code_len.get_or_insert(low.len().max(1));
                        iter.next();
                        iter.next();
                    }
                }
                b"beginbfchar" => {
                    while let Some(Token::Hex(src)) = iter.peek() {
                        let code = code_of(src);
                        cmap.code_len.get_or_insert(src.len().max(1));
                        iter.next();
                        if let Some(Token::Hex(dst)) = iter.next() {
                            cmap.map.insert(code, utf16(dst));
                        }
                    }
                }
                b"beginbfrange" => {
                    while let Some(Token::Hex(low)) = iter.peek() {
                        let low = code_of(low);
                        iter.next();
                        let Some(Token::Hex(high)) = iter.next() else { break };
                        let high = code_of(high).min(low.saturating_add(MAX_RANGE));
                        match iter.next() {
                            Some(Token::Hex(start)) => cmap.add_range(low, high, start),
                            Some(Token::Open) => {
                                let mut code = low;
                                for item in iter.by_ref() {
                                    match item {
                                        Token::Hex(dst) if code <= high => {
                                            cmap.map.insert(code, utf16(dst));
                                            code = code.saturating_add(1);
                                        }
                                        Token::Close => break,
                                        _ => {}
                                    }
                                }
                            }
                            _ => break,
                        }
                    }
                }
                _ => {}
            }
        }
        cmap
    }

    /// Consecutive codes map to consecutive values of the last UTF-16 unit
    fn add_range(&mut self, low: u32, high: u32, start: &[u8]) {
        let mut units = units(start);
        let Some(last) = units.last().copied() else { return };
        for code in low..=high {
            let offset = code - low;
            if let Some(unit) = units.last_mut() {
                *unit = last.wrapping_add(offset as u16);
            }
            self.map.insert(code, String::from_utf16_lossy(&units));
        }
    }

    /// Byte width of codes, from the codespace or the first mapping
    pub fn code_len(&self) -> Option<usize> {
        self.code_len
    }

    pub fn get(&self, code: u32) -> Option<&str> {
        self.map.get(&code).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn code_of(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

fn units(bytes: &[u8]) -> Vec<u16> {
    if bytes.len() == 1 {
        return vec![bytes[0] as u16];
    }
    bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [lo] => *lo as u16,
            _ => 0,
        })
        .collect()
}

fn utf16(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&units(bytes))
}

fn is_delimiter(byte: u8) -> bool {
    byte.is_ascii_whitespace() || b"<>[]()/%{}".contains(&byte)
}

fn tokenize(data: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'%' => {
                while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
                    i += 1;
                }
            }
            b'<' | b'>' if data.get(i + 1) == Some(&data[i]) => i += 2,
            b'<' => {
                let end = data[i + 1..]
                    .iter()
                    .position(|&b| b == b'>')
                    .map_or(data.len(), |pos| i + 1 + pos);
                tokens.push(Token::Hex(hex_bytes(&data[i + 1..end])));
                i = end + 1;
            }
            b'[' => {
                tokens.push(Token::Open);
                i += 1;
            }
            b']' => {
                tokens.push(Token::Close);
                i += 1;
            }
            b'(' => {
                // Literal strings only appear in the CIDSystemInfo header
                let mut depth = 0;
                while i < data.len() {
                    match data[i] {
                        b'\\' => i += 1,
                        b'(' => depth += 1,
                        b')' => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                    if depth == 0 {
                        break;
                    }
                }
            }
            byte if byte.is_ascii_whitespace() => i += 1,
            _ => {
                let start = i;
                i += 1;
                while i < data.len() && !is_delimiter(data[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(data[start..i].to_vec()));
            }
        }
    }
    tokens
}

fn hex_bytes(text: &[u8]) -> Vec<u8> {
    let digits: Vec<u8> = text
        .iter()
        .filter_map(|b| (*b as char).to_digit(16).map(|d| d as u8))
        .collect();
    digits
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}
