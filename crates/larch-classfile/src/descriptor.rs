//! Cursor-based dissection of field and method descriptor strings.
//!
//! The grammar is `(Type*)Type` for methods and a bare `Type` for fields,
//! where `Type` is a single-character primitive code, a `[`-prefixed array
//! (one or more nesting levels) or an object type `L<name>;`.

use crate::error::{ParseError, Result};

/// Iterates over the parameter section of a method descriptor, or over a
/// bare field descriptor, one type token at a time.
#[derive(Debug, Clone)]
pub struct DescReader<'a> {
    /// The parameter section only; the return type is not visible here.
    desc: &'a str,
    cursor: usize,
}

impl<'a> DescReader<'a> {
    pub fn new(desc: &'a str) -> Result<Self> {
        if let Some(rest) = desc.strip_prefix('(') {
            let end = rest
                .find(')')
                .ok_or_else(|| ParseError::UnterminatedParameters(desc.to_string()))?;
            Ok(DescReader {
                desc: &rest[..end],
                cursor: 0,
            })
        } else {
            Ok(DescReader { desc, cursor: 0 })
        }
    }

    /// True while the cursor has not consumed the whole parameter section.
    /// Callers must not call [`DescReader::next_type`] once this is false.
    pub fn has_next(&self) -> bool {
        self.cursor < self.desc.len()
    }

    /// Returns the next type token and advances the cursor past it.
    pub fn next_type(&mut self) -> Result<&'a str> {
        let bytes = self.desc.as_bytes();
        if self.cursor >= bytes.len() {
            return Err(ParseError::Exhausted(self.desc.to_string()));
        }
        let start = self.cursor;
        match bytes[start] {
            b'L' => self.object_token(start),
            b'[' => {
                // Count leading brackets to find the element type, then
                // apply the element consumption rule to the whole token.
                let mut elem = start + 1;
                while elem < bytes.len() && bytes[elem] == b'[' {
                    elem += 1;
                }
                if elem >= bytes.len() {
                    return Err(ParseError::Exhausted(self.desc.to_string()));
                }
                if bytes[elem] == b'L' {
                    self.object_token(start)
                } else if is_primitive(bytes[elem]) {
                    self.cursor = elem + 1;
                    Ok(&self.desc[start..self.cursor])
                } else {
                    Err(self.unexpected(elem))
                }
            }
            b if is_primitive(b) => {
                self.cursor = start + 1;
                Ok(&self.desc[start..self.cursor])
            }
            _ => Err(self.unexpected(start)),
        }
    }

    /// Rewinds the cursor to the start of the parameter list.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Consumes remaining tokens into a vector.
    pub fn collect_types(&mut self) -> Result<Vec<&'a str>> {
        let mut out = Vec::new();
        while self.has_next() {
            out.push(self.next_type()?);
        }
        Ok(out)
    }

    fn object_token(&mut self, start: usize) -> Result<&'a str> {
        match self.desc[start..].find(';') {
            Some(rel) => {
                self.cursor = start + rel + 1;
                Ok(&self.desc[start..self.cursor])
            }
            None => Err(ParseError::UnterminatedParameters(self.desc.to_string())),
        }
    }

    fn unexpected(&self, at: usize) -> ParseError {
        ParseError::UnexpectedChar {
            ch: self.desc.as_bytes()[at] as char,
            at,
            desc: self.desc.to_string(),
        }
    }
}

fn is_primitive(b: u8) -> bool {
    matches!(b, b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z')
}

/// Return-type token of a method descriptor (`"V"` for void).
pub fn return_type(desc: &str) -> Result<&str> {
    let close = desc
        .find(')')
        .ok_or_else(|| ParseError::UnterminatedParameters(desc.to_string()))?;
    let ret = &desc[close + 1..];
    if ret.is_empty() {
        return Err(ParseError::MissingReturnType(desc.to_string()));
    }
    Ok(ret)
}

/// Number of local-variable slots a parameter of this type occupies.
pub fn slot_width(token: &str) -> u16 {
    if token == "J" || token == "D" {
        2
    } else {
        1
    }
}

/// Word used for a primitive type token when synthesizing variable names.
pub fn primitive_word(token: &str) -> Option<&'static str> {
    Some(match token {
        "B" => "byte",
        "C" => "char",
        "D" => "double",
        "F" => "float",
        "I" => "int",
        "J" => "long",
        "S" => "short",
        "Z" => "boolean",
        _ => return None,
    })
}

/// Deterministic lower-cased short name for an object type token or
/// internal name, used when synthesizing variable names. Falls back to
/// `"obj"` for segments that would not form a plausible identifier.
pub fn short_name(token: &str) -> String {
    let name = token
        .trim_start_matches('[')
        .trim_start_matches('L')
        .trim_end_matches(';');
    let segment = name.rsplit(['/', '$']).next().unwrap_or(name);
    if segment.is_empty() || segment.as_bytes()[0].is_ascii_digit() {
        return "obj".to_string();
    }
    segment.to_ascii_lowercase()
}
