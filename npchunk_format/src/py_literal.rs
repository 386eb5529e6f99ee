//! Literal values of header records.
//!
//! A header record is a dictionary written in Python literal syntax, e.g.
//! `{'descr': '<f8', 'fortran_order': False, 'shape': (10,), }`.
//! [`PyValue`] covers the subset of that syntax which appears in header records: strings, integers, booleans, `None`, tuples, lists and dictionaries.

use std::fmt::{Display, Write};

use itertools::Itertools;
use thiserror::Error;

/// The maximum nesting depth of containers accepted by [`PyValue::parse`].
const MAX_DEPTH: usize = 32;

/// A literal value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PyValue {
    /// `None`.
    None,
    /// `True` or `False`.
    Bool(bool),
    /// An integer.
    Integer(i128),
    /// A quoted string.
    String(String),
    /// A tuple, e.g. `(1, 2)`.
    Tuple(Vec<PyValue>),
    /// A list, e.g. `[1, 2]`.
    List(Vec<PyValue>),
    /// A dictionary with entries in declared order.
    Dict(Vec<(PyValue, PyValue)>),
}

/// A literal parse error.
#[derive(Clone, Debug, Error)]
#[error("invalid literal at byte {position}: {reason}")]
pub struct PyLiteralError {
    position: usize,
    reason: String,
}

impl PyLiteralError {
    /// The byte position where parsing failed.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }
}

impl PyValue {
    /// Parse a literal value from `text`.
    ///
    /// Surrounding whitespace is ignored, anything else after the value is an error.
    ///
    /// # Errors
    /// Returns a [`PyLiteralError`] if `text` is not a single valid literal.
    pub fn parse(text: &str) -> Result<Self, PyLiteralError> {
        let mut parser = Parser {
            bytes: text.as_bytes(),
            position: 0,
            depth: 0,
        };
        let value = parser.value()?;
        parser.skip_whitespace();
        if parser.position == parser.bytes.len() {
            Ok(value)
        } else {
            Err(parser.error("unexpected trailing characters"))
        }
    }

    /// Return the string if the value is a [`PyValue::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(string) => Some(string),
            _ => None,
        }
    }

    /// Return the items of a [`PyValue::Tuple`] or [`PyValue::List`].
    #[must_use]
    pub fn as_sequence(&self) -> Option<&[PyValue]> {
        match self {
            Self::Tuple(items) | Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a string key in a [`PyValue::Dict`].
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PyValue> {
        match self {
            Self::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

impl Display for PyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Integer(integer) => write!(f, "{integer}"),
            Self::String(string) => {
                f.write_char('\'')?;
                for c in string.chars() {
                    match c {
                        '\\' => f.write_str("\\\\")?,
                        '\'' => f.write_str("\\'")?,
                        '\n' => f.write_str("\\n")?,
                        '\r' => f.write_str("\\r")?,
                        '\t' => f.write_str("\\t")?,
                        c => f.write_char(c)?,
                    }
                }
                f.write_char('\'')
            }
            Self::Tuple(items) => {
                write!(f, "({}", items.iter().format(", "))?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::List(items) => {
                write!(f, "[{}]", items.iter().format(", "))
            }
            Self::Dict(entries) => {
                // Entries are always followed by ", " to match the header records written by numpy
                f.write_char('{')?;
                for (key, value) in entries {
                    write!(f, "{key}: {value}, ")?;
                }
                f.write_char('}')
            }
        }
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    position: usize,
    depth: usize,
}

impl Parser<'_> {
    fn error(&self, reason: impl Into<String>) -> PyLiteralError {
        PyLiteralError {
            position: self.position,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.position).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.position += 1;
        }
    }

    fn value(&mut self) -> Result<PyValue, PyLiteralError> {
        self.skip_whitespace();
        match self.peek() {
            Some(quote @ (b'\'' | b'"')) => self.string(quote).map(PyValue::String),
            Some(b'(') => {
                let (mut items, trailing_comma) = self.sequence(b')')?;
                if items.len() == 1 && !trailing_comma {
                    // a parenthesised expression, not a tuple
                    Ok(items.remove(0))
                } else {
                    Ok(PyValue::Tuple(items))
                }
            }
            Some(b'[') => Ok(PyValue::List(self.sequence(b']')?.0)),
            Some(b'{') => self.dict(),
            Some(b'-' | b'+' | b'0'..=b'9') => self.integer(),
            Some(c) if c.is_ascii_alphabetic() => self.identifier(),
            Some(c) => Err(self.error(format!("unexpected character {:?}", char::from(c)))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn enter(&mut self) -> Result<(), PyLiteralError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            Err(self.error("containers are nested too deeply"))
        } else {
            Ok(())
        }
    }

    /// Parse the items of a tuple or list up to `close`.
    ///
    /// Returns the items and whether the last item was followed by a comma.
    fn sequence(&mut self, close: u8) -> Result<(Vec<PyValue>, bool), PyLiteralError> {
        self.enter()?;
        self.position += 1;
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.position += 1;
                break;
            }
            items.push(self.value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => {
                    self.position += 1;
                    trailing_comma = true;
                }
                Some(c) if c == close => {
                    self.position += 1;
                    trailing_comma = false;
                    break;
                }
                _ => return Err(self.error(format!("expected ',' or {:?}", char::from(close)))),
            }
        }
        self.depth -= 1;
        Ok((items, trailing_comma))
    }

    fn dict(&mut self) -> Result<PyValue, PyLiteralError> {
        self.enter()?;
        self.position += 1;
        let mut entries = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(b'}') {
                self.position += 1;
                break;
            }
            let key = self.value()?;
            self.skip_whitespace();
            if self.peek() != Some(b':') {
                return Err(self.error("expected ':'"));
            }
            self.position += 1;
            let value = self.value()?;
            entries.push((key, value));
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.position += 1,
                Some(b'}') => {
                    self.position += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
        self.depth -= 1;
        Ok(PyValue::Dict(entries))
    }

    fn string(&mut self, quote: u8) -> Result<String, PyLiteralError> {
        let start = self.position;
        self.position += 1;
        let mut bytes = Vec::new();
        loop {
            let Some(c) = self.peek() else {
                self.position = start;
                return Err(self.error("unterminated string"));
            };
            self.position += 1;
            match c {
                c if c == quote => break,
                b'\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(self.error("unterminated escape sequence"));
                    };
                    self.position += 1;
                    match escaped {
                        b'\\' | b'\'' | b'"' => bytes.push(escaped),
                        b'n' => bytes.push(b'\n'),
                        b'r' => bytes.push(b'\r'),
                        b't' => bytes.push(b'\t'),
                        b'0' => bytes.push(b'\0'),
                        b'x' => {
                            let hex = self
                                .bytes
                                .get(self.position..self.position + 2)
                                .and_then(|hex| std::str::from_utf8(hex).ok())
                                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                                .ok_or_else(|| self.error("invalid \\x escape"))?;
                            self.position += 2;
                            let mut buf = [0; 4];
                            bytes.extend_from_slice(char::from(hex).encode_utf8(&mut buf).as_bytes());
                        }
                        _ => return Err(self.error("unsupported escape sequence")),
                    }
                }
                b'\n' => return Err(self.error("newline in string")),
                c => bytes.push(c),
            }
        }
        String::from_utf8(bytes).map_err(|_| self.error("string is not valid UTF-8"))
    }

    fn integer(&mut self) -> Result<PyValue, PyLiteralError> {
        let start = self.position;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.position += 1;
        }
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.position += 1;
        }
        let digits = std::str::from_utf8(&self.bytes[start..self.position])
            .map_err(|_| self.error("invalid integer"))?;
        // Legacy writers emit long integers with an `L` suffix, e.g. `(10L,)`
        if matches!(self.peek(), Some(b'L' | b'l')) {
            self.position += 1;
        }
        digits
            .parse::<i128>()
            .map(PyValue::Integer)
            .map_err(|_| PyLiteralError {
                position: start,
                reason: format!("invalid integer {digits:?}"),
            })
    }

    fn identifier(&mut self) -> Result<PyValue, PyLiteralError> {
        let start = self.position;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.position += 1;
        }
        match &self.bytes[start..self.position] {
            b"True" => Ok(PyValue::Bool(true)),
            b"False" => Ok(PyValue::Bool(false)),
            b"None" => Ok(PyValue::None),
            identifier => Err(PyLiteralError {
                position: start,
                reason: format!(
                    "unexpected identifier {:?}",
                    String::from_utf8_lossy(identifier)
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_header_record() {
        let value =
            PyValue::parse("{'descr': '<f8', 'fortran_order': False, 'shape': (10, 3), }   \n")
                .unwrap();
        assert_eq!(value.get("descr"), Some(&PyValue::String("<f8".to_string())));
        assert_eq!(value.get("fortran_order"), Some(&PyValue::Bool(false)));
        assert_eq!(
            value.get("shape"),
            Some(&PyValue::Tuple(vec![
                PyValue::Integer(10),
                PyValue::Integer(3)
            ]))
        );
        assert_eq!(value.get("missing"), None);
    }

    #[test]
    fn parse_tuples() {
        assert_eq!(PyValue::parse("()").unwrap(), PyValue::Tuple(vec![]));
        assert_eq!(
            PyValue::parse("(5,)").unwrap(),
            PyValue::Tuple(vec![PyValue::Integer(5)])
        );
        // not a tuple
        assert_eq!(PyValue::parse("(5)").unwrap(), PyValue::Integer(5));
        assert_eq!(
            PyValue::parse("(10L, 2L)").unwrap(),
            PyValue::Tuple(vec![PyValue::Integer(10), PyValue::Integer(2)])
        );
    }

    #[test]
    fn parse_structured_descr() {
        let value = PyValue::parse(r#"[('x', '<f8'), ("y", '<i4', (2,))]"#).unwrap();
        assert_eq!(
            value,
            PyValue::List(vec![
                PyValue::Tuple(vec![
                    PyValue::String("x".to_string()),
                    PyValue::String("<f8".to_string())
                ]),
                PyValue::Tuple(vec![
                    PyValue::String("y".to_string()),
                    PyValue::String("<i4".to_string()),
                    PyValue::Tuple(vec![PyValue::Integer(2)])
                ]),
            ])
        );
    }

    #[test]
    fn parse_escapes() {
        assert_eq!(
            PyValue::parse(r"'a\'b\\c\x41'").unwrap(),
            PyValue::String("a'b\\cA".to_string())
        );
    }

    #[test]
    fn parse_errors() {
        assert!(PyValue::parse("").is_err());
        assert!(PyValue::parse("{'a': 1").is_err());
        assert!(PyValue::parse("'abc").is_err());
        assert!(PyValue::parse("(1, 2) x").is_err());
        assert!(PyValue::parse("Nonsense").is_err());
        assert!(PyValue::parse("{'a' 1}").is_err());
        assert!(PyValue::parse("99999999999999999999999999999999999999999999").is_err());
        let nested = "[".repeat(MAX_DEPTH + 1) + &"]".repeat(MAX_DEPTH + 1);
        assert!(PyValue::parse(&nested).is_err());
        let nested = "[".repeat(MAX_DEPTH) + &"]".repeat(MAX_DEPTH);
        assert!(PyValue::parse(&nested).is_ok());
    }

    #[test]
    fn display_matches_header_syntax() {
        let value = PyValue::Dict(vec![
            (
                PyValue::String("descr".to_string()),
                PyValue::String("<f8".to_string()),
            ),
            (
                PyValue::String("fortran_order".to_string()),
                PyValue::Bool(false),
            ),
            (
                PyValue::String("shape".to_string()),
                PyValue::Tuple(vec![PyValue::Integer(3)]),
            ),
        ]);
        let text = value.to_string();
        assert_eq!(
            text,
            "{'descr': '<f8', 'fortran_order': False, 'shape': (3,), }"
        );
        assert_eq!(PyValue::parse(&text).unwrap(), value);
        assert_eq!(PyValue::Tuple(vec![]).to_string(), "()");
        assert_eq!(PyValue::String("it's".to_string()).to_string(), r"'it\'s'");
    }
}
