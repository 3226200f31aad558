//! Text parser for the pipeline-library language: C-style comments,
//! identifier/number/string/punctuation tokens, line and column tracking.

use std::sync::Arc;

use forge_common::{Error, Result};

const PUNCTUATION: &[u8] = b"{}()[]<>=,";

/// A resumable tokenizer over a shared source buffer.
///
/// The include resolver suspends a parser mid-file while an included file
/// is processed, so the parser owns its source and its position.
pub struct TextParser {
    source: Arc<str>,
    pos: usize,
    line: usize,
    col: usize,
    token_line: usize,
    token_col: usize,
}

impl TextParser {
    pub fn new(source: Arc<str>) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            col: 1,
            token_line: 1,
            token_col: 1,
        }
    }

    /// Line and column of the most recently read token.
    pub fn location(&self) -> (usize, usize) {
        (self.token_line, self.token_col)
    }

    fn remaining(&self) -> &str {
        &self.source[self.pos..]
    }

    fn advance(&mut self, len: usize) {
        for c in self.source[self.pos..self.pos + len].chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }

        self.pos += len;
    }

    fn parse_error(&self, message: impl Into<String>) -> Error {
        Error::TextParse {
            path: String::new(),
            line: self.token_line,
            col: self.token_col,
            message: message.into(),
        }
    }

    pub fn skip_whitespace(&mut self) -> Result<()> {
        loop {
            let rest = self.remaining();

            if let Some(c) = rest.chars().next() {
                if c.is_whitespace() {
                    self.advance(c.len_utf8());
                    continue;
                }
            }

            if rest.starts_with("//") {
                match rest.find('\n') {
                    Some(index) => self.advance(index + 1),
                    None => self.advance(rest.len()),
                }
                continue;
            }

            if rest.starts_with("/*") {
                match rest.find("*/") {
                    Some(index) => self.advance(index + 2),
                    None => {
                        return Err(self.parse_error("unterminated block comment"));
                    }
                }
                continue;
            }

            return Ok(());
        }
    }

    /// Reads the next token, or `None` at end of input.
    ///
    /// Quoted strings are returned with their quotes; resolve them with
    /// [`resolve_quoted_string`].
    pub fn read_token(&mut self) -> Result<Option<Arc<str>>> {
        self.skip_whitespace()?;

        self.token_line = self.line;
        self.token_col = self.col;

        // Hold the source alive independently of `self` so the cursor can
        // advance while a token slice is still in hand.
        let source = Arc::clone(&self.source);
        let rest = &source[self.pos..];

        let Some(first) = rest.chars().next() else {
            return Ok(None);
        };

        if first.is_ascii() && PUNCTUATION.contains(&(first as u8)) {
            self.advance(1);
            return Ok(Some(Arc::from(&rest[..1])));
        }

        if first == '"' {
            let mut len = 1;
            let mut escaped = false;

            for c in rest[1..].chars() {
                len += c.len_utf8();

                if escaped {
                    escaped = false;
                    continue;
                }

                match c {
                    '\\' => escaped = true,
                    '"' => {
                        let token = &rest[..len];
                        self.advance(len);
                        return Ok(Some(Arc::from(token)));
                    }
                    '\n' => break,
                    _ => {}
                }
            }

            return Err(self.parse_error("unterminated string constant"));
        }

        let mut len = 0;
        for c in rest.chars() {
            if c.is_whitespace() || c == '"' || (c.is_ascii() && PUNCTUATION.contains(&(c as u8))) {
                break;
            }
            len += c.len_utf8();
        }

        let token = &rest[..len];
        self.advance(len);
        Ok(Some(Arc::from(token)))
    }

    pub fn require_token(&mut self) -> Result<Arc<str>> {
        match self.read_token()? {
            Some(token) => Ok(token),
            None => Err(self.parse_error("unexpected end of file")),
        }
    }

    pub fn expect_token(&mut self, expected: &str) -> Result<()> {
        let token = self.require_token()?;

        if &*token != expected {
            return Err(self.parse_error(format!("expected '{expected}'")));
        }

        Ok(())
    }
}

/// Resolves a quoted string token: strips the quotes and applies the
/// standard C escape set (`\t \r \n \" \' \\`).
pub fn resolve_quoted_string(token: &str) -> Result<String> {
    let inner = token
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or(Error::InvalidCString)?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            _ => return Err(Error::InvalidCString),
        }
    }

    Ok(out)
}

/// Whether a token is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_identifier(token: &str) -> bool {
    let mut chars = token.chars();

    let Some(first) = chars.next() else {
        return false;
    };

    if !first.is_ascii_alphabetic() && first != '_' {
        return false;
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses an unsigned constant in decimal, hex (`0x`) or octal (leading
/// `0`), bounded by `max`.
pub fn parse_uint_constant(token: &str, max: u64) -> Result<u64> {
    if token.is_empty() {
        return Ok(0);
    }

    let (digits, base) = if let Some(hex) = token.strip_prefix("0x") {
        (hex, 16u64)
    } else if token.starts_with('0') && token.len() > 1 {
        (&token[1..], 8u64)
    } else {
        (token, 10u64)
    };

    if digits.is_empty() {
        return Err(Error::MalformedFile);
    }

    let max_before_multiply = max / base;
    let mut result = 0u64;

    for c in digits.chars() {
        let digit = match c {
            '0'..='9' => c as u64 - '0' as u64,
            'a'..='f' => c as u64 - 'a' as u64 + 0xa,
            'A'..='F' => c as u64 - 'A' as u64 + 0xa,
            _ => return Err(Error::MalformedFile),
        };

        if digit >= base {
            return Err(Error::MalformedFile);
        }

        if result > max_before_multiply {
            return Err(Error::IntegerOverflow);
        }
        result *= base;

        if max - result < digit {
            return Err(Error::IntegerOverflow);
        }
        result += digit;
    }

    Ok(result)
}
