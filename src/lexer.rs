use crate::{
    error::{tilt, PsResult},
    object::{Object, PsString, Value},
    vm::Vm,
};

const FORM_FEED: u8 = b'\x0C';

/// A streaming tokenizer over ISO-8859-1 program text. Produces `Object`s
/// with the literal/executable attribute already settled; string contents
/// are allocated into the VM as they are lexed
#[derive(Debug)]
pub(crate) struct Lexer {
    buffer: Vec<u8>,
    cursor: usize,
}

impl Lexer {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer, cursor: 0 }
    }

    /// Bytes consumed so far; `token` uses this to compute the remainder
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn next_byte(&mut self) -> Option<u8> {
        self.buffer.get(self.cursor).copied().map(|b| {
            self.cursor += 1;
            b
        })
    }

    fn peek_byte(&self) -> Option<u8> {
        self.buffer.get(self.cursor).copied()
    }

    /// Whitespace chars are defined as
    ///
    /// * NUL             0x0
    /// * Horizontal tab  0x9
    /// * Line feed       0xa
    /// * Form feed       0xc
    /// * Carriage return 0xd
    /// * Space           0x20
    fn is_whitespace(b: u8) -> bool {
        matches!(b, b'\0' | 0x9 | b'\n' | FORM_FEED | b'\r' | b' ')
    }

    fn is_delimiter(b: u8) -> bool {
        matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
        )
    }

    fn is_regular(b: u8) -> bool {
        !Self::is_whitespace(b) && !Self::is_delimiter(b)
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_byte() {
            if Self::is_whitespace(b) {
                self.next_byte();
            } else if b == b'%' {
                self.next_byte();
                self.skip_comment();
            } else {
                break;
            }
        }
    }

    /// Assumes the leading `%` has already been consumed
    fn skip_comment(&mut self) {
        while let Some(b) = self.peek_byte() {
            if b == b'\n' || b == b'\r' {
                break;
            }
            self.next_byte();
        }
    }

    pub fn next_token(&mut self, vm: &mut Vm) -> PsResult<Option<Object>> {
        self.skip_whitespace();

        Ok(Some(match self.peek_byte() {
            None => return Ok(None),
            Some(b'(') => {
                self.next_byte();
                let bytes = self.lex_string()?;
                Object::literal(Value::String(vm.new_string(bytes)))
            }
            Some(b'<') => {
                self.next_byte();
                let bytes = self.lex_hex_string()?;
                Object::literal(Value::String(vm.new_string(bytes)))
            }
            Some(b @ (b'[' | b']' | b'{' | b'}')) => {
                self.next_byte();
                Object::executable(Value::Name(PsString::from_bytes(vec![b])))
            }
            Some(b'/') => {
                self.next_byte();
                // `/[` and friends are literal single-character names.
                if let Some(b @ (b'[' | b']' | b'{' | b'}')) = self.peek_byte() {
                    self.next_byte();
                    Object::literal(Value::Name(PsString::from_bytes(vec![b])))
                } else {
                    let run = self.lex_regular_run();
                    Object::literal(Value::Name(PsString::from_bytes(run)))
                }
            }
            Some(b')' | b'>') => tilt!(SyntaxError, "unexpected {:?}", self.peek_byte().unwrap() as char),
            Some(_) => {
                let run = self.lex_regular_run();
                match classify_number(&run)? {
                    Some(value) => Object::literal(value),
                    None => Object::executable(Value::Name(PsString::from_bytes(run))),
                }
            }
        }))
    }

    /// Consume the maximal run of regular characters starting here. The run
    /// ends at whitespace, a delimiter, or end of input, so every token is
    /// properly delimited by construction
    fn lex_regular_run(&mut self) -> Vec<u8> {
        let start = self.cursor;
        while let Some(b) = self.peek_byte() {
            if !Self::is_regular(b) {
                break;
            }
            self.next_byte();
        }
        self.buffer[start..self.cursor].to_vec()
    }

    /// Body of a `(...)` string; the opening paren is already consumed.
    /// Parens nest; escapes follow the Level-1 rules
    fn lex_string(&mut self) -> PsResult<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut depth = 1usize;

        loop {
            let Some(b) = self.next_byte() else {
                tilt!(SyntaxError, "unterminated string");
            };
            match b {
                b'(' => {
                    depth += 1;
                    bytes.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(bytes);
                    }
                    bytes.push(b);
                }
                b'\\' => {
                    let Some(esc) = self.next_byte() else {
                        tilt!(SyntaxError, "unterminated string");
                    };
                    match esc {
                        b'n' => bytes.push(b'\n'),
                        b't' => bytes.push(b'\t'),
                        b'r' => bytes.push(b'\r'),
                        b'0'..=b'7' => {
                            let mut val = u32::from(esc - b'0');
                            for _ in 0..2 {
                                match self.peek_byte() {
                                    Some(d @ b'0'..=b'7') => {
                                        self.next_byte();
                                        val = val * 8 + u32::from(d - b'0');
                                    }
                                    _ => break,
                                }
                            }
                            bytes.push(val as u8);
                        }
                        // An escaped line end disappears entirely.
                        b'\n' => {}
                        b'\r' => {
                            if self.peek_byte() == Some(b'\n') {
                                self.next_byte();
                            }
                        }
                        // Any other escaped character stands for itself.
                        other => bytes.push(other),
                    }
                }
                other => bytes.push(other),
            }
        }
    }

    /// Body of a `<...>` hex string; whitespace is ignored and an odd
    /// number of digits is padded with a trailing zero
    fn lex_hex_string(&mut self) -> PsResult<Vec<u8>> {
        let mut nibbles = Vec::new();

        loop {
            let Some(b) = self.next_byte() else {
                tilt!(SyntaxError, "unterminated hex string");
            };
            match b {
                b'>' => break,
                _ if Self::is_whitespace(b) => {}
                b'0'..=b'9' => nibbles.push(b - b'0'),
                b'a'..=b'f' => nibbles.push(b - b'a' + 10),
                b'A'..=b'F' => nibbles.push(b - b'A' + 10),
                other => tilt!(SyntaxError, "bad hex digit {:?}", other as char),
            }
        }

        if nibbles.len() % 2 == 1 {
            nibbles.push(0);
        }

        Ok(nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
    }
}

/// Decide whether a regular-character run is a number. Runs that are not
/// numbers are names; only a malformed radix literal is an error
fn classify_number(run: &[u8]) -> PsResult<Option<Value>> {
    if let Some(value) = parse_decimal(run) {
        return Ok(Some(value));
    }
    parse_radix(run)
}

/// `[+-]?digits`, `[+-]?` reals with a decimal point and/or exponent.
/// Base-10 integers beyond the 32-bit range quietly become reals
fn parse_decimal(run: &[u8]) -> Option<Value> {
    let mut rest = run;
    if let [b'+' | b'-', tail @ ..] = rest {
        rest = tail;
    }

    let digits = |bytes: &mut &[u8]| {
        let mut n = 0;
        while let [b'0'..=b'9', tail @ ..] = *bytes {
            *bytes = tail;
            n += 1;
        }
        n
    };

    let int_digits = digits(&mut rest);
    let mut is_real = false;

    if let [b'.', tail @ ..] = rest {
        rest = tail;
        let frac_digits = digits(&mut rest);
        // At least one digit must sit next to the point.
        if int_digits == 0 && frac_digits == 0 {
            return None;
        }
        is_real = true;
    } else if int_digits == 0 {
        return None;
    }

    if let [b'e' | b'E', tail @ ..] = rest {
        rest = tail;
        if let [b'+' | b'-', tail @ ..] = rest {
            rest = tail;
        }
        if digits(&mut rest) == 0 {
            return None;
        }
        is_real = true;
    }

    if !rest.is_empty() {
        return None;
    }

    let text = std::str::from_utf8(run).ok()?;
    if !is_real {
        if let Ok(i) = text.parse::<i32>() {
            return Some(Value::Integer(i));
        }
    }
    text.parse::<f64>().ok().map(Value::Real)
}

/// `radix#digits` for radix 2..36, yielding a wrapped 32-bit integer.
/// A malformed radix or digit makes the run a name; a value needing more
/// than 32 bits is a syntaxerror
fn parse_radix(run: &[u8]) -> PsResult<Option<Value>> {
    let Some(hash) = run.iter().position(|&b| b == b'#') else {
        return Ok(None);
    };
    let (radix_part, digits) = (&run[..hash], &run[hash + 1..]);

    let radix = match std::str::from_utf8(radix_part).ok().and_then(|s| s.parse::<u32>().ok()) {
        Some(r) if (2..=36).contains(&r) => r,
        _ => return Ok(None),
    };
    if digits.is_empty() {
        return Ok(None);
    }

    let mut value: u64 = 0;
    for &b in digits {
        let digit = match b {
            b'0'..=b'9' => u32::from(b - b'0'),
            b'a'..=b'z' => u32::from(b - b'a') + 10,
            b'A'..=b'Z' => u32::from(b - b'A') + 10,
            _ => return Ok(None),
        };
        if digit >= radix {
            return Ok(None);
        }
        value = value * u64::from(radix) + u64::from(digit);
        if value > u64::from(u32::MAX) {
            tilt!(SyntaxError, "radix number too large");
        }
    }

    Ok(Some(Value::Integer(value as u32 as i32)))
}
