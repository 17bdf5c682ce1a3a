use std::fmt;

use crate::{
    operator::Operator,
    vm::{ArrayIndex, DictIndex, SaveIndex, StringIndex, Vm},
};

/// An immutable byte string: name payloads and dictionary keys. Bytes are
/// ISO-8859-1; comparison and hashing are by content
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct PsString {
    inner: Vec<u8>,
}

impl PsString {
    pub fn from_bytes(inner: Vec<u8>) -> Self {
        Self { inner }
    }

    pub fn from_str(s: &str) -> Self {
        Self::from_bytes(latin1_bytes(s))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn to_text(&self) -> String {
        latin1_string(&self.inner)
    }
}

impl fmt::Debug for PsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_text())
    }
}

/// Decode ISO-8859-1 bytes: each byte is the Unicode code point
pub(crate) fn latin1_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode to ISO-8859-1, one byte per character. Callers only pass text
/// that originated as latin-1 bytes
pub(crate) fn latin1_bytes(s: &str) -> Vec<u8> {
    s.chars().map(|c| c as u32 as u8).collect()
}

/// A window onto shared string storage. Substrings share the parent's
/// buffer; mutations through any window are visible to all of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StrRef {
    pub idx: StringIndex,
    pub start: usize,
    pub len: usize,
}

/// A window onto shared array storage, analogous to `StrRef`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArrRef {
    pub idx: ArrayIndex,
    pub start: usize,
    pub len: usize,
}

/// The one file handle the core uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileHandle {
    Stdout,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Null,
    Integer(i32),
    Real(f64),
    Boolean(bool),
    Mark,
    Name(PsString),
    String(StrRef),
    Array(ArrRef),
    Dict(DictIndex),
    Operator(Operator),
    Save(SaveIndex),
    File(FileHandle),
}

/// Every runtime value: a tagged payload plus the literal attribute. The
/// attribute is orthogonal to the tag; `cvx`/`cvlit` flip it in place
/// without touching the underlying storage
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Object {
    pub literal: bool,
    pub value: Value,
}

impl Object {
    pub fn literal(value: Value) -> Self {
        Self {
            literal: true,
            value,
        }
    }

    pub fn executable(value: Value) -> Self {
        Self {
            literal: false,
            value,
        }
    }

    pub fn null() -> Self {
        Self::literal(Value::Null)
    }

    /// All marks are identical; like the reference singleton they carry the
    /// executable attribute
    pub fn mark() -> Self {
        Self::executable(Value::Mark)
    }

    pub fn name(text: &str, literal: bool) -> Self {
        Self {
            literal,
            value: Value::Name(PsString::from_str(text)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.value {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Boolean(_) => "boolean",
            Value::Mark => "mark",
            Value::Name(_) => "name",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
            Value::Operator(_) => "operator",
            Value::Save(_) => "save",
            Value::File(_) => "file",
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self.value, Value::Integer(_) | Value::Real(_))
    }

    /// Numeric value regardless of integer/real tag
    pub fn num(&self) -> Option<f64> {
        match self.value {
            Value::Integer(i) => Some(f64::from(i)),
            Value::Real(r) => Some(r),
            _ => None,
        }
    }

    /// The `=` form: a human-readable rendering
    pub fn op_eq(&self, vm: &Vm) -> String {
        match &self.value {
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => fmt_real(*r),
            Value::Boolean(b) => b.to_string(),
            Value::Name(n) => n.to_text(),
            Value::String(s) => latin1_string(vm.str_bytes(*s)),
            _ => "--nostringval--".to_owned(),
        }
    }

    /// The `==` form: syntactic where the type has one, `-type-` otherwise
    pub fn op_eqeq(&self, vm: &Vm) -> String {
        self.op_eqeq_depth(vm, 0)
    }

    fn op_eqeq_depth(&self, vm: &Vm, depth: usize) -> String {
        match &self.value {
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => fmt_real(*r),
            Value::Boolean(b) => b.to_string(),
            Value::Name(n) => {
                if self.literal {
                    format!("/{}", n.to_text())
                } else {
                    n.to_text()
                }
            }
            Value::String(s) => escape_string(vm.str_bytes(*s)),
            Value::Array(a) => {
                if depth > 32 {
                    return "{...}".to_owned();
                }
                let inner = vm
                    .array_slice(*a)
                    .iter()
                    .map(|o| o.op_eqeq_depth(vm, depth + 1))
                    .collect::<Vec<_>>()
                    .join(" ");
                if self.literal {
                    format!("[{}]", inner)
                } else {
                    format!("{{{}}}", inner)
                }
            }
            Value::Operator(op) => format!("--{}--", op.name()),
            Value::Null => "-null-".to_owned(),
            Value::Mark => "-mark-".to_owned(),
            Value::Dict(_) => "-dict-".to_owned(),
            Value::Save(_) => "-save-".to_owned(),
            Value::File(_) => "-file-".to_owned(),
        }
    }
}

/// Integers that fit stay integers; everything else becomes a real
impl From<i32> for Object {
    fn from(i: i32) -> Self {
        Self::literal(Value::Integer(i))
    }
}

impl From<f64> for Object {
    fn from(r: f64) -> Self {
        Self::literal(Value::Real(r))
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Self::literal(Value::Boolean(b))
    }
}

/// Reals always render with a decimal point or exponent, so the `==` form
/// re-lexes as a real
fn fmt_real(r: f64) -> String {
    format!("{:?}", r)
}

/// `==` escaping: backslash the parens and backslash, C escapes for
/// newline/tab/return, octal for the remaining control bytes
fn escape_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push('\\');
                out.push(b as char);
            }
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            _ if b < 0x20 => out.push_str(&format!("\\{:03o}", b)),
            _ => out.push(b as char),
        }
    }
    out.push(')');
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn eqeq_of_string(bytes: &[u8]) -> String {
        let mut vm = Vm::new();
        let s = vm.new_string(bytes.to_vec());
        Object::literal(Value::String(s)).op_eqeq(&vm)
    }

    #[test]
    fn string_escapes() {
        assert_eq!(eqeq_of_string(b"hello"), "(hello)");
        assert_eq!(eqeq_of_string(b"("), "(\\()");
        assert_eq!(eqeq_of_string(b"()\\"), "(\\(\\)\\\\)");
        assert_eq!(eqeq_of_string(b"first line\nsecond"), "(first line\\nsecond)");
        assert_eq!(eqeq_of_string(b"octal: \x01"), "(octal: \\001)");
        assert_eq!(eqeq_of_string(b"\t\r"), "(\\t\\r)");
    }

    #[test]
    fn name_forms() {
        let vm = Vm::new();
        assert_eq!(Object::name("hello", true).op_eqeq(&vm), "/hello");
        assert_eq!(Object::name("hello", false).op_eqeq(&vm), "hello");
        assert_eq!(Object::name("hello", true).op_eq(&vm), "hello");
    }

    #[test]
    fn real_forms_keep_a_decimal_point() {
        let vm = Vm::new();
        assert_eq!(Object::from(50.0).op_eq(&vm), "50.0");
        assert_eq!(Object::from(1.25).op_eqeq(&vm), "1.25");
    }

    #[test]
    fn nostringval_types() {
        let vm = Vm::new();
        assert_eq!(Object::mark().op_eq(&vm), "--nostringval--");
        assert_eq!(Object::mark().op_eqeq(&vm), "-mark-");
        assert_eq!(
            Object::executable(Value::Operator(Operator::Add)).op_eqeq(&vm),
            "--add--"
        );
    }

    #[test]
    fn array_forms_follow_the_literal_attribute() {
        let mut vm = Vm::new();
        let arr = vm.new_array(vec![Object::from(1), Object::from(2)]);
        assert_eq!(Object::literal(Value::Array(arr)).op_eqeq(&vm), "[1 2]");
        assert_eq!(Object::executable(Value::Array(arr)).op_eqeq(&vm), "{1 2}");
    }
}
