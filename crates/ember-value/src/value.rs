//! The script value hierarchy.
//!
//! One closed enum covers every value the host exchanges with the VM.
//! Equality is structural everywhere except functions (bytecode plus
//! upvalues) and tables, which match keys by canonical byte form — see
//! [`Table::get`] for the documented limitation that entails.

use num_enum::TryFromPrimitive;

/// Wire tag for one value payload. The tag and the encoded shape must
/// always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ValueTag {
    Nil = 0,
    Boolean = 1,
    Number = 2,
    Bytes = 3,
    Table = 4,
    Function = 5,
}

/// One script value lifted into host space.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    /// Byte string; embedded NUL is allowed.
    Bytes(Vec<u8>),
    Table(Table),
    Function(Function),
}

/// Ordered table: entries keep insertion order, keys compare by canonical
/// byte form.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub entries: Vec<(Value, Value)>,
    pub metatable: Option<Box<Table>>,
}

/// Compiled function: opaque bytecode plus captured upvalues. `reference`
/// points at the live VM registry entry when the function still exists
/// there; it never participates in equality or the wire format.
#[derive(Debug, Clone, Default)]
pub struct Function {
    pub bytecode: Vec<u8>,
    pub upvalues: Vec<Value>,
    pub reference: Option<u32>,
}

impl Value {
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Nil => ValueTag::Nil,
            Value::Boolean(_) => ValueTag::Boolean,
            Value::Number(_) => ValueTag::Number,
            Value::Bytes(_) => ValueTag::Bytes,
            Value::Table(_) => ValueTag::Table,
            Value::Function(_) => ValueTag::Function,
        }
    }

    pub fn string(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Canonical byte form used for table key matching. Scalars render
    /// like the script's `tostring`; tables and functions all collapse to
    /// the same empty marker, which is what makes key matching inexact.
    pub fn canonical(&self) -> Vec<u8> {
        match self {
            Value::Nil => Vec::new(),
            Value::Boolean(b) => {
                if *b {
                    b"true".to_vec()
                } else {
                    b"false".to_vec()
                }
            }
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    format!("{}", *n as i64).into_bytes()
                } else {
                    format!("{n}").into_bytes()
                }
            }
            Value::Bytes(b) => b.clone(),
            Value::Table(_) | Value::Function(_) => Vec::new(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Function) -> bool {
        self.bytecode == other.bytecode && self.upvalues == other.upvalues
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Table) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        for (key, value) in &self.entries {
            match other.get(&key.canonical()) {
                Some(found) if found == value => {}
                _ => return false,
            }
        }
        match (&self.metatable, &other.metatable) {
            (Some(a), Some(b)) => a == b,
            (None, _) => true,
            (Some(_), None) => false,
        }
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry, replacing any existing entry whose key has the
    /// same canonical form. A table never holds duplicate keys.
    pub fn insert(&mut self, key: Value, value: Value) {
        let canonical = key.canonical();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.canonical() == canonical)
        {
            Some(entry) => *entry = (key, value),
            None => self.entries.push((key, value)),
        }
    }

    /// Insert with a string key.
    pub fn set(&mut self, key: &str, value: Value) {
        self.insert(Value::string(key), value);
    }

    /// Look a value up by canonical key form.
    ///
    /// Matching is by canonical bytes, not structural key equality: two
    /// different table-valued keys canonicalize identically and cannot be
    /// told apart here. Callers needing exact semantics must overlay a
    /// stricter comparison.
    pub fn get(&self, canonical_key: &[u8]) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.canonical() == canonical_key)
            .map(|(_, v)| v)
    }

    /// Shorthand for string-keyed lookup.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.get(key.as_bytes())
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Value {
        Value::Table(t)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Value {
        Value::Function(f)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::string(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Value {
        Value::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_equality_is_by_value() {
        assert_eq!(Value::Number(1.5), Value::Number(1.5));
        assert_ne!(Value::Number(1.0), Value::Boolean(true));
        assert_eq!(Value::Bytes(b"a\0b".to_vec()), Value::Bytes(b"a\0b".to_vec()));
    }

    #[test]
    fn table_equality_ignores_entry_order() {
        let mut a = Table::new();
        a.set("x", Value::Number(1.0));
        a.set("y", Value::string("two"));

        let mut b = Table::new();
        b.set("y", Value::string("two"));
        b.set("x", Value::Number(1.0));

        assert_eq!(Value::Table(a), Value::Table(b));
    }

    #[test]
    fn table_equality_checks_metatable() {
        let mut mt = Table::new();
        mt.set("__index", Value::Number(0.0));

        let mut a = Table::new();
        a.set("k", Value::Nil);
        a.metatable = Some(Box::new(mt));

        let mut b = Table::new();
        b.set("k", Value::Nil);

        assert_ne!(Value::Table(a), Value::Table(b));
    }

    #[test]
    fn insert_replaces_matching_key() {
        let mut t = Table::new();
        t.set("k", Value::Number(1.0));
        t.set("k", Value::Number(2.0));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get_str("k"), Some(&Value::Number(2.0)));

        // Replacement goes by canonical form, not key identity.
        t.insert(Value::Bytes(b"k".to_vec()), Value::Nil);
        assert_eq!(t.len(), 1);
        assert_eq!(t.get_str("k"), Some(&Value::Nil));
    }

    #[test]
    fn table_keys_match_by_canonical_form() {
        // Number 1 and bytes "1" canonicalize identically; this is the
        // documented limitation, pinned here so a change is deliberate.
        let mut a = Table::new();
        a.insert(Value::Number(1.0), Value::string("v"));

        let mut b = Table::new();
        b.insert(Value::string("1"), Value::string("v"));

        assert_eq!(Value::Table(a), Value::Table(b));
    }

    #[test]
    fn function_equality_skips_live_reference() {
        let a = Function {
            bytecode: vec![1, 2, 3],
            upvalues: vec![Value::Number(4.0)],
            reference: Some(9),
        };
        let b = Function {
            bytecode: vec![1, 2, 3],
            upvalues: vec![Value::Number(4.0)],
            reference: None,
        };
        assert_eq!(Value::Function(a), Value::Function(b));
    }
}
