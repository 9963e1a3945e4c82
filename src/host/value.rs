//! Runtime values as seen by the tracers
//!
//! The host interpreter hands the tracers a snapshot of each visible value.
//! Values form a closed variant set so every rendering path can match on it
//! exhaustively.
//!
//! @module host/value

use std::fmt::Write as _;
use std::path::PathBuf;

// =============================================================================
// VALUE
// =============================================================================

/// A snapshot of one runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Callable(CallableInfo),
    Object(ObjectInfo),
}

/// Where a function value was defined
#[derive(Debug, Clone, PartialEq)]
pub struct CallableInfo {
    pub name: String,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    /// First source line of the definition (`def name(...):`)
    pub def_line: Option<String>,
    pub address: u64,
}

/// An instance of a user class
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub module: String,
    pub class: String,
    pub attrs: Vec<(String, Value)>,
    pub address: u64,
}

/// Coarse classification used by renderers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Scalar,
    Sequence,
    Mapping,
    Set,
    Callable,
    Object,
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {
                ValueKind::Scalar
            }
            Value::List(_) | Value::Tuple(_) => ValueKind::Sequence,
            Value::Dict(_) => ValueKind::Mapping,
            Value::Set(_) => ValueKind::Set,
            Value::Callable(_) => ValueKind::Callable,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Name of the runtime type (`int`, `list`, the class name, ...)
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Callable(_) => "function",
            Value::Object(obj) => &obj.class,
        }
    }

    /// Attribute lookup on objects, key lookup on mappings, index on sequences
    pub fn child(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(obj) => obj.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            Value::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.display() == key || k.repr() == key)
                .map(|(_, v)| v),
            Value::List(items) | Value::Tuple(items) => {
                key.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        }
    }

    /// Interpreter-style `repr()`
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out);
        out
    }

    /// Interpreter-style `str()`: strings are unquoted, everything else is `repr()`
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    fn write_repr(&self, out: &mut String) {
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{}", i);
            }
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Str(s) => out.push_str(&quote(s)),
            Value::List(items) => {
                out.push('[');
                write_items(out, items);
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                write_items(out, items);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Set(items) if items.is_empty() => out.push_str("set()"),
            Value::Set(items) => {
                out.push('{');
                write_items(out, items);
                out.push('}');
            }
            Value::Dict(entries) => {
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out);
                    out.push_str(": ");
                    v.write_repr(out);
                }
                out.push('}');
            }
            Value::Callable(c) => {
                let _ = write!(out, "<function {} at 0x{:x}>", c.name, c.address);
            }
            Value::Object(obj) => {
                let _ = write!(
                    out,
                    "<{}.{} object at 0x{:x}>",
                    obj.module, obj.class, obj.address
                );
            }
        }
    }
}

fn write_items(out: &mut String, items: &[Value]) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out);
    }
}

fn float_repr(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        let sign = if f > 0.0 { "" } else { "-" };
        format!("{}inf", sign)
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Single-quoted string literal, switching to double quotes when that avoids escaping
fn quote(s: &str) -> String {
    let delim = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delim);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

// =============================================================================
// NAMESPACE
// =============================================================================

/// Ordered name -> value mapping (locals of a frame, globals of a module)
///
/// Insertion order is preserved; it is the order variables are reported in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespace {
    entries: Vec<(String, Value)>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind `name`, keeping its original position when it already exists
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Namespace {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut ns = Namespace::new();
        for (k, v) in iter {
            ns.set(k, v);
        }
        ns
    }
}
