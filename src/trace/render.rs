//! Value rendering for trace lines
//!
//! Renderers registered by the caller are consulted first, in registration
//! order; the first whose predicate matches formats the value. Anything left
//! over uses the value's own `repr()`. The result is then flattened to one
//! line, optionally normalized, and truncated.
//!
//! @module trace/render

use crate::host::{Value, ValueKind};
use once_cell::sync::Lazy;
use regex::Regex;

static ADDRESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" at 0x[a-fA-F0-9]{4,}").expect("valid address pattern"));

pub type ReprPredicate = Box<dyn Fn(&Value) -> bool + Send + Sync>;
pub type ReprFormatter = Box<dyn Fn(&Value) -> String + Send + Sync>;

/// Turns values into bounded single-line representations
pub struct ValueRenderer {
    custom: Vec<(ReprPredicate, ReprFormatter)>,
    max_length: Option<usize>,
    normalize: bool,
}

impl ValueRenderer {
    pub fn new(max_length: Option<usize>, normalize: bool) -> Self {
        Self {
            custom: Vec::new(),
            max_length,
            normalize,
        }
    }

    /// Add a custom renderer; earlier registrations take precedence
    pub fn register<P, F>(&mut self, predicate: P, formatter: F)
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.custom.push((Box::new(predicate), Box::new(formatter)));
    }

    /// Add a custom renderer for every value of one kind
    pub fn register_kind<F>(&mut self, kind: ValueKind, formatter: F)
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.register(move |v| v.kind() == kind, formatter);
    }

    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    /// Full representation, before flattening and truncation
    pub fn repr(&self, value: &Value) -> String {
        self.custom
            .iter()
            .find(|(matches, _)| matches(value))
            .map(|(_, format)| format(value))
            .unwrap_or_else(|| value.repr())
    }

    /// Representation as shown on a trace line
    pub fn render(&self, value: &Value) -> String {
        let mut repr = self.repr(value).replace(['\r', '\n'], "");
        if self.normalize {
            repr = normalize_repr(&repr);
        }
        match self.max_length {
            Some(max) => truncate(&repr, max),
            None => repr,
        }
    }
}

impl Default for ValueRenderer {
    fn default() -> Self {
        Self::new(Some(100), false)
    }
}

/// Keep the head and tail of `text`, joined by `...`, within `max` characters
pub fn truncate(text: &str, max: usize) -> String {
    let len = text.chars().count();
    if len <= max {
        return text.to_string();
    }
    let budget = max.saturating_sub(3);
    let left = budget / 2;
    let right = budget - left;
    let head: String = text.chars().take(left).collect();
    let tail: String = text.chars().skip(len - right).collect();
    format!("{}...{}", head, tail)
}

/// Drop memory addresses so output is stable across runs
pub fn normalize_repr(repr: &str) -> String {
    ADDRESS_PATTERN.replace_all(repr, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ObjectInfo;

    #[test]
    fn test_truncate_keeps_both_ends() {
        assert_eq!(truncate("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate("abcdefghijkl", 9), "abc...jkl");
        assert_eq!(truncate("abcdefghijkl", 8), "ab...jkl");
    }

    #[test]
    fn test_normalize_strips_addresses() {
        assert_eq!(
            normalize_repr("<__main__.Foo object at 0x7f1a2b3c>"),
            "<__main__.Foo object>"
        );
    }

    #[test]
    fn test_custom_renderers_in_registration_order() {
        let mut renderer = ValueRenderer::new(None, false);
        renderer.register_kind(ValueKind::Sequence, |v| match v {
            Value::List(items) => format!("list(len={})", items.len()),
            other => other.repr(),
        });
        renderer.register(|v| matches!(v, Value::List(_)), |_| "never".to_string());

        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(renderer.render(&list), "list(len=2)");
        assert_eq!(renderer.render(&Value::Int(3)), "3");
    }

    #[test]
    fn test_render_flattens_and_bounds() {
        let renderer = ValueRenderer::new(Some(12), true);
        let obj = Value::Object(ObjectInfo {
            module: "m".into(),
            class: "C".into(),
            attrs: vec![],
            address: 0xdeadbeef,
        });
        assert_eq!(renderer.render(&obj), "<m.C object>");
        assert_eq!(renderer.render(&Value::str("x".repeat(20))), "'xxx...xxxx'");
    }
}
