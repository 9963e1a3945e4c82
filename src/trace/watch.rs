//! Watched expressions
//!
//! A watch is a dotted path (`self.items`, `config.0`) resolved against the
//! frame's locals first, then its module globals. An exploding watch also
//! renders each attribute, key or index of the value it points at.
//!
//! @module trace/watch

use super::render::ValueRenderer;
use crate::host::{Namespace, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watch {
    Path(String),
    Explode(String),
}

impl Watch {
    pub fn source(&self) -> &str {
        match self {
            Watch::Path(s) | Watch::Explode(s) => s,
        }
    }

    /// Rendered `(label, repr)` pairs; empty when the path does not resolve
    pub fn items(
        &self,
        locals: &Namespace,
        globals: &Namespace,
        renderer: &ValueRenderer,
    ) -> Vec<(String, String)> {
        let source = self.source();
        let Some(value) = resolve(source, locals, globals) else {
            return Vec::new();
        };

        let mut items = vec![(source.to_string(), renderer.render(value))];
        if let Watch::Explode(_) = self {
            items.extend(
                children(source, value)
                    .into_iter()
                    .map(|(label, child)| (label, renderer.render(child))),
            );
        }
        items
    }
}

fn resolve<'a>(path: &str, locals: &'a Namespace, globals: &'a Namespace) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let head = parts.next()?;
    let mut value = locals.get(head).or_else(|| globals.get(head))?;
    for part in parts {
        value = value.child(part)?;
    }
    Some(value)
}

fn children<'a>(source: &str, value: &'a Value) -> Vec<(String, &'a Value)> {
    match value {
        Value::Object(obj) => obj
            .attrs
            .iter()
            .map(|(name, v)| (format!("{}.{}", source, name), v))
            .collect(),
        Value::Dict(entries) => entries
            .iter()
            .map(|(k, v)| (format!("{}[{}]", source, k.repr()), v))
            .collect(),
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("{}[{}]", source, i), v))
            .collect(),
        _ => Vec::new(),
    }
}
