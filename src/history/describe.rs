//! Human-readable value descriptions for variable histories
//!
//! These are for reading, not parsing: containers are listed one element
//! per line, functions point at their definition and objects list their
//! public data attributes.

use crate::host::{CallableInfo, ObjectInfo, Value};

/// Describe a watched value; containers expand one element per line
pub fn resolve_variable(value: &Value) -> String {
    match value {
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => items
            .iter()
            .map(describe_value)
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Dict(entries) => entries
            .iter()
            .map(|(key, item)| format!("{}: {}", key.display(), describe_value(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => describe_value(other),
    }
}

/// Describe a single element
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::Callable(func) => describe_callable(func),
        Value::Object(obj) => describe_object(obj),
        other => format!("[Value] {}", other.repr()),
    }
}

fn describe_callable(func: &CallableInfo) -> String {
    match (&func.file, func.line, &func.def_line) {
        (Some(file), Some(line), Some(def_line)) => {
            format!("[Function] {}:{} -> {}", file.display(), line, def_line.trim())
        }
        _ => format!(
            "[Function] <uninspectable> ({}): source is not available",
            func.name
        ),
    }
}

fn describe_object(obj: &ObjectInfo) -> String {
    let attrs: Vec<String> = obj
        .attrs
        .iter()
        .filter(|(name, value)| !name.starts_with("__") && !matches!(value, Value::Callable(_)))
        .map(|(name, value)| format!("  - {}: {}", name, value.repr()))
        .collect();
    let listing = if attrs.is_empty() {
        "  (no public attributes)".to_string()
    } else {
        attrs.join("\n")
    };
    format!("[Object] Instance of '{}':\n{}", obj.class, listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_and_containers() {
        assert_eq!(resolve_variable(&Value::Int(3)), "[Value] 3");
        assert_eq!(
            resolve_variable(&Value::List(vec![Value::Int(1), Value::str("a")])),
            "[Value] 1\n[Value] 'a'"
        );
        assert_eq!(
            resolve_variable(&Value::Dict(vec![(Value::str("k"), Value::Bool(true))])),
            "k: [Value] True"
        );
        assert_eq!(resolve_variable(&Value::List(vec![])), "");
    }

    #[test]
    fn test_callable_points_at_definition() {
        let func = Value::Callable(CallableInfo {
            name: "helper".into(),
            file: Some("/src/util.py".into()),
            line: Some(12),
            def_line: Some("def helper(x):\n".into()),
            address: 0x10,
        });
        assert_eq!(
            resolve_variable(&func),
            "[Function] /src/util.py:12 -> def helper(x):"
        );
    }

    #[test]
    fn test_object_lists_public_data_attributes() {
        let obj = Value::Object(ObjectInfo {
            module: "__main__".into(),
            class: "Counter".into(),
            attrs: vec![
                ("count".into(), Value::Int(2)),
                ("__dict__".into(), Value::Dict(vec![])),
                (
                    "bump".into(),
                    Value::Callable(CallableInfo {
                        name: "bump".into(),
                        file: None,
                        line: None,
                        def_line: None,
                        address: 0x20,
                    }),
                ),
            ],
            address: 0x30,
        });
        assert_eq!(
            resolve_variable(&obj),
            "[Object] Instance of 'Counter':\n  - count: 2"
        );

        let empty = Value::Object(ObjectInfo {
            module: "__main__".into(),
            class: "Empty".into(),
            attrs: vec![],
            address: 0x40,
        });
        assert!(resolve_variable(&empty).ends_with("  (no public attributes)"));
    }
}
