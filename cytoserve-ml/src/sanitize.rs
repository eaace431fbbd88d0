//! Config sanitizer. Rewrites architecture descriptions into the dialect the
//! in-process runtime accepts.
//!
//! Newer serializers emit fields the runtime rejects: batch-inclusive shape
//! descriptors, dtype policy objects, and module/registration bookkeeping.
//! The sanitizer is a single declarative rule table applied recursively over
//! the whole description tree; loading strategies invoke it and never carry
//! their own field handling.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// What to do with a field found in a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAction {
    /// Remove the field.
    Drop,
    /// Move a batch-inclusive shape into `input_shape` without the leading
    /// batch dimension, then remove the field.
    RewriteBatchShape,
    /// Replace a dtype policy object with its plain dtype name.
    FlattenDtypePolicy,
}

/// Field name → action. Every field the runtime rejects has an entry here.
pub const RULES: &[(&str, FieldAction)] = &[
    ("batch_shape", FieldAction::RewriteBatchShape),
    ("batch_input_shape", FieldAction::RewriteBatchShape),
    ("dtype_policy", FieldAction::Drop),
    ("module", FieldAction::Drop),
    ("registered_name", FieldAction::Drop),
    ("synchronized", FieldAction::Drop),
    ("dtype", FieldAction::FlattenDtypePolicy),
];

/// A single applied rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizeEdit {
    /// JSON path of the mapping that held the field.
    pub path: String,
    pub field: String,
    pub action: FieldAction,
}

/// All rewrites applied during one sanitize pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SanitizeReport {
    pub edits: Vec<SanitizeEdit>,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

fn rule_for(field: &str) -> Option<FieldAction> {
    RULES
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, action)| *action)
}

/// Return a sanitized copy of `description` and the edits applied.
pub fn sanitize(description: &Value) -> (Value, SanitizeReport) {
    let mut sanitized = description.clone();
    let report = sanitize_in_place(&mut sanitized);
    (sanitized, report)
}

/// Sanitize `description` in place.
pub fn sanitize_in_place(description: &mut Value) -> SanitizeReport {
    let mut report = SanitizeReport::default();
    walk(description, "$", &mut report);
    for edit in &report.edits {
        debug!(path = %edit.path, field = %edit.field, action = ?edit.action, "Sanitized field");
    }
    report
}

fn walk(value: &mut Value, path: &str, report: &mut SanitizeReport) {
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(action) = rule_for(&key) {
                    apply(map, &key, action, path, report);
                }
            }
            for (key, child) in map.iter_mut() {
                walk(child, &format!("{path}.{key}"), report);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                walk(item, &format!("{path}[{i}]"), report);
            }
        }
        _ => {}
    }
}

fn apply(
    map: &mut Map<String, Value>,
    key: &str,
    action: FieldAction,
    path: &str,
    report: &mut SanitizeReport,
) {
    let applied = match action {
        FieldAction::Drop => map.remove(key).is_some(),
        FieldAction::RewriteBatchShape => {
            if let Some(Value::Array(dims)) = map.remove(key)
                && dims.len() >= 2
                && !map.contains_key("input_shape")
            {
                map.insert("input_shape".to_string(), Value::Array(dims[1..].to_vec()));
            }
            true
        }
        FieldAction::FlattenDtypePolicy => match map.get(key) {
            Some(Value::Object(policy)) => {
                let name = policy
                    .get("config")
                    .and_then(|c| c.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match name {
                    Some(name) => {
                        map.insert(key.to_string(), Value::String(name));
                    }
                    None => {
                        map.remove(key);
                    }
                }
                true
            }
            _ => false,
        },
    };

    if applied {
        report.edits.push(SanitizeEdit {
            path: path.to_string(),
            field: key.to_string(),
            action,
        });
    }
}
