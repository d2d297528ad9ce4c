/// Validation of scenario documents read from a file
use serde_json::{Map, Value};

use crate::error::ImportError;
use crate::model::Scenario;

/// Parse an import document: one scenario object or an array of them.
/// Any invalid entry rejects the whole document.
pub fn parse_import(text: &str) -> Result<Vec<Scenario>, ImportError> {
    let value: Value = serde_json::from_str(text)?;
    let entries = match value {
        Value::Array(entries) => entries,
        single => vec![single],
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            validate_entry(&entry).map_err(|reason| ImportError::Invalid { index, reason })?;
            serde_json::from_value(entry).map_err(|err| ImportError::Invalid {
                index,
                reason: err.to_string(),
            })
        })
        .collect()
}

fn validate_entry(entry: &Value) -> Result<(), String> {
    let Value::Object(fields) = entry else {
        return Err("expected a scenario object".to_string());
    };

    for name in ["id", "name", "prompt", "editedImage"] {
        require_string(fields, name)?;
    }

    let Some(Value::Array(images)) = fields.get("originalImages") else {
        return Err("`originalImages` must be an array".to_string());
    };
    for (position, image) in images.iter().enumerate() {
        let valid = image.get("dataUrl").is_some_and(Value::is_string)
            && image.get("mimeType").is_some_and(Value::is_string);
        if !valid {
            return Err(format!(
                "`originalImages[{position}]` must have string `dataUrl` and `mimeType`"
            ));
        }
    }

    for name in ["description", "filename"] {
        if let Some(value) = fields.get(name) {
            if !value.is_string() {
                return Err(format!("`{name}` must be a string when present"));
            }
        }
    }
    Ok(())
}

fn require_string(fields: &Map<String, Value>, name: &str) -> Result<(), String> {
    match fields.get(name) {
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err(format!("`{name}` must be a string")),
        None => Err(format!("missing `{name}`")),
    }
}
