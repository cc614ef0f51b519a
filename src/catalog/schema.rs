//! Structural validation of config module documents.
//!
//! Runs on the raw JSON value before deserialization so that every problem
//! in a module is reported at once instead of only the first serde error.
use serde_json::Value;

/// Allowed `sensitivity` values.
const SENSITIVITIES: [&str; 3] = ["low", "sensitive", "machineBound"];

/// Matcher lists, at least one of which must be non-empty.
const MATCHER_KEYS: [&str; 3] = ["packageId", "exeName", "uninstallNamePattern"];

fn non_empty_str(doc: &Value, key: &str) -> bool {
    doc.get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}

/// Return every schema problem found in `doc`; empty means valid.
#[must_use]
pub fn validate_module(doc: &Value) -> Vec<String> {
    let mut problems = Vec::new();

    if !non_empty_str(doc, "id") {
        problems.push("'id' must be a non-empty string".to_string());
    }
    if !non_empty_str(doc, "displayName") {
        problems.push("'displayName' must be a non-empty string".to_string());
    }

    match doc.get("matches") {
        Some(Value::Object(matches)) => {
            let any = MATCHER_KEYS.iter().any(|key| {
                matches
                    .get(*key)
                    .and_then(Value::as_array)
                    .is_some_and(|list| {
                        list.iter()
                            .any(|v| v.as_str().is_some_and(|s| !s.trim().is_empty()))
                    })
            });
            if !any {
                problems.push(
                    "'matches' needs at least one non-empty packageId, exeName, or uninstallNamePattern list"
                        .to_string(),
                );
            }
        }
        _ => problems.push("'matches' must be an object".to_string()),
    }

    if let Some(sensitivity) = doc.get("sensitivity")
        && !sensitivity
            .as_str()
            .is_some_and(|s| SENSITIVITIES.contains(&s))
    {
        problems.push(format!(
            "'sensitivity' must be one of {}, got {sensitivity}",
            SENSITIVITIES.join(", ")
        ));
    }

    if let Some(files) = doc
        .get("capture")
        .and_then(|c| c.get("files"))
        .and_then(Value::as_array)
    {
        for (i, file) in files.iter().enumerate() {
            if !non_empty_str(file, "source") || !non_empty_str(file, "dest") {
                problems.push(format!("capture.files[{i}] needs 'source' and 'dest'"));
            }
        }
    }

    problems
}
