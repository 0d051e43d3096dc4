//! Allow-list patching for "always allow" decisions.
//!
//! The target file belongs to the requester's tooling; Gatehouse treats it
//! as an opaque append target with one known structural key:
//! `{"permissions": {"allow": [...]}}`. The update is read-modify-write,
//! not transactional: a concurrent writer can cost us one pattern, which is
//! recovered the next time the same request is resolved.

use std::path::Path;

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Drop empty and duplicate patterns, preserving first-seen order.
pub fn normalize_patterns(patterns: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for pattern in patterns {
        if !pattern.is_empty() && !normalized.contains(pattern) {
            normalized.push(pattern.clone());
        }
    }
    normalized
}

/// Append `patterns` to the allow-list at `path`, de-duplicated against
/// both the file contents and each other. Creates the file (and parent
/// directories) when missing. Returns the normalized set of patterns this
/// call stands behind, whether newly written or already present.
pub fn append_allow_patterns(path: &Path, patterns: &[String]) -> Result<Vec<String>> {
    let applied = normalize_patterns(patterns);
    if applied.is_empty() {
        return Ok(applied);
    }

    let mut settings = read_settings(path)?;
    let allow = allow_list_mut(&mut settings)?;

    let mut changed = false;
    for pattern in &applied {
        let present = allow
            .iter()
            .any(|existing| existing.as_str() == Some(pattern));
        if !present {
            allow.push(Value::String(pattern.clone()));
            changed = true;
            info!(pattern = %pattern, path = %path.display(), "Added allow-list pattern");
        } else {
            debug!(pattern = %pattern, "Allow-list pattern already present");
        }
    }

    if changed {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut rendered = serde_json::to_string_pretty(&settings)?;
        rendered.push('\n');
        std::fs::write(path, rendered)?;
    }

    Ok(applied)
}

fn read_settings(path: &Path) -> Result<Value> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    } else {
        Ok(json!({"permissions": {"allow": []}}))
    }
}

/// Navigate to `permissions.allow`, creating intermediate objects as
/// needed. Fails when the file has a non-object/non-array where the
/// structure expects one — that file is not ours to rewrite.
fn allow_list_mut(settings: &mut Value) -> Result<&mut Vec<Value>> {
    let root = settings
        .as_object_mut()
        .ok_or_else(|| Error::Config("settings file root is not a JSON object".to_string()))?;

    let permissions = root
        .entry("permissions")
        .or_insert_with(|| Value::Object(Map::new()));
    let permissions = permissions.as_object_mut().ok_or_else(|| {
        Error::Config("settings file `permissions` is not a JSON object".to_string())
    })?;

    let allow = permissions
        .entry("allow")
        .or_insert_with(|| Value::Array(Vec::new()));
    allow
        .as_array_mut()
        .ok_or_else(|| Error::Config("settings file `permissions.allow` is not an array".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn creates_missing_settings_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.local.json");

        let applied = append_allow_patterns(&path, &patterns(&["Bash(ls *)"])).unwrap();
        assert_eq!(applied, patterns(&["Bash(ls *)"]));

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["permissions"]["allow"][0], "Bash(ls *)");
    }

    #[test]
    fn appending_same_pattern_twice_writes_it_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.local.json");

        append_allow_patterns(&path, &patterns(&["Bash(ls *)"])).unwrap();
        append_allow_patterns(&path, &patterns(&["Bash(ls *)"])).unwrap();

        let value: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["permissions"]["allow"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn preserves_unrelated_settings_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.local.json");
        std::fs::write(
            &path,
            r#"{"permissions": {"allow": ["Read(*)"], "deny": ["Bash(rm *)"]}, "model": "opus"}"#,
        )
        .unwrap();

        append_allow_patterns(&path, &patterns(&["Bash(ls *)"])).unwrap();

        let value: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["model"], "opus");
        assert_eq!(value["permissions"]["deny"][0], "Bash(rm *)");
        let allow = value["permissions"]["allow"].as_array().unwrap();
        assert_eq!(allow.len(), 2);
    }

    #[test]
    fn duplicate_input_patterns_are_normalized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.local.json");

        let applied =
            append_allow_patterns(&path, &patterns(&["Bash(ls *)", "Bash(ls *)", ""])).unwrap();
        assert_eq!(applied, patterns(&["Bash(ls *)"]));
    }

    #[test]
    fn rejects_non_object_settings_root() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.local.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let result = append_allow_patterns(&path, &patterns(&["Bash(ls *)"]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn empty_pattern_set_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.local.json");

        let applied = append_allow_patterns(&path, &[]).unwrap();
        assert!(applied.is_empty());
        assert!(!path.exists());
    }
}
