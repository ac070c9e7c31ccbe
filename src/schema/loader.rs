//! Load model schemas from a directory of JSON files (one file per identity).

use crate::error::ConfigError;
use crate::schema::{Schema, SchemaRegistry};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Parse one model document. Accepts a bare schema or a model wrapper `{ "schema": { ... } }`.
pub fn parse_model(text: &str) -> Result<Schema, ConfigError> {
    let mut value: Value = serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
    if let Value::Object(obj) = &mut value {
        if !obj.contains_key("properties") {
            if let Some(inner) = obj.remove("schema") {
                value = inner;
            }
        }
    }
    serde_json::from_value(value).map_err(|e| ConfigError::Load(e.to_string()))
}

/// Read every `*.json` file in `dir`, sorted by file name; the lower-cased file stem is the identity.
pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<(String, Schema)>, ConfigError> {
    let dir = dir.as_ref();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", dir.display(), e)))?;
    let mut paths: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let identity = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| ConfigError::Load(format!("bad model file name: {}", path.display())))?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let schema = parse_model(&text)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        out.push((identity, schema));
    }
    Ok(out)
}

/// Load a model directory straight into `registry`. Returns the identities registered.
pub async fn register_dir(registry: &SchemaRegistry, dir: impl AsRef<Path>) -> Result<Vec<String>, ConfigError> {
    let models = load_dir(dir).await?;
    let mut identities = Vec::with_capacity(models.len());
    for (identity, schema) in models {
        registry.register(&identity, schema);
        identities.push(identity);
    }
    Ok(identities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_and_bare_models() {
        let wrapped = parse_model(r#"{ "schema": { "properties": { "name": { "type": "string" } } } }"#).unwrap();
        assert!(wrapped.properties.contains("name"));
        let bare = parse_model(r#"{ "properties": { "name": { "type": "string" } }, "timestamps": true }"#).unwrap();
        assert!(bare.timestamps);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(parse_model("{ nope"), Err(ConfigError::Load(_))));
    }

    #[tokio::test]
    async fn registers_every_json_file_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Door.json"),
            r#"{ "properties": { "name": { "type": "string" } } }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("zone.json"),
            r#"{ "schema": { "properties": { "title": { "type": "string" } } } }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a model").unwrap();

        let registry = SchemaRegistry::new();
        let ids = register_dir(&registry, dir.path()).await.unwrap();
        assert_eq!(ids, vec!["door".to_string(), "zone".to_string()]);
        assert!(registry.get("zone").unwrap().schema.properties.contains("title"));
    }
}
