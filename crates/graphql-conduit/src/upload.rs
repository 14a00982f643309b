//! File uploads and the GraphQL multipart-request encoding.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Result, TransportError};

/// A file-like value attached to a request variable.
///
/// The content is held as resolved bytes; use [`from_path`](Self::from_path)
/// to resolve a file asynchronously before the form is constructed.
#[derive(Clone)]
pub struct FileUpload {
    /// File name sent in the form part.
    pub filename: String,
    /// MIME type of the content, if known.
    pub content_type: Option<String>,
    /// The file content.
    pub content: Bytes,
}

impl FileUpload {
    /// Create an upload from in-memory bytes.
    pub fn from_bytes(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            content: content.into(),
        }
    }

    /// Read an upload from disk.
    ///
    /// This is the resolution step for deferred file content: by the time a
    /// form is built every upload is plain bytes.
    pub async fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| TransportError::Request(format!("Failed to read {}: {}", path.display(), e)))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self {
            filename,
            content_type: None,
            content: content.into(),
        })
    }

    /// Set the MIME type of the content.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

impl std::fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUpload")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.content.len())
            .finish()
    }
}

/// Set `value` at a dot path inside a variables tree, creating intermediate
/// objects (or arrays, for numeric segments) as needed.
pub(crate) fn set_at_path(variables: &mut Value, path: &str, value: Value) {
    let mut current = variables;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        match segment.parse::<usize>() {
            Ok(idx) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let array = current.as_array_mut().expect("just ensured array");
                if array.len() <= idx {
                    array.resize(idx + 1, Value::Null);
                }
                if last {
                    array[idx] = value;
                    return;
                }
                current = &mut array[idx];
            }
            Err(_) => {
                if !current.is_object() {
                    *current = Value::Object(Default::default());
                }
                let object = current.as_object_mut().expect("just ensured object");
                if last {
                    object.insert(segment.to_string(), value);
                    return;
                }
                current = object.entry(segment.to_string()).or_insert(Value::Null);
            }
        }
    }
}

/// Null out every file position in the variables tree, per the
/// multipart-request convention (the `map` field restores them server-side).
pub(crate) fn null_file_positions(variables: &mut Value, paths: impl Iterator<Item = impl AsRef<str>>) {
    for path in paths {
        set_at_path(variables, path.as_ref(), Value::Null);
    }
}

/// Build the `map` field: upload index → `variables.<path>`.
pub(crate) fn file_map(paths: impl Iterator<Item = impl AsRef<str>>) -> Value {
    let map: serde_json::Map<String, Value> = paths
        .enumerate()
        .map(|(i, path)| {
            (
                i.to_string(),
                Value::Array(vec![Value::String(format!("variables.{}", path.as_ref()))]),
            )
        })
        .collect();
    Value::Object(map)
}

/// Assemble the multipart form: `operations`, `map`, then one numbered part
/// per file in map order.
pub(crate) fn build_form(
    operations: String,
    files: &[(String, FileUpload)],
) -> Result<reqwest::multipart::Form> {
    let map = file_map(files.iter().map(|(path, _)| path));
    let mut form = reqwest::multipart::Form::new()
        .text("operations", operations)
        .text("map", serde_json::to_string(&map)?);

    for (i, (_, file)) in files.iter().enumerate() {
        let mut part = reqwest::multipart::Part::bytes(file.content.to_vec())
            .file_name(file.filename.clone());
        if let Some(ref mime) = file.content_type {
            part = part.mime_str(mime).map_err(|e| {
                TransportError::Config(format!("Invalid MIME type '{}': {}", mime, e))
            })?;
        }
        form = form.part(i.to_string(), part);
    }

    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_at_nested_path() {
        let mut vars = json!({});
        set_at_path(&mut vars, "input.avatar", json!(null));
        assert_eq!(vars, json!({"input": {"avatar": null}}));
    }

    #[test]
    fn test_set_at_array_path() {
        let mut vars = json!({});
        set_at_path(&mut vars, "files.1", json!(null));
        assert_eq!(vars, json!({"files": [null, null]}));
    }

    #[test]
    fn test_file_map_indexes_variable_paths() {
        let map = file_map(["avatar", "input.attachments.0"].iter());
        assert_eq!(
            map,
            json!({
                "0": ["variables.avatar"],
                "1": ["variables.input.attachments.0"],
            })
        );
    }

    #[test]
    fn test_extract_then_resubstitute_round_trip() {
        // Nulling the file positions then writing placeholders back through
        // the same paths reconstructs the original variable shape.
        let original = json!({"input": {"name": "a", "files": ["X", "Y"]}});
        let mut stripped = original.clone();
        let paths = ["input.files.0", "input.files.1"];

        null_file_positions(&mut stripped, paths.iter());
        assert_eq!(
            stripped,
            json!({"input": {"name": "a", "files": [null, null]}})
        );

        set_at_path(&mut stripped, paths[0], json!("X"));
        set_at_path(&mut stripped, paths[1], json!("Y"));
        assert_eq!(stripped, original);
    }

    #[test]
    fn test_map_count_matches_file_count() {
        let files = vec![
            ("a".to_string(), FileUpload::from_bytes("a.txt", "aa")),
            ("b".to_string(), FileUpload::from_bytes("b.txt", "bb")),
        ];
        let map = file_map(files.iter().map(|(p, _)| p));
        assert_eq!(map.as_object().unwrap().len(), files.len());
    }
}
