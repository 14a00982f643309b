//! GraphQL execution result types.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;

use crate::error::TransportError;

/// A GraphQL error returned by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLError {
    /// The error message.
    pub message: String,

    /// Locations in the document where the error occurred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphQLLocation>,

    /// Path to the field that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// Additional error metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (at ")?;
            for (i, segment) in path.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                match segment {
                    PathSegment::Field(name) => write!(f, "{}", name)?,
                    PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphQLError {}

/// A location in a GraphQL document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GraphQLLocation {
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

/// A segment in a response path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A field name.
    Field(String),
    /// An array index.
    Index(usize),
}

/// The result of executing a GraphQL operation.
///
/// Streaming operations deliver an ordered sequence of these; single
/// request/response operations resolve to exactly one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The data returned by the operation.
    #[serde(default)]
    pub data: Option<Value>,

    /// Errors that occurred during execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,

    /// Additional response metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl ExecutionResult {
    /// Check if the result contains errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Check if the result was successful (has data and no errors).
    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.errors.is_empty()
    }

    /// Get the first error, if any.
    pub fn first_error(&self) -> Option<&GraphQLError> {
        self.errors.first()
    }

    /// Get all errors as a combined message.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(
                self.errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        }
    }

    /// Parse the data as a specific type.
    ///
    /// Returns an error if the result has errors or if parsing fails.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        if let Some(ref errors) = self.error_message() {
            return Err(TransportError::Request(format!("GraphQL error: {}", errors)));
        }

        match &self.data {
            Some(data) => serde_json::from_value(data.clone())
                .map_err(|e| TransportError::Json(format!("Failed to deserialize result: {}", e))),
            None => Err(TransportError::Decode("No data in result".into())),
        }
    }

    /// Parse a specific field from the data.
    pub fn field<T: DeserializeOwned>(&self, field: &str) -> Result<T, TransportError> {
        if let Some(ref errors) = self.error_message() {
            return Err(TransportError::Request(format!("GraphQL error: {}", errors)));
        }

        match &self.data {
            Some(Value::Object(data)) => {
                let field_value = data.get(field).ok_or_else(|| {
                    TransportError::Decode(format!("Field '{}' not found in result", field))
                })?;
                serde_json::from_value(field_value.clone()).map_err(|e| {
                    TransportError::Json(format!("Failed to deserialize field '{}': {}", field, e))
                })
            }
            Some(_) => Err(TransportError::Decode("Result data is not an object".into())),
            None => Err(TransportError::Decode("No data in result".into())),
        }
    }

    /// Get raw data as a `Value` without parsing.
    pub fn raw_data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Merge an incremental-delivery patch into this result.
    ///
    /// A patch with a `path` places its data at that position inside the
    /// current data tree (objects merge key-wise, everything else replaces);
    /// a patch without a `path` replaces the data outright. Patch errors
    /// append to the accumulated errors.
    pub fn apply_patch(&mut self, patch: ExecutionPatch) {
        if !patch.errors.is_empty() {
            self.errors.extend(patch.errors);
        }
        if let Some(extensions) = patch.extensions {
            self.extensions = Some(extensions);
        }

        match (patch.path, patch.data) {
            (Some(path), Some(data)) => {
                let root = self
                    .data
                    .get_or_insert_with(|| Value::Object(Default::default()));
                merge_at(navigate(root, &path), data);
            }
            (None, Some(data)) => self.data = Some(data),
            _ => {}
        }
    }
}

/// One incremental-delivery payload: the initial result or a patch into it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionPatch {
    /// Position of the patch inside the result data; absent for the initial
    /// payload.
    #[serde(default)]
    pub path: Option<Vec<PathSegment>>,

    /// The payload data.
    #[serde(default)]
    pub data: Option<Value>,

    /// Errors carried by this payload.
    #[serde(default)]
    pub errors: Vec<GraphQLError>,

    /// Payload metadata.
    #[serde(default)]
    pub extensions: Option<Value>,

    /// Whether further payloads follow.
    #[serde(default, rename = "hasNext")]
    pub has_next: Option<bool>,
}

/// Walk `path` inside `root`, creating containers as needed, and return the
/// target slot.
fn navigate<'a>(root: &'a mut Value, path: &[PathSegment]) -> &'a mut Value {
    let mut current = root;
    for segment in path {
        current = match segment {
            PathSegment::Field(name) => {
                if !current.is_object() {
                    *current = Value::Object(Default::default());
                }
                current
                    .as_object_mut()
                    .expect("just ensured object")
                    .entry(name.clone())
                    .or_insert(Value::Null)
            }
            PathSegment::Index(idx) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let array = current.as_array_mut().expect("just ensured array");
                if array.len() <= *idx {
                    array.resize(*idx + 1, Value::Null);
                }
                &mut array[*idx]
            }
        };
    }
    current
}

fn merge_at(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge_at(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}
