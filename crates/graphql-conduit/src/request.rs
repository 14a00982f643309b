//! GraphQL request types and operation classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::upload::FileUpload;

/// A GraphQL operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A query operation (read-only).
    #[default]
    Query,
    /// A mutation operation (modifies data).
    Mutation,
    /// A subscription operation (real-time updates).
    Subscription,
}

/// A GraphQL execution request.
///
/// Carries the operation document with optional variables, operation name and
/// extensions. The operation kind is never stored: it is derived from the
/// document (and `operation_name`) every time it is needed, so one request
/// value classifies consistently no matter how it was constructed.
///
/// # Example
///
/// ```ignore
/// let request = ExecutionRequest::new(r#"
///     query GetUser($id: ID!) {
///         user(id: $id) { id name }
///     }
/// "#)
/// .variable("id", "123");
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// The GraphQL document.
    pub query: String,

    /// Optional variables for the operation.
    pub variables: Option<Value>,

    /// Optional operation name (for documents with multiple operations).
    pub operation_name: Option<String>,

    /// Extensions (implementation-specific metadata). `endpoint` and
    /// `headers` keys act as per-request transport overrides.
    pub extensions: Option<Value>,

    /// File uploads attached to variable positions (dot paths under
    /// `variables`, e.g. `"avatar"` or `"input.attachments.0"`).
    pub(crate) files: Vec<(String, FileUpload)>,
}

impl ExecutionRequest {
    /// Create a new request from a GraphQL document.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
            extensions: None,
            files: Vec::new(),
        }
    }

    /// Set a single variable value.
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let variables = self
            .variables
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = variables
            && let Ok(value) = serde_json::to_value(value)
        {
            map.insert(name.into(), value);
        }
        self
    }

    /// Set all variables from a serializable value.
    pub fn variables(mut self, variables: impl Serialize) -> Self {
        self.variables = serde_json::to_value(variables).ok();
        self
    }

    /// Set the operation name.
    ///
    /// Required when the document contains multiple operations.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Set extensions (implementation-specific metadata).
    pub fn extensions(mut self, extensions: impl Serialize) -> Self {
        self.extensions = serde_json::to_value(extensions).ok();
        self
    }

    /// Override the endpoint for this request only.
    ///
    /// Stored under `extensions.endpoint`, taking precedence over the
    /// endpoint the executor was built with.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        let extensions = self
            .extensions
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = extensions {
            map.insert("endpoint".into(), Value::String(url.into()));
        }
        self
    }

    /// Add a header override for this request only.
    ///
    /// Stored under `extensions.headers`; request-level headers win over the
    /// executor's header set on key collision.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let extensions = self
            .extensions
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = extensions {
            let headers = map
                .entry("headers")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(headers) = headers {
                headers.insert(name.into(), Value::String(value.into()));
            }
        }
        self
    }

    /// Attach a file upload at a dot path under `variables`.
    ///
    /// The request is then encoded as `multipart/form-data` per the GraphQL
    /// multipart-request convention (requires the executor's multipart flag).
    pub fn upload(mut self, path: impl Into<String>, file: FileUpload) -> Self {
        self.files.push((path.into(), file));
        self
    }

    /// Whether any file uploads are attached.
    pub fn has_uploads(&self) -> bool {
        !self.files.is_empty()
    }

    /// Classify the operation this request executes.
    ///
    /// Scans the document each call; with multiple operations present the one
    /// matching `operation_name` decides, otherwise the first one does.
    pub fn operation_type(&self) -> OperationType {
        self.selected_operation()
            .map(|op| op.kind)
            .unwrap_or_default()
    }

    /// Whether this request is a subscription operation.
    pub fn is_subscription(&self) -> bool {
        self.operation_type() == OperationType::Subscription
    }

    /// Whether this request is a live query (a query annotated `@live`,
    /// re-delivered by the server on underlying data changes).
    pub fn is_live_query(&self) -> bool {
        self.selected_operation()
            .map(|op| op.kind == OperationType::Query && op.live)
            .unwrap_or(false)
    }

    fn selected_operation(&self) -> Option<OperationHeader> {
        let ops = scan_operations(&self.query);
        match &self.operation_name {
            Some(name) => ops.into_iter().find(|op| op.name.as_deref() == Some(name.as_str())),
            None => ops.into_iter().next(),
        }
    }
}

/// An operation definition header found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OperationHeader {
    kind: OperationType,
    name: Option<String>,
    live: bool,
}

/// Scan a document for top-level operation definitions.
///
/// Tracks brace depth outside of strings, comments and variable-definition
/// parentheses, so selection sets and object literals in variable defaults
/// never register as operations. Fragment definitions are skipped.
fn scan_operations(document: &str) -> Vec<OperationHeader> {
    let mut ops = Vec::new();
    let mut pending: Option<OperationHeader> = None;
    let mut in_fragment = false;
    let mut depth = 0usize;
    let mut parens = 0usize;

    let mut chars = document.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            '#' => {
                while let Some(&(_, next)) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' => skip_string(document, start, &mut chars),
            '(' => parens += 1,
            ')' => parens = parens.saturating_sub(1),
            '{' if parens == 0 => {
                if depth == 0 {
                    if in_fragment {
                        in_fragment = false;
                    } else {
                        // Shorthand `{ ... }` is an anonymous query.
                        ops.push(pending.take().unwrap_or(OperationHeader {
                            kind: OperationType::Query,
                            name: None,
                            live: false,
                        }));
                    }
                }
                depth += 1;
            }
            '}' if parens == 0 => depth = depth.saturating_sub(1),
            '@' if depth == 0 && parens == 0 => {
                let word = read_word(document, &mut chars);
                if word == "live"
                    && let Some(op) = pending.as_mut()
                {
                    op.live = true;
                }
            }
            c if depth == 0 && parens == 0 && (c.is_alphabetic() || c == '_') => {
                let mut word = String::new();
                word.push(c);
                word.push_str(&read_word(document, &mut chars));
                match word.as_str() {
                    "query" => {
                        pending = Some(OperationHeader {
                            kind: OperationType::Query,
                            name: None,
                            live: false,
                        });
                    }
                    "mutation" => {
                        pending = Some(OperationHeader {
                            kind: OperationType::Mutation,
                            name: None,
                            live: false,
                        });
                    }
                    "subscription" => {
                        pending = Some(OperationHeader {
                            kind: OperationType::Subscription,
                            name: None,
                            live: false,
                        });
                    }
                    "fragment" => {
                        pending = None;
                        in_fragment = true;
                    }
                    _ => {
                        if let Some(op) = pending.as_mut()
                            && op.name.is_none()
                            && !in_fragment
                        {
                            op.name = Some(word);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    ops
}

fn read_word(
    document: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> String {
    let mut word = String::new();
    while let Some(&(i, next)) = chars.peek() {
        if next.is_alphanumeric() || next == '_' {
            word.push_str(&document[i..i + next.len_utf8()]);
            chars.next();
        } else {
            break;
        }
    }
    word
}

/// Advance past a string literal (single- or triple-quoted).
fn skip_string(
    document: &str,
    start: usize,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) {
    let block = document[start..].starts_with("\"\"\"");
    if block {
        chars.next();
        chars.next();
        let mut quotes = 0;
        for (_, c) in chars.by_ref() {
            if c == '"' {
                quotes += 1;
                if quotes == 3 {
                    return;
                }
            } else {
                quotes = 0;
            }
        }
    } else {
        while let Some((_, c)) = chars.next() {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => return,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_basic() {
        assert_eq!(
            ExecutionRequest::new("query { users }").operation_type(),
            OperationType::Query
        );
        assert_eq!(
            ExecutionRequest::new("mutation { create }").operation_type(),
            OperationType::Mutation
        );
        assert_eq!(
            ExecutionRequest::new("subscription { events }").operation_type(),
            OperationType::Subscription
        );
    }

    #[test]
    fn test_classify_shorthand() {
        assert_eq!(
            ExecutionRequest::new("{ ping }").operation_type(),
            OperationType::Query
        );
    }

    #[test]
    fn test_classify_by_operation_name() {
        let document = r#"
            query GetUser { user { id } }
            mutation UpdateUser { updateUser { id } }
        "#;
        let request = ExecutionRequest::new(document).operation_name("UpdateUser");
        assert_eq!(request.operation_type(), OperationType::Mutation);

        let request = ExecutionRequest::new(document).operation_name("GetUser");
        assert_eq!(request.operation_type(), OperationType::Query);

        // No name: the first operation decides.
        let request = ExecutionRequest::new(document);
        assert_eq!(request.operation_type(), OperationType::Query);
    }

    #[test]
    fn test_keyword_inside_selection_is_not_an_operation() {
        // Field named "subscription" must not reclassify the document.
        let request = ExecutionRequest::new("query { subscription { id } }");
        assert_eq!(request.operation_type(), OperationType::Query);
    }

    #[test]
    fn test_fragment_definitions_are_skipped() {
        let document = r#"
            fragment UserFields on User { id name }
            mutation AddUser { addUser { ...UserFields } }
        "#;
        assert_eq!(
            ExecutionRequest::new(document).operation_type(),
            OperationType::Mutation
        );
    }

    #[test]
    fn test_object_literal_in_variable_default() {
        let document = "query Q($f: Filter = {active: true}) { items(filter: $f) { id } }";
        let ops = scan_operations(document);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].name.as_deref(), Some("Q"));
    }

    #[test]
    fn test_live_query_detection() {
        let request = ExecutionRequest::new("query Feed @live { feed { id } }");
        assert!(request.is_live_query());
        assert_eq!(request.operation_type(), OperationType::Query);

        let request = ExecutionRequest::new("query Feed { feed { id } }");
        assert!(!request.is_live_query());

        // @live on a subscription does not make it a live query.
        let request = ExecutionRequest::new("subscription S @live { s }");
        assert!(!request.is_live_query());
    }

    #[test]
    fn test_variables_builder() {
        let request = ExecutionRequest::new("query($id: ID!) { user(id: $id) { name } }")
            .variable("id", "123")
            .variable("limit", 10);

        let vars = request.variables.unwrap();
        assert_eq!(vars["id"], "123");
        assert_eq!(vars["limit"], 10);
    }

    #[test]
    fn test_extension_overrides() {
        let request = ExecutionRequest::new("{ ping }")
            .endpoint("https://other.example/graphql")
            .header("x-tenant", "acme");

        let extensions = request.extensions.unwrap();
        assert_eq!(extensions["endpoint"], "https://other.example/graphql");
        assert_eq!(extensions["headers"]["x-tenant"], "acme");
    }

    #[test]
    fn test_comment_and_string_are_ignored() {
        let document = r#"
            # mutation in a comment
            query Q($q: String = "mutation { nope }") { search(q: $q) }
        "#;
        assert_eq!(
            ExecutionRequest::new(document).operation_type(),
            OperationType::Query
        );
    }
}
