//! Rewriting of fetched spec documents before they are published.

use serde_json::{Map, Value};

use crate::error::Result;

const OPERATIONS: [&str; 8] = ["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Removes private paths and operations from `OpenAPI`/`Swagger` JSON documents.
///
/// A path item or operation is private when it carries the private
/// extension (`x-private` by default) set to `true`. Path items left with no
/// operations are dropped as well.
#[derive(Clone, Debug)]
pub struct SpecRewriter {
    private_extension: String,
}

impl Default for SpecRewriter {
    fn default() -> Self {
        Self::new("x-private")
    }
}

impl SpecRewriter {
    /// Creates a rewriter using the given vendor extension to mark private APIs.
    #[must_use]
    pub fn new(private_extension: impl Into<String>) -> Self {
        Self {
            private_extension: private_extension.into(),
        }
    }

    /// Rewrites a raw JSON spec document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON.
    pub fn rewrite(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut doc: Value = serde_json::from_slice(raw)?;

        if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
            self.strip_private(paths);
        }

        Ok(serde_json::to_vec(&doc)?)
    }

    fn strip_private(&self, paths: &mut Map<String, Value>) {
        paths.retain(|path, item| {
            if self.is_private(item) {
                tracing::debug!("removing private path {path}");
                return false;
            }

            let Some(item) = item.as_object_mut() else {
                return true;
            };

            let before = count_operations(item);
            item.retain(|method, op| {
                let private = OPERATIONS.contains(&method.as_str()) && self.is_private(op);
                if private {
                    tracing::debug!("removing private operation {method} {path}");
                }
                !private
            });

            // keep paths that never had operations, e.g. bare `$ref` items
            before == 0 || count_operations(item) > 0
        });
    }

    fn is_private(&self, value: &Value) -> bool {
        value.get(&self.private_extension).and_then(Value::as_bool) == Some(true)
    }
}

fn count_operations(item: &Map<String, Value>) -> usize {
    item.keys()
        .filter(|k| OPERATIONS.contains(&k.as_str()))
        .count()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rewrite(doc: &Value) -> Value {
        let raw = serde_json::to_vec(doc).unwrap();
        let out = SpecRewriter::default().rewrite(&raw).unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    #[test]
    fn keeps_public_document_unchanged() {
        let doc = json!({
            "swagger": "2.0",
            "info": {"title": "petstore", "version": "1"},
            "paths": {
                "/pets": {"get": {"summary": "list"}, "post": {"summary": "create"}}
            }
        });

        assert_eq!(rewrite(&doc), doc);
    }

    #[test]
    fn removes_private_operations() {
        let doc = json!({
            "paths": {
                "/pets": {
                    "get": {"summary": "list"},
                    "delete": {"summary": "purge", "x-private": true}
                }
            }
        });

        assert_eq!(
            rewrite(&doc),
            json!({"paths": {"/pets": {"get": {"summary": "list"}}}})
        );
    }

    #[test]
    fn removes_private_paths_and_emptied_paths() {
        let doc = json!({
            "paths": {
                "/admin": {"x-private": true, "get": {}},
                "/internal": {"post": {"x-private": true}},
                "/pets": {"get": {"x-private": false}},
                "/shared": {"$ref": "#/x-paths/shared"}
            }
        });

        assert_eq!(
            rewrite(&doc),
            json!({
                "paths": {
                    "/pets": {"get": {"x-private": false}},
                    "/shared": {"$ref": "#/x-paths/shared"}
                }
            })
        );
    }

    #[test]
    fn custom_private_extension() {
        let doc = json!({"paths": {"/pets": {"get": {"x-internal": true}, "put": {}}}});
        let raw = serde_json::to_vec(&doc).unwrap();

        let out = SpecRewriter::new("x-internal").rewrite(&raw).unwrap();
        let out: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(out, json!({"paths": {"/pets": {"put": {}}}}));
    }

    #[test]
    fn rejects_non_json() {
        assert!(SpecRewriter::default().rewrite(b"swagger: '2.0'").is_err());
    }
}
