//! Parameter Templates
//!
//! Substitutes run trigger metadata into an action's parameter templates.
//!
//! A placeholder is a dot-separated path between braces. Given metadata
//! `{"comment": {"amount": 5}}`, the template `"Send {comment.amount} SOL"`
//! renders as `"Send 5 SOL"`. Numeric segments index into arrays.

use std::collections::BTreeMap;

use serde_json::Value;

/// Errors raised while rendering a template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("no value for '{key}' in trigger metadata")]
    MissingKey { key: String },
    #[error("malformed template at byte {position}: {reason}")]
    Malformed { position: usize, reason: String },
    #[error("parameter '{param}': {source}")]
    Param {
        param: String,
        #[source]
        source: Box<RenderError>,
    },
}

/// Parameters after substitution, ready for an executor.
pub type RenderedParams = BTreeMap<String, String>;

/// Renders a single template against run metadata.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, metadata: &Value) -> Result<String, RenderError>;

    /// Renders every parameter of an action, failing on the first error.
    fn render_params(
        &self,
        templates: &BTreeMap<String, String>,
        metadata: &Value,
    ) -> Result<RenderedParams, RenderError> {
        templates
            .iter()
            .map(|(name, template)| {
                self.render(template, metadata)
                    .map(|value| (name.clone(), value))
                    .map_err(|e| RenderError::Param {
                        param: name.clone(),
                        source: Box::new(e),
                    })
            })
            .collect()
    }
}

/// `{path.to.key}` renderer.
#[derive(Debug, Clone, Default)]
pub struct PathTemplateRenderer;

impl PathTemplateRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateRenderer for PathTemplateRenderer {
    fn render(&self, template: &str, metadata: &Value) -> Result<String, RenderError> {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;

        while let Some(start) = rest.find('{') {
            output.push_str(&rest[..start]);

            let after = &rest[start + 1..];
            let end = after.find('}').ok_or_else(|| RenderError::Malformed {
                position: offset + start,
                reason: "unterminated placeholder".to_string(),
            })?;

            let path = after[..end].trim();
            if path.is_empty() {
                return Err(RenderError::Malformed {
                    position: offset + start,
                    reason: "empty placeholder".to_string(),
                });
            }
            if path.contains('{') {
                return Err(RenderError::Malformed {
                    position: offset + start,
                    reason: "nested placeholder".to_string(),
                });
            }

            output.push_str(&lookup(metadata, path)?);

            let consumed = start + 1 + end + 1;
            rest = &rest[consumed..];
            offset += consumed;
        }

        output.push_str(rest);
        Ok(output)
    }
}

/// Walks `path` through `metadata` and renders the value found there.
fn lookup(metadata: &Value, path: &str) -> Result<String, RenderError> {
    let missing = || RenderError::MissingKey {
        key: path.to_string(),
    };

    let mut current = metadata;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(missing)?;
    }

    match current {
        Value::Null => Err(missing()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(_) | Value::Bool(_) => Ok(current.to_string()),
        Value::Array(_) | Value::Object(_) => Ok(current.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> Value {
        json!({
            "comment": {"email": "ada@example.com", "amount": 5, "urgent": true},
            "items": ["first", "second"],
            "nothing": null,
        })
    }

    #[test]
    fn test_render_plain_text() {
        let renderer = PathTemplateRenderer::new();
        assert_eq!(renderer.render("hello", &metadata()).unwrap(), "hello");
    }

    #[test]
    fn test_render_nested_path() {
        let renderer = PathTemplateRenderer::new();
        let out = renderer
            .render("Send {comment.amount} to {comment.email}", &metadata())
            .unwrap();
        assert_eq!(out, "Send 5 to ada@example.com");
    }

    #[test]
    fn test_render_array_index_and_bool() {
        let renderer = PathTemplateRenderer::new();
        assert_eq!(renderer.render("{items.1}", &metadata()).unwrap(), "second");
        assert_eq!(renderer.render("{comment.urgent}", &metadata()).unwrap(), "true");
    }

    #[test]
    fn test_render_object_as_json() {
        let renderer = PathTemplateRenderer::new();
        let out = renderer.render("{items}", &metadata()).unwrap();
        assert_eq!(out, r#"["first","second"]"#);
    }

    #[test]
    fn test_render_trims_placeholder_whitespace() {
        let renderer = PathTemplateRenderer::new();
        assert_eq!(
            renderer.render("{ comment.email }", &metadata()).unwrap(),
            "ada@example.com"
        );
    }

    #[test]
    fn test_missing_key() {
        let renderer = PathTemplateRenderer::new();
        assert_eq!(
            renderer.render("{comment.name}", &metadata()),
            Err(RenderError::MissingKey {
                key: "comment.name".to_string()
            })
        );
    }

    #[test]
    fn test_null_value_is_missing() {
        let renderer = PathTemplateRenderer::new();
        assert!(matches!(
            renderer.render("{nothing}", &metadata()),
            Err(RenderError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_malformed_templates() {
        let renderer = PathTemplateRenderer::new();
        assert!(matches!(
            renderer.render("Hi {comment.email", &metadata()),
            Err(RenderError::Malformed { position: 3, .. })
        ));
        assert!(matches!(
            renderer.render("{}", &metadata()),
            Err(RenderError::Malformed { .. })
        ));
        assert!(matches!(
            renderer.render("{a{b}", &metadata()),
            Err(RenderError::Malformed { .. })
        ));
    }

    #[test]
    fn test_render_params_names_failing_param() {
        let renderer = PathTemplateRenderer::new();
        let mut templates = BTreeMap::new();
        templates.insert("email".to_string(), "{comment.email}".to_string());
        templates.insert("body".to_string(), "{comment.body}".to_string());

        let err = renderer.render_params(&templates, &metadata()).unwrap_err();
        assert!(err.to_string().starts_with("parameter 'body'"));
    }

    #[test]
    fn test_render_params_success() {
        let renderer = PathTemplateRenderer::new();
        let mut templates = BTreeMap::new();
        templates.insert("email".to_string(), "{comment.email}".to_string());
        templates.insert("amount".to_string(), "{comment.amount}".to_string());

        let params = renderer.render_params(&templates, &metadata()).unwrap();
        assert_eq!(params["email"], "ada@example.com");
        assert_eq!(params["amount"], "5");
    }
}
