//! Prompt Renderer - Render templates with context variables using Handlebars
//!
//! Built-in templates are registered under `task`, `merge` and `semantic`.
//! A directory of `<name>.hbs` files can override any of them.

use std::path::Path;

use handlebars::Handlebars;
use serde::Serialize;

use crate::error::{HermesError, Result};
use crate::prompt::templates;

pub const TASK_TEMPLATE: &str = "task";
pub const MERGE_TEMPLATE: &str = "merge";
pub const SEMANTIC_TEMPLATE: &str = "semantic";

/// Renders prompt templates using Handlebars templating
#[derive(Debug, Clone)]
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    /// Create a renderer with the built-in templates registered
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Prompts are plain text, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        let mut renderer = Self { handlebars };
        for (name, template) in [
            (TASK_TEMPLATE, templates::TASK),
            (MERGE_TEMPLATE, templates::MERGE),
            (SEMANTIC_TEMPLATE, templates::SEMANTIC),
        ] {
            // Built-ins are static and known to parse.
            if let Err(e) = renderer.register_template(name, template) {
                log::error!("Built-in template {} is invalid: {}", name, e);
            }
        }
        renderer
    }

    /// Replace built-in templates with `<dir>/<name>.hbs` where present
    pub fn with_overrides(mut self, dir: &Path) -> Result<Self> {
        for name in [TASK_TEMPLATE, MERGE_TEMPLATE, SEMANTIC_TEMPLATE] {
            let path = dir.join(format!("{}.hbs", name));
            if path.exists() {
                let template = std::fs::read_to_string(&path)?;
                self.register_template(name, &template)?;
                log::info!("Using prompt template override {}", path.display());
            }
        }
        Ok(self)
    }

    /// Render a template string with any serializable context
    pub fn render_with<T: Serialize>(&self, template: &str, context: &T) -> Result<String> {
        self.handlebars
            .render_template(template, context)
            .map_err(|e| HermesError::Template(format!("Failed to render template: {}", e)))
    }

    /// Register a named template for later use
    pub fn register_template(&mut self, name: &str, template: &str) -> Result<()> {
        self.handlebars
            .register_template_string(name, template)
            .map_err(|e| HermesError::Template(format!("Failed to register template '{}': {}", name, e)))
    }

    /// Render a previously registered template
    pub fn render_named<T: Serialize>(&self, name: &str, context: &T) -> Result<String> {
        self.handlebars
            .render(name, context)
            .map_err(|e| HermesError::Template(format!("Failed to render template '{}': {}", name, e)))
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.get_template(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Task;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_builtins_registered() {
        let renderer = PromptRenderer::new();
        assert!(renderer.has_template(TASK_TEMPLATE));
        assert!(renderer.has_template(MERGE_TEMPLATE));
        assert!(renderer.has_template(SEMANTIC_TEMPLATE));
    }

    #[test]
    fn test_render_with_no_escape() {
        let renderer = PromptRenderer::new();
        let out = renderer.render_with("Hello {{name}}", &json!({"name": "<World & Co>"})).unwrap();
        assert_eq!(out, "Hello <World & Co>");
    }

    #[test]
    fn test_render_task_template() {
        let renderer = PromptRenderer::new();
        let task = Task::new("T1", "Add login").with_description("Implement POST /login");
        let out = renderer
            .render_named(
                TASK_TEMPLATE,
                &json!({"task": task, "attempt": 2, "max_attempts": 3, "feedback": "tests failed"}),
            )
            .unwrap();

        assert!(out.starts_with("# Task T1: Add login"));
        assert!(out.contains("Implement POST /login"));
        assert!(out.contains("Attempt: 2 of 3"));
        assert!(out.contains("tests failed"));
        assert!(out.contains("---HERMES_STATUS---"));
    }

    #[test]
    fn test_invalid_template() {
        let mut renderer = PromptRenderer::new();
        let err = renderer.register_template("bad", "{{#if}}").unwrap_err();
        assert!(matches!(err, HermesError::Template(_)));
    }

    #[test]
    fn test_overrides() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("task.hbs"), "custom {{task.id}}").unwrap();
        let renderer = PromptRenderer::new().with_overrides(dir.path()).unwrap();
        let out = renderer.render_named(TASK_TEMPLATE, &json!({"task": {"id": "T9"}})).unwrap();
        assert_eq!(out, "custom T9");
    }
}
