//! Serialization context and the template-renderer seam.

use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use snafu::Snafu;

/// The error type collaborating template engines report through.
#[derive(Debug, Snafu)]
#[snafu(display("failed to render template: {message}"))]
pub struct RenderError {
    message: String,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Renders a template string against a flat key/value context.
///
/// Dockerfile and config-file templating is delegated to a collaborator, the
/// core only defines this seam. [`VerbatimRenderer`] is the built-in default.
pub trait TemplateRenderer {
    fn render(
        &self,
        template: &str,
        context: &IndexMap<String, JsonValue>,
    ) -> Result<String, RenderError>;
}

/// Returns the template text unchanged, ignoring the context.
#[derive(Clone, Copy, Debug, Default)]
pub struct VerbatimRenderer;

impl TemplateRenderer for VerbatimRenderer {
    fn render(
        &self,
        template: &str,
        _context: &IndexMap<String, JsonValue>,
    ) -> Result<String, RenderError> {
        Ok(template.to_owned())
    }
}

/// Everything serialization needs from the active environment.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    /// The registry host prepended to non-sigil container images.
    pub registry: &'a str,

    /// Directory that file-backed ConfigMap entries are resolved against.
    pub config_dir: &'a Path,

    /// Template collaborator for file-backed ConfigMap entries.
    pub renderer: &'a dyn TemplateRenderer,
}

impl<'a> RenderContext<'a> {
    pub fn new(registry: &'a str) -> Self {
        Self {
            registry,
            config_dir: Path::new("k8s"),
            renderer: &VerbatimRenderer,
        }
    }

    pub fn with_config_dir(mut self, config_dir: &'a Path) -> Self {
        self.config_dir = config_dir;
        self
    }

    pub fn with_renderer(mut self, renderer: &'a dyn TemplateRenderer) -> Self {
        self.renderer = renderer;
        self
    }
}
