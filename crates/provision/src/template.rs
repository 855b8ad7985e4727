//! Artifact template renderer.
//!
//! Renders the parameterized system-contract template into one concrete
//! variant. The variant is an explicit enum selected by the caller; the
//! template only sees a `mock` flag inside its own `{{#if}}` blocks.

use std::path::Path;

use handlebars::Handlebars;
use serde_json::json;

use crate::error::RenderError;

/// The output variant an artifact template can render to.
///
/// Exactly one branch of the template's conditional is selected per
/// variant; the two renderings are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ArtifactVariant {
    /// The real system contract, for livenet-style deployments.
    Production,
    /// A mock rendering used by local test harnesses.
    Mock,
}

impl ArtifactVariant {
    fn mock_flag(&self) -> bool {
        matches!(self, ArtifactVariant::Mock)
    }
}

/// Render a template string for the given variant.
///
/// Deterministic: identical template and variant always produce
/// byte-identical output. Strict mode is on, so a reference to an
/// unknown variable is a syntax error rather than an empty expansion.
pub fn render_string(template: &str, variant: ArtifactVariant) -> Result<String, RenderError> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry
        .render_template(template, &json!({ "mock": variant.mock_flag() }))
        .map_err(|e| RenderError::Syntax(e.to_string()))
}

/// Render `template_path` for `variant` and atomically replace `output_path`.
///
/// The rendered text is written to a sibling temp file first and renamed
/// over the target, so a failed render never leaves a partial file behind.
/// The output is overwritten unconditionally; callers are responsible for
/// regenerating anything compiled from it.
pub fn render(
    template_path: &Path,
    output_path: &Path,
    variant: ArtifactVariant,
) -> Result<(), RenderError> {
    let template = std::fs::read_to_string(template_path)
        .map_err(|_| RenderError::TemplateNotFound(template_path.to_path_buf()))?;

    let rendered = render_string(&template, variant)?;

    let file_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp_path = output_path.with_file_name(format!(
        ".{}.tmp-{:08x}",
        file_name,
        rand::random::<u32>()
    ));

    if let Err(source) = std::fs::write(&tmp_path, &rendered) {
        // An interrupted write can still have created the temp file.
        let _ = std::fs::remove_file(&tmp_path);
        return Err(RenderError::OutputWrite {
            path: tmp_path,
            source,
        });
    }

    std::fs::rename(&tmp_path, output_path).map_err(|source| {
        // Leave nothing behind if the final rename fails.
        let _ = std::fs::remove_file(&tmp_path);
        RenderError::OutputWrite {
            path: output_path.to_path_buf(),
            source,
        }
    })?;

    tracing::info!(
        template = %template_path.display(),
        output = %output_path.display(),
        variant = %variant,
        "Rendered artifact"
    );

    Ok(())
}
