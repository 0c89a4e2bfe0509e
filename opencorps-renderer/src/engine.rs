//! Tera rendering engine for the generated CI pipeline file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use crate::context::CiContext;
use crate::error::RenderError;

/// Name of the CI template, also the file name a user override must use.
pub const CI_TEMPLATE: &str = "travis.yml.tera";

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[(CI_TEMPLATE, include_str!("templates/travis.yml.tera"))];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut templates = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        tracing::debug!(template = %name, path = %path.display(), "loaded template override");
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(normalize_template_name(Path::new(name)), (*content).to_string());
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders CI config from a [`CiContext`].
///
/// `user_template_dir` may contain a `travis.yml.tera` that replaces the
/// embedded default. Create once and reuse.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer { tera: build_tera(user_template_dir)? })
    }

    /// Embedded template only.
    pub fn embedded() -> Result<Self, RenderError> {
        Self::new(None)
    }

    pub fn render(&self, ctx: &CiContext) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        Ok(self.tera.render(CI_TEMPLATE, &tera_ctx)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corefile::TemplateVars;
    use opencorps_core::ProjectKey;

    fn ctx(vars: TemplateVars, secure: Vec<String>) -> CiContext {
        let key = ProjectKey::new("chiggs", "uart").expect("key");
        CiContext::new(&key, "https://theopencorps.org", &vars, secure)
    }

    #[test]
    fn env_block_lists_plain_then_secure() {
        let renderer = Renderer::embedded().expect("renderer");
        let out = renderer
            .render(&ctx(TemplateVars::default(), vec!["AAA=".into(), "BBB=".into()]))
            .expect("render");
        let lines: Vec<&str> = out.lines().collect();
        let global = lines.iter().position(|l| *l == "  global:").expect("global block");
        assert_eq!(lines[global + 1], "    - REPOSITORY=chiggs/uart");
        assert_eq!(lines[global + 2], "    - secure: \"AAA=\"");
        assert_eq!(lines[global + 3], "    - secure: \"BBB=\"");
        assert_eq!(lines[global + 4], "before_install:");
    }

    #[test]
    fn tool_sections_follow_flags() {
        let renderer = Renderer::embedded().expect("renderer");
        let vunit_only = TemplateVars { vunit: true, ..TemplateVars::default() };
        let out = renderer.render(&ctx(vunit_only, vec![])).expect("render");
        assert!(out.contains("pip install vunit_hdl"));
        assert!(!out.contains("pip install fusesoc"));
        assert!(!out.contains("--tool=quartus"));
        assert!(out.contains("dist: trusty"));

        let synth = TemplateVars { quartus: true, vivado: true, ..TemplateVars::default() };
        let out = renderer.render(&ctx(synth, vec![])).expect("render");
        assert!(out.contains("--tool=quartus"));
        assert!(out.contains("--tool=vivado"));
    }

    #[test]
    fn user_override_replaces_embedded() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join(CI_TEMPLATE), "repo: {{ repository }}\n").expect("write");
        let renderer = Renderer::new(Some(dir.path())).expect("renderer");
        let out = renderer.render(&ctx(TemplateVars::default(), vec![])).expect("render");
        assert_eq!(out.trim_end(), "repo: chiggs/uart");
    }
}
