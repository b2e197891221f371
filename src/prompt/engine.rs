use super::templates;
use tera::Tera;

/// Tera-backed template engine for the kernel's two generation prompts.
pub struct TeraEngine {
    tera: Tera,
}

impl TeraEngine {
    /// Create with inline templates (no filesystem).
    pub fn new() -> anyhow::Result<Self> {
        let tera = Tera::default();
        Ok(Self { tera })
    }

    /// Engine preloaded with the advisory and synthesis templates.
    pub fn with_kernel_templates() -> anyhow::Result<Self> {
        let mut engine = Self::new()?;
        engine.add_template(
            templates::ADVISORY_ESTIMATE_NAME,
            templates::ADVISORY_ESTIMATE,
        )?;
        engine.add_template(templates::SYNTHESIS_LEAD_NAME, templates::SYNTHESIS_LEAD)?;
        Ok(engine)
    }

    /// Register a template from a string.
    pub fn add_template(&mut self, name: &str, content: &str) -> anyhow::Result<()> {
        self.tera.add_raw_template(name, content)?;
        Ok(())
    }

    /// Render a named template with the given context.
    pub fn render(&self, template_name: &str, context: &tera::Context) -> anyhow::Result<String> {
        let rendered = self.tera.render(template_name, context)?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tera::Context;

    #[test]
    fn new_creates_empty_engine() {
        let engine = TeraEngine::new().unwrap();
        assert!(engine.render("nonexistent", &Context::new()).is_err());
    }

    #[test]
    fn add_template_replaces_existing() {
        let mut engine = TeraEngine::new().unwrap();
        engine.add_template("t", "version 1").unwrap();
        engine.add_template("t", "version 2").unwrap();
        assert_eq!(engine.render("t", &Context::new()).unwrap(), "version 2");
    }

    #[test]
    fn advisory_template_renders_floors() {
        let engine = TeraEngine::with_kernel_templates().unwrap();
        let mut ctx = Context::new();
        ctx.insert("source", "user");
        ctx.insert("text", "I moved the deadline");
        ctx.insert("source_quality", &0.5);
        ctx.insert("alignment", &0.2);
        let rendered = engine
            .render(templates::ADVISORY_ESTIMATE_NAME, &ctx)
            .unwrap();
        assert!(rendered.contains("source_quality=0.5"));
        assert!(rendered.contains("I moved the deadline"));
    }

    #[test]
    fn synthesis_template_lists_delegates() {
        let engine = TeraEngine::with_kernel_templates().unwrap();
        let mut ctx = Context::new();
        ctx.insert("instruction", "plan the migration");
        ctx.insert("lead", "do it in two phases");
        ctx.insert(
            "delegates",
            &json!([{ "agent_id": "scout", "content": "check the indexes" }]),
        );
        let rendered = engine.render(templates::SYNTHESIS_LEAD_NAME, &ctx).unwrap();
        assert!(rendered.contains("Proposal from scout"));
        assert!(rendered.contains("do it in two phases"));
    }

    #[test]
    fn render_missing_variable_fails() {
        let engine = TeraEngine::with_kernel_templates().unwrap();
        assert!(
            engine
                .render(templates::SYNTHESIS_LEAD_NAME, &Context::new())
                .is_err()
        );
    }
}
