//! Prompt assembly and response post-processing
//!
//! Templates are embedded at build time and may be shadowed by `.pmt` files
//! in an override directory. Exact wording is a collaborator concern; the
//! pipeline only depends on the [`PromptProvider`] surface.

mod embedded;
pub mod response;

use std::path::PathBuf;

use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

pub use response::{
    check_generator_syntax, extract_code_block, html_to_text, sanitize_generator_code,
    sanitize_solution_code, statement_markdown,
};

/// What the pipeline needs from a prompt source
pub trait PromptProvider: Send + Sync {
    fn generation_system_prompt(&self) -> String;
    fn generation_task_instructions(&self, problem_id: &str) -> String;
    fn solution_system_prompt(&self) -> String;
    fn solution_task_requirements(&self) -> String;
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    problem_id: &'a str,
}

/// Handlebars-backed provider with an optional override directory
pub struct TemplatePrompts {
    hbs: Handlebars<'static>,
    override_dir: Option<PathBuf>,
}

impl TemplatePrompts {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        TemplatePrompts {
            hbs: Handlebars::new(),
            override_dir: override_dir.filter(|dir| dir.exists()),
        }
    }

    /// Embedded templates only
    pub fn embedded_only() -> Self {
        TemplatePrompts::new(None)
    }

    /// Override file first, embedded fallback second
    fn load(&self, name: &str) -> String {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{name}.pmt"));
            if let Ok(text) = std::fs::read_to_string(&path) {
                debug!(%name, path = %path.display(), "using override template");
                return text;
            }
        }
        embedded::get_embedded(name).unwrap_or_default().to_string()
    }

    fn render(&self, name: &str, problem_id: &str) -> String {
        let template = self.load(name);
        self.hbs
            .render_template(&template, &TemplateContext { problem_id })
            .unwrap_or(template)
    }
}

impl PromptProvider for TemplatePrompts {
    fn generation_system_prompt(&self) -> String {
        self.load("gen_system").trim().to_string()
    }

    fn generation_task_instructions(&self, problem_id: &str) -> String {
        self.render("gen_task", problem_id)
    }

    fn solution_system_prompt(&self) -> String {
        self.load("solution_system").trim().to_string()
    }

    fn solution_task_requirements(&self) -> String {
        self.load("solution_task")
    }
}
