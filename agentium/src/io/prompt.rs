//! Prompt rendering for worker, reviewer and judge invocations.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::event::truncate_bytes;
use crate::core::phase::Phase;

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const JUDGE_TEMPLATE: &str = include_str!("prompts/judge.md");

/// Built-in worker instructions per phase, used when config supplies none.
const SKILL_TEMPLATES: [(Phase, &str); 4] = [
    (Phase::Plan, include_str!("prompts/skills/plan.md")),
    (Phase::Implement, include_str!("prompts/skills/implement.md")),
    (Phase::Docs, include_str!("prompts/skills/docs.md")),
    (Phase::PrCreation, include_str!("prompts/skills/pr_creation.md")),
];

/// Appended to planning instructions when the tool has no read-only mode.
pub const READ_ONLY_NOTICE: &str = "This tool runs without a read-only mode. \
Treat the repository as read-only: do not edit files, commit or push.";

/// Worker output beyond this many bytes is cut before it reaches the reviewer.
pub const REVIEW_OUTPUT_BUDGET: usize = 32 * 1024;

#[derive(Debug, Clone)]
pub struct TaskPromptInputs<'a> {
    pub repository: &'a str,
    pub tasks: &'a [String],
    pub prs: &'a [String],
    pub iteration: u32,
}

#[derive(Debug, Clone)]
pub struct ReviewPromptInputs<'a> {
    pub phase: &'a str,
    pub repository: &'a str,
    pub tasks: &'a [String],
    pub iteration: u32,
    pub summary: &'a str,
    pub output: &'a str,
    /// Whether the reviewer may recommend going back to planning.
    pub can_regress: bool,
}

#[derive(Debug, Clone)]
pub struct JudgePromptInputs<'a> {
    pub phase: &'a str,
    pub iteration: u32,
    pub max_iterations: u32,
    pub feedback: &'a str,
    pub allow_regress: bool,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .context("load task template")?;
        env.add_template("reviewer", REVIEWER_TEMPLATE)
            .context("load reviewer template")?;
        env.add_template("judge", JUDGE_TEMPLATE)
            .context("load judge template")?;
        for (phase, source) in SKILL_TEMPLATES {
            env.add_template(skill_name(phase), source)
                .with_context(|| format!("load {phase} skills template"))?;
        }
        Ok(Self { env })
    }

    /// Default worker instructions for `phase`.
    pub fn render_skills(&self, phase: Phase) -> Result<String> {
        let template = self.env.get_template(skill_name(phase))?;
        Ok(template.render(context! { phase => phase.as_str() })?)
    }

    pub fn render_task(&self, input: &TaskPromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template("task")?;
        let rendered = template.render(context! {
            repository => input.repository,
            tasks => input.tasks,
            prs => input.prs,
            iteration => input.iteration,
            continuing => input.iteration > 1,
        })?;
        debug!(bytes = rendered.len(), "rendered task prompt");
        Ok(rendered)
    }

    pub fn render_review(&self, input: &ReviewPromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template("reviewer")?;
        let output = truncate_bytes(input.output.trim(), REVIEW_OUTPUT_BUDGET);
        let rendered = template.render(context! {
            phase => input.phase,
            repository => input.repository,
            tasks => input.tasks,
            iteration => input.iteration,
            summary => input.summary.trim(),
            output => output,
            can_regress => input.can_regress,
        })?;
        Ok(rendered)
    }

    pub fn render_judge(&self, input: &JudgePromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template("judge")?;
        let feedback = match input.feedback.trim() {
            "" => "(the reviewer returned no feedback)",
            text => text,
        };
        let rendered = template.render(context! {
            phase => input.phase,
            iteration => input.iteration,
            max_iterations => input.max_iterations,
            feedback => feedback,
            allow_regress => input.allow_regress,
        })?;
        Ok(rendered)
    }
}

fn skill_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Plan => "skills/plan",
        Phase::Implement => "skills/implement",
        Phase::Docs => "skills/docs",
        Phase::PrCreation => "skills/pr_creation",
    }
}
