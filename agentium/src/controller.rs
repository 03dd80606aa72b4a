//! Phase/iteration state machine for one session.
//!
//! Each phase runs a worker, then a reviewer, then a judge, until the judge
//! advances, the phase ceiling is hit, or the session stops. Expected stops are
//! returned as [`SessionStop`] values; only infrastructure failures are errors.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{Adapter, AdapterRegistry};
use crate::core::budget::{BudgetExhausted, clamp_budget, remaining_budget};
use crate::core::phase::{Phase, PhaseKey, Role};
use crate::core::result::{IterationResult, TokenUsage};
use crate::core::routing::{ModelConfig, PhaseRouter};
use crate::core::scope::ScopeValidator;
use crate::core::session::{IterationContext, Session};
use crate::core::verdict::{Verdict, parse_verdict};
use crate::io::config::ControllerConfig;
use crate::io::event_log::EventWriter;
use crate::io::git::Git;
use crate::io::iteration_log::{
    IterationMeta, IterationPaths, IterationWriteRequest, StatePaths, write_iteration,
};
use crate::io::process::{CancelToken, ExecRequest, ProcessExecutor};
use crate::io::prompt::{JudgePromptInputs, PromptEngine, READ_ONLY_NOTICE, ReviewPromptInputs};
use crate::io::scope::WorkspaceScope;

/// Deadline used when the session budget is too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStop {
    /// Every phase advanced (or was skipped).
    Completed,
    /// The judge declared the work blocked.
    Blocked { phase: Phase, reason: String },
    /// A phase used its whole iteration ceiling without advancing.
    IterationsExhausted { phase: Phase, iterations: u32 },
    /// The worker kept finishing without any status signal.
    NoSignal { phase: Phase, iterations: u32 },
    /// The session wall-clock budget ran out.
    TimedOut { phase: Phase },
    Cancelled { phase: Phase },
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: String,
    pub stop: SessionStop,
    /// Agent invocations across all roles.
    pub invocations: u32,
    pub phases_completed: Vec<Phase>,
    pub prs_created: Vec<String>,
    pub pushed_changes: bool,
    pub tokens: TokenUsage,
}

/// How a phase loop ended.
enum PhaseExit {
    Advanced,
    Regress(String),
    Stop(SessionStop),
}

/// Result of one agent invocation, or the stop that interrupted it.
enum Invoked {
    Finished(IterationResult),
    Stopped(SessionStop),
}

/// Mutable state for one `run` call.
struct Run {
    paths: StatePaths,
    events: EventWriter,
    scope: WorkspaceScope,
    deadline: Instant,
    seq: u32,
    regressions: u32,
    tokens: TokenUsage,
    prs_created: Vec<String>,
    pushed_changes: bool,
    phases_completed: Vec<Phase>,
}

impl Run {
    fn outcome(self, session_id: &str, stop: SessionStop) -> SessionOutcome {
        SessionOutcome {
            session_id: session_id.to_string(),
            stop,
            invocations: self.seq,
            phases_completed: self.phases_completed,
            prs_created: self.prs_created,
            pushed_changes: self.pushed_changes,
            tokens: self.tokens,
        }
    }

    fn record(&mut self, result: &IterationResult) {
        self.tokens
            .accumulate(result.tokens.input, result.tokens.output);
        for id in &result.prs_created {
            if !self.prs_created.contains(id) {
                self.prs_created.push(id.clone());
            }
        }
        self.pushed_changes |= result.pushed_changes;
    }
}

pub struct SessionController<'a, E: ProcessExecutor> {
    executor: &'a E,
    registry: &'a AdapterRegistry,
    config: &'a ControllerConfig,
    router: PhaseRouter,
    prompts: PromptEngine,
    workdir: PathBuf,
    cancel: CancelToken,
}

impl<'a, E: ProcessExecutor> SessionController<'a, E> {
    pub fn new(
        executor: &'a E,
        registry: &'a AdapterRegistry,
        config: &'a ControllerConfig,
        workdir: &Path,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            executor,
            registry,
            config,
            router: config.router(),
            prompts: PromptEngine::new()?,
            workdir: workdir.to_path_buf(),
            cancel: CancelToken::new(),
        })
    }

    /// Token that stops the session at the next check point when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[instrument(skip_all, fields(session = %session.id, agent = %session.agent))]
    pub fn run(&self, session: &mut Session) -> Result<SessionOutcome> {
        self.preflight(session)?;

        let paths = StatePaths::new(&self.workdir, &self.config.state_dir);
        paths.ensure()?;
        let events = EventWriter::open(&paths.events_path(&session.id))?;
        let scope = WorkspaceScope::new(
            Git::new(&self.workdir),
            ScopeValidator::new(self.config.package_scope.clone()),
        );
        let mut run = Run {
            paths,
            events,
            scope,
            deadline: deadline_after(session.max_duration()),
            seq: 0,
            regressions: 0,
            tokens: TokenUsage::default(),
            prs_created: Vec::new(),
            pushed_changes: false,
            phases_completed: Vec::new(),
        };

        let mut phase = Phase::Plan;
        let mut handoff: Option<String> = None;
        let mut forced_plan = false;
        loop {
            if self.should_skip(phase, forced_plan) {
                info!(%phase, "skipping phase");
            } else {
                info!(%phase, "entering phase");
                match self.run_phase(session, phase, handoff.take(), &mut run)? {
                    PhaseExit::Advanced => {
                        info!(%phase, "phase advanced");
                        run.phases_completed.push(phase);
                    }
                    PhaseExit::Regress(reason) => {
                        run.regressions += 1;
                        warn!(
                            %phase,
                            regressions = run.regressions,
                            "judge sent session back to planning"
                        );
                        phase = Phase::Plan;
                        forced_plan = true;
                        handoff = Some(reason);
                        continue;
                    }
                    PhaseExit::Stop(stop) => {
                        info!(?stop, "session stopped");
                        return Ok(run.outcome(&session.id, stop));
                    }
                }
            }
            forced_plan = false;
            match phase.next() {
                Some(next) => phase = next,
                None => {
                    info!(invocations = run.seq, "session completed");
                    return Ok(run.outcome(&session.id, SessionStop::Completed));
                }
            }
        }
    }

    /// Fail fast on unknown adapters, bad images and missing credentials for
    /// any adapter this session can route to.
    fn preflight(&self, session: &Session) -> Result<()> {
        if session.max_iterations == 0 {
            return Err(anyhow!("session max_iterations must be > 0"));
        }
        let mut selected = self.router.adapters();
        selected.push(session.agent.clone());
        selected.sort();
        selected.dedup();
        for name in &selected {
            let adapter = self.registry.get(name)?;
            adapter.validate()?;
            if session.credentials.get(adapter.provider()).is_none() {
                return Err(anyhow!(
                    "missing credentials for provider '{}' (adapter '{name}')",
                    adapter.provider()
                ));
            }
        }
        debug!(adapters = ?selected, "preflight passed");
        Ok(())
    }

    fn should_skip(&self, phase: Phase, forced_plan: bool) -> bool {
        if self.config.skip_phases.contains(&phase) {
            return true;
        }
        if phase.is_planning()
            && !forced_plan
            && let Some(artifact) = &self.config.plan_artifact
        {
            return self.workdir.join(artifact).exists();
        }
        false
    }

    fn phase_ceiling(&self, session: &Session) -> u32 {
        self.config
            .max_iterations_per_phase
            .unwrap_or(session.max_iterations)
    }

    fn can_regress(&self, phase: Phase, run: &Run) -> bool {
        !phase.is_planning()
            && run.regressions < self.config.max_regressions
            && !self.config.skip_phases.contains(&Phase::Plan)
    }

    #[instrument(skip_all, fields(%phase))]
    fn run_phase(
        &self,
        session: &mut Session,
        phase: Phase,
        initial_handoff: Option<String>,
        run: &mut Run,
    ) -> Result<PhaseExit> {
        let ceiling = self.phase_ceiling(session);
        let worker_key = phase.worker();
        session.context.handoff = initial_handoff;
        let mut no_signal = 0u32;
        // (adapter, agent conversation id) of this phase's last worker run.
        let mut resumable: Option<(String, String)> = None;

        for iteration in 1..=ceiling {
            let routing = self.router.model_for(worker_key);
            let adapter = self.resolve_adapter(session, &routing)?;
            self.apply_routing(&mut session.context, worker_key, &routing)?;
            if phase.is_planning() && !adapter.supports_plan_mode() {
                let skills = session.context.skills_prompt.get_or_insert_with(String::new);
                if !skills.is_empty() {
                    skills.push_str("\n\n");
                }
                skills.push_str(READ_ONLY_NOTICE);
            }

            run.scope.begin_iteration()?;
            session.context.resume_session = resumable
                .take()
                .filter(|(name, _)| name == adapter.name())
                .map(|(_, id)| id);
            let continued = if session.context.resume_session.is_some() {
                adapter.build_continue_command(session, iteration)?
            } else {
                None
            };
            let argv = match continued {
                Some(argv) => argv,
                None => {
                    session.context.resume_session = None;
                    adapter.build_command(session, iteration)?
                }
            };
            debug!(
                iteration,
                adapter = adapter.name(),
                resume = ?session.context.resume_session,
                "running worker"
            );

            let result = match self.invoke(session, adapter, worker_key, iteration, argv, run)? {
                Invoked::Finished(result) => result,
                Invoked::Stopped(stop) => return Ok(PhaseExit::Stop(stop)),
            };
            resumable = result
                .agent_session
                .clone()
                .map(|id| (adapter.name().to_string(), id));
            session.context.remember(
                format!("{worker_key} iteration {iteration}: {}", result.summary),
                self.config.memory_entries,
            );
            session.context.handoff = None;

            if run.scope.is_enforced() {
                let validation = run.scope.check()?;
                if !validation.valid {
                    run.scope.reset_changes()?;
                    session.context.handoff = Some(run.scope.format_violation_error(&validation));
                    // The resumed conversation would still see the reverted edits.
                    resumable = None;
                    continue;
                }
            }

            if result.status.is_some() {
                no_signal = 0;
            } else {
                no_signal += 1;
                if no_signal >= self.config.no_signal_ceiling {
                    warn!(iteration, no_signal, "no status signal from worker");
                    return Ok(PhaseExit::Stop(SessionStop::NoSignal {
                        phase,
                        iterations: iteration,
                    }));
                }
            }

            let feedback = match self.review(session, phase, iteration, &result, run)? {
                Invoked::Finished(review) => review.answer_text().trim().to_string(),
                Invoked::Stopped(stop) => return Ok(PhaseExit::Stop(stop)),
            };
            let allow_regress = self.can_regress(phase, run);
            let verdict = match self.judge(session, phase, iteration, ceiling, &feedback, run)? {
                Invoked::Finished(result) => parse_verdict(result.answer_text())
                    .or_else(|| parse_verdict(&result.raw_text)),
                Invoked::Stopped(stop) => return Ok(PhaseExit::Stop(stop)),
            };

            info!(
                iteration,
                verdict = verdict.as_ref().map_or("MISSING", Verdict::keyword),
                "judge verdict"
            );
            match verdict {
                Some(Verdict::Advance) => return Ok(PhaseExit::Advanced),
                Some(Verdict::Blocked(reason)) => {
                    return Ok(PhaseExit::Stop(SessionStop::Blocked { phase, reason }));
                }
                Some(Verdict::Regress(reason)) if allow_regress => {
                    return Ok(PhaseExit::Regress(reason));
                }
                Some(Verdict::Iterate(reason) | Verdict::Regress(reason)) if !reason.is_empty() => {
                    session.context.handoff = Some(reason);
                }
                _ => {
                    session.context.handoff = (!feedback.is_empty()).then_some(feedback);
                }
            }
        }

        Ok(PhaseExit::Stop(SessionStop::IterationsExhausted {
            phase,
            iterations: ceiling,
        }))
    }

    fn resolve_adapter(
        &self,
        session: &Session,
        routing: &ModelConfig,
    ) -> Result<&'a dyn Adapter> {
        let name = if routing.adapter.is_empty() {
            session.agent.as_str()
        } else {
            routing.adapter.as_str()
        };
        self.registry.get(name)
    }

    fn apply_routing(
        &self,
        context: &mut IterationContext,
        key: PhaseKey,
        routing: &ModelConfig,
    ) -> Result<()> {
        context.phase = Some(key);
        context.skills_prompt = match self.config.phase_instructions.get(&key.key()) {
            Some(configured) => Some(configured.clone()),
            None if key.role == Role::Worker => Some(self.prompts.render_skills(key.phase)?),
            None => None,
        };
        context.model_override = non_empty(&routing.model);
        context.reasoning_override = non_empty(&routing.reasoning);
        Ok(())
    }

    /// Session copy for a reviewer or judge: always fresh, never interactive,
    /// no memory, with `prompt` as its only task.
    fn sub_session(
        &self,
        session: &Session,
        key: PhaseKey,
        routing: &ModelConfig,
        prompt: String,
    ) -> Result<Session> {
        let mut sub = session.clone();
        sub.interactive = false;
        sub.system_prompt = None;
        sub.task_prompt = Some(prompt);
        sub.context = IterationContext::default();
        self.apply_routing(&mut sub.context, key, routing)?;
        Ok(sub)
    }

    fn review(
        &self,
        session: &Session,
        phase: Phase,
        iteration: u32,
        result: &IterationResult,
        run: &mut Run,
    ) -> Result<Invoked> {
        let key = phase.review();
        let routing = self.router.model_for(key);
        let adapter = self.resolve_adapter(session, &routing)?;
        let prompt = self.prompts.render_review(&ReviewPromptInputs {
            phase: phase.as_str(),
            repository: &session.repository,
            tasks: &session.tasks,
            iteration,
            summary: &result.summary,
            output: result.answer_text(),
            can_regress: self.can_regress(phase, run),
        })?;
        let sub = self.sub_session(session, key, &routing, prompt)?;
        let argv = adapter.build_command(&sub, iteration)?;
        self.invoke(&sub, adapter, key, iteration, argv, run)
    }

    fn judge(
        &self,
        session: &Session,
        phase: Phase,
        iteration: u32,
        ceiling: u32,
        feedback: &str,
        run: &mut Run,
    ) -> Result<Invoked> {
        let key = phase.judge();
        let routing = self.router.model_for(key);
        let adapter = self.resolve_adapter(session, &routing)?;
        let prompt = self.prompts.render_judge(&JudgePromptInputs {
            phase: phase.as_str(),
            iteration,
            max_iterations: ceiling,
            feedback,
            allow_regress: self.can_regress(phase, run),
        })?;
        let sub = self.sub_session(session, key, &routing, prompt)?;
        let argv = adapter.build_command(&sub, iteration)?;
        self.invoke(&sub, adapter, key, iteration, argv, run)
    }

    /// Execute one invocation, then write its events and audit log.
    #[instrument(skip_all, fields(key = %key, iteration, adapter = adapter.name()))]
    fn invoke(
        &self,
        session: &Session,
        adapter: &dyn Adapter,
        key: PhaseKey,
        iteration: u32,
        argv: Vec<String>,
        run: &mut Run,
    ) -> Result<Invoked> {
        if self.cancel.is_cancelled() {
            return Ok(Invoked::Stopped(SessionStop::Cancelled { phase: key.phase }));
        }
        let budget = match remaining_budget(run.deadline) {
            Ok(budget) => budget,
            Err(err) if err.downcast_ref::<BudgetExhausted>().is_some() => {
                return Ok(Invoked::Stopped(SessionStop::TimedOut { phase: key.phase }));
            }
            Err(err) => return Err(err),
        };
        let timeout = clamp_budget(
            budget,
            Some(Duration::from_secs(self.config.iteration_timeout_secs)),
        );

        run.seq += 1;
        let paths = IterationPaths::new(&run.paths, &session.id, run.seq, &key.key());
        let stdin = adapter.stdin_prompt(session, iteration)?;
        let prompt = match &stdin {
            Some(prompt) => prompt.clone(),
            None => adapter.build_prompt(session, iteration)?,
        };
        let request = ExecRequest {
            argv,
            env: adapter.build_env(session, iteration),
            stdin,
            workdir: self.workdir.clone(),
            timeout,
            output_limit_bytes: self.config.output_limit_bytes,
            stream_path: Some(paths.stdout_path.clone()),
        };

        let started_at = Utc::now();
        let started = Instant::now();
        let output = self
            .executor
            .execute(&request, &self.cancel)
            .with_context(|| format!("run {} for {key}", adapter.name()))?;
        let ended_at = Utc::now();

        let mut result = adapter.parse_output(output.exit_code, &output.stdout, &output.stderr);
        if output.timed_out {
            result.success = false;
            result
                .error
                .get_or_insert_with(|| format!("agent timed out after {}s", timeout.as_secs()));
        }
        for event in &mut result.events {
            event.stamp(&session.id, run.seq);
        }
        run.events.write_all(&result.events)?;
        run.record(&result);

        let meta = IterationMeta {
            session_id: session.id.clone(),
            seq: run.seq,
            phase_key: key.key(),
            phase_iteration: iteration,
            adapter: adapter.name().to_string(),
            model: session.context.model_override.clone(),
            argv: request.argv.clone(),
            exit_code: output.exit_code,
            success: result.success,
            timed_out: output.timed_out,
            cancelled: output.cancelled,
            status: result.status_name().map(str::to_string),
            tokens: result.tokens,
            summary: result.summary.clone(),
            started_at,
            ended_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        let streamed = paths.stdout_path.exists();
        write_iteration(&IterationWriteRequest {
            paths: &paths,
            meta: &meta,
            prompt: &prompt,
            stdout: (!streamed).then_some(output.stdout.as_str()),
            stderr: &output.stderr,
        })?;
        debug!(
            exit_code = output.exit_code,
            success = result.success,
            status = ?result.status_name(),
            "invocation finished"
        );

        if output.cancelled || self.cancel.is_cancelled() {
            return Ok(Invoked::Stopped(SessionStop::Cancelled { phase: key.phase }));
        }
        if output.timed_out && remaining_budget(run.deadline).is_err() {
            return Ok(Invoked::Stopped(SessionStop::TimedOut { phase: key.phase }));
        }
        Ok(Invoked::Finished(result))
    }
}

/// `now + budget`, saturating far in the future when the sum overflows.
fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::adapter::{base_env, prompt_with_system};
    use crate::core::parse::OutputFormat;
    use crate::core::session::ProviderCredential;
    use crate::io::process::ExecOutput;
    use crate::test_support::{
        ScriptedExecutor, TestRepo, agent_reply, agent_reply_in, sample_session,
    };

    /// Plain-text tool with no read-only mode and no resume support.
    struct BareAdapter;

    impl Adapter for BareAdapter {
        fn name(&self) -> &str {
            "bare"
        }

        fn provider(&self) -> &str {
            "anthropic"
        }

        fn image(&self) -> &str {
            "bare:latest"
        }

        fn output_format(&self) -> OutputFormat {
            OutputFormat::PlainText
        }

        fn build_env(&self, session: &Session, iteration: u32) -> BTreeMap<String, String> {
            base_env(self, session, iteration)
        }

        fn build_command(&self, _session: &Session, _iteration: u32) -> Result<Vec<String>> {
            Ok(vec!["bare".to_string()])
        }

        fn stdin_prompt(&self, session: &Session, iteration: u32) -> Result<Option<String>> {
            let prompt = self.build_prompt(session, iteration)?;
            Ok(Some(prompt_with_system(session, prompt)))
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            skip_phases: vec![Phase::Plan, Phase::Docs, Phase::PrCreation],
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn missing_credentials_for_routed_adapter_fail_preflight() {
        let repo = TestRepo::new().expect("repo");
        let mut cfg = config();
        cfg.routing.default_config.adapter = "codex".to_string();
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(Vec::new());
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        let err = controller
            .run(&mut sample_session())
            .expect_err("missing openai credentials");
        assert!(err.to_string().contains("openai"));
        assert_eq!(executor.calls(), 0);
    }

    #[test]
    fn unused_provider_credentials_are_not_required() {
        let repo = TestRepo::new().expect("repo");
        let cfg = config();
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(vec![
            ExecOutput::success("AGENTIUM_STATUS: COMPLETE"),
            ExecOutput::success("fine"),
            ExecOutput::success("AGENTIUM_EVAL: ADVANCE"),
        ]);
        let mut session = sample_session();
        session.agent = "aider".to_string();
        session.credentials.insert(
            "openai",
            ProviderCredential::ApiKey {
                key: "sk".to_string(),
            },
        );
        session.credentials.0.remove("anthropic");
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        let outcome = controller.run(&mut session).expect("run");
        assert_eq!(outcome.stop, SessionStop::Completed);
    }

    #[test]
    fn plan_artifact_skips_planning() {
        let repo = TestRepo::new().expect("repo");
        repo.write("PLAN.md", "done").expect("write");
        let cfg = ControllerConfig {
            plan_artifact: Some("PLAN.md".to_string()),
            skip_phases: vec![Phase::Docs, Phase::PrCreation],
            ..ControllerConfig::default()
        };
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(vec![
            agent_reply("AGENTIUM_STATUS: COMPLETE"),
            agent_reply("ok"),
            agent_reply("AGENTIUM_EVAL: ADVANCE"),
        ]);
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        let outcome = controller.run(&mut sample_session()).expect("run");
        assert_eq!(outcome.phases_completed, vec![Phase::Implement]);
        let first = &executor.requests()[0];
        assert!(first.argv.contains(&"--dangerously-skip-permissions".to_string()));
        assert_eq!(executor.calls(), 3);
    }

    #[test]
    fn cancelled_before_start_stops_without_invoking() {
        let repo = TestRepo::new().expect("repo");
        let cfg = config();
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(Vec::new());
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        controller.cancel_token().cancel();
        let outcome = controller.run(&mut sample_session()).expect("run");
        assert_eq!(
            outcome.stop,
            SessionStop::Cancelled {
                phase: Phase::Implement
            }
        );
        assert_eq!(executor.calls(), 0);
    }

    #[test]
    fn exhausted_deadline_times_out() {
        let repo = TestRepo::new().expect("repo");
        let cfg = config();
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(Vec::new());
        let mut session = sample_session();
        session.max_duration_secs = 0;
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        let outcome = controller.run(&mut session).expect("run");
        assert_eq!(
            outcome.stop,
            SessionStop::TimedOut {
                phase: Phase::Implement
            }
        );
    }

    #[test]
    fn no_signal_ceiling_stops_session() {
        let repo = TestRepo::new().expect("repo");
        let cfg = ControllerConfig {
            no_signal_ceiling: 2,
            ..config()
        };
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(vec![
            agent_reply("worked quietly"),
            agent_reply("review"),
            agent_reply("AGENTIUM_EVAL: ITERATE say something"),
            agent_reply("still quiet"),
        ]);
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        let outcome = controller.run(&mut sample_session()).expect("run");
        assert_eq!(
            outcome.stop,
            SessionStop::NoSignal {
                phase: Phase::Implement,
                iterations: 2
            }
        );
    }

    #[test]
    fn missing_verdict_iterates_with_reviewer_feedback() {
        let repo = TestRepo::new().expect("repo");
        let cfg = ControllerConfig {
            max_iterations_per_phase: Some(2),
            ..config()
        };
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(vec![
            agent_reply("AGENTIUM_STATUS: TESTS_FAILED"),
            agent_reply("The parser test still fails."),
            agent_reply("I am not sure."),
            agent_reply("AGENTIUM_STATUS: TESTS_PASSED"),
            agent_reply("Looks good."),
            agent_reply("AGENTIUM_EVAL: ADVANCE"),
        ]);
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        let outcome = controller.run(&mut sample_session()).expect("run");
        assert_eq!(outcome.stop, SessionStop::Completed);

        let second_worker = &executor.requests()[3];
        let stdin = second_worker.stdin.as_deref().expect("stdin");
        assert!(stdin.contains("The parser test still fails."));
        // No conversation id was reported, so there is nothing to resume.
        assert!(!second_worker.argv.contains(&"--resume".to_string()));
        assert!(!second_worker.argv.contains(&"--continue".to_string()));
    }

    #[test]
    fn worker_resumes_its_own_conversation_by_id() {
        let repo = TestRepo::new().expect("repo");
        let cfg = ControllerConfig {
            max_iterations_per_phase: Some(3),
            ..config()
        };
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(vec![
            agent_reply_in("worker-a", "AGENTIUM_STATUS: TESTS_FAILED"),
            agent_reply_in("reviewer-b", "The parser test still fails."),
            agent_reply_in("judge-c", "AGENTIUM_EVAL: ITERATE fix the parser"),
            agent_reply("AGENTIUM_STATUS: TESTS_FAILED"),
            agent_reply("still failing"),
            agent_reply("AGENTIUM_EVAL: ITERATE try again"),
            agent_reply("AGENTIUM_STATUS: TESTS_PASSED"),
            agent_reply("good"),
            agent_reply("AGENTIUM_EVAL: ADVANCE"),
        ]);
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        let outcome = controller.run(&mut sample_session()).expect("run");
        assert_eq!(outcome.stop, SessionStop::Completed);

        let requests = executor.requests();
        assert_eq!(&requests[3].argv[..3], &["claude", "--resume", "worker-a"].map(String::from));
        for reviewer_or_judge in [&requests[4], &requests[5]] {
            assert!(!reviewer_or_judge.argv.contains(&"--resume".to_string()));
        }
        // The resumed run reported no id, so the third worker starts fresh.
        assert!(!requests[6].argv.contains(&"--resume".to_string()));
    }

    #[test]
    fn planning_worker_gets_builtin_plan_instructions() {
        let repo = TestRepo::new().expect("repo");
        let cfg = ControllerConfig {
            skip_phases: vec![Phase::Docs, Phase::PrCreation],
            ..ControllerConfig::default()
        };
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(vec![
            agent_reply("AGENTIUM_STATUS: COMPLETE"),
            agent_reply("plan ok"),
            agent_reply("AGENTIUM_EVAL: ADVANCE"),
            agent_reply("AGENTIUM_STATUS: PUSHED"),
            agent_reply("fine"),
            agent_reply("AGENTIUM_EVAL: ADVANCE"),
        ]);
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        controller.run(&mut sample_session()).expect("run");

        let system_prompt = |argv: &[String]| {
            argv.windows(2)
                .find(|w| w[0] == "--system-prompt")
                .map(|w| w[1].clone())
                .expect("system prompt")
        };
        let requests = executor.requests();
        let plan = system_prompt(&requests[0].argv);
        assert!(plan.contains("PLAN phase"));
        assert!(plan.contains("Do not edit files"));
        assert!(!plan.contains("AGENTIUM_STATUS: PUSHED"));
        let plan_task = requests[0].stdin.as_deref().expect("stdin");
        assert!(!plan_task.contains("pull request"));

        let implement = system_prompt(&requests[3].argv);
        assert!(implement.contains("AGENTIUM_STATUS: PUSHED"));
        // Reviewers and judges only get their rendered prompt.
        assert!(!requests[1].argv.contains(&"--system-prompt".to_string()));
    }

    #[test]
    fn tool_without_plan_mode_is_told_to_stay_read_only() {
        let repo = TestRepo::new().expect("repo");
        let cfg = ControllerConfig {
            skip_phases: vec![Phase::Implement, Phase::Docs, Phase::PrCreation],
            ..ControllerConfig::default()
        };
        let mut registry = AdapterRegistry::with_defaults(&cfg.images);
        registry.register(Box::new(BareAdapter));
        let executor = ScriptedExecutor::new(vec![
            ExecOutput::success("AGENTIUM_STATUS: COMPLETE"),
            ExecOutput::success("plan ok"),
            ExecOutput::success("AGENTIUM_EVAL: ADVANCE"),
        ]);
        let mut session = sample_session();
        session.agent = "bare".to_string();
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        let outcome = controller.run(&mut session).expect("run");
        assert_eq!(outcome.stop, SessionStop::Completed);

        let requests = executor.requests();
        let worker = requests[0].stdin.as_deref().expect("stdin");
        assert!(worker.contains("PLAN phase"));
        assert!(worker.contains(READ_ONLY_NOTICE));
        let reviewer = requests[1].stdin.as_deref().expect("stdin");
        assert!(!reviewer.contains(READ_ONLY_NOTICE));
    }

    #[test]
    fn unbounded_session_budget_does_not_overflow() {
        let repo = TestRepo::new().expect("repo");
        let cfg = config();
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(vec![
            agent_reply("AGENTIUM_STATUS: PUSHED"),
            agent_reply("fine"),
            agent_reply("AGENTIUM_EVAL: ADVANCE"),
        ]);
        let mut session = sample_session();
        session.max_duration_secs = u64::MAX;
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        let outcome = controller.run(&mut session).expect("run");
        assert_eq!(outcome.stop, SessionStop::Completed);
        assert_eq!(
            executor.requests()[0].timeout,
            Duration::from_secs(cfg.iteration_timeout_secs)
        );
    }

    #[test]
    fn regress_reenters_planning_once() {
        let repo = TestRepo::new().expect("repo");
        let cfg = ControllerConfig {
            skip_phases: vec![Phase::Docs, Phase::PrCreation],
            max_iterations_per_phase: Some(3),
            ..ControllerConfig::default()
        };
        let registry = AdapterRegistry::with_defaults(&cfg.images);
        let executor = ScriptedExecutor::new(vec![
            // PLAN
            agent_reply("AGENTIUM_STATUS: COMPLETE"),
            agent_reply("plan ok"),
            agent_reply("AGENTIUM_EVAL: ADVANCE"),
            // IMPLEMENT regresses
            agent_reply("AGENTIUM_STATUS: TESTS_FAILED"),
            agent_reply("the design cannot work"),
            agent_reply("AGENTIUM_EVAL: REGRESS redo the plan around streaming"),
            // PLAN again
            agent_reply("AGENTIUM_STATUS: COMPLETE"),
            agent_reply("better plan"),
            agent_reply("AGENTIUM_EVAL: ADVANCE"),
            // IMPLEMENT regresses again, now treated as iterate
            agent_reply("AGENTIUM_STATUS: TESTS_FAILED"),
            agent_reply("still wrong"),
            agent_reply("AGENTIUM_EVAL: REGRESS split the parser first"),
            agent_reply("AGENTIUM_STATUS: PUSHED"),
            agent_reply("good"),
            agent_reply("AGENTIUM_EVAL: ADVANCE"),
        ]);
        let controller =
            SessionController::new(&executor, &registry, &cfg, repo.path()).expect("controller");
        let outcome = controller.run(&mut sample_session()).expect("run");

        assert_eq!(outcome.stop, SessionStop::Completed);
        assert_eq!(
            outcome.phases_completed,
            vec![Phase::Plan, Phase::Plan, Phase::Implement]
        );
        assert!(outcome.pushed_changes);
        let replan = executor.requests()[6].stdin.clone().expect("stdin");
        assert!(replan.contains("redo the plan around streaming"));
        let retry = executor.requests()[12].stdin.clone().expect("stdin");
        assert!(retry.contains("split the parser first"));
    }
}
