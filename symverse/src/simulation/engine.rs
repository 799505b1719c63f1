//! Pipeline driver
//!
//! - `PipelineSpec` ordered `(stage, options)` entries, e.g. from `-m name[opts]`
//! - `Pipeline`     configured stage instances resolved against a `Registry`
//! - `StopToken`    two-phase interrupt (soft: finish the step, hard: discard it)
//! - `Driver`       the step loop: run stages, interpret flags, commit the slice
//! - `RunContext`   owns everything one run needs and releases it at the end

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::configuration::config::RunConfig;
use crate::error::{Error, Result};
use crate::simulation::params::RunParams;
use crate::simulation::scenario::Scenario;
use crate::simulation::stage::{Control, Registry, Stage};
use crate::simulation::states::Slice;
use crate::storage::universe::Universe;

// =========================================================================================
// pipeline specification
// =========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEntry {
    pub stage: String,   // registered stage name
    pub options: String, // raw option string handed to `configure`
}

impl PipelineEntry {
    pub fn new(stage: impl Into<String>, options: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            options: options.into(),
        }
    }
}

/// Parse `name[options]` (or a bare `name`) into an entry
pub fn parse_entry(text: &str) -> Result<PipelineEntry> {
    let text = text.trim();
    let malformed = || Error::config(format!("malformed pipeline entry '{text}', expected name[options]"));

    let (name, options) = match text.find('[') {
        None => {
            if text.contains(']') {
                return Err(malformed());
            }
            (text, "")
        }
        Some(open) => {
            let rest = &text[open + 1..];
            let inner = rest.strip_suffix(']').ok_or_else(malformed)?;
            if inner.contains('[') || inner.contains(']') {
                return Err(malformed());
            }
            (&text[..open], inner)
        }
    };

    let name = name.trim();
    if name.is_empty() {
        return Err(malformed());
    }
    Ok(PipelineEntry::new(name, options))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSpec {
    pub entries: Vec<PipelineEntry>,
}

impl PipelineSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: impl Into<String>, options: impl Into<String>) {
        self.entries.push(PipelineEntry::new(stage, options));
    }

    /// Builder form of `push`
    pub fn with(mut self, stage: impl Into<String>, options: impl Into<String>) -> Self {
        self.push(stage, options);
        self
    }

    pub fn push_text(&mut self, text: &str) -> Result<()> {
        self.entries.push(parse_entry(text)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =========================================================================================
// configured pipeline
// =========================================================================================

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Resolve and configure every entry, in order. The first unknown name or
    /// rejected option string fails the whole build.
    pub fn build(registry: &Registry, spec: &PipelineSpec) -> Result<Self> {
        let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(spec.len());
        for (pos, entry) in spec.entries.iter().enumerate() {
            let factory = registry.get(&entry.stage).ok_or_else(|| {
                Error::config(format!(
                    "unknown stage '{}' at pipeline position {pos}; available: {}",
                    entry.stage,
                    registry.names().join(", ")
                ))
            })?;
            let stage = factory.configure(&entry.options).map_err(|e| match e {
                Error::Config(msg) => {
                    Error::config(format!("stage '{}' rejected its options: {msg}", entry.stage))
                }
                other => other,
            })?;
            stages.push(stage);
        }

        if stages.is_empty() {
            warn!("pipeline is empty: every step will copy the previous slice unchanged");
        } else {
            info!("pipeline: {}", Self::describe(&stages));
        }
        Ok(Self { stages })
    }

    fn describe(stages: &[Box<dyn Stage>]) -> String {
        stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(" -> ")
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage over `(prev, cur)` in order; returns the OR of their
    /// flags and the names of the stages that asked for ABORT.
    pub fn execute(&mut self, prev: &Slice, cur: &mut Slice) -> (Control, Vec<&'static str>) {
        let mut flags = Control::OK;
        let mut aborted_by = Vec::new();
        for stage in self.stages.iter_mut() {
            let ret = stage.execute(prev, cur);
            if ret.contains(Control::ABORT) {
                aborted_by.push(stage.name());
            }
            flags |= ret;
        }
        (flags, aborted_by)
    }

    /// Release every stage in order
    pub fn release(self) {
        for stage in self.stages {
            stage.release();
        }
    }
}

// =========================================================================================
// interrupt handling
// =========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopLevel {
    Running,
    Soft,
    Hard,
}

impl StopLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => StopLevel::Running,
            1 => StopLevel::Soft,
            _ => StopLevel::Hard,
        }
    }
}

/// Cloneable cancellation token shared between the driver and whatever
/// delivers interrupts (the binary wires it to Ctrl-C)
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    level: Arc<AtomicU8>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Escalate one level (Running -> Soft -> Hard) and return the new level
    pub fn request_stop(&self) -> StopLevel {
        let prev = self
            .level
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some((v + 1).min(2)))
            .unwrap_or(2);
        StopLevel::from_u8((prev + 1).min(2))
    }

    pub fn level(&self) -> StopLevel {
        StopLevel::from_u8(self.level.load(Ordering::SeqCst))
    }
}

// =========================================================================================
// driver loop
// =========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopping,
    Aborted,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: RunState,     // Done, or Aborted after a hard stop
    pub iterations: u64,     // pipeline runs started
    pub slices_written: u64, // slices committed by this run
}

pub struct Driver<'a> {
    pipeline: &'a mut Pipeline,
    universe: &'a mut Universe,
    params: &'a RunParams,
    stop: StopToken,
    state: RunState,
}

impl<'a> Driver<'a> {
    pub fn new(
        pipeline: &'a mut Pipeline,
        universe: &'a mut Universe,
        params: &'a RunParams,
        stop: StopToken,
    ) -> Self {
        Self {
            pipeline,
            universe,
            params,
            stop,
            state: RunState::Running,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Evolve `initial` until EXIT, an interrupt or the iteration budget.
    ///
    /// ABORT from any stage discards the in-flight slice and returns
    /// `Error::Abort`; a hard stop discards it and returns `RunState::Aborted`.
    pub fn run(&mut self, initial: Slice) -> Result<RunOutcome> {
        let mut iterations = 0u64;
        let mut written = 0u64;

        if self.params.budget_exhausted(0) {
            info!("iteration budget is zero, nothing to do");
            self.state = RunState::Done;
            return Ok(self.outcome(iterations, written));
        }

        let mut previous = initial;
        let mut current = previous.successor();

        loop {
            match self.stop.level() {
                StopLevel::Hard => return Ok(self.interrupted(iterations, written)),
                StopLevel::Soft if self.state == RunState::Running => {
                    warn!("stop requested: finishing step {}", current.time);
                    self.state = RunState::Stopping;
                }
                _ => {}
            }

            // (1) every stage, declaration order
            let (flags, aborted_by) = self.pipeline.execute(&previous, &mut current);
            iterations += 1;

            // (2) abort: nothing from this step reaches the trajectory
            if flags.contains(Control::ABORT) {
                self.state = RunState::Aborted;
                let who = aborted_by.join(", ");
                error!("step {} aborted by {who}; slice discarded", current.time);
                return Err(Error::Abort(who));
            }

            // (3) compact or just drop CREATE
            if flags.contains(Control::REPACK) {
                let before = current.nbody();
                current.repack()?;
                debug!("step {}: repacked {before} -> {} bodies", current.time, current.nbody());
            } else {
                current.clear_create();
            }

            // a second interrupt during the step: do not commit it
            if self.stop.level() == StopLevel::Hard {
                return Ok(self.interrupted(iterations, written));
            }

            // (4) commit
            self.universe.append_slice(&current)?;
            written += 1;
            debug!(
                "step {} committed ({} bodies, flags {flags})",
                current.time,
                current.nbody()
            );

            // (5) done?
            if flags.contains(Control::EXIT) {
                info!("step {}: EXIT requested by the pipeline", current.time);
                break;
            }
            if self.state == RunState::Stopping || self.stop.level() == StopLevel::Soft {
                info!("stopped after step {}", current.time);
                break;
            }
            if self.params.budget_exhausted(iterations) {
                break;
            }

            // (6) next step starts from the committed slice
            previous = current;
            current = previous.successor();
        }

        self.state = RunState::Done;
        info!(
            "run finished: {iterations} steps, trajectory holds {} slices",
            self.universe.len()
        );
        Ok(self.outcome(iterations, written))
    }

    fn interrupted(&mut self, iterations: u64, written: u64) -> RunOutcome {
        warn!("interrupted: in-flight slice discarded");
        self.state = RunState::Aborted;
        self.outcome(iterations, written)
    }

    fn outcome(&self, iterations: u64, slices_written: u64) -> RunOutcome {
        RunOutcome {
            state: self.state,
            iterations,
            slices_written,
        }
    }
}

// =========================================================================================
// run context
// =========================================================================================

/// Registry, pipeline, output trajectory, stop token and parameters for one
/// run, plus the slice the run starts from
pub struct RunContext {
    pub registry: Registry,
    pipeline: Pipeline,
    universe: Universe,
    params: RunParams,
    stop: StopToken,
    initial: Slice,
}

impl RunContext {
    /// Build the pipeline from the builtin registry and resolve the initial slice
    pub fn prepare(config: &RunConfig) -> Result<Self> {
        Self::prepare_with(Registry::builtin(), config)
    }

    /// The output is only created once the initial slice is known, so a
    /// failed setup leaves nothing behind.
    pub fn prepare_with(registry: Registry, config: &RunConfig) -> Result<Self> {
        let params = config.params();
        let pipeline = Pipeline::build(&registry, &config.pipeline_spec()?)?;

        let mut existing = if params.output.exists() {
            Some(Universe::open(&params.output)?)
        } else {
            None
        };

        let (initial, seed) = Self::initial_slice(config, &params, existing.as_mut())?;

        let mut universe = match existing {
            Some(universe) => {
                info!("appending to trajectory {}", params.output.display());
                universe
            }
            None => {
                info!("creating trajectory {}", params.output.display());
                Universe::create(&params.output)?
            }
        };
        if seed {
            universe.append_slice(&initial)?;
            info!("initial condition written as slice 0");
        }
        info!(
            "starting from time {} with {} bodies",
            initial.time,
            initial.nbody()
        );

        Ok(Self {
            registry,
            pipeline,
            universe,
            params,
            stop: StopToken::new(),
            initial,
        })
    }

    /// The slice the run starts from, and whether it still has to be written
    /// to the output as slice 0. Steps are appended after whatever the output
    /// already holds, so a non-empty output is resumed unless a separate
    /// input trajectory is newer.
    fn initial_slice(
        config: &RunConfig,
        params: &RunParams,
        output: Option<&mut Universe>,
    ) -> Result<(Slice, bool)> {
        let output_last = match output {
            Some(u) if !u.is_empty() => Some(u.get_last_slice()?),
            _ => None,
        };

        // last slice of a separate input trajectory
        if !params.resumes_output() && params.input.exists() {
            let mut input = Universe::open_read_only(&params.input)?;
            if input.is_empty() {
                return Err(Error::Format(format!(
                    "input trajectory {} holds no slices",
                    params.input.display()
                )));
            }
            let last = input.get_last_slice()?;
            input.close()?;
            if let Some(out) = &output_last {
                if last.time < out.time {
                    return Err(Error::config(format!(
                        "input {} ends at time {} but output {} already reaches time {}",
                        params.input.display(),
                        last.time,
                        params.output.display(),
                        out.time
                    )));
                }
            }
            return Ok((last, false));
        }

        // the output itself, named as input or not
        if let Some(last) = output_last {
            if !params.resumes_output() {
                info!(
                    "{} does not exist, resuming {}",
                    params.input.display(),
                    params.output.display()
                );
            }
            return Ok((last, false));
        }

        // initial condition from the configuration, output still empty
        if let Some(scenario) = &config.scenario {
            return Ok((Scenario::build_slice(scenario)?, true));
        }

        if params.resumes_output() && params.output.exists() {
            return Err(Error::Format(format!(
                "trajectory {} holds no slices to resume from",
                params.output.display()
            )));
        }
        Err(Error::config(format!(
            "no initial slice: {} does not exist and no scenario is configured",
            params.input.display()
        )))
    }

    /// Token to hand to an interrupt handler
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    pub fn initial(&self) -> &Slice {
        &self.initial
    }

    /// Run to completion, then release the pipeline and close the trajectory
    /// whatever the outcome
    pub fn run(self) -> Result<RunOutcome> {
        let RunContext {
            mut pipeline,
            mut universe,
            params,
            stop,
            initial,
            ..
        } = self;

        let result = Driver::new(&mut pipeline, &mut universe, &params, stop).run(initial);

        pipeline.release();
        let closed = universe.close();
        let outcome = result?;
        closed?;
        Ok(outcome)
    }
}
