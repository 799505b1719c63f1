//! Run configuration loaded from YAML.
//!
//! This module defines the `serde`-deserializable description of one run:
//!
//! - [`RunSection`]      – trajectory paths and iteration budget
//! - [`StageConfig`]     – one pipeline entry (stage name + option string)
//! - [`ScenarioConfig`]  – optional initial slice, used while the output is still empty
//! - [`BodyConfig`]      – initial state for each body of the scenario
//! - [`RunConfig`]       – top-level wrapper
//!
//! # YAML format
//!
//! ```yaml
//! run:
//!   input: in.univ          # trajectory whose last slice seeds the run (falls back to the output)
//!   output: out.univ        # trajectory to create or append to
//!   timesteps: 100          # omitted or negative -> run until EXIT or Ctrl-C
//!
//! pipeline:
//!   - stage: fgrav
//!     options: "cleara=1,plummer=0.01"
//!   - stage: integrate
//!     options: "method=leapfrog,timestep=0.01,boundary=periodic"
//!
//! scenario:
//!   bound_min: [ 0.0, 0.0, 0.0 ]
//!   bound_max: [ 1.0, 1.0, 1.0 ]
//!   bodies:
//!     - pos: [ 0.25, 0.5, 0.5 ]
//!       vel: [ 0.0, 0.1, 0.0 ]
//!       mass: 1.0
//!       radius: 0.01
//!     - pos: [ 0.75, 0.5, 0.5 ]
//!       vel: [ 0.0, -0.1, 0.0 ]
//!       mass: 1.0
//!       radius: 0.01
//! ```
//!
//! Every section is optional. The command line overrides `run` and appends
//! to `pipeline`.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::simulation::engine::{parse_entry, PipelineSpec};
use crate::simulation::params::{RunParams, DEFAULT_IN_FILE, DEFAULT_OUT_FILE};

/// Paths and budget of a run
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub input: Option<PathBuf>,  // default in.univ
    pub output: Option<PathBuf>, // default out.univ
    pub timesteps: Option<i64>,  // negative or missing: unbounded
}

/// One pipeline entry
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub stage: String, // registered stage name, or `name[options]`
    #[serde(default)]
    pub options: String, // comma separated `key` / `key=value`
}

/// Initial state of a single body
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BodyConfig {
    pub pos: Vec<f64>, // position, 3 components
    pub vel: Vec<f64>, // velocity, 3 components
    pub mass: f64,
    pub radius: f64,
    #[serde(default)]
    pub charge: f64,
    #[serde(default)]
    pub flags: u32, // system flags (NOCOLL = 4 is the useful one here)
    #[serde(default)]
    pub uflags: u32, // caller flags, carried through untouched
}

/// Initial slice
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub time: u64, // time of the initial slice
    pub bound_min: Vec<f64>, // lower box corner, 3 components
    pub bound_max: Vec<f64>, // upper box corner, 3 components
    #[serde(default)]
    pub bodies: Vec<BodyConfig>,
}

/// Top-level run configuration
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub run: RunSection,
    pub pipeline: Vec<StageConfig>,
    pub scenario: Option<ScenarioConfig>,
}

impl RunConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_yaml::from_reader(reader)?)
    }

    /// Run parameters with defaults filled in
    pub fn params(&self) -> RunParams {
        RunParams {
            input: self
                .run
                .input
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IN_FILE)),
            output: self
                .run
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_FILE)),
            timesteps: self.run.timesteps.and_then(|t| u64::try_from(t).ok()),
        }
    }

    /// Pipeline entries in order. An entry whose `stage` carries brackets is
    /// parsed as `name[options]`; it may not also set `options`.
    pub fn pipeline_spec(&self) -> Result<PipelineSpec> {
        let mut spec = PipelineSpec::new();
        for entry in &self.pipeline {
            if entry.stage.contains('[') {
                let parsed = parse_entry(&entry.stage)?;
                if !entry.options.is_empty() {
                    return Err(Error::config(format!(
                        "pipeline entry '{}' sets options twice",
                        entry.stage
                    )));
                }
                spec.entries.push(parsed);
            } else {
                spec.push(entry.stage.trim(), entry.options.as_str());
            }
        }
        Ok(spec)
    }

    /// Append a `name[options]` entry given on the command line
    pub fn push_stage_text(&mut self, text: &str) -> Result<()> {
        let parsed = parse_entry(text)?;
        self.pipeline.push(StageConfig {
            stage: parsed.stage,
            options: parsed.options,
        });
        Ok(())
    }
}
