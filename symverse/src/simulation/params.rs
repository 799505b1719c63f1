//! Run-level parameters for the driver
//!
//! `RunParams` holds what the driver needs from outside the pipeline:
//! - input/output trajectory paths,
//! - iteration budget (`None` runs until EXIT or an interrupt)

use std::path::PathBuf;

pub const DEFAULT_IN_FILE: &str = "in.univ";
pub const DEFAULT_OUT_FILE: &str = "out.univ";

#[derive(Debug, Clone, PartialEq)]
pub struct RunParams {
    pub input: PathBuf,         // trajectory whose last slice seeds the run
    pub output: PathBuf,        // trajectory appended to
    pub timesteps: Option<u64>, // iteration budget, None = unbounded
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_IN_FILE),
            output: PathBuf::from(DEFAULT_OUT_FILE),
            timesteps: None,
        }
    }
}

impl RunParams {
    /// True when the run continues the output trajectory itself
    pub fn resumes_output(&self) -> bool {
        self.input == self.output
    }

    /// Budget reached after `iterations` completed steps
    pub fn budget_exhausted(&self, iterations: u64) -> bool {
        matches!(self.timesteps, Some(n) if iterations >= n)
    }
}
