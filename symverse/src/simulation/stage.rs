//! Plugin contract for physics stages.
//!
//! A stage maps `(prev, cur) -> cur` once per time step. The driver promises:
//! - `prev` is the last committed slice and is never mutated,
//! - `cur` starts as a deep copy of `prev` (CREATE cleared) and carries the
//!   edits of every earlier stage in the pipeline.
//!
//! A stage promises:
//! - never to shrink `cur.bodies`; deletion is the DELETE flag plus `Control::REPACK`,
//! - new bodies go to the end of `cur.bodies` marked CREATE,
//! - unrecoverable physics is reported with `Control::ABORT`, not a panic.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::error::{Error, Result};
use crate::simulation::states::Slice;
use crate::simulation::{boundaries, collision, dummy, forces, integrator};

/// Control flags a stage returns to the driver; flags of one iteration are OR-ed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Control(u8);

impl Control {
    /// Nothing special
    pub const OK: Control = Control(0);
    /// Discard the current slice and terminate
    pub const ABORT: Control = Control(1);
    /// Append the current slice, then stop
    pub const EXIT: Control = Control(2);
    /// Compact DELETE-flagged bodies before appending
    pub const REPACK: Control = Control(4);

    #[inline]
    pub fn contains(self, other: Control) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Control {
    type Output = Control;

    fn bitor(self, rhs: Control) -> Control {
        Control(self.0 | rhs.0)
    }
}

impl BitOrAssign for Control {
    fn bitor_assign(&mut self, rhs: Control) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "OK");
        }
        let names: Vec<&str> = [
            (Control::ABORT, "ABORT"),
            (Control::EXIT, "EXIT"),
            (Control::REPACK, "REPACK"),
        ]
        .iter()
        .filter(|(c, _)| self.contains(*c))
        .map(|(_, n)| *n)
        .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// A configured stage instance in the pipeline
pub trait Stage: Send {
    /// Name of the stage implementation
    fn name(&self) -> &'static str;

    /// Transform `cur` given the committed `prev`
    fn execute(&mut self, prev: &Slice, cur: &mut Slice) -> Control;

    /// Free whatever `configure` acquired. Dropping does the same.
    fn release(self: Box<Self>) {}
}

/// Entry in the stage registry: builds configured `Stage` instances
pub trait StageFactory: Send + Sync {
    /// Unique stage name used in pipeline specifications
    fn name(&self) -> &'static str;

    /// Usage text: what the stage does, its options and pipeline placement
    fn explain(&self) -> String;

    /// Parse `options` and build an instance
    fn configure(&self, options: &str) -> Result<Box<dyn Stage>>;
}

/// Parsed `key` / `key=value` option list (comma separated)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    pub entries: Vec<(String, Option<String>)>,
}

impl Options {
    pub fn parse(options: &str) -> Self {
        let entries = options
            .split(',')
            .map(str::trim)
            .filter(|tok| !tok.is_empty())
            .map(|tok| match tok.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
                None => (tok.to_string(), None),
            })
            .collect();
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }
}

/// Value of `key`, which must be present
pub fn required<'a>(stage: &str, key: &str, value: Option<&'a str>) -> Result<&'a str> {
    value.ok_or_else(|| Error::config(format!("[{stage}] option {key} needs a value ({key}=...)")))
}

pub fn f64_value(stage: &str, key: &str, value: Option<&str>) -> Result<f64> {
    let raw = required(stage, key, value)?;
    let v: f64 = raw
        .parse()
        .map_err(|_| Error::config(format!("[{stage}] {key}={raw} is not a number")))?;
    if !v.is_finite() {
        return Err(Error::config(format!("[{stage}] {key} must be finite")));
    }
    Ok(v)
}

pub fn usize_value(stage: &str, key: &str, value: Option<&str>) -> Result<usize> {
    let raw = required(stage, key, value)?;
    raw.parse()
        .map_err(|_| Error::config(format!("[{stage}] {key}={raw} is not a non-negative integer")))
}

/// `key` alone means true; `0|1|false|true` otherwise
pub fn bool_value(stage: &str, key: &str, value: Option<&str>) -> Result<bool> {
    match value {
        None | Some("1") | Some("true") => Ok(true),
        Some("0") | Some("false") => Ok(false),
        Some(other) => Err(Error::config(format!(
            "[{stage}] {key} accepts only 0 (disable) or 1 (enable), got {other}"
        ))),
    }
}

pub fn unknown_option(stage: &str, key: &str, valid: &[&str]) -> Error {
    Error::config(format!(
        "[{stage}] unrecognized option {key}; valid options are: {}",
        valid.join(", ")
    ))
}

/// Name -> factory lookup for every stage available to a run
pub struct Registry {
    factories: Vec<Box<dyn StageFactory>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Registry with every stage shipped in this crate
    pub fn builtin() -> Self {
        Self {
            factories: vec![
                Box::new(forces::GravityFactory),
                Box::new(forces::ThreadedGravityFactory),
                Box::new(integrator::IntegrateFactory),
                Box::new(boundaries::BoundaryFactory),
                Box::new(collision::CollisionFactory::point()),
                Box::new(collision::CollisionFactory::hard_sphere()),
                Box::new(dummy::DummyFactory),
            ],
        }
    }

    /// Add a factory; names must be unique
    pub fn register(&mut self, factory: Box<dyn StageFactory>) -> Result<()> {
        if self.get(factory.name()).is_some() {
            return Err(Error::config(format!(
                "stage {} is already registered",
                factory.name()
            )));
        }
        self.factories.push(factory);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn StageFactory> {
        self.factories
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    /// Concatenated `explain()` text of every registered stage
    pub fn explain_all(&self) -> String {
        let mut out = String::new();
        for f in &self.factories {
            out.push_str(&format!("Stage name: {}\n{}\n", f.name(), f.explain()));
        }
        out
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_split_keys_and_values() {
        let o = Options::parse("cleara, plummer=0.5,,tc=4");
        let got: Vec<(&str, Option<&str>)> = o.iter().collect();
        assert_eq!(
            got,
            vec![("cleara", None), ("plummer", Some("0.5")), ("tc", Some("4"))]
        );
        assert!(Options::parse("").entries.is_empty());
    }

    #[test]
    fn bool_values() {
        assert!(bool_value("s", "k", None).unwrap());
        assert!(!bool_value("s", "k", Some("0")).unwrap());
        assert!(bool_value("s", "k", Some("2")).is_err());
    }

    #[test]
    fn control_flags_combine() {
        let c = Control::OK | Control::REPACK | Control::EXIT;
        assert!(c.contains(Control::REPACK));
        assert!(c.contains(Control::EXIT));
        assert!(!c.contains(Control::ABORT));
        assert!(!Control::OK.contains(Control::OK));
        assert_eq!(c.to_string(), "EXIT|REPACK");
    }

    #[test]
    fn builtin_registry_has_every_stage_once() {
        let reg = Registry::builtin();
        let names = reg.names();
        for n in ["fgrav", "pfgrav", "integrate", "boundary", "ptcollide", "hscollide", "dummy"] {
            assert_eq!(names.iter().filter(|x| **x == n).count(), 1, "{n}");
        }
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = Registry::builtin();
        assert!(reg.register(Box::new(dummy::DummyFactory)).is_err());
    }
}
