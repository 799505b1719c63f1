//! Boundary conditions on the slice's axis-aligned box.
//!
//! `Boundary` is applied per particle and per axis independently; it is used
//! both by the `integrate` stage (after each particle's update) and by the
//! standalone `boundary` stage.

use log::warn;

use crate::error::{Error, Result};
use crate::simulation::stage::{unknown_option, Control, Options, Stage, StageFactory};
use crate::simulation::states::{Particle, Slice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boundary {
    /// Leave through one face, re-enter through the opposite one
    #[default]
    Periodic,
    /// Reflect off the faces, any number of times per step
    Elastic,
    /// Escape: the particle is deleted
    Diffuse,
    /// Someone else handles boundaries
    None,
}

impl Boundary {
    pub fn parse(stage: &str, value: &str) -> Result<Self> {
        match value {
            "periodic" => Ok(Boundary::Periodic),
            "elastic" => Ok(Boundary::Elastic),
            "diffuse" => Ok(Boundary::Diffuse),
            "none" => Ok(Boundary::None),
            other => Err(Error::config(format!(
                "[{stage}] boundary must be one of periodic, elastic, diffuse or none (got {other})"
            ))),
        }
    }

    /// Apply to one particle inside `bounds`; may request REPACK
    pub fn apply(self, bound_min: &[f64; 3], bound_max: &[f64; 3], p: &mut Particle) -> Control {
        match self {
            Boundary::None => Control::OK,
            Boundary::Diffuse => {
                let outside = (0..3).any(|k| p.pos[k] > bound_max[k] || p.pos[k] < bound_min[k]);
                if outside {
                    p.mark_deleted();
                    Control::REPACK
                } else {
                    Control::OK
                }
            }
            Boundary::Periodic => {
                for k in 0..3 {
                    p.pos[k] = wrap_periodic(p.pos[k], bound_min[k], bound_max[k]);
                }
                Control::OK
            }
            Boundary::Elastic => {
                for k in 0..3 {
                    p.pos[k] = reflect_elastic(p.pos[k], bound_min[k], bound_max[k]);
                }
                Control::OK
            }
        }
    }
}

/// Box corners of a slice as plain arrays
pub fn bounds_of(s: &Slice) -> ([f64; 3], [f64; 3]) {
    (
        [s.bound_min.x, s.bound_min.y, s.bound_min.z],
        [s.bound_max.x, s.bound_max.y, s.bound_max.z],
    )
}

/// Periodic wrap on one axis via the fractional part of (x - min) / width
pub fn wrap_periodic(x: f64, min: f64, max: f64) -> f64 {
    let width = max - min;
    if !(width > 0.0) {
        return x;
    }
    if x > max {
        min + ((x - min) / width).fract() * width
    } else if x < min {
        max - ((min - x) / width).fract() * width
    } else {
        x
    }
}

/// Elastic reflection on one axis.
///
/// `n` whole widths travelled past `min` plus a remainder `off`: an odd `n`
/// leaves the particle heading back from the max face (`max - off`), an even
/// `n` from the min face (`min + off`). The same rule holds on both sides.
pub fn reflect_elastic(x: f64, min: f64, max: f64) -> f64 {
    let width = max - min;
    if !(width > 0.0) || (x >= min && x <= max) {
        return x;
    }
    let travelled = (x - min).abs() / width;
    let bounces = travelled.trunc();
    let off = travelled.fract() * width;
    if bounces % 2.0 == 1.0 {
        max - off
    } else {
        min + off
    }
}

pub struct BoundaryFactory;

const BOUNDARY_NAME: &str = "boundary";

impl StageFactory for BoundaryFactory {
    fn name(&self) -> &'static str {
        BOUNDARY_NAME
    }

    fn explain(&self) -> String {
        [
            "[boundary] Enforces boundary conditions on the slice's bounding box. O(N).",
            "[boundary] Place it near the end of the pipeline, after collision detection.",
            "[boundary] Options:",
            "[boundary]   boundary=periodic|elastic|diffuse|none (default: periodic)",
            "[boundary]     periodic: leave through one face, come back through the other",
            "[boundary]     elastic:  bounce off the faces",
            "[boundary]     diffuse:  escape the system and get deleted",
            "[boundary]     none:     do nothing; another stage must handle boundaries",
            "[boundary] Example: -m boundary[boundary=periodic]",
        ]
        .join("\n")
    }

    fn configure(&self, options: &str) -> Result<Box<dyn Stage>> {
        let mut boundary = Boundary::default();
        for (key, value) in Options::parse(options).iter() {
            match key {
                "boundary" => {
                    let v = crate::simulation::stage::required(BOUNDARY_NAME, key, value)?;
                    boundary = Boundary::parse(BOUNDARY_NAME, v)?;
                }
                other => return Err(unknown_option(BOUNDARY_NAME, other, &["boundary"])),
            }
        }
        if boundary == Boundary::None {
            warn!("[{BOUNDARY_NAME}] boundary=none: make sure another stage enforces boundaries");
        }
        Ok(Box::new(BoundaryStage { boundary }))
    }
}

pub struct BoundaryStage {
    pub boundary: Boundary,
}

impl Stage for BoundaryStage {
    fn name(&self) -> &'static str {
        BOUNDARY_NAME
    }

    fn execute(&mut self, _prev: &Slice, cur: &mut Slice) -> Control {
        let (lo, hi) = bounds_of(cur);
        let mut ret = Control::OK;
        for p in cur.bodies.iter_mut().filter(|p| !p.is_deleted()) {
            ret |= self.boundary.apply(&lo, &hi, p);
        }
        ret
    }
}
