//! Fixed-step time integration stage
//!
//! Advances every live particle by one timestep with either the explicit
//! `pre` update or the symplectic `leapfrog` update, then applies the
//! configured boundary rule to that particle.

use log::{error, warn};

use crate::error::{Error, Result};
use crate::simulation::boundaries::{bounds_of, Boundary};
use crate::simulation::stage::{
    f64_value, required, unknown_option, Control, Options, Stage, StageFactory,
};
use crate::simulation::states::{Particle, Slice};

const INTEGRATE_NAME: &str = "integrate";
pub const DEFAULT_TIMESTEP: f64 = 1.0;

/// Integration update order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Position from the pre-step velocity: x += v dt; v += a dt
    Pre,
    /// Kick then drift: v += a dt; x += v dt
    #[default]
    Leapfrog,
}

impl Method {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pre" => Ok(Method::Pre),
            "leapfrog" => Ok(Method::Leapfrog),
            other => Err(Error::config(format!(
                "[{INTEGRATE_NAME}] method must be one of pre or leapfrog (got {other})"
            ))),
        }
    }

    /// Advance one particle by `dt`
    #[inline]
    pub fn step(self, p: &mut Particle, dt: f64) {
        match self {
            Method::Pre => {
                p.pos += p.vel * dt;
                p.vel += p.acc * dt;
            }
            Method::Leapfrog => {
                p.vel += p.acc * dt;
                p.pos += p.vel * dt;
            }
        }
    }
}

pub struct IntegrateFactory;

impl StageFactory for IntegrateFactory {
    fn name(&self) -> &'static str {
        INTEGRATE_NAME
    }

    fn explain(&self) -> String {
        [
            "[integrate] Integrates accelerations into velocities and positions, then applies boundaries. O(N).",
            "[integrate] Place it after the force stages and before collision detection.",
            "[integrate] Options:",
            "[integrate]   method=pre|leapfrog (default: leapfrog)",
            "[integrate]     pre:      positions advance with the pre-step velocity",
            "[integrate]     leapfrog: velocity first, then position (symplectic)",
            "[integrate]   timestep=<dt> (alias dt): time per slice, > 0 (default: 1.0)",
            "[integrate]   boundary=periodic|elastic|diffuse|none (default: periodic)",
            "[integrate]   c=<speed>: abort the run if any particle moves faster than this",
            "[integrate] Example: -m integrate[method=leapfrog,timestep=0.01,boundary=elastic]",
        ]
        .join("\n")
    }

    fn configure(&self, options: &str) -> Result<Box<dyn Stage>> {
        let mut stage = Integrate {
            method: Method::default(),
            timestep: DEFAULT_TIMESTEP,
            boundary: Boundary::default(),
            speed_limit: None,
        };

        for (key, value) in Options::parse(options).iter() {
            match key {
                "method" => stage.method = Method::parse(required(INTEGRATE_NAME, key, value)?)?,
                "timestep" | "dt" => {
                    let dt = f64_value(INTEGRATE_NAME, key, value)?;
                    if dt <= 0.0 {
                        return Err(Error::config(format!(
                            "[{INTEGRATE_NAME}] timestep must be greater than zero"
                        )));
                    }
                    stage.timestep = dt;
                }
                "boundary" => {
                    stage.boundary =
                        Boundary::parse(INTEGRATE_NAME, required(INTEGRATE_NAME, key, value)?)?
                }
                "c" => {
                    let c = f64_value(INTEGRATE_NAME, key, value)?;
                    if c <= 0.0 {
                        return Err(Error::config(format!(
                            "[{INTEGRATE_NAME}] speed limit c must be greater than zero"
                        )));
                    }
                    stage.speed_limit = Some(c);
                }
                other => {
                    return Err(unknown_option(
                        INTEGRATE_NAME,
                        other,
                        &["method", "timestep", "boundary", "c"],
                    ))
                }
            }
        }

        if stage.boundary == Boundary::None {
            warn!("[{INTEGRATE_NAME}] boundary=none: make sure another stage enforces boundaries");
        }
        Ok(Box::new(stage))
    }
}

#[derive(Debug, Clone)]
pub struct Integrate {
    pub method: Method,
    pub timestep: f64,
    pub boundary: Boundary,
    pub speed_limit: Option<f64>,
}

impl Stage for Integrate {
    fn name(&self) -> &'static str {
        INTEGRATE_NAME
    }

    fn execute(&mut self, _prev: &Slice, cur: &mut Slice) -> Control {
        let (lo, hi) = bounds_of(cur);
        let mut ret = Control::OK;

        for (i, p) in cur.bodies.iter_mut().enumerate() {
            if p.is_deleted() {
                continue;
            }
            self.method.step(p, self.timestep);

            if let Some(c) = self.speed_limit {
                let speed = p.vel.norm();
                if !(speed <= c) {
                    error!("[{INTEGRATE_NAME}] particle {i} moves at {speed}, above the limit {c}");
                    return ret | Control::ABORT;
                }
            }

            ret |= self.boundary.apply(&lo, &hi, p);
        }
        ret
    }
}
