//! Pairwise elastic collision stages
//!
//! Each pair of colliding bodies travels in a straight line from its position
//! in `prev` with its velocity in `cur` over one timestep. That is how the
//! leapfrog integrator moves them; the step length itself is recovered from
//! the slice pair (see [`infer_timestep`]). If the two
//! trajectories come within `R` of each other while approaching, the impulse
//! along the line of centres at contact is exchanged and the remaining part of
//! the step is replayed with the new velocities.
//!
//! - `ptcollide`: point particles, R = 0 (only exact hits)
//! - `hscollide`: hard spheres, R = r_i + r_j

use log::debug;

use crate::error::{Error, Result};
use crate::simulation::stage::{f64_value, unknown_option, Control, Options, Stage, StageFactory};
use crate::simulation::states::{NVec3, Particle, Slice};

const PTCOLLIDE_NAME: &str = "ptcollide";
const HSCOLLIDE_NAME: &str = "hscollide";

/// How the contact distance of a pair is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    Point,
    HardSphere,
}

impl Contact {
    #[inline]
    fn distance(self, a: &Particle, b: &Particle) -> f64 {
        match self {
            Contact::Point => 0.0,
            Contact::HardSphere => a.radius + b.radius,
        }
    }

    fn stage_name(self) -> &'static str {
        match self {
            Contact::Point => PTCOLLIDE_NAME,
            Contact::HardSphere => HSCOLLIDE_NAME,
        }
    }
}

/// A pair found to touch within the step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Impact {
    pub tc: f64,       // time of contact into the step, in [0, dt]
    pub normal: NVec3, // unit vector from i to j at contact
}

/// Contact test for bodies `i` and `j`.
///
/// `pp` is `prev_j.pos - prev_i.pos`, `v` is `cur_j.vel - cur_i.vel`.
pub fn find_impact(pp: NVec3, v: NVec3, r: f64, dt: f64) -> Option<Impact> {
    let v2 = v.dot(&v);
    if v2 == 0.0 {
        return None;
    }
    let approach = pp.dot(&v);
    if approach >= 0.0 {
        // moving apart or sideways
        return None;
    }

    // closest approach along the relative trajectory
    let t0 = -approach / v2;
    let chi = pp + v * t0;
    let b = chi.norm();
    if b > r {
        return None;
    }

    let vnorm = v2.sqrt();
    let depth = (r * r - b * b).max(0.0).sqrt();
    let tc = t0 - depth / vnorm;
    if tc > dt {
        return None;
    }

    let ux = v / vnorm;
    let normal = if b > 0.0 {
        let uy = chi / b;
        (uy * b - ux * depth) / r
    } else {
        -ux
    };

    Some(Impact {
        tc: tc.max(0.0),
        normal,
    })
}

/// Length of the step that moved `prev` into `cur`.
///
/// Each moving body gives `(cur.pos - prev.pos) / cur.vel` along its fastest
/// axis. A body wrapped by a periodic boundary gives a negative estimate and
/// one reflected by an elastic wall a shorter one, so the largest positive
/// estimate wins. `None` when no body moved.
pub fn infer_timestep(prev: &Slice, cur: &Slice) -> Option<f64> {
    let n = prev.nbody().min(cur.nbody());
    let mut best: Option<f64> = None;
    for (p, c) in prev.bodies[..n].iter().zip(&cur.bodies[..n]) {
        if c.is_deleted() || c.is_created() {
            continue;
        }
        let k = c.vel.iamax();
        if c.vel[k] == 0.0 {
            continue;
        }
        let dt = (c.pos[k] - p.pos[k]) / c.vel[k];
        if dt.is_finite() && dt > 0.0 {
            best = Some(best.map_or(dt, |b| b.max(dt)));
        }
    }
    best
}

/// Exchange momentum along the impact normal and replay the rest of the step.
/// Returns false, leaving both bodies untouched, when the pair has no mass.
pub fn resolve(bi: &mut Particle, bj: &mut Particle, impact: &Impact, dt: f64) -> bool {
    let n = impact.normal;
    let v = bj.vel - bi.vel;
    let msum = bi.mass + bj.mass;
    if !(msum > 0.0) {
        return false;
    }
    let delta = 2.0 * v.dot(&n) / msum;

    let dvi = n * (bj.mass * delta);
    let dvj = -n * (bi.mass * delta);
    bi.vel += dvi;
    bj.vel += dvj;

    // positions were advanced with the old velocity for the whole step
    let rest = dt - impact.tc;
    bi.pos += dvi * rest;
    bj.pos += dvj * rest;
    true
}

pub struct CollisionFactory {
    contact: Contact,
}

impl CollisionFactory {
    pub fn point() -> Self {
        Self {
            contact: Contact::Point,
        }
    }

    pub fn hard_sphere() -> Self {
        Self {
            contact: Contact::HardSphere,
        }
    }
}

impl StageFactory for CollisionFactory {
    fn name(&self) -> &'static str {
        self.contact.stage_name()
    }

    fn explain(&self) -> String {
        let stage = self.contact.stage_name();
        let what = match self.contact {
            Contact::Point => "Elastic collisions between point particles (exact hits only). O(N^2).",
            Contact::HardSphere => "Elastic collisions between hard spheres of the given radii. O(N^2).",
        };
        [
            format!("[{stage}] {what}"),
            format!("[{stage}] Place it after integrate; particles marked NOCOLL or CREATE are ignored."),
            format!("[{stage}] Bodies are swept with their new velocity, as integrate[method=leapfrog] moves them;"),
            format!("[{stage}] after method=pre the contact times are approximate."),
            format!("[{stage}] The step length is recovered from how far the bodies moved."),
            format!("[{stage}] Options:"),
            format!("[{stage}]   timestep=<dt> (alias dt): used only when no body moved (default: none, skip the step)"),
            format!("[{stage}] Example: -m {stage}[timestep=0.01]"),
        ]
        .join("\n")
    }

    fn configure(&self, options: &str) -> Result<Box<dyn Stage>> {
        let stage = self.contact.stage_name();
        let mut timestep = None;
        for (key, value) in Options::parse(options).iter() {
            match key {
                "timestep" | "dt" => {
                    let dt = f64_value(stage, key, value)?;
                    if !(dt > 0.0) {
                        return Err(Error::config(format!(
                            "[{stage}] timestep must be greater than zero"
                        )));
                    }
                    timestep = Some(dt);
                }
                other => return Err(unknown_option(stage, other, &["timestep"])),
            }
        }
        Ok(Box::new(Collision {
            contact: self.contact,
            timestep,
        }))
    }
}

pub struct Collision {
    pub contact: Contact,
    pub timestep: Option<f64>, // fallback when the step length cannot be recovered
}

impl Stage for Collision {
    fn name(&self) -> &'static str {
        self.contact.stage_name()
    }

    fn execute(&mut self, prev: &Slice, cur: &mut Slice) -> Control {
        let Some(dt) = infer_timestep(prev, cur).or(self.timestep) else {
            debug!("[{}] no body moved, nothing to sweep", self.contact.stage_name());
            return Control::OK;
        };
        // bodies created this step have no previous position
        let n = prev.nbody().min(cur.nbody());
        let eligible = |p: &Particle| p.collides() && !p.is_created();
        let mut count = 0usize;

        for i in 0..n {
            for j in (i + 1)..n {
                if !eligible(&cur.bodies[i]) || !eligible(&cur.bodies[j]) {
                    continue;
                }

                let pp = prev.bodies[j].pos - prev.bodies[i].pos;
                let v = cur.bodies[j].vel - cur.bodies[i].vel;
                let r = self.contact.distance(&cur.bodies[i], &cur.bodies[j]);

                if let Some(impact) = find_impact(pp, v, r, dt) {
                    let (head, tail) = cur.bodies.split_at_mut(j);
                    if resolve(&mut head[i], &mut tail[0], &impact, dt) {
                        count += 1;
                    }
                }
            }
        }

        if count > 0 {
            debug!("[{}] resolved {count} collisions", self.contact.stage_name());
        }
        Control::OK
    }
}
