//! Gravitational acceleration stages
//!
//! `fgrav` is the direct O(N^2) pair sum; `pfgrav` is the same sum split over
//! a fixed number of rayon workers, each writing to a private buffer that is
//! merged after the join.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Error, Result};
use crate::simulation::stage::{
    bool_value, f64_value, unknown_option, usize_value, Control, Options, Stage, StageFactory,
};
use crate::simulation::states::{NVec3, Particle, Slice};

const FGRAV_NAME: &str = "fgrav";
const PFGRAV_NAME: &str = "pfgrav";

/// Parameters shared by both gravity stages
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GravityParams {
    pub cleara: bool,   // zero accelerations before accumulating
    pub plummer2: f64,  // Plummer softening length, squared
    pub G: f64,         // gravitational constant
}

impl Default for GravityParams {
    fn default() -> Self {
        Self {
            cleara: false,
            plummer2: 0.0,
            G: 1.0,
        }
    }
}

/// Add the contribution of every pair (i, j > i) for the outer indices in
/// `rows` into `out`. Deleted bodies are skipped on both sides.
pub fn accumulate_pairs(
    bodies: &[Particle],
    rows: impl Iterator<Item = usize>,
    params: &GravityParams,
    out: &mut [NVec3],
) {
    let n = bodies.len();
    for i in rows {
        // bi: body i (left side of the pair)
        let bi = &bodies[i];
        if bi.is_deleted() {
            continue;
        }

        for j in (i + 1)..n {
            let bj = &bodies[j];
            if bj.is_deleted() {
                continue;
            }

            // r points from j to i, so i is pulled along -r and j along +r
            let r = bi.pos - bj.pos;

            // softened squared separation |r|^2 + plummer^2
            let d2 = r.dot(&r) + params.plummer2;
            if d2 == 0.0 {
                // coincident point masses: no direction to pull along
                continue;
            }

            // G / |r_soft|^3
            let inv_r = d2.sqrt().recip();
            let f = params.G * inv_r * inv_r * inv_r;

            // equal and opposite
            out[i] -= f * bj.mass * r;
            out[j] += f * bi.mass * r;
        }
    }
}

fn clear_accelerations(s: &mut Slice) {
    for b in s.bodies.iter_mut() {
        b.acc = NVec3::zeros();
    }
}

fn parse_gravity(
    stage: &str,
    options: &str,
    mut threads: Option<&mut usize>,
) -> Result<GravityParams> {
    let mut params = GravityParams::default();
    for (key, value) in Options::parse(options).iter() {
        match key {
            "cleara" => params.cleara = bool_value(stage, key, value)?,
            "plummer" => {
                let p = f64_value(stage, key, value)?;
                if p < 0.0 {
                    return Err(Error::config(format!("[{stage}] plummer must be >= 0")));
                }
                params.plummer2 = p * p;
            }
            "G" => params.G = f64_value(stage, key, value)?,
            "tc" if threads.is_some() => {
                let tc = usize_value(stage, key, value)?;
                if tc < 1 {
                    return Err(Error::config(format!("[{stage}] thread count must be at least 1")));
                }
                if let Some(t) = threads.as_deref_mut() {
                    *t = tc;
                }
            }
            other => {
                let valid: &[&str] = if threads.is_some() {
                    &["cleara", "plummer", "G", "tc"]
                } else {
                    &["cleara", "plummer", "G"]
                };
                return Err(unknown_option(stage, other, valid));
            }
        }
    }
    Ok(params)
}

fn explain_gravity(stage: &str, extra: &[&str]) -> String {
    let mut lines = vec![
        format!("[{stage}] Calculates Newtonian gravitational acceleration over all pairs. O(N^2)."),
        format!("[{stage}] Force stages come first in the pipeline, then integration and collisions."),
        format!("[{stage}] Options:"),
        format!("[{stage}]   cleara=0|1: zero accelerations before accumulating (default 0)."),
        format!("[{stage}]     The first force stage in the pipeline should set cleara=1."),
        format!("[{stage}]   plummer=<length>: Plummer softening distance (default 0)."),
        format!("[{stage}]   G=<value>: gravitational constant (default 1)."),
    ];
    lines.extend(extra.iter().map(|l| format!("[{stage}]   {l}")));
    lines.join("\n")
}

// =========================================================================================
// serial
// =========================================================================================

pub struct GravityFactory;

impl StageFactory for GravityFactory {
    fn name(&self) -> &'static str {
        FGRAV_NAME
    }

    fn explain(&self) -> String {
        let mut s = explain_gravity(FGRAV_NAME, &[]);
        s.push_str(&format!("\n[{FGRAV_NAME}] Example: -m fgrav[cleara=1,plummer=0.01]"));
        s
    }

    fn configure(&self, options: &str) -> Result<Box<dyn Stage>> {
        let params = parse_gravity(FGRAV_NAME, options, None)?;
        Ok(Box::new(Gravity { params }))
    }
}

pub struct Gravity {
    pub params: GravityParams,
}

impl Stage for Gravity {
    fn name(&self) -> &'static str {
        FGRAV_NAME
    }

    fn execute(&mut self, _prev: &Slice, cur: &mut Slice) -> Control {
        if self.params.cleara {
            clear_accelerations(cur);
        }
        let mut acc = vec![NVec3::zeros(); cur.nbody()];
        accumulate_pairs(&cur.bodies, 0..cur.nbody(), &self.params, &mut acc);
        for (b, a) in cur.bodies.iter_mut().zip(acc.iter()) {
            if !b.is_deleted() {
                b.acc += *a;
            }
        }
        Control::OK
    }
}

// =========================================================================================
// threaded
// =========================================================================================

pub struct ThreadedGravityFactory;

impl StageFactory for ThreadedGravityFactory {
    fn name(&self) -> &'static str {
        PFGRAV_NAME
    }

    fn explain(&self) -> String {
        let mut s = explain_gravity(
            PFGRAV_NAME,
            &[
                "tc=<n>: number of worker threads (default 1, should almost always be set).",
                "  Rows are dealt round robin (row mod tc); each worker owns a private buffer.",
            ],
        );
        s.push_str(&format!("\n[{PFGRAV_NAME}] Example: -m pfgrav[cleara=1,tc=8]"));
        s
    }

    fn configure(&self, options: &str) -> Result<Box<dyn Stage>> {
        let mut tc = 1usize;
        let params = parse_gravity(PFGRAV_NAME, options, Some(&mut tc))?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(tc)
            .thread_name(|i| format!("{PFGRAV_NAME}-{i}"))
            .build()
            .map_err(|e| Error::config(format!("[{PFGRAV_NAME}] cannot start {tc} workers: {e}")))?;
        Ok(Box::new(ThreadedGravity { params, tc, pool }))
    }
}

pub struct ThreadedGravity {
    pub params: GravityParams,
    pub tc: usize,
    pool: ThreadPool,
}

impl ThreadedGravity {
    /// Per-worker acceleration buffers, in worker order
    pub fn worker_buffers(&self, bodies: &[Particle]) -> Vec<Vec<NVec3>> {
        let n = bodies.len();
        let tc = self.tc;
        let params = self.params;
        self.pool.install(|| {
            (0..tc)
                .into_par_iter()
                .map(|w| {
                    let mut acc = vec![NVec3::zeros(); n];
                    accumulate_pairs(bodies, (w..n).step_by(tc), &params, &mut acc);
                    acc
                })
                .collect()
        })
    }
}

impl Stage for ThreadedGravity {
    fn name(&self) -> &'static str {
        PFGRAV_NAME
    }

    fn execute(&mut self, _prev: &Slice, cur: &mut Slice) -> Control {
        if self.params.cleara {
            clear_accelerations(cur);
        }

        let buffers = self.worker_buffers(&cur.bodies);

        // merge after the join, worker order fixed
        for (i, b) in cur.bodies.iter_mut().enumerate() {
            if b.is_deleted() {
                continue;
            }
            for buf in &buffers {
                b.acc += buf[i];
            }
        }
        Control::OK
    }
}
