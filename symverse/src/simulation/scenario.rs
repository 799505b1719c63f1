//! Build the initial slice of a run from configuration
//!
//! Takes a `ScenarioConfig` (YAML-facing) and produces the runtime `Slice`
//! the driver starts from, checking that every vector has three components.

use crate::configuration::config::{BodyConfig, ScenarioConfig};
use crate::error::{Error, Result};
use crate::simulation::states::{NVec3, Particle, Slice};

pub struct Scenario;

impl Scenario {
    pub fn build_slice(cfg: &ScenarioConfig) -> Result<Slice> {
        let bound_min = vec3("bound_min", &cfg.bound_min)?;
        let bound_max = vec3("bound_max", &cfg.bound_max)?;

        // Bodies: map `BodyConfig` -> runtime `Particle` using nalgebra vectors
        let bodies = cfg
            .bodies
            .iter()
            .enumerate()
            .map(|(i, bc)| particle(i, bc))
            .collect::<Result<Vec<_>>>()?;

        Ok(Slice::new(cfg.time, bound_min, bound_max, bodies))
    }
}

fn particle(i: usize, bc: &BodyConfig) -> Result<Particle> {
    Ok(Particle {
        flags: bc.flags,
        uflags: bc.uflags,
        mass: bc.mass,
        charge: bc.charge,
        radius: bc.radius,
        pos: vec3(&format!("bodies[{i}].pos"), &bc.pos)?,
        vel: vec3(&format!("bodies[{i}].vel"), &bc.vel)?,
        acc: NVec3::zeros(),
    })
}

fn vec3(what: &str, v: &[f64]) -> Result<NVec3> {
    match v {
        [x, y, z] => Ok(NVec3::new(*x, *y, *z)),
        _ => Err(Error::config(format!(
            "scenario {what} needs 3 components, got {}",
            v.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(pos: Vec<f64>) -> BodyConfig {
        BodyConfig {
            pos,
            vel: vec![0.0, 0.0, 0.0],
            mass: 2.0,
            radius: 0.1,
            charge: 0.0,
            flags: 0,
            uflags: 7,
        }
    }

    #[test]
    fn builds_bodies_in_order() {
        let cfg = ScenarioConfig {
            time: 3,
            bound_min: vec![0.0; 3],
            bound_max: vec![1.0; 3],
            bodies: vec![body(vec![0.1, 0.2, 0.3]), body(vec![0.4, 0.5, 0.6])],
        };
        let s = Scenario::build_slice(&cfg).unwrap();
        assert_eq!(s.time, 3);
        assert_eq!(s.nbody(), 2);
        assert_eq!(s.bodies[1].pos, NVec3::new(0.4, 0.5, 0.6));
        assert_eq!(s.bodies[0].uflags, 7);
    }

    #[test]
    fn short_vectors_are_rejected() {
        let cfg = ScenarioConfig {
            time: 0,
            bound_min: vec![0.0; 3],
            bound_max: vec![1.0; 3],
            bodies: vec![body(vec![0.1, 0.2])],
        };
        let err = Scenario::build_slice(&cfg).unwrap_err().to_string();
        assert!(err.contains("bodies[0].pos"));
    }
}
