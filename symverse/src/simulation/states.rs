//! Core state types for the particle simulation.
//!
//! Defines the per-instant data model:
//! - `NVec3`    3-vector (position, velocity, acceleration)
//! - `Particle` one point/sphere body with system flags and user flags
//! - `Slice`    one recorded time step: time + bounding box + particle array
//!
//! Index correspondence between consecutive slices is part of the contract:
//! body `i` of a slice (not marked CREATE) is body `i` of the previous slice.

use nalgebra::Vector3;

use crate::error::{Error, Result};

pub type NVec3 = Vector3<f64>;

/// System-owned particle flag bits (`Particle::flags`)
pub mod flags {
    /// Marked for removal at the next repack
    pub const DELETE: u32 = 1;
    /// Created during the current step, has no counterpart in the previous slice
    pub const CREATE: u32 = 2;
    /// Exempt from collision processing
    pub const NOCOLL: u32 = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Particle {
    pub flags: u32,  // system flags, see `flags`
    pub uflags: u32, // caller flags, never interpreted by the engine
    pub mass: f64,
    pub charge: f64,
    pub radius: f64,
    pub pos: NVec3, // position
    pub vel: NVec3, // velocity
    pub acc: NVec3, // acceleration
}

impl Particle {
    /// Uncharged particle with no flags and zero acceleration
    pub fn new(mass: f64, radius: f64, pos: NVec3, vel: NVec3) -> Self {
        Self {
            mass,
            radius,
            pos,
            vel,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.flags & flags::DELETE != 0
    }

    #[inline]
    pub fn is_created(&self) -> bool {
        self.flags & flags::CREATE != 0
    }

    /// Live and not excluded from collisions
    #[inline]
    pub fn collides(&self) -> bool {
        self.flags & (flags::DELETE | flags::NOCOLL) == 0
    }

    #[inline]
    pub fn mark_deleted(&mut self) {
        self.flags |= flags::DELETE;
    }

    /// 1/2 m |v|^2
    #[inline]
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.vel.dot(&self.vel)
    }

    #[inline]
    pub fn momentum(&self) -> NVec3 {
        self.mass * self.vel
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub time: u64,             // step counter
    pub bound_min: NVec3,      // lower corner of the bounding box
    pub bound_max: NVec3,      // upper corner of the bounding box
    pub bodies: Vec<Particle>, // ordered particle array
}

impl Slice {
    pub fn new(time: u64, bound_min: NVec3, bound_max: NVec3, bodies: Vec<Particle>) -> Self {
        Self {
            time,
            bound_min,
            bound_max,
            bodies,
        }
    }

    /// Number of bodies, including any marked DELETE
    #[inline]
    pub fn nbody(&self) -> usize {
        self.bodies.len()
    }

    /// Deep copy that starts the next pipeline run: time advanced by one,
    /// CREATE cleared on every body.
    pub fn successor(&self) -> Self {
        let mut next = self.clone();
        next.time += 1;
        next.clear_create();
        next
    }

    pub fn clear_create(&mut self) {
        for b in self.bodies.iter_mut() {
            b.flags &= !flags::CREATE;
        }
    }

    /// Append a new body at the end, marked CREATE
    pub fn append_particle(&mut self, mut p: Particle) {
        p.flags |= flags::CREATE;
        self.bodies.push(p);
    }

    /// Physically remove DELETE-flagged bodies, preserving survivor order and
    /// stripping CREATE from the survivors.
    pub fn repack(&mut self) -> Result<()> {
        let mut packed: Vec<Particle> = Vec::new();
        packed.try_reserve_exact(self.bodies.len()).map_err(|e| {
            Error::Allocation(format!("repack of {} bodies: {e}", self.bodies.len()))
        })?;

        for b in self.bodies.iter() {
            if b.is_deleted() {
                continue;
            }
            let mut kept = *b;
            kept.flags &= !flags::CREATE;
            packed.push(kept);
        }
        packed.shrink_to_fit();
        self.bodies = packed;
        Ok(())
    }

    /// Bodies not marked DELETE
    pub fn live(&self) -> impl Iterator<Item = &Particle> {
        self.bodies.iter().filter(|b| !b.is_deleted())
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.live().map(Particle::kinetic_energy).sum()
    }

    pub fn momentum(&self) -> NVec3 {
        self.live().fold(NVec3::zeros(), |acc, b| acc + b.momentum())
    }
}
