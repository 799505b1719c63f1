//! On-disk layout of a trajectory ("universe") file.
//!
//! ```text
//! Header:  magic[32, NUL padded], version: u32, slice_count: u64
//! Slice:   time: u64, nbody: u64, bound_min: 3 x f64, bound_max: 3 x f64,
//!          nbody x Particle { flags: u32, uflags: u32, mass, charge, radius: f64,
//!                             pos, vel, acc: 3 x f64 }
//! Index:   slice_count x i64 byte offsets
//! ```
//!
//! Everything is little-endian and packed (no padding between fields).

use crate::error::{Error, Result};
use crate::simulation::states::{NVec3, Particle, Slice};

pub const MAGIC: &[u8] = b"SymUniverse Universe Data File";
pub const MAGIC_LEN: usize = 32;
pub const VERSION: u32 = 1;

pub const HEADER_SIZE: u64 = MAGIC_LEN as u64 + 4 + 8;
pub const SLICE_PREFIX_SIZE: u64 = 8 + 8 + 6 * 8;
pub const PARTICLE_SIZE: u64 = 4 + 4 + 3 * 8 + 9 * 8;
pub const INDEX_ENTRY_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub slice_count: u64,
}

impl Header {
    pub fn new(slice_count: u64) -> Self {
        Self {
            version: VERSION,
            slice_count,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut out = [0u8; HEADER_SIZE as usize];
        out[..MAGIC.len()].copy_from_slice(MAGIC);
        out[MAGIC_LEN..MAGIC_LEN + 4].copy_from_slice(&self.version.to_le_bytes());
        out[MAGIC_LEN + 4..].copy_from_slice(&self.slice_count.to_le_bytes());
        out
    }

    /// Decode and validate magic and version
    pub fn decode(raw: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        let magic = &raw[..MAGIC_LEN];
        let padding_ok = magic[MAGIC.len()..].iter().all(|&b| b == 0);
        if &magic[..MAGIC.len()] != MAGIC || !padding_ok {
            return Err(Error::Format(
                "not a universe data file (bad magic string)".into(),
            ));
        }

        let mut r = Reader::new(&raw[MAGIC_LEN..]);
        let version = r.u32();
        if version != VERSION {
            return Err(Error::Format(format!(
                "universe data file version mismatch: file is {version}, need {VERSION}"
            )));
        }
        Ok(Self {
            version,
            slice_count: r.u64(),
        })
    }
}

/// Size in bytes of a slice body holding `nbody` particles
pub fn slice_size(nbody: u64) -> u64 {
    SLICE_PREFIX_SIZE + nbody * PARTICLE_SIZE
}

/// Fixed-size slice prefix as stored on disk
#[derive(Debug, Clone, Copy)]
pub struct SlicePrefix {
    pub time: u64,
    pub nbody: u64,
    pub bound_min: NVec3,
    pub bound_max: NVec3,
}

impl SlicePrefix {
    pub fn decode(raw: &[u8; SLICE_PREFIX_SIZE as usize]) -> Self {
        let mut r = Reader::new(raw);
        Self {
            time: r.u64(),
            nbody: r.u64(),
            bound_min: r.vec3(),
            bound_max: r.vec3(),
        }
    }
}

/// Serialize a whole slice body (prefix followed by particle records)
pub fn encode_slice(s: &Slice) -> Vec<u8> {
    let mut out = Vec::with_capacity(slice_size(s.nbody() as u64) as usize);
    out.extend_from_slice(&s.time.to_le_bytes());
    out.extend_from_slice(&(s.nbody() as u64).to_le_bytes());
    put_vec3(&mut out, &s.bound_min);
    put_vec3(&mut out, &s.bound_max);
    for p in &s.bodies {
        encode_particle(&mut out, p);
    }
    out
}

pub fn encode_particle(out: &mut Vec<u8>, p: &Particle) {
    out.extend_from_slice(&p.flags.to_le_bytes());
    out.extend_from_slice(&p.uflags.to_le_bytes());
    out.extend_from_slice(&p.mass.to_le_bytes());
    out.extend_from_slice(&p.charge.to_le_bytes());
    out.extend_from_slice(&p.radius.to_le_bytes());
    put_vec3(out, &p.pos);
    put_vec3(out, &p.vel);
    put_vec3(out, &p.acc);
}

/// Decode `raw.len() / PARTICLE_SIZE` consecutive particle records
pub fn decode_particles(raw: &[u8], out: &mut Vec<Particle>) {
    for rec in raw.chunks_exact(PARTICLE_SIZE as usize) {
        let mut r = Reader::new(rec);
        out.push(Particle {
            flags: r.u32(),
            uflags: r.u32(),
            mass: r.f64(),
            charge: r.f64(),
            radius: r.f64(),
            pos: r.vec3(),
            vel: r.vec3(),
            acc: r.vec3(),
        });
    }
}

pub fn encode_index(index: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(index.len() * INDEX_ENTRY_SIZE as usize);
    for off in index {
        out.extend_from_slice(&off.to_le_bytes());
    }
    out
}

pub fn decode_index(raw: &[u8]) -> Vec<i64> {
    raw.chunks_exact(INDEX_ENTRY_SIZE as usize)
        .map(|c| {
            let mut r = Reader::new(c);
            r.i64()
        })
        .collect()
}

fn put_vec3(out: &mut Vec<u8>, v: &NVec3) {
    out.extend_from_slice(&v.x.to_le_bytes());
    out.extend_from_slice(&v.y.to_le_bytes());
    out.extend_from_slice(&v.z.to_le_bytes());
}

/// Little-endian field reader over a buffer whose length was checked by the caller
struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut b = [0u8; N];
        b.copy_from_slice(&self.buf[self.at..self.at + N]);
        self.at += N;
        b
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }

    fn vec3(&mut self) -> NVec3 {
        NVec3::new(self.f64(), self.f64(), self.f64())
    }
}
