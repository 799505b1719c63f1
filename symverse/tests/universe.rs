use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;

use symverse::storage::format::{slice_size, HEADER_SIZE, INDEX_ENTRY_SIZE, MAGIC_LEN};
use symverse::{Error, NVec3, Particle, Slice, Universe};

static NEXT: AtomicUsize = AtomicUsize::new(0);

/// Fresh path under the system temp dir; nothing exists there yet
pub fn temp_path(tag: &str) -> PathBuf {
    let n = NEXT.fetch_add(1, Ordering::SeqCst);
    let p = std::env::temp_dir().join(format!("symverse-{tag}-{}-{n}.univ", std::process::id()));
    let _ = fs::remove_file(&p);
    p
}

/// Slice with `n` bodies whose every field differs
pub fn sample_slice(time: u64, n: usize) -> Slice {
    let bodies = (0..n)
        .map(|i| {
            let k = i as f64 + time as f64 * 0.5;
            Particle {
                flags: (i % 8) as u32,
                uflags: 0xdead_0000 + i as u32,
                mass: 1.0 + k,
                charge: -0.25 * k,
                radius: 0.01 * (k + 1.0),
                pos: NVec3::new(k, -k, k * k),
                vel: NVec3::new(0.1, 0.2, 0.3) * k,
                acc: NVec3::new(-1.0, 1e-300, 1e300) * k,
            }
        })
        .collect();
    Slice::new(
        time,
        NVec3::new(-1.0, -2.0, -3.0),
        NVec3::new(1.0, 2.0, 3.0),
        bodies,
    )
}

fn bits(v: &NVec3) -> [u64; 3] {
    [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()]
}

/// Field-by-field bit identity (`==` would accept 0.0 for -0.0 and reject NaN)
pub fn assert_bit_identical(a: &Slice, b: &Slice) {
    assert_eq!(a.time, b.time);
    assert_eq!(bits(&a.bound_min), bits(&b.bound_min));
    assert_eq!(bits(&a.bound_max), bits(&b.bound_max));
    assert_eq!(a.nbody(), b.nbody());
    for (p, q) in a.bodies.iter().zip(b.bodies.iter()) {
        assert_eq!(p.flags, q.flags);
        assert_eq!(p.uflags, q.uflags);
        assert_eq!(p.mass.to_bits(), q.mass.to_bits());
        assert_eq!(p.charge.to_bits(), q.charge.to_bits());
        assert_eq!(p.radius.to_bits(), q.radius.to_bits());
        assert_eq!(bits(&p.pos), bits(&q.pos));
        assert_eq!(bits(&p.vel), bits(&q.vel));
        assert_eq!(bits(&p.acc), bits(&q.acc));
    }
}

// ==================================================================================
// Create / open
// ==================================================================================

#[test]
fn create_writes_empty_header() {
    let path = temp_path("create");
    let u = Universe::create(&path).unwrap();
    assert!(u.is_open());
    assert!(u.is_empty());
    drop(u);

    assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_SIZE);
    let raw = fs::read(&path).unwrap();
    assert!(raw.starts_with(b"SymUniverse Universe Data File\0\0"));

    let u = Universe::open(&path).unwrap();
    assert_eq!(u.len(), 0);
    drop(u);
    let _ = fs::remove_file(&path);
}

#[test]
fn create_refuses_existing_file() {
    let path = temp_path("exists");
    drop(Universe::create(&path).unwrap());
    match Universe::create(&path) {
        Err(Error::Io(e)) => assert_eq!(e.kind(), ErrorKind::AlreadyExists),
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
    let _ = fs::remove_file(&path);
}

#[test]
fn open_rejects_bad_magic() {
    let path = temp_path("magic");
    fs::write(&path, vec![b'x'; 128]).unwrap();
    assert!(matches!(Universe::open(&path), Err(Error::Format(_))));
    let _ = fs::remove_file(&path);
}

#[test]
fn open_rejects_short_file() {
    let path = temp_path("short");
    fs::write(&path, b"SymUniverse").unwrap();
    assert!(matches!(Universe::open(&path), Err(Error::Format(_))));
    let _ = fs::remove_file(&path);
}

#[test]
fn open_rejects_version_mismatch() {
    let path = temp_path("version");
    drop(Universe::create(&path).unwrap());

    let mut raw = fs::read(&path).unwrap();
    raw[MAGIC_LEN..MAGIC_LEN + 4].copy_from_slice(&2u32.to_le_bytes());
    fs::write(&path, &raw).unwrap();

    assert!(matches!(Universe::open(&path), Err(Error::Format(_))));
    let _ = fs::remove_file(&path);
}

#[test]
fn open_rejects_count_larger_than_file() {
    let path = temp_path("count");
    drop(Universe::create(&path).unwrap());

    let mut raw = fs::read(&path).unwrap();
    raw[MAGIC_LEN + 4..].copy_from_slice(&5u64.to_le_bytes());
    fs::write(&path, &raw).unwrap();

    assert!(matches!(Universe::open(&path), Err(Error::Format(_))));
    let _ = fs::remove_file(&path);
}

#[test]
fn truncated_slice_body_fails_to_read() {
    let path = temp_path("truncated");
    let mut u = Universe::create(&path).unwrap();
    u.append_slice(&sample_slice(0, 4)).unwrap();
    u.close().unwrap();

    // claim more bodies than the file holds
    let mut raw = fs::read(&path).unwrap();
    let nbody_at = HEADER_SIZE as usize + 8;
    raw[nbody_at..nbody_at + 8].copy_from_slice(&1000u64.to_le_bytes());
    fs::write(&path, &raw).unwrap();

    let mut u = Universe::open(&path).unwrap();
    match u.get_slice(0) {
        Err(Error::Io(e)) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
        other => panic!("expected UnexpectedEof, got {other:?}"),
    }
    drop(u);
    let _ = fs::remove_file(&path);
}

// ==================================================================================
// Append / read back
// ==================================================================================

#[test]
fn append_then_read_back_is_bit_identical() {
    let path = temp_path("roundtrip");
    let mut u = Universe::create(&path).unwrap();

    let mut odd = sample_slice(7, 3);
    odd.bodies[0].mass = -0.0;
    odd.bodies[1].charge = f64::NAN;
    odd.bodies[2].acc.z = f64::MIN_POSITIVE / 4.0;
    odd.bound_max.x = f64::INFINITY;

    u.append_slice(&odd).unwrap();
    assert_bit_identical(&u.get_slice(0).unwrap(), &odd);
    drop(u);
    let _ = fs::remove_file(&path);
}

#[test]
fn slice_count_grows_by_one_per_append() {
    let path = temp_path("monotonic");
    let mut u = Universe::create(&path).unwrap();
    let slices: Vec<Slice> = (0..6).map(|t| sample_slice(t, (t as usize * 3) % 5)).collect();

    for (i, s) in slices.iter().enumerate() {
        u.append_slice(s).unwrap();
        assert_eq!(u.len(), i as u64 + 1);
        for (j, expected) in slices.iter().take(i + 1).enumerate() {
            assert_bit_identical(&u.get_slice(j as u64).unwrap(), expected);
        }
    }
    assert_bit_identical(&u.get_first_slice().unwrap(), &slices[0]);
    assert_bit_identical(&u.get_last_slice().unwrap(), &slices[5]);
    u.close().unwrap();

    // everything survives a reopen
    let mut u = Universe::open_read_only(&path).unwrap();
    assert_eq!(u.len(), 6);
    for (j, expected) in slices.iter().enumerate() {
        assert_bit_identical(&u.get_slice(j as u64).unwrap(), expected);
    }
    drop(u);
    let _ = fs::remove_file(&path);
}

#[test]
fn file_layout_is_header_bodies_index() {
    let path = temp_path("layout");
    let mut u = Universe::create(&path).unwrap();
    u.append_slice(&sample_slice(0, 2)).unwrap();
    u.append_slice(&sample_slice(1, 5)).unwrap();
    u.close().unwrap();

    let raw = fs::read(&path).unwrap();
    let body0 = slice_size(2);
    let body1 = slice_size(5);
    assert_eq!(raw.len() as u64, HEADER_SIZE + body0 + body1 + 2 * INDEX_ENTRY_SIZE);

    let count = u64::from_le_bytes(raw[MAGIC_LEN + 4..HEADER_SIZE as usize].try_into().unwrap());
    assert_eq!(count, 2);

    let idx = &raw[(HEADER_SIZE + body0 + body1) as usize..];
    let off0 = i64::from_le_bytes(idx[..8].try_into().unwrap());
    let off1 = i64::from_le_bytes(idx[8..].try_into().unwrap());
    assert_eq!(off0 as u64, HEADER_SIZE);
    assert_eq!(off1 as u64, HEADER_SIZE + body0);
    let _ = fs::remove_file(&path);
}

#[test]
fn reopened_trajectory_accepts_more_slices() {
    let path = temp_path("reopen");
    let mut u = Universe::create(&path).unwrap();
    u.append_slice(&sample_slice(0, 1)).unwrap();
    u.close().unwrap();

    let mut u = Universe::open(&path).unwrap();
    u.append_slice(&sample_slice(1, 2)).unwrap();
    assert_eq!(u.len(), 2);
    assert_bit_identical(&u.get_slice(0).unwrap(), &sample_slice(0, 1));
    assert_bit_identical(&u.get_slice(1).unwrap(), &sample_slice(1, 2));
    drop(u);
    let _ = fs::remove_file(&path);
}

#[test]
fn out_of_range_and_closed_access_fail() {
    let path = temp_path("closed");
    let mut u = Universe::create(&path).unwrap();
    assert!(matches!(u.get_last_slice(), Err(Error::SliceOutOfRange { .. })));
    u.append_slice(&sample_slice(0, 1)).unwrap();
    assert!(matches!(
        u.get_slice(1),
        Err(Error::SliceOutOfRange { index: 1, count: 1 })
    ));

    u.close().unwrap();
    assert!(!u.is_open());
    assert!(matches!(u.get_slice(0), Err(Error::Closed)));
    assert!(matches!(u.append_slice(&sample_slice(1, 1)), Err(Error::Closed)));
    // closing twice is harmless
    u.close().unwrap();
    let _ = fs::remove_file(&path);
}

#[test]
fn read_only_handle_cannot_append() {
    let path = temp_path("readonly");
    drop(Universe::create(&path).unwrap());
    let mut u = Universe::open_read_only(&path).unwrap();
    assert!(matches!(u.append_slice(&sample_slice(0, 1)), Err(Error::Io(_))));
    drop(u);
    let _ = fs::remove_file(&path);
}

#[test]
fn trailing_garbage_does_not_hide_index() {
    // bytes after the index are read as the index
    let path = temp_path("junk");
    let mut u = Universe::create(&path).unwrap();
    u.append_slice(&sample_slice(0, 1)).unwrap();
    u.close().unwrap();

    let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(&[0xff; 8]).unwrap();
    drop(f);

    let mut u = Universe::open(&path).unwrap();
    assert!(u.get_slice(0).is_err());
    drop(u);
    let _ = fs::remove_file(&path);
}

// ==================================================================================
// Property: any particle survives the trip to disk unchanged
// ==================================================================================

fn finite() -> impl Strategy<Value = f64> {
    prop::num::f64::NORMAL | prop::num::f64::ZERO | prop::num::f64::SUBNORMAL
}

fn vec3() -> impl Strategy<Value = NVec3> {
    (finite(), finite(), finite()).prop_map(|(x, y, z)| NVec3::new(x, y, z))
}

fn particle() -> impl Strategy<Value = Particle> {
    (
        any::<u32>(),
        any::<u32>(),
        (finite(), finite(), finite()),
        (vec3(), vec3(), vec3()),
    )
        .prop_map(|(flags, uflags, (mass, charge, radius), (pos, vel, acc))| Particle {
            flags,
            uflags,
            mass,
            charge,
            radius,
            pos,
            vel,
            acc,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_slice_round_trips(
        time in any::<u64>(),
        lo in vec3(),
        hi in vec3(),
        bodies in prop::collection::vec(particle(), 0..12),
    ) {
        let path = temp_path("prop");
        let s = Slice::new(time, lo, hi, bodies);
        let mut u = Universe::create(&path).unwrap();
        u.append_slice(&s).unwrap();
        u.append_slice(&s).unwrap();
        let back = u.get_slice(1).unwrap();
        drop(u);
        let _ = fs::remove_file(&path);
        assert_bit_identical(&back, &s);
    }
}
