use std::time::Instant;

use crate::error::Result;
use crate::simulation::forces::{GravityFactory, ThreadedGravityFactory};
use crate::simulation::stage::{Stage, StageFactory};
use crate::simulation::states::{NVec3, Particle, Slice};

/// Helper to build a deterministic slice of size `n`
pub fn make_slice(n: usize) -> Slice {
    let bodies = (0..n)
        .map(|i| {
            let i_f = i as f64;
            // deterministic positions, no rand needed
            let pos = NVec3::new(
                (i_f * 0.37).sin() * 5.0,
                (i_f * 0.13).cos() * 5.0,
                (i_f * 0.07).sin() * 5.0,
            );
            Particle::new(1.0, 0.01, pos, NVec3::zeros())
        })
        .collect();

    Slice::new(0, NVec3::repeat(-5.0), NVec3::repeat(5.0), bodies)
}

/// Seconds per `execute`, averaged over `steps` after one warm-up call
fn time_stage(stage: &mut dyn Stage, template: &Slice, steps: usize) -> f64 {
    let mut cur = template.clone();
    stage.execute(template, &mut cur);

    let t0 = Instant::now();
    for _ in 0..steps {
        stage.execute(template, &mut cur);
    }
    t0.elapsed().as_secs_f64() / steps as f64
}

/// Serial `fgrav` against `pfgrav` with one worker per available core
pub fn bench_gravity() -> Result<()> {
    let tc = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    // Different system sizes to test
    let ns = [200, 400, 800, 1600, 3200, 6400];

    let mut direct = GravityFactory.configure("cleara=1,plummer=0.01,G=0.1")?;
    let mut threaded =
        ThreadedGravityFactory.configure(&format!("cleara=1,plummer=0.01,G=0.1,tc={tc}"))?;

    println!("N,fgrav_ms,pfgrav_ms (tc={tc})");
    for n in ns {
        // Small n: average over a few steps to smooth noise
        let steps = if n <= 800 { 5 } else { 1 };
        let template = make_slice(n);

        let ms_direct = time_stage(direct.as_mut(), &template, steps) * 1000.0;
        let ms_threaded = time_stage(threaded.as_mut(), &template, steps) * 1000.0;

        println!("{n},{ms_direct:.6},{ms_threaded:.6}");
    }

    threaded.release();
    direct.release();
    Ok(())
}
