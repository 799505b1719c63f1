pub mod error;
pub mod simulation;
pub mod storage;
pub mod configuration;
pub mod benchmark;

pub use error::{Error, Result};

pub use simulation::states::{flags, NVec3, Particle, Slice};
pub use simulation::params::RunParams;
pub use simulation::stage::{Control, Options, Registry, Stage, StageFactory};
pub use simulation::engine::{
    parse_entry, Driver, Pipeline, PipelineEntry, PipelineSpec, RunContext, RunOutcome, RunState,
    StopLevel, StopToken,
};
pub use simulation::forces::{GravityFactory, GravityParams, ThreadedGravityFactory};
pub use simulation::integrator::{IntegrateFactory, Method};
pub use simulation::boundaries::{Boundary, BoundaryFactory};
pub use simulation::collision::CollisionFactory;
pub use simulation::dummy::DummyFactory;
pub use simulation::scenario::Scenario;

pub use storage::universe::Universe;

pub use configuration::config::{BodyConfig, RunConfig, RunSection, ScenarioConfig, StageConfig};

pub use benchmark::benchmark::bench_gravity;
