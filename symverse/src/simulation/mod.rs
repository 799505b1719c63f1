pub mod states;
pub mod params;
pub mod stage;
pub mod engine;
pub mod forces;
pub mod integrator;
pub mod boundaries;
pub mod collision;
pub mod dummy;
pub mod scenario;
