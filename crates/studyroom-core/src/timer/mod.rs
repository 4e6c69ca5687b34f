mod engine;

pub use engine::{CyclePhase, CycleTimer};
