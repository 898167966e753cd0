pub mod engine;
pub mod executor;
pub mod request;
pub mod worker;

pub use engine::{ScanEngine, SimulatedEngine};
pub use executor::{ExecutionOutcome, ScanExecutor};
pub use request::{CreateScanRequest, ScanRequestHandler};
pub use worker::{reap_stalled, spawn_stall_reaper, WorkerPool};
