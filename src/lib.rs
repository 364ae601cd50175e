//! radiocast-engine: the headless control plane of a single-channel internet
//! radio station. Decides what is on air, keeps the queue topped up, runs
//! scheduled items on time and shares state with sibling processes through
//! JSON files on disk.

pub mod config;
pub mod error;
pub mod history;
pub mod http;
pub mod ingest;
pub mod lease;
pub mod listeners;
pub mod mirror;
pub mod model;
pub mod queue;
pub mod scheduler;
pub mod selector;
pub mod state;
pub mod station;
pub mod store;
pub mod votes;

pub use config::{EngineConfig, FinishTiming};
pub use error::StationError;
pub use lease::LeaseCoordinator;
pub use model::{Category, MediaItem, ScheduleEntry, StatusResponse};
pub use scheduler::Scheduler;
pub use station::Station;
