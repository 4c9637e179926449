// Process module - Core process lifecycle management

pub mod monitor;
mod registry;
pub mod restart;
mod spawner;
mod supervisor;
mod types;

pub use monitor::{ProcessTreeQuery, PsQuery, ResourceSampler, SysinfoQuery, TreeRow};
pub use restart::{RestartDecision, RestartPolicy};
pub use spawner::COLOR_ENV;
pub use supervisor::ProcessSupervisor;
pub use types::{ExitInfo, ProcessId, ProcessSpec, ResourceUsage, StartResult, StopResult};
