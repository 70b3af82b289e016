//! The collector service: per-symbol stream workers and their supervisor.

pub mod backoff;
pub mod supervisor;
pub mod worker;

pub use backoff::ReconnectBackoff;
pub use supervisor::{CollectorSupervisor, SupervisorParams};
pub use worker::{WorkerHandle, WorkerParams, spawn};
