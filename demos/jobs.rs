//! Message types shared by the engine and controller demos.

use msgwire::{MessageRegistry, Result};
use serde::{Deserialize, Serialize};

/// Default demo port.
pub const PORT: u16 = 7400;

/// Controller → engine: run a job.
#[derive(Serialize, Deserialize, Debug)]
pub struct StartJob {
    pub job_id: u32,
    pub steps: u32,
}

/// Engine → controller: progress of a running job.
#[derive(Serialize, Deserialize, Debug)]
pub struct JobProgress {
    pub job_id: u32,
    pub percent: u8,
}

/// Engine → controller: job finished.
#[derive(Serialize, Deserialize, Debug)]
pub struct JobDone {
    pub job_id: u32,
    pub checksum: u64,
}

pub fn registry() -> Result<MessageRegistry> {
    let mut registry = MessageRegistry::new();
    registry.register::<StartJob>(1, "StartJob")?;
    registry.register::<JobProgress>(2, "JobProgress")?;
    registry.register::<JobDone>(3, "JobDone")?;
    Ok(registry)
}

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
