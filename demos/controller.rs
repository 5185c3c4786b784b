//! Controller - submits jobs to an engine and follows their progress.
//!
//! ```text
//! cargo run --example controller -- 7400 3
//! ```

#[path = "jobs.rs"]
mod jobs;

use std::time::Duration;

use jobs::{JobDone, JobProgress, StartJob};
use msgwire::ConnectionManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    jobs::init_logging();

    let mut args = std::env::args().skip(1);
    let port = match args.next() {
        Some(arg) => arg.parse()?,
        None => jobs::PORT,
    };
    let job_count: u32 = match args.next() {
        Some(arg) => arg.parse()?,
        None => 3,
    };

    let manager = ConnectionManager::with_registry(jobs::registry()?)
        .heartbeat(Duration::from_secs(1), Duration::from_secs(5));
    let connection = manager.connect_to("127.0.0.1", port).await?;
    let registry = connection.registry().clone();

    for job_id in 1..=job_count {
        connection
            .send_value(&StartJob { job_id, steps: 5 })
            .await?;

        loop {
            let Some(message) = connection.receive(Some(Duration::from_secs(10))).await? else {
                return Err("engine stopped responding".into());
            };

            match registry.name_of(message.type_id()) {
                Some("JobProgress") => {
                    let progress: JobProgress = registry.decode_as(&message)?;
                    tracing::info!("Job {}: {}%", progress.job_id, progress.percent);
                }
                Some("JobDone") => {
                    let done: JobDone = registry.decode_as(&message)?;
                    tracing::info!("Job {} done, checksum {:#x}", done.job_id, done.checksum);
                    break;
                }
                other => tracing::warn!("Unexpected message {:?}", other),
            }
        }
    }

    let stats = connection.stats();
    connection.close().await;
    tracing::info!(
        "Sent {} messages, received {} ({} bytes)",
        stats.messages_sent,
        stats.messages_received,
        stats.bytes_received
    );
    Ok(())
}
