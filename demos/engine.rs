//! Computation engine - serves jobs from controllers.
//!
//! Listens on 127.0.0.1 and handles every controller connection on its
//! own task: for each `StartJob` it reports `JobProgress` per step and
//! finishes with `JobDone`.
//!
//! ```text
//! RUST_LOG=debug cargo run --example engine -- 7400
//! cargo run --example controller -- 7400
//! ```

#[path = "jobs.rs"]
mod jobs;

use std::time::Duration;

use jobs::{JobDone, JobProgress, StartJob};
use msgwire::{Connection, ConnectionManager, IpcError};

async fn serve(connection: Connection) -> msgwire::Result<()> {
    loop {
        let job: StartJob = match connection.receive_value(None).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(IpcError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        tracing::info!("Starting job {} ({} steps)", job.job_id, job.steps);

        let mut checksum = 0u64;
        for step in 1..=job.steps {
            tokio::time::sleep(Duration::from_millis(20)).await;
            checksum = checksum.wrapping_mul(31).wrapping_add(u64::from(step));

            let percent = (step * 100 / job.steps.max(1)) as u8;
            connection
                .send_value(&JobProgress {
                    job_id: job.job_id,
                    percent,
                })
                .await?;
        }

        connection
            .send_value(&JobDone {
                job_id: job.job_id,
                checksum,
            })
            .await?;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    jobs::init_logging();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => jobs::PORT,
    };

    let manager = ConnectionManager::with_registry(jobs::registry()?)
        .heartbeat(Duration::from_secs(1), Duration::from_secs(5));
    let listener = manager.listen(port).await?;
    tracing::info!("Engine listening on {:?}", listener.local_addr());

    let stop = listener.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.trigger();
        }
    });

    listener
        .accept_loop(|connection| {
            tracing::info!("Controller connected from {:?}", connection.peer_addr());
            tokio::spawn(async move {
                match serve(connection).await {
                    Ok(()) => tracing::info!("Controller disconnected"),
                    Err(e) => tracing::warn!("Controller session failed: {}", e),
                }
            });
        })
        .await;

    Ok(())
}
