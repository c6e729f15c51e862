//! Outbound worker heartbeat loop

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::client::SchedulerClient;
use crate::error::Error;
use crate::protocol::{HeartbeatRequest, RegisterWorkerRequest};
use crate::scheduler::worker_registry::WorkerId;
use crate::worker::executor::TaskExecutor;

/// Heartbeat every `interval`, reporting the in-flight attempt set and
/// killing whatever the scheduler returns in `cancellations`
///
/// A scheduler that answers NotFound has declared this worker dead (or
/// restarted); the loop re-registers and carries on under the new id.
pub async fn run_heartbeat_loop(
    client: SchedulerClient,
    executor: Arc<TaskExecutor>,
    registration: RegisterWorkerRequest,
    worker_id: Arc<RwLock<WorkerId>>,
    interval: Duration,
) {
    loop {
        sleep(interval).await;

        let request = HeartbeatRequest {
            worker_id: *worker_id.read().await,
            in_flight: executor.in_flight().await,
        };

        match client.heartbeat(&request).await {
            Ok(response) => {
                for attempt_id in response.cancellations {
                    executor.cancel(attempt_id).await;
                }
            }
            Err(Error::NotFound(_)) => match client.register_worker(&registration).await {
                Ok(new_id) => {
                    info!("Re-registered with scheduler: worker_id={}", new_id);
                    *worker_id.write().await = new_id;
                }
                Err(e) => warn!("Re-registration failed: {}", e),
            },
            Err(e) => warn!("Heartbeat failed: {}", e),
        }
    }
}
