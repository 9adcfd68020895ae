use crate::container::ContainerError;
use serve_client::DocumentService;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Poll `/health` with a fixed delay between attempts.
///
/// Returns the 1-based attempt that succeeded.
pub async fn wait_for_healthy(
    service: &dyn DocumentService,
    attempts: u32,
    delay: Duration,
) -> Result<u32, ContainerError> {
    let mut last_error = String::from("no attempts made");

    for attempt in 1..=attempts {
        match service.health_check().await {
            Ok(()) => {
                info!("Service healthy after {} attempt(s)", attempt);
                return Ok(attempt);
            }
            Err(e) => {
                debug!("Health attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = e.to_string();
            }
        }

        if attempt < attempts {
            sleep(delay).await;
        }
    }

    Err(ContainerError::HealthCheckFailed {
        reason: format!(
            "{} did not become healthy after {} attempts ({})",
            service.base_url(),
            attempts,
            last_error
        ),
    })
}
