use std::env;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// CI environments often need longer timeouts due to resource constraints
pub fn timeout_multiplier() -> u32 {
    if env::var("CI").is_ok() || env::var("GITHUB_ACTIONS").is_ok() {
        return 3;
    }

    if let Ok(multiplier) = env::var("TEST_TIMEOUT_MULTIPLIER") {
        if let Ok(m) = multiplier.parse::<u32>() {
            return m;
        }
    }

    1
}

pub fn scaled_timeout(base: Duration) -> Duration {
    base.saturating_mul(timeout_multiplier())
}

/// Poll `condition` until it holds or `max_wait` (scaled) elapses
pub async fn wait_for_condition<F, Fut>(
    mut condition: F,
    max_wait: Duration,
    check_interval: Duration,
) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let scaled_max = scaled_timeout(max_wait);

    while start.elapsed() < scaled_max {
        if condition().await {
            return Ok(());
        }
        sleep(check_interval).await;
    }

    Err(format!("Condition not met within {:?}", scaled_max))
}
