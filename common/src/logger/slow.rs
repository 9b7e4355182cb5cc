use std::time::Duration;

/// Runs `fut` and logs a warning if it took longer than `max`. Used around
/// suspension points the control loops cannot otherwise bound (robot I/O,
/// inference, repository calls) so slow dependencies show up in logs instead
/// of only as missed actuator ticks.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
