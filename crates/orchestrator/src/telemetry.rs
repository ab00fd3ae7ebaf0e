use std::future::Future;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();
}

/// `source` is `configured` or `detected`.
pub fn record_adapter_created(kind: &str, source: &str) {
    counter!(
        "orchestrator_adapter_created_total",
        "kind" => kind.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

pub fn record_detection(result: &str) {
    counter!(
        "orchestrator_detection_total",
        "result" => result.to_string()
    )
    .increment(1);
}

pub fn record_capability_probe(capability: &str, present: bool) {
    counter!(
        "orchestrator_capability_probe_total",
        "capability" => capability.to_string(),
        "result" => if present { "present" } else { "absent" }.to_string()
    )
    .increment(1);
}

pub fn record_operation(backend: &str, operation: &str, result: &str, duration: Duration) {
    histogram!(
        "orchestrator_operation_duration_ms",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "result" => result.to_string()
    )
    .record(duration.as_secs_f64() * 1000.0);
}

/// Runs `fut` and records its duration under `backend`/`operation`.
pub async fn timed<T, E, F>(backend: &str, operation: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let result = fut.await;
    let outcome = if result.is_ok() { "success" } else { "error" };
    record_operation(backend, operation, outcome, started.elapsed());
    result
}
