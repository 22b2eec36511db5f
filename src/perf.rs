use std::sync::OnceLock;
use std::time::Instant;

fn copy_perf_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("DOCUMENTDB_COPY_PERF").is_some())
}

/// Log how long a copy step took when `DOCUMENTDB_COPY_PERF` is set.
pub fn log_copy_duration(label: &str, start: Instant, details: impl FnOnce() -> String) {
    if !copy_perf_enabled() {
        return;
    }

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    log::info!("[perf-copy] {label} ms={elapsed_ms:.3} {}", details());
}
