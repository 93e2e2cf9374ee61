use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct Metrics {
    request_total: AtomicU64,
    request_success: AtomicU64,
    request_error: AtomicU64,
    check_cache_hits: AtomicU64,
    check_cache_misses: AtomicU64,
    depth_exceeded: AtomicU64,
    timeouts: AtomicU64,
    operations: Mutex<BTreeMap<&'static str, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.request_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.request_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.request_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_operation(&self, name: &'static str) {
        *self.operations.lock().entry(name).or_default() += 1;
    }

    pub fn record_check_cache_hit(&self) {
        self.check_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_check_cache_miss(&self) {
        self.check_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_depth_exceeded(&self) {
        self.depth_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_total(&self) -> u64 {
        self.request_total.load(Ordering::Relaxed)
    }

    pub fn request_success(&self) -> u64 {
        self.request_success.load(Ordering::Relaxed)
    }

    pub fn request_error(&self) -> u64 {
        self.request_error.load(Ordering::Relaxed)
    }

    pub fn check_cache_hits(&self) -> u64 {
        self.check_cache_hits.load(Ordering::Relaxed)
    }

    pub fn check_cache_misses(&self) -> u64 {
        self.check_cache_misses.load(Ordering::Relaxed)
    }

    pub fn depth_exceeded(&self) -> u64 {
        self.depth_exceeded.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn operation_count(&self, name: &str) -> u64 {
        self.operations.lock().get(name).copied().unwrap_or(0)
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();
        let counters = [
            (
                "warden_requests_total",
                "Total number of requests.",
                self.request_total(),
            ),
            (
                "warden_requests_success_total",
                "Total successful requests.",
                self.request_success(),
            ),
            (
                "warden_requests_error_total",
                "Total failed requests.",
                self.request_error(),
            ),
            (
                "warden_check_cache_hits_total",
                "Check cache hits.",
                self.check_cache_hits(),
            ),
            (
                "warden_check_cache_misses_total",
                "Check cache misses.",
                self.check_cache_misses(),
            ),
            (
                "warden_check_depth_exceeded_total",
                "Checks aborted by the traversal depth bound.",
                self.depth_exceeded(),
            ),
            (
                "warden_check_timeouts_total",
                "Checks that exceeded their deadline.",
                self.timeouts(),
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name} {value}");
        }

        let _ = writeln!(
            output,
            "# HELP warden_operations_total Requests per API operation."
        );
        let _ = writeln!(output, "# TYPE warden_operations_total counter");
        for (operation, count) in self.operations.lock().iter() {
            let _ = writeln!(
                output,
                "warden_operations_total{{operation=\"{operation}\"}} {count}"
            );
        }
        output
    }
}
