//! Prometheus metrics for the reconcile loop

use crate::error::ControllerError;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Reconcile outcome label values
pub mod results {
    /// Reconcile finished and waits for the next change
    pub const DONE: &str = "done";
    /// Reconcile asked to run again after a delay
    pub const REQUEUE: &str = "requeue";
    /// Reconcile returned an error
    pub const ERROR: &str = "error";
}

/// Pod operation label values
pub mod ops {
    /// Pod created
    pub const CREATE: &str = "create";
    /// Pod deleted
    pub const DELETE: &str = "delete";
}

/// Controller metrics. Clones share the same registry.
#[derive(Clone)]
pub struct Metrics {
    /// Reconciles by outcome
    pub reconcile_total: IntCounterVec,
    /// Reconcile errors by error kind
    pub reconcile_errors_total: IntCounterVec,
    /// Reconcile latency in seconds
    pub reconcile_duration_seconds: Histogram,
    /// Pod writes by operation
    pub pod_operations_total: IntCounterVec,
    registry: Registry,
}

impl Metrics {
    /// Create and register all controller metrics in a fresh registry
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("helloworld_reconcile_total", "HelloWorld reconciles by result"),
            &["result"],
        )?;
        let reconcile_errors_total = IntCounterVec::new(
            Opts::new("helloworld_reconcile_errors_total", "HelloWorld reconcile errors by kind"),
            &["kind"],
        )?;
        let reconcile_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "helloworld_reconcile_duration_seconds",
            "HelloWorld reconcile latency in seconds",
        ))?;
        let pod_operations_total = IntCounterVec::new(
            Opts::new("helloworld_pod_operations_total", "Managed Pod writes by operation"),
            &["op"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;
        registry.register(Box::new(pod_operations_total.clone()))?;

        Ok(Self {
            reconcile_total,
            reconcile_errors_total,
            reconcile_duration_seconds,
            pod_operations_total,
            registry,
        })
    }

    /// Count a finished reconcile and observe its latency
    pub fn record_reconcile(&self, result: &str, elapsed: Duration) {
        self.reconcile_total.with_label_values(&[result]).inc();
        self.reconcile_duration_seconds.observe(elapsed.as_secs_f64());
    }

    /// Count a reconcile error of `kind`
    pub fn record_error(&self, kind: &str) {
        self.reconcile_errors_total.with_label_values(&[kind]).inc();
    }

    /// Count a Pod write
    pub fn record_pod_operation(&self, op: &str) {
        self.pod_operations_total.with_label_values(&[op]).inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn render(&self) -> Result<String, ControllerError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconcile(results::DONE, Duration::from_millis(5));
        metrics.record_error("forbidden");
        metrics.record_pod_operation(ops::CREATE);

        let text = metrics.render().unwrap();
        assert!(text.contains("helloworld_reconcile_total{result=\"done\"} 1"));
        assert!(text.contains("helloworld_reconcile_errors_total{kind=\"forbidden\"} 1"));
        assert!(text.contains("helloworld_pod_operations_total{op=\"create\"} 1"));
        assert!(text.contains("helloworld_reconcile_duration_seconds_count 1"));
    }

    #[test]
    fn test_clones_share_registry() {
        let metrics = Metrics::new().unwrap();
        metrics.clone().record_pod_operation(ops::DELETE);
        assert_eq!(metrics.pod_operations_total.with_label_values(&[ops::DELETE]).get(), 1);
    }

    #[test]
    fn test_instances_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_pod_operation(ops::CREATE);
        assert_eq!(second.pod_operations_total.with_label_values(&[ops::CREATE]).get(), 0);
    }
}
