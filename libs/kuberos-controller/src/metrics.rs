use crate::error::Error;

use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::{Registry, Unit};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub ticks: TickMetrics,
    pub registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("kuberos_controller");
        let ticks = TickMetrics::default().register(&mut registry);
        Self {
            registry: Arc::new(registry),
            ticks,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TaskLabels {
    pub task: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub task: String,
    pub error: String,
}

/// Counters for the background task queue (spec §5): one tick per
/// reschedule of a job-status check, job-level transition, batch tick or
/// terminal-state poll.
#[derive(Clone)]
pub struct TickMetrics {
    pub runs: Family<TaskLabels, Counter>,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: Family<TaskLabels, Histogram>,
}

impl Default for TickMetrics {
    fn default() -> Self {
        Self {
            runs: Family::default(),
            failures: Family::default(),
            duration: Family::new_with_constructor(|| Histogram::new([0.001, 0.01, 0.05, 0.1, 0.5, 1.].into_iter())),
        }
    }
}

impl TickMetrics {
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit("duration", "tick duration", Unit::Seconds, self.duration.clone());
        r.register("failures", "tick errors", self.failures.clone());
        r.register("runs", "ticks run", self.runs.clone());
        self
    }

    pub fn set_failure(&self, task: &str, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                task: task.to_string(),
                error: e.metric_label(),
            })
            .inc();
    }

    pub fn count_and_measure(&self, task: &str) -> TickMeasurer {
        self.runs.get_or_create(&TaskLabels { task: task.to_string() }).inc();
        TickMeasurer {
            start: Instant::now(),
            task: task.to_string(),
            metric: self.duration.clone(),
        }
    }
}

pub struct TickMeasurer {
    start: Instant,
    task: String,
    metric: Family<TaskLabels, Histogram>,
}

impl Drop for TickMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metric.get_or_create(&TaskLabels { task: self.task.clone() }).observe(duration);
    }
}
