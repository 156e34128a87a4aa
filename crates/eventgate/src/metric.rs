//! Process metrics
//!
//! One [`Metrics`] aggregator is constructed at startup and handed to every
//! component that reports into it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the delivery counter is sampled
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Counters the gateway reports into
pub trait Metric: Send + Sync + 'static {
    fn inc_broker_count(&self);
    fn dec_broker_count(&self);

    fn inc_consumer_count(&self);
    fn dec_consumer_count(&self);

    fn inc_delivery_count(&self);

    fn inc_task_count(&self);
    fn dec_task_count(&self);
}

/// Snapshot served on the diagnostics route
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Stats {
    pub broker: i64,
    pub consumer: i64,
    /// Deliveries acknowledged during the last sample interval
    pub delivery: i64,
    pub tasks: i64,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
}

/// Metrics aggregator
#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    started_at: DateTime<Utc>,
    broker: AtomicI64,
    consumer: AtomicI64,
    tasks: AtomicI64,
    delivery_count: AtomicI64,
    delivery_sample: Mutex<i64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            broker: AtomicI64::new(0),
            consumer: AtomicI64::new(0),
            tasks: AtomicI64::new(0),
            delivery_count: AtomicI64::new(0),
            delivery_sample: Mutex::new(0),
        }
    }

    /// Start the sampling task; it stops when `cancel` fires
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let metrics = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => metrics.sample(),
                }
            }
            tracing::debug!("Metrics sampler stopped");
        })
    }

    /// Move the running delivery count into the published sample
    pub fn sample(&self) {
        let count = self.delivery_count.swap(0, Ordering::AcqRel);
        if let Ok(mut sample) = self.delivery_sample.lock() {
            *sample = count;
        }
    }

    pub fn report(&self) -> Stats {
        let delivery = self.delivery_sample.lock().map(|s| *s).unwrap_or_default();
        Stats {
            broker: self.broker.load(Ordering::Acquire),
            consumer: self.consumer.load(Ordering::Acquire),
            delivery,
            tasks: self.tasks.load(Ordering::Acquire),
            uptime_secs: self.started.elapsed().as_secs(),
            started_at: self.started_at,
        }
    }
}

impl Metric for Metrics {
    fn inc_broker_count(&self) {
        self.broker.fetch_add(1, Ordering::AcqRel);
    }

    fn dec_broker_count(&self) {
        self.broker.fetch_sub(1, Ordering::AcqRel);
    }

    fn inc_consumer_count(&self) {
        self.consumer.fetch_add(1, Ordering::AcqRel);
    }

    fn dec_consumer_count(&self) {
        self.consumer.fetch_sub(1, Ordering::AcqRel);
    }

    fn inc_delivery_count(&self) {
        self.delivery_count.fetch_add(1, Ordering::AcqRel);
    }

    fn inc_task_count(&self) {
        self.tasks.fetch_add(1, Ordering::AcqRel);
    }

    fn dec_task_count(&self) {
        self.tasks.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Counts a spawned task for as long as it is alive
pub struct TaskGuard {
    metric: Arc<dyn Metric>,
}

impl TaskGuard {
    pub fn new(metric: Arc<dyn Metric>) -> Self {
        metric.inc_task_count();
        Self { metric }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.metric.dec_task_count();
    }
}
