// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Buffered, multi-destination audit pipeline.
//!
//! `log()` never blocks the enforcement path: events go through a bounded
//! channel and a single background worker fans them out to every destination
//! in submission order. When the buffer is full the event is dropped and
//! counted; the caller proceeds. Destination write failures are absorbed the
//! same way. Only construction (invalid destination config) and `close()`
//! surface errors.

pub mod destination;
pub mod file;
pub mod rotating;
pub mod syslog;
pub mod webhook;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::AuditConfig;
use crate::domain::error::SecurityError;
use crate::domain::event::SecurityEvent;
use crate::infrastructure::metrics::MetricsCollector;

use destination::{build_destinations, AuditDestination};

pub struct AuditPipeline {
    tx: mpsc::Sender<SecurityEvent>,
    capacity: usize,
    enabled: bool,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<Result<(), SecurityError>>>>,
    dropped: AtomicU64,
    metrics: Arc<MetricsCollector>,
}

impl AuditPipeline {
    /// Build destinations from config and start the worker. Fails closed on
    /// any invalid destination.
    pub fn start(
        config: &AuditConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, SecurityError> {
        let destinations = build_destinations(&config.effective_destinations())?;
        Ok(Self::with_destinations(
            config.buffer_size,
            config.enabled,
            destinations,
            metrics,
        ))
    }

    /// Start a pipeline over pre-built destinations (tests use this to
    /// inject recording fakes).
    pub fn with_destinations(
        capacity: usize,
        enabled: bool,
        destinations: Vec<Box<dyn AuditDestination>>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(rx, destinations, cancel.clone()));
        Self {
            tx,
            capacity,
            enabled,
            cancel,
            worker: Mutex::new(Some(worker)),
            dropped: AtomicU64::new(0),
            metrics,
        }
    }

    /// Enqueue an event without blocking. A full buffer drops the event,
    /// increments the drop counter, and warns; it never stalls the caller.
    pub fn log(&self, event: SecurityEvent) {
        if !self.enabled {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics
                    .record_audit_logged(self.buffer_utilization(), self.capacity as f64);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_audit_dropped();
                warn!(
                    event_type = event.event_type.as_str(),
                    "audit buffer full, event dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_audit_dropped();
                warn!("audit pipeline closed, event dropped");
            }
        }
    }

    /// Fraction of the buffer currently occupied, in `[0, 1]`.
    pub fn buffer_utilization(&self) -> f64 {
        let free = self.tx.capacity();
        (self.capacity - free.min(self.capacity)) as f64 / self.capacity as f64
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the worker, drain residual events, and close every destination
    /// in order, returning the first close error.
    pub async fn close(&self) -> Result<(), SecurityError> {
        self.cancel.cancel();
        let handle = self.worker.lock().await.take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| SecurityError::Network(format!("audit worker panicked: {e}")))?,
            None => Ok(()),
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<SecurityEvent>,
    mut destinations: Vec<Box<dyn AuditDestination>>,
    cancel: CancellationToken,
) -> Result<(), SecurityError> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(event) => dispatch(&mut destinations, &event).await,
                None => break,
            },
        }
    }

    // Drain whatever was enqueued before cancellation; new sends now fail.
    rx.close();
    while let Some(event) = rx.recv().await {
        dispatch(&mut destinations, &event).await;
    }

    let mut first_error = None;
    for dest in &mut destinations {
        if let Err(e) = dest.close().await {
            warn!(destination = dest.kind(), error = %e, "audit destination close failed");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Fan an event out to all destinations. Per-event write errors are logged
/// and counted, never propagated; availability of the enforcement path wins.
async fn dispatch(destinations: &mut [Box<dyn AuditDestination>], event: &SecurityEvent) {
    for dest in destinations.iter_mut() {
        if let Err(e) = dest.write_event(event).await {
            warn!(destination = dest.kind(), error = %e, "audit write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventType;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct Recording {
        events: Arc<StdMutex<Vec<String>>>,
        closed: Arc<StdMutex<bool>>,
    }

    struct RecordingDestination {
        shared: Recording,
        delay: Option<std::time::Duration>,
    }

    #[async_trait]
    impl AuditDestination for RecordingDestination {
        fn kind(&self) -> &'static str {
            "recording"
        }

        async fn write_event(&mut self, event: &SecurityEvent) -> Result<(), SecurityError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.shared.events.lock().unwrap().push(event.decision.clone());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), SecurityError> {
            *self.shared.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn metrics() -> Arc<MetricsCollector> {
        Arc::new(MetricsCollector::new("conductor_security"))
    }

    fn event(decision: &str) -> SecurityEvent {
        SecurityEvent::new(EventType::AccessGranted, decision)
    }

    #[tokio::test]
    async fn test_events_reach_destination_in_order() {
        let shared = Recording::default();
        let pipeline = AuditPipeline::with_destinations(
            64,
            true,
            vec![Box::new(RecordingDestination { shared: shared.clone(), delay: None })],
            metrics(),
        );

        for i in 0..20 {
            pipeline.log(event(&format!("e{i}")));
        }
        pipeline.close().await.unwrap();

        let seen = shared.events.lock().unwrap().clone();
        let expected: Vec<String> = (0..20).map(|i| format!("e{i}")).collect();
        assert_eq!(seen, expected);
        assert!(*shared.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let shared = Recording::default();
        // A destination slow enough that the buffer fills.
        let pipeline = AuditPipeline::with_destinations(
            2,
            true,
            vec![Box::new(RecordingDestination {
                shared: shared.clone(),
                delay: Some(std::time::Duration::from_millis(50)),
            })],
            metrics(),
        );

        let start = std::time::Instant::now();
        for i in 0..50 {
            pipeline.log(event(&format!("e{i}")));
        }
        // Fifty synchronous log calls against a 2-slot buffer must not have
        // waited on the slow destination.
        assert!(start.elapsed() < std::time::Duration::from_millis(40));
        assert!(pipeline.dropped_events() > 0);
        pipeline.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_drains_residual_events() {
        let shared = Recording::default();
        let pipeline = AuditPipeline::with_destinations(
            100,
            true,
            vec![Box::new(RecordingDestination { shared: shared.clone(), delay: None })],
            metrics(),
        );
        for i in 0..10 {
            pipeline.log(event(&format!("e{i}")));
        }
        pipeline.close().await.unwrap();
        assert_eq!(shared.events.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_disabled_pipeline_discards_quietly() {
        let shared = Recording::default();
        let pipeline = AuditPipeline::with_destinations(
            8,
            false,
            vec![Box::new(RecordingDestination { shared: shared.clone(), delay: None })],
            metrics(),
        );
        pipeline.log(event("ignored"));
        pipeline.close().await.unwrap();
        assert!(shared.events.lock().unwrap().is_empty());
        assert_eq!(pipeline.dropped_events(), 0);
    }

    #[tokio::test]
    async fn test_write_errors_do_not_stop_later_events() {
        struct FlakyDestination {
            shared: Recording,
            fail_first: bool,
        }
        #[async_trait]
        impl AuditDestination for FlakyDestination {
            fn kind(&self) -> &'static str {
                "flaky"
            }
            async fn write_event(&mut self, event: &SecurityEvent) -> Result<(), SecurityError> {
                if self.fail_first {
                    self.fail_first = false;
                    return Err(SecurityError::Network("disk full".into()));
                }
                self.shared.events.lock().unwrap().push(event.decision.clone());
                Ok(())
            }
        }

        let shared = Recording::default();
        let pipeline = AuditPipeline::with_destinations(
            8,
            true,
            vec![Box::new(FlakyDestination { shared: shared.clone(), fail_first: true })],
            metrics(),
        );
        pipeline.log(event("first"));
        pipeline.log(event("second"));
        pipeline.close().await.unwrap();
        assert_eq!(*shared.events.lock().unwrap(), ["second"]);
    }
}
