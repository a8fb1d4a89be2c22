// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Pipeline-level guarantees: per-destination ordering under concurrent
// producers, field sanitization on the wire, and non-blocking drops when
// the buffer saturates.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_security_core::config::{
    AuditDestinationConfig, AuditDestinationType, AuditFormat,
};
use conductor_security_core::domain::event::{EventType, SecurityEvent};
use conductor_security_core::infrastructure::audit::destination::build_destinations;
use conductor_security_core::infrastructure::audit::AuditPipeline;
use conductor_security_core::infrastructure::metrics::MetricsCollector;

fn file_destination(path: &std::path::Path) -> AuditDestinationConfig {
    AuditDestinationConfig {
        destination_type: AuditDestinationType::File,
        path: Some(path.to_string_lossy().into_owned()),
        format: AuditFormat::Json,
        facility: None,
        severity: None,
        url: None,
        headers: HashMap::new(),
        max_size: None,
        max_age: None,
        max_backups: None,
        rotate_daily: false,
        compress: false,
    }
}

fn pipeline_to(path: &std::path::Path, capacity: usize) -> AuditPipeline {
    let metrics = Arc::new(MetricsCollector::new("conductor_security"));
    let destinations = build_destinations(&[file_destination(path)]).unwrap();
    AuditPipeline::with_destinations(capacity, true, destinations, metrics)
}

#[tokio::test]
async fn test_concurrent_producers_keep_destination_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    let pipeline = Arc::new(pipeline_to(&path, 4096));

    // Four workflows race; each workflow's own events must appear in its
    // submission order even though the interleaving is arbitrary.
    let mut handles = Vec::new();
    for workflow in 0..4 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            for seq in 0..100 {
                let event = SecurityEvent::new(EventType::AccessGranted, "allowed")
                    .workflow(format!("wf-{workflow}"), format!("{seq}"));
                pipeline.log(event);
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    pipeline.close().await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let mut next_seq: HashMap<String, u64> = HashMap::new();
    let mut total = 0;
    for line in content.lines() {
        let event: SecurityEvent = serde_json::from_str(line).unwrap();
        let expected = next_seq.entry(event.workflow_id.clone()).or_insert(0);
        let seq: u64 = event.step_id.parse().unwrap();
        assert_eq!(seq, *expected, "out-of-order event for {}", event.workflow_id);
        *expected += 1;
        total += 1;
    }
    assert_eq!(total, 400);
}

#[tokio::test]
async fn test_hostile_fields_sanitized_on_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    let pipeline = pipeline_to(&path, 64);

    let hostile_resource = format!(
        "/tmp/x\x00\x1b[31m{}",
        "A".repeat(5000)
    );
    let hostile_reason = "line1\u{7}bell\u{1}ctl".to_string() + &"r".repeat(2000);
    pipeline.log(
        SecurityEvent::new(EventType::Violation, "denied")
            .workflow("wf-inject", "s")
            .resource("file", hostile_resource)
            .reason(hostile_reason),
    );
    pipeline.close().await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let event: SecurityEvent = serde_json::from_str(content.lines().next().unwrap()).unwrap();

    assert!(event.resource.chars().count() <= 1024);
    assert!(event.reason.chars().count() <= 512);
    for field in [&event.resource, &event.reason] {
        assert!(
            field
                .chars()
                .all(|c| (c as u32) >= 32 || matches!(c, '\t' | '\n' | '\r')),
            "control character survived sanitization"
        );
    }
    // The escape byte is gone, so the log cannot carry terminal injection.
    assert!(!event.resource.contains('\x1b'));
}

#[tokio::test]
async fn test_saturated_buffer_counts_drops() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    let pipeline = pipeline_to(&path, 2);

    for i in 0..2000 {
        pipeline.log(SecurityEvent::new(EventType::AccessGranted, "allowed").workflow("wf", format!("{i}")));
    }
    let dropped = pipeline.dropped_events();
    pipeline.close().await.unwrap();

    let written = std::fs::read_to_string(&path).unwrap().lines().count() as u64;
    // Nothing lost silently: every event was either written or counted.
    assert_eq!(written + dropped, 2000);
}
