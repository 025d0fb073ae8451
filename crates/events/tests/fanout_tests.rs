//! Dispatch through the full production sink.

use std::sync::Arc;

use chrono::Utc;
use geoguard_core::{AlertEvent, AlertKind, Coordinate, Observation};
use geoguard_events::{
    AlertHistory, EventBus, EventSink, FanoutSink, HttpReporter, LogNotifier, ReportConfig,
};

fn anomaly() -> AlertEvent {
    AlertEvent::new(
        AlertKind::AnomalyDetected,
        "magnetic_deviation",
        Observation::scalar(88.0, Utc::now()),
        "'magnetic_deviation' deviates 38.00 from baseline 50.00 (limit 20)",
    )
    .with_monitor("magnetometer")
}

#[tokio::test]
async fn unreachable_report_endpoint_still_persists_and_publishes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("alerts.jsonl");

    let history = Arc::new(AlertHistory::open(&path).await.expect("open history"));
    let bus = Arc::new(EventBus::default());
    let mut listener = bus.subscribe();

    let reporter = HttpReporter::new(ReportConfig::new("http://127.0.0.1:1/alert", "device-7"))
        .expect("client builds");
    let sink = FanoutSink::new(Arc::clone(&history), Arc::clone(&bus))
        .with_channel(Arc::new(LogNotifier::new()))
        .with_channel(Arc::new(reporter));

    let event = anomaly();
    sink.dispatch(event.clone()).await;

    let published = listener.recv().await.expect("bus delivers");
    assert_eq!(published.id, event.id);

    let reopened = AlertHistory::open(&path).await.expect("reopen history");
    let entries = reopened.list().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event, event);
    assert_eq!(entries[0].event.monitor, "magnetometer");
}

#[tokio::test]
async fn history_keeps_dispatch_order() {
    let history = Arc::new(AlertHistory::in_memory());
    let sink = FanoutSink::new(Arc::clone(&history), Arc::new(EventBus::default()));

    let entered = AlertEvent::new(
        AlertKind::Entered,
        "school",
        Observation::position(Coordinate::new(45.76, 4.83), Utc::now()),
        "Entered zone 'school'",
    );
    let left = AlertEvent::new(
        AlertKind::Left,
        "school",
        Observation::position(Coordinate::new(45.77, 4.83), Utc::now()),
        "Left zone 'school'",
    );
    sink.dispatch(entered.clone()).await;
    sink.dispatch(left.clone()).await;

    let recent = history.recent(10).await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, left.id);
    assert_eq!(recent[1].id, entered.id);
    assert_eq!(history.get(entered.id).await.map(|e| e.event), Some(entered));
}
