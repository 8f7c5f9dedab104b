//! Progress broadcasting tests

use std::sync::Arc;

use rdeploy::progress::{
    ProgressBroadcaster, ProgressEvent, ProgressReporter, ProgressSink, ProgressStatus,
};
use tokio_test::task;
use tokio_test::{assert_pending, assert_ready_eq};

#[test]
fn test_subscriber_wakes_on_broadcast() {
    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let mut subscription = broadcaster.subscribe(7);

    let event = ProgressEvent::new(ProgressStatus::Progress, "Cloning", 30);
    {
        let mut recv = task::spawn(subscription.recv());
        assert_pending!(recv.poll());

        broadcaster.broadcast(7, event.clone());
        assert!(recv.is_woken());
        assert_ready_eq!(recv.poll(), Some(event));
    }
}

#[test]
fn test_events_only_reach_the_same_project() {
    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let mut shop = broadcaster.subscribe(1);
    let mut blog = broadcaster.subscribe(2);

    broadcaster.broadcast(1, ProgressEvent::new(ProgressStatus::Start, "go", 0));

    assert!(shop.try_recv().is_some());
    assert!(blog.try_recv().is_none());
}

#[test]
fn test_late_subscriber_gets_no_replay() {
    let broadcaster = Arc::new(ProgressBroadcaster::new());
    broadcaster.broadcast(3, ProgressEvent::new(ProgressStatus::Start, "early", 0));

    let mut late = broadcaster.subscribe(3);
    assert!(late.try_recv().is_none());
}

#[test]
fn test_dropped_subscription_unregisters() {
    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let first = broadcaster.subscribe(5);
    let _second = broadcaster.subscribe(5);
    assert_eq!(broadcaster.subscriber_count(5), 2);

    drop(first);
    assert_eq!(broadcaster.subscriber_count(5), 1);
}

#[test]
fn test_reporter_stream_is_well_formed() {
    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let mut subscription = broadcaster.subscribe(9);
    let sink: Arc<dyn ProgressSink> = broadcaster.clone();
    let reporter = ProgressReporter::new(sink, 9);

    reporter.start("Syncing");
    reporter.start("Syncing again");
    reporter.progress(50, "Halfway");
    reporter.progress(20, "Going backwards");
    reporter.complete("Done");
    reporter.fail("Too late");

    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    let statuses: Vec<ProgressStatus> = events.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            ProgressStatus::Start,
            ProgressStatus::Progress,
            ProgressStatus::Progress,
            ProgressStatus::Complete,
        ]
    );
    assert_eq!(events[2].progress, 50);
    assert_eq!(events[3].progress, 100);
}

#[test]
fn test_event_serializes_with_lowercase_status() {
    let json =
        serde_json::to_value(ProgressEvent::new(ProgressStatus::Error, "boom", 40)).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"status": "error", "message": "boom", "progress": 40})
    );
}
