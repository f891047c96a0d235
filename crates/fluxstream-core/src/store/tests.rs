//! Tests for the SQLite status store and job queue (in-memory DB).

use super::*;
use std::time::Duration;

fn record(id: &str, created_at: i64) -> ContentRecord {
    ContentRecord::new(id, format!("magnet:?xt=urn:btih:{id}"), created_at)
}

#[tokio::test]
async fn create_get_and_update_status() {
    let db = FluxDb::open_memory().await.unwrap();
    assert_eq!(db.create(&record("aaaaaaaa", 10)).await.unwrap(), Inserted::New);

    let r = db.get("aaaaaaaa").await.unwrap().expect("record exists");
    assert_eq!(r.status, Status::Processing);
    assert_eq!(r.artifact_path, "");
    assert_eq!(r.created_at, 10);

    assert!(db
        .update_status("aaaaaaaa", Status::Downloading, None)
        .await
        .unwrap());
    assert!(db
        .update_status("aaaaaaaa", Status::Downloaded, Some("/data/aaaaaaaa/movie.mkv"))
        .await
        .unwrap());
    let r = db.get("aaaaaaaa").await.unwrap().unwrap();
    assert_eq!(r.status, Status::Downloaded);
    assert_eq!(r.artifact_path, "/data/aaaaaaaa/movie.mkv");

    // A status-only update keeps the artifact path.
    db.update_status("aaaaaaaa", Status::Failed, None).await.unwrap();
    let r = db.get("aaaaaaaa").await.unwrap().unwrap();
    assert_eq!(r.artifact_path, "/data/aaaaaaaa/movie.mkv");
}

#[tokio::test]
async fn conditional_update_only_applies_from_expected_status() {
    let db = FluxDb::open_memory().await.unwrap();
    db.create(&record("casecase", 1)).await.unwrap();

    assert!(!db
        .update_status_if("casecase", Status::Downloading, Status::Downloaded, Some("/a"))
        .await
        .unwrap());
    let r = db.get("casecase").await.unwrap().unwrap();
    assert_eq!(r.status, Status::Processing);
    assert_eq!(r.artifact_path, "");

    assert!(db
        .update_status_if("casecase", Status::Processing, Status::Downloading, None)
        .await
        .unwrap());
    assert!(db
        .update_status_if("casecase", Status::Downloading, Status::Downloaded, Some("/a"))
        .await
        .unwrap());
    // A stale writer that still believes the record is downloading loses.
    assert!(!db
        .update_status_if("casecase", Status::Downloading, Status::Downloading, None)
        .await
        .unwrap());
    assert_eq!(db.get("casecase").await.unwrap().unwrap().status, Status::Downloaded);
    assert!(!db
        .update_status_if("missing0", Status::Processing, Status::Failed, None)
        .await
        .unwrap());
}

#[tokio::test]
async fn duplicate_create_keeps_first_record() {
    let db = FluxDb::open_memory().await.unwrap();
    db.create(&record("dupdupdu", 1)).await.unwrap();
    db.update_status("dupdupdu", Status::Downloading, None)
        .await
        .unwrap();

    let mut again = record("dupdupdu", 2);
    again.content_ref = "magnet:?xt=urn:btih:OTHER".into();
    assert_eq!(db.create(&again).await.unwrap(), Inserted::Duplicate);

    let r = db.get("dupdupdu").await.unwrap().unwrap();
    assert_eq!(r.status, Status::Downloading);
    assert_eq!(r.content_ref, "magnet:?xt=urn:btih:dupdupdu");
    assert_eq!(db.list_active().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_ids() {
    let db = FluxDb::open_memory().await.unwrap();
    assert!(db.get("missing0").await.unwrap().is_none());
    assert!(!db
        .update_status("missing0", Status::Failed, None)
        .await
        .unwrap());
    assert!(!db.set_deleted("missing0", true).await.unwrap());
}

#[tokio::test]
async fn list_active_is_newest_first_and_skips_deleted() {
    let db = FluxDb::open_memory().await.unwrap();
    db.create(&record("old00000", 100)).await.unwrap();
    db.create(&record("new00000", 200)).await.unwrap();
    db.create(&record("same0000", 200)).await.unwrap();

    let ids: Vec<String> = db
        .list_active()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    // Same timestamp: later insert first.
    assert_eq!(ids, ["same0000", "new00000", "old00000"]);

    assert!(db.set_deleted("new00000", true).await.unwrap());
    let ids: Vec<String> = db
        .list_active()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, ["same0000", "old00000"]);
    assert!(db.get("new00000").await.unwrap().unwrap().deleted);

    db.set_deleted("new00000", false).await.unwrap();
    assert_eq!(db.list_active().await.unwrap().len(), 3);
}

#[tokio::test]
async fn list_records_in_filters_by_status() {
    let db = FluxDb::open_memory().await.unwrap();
    db.create(&record("p0000000", 1)).await.unwrap();
    db.create(&record("d0000000", 2)).await.unwrap();
    db.update_status("d0000000", Status::Downloading, None)
        .await
        .unwrap();
    let downloading = db.list_records_in(Status::Downloading).await.unwrap();
    assert_eq!(downloading.len(), 1);
    assert_eq!(downloading[0].id, "d0000000");
}

#[tokio::test]
async fn queue_delivers_in_publish_order_and_acks() {
    let db = FluxDb::open_memory().await.unwrap();
    db.publish(&Job::new("j1", "ref-1")).await.unwrap();
    db.publish(&Job::new("j2", "ref-2")).await.unwrap();

    let d1 = db.claim_next("worker-0").await.unwrap().unwrap();
    assert_eq!(d1.job, Job::new("j1", "ref-1"));
    assert_eq!(d1.deliveries, 1);
    db.ack(&d1).await.unwrap();

    let d2 = db.claim_next("worker-0").await.unwrap().unwrap();
    assert_eq!(d2.job.id, "j2");
    db.ack(&d2).await.unwrap();

    assert!(db.claim_next("worker-0").await.unwrap().is_none());
    let counts = db.queue_counts().await.unwrap();
    assert_eq!(
        counts,
        QueueCounts {
            ready: 0,
            pending: 0,
            acked: 2
        }
    );
    // Acking twice is harmless.
    db.ack(&d2).await.unwrap();
}

#[tokio::test]
async fn unacked_delivery_is_redelivered_to_same_consumer_first() {
    let db = FluxDb::open_memory().await.unwrap();
    db.publish(&Job::new("j1", "ref-1")).await.unwrap();
    db.publish(&Job::new("j2", "ref-2")).await.unwrap();

    let first = db.claim_next("worker-0").await.unwrap().unwrap();
    assert_eq!(first.job.id, "j1");

    // Not acknowledged: the same consumer gets it again before j2.
    let again = db.claim_next("worker-0").await.unwrap().unwrap();
    assert_eq!(again.entry_id, first.entry_id);
    assert_eq!(again.deliveries, 2);
    assert!(db.has_unacked("j1").await.unwrap());

    // Another consumer never sees an entry pending elsewhere.
    let other = db.claim_next("worker-1").await.unwrap().unwrap();
    assert_eq!(other.job.id, "j2");

    db.ack(&again).await.unwrap();
    assert!(!db.has_unacked("j1").await.unwrap());
    let counts = db.queue_counts().await.unwrap();
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.acked, 1);
}

#[tokio::test]
async fn consume_times_out_when_queue_is_empty() {
    let db = FluxDb::open_memory()
        .await
        .unwrap()
        .with_queue_timing(Duration::from_millis(60), Duration::from_millis(10));
    let start = std::time::Instant::now();
    assert!(db.consume("worker-0").await.unwrap().is_none());
    assert!(start.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn consume_wakes_up_for_late_publish() {
    let db = FluxDb::open_memory()
        .await
        .unwrap()
        .with_queue_timing(Duration::from_secs(5), Duration::from_millis(10));
    let publisher = db.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        publisher.publish(&Job::new("late", "ref")).await.unwrap();
    });
    let d = db.consume("worker-0").await.unwrap().expect("delivery");
    assert_eq!(d.job.id, "late");
}

#[tokio::test]
async fn leases_are_live_until_released_or_expired() {
    let db = FluxDb::open_memory().await.unwrap();
    assert!(db.live_leases().await.unwrap().is_empty());

    db.hold_lease("runner-a", Duration::from_secs(60)).await.unwrap();
    // A zero ttl expires immediately.
    db.hold_lease("runner-b", Duration::ZERO).await.unwrap();
    assert_eq!(db.live_leases().await.unwrap(), vec!["runner-a".to_string()]);

    db.hold_lease("runner-b", Duration::from_secs(60)).await.unwrap();
    assert_eq!(db.live_leases().await.unwrap().len(), 2);

    db.release_lease("runner-a").await.unwrap();
    db.release_lease("runner-a").await.unwrap();
    assert_eq!(db.live_leases().await.unwrap(), vec!["runner-b".to_string()]);
}
