//! Status tracker: the only writer of record status.
//!
//! Every write goes through [`Transition`], so the lifecycle
//! `Processing -> Downloading -> Downloaded | Failed` cannot be broken by a
//! caller. A transition checks the current status against the lattice and
//! writes only if the store still holds that status.

use std::sync::Arc;

use crate::error::StatusError;
use crate::store::{ContentRecord, Inserted, Status, StatusStore};

/// A requested status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Ingress accepted the job.
    StartDownload,
    /// Artifact persisted at `artifact_path`.
    Complete { artifact_path: String },
    Fail,
}

impl Transition {
    pub fn target(&self) -> Status {
        match self {
            Transition::StartDownload => Status::Downloading,
            Transition::Complete { .. } => Status::Downloaded,
            Transition::Fail => Status::Failed,
        }
    }
}

#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn StatusStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Create a record in `Processing`. A duplicate id is reported, not an error.
    pub async fn create(&self, record: &ContentRecord) -> Result<Inserted, StatusError> {
        Ok(self.store.create(record).await?)
    }

    pub async fn get(&self, id: &str) -> Result<ContentRecord, StatusError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| StatusError::NotFound(id.to_string()))
    }

    pub async fn list_active(&self) -> Result<Vec<ContentRecord>, StatusError> {
        Ok(self.store.list_active().await?)
    }

    /// Non-deleted records currently in `status`, oldest first.
    pub async fn list_in(&self, status: Status) -> Result<Vec<ContentRecord>, StatusError> {
        Ok(self.store.list_in(status).await?)
    }

    pub async fn set_deleted(&self, id: &str, deleted: bool) -> Result<(), StatusError> {
        if self.store.set_deleted(id, deleted).await? {
            Ok(())
        } else {
            Err(StatusError::NotFound(id.to_string()))
        }
    }

    /// Apply `transition` to record `id`. Returns the status it moved from.
    ///
    /// The write is a compare-and-set against the status just read, so a
    /// concurrent writer that got there first forces a re-read and a fresh
    /// lattice check instead of being overwritten.
    pub async fn transition(&self, id: &str, transition: Transition) -> Result<Status, StatusError> {
        let to = transition.target();
        let artifact_path = match &transition {
            Transition::Complete { artifact_path } => Some(artifact_path.as_str()),
            _ => None,
        };

        loop {
            let from = self.get(id).await?.status;
            if !from.can_transition_to(to) {
                return Err(StatusError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to,
                });
            }
            if self
                .store
                .update_status_if(id, from, to, artifact_path)
                .await?
            {
                tracing::debug!(job_id = %id, from = %from, to = %to, "status transition");
                return Ok(from);
            }
            tracing::debug!(job_id = %id, from = %from, to = %to, "status changed underneath; re-checking");
        }
    }

    pub async fn mark_failed(&self, id: &str) -> Result<Status, StatusError> {
        self.transition(id, Transition::Fail).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FluxDb;

    async fn tracker() -> StatusTracker {
        StatusTracker::new(Arc::new(FluxDb::open_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn happy_path_sets_artifact() {
        let t = tracker().await;
        t.create(&ContentRecord::new("abcd1234", "magnet:?xt=urn:btih:EXAMPLE", 1))
            .await
            .unwrap();
        assert_eq!(
            t.transition("abcd1234", Transition::StartDownload).await.unwrap(),
            Status::Processing
        );
        t.transition(
            "abcd1234",
            Transition::Complete {
                artifact_path: "/data/abcd1234/a.mkv".into(),
            },
        )
        .await
        .unwrap();
        let r = t.get("abcd1234").await.unwrap();
        assert_eq!(r.status, Status::Downloaded);
        assert_eq!(r.artifact_path, "/data/abcd1234/a.mkv");
    }

    #[tokio::test]
    async fn terminal_states_reject_everything() {
        let t = tracker().await;
        t.create(&ContentRecord::new("abcd1234", "r", 1)).await.unwrap();
        t.mark_failed("abcd1234").await.unwrap();
        for tr in [
            Transition::StartDownload,
            Transition::Fail,
            Transition::Complete {
                artifact_path: "x".into(),
            },
        ] {
            let err = t.transition("abcd1234", tr).await.unwrap_err();
            assert!(matches!(
                err,
                StatusError::InvalidTransition {
                    from: Status::Failed,
                    ..
                }
            ));
        }
        assert_eq!(t.get("abcd1234").await.unwrap().artifact_path, "");
    }

    #[tokio::test]
    async fn cannot_complete_without_downloading() {
        let t = tracker().await;
        t.create(&ContentRecord::new("abcd1234", "r", 1)).await.unwrap();
        let err = t
            .transition(
                "abcd1234",
                Transition::Complete {
                    artifact_path: "x".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StatusError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn redelivered_job_can_restart_download() {
        let t = tracker().await;
        t.create(&ContentRecord::new("abcd1234", "r", 1)).await.unwrap();
        t.transition("abcd1234", Transition::StartDownload).await.unwrap();
        assert_eq!(
            t.transition("abcd1234", Transition::StartDownload).await.unwrap(),
            Status::Downloading
        );
    }

    /// Delays compare-and-set writes to `Downloading` so another transition
    /// can land between the read and the write.
    struct SlowStart {
        inner: FluxDb,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl StatusStore for SlowStart {
        async fn create(&self, record: &ContentRecord) -> anyhow::Result<Inserted> {
            self.inner.create(record).await
        }
        async fn get(&self, id: &str) -> anyhow::Result<Option<ContentRecord>> {
            self.inner.get(id).await
        }
        async fn update_status(
            &self,
            id: &str,
            status: Status,
            artifact_path: Option<&str>,
        ) -> anyhow::Result<bool> {
            self.inner.update_status(id, status, artifact_path).await
        }
        async fn update_status_if(
            &self,
            id: &str,
            expected: Status,
            status: Status,
            artifact_path: Option<&str>,
        ) -> anyhow::Result<bool> {
            if status == Status::Downloading {
                tokio::time::sleep(self.delay).await;
            }
            self.inner
                .update_status_if(id, expected, status, artifact_path)
                .await
        }
        async fn list_active(&self) -> anyhow::Result<Vec<ContentRecord>> {
            self.inner.list_active().await
        }
        async fn set_deleted(&self, id: &str, deleted: bool) -> anyhow::Result<bool> {
            self.inner.set_deleted(id, deleted).await
        }
        async fn list_in(&self, status: Status) -> anyhow::Result<Vec<ContentRecord>> {
            self.inner.list_in(status).await
        }
    }

    #[tokio::test]
    async fn late_restart_cannot_revert_a_completed_download() {
        let db = FluxDb::open_memory().await.unwrap();
        db.create(&ContentRecord::new("racerace", "r", 1)).await.unwrap();
        db.update_status("racerace", Status::Downloading, None)
            .await
            .unwrap();
        let slow = StatusTracker::new(Arc::new(SlowStart {
            inner: db.clone(),
            delay: std::time::Duration::from_millis(100),
        }));
        let fast = StatusTracker::new(Arc::new(db.clone()));

        let restart = tokio::spawn(async move {
            slow.transition("racerace", Transition::StartDownload).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        fast.transition(
            "racerace",
            Transition::Complete {
                artifact_path: "/a/b.mp4".into(),
            },
        )
        .await
        .unwrap();

        let err = restart.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            StatusError::InvalidTransition {
                from: Status::Downloaded,
                to: Status::Downloading,
                ..
            }
        ));
        let rec = fast.get("racerace").await.unwrap();
        assert_eq!(rec.status, Status::Downloaded);
        assert_eq!(rec.artifact_path, "/a/b.mp4");
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let t = tracker().await;
        assert!(matches!(t.get("nope0000").await, Err(StatusError::NotFound(_))));
        assert!(matches!(
            t.transition("nope0000", Transition::Fail).await,
            Err(StatusError::NotFound(_))
        ));
        assert!(matches!(
            t.set_deleted("nope0000", true).await,
            Err(StatusError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_create_is_reported() {
        let t = tracker().await;
        let r = ContentRecord::new("abcd1234", "r", 1);
        assert_eq!(t.create(&r).await.unwrap(), Inserted::New);
        assert_eq!(t.create(&r).await.unwrap(), Inserted::Duplicate);
    }
}
