// Cron check-in producer

use crate::checkin::event::{Event, EventKind};
use crate::checkin::scheduler::Scheduler;
use std::sync::Arc;
use uuid::Uuid;

/// Tracks one run of a scheduled unit of work
///
/// Both edges of a run share a random digest, so the collection service
/// can pair the start with the finish even when several runs of the same
/// identifier overlap.
pub struct Cron {
    scheduler: Arc<Scheduler>,
    identifier: String,
    digest: String,
}

impl Cron {
    pub fn new(scheduler: Arc<Scheduler>, identifier: impl Into<String>) -> Self {
        Self {
            scheduler,
            identifier: identifier.into(),
            digest: Uuid::new_v4().simple().to_string()[..16].to_string(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Report that this run started
    pub async fn start(&self) {
        self.schedule(EventKind::Start).await;
    }

    /// Report that this run finished
    pub async fn finish(&self) {
        self.schedule(EventKind::Finish).await;
    }

    async fn schedule(&self, kind: EventKind) {
        self.scheduler
            .schedule(Event::cron(
                self.identifier.as_str(),
                self.digest.as_str(),
                kind,
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_sixteen_hex_chars() {
        // No scheduler needed to inspect digest generation
        let digest = Uuid::new_v4().simple().to_string()[..16].to_string();
        assert_eq!(digest.len(), 16);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_each_cron_instance_gets_its_own_digest() {
        let a = Uuid::new_v4().simple().to_string();
        let b = Uuid::new_v4().simple().to_string();
        assert_ne!(a, b);
    }
}
