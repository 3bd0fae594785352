//! Periodic removal of expired notifications.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::clock::Clock;
use crate::Result;
use crate::database::repositories::NotificationRepository;

/// Default interval between reaper runs.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Deletes stored notifications whose expiry has passed.
pub struct ExpiryReaper {
    repository: Arc<dyn NotificationRepository>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ExpiryReaper {
    pub fn new(
        repository: Arc<dyn NotificationRepository>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            repository,
            clock,
            interval,
        }
    }

    /// One bulk delete of everything expired as of now.
    pub async fn run_once(&self) -> Result<u64> {
        let now = self.clock.now();
        let deleted = self.repository.delete_expired(now).await?;
        if deleted > 0 {
            info!(deleted, "Removed expired notifications");
        } else {
            debug!("No expired notifications");
        }
        Ok(deleted)
    }

    /// Run every `interval`, starting one interval from now, until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "Expiry reaper started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Expiry reaper run failed");
                    }
                }
            }
        }
        info!("Expiry reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::batch::tests::{RecordingRepository, notification};
    use crate::notification::clock::ManualClock;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn deletes_strictly_expired_rows_once() {
        let repo = Arc::new(RecordingRepository::default());
        let n = notification(0);
        repo.insert_batch(std::slice::from_ref(&n)).await.unwrap();

        let clock = Arc::new(ManualClock::new(n.expires_at));
        let reaper = ExpiryReaper::new(repo.clone(), clock.clone(), DEFAULT_REAPER_INTERVAL);

        assert_eq!(reaper.run_once().await.unwrap(), 0);
        assert_eq!(repo.row_count(), 1);

        clock.advance(ChronoDuration::milliseconds(1));
        assert_eq!(reaper.run_once().await.unwrap(), 1);
        assert_eq!(reaper.run_once().await.unwrap(), 0);
        assert_eq!(repo.row_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_run_happens_one_interval_after_start() {
        let repo = Arc::new(RecordingRepository::default());
        let n = notification(0);
        repo.insert_batch(std::slice::from_ref(&n)).await.unwrap();
        let clock = Arc::new(ManualClock::new(n.expires_at + ChronoDuration::days(1)));
        let reaper = Arc::new(ExpiryReaper::new(
            repo.clone(),
            clock,
            Duration::from_secs(60),
        ));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reaper.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(repo.row_count(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(repo.row_count(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
