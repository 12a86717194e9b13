//! Due-date scanner.
//!
//! Once per configured interval the scanner looks for active tasks whose due
//! date falls in `[now, now + lookahead]` and that were not notified yet,
//! delivers a webhook for each one through the [`NotificationGateway`] and
//! flags the task as sent only after a confirmed 2xx answer.
//!
//! Delivery is at-least-once: a crash between the delivery and the flag
//! update means the next cycle notifies again. Failed deliveries are not
//! retried inside a cycle; the task simply stays a candidate until it either
//! succeeds or its due date drops out of the window.
//!
//! Cycles never overlap. A cycle that starts while another one is running
//! returns [`CycleOutcome::Skipped`] without touching the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::queries::TaskRepository;
use crate::domain::Task;
use crate::errors::AppError;
use crate::notifier::NotificationGateway;


/// The slice of the task store the scanner depends on.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Active tasks with `webhook_sent = false` and a due date in `[from, to]`.
    async fn find_candidates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Task>, AppError>;

    /// Persists `webhook_sent = true` for `task`. Returns false when the row
    /// changed since it was read and was left untouched.
    async fn mark_sent(&self, task: &Task) -> Result<bool, AppError>;
}

pub struct SqliteNotificationStore {
    pool: SqlitePool,
}

impl SqliteNotificationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn find_candidates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Task>, AppError> {
        let repo = TaskRepository::new(&self.pool);
        Ok(repo.find_notification_candidates(from, to).await?)
    }

    async fn mark_sent(&self, task: &Task) -> Result<bool, AppError> {
        let repo = TaskRepository::new(&self.pool);
        Ok(repo.mark_webhook_sent(task).await?)
    }
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub interval: Duration,
    pub lookahead: Duration,
    /// Deliveries allowed in flight at once within a cycle.
    pub concurrency: usize,
    /// Upper bound for one cycle. Deliveries still running when it expires are aborted.
    pub cycle_timeout: Duration,
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.scan_interval,
            lookahead: config.lookahead,
            concurrency: config.webhook_concurrency,
            cycle_timeout: config.cycle_timeout,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub candidates: usize,
    pub delivered: usize,
    pub failed: usize,
    pub missing_url: usize,
    /// Delivered, but the sent flag could not be stored.
    pub not_marked: usize,
    pub aborted: usize,
}

impl CycleReport {
    fn record(&mut self, result: DeliveryResult) {
        match result {
            DeliveryResult::Delivered => self.delivered += 1,
            DeliveryResult::Failed => self.failed += 1,
            DeliveryResult::NotMarked => self.not_marked += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle held the guard.
    Skipped,
    Completed(CycleReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryResult {
    Delivered,
    Failed,
    NotMarked,
}

/// Held for the duration of a cycle; releases the single-flight flag on drop.
struct CycleGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct DueDateScanner {
    store: Arc<dyn NotificationStore>,
    gateway: NotificationGateway,
    settings: ScanSettings,
    running: Arc<AtomicBool>,
}

impl DueDateScanner {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        gateway: NotificationGateway,
        settings: ScanSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            settings,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts the tick loop on the runtime. Cancel `token` to stop it.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    /// Runs a cycle on every tick until `token` is cancelled.
    ///
    /// Ticks are aligned to multiples of the interval since the Unix epoch.
    /// Errors never leave this loop; they are logged and the next tick runs as usual.
    pub async fn run(self, token: CancellationToken) {
        let mut ticker =
            tokio::time::interval_at(next_aligned_tick(self.settings.interval), self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval = ?self.settings.interval,
            lookahead = ?self.settings.lookahead,
            "Due-date scanner started."
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Scanner received cancellation signal. Exiting.");
                    break;
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            tracing::info!("Scanner cancelled mid-cycle. Exiting.");
                            break;
                        }
                        outcome = self.run_cycle() => log_outcome(outcome),
                    }
                }
            }
        }
        tracing::info!("Scanner exited cleanly!")
    }

    /// Runs one scan cycle.
    ///
    /// # Returns
    /// * `Ok(CycleOutcome::Skipped)` - A cycle was already running.
    /// * `Ok(CycleOutcome::Completed(_))` - Every candidate was handled.
    /// * `Err(AppError)` - The window could not be computed or the candidate
    ///   query failed; nothing was sent or stored.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, AppError> {
        let Some(_guard) = CycleGuard::acquire(&self.running) else {
            return Ok(CycleOutcome::Skipped);
        };

        let lookahead = chrono::Duration::from_std(self.settings.lookahead)
            .map_err(|e| AppError::Config(format!("lookahead out of range: {e}")))?;
        let now = Utc::now();
        let window_end = now.checked_add_signed(lookahead).ok_or_else(|| {
            AppError::Config(format!("lookahead {lookahead} overflows the scan window"))
        })?;

        tracing::debug!(%now, %window_end, "Checking for upcoming tasks");

        let candidates = self.store.find_candidates(now, window_end).await?;

        let mut report = CycleReport {
            candidates: candidates.len(),
            ..CycleReport::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut deliveries = JoinSet::new();

        for task in candidates {
            if task.webhook_target().is_none() {
                tracing::warn!(task_id = task.id, "Task has no webhook URL configured");
                report.missing_url += 1;
                continue;
            }

            let store = Arc::clone(&self.store);
            let gateway = self.gateway.clone();
            let semaphore = Arc::clone(&semaphore);

            deliveries.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                notify_task(store.as_ref(), &gateway, task).await
            });
        }

        let drained = tokio::time::timeout(self.settings.cycle_timeout, async {
            while let Some(joined) = deliveries.join_next().await {
                match joined {
                    Ok(result) => report.record(result),
                    Err(e) => {
                        tracing::error!(error = %e, "Delivery task panicked");
                        report.failed += 1;
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            report.aborted = deliveries.len();
            deliveries.abort_all();
            tracing::warn!(
                aborted = report.aborted,
                timeout = ?self.settings.cycle_timeout,
                "Scan cycle overran its deadline; aborting remaining deliveries"
            );
        }

        Ok(CycleOutcome::Completed(report))
    }
}

/// Delivers one notification and remembers the success.
async fn notify_task(
    store: &dyn NotificationStore,
    gateway: &NotificationGateway,
    task: Task,
) -> DeliveryResult {
    match gateway.deliver(&task).await {
        Ok(status) => match store.mark_sent(&task).await {
            Ok(true) => {
                tracing::info!(
                    task_id = task.id,
                    title = %task.title,
                    status = status.as_u16(),
                    "Webhook notification sent"
                );
                DeliveryResult::Delivered
            }
            Ok(false) => {
                tracing::warn!(
                    task_id = task.id,
                    "Webhook delivered but the task changed meanwhile; leaving it eligible"
                );
                DeliveryResult::NotMarked
            }
            Err(e) => {
                tracing::error!(
                    task_id = task.id,
                    error = %e,
                    "Webhook delivered but recording it failed; it will be sent again"
                );
                DeliveryResult::NotMarked
            }
        },
        Err(e) => {
            tracing::warn!(
                task_id = task.id,
                title = %task.title,
                error = %e,
                "Failed to send webhook"
            );
            DeliveryResult::Failed
        }
    }
}

fn log_outcome(outcome: Result<CycleOutcome, AppError>) {
    match outcome {
        Ok(CycleOutcome::Completed(report)) if report.candidates == 0 => {
            tracing::debug!("No upcoming tasks requiring notifications");
        }
        Ok(CycleOutcome::Completed(report)) => {
            tracing::info!(
                candidates = report.candidates,
                delivered = report.delivered,
                failed = report.failed,
                missing_url = report.missing_url,
                not_marked = report.not_marked,
                aborted = report.aborted,
                "Scan cycle finished"
            );
        }
        Ok(CycleOutcome::Skipped) => {
            tracing::warn!("Previous scan cycle still running; skipping this tick");
        }
        Err(e) => {
            tracing::error!(error = %e, "Error checking upcoming tasks");
        }
    }
}

/// The next instant that falls on a whole multiple of `interval` since the epoch.
fn next_aligned_tick(interval: Duration) -> Instant {
    let period = interval.as_millis().max(1);
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let wait = u64::try_from(period - since_epoch % period).unwrap_or(u64::MAX);
    let now = Instant::now();

    now.checked_add(Duration::from_millis(wait)).unwrap_or(now)
}
