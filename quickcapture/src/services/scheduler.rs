/// Scheduler Service
/// Runs the backlog sweep on a schedule using cron expressions
use crate::database::EntryStore;
use crate::error::{AppError, Result};
use crate::services::ProcessingQueue;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Sweep frequency options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepFrequency {
    Minutes(u32),
    Hours(u32),
    Days(u32),
}

impl SweepFrequency {
    /// Convert frequency to cron expression
    pub fn to_cron(self) -> String {
        match self {
            SweepFrequency::Minutes(1) => "0 * * * * *".to_string(),
            SweepFrequency::Minutes(m) => format!("0 */{} * * * *", m),
            SweepFrequency::Hours(1) => "0 0 * * * *".to_string(),
            SweepFrequency::Hours(h) => format!("0 0 */{} * * *", h),
            // Daily sweeps run at 3 AM
            SweepFrequency::Days(1) => "0 0 3 * * *".to_string(),
            SweepFrequency::Days(d) => format!("0 0 3 */{} * *", d),
        }
    }
}

impl FromStr for SweepFrequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // "15m", "2h", "3d", or "hourly" / "daily" / "weekly"
        let s = s.trim().to_lowercase();

        match s.as_str() {
            "hourly" => return Ok(SweepFrequency::Hours(1)),
            "daily" => return Ok(SweepFrequency::Days(1)),
            "weekly" => return Ok(SweepFrequency::Days(7)),
            _ => {}
        }

        let Some(unit) = s.chars().last() else {
            return Err("Empty frequency string".to_string());
        };
        let number_part = &s[..s.len() - unit.len_utf8()];

        let value: u32 = number_part
            .parse()
            .map_err(|_| format!("Invalid number in frequency: {}", s))?;

        if value == 0 {
            return Err("Frequency value must be greater than 0".to_string());
        }

        match unit {
            'm' if value < 60 => Ok(SweepFrequency::Minutes(value)),
            'h' if value < 24 => Ok(SweepFrequency::Hours(value)),
            'd' => Ok(SweepFrequency::Days(value)),
            'm' | 'h' => Err(format!("Frequency out of range: {}", s)),
            _ => Err(format!(
                "Invalid frequency unit '{}'. Use 'm' (minutes), 'h' (hours), or 'd' (days)",
                unit
            )),
        }
    }
}

/// Cron-driven backlog sweeps
pub struct SweepScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    queue: ProcessingQueue,
    store: Arc<dyn EntryStore>,
    current_job_id: Arc<RwLock<Option<Uuid>>>,
}

impl SweepScheduler {
    pub async fn new(queue: ProcessingQueue, store: Arc<dyn EntryStore>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            queue,
            store,
            current_job_id: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn start(&self) -> Result<()> {
        let scheduler = self.scheduler.read().await;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to start scheduler: {}", e)))?;
        tracing::info!("Sweep scheduler started");
        Ok(())
    }

    /// Replace the current sweep job, or just remove it when `enabled` is false
    pub async fn schedule_sweep(&self, frequency: SweepFrequency, enabled: bool) -> Result<()> {
        self.cancel_sweep().await?;

        if !enabled {
            tracing::info!("Scheduled sweeps disabled");
            return Ok(());
        }

        let cron_expr = frequency.to_cron();
        let queue = self.queue.clone();
        let store = Arc::clone(&self.store);

        let job = Job::new_async(cron_expr.clone(), move |_uuid, _l| {
            let queue = queue.clone();
            let store = Arc::clone(&store);
            Box::pin(async move {
                tracing::info!("Running scheduled backlog sweep");
                if let Err(e) = queue.sweep(store.as_ref()).await {
                    tracing::error!("Scheduled sweep failed: {}", e);
                }
            })
        })
        .map_err(|e| AppError::Scheduler(format!("Failed to create sweep job: {}", e)))?;

        let job_id = job.guid();

        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to schedule job: {}", e)))?;

        let mut current_job = self.current_job_id.write().await;
        *current_job = Some(job_id);

        tracing::info!("Backlog sweep scheduled: {:?} ({})", frequency, cron_expr);
        Ok(())
    }

    pub async fn cancel_sweep(&self) -> Result<()> {
        let mut current_job = self.current_job_id.write().await;

        if let Some(job_id) = *current_job {
            let scheduler = self.scheduler.write().await;
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| AppError::Scheduler(format!("Failed to remove job: {}", e)))?;

            *current_job = None;
            tracing::info!("Backlog sweep schedule cancelled");
        }

        Ok(())
    }

    pub async fn is_scheduled(&self) -> bool {
        self.current_job_id.read().await.is_some()
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.write().await;
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to shutdown scheduler: {}", e)))?;
        tracing::info!("Sweep scheduler shutdown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frequencies() {
        assert_eq!("15m".parse::<SweepFrequency>(), Ok(SweepFrequency::Minutes(15)));
        assert_eq!("2H".parse::<SweepFrequency>(), Ok(SweepFrequency::Hours(2)));
        assert_eq!("3d".parse::<SweepFrequency>(), Ok(SweepFrequency::Days(3)));
        assert_eq!("daily".parse::<SweepFrequency>(), Ok(SweepFrequency::Days(1)));
        assert_eq!(" weekly ".parse::<SweepFrequency>(), Ok(SweepFrequency::Days(7)));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<SweepFrequency>().is_err());
        assert!("0m".parse::<SweepFrequency>().is_err());
        assert!("90m".parse::<SweepFrequency>().is_err());
        assert!("5x".parse::<SweepFrequency>().is_err());
        assert!("abc".parse::<SweepFrequency>().is_err());
    }

    #[test]
    fn test_cron_expressions() {
        assert_eq!(SweepFrequency::Minutes(1).to_cron(), "0 * * * * *");
        assert_eq!(SweepFrequency::Minutes(15).to_cron(), "0 */15 * * * *");
        assert_eq!(SweepFrequency::Hours(1).to_cron(), "0 0 * * * *");
        assert_eq!(SweepFrequency::Hours(6).to_cron(), "0 0 */6 * * *");
        assert_eq!(SweepFrequency::Days(1).to_cron(), "0 0 3 * * *");
    }
}
