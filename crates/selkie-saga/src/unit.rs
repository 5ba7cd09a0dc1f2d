//! Transaction unit
//!
//! The coordinator side of a distributed transaction. Participants stay
//! ignorant of each other; the unit owns the ordering, the per-step
//! timeout, and the reverse-order compensation on failure.

use async_trait::async_trait;
use bytes::Bytes;
use selkie_core::{Error, Result, TimeProvider, TransactionOptions, WallClockTime};
use selkie_storage::{CommitRecord, CommitStore, TransactionStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Identifier of one distributed transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One participant-facing step of a transaction.
///
/// `execute` applies the step's effect tagged with the transaction id,
/// `confirm` makes it permanent, `cancel` reverses it. All three must be
/// idempotent: a crashed coordinator may re-drive any of them.
#[async_trait]
pub trait TransactionStep<I: Send + Sync>: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, transaction_id: &TransactionId, input: &I) -> Result<()>;

    async fn confirm(&self, transaction_id: &TransactionId, input: &I) -> Result<()>;

    async fn cancel(&self, transaction_id: &TransactionId, input: &I) -> Result<()>;
}

/// Coordinator for one kind of distributed transaction.
///
/// Steps run in declared order; the first failure or timeout cancels the
/// failed step and every step before it, newest first, then records
/// `Rollback`. A fully
/// executed set is confirmed in order and recorded `Confirmed`. No path
/// leaves the set half-committed.
pub struct TransactionUnit<I> {
    name: String,
    steps: Vec<Arc<dyn TransactionStep<I>>>,
    commits: Arc<dyn CommitStore>,
    options: TransactionOptions,
    time: Arc<dyn TimeProvider>,
}

impl<I> TransactionUnit<I>
where
    I: Serialize + Send + Sync,
{
    pub fn new(name: impl Into<String>, commits: Arc<dyn CommitStore>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            commits,
            options: TransactionOptions::default(),
            time: Arc::new(WallClockTime::new()),
        }
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_time(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Append a step; order of declaration is order of execution.
    pub fn step(mut self, step: Arc<dyn TransactionStep<I>>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the transaction to a terminal outcome.
    ///
    /// Returns the transaction id on `Confirmed`. On `Rollback` the error
    /// is [`Error::TransactionRolledBack`] carrying the original failure
    /// as its reason, returned after compensation completed. A failed
    /// confirm propagates as-is and leaves the record `Raised` for a
    /// re-drive.
    #[instrument(skip(self, input), fields(unit = %self.name), level = "debug")]
    pub async fn ask(&self, input: I) -> Result<TransactionId> {
        let transaction_id = TransactionId::generate();
        let data = serde_json::to_vec(&input)
            .map_err(|e| Error::serialization_failed(e.to_string()))?;
        let record = CommitRecord {
            transaction_id: transaction_id.to_string(),
            data: Bytes::from(data),
            status: TransactionStatus::Raised,
            created_at_ms: self.time.now_ms(),
            finished_at_ms: None,
        };
        self.commits.insert(&record).await?;
        debug!(unit = %self.name, transaction_id = %transaction_id, "transaction raised");

        // Count of steps whose execute was started, including one that
        // failed partway: it may have persisted its transaction mark
        // before erroring and must still be cancelled.
        let mut touched = 0usize;
        let mut failure: Option<Error> = None;
        for step in &self.steps {
            touched += 1;
            match self
                .bounded(&transaction_id, step.execute(&transaction_id, &input), step.name())
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        unit = %self.name,
                        transaction_id = %transaction_id,
                        step = step.name(),
                        error = %e,
                        "step failed, rolling back"
                    );
                    failure = Some(e);
                    break;
                }
                Err(timeout) => {
                    warn!(
                        unit = %self.name,
                        transaction_id = %transaction_id,
                        step = step.name(),
                        timeout_ms = self.options.timeout_ms,
                        "step timed out, rolling back"
                    );
                    failure = Some(timeout);
                    break;
                }
            }
        }

        match failure {
            None => {
                self.confirm_all(&transaction_id, &input).await?;
                self.finish(&transaction_id, TransactionStatus::Confirmed).await?;
                info!(unit = %self.name, transaction_id = %transaction_id, "transaction confirmed");
                Ok(transaction_id)
            }
            Some(err) => {
                self.cancel_touched(&transaction_id, &input, touched).await;
                self.finish(&transaction_id, TransactionStatus::Rollback).await?;
                info!(
                    unit = %self.name,
                    transaction_id = %transaction_id,
                    "transaction rolled back"
                );
                Err(Error::TransactionRolledBack {
                    transaction_id: transaction_id.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Look up the durable outcome of a transaction
    pub async fn status(&self, transaction_id: &TransactionId) -> Result<Option<CommitRecord>> {
        self.commits.get(transaction_id.as_str()).await
    }

    /// Delete terminal commit records older than the retention window.
    /// Returns rows removed.
    pub async fn purge_finished(&self, now_ms: u64) -> Result<u64> {
        let cutoff = now_ms.saturating_sub(self.options.commit_retention_ms);
        let removed = self.commits.delete_finished_before(cutoff).await?;
        if removed > 0 {
            debug!(unit = %self.name, removed, "purged finished commit records");
        }
        Ok(removed)
    }

    async fn bounded<F>(
        &self,
        transaction_id: &TransactionId,
        fut: F,
        step: &str,
    ) -> std::result::Result<Result<()>, Error>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        tokio::time::timeout(Duration::from_millis(self.options.timeout_ms), fut)
            .await
            .map_err(|_| Error::TransactionTimeout {
                transaction_id: transaction_id.to_string(),
                step: step.to_string(),
                timeout_ms: self.options.timeout_ms,
            })
    }

    async fn confirm_all(&self, transaction_id: &TransactionId, input: &I) -> Result<()> {
        for step in &self.steps {
            match self
                .bounded(transaction_id, step.confirm(transaction_id, input), step.name())
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // Nothing can be cancelled once confirms started; the
                    // commit record stays Raised for a re-drive.
                    error!(
                        unit = %self.name,
                        transaction_id = %transaction_id,
                        step = step.name(),
                        error = %e,
                        "confirm failed, transaction left open for re-drive"
                    );
                    return Err(e);
                }
                Err(timeout) => {
                    error!(
                        unit = %self.name,
                        transaction_id = %transaction_id,
                        step = step.name(),
                        "confirm timed out, transaction left open for re-drive"
                    );
                    return Err(timeout);
                }
            }
        }
        Ok(())
    }

    /// Cancel the first `touched` steps, newest first. The failed step is
    /// included: its execute may have marked the participant before
    /// erroring. Best effort: a failing cancel is logged and the rest
    /// still run.
    async fn cancel_touched(&self, transaction_id: &TransactionId, input: &I, touched: usize) {
        for step in self.steps[..touched].iter().rev() {
            match self
                .bounded(transaction_id, step.cancel(transaction_id, input), step.name())
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    unit = %self.name,
                    transaction_id = %transaction_id,
                    step = step.name(),
                    error = %e,
                    "cancel failed, manual compensation required"
                ),
                Err(_) => error!(
                    unit = %self.name,
                    transaction_id = %transaction_id,
                    step = step.name(),
                    "cancel timed out, manual compensation required"
                ),
            }
        }
    }

    async fn finish(&self, transaction_id: &TransactionId, status: TransactionStatus) -> Result<()> {
        self.commits
            .update_status(transaction_id.as_str(), status, self.time.now_ms())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selkie_storage::MemoryCommitStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Serialize)]
    struct Amount(i64);

    struct RecordingStep {
        name: String,
        journal: Arc<Mutex<Vec<String>>>,
        fail_execute: AtomicBool,
        fail_confirm: AtomicBool,
        hang_execute: AtomicBool,
    }

    impl RecordingStep {
        fn new(name: &str, journal: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                journal,
                fail_execute: AtomicBool::new(false),
                fail_confirm: AtomicBool::new(false),
                hang_execute: AtomicBool::new(false),
            })
        }

        fn log(&self, action: &str) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, action));
        }
    }

    #[async_trait]
    impl TransactionStep<Amount> for RecordingStep {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _tx: &TransactionId, _input: &Amount) -> Result<()> {
            if self.hang_execute.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_execute.load(Ordering::SeqCst) {
                return Err(Error::internal("execute refused"));
            }
            self.log("execute");
            Ok(())
        }

        async fn confirm(&self, _tx: &TransactionId, _input: &Amount) -> Result<()> {
            if self.fail_confirm.load(Ordering::SeqCst) {
                return Err(Error::internal("confirm refused"));
            }
            self.log("confirm");
            Ok(())
        }

        async fn cancel(&self, _tx: &TransactionId, _input: &Amount) -> Result<()> {
            self.log("cancel");
            Ok(())
        }
    }

    fn unit(
        steps: &[Arc<RecordingStep>],
        commits: Arc<MemoryCommitStore>,
    ) -> TransactionUnit<Amount> {
        let mut unit = TransactionUnit::new("transfer", commits);
        for step in steps {
            unit = unit.step(step.clone() as Arc<dyn TransactionStep<Amount>>);
        }
        unit
    }

    #[tokio::test]
    async fn test_all_steps_confirm_in_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let debit = RecordingStep::new("debit", journal.clone());
        let credit = RecordingStep::new("credit", journal.clone());
        let commits = Arc::new(MemoryCommitStore::new());
        let unit = unit(&[debit, credit], commits.clone());

        let transaction_id = unit.ask(Amount(50)).await.unwrap();

        assert_eq!(
            *journal.lock().unwrap(),
            vec!["debit:execute", "credit:execute", "debit:confirm", "credit:confirm"]
        );
        let record = commits.get(transaction_id.as_str()).await.unwrap().unwrap();
        assert_eq!(record.status, TransactionStatus::Confirmed);
        assert!(record.finished_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_failure_cancels_executed_steps_in_reverse() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let debit = RecordingStep::new("debit", journal.clone());
        let credit = RecordingStep::new("credit", journal.clone());
        let audit = RecordingStep::new("audit", journal.clone());
        credit.fail_execute.store(true, Ordering::SeqCst);
        let commits = Arc::new(MemoryCommitStore::new());
        let unit = unit(&[debit, credit, audit], commits.clone());

        let err = unit.ask(Amount(50)).await.unwrap_err();
        match err {
            Error::TransactionRolledBack { reason, .. } => {
                assert!(reason.contains("execute refused"), "reason carries the cause: {reason}");
            }
            other => panic!("expected TransactionRolledBack, got {other:?}"),
        }

        // The failed step is cancelled too: its execute may have marked
        // the participant before erroring. Unreached steps are not.
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["debit:execute", "credit:cancel", "debit:cancel"]
        );
        let records = commits.list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TransactionStatus::Rollback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_rolls_back() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let debit = RecordingStep::new("debit", journal.clone());
        let credit = RecordingStep::new("credit", journal.clone());
        credit.hang_execute.store(true, Ordering::SeqCst);
        let commits = Arc::new(MemoryCommitStore::new());
        let unit = unit(&[debit, credit], commits.clone());

        let err = unit.ask(Amount(50)).await.unwrap_err();
        match err {
            Error::TransactionRolledBack { reason, .. } => {
                assert!(reason.contains("timed out"), "reason carries the timeout: {reason}");
            }
            other => panic!("expected TransactionRolledBack, got {other:?}"),
        }
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["debit:execute", "credit:cancel", "debit:cancel"]
        );
    }

    #[tokio::test]
    async fn test_confirm_failure_leaves_record_open_for_redrive() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let debit = RecordingStep::new("debit", journal.clone());
        let credit = RecordingStep::new("credit", journal.clone());
        credit.fail_confirm.store(true, Ordering::SeqCst);
        let commits = Arc::new(MemoryCommitStore::new());
        let unit = unit(&[debit, credit], commits.clone());

        // Nothing can be cancelled once confirms started, so the raw
        // failure propagates and no cancel runs
        let err = unit.ask(Amount(50)).await.unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["debit:execute", "credit:execute", "debit:confirm"]
        );

        // The record stays Raised so an operator can re-drive the confirms
        let records = commits.list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TransactionStatus::Raised);
        assert!(records[0].finished_at_ms.is_none());
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_finished_records() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let debit = RecordingStep::new("debit", journal.clone());
        let commits = Arc::new(MemoryCommitStore::new());
        let clock = Arc::new(selkie_core::ManualClock::new(1_000));
        let unit = unit(&[debit], commits.clone()).with_time(clock.clone());

        unit.ask(Amount(1)).await.unwrap();

        // Inside the retention window: kept
        assert_eq!(unit.purge_finished(clock.now_ms()).await.unwrap(), 0);

        // Past the window: removed
        let later = clock.now_ms() + TransactionOptions::default().commit_retention_ms + 1;
        assert_eq!(unit.purge_finished(later).await.unwrap(), 1);
        assert!(commits.list().await.is_empty());
    }
}
