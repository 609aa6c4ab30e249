use crate::error::{GatewayError, Result};
use crate::types::Reading;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

struct Transaction {
    /// Operation id to completed flag.
    operations: HashMap<String, bool>,
    readings: Vec<Reading>,
    failures: Vec<GatewayError>,
    finished: watch::Sender<bool>,
}

impl Transaction {
    fn pending(&self) -> usize {
        self.operations.values().filter(|done| !**done).count()
    }
}

/// What a finished transaction produced.
#[derive(Debug, Default)]
pub struct Outcome {
    /// In completion order.
    pub readings: Vec<Reading>,
    /// Errors recorded for operations that were discarded.
    pub failures: Vec<GatewayError>,
}

/// In-flight command transactions and the leaf operations they wait on.
#[derive(Default)]
pub struct TransactionTracker {
    transactions: DashMap<String, Transaction>,
    operations: DashMap<String, String>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transaction with no operations counts as finished.
    pub fn begin(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let (finished, _) = watch::channel(true);
        self.transactions.insert(
            id.clone(),
            Transaction {
                operations: HashMap::new(),
                readings: Vec::new(),
                failures: Vec::new(),
                finished,
            },
        );
        id
    }

    pub fn new_operation(&self, transaction: &str) -> Result<String> {
        let mut tx = self
            .transactions
            .get_mut(transaction)
            .ok_or_else(|| GatewayError::not_found("transaction", transaction))?;
        let op = Uuid::new_v4().to_string();
        tx.operations.insert(op.clone(), false);
        tx.finished.send_replace(false);
        drop(tx);
        self.operations.insert(op.clone(), transaction.to_string());
        Ok(op)
    }

    /// Record `readings` for `operation`. Unknown or already completed ids are
    /// logged and ignored; returns whether the call had an effect.
    pub fn complete(&self, operation: &str, readings: Vec<Reading>) -> bool {
        self.finish(operation, readings, None)
    }

    /// Mark `operation` done without readings, e.g. after a failed send.
    pub fn discard(&self, operation: &str, reason: GatewayError) -> bool {
        self.finish(operation, Vec::new(), Some(reason))
    }

    fn finish(
        &self,
        operation: &str,
        readings: Vec<Reading>,
        failure: Option<GatewayError>,
    ) -> bool {
        let Some((_, transaction)) = self.operations.remove(operation) else {
            warn!(operation, "completion for unknown operation");
            return false;
        };
        let Some(mut tx) = self.transactions.get_mut(&transaction) else {
            warn!(operation, transaction = %transaction, "completion after transaction ended");
            return false;
        };
        match tx.operations.get_mut(operation) {
            Some(done) if !*done => *done = true,
            _ => {
                warn!(operation, "duplicate completion");
                return false;
            }
        }
        tx.readings.extend(readings);
        if let Some(reason) = failure {
            tx.failures.push(reason);
        }
        if tx.pending() == 0 {
            debug!(transaction = %transaction, "transaction finished");
            tx.finished.send_replace(true);
        }
        true
    }

    pub fn is_finished(&self, transaction: &str) -> Option<bool> {
        self.transactions
            .get(transaction)
            .map(|tx| *tx.finished.borrow())
    }

    /// Wait until every operation of `transaction` has completed, then remove it.
    /// On timeout the transaction is removed as well and late completions are ignored.
    pub async fn await_completion(&self, transaction: &str, timeout: Duration) -> Result<Outcome> {
        let mut finished = self
            .transactions
            .get(transaction)
            .map(|tx| tx.finished.subscribe())
            .ok_or_else(|| GatewayError::not_found("transaction", transaction))?;

        let waited = tokio::time::timeout(timeout, async {
            finished.wait_for(|done| *done).await.map(|_| ())
        })
        .await;

        let removed = self.remove(transaction);
        match (waited, removed) {
            (Ok(Ok(())), Some(tx)) => Ok(Outcome {
                readings: tx.readings,
                failures: tx.failures,
            }),
            (Err(_), Some(tx)) => Err(GatewayError::Timeout {
                transaction: transaction.to_string(),
                pending: tx.pending(),
            }),
            _ => Err(GatewayError::not_found("transaction", transaction)),
        }
    }

    pub fn cancel(&self, transaction: &str) -> bool {
        self.remove(transaction).is_some()
    }

    /// Cancels `transaction` when dropped, so an abandoned caller leaves nothing behind.
    pub fn guard<'a>(&'a self, transaction: &'a str) -> TransactionGuard<'a> {
        TransactionGuard {
            tracker: self,
            transaction,
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn remove(&self, transaction: &str) -> Option<Transaction> {
        let (_, tx) = self.transactions.remove(transaction)?;
        for op in tx.operations.keys() {
            self.operations.remove(op);
        }
        Some(tx)
    }
}

/// See [`TransactionTracker::guard`].
pub struct TransactionGuard<'a> {
    tracker: &'a TransactionTracker,
    transaction: &'a str,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.tracker.cancel(self.transaction) {
            debug!(transaction = %self.transaction, "transaction abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn reading(name: &str) -> Vec<Reading> {
        vec![Reading::new("d1", name, "1")]
    }

    #[test]
    fn empty_transaction_is_finished() {
        let tracker = TransactionTracker::new();
        let tx = tracker.begin();
        assert_eq!(tracker.is_finished(&tx), Some(true));
    }

    #[test]
    fn finishes_after_exactly_n_completions() {
        let tracker = TransactionTracker::new();
        let tx = tracker.begin();
        let ops: Vec<_> = (0..3).map(|_| tracker.new_operation(&tx).unwrap()).collect();
        assert_eq!(tracker.is_finished(&tx), Some(false));

        assert!(tracker.complete(&ops[2], reading("c")));
        assert!(tracker.complete(&ops[0], reading("a")));
        assert_eq!(tracker.is_finished(&tx), Some(false));
        assert!(!tracker.complete(&ops[0], reading("a")));
        assert_eq!(tracker.is_finished(&tx), Some(false));
        assert!(tracker.complete(&ops[1], reading("b")));
        assert_eq!(tracker.is_finished(&tx), Some(true));
    }

    #[test]
    fn unknown_completion_leaves_others_alone() {
        let tracker = TransactionTracker::new();
        let tx = tracker.begin();
        let _op = tracker.new_operation(&tx).unwrap();
        assert!(!tracker.complete("not-an-op", reading("x")));
        assert_eq!(tracker.is_finished(&tx), Some(false));
    }

    #[tokio::test]
    async fn await_returns_readings_in_completion_order() {
        let tracker = Arc::new(TransactionTracker::new());
        let tx = tracker.begin();
        let a = tracker.new_operation(&tx).unwrap();
        let b = tracker.new_operation(&tx).unwrap();

        let t = tracker.clone();
        tokio::spawn(async move {
            t.complete(&b, reading("b"));
            tokio::time::sleep(Duration::from_millis(10)).await;
            t.discard(&a, GatewayError::SendFailure("offline".into()));
        });

        let outcome = tracker
            .await_completion(&tx, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(outcome.readings.len(), 1);
        assert_eq!(outcome.readings[0].name, "b");
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(outcome.failures[0], GatewayError::SendFailure(_)));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn await_times_out_and_forgets_transaction() {
        let tracker = TransactionTracker::new();
        let tx = tracker.begin();
        let op = tracker.new_operation(&tx).unwrap();
        let err = tracker
            .await_completion(&tx, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { pending: 1, .. }));
        assert!(tracker.is_empty());
        assert!(!tracker.complete(&op, reading("late")));
    }

    #[tokio::test]
    async fn dropped_waiter_releases_transaction() {
        let tracker = Arc::new(TransactionTracker::new());
        let tx = tracker.begin();
        let op = tracker.new_operation(&tx).unwrap();

        let waiting = {
            let tracker = tracker.clone();
            let tx = tx.clone();
            async move {
                let _guard = tracker.guard(&tx);
                tracker.await_completion(&tx, Duration::from_secs(10)).await
            }
        };
        assert!(tokio::time::timeout(Duration::from_millis(20), waiting)
            .await
            .is_err());
        assert!(tracker.is_empty());
        assert!(!tracker.complete(&op, reading("late")));

        // a guard outliving a normal completion is a no-op
        let tx = tracker.begin();
        {
            let _guard = tracker.guard(&tx);
            tracker
                .await_completion(&tx, Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert!(tracker.is_empty());
    }
}
