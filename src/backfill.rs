use crate::engine::AllocationEngine;
use crate::error::Result;
use crate::schema::{BudgetSummary, ContractInputs, ContractOverdue, SupplierYearInputs};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use futures::lock::Mutex as AsyncMutex;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Read-only snapshots from the stores that own the records.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn supplier_ids(&self) -> Result<Vec<String>>;

    async fn supplier_year_inputs(&self, supplier_id: &str, year: i32)
        -> Result<SupplierYearInputs>;

    async fn contract_inputs(&self, contract_id: &str) -> Result<ContractInputs>;
}

/// Idempotent, merge-semantics writes of computed results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn upsert_budget_summary(&self, summary: &BudgetSummary) -> Result<()>;

    async fn upsert_contract_overdue(&self, result: &ContractOverdue) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecomputeKey {
    Summary { supplier_id: String, year: i32 },
    Contract { contract_id: String },
}

impl fmt::Display for RecomputeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecomputeKey::Summary { supplier_id, year } => {
                write!(f, "summary {}/{}", supplier_id, year)
            }
            RecomputeKey::Contract { contract_id } => write!(f, "contract {}", contract_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillFailure {
    pub supplier_id: String,
    pub year: i32,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub succeeded: Vec<(String, i32)>,
    pub failures: Vec<BackfillFailure>,
}

impl BackfillReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Every `(supplier, year)` a backfill around `reference_year` recomputes.
pub fn backfill_keys(supplier_ids: &[String], reference_year: i32) -> Vec<(String, i32)> {
    supplier_ids
        .iter()
        .flat_map(|supplier| {
            (reference_year - 1..=reference_year + 1).map(move |year| (supplier.clone(), year))
        })
        .collect()
}

/// Runs recomputations with at most one in flight per key; later triggers for a
/// busy key wait their turn and then read a fresh snapshot.
pub struct RecomputeCoordinator<S, K> {
    engine: AllocationEngine,
    source: S,
    sink: K,
    key_locks: Mutex<HashMap<RecomputeKey, Arc<AsyncMutex<()>>>>,
}

impl<S: SnapshotSource, K: ResultSink> RecomputeCoordinator<S, K> {
    pub fn new(engine: AllocationEngine, source: S, sink: K) -> Self {
        Self {
            engine,
            source,
            sink,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &AllocationEngine {
        &self.engine
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    fn lock_for(&self, key: &RecomputeKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drops the key's entry once no other trigger holds or waits on it.
    /// Entries are only cloned under the map lock, so the count cannot race upward here.
    fn release(&self, key: &RecomputeKey, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    async fn run_exclusive<T, F>(&self, key: RecomputeKey, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let lock = self.lock_for(&key);
        let outcome = {
            let _guard = lock.lock().await;
            debug!("Recomputing {}", key);
            work.await
        };
        self.release(&key, lock);
        outcome
    }

    pub async fn recompute_summary(&self, supplier_id: &str, year: i32) -> Result<BudgetSummary> {
        let key = RecomputeKey::Summary {
            supplier_id: supplier_id.to_string(),
            year,
        };
        self.run_exclusive(key, async {
            let inputs = self.source.supplier_year_inputs(supplier_id, year).await?;
            let summary = self.engine.budget_summary(&inputs, Utc::now())?;
            self.sink.upsert_budget_summary(&summary).await?;
            Ok(summary)
        })
        .await
    }

    pub async fn recompute_contract(
        &self,
        contract_id: &str,
        as_of: NaiveDateTime,
    ) -> Result<ContractOverdue> {
        let key = RecomputeKey::Contract {
            contract_id: contract_id.to_string(),
        };
        self.run_exclusive(key, async {
            let inputs = self.source.contract_inputs(contract_id).await?;
            let result = self
                .engine
                .contract_overdue(&inputs.contract, &inputs.expenses, as_of);
            self.sink.upsert_contract_overdue(&result).await?;
            Ok(result)
        })
        .await
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.key_locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_default()
    }

    /// Recomputes every supplier for the year before, of and after `reference_year`.
    ///
    /// Failing keys are reported and do not stop the others. Only failing to list
    /// suppliers aborts the run.
    pub async fn backfill(&self, reference_year: i32) -> Result<BackfillReport> {
        let suppliers = self.source.supplier_ids().await?;
        let keys = backfill_keys(&suppliers, reference_year);
        let concurrency = self.engine.config().backfill_concurrency;

        info!(
            "Backfilling {} summaries for {} suppliers around {} ({} at a time)",
            keys.len(),
            suppliers.len(),
            reference_year,
            concurrency
        );

        let outcomes: Vec<(String, i32, Result<BudgetSummary>)> = stream::iter(keys)
            .map(|(supplier_id, year)| async move {
                let outcome = self.recompute_summary(&supplier_id, year).await;
                (supplier_id, year, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = BackfillReport::default();
        for (supplier_id, year, outcome) in outcomes {
            match outcome {
                Ok(_) => report.succeeded.push((supplier_id, year)),
                Err(e) => {
                    warn!("Backfill of {}/{} failed: {}", supplier_id, year, e);
                    report.failures.push(BackfillFailure {
                        supplier_id,
                        year,
                        error: e.to_string(),
                    });
                }
            }
        }
        report.succeeded.sort();
        report
            .failures
            .sort_by(|a, b| (&a.supplier_id, a.year).cmp(&(&b.supplier_id, b.year)));

        info!(
            "Backfill around {} finished: {} succeeded, {} failed",
            reference_year,
            report.succeeded.len(),
            report.failures.len()
        );

        Ok(report)
    }
}
