use crate::backfill::{ResultSink, SnapshotSource};
use crate::error::{EngineError, Result};
use crate::schema::*;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct StoreState {
    expenses: Vec<Expense>,
    contracts: Vec<Contract>,
    budgets: Vec<Budget>,
    master: MasterData,
    summaries: BTreeMap<(String, i32), Map<String, Value>>,
    overdue: BTreeMap<String, Map<String, Value>>,
}

/// Keeps results as JSON documents; upserts merge top-level fields so fields written elsewhere survive.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_master(master: MasterData) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.write() {
            state.master = master;
        }
        store
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| EngineError::SnapshotUnavailable {
                key: "in-memory store".to_string(),
                details: "lock poisoned".to_string(),
            })
    }

    fn write(&self, key: &str) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| EngineError::PersistenceFailed {
                key: key.to_string(),
                details: "lock poisoned".to_string(),
            })
    }

    pub fn insert_expense(&self, expense: Expense) -> Result<()> {
        self.write(&expense.id)?.expenses.push(expense);
        Ok(())
    }

    pub fn insert_contract(&self, contract: Contract) -> Result<()> {
        self.write(&contract.id)?.contracts.push(contract);
        Ok(())
    }

    /// Replaces any budget already stored for the same `(supplier, year)`.
    pub fn insert_budget(&self, budget: Budget) -> Result<()> {
        let key = format!("{}/{}", budget.supplier_id, budget.year);
        let mut state = self.write(&key)?;
        state
            .budgets
            .retain(|b| !(b.supplier_id == budget.supplier_id && b.year == budget.year));
        state.budgets.push(budget);
        Ok(())
    }

    /// Seeds or patches a stored summary document directly, as another writer would.
    pub fn patch_summary_document(
        &self,
        supplier_id: &str,
        year: i32,
        fields: Map<String, Value>,
    ) -> Result<()> {
        let key = format!("{}/{}", supplier_id, year);
        let mut state = self.write(&key)?;
        let doc = state
            .summaries
            .entry((supplier_id.to_string(), year))
            .or_default();
        doc.extend(fields);
        Ok(())
    }

    pub fn summary_document(&self, supplier_id: &str, year: i32) -> Result<Option<Value>> {
        Ok(self
            .read()?
            .summaries
            .get(&(supplier_id.to_string(), year))
            .cloned()
            .map(Value::Object))
    }

    pub fn summary(&self, supplier_id: &str, year: i32) -> Result<Option<BudgetSummary>> {
        self.summary_document(supplier_id, year)?
            .map(|doc| serde_json::from_value(doc).map_err(EngineError::from))
            .transpose()
    }

    pub fn contract_overdue(&self, contract_id: &str) -> Result<Option<ContractOverdue>> {
        self.read()?
            .overdue
            .get(contract_id)
            .cloned()
            .map(|doc| serde_json::from_value(Value::Object(doc)).map_err(EngineError::from))
            .transpose()
    }
}

fn merge_fields(doc: &mut Map<String, Value>, update: Value) {
    if let Value::Object(fields) = update {
        doc.extend(fields);
    }
}

#[async_trait]
impl SnapshotSource for InMemoryStore {
    async fn supplier_ids(&self) -> Result<Vec<String>> {
        let state = self.read()?;
        let ids: BTreeSet<String> = state
            .expenses
            .iter()
            .map(|e| e.supplier_id.clone())
            .chain(state.budgets.iter().map(|b| b.supplier_id.clone()))
            .chain(state.contracts.iter().map(|c| c.supplier_id.clone()))
            .filter(|id| !id.is_empty())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn supplier_year_inputs(
        &self,
        supplier_id: &str,
        year: i32,
    ) -> Result<SupplierYearInputs> {
        let state = self.read()?;
        Ok(SupplierYearInputs {
            supplier_id: supplier_id.to_string(),
            year,
            // All years: amortized expenses reach into neighbouring years.
            expenses: state
                .expenses
                .iter()
                .filter(|e| e.supplier_id == supplier_id)
                .cloned()
                .collect(),
            budget: state
                .budgets
                .iter()
                .find(|b| b.supplier_id == supplier_id && b.year == year)
                .cloned(),
            master: state.master.clone(),
        })
    }

    async fn contract_inputs(&self, contract_id: &str) -> Result<ContractInputs> {
        let state = self.read()?;
        let contract = state
            .contracts
            .iter()
            .find(|c| c.id == contract_id)
            .cloned()
            .ok_or_else(|| EngineError::SnapshotUnavailable {
                key: format!("contract {}", contract_id),
                details: "no such contract".to_string(),
            })?;
        let expenses = state
            .expenses
            .iter()
            .filter(|e| e.supplier_id == contract.supplier_id)
            .cloned()
            .collect();
        Ok(ContractInputs { contract, expenses })
    }
}

#[async_trait]
impl ResultSink for InMemoryStore {
    async fn upsert_budget_summary(&self, summary: &BudgetSummary) -> Result<()> {
        let update = serde_json::to_value(summary)?;
        let key = format!("{}/{}", summary.supplier_id, summary.year);
        let mut state = self.write(&key)?;
        let doc = state
            .summaries
            .entry((summary.supplier_id.clone(), summary.year))
            .or_default();
        merge_fields(doc, update);
        Ok(())
    }

    async fn upsert_contract_overdue(&self, result: &ContractOverdue) -> Result<()> {
        let update = serde_json::to_value(result)?;
        let mut state = self.write(&result.contract_id)?;
        let doc = state.overdue.entry(result.contract_id.clone()).or_default();
        merge_fields(doc, update);
        Ok(())
    }
}
