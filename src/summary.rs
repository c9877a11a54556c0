use crate::attribution::{AttributionReport, SpendKey};
use crate::error::{EngineError, Result};
use crate::schema::{Budget, BudgetDetailRow, BudgetSummary};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;

pub struct BudgetSummaryBuilder;

impl BudgetSummaryBuilder {
    /// Merges stored allocation targets with computed spend.
    ///
    /// Rows keep the stored allocation order; spend on keys without an allocation is
    /// appended as zero-budget rows in key order. When the same key is allocated more
    /// than once, spend lands on the first such row.
    pub fn build(
        supplier_id: &str,
        year: i32,
        budget: Option<&Budget>,
        attribution: &AttributionReport,
        now: DateTime<Utc>,
    ) -> BudgetSummary {
        let allocations = budget.map(|b| b.allocations.as_slice()).unwrap_or_default();

        let mut details: Vec<BudgetDetailRow> = allocations
            .iter()
            .map(|a| BudgetDetailRow {
                sector_id: a.sector_id.clone(),
                marketing_channel_id: a.marketing_channel_id.clone(),
                branch_id: a.branch_id.clone(),
                budget_amount: a.budget_amount,
                detailed_spend: 0.0,
            })
            .collect();

        let mut row_index: HashMap<SpendKey, usize> = HashMap::new();
        for (idx, row) in details.iter().enumerate() {
            row_index
                .entry(SpendKey::new(
                    row.sector_id.as_str(),
                    row.marketing_channel_id.as_str(),
                    row.branch_id.as_str(),
                ))
                .or_insert(idx);
        }

        let mut unbudgeted = 0;
        for (key, amount) in &attribution.spend {
            match row_index.get(key) {
                Some(&idx) => details[idx].detailed_spend += amount,
                None => {
                    unbudgeted += 1;
                    details.push(BudgetDetailRow {
                        sector_id: key.sector_id.clone(),
                        marketing_channel_id: key.marketing_channel_id.clone(),
                        branch_id: key.branch_id.clone(),
                        budget_amount: 0.0,
                        detailed_spend: *amount,
                    });
                }
            }
        }

        let total_budget = allocations.iter().map(|a| a.budget_amount).sum();
        let total_spend = details.iter().map(|r| r.detailed_spend).sum();

        debug!(
            "Summary {}/{}: {} rows ({} unbudgeted), budget {:.2}, spend {:.2}",
            supplier_id,
            year,
            details.len(),
            unbudgeted,
            total_budget,
            total_spend
        );

        BudgetSummary {
            supplier_id: supplier_id.to_string(),
            year,
            total_budget,
            total_spend,
            details,
            is_unexpected: budget.is_some_and(|b| b.is_unexpected),
            unattributed: attribution.unattributed.clone(),
            last_updated: now,
        }
    }
}

impl BudgetSummary {
    /// Re-derives both totals from the detail rows.
    pub fn verify(&self, tolerance: f64) -> Result<()> {
        let derived_budget: f64 = self.details.iter().map(|r| r.budget_amount).sum();
        let derived_spend: f64 = self.details.iter().map(|r| r.detailed_spend).sum();

        for (field, stored, derived) in [
            ("total_budget", self.total_budget, derived_budget),
            ("total_spend", self.total_spend, derived_spend),
        ] {
            if !stored.is_finite() || (stored - derived).abs() > tolerance {
                return Err(EngineError::SummaryMismatch {
                    supplier_id: self.supplier_id.clone(),
                    year: self.year,
                    field: field.to_string(),
                    stored,
                    derived,
                });
            }
        }

        Ok(())
    }
}
