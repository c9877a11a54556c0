use crate::config::UnmatchedAllocationStrategy;
use crate::normalizer::{ExpenseLineItem, LineItemNormalizer, NormalizedContract};
use crate::schema::Expense;
use crate::utils::split_by_weights;
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItemSpend {
    pub spent_total: f64,
    /// Portion of `spent_total` posted on or before the evaluation day.
    pub spent_to_date: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractAllocation {
    pub contract_id: String,
    pub spend: BTreeMap<String, LineItemSpend>,
    /// Expense lines referencing the contract that had no usable date.
    pub skipped_expenses: usize,
}

impl ContractAllocation {
    pub fn get(&self, line_item_id: &str) -> LineItemSpend {
        self.spend.get(line_item_id).copied().unwrap_or_default()
    }

    pub fn total_spent(&self) -> f64 {
        self.spend.values().map(|s| s.spent_total).sum()
    }
}

pub struct ContractAllocationMatcher {
    strategy: UnmatchedAllocationStrategy,
    normalizer: LineItemNormalizer,
}

impl ContractAllocationMatcher {
    pub fn new(strategy: UnmatchedAllocationStrategy) -> Self {
        Self {
            strategy,
            normalizer: LineItemNormalizer::new(),
        }
    }

    pub fn allocate(
        &self,
        contract: &NormalizedContract,
        expenses: &[Expense],
        today: NaiveDate,
    ) -> ContractAllocation {
        let mut totals = vec![LineItemSpend::default(); contract.items.len()];
        let mut skipped_expenses = 0;

        if !contract.is_empty() {
            for expense in expenses {
                for line in self.normalizer.normalize_expense(expense) {
                    if line.contract_id.as_deref() != Some(contract.contract_id.as_str()) {
                        continue;
                    }
                    if line.amount == 0.0 || !line.amount.is_finite() {
                        continue;
                    }

                    let Some(date) = expense.date else {
                        warn!(
                            "Expense {} references contract {} but has no valid date; not allocated",
                            expense.id, contract.contract_id
                        );
                        skipped_expenses += 1;
                        continue;
                    };

                    let shares = self.shares_for(contract, &line, date);
                    let to_date = date <= today;
                    for (idx, share) in shares {
                        totals[idx].spent_total += share;
                        if to_date {
                            totals[idx].spent_to_date += share;
                        }
                    }
                }
            }
        }

        let spend: BTreeMap<String, LineItemSpend> = contract
            .items
            .iter()
            .zip(totals)
            .map(|(item, spend)| (item.id.clone(), spend))
            .collect();

        debug!(
            "Allocated spend for contract {} across {} line items ({} undated expense lines skipped)",
            contract.contract_id,
            spend.len(),
            skipped_expenses
        );

        ContractAllocation {
            contract_id: contract.contract_id.clone(),
            spend,
            skipped_expenses,
        }
    }

    /// `(item index, amount)` pairs for one expense line.
    fn shares_for(
        &self,
        contract: &NormalizedContract,
        line: &ExpenseLineItem,
        date: NaiveDate,
    ) -> Vec<(usize, f64)> {
        if line.synthetic {
            return self.unmatched_shares(contract, line.amount);
        }

        if let Some(idx) = line
            .contract_line_item_id
            .as_deref()
            .and_then(|id| contract.index_of(id))
        {
            return vec![(idx, line.amount)];
        }

        let active: Vec<usize> = contract
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_active_on(date))
            .map(|(idx, _)| idx)
            .collect();

        if active.is_empty() {
            return self.unmatched_shares(contract, line.amount);
        }

        let weights: Vec<f64> = active
            .iter()
            .map(|&idx| contract.items[idx].total_amount.max(0.0))
            .collect();
        active
            .into_iter()
            .zip(split_by_weights(line.amount, &weights))
            .collect()
    }

    fn unmatched_shares(&self, contract: &NormalizedContract, amount: f64) -> Vec<(usize, f64)> {
        match self.strategy {
            UnmatchedAllocationStrategy::First => contract
                .by_start
                .first()
                .map(|&idx| vec![(idx, amount)])
                .unwrap_or_default(),
            UnmatchedAllocationStrategy::ProportionalAll => {
                let weights: Vec<f64> = contract
                    .items
                    .iter()
                    .map(|item| item.total_amount.max(0.0))
                    .collect();
                split_by_weights(amount, &weights)
                    .into_iter()
                    .enumerate()
                    .collect()
            }
        }
    }
}
