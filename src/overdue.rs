use crate::config::DayCountRounding;
use crate::matcher::{ContractAllocation, LineItemSpend};
use crate::normalizer::{ContractLineItem, NormalizedContract};
use crate::schema::{ContractOverdue, LineItemOverdue};
use crate::utils::{fractional_days, inclusive_days, start_of_day};
use chrono::NaiveDateTime;
use log::{debug, warn};

#[derive(Debug)]
enum ItemFault {
    NonFiniteInput,
    NonFiniteResult,
}

pub struct OverdueCalculator {
    rounding: DayCountRounding,
    start_gate: bool,
}

impl OverdueCalculator {
    pub fn new(rounding: DayCountRounding, start_gate: bool) -> Self {
        Self {
            rounding,
            start_gate,
        }
    }

    /// Overdue per line item and for the whole contract as of the instant `as_of`.
    ///
    /// A line item that cannot be computed reports zero and does not affect the others.
    pub fn overdue(
        &self,
        contract: &NormalizedContract,
        allocation: &ContractAllocation,
        as_of: NaiveDateTime,
    ) -> ContractOverdue {
        let line_items: Vec<LineItemOverdue> = contract
            .items
            .iter()
            .map(|item| {
                let spend = allocation.get(&item.id);
                self.line_item_overdue(item, spend, as_of)
                    .unwrap_or_else(|fault| {
                        warn!(
                            "Overdue for line item {} of contract {} degraded to zero: {:?}",
                            item.id, contract.contract_id, fault
                        );
                        degraded(item, spend)
                    })
            })
            .collect();

        let total_overdue = line_items.iter().map(|li| li.overdue).sum();

        debug!(
            "Contract {} overdue as of {}: {:.2}",
            contract.contract_id, as_of, total_overdue
        );

        ContractOverdue {
            contract_id: contract.contract_id.clone(),
            line_items,
            total_overdue,
            skipped_expenses: allocation.skipped_expenses,
        }
    }

    fn line_item_overdue(
        &self,
        item: &ContractLineItem,
        spend: LineItemSpend,
        as_of: NaiveDateTime,
    ) -> Result<LineItemOverdue, ItemFault> {
        let total = item.total_amount;
        if !total.is_finite() || !spend.spent_total.is_finite() || !spend.spent_to_date.is_finite()
        {
            return Err(ItemFault::NonFiniteInput);
        }

        let remaining = (total - spend.spent_total).max(0.0);
        let Some(expected_to_date) = self.expected_to_date(item, as_of) else {
            return Ok(LineItemOverdue {
                line_item_id: item.id.clone(),
                description: item.description.clone(),
                total_amount: total,
                spent_total: spend.spent_total,
                spent_to_date: spend.spent_to_date,
                remaining,
                expected_to_date: 0.0,
                overdue: 0.0,
            });
        };

        let shortfall = expected_to_date - spend.spent_to_date.min(expected_to_date);
        let overdue = shortfall.clamp(0.0, remaining);
        if !overdue.is_finite() {
            return Err(ItemFault::NonFiniteResult);
        }

        Ok(LineItemOverdue {
            line_item_id: item.id.clone(),
            description: item.description.clone(),
            total_amount: total,
            spent_total: spend.spent_total,
            spent_to_date: spend.spent_to_date,
            remaining,
            expected_to_date,
            overdue,
        })
    }

    /// Straight-line plan up to `as_of`, or `None` when the item cannot be overdue at all:
    /// non-positive total, missing or reversed window, or not started under the start gate.
    fn expected_to_date(&self, item: &ContractLineItem, as_of: NaiveDateTime) -> Option<f64> {
        let total = item.total_amount;
        if total <= 0.0 {
            return None;
        }
        let window = item.window()?;
        let start = start_of_day(window.start);
        if self.start_gate && as_of < start {
            return None;
        }

        let total_days = inclusive_days(window.start, window.end).max(1);
        let effective_end = as_of.min(start_of_day(window.end));
        let elapsed_days =
            (self.rounding.apply(fractional_days(start, effective_end)) + 1).clamp(0, total_days);
        Some(total / total_days as f64 * elapsed_days as f64)
    }
}

fn degraded(item: &ContractLineItem, spend: LineItemSpend) -> LineItemOverdue {
    LineItemOverdue {
        line_item_id: item.id.clone(),
        description: item.description.clone(),
        total_amount: item.total_amount,
        spent_total: spend.spent_total,
        spent_to_date: spend.spent_to_date,
        remaining: 0.0,
        expected_to_date: 0.0,
        overdue: 0.0,
    }
}
