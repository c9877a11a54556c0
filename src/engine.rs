use crate::attribution::{AttributionReport, SpendAttributor};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::matcher::{ContractAllocation, ContractAllocationMatcher};
use crate::normalizer::LineItemNormalizer;
use crate::overdue::OverdueCalculator;
use crate::schema::*;
use crate::summary::BudgetSummaryBuilder;
use crate::utils::DateWindow;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::info;

/// Tolerance used when a freshly built summary is checked before it is handed out.
pub const SUMMARY_TOLERANCE: f64 = 1e-6;

/// Pure entry points over an in-memory snapshot. Holds no state besides its configuration.
#[derive(Debug, Clone)]
pub struct AllocationEngine {
    config: EngineConfig,
}

impl AllocationEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn attribute_spend(
        &self,
        expenses: &[Expense],
        master: &MasterData,
        year: i32,
    ) -> Result<AttributionReport> {
        let window = DateWindow::calendar_year(year)?;
        Ok(SpendAttributor::new(&self.config).attribute(expenses, master, &window))
    }

    /// Budget-vs-spend summary for one `(supplier, year)`, verified before it is returned.
    pub fn budget_summary(
        &self,
        inputs: &SupplierYearInputs,
        now: DateTime<Utc>,
    ) -> Result<BudgetSummary> {
        let attribution = self.attribute_spend(&inputs.expenses, &inputs.master, inputs.year)?;

        let summary = BudgetSummaryBuilder::build(
            &inputs.supplier_id,
            inputs.year,
            inputs.budget.as_ref(),
            &attribution,
            now,
        );
        summary.verify(SUMMARY_TOLERANCE)?;

        info!(
            "Built budget summary for supplier {} / {}: budget {:.2}, spend {:.2}, unattributed {:.2}",
            summary.supplier_id,
            summary.year,
            summary.total_budget,
            summary.total_spend,
            summary.unattributed.total()
        );

        Ok(summary)
    }

    pub fn allocate_contract(
        &self,
        contract: &Contract,
        expenses: &[Expense],
        as_of: NaiveDateTime,
    ) -> ContractAllocation {
        let normalized = LineItemNormalizer::new().normalize_contract(contract);
        self.matcher().allocate(&normalized, expenses, as_of.date())
    }

    /// Overdue per line item of `contract` at the instant `as_of`.
    pub fn contract_overdue(
        &self,
        contract: &Contract,
        expenses: &[Expense],
        as_of: NaiveDateTime,
    ) -> ContractOverdue {
        let normalized = LineItemNormalizer::new().normalize_contract(contract);
        let allocation = self.matcher().allocate(&normalized, expenses, as_of.date());

        let result = OverdueCalculator::new(self.config.day_count_rounding, self.config.start_gate)
            .overdue(&normalized, &allocation, as_of);

        info!(
            "Contract {} overdue as of {}: {:.2} across {} line items",
            result.contract_id,
            as_of,
            result.total_overdue,
            result.line_items.len()
        );

        result
    }

    fn matcher(&self) -> ContractAllocationMatcher {
        ContractAllocationMatcher::new(self.config.unmatched_strategy)
    }
}
