//! # Spend Allocation Engine
//!
//! Computes how supplier spend lines up against annual budgets and contracts for a
//! multi-branch organization.
//!
//! ## Core Concepts
//!
//! - **Proration**: the part of a dated or amortized expense that falls inside a reporting window
//! - **Attribution**: spend keyed by `(sector, marketing channel, branch)`, with spend on the
//!   generic branch fanned out to the real branches of its sector
//! - **Contract matching**: expense postings credited to contract line items by direct link,
//!   by date window, or by a configured fallback
//! - **Overdue**: the part of a line item's straight-line plan not yet covered by spend
//!
//! Every computation is a pure function of an in-memory snapshot. Storage is reached only
//! through the [`SnapshotSource`] and [`ResultSink`] traits used by [`RecomputeCoordinator`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use spend_allocation_engine::*;
//! use chrono::NaiveDate;
//!
//! let engine = AllocationEngine::new(EngineConfig::default())?;
//! let as_of = NaiveDate::from_ymd_opt(2025, 7, 2).unwrap().and_hms_opt(10, 0, 0).unwrap();
//! let overdue = engine.contract_overdue(&contract, &expenses, as_of);
//! println!("{} is {:.2} behind plan", overdue.contract_id, overdue.total_overdue);
//! ```

pub mod attribution;
pub mod backfill;
pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod normalizer;
pub mod overdue;
pub mod proration;
pub mod schema;
pub mod store;
pub mod summary;
pub mod utils;

pub use attribution::{AttributionReport, SpendAttributor, SpendKey};
pub use backfill::{
    backfill_keys, BackfillFailure, BackfillReport, RecomputeCoordinator, RecomputeKey,
    ResultSink, SnapshotSource,
};
pub use config::{
    DayCountRounding, EngineConfig, MissingDimensionPolicy, UnmatchedAllocationStrategy,
    UNCLASSIFIED,
};
pub use engine::AllocationEngine;
pub use error::{EngineError, Result};
pub use matcher::{ContractAllocation, ContractAllocationMatcher, LineItemSpend};
pub use normalizer::{
    ContractLineItem, ExpenseLineItem, FieldAliases, LineItemNormalizer, NormalizedContract,
};
pub use overdue::OverdueCalculator;
pub use proration::{prorate, AccrualItem, Accruable};
pub use schema::*;
pub use store::InMemoryStore;
pub use summary::BudgetSummaryBuilder;
pub use utils::DateWindow;

use chrono::Utc;

/// Builds the budget summary for one `(supplier, year)` with the given configuration.
pub fn compute_budget_summary(
    config: &EngineConfig,
    inputs: &SupplierYearInputs,
) -> Result<BudgetSummary> {
    AllocationEngine::new(config.clone())?.budget_summary(inputs, Utc::now())
}
