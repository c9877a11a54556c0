use crate::utils::{deserialize_lenient_amount, deserialize_lenient_date, deserialize_lenient_id};
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A line item exactly as the persistence layer stored it. Only the normalizer reads these.
pub type RawLineItem = Map<String, Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    #[serde(default)]
    pub supplier_id: String,
    #[serde(default, deserialize_with = "deserialize_lenient_date")]
    pub date: Option<NaiveDate>,
    #[serde(default, alias = "amount", deserialize_with = "deserialize_lenient_amount")]
    pub total_amount: f64,
    #[serde(default)]
    pub cost_domain: Option<String>,
    #[serde(default)]
    pub is_amortized: bool,
    #[serde(default, deserialize_with = "deserialize_lenient_date")]
    pub amortization_start: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_lenient_date")]
    pub amortization_end: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_lenient_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_lenient_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_lenient_id")]
    pub sector_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_id")]
    pub marketing_channel_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_id")]
    pub branch_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_id")]
    pub contract_id: Option<String>,
    #[serde(default)]
    pub line_items: Vec<RawLineItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    #[serde(default)]
    pub supplier_id: String,
    #[serde(default, deserialize_with = "deserialize_lenient_date")]
    pub signing_date: Option<NaiveDate>,
    #[serde(default)]
    pub line_items: Vec<RawLineItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAllocation {
    pub sector_id: String,
    pub marketing_channel_id: String,
    pub branch_id: String,
    #[serde(default, deserialize_with = "deserialize_lenient_amount")]
    pub budget_amount: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub supplier_id: String,
    pub year: i32,
    #[serde(default)]
    pub allocations: Vec<BudgetAllocation>,
    #[serde(default)]
    pub is_unexpected: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "sectors", alias = "associatedSectorIds")]
    pub sector_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sector {
    pub id: String,
    pub name: String,
}

/// Branch and sector master data shared by every supplier computation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterData {
    pub branches: Vec<Branch>,
    pub sectors: Vec<Sector>,
}

/// Everything needed to recompute one `(supplier, year)` summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplierYearInputs {
    pub supplier_id: String,
    pub year: i32,
    pub expenses: Vec<Expense>,
    pub budget: Option<Budget>,
    pub master: MasterData,
}

/// A contract plus the supplier expenses that may reference it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractInputs {
    pub contract: Contract,
    pub expenses: Vec<Expense>,
}

/// Spend that could not be placed in the `(sector, channel, branch)` map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnattributedSpend {
    #[schemars(description = "Spend on line items lacking a sector or marketing channel id")]
    pub missing_dimensions: f64,
    pub missing_dimensions_count: usize,
    #[schemars(description = "Generic-branch spend with no branch to fan out to")]
    pub unresolved_fan_out: f64,
    pub unresolved_fan_out_count: usize,
    #[schemars(description = "Line items whose computed amount was not a finite number")]
    pub faulted_count: usize,
}

impl UnattributedSpend {
    pub fn total(&self) -> f64 {
        self.missing_dimensions + self.unresolved_fan_out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDetailRow {
    pub sector_id: String,
    pub marketing_channel_id: String,
    pub branch_id: String,
    pub budget_amount: f64,
    pub detailed_spend: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSummary {
    pub supplier_id: String,
    pub year: i32,
    pub total_budget: f64,
    pub total_spend: f64,
    #[schemars(description = "Allocation rows in stored order, followed by unbudgeted spend rows")]
    pub details: Vec<BudgetDetailRow>,
    #[schemars(description = "Copied from the stored budget record; informational only")]
    pub is_unexpected: bool,
    pub unattributed: UnattributedSpend,
    pub last_updated: DateTime<Utc>,
}

impl BudgetSummary {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(BudgetSummary)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineItemOverdue {
    pub line_item_id: String,
    pub description: String,
    pub total_amount: f64,
    pub spent_total: f64,
    pub spent_to_date: f64,
    pub remaining: f64,
    pub expected_to_date: f64,
    pub overdue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContractOverdue {
    pub contract_id: String,
    pub line_items: Vec<LineItemOverdue>,
    pub total_overdue: f64,
    #[schemars(description = "Expense lines referencing this contract that carried no usable date")]
    pub skipped_expenses: usize,
}

impl ContractOverdue {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ContractOverdue)
    }
}
