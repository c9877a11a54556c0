use crate::error::{EngineError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where an expense goes when it references a contract but no line item matches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum UnmatchedAllocationStrategy {
    #[schemars(description = "Credit the whole amount to the earliest-starting line item")]
    First,

    #[schemars(description = "Split across every line item in proportion to its total amount")]
    ProportionalAll,
}

/// How a fractional elapsed-day span is turned into whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum DayCountRounding {
    #[schemars(description = "Round half up to the nearest whole day")]
    Nearest,

    #[schemars(description = "Round up to the next whole day")]
    Ceiling,
}

impl DayCountRounding {
    pub fn apply(self, fractional_days: f64) -> i64 {
        match self {
            DayCountRounding::Nearest => (fractional_days + 0.5).floor() as i64,
            DayCountRounding::Ceiling => fractional_days.ceil() as i64,
        }
    }
}

/// What happens to line items with no sector or no marketing channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum MissingDimensionPolicy {
    #[schemars(description = "Exclude from the spend map (legacy totals); still counted as unattributed")]
    Drop,

    #[schemars(description = "Key the spend under the 'unclassified' sector/channel")]
    Unclassified,
}

pub const UNCLASSIFIED: &str = "unclassified";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    pub unmatched_strategy: UnmatchedAllocationStrategy,

    pub day_count_rounding: DayCountRounding,

    #[schemars(description = "Force zero overdue on line items that have not started yet")]
    pub start_gate: bool,

    pub missing_dimension_policy: MissingDimensionPolicy,

    #[schemars(description = "Case-insensitive name of the shared/generic branch")]
    pub generic_branch_name: String,

    #[schemars(
        description = "Case-insensitive name of the sector whose generic-branch spend fans out to every branch"
    )]
    pub umbrella_sector_name: Option<String>,

    #[schemars(description = "Maximum number of summaries recomputed concurrently during a backfill")]
    pub backfill_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unmatched_strategy: UnmatchedAllocationStrategy::First,
            day_count_rounding: DayCountRounding::Ceiling,
            start_gate: true,
            missing_dimension_policy: MissingDimensionPolicy::Unclassified,
            generic_branch_name: "generico".to_string(),
            umbrella_sector_name: Some("Generale".to_string()),
            backfill_concurrency: 4,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.generic_branch_name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "generic_branch_name must not be empty".to_string(),
            ));
        }

        if let Some(name) = &self.umbrella_sector_name {
            if name.trim().is_empty() {
                return Err(EngineError::InvalidConfig(
                    "umbrella_sector_name must be omitted rather than empty".to_string(),
                ));
            }
        }

        if self.backfill_concurrency == 0 {
            return Err(EngineError::InvalidConfig(
                "backfill_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_generic_branch_name(&self, name: &str) -> bool {
        name.trim().eq_ignore_ascii_case(self.generic_branch_name.trim())
    }

    pub fn is_umbrella_sector_name(&self, name: &str) -> bool {
        self.umbrella_sector_name
            .as_deref()
            .is_some_and(|umbrella| name.trim().eq_ignore_ascii_case(umbrella.trim()))
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = schemars::schema_for!(EngineConfig);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}
