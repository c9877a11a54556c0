use crate::config::{EngineConfig, MissingDimensionPolicy, UNCLASSIFIED};
use crate::normalizer::LineItemNormalizer;
use crate::proration::prorate;
use crate::schema::{Branch, Expense, MasterData, UnattributedSpend};
use crate::utils::DateWindow;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpendKey {
    pub sector_id: String,
    pub marketing_channel_id: String,
    pub branch_id: String,
}

impl SpendKey {
    pub fn new(
        sector_id: impl Into<String>,
        marketing_channel_id: impl Into<String>,
        branch_id: impl Into<String>,
    ) -> Self {
        Self {
            sector_id: sector_id.into(),
            marketing_channel_id: marketing_channel_id.into(),
            branch_id: branch_id.into(),
        }
    }
}

impl fmt::Display for SpendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.sector_id, self.marketing_channel_id, self.branch_id
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributionReport {
    pub spend: BTreeMap<SpendKey, f64>,
    pub unattributed: UnattributedSpend,
    /// Expenses with a positive in-window amount.
    pub expenses_counted: usize,
}

impl AttributionReport {
    pub fn total_attributed(&self) -> f64 {
        self.spend.values().sum()
    }

    fn add(&mut self, key: SpendKey, amount: f64) {
        *self.spend.entry(key).or_default() += amount;
    }
}

/// Sentinel lookups resolved once per run from master data.
struct BranchDirectory<'a> {
    generic_ids: HashSet<&'a str>,
    umbrella_sector_ids: HashSet<&'a str>,
    real_branches: Vec<&'a Branch>,
}

impl<'a> BranchDirectory<'a> {
    fn new(master: &'a MasterData, config: &EngineConfig) -> Self {
        let generic_ids: HashSet<&str> = master
            .branches
            .iter()
            .filter(|b| config.is_generic_branch_name(&b.name))
            .map(|b| b.id.as_str())
            .collect();
        let umbrella_sector_ids = master
            .sectors
            .iter()
            .filter(|s| config.is_umbrella_sector_name(&s.name))
            .map(|s| s.id.as_str())
            .collect();
        let real_branches = master
            .branches
            .iter()
            .filter(|b| !generic_ids.contains(b.id.as_str()))
            .collect();

        Self {
            generic_ids,
            umbrella_sector_ids,
            real_branches,
        }
    }

    /// A line without a branch is treated as assigned to the generic branch.
    fn is_generic(&self, branch_id: Option<&str>) -> bool {
        branch_id.map_or(true, |id| self.generic_ids.contains(id))
    }

    fn fan_out_targets(&self, sector_id: &str) -> Vec<&'a str> {
        let whole_company = self.umbrella_sector_ids.contains(sector_id);
        self.real_branches
            .iter()
            .filter(|b| whole_company || b.sector_ids.iter().any(|s| s == sector_id))
            .map(|b| b.id.as_str())
            .collect()
    }
}

pub struct SpendAttributor<'a> {
    config: &'a EngineConfig,
    normalizer: LineItemNormalizer,
}

impl<'a> SpendAttributor<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            normalizer: LineItemNormalizer::new(),
        }
    }

    pub fn attribute(
        &self,
        expenses: &[Expense],
        master: &MasterData,
        window: &DateWindow,
    ) -> AttributionReport {
        let directory = BranchDirectory::new(master, self.config);
        let mut report = AttributionReport::default();

        for expense in expenses {
            let amount_in_window = prorate(expense, window);
            if amount_in_window <= 0.0 || !amount_in_window.is_finite() {
                continue;
            }
            report.expenses_counted += 1;

            let lines = self.normalizer.normalize_expense(expense);
            let lines_total: f64 = lines.iter().map(|l| l.amount).sum();
            let line_count = lines.len() as f64;

            for line in &lines {
                let ratio = if lines_total == 0.0 {
                    1.0 / line_count
                } else {
                    line.amount / lines_total
                };
                let item_amount = amount_in_window * ratio;
                if !item_amount.is_finite() {
                    warn!(
                        "Expense {} line '{}' produced a non-finite amount; skipped",
                        expense.id, line.description
                    );
                    report.unattributed.faulted_count += 1;
                    continue;
                }

                let (sector_id, channel_id) =
                    match (&line.sector_id, &line.marketing_channel_id) {
                        (Some(sector), Some(channel)) => (sector.as_str(), channel.as_str()),
                        _ => {
                            report.unattributed.missing_dimensions += item_amount;
                            report.unattributed.missing_dimensions_count += 1;
                            warn!(
                                "Expense {} line '{}' lacks sector or channel ({:.2})",
                                expense.id, line.description, item_amount
                            );
                            if self.config.missing_dimension_policy
                                == MissingDimensionPolicy::Unclassified
                            {
                                report.add(
                                    SpendKey::new(
                                        line.sector_id.as_deref().unwrap_or(UNCLASSIFIED),
                                        line.marketing_channel_id.as_deref().unwrap_or(UNCLASSIFIED),
                                        line.branch_id.as_deref().unwrap_or(UNCLASSIFIED),
                                    ),
                                    item_amount,
                                );
                            }
                            continue;
                        }
                    };

                let branch_id = line.branch_id.as_deref();
                if !directory.is_generic(branch_id) {
                    let branch = branch_id.unwrap_or_default();
                    report.add(SpendKey::new(sector_id, channel_id, branch), item_amount);
                    continue;
                }

                let targets = directory.fan_out_targets(sector_id);
                if targets.is_empty() {
                    report.unattributed.unresolved_fan_out += item_amount;
                    report.unattributed.unresolved_fan_out_count += 1;
                    warn!(
                        "Generic-branch spend of expense {} in sector {} has no target branch ({:.2})",
                        expense.id, sector_id, item_amount
                    );
                    continue;
                }

                let share = item_amount / targets.len() as f64;
                for target in targets {
                    report.add(SpendKey::new(sector_id, channel_id, target), share);
                }
            }
        }

        debug!(
            "Attributed {:.2} across {} buckets from {} expenses; unattributed {:.2}",
            report.total_attributed(),
            report.spend.len(),
            report.expenses_counted,
            report.unattributed.total()
        );

        report
    }
}
