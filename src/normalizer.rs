use crate::schema::{Contract, Expense, RawLineItem};
use crate::utils::{parse_amount_value, parse_date_value, parse_id_value, DateWindow};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Accepted spellings per canonical field, in lookup priority order.
pub struct FieldAliases;

impl FieldAliases {
    pub const ID: &'static [&'static str] = &["id", "lineItemId", "line_item_id"];
    pub const LEGACY_KEY: &'static [&'static str] = &["_key", "key", "legacyId", "uid"];
    pub const DESCRIPTION: &'static [&'static str] =
        &["description", "descrizione", "desc", "name", "label"];
    pub const TOTAL_AMOUNT: &'static [&'static str] =
        &["totalAmount", "total_amount", "amount", "importo", "total"];
    pub const AMOUNT: &'static [&'static str] =
        &["amount", "totalAmount", "total_amount", "importo"];
    pub const START_DATE: &'static [&'static str] =
        &["startDate", "start_date", "dataInizio", "start"];
    pub const END_DATE: &'static [&'static str] = &["endDate", "end_date", "dataFine", "end"];
    pub const SECTOR_ID: &'static [&'static str] =
        &["sectorId", "sector_id", "sectoreId", "settoreId", "sector"];
    pub const MARKETING_CHANNEL_ID: &'static [&'static str] = &[
        "marketingChannelId",
        "marketing_channel_id",
        "marketingChanelId",
        "channelId",
        "canaleId",
    ];
    pub const BRANCH_ID: &'static [&'static str] =
        &["branchId", "branch_id", "brancheId", "filialeId", "branch"];
    pub const CONTRACT_ID: &'static [&'static str] =
        &["contractId", "contract_id", "relatedContractId", "contrattoId"];
    pub const CONTRACT_LINE_ITEM_ID: &'static [&'static str] = &[
        "contractLineItemId",
        "contract_line_item_id",
        "relatedLineItemId",
        "lineItemRef",
    ];
}

fn lookup<'a>(raw: &'a RawLineItem, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|value| !value.is_null())
}

fn lookup_id(raw: &RawLineItem, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .filter_map(|key| raw.get(*key))
        .find_map(parse_id_value)
}

fn lookup_date(raw: &RawLineItem, aliases: &[&str]) -> Option<NaiveDate> {
    lookup(raw, aliases).and_then(parse_date_value)
}

fn lookup_amount(raw: &RawLineItem, aliases: &[&str]) -> f64 {
    lookup(raw, aliases)
        .and_then(parse_amount_value)
        .unwrap_or(0.0)
}

fn lookup_text(raw: &RawLineItem, aliases: &[&str]) -> String {
    lookup(raw, aliases)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractLineItem {
    pub id: String,
    pub description: String,
    pub total_amount: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sector_id: Option<String>,
    pub marketing_channel_id: Option<String>,
    pub branch_id: Option<String>,
}

impl ContractLineItem {
    /// The item's validity window, if both bounds are present and ordered.
    pub fn window(&self) -> Option<DateWindow> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => DateWindow::new(start, end).ok(),
            _ => None,
        }
    }

    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.window().is_some_and(|w| w.contains(date))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedContract {
    pub contract_id: String,
    /// Items in stored order; identities never depend on sorting.
    pub items: Vec<ContractLineItem>,
    /// Indices into `items`, ascending by start date, undated items last.
    pub by_start: Vec<usize>,
}

impl NormalizedContract {
    pub fn index_of(&self, line_item_id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == line_item_id)
    }

    pub fn chronological(&self) -> impl Iterator<Item = &ContractLineItem> {
        self.by_start.iter().map(move |&idx| &self.items[idx])
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// An expense line with contract and dimension ids already inherited from the expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseLineItem {
    pub amount: f64,
    pub description: String,
    pub sector_id: Option<String>,
    pub marketing_channel_id: Option<String>,
    pub branch_id: Option<String>,
    pub contract_id: Option<String>,
    pub contract_line_item_id: Option<String>,
    /// Derived from the expense itself because it had no line items.
    pub synthetic: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LineItemNormalizer;

impl LineItemNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize_contract(&self, contract: &Contract) -> NormalizedContract {
        let items = self.normalize_contract_items(&contract.id, &contract.line_items);
        let by_start = chronological_order(&items);

        debug!(
            "Normalized contract {} into {} line items",
            contract.id,
            items.len()
        );

        NormalizedContract {
            contract_id: contract.id.clone(),
            items,
            by_start,
        }
    }

    pub fn normalize_contract_items(
        &self,
        parent_id: &str,
        raw_items: &[RawLineItem],
    ) -> Vec<ContractLineItem> {
        raw_items
            .iter()
            .enumerate()
            .map(|(index, raw)| ContractLineItem {
                id: stable_id(parent_id, index, raw),
                description: lookup_text(raw, FieldAliases::DESCRIPTION),
                total_amount: lookup_amount(raw, FieldAliases::TOTAL_AMOUNT),
                start_date: lookup_date(raw, FieldAliases::START_DATE),
                end_date: lookup_date(raw, FieldAliases::END_DATE),
                sector_id: lookup_id(raw, FieldAliases::SECTOR_ID),
                marketing_channel_id: lookup_id(raw, FieldAliases::MARKETING_CHANNEL_ID),
                branch_id: lookup_id(raw, FieldAliases::BRANCH_ID),
            })
            .collect()
    }

    /// Line items of `expense`, or a single synthetic item built from the expense
    /// when it has none. Ids missing on a line inherit the expense-level value.
    pub fn normalize_expense(&self, expense: &Expense) -> Vec<ExpenseLineItem> {
        if expense.line_items.is_empty() {
            return vec![ExpenseLineItem {
                amount: expense.total_amount,
                description: String::new(),
                sector_id: expense.sector_id.clone(),
                marketing_channel_id: expense.marketing_channel_id.clone(),
                branch_id: expense.branch_id.clone(),
                contract_id: expense.contract_id.clone(),
                contract_line_item_id: None,
                synthetic: true,
            }];
        }

        expense
            .line_items
            .iter()
            .map(|raw| ExpenseLineItem {
                amount: lookup_amount(raw, FieldAliases::AMOUNT),
                description: lookup_text(raw, FieldAliases::DESCRIPTION),
                sector_id: lookup_id(raw, FieldAliases::SECTOR_ID)
                    .or_else(|| expense.sector_id.clone()),
                marketing_channel_id: lookup_id(raw, FieldAliases::MARKETING_CHANNEL_ID)
                    .or_else(|| expense.marketing_channel_id.clone()),
                branch_id: lookup_id(raw, FieldAliases::BRANCH_ID)
                    .or_else(|| expense.branch_id.clone()),
                contract_id: lookup_id(raw, FieldAliases::CONTRACT_ID)
                    .or_else(|| expense.contract_id.clone()),
                contract_line_item_id: lookup_id(raw, FieldAliases::CONTRACT_LINE_ITEM_ID),
                synthetic: false,
            })
            .collect()
    }
}

fn stable_id(parent_id: &str, index: usize, raw: &RawLineItem) -> String {
    lookup_id(raw, FieldAliases::ID)
        .or_else(|| lookup_id(raw, FieldAliases::LEGACY_KEY))
        .unwrap_or_else(|| format!("{}-line-{}", parent_id, index))
}

fn chronological_order(items: &[ContractLineItem]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    // Stable sort: undated items keep their relative order at the end.
    order.sort_by_key(|&idx| (items[idx].start_date.is_none(), items[idx].start_date));
    order
}
