use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use spend_allocation_engine::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn at(y: i32, m: u32, day: u32, h: u32) -> NaiveDateTime {
    d(y, m, day).and_hms_opt(h, 0, 0).unwrap()
}

fn raw(value: Value) -> RawLineItem {
    value.as_object().cloned().unwrap()
}

fn contract(id: &str, supplier: &str, items: Vec<Value>) -> Contract {
    Contract {
        id: id.to_string(),
        supplier_id: supplier.to_string(),
        signing_date: None,
        line_items: items.into_iter().map(raw).collect(),
    }
}

fn contract_expense(id: &str, contract_id: &str, date: NaiveDate, lines: Vec<Value>) -> Expense {
    Expense {
        id: id.to_string(),
        supplier_id: "sup".to_string(),
        date: Some(date),
        contract_id: Some(contract_id.to_string()),
        line_items: lines.into_iter().map(raw).collect(),
        ..Expense::default()
    }
}

fn master() -> MasterData {
    serde_json::from_value(json!({
        "branches": [
            { "id": "g", "name": "Generico" },
            { "id": "mi", "name": "Milano", "sectorIds": ["auto"] },
            { "id": "to", "name": "Torino", "sectorIds": ["auto", "moto"] },
            { "id": "na", "name": "Napoli", "sectorIds": ["auto"] }
        ],
        "sectors": [
            { "id": "auto", "name": "Auto" },
            { "id": "moto", "name": "Moto" },
            { "id": "corp", "name": "Generale" }
        ]
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Proration
// ---------------------------------------------------------------------------

#[test]
fn scenario_a_single_day_expense_by_year() {
    let expense = Expense {
        id: "a".to_string(),
        date: Some(d(2025, 6, 15)),
        total_amount: 1200.0,
        ..Expense::default()
    };
    assert_eq!(prorate(&expense, &DateWindow::calendar_year(2025).unwrap()), 1200.0);
    assert_eq!(prorate(&expense, &DateWindow::calendar_year(2024).unwrap()), 0.0);
}

#[test]
fn scenario_b_amortized_daily_cost() {
    let expense = Expense {
        id: "b".to_string(),
        total_amount: 3650.0,
        is_amortized: true,
        amortization_start: Some(d(2025, 1, 1)),
        amortization_end: Some(d(2025, 12, 31)),
        ..Expense::default()
    };
    let window = DateWindow::new(d(2025, 1, 1), d(2025, 1, 10)).unwrap();
    let amount = prorate(&expense, &window);
    assert!((amount - 100.0).abs() < 1e-9);
    assert_eq!(amount, prorate(&expense, &window));
}

#[test]
fn single_day_proration_is_all_or_nothing() {
    let window = DateWindow::new(d(2025, 3, 10), d(2025, 4, 20)).unwrap();
    let mut date = d(2025, 2, 1);
    while date <= d(2025, 5, 31) {
        let item = AccrualItem {
            amount: 77.7,
            date: Some(date),
            is_amortized: false,
            start: None,
            end: None,
        };
        let result = prorate(&item, &window);
        assert!(result == 0.0 || result == 77.7, "partial value {} on {}", result, date);
        date = date.succ_opt().unwrap();
    }
}

#[test]
fn amortized_amount_is_preserved_across_tiling_windows() {
    let cases = [
        (d(2024, 2, 10), d(2024, 3, 5), 12_345.67),
        (d(2023, 12, 1), d(2026, 1, 31), 999.0),
        (d(2025, 5, 5), d(2025, 5, 5), 42.0),
    ];
    for (start, end, amount) in cases {
        let item = AccrualItem {
            amount,
            date: None,
            is_amortized: true,
            start: Some(start),
            end: Some(end),
        };
        let total: f64 = (start.year() - 1..=end.year() + 1)
            .map(|year| prorate(&item, &DateWindow::calendar_year(year).unwrap()))
            .sum();
        assert!((total - amount).abs() < 1e-6, "{} != {}", total, amount);
    }
}

// ---------------------------------------------------------------------------
// Contract matching and overdue
// ---------------------------------------------------------------------------

#[test]
fn scenario_c_and_d_overdue_against_straight_line_plan() {
    let c = contract(
        "c-1",
        "sup",
        vec![json!({ "id": "li", "totalAmount": 1000, "startDate": "2025-01-01", "endDate": "2025-12-31" })],
    );
    let engine = AllocationEngine::new(EngineConfig {
        day_count_rounding: DayCountRounding::Ceiling,
        ..EngineConfig::default()
    })
    .unwrap();

    let nothing_spent = engine.contract_overdue(&c, &[], at(2025, 7, 2, 10));
    let li = &nothing_spent.line_items[0];
    assert!((li.expected_to_date - 504.11).abs() < 0.01);
    assert!((li.overdue - 504.11).abs() < 0.01);
    assert_eq!(li.remaining, 1000.0);

    let spent = contract_expense(
        "e1",
        "c-1",
        d(2025, 3, 1),
        vec![json!({ "amount": 600, "contractLineItemId": "li" })],
    );
    let ahead = engine.contract_overdue(&c, &[spent], at(2025, 7, 2, 10));
    assert_eq!(ahead.total_overdue, 0.0);
}

#[test]
fn rounding_conventions_reproduce_both_historical_figures() {
    let c = contract(
        "c-1",
        "sup",
        vec![json!({ "id": "li", "totalAmount": 1000, "startDate": "2025-01-01", "endDate": "2025-12-31" })],
    );
    let ceiling = AllocationEngine::new(EngineConfig {
        day_count_rounding: DayCountRounding::Ceiling,
        ..EngineConfig::default()
    })
    .unwrap()
    .contract_overdue(&c, &[], at(2025, 7, 2, 10));
    let nearest = AllocationEngine::new(EngineConfig {
        day_count_rounding: DayCountRounding::Nearest,
        ..EngineConfig::default()
    })
    .unwrap()
    .contract_overdue(&c, &[], at(2025, 7, 2, 10));

    assert!((ceiling.total_overdue - 1000.0 * 184.0 / 365.0).abs() < 1e-9);
    assert!((nearest.total_overdue - 1000.0 * 183.0 / 365.0).abs() < 1e-9);
}

#[test]
fn scenario_e_active_items_split_forty_sixty() {
    let c = contract(
        "c-1",
        "sup",
        vec![
            json!({ "id": "x", "totalAmount": 400, "startDate": "2025-01-01", "endDate": "2025-06-30" }),
            json!({ "id": "y", "totalAmount": 600, "startDate": "2025-03-01", "endDate": "2025-12-31" }),
        ],
    );
    let e = contract_expense("e1", "c-1", d(2025, 3, 1), vec![json!({ "amount": 250 })]);
    let engine = AllocationEngine::new(EngineConfig::default()).unwrap();
    let allocation = engine.allocate_contract(&c, &[e], at(2025, 12, 31, 0));

    assert!((allocation.get("x").spent_total - 100.0).abs() < 1e-9);
    assert!((allocation.get("y").spent_total - 150.0).abs() < 1e-9);
}

#[test]
fn scenario_f_unmatched_strategies() {
    let c = contract(
        "c-1",
        "sup",
        vec![
            json!({ "id": "mid", "totalAmount": 200, "startDate": "2025-02-01", "endDate": "2025-02-28" }),
            json!({ "id": "early", "totalAmount": 100, "startDate": "2025-01-01", "endDate": "2025-01-31" }),
            json!({ "id": "late", "totalAmount": 300, "startDate": "2025-03-01", "endDate": "2025-03-31" }),
        ],
    );
    let e = contract_expense("e1", "c-1", d(2025, 8, 1), vec![json!({ "amount": 60 })]);
    let as_of = at(2025, 12, 31, 0);

    let first = AllocationEngine::new(EngineConfig {
        unmatched_strategy: UnmatchedAllocationStrategy::First,
        ..EngineConfig::default()
    })
    .unwrap()
    .allocate_contract(&c, &[e.clone()], as_of);
    assert_eq!(first.get("early").spent_total, 60.0);
    assert_eq!(first.get("mid").spent_total, 0.0);
    assert_eq!(first.get("late").spent_total, 0.0);

    let proportional = AllocationEngine::new(EngineConfig {
        unmatched_strategy: UnmatchedAllocationStrategy::ProportionalAll,
        ..EngineConfig::default()
    })
    .unwrap()
    .allocate_contract(&c, &[e], as_of);
    assert!((proportional.get("early").spent_total - 10.0).abs() < 1e-9);
    assert!((proportional.get("mid").spent_total - 20.0).abs() < 1e-9);
    assert!((proportional.get("late").spent_total - 30.0).abs() < 1e-9);
}

#[test]
fn proportional_shares_sum_to_amount_and_are_non_negative() {
    let c = contract(
        "c-1",
        "sup",
        vec![
            json!({ "totalAmount": 133.3, "startDate": "2025-01-01", "endDate": "2025-12-31" }),
            json!({ "totalAmount": -50, "startDate": "2025-01-01", "endDate": "2025-12-31" }),
            json!({ "totalAmount": 71.9, "startDate": "2025-06-01", "endDate": "2025-12-31" }),
        ],
    );
    let engine = AllocationEngine::new(EngineConfig {
        unmatched_strategy: UnmatchedAllocationStrategy::ProportionalAll,
        ..EngineConfig::default()
    })
    .unwrap();

    for (date, amount) in [(d(2025, 7, 1), 1234.56), (d(2026, 7, 1), 987.65)] {
        let e = contract_expense("e", "c-1", date, vec![json!({ "amount": amount })]);
        let allocation = engine.allocate_contract(&c, &[e], at(2026, 12, 31, 0));
        assert!((allocation.total_spent() - amount).abs() < 1e-9);
        assert!(allocation.spend.values().all(|s| s.spent_total >= 0.0));
    }
}

#[test]
fn overdue_never_exceeds_contract_total() {
    let c = contract(
        "c-1",
        "sup",
        vec![
            json!({ "id": "a", "totalAmount": 500, "startDate": "2024-06-01", "endDate": "2025-05-31" }),
            json!({ "id": "b", "totalAmount": 250, "startDate": "2025-01-01", "endDate": "2025-03-31" }),
            json!({ "id": "c", "totalAmount": 0, "startDate": "2025-01-01", "endDate": "2025-03-31" }),
            json!({ "id": "d", "totalAmount": 80 }),
        ],
    );
    let expenses = vec![
        contract_expense("e1", "c-1", d(2024, 9, 1), vec![json!({ "amount": 120, "contractLineItemId": "a" })]),
        contract_expense("e2", "c-1", d(2025, 2, 1), vec![json!({ "amount": 400 })]),
    ];
    let contract_total = 830.0;

    for rounding in [DayCountRounding::Nearest, DayCountRounding::Ceiling] {
        for start_gate in [true, false] {
            let engine = AllocationEngine::new(EngineConfig {
                day_count_rounding: rounding,
                start_gate,
                ..EngineConfig::default()
            })
            .unwrap();
            let mut day = d(2024, 5, 1);
            while day <= d(2025, 8, 1) {
                let result = engine.contract_overdue(&c, &expenses, day.and_hms_opt(13, 0, 0).unwrap());
                assert!(result.total_overdue <= contract_total + 1e-9);
                for li in &result.line_items {
                    assert!(li.overdue >= 0.0 && li.overdue <= li.remaining + 1e-9);
                }
                day = day + chrono::Days::new(15);
            }
        }
    }
}

#[test]
fn items_that_cannot_be_overdue_stay_at_zero_with_spend_posted() {
    let c = contract(
        "c-1",
        "sup",
        vec![
            json!({ "id": "undated", "totalAmount": 500 }),
            json!({ "id": "future", "totalAmount": 500, "startDate": "2026-01-01", "endDate": "2026-12-31" }),
            json!({ "id": "zero", "totalAmount": 0, "startDate": "2025-01-01", "endDate": "2025-12-31" }),
        ],
    );
    let expenses: Vec<Expense> = ["undated", "future", "zero"]
        .iter()
        .flat_map(|id| {
            [
                contract_expense(
                    &format!("credit-{}", id),
                    "c-1",
                    d(2025, 3, 1),
                    vec![json!({ "amount": -50, "contractLineItemId": id })],
                ),
                contract_expense(
                    &format!("invoice-{}", id),
                    "c-1",
                    d(2025, 4, 1),
                    vec![json!({ "amount": 20, "contractLineItemId": id })],
                ),
            ]
        })
        .collect();

    for rounding in [DayCountRounding::Nearest, DayCountRounding::Ceiling] {
        let engine = AllocationEngine::new(EngineConfig {
            day_count_rounding: rounding,
            start_gate: true,
            ..EngineConfig::default()
        })
        .unwrap();
        let result = engine.contract_overdue(&c, &expenses, at(2025, 7, 2, 10));

        assert_eq!(result.total_overdue, 0.0);
        for li in &result.line_items {
            assert_eq!(li.overdue, 0.0, "{} should not be overdue", li.line_item_id);
            assert!((li.spent_to_date + 30.0).abs() < 1e-9);
        }
    }
}

// ---------------------------------------------------------------------------
// Attribution and summaries
// ---------------------------------------------------------------------------

#[test]
fn generic_branch_fan_out_splits_evenly() {
    let engine = AllocationEngine::new(EngineConfig::default()).unwrap();
    let expense = Expense {
        id: "e".to_string(),
        supplier_id: "sup".to_string(),
        date: Some(d(2025, 4, 4)),
        total_amount: 1000.0,
        sector_id: Some("auto".to_string()),
        marketing_channel_id: Some("tv".to_string()),
        branch_id: Some("g".to_string()),
        ..Expense::default()
    };
    let report = engine.attribute_spend(&[expense], &master(), 2025).unwrap();

    assert_eq!(report.spend.len(), 3);
    for share in report.spend.values() {
        assert!((share - 1000.0 / 3.0).abs() < 1e-9);
    }
    assert!((report.total_attributed() - 1000.0).abs() < 1e-9);
}

#[test]
fn legacy_drop_policy_reproduces_silent_totals() {
    let expense = Expense {
        id: "e".to_string(),
        supplier_id: "sup".to_string(),
        date: Some(d(2025, 4, 4)),
        total_amount: 100.0,
        line_items: vec![
            raw(json!({ "amount": 60, "sectorId": "auto", "marketingChannelId": "tv", "branchId": "mi" })),
            raw(json!({ "amount": 40, "branchId": "mi" })),
        ],
        ..Expense::default()
    };
    let inputs = SupplierYearInputs {
        supplier_id: "sup".to_string(),
        year: 2025,
        expenses: vec![expense],
        budget: None,
        master: master(),
    };

    let legacy = compute_budget_summary(
        &EngineConfig {
            missing_dimension_policy: MissingDimensionPolicy::Drop,
            ..EngineConfig::default()
        },
        &inputs,
    )
    .unwrap();
    assert!((legacy.total_spend - 60.0).abs() < 1e-9);
    assert!((legacy.unattributed.missing_dimensions - 40.0).abs() < 1e-9);

    let observable = compute_budget_summary(&EngineConfig::default(), &inputs).unwrap();
    assert!((observable.total_spend - 100.0).abs() < 1e-9);
    assert!(observable
        .details
        .iter()
        .any(|row| row.sector_id == UNCLASSIFIED && row.marketing_channel_id == UNCLASSIFIED));
}

#[test]
fn summary_serializes_in_collaborator_shape() {
    let inputs: SupplierYearInputs = serde_json::from_value(json!({
        "supplier_id": "sup",
        "year": 2025,
        "expenses": [{
            "id": "e1",
            "supplierId": "sup",
            "date": "2025-10-01T09:30:00Z",
            "totalAmount": "250,00",
            "sectorId": "moto",
            "marketingChannelId": "web",
            "branchId": "to"
        }],
        "budget": {
            "supplierId": "sup",
            "year": 2025,
            "isUnexpected": true,
            "allocations": [
                { "sectorId": "moto", "marketingChannelId": "web", "branchId": "to", "budgetAmount": 1000 }
            ]
        },
        "master": { "branches": [], "sectors": [] }
    }))
    .unwrap();

    let summary = compute_budget_summary(&EngineConfig::default(), &inputs).unwrap();
    let doc = serde_json::to_value(&summary).unwrap();
    assert_eq!(doc["supplierId"], "sup");
    assert_eq!(doc["totalBudget"], 1000.0);
    assert_eq!(doc["totalSpend"], 250.0);
    assert_eq!(doc["isUnexpected"], true);
    assert_eq!(doc["details"][0]["detailedSpend"], 250.0);
}

// ---------------------------------------------------------------------------
// Driving recomputation
// ---------------------------------------------------------------------------

fn seeded_store() -> anyhow::Result<InMemoryStore> {
    let store = InMemoryStore::with_master(master());
    for (supplier, amount) in [("sup-a", 100.0), ("sup-b", 200.0)] {
        store.insert_expense(Expense {
            id: format!("{}-e", supplier),
            supplier_id: supplier.to_string(),
            date: Some(d(2025, 5, 1)),
            total_amount: amount,
            sector_id: Some("auto".to_string()),
            marketing_channel_id: Some("tv".to_string()),
            branch_id: Some("mi".to_string()),
            ..Expense::default()
        })?;
    }
    store.insert_budget(Budget {
        supplier_id: "sup-a".to_string(),
        year: 2025,
        allocations: vec![BudgetAllocation {
            sector_id: "auto".to_string(),
            marketing_channel_id: "tv".to_string(),
            branch_id: "mi".to_string(),
            budget_amount: 500.0,
        }],
        is_unexpected: false,
    })?;
    store.insert_contract(contract(
        "c-a",
        "sup-a",
        vec![json!({ "id": "li", "totalAmount": 365, "startDate": "2025-01-01", "endDate": "2025-12-31" })],
    ))?;
    Ok(store)
}

#[tokio::test]
async fn backfill_covers_every_supplier_and_adjacent_year() -> anyhow::Result<()> {
    let store = seeded_store()?;
    let engine = AllocationEngine::new(EngineConfig::default())?;
    let coordinator = RecomputeCoordinator::new(engine, store, NoopSink::default());

    let report = coordinator.backfill(2025).await?;
    assert!(report.is_clean());
    assert_eq!(report.succeeded.len(), 6);
    assert_eq!(report.succeeded[0], ("sup-a".to_string(), 2024));
    assert_eq!(coordinator.sink().summaries.load(Ordering::SeqCst), 6);
    Ok(())
}

#[tokio::test]
async fn backfill_writes_through_merge_upsert() -> anyhow::Result<()> {
    let engine = AllocationEngine::new(EngineConfig::default())?;
    let store = Arc::new(seeded_store()?);
    let coordinator = RecomputeCoordinator::new(engine, SharedStore(store.clone()), SharedStore(store.clone()));

    coordinator.backfill(2025).await?;

    let summary = store.summary("sup-a", 2025)?.expect("summary written");
    assert_eq!(summary.total_budget, 500.0);
    assert_eq!(summary.total_spend, 100.0);
    let previous_year = store.summary("sup-b", 2024)?.expect("summary written");
    assert_eq!(previous_year.total_spend, 0.0);

    let overdue = coordinator.recompute_contract("c-a", at(2025, 1, 10, 0)).await?;
    assert!((overdue.total_overdue - 10.0).abs() < 1e-9);
    assert!(store.contract_overdue("c-a")?.is_some());
    Ok(())
}

#[tokio::test]
async fn failed_writes_do_not_block_sibling_keys() -> anyhow::Result<()> {
    let store = seeded_store()?;
    let engine = AllocationEngine::new(EngineConfig::default())?;
    let sink = FailingSink {
        failing_supplier: "sup-b".to_string(),
        written: Mutex::new(Vec::new()),
    };
    let coordinator = RecomputeCoordinator::new(engine, store, sink);

    let report = coordinator.backfill(2025).await?;
    assert_eq!(report.succeeded.len(), 3);
    assert_eq!(report.failures.len(), 3);
    assert!(report.failures.iter().all(|f| f.supplier_id == "sup-b"));
    assert!(report.failures[0].error.contains("Persistence write failed"));

    let written = coordinator.sink().written.lock().unwrap().clone();
    assert_eq!(written.len(), 3);
    assert!(written.iter().all(|(s, _)| s == "sup-a"));
    Ok(())
}

#[tokio::test]
async fn triggers_for_the_same_key_never_overlap() -> anyhow::Result<()> {
    let source = TrackingSource {
        inner: seeded_store()?,
        active: Mutex::new(HashMap::new()),
        max_seen: AtomicUsize::new(0),
    };
    let engine = AllocationEngine::new(EngineConfig::default())?;
    let coordinator = RecomputeCoordinator::new(engine, source, NoopSink::default());

    let (a, b, c, other) = futures::join!(
        coordinator.recompute_summary("sup-a", 2025),
        coordinator.recompute_summary("sup-a", 2025),
        coordinator.recompute_summary("sup-a", 2025),
        coordinator.recompute_summary("sup-b", 2025),
    );
    a?;
    b?;
    c?;
    other?;

    assert_eq!(coordinator.source().max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.sink().summaries.load(Ordering::SeqCst), 4);
    Ok(())
}

#[derive(Default)]
struct NoopSink {
    summaries: AtomicUsize,
}

#[async_trait]
impl ResultSink for NoopSink {
    async fn upsert_budget_summary(&self, _summary: &BudgetSummary) -> Result<()> {
        self.summaries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_contract_overdue(&self, _result: &ContractOverdue) -> Result<()> {
        Ok(())
    }
}

struct FailingSink {
    failing_supplier: String,
    written: Mutex<Vec<(String, i32)>>,
}

#[async_trait]
impl ResultSink for FailingSink {
    async fn upsert_budget_summary(&self, summary: &BudgetSummary) -> Result<()> {
        if summary.supplier_id == self.failing_supplier {
            return Err(EngineError::PersistenceFailed {
                key: format!("{}/{}", summary.supplier_id, summary.year),
                details: "write rejected".to_string(),
            });
        }
        self.written
            .lock()
            .unwrap()
            .push((summary.supplier_id.clone(), summary.year));
        Ok(())
    }

    async fn upsert_contract_overdue(&self, _result: &ContractOverdue) -> Result<()> {
        Ok(())
    }
}

struct SharedStore(Arc<InMemoryStore>);

#[async_trait]
impl SnapshotSource for SharedStore {
    async fn supplier_ids(&self) -> Result<Vec<String>> {
        self.0.supplier_ids().await
    }

    async fn supplier_year_inputs(&self, supplier_id: &str, year: i32) -> Result<SupplierYearInputs> {
        self.0.supplier_year_inputs(supplier_id, year).await
    }

    async fn contract_inputs(&self, contract_id: &str) -> Result<ContractInputs> {
        self.0.contract_inputs(contract_id).await
    }
}

#[async_trait]
impl ResultSink for SharedStore {
    async fn upsert_budget_summary(&self, summary: &BudgetSummary) -> Result<()> {
        self.0.upsert_budget_summary(summary).await
    }

    async fn upsert_contract_overdue(&self, result: &ContractOverdue) -> Result<()> {
        self.0.upsert_contract_overdue(result).await
    }
}

/// Records how many loads run at once per key, yielding mid-load so overlaps can happen.
struct TrackingSource {
    inner: InMemoryStore,
    active: Mutex<HashMap<(String, i32), usize>>,
    max_seen: AtomicUsize,
}

#[async_trait]
impl SnapshotSource for TrackingSource {
    async fn supplier_ids(&self) -> Result<Vec<String>> {
        self.inner.supplier_ids().await
    }

    async fn supplier_year_inputs(&self, supplier_id: &str, year: i32) -> Result<SupplierYearInputs> {
        let key = (supplier_id.to_string(), year);
        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(key.clone()).or_default();
            *count += 1;
            self.max_seen.fetch_max(*count, Ordering::SeqCst);
        }
        tokio::task::yield_now().await;
        let inputs = self.inner.supplier_year_inputs(supplier_id, year).await;
        *self.active.lock().unwrap().entry(key).or_default() -= 1;
        inputs
    }

    async fn contract_inputs(&self, contract_id: &str) -> Result<ContractInputs> {
        self.inner.contract_inputs(contract_id).await
    }
}
