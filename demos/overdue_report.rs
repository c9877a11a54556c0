use chrono::NaiveDate;
use serde_json::json;
use spend_allocation_engine::*;

fn main() {
    println!("📑 Contract Overdue Report\n");

    let contract: Contract = match serde_json::from_value(json!({
        "id": "ctr-2025-media",
        "supplierId": "sup-media",
        "lineItems": [
            { "id": "tv", "description": "TV spots", "totalAmount": 12000, "startDate": "2025-01-01", "endDate": "2025-12-31" },
            { "id": "radio", "description": "Radio", "totalAmount": 3000, "startDate": "2025-03-01", "endDate": "2025-08-31" },
            { "id": "print", "description": "Print", "totalAmount": "1500,00", "startDate": "2025-09-01", "endDate": "2025-11-30" }
        ]
    })) {
        Ok(contract) => contract,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            return;
        }
    };

    let expenses: Vec<Expense> = match serde_json::from_value(json!([
        {
            "id": "inv-001",
            "supplierId": "sup-media",
            "date": "2025-02-15",
            "contractId": "ctr-2025-media",
            "lineItems": [{ "amount": 2500, "contractLineItemId": "tv" }]
        },
        {
            "id": "inv-002",
            "supplierId": "sup-media",
            "date": "2025-04-10",
            "contractId": "ctr-2025-media",
            "lineItems": [{ "amount": 1800 }]
        },
        {
            "id": "inv-003",
            "supplierId": "sup-media",
            "date": "2026-01-15",
            "contractId": "ctr-2025-media",
            "lineItems": [{ "amount": 900 }]
        }
    ])) {
        Ok(expenses) => expenses,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            return;
        }
    };

    let Some(as_of) = NaiveDate::from_ymd_opt(2025, 7, 2).and_then(|d| d.and_hms_opt(10, 0, 0))
    else {
        return;
    };

    println!("📋 Contract {} as of {}", contract.id, as_of);
    println!("  inv-003 falls outside every line item window and goes to the fallback.\n");

    for strategy in [
        UnmatchedAllocationStrategy::First,
        UnmatchedAllocationStrategy::ProportionalAll,
    ] {
        for rounding in [DayCountRounding::Nearest, DayCountRounding::Ceiling] {
            let config = EngineConfig {
                unmatched_strategy: strategy,
                day_count_rounding: rounding,
                ..EngineConfig::default()
            };
            let engine = match AllocationEngine::new(config) {
                Ok(engine) => engine,
                Err(e) => {
                    eprintln!("❌ Error: {}", e);
                    return;
                }
            };

            let report = engine.contract_overdue(&contract, &expenses, as_of);

            println!("🔄 {:?} fallback, {:?} day count:", strategy, rounding);
            for li in &report.line_items {
                println!(
                    "  {:<10} total ${:>9.2}  spent ${:>9.2}  expected ${:>9.2}  overdue ${:>9.2}",
                    li.line_item_id, li.total_amount, li.spent_total, li.expected_to_date, li.overdue
                );
            }
            println!("  Total overdue: ${:>9.2}\n", report.total_overdue);
        }
    }

    let schema = ContractOverdue::generate_json_schema();
    match serde_json::to_string_pretty(&schema) {
        Ok(text) => println!("🧾 Result schema is {} bytes of JSON", text.len()),
        Err(e) => eprintln!("❌ Error: {}", e),
    }
}
