use crate::schema::Expense;
use crate::utils::DateWindow;
use chrono::NaiveDate;

/// Anything with an amount that is either recognised on one day or spread over a range.
pub trait Accruable {
    fn amount(&self) -> f64;

    fn date(&self) -> Option<NaiveDate>;

    fn is_amortized(&self) -> bool;

    /// Amortization bounds, each possibly missing.
    fn amortization_bounds(&self) -> (Option<NaiveDate>, Option<NaiveDate>);
}

impl Accruable for Expense {
    fn amount(&self) -> f64 {
        self.total_amount
    }

    fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    fn is_amortized(&self) -> bool {
        self.is_amortized
    }

    fn amortization_bounds(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        (
            self.amortization_start.or(self.start_date),
            self.amortization_end.or(self.end_date),
        )
    }
}

/// A standalone amount, for callers that do not hold an [`Expense`].
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualItem {
    pub amount: f64,
    pub date: Option<NaiveDate>,
    pub is_amortized: bool,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl Accruable for AccrualItem {
    fn amount(&self) -> f64 {
        self.amount
    }

    fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    fn is_amortized(&self) -> bool {
        self.is_amortized
    }

    fn amortization_bounds(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        (self.start, self.end)
    }
}

/// Portion of `item` that falls inside `window`.
///
/// Single-day amounts count in full or not at all. Amortized amounts accrue at a
/// flat daily rate over their inclusive range and contribute `rate * overlap_days`.
/// Missing dates and empty ranges contribute nothing.
pub fn prorate<A: Accruable + ?Sized>(item: &A, window: &DateWindow) -> f64 {
    if !item.is_amortized() {
        return match item.date() {
            Some(date) if window.contains(date) => item.amount(),
            _ => 0.0,
        };
    }

    let (start, end) = match item.amortization_bounds() {
        (Some(start), Some(end)) => (start, end),
        _ => return 0.0,
    };

    let duration_days = crate::utils::inclusive_days(start, end);
    if duration_days <= 0 {
        return 0.0;
    }
    let daily_cost = item.amount() / duration_days as f64;

    let amortization = DateWindow { start, end };
    match amortization.intersect(window) {
        Some(overlap) => daily_cost * overlap.len_days() as f64,
        None => 0.0,
    }
}
