use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::date_util::YearMonth;
use crate::error::{Error, Result};

/// Itemized costs recorded against a single daily report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostBreakdown {
    pub food_cost: f64,
    pub beverage_cost: f64,
    pub labor_cost_employee: f64,
    pub labor_cost_part_time: f64,
    pub utilities: f64,
    pub rent: f64,
    pub consumables: f64,
    pub promotion: f64,
    pub cleaning: f64,
    pub misc: f64,
    pub communication: f64,
    pub others: f64,
}

impl CostBreakdown {
    /// Food plus beverage purchases.
    pub fn purchase(&self) -> f64 {
        self.food_cost + self.beverage_cost
    }

    pub fn labor(&self) -> f64 {
        self.labor_cost_employee + self.labor_cost_part_time
    }

    /// Food + labor ("FL") cost.
    pub fn prime_cost(&self) -> f64 {
        self.purchase() + self.labor()
    }

    pub fn total(&self) -> f64 {
        self.purchase()
            + self.labor()
            + self.utilities
            + self.rent
            + self.consumables
            + self.promotion
            + self.cleaning
            + self.misc
            + self.communication
            + self.others
    }
}

impl std::ops::AddAssign<&CostBreakdown> for CostBreakdown {
    fn add_assign(&mut self, rhs: &CostBreakdown) {
        self.food_cost += rhs.food_cost;
        self.beverage_cost += rhs.beverage_cost;
        self.labor_cost_employee += rhs.labor_cost_employee;
        self.labor_cost_part_time += rhs.labor_cost_part_time;
        self.utilities += rhs.utilities;
        self.rent += rhs.rent;
        self.consumables += rhs.consumables;
        self.promotion += rhs.promotion;
        self.cleaning += rhs.cleaning;
        self.misc += rhs.misc;
        self.communication += rhs.communication;
        self.others += rhs.others;
    }
}

/// One store's figures for one calendar day. Unique on `(store_id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub store_id: String,
    pub date: NaiveDate,
    pub sales: f64,
    #[serde(default)]
    pub customer_count: u32,
    #[serde(flatten)]
    pub costs: CostBreakdown,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DailyReport {
    pub fn new(store_id: &str, date: NaiveDate, sales: f64) -> Self {
        Self {
            store_id: store_id.to_string(),
            date,
            sales,
            customer_count: 0,
            costs: CostBreakdown::default(),
            note: None,
        }
    }

    pub fn month(&self) -> YearMonth {
        YearMonth::of(self.date)
    }

    /// Require a store id and finite, non-negative amounts.
    pub fn validate(&self) -> Result<()> {
        require_store(&self.store_id)?;
        let c = &self.costs;
        require_amounts(&[
            ("sales", self.sales),
            ("food_cost", c.food_cost),
            ("beverage_cost", c.beverage_cost),
            ("labor_cost_employee", c.labor_cost_employee),
            ("labor_cost_part_time", c.labor_cost_part_time),
            ("utilities", c.utilities),
            ("rent", c.rent),
            ("consumables", c.consumables),
            ("promotion", c.promotion),
            ("cleaning", c.cleaning),
            ("misc", c.misc),
            ("communication", c.communication),
            ("others", c.others),
        ])
    }
}

fn require_store(store_id: &str) -> Result<()> {
    if store_id.trim().is_empty() {
        return Err(Error::InvalidInput("store_id is required".into()));
    }
    Ok(())
}

fn require_amounts(fields: &[(&str, f64)]) -> Result<()> {
    match fields.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
        Some((name, v)) => Err(Error::InvalidInput(format!(
            "{name} must be a non-negative number, got {v}"
        ))),
        None => Ok(()),
    }
}

/// A store's configured fixed costs for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyExpenseBaseline {
    pub store_id: String,
    pub month: YearMonth,
    #[serde(default)]
    pub rent: f64,
    #[serde(default)]
    pub utilities: f64,
    #[serde(default)]
    pub labor_cost_employee: f64,
    #[serde(default)]
    pub labor_cost_part_time: f64,
    #[serde(default)]
    pub consumables: f64,
    #[serde(default)]
    pub promotion: f64,
    #[serde(default)]
    pub cleaning: f64,
    #[serde(default)]
    pub misc: f64,
    #[serde(default)]
    pub communication: f64,
    #[serde(default)]
    pub others: f64,
    /// Days the store traded that month; calendar days when unset.
    #[serde(default)]
    pub open_days: Option<u32>,
}

impl MonthlyExpenseBaseline {
    pub fn new(store_id: &str, month: YearMonth) -> Self {
        Self {
            store_id: store_id.to_string(),
            month,
            rent: 0.0,
            utilities: 0.0,
            labor_cost_employee: 0.0,
            labor_cost_part_time: 0.0,
            consumables: 0.0,
            promotion: 0.0,
            cleaning: 0.0,
            misc: 0.0,
            communication: 0.0,
            others: 0.0,
            open_days: None,
        }
    }

    /// Same rules as [`DailyReport::validate`], over the fixed-cost fields.
    pub fn validate(&self) -> Result<()> {
        require_store(&self.store_id)?;
        require_amounts(&[
            ("rent", self.rent),
            ("utilities", self.utilities),
            ("labor_cost_employee", self.labor_cost_employee),
            ("labor_cost_part_time", self.labor_cost_part_time),
            ("consumables", self.consumables),
            ("promotion", self.promotion),
            ("cleaning", self.cleaning),
            ("misc", self.misc),
            ("communication", self.communication),
            ("others", self.others),
        ])
    }

    pub fn labor(&self) -> f64 {
        self.labor_cost_employee + self.labor_cost_part_time
    }

    /// Fixed costs other than labor.
    pub fn non_labor(&self) -> f64 {
        self.utilities
            + self.rent
            + self.consumables
            + self.promotion
            + self.cleaning
            + self.misc
            + self.communication
            + self.others
    }

    pub fn monthly_total(&self) -> f64 {
        self.labor() + self.non_labor()
    }

    /// Divisor for per-day shares. Never zero.
    pub fn effective_open_days(&self) -> u32 {
        match self.open_days {
            Some(d) if d > 0 => d,
            _ => self.month.days(),
        }
        .max(1)
    }

    pub fn per_day_share(&self) -> f64 {
        self.monthly_total() / self.effective_open_days() as f64
    }

    /// Rounded per-category per-day shares, as shown next to the daily entry form.
    pub fn daily_reference(&self) -> ExpenseReference {
        let days = self.effective_open_days() as f64;
        let per_day = |v: f64| (v / days).round();
        ExpenseReference::from_parts(
            per_day(self.labor()),
            per_day(self.utilities),
            per_day(self.rent),
            per_day(self.consumables),
            per_day(self.promotion),
            per_day(self.cleaning),
            per_day(self.misc),
            per_day(self.communication),
            per_day(self.others),
        )
    }

    /// Full-month figures in the same shape as [`daily_reference`](Self::daily_reference).
    pub fn monthly_reference(&self) -> ExpenseReference {
        ExpenseReference::from_parts(
            self.labor(),
            self.utilities,
            self.rent,
            self.consumables,
            self.promotion,
            self.cleaning,
            self.misc,
            self.communication,
            self.others,
        )
    }
}

/// Baseline costs broken out by category, either per day or per month.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpenseReference {
    pub labor_cost: f64,
    pub utilities: f64,
    pub rent: f64,
    pub consumables: f64,
    pub promotion: f64,
    pub cleaning: f64,
    pub misc: f64,
    pub communication: f64,
    pub others: f64,
    /// Everything except labor.
    pub sum_other: f64,
    pub total_expense: f64,
}

impl ExpenseReference {
    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        labor_cost: f64,
        utilities: f64,
        rent: f64,
        consumables: f64,
        promotion: f64,
        cleaning: f64,
        misc: f64,
        communication: f64,
        others: f64,
    ) -> Self {
        let sum_other =
            utilities + rent + consumables + promotion + cleaning + misc + communication + others;
        Self {
            labor_cost,
            utilities,
            rent,
            consumables,
            promotion,
            cleaning,
            misc,
            communication,
            others,
            sum_other,
            total_expense: labor_cost + sum_other,
        }
    }
}

/// One month's contribution to a prorated fixed-cost figure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProratedMonthlyCost {
    pub store_id: String,
    pub month: YearMonth,
    pub monthly_total: f64,
    pub open_days: u32,
    pub per_day_share: f64,
    /// Days with a report inside both the range and the month.
    pub actual_days: u32,
    pub contribution: f64,
}

/// Prorated fixed costs for a selection over a date range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProrationSummary {
    pub total: f64,
    pub months: Vec<ProratedMonthlyCost>,
}

impl ProrationSummary {
    /// Contribution of a single store.
    pub fn for_store(&self, store_id: &str) -> f64 {
        self.months
            .iter()
            .filter(|m| m.store_id == store_id)
            .map(|m| m.contribution)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn march() -> YearMonth {
        YearMonth::new(2025, 3).unwrap()
    }

    #[test]
    fn test_cost_breakdown_totals() {
        let costs = CostBreakdown {
            food_cost: 30.0,
            beverage_cost: 10.0,
            labor_cost_employee: 20.0,
            labor_cost_part_time: 5.0,
            utilities: 3.0,
            others: 2.0,
            ..Default::default()
        };
        assert_eq!(costs.purchase(), 40.0);
        assert_eq!(costs.labor(), 25.0);
        assert_eq!(costs.prime_cost(), 65.0);
        assert_eq!(costs.total(), 70.0);
    }

    #[test]
    fn test_effective_open_days_defaults_to_calendar() {
        let mut b = MonthlyExpenseBaseline::new("s1", march());
        assert_eq!(b.effective_open_days(), 31);
        b.open_days = Some(0);
        assert_eq!(b.effective_open_days(), 31);
        b.open_days = Some(26);
        assert_eq!(b.effective_open_days(), 26);
    }

    #[test]
    fn test_per_day_share_reconstructs_monthly_total() {
        let mut b = MonthlyExpenseBaseline::new("s1", march());
        b.rent = 300_000.0;
        b.utilities = 61_234.5;
        b.labor_cost_part_time = 98_765.0;
        for days in [Some(1), Some(7), Some(26), None] {
            b.open_days = days;
            let rebuilt = b.per_day_share() * b.effective_open_days() as f64;
            assert!((rebuilt - b.monthly_total()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_daily_reference_rounds_per_category() {
        let mut b = MonthlyExpenseBaseline::new("s1", march());
        b.rent = 100_000.0;
        b.labor_cost_employee = 200_000.0;
        b.labor_cost_part_time = 100_000.0;
        b.open_days = Some(30);
        let daily = b.daily_reference();
        assert_eq!(daily.rent, 3333.0);
        assert_eq!(daily.labor_cost, 10_000.0);
        assert_eq!(daily.sum_other, 3333.0);
        assert_eq!(daily.total_expense, 13_333.0);

        let monthly = b.monthly_reference();
        assert_eq!(monthly.total_expense, 400_000.0);
    }

    #[test]
    fn test_validate_rejects_negative_and_non_finite() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let mut r = DailyReport::new("s1", date, 1000.0);
        assert!(r.validate().is_ok());
        r.costs.food_cost = -500.0;
        assert!(matches!(r.validate(), Err(Error::InvalidInput(m)) if m.contains("food_cost")));
        r.costs.food_cost = f64::NAN;
        assert!(r.validate().is_err());
        assert!(DailyReport::new(" ", date, 1.0).validate().is_err());

        let mut b = MonthlyExpenseBaseline::new("s1", march());
        assert!(b.validate().is_ok());
        b.rent = f64::INFINITY;
        assert!(matches!(b.validate(), Err(Error::InvalidInput(m)) if m.contains("rent")));
        b.rent = 0.0;
        b.cleaning = -1.0;
        assert!(b.validate().is_err());
        assert!(MonthlyExpenseBaseline::new("", march()).validate().is_err());
    }

    #[test]
    fn test_daily_report_json_is_flat() {
        let mut r = DailyReport::new("s1", NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), 1000.0);
        r.costs.food_cost = 250.0;
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["food_cost"], 250.0);
        assert_eq!(value["date"], "2025-03-01");
        assert!(value.get("note").is_none());
    }
}
