use serde::Serialize;

use crate::date_util::YearMonth;
use crate::expense::{CostBreakdown, ProrationSummary};
use crate::query::period::DateRange;

/// Totals and rates for a set of daily reports plus prorated fixed costs.
///
/// Every rate is a percentage of `total_sales` and is 0 when sales are not
/// positive.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiSnapshot {
    pub total_sales: f64,
    pub purchase_total: f64,
    pub labor_total: f64,
    /// Purchases plus labor ("FL cost").
    pub prime_cost: f64,
    /// Sum of every cost field on the daily rows.
    pub total_variable_cost: f64,
    pub prorated_fixed_cost: f64,
    pub total_expenses: f64,
    pub gross_profit: f64,
    pub operating_profit: f64,
    pub profit_margin: f64,
    /// Purchases as a share of sales.
    pub cost_rate: f64,
    pub labor_rate: f64,
    pub prime_cost_rate: f64,
    pub report_count: u32,
    pub average_daily_sales: f64,
    pub total_customers: u64,
    pub average_ticket: f64,
    /// Per-category sums of the daily rows.
    pub costs: CostBreakdown,
}

/// KPIs for one store inside a selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreKpi {
    pub store_id: String,
    pub store_name: String,
    #[serde(flatten)]
    pub kpi: KpiSnapshot,
}

/// KPIs for a store selection over a date range.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionKpis {
    /// `None` means all stores.
    pub store_id: Option<String>,
    pub range: DateRange,
    pub overall: KpiSnapshot,
    pub stores: Vec<StoreKpi>,
    pub proration: ProrationSummary,
}

/// Change against the preceding period, in percent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Growth {
    pub sales_growth: f64,
    pub profit_growth: f64,
    pub customer_growth: f64,
}

/// Per-(store, month) totals, with baseline fixed costs substituted for the
/// daily figures when a baseline exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRollup {
    pub store_id: String,
    pub month: YearMonth,
    pub report_days: u32,
    pub sales: f64,
    pub customers: u64,
    pub costs: CostBreakdown,
    pub baseline_applied: bool,
    pub total_cost: f64,
    pub operating_profit: f64,
    pub profit_margin: f64,
}
