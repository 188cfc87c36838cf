pub mod types;

pub use types::*;

use std::collections::{BTreeMap, HashMap};

use crate::date_util::YearMonth;
use crate::error::Result;
use crate::expense::{
    self, BaselineCache, CostBreakdown, DailyReport, MonthlyExpenseBaseline, ProrationSummary,
};
use crate::query::period::DateRange;
use crate::storage::{repository, Database};

/// `part / sales * 100`, or 0 when there are no sales.
pub fn rate(part: f64, sales: f64) -> f64 {
    if sales > 0.0 {
        part / sales * 100.0
    } else {
        0.0
    }
}

/// Combine daily rows with an already-prorated fixed cost.
pub fn aggregate<'a>(
    reports: impl IntoIterator<Item = &'a DailyReport>,
    prorated_fixed_cost: f64,
) -> KpiSnapshot {
    let mut costs = CostBreakdown::default();
    let mut total_sales = 0.0;
    let mut total_customers = 0u64;
    let mut report_count = 0u32;
    for r in reports {
        costs += &r.costs;
        total_sales += r.sales;
        total_customers += r.customer_count as u64;
        report_count += 1;
    }

    let purchase_total = costs.purchase();
    let labor_total = costs.labor();
    let prime_cost = costs.prime_cost();
    let total_variable_cost = costs.total();
    let total_expenses = total_variable_cost + prorated_fixed_cost;
    let operating_profit = total_sales - total_expenses;

    KpiSnapshot {
        total_sales,
        purchase_total,
        labor_total,
        prime_cost,
        total_variable_cost,
        prorated_fixed_cost,
        total_expenses,
        gross_profit: total_sales - purchase_total,
        operating_profit,
        profit_margin: rate(operating_profit, total_sales),
        cost_rate: rate(purchase_total, total_sales),
        labor_rate: rate(labor_total, total_sales),
        prime_cost_rate: rate(prime_cost, total_sales),
        report_count,
        average_daily_sales: if report_count > 0 {
            total_sales / report_count as f64
        } else {
            0.0
        },
        total_customers,
        average_ticket: if total_customers > 0 {
            total_sales / total_customers as f64
        } else {
            0.0
        },
        costs,
    }
}

/// Whole-selection KPIs plus a per-store breakdown ordered by store id.
///
/// The overall fixed cost is the sum of each store's own proration, and the
/// overall rates are recomputed from the summed totals.
pub fn aggregate_selection(
    reports: &[DailyReport],
    proration: &ProrationSummary,
    names: &HashMap<String, String>,
) -> (KpiSnapshot, Vec<StoreKpi>) {
    let overall = aggregate(reports, proration.total);
    let stores = expense::store_ids(reports)
        .into_iter()
        .map(|store_id| {
            let kpi = aggregate(
                reports.iter().filter(|r| r.store_id == store_id),
                proration.for_store(&store_id),
            );
            StoreKpi {
                store_name: names
                    .get(&store_id)
                    .cloned()
                    .unwrap_or_else(|| store_id.clone()),
                store_id,
                kpi,
            }
        })
        .collect();
    (overall, stores)
}

fn pct_change(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        (current - previous) / previous * 100.0
    } else {
        0.0
    }
}

/// Growth of `current` over `previous`; 0 where the previous value is not positive.
pub fn growth(current: &KpiSnapshot, previous: &KpiSnapshot) -> Growth {
    Growth {
        sales_growth: pct_change(current.total_sales, previous.total_sales),
        profit_growth: pct_change(current.operating_profit, previous.operating_profit),
        customer_growth: pct_change(
            current.total_customers as f64,
            previous.total_customers as f64,
        ),
    }
}

/// Roll daily rows up to (store, month), sorted by month then store.
pub fn monthly_rollup(
    reports: &[DailyReport],
    baselines: &[MonthlyExpenseBaseline],
) -> Vec<MonthlyRollup> {
    let mut groups: BTreeMap<(YearMonth, String), Vec<&DailyReport>> = BTreeMap::new();
    for r in reports {
        groups
            .entry((r.month(), r.store_id.clone()))
            .or_default()
            .push(r);
    }

    groups
        .into_iter()
        .map(|((month, store_id), rows)| {
            let mut costs = CostBreakdown::default();
            let mut sales = 0.0;
            let mut customers = 0u64;
            for r in &rows {
                costs += &r.costs;
                sales += r.sales;
                customers += r.customer_count as u64;
            }

            let baseline = baselines
                .iter()
                .find(|b| b.store_id == store_id && b.month == month);
            if let Some(b) = baseline {
                costs.labor_cost_employee = b.labor_cost_employee;
                costs.labor_cost_part_time = b.labor_cost_part_time;
                costs.utilities = b.utilities;
                costs.rent = b.rent;
                costs.consumables = b.consumables;
                costs.promotion = b.promotion;
                costs.cleaning = b.cleaning;
                costs.misc = b.misc;
                costs.communication = b.communication;
                costs.others = b.others;
            }

            let total_cost = costs.total();
            let operating_profit = sales - total_cost;
            MonthlyRollup {
                store_id,
                month,
                report_days: rows.len() as u32,
                sales,
                customers,
                costs,
                baseline_applied: baseline.is_some(),
                total_cost,
                operating_profit,
                profit_margin: rate(operating_profit, sales),
            }
        })
        .collect()
}

/// Load reports and baselines for the selection and compute its KPIs.
pub async fn compute_kpis(
    db: &Database,
    cache: &BaselineCache,
    store_id: Option<&str>,
    range: &DateRange,
) -> Result<SelectionKpis> {
    let (reports, names) = load_reports_with_names(db, store_id, range).await?;
    let baselines =
        expense::load_baselines_for(db, cache, &expense::store_ids(&reports), range).await?;
    log::debug!(
        "KPIs for {} over {range}: {} reports, {} baselines",
        store_id.unwrap_or("all stores"),
        reports.len(),
        baselines.len()
    );

    let proration = expense::prorate(&baselines, &reports, range);
    let (overall, stores) = aggregate_selection(&reports, &proration, &names);
    Ok(SelectionKpis {
        store_id: store_id.map(str::to_string),
        range: *range,
        overall,
        stores,
        proration,
    })
}

/// KPIs for `range` and the same-length range before it, with growth.
pub async fn compute_growth(
    db: &Database,
    cache: &BaselineCache,
    store_id: Option<&str>,
    range: &DateRange,
) -> Result<(SelectionKpis, Growth)> {
    let current = compute_kpis(db, cache, store_id, range).await?;
    let previous = compute_kpis(db, cache, store_id, &range.previous()?).await?;
    let g = growth(&current.overall, &previous.overall);
    Ok((current, g))
}

/// Monthly rollup for the selection over `range`.
pub async fn compute_monthly_rollup(
    db: &Database,
    cache: &BaselineCache,
    store_id: Option<&str>,
    range: &DateRange,
) -> Result<Vec<MonthlyRollup>> {
    let (reports, _) = load_reports_with_names(db, store_id, range).await?;
    let baselines =
        expense::load_baselines_for(db, cache, &expense::store_ids(&reports), range).await?;
    Ok(monthly_rollup(&reports, &baselines))
}

pub(crate) async fn load_reports_with_names(
    db: &Database,
    store_id: Option<&str>,
    range: &DateRange,
) -> Result<(Vec<DailyReport>, HashMap<String, String>)> {
    let sid = store_id.map(str::to_string);
    let r = *range;
    let loaded = db
        .reader()
        .call(move |conn| {
            let reports = repository::list_daily_reports(conn, sid.as_deref(), &r)?;
            let names = repository::store_names(conn, &expense::store_ids(&reports))?;
            Ok::<_, rusqlite::Error>((reports, names))
        })
        .await?;
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn report(store: &str, date: NaiveDate, sales: f64) -> DailyReport {
        let mut r = DailyReport::new(store, date, sales);
        r.customer_count = 50;
        r.costs.food_cost = sales * 0.25;
        r.costs.beverage_cost = sales * 0.05;
        r.costs.labor_cost_part_time = sales * 0.2;
        r.costs.utilities = 1_000.0;
        r
    }

    #[test]
    fn test_zero_sales_gives_zero_rates() {
        let mut r = DailyReport::new("s1", d(2025, 1, 1), 0.0);
        r.costs.food_cost = 5_000.0;
        r.costs.labor_cost_employee = 8_000.0;
        let kpi = aggregate([&r], 10_000.0);

        for v in [
            kpi.profit_margin,
            kpi.cost_rate,
            kpi.labor_rate,
            kpi.prime_cost_rate,
            kpi.average_ticket,
        ] {
            assert_eq!(v, 0.0);
        }
        assert_eq!(kpi.total_expenses, 23_000.0);
        assert_eq!(kpi.operating_profit, -23_000.0);
    }

    #[test]
    fn test_empty_input() {
        let kpi = aggregate(&[], 0.0);
        assert_eq!(kpi, KpiSnapshot::default());
    }

    #[test]
    fn test_aggregate_totals_and_rates() {
        let rows = vec![
            report("s1", d(2025, 1, 1), 100_000.0),
            report("s1", d(2025, 1, 2), 100_000.0),
        ];
        let kpi = aggregate(&rows, 20_000.0);

        assert_eq!(kpi.total_sales, 200_000.0);
        assert_eq!(kpi.purchase_total, 60_000.0);
        assert_eq!(kpi.labor_total, 40_000.0);
        assert_eq!(kpi.prime_cost, 100_000.0);
        assert_eq!(kpi.total_variable_cost, 102_000.0);
        assert_eq!(kpi.total_expenses, 122_000.0);
        assert_eq!(kpi.gross_profit, 140_000.0);
        assert_eq!(kpi.operating_profit, 78_000.0);
        assert!((kpi.profit_margin - 39.0).abs() < 1e-9);
        assert!((kpi.cost_rate - 30.0).abs() < 1e-9);
        assert!((kpi.labor_rate - 20.0).abs() < 1e-9);
        assert!((kpi.prime_cost_rate - 50.0).abs() < 1e-9);
        assert_eq!(kpi.average_daily_sales, 100_000.0);
        assert_eq!(kpi.total_customers, 100);
        assert_eq!(kpi.average_ticket, 2_000.0);
    }

    #[test]
    fn test_missing_fixed_cost_means_expenses_equal_variable() {
        let rows = vec![report("s1", d(2025, 1, 1), 80_000.0)];
        let kpi = aggregate(&rows, 0.0);
        assert_eq!(kpi.total_expenses, kpi.total_variable_cost);
    }

    #[test]
    fn test_selection_sums_fixed_costs_per_store() {
        let rows = vec![
            report("s2", d(2025, 1, 1), 50_000.0),
            report("s1", d(2025, 1, 1), 100_000.0),
        ];
        let proration = ProrationSummary {
            total: 30_000.0,
            months: vec![
                expense::ProratedMonthlyCost {
                    store_id: "s1".into(),
                    month: YearMonth::new(2025, 1).unwrap(),
                    monthly_total: 310_000.0,
                    open_days: 31,
                    per_day_share: 10_000.0,
                    actual_days: 1,
                    contribution: 10_000.0,
                },
                expense::ProratedMonthlyCost {
                    store_id: "s2".into(),
                    month: YearMonth::new(2025, 1).unwrap(),
                    monthly_total: 620_000.0,
                    open_days: 31,
                    per_day_share: 20_000.0,
                    actual_days: 1,
                    contribution: 20_000.0,
                },
            ],
        };
        let names = HashMap::from([("s1".to_string(), "Shibuya".to_string())]);

        let (overall, stores) = aggregate_selection(&rows, &proration, &names);
        assert_eq!(overall.prorated_fixed_cost, 30_000.0);
        assert_eq!(overall.total_sales, 150_000.0);
        assert_eq!(stores.len(), 2);
        assert_eq!(stores[0].store_id, "s1");
        assert_eq!(stores[0].store_name, "Shibuya");
        assert_eq!(stores[0].kpi.prorated_fixed_cost, 10_000.0);
        assert_eq!(stores[1].store_name, "s2");
        assert_eq!(stores[1].kpi.prorated_fixed_cost, 20_000.0);
        let summed: f64 = stores.iter().map(|s| s.kpi.operating_profit).sum();
        assert!((summed - overall.operating_profit).abs() < 1e-6);
    }

    #[test]
    fn test_growth_guards_non_positive_previous() {
        let prev = KpiSnapshot {
            total_sales: 100.0,
            operating_profit: -10.0,
            ..Default::default()
        };
        let cur = KpiSnapshot {
            total_sales: 150.0,
            operating_profit: 20.0,
            total_customers: 10,
            ..Default::default()
        };
        let g = growth(&cur, &prev);
        assert!((g.sales_growth - 50.0).abs() < 1e-9);
        assert_eq!(g.profit_growth, 0.0);
        assert_eq!(g.customer_growth, 0.0);
    }

    #[test]
    fn test_monthly_rollup_substitutes_baseline() {
        let rows = vec![
            report("s1", d(2025, 1, 30), 100_000.0),
            report("s1", d(2025, 1, 31), 100_000.0),
            report("s1", d(2025, 2, 1), 100_000.0),
        ];
        let mut jan = MonthlyExpenseBaseline::new("s1", YearMonth::new(2025, 1).unwrap());
        jan.rent = 300_000.0;

        let rollup = monthly_rollup(&rows, &[jan]);
        assert_eq!(rollup.len(), 2);

        let january = &rollup[0];
        assert!(january.baseline_applied);
        assert_eq!(january.report_days, 2);
        assert_eq!(january.costs.rent, 300_000.0);
        assert_eq!(january.costs.utilities, 0.0);
        assert_eq!(january.costs.labor_cost_part_time, 0.0);
        assert_eq!(january.costs.food_cost, 50_000.0);
        assert_eq!(january.total_cost, 360_000.0);

        let february = &rollup[1];
        assert!(!february.baseline_applied);
        assert_eq!(february.costs.utilities, 1_000.0);
        assert_eq!(february.costs.labor_cost_part_time, 20_000.0);
    }

    #[tokio::test]
    async fn test_compute_kpis_all_stores() {
        let db = Database::open_memory().await.unwrap();
        let cache = BaselineCache::default();

        let mut b = MonthlyExpenseBaseline::new("s1", YearMonth::new(2025, 4).unwrap());
        b.rent = 300_000.0;
        b.utilities = 60_000.0;
        b.open_days = Some(30);
        expense::save_baseline(&db, &cache, b).await.unwrap();

        db.writer()
            .call(|conn| {
                repository::upsert_store(
                    conn,
                    &repository::Store {
                        store_id: "s1".into(),
                        name: "Shibuya".into(),
                        address: None,
                        is_active: true,
                    },
                )?;
                for day in 1..=10 {
                    repository::upsert_daily_report(conn, &report("s1", d(2025, 4, day), 100_000.0))?;
                    repository::upsert_daily_report(conn, &report("s2", d(2025, 4, day), 50_000.0))?;
                }
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        let range = DateRange::month(YearMonth::new(2025, 4).unwrap());
        let kpis = compute_kpis(&db, &cache, None, &range).await.unwrap();
        assert_eq!(kpis.overall.report_count, 20);
        assert!((kpis.overall.prorated_fixed_cost - 120_000.0).abs() < 1e-6);
        assert_eq!(kpis.stores.len(), 2);
        assert_eq!(kpis.stores[0].store_name, "Shibuya");
        assert_eq!(kpis.stores[1].kpi.prorated_fixed_cost, 0.0);
        assert!(cache.is_known_absent("s2", YearMonth::new(2025, 4).unwrap()));

        let single = compute_kpis(&db, &cache, Some("s2"), &range).await.unwrap();
        assert_eq!(single.overall.total_sales, 500_000.0);
        assert_eq!(single.stores.len(), 1);
    }
}
