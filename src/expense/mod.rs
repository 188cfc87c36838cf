pub mod cache;
pub mod types;

pub use cache::BaselineCache;
pub use types::*;

use std::collections::BTreeSet;

use crate::date_util::YearMonth;
use crate::error::Result;
use crate::query::period::DateRange;
use crate::storage::{repository, Database};

/// Prorate monthly fixed costs over `range`.
///
/// Each baseline contributes `per_day_share * actual_days`, where
/// `actual_days` counts the store's reports inside both the range and the
/// baseline's month. Stores are prorated independently and summed. Months
/// without a baseline contribute nothing.
pub fn prorate(
    baselines: &[MonthlyExpenseBaseline],
    reports: &[DailyReport],
    range: &DateRange,
) -> ProrationSummary {
    let mut months: Vec<ProratedMonthlyCost> = baselines
        .iter()
        .filter_map(|b| {
            let window = range.intersect_month(b.month)?;
            let actual_days = reports
                .iter()
                .filter(|r| r.store_id == b.store_id && window.contains(r.date))
                .count() as u32;
            let per_day_share = b.per_day_share();
            Some(ProratedMonthlyCost {
                store_id: b.store_id.clone(),
                month: b.month,
                monthly_total: b.monthly_total(),
                open_days: b.effective_open_days(),
                per_day_share,
                actual_days,
                contribution: per_day_share * actual_days as f64,
            })
        })
        .collect();
    months.sort_by(|a, b| a.store_id.cmp(&b.store_id).then(a.month.cmp(&b.month)));

    ProrationSummary {
        total: months.iter().map(|m| m.contribution).sum(),
        months,
    }
}

/// [`prorate`] restricted to a single store.
pub fn prorate_store(
    store_id: &str,
    baselines: &[MonthlyExpenseBaseline],
    reports: &[DailyReport],
    range: &DateRange,
) -> f64 {
    let own: Vec<MonthlyExpenseBaseline> = baselines
        .iter()
        .filter(|b| b.store_id == store_id)
        .cloned()
        .collect();
    prorate(&own, reports, range).total
}

/// Fetch the baseline for `(store_id, month)`.
///
/// A missing row or a missing table yields `None` and is remembered in
/// `cache`; any other database failure is returned as an error.
pub async fn load_baseline(
    db: &Database,
    cache: &BaselineCache,
    store_id: &str,
    month: YearMonth,
) -> Result<Option<MonthlyExpenseBaseline>> {
    if cache.is_known_absent(store_id, month) {
        log::trace!("Baseline {store_id}/{month} known absent");
        return Ok(None);
    }

    let sid = store_id.to_string();
    let found = db
        .reader()
        .call(move |conn| match repository::get_baseline(conn, &sid, month) {
            Ok(b) => Ok(b),
            Err(e) if repository::is_missing_table(&e) => {
                log::debug!("expense_baselines table missing: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        })
        .await?;

    if found.is_none() {
        cache.mark_absent(store_id, month);
    }
    Ok(found)
}

/// Baselines for every `(store, month)` pair the range touches.
pub async fn load_baselines_for(
    db: &Database,
    cache: &BaselineCache,
    store_ids: &[String],
    range: &DateRange,
) -> Result<Vec<MonthlyExpenseBaseline>> {
    let months = range.months();
    let mut out = Vec::new();
    for store_id in store_ids {
        for month in &months {
            if let Some(b) = load_baseline(db, cache, store_id, *month).await? {
                out.push(b);
            }
        }
    }
    Ok(out)
}

/// Write a baseline and drop any cached "absent" marker for its key.
pub async fn save_baseline(
    db: &Database,
    cache: &BaselineCache,
    baseline: MonthlyExpenseBaseline,
) -> Result<()> {
    baseline.validate()?;
    let (store_id, month) = (baseline.store_id.clone(), baseline.month);
    db.writer()
        .call(move |conn| repository::upsert_baseline(conn, &baseline))
        .await?;
    cache.invalidate(&store_id, month);
    Ok(())
}

/// Distinct store ids present in `reports`, sorted.
pub fn store_ids(reports: &[DailyReport]) -> Vec<String> {
    reports
        .iter()
        .map(|r| r.store_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Load reports for the selection and prorate the matching baselines.
pub async fn prorated_fixed_cost(
    db: &Database,
    cache: &BaselineCache,
    store_id: Option<&str>,
    range: &DateRange,
) -> Result<ProrationSummary> {
    let sid = store_id.map(str::to_string);
    let r = *range;
    let reports = db
        .reader()
        .call(move |conn| repository::list_daily_reports(conn, sid.as_deref(), &r))
        .await?;
    let baselines = load_baselines_for(db, cache, &store_ids(&reports), range).await?;
    Ok(prorate(&baselines, &reports, range))
}
