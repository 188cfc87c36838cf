pub mod anomaly;
pub mod api;
pub mod date_util;
pub mod error;
pub mod expense;
pub mod import;
pub mod llm;
pub mod metrics;
pub mod query;
pub mod storage;

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;

pub use anomaly::{AnomalyRequest, AnomalyResult, DetectorSettings, MetricType, Severity};
pub use api::{AnomalyResponse, ReportResponse};
pub use date_util::YearMonth;
pub use error::{Error, Result};
pub use expense::{BaselineCache, DailyReport, ExpenseReference, MonthlyExpenseBaseline};
pub use import::ImportSummary;
pub use llm::agents::report::{AiReport, ReportGenerationLog, ReportRequest};
pub use llm::Completer;
pub use metrics::{Growth, KpiSnapshot, MonthlyRollup, SelectionKpis};
pub use query::builder::{ExportFormat, ReportQuery};
pub use query::period::{DateRange, Period, ReportType};
pub use storage::Database;

// Re-export repository types needed by the binary crate, but not the module itself
pub use storage::repository::{Store, WarehouseStatus};

use llm::agents::report;
use storage::repository;

/// Main entry point: the warehouse plus the process-wide baseline cache.
pub struct FoodValue {
    db: Database,
    cache: BaselineCache,
}

impl FoodValue {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: BaselineCache::default(),
        }
    }

    /// Build with the cache TTL taken from `baseline_cache_ttl_secs`, if set.
    pub async fn from_config(db: Database) -> Result<Self> {
        let ttl: Option<String> = db
            .reader()
            .call(|conn| repository::get_config(conn, "baseline_cache_ttl_secs"))
            .await?;
        let cache = match ttl {
            Some(s) => {
                let secs: u64 = s.trim().parse().map_err(|_| {
                    Error::Config(format!("baseline_cache_ttl_secs must be an integer, got {s}"))
                })?;
                BaselineCache::new(Duration::from_secs(secs), expense::cache::DEFAULT_CAPACITY)
            }
            None => BaselineCache::default(),
        };
        Ok(Self { db, cache })
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn cache(&self) -> &BaselineCache {
        &self.cache
    }

    // ── Stores ───────────────────────────────────────────────────

    pub async fn add_store(&self, store: Store) -> Result<()> {
        self.db
            .writer()
            .call(move |conn| repository::upsert_store(conn, &store))
            .await?;
        Ok(())
    }

    pub async fn list_stores(&self) -> Result<Vec<Store>> {
        Ok(self.db.reader().call(|conn| repository::list_stores(conn)).await?)
    }

    // ── Daily reports ────────────────────────────────────────────

    /// Insert or replace the report for its `(store_id, date)`.
    pub async fn save_report(&self, report: DailyReport) -> Result<()> {
        report.validate()?;
        self.db
            .writer()
            .call(move |conn| repository::upsert_daily_report(conn, &report))
            .await?;
        Ok(())
    }

    pub async fn get_report(&self, store_id: &str, date: NaiveDate) -> Result<Option<DailyReport>> {
        let store_id = store_id.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::get_daily_report(conn, &store_id, date))
            .await?)
    }

    pub async fn delete_report(&self, store_id: &str, date: NaiveDate) -> Result<bool> {
        let store_id = store_id.to_string();
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::delete_daily_report(conn, &store_id, date))
            .await?)
    }

    pub async fn import_reports_csv(&self, path: &Path) -> Result<ImportSummary> {
        import::import_reports_csv(&self.db, path).await
    }

    pub async fn export_reports(&self, query: ReportQuery, format: ExportFormat) -> Result<String> {
        query.export(&self.db, format).await
    }

    // ── Baselines ────────────────────────────────────────────────

    pub async fn set_baseline(&self, baseline: MonthlyExpenseBaseline) -> Result<()> {
        expense::save_baseline(&self.db, &self.cache, baseline).await
    }

    pub async fn get_baseline(
        &self,
        store_id: &str,
        month: YearMonth,
    ) -> Result<Option<MonthlyExpenseBaseline>> {
        expense::load_baseline(&self.db, &self.cache, store_id, month).await
    }

    pub async fn delete_baseline(&self, store_id: &str, month: YearMonth) -> Result<bool> {
        let sid = store_id.to_string();
        let deleted = self
            .db
            .writer()
            .call(move |conn| repository::delete_baseline(conn, &sid, month))
            .await?;
        self.cache.invalidate(store_id, month);
        Ok(deleted)
    }

    /// Per-day and full-month expense reference for a store's month.
    pub async fn expense_reference(
        &self,
        store_id: &str,
        month: YearMonth,
    ) -> Result<Option<(ExpenseReference, ExpenseReference)>> {
        Ok(self
            .get_baseline(store_id, month)
            .await?
            .map(|b| (b.daily_reference(), b.monthly_reference())))
    }

    pub async fn list_baselines(
        &self,
        store_id: Option<&str>,
        from: Option<YearMonth>,
        to: Option<YearMonth>,
    ) -> Result<Vec<MonthlyExpenseBaseline>> {
        let store_id = store_id.map(str::to_string);
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::list_baselines(conn, store_id.as_deref(), from, to))
            .await?)
    }

    pub async fn export_baselines(
        &self,
        store_id: Option<&str>,
        from: Option<YearMonth>,
        to: Option<YearMonth>,
        format: ExportFormat,
    ) -> Result<String> {
        query::builder::export_baselines(&self.db, store_id, from, to, format).await
    }

    pub async fn import_baselines_csv(&self, path: &Path) -> Result<ImportSummary> {
        let file = std::fs::File::open(path)?;
        import::import_baselines(&self.db, &self.cache, file).await
    }

    // ── KPIs ─────────────────────────────────────────────────────

    pub async fn kpis(&self, store_id: Option<&str>, range: &DateRange) -> Result<SelectionKpis> {
        metrics::compute_kpis(&self.db, &self.cache, store_id, range).await
    }

    pub async fn prorated_fixed_cost(
        &self,
        store_id: Option<&str>,
        range: &DateRange,
    ) -> Result<expense::ProrationSummary> {
        expense::prorated_fixed_cost(&self.db, &self.cache, store_id, range).await
    }

    pub async fn kpis_with_growth(
        &self,
        store_id: Option<&str>,
        range: &DateRange,
    ) -> Result<(SelectionKpis, Growth)> {
        metrics::compute_growth(&self.db, &self.cache, store_id, range).await
    }

    pub async fn monthly_rollup(
        &self,
        store_id: Option<&str>,
        range: &DateRange,
    ) -> Result<Vec<MonthlyRollup>> {
        metrics::compute_monthly_rollup(&self.db, &self.cache, store_id, range).await
    }

    // ── Anomalies ────────────────────────────────────────────────

    /// Window and minimum history from config, falling back to defaults.
    pub async fn detector_settings(&self) -> Result<DetectorSettings> {
        let (window, min_history) = self
            .db
            .reader()
            .call(|conn| {
                let window = repository::get_config(conn, "anomaly_window_days")?;
                let min_history = repository::get_config(conn, "anomaly_min_history")?;
                Ok::<_, rusqlite::Error>((window, min_history))
            })
            .await?;

        let mut settings = DetectorSettings::default();
        if let Some(w) = window {
            settings.window_days = w.trim().parse().map_err(|_| {
                Error::Config(format!("anomaly_window_days must be an integer, got {w}"))
            })?;
        }
        if let Some(m) = min_history {
            settings.min_history = m.trim().parse().map_err(|_| {
                Error::Config(format!("anomaly_min_history must be an integer, got {m}"))
            })?;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub async fn detect_anomaly(
        &self,
        request: &AnomalyRequest,
        completer: Option<&dyn Completer>,
    ) -> Result<AnomalyResult> {
        let settings = self.detector_settings().await?;
        anomaly::detect_anomaly(&self.db, completer, request, settings).await
    }

    /// [`detect_anomaly`](Self::detect_anomaly) wrapped in the JSON envelope.
    pub async fn handle_anomaly(
        &self,
        request: &AnomalyRequest,
        completer: Option<&dyn Completer>,
    ) -> (u16, AnomalyResponse) {
        AnomalyResponse::from_result(self.detect_anomaly(request, completer).await)
    }

    // ── AI reports ───────────────────────────────────────────────

    pub async fn generate_report(
        &self,
        request: &ReportRequest,
        completer: Option<&dyn Completer>,
        today: NaiveDate,
    ) -> Result<AiReport> {
        report::generate_ai_report(&self.db, &self.cache, completer, request, today).await
    }

    pub async fn handle_report(
        &self,
        request: &ReportRequest,
        completer: Option<&dyn Completer>,
        today: NaiveDate,
    ) -> (u16, ReportResponse) {
        ReportResponse::from_result(self.generate_report(request, completer, today).await)
    }

    pub async fn get_ai_report(&self, report_id: i64) -> Result<AiReport> {
        self.db
            .reader()
            .call(move |conn| report::get_ai_report(conn, report_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("AI report {report_id}")))
    }

    pub async fn list_ai_reports(
        &self,
        store_id: Option<&str>,
        report_type: Option<ReportType>,
        limit: usize,
    ) -> Result<Vec<AiReport>> {
        let store_id = store_id.map(str::to_string);
        Ok(self
            .db
            .reader()
            .call(move |conn| report::list_ai_reports(conn, store_id.as_deref(), report_type, limit))
            .await?)
    }

    pub async fn list_generation_logs(&self, limit: usize) -> Result<Vec<ReportGenerationLog>> {
        Ok(self
            .db
            .reader()
            .call(move |conn| report::list_generation_logs(conn, limit))
            .await?)
    }

    // ── Config ───────────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::get_config(conn, &key))
            .await?)
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.db
            .writer()
            .call(move |conn| repository::set_config(conn, &key, &value))
            .await?;
        Ok(())
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        Ok(self.db.reader().call(|conn| repository::list_config(conn)).await?)
    }

    pub async fn status(&self) -> Result<WarehouseStatus> {
        Ok(self.db.reader().call(|conn| repository::warehouse_status(conn)).await?)
    }
}
