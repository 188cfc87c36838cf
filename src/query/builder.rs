use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::date_util::YearMonth;
use crate::error::{Error, Result};
use crate::expense::{CostBreakdown, DailyReport, MonthlyExpenseBaseline};
use crate::storage::{repository, Database};

/// Flat CSV shape of a daily report. Column names match the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub store_id: String,
    pub date: NaiveDate,
    pub sales: f64,
    #[serde(default)]
    pub customer_count: u32,
    #[serde(default)]
    pub food_cost: f64,
    #[serde(default)]
    pub beverage_cost: f64,
    #[serde(default)]
    pub labor_cost_employee: f64,
    #[serde(default)]
    pub labor_cost_part_time: f64,
    #[serde(default)]
    pub utilities: f64,
    #[serde(default)]
    pub rent: f64,
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
    #[serde(default)]
    pub note: Option<String>,
}

impl From<DailyReport> for ReportRow {
    fn from(r: DailyReport) -> Self {
        let c = r.costs;
        Self {
            store_id: r.store_id,
            date: r.date,
            sales: r.sales,
            customer_count: r.customer_count,
            food_cost: c.food_cost,
            beverage_cost: c.beverage_cost,
            labor_cost_employee: c.labor_cost_employee,
            labor_cost_part_time: c.labor_cost_part_time,
            utilities: c.utilities,
            rent: c.rent,
            consumables: c.consumables,
            promotion: c.promotion,
            cleaning: c.cleaning,
            misc: c.misc,
            communication: c.communication,
            others: c.others,
            note: r.note,
        }
    }
}

impl From<ReportRow> for DailyReport {
    fn from(r: ReportRow) -> Self {
        Self {
            store_id: r.store_id,
            date: r.date,
            sales: r.sales,
            customer_count: r.customer_count,
            costs: CostBreakdown {
                food_cost: r.food_cost,
                beverage_cost: r.beverage_cost,
                labor_cost_employee: r.labor_cost_employee,
                labor_cost_part_time: r.labor_cost_part_time,
                utilities: r.utilities,
                rent: r.rent,
                consumables: r.consumables,
                promotion: r.promotion,
                cleaning: r.cleaning,
                misc: r.misc,
                communication: r.communication,
                others: r.others,
            },
            note: r.note.filter(|n| !n.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(Error::InvalidInput(format!(
                "unknown export format: {other} (expected csv or json)"
            ))),
        }
    }
}

/// Builder for daily-report queries with optional filters.
#[derive(Debug, Clone, Default)]
pub struct ReportQuery {
    store_id: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    limit: Option<u32>,
    order_desc: bool,
}

impl ReportQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store_id: &str) -> Self {
        self.store_id = Some(store_id.to_string());
        self
    }

    pub fn from_date(mut self, date: NaiveDate) -> Self {
        self.from = Some(date);
        self
    }

    pub fn to_date(mut self, date: NaiveDate) -> Self {
        self.to = Some(date);
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn descending(mut self) -> Self {
        self.order_desc = true;
        self
    }

    /// Build and execute the query, returning daily reports.
    pub async fn reports(self, db: &Database) -> Result<Vec<DailyReport>> {
        let builder = self;
        let reports = db
            .reader()
            .call(move |conn| {
                let (sql, params) = builder.build_sql();
                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let mut stmt = conn.prepare(&sql)?;
                let rows =
                    stmt.query_map(param_refs.as_slice(), repository::daily_report_from_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
            })
            .await?;
        Ok(reports)
    }

    /// Build and execute the query, returning a count of matching reports.
    pub async fn count(self, db: &Database) -> Result<u64> {
        let builder = self;
        let count = db
            .reader()
            .call(move |conn| {
                let (inner_sql, params) = builder.build_sql();
                let sql = format!("SELECT COUNT(*) FROM ({inner_sql})");
                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
                Ok::<u64, rusqlite::Error>(count as u64)
            })
            .await?;
        Ok(count)
    }

    /// Build and execute the query, returning results as JSON.
    pub async fn to_json(self, db: &Database) -> Result<String> {
        let rows = self.reports(db).await?;
        Ok(serde_json::to_string_pretty(&rows)?)
    }

    /// Build and execute the query, returning results as CSV with a header row.
    pub async fn to_csv(self, db: &Database) -> Result<String> {
        let rows = self.reports(db).await?;
        write_csv(rows.into_iter().map(ReportRow::from))
    }

    pub async fn export(self, db: &Database, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Csv => self.to_csv(db).await,
            ExportFormat::Json => self.to_json(db).await,
        }
    }

    fn build_sql(&self) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut wheres = Vec::new();
        let mut param_idx = 1;

        let mut sql = format!(
            "SELECT {} FROM daily_reports",
            repository::daily_report_columns()
        );

        if let Some(ref store_id) = self.store_id {
            wheres.push(format!("store_id = ?{param_idx}"));
            params.push(Box::new(store_id.clone()));
            param_idx += 1;
        }
        if let Some(from) = self.from {
            wheres.push(format!("date >= ?{param_idx}"));
            params.push(Box::new(from.format("%Y-%m-%d").to_string()));
            param_idx += 1;
        }
        if let Some(to) = self.to {
            wheres.push(format!("date <= ?{param_idx}"));
            params.push(Box::new(to.format("%Y-%m-%d").to_string()));
            param_idx += 1;
        }

        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" AND "));
        }

        let order_dir = if self.order_desc { "DESC" } else { "ASC" };
        sql.push_str(&format!(" ORDER BY date {order_dir}, store_id ASC"));

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT ?{param_idx}"));
            params.push(Box::new(limit));
        }

        (sql, params)
    }
}

/// Serialize rows as CSV with a header row.
pub fn write_csv<T: Serialize>(rows: impl IntoIterator<Item = T>) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| Error::Other(format!("CSV flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Other(e.to_string()))
}

/// Export baselines for an optional store and month range.
pub async fn export_baselines(
    db: &Database,
    store_id: Option<&str>,
    from: Option<YearMonth>,
    to: Option<YearMonth>,
    format: ExportFormat,
) -> Result<String> {
    let sid = store_id.map(str::to_string);
    let baselines: Vec<MonthlyExpenseBaseline> = db
        .reader()
        .call(move |conn| repository::list_baselines(conn, sid.as_deref(), from, to))
        .await?;
    match format {
        ExportFormat::Csv => write_csv(&baselines),
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&baselines)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    async fn seeded_db() -> Database {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                for day in 1..=5 {
                    repository::upsert_daily_report(conn, &DailyReport::new("s1", d(2025, 3, day), 1000.0))?;
                    repository::upsert_daily_report(conn, &DailyReport::new("s2", d(2025, 3, day), 500.0))?;
                }
                let mut noted = DailyReport::new("s1", d(2025, 3, 6), 1200.0);
                noted.note = Some("rain, \"quiet\" day".into());
                repository::upsert_daily_report(conn, &noted)?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
        db
    }

    #[test]
    fn test_build_sql_default() {
        let (sql, params) = ReportQuery::new().build_sql();
        assert!(sql.contains("FROM daily_reports"));
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("ORDER BY date ASC"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_sql_with_filters() {
        let (sql, params) = ReportQuery::new()
            .store("s1")
            .from_date(d(2025, 1, 1))
            .limit(10)
            .descending()
            .build_sql();
        assert!(sql.contains("store_id = ?1"));
        assert!(sql.contains("date >= ?2"));
        assert!(sql.contains("ORDER BY date DESC"));
        assert!(sql.contains("LIMIT ?3"));
        assert_eq!(params.len(), 3);
    }

    #[tokio::test]
    async fn test_query_filters_and_count() {
        let db = seeded_db().await;

        let s1 = ReportQuery::new()
            .store("s1")
            .from_date(d(2025, 3, 2))
            .to_date(d(2025, 3, 4))
            .reports(&db)
            .await
            .unwrap();
        assert_eq!(s1.len(), 3);
        assert!(s1.iter().all(|r| r.store_id == "s1"));

        assert_eq!(ReportQuery::new().count(&db).await.unwrap(), 11);

        let latest = ReportQuery::new().descending().limit(1).reports(&db).await.unwrap();
        assert_eq!(latest[0].date, d(2025, 3, 6));
    }

    #[tokio::test]
    async fn test_csv_export_quotes_fields() {
        let db = seeded_db().await;
        let csv = ReportQuery::new()
            .from_date(d(2025, 3, 6))
            .to_csv(&db)
            .await
            .unwrap();

        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("store_id,date,sales,customer_count,food_cost"));
        assert!(header.ends_with(",note"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("s1,2025-03-06,1200"));
        assert!(row.ends_with("\"rain, \"\"quiet\"\" day\""));
        assert!(lines.next().is_none());
    }

    #[tokio::test]
    async fn test_json_export() {
        let db = seeded_db().await;
        let json = ReportQuery::new()
            .store("s2")
            .export(&db, ExportFormat::Json)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 5);
        assert_eq!(value[0]["store_id"], "s2");
    }

    #[tokio::test]
    async fn test_export_baselines_csv() {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                let mut b = MonthlyExpenseBaseline::new("s1", YearMonth::new(2025, 2).unwrap());
                b.rent = 250_000.0;
                b.open_days = Some(24);
                repository::upsert_baseline(conn, &b)
            })
            .await
            .unwrap();

        let csv = export_baselines(&db, None, None, None, ExportFormat::Csv)
            .await
            .unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("store_id,month,rent"));
        assert!(lines.next().unwrap().starts_with("s1,2025-02,250000"));
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
