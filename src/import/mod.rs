use std::io::Read;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::expense::{BaselineCache, DailyReport, MonthlyExpenseBaseline};
use crate::query::builder::ReportRow;
use crate::storage::{repository, Database};

/// One rejected CSV line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineError {
    /// 1-based line number, counting the header as line 1.
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub failed: usize,
    pub errors: Vec<LineError>,
}

impl ImportSummary {
    fn reject(&mut self, line: u64, message: String) {
        log::warn!("Skipping line {line}: {message}");
        self.failed += 1;
        self.errors.push(LineError { line, message });
    }
}

/// Import daily reports from a CSV file with a header row.
pub async fn import_reports_csv(db: &Database, path: &Path) -> Result<ImportSummary> {
    log::info!("Importing daily reports from {}", path.display());
    let file = std::fs::File::open(path)?;
    import_reports(db, file).await
}

/// Import daily reports from any CSV source. Valid rows are upserted in a
/// single transaction; invalid rows are counted and reported per line.
pub async fn import_reports<R: Read>(db: &Database, source: R) -> Result<ImportSummary> {
    let mut reader = csv::Reader::from_reader(source);
    let mut summary = ImportSummary::default();
    let mut valid = Vec::new();

    for (i, result) in reader.deserialize::<ReportRow>().enumerate() {
        let line = i as u64 + 2;
        match result {
            Ok(row) => {
                let report = DailyReport::from(row);
                match report.validate() {
                    Ok(()) => valid.push(report),
                    Err(e) => summary.reject(line, e.to_string()),
                }
            }
            Err(e) => summary.reject(line, e.to_string()),
        }
    }

    summary.imported = valid.len();
    db.writer()
        .call(move |conn| {
            let tx = conn.transaction()?;
            for report in &valid {
                repository::upsert_daily_report(&tx, report)?;
            }
            tx.commit()?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;

    log::info!(
        "Imported {} reports, {} failed",
        summary.imported,
        summary.failed
    );
    Ok(summary)
}

/// Import monthly baselines from CSV, dropping cached "absent" markers for
/// every key written.
pub async fn import_baselines<R: Read>(
    db: &Database,
    cache: &BaselineCache,
    source: R,
) -> Result<ImportSummary> {
    let mut reader = csv::Reader::from_reader(source);
    let mut summary = ImportSummary::default();
    let mut valid: Vec<MonthlyExpenseBaseline> = Vec::new();

    for (i, result) in reader.deserialize::<MonthlyExpenseBaseline>().enumerate() {
        let line = i as u64 + 2;
        match result {
            Ok(b) => match b.validate() {
                Ok(()) => valid.push(b),
                Err(e) => summary.reject(line, e.to_string()),
            },
            Err(e) => summary.reject(line, e.to_string()),
        }
    }

    summary.imported = valid.len();
    let keys: Vec<_> = valid.iter().map(|b| (b.store_id.clone(), b.month)).collect();
    db.writer()
        .call(move |conn| {
            let tx = conn.transaction()?;
            for b in &valid {
                repository::upsert_baseline(&tx, b)?;
            }
            tx.commit()?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
    for (store_id, month) in keys {
        cache.invalidate(&store_id, month);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date_util::YearMonth;
    use crate::query::builder::ReportQuery;
    use std::io::Write;

    const HEADER: &str = "store_id,date,sales,customer_count,food_cost,beverage_cost,labor_cost_employee,labor_cost_part_time,utilities,rent,consumables,promotion,cleaning,misc,communication,others,note";

    #[tokio::test]
    async fn test_import_counts_good_and_bad_lines() {
        let db = Database::open_memory().await.unwrap();
        let data = format!(
            "{HEADER}\n\
             s1,2025-03-01,100000,50,30000,5000,20000,10000,0,0,0,0,0,0,0,0,\n\
             s1,2025-03-02,not-a-number,50,0,0,0,0,0,0,0,0,0,0,0,0,\n\
             s1,2025-03-03,90000,45,-5,0,0,0,0,0,0,0,0,0,0,0,\n\
             s2,2025-03-01,60000,30,18000,0,0,0,0,0,0,0,0,0,0,0,\"busy, rainy\"\n"
        );

        let summary = import_reports(&db, data.as_bytes()).await.unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.errors[0].line, 3);
        assert_eq!(summary.errors[1].line, 4);
        assert!(summary.errors[1].message.contains("food_cost"));

        let rows = ReportQuery::new().reports(&db).await.unwrap();
        assert_eq!(rows.len(), 2);
        let s2 = rows.iter().find(|r| r.store_id == "s2").unwrap();
        assert_eq!(s2.note.as_deref(), Some("busy, rainy"));
        let s1 = rows.iter().find(|r| r.store_id == "s1").unwrap();
        assert_eq!(s1.note, None);
        assert_eq!(s1.costs.labor(), 30_000.0);
    }

    #[tokio::test]
    async fn test_export_then_import_into_fresh_db() {
        let source = Database::open_memory().await.unwrap();
        source
            .writer()
            .call(|conn| {
                let mut r = DailyReport::new("s1", chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), 1234.5);
                r.costs.rent = 100.0;
                repository::upsert_daily_report(conn, &r)
            })
            .await
            .unwrap();
        let csv = ReportQuery::new().to_csv(&source).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.csv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(csv.as_bytes())
            .unwrap();

        let target = Database::open_memory().await.unwrap();
        let summary = import_reports_csv(&target, &path).await.unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.failed, 0);

        let original = ReportQuery::new().reports(&source).await.unwrap();
        let copied = ReportQuery::new().reports(&target).await.unwrap();
        assert_eq!(original, copied);
    }

    #[tokio::test]
    async fn test_import_baselines_invalidates_cache() {
        let db = Database::open_memory().await.unwrap();
        let cache = BaselineCache::default();
        let april = YearMonth::new(2025, 4).unwrap();
        cache.mark_absent("s1", april);

        let data = "store_id,month,rent,utilities,labor_cost_employee,labor_cost_part_time,consumables,promotion,cleaning,misc,communication,others,open_days\n\
                    s1,2025-04,300000,60000,0,0,0,0,0,0,0,0,30\n\
                    s1,2025-13,1,0,0,0,0,0,0,0,0,0,\n\
                    s2,2025-04,100,0,0,0,0,0,-50,0,0,0,\n";
        let summary = import_baselines(&db, &cache, data.as_bytes()).await.unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.errors[1].line, 4);
        assert!(summary.errors[1].message.contains("cleaning"));
        assert!(!cache.is_known_absent("s1", april));

        let stored = db
            .reader()
            .call(move |conn| repository::get_baseline(conn, "s1", april))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.open_days, Some(30));
        assert_eq!(stored.monthly_total(), 360_000.0);
    }
}
