use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::date_util::YearMonth;
use crate::expense::types::{CostBreakdown, DailyReport, MonthlyExpenseBaseline};
use crate::query::period::DateRange;

/// A store as listed in the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub store_id: String,
    pub name: String,
    pub address: Option<String>,
    pub is_active: bool,
}

// ── Stores ─────────────────────────────────────────────────────────

pub fn upsert_store(conn: &Connection, store: &Store) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO stores (store_id, name, address, is_active)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(store_id) DO UPDATE SET
            name=excluded.name, address=excluded.address, is_active=excluded.is_active",
        params![store.store_id, store.name, store.address, store.is_active as i32],
    )?;
    Ok(())
}

pub fn list_stores(conn: &Connection) -> Result<Vec<Store>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT store_id, name, address, is_active FROM stores ORDER BY store_id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Store {
            store_id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            is_active: row.get::<_, i32>(3)? != 0,
        })
    })?;
    rows.collect()
}

/// Display names for the given store ids. Unknown ids are simply absent.
pub fn store_names(
    conn: &Connection,
    store_ids: &[String],
) -> Result<HashMap<String, String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT name FROM stores WHERE store_id = ?1")?;
    let mut names = HashMap::new();
    for id in store_ids {
        let name: Option<String> = stmt.query_row([id], |row| row.get(0)).optional()?;
        if let Some(name) = name {
            names.insert(id.clone(), name);
        }
    }
    Ok(names)
}

// ── Daily reports ──────────────────────────────────────────────────

const DAILY_REPORT_COLUMNS: &str = "store_id, date, sales, customer_count,
    food_cost, beverage_cost, labor_cost_employee, labor_cost_part_time,
    utilities, rent, consumables, promotion, cleaning, misc, communication, others, note";

pub fn upsert_daily_report(conn: &Connection, report: &DailyReport) -> Result<(), rusqlite::Error> {
    let c = &report.costs;
    conn.execute(
        &format!(
            "INSERT INTO daily_reports ({DAILY_REPORT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(store_id, date) DO UPDATE SET
                sales=excluded.sales, customer_count=excluded.customer_count,
                food_cost=excluded.food_cost, beverage_cost=excluded.beverage_cost,
                labor_cost_employee=excluded.labor_cost_employee,
                labor_cost_part_time=excluded.labor_cost_part_time,
                utilities=excluded.utilities, rent=excluded.rent,
                consumables=excluded.consumables, promotion=excluded.promotion,
                cleaning=excluded.cleaning, misc=excluded.misc,
                communication=excluded.communication, others=excluded.others,
                note=excluded.note, updated_at=datetime('now')"
        ),
        params![
            report.store_id,
            report.date.format("%Y-%m-%d").to_string(),
            report.sales,
            report.customer_count,
            c.food_cost,
            c.beverage_cost,
            c.labor_cost_employee,
            c.labor_cost_part_time,
            c.utilities,
            c.rent,
            c.consumables,
            c.promotion,
            c.cleaning,
            c.misc,
            c.communication,
            c.others,
            report.note,
        ],
    )?;
    Ok(())
}

/// Reports in `range`, optionally for one store, ordered by date then store.
pub fn list_daily_reports(
    conn: &Connection,
    store_id: Option<&str>,
    range: &DateRange,
) -> Result<Vec<DailyReport>, rusqlite::Error> {
    let start = range.start.format("%Y-%m-%d").to_string();
    let end = range.end.format("%Y-%m-%d").to_string();
    let mut stmt = conn.prepare(&format!(
        "SELECT {DAILY_REPORT_COLUMNS} FROM daily_reports
         WHERE date >= ?1 AND date <= ?2 AND (?3 IS NULL OR store_id = ?3)
         ORDER BY date, store_id"
    ))?;
    let rows = stmt.query_map(params![start, end, store_id], daily_report_from_row)?;
    rows.collect()
}

pub fn get_daily_report(
    conn: &Connection,
    store_id: &str,
    date: NaiveDate,
) -> Result<Option<DailyReport>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {DAILY_REPORT_COLUMNS} FROM daily_reports WHERE store_id = ?1 AND date = ?2"
        ),
        params![store_id, date.format("%Y-%m-%d").to_string()],
        daily_report_from_row,
    )
    .optional()
}

pub fn delete_daily_report(
    conn: &Connection,
    store_id: &str,
    date: NaiveDate,
) -> Result<bool, rusqlite::Error> {
    let n = conn.execute(
        "DELETE FROM daily_reports WHERE store_id = ?1 AND date = ?2",
        params![store_id, date.format("%Y-%m-%d").to_string()],
    )?;
    Ok(n > 0)
}

/// Map a row selected with `DAILY_REPORT_COLUMNS`, starting at column 0.
pub(crate) fn daily_report_from_row(row: &Row<'_>) -> Result<DailyReport, rusqlite::Error> {
    let date_str: String = row.get(1)?;
    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    Ok(DailyReport {
        store_id: row.get(0)?,
        date,
        sales: row.get(2)?,
        customer_count: row.get(3)?,
        costs: CostBreakdown {
            food_cost: row.get(4)?,
            beverage_cost: row.get(5)?,
            labor_cost_employee: row.get(6)?,
            labor_cost_part_time: row.get(7)?,
            utilities: row.get(8)?,
            rent: row.get(9)?,
            consumables: row.get(10)?,
            promotion: row.get(11)?,
            cleaning: row.get(12)?,
            misc: row.get(13)?,
            communication: row.get(14)?,
            others: row.get(15)?,
        },
        note: row.get(16)?,
    })
}

pub(crate) fn daily_report_columns() -> &'static str {
    DAILY_REPORT_COLUMNS
}

// ── Expense baselines ──────────────────────────────────────────────

const BASELINE_COLUMNS: &str = "store_id, month, rent, utilities,
    labor_cost_employee, labor_cost_part_time, consumables, promotion,
    cleaning, misc, communication, others, open_days";

pub fn upsert_baseline(
    conn: &Connection,
    baseline: &MonthlyExpenseBaseline,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        &format!(
            "INSERT INTO expense_baselines ({BASELINE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(store_id, month) DO UPDATE SET
                rent=excluded.rent, utilities=excluded.utilities,
                labor_cost_employee=excluded.labor_cost_employee,
                labor_cost_part_time=excluded.labor_cost_part_time,
                consumables=excluded.consumables, promotion=excluded.promotion,
                cleaning=excluded.cleaning, misc=excluded.misc,
                communication=excluded.communication, others=excluded.others,
                open_days=excluded.open_days, updated_at=datetime('now')"
        ),
        params![
            baseline.store_id,
            baseline.month.to_key(),
            baseline.rent,
            baseline.utilities,
            baseline.labor_cost_employee,
            baseline.labor_cost_part_time,
            baseline.consumables,
            baseline.promotion,
            baseline.cleaning,
            baseline.misc,
            baseline.communication,
            baseline.others,
            baseline.open_days,
        ],
    )?;
    Ok(())
}

pub fn get_baseline(
    conn: &Connection,
    store_id: &str,
    month: YearMonth,
) -> Result<Option<MonthlyExpenseBaseline>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {BASELINE_COLUMNS} FROM expense_baselines WHERE store_id = ?1 AND month = ?2"
        ),
        params![store_id, month.to_key()],
        baseline_from_row,
    )
    .optional()
}

/// Baselines for an optional store between two months (inclusive).
pub fn list_baselines(
    conn: &Connection,
    store_id: Option<&str>,
    from: Option<YearMonth>,
    to: Option<YearMonth>,
) -> Result<Vec<MonthlyExpenseBaseline>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BASELINE_COLUMNS} FROM expense_baselines
         WHERE (?1 IS NULL OR store_id = ?1)
           AND (?2 IS NULL OR month >= ?2)
           AND (?3 IS NULL OR month <= ?3)
         ORDER BY month, store_id"
    ))?;
    let rows = stmt.query_map(
        params![store_id, from.map(|m| m.to_key()), to.map(|m| m.to_key())],
        baseline_from_row,
    )?;
    rows.collect()
}

pub fn delete_baseline(
    conn: &Connection,
    store_id: &str,
    month: YearMonth,
) -> Result<bool, rusqlite::Error> {
    let n = conn.execute(
        "DELETE FROM expense_baselines WHERE store_id = ?1 AND month = ?2",
        params![store_id, month.to_key()],
    )?;
    Ok(n > 0)
}

fn baseline_from_row(row: &Row<'_>) -> Result<MonthlyExpenseBaseline, rusqlite::Error> {
    let month_str: String = row.get(1)?;
    let month: YearMonth = month_str
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    Ok(MonthlyExpenseBaseline {
        store_id: row.get(0)?,
        month,
        rent: row.get(2)?,
        utilities: row.get(3)?,
        labor_cost_employee: row.get(4)?,
        labor_cost_part_time: row.get(5)?,
        consumables: row.get(6)?,
        promotion: row.get(7)?,
        cleaning: row.get(8)?,
        misc: row.get(9)?,
        communication: row.get(10)?,
        others: row.get(11)?,
        open_days: row.get(12)?,
    })
}

/// True for "table is missing" failures, which callers treat as "no rows".
pub fn is_missing_table(e: &rusqlite::Error) -> bool {
    e.to_string().contains("no such table")
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Status ─────────────────────────────────────────────────────────

/// Row counts and data coverage for `foodvalue status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarehouseStatus {
    pub stores: i64,
    pub daily_reports: i64,
    pub baselines: i64,
    pub ai_reports: i64,
    pub first_report_date: Option<String>,
    pub last_report_date: Option<String>,
}

pub fn warehouse_status(conn: &Connection) -> Result<WarehouseStatus, rusqlite::Error> {
    let count = |table: &str| -> Result<i64, rusqlite::Error> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
    };
    let (first, last): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(date), MAX(date) FROM daily_reports",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(WarehouseStatus {
        stores: count("stores")?,
        daily_reports: count("daily_reports")?,
        baselines: count("expense_baselines")?,
        ai_reports: count("ai_reports")?,
        first_report_date: first,
        last_report_date: last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[tokio::test]
    async fn test_warehouse_status() {
        let db = Database::open_memory().await.unwrap();
        let status = db
            .writer()
            .call(|conn| {
                upsert_daily_report(conn, &DailyReport::new("s1", d(2025, 1, 3), 1.0))?;
                upsert_daily_report(conn, &DailyReport::new("s1", d(2025, 2, 9), 1.0))?;
                warehouse_status(conn)
            })
            .await
            .unwrap();
        assert_eq!(status.daily_reports, 2);
        assert_eq!(status.stores, 0);
        assert_eq!(status.first_report_date.as_deref(), Some("2025-01-03"));
        assert_eq!(status.last_report_date.as_deref(), Some("2025-02-09"));
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_config(conn, "llm_model", "haiku")?;
                let val = get_config(conn, "llm_model")?;
                assert_eq!(val, Some("haiku".to_string()));

                let missing = get_config(conn, "nonexistent")?;
                assert_eq!(missing, None);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_daily_report_upsert_is_keyed_by_store_and_date() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let mut r = DailyReport::new("s1", d(2025, 1, 5), 100_000.0);
                r.costs.food_cost = 30_000.0;
                r.customer_count = 42;
                upsert_daily_report(conn, &r)?;

                r.sales = 120_000.0;
                r.note = Some("corrected".into());
                upsert_daily_report(conn, &r)?;

                upsert_daily_report(conn, &DailyReport::new("s2", d(2025, 1, 5), 50_000.0))?;

                let all = list_daily_reports(
                    conn,
                    None,
                    &DateRange::new(d(2025, 1, 1), d(2025, 1, 31)).unwrap(),
                )?;
                assert_eq!(all.len(), 2);

                let fetched = get_daily_report(conn, "s1", d(2025, 1, 5))?.unwrap();
                assert_eq!(fetched.sales, 120_000.0);
                assert_eq!(fetched.costs.food_cost, 30_000.0);
                assert_eq!(fetched.customer_count, 42);
                assert_eq!(fetched.note.as_deref(), Some("corrected"));

                assert!(delete_daily_report(conn, "s2", d(2025, 1, 5))?);
                assert!(!delete_daily_report(conn, "s2", d(2025, 1, 5))?);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_daily_reports_filters_store_and_range() {
        let db = Database::open_memory().await.unwrap();

        let reports = db
            .writer()
            .call(|conn| {
                for day in 1..=10 {
                    upsert_daily_report(conn, &DailyReport::new("s1", d(2025, 2, day), 1.0))?;
                    upsert_daily_report(conn, &DailyReport::new("s2", d(2025, 2, day), 2.0))?;
                }
                list_daily_reports(
                    conn,
                    Some("s1"),
                    &DateRange::new(d(2025, 2, 3), d(2025, 2, 6)).unwrap(),
                )
            })
            .await
            .unwrap();

        assert_eq!(reports.len(), 4);
        assert!(reports.iter().all(|r| r.store_id == "s1"));
        assert_eq!(reports[0].date, d(2025, 2, 3));
        assert_eq!(reports[3].date, d(2025, 2, 6));
    }

    #[tokio::test]
    async fn test_baseline_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let jan = YearMonth::new(2025, 1).unwrap();
                let feb = YearMonth::new(2025, 2).unwrap();

                let mut b = MonthlyExpenseBaseline::new("s1", jan);
                b.rent = 300_000.0;
                b.open_days = Some(26);
                upsert_baseline(conn, &b)?;

                let mut b2 = MonthlyExpenseBaseline::new("s1", feb);
                b2.utilities = 60_000.0;
                upsert_baseline(conn, &b2)?;

                let fetched = get_baseline(conn, "s1", jan)?.unwrap();
                assert_eq!(fetched, b);
                assert_eq!(get_baseline(conn, "s1", feb)?.unwrap().open_days, None);
                assert!(get_baseline(conn, "s2", jan)?.is_none());

                let only_feb = list_baselines(conn, Some("s1"), Some(feb), None)?;
                assert_eq!(only_feb.len(), 1);
                assert_eq!(only_feb[0].month, feb);

                assert!(delete_baseline(conn, "s1", feb)?);
                assert_eq!(list_baselines(conn, None, None, None)?.len(), 1);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_names() {
        let db = Database::open_memory().await.unwrap();

        let names = db
            .writer()
            .call(|conn| {
                upsert_store(
                    conn,
                    &Store {
                        store_id: "s1".into(),
                        name: "Shibuya".into(),
                        address: None,
                        is_active: true,
                    },
                )?;
                assert_eq!(list_stores(conn)?.len(), 1);
                store_names(conn, &["s1".to_string(), "s9".to_string()])
            })
            .await
            .unwrap();

        assert_eq!(names.get("s1").map(String::as_str), Some("Shibuya"));
        assert!(!names.contains_key("s9"));
    }

    #[tokio::test]
    async fn test_missing_table_is_detected() {
        let db = Database::open_memory().await.unwrap();

        let err = db
            .writer()
            .call(|conn| {
                conn.execute_batch("DROP TABLE expense_baselines")?;
                Ok::<_, rusqlite::Error>(
                    get_baseline(conn, "s1", YearMonth::new(2025, 1).unwrap()).unwrap_err(),
                )
            })
            .await
            .unwrap();

        assert!(is_missing_table(&err));
    }
}
