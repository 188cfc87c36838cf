use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::date_util::{extract_json_object, strip_code_fences};
use crate::error::{Error, Result};
use crate::expense::BaselineCache;
use crate::llm::Completer;
use crate::metrics::{self, rate, SelectionKpis, StoreKpi};
use crate::query::period::{DateRange, ReportType};
use crate::storage::Database;

const PROMPT_VERSION: &str = "report-v1";
pub const RULE_BASED: &str = "rule-based";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub report_type: ReportType,
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub period_start: Option<NaiveDate>,
    #[serde(default)]
    pub period_end: Option<NaiveDate>,
}

impl ReportRequest {
    /// Explicit period when both ends are given, else the type's default window.
    pub fn resolve_range(&self, today: NaiveDate) -> Result<DateRange> {
        match (self.period_start, self.period_end) {
            (Some(start), Some(end)) => DateRange::new(start, end),
            (None, None) => Ok(self.report_type.default_range(today)),
            _ => Err(Error::InvalidInput(
                "period_start and period_end must be given together".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReportAnalysis {
    pub sales_trend: String,
    pub profitability: String,
    pub cost_structure: String,
    pub store_comparison: String,
}

/// Narrative part of a report, as returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReportContent {
    pub title: String,
    pub summary: String,
    pub analysis: ReportAnalysis,
    pub key_insights: Vec<String>,
    pub recommendations: Vec<String>,
}

/// A persisted report. Rows are never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiReport {
    pub report_id: i64,
    pub report_type: ReportType,
    pub store_id: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub title: String,
    pub summary: String,
    pub analysis: ReportAnalysis,
    pub key_insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub metrics: serde_json::Value,
    pub generated_by: String,
    pub prompt_version: String,
    pub generated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    InProgress,
    Success,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::InProgress => "in_progress",
            GenerationStatus::Success => "success",
            GenerationStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportGenerationLog {
    pub log_id: i64,
    pub report_type: String,
    pub store_id: Option<String>,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub report_id: Option<i64>,
    pub report_count: Option<i64>,
    pub store_count: Option<i64>,
}

// ── Generation ─────────────────────────────────────────────────────

/// Generate and persist a report for the requested period.
///
/// Every attempt is recorded in `report_generation_logs`. A selection with
/// no daily reports fails with [`Error::NoData`]. When the completer is
/// missing, fails, or answers with unparseable JSON, a rule-based narrative
/// is written instead.
pub async fn generate_ai_report(
    db: &Database,
    cache: &BaselineCache,
    completer: Option<&dyn Completer>,
    request: &ReportRequest,
    today: NaiveDate,
) -> Result<AiReport> {
    let range = request.resolve_range(today)?;
    let log_id = start_log(db, request.report_type, request.store_id.as_deref()).await?;
    log::info!(
        "Generating {} report for {} over {range}",
        request.report_type.as_str(),
        request.store_id.as_deref().unwrap_or("all stores")
    );

    match build_and_store(db, cache, completer, request, &range).await {
        Ok((report, report_count, store_count)) => {
            finish_log(
                db,
                log_id,
                GenerationStatus::Success,
                None,
                Some(report.report_id),
                Some((report_count, store_count)),
            )
            .await?;
            Ok(report)
        }
        Err(e) => {
            log::error!("Report generation failed: {e}");
            if let Err(log_err) = finish_log(
                db,
                log_id,
                GenerationStatus::Failed,
                Some(e.to_string()),
                None,
                None,
            )
            .await
            {
                log::warn!("Failed to record report generation failure: {log_err}");
            }
            Err(e)
        }
    }
}

async fn build_and_store(
    db: &Database,
    cache: &BaselineCache,
    completer: Option<&dyn Completer>,
    request: &ReportRequest,
    range: &DateRange,
) -> Result<(AiReport, i64, i64)> {
    let kpis = metrics::compute_kpis(db, cache, request.store_id.as_deref(), range).await?;
    if kpis.overall.report_count == 0 {
        return Err(Error::NoData(format!("the period {range}")));
    }

    let (content, generated_by) = match completer {
        Some(c) => match write_narrative(c, request.report_type, &kpis).await {
            Ok(content) => (content, c.model_name()),
            Err(e) => {
                log::warn!("LLM report failed, using rule-based narrative: {e}");
                (
                    rule_based_content(request.report_type, &kpis),
                    RULE_BASED.to_string(),
                )
            }
        },
        None => (
            rule_based_content(request.report_type, &kpis),
            RULE_BASED.to_string(),
        ),
    };

    let metrics_json = serde_json::json!({
        "overall": &kpis.overall,
        "store_breakdown": &kpis.stores,
        "proration": &kpis.proration,
    });
    let report_count = kpis.overall.report_count as i64;
    let store_count = kpis.stores.len() as i64;

    let report = insert_report(
        db,
        request.report_type,
        request.store_id.clone(),
        range,
        content,
        metrics_json,
        generated_by,
    )
    .await?;
    Ok((report, report_count, store_count))
}

async fn write_narrative(
    completer: &dyn Completer,
    report_type: ReportType,
    kpis: &SelectionKpis,
) -> Result<ReportContent> {
    let prompt = build_prompt(report_type, kpis);
    let text = completer.complete(&prompt).await?;
    let mut content = parse_content(&text)?;
    if content.title.trim().is_empty() {
        content.title = default_title(report_type);
    }
    Ok(content)
}

fn default_title(report_type: ReportType) -> String {
    match report_type {
        ReportType::Weekly => "Weekly performance report".to_string(),
        ReportType::Monthly => "Monthly performance report".to_string(),
    }
}

pub fn build_prompt(report_type: ReportType, kpis: &SelectionKpis) -> String {
    let k = &kpis.overall;
    let stores = kpis
        .stores
        .iter()
        .map(|s| {
            format!(
                "- {}: sales {:.0}, profit {:.0} (margin {:.1}%)",
                s.store_name, s.kpi.total_sales, s.kpi.operating_profit, s.kpi.profit_margin
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an expert in restaurant management. Analyze the figures below and write a detailed, practical {kind} report.

Period: {start} to {end}
Total sales: {sales:.0}
Total expenses: {expenses:.0} (of which prorated fixed costs {fixed:.0})
Operating profit: {profit:.0}
Profit margin: {margin:.1}%
Cost rate: {cost:.1}%
Labor rate: {labor:.1}%
FL cost rate: {prime:.1}%
Reported days: {days}
Customers: {customers} (average ticket {ticket:.0})

Store breakdown:
{stores}

Respond with ONLY a JSON object (no markdown, no code fences) in this exact format:
{{
  "title": "Report title",
  "summary": "Summary in 3-5 sentences",
  "analysis": {{
    "salesTrend": "Sales trend analysis",
    "profitability": "Profitability analysis",
    "costStructure": "Cost structure analysis",
    "storeComparison": "Store comparison"
  }},
  "keyInsights": ["insight 1", "insight 2", "insight 3"],
  "recommendations": ["recommendation 1", "recommendation 2", "recommendation 3"]
}}"#,
        kind = report_type.as_str(),
        start = kpis.range.start,
        end = kpis.range.end,
        sales = k.total_sales,
        expenses = k.total_expenses,
        fixed = k.prorated_fixed_cost,
        profit = k.operating_profit,
        margin = k.profit_margin,
        cost = k.cost_rate,
        labor = k.labor_rate,
        prime = k.prime_cost_rate,
        days = k.report_count,
        customers = k.total_customers,
        ticket = k.average_ticket,
    )
}

pub fn parse_content(text: &str) -> Result<ReportContent> {
    let json_str = extract_json_object(strip_code_fences(text.trim()))
        .ok_or_else(|| Error::Llm(format!("No JSON object in LLM response: {text}")))?;
    serde_json::from_str(json_str)
        .map_err(|e| Error::Llm(format!("Failed to parse LLM response: {e}\nResponse: {text}")))
}

/// Deterministic narrative built from the KPI thresholds.
pub fn rule_based_content(report_type: ReportType, kpis: &SelectionKpis) -> ReportContent {
    let k = &kpis.overall;
    let (margin, cost, labor) = (k.profit_margin, k.cost_rate, k.labor_rate);
    let multi = kpis.stores.len() > 1;

    let mut by_sales: Vec<&StoreKpi> = kpis.stores.iter().collect();
    by_sales.sort_by(|a, b| b.kpi.total_sales.total_cmp(&a.kpi.total_sales));
    let mut by_margin: Vec<&StoreKpi> = kpis.stores.iter().collect();
    by_margin.sort_by(|a, b| b.kpi.profit_margin.total_cmp(&a.kpi.profit_margin));

    let standing = if margin > 10.0 {
        "strong"
    } else if margin > 5.0 {
        "stable"
    } else {
        "in need of improvement"
    };
    let mut summary = format!(
        "Performance for {} to {} was {standing}. Total sales of {:.0} produced an operating profit of {:.0} (margin {margin:.1}%).",
        kpis.range.start, kpis.range.end, k.total_sales, k.operating_profit
    );
    if let (true, Some(top)) = (multi, by_sales.first()) {
        summary.push_str(&format!(" {} recorded the highest sales.", top.store_name));
    }

    let sales_trend = if multi {
        let list = by_sales
            .iter()
            .map(|s| format!("{} ({:.0})", s.store_name, s.kpi.total_sales))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Total sales for the period were {:.0}. By store: {list}.",
            k.total_sales
        )
    } else {
        format!(
            "Total sales for the period were {:.0} across {} reported days, an average of {:.0} per day.",
            k.total_sales, k.report_count, k.average_daily_sales
        )
    };

    let profitability = format!(
        "An operating margin of {margin:.1}% is {} the typical restaurant level and shows {} profitability. Gross margin was {:.1}%.",
        if margin > 8.0 { "above" } else { "around" },
        if margin > 10.0 {
            "excellent"
        } else if margin > 5.0 {
            "healthy"
        } else {
            "improvable"
        },
        rate(k.gross_profit, k.total_sales)
    );

    let cost_note = if cost > 35.0 {
        "The cost rate is on the high side; reviewing purchasing and cutting waste would help."
    } else if cost > 30.0 {
        "The cost rate is within the normal range."
    } else {
        "Purchasing costs are well controlled."
    };
    let labor_note = if labor > 30.0 {
        "Labor is high; consider tightening shift scheduling."
    } else if labor > 25.0 {
        "Labor is at a standard level."
    } else {
        "Labor is managed efficiently."
    };
    let cost_structure =
        format!("Cost rate was {cost:.1}% and labor rate {labor:.1}%. {cost_note} {labor_note}");

    let store_comparison = match (multi, by_margin.first(), by_margin.last()) {
        (true, Some(best), Some(worst)) => format!(
            "{} has the highest profit margin at {:.1}%. {} trails at {:.1}% and has the most room to improve.",
            best.store_name, best.kpi.profit_margin, worst.store_name, worst.kpi.profit_margin
        ),
        _ => "Single-store selection; no comparison available.".to_string(),
    };

    let key_insights = vec![
        if margin > 10.0 {
            "Profit margin is excellent and operations are running efficiently.".to_string()
        } else if margin > 5.0 {
            "Profit margin is healthy with room for further improvement.".to_string()
        } else {
            "Profit margin needs attention on both the cost and the sales side.".to_string()
        },
        if cost < 30.0 {
            "Purchasing is well managed and secures a good gross margin.".to_string()
        } else if cost < 35.0 {
            "The cost rate is standard; better purchasing could still improve it.".to_string()
        } else {
            "The cost rate is high; revisit suppliers and reduce waste.".to_string()
        },
        match by_sales.first() {
            Some(top) if multi => format!(
                "Practices at {} could be rolled out to the other stores.",
                top.store_name
            ),
            _ => "Continued small improvements should keep results moving up.".to_string(),
        },
    ];

    let recommendations = vec![
        if cost > 33.0 {
            "Negotiate supplier prices or purchase jointly across stores to cut the cost rate by 2-3 points.".to_string()
        } else {
            "Tighten inventory management to reduce waste further.".to_string()
        },
        if labor > 28.0 {
            "Rebalance staffing at peak times to cut the labor rate by 1-2 points.".to_string()
        } else {
            "Use sales history to forecast demand and plan shifts more precisely.".to_string()
        },
        if margin < 8.0 {
            "Review menu pricing and promote high-margin items to push the margin above 10%.".to_string()
        } else {
            "Build on current results with new menu items and service improvements.".to_string()
        },
    ];

    ReportContent {
        title: format!("{} ({})", default_title(report_type), kpis.range),
        summary,
        analysis: ReportAnalysis {
            sales_trend,
            profitability,
            cost_structure,
            store_comparison,
        },
        key_insights,
        recommendations,
    }
}

// ── Persistence ────────────────────────────────────────────────────

const REPORT_COLUMNS: &str = "report_id, report_type, store_id, period_start, period_end,
    title, summary, analysis, key_insights, recommendations, metrics,
    generated_by, prompt_version, generated_at";

async fn insert_report(
    db: &Database,
    report_type: ReportType,
    store_id: Option<String>,
    range: &DateRange,
    content: ReportContent,
    metrics_json: serde_json::Value,
    generated_by: String,
) -> Result<AiReport> {
    let analysis = serde_json::to_string(&content.analysis)?;
    let key_insights = serde_json::to_string(&content.key_insights)?;
    let recommendations = serde_json::to_string(&content.recommendations)?;
    let metrics_str = metrics_json.to_string();
    let start = range.start.format("%Y-%m-%d").to_string();
    let end = range.end.format("%Y-%m-%d").to_string();

    let report = db
        .writer()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO ai_reports
                 (report_type, store_id, period_start, period_end, title, summary, analysis,
                  key_insights, recommendations, metrics, generated_by, prompt_version, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, datetime('now'))",
                params![
                    report_type.as_str(),
                    store_id,
                    start,
                    end,
                    content.title,
                    content.summary,
                    analysis,
                    key_insights,
                    recommendations,
                    metrics_str,
                    generated_by,
                    PROMPT_VERSION,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM ai_reports WHERE report_id = ?1"),
                [id],
                report_from_row,
            )
        })
        .await?;
    Ok(report)
}

pub fn get_ai_report(conn: &Connection, report_id: i64) -> rusqlite::Result<Option<AiReport>> {
    conn.query_row(
        &format!("SELECT {REPORT_COLUMNS} FROM ai_reports WHERE report_id = ?1"),
        [report_id],
        report_from_row,
    )
    .optional()
}

/// Newest first.
pub fn list_ai_reports(
    conn: &Connection,
    store_id: Option<&str>,
    report_type: Option<ReportType>,
    limit: usize,
) -> rusqlite::Result<Vec<AiReport>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REPORT_COLUMNS} FROM ai_reports
         WHERE (?1 IS NULL OR store_id = ?1) AND (?2 IS NULL OR report_type = ?2)
         ORDER BY report_id DESC LIMIT ?3"
    ))?;
    let rows = stmt.query_map(
        params![store_id, report_type.map(|t| t.as_str()), limit as i64],
        report_from_row,
    )?;
    rows.collect()
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<AiReport> {
    let date_at = |idx: usize| -> rusqlite::Result<NaiveDate> {
        let s: String = row.get(idx)?;
        NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
    };
    let json_at = |idx: usize| -> rusqlite::Result<serde_json::Value> {
        let s: String = row.get(idx)?;
        serde_json::from_str(&s).map_err(|e| conversion_error(idx, e))
    };
    let type_str: String = row.get(1)?;

    Ok(AiReport {
        report_id: row.get(0)?,
        report_type: type_str.parse().map_err(|e| conversion_error(1, e))?,
        store_id: row.get(2)?,
        period_start: date_at(3)?,
        period_end: date_at(4)?,
        title: row.get(5)?,
        summary: row.get(6)?,
        analysis: serde_json::from_value(json_at(7)?).map_err(|e| conversion_error(7, e))?,
        key_insights: serde_json::from_value(json_at(8)?).map_err(|e| conversion_error(8, e))?,
        recommendations: serde_json::from_value(json_at(9)?)
            .map_err(|e| conversion_error(9, e))?,
        metrics: json_at(10)?,
        generated_by: row.get(11)?,
        prompt_version: row.get(12)?,
        generated_at: row.get(13)?,
    })
}

async fn start_log(db: &Database, report_type: ReportType, store_id: Option<&str>) -> Result<i64> {
    let store_id = store_id.map(str::to_string);
    let started_at = chrono::Utc::now().to_rfc3339();
    let id = db
        .writer()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO report_generation_logs (report_type, store_id, status, started_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    report_type.as_str(),
                    store_id,
                    GenerationStatus::InProgress.as_str(),
                    started_at
                ],
            )?;
            Ok::<i64, rusqlite::Error>(conn.last_insert_rowid())
        })
        .await?;
    Ok(id)
}

async fn finish_log(
    db: &Database,
    log_id: i64,
    status: GenerationStatus,
    error_message: Option<String>,
    report_id: Option<i64>,
    counts: Option<(i64, i64)>,
) -> Result<()> {
    let completed_at = chrono::Utc::now().to_rfc3339();
    db.writer()
        .call(move |conn| {
            conn.execute(
                "UPDATE report_generation_logs
                 SET status = ?2, completed_at = ?3, error_message = ?4, report_id = ?5,
                     report_count = ?6, store_count = ?7
                 WHERE log_id = ?1",
                params![
                    log_id,
                    status.as_str(),
                    completed_at,
                    error_message,
                    report_id,
                    counts.map(|c| c.0),
                    counts.map(|c| c.1),
                ],
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
    Ok(())
}

/// Newest first.
pub fn list_generation_logs(
    conn: &Connection,
    limit: usize,
) -> rusqlite::Result<Vec<ReportGenerationLog>> {
    let mut stmt = conn.prepare(
        "SELECT log_id, report_type, store_id, status, started_at, completed_at,
                error_message, report_id, report_count, store_count
         FROM report_generation_logs ORDER BY log_id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        Ok(ReportGenerationLog {
            log_id: row.get(0)?,
            report_type: row.get(1)?,
            store_id: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            error_message: row.get(6)?,
            report_id: row.get(7)?,
            report_count: row.get(8)?,
            store_count: row.get(9)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expense::{self, DailyReport, MonthlyExpenseBaseline};
    use crate::llm::testing::StubCompleter;
    use crate::storage::repository;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn monthly_request(store: Option<&str>) -> ReportRequest {
        ReportRequest {
            report_type: ReportType::Monthly,
            store_id: store.map(str::to_string),
            period_start: None,
            period_end: None,
        }
    }

    async fn seeded_db() -> Database {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                for day in 1..=20 {
                    for (store, sales) in [("s1", 100_000.0), ("s2", 60_000.0)] {
                        let mut r = DailyReport::new(store, d(2025, 4, day), sales);
                        r.customer_count = 40;
                        r.costs.food_cost = sales * 0.3;
                        r.costs.labor_cost_part_time = sales * 0.2;
                        repository::upsert_daily_report(conn, &r)?;
                    }
                }
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
        db
    }

    async fn logs(db: &Database) -> Vec<ReportGenerationLog> {
        db.reader()
            .call(|conn| list_generation_logs(conn, 10))
            .await
            .unwrap()
    }

    #[test]
    fn test_resolve_range() {
        let today = d(2025, 5, 14);
        let monthly = monthly_request(None);
        assert_eq!(
            monthly.resolve_range(today).unwrap(),
            DateRange::new(d(2025, 4, 1), d(2025, 4, 30)).unwrap()
        );

        let weekly = ReportRequest {
            report_type: ReportType::Weekly,
            ..monthly.clone()
        };
        assert_eq!(weekly.resolve_range(today).unwrap().start, d(2025, 5, 7));

        let half = ReportRequest {
            period_start: Some(d(2025, 1, 1)),
            ..monthly
        };
        assert_eq!(half.resolve_range(today).unwrap_err().status_code(), 400);
    }

    #[test]
    fn test_parse_content_strips_fences() {
        let text = "```json\n{\"title\": \"April\", \"summary\": \"Good\", \"analysis\": {\"salesTrend\": \"up\"}, \"keyInsights\": [\"a\"], \"recommendations\": []}\n```";
        let content = parse_content(text).unwrap();
        assert_eq!(content.title, "April");
        assert_eq!(content.analysis.sales_trend, "up");
        assert_eq!(content.analysis.profitability, "");
        assert_eq!(content.key_insights, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_generate_rule_based_report() {
        let db = seeded_db().await;
        let cache = BaselineCache::default();
        let mut b = MonthlyExpenseBaseline::new("s1", "2025-04".parse().unwrap());
        b.rent = 300_000.0;
        b.open_days = Some(30);
        expense::save_baseline(&db, &cache, b).await.unwrap();

        let report = generate_ai_report(&db, &cache, None, &monthly_request(None), d(2025, 5, 14))
            .await
            .unwrap();

        assert_eq!(report.generated_by, RULE_BASED);
        assert_eq!(report.period_start, d(2025, 4, 1));
        assert_eq!(report.key_insights.len(), 3);
        assert_eq!(report.recommendations.len(), 3);
        assert!(report.analysis.cost_structure.contains("Cost rate was 30.0%"));
        assert!(report.analysis.store_comparison.contains("s1"));
        // 300000 / 30 days * 20 reported days
        assert_eq!(report.metrics["overall"]["prorated_fixed_cost"], 200_000.0);
        assert_eq!(report.metrics["store_breakdown"].as_array().unwrap().len(), 2);

        let logs = logs(&db).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "success");
        assert_eq!(logs[0].report_id, Some(report.report_id));
        assert_eq!(logs[0].report_count, Some(40));
        assert_eq!(logs[0].store_count, Some(2));
    }

    #[tokio::test]
    async fn test_generate_with_llm() {
        let db = seeded_db().await;
        let stub = StubCompleter::replying(
            r#"{"title": "April review", "summary": "Solid month", "analysis": {"salesTrend": "Flat", "profitability": "Fine", "costStructure": "OK", "storeComparison": "s1 leads"}, "keyInsights": ["one"], "recommendations": ["two"]}"#,
        );
        let report = generate_ai_report(
            &db,
            &BaselineCache::default(),
            Some(&stub),
            &monthly_request(Some("s1")),
            d(2025, 5, 14),
        )
        .await
        .unwrap();

        assert_eq!(report.title, "April review");
        assert_eq!(report.generated_by, "stub-model");
        assert_eq!(report.store_id.as_deref(), Some("s1"));
        assert_eq!(report.prompt_version, PROMPT_VERSION);
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_template() {
        let db = seeded_db().await;
        for stub in [StubCompleter::failing(), StubCompleter::replying("{ nope")] {
            let report = generate_ai_report(
                &db,
                &BaselineCache::default(),
                Some(&stub),
                &monthly_request(None),
                d(2025, 5, 14),
            )
            .await
            .unwrap();
            assert_eq!(report.generated_by, RULE_BASED);
            assert!(report.title.starts_with("Monthly performance report"));
        }
    }

    #[tokio::test]
    async fn test_no_data_fails_and_logs() {
        let db = seeded_db().await;
        let err = generate_ai_report(
            &db,
            &BaselineCache::default(),
            None,
            &monthly_request(None),
            d(2025, 9, 14),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoData(_)));
        assert_eq!(err.status_code(), 400);

        let logs = logs(&db).await;
        assert_eq!(logs[0].status, "failed");
        assert!(logs[0].error_message.as_deref().unwrap().contains("No data"));
        assert!(logs[0].report_id.is_none());
    }

    #[tokio::test]
    async fn test_log_update_failure_keeps_generation_error() {
        let db = seeded_db().await;
        db.writer()
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER freeze_logs BEFORE UPDATE ON report_generation_logs
                     BEGIN SELECT RAISE(ABORT, 'logs are frozen'); END;",
                )
            })
            .await
            .unwrap();

        let err = generate_ai_report(
            &db,
            &BaselineCache::default(),
            None,
            &monthly_request(None),
            d(2025, 9, 14),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoData(_)), "got {err:?}");
        assert_eq!(logs(&db).await[0].status, "in_progress");
    }

    #[tokio::test]
    async fn test_reports_are_write_once() {
        let db = seeded_db().await;
        let report = generate_ai_report(
            &db,
            &BaselineCache::default(),
            None,
            &monthly_request(None),
            d(2025, 5, 14),
        )
        .await
        .unwrap();

        let id = report.report_id;
        let update = db
            .writer()
            .call(move |conn| {
                conn.execute(
                    "UPDATE ai_reports SET title = 'edited' WHERE report_id = ?1",
                    [id],
                )
            })
            .await;
        assert!(update.is_err());

        let (fetched, listed) = db
            .reader()
            .call(move |conn| {
                let fetched = get_ai_report(conn, id)?;
                let listed = list_ai_reports(conn, None, Some(ReportType::Monthly), 10)?;
                Ok::<_, rusqlite::Error>((fetched, listed))
            })
            .await
            .unwrap();
        assert_eq!(fetched.unwrap().title, report.title);
        assert_eq!(listed.len(), 1);
    }
}
