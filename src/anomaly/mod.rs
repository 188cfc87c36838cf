use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expense::DailyReport;
use crate::llm::agents::anomaly as prompt;
use crate::llm::Completer;
use crate::query::period::{days_before, DateRange};
use crate::storage::{repository, Database};

pub const DEFAULT_WINDOW_DAYS: u32 = 90;
pub const DEFAULT_MIN_HISTORY: usize = 7;
/// Longest accepted `anomaly_window_days`.
pub const MAX_WINDOW_DAYS: u32 = 3_660;

/// Daily figure checked for anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Sales,
    CostRatio,
    LaborRatio,
    CustomerCount,
    FlCost,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Sales => "sales",
            MetricType::CostRatio => "cost_ratio",
            MetricType::LaborRatio => "labor_ratio",
            MetricType::CustomerCount => "customer_count",
            MetricType::FlCost => "fl_cost",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MetricType::Sales => "Sales",
            MetricType::CostRatio => "Cost ratio",
            MetricType::LaborRatio => "Labor ratio",
            MetricType::CustomerCount => "Customer count",
            MetricType::FlCost => "FL cost ratio",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricType::Sales => " yen",
            MetricType::CostRatio | MetricType::LaborRatio | MetricType::FlCost => "%",
            MetricType::CustomerCount => " customers",
        }
    }

    /// Value of this metric for one report. Ratios are 0 without sales.
    pub fn value(&self, report: &DailyReport) -> f64 {
        let sales = report.sales;
        let ratio = |part: f64| if sales > 0.0 { part / sales * 100.0 } else { 0.0 };
        match self {
            MetricType::Sales => sales,
            MetricType::CostRatio => ratio(report.costs.purchase()),
            MetricType::LaborRatio => ratio(report.costs.labor()),
            MetricType::CustomerCount => report.customer_count as f64,
            MetricType::FlCost => ratio(report.costs.prime_cost()),
        }
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sales" => Ok(MetricType::Sales),
            "cost_ratio" => Ok(MetricType::CostRatio),
            "labor_ratio" => Ok(MetricType::LaborRatio),
            "customer_count" => Ok(MetricType::CustomerCount),
            "fl_cost" => Ok(MetricType::FlCost),
            other => Err(Error::InvalidInput(format!(
                "unknown metric type: {other} (expected sales, cost_ratio, labor_ratio, customer_count or fl_cost)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictSource {
    #[serde(rename = "llm")]
    Llm,
    #[serde(rename = "rule-based")]
    RuleBased,
}

/// Population mean and standard deviation. Both 0 for an empty slice.
pub fn population_stats(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Absolute z-score; 0 when the history has no spread.
pub fn z_score(current: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev > 0.0 {
        ((current - mean) / std_dev).abs()
    } else {
        0.0
    }
}

/// Severity for a z-score, or `None` when it is within the normal range.
pub fn classify(z: f64) -> Option<Severity> {
    if z > 3.5 {
        Some(Severity::High)
    } else if z > 2.5 {
        Some(Severity::Medium)
    } else if z > 2.0 {
        Some(Severity::Low)
    } else {
        None
    }
}

/// Summary of the history window used for one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Upper median.
    pub median: f64,
    pub current: f64,
    pub z_score: f64,
    /// The most recent (up to seven) history values, oldest first.
    pub recent: Vec<(NaiveDate, f64)>,
}

impl AnomalyStats {
    /// `history` must be ordered by date.
    pub fn compute(history: &[(NaiveDate, f64)], current: f64) -> Self {
        let values: Vec<f64> = history.iter().map(|(_, v)| *v).collect();
        let (mean, std_dev) = population_stats(&values);

        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Self {
            count: values.len(),
            mean,
            std_dev,
            min: sorted.first().copied().unwrap_or(0.0),
            max: sorted.last().copied().unwrap_or(0.0),
            median: sorted.get(sorted.len() / 2).copied().unwrap_or(0.0),
            current,
            z_score: z_score(current, mean, std_dev),
            recent: history[history.len().saturating_sub(7)..].to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRequest {
    pub store_id: String,
    pub target_date: NaiveDate,
    pub metric_type: MetricType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    pub severity: Severity,
    pub message: String,
    pub reason: String,
    pub current_value: f64,
    pub average_value: f64,
    pub std_deviation: f64,
    pub z_score: f64,
    pub source: VerdictSource,
}

/// History window length and the minimum rows needed inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorSettings {
    pub window_days: u32,
    pub min_history: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            min_history: DEFAULT_MIN_HISTORY,
        }
    }
}

impl DetectorSettings {
    /// Reject windows outside `1..=MAX_WINDOW_DAYS` and a zero history minimum.
    pub fn validate(&self) -> Result<()> {
        if self.window_days == 0 || self.window_days > MAX_WINDOW_DAYS {
            return Err(Error::Config(format!(
                "anomaly_window_days must be between 1 and {MAX_WINDOW_DAYS}, got {}",
                self.window_days
            )));
        }
        if self.min_history == 0 {
            return Err(Error::Config("anomaly_min_history must be at least 1".into()));
        }
        Ok(())
    }

    /// The `window_days` days ending the day before `target`.
    pub fn history_range(&self, target: NaiveDate) -> Result<DateRange> {
        let bounds = days_before(target, 1).and_then(|end| {
            let start = days_before(end, self.window_days.max(1) as i64 - 1)?;
            Ok(DateRange { start, end })
        });
        bounds.map_err(|e| {
            Error::Config(format!(
                "history window of {} days before {target}: {e}",
                self.window_days
            ))
        })
    }
}

/// Deterministic verdict from the z-score thresholds alone.
pub fn rule_based_verdict(metric: MetricType, stats: &AnomalyStats) -> AnomalyResult {
    let severity = classify(stats.z_score);
    let (label, unit) = (metric.label(), metric.unit());
    let message = match severity {
        Some(Severity::High) => format!(
            "{label} is far outside its usual range: {:.1}{unit} today against an average of {:.1}{unit}. Please check for an input error.",
            stats.current, stats.mean
        ),
        Some(_) => format!(
            "{label} is noticeably higher or lower than usual today ({:.1}{unit}). Worth a quick check.",
            stats.current
        ),
        None => format!("{label} is within its normal range."),
    };

    AnomalyResult {
        is_anomaly: severity.is_some(),
        severity: severity.unwrap_or(Severity::Low),
        message,
        reason: format!(
            "Statistical analysis: mean {:.1}{unit}, standard deviation {:.1}{unit}, z-score {:.2}",
            stats.mean, stats.std_dev, stats.z_score
        ),
        current_value: stats.current,
        average_value: stats.mean,
        std_deviation: stats.std_dev,
        z_score: stats.z_score,
        source: VerdictSource::RuleBased,
    }
}

/// Check one store's metric on `target_date` against its trailing history.
///
/// With a completer the verdict is phrased by the model; if that call fails
/// or returns something unparseable, the rule-based verdict is used.
pub async fn detect_anomaly(
    db: &Database,
    completer: Option<&dyn Completer>,
    request: &AnomalyRequest,
    settings: DetectorSettings,
) -> Result<AnomalyResult> {
    let window = settings.history_range(request.target_date)?;
    let store_id = request.store_id.clone();
    let target = request.target_date;

    let (history, current) = db
        .reader()
        .call(move |conn| {
            let history = repository::list_daily_reports(conn, Some(&store_id), &window)?;
            let current = repository::get_daily_report(conn, &store_id, target)?;
            Ok::<_, rusqlite::Error>((history, current))
        })
        .await?;

    let current = current.ok_or_else(|| {
        Error::NotFound(format!(
            "daily report for store {} on {}",
            request.store_id, request.target_date
        ))
    })?;
    if history.len() < settings.min_history {
        return Err(Error::InsufficientData {
            required: settings.min_history,
            found: history.len(),
        });
    }

    let metric = request.metric_type;
    let series: Vec<(NaiveDate, f64)> = history.iter().map(|r| (r.date, metric.value(r))).collect();
    let stats = AnomalyStats::compute(&series, metric.value(&current));
    log::debug!(
        "{} {} on {}: value {:.2}, mean {:.2}, std {:.2}, z {:.2} over {} days",
        request.store_id,
        metric.as_str(),
        request.target_date,
        stats.current,
        stats.mean,
        stats.std_dev,
        stats.z_score,
        stats.count
    );

    let Some(completer) = completer else {
        return Ok(rule_based_verdict(metric, &stats));
    };

    match prompt::assess(completer, request, &stats).await {
        Ok(verdict) => Ok(AnomalyResult {
            is_anomaly: verdict.is_anomaly,
            severity: verdict.severity,
            message: verdict.message,
            reason: verdict.reason,
            current_value: stats.current,
            average_value: stats.mean,
            std_deviation: stats.std_dev,
            z_score: stats.z_score,
            source: VerdictSource::Llm,
        }),
        Err(e) => {
            log::warn!("LLM anomaly assessment failed, using rule-based verdict: {e}");
            Ok(rule_based_verdict(metric, &stats))
        }
    }
}
