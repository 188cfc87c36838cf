use serde::Deserialize;

use crate::anomaly::{AnomalyRequest, AnomalyStats, Severity};
use crate::date_util::{extract_json_object, strip_code_fences};
use crate::error::{Error, Result};
use crate::llm::Completer;

/// Verdict as phrased by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LlmVerdict {
    pub is_anomaly: bool,
    pub severity: Severity,
    pub message: String,
    pub reason: String,
}

pub fn build_prompt(request: &AnomalyRequest, stats: &AnomalyStats) -> String {
    let metric = request.metric_type;
    let unit = metric.unit();
    let recent = stats
        .recent
        .iter()
        .map(|(date, v)| format!("- {date}: {v:.2}{unit}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a data analyst for a restaurant chain. Your job is to spot unusual values in a store's daily figures and tell the store manager about them in plain, friendly language. Flag real problems clearly without causing needless alarm.

Judge the value against the history below:
1. Compare today's value with the historical statistics.
2. Decide whether it is anomalous.
3. Rate the severity as low, medium or high.
4. Suggest likely causes.

Thresholds:
- z-score > 3.5: serious anomaly (high)
- z-score > 2.5: needs attention (medium)
- z-score > 2.0: minor anomaly (low)
- otherwise: normal

Keep in mind that data-entry mistakes are common, that extreme highs and lows deserve suspicion, that typical industry levels are a cost ratio of 30-35% and a labor ratio of 25-30%, and that weekday and seasonal effects exist.

Metric: {label}
Date: {date}
Store: {store}

Today's value: {current:.2}{unit}

History ({count} days):
- mean: {mean:.2}{unit}
- standard deviation: {std:.2}{unit}
- min: {min:.2}{unit}
- max: {max:.2}{unit}
- median: {median:.2}{unit}
- z-score: {z:.2}

Most recent days:
{recent}

Respond with ONLY a JSON object (no markdown, no code fences) in this exact format:
{{
  "is_anomaly": true or false,
  "severity": "low|medium|high",
  "message": "Short message for the store manager",
  "reason": "Why you reached this verdict and likely causes"
}}"#,
        label = metric.label(),
        date = request.target_date,
        store = request.store_id,
        current = stats.current,
        count = stats.count,
        mean = stats.mean,
        std = stats.std_dev,
        min = stats.min,
        max = stats.max,
        median = stats.median,
        z = stats.z_score,
    )
}

/// Parse the first `{` to the last `}` of a model reply.
pub fn parse_verdict(text: &str) -> Result<LlmVerdict> {
    let json_str = extract_json_object(strip_code_fences(text.trim()))
        .ok_or_else(|| Error::Llm(format!("No JSON object in LLM response: {text}")))?;
    serde_json::from_str(json_str)
        .map_err(|e| Error::Llm(format!("Failed to parse LLM response: {e}\nResponse: {text}")))
}

pub async fn assess(
    completer: &dyn Completer,
    request: &AnomalyRequest,
    stats: &AnomalyStats,
) -> Result<LlmVerdict> {
    let prompt = build_prompt(request, stats);
    let text = completer.complete(&prompt).await?;
    parse_verdict(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::MetricType;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_verdict_with_surrounding_text() {
        let v = parse_verdict(
            "Sure!\n```json\n{\"is_anomaly\": false, \"severity\": \"low\", \"message\": \"ok\", \"reason\": \"normal\"}\n```",
        )
        .unwrap();
        assert!(!v.is_anomaly);
        assert_eq!(v.severity, Severity::Low);
        assert_eq!(v.reason, "normal");
    }

    #[test]
    fn test_parse_verdict_rejects_garbage() {
        assert!(matches!(parse_verdict("no braces here"), Err(Error::Llm(_))));
        assert!(matches!(
            parse_verdict(r#"{"is_anomaly": "maybe"}"#),
            Err(Error::Llm(_))
        ));
    }

    #[test]
    fn test_prompt_mentions_the_numbers() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let history: Vec<(NaiveDate, f64)> = (1..=8)
            .map(|i| (date - chrono::Duration::days(i), 30.0 + i as f64))
            .rev()
            .collect();
        let stats = AnomalyStats::compute(&history, 45.0);
        let request = AnomalyRequest {
            store_id: "s1".into(),
            target_date: date,
            metric_type: MetricType::CostRatio,
        };

        let prompt = build_prompt(&request, &stats);
        assert!(prompt.contains("Metric: Cost ratio"));
        assert!(prompt.contains("Today's value: 45.00%"));
        assert!(prompt.contains("History (8 days)"));
        assert!(prompt.contains("- 2025-05-31: 31.00%"));
    }
}
