use std::path::PathBuf;

use clap::{Parser, Subcommand};
use foodvalue::{
    AnomalyRequest, Completer, DailyReport, DateRange, ExportFormat, FoodValue, KpiSnapshot,
    MetricType, MonthlyExpenseBaseline, Period, ReportQuery, ReportRequest, ReportType, Store,
    YearMonth,
};

#[derive(Parser)]
#[command(name = "foodvalue", about = "Restaurant expense proration, KPI and anomaly CLI")]
struct Cli {
    /// Database path (default: ~/.foodvalue/foodvalue.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stores
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
    /// Record, import and export daily reports
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },
    /// Manage monthly expense baselines
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },
    /// Compute KPIs for a store (or all stores) over a period
    Kpi {
        /// Store ID (omit for all stores)
        #[arg(long)]
        store: Option<String>,
        /// Period (e.g. 2025-03, 2025-Q1, 30d, mtd, 2025-03-01..2025-03-15)
        #[arg(long, default_value = "mtd")]
        period: String,
        /// Compare against the preceding period of equal length
        #[arg(long)]
        growth: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Per-store, per-month totals with baselines applied
    Rollup {
        #[arg(long)]
        store: Option<String>,
        #[arg(long, default_value = "ytd")]
        period: String,
        #[arg(long)]
        json: bool,
    },
    /// Check one day's metric against the store's recent history
    Anomaly {
        /// Store ID
        store: String,
        /// Target date (YYYY-MM-DD)
        date: String,
        /// Metric: sales, customer_count, cost_ratio, labor_ratio, fl_cost
        #[arg(long, default_value = "sales")]
        metric: String,
        /// Skip the LLM and use the z-score thresholds only
        #[arg(long)]
        no_llm: bool,
        #[arg(long)]
        json: bool,
    },
    /// Generate and browse AI analysis reports
    AiReport {
        #[command(subcommand)]
        action: AiReportAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show warehouse status
    Status,
}

#[derive(Subcommand)]
enum StoreAction {
    /// Add or update a store
    Add {
        store_id: String,
        name: String,
        #[arg(long)]
        address: Option<String>,
        /// Mark the store inactive
        #[arg(long)]
        inactive: bool,
    },
    /// List stores
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ReportAction {
    /// Record one day's figures (replaces any existing report for that day)
    Add {
        store_id: String,
        /// Date (YYYY-MM-DD)
        date: String,
        sales: f64,
        #[arg(long, default_value = "0")]
        customers: u32,
        #[arg(long, default_value = "0")]
        food_cost: f64,
        #[arg(long, default_value = "0")]
        beverage_cost: f64,
        #[arg(long, default_value = "0")]
        labor_employee: f64,
        #[arg(long, default_value = "0")]
        labor_part_time: f64,
        #[arg(long)]
        note: Option<String>,
    },
    /// Import daily reports from a CSV file
    Import {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Export daily reports
    Export {
        #[arg(long)]
        store: Option<String>,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        /// csv or json
        #[arg(long, default_value = "csv")]
        format: String,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List daily reports, newest first
    List {
        #[arg(long)]
        store: Option<String>,
        #[arg(long, default_value = "30")]
        limit: u32,
        #[arg(long)]
        json: bool,
    },
    /// Delete one day's report
    Delete { store_id: String, date: String },
}

#[derive(Subcommand)]
enum BaselineAction {
    /// Set a store's fixed costs for a month
    Set {
        store_id: String,
        /// Month (YYYY-MM)
        month: String,
        #[arg(long, default_value = "0")]
        rent: f64,
        #[arg(long, default_value = "0")]
        utilities: f64,
        #[arg(long, default_value = "0")]
        labor_employee: f64,
        #[arg(long, default_value = "0")]
        labor_part_time: f64,
        #[arg(long, default_value = "0")]
        consumables: f64,
        #[arg(long, default_value = "0")]
        promotion: f64,
        #[arg(long, default_value = "0")]
        cleaning: f64,
        #[arg(long, default_value = "0")]
        misc: f64,
        #[arg(long, default_value = "0")]
        communication: f64,
        #[arg(long, default_value = "0")]
        others: f64,
        /// Trading days that month (default: calendar days)
        #[arg(long)]
        open_days: Option<u32>,
    },
    /// Show a baseline with its per-day reference
    Get {
        store_id: String,
        month: String,
        #[arg(long)]
        json: bool,
    },
    /// List baselines
    List {
        #[arg(long)]
        store: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Export baselines
    Export {
        #[arg(long)]
        store: Option<String>,
        #[arg(long, default_value = "csv")]
        format: String,
    },
    /// Import baselines from a CSV file
    Import { path: PathBuf },
    /// Delete a store's baseline for a month
    Delete { store_id: String, month: String },
}

#[derive(Subcommand)]
enum AiReportAction {
    /// Generate a weekly or monthly report
    Generate {
        /// weekly or monthly
        #[arg(default_value = "weekly")]
        report_type: String,
        #[arg(long)]
        store: Option<String>,
        /// Period start (YYYY-MM-DD); requires --end
        #[arg(long)]
        start: Option<String>,
        /// Period end (YYYY-MM-DD); requires --start
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        no_llm: bool,
        #[arg(long)]
        json: bool,
    },
    /// List stored reports
    List {
        #[arg(long)]
        store: Option<String>,
        #[arg(long, value_name = "TYPE")]
        r#type: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show one report
    Show {
        report_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Show recent generation attempts
    Logs {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

fn parse_day(s: &str) -> anyhow::Result<chrono::NaiveDate> {
    Ok(foodvalue::date_util::parse_date(s)?)
}

fn parse_month(s: Option<&str>) -> anyhow::Result<Option<YearMonth>> {
    Ok(s.map(str::parse::<YearMonth>).transpose()?)
}

fn parse_range(period: &str) -> anyhow::Result<DateRange> {
    Ok(Period::parse(period)?.date_range()?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build the configured LLM, falling back to rule-based output when it
/// cannot be created.
async fn completer(fv: &FoodValue, disabled: bool) -> Option<foodvalue::llm::AgentCompleter> {
    if disabled {
        return None;
    }
    match foodvalue::llm::create_agent(fv.db()).await {
        Ok(agent) => Some(agent),
        Err(e) => {
            log::warn!("LLM unavailable, using rule-based analysis: {e}");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => foodvalue::Database::open_at(path).await?,
        None => foodvalue::Database::open().await?,
    };
    let fv = FoodValue::from_config(db).await?;

    match cli.command {
        Commands::Status => print_status(&fv).await?,
        Commands::Config { action } => handle_config(&fv, action).await?,
        Commands::Store { action } => handle_store(&fv, action).await?,
        Commands::Report { action } => handle_report(&fv, action).await?,
        Commands::Baseline { action } => handle_baseline(&fv, action).await?,
        Commands::Kpi {
            store,
            period,
            growth,
            json,
        } => {
            let range = parse_range(&period)?;
            if growth {
                let (kpis, g) = fv.kpis_with_growth(store.as_deref(), &range).await?;
                if json {
                    print_json(&serde_json::json!({ "kpis": kpis, "growth": g }))?;
                } else {
                    print_kpis(&kpis);
                    println!("  Growth vs {}:", range.previous()?);
                    println!("    Sales:     {:+.1}%", g.sales_growth);
                    println!("    Profit:    {:+.1}%", g.profit_growth);
                    println!("    Customers: {:+.1}%", g.customer_growth);
                }
            } else {
                let kpis = fv.kpis(store.as_deref(), &range).await?;
                if json {
                    print_json(&kpis)?;
                } else {
                    print_kpis(&kpis);
                }
            }
        }
        Commands::Rollup {
            store,
            period,
            json,
        } => {
            let range = parse_range(&period)?;
            let rows = fv.monthly_rollup(store.as_deref(), &range).await?;
            if json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("No reports in {range}.");
            } else {
                println!(
                    "{:<12} {:<8} {:>5} {:>14} {:>14} {:>14} {:>8}",
                    "STORE", "MONTH", "DAYS", "SALES", "COST", "PROFIT", "MARGIN"
                );
                for r in rows {
                    println!(
                        "{:<12} {:<8} {:>5} {:>14.0} {:>14.0} {:>14.0} {:>7.1}%{}",
                        r.store_id,
                        r.month.to_key(),
                        r.report_days,
                        r.sales,
                        r.total_cost,
                        r.operating_profit,
                        r.profit_margin,
                        if r.baseline_applied { "" } else { " *" }
                    );
                }
            }
        }
        Commands::Anomaly {
            store,
            date,
            metric,
            no_llm,
            json,
        } => {
            let request = AnomalyRequest {
                store_id: store,
                target_date: parse_day(&date)?,
                metric_type: metric.parse::<MetricType>()?,
            };
            let agent = completer(&fv, no_llm).await;
            let agent_ref = agent.as_ref().map(|a| a as &dyn Completer);
            if json {
                let (_, response) = fv.handle_anomaly(&request, agent_ref).await;
                print_json(&response)?;
            } else {
                let r = fv.detect_anomaly(&request, agent_ref).await?;
                println!(
                    "{} {} on {}",
                    request.store_id,
                    request.metric_type.label(),
                    request.target_date
                );
                println!("  Anomaly:  {} ({})", r.is_anomaly, r.severity.as_str());
                println!("  Current:  {:.2}", r.current_value);
                println!("  Average:  {:.2} (std dev {:.2})", r.average_value, r.std_deviation);
                println!("  Z-score:  {:.2}", r.z_score);
                println!("  Message:  {}", r.message);
                println!("  Reason:   {}", r.reason);
            }
        }
        Commands::AiReport { action } => handle_ai_report(&fv, action).await?,
    }

    Ok(())
}

async fn print_status(fv: &FoodValue) -> anyhow::Result<()> {
    let s = fv.status().await?;
    println!("Warehouse Status");
    println!("  Stores:     {}", s.stores);
    println!("  Reports:    {}", s.daily_reports);
    println!("  Baselines:  {}", s.baselines);
    println!("  AI reports: {}", s.ai_reports);
    match (s.first_report_date, s.last_report_date) {
        (Some(first), Some(last)) => println!("  Coverage:   {first} to {last}"),
        _ => println!("  Coverage:   none"),
    }
    Ok(())
}

async fn handle_config(fv: &FoodValue, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match fv.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            fv.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = fv.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

async fn handle_store(fv: &FoodValue, action: StoreAction) -> anyhow::Result<()> {
    match action {
        StoreAction::Add {
            store_id,
            name,
            address,
            inactive,
        } => {
            fv.add_store(Store {
                store_id: store_id.clone(),
                name,
                address,
                is_active: !inactive,
            })
            .await?;
            println!("Saved store {store_id}.");
        }
        StoreAction::List { json } => {
            let stores = fv.list_stores().await?;
            if json {
                print_json(&stores)?;
            } else if stores.is_empty() {
                println!("No stores.");
            } else {
                for s in stores {
                    let flag = if s.is_active { "" } else { " (inactive)" };
                    println!("{:<12} {}{flag}", s.store_id, s.name);
                }
            }
        }
    }
    Ok(())
}

async fn handle_report(fv: &FoodValue, action: ReportAction) -> anyhow::Result<()> {
    match action {
        ReportAction::Add {
            store_id,
            date,
            sales,
            customers,
            food_cost,
            beverage_cost,
            labor_employee,
            labor_part_time,
            note,
        } => {
            let mut report = DailyReport::new(&store_id, parse_day(&date)?, sales);
            report.customer_count = customers;
            report.costs.food_cost = food_cost;
            report.costs.beverage_cost = beverage_cost;
            report.costs.labor_cost_employee = labor_employee;
            report.costs.labor_cost_part_time = labor_part_time;
            report.note = note;
            fv.save_report(report).await?;
            println!("Saved report for {store_id} on {date}.");
        }
        ReportAction::Import { path, json } => {
            let summary = fv.import_reports_csv(&path).await?;
            if json {
                print_json(&summary)?;
            } else {
                println!("Imported: {}", summary.imported);
                println!("Failed:   {}", summary.failed);
                for e in &summary.errors {
                    println!("  line {}: {}", e.line, e.message);
                }
            }
        }
        ReportAction::Export {
            store,
            from,
            to,
            format,
            output,
        } => {
            let mut query = ReportQuery::new();
            if let Some(s) = &store {
                query = query.store(s);
            }
            if let Some(f) = &from {
                query = query.from_date(parse_day(f)?);
            }
            if let Some(t) = &to {
                query = query.to_date(parse_day(t)?);
            }
            let text = fv
                .export_reports(query, format.parse::<ExportFormat>()?)
                .await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    eprintln!("Wrote {}", path.display());
                }
                None => print!("{text}"),
            }
        }
        ReportAction::List { store, limit, json } => {
            let mut query = ReportQuery::new().limit(limit).descending();
            if let Some(s) = &store {
                query = query.store(s);
            }
            let reports = query.reports(fv.db()).await?;
            if json {
                print_json(&reports)?;
            } else if reports.is_empty() {
                println!("No reports.");
            } else {
                println!(
                    "{:<12} {:<10} {:>12} {:>6} {:>12} {:>12}",
                    "STORE", "DATE", "SALES", "CUST", "PURCHASE", "LABOR"
                );
                for r in reports {
                    println!(
                        "{:<12} {:<10} {:>12.0} {:>6} {:>12.0} {:>12.0}",
                        r.store_id,
                        r.date,
                        r.sales,
                        r.customer_count,
                        r.costs.purchase(),
                        r.costs.labor()
                    );
                }
            }
        }
        ReportAction::Delete { store_id, date } => {
            if fv.delete_report(&store_id, parse_day(&date)?).await? {
                println!("Deleted.");
            } else {
                println!("No report for {store_id} on {date}.");
            }
        }
    }
    Ok(())
}

async fn handle_baseline(fv: &FoodValue, action: BaselineAction) -> anyhow::Result<()> {
    match action {
        BaselineAction::Set {
            store_id,
            month,
            rent,
            utilities,
            labor_employee,
            labor_part_time,
            consumables,
            promotion,
            cleaning,
            misc,
            communication,
            others,
            open_days,
        } => {
            let month: YearMonth = month.parse()?;
            let baseline = MonthlyExpenseBaseline {
                store_id: store_id.clone(),
                month,
                rent,
                utilities,
                labor_cost_employee: labor_employee,
                labor_cost_part_time: labor_part_time,
                consumables,
                promotion,
                cleaning,
                misc,
                communication,
                others,
                open_days,
            };
            let total = baseline.monthly_total();
            fv.set_baseline(baseline).await?;
            println!("Saved baseline for {store_id} {} ({total:.0}/month).", month.to_key());
        }
        BaselineAction::Get {
            store_id,
            month,
            json,
        } => {
            let month: YearMonth = month.parse()?;
            let Some(baseline) = fv.get_baseline(&store_id, month).await? else {
                println!("No baseline for {store_id} {}.", month.to_key());
                return Ok(());
            };
            let daily = baseline.daily_reference();
            let monthly = baseline.monthly_reference();
            if json {
                print_json(&serde_json::json!({
                    "baseline": baseline,
                    "daily": daily,
                    "monthly": monthly,
                }))?;
            } else {
                println!("Baseline {store_id} {}", month.to_key());
                println!("  Open days:      {}", baseline.effective_open_days());
                println!("  {:<14} {:>12} {:>12}", "", "MONTH", "DAY");
                let rows = [
                    ("Labor", monthly.labor_cost, daily.labor_cost),
                    ("Rent", monthly.rent, daily.rent),
                    ("Utilities", monthly.utilities, daily.utilities),
                    ("Other", monthly.sum_other, daily.sum_other),
                    ("Total", monthly.total_expense, daily.total_expense),
                ];
                for (label, m, d) in rows {
                    println!("  {label:<14} {m:>12.0} {d:>12.0}");
                }
            }
        }
        BaselineAction::List {
            store,
            from,
            to,
            json,
        } => {
            let baselines = fv
                .list_baselines(
                    store.as_deref(),
                    parse_month(from.as_deref())?,
                    parse_month(to.as_deref())?,
                )
                .await?;
            if json {
                print_json(&baselines)?;
            } else if baselines.is_empty() {
                println!("No baselines.");
            } else {
                for b in baselines {
                    println!(
                        "{:<12} {} {:>12.0} ({} days)",
                        b.store_id,
                        b.month.to_key(),
                        b.monthly_total(),
                        b.effective_open_days()
                    );
                }
            }
        }
        BaselineAction::Export { store, format } => {
            let text = fv
                .export_baselines(store.as_deref(), None, None, format.parse()?)
                .await?;
            print!("{text}");
        }
        BaselineAction::Delete { store_id, month } => {
            let month: YearMonth = month.parse()?;
            if fv.delete_baseline(&store_id, month).await? {
                println!("Deleted.");
            } else {
                println!("No baseline for {store_id} {}.", month.to_key());
            }
        }
        BaselineAction::Import { path } => {
            let summary = fv.import_baselines_csv(&path).await?;
            println!("Imported: {}", summary.imported);
            println!("Failed:   {}", summary.failed);
            for e in &summary.errors {
                println!("  line {}: {}", e.line, e.message);
            }
        }
    }
    Ok(())
}

async fn handle_ai_report(fv: &FoodValue, action: AiReportAction) -> anyhow::Result<()> {
    match action {
        AiReportAction::Generate {
            report_type,
            store,
            start,
            end,
            no_llm,
            json,
        } => {
            let request = ReportRequest {
                report_type: report_type.parse()?,
                store_id: store,
                period_start: start.as_deref().map(parse_day).transpose()?,
                period_end: end.as_deref().map(parse_day).transpose()?,
            };
            let agent = completer(fv, no_llm).await;
            let agent_ref = agent.as_ref().map(|a| a as &dyn Completer);
            let today = chrono::Local::now().date_naive();
            if json {
                let (_, response) = fv.handle_report(&request, agent_ref, today).await;
                print_json(&response)?;
            } else {
                let report = fv.generate_report(&request, agent_ref, today).await?;
                print_ai_report(&report);
            }
        }
        AiReportAction::List {
            store,
            r#type,
            limit,
        } => {
            let report_type = r#type.as_deref().map(str::parse::<ReportType>).transpose()?;
            let reports = fv
                .list_ai_reports(store.as_deref(), report_type, limit)
                .await?;
            if reports.is_empty() {
                println!("No AI reports.");
            }
            for r in reports {
                println!(
                    "#{:<5} {:<8} {:<12} {} to {}  {}",
                    r.report_id,
                    r.report_type.as_str(),
                    r.store_id.as_deref().unwrap_or("all"),
                    r.period_start,
                    r.period_end,
                    r.title
                );
            }
        }
        AiReportAction::Show { report_id, json } => {
            let report = fv.get_ai_report(report_id).await?;
            if json {
                print_json(&report)?;
            } else {
                print_ai_report(&report);
            }
        }
        AiReportAction::Logs { limit } => {
            for log in fv.list_generation_logs(limit).await? {
                println!(
                    "#{:<5} {:<8} {:<12} {:<12} {}{}",
                    log.log_id,
                    log.report_type,
                    log.store_id.as_deref().unwrap_or("all"),
                    log.status,
                    log.started_at,
                    log.error_message
                        .map(|e| format!("  {e}"))
                        .unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn print_kpis(kpis: &foodvalue::SelectionKpis) {
    println!(
        "KPIs: {} ({})",
        kpis.store_id.as_deref().unwrap_or("all stores"),
        kpis.range
    );
    print_snapshot(&kpis.overall);
    if kpis.stores.len() > 1 {
        for s in &kpis.stores {
            println!("  {} ({}):", s.store_name, s.store_id);
            println!(
                "    Sales {:.0}, profit {:.0} ({:.1}%)",
                s.kpi.total_sales, s.kpi.operating_profit, s.kpi.profit_margin
            );
        }
    }
}

fn print_snapshot(k: &KpiSnapshot) {
    println!("  Reports:        {}", k.report_count);
    println!("  Sales:          {:.0}", k.total_sales);
    println!("  Avg daily:      {:.0}", k.average_daily_sales);
    println!("  Customers:      {} (avg ticket {:.0})", k.total_customers, k.average_ticket);
    println!("  Purchase:       {:.0} ({:.1}%)", k.purchase_total, k.cost_rate);
    println!("  Labor:          {:.0} ({:.1}%)", k.labor_total, k.labor_rate);
    println!("  Prime cost:     {:.0} ({:.1}%)", k.prime_cost, k.prime_cost_rate);
    println!("  Fixed (prorated): {:.0}", k.prorated_fixed_cost);
    println!("  Gross profit:   {:.0}", k.gross_profit);
    println!("  Operating profit: {:.0} ({:.1}%)", k.operating_profit, k.profit_margin);
}

fn print_ai_report(r: &foodvalue::AiReport) {
    println!("{}", r.title);
    println!(
        "  #{} {} {} to {} ({})",
        r.report_id,
        r.report_type.as_str(),
        r.period_start,
        r.period_end,
        r.generated_by
    );
    println!();
    println!("{}", r.summary);
    println!();
    println!("Sales trend:      {}", r.analysis.sales_trend);
    println!("Profitability:    {}", r.analysis.profitability);
    println!("Cost structure:   {}", r.analysis.cost_structure);
    println!("Store comparison: {}", r.analysis.store_comparison);
    if !r.key_insights.is_empty() {
        println!("\nKey insights:");
        for i in &r.key_insights {
            println!("  - {i}");
        }
    }
    if !r.recommendations.is_empty() {
        println!("\nRecommendations:");
        for rec in &r.recommendations {
            println!("  - {rec}");
        }
    }
}
