//! Scan commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ScanBody, ScanReport, TenantSummary};
use crate::output::{
    color_status, format_age, format_timestamp, print_heading, print_json, print_table,
    print_warning, OutputFormat,
};

/// Row for idle resources
#[derive(Tabled)]
struct IdleRow {
    #[tabled(rename = "Resource")]
    resource_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Reasons")]
    reasons: String,
}

/// Row for evaluated resources that are in use
#[derive(Tabled)]
struct BusyRow {
    #[tabled(rename = "Resource")]
    resource_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Low Signals")]
    signals: String,
    #[tabled(rename = "Evaluated")]
    evaluated_at: String,
}

/// Row for regions or resources that could not be evaluated
#[derive(Tabled)]
struct FailureRow {
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Resource")]
    resource_id: String,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Retryable")]
    retryable: String,
    #[tabled(rename = "Error")]
    error: String,
}

#[derive(Tabled)]
struct TenantRow {
    #[tabled(rename = "Tenant")]
    tenant_id: String,
    #[tabled(rename = "Last Scan State")]
    state: String,
}

/// Trigger a scan and print idle, busy and failed resources separately
pub async fn run_scan(
    client: &ApiClient,
    tenant_id: &str,
    window_days: Option<u32>,
    force_refresh: bool,
    show_busy: bool,
    format: OutputFormat,
) -> Result<()> {
    let body = ScanBody {
        tenant_id: tenant_id.to_string(),
        window_days,
        force_refresh,
    };
    let report: ScanReport = client.post("api/v1/scans", &body).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report, show_busy),
    }

    Ok(())
}

fn print_report(report: &ScanReport, show_busy: bool) {
    let (idle, busy): (Vec<_>, Vec<_>) = report.verdicts.iter().partition(|v| v.is_idle);

    print_heading("Idle Resource Scan");
    println!("Tenant:       {}", report.tenant_id.cyan());
    match (report.from_cache, report.cache_age_secs) {
        (true, Some(age)) => println!("Source:       cache ({} old)", format_age(age)),
        (true, None) => println!("Source:       cache"),
        (false, _) => println!("Source:       {}", "fresh scan".green()),
    }
    println!("Evaluated:    {}", report.success_count);
    println!("Idle:         {}", idle.len().to_string().yellow().bold());
    println!("Busy:         {}", busy.len());
    if report.failure_count > 0 {
        println!("Failed:       {}", report.failure_count.to_string().red());
    }
    println!();

    let idle_rows: Vec<IdleRow> = idle
        .iter()
        .map(|v| IdleRow {
            resource_id: v.resource_id.clone(),
            name: v.display_name.clone(),
            region: v.region.clone(),
            reasons: v.reasons.join("\n"),
        })
        .collect();
    println!("{}", "Idle resources".bold());
    print_table(idle_rows, "No idle resources found");

    if show_busy {
        println!();
        let busy_rows: Vec<BusyRow> = busy
            .iter()
            .map(|v| BusyRow {
                resource_id: v.resource_id.clone(),
                name: v.display_name.clone(),
                region: v.region.clone(),
                signals: if v.signals.is_empty() {
                    "-".to_string()
                } else {
                    v.signals.join("\n")
                },
                evaluated_at: format_timestamp(&v.evaluated_at),
            })
            .collect();
        println!("{}", "Busy resources".bold());
        print_table(busy_rows, "No busy resources");
    }

    if !report.failures.is_empty() {
        println!();
        print_warning(&format!(
            "{} region(s) or resource(s) could not be evaluated; coverage is incomplete",
            report.failure_count
        ));
        let failure_rows: Vec<FailureRow> = report
            .failures
            .iter()
            .map(|f| FailureRow {
                region: f.region.clone(),
                resource_id: f.resource_id.clone().unwrap_or_else(|| "-".to_string()),
                stage: f.stage.clone(),
                retryable: if f.retryable { "yes" } else { "no" }.to_string(),
                error: f.error.clone(),
            })
            .collect();
        print_table(failure_rows, "");
    }
}

/// List tenants known to the daemon
pub async fn list_tenants(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let tenants: Vec<TenantSummary> = client.get("api/v1/tenants").await?;

    match format {
        OutputFormat::Json => print_json(&tenants)?,
        OutputFormat::Table => {
            let rows: Vec<TenantRow> = tenants
                .iter()
                .map(|t| TenantRow {
                    tenant_id: t.tenant_id.clone(),
                    state: color_status(&t.state),
                })
                .collect();
            print_table(rows, "No tenants configured");
        }
    }

    Ok(())
}
