//! Daemon health command

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, HealthResponse, ReadinessResponse};
use crate::output::{color_status, print_heading, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct HealthSummary {
    health: HealthResponse,
    readiness: ReadinessResponse,
}

/// Show component health and readiness of the daemon
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (bool, HealthResponse) = client.probe("healthz").await?;
    let (_, readiness): (bool, ReadinessResponse) = client.probe("readyz").await?;

    match format {
        OutputFormat::Json => print_json(&HealthSummary { health, readiness })?,
        OutputFormat::Table => {
            print_heading("Scanner Health");
            println!("Overall:  {}", color_status(&health.status));
            let ready = if readiness.ready { "ready" } else { "not ready" };
            match &readiness.reason {
                Some(reason) => println!("Ready:    {} ({})", color_status(ready), reason),
                None => println!("Ready:    {}", color_status(ready)),
            }
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&component.status),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            print_table(rows, "No components registered");
        }
    }

    Ok(())
}
