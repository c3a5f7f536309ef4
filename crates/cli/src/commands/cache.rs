//! Cache administration commands

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, CacheStatus};
use crate::output::{
    color_status, format_age, print_heading, print_info, print_json, print_success, OutputFormat,
};

/// Show cache freshness for a tenant
pub async fn show_status(client: &ApiClient, tenant_id: &str, format: OutputFormat) -> Result<()> {
    let status: CacheStatus = client.get(&format!("api/v1/cache/{}", tenant_id)).await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => print_status(&status),
    }

    Ok(())
}

/// Drop a tenant's cached snapshot so the next scan runs fresh
pub async fn clear(client: &ApiClient, tenant_id: &str, format: OutputFormat) -> Result<()> {
    let status: CacheStatus = client
        .delete(&format!("api/v1/cache/{}", tenant_id))
        .await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => print_success(&format!("Cleared cached scan for {}", tenant_id)),
    }

    Ok(())
}

fn print_status(status: &CacheStatus) {
    print_heading("Scan Cache");
    println!("Tenant:   {}", status.tenant_id.cyan());
    println!("Class:    {}", status.resource_class);
    println!("TTL:      {}", format_age(status.ttl_secs));

    if !status.present {
        print_info("No cached scan; the next scan will query the backend");
        return;
    }

    let freshness = if status.fresh { "fresh" } else { "stale" };
    println!("State:    {}", color_status(freshness));
    if let Some(age) = status.age_secs {
        println!("Age:      {}", format_age(age));
    }
}
