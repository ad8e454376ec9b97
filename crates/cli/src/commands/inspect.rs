//! Read-only probe commands: addresses, memory and health

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{AddressGroup, ApiClient, HealthResponse, MemoryReading, ReadinessResponse};
use crate::output::{
    color_status, format_bytes, format_timestamp, print_json, print_warning, OutputFormat,
};

/// Row for the address table
#[derive(Tabled)]
struct AddressRow {
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Address")]
    address: String,
}

/// Row for the component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn address_rows(group: &AddressGroup) -> Vec<AddressRow> {
    group
        .addresses
        .iter()
        .flat_map(|(category, addresses)| {
            addresses.iter().map(move |address| AddressRow {
                category: category.clone(),
                address: address.clone(),
            })
        })
        .collect()
}

/// Show service and pod addresses of the watched workload
pub async fn show_addresses(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let group: AddressGroup = client.get("api/v1/addresses").await?;

    match format {
        OutputFormat::Json => print_json(&group)?,
        OutputFormat::Table => {
            println!("{}", "Workload Addresses".bold());
            println!("{}", "=".repeat(50));

            let rows = address_rows(&group);
            if rows.is_empty() {
                print_warning("No addresses found");
            } else {
                let table = tabled::Table::new(rows)
                    .with(tabled::settings::Style::rounded())
                    .to_string();
                println!("{}", table);
            }

            for (category, reason) in &group.unresolved {
                print_warning(&format!(
                    "{} {}: {}",
                    category,
                    color_status("unresolved"),
                    reason
                ));
            }
        }
    }

    Ok(())
}

/// Show current memory usage of a pod
pub async fn show_memory(client: &ApiClient, pod: &str, format: OutputFormat) -> Result<()> {
    let path = format!("api/v1/pods/{}/memory", pod);
    let reading: MemoryReading = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&reading)?,
        OutputFormat::Table => {
            println!("{}", "Pod Memory".bold());
            println!("{}", "=".repeat(50));
            println!("Pod:        {}", reading.pod_name.cyan());
            println!("Namespace:  {}", reading.namespace.cyan());
            println!("Container:  {}", reading.container);
            println!(
                "Usage:      {} ({} bytes)",
                format_bytes(reading.memory_usage_bytes).bold(),
                reading.memory_usage_bytes
            );
            if let Some(ts) = &reading.timestamp {
                println!("Sampled:    {}", format_timestamp(ts));
            }
            if let Some(window) = &reading.window {
                println!("Window:     {}", window);
            }
        }
    }

    Ok(())
}

/// Show probe health and readiness
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (_, HealthResponse) = client.get_with_status("healthz").await?;
    let (_, readiness): (_, ReadinessResponse) = client.get_with_status("readyz").await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "health": health,
            "readiness": readiness,
        }))?,
        OutputFormat::Table => {
            println!("{}", "Probe Health".bold());
            println!("{}", "=".repeat(50));
            println!("Status:  {}", color_status(&health.status));
            let ready = if readiness.ready { "ready" } else { "not ready" };
            println!("Ready:   {}", color_status(ready));
            if let Some(reason) = &readiness.reason {
                println!("Reason:  {}", reason);
            }
            println!();

            let mut rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    component: name.clone(),
                    status: color_status(&component.status),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            rows.sort_by(|a, b| a.component.cmp(&b.component));

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_address_rows_flatten_categories() {
        let group = AddressGroup {
            addresses: BTreeMap::from([
                (
                    "Pod IPs".to_string(),
                    vec!["10.244.0.2".to_string(), "10.244.0.3".to_string()],
                ),
                ("Service IPs".to_string(), vec!["10.96.0.10".to_string()]),
            ]),
            unresolved: BTreeMap::new(),
        };

        let rows = address_rows(&group);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].category, "Pod IPs");
        assert_eq!(rows[2].address, "10.96.0.10");
    }
}
