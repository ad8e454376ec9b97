//! Restart classification and remediation commands

use anyhow::{Context, Result};
use colored::Colorize;

use crate::client::{ApiClient, ClassifyRequest, RemediateRequest, RemediationOutcome, RestartVerdict};
use crate::output::{
    color_status, format_bytes, format_millis, print_info, print_json, print_success,
    print_warning, OutputFormat,
};

/// Validate and normalize RFC 3339 restart timestamps
pub fn parse_restarts(restarts: &[String]) -> Result<Vec<String>> {
    restarts
        .iter()
        .map(|ts| {
            chrono::DateTime::parse_from_rfc3339(ts)
                .map(|dt| dt.with_timezone(&chrono::Utc).to_rfc3339())
                .with_context(|| format!("Invalid restart timestamp '{}'", ts))
        })
        .collect()
}

/// Classify a restart series as out-of-memory or not
pub async fn classify(
    client: &ApiClient,
    pod: Option<String>,
    restarts: &[String],
    format: OutputFormat,
) -> Result<()> {
    let request = ClassifyRequest {
        pod,
        restarts: parse_restarts(restarts)?,
    };
    let verdict: RestartVerdict = client.post("api/v1/classify", &request).await?;

    match format {
        OutputFormat::Json => print_json(&verdict)?,
        OutputFormat::Table => {
            println!("{}", "Restart Classification".bold());
            println!("{}", "=".repeat(50));
            if let Some(pod) = &request.pod {
                println!("Pod:       {}", pod.cyan());
            }
            println!("Restarts:  {}", verdict.restart_count);
            match verdict.span_millis {
                Some(span) => println!("Span:      {}", format_millis(span.max(0) as u64)),
                None => println!("Span:      -"),
            }
            println!(
                "Rule:      at least {} restarts within {}s",
                verdict.min_restarts, verdict.window_secs
            );
            println!();

            if verdict.out_of_memory {
                println!("Verdict:   {}", color_status("out-of-memory").bold());
                print_info("Run `healctl remediate <pod>` to raise the memory limit");
            } else {
                println!("Verdict:   {}", "not out-of-memory".green());
            }
        }
    }

    Ok(())
}

/// Raise the deployment memory limit and wait for the rollout
pub async fn remediate(
    client: &ApiClient,
    pod: &str,
    factor: Option<i64>,
    format: OutputFormat,
) -> Result<()> {
    if let Some(f) = factor.filter(|f| *f < 1) {
        print_warning(&format!("Factor {} is below 1, the probe will use 2", f));
    }
    if format == OutputFormat::Table {
        print_info(&format!("Remediating after restarts of {}...", pod));
    }

    let request = RemediateRequest {
        pod: pod.to_string(),
        factor,
    };
    let outcome: RemediationOutcome = client.post("api/v1/remediate", &request).await?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Table => {
            print_success(&format!(
                "{}/{} is ready with a memory limit of {}",
                outcome.namespace,
                outcome.deployment,
                format_bytes(outcome.memory_limit_bytes)
            ));
            println!("Container:        {}", outcome.container);
            println!("Factor:           {}", outcome.factor);
            println!(
                "Limit:            {} bytes",
                outcome.memory_limit_bytes
            );
            println!("Update attempts:  {}", outcome.update_attempts);
            println!(
                "Rollout wait:     {}",
                format_millis(outcome.ready_wait_millis)
            );
        }
    }

    Ok(())
}
