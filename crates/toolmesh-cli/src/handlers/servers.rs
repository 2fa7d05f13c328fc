//! `servers`: start everything and report per-server outcomes.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::presentation::{print_separator, truncate_string};

pub async fn execute(ctx: &CliContext, json: bool) -> Result<()> {
    let service = ctx.service();
    let initialized = service.initialize().await;

    let statuses = service.server_statuses().await;
    let failures = service.last_failures().await;

    if json {
        let report = serde_json::json!({
            "servers": statuses,
            "failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if statuses.is_empty() {
        println!("No servers configured.");
    } else {
        println!(
            "{:<24} {:<13} {:<10} {:>5}  Note",
            "Server", "Mode", "Status", "Tools"
        );
        print_separator(72);
        for summary in &statuses {
            let note = if summary.disabled {
                "disabled".to_string()
            } else {
                failures
                    .iter()
                    .find(|f| f.server == summary.name)
                    .map(|f| truncate_string(&format!("{}: {}", f.kind, f.reason), 60))
                    .unwrap_or_default()
            };
            println!(
                "{:<24} {:<13} {:<10} {:>5}  {}",
                truncate_string(&summary.name, 23),
                summary.mode.to_string(),
                summary.status.to_string(),
                summary.tool_count,
                note
            );
        }
    }

    service.cleanup().await;
    initialized.map_err(Into::into)
}
