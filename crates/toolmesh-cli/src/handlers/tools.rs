//! `tools`: print the merged tool catalogue.

use anyhow::Result;
use toolmesh_mcp::GetToolsOptions;

use crate::bootstrap::CliContext;
use crate::presentation::{print_separator, truncate_string};

pub async fn execute(ctx: &CliContext, server: Option<String>, json: bool) -> Result<()> {
    let service = ctx.service();
    let result = service
        .get_tools(GetToolsOptions {
            server_name: server,
        })
        .await;

    let tools = match result {
        Ok(tools) => tools,
        Err(e) => {
            service.cleanup().await;
            return Err(e.into());
        }
    };

    if json {
        let descriptors: Vec<_> = tools
            .values()
            .map(|proxy| {
                serde_json::json!({
                    "server": proxy.server(),
                    "autoApproved": proxy.is_auto_approved(),
                    "tool": proxy.descriptor(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
    } else if tools.is_empty() {
        println!("No tools available.");
    } else {
        println!("Found {} tool(s):\n", tools.len());
        println!("{:<28} {:<20} Description", "Tool", "Server");
        print_separator(96);
        for (name, proxy) in &tools {
            let description = proxy.descriptor().description.as_deref().unwrap_or("--");
            println!(
                "{:<28} {:<20} {}",
                truncate_string(name, 27),
                truncate_string(proxy.server(), 19),
                truncate_string(description, 46)
            );
        }
    }

    service.cleanup().await;
    Ok(())
}
