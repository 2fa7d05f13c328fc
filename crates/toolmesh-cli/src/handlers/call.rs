//! `call`: invoke one tool through its validating proxy.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use toolmesh_mcp::GetToolsOptions;

use crate::bootstrap::CliContext;

/// Parse `--args`; absent means an empty object.
pub fn parse_args(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(serde_json::Map::new()));
    };
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

pub async fn execute(ctx: &CliContext, server: &str, tool: &str, args: Option<&str>) -> Result<()> {
    let args = parse_args(args)?;
    let service = ctx.service();

    let tools = match service.get_tools(GetToolsOptions::for_server(server)).await {
        Ok(tools) => tools,
        Err(e) => {
            service.cleanup().await;
            return Err(e.into());
        }
    };

    let Some(proxy) = tools.get(tool) else {
        service.cleanup().await;
        bail!("Server '{server}' has no tool named '{tool}'");
    };

    let result = proxy.invoke(args).await;
    service.cleanup().await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.is_error() {
        bail!("Tool '{tool}' reported an error");
    }
    Ok(())
}
