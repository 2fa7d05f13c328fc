//! Local callable bound to one upstream tool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use toolmesh_core::{FailureKind, ProtocolClient, ToolCallResult, ToolDescriptor};

use super::validator::{Validator, compile};

/// Validates arguments locally, then forwards the call upstream.
///
/// `invoke` never fails: rejected arguments and upstream failures come back
/// as in-band error results.
#[derive(Clone)]
pub struct ToolProxy {
    server: String,
    descriptor: ToolDescriptor,
    validator: Validator,
    client: Arc<dyn ProtocolClient>,
    auto_approved: bool,
    call_timeout: Duration,
}

impl ToolProxy {
    pub fn new(
        server: impl Into<String>,
        descriptor: ToolDescriptor,
        client: Arc<dyn ProtocolClient>,
        auto_approved: bool,
        call_timeout: Duration,
    ) -> Self {
        let validator = compile(&descriptor.input_schema);
        Self {
            server: server.into(),
            descriptor,
            validator,
            client,
            auto_approved,
            call_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Server this tool belongs to.
    pub fn server(&self) -> &str {
        &self.server
    }

    pub const fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    pub const fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Whether the server config lets this tool run without confirmation.
    pub const fn is_auto_approved(&self) -> bool {
        self.auto_approved
    }

    /// Validate `args` and call the upstream tool.
    ///
    /// Missing arguments (`null`) are sent as an empty object.
    pub async fn invoke(&self, args: Value) -> ToolCallResult {
        let args = if args.is_null() {
            Value::Object(Map::new())
        } else {
            args
        };

        if let Err(e) = self.validator.validate(&args) {
            debug!(
                server = %self.server,
                tool = %self.descriptor.name,
                error = %e,
                "Rejected tool arguments"
            );
            return ToolCallResult::error(format!(
                "Invalid arguments for tool '{}': {e}",
                self.descriptor.name
            ));
        }

        match self
            .client
            .call_tool(&self.descriptor.name, args, self.call_timeout)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    server = %self.server,
                    tool = %self.descriptor.name,
                    kind = %FailureKind::Invocation,
                    error = %e,
                    "Tool call failed"
                );
                ToolCallResult::error(format!(
                    "Tool '{}' on server '{}' failed: {e}",
                    self.descriptor.name, self.server
                ))
            }
        }
    }
}

impl fmt::Debug for ToolProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolProxy")
            .field("server", &self.server)
            .field("tool", &self.descriptor.name)
            .field("auto_approved", &self.auto_approved)
            .finish_non_exhaustive()
    }
}
