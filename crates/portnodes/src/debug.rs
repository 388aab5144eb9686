use async_trait::async_trait;
use portcore::value::display_text;
use portcore::{Invocation, NodeError, NodeFunction, ParamType, Returned, Signature};
use serde_json::Value;

/// Logs a message and everything the node received as input
pub struct DebugLogFunction {
    signature: Signature,
}

impl DebugLogFunction {
    pub fn new() -> Self {
        Self {
            signature: Signature::new("debug.log")
                .with_description("Logs a message for debugging and passes it on")
                .with_category("debug")
                .with_param("message", ParamType::Any)
                .with_param("context", ParamType::Context),
        }
    }
}

impl Default for DebugLogFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeFunction for DebugLogFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        let message = match invocation.args().get("message") {
            None | Some(Value::Null) => "(no message)".to_string(),
            Some(value) => display_text(value),
        };

        let context = invocation.context()?;
        tracing::info!(node = %context.node_id(), name = ?context.node_name(), "DEBUG: {}", message);
        context.events().info(format!("DEBUG: {}", message));

        Ok(Returned::Value(Value::String(message)))
    }
}
