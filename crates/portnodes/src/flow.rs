//! Control-flow functions. These declare output ports, so only the ports they
//! fire lead anywhere.

use async_trait::async_trait;
use portcore::value::is_truthy;
use portcore::{Invocation, NodeError, NodeFunction, ParamType, Returned, Signature};
use serde_json::{Map, Value};

pub const TRUE_PORT: &str = "true";
pub const FALSE_PORT: &str = "false";
pub const LOOP_PORT: &str = "loop";
pub const DONE_PORT: &str = "done";

/// Two-way branch on `condition`
pub struct IfFunction {
    signature: Signature,
}

impl IfFunction {
    pub fn new() -> Self {
        Self {
            signature: Signature::new("logic.if")
                .with_description("Fires `true` or `false` depending on the condition")
                .with_category("logic")
                .with_param("condition", ParamType::Any)
                .with_param("flow", ParamType::Flow)
                .with_ports([TRUE_PORT, FALSE_PORT]),
        }
    }
}

impl Default for IfFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeFunction for IfFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        let condition = invocation
            .args()
            .get("condition")
            .map(truthy_condition)
            .unwrap_or(false);

        let port = if condition { TRUE_PORT } else { FALSE_PORT };
        tracing::debug!(condition, port, "branching");
        invocation.flow()?.fire(port).await?;
        Ok(Returned::Value(Value::Bool(condition)))
    }
}

// "false" and "0" read as false when a template renders a condition as text.
fn truthy_condition(value: &Value) -> bool {
    match value {
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty() || s.eq_ignore_ascii_case("false") || s == "0")
        }
        other => is_truthy(other),
    }
}

/// Fires `loop` once per iteration, then `done`.
///
/// Targets run at most once per run, so every `loop` fire after the first
/// finds them memoized. Bodies that must observe each iteration should read
/// the published `iteration` value instead of relying on re-execution.
pub struct LoopFunction {
    signature: Signature,
}

impl LoopFunction {
    pub fn new() -> Self {
        Self {
            signature: Signature::new("flow.loop")
                .with_description("Fires `loop` count times, then `done`")
                .with_category("flow")
                .with_param("count", ParamType::Integer)
                .with_param("context", ParamType::Context)
                .with_param("flow", ParamType::Flow)
                .with_ports([LOOP_PORT, DONE_PORT]),
        }
    }
}

impl Default for LoopFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeFunction for LoopFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        let count = invocation.args().i64("count")?;
        if count < 0 {
            return Err(NodeError::InvalidArgumentType {
                field: "count".to_string(),
                expected: "non-negative integer".to_string(),
                actual: count.to_string(),
            });
        }

        let context = invocation.context()?;
        let flow = invocation.flow()?;
        for iteration in 0..count {
            context.publish("iteration", iteration)?;
            context.events().progress(
                (iteration + 1) as f64 * 100.0 / count as f64,
                Some(format!("iteration {}", iteration)),
            );
            flow.fire(LOOP_PORT).await?;
        }
        flow.fire(DONE_PORT).await?;

        let mut members = Map::new();
        members.insert("iterations".to_string(), Value::from(count));
        Ok(Returned::Record(members))
    }
}

/// Publishes `value` as workflow output `name`
pub struct WorkflowOutputFunction {
    signature: Signature,
}

impl WorkflowOutputFunction {
    pub fn new() -> Self {
        Self {
            signature: Signature::new("workflow.output")
                .with_description("Publishes a value under workflow.output.<name>")
                .with_category("flow")
                .with_param("name", ParamType::String)
                .with_param("value", ParamType::Any)
                .with_param("context", ParamType::Context),
        }
    }
}

impl Default for WorkflowOutputFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeFunction for WorkflowOutputFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        let name = invocation.args().str("name")?;
        if name.trim().is_empty() {
            return Err(NodeError::MissingArgument("name".to_string()));
        }
        let value = invocation.args().get("value").cloned().unwrap_or(Value::Null);

        invocation.context()?.publish_output(name, value.clone())?;
        tracing::debug!(output = name, "published workflow output");
        Ok(Returned::Value(value))
    }
}
