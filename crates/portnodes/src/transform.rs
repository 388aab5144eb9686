use async_trait::async_trait;
use portcore::{Invocation, NodeError, NodeFunction, ParamType, Returned, Signature};

/// Parse JSON string to a structured value
pub struct JsonParseFunction {
    signature: Signature,
}

impl JsonParseFunction {
    pub fn new() -> Self {
        Self {
            signature: Signature::new("transform.json_parse")
                .with_description("Parse JSON string")
                .with_category("transform")
                .with_param("json", ParamType::String),
        }
    }
}

impl Default for JsonParseFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeFunction for JsonParseFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        let input = invocation.args().str("json")?;
        let parsed: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        // Objects spread into output members, like any other record.
        Ok(match parsed {
            serde_json::Value::Object(members) => Returned::Record(members),
            other => Returned::Value(other),
        })
    }
}

/// Stringify a value to JSON
pub struct JsonStringifyFunction {
    signature: Signature,
}

impl JsonStringifyFunction {
    pub fn new() -> Self {
        Self {
            signature: Signature::new("transform.json_stringify")
                .with_description("Stringify value to JSON")
                .with_category("transform")
                .with_param("value", ParamType::Any),
        }
    }
}

impl Default for JsonStringifyFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeFunction for JsonStringifyFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        let value = invocation.args().require("value")?;
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(Returned::from(json))
    }
}
