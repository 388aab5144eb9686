use async_trait::async_trait;
use chrono::Utc;
use portcore::{Invocation, NodeError, NodeFunction, ParamType, Returned, Signature};
use tokio::time::{sleep, Duration};

/// Current UTC time, exposed through its calendar members
pub struct NowFunction {
    signature: Signature,
}

impl NowFunction {
    pub fn new() -> Self {
        Self {
            signature: Signature::new("time.now")
                .with_description("Current UTC date and time")
                .with_category("time"),
        }
    }
}

impl Default for NowFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeFunction for NowFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, _invocation: Invocation) -> Result<Returned, NodeError> {
        Ok(Returned::Temporal(Utc::now()))
    }
}

/// Delay execution for a specified duration
pub struct DelayFunction {
    signature: Signature,
}

impl DelayFunction {
    pub fn new() -> Self {
        Self {
            signature: Signature::new("time.delay")
                .with_description("Delay execution for specified milliseconds")
                .with_category("time")
                .with_param("delay_ms", ParamType::Integer)
                .with_param("context", ParamType::Context),
        }
    }
}

impl Default for DelayFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeFunction for DelayFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        let delay_ms = invocation.args().i64("delay_ms")?;
        let delay_ms = u64::try_from(delay_ms).map_err(|_| NodeError::InvalidArgumentType {
            field: "delay_ms".to_string(),
            expected: "non-negative integer".to_string(),
            actual: delay_ms.to_string(),
        })?;

        invocation.context()?.events().info(format!("Delaying for {}ms", delay_ms));
        sleep(Duration::from_millis(delay_ms)).await;

        Ok(Returned::from(delay_ms as i64))
    }
}
