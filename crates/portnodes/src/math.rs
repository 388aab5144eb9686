use async_trait::async_trait;
use portcore::value::number_value;
use portcore::{Invocation, NodeError, NodeFunction, ParamType, Returned, Signature};

/// Binary arithmetic over two float parameters `a` and `b`
pub struct ArithmeticFunction {
    signature: Signature,
    op: fn(f64, f64) -> f64,
}

impl ArithmeticFunction {
    fn new(key: &str, description: &str, op: fn(f64, f64) -> f64) -> Self {
        Self {
            signature: Signature::new(key)
                .with_description(description)
                .with_category("math")
                .with_param("a", ParamType::Float)
                .with_param("b", ParamType::Float),
            op,
        }
    }

    pub fn add() -> Self {
        Self::new("math.add", "Sum of a and b", |a, b| a + b)
    }

    pub fn subtract() -> Self {
        Self::new("math.subtract", "Difference a - b", |a, b| a - b)
    }

    pub fn multiply() -> Self {
        Self::new("math.multiply", "Product of a and b", |a, b| a * b)
    }
}

#[async_trait]
impl NodeFunction for ArithmeticFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        let args = invocation.args();
        let result = (self.op)(args.f64("a")?, args.f64("b")?);
        number_value(result)
            .map(Returned::Value)
            .ok_or_else(|| NodeError::ExecutionFailed(format!("{} produced a non-finite result", self.signature.key)))
    }
}

/// Division; a zero divisor fails the node
pub struct DivideFunction {
    signature: Signature,
}

impl DivideFunction {
    pub fn new() -> Self {
        Self {
            signature: Signature::new("math.divide")
                .with_description("Quotient a / b")
                .with_category("math")
                .with_param("a", ParamType::Float)
                .with_param("b", ParamType::Float),
        }
    }
}

impl Default for DivideFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeFunction for DivideFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        let args = invocation.args();
        let divisor = args.f64("b")?;
        if divisor == 0.0 {
            return Err(NodeError::ExecutionFailed("division by zero".to_string()));
        }
        number_value(args.f64("a")? / divisor)
            .map(Returned::Value)
            .ok_or_else(|| NodeError::ExecutionFailed("math.divide produced a non-finite result".to_string()))
    }
}
