//! Closure-backed capability

use async_trait::async_trait;
use finflash_core::{Capability, CapabilityError, TaskContext};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

type BoxedFuture = Pin<Box<dyn Future<Output = Result<Value, CapabilityError>> + Send>>;
type Handler = Box<dyn Fn(Value, TaskContext) -> BoxedFuture + Send + Sync>;

/// Capability backed by an async closure
///
/// # Example
///
/// ```
/// use finflash_capabilities::FnCapability;
/// use serde_json::json;
///
/// let echo = FnCapability::new("echo", |input, _ctx| async move { Ok(json!({ "echo": input })) });
/// ```
pub struct FnCapability {
    name: String,
    handler: Handler,
}

impl FnCapability {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Box::new(move |input, ctx| Box::pin(handler(input, ctx))),
        }
    }

    /// Wrap a synchronous closure
    pub fn sync<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, &TaskContext) -> Result<Value, CapabilityError> + Send + Sync + 'static,
    {
        Self::new(name, move |input, ctx| {
            let result = handler(input, &ctx);
            async move { result }
        })
    }
}

#[async_trait]
impl Capability for FnCapability {
    async fn invoke(&self, input: Value, ctx: &TaskContext) -> Result<Value, CapabilityError> {
        (self.handler)(input, ctx.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
