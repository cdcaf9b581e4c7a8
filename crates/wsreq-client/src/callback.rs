//! The client callback contract.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CallbackError;

/// Answers the server's `callback` frames during one request.
#[async_trait]
pub trait RequestCallback: Send + Sync {
    /// Produce the answer for one callback payload.
    async fn call(&self, data: Value) -> Result<Value, CallbackError>;
}

/// Adapter returned by [`callback_fn`].
pub struct CallbackFn<F>(F);

/// Wrap an async function as a [`RequestCallback`].
pub fn callback_fn<F, Fut>(f: F) -> CallbackFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CallbackError>> + Send + 'static,
{
    CallbackFn(f)
}

#[async_trait]
impl<F, Fut> RequestCallback for CallbackFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CallbackError>> + Send + 'static,
{
    async fn call(&self, data: Value) -> Result<Value, CallbackError> {
        (self.0)(data).await
    }
}

/// Answers every callback with the same value.
#[derive(Clone, Debug)]
pub struct FixedAnswer(pub Value);

#[async_trait]
impl RequestCallback for FixedAnswer {
    async fn call(&self, _data: Value) -> Result<Value, CallbackError> {
        Ok(self.0.clone())
    }
}
