//! Dispatch of `[name, ...args]` callback payloads to named functions.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::callback::RequestCallback;
use crate::error::CallbackError;

type NamedFn = Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, CallbackError>> + Send + Sync>;

/// A [`RequestCallback`] routing each payload to a function chosen by name.
///
/// The server sends `["confirm", "Delete 3 files?"]`; the function registered
/// as `confirm` receives `["Delete 3 files?"]`.
#[derive(Default)]
pub struct NamedCallbacks {
    callbacks: HashMap<String, NamedFn>,
}

impl NamedCallbacks {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async function under `name`, replacing any previous one.
    #[must_use]
    pub fn on<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CallbackError>> + Send + 'static,
    {
        let callback: NamedFn = Box::new(move |args: Vec<Value>| f(args).boxed());
        let _ = self.callbacks.insert(name.into(), callback);
        self
    }

    /// Register a synchronous function under `name`.
    #[must_use]
    pub fn on_sync<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, CallbackError> + Send + Sync + 'static,
    {
        self.on(name, move |args| futures::future::ready(f(args)))
    }

    /// Whether a function is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// Registered names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.callbacks.keys().map(String::as_str)
    }
}

/// Split `[name, ...args]` into its parts.
fn split_payload(data: Value) -> Result<(String, Vec<Value>), CallbackError> {
    let Value::Array(mut items) = data else {
        return Err(CallbackError::InvalidPayload(
            "expected an array of [name, ...args]".into(),
        ));
    };
    if items.is_empty() {
        return Err(CallbackError::InvalidPayload(
            "missing callback name".into(),
        ));
    }
    match items.remove(0) {
        Value::String(name) => Ok((name, items)),
        other => Err(CallbackError::InvalidPayload(format!(
            "callback name must be a string, got {other}"
        ))),
    }
}

#[async_trait]
impl RequestCallback for NamedCallbacks {
    async fn call(&self, data: Value) -> Result<Value, CallbackError> {
        let (name, args) = split_payload(data)?;
        let Some(callback) = self.callbacks.get(&name) else {
            return Err(CallbackError::UnknownCallback(name));
        };
        debug!(callback = %name, args = args.len(), "dispatching named callback");
        callback(args).await
    }
}
