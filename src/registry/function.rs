//! Callable handles stored in the registries.
//!
//! A service function takes keyword arguments (a JSON object) and returns a
//! JSON value. Synchronous functions run inline on the caller's thread.
//! Asynchronous ones are driven to completion on a single-shot current-thread
//! scheduler built per call, which blocks the calling thread for the duration
//! of the future. Every ZeroMQ function owns its thread, so that is fine.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::types::{Error, Result};

/// Keyword arguments passed to a service function.
pub type Kwargs = Map<String, Value>;

type SyncFn = dyn Fn(Kwargs) -> Result<Value> + Send + Sync;
type AsyncFn = dyn Fn(Kwargs) -> BoxFuture<'static, Result<Value>> + Send + Sync;

#[derive(Clone)]
enum Callable {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

/// Owned, cheaply clonable handle to a user function.
#[derive(Clone)]
pub struct ServiceFunction {
    callable: Callable,
}

impl fmt::Debug for ServiceFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_async() { "async" } else { "sync" };
        f.debug_struct("ServiceFunction").field("kind", &kind).finish()
    }
}

impl ServiceFunction {
    /// Wrap a synchronous function over raw keyword arguments.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Kwargs) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            callable: Callable::Sync(Arc::new(f)),
        }
    }

    /// Wrap an asynchronous function over raw keyword arguments.
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            callable: Callable::Async(Arc::new(move |args| Box::pin(f(args)))),
        }
    }

    /// Wrap a typed synchronous function.
    ///
    /// Keyword arguments are decoded into `A` with serde; a mismatch (missing
    /// or mistyped argument) surfaces as a handler error, never a panic.
    pub fn typed<A, R, F>(f: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Result<R> + Send + Sync + 'static,
    {
        Self::sync(move |args| {
            let decoded: A = serde_json::from_value(Value::Object(args))
                .map_err(|e| Error::handler(format!("invalid arguments: {}", e)))?;
            let output = f(decoded)?;
            Ok(serde_json::to_value(output)?)
        })
    }

    /// Wrap a typed asynchronous function.
    pub fn typed_async<A, R, F, Fut>(f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::asynchronous(move |args| {
            let f = Arc::clone(&f);
            async move {
                let decoded: A = serde_json::from_value(Value::Object(args))
                    .map_err(|e| Error::handler(format!("invalid arguments: {}", e)))?;
                let output = f(decoded).await?;
                Ok(serde_json::to_value(output)?)
            }
        })
    }

    pub fn is_async(&self) -> bool {
        matches!(self.callable, Callable::Async(_))
    }

    /// Invoke the function, blocking until it completes.
    ///
    /// Panics inside the function are caught and reported as handler errors.
    pub fn invoke(&self, args: Kwargs) -> Result<Value> {
        let outcome = catch_unwind(AssertUnwindSafe(|| match &self.callable {
            Callable::Sync(f) => f(args),
            Callable::Async(f) => block_on(f(args)),
        }));
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(Error::handler(panic_message(payload.as_ref()))),
        }
    }
}

/// Run one future on a fresh current-thread scheduler.
fn block_on(fut: BoxFuture<'static, Result<Value>>) -> Result<Value> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(fut)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "function panicked".to_string()
    }
}
