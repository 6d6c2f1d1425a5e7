use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::closure::{Closure, ClosureError, ClosureProcess};

type BoxedHandler = Arc<
    dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, String>> + Send>>
        + Send
        + Sync,
>;

/// Process-wide table mapping closure identifiers to executable functions.
///
/// Registration happens at program start on both master and worker; the
/// table is frozen behind an `Arc` and immutable thereafter.
#[derive(Default)]
pub struct ClosureRegistry {
    handlers: HashMap<String, BoxedHandler>,
}

impl ClosureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` under `id` and return the typed handle used to
    /// build closures on the master side.
    ///
    /// The handler decodes the argument, invokes the function with panics
    /// caught at the boundary, and encodes the outcome. Errors and panics
    /// are logged on the executing side and travel back as the `Err`
    /// branch.
    pub fn register<A, B, F, Fut>(&mut self, id: &'static str, func: F) -> RemoteFn<A, B>
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
        B: Serialize + DeserializeOwned + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B, String>> + Send + 'static,
    {
        let func = Arc::new(func);
        let handler: BoxedHandler = Arc::new(move |args: Vec<u8>| {
            let func = Arc::clone(&func);
            Box::pin(async move {
                let arg: A = bincode::deserialize(&args)
                    .map_err(|e| format!("failed to decode argument for {id}: {e}"))?;
                let outcome = match std::panic::AssertUnwindSafe(func(arg)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => Err(format!("{id} panicked: {}", panic_message(panic.as_ref()))),
                };
                match outcome {
                    Ok(value) => bincode::serialize(&value)
                        .map_err(|e| format!("failed to encode result of {id}: {e}")),
                    Err(err) => {
                        tracing::warn!(closure = id, error = %err, "remote function failed");
                        Err(err)
                    }
                }
            })
        });

        if self.handlers.insert(id.to_string(), handler).is_some() {
            tracing::warn!(closure = id, "closure identifier registered twice, replacing");
        } else {
            tracing::debug!(closure = id, "registered remote function");
        }
        RemoteFn::new(id)
    }

    /// Freeze the table. No registration is possible afterwards.
    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Execute the closure, returning the encoded result value or the
    /// error string the master will surface as a remote exception.
    pub async fn invoke(&self, closure: Closure) -> Result<Vec<u8>, String> {
        match self.handlers.get(&closure.id) {
            Some(handler) => handler(closure.args).await,
            None => {
                tracing::error!(closure = %closure.id, "unknown closure identifier");
                Err(format!("unknown closure identifier: {}", closure.id))
            }
        }
    }
}

/// A registered remote function `A -> Result<B, String>`.
///
/// The handle carries no code, only the identifier and the type witness;
/// both sides of the wire agree on the meaning of the identifier because
/// they built the same registry at startup.
pub struct RemoteFn<A, B> {
    id: &'static str,
    _marker: PhantomData<fn(A) -> B>,
}

impl<A, B> Clone for RemoteFn<A, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, B> Copy for RemoteFn<A, B> {}

impl<A, B> RemoteFn<A, B> {
    pub const fn new(id: &'static str) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }
}

impl<A, B> RemoteFn<A, B>
where
    A: Serialize + Send + Sync + 'static,
    B: DeserializeOwned,
{
    /// Bind an argument, producing the deferred closure handed to the
    /// remote runner. Encoding happens on first demand and is memoised.
    pub fn apply(&self, arg: A) -> ClosureProcess<B> {
        let id = self.id;
        ClosureProcess::new(move || {
            let args = bincode::serialize(&arg).map_err(|e| ClosureError::Encode(e.to_string()))?;
            Ok(Closure {
                id: id.to_string(),
                args,
            })
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
