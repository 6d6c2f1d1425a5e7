use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use crate::closure::{Closure, ClosureError};

/// A deferred closure with a single-slot memoisation cell.
///
/// The producing action runs on first demand and at most once, even under
/// concurrent demand; every later [`force`](Self::force) returns the same
/// [`Closure`] byte for byte. The type parameter witnesses the result type
/// the remote runner will decode.
pub struct ClosureProcess<T> {
    produce: Box<dyn Fn() -> Result<Closure, ClosureError> + Send + Sync>,
    cell: OnceCell<Closure>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ClosureProcess<T> {
    pub fn new(produce: impl Fn() -> Result<Closure, ClosureError> + Send + Sync + 'static) -> Self {
        Self {
            produce: Box::new(produce),
            cell: OnceCell::new(),
            _marker: PhantomData,
        }
    }

    /// Build the closure, or return the memoised one.
    pub async fn force(&self) -> Result<&Closure, ClosureError> {
        self.cell
            .get_or_try_init(|| async { (self.produce)() })
            .await
    }

    /// Decode an encoded result value received from a worker.
    pub fn decode(&self, bytes: &[u8]) -> Result<T, ClosureError> {
        bincode::deserialize(bytes).map_err(|e| ClosureError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_process(counter: Arc<AtomicUsize>) -> ClosureProcess<i64> {
        ClosureProcess::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Closure {
                id: "counted".to_string(),
                args: bincode::serialize(&7i64).unwrap(),
            })
        })
    }

    #[tokio::test]
    async fn producer_runs_once_under_concurrent_demand() {
        let counter = Arc::new(AtomicUsize::new(0));
        let process = Arc::new(counting_process(counter.clone()));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let process = process.clone();
            tasks.push(tokio::spawn(async move {
                process.force().await.unwrap().clone()
            }));
        }
        let mut closures = Vec::new();
        for task in tasks {
            closures.push(task.await.unwrap());
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(closures.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn repeated_force_returns_identical_closure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let process = counting_process(counter.clone());

        let first = process.force().await.unwrap().clone();
        let second = process.force().await.unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
