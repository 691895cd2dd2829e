//! Single-flight initialization of a lazily built value.
//!
//! At most one build runs at a time. The build is spawned onto the runtime,
//! so it finishes (and publishes its value) even if every caller awaiting it
//! is dropped. A failed rebuild keeps the previous value.

use crate::error::{LoraError, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::error;

type Flight = Shared<BoxFuture<'static, std::result::Result<(), Arc<LoraError>>>>;

pub struct SingleFlight<T> {
    value: Arc<RwLock<Option<T>>>,
    in_flight: Mutex<Option<Flight>>,
    label: &'static str,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            value: Arc::new(RwLock::new(None)),
            in_flight: Mutex::new(None),
            label,
        }
    }

    /// Current value without waiting on any build.
    pub fn current(&self) -> Option<T> {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the value; the next forced access rebuilds it.
    pub fn invalidate(&self) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Return the value, building it first when it is missing and `force` is set,
    /// or rebuilding it when `force` is set.
    ///
    /// `Ok(None)` means nothing has been built yet and no build was requested.
    /// An error is returned only when the build failed and there is no previous
    /// value to fall back on.
    pub async fn get<F, Fut>(&self, force: bool, build: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !force && self.current().is_none() {
            return Ok(None);
        }
        self.run(force, build).await
    }

    /// Return the value, building it only when it does not exist yet.
    ///
    /// Waits for a build that is already running instead of starting another.
    pub async fn get_or_init<F, Fut>(&self, build: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.run(false, build).await
    }

    async fn run<F, Fut>(&self, force: bool, build: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock().await;

        if let Some(flight) = in_flight.take() {
            if let Err(e) = flight.await {
                error!("{} initialization failed: {}", self.label, e);
            }
        }

        if force || self.current().is_none() {
            let flight = self.spawn(build());
            *in_flight = Some(flight.clone());
            let outcome = flight.await;
            *in_flight = None;

            if let Err(e) = outcome {
                error!("{} initialization failed: {}", self.label, e);
                if self.current().is_none() {
                    return Err(LoraError::CacheInitialization {
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(self.current())
    }

    fn spawn<Fut>(&self, build: Fut) -> Flight
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let slot = self.value.clone();
        let task = tokio::spawn(async move {
            let value = build.await?;
            *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
            Ok::<(), LoraError>(())
        });

        async move {
            match task.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Arc::new(e)),
                Err(join) => Err(Arc::new(LoraError::Other(format!(
                    "initialization task failed: {}",
                    join
                )))),
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_not_forced_without_value_returns_none() {
        let flight: SingleFlight<u32> = SingleFlight::new("test");
        let result = flight.get(false, || async { Ok(1) }).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_concurrent_forced_builds_are_serialized() {
        let flight = Arc::new(SingleFlight::<usize>::new("test"));
        let builds = Arc::new(AtomicUsize::new(0));

        let first = {
            let flight = flight.clone();
            let builds = builds.clone();
            tokio::spawn(async move {
                flight
                    .get(true, move || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(builds.fetch_add(1, Ordering::SeqCst) + 1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Arrives while the first build is running; it is not forced, so it
        // waits on the lock and then sees the finished value.
        let second = flight.get(false, || async { Ok(100) }).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first, Some(1));
        assert!(second.is_none() || second == Some(1));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_value() {
        let flight: SingleFlight<u32> = SingleFlight::new("test");
        assert_eq!(flight.get(true, || async { Ok(7) }).await.unwrap(), Some(7));

        let refreshed = flight
            .get(true, || async { Err(LoraError::Other("disk gone".into())) })
            .await
            .unwrap();
        assert_eq!(refreshed, Some(7));
    }

    #[tokio::test]
    async fn test_failure_without_value_is_error() {
        let flight: SingleFlight<u32> = SingleFlight::new("test");
        let result = flight
            .get(true, || async { Err(LoraError::Other("boom".into())) })
            .await;
        assert!(matches!(result, Err(LoraError::CacheInitialization { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_cancel_build() {
        let flight = Arc::new(SingleFlight::<u32>::new("test"));
        let caller = {
            let flight = flight.clone();
            tokio::spawn(async move {
                flight
                    .get(true, || async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(5)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(flight.current(), Some(5));
    }

    #[tokio::test]
    async fn test_get_or_init_joins_running_build() {
        let flight = Arc::new(SingleFlight::<usize>::new("test"));
        let builds = Arc::new(AtomicUsize::new(0));

        let forced = {
            let flight = flight.clone();
            let builds = builds.clone();
            tokio::spawn(async move {
                flight
                    .get(true, move || async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(builds.fetch_add(1, Ordering::SeqCst) + 1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let joined = flight.get_or_init(|| async { Ok(99) }).await.unwrap();
        assert_eq!(joined, Some(1));
        assert_eq!(forced.await.unwrap().unwrap(), Some(1));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let again = flight.get_or_init(|| async { Ok(99) }).await.unwrap();
        assert_eq!(again, Some(1));
    }

    #[tokio::test]
    async fn test_invalidate() {
        let flight: SingleFlight<u32> = SingleFlight::new("test");
        flight.get(true, || async { Ok(3) }).await.unwrap();
        flight.invalidate();
        assert_eq!(flight.current(), None);
    }
}
