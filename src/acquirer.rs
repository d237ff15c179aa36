//! One-shot, accuracy-gated fix acquisition on top of a platform provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::models::LocationFix;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("location provider connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("location provider closed the connection")]
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("no fix within {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A platform source of location reports.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Waits for the next report, however accurate it is.
    async fn next_fix(&self) -> Result<LocationFix, ProviderError>;

    /// Stops listening. The next `next_fix` call starts listening again.
    async fn release(&self) {}
}

/// Hands out single fixes from a provider.
///
/// Holds no per-request state, so a fresh instance per tick behaves the same
/// as one kept for the whole process.
#[derive(Clone)]
pub struct FixAcquirer {
    provider: Arc<dyn LocationProvider>,
    timeout: Duration,
}

/// An outstanding fix request. Cancelled when dropped.
pub struct FixRequest {
    cancel: Option<oneshot::Sender<()>>,
    // Detached on drop; the task winds itself down once cancelled.
    _task: JoinHandle<()>,
}

impl FixRequest {
    /// Stops the request. Neither callback runs after this returns, unless
    /// one was already running.
    pub fn cancel(mut self) {
        self.cancel.take();
    }
}

impl Drop for FixRequest {
    fn drop(&mut self) {
        // Dropping the sender wakes the task, which releases the provider.
        self.cancel.take();
    }
}

impl FixAcquirer {
    pub fn new(provider: Arc<dyn LocationProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Requests one fix with finite coordinates and
    /// `accuracy_m <= accuracy_threshold_m`.
    ///
    /// Exactly one of the callbacks runs, at most once, unless the request is
    /// cancelled first. The provider is released before a callback runs.
    pub fn request_one_fix<F, E>(
        &self,
        accuracy_threshold_m: f64,
        on_fix: F,
        on_error: E,
    ) -> FixRequest
    where
        F: FnOnce(LocationFix) + Send + 'static,
        E: FnOnce(AcquireError) + Send + 'static,
    {
        let provider = self.provider.clone();
        let timeout = self.timeout;
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = &mut cancel_rx => None,
                result = tokio::time::timeout(
                    timeout,
                    first_qualifying_fix(provider.as_ref(), accuracy_threshold_m),
                ) => Some(result),
            };
            provider.release().await;

            match outcome {
                None => tracing::debug!("Fix request cancelled"),
                Some(Ok(Ok(fix))) => on_fix(fix),
                Some(Ok(Err(err))) => on_error(err),
                Some(Err(_elapsed)) => on_error(AcquireError::TimedOut(timeout)),
            }
        });

        FixRequest {
            cancel: Some(cancel_tx),
            _task: task,
        }
    }
}

async fn first_qualifying_fix(
    provider: &dyn LocationProvider,
    accuracy_threshold_m: f64,
) -> Result<LocationFix, AcquireError> {
    loop {
        let fix = provider.next_fix().await?;
        if !fix.coordinates().is_finite() {
            tracing::debug!(
                latitude = fix.latitude,
                longitude = fix.longitude,
                "Fix has no usable position, ignoring it"
            );
            continue;
        }
        if fix.is_accurate_within(accuracy_threshold_m) {
            return Ok(fix);
        }
        tracing::debug!(
            accuracy_m = fix.accuracy_m,
            accuracy_threshold_m,
            "Fix not accurate enough, waiting for a better one"
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    pub fn fix_at(latitude: f64, longitude: f64, accuracy_m: f64) -> LocationFix {
        LocationFix {
            latitude,
            longitude,
            accuracy_m,
            speed_mps: Some(1.5),
            bearing_deg: Some(90.0),
            altitude_m: Some(12.0),
            timestamp: Utc::now(),
            provider: "gps".to_string(),
        }
    }

    /// Replays queued reports, then waits forever.
    #[derive(Default)]
    pub struct ScriptedProvider {
        reports: Mutex<VecDeque<Result<LocationFix, ProviderError>>>,
        pub releases: AtomicUsize,
    }

    impl ScriptedProvider {
        pub async fn push(&self, fix: LocationFix) {
            self.reports.lock().await.push_back(Ok(fix));
        }

        pub async fn push_error(&self, error: ProviderError) {
            self.reports.lock().await.push_back(Err(error));
        }

        pub fn release_count(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LocationProvider for ScriptedProvider {
        async fn next_fix(&self) -> Result<LocationFix, ProviderError> {
            let next = self.reports.lock().await.pop_front();
            match next {
                Some(report) => report,
                None => std::future::pending().await,
            }
        }

        async fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedProvider, fix_at};
    use super::*;
    use tokio::sync::mpsc;

    enum Reported {
        Fix(LocationFix),
        Error(AcquireError),
    }

    fn request(
        acquirer: &FixAcquirer,
        threshold: f64,
    ) -> (FixRequest, mpsc::UnboundedReceiver<Reported>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let error_tx = tx.clone();
        let request = acquirer.request_one_fix(
            threshold,
            move |fix| {
                let _ = tx.send(Reported::Fix(fix));
            },
            move |err| {
                let _ = error_tx.send(Reported::Error(err));
            },
        );
        (request, rx)
    }

    #[tokio::test]
    async fn skips_inaccurate_reports() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push(fix_at(1.0, 1.0, 850.0)).await;
        provider.push(fix_at(2.0, 2.0, 101.0)).await;
        provider.push(fix_at(3.0, 3.0, 100.0)).await;
        provider.push(fix_at(4.0, 4.0, 5.0)).await;
        let acquirer = FixAcquirer::new(provider.clone(), Duration::from_secs(5));

        let (_request, mut reported) = request(&acquirer, 100.0);

        match reported.recv().await {
            Some(Reported::Fix(fix)) => assert_eq!(fix.latitude, 3.0),
            _ => panic!("expected a fix"),
        }
        // One delivery per request, and the provider was let go.
        assert!(reported.recv().await.is_none());
        assert_eq!(provider.release_count(), 1);
    }

    #[tokio::test]
    async fn skips_reports_without_a_position() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push(fix_at(f64::NAN, 24.9, 5.0)).await;
        provider.push(fix_at(60.1, f64::INFINITY, 5.0)).await;
        provider.push(fix_at(60.1, 24.9, 5.0)).await;
        let acquirer = FixAcquirer::new(provider.clone(), Duration::from_secs(5));

        let (_request, mut reported) = request(&acquirer, 100.0);

        match reported.recv().await {
            Some(Reported::Fix(fix)) => assert_eq!((fix.latitude, fix.longitude), (60.1, 24.9)),
            _ => panic!("expected a fix"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_a_good_fix() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push(fix_at(1.0, 1.0, 500.0)).await;
        let acquirer = FixAcquirer::new(provider.clone(), Duration::from_secs(30));

        let (_request, mut reported) = request(&acquirer, 100.0);

        match reported.recv().await {
            Some(Reported::Error(AcquireError::TimedOut(limit))) => {
                assert_eq!(limit, Duration::from_secs(30))
            }
            _ => panic!("expected a timeout"),
        }
        assert_eq!(provider.release_count(), 1);
    }

    #[tokio::test]
    async fn provider_errors_are_reported() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_error(ProviderError::Disconnected).await;
        let acquirer = FixAcquirer::new(provider.clone(), Duration::from_secs(5));

        let (_request, mut reported) = request(&acquirer, 100.0);

        assert!(matches!(
            reported.recv().await,
            Some(Reported::Error(AcquireError::Provider(ProviderError::Disconnected)))
        ));
    }

    #[tokio::test]
    async fn cancelled_request_never_reports() {
        let provider = Arc::new(ScriptedProvider::default());
        let acquirer = FixAcquirer::new(provider.clone(), Duration::from_secs(5));

        let (request, mut reported) = request(&acquirer, 100.0);
        request.cancel();

        // Both callbacks are dropped unused, closing the channel.
        assert!(reported.recv().await.is_none());
        assert_eq!(provider.release_count(), 1);
    }
}
