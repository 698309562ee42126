use crate::cancel::CancellationToken;
use crate::cluster::CapabilityLister;
use crate::discovery::{FeatureSnapshot, Features};
use crate::error::DiscoveryError;
use log::{info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default time between discovery passes
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);

type ChangeCallback = Box<dyn Fn(FeatureSnapshot) + Send + Sync>;

/// Background watcher that keeps a [`Features`] handle current
///
/// The watcher is the only writer of its `Features`. A failed pass is logged
/// and leaves the previous flags in place; the next pass retries.
pub struct FeatureWatcher {
    lister: Arc<dyn CapabilityLister>,
    features: Features,
    interval: Duration,
    on_change: Option<ChangeCallback>,
    on_ready: Option<ChangeCallback>,
}

impl FeatureWatcher {
    /// Create a watcher polling `lister` every `interval`
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use otelcheck::cancel::CancellationToken;
    /// use otelcheck::cluster::KubectlClient;
    /// use otelcheck::discovery::{FeatureWatcher, DEFAULT_DISCOVERY_INTERVAL};
    ///
    /// let client = Arc::new(KubectlClient::with_defaults());
    /// let watcher = FeatureWatcher::new(client, DEFAULT_DISCOVERY_INTERVAL)
    ///     .with_on_change(|snapshot| println!("features changed: {:?}", snapshot));
    /// let features = watcher.features();
    ///
    /// let cancel = CancellationToken::new();
    /// let handle = watcher.spawn(cancel.clone()).unwrap();
    /// // ... read `features` from any thread ...
    /// cancel.cancel();
    /// handle.join().unwrap();
    /// ```
    pub fn new(lister: Arc<dyn CapabilityLister>, interval: Duration) -> Self {
        Self {
            lister,
            features: Features::new(),
            interval,
            on_change: None,
            on_ready: None,
        }
    }

    /// Register a callback invoked on the watcher thread whenever the flags change
    ///
    /// The callback must not block for long; it delays the next pass.
    pub fn with_on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(FeatureSnapshot) + Send + Sync + 'static,
    {
        self.on_change = Some(Box::new(callback));
        self
    }

    /// Register a callback invoked once, with the current flags, after the first pass
    ///
    /// It fires whether or not that pass succeeded.
    pub fn with_on_ready<F>(mut self, callback: F) -> Self
    where
        F: Fn(FeatureSnapshot) + Send + Sync + 'static,
    {
        self.on_ready = Some(Box::new(callback));
        self
    }

    /// Handle for readers of the discovered flags
    pub fn features(&self) -> Features {
        self.features.clone()
    }

    /// Perform one discovery pass
    ///
    /// On success the new flags are published and, if they differ from the
    /// previous pass, the change callback fires. On failure nothing changes.
    pub fn refresh(&self, cancel: &CancellationToken) -> Result<FeatureSnapshot, DiscoveryError> {
        self.pass(cancel, false)
    }

    fn pass(
        &self,
        cancel: &CancellationToken,
        mark_ready: bool,
    ) -> Result<FeatureSnapshot, DiscoveryError> {
        let kinds = self.lister.list_kinds(cancel)?;
        let snapshot = FeatureSnapshot::from_kinds(&kinds);
        let previous = self.features.publish(snapshot, mark_ready);

        if snapshot != previous {
            info!(
                "Feature change detected: has_operator={}, has_target_allocator={}",
                snapshot.has_operator, snapshot.has_target_allocator
            );
            if let Some(callback) = &self.on_change {
                callback(snapshot);
            }
        }

        Ok(snapshot)
    }

    /// Run discovery on the current thread until `cancel` fires
    ///
    /// The first pass runs immediately and marks the features ready even if it
    /// failed; later passes run every interval.
    pub fn run(&self, cancel: &CancellationToken) {
        if let Err(e) = self.pass(cancel, true) {
            self.log_failure(&e, cancel);
            self.features.mark_ready();
        }

        let snapshot = self.features.snapshot();
        info!(
            "Feature discovery complete (generation {}): has_operator={}, has_target_allocator={}",
            self.features.generation(),
            snapshot.has_operator,
            snapshot.has_target_allocator
        );
        if let Some(callback) = &self.on_ready {
            callback(snapshot);
        }

        while !cancel.wait_timeout(self.interval) {
            self.refresh_logged(cancel);
        }

        info!("Feature watcher stopped");
    }

    /// Start [`run`](Self::run) on a dedicated thread
    pub fn spawn(self, cancel: CancellationToken) -> Result<JoinHandle<()>, DiscoveryError> {
        let handle = thread::Builder::new()
            .name("feature-discovery".to_string())
            .spawn(move || self.run(&cancel))?;
        Ok(handle)
    }

    fn refresh_logged(&self, cancel: &CancellationToken) {
        if let Err(e) = self.refresh(cancel) {
            self.log_failure(&e, cancel);
        }
    }

    fn log_failure(&self, error: &DiscoveryError, cancel: &CancellationToken) {
        if !cancel.is_cancelled() {
            warn!("Feature discovery failed, will retry: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockCapabilityLister;
    use crate::discovery::{OPERATOR_KIND, TARGET_ALLOCATOR_KIND};
    use crate::error::CollaboratorError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    type Response = Result<Vec<String>, CollaboratorError>;

    fn kinds(names: &[&str]) -> Response {
        Ok(names.iter().map(|n| n.to_string()).collect())
    }

    fn unavailable() -> Response {
        Err(CollaboratorError::CommandFailed("connection refused".into()))
    }

    /// Lister that replays `responses` in order, then keeps repeating the last one
    fn scripted(responses: Vec<Response>) -> Arc<MockCapabilityLister> {
        let queue = Mutex::new(VecDeque::from(responses));
        let mut lister = MockCapabilityLister::new();
        lister.expect_list_kinds().returning(move |_| {
            let mut queue = queue.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                match queue.front().unwrap() {
                    Ok(kinds) => Ok(kinds.clone()),
                    Err(_) => unavailable(),
                }
            }
        });
        Arc::new(lister)
    }

    #[test]
    fn test_refresh_publishes_snapshot() {
        let watcher = FeatureWatcher::new(
            scripted(vec![kinds(&["Pod", OPERATOR_KIND])]),
            DEFAULT_DISCOVERY_INTERVAL,
        );
        let features = watcher.features();

        let snapshot = watcher.refresh(&CancellationToken::new()).unwrap();

        assert!(snapshot.has_operator);
        assert!(!snapshot.has_target_allocator);
        assert_eq!(features.snapshot(), snapshot);
        // refresh alone does not flip readiness; run does
        assert!(!features.is_ready());
    }

    #[test]
    fn test_failed_refresh_retains_ready_and_last_pair() {
        let watcher = FeatureWatcher::new(
            scripted(vec![
                kinds(&[OPERATOR_KIND, TARGET_ALLOCATOR_KIND]),
                unavailable(),
            ]),
            DEFAULT_DISCOVERY_INTERVAL,
        );
        let features = watcher.features();
        let cancel = CancellationToken::new();

        watcher.refresh(&cancel).unwrap();
        features.mark_ready();
        let good = features.snapshot();

        assert!(matches!(
            watcher.refresh(&cancel),
            Err(DiscoveryError::Unavailable(_))
        ));
        assert!(features.is_ready());
        assert_eq!(features.snapshot(), good);
        assert_eq!(features.generation(), 1);
    }

    #[test]
    fn test_on_change_fires_only_on_change() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&changes);

        let watcher = FeatureWatcher::new(
            scripted(vec![
                kinds(&[OPERATOR_KIND]),
                kinds(&[OPERATOR_KIND, "Pod"]),
                unavailable(),
                kinds(&[]),
            ]),
            DEFAULT_DISCOVERY_INTERVAL,
        )
        .with_on_change(move |snapshot| recorded.lock().unwrap().push(snapshot));
        let cancel = CancellationToken::new();

        for _ in 0..4 {
            let _ = watcher.refresh(&cancel);
        }

        let changes = changes.lock().unwrap();
        assert_eq!(
            *changes,
            vec![
                FeatureSnapshot {
                    has_operator: true,
                    has_target_allocator: false
                },
                FeatureSnapshot::default(),
            ]
        );
    }

    #[test]
    fn test_run_marks_ready_after_failed_first_pass() {
        let watcher = FeatureWatcher::new(scripted(vec![unavailable()]), Duration::from_secs(60));
        let features = watcher.features();
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Already cancelled: one pass, then return without waiting
        let start = Instant::now();
        watcher.run(&cancel);

        assert!(start.elapsed() < Duration::from_secs(30));
        assert!(features.is_ready());
        assert_eq!(features.snapshot(), FeatureSnapshot::default());
    }

    #[test]
    fn test_first_pass_raises_readiness_with_the_flags() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let on_change_seen = Arc::clone(&seen);
        let on_ready_seen = Arc::clone(&seen);

        let watcher = FeatureWatcher::new(
            scripted(vec![kinds(&[OPERATOR_KIND])]),
            Duration::from_secs(60),
        );
        let features = watcher.features();
        let on_change_features = features.clone();
        let watcher = watcher
            .with_on_change(move |snapshot| {
                let ready = on_change_features.is_ready();
                on_change_seen.lock().unwrap().push(("change", snapshot, ready));
            })
            .with_on_ready(move |snapshot| {
                on_ready_seen.lock().unwrap().push(("ready", snapshot, true));
            });
        let cancel = CancellationToken::new();
        cancel.cancel();

        watcher.run(&cancel);

        let operator = FeatureSnapshot {
            has_operator: true,
            has_target_allocator: false,
        };
        // readiness was already visible when the first change was announced
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("change", operator, true), ("ready", operator, true)]
        );
        assert_eq!(features.generation(), 1);
    }

    #[test]
    fn test_on_ready_fires_after_failed_first_pass() {
        let ready = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&ready);

        let watcher = FeatureWatcher::new(scripted(vec![unavailable()]), Duration::from_secs(60))
            .with_on_ready(move |snapshot| recorded.lock().unwrap().push(snapshot));
        let cancel = CancellationToken::new();
        cancel.cancel();

        watcher.run(&cancel);

        assert_eq!(*ready.lock().unwrap(), vec![FeatureSnapshot::default()]);
    }

    #[test]
    fn test_spawned_watcher_refreshes_until_cancelled() {
        let watcher = FeatureWatcher::new(
            scripted(vec![kinds(&[]), kinds(&[TARGET_ALLOCATOR_KIND])]),
            Duration::from_millis(10),
        );
        let features = watcher.features();
        let cancel = CancellationToken::new();

        let handle = watcher.spawn(cancel.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !features.snapshot().has_target_allocator && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        cancel.cancel();
        handle.join().unwrap();

        assert!(features.is_ready());
        assert!(features.snapshot().has_target_allocator);
        assert!(features.generation() >= 2);
    }
}
