//! Feature discovery
//!
//! A single background watcher periodically lists the API resource kinds the
//! cluster serves and publishes whether the operator and target allocator
//! custom resources exist. Any number of readers share the published state
//! through a cheap, clonable [`Features`] handle.

pub mod feature_watcher;

pub use feature_watcher::{FeatureWatcher, DEFAULT_DISCOVERY_INTERVAL};

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

/// Kind served by the operator's collector custom resource
pub const OPERATOR_KIND: &str = "OpenTelemetryCollector";

/// Kind served by the target allocator custom resource
pub const TARGET_ALLOCATOR_KIND: &str = "TargetAllocator";

/// Consistent pair of capability flags from one refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSnapshot {
    pub has_operator: bool,
    pub has_target_allocator: bool,
}

impl FeatureSnapshot {
    /// Derive the flags from a list of served kinds
    pub fn from_kinds<S: AsRef<str>>(kinds: &[S]) -> Self {
        kinds.iter().fold(Self::default(), |mut snapshot, kind| {
            match kind.as_ref() {
                OPERATOR_KIND => snapshot.has_operator = true,
                TARGET_ALLOCATOR_KIND => snapshot.has_target_allocator = true,
                _ => {}
            }
            snapshot
        })
    }
}

#[derive(Debug, Default)]
struct FeatureState {
    snapshot: FeatureSnapshot,
    ready: bool,
    /// Number of successful refreshes
    generation: u64,
}

/// Shared, read-mostly view of discovered capabilities
///
/// Flags, readiness and generation are updated together under one write
/// lock, so a reader never sees a pair mixed from two refreshes.
#[derive(Debug, Clone, Default)]
pub struct Features {
    state: Arc<RwLock<FeatureState>>,
}

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest consistent pair of flags
    pub fn snapshot(&self) -> FeatureSnapshot {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
    }

    /// True once the first discovery pass has finished, successful or not
    pub fn is_ready(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ready
    }

    pub fn has_operator(&self) -> bool {
        self.snapshot().has_operator
    }

    /// Number of successful refreshes published so far
    pub fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Replace the flags, returning the previous pair
    ///
    /// With `mark_ready` the readiness flag is raised under the same guard, so
    /// no reader sees the features ready with the flags of an earlier pass.
    pub(crate) fn publish(&self, snapshot: FeatureSnapshot, mark_ready: bool) -> FeatureSnapshot {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let previous = state.snapshot;
        state.snapshot = snapshot;
        state.generation += 1;
        if mark_ready {
            state.ready = true;
        }
        previous
    }

    /// Mark the first pass as done; readiness never reverts
    pub(crate) fn mark_ready(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .ready = true;
    }
}
