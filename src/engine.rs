//! The fixed window point bucket with block escalation.
//!
//! Backends own the stored counts and apply the increment atomically; the functions here only
//! interpret a post-increment count. [Limiter] binds a [Profile] to a [Backend].

use crate::backend::{Backend, Error, Verdict};
use crate::policy::QuotaPolicy;
use crate::profile::Profile;
use std::sync::Arc;

/// Whether `consumed` (after the increment) exceeds the quota.
///
/// The quota is inclusive, consuming exactly `points` is still admitted.
pub(crate) fn is_over_quota(policy: &QuotaPolicy, consumed: u64) -> bool {
    consumed > policy.points()
}

/// Whether the record expiry must be replaced by the block duration.
pub(crate) fn should_block(policy: &QuotaPolicy, consumed: u64) -> bool {
    is_over_quota(policy, consumed) && policy.blocks()
}

/// Build the verdict for a post-increment count.
///
/// `ms_before_next` is the time until the record expires, measured after any block extension.
pub(crate) fn verdict(policy: &QuotaPolicy, consumed: u64, ms_before_next: u64) -> Verdict {
    if is_over_quota(policy, consumed) {
        Verdict::Rejected { ms_before_next }
    } else {
        Verdict::Admitted {
            remaining_points: policy.points() - consumed,
            ms_before_next,
        }
    }
}

/// A [Profile] bound to the [Backend] holding its counts.
///
/// Cheap to clone, the profile is shared and immutable.
pub struct Limiter<B> {
    backend: B,
    profile: Arc<Profile>,
}

impl<B: Clone> Clone for Limiter<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            profile: Arc::clone(&self.profile),
        }
    }
}

impl<B: Backend> Limiter<B> {
    pub fn new(backend: B, profile: Profile) -> Self {
        Self {
            backend,
            profile: Arc::new(profile),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The key under which the backend stores the count, namespaced by profile.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.profile.namespace(), key)
    }

    /// Consume one point for a derived request key.
    pub async fn consume(&self, key: &str) -> Result<Verdict, Error> {
        self.backend
            .consume(&self.storage_key(key), self.profile.policy())
            .await
    }
}
