use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{now_ts, Timestamp};
use crate::store::{read_json_or_default, write_json_durable, FileLock};

// --- Scheduler lease --------------------------------------------------------
//
// At most one process advances the channel. The holder re-touches a small
// token file every tick; anyone may take over once the token is older than
// the TTL. Check-and-write happens under an exclusive flock on a sibling
// `.lock` file, and the token itself is replaced by atomic rename.
//
// This is a failure detector, not consensus: a paused holder can briefly
// overlap with its successor.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LeaseToken {
    holder: String,
    touched_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct LeaseCoordinator {
    token_path: PathBuf,
    lock_path: PathBuf,
    ttl: f64,
}

impl LeaseCoordinator {
    pub fn new(token_path: impl Into<PathBuf>, ttl: Duration) -> Self {
        let token_path = token_path.into();
        let lock_path = FileLock::sibling_of(&token_path);
        Self { token_path, lock_path, ttl: ttl.as_secs_f64() }
    }

    pub fn try_acquire_or_renew(&self, identity: &str) -> anyhow::Result<bool> {
        self.try_acquire_or_renew_at(identity, now_ts())
    }

    /// Returns true when `identity` holds the lease after the call.
    pub fn try_acquire_or_renew_at(&self, identity: &str, now: Timestamp) -> anyhow::Result<bool> {
        let _guard = FileLock::exclusive(&self.lock_path)?;

        let token: Option<LeaseToken> = read_json_or_default(&self.token_path);
        if let Some(t) = &token {
            let fresh = now - t.touched_at <= self.ttl;
            if fresh && t.holder != identity {
                debug!(holder = %t.holder, "scheduler lease held elsewhere");
                return Ok(false);
            }
        }

        let renewed = LeaseToken { holder: identity.to_string(), touched_at: now };
        write_json_durable(&self.token_path, &Some(renewed))?;
        Ok(true)
    }

    /// Drop the token if `identity` still holds it, so a successor does not
    /// have to wait out the TTL.
    pub fn release(&self, identity: &str) -> anyhow::Result<()> {
        let _guard = FileLock::exclusive(&self.lock_path)?;
        let token: Option<LeaseToken> = read_json_or_default(&self.token_path);
        if token.is_some_and(|t| t.holder == identity) {
            std::fs::remove_file(&self.token_path)
                .with_context(|| format!("failed to remove {}", self.token_path.display()))?;
        }
        Ok(())
    }
}

/// `host:pid:nonce`, unique per running process.
pub fn process_identity() -> String {
    let host = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}:{}:{}", std::process::id(), &nonce[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::temp_path;
    use std::path::Path;

    fn coordinator(path: &Path) -> LeaseCoordinator {
        LeaseCoordinator::new(path, Duration::from_secs(10))
    }

    #[test]
    fn first_caller_takes_the_lease() {
        let path = temp_path("scheduler.lease");
        assert!(coordinator(&path).try_acquire_or_renew_at("a", 100.0).unwrap());
    }

    #[test]
    fn fresh_lease_excludes_others_until_it_goes_stale() {
        let path = temp_path("scheduler.lease");
        let a = coordinator(&path);
        let b = coordinator(&path);

        assert!(a.try_acquire_or_renew_at("a", 0.0).unwrap());
        assert!(!b.try_acquire_or_renew_at("b", 3.0).unwrap());
        assert!(a.try_acquire_or_renew_at("a", 5.0).unwrap());
        assert!(!b.try_acquire_or_renew_at("b", 15.0).unwrap());

        // A stopped renewing at t=5.
        assert!(b.try_acquire_or_renew_at("b", 15.5).unwrap());
        assert!(!a.try_acquire_or_renew_at("a", 16.0).unwrap());
    }

    #[test]
    fn malformed_token_counts_as_absent() {
        let path = temp_path("scheduler.lease");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"garbage").unwrap();
        assert!(coordinator(&path).try_acquire_or_renew_at("b", 1.0).unwrap());
    }

    #[test]
    fn release_hands_over_immediately() {
        let path = temp_path("scheduler.lease");
        let a = coordinator(&path);
        let b = coordinator(&path);
        assert!(a.try_acquire_or_renew_at("a", 0.0).unwrap());

        b.release("b").unwrap();
        assert!(!b.try_acquire_or_renew_at("b", 1.0).unwrap());

        a.release("a").unwrap();
        assert!(b.try_acquire_or_renew_at("b", 1.0).unwrap());
    }

    #[test]
    fn identity_names_this_process() {
        let id = process_identity();
        assert!(id.contains(&std::process::id().to_string()));
        assert_ne!(id, process_identity());
    }
}
