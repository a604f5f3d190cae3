//! the active policy, swapped atomically on reload.
//!
//! readers load an `Arc` snapshot and never block. writers go through
//! [`PolicyStore::begin_update`], which serialises reloads and exposes the
//! `Reloading` state while a candidate is being checked.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use tailmesh_policy::{Policy, PolicyDocument};
use tailmesh_types::{DefaultPolicy, PolicyVersion};
use tokio::sync::{Mutex, MutexGuard};

/// the policy every map is currently derived from.
#[derive(Debug, Clone)]
pub struct ActivePolicy {
    /// monotonically increasing version.
    pub version: PolicyVersion,
    /// the document as supplied.
    pub document: PolicyDocument,
    /// its validated form.
    pub policy: Policy,
}

/// externally visible store state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// serving this version, no reload in flight.
    Active(PolicyVersion),
    /// a candidate is being checked; this version keeps serving meanwhile.
    Reloading(PolicyVersion),
}

/// what a successful `set_policy` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPolicyOutcome {
    /// the candidate became active under a new version.
    Activated(PolicyVersion),
    /// the candidate equals the active policy; nothing changed.
    Unchanged(PolicyVersion),
}

impl SetPolicyOutcome {
    /// the version active after the call.
    pub fn version(self) -> PolicyVersion {
        match self {
            SetPolicyOutcome::Activated(v) | SetPolicyOutcome::Unchanged(v) => v,
        }
    }
}

/// the document installed at startup when no policy file is given.
pub fn default_document(default: DefaultPolicy) -> PolicyDocument {
    match default {
        DefaultPolicy::AllowAll => PolicyDocument::allow_all(),
        DefaultPolicy::DenyAll => PolicyDocument::deny_all(),
    }
}

/// holds the active policy.
pub struct PolicyStore {
    active: ArcSwap<ActivePolicy>,
    reloading: AtomicBool,
    update: Mutex<()>,
}

impl PolicyStore {
    /// create a store serving `document` as [`PolicyVersion::INITIAL`].
    pub fn new(document: PolicyDocument) -> Result<Self, tailmesh_policy::Error> {
        let policy = document.validate()?;
        Ok(Self {
            active: ArcSwap::from_pointee(ActivePolicy {
                version: PolicyVersion::INITIAL,
                document,
                policy,
            }),
            reloading: AtomicBool::new(false),
            update: Mutex::new(()),
        })
    }

    /// the active policy snapshot.
    pub fn load(&self) -> Arc<ActivePolicy> {
        self.active.load_full()
    }

    pub fn version(&self) -> PolicyVersion {
        self.active.load().version
    }

    pub fn state(&self) -> StoreState {
        let version = self.version();
        if self.reloading.load(Ordering::Acquire) {
            StoreState::Reloading(version)
        } else {
            StoreState::Active(version)
        }
    }

    /// start a reload. waits for any other reload to finish first.
    ///
    /// the store reports `Reloading` until the returned guard is dropped or
    /// used to activate a candidate.
    pub async fn begin_update(&self) -> UpdateGuard<'_> {
        let lock = self.update.lock().await;
        self.reloading.store(true, Ordering::Release);
        UpdateGuard {
            store: self,
            _lock: lock,
        }
    }
}

/// exclusive right to replace the active policy.
pub struct UpdateGuard<'a> {
    store: &'a PolicyStore,
    _lock: MutexGuard<'a, ()>,
}

impl UpdateGuard<'_> {
    /// the policy active when the update began. no other writer can change
    /// it while the guard is held.
    pub fn current(&self) -> Arc<ActivePolicy> {
        self.store.load()
    }

    /// install a checked candidate under the next version.
    pub fn activate(self, document: PolicyDocument, policy: Policy) -> PolicyVersion {
        let version = self.store.version().next();
        self.store.active.store(Arc::new(ActivePolicy {
            version,
            document,
            policy,
        }));
        version
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.store.reloading.store(false, Ordering::Release);
    }
}
