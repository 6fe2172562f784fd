//! Session-scoped cancellation of in-flight work
//!
//! Every cancelable slot registers with the authority of its bridge. When the
//! host goes through a lifecycle transition that invalidates running work
//! (a mode change, the end of a session), the authority force-completes every
//! registered slot so no awaiter is left hanging.

use crate::error::{BridgeError, BridgeResult};
use crate::slot::WorkSlot;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tickbridge_sdk::StepError;

// ============================================================================
// Lifecycle
// ============================================================================

/// Whether the registry accepts new members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No session has started yet
    Inactive,
    /// A session is running; registrations are accepted
    Running,
    /// The session ended; registrations are refused
    Closed,
}

/// Host lifecycle transitions the bridge reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// A new session begins
    SessionStarted,
    /// The host is switching modes (e.g. leaving play mode)
    ModeChanging,
    /// The host paused ticking
    Paused,
    /// The host resumed ticking
    Resumed,
    /// The session is ending
    SessionEnding,
}

impl LifecycleEvent {
    /// Whether the event cancels every in-flight operation
    pub fn invalidates_in_flight(self) -> bool {
        matches!(
            self,
            LifecycleEvent::ModeChanging | LifecycleEvent::SessionEnding
        )
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Something the authority can force-complete
pub trait Cancelable: Send + Sync {
    /// Cancel the target; returns true if this call completed it
    fn cancel(&self) -> bool;
}

/// Identifier of a registry member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

struct RegistryState {
    session: LifecycleState,
    next_id: u64,
    members: FxHashMap<u64, Arc<dyn Cancelable>>,
}

struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    fn remove(&self, id: u64) -> Option<Arc<dyn Cancelable>> {
        self.state.lock().members.remove(&id)
    }
}

/// Membership of one target in the registry
///
/// Dropping the registration removes the target; slots drop theirs when they
/// complete or go back to the pool.
pub struct CancellationRegistration {
    id: u64,
    registry: Weak<Registry>,
}

impl CancellationRegistration {
    /// The member's identifier
    pub fn id(&self) -> RegistrationId {
        RegistrationId(self.id)
    }
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl fmt::Debug for CancellationRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancellationRegistration")
            .field(&self.id)
            .finish()
    }
}

/// Registry of pending cancelable work, scoped to one bridge session
#[derive(Clone)]
pub struct CancellationAuthority {
    registry: Arc<Registry>,
}

impl CancellationAuthority {
    /// Create an authority with no running session
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                state: Mutex::new(RegistryState {
                    session: LifecycleState::Inactive,
                    next_id: 0,
                    members: FxHashMap::default(),
                }),
            }),
        }
    }

    /// Open the registry for a new session
    pub fn begin_session(&self) {
        self.registry.state.lock().session = LifecycleState::Running;
        tracing::info!("cancellation session started");
    }

    /// Close the registry and cancel every member
    pub fn end_session(&self) -> usize {
        self.registry.state.lock().session = LifecycleState::Closed;
        tracing::info!("cancellation session ending");
        self.cancel_all()
    }

    /// Current session state
    pub fn state(&self) -> LifecycleState {
        self.registry.state.lock().session
    }

    /// Number of registered members
    pub fn registered(&self) -> usize {
        self.registry.state.lock().members.len()
    }

    /// Add a target to the registry
    pub fn register(&self, target: Arc<dyn Cancelable>) -> BridgeResult<CancellationRegistration> {
        let mut state = self.registry.state.lock();
        if state.session != LifecycleState::Running {
            return Err(BridgeError::NotRegistrable(state.session));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.members.insert(id, target);
        Ok(CancellationRegistration {
            id,
            registry: Arc::downgrade(&self.registry),
        })
    }

    /// Cancel one member; idempotent
    pub fn cancel(&self, id: RegistrationId) -> bool {
        match self.registry.remove(id.0) {
            Some(target) => cancel_guarded(target.as_ref()),
            None => false,
        }
    }

    /// Cancel every member
    ///
    /// The registry is emptied under the lock; the targets are canceled after
    /// it is released. A panicking target is logged and skipped.
    pub fn cancel_all(&self) -> usize {
        let members: Vec<Arc<dyn Cancelable>> = {
            let mut state = self.registry.state.lock();
            state.members.drain().map(|(_, target)| target).collect()
        };

        let total = members.len();
        let canceled = members
            .iter()
            .filter(|target| cancel_guarded(target.as_ref()))
            .count();
        tracing::info!(total, canceled, "canceled in-flight work");
        canceled
    }

    /// React to a host lifecycle transition; returns how many targets it canceled
    pub fn on_lifecycle(&self, event: LifecycleEvent) -> usize {
        tracing::info!(?event, "host lifecycle transition");
        match event {
            LifecycleEvent::SessionStarted => {
                self.begin_session();
                0
            }
            LifecycleEvent::SessionEnding => self.end_session(),
            LifecycleEvent::ModeChanging => self.cancel_all(),
            LifecycleEvent::Paused | LifecycleEvent::Resumed => 0,
        }
    }
}

impl Default for CancellationAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.registry.state.lock();
        f.debug_struct("CancellationAuthority")
            .field("session", &state.session)
            .field("registered", &state.members.len())
            .finish()
    }
}

fn cancel_guarded(target: &dyn Cancelable) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| target.cancel())) {
        Ok(canceled) => canceled,
        Err(payload) => {
            let err = StepError::from_panic(payload.as_ref());
            tracing::error!(error = %err, "cancel handler panicked");
            false
        }
    }
}

// ============================================================================
// Slot adapter
// ============================================================================

/// Cancels one slot rental
pub(crate) struct SlotCanceler<T> {
    slot: Weak<WorkSlot<T>>,
    version: u16,
}

impl<T> SlotCanceler<T> {
    pub(crate) fn new(slot: &Arc<WorkSlot<T>>, version: u16) -> Self {
        Self {
            slot: Arc::downgrade(slot),
            version,
        }
    }
}

impl<T: Send + 'static> Cancelable for SlotCanceler<T> {
    fn cancel(&self) -> bool {
        self.slot
            .upgrade()
            .is_some_and(|slot| slot.cancel(self.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl Cancelable for Counter {
        fn cancel(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst) == 0
        }
    }

    struct Exploding;

    impl Cancelable for Exploding {
        fn cancel(&self) -> bool {
            panic!("cancel handler failure")
        }
    }

    fn running() -> CancellationAuthority {
        let authority = CancellationAuthority::new();
        authority.begin_session();
        authority
    }

    #[test]
    fn test_register_requires_running_session() {
        let authority = CancellationAuthority::new();
        let err = authority
            .register(Arc::new(Counter(AtomicUsize::new(0))))
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::NotRegistrable(LifecycleState::Inactive)
        ));

        authority.begin_session();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        assert!(authority.register(counter).is_ok());
    }

    #[test]
    fn test_drop_removes_registration() {
        let authority = running();
        let reg = authority
            .register(Arc::new(Counter(AtomicUsize::new(0))))
            .unwrap();
        assert_eq!(authority.registered(), 1);
        drop(reg);
        assert_eq!(authority.registered(), 0);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let authority = running();
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let reg = authority.register(target.clone()).unwrap();

        assert!(authority.cancel(reg.id()));
        assert!(!authority.cancel(reg.id()));
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_all_survives_panicking_handler() {
        let authority = running();
        let a = Arc::new(Counter(AtomicUsize::new(0)));
        let b = Arc::new(Counter(AtomicUsize::new(0)));
        let _ra = authority.register(a.clone()).unwrap();
        let _rx = authority.register(Arc::new(Exploding)).unwrap();
        let _rb = authority.register(b.clone()).unwrap();

        assert_eq!(authority.cancel_all(), 2);
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
        assert_eq!(authority.registered(), 0);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let authority = running();
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let _reg = authority.register(target.clone()).unwrap();

        assert_eq!(authority.on_lifecycle(LifecycleEvent::Paused), 0);
        assert_eq!(authority.registered(), 1);

        assert_eq!(authority.on_lifecycle(LifecycleEvent::SessionEnding), 1);
        assert_eq!(authority.state(), LifecycleState::Closed);
        assert!(authority.register(target.clone()).is_err());

        authority.on_lifecycle(LifecycleEvent::SessionStarted);
        assert_eq!(authority.state(), LifecycleState::Running);
        assert!(authority.register(target).is_ok());
    }

    #[test]
    fn test_invalidating_events() {
        assert!(LifecycleEvent::ModeChanging.invalidates_in_flight());
        assert!(LifecycleEvent::SessionEnding.invalidates_in_flight());
        assert!(!LifecycleEvent::Paused.invalidates_in_flight());
        assert!(!LifecycleEvent::SessionStarted.invalidates_in_flight());
    }
}
