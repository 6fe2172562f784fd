//! The host-facing bridge
//!
//! A `Bridge` is created on the host's stepping thread, which becomes its
//! affinity thread. Any thread may spawn work on it; the host calls
//! `pump_one_tick` once per frame to drain cross-thread requests and advance
//! every active driver by one step.

use crate::background::BackgroundPool;
use crate::cancel::{CancellationAuthority, LifecycleEvent, SlotCanceler};
use crate::config::BridgeConfig;
use crate::driver::{Drive, DriveState, ExtractionTable, StepDriver};
use crate::error::{BridgeError, BridgeResult};
use crate::scheduler::{AffinityScheduler, ContinuationRouter};
use crate::slot::{Completion, SlotHandle, SlotId, SlotPool};
use crate::trace::{OwnerTrace, TraceBuilder};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tickbridge_sdk::{ProducerKind, StepError, StepSequence, Wait};

type DriverTable = Arc<Mutex<Vec<Box<dyn Drive>>>>;

/// What one call to `pump_one_tick` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1
    pub tick: u64,
    /// Affinity callbacks run by the drain
    pub drained: usize,
    /// Suspension points handed to the host, in driver order
    pub surfaced: Vec<(SlotId, Wait)>,
    /// Drivers that finished during this tick
    pub completed: usize,
    /// Drivers still active after this tick
    pub active: usize,
}

/// Per-result-type state
struct TypedState<T> {
    pool: SlotPool<T>,
    extraction: RwLock<Arc<ExtractionTable<T>>>,
}

struct BridgeShared {
    config: BridgeConfig,
    scheduler: Arc<AffinityScheduler>,
    router: ContinuationRouter,
    authority: CancellationAuthority,
    tracer: TraceBuilder,
    drivers: DriverTable,
    typed: Mutex<FxHashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    background: Mutex<Option<Arc<BackgroundPool>>>,
    pumping: AtomicBool,
    shut_down: AtomicBool,
    ticks: AtomicU64,
}

/// Bridge between tick-driven stepping and thread-safe futures
///
/// Cloning is cheap; clones share the same bridge.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<BridgeShared>,
}

/// Clears the pumping flag even if a tick unwinds
struct PumpGuard<'a>(&'a AtomicBool);

impl Drop for PumpGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Bridge {
    /// Create a bridge whose affinity thread is the calling thread
    ///
    /// Starts a cancellation session.
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let scheduler = Arc::new(AffinityScheduler::new(config.drain_limit));
        let router = ContinuationRouter::new(scheduler.clone());
        let authority = CancellationAuthority::new();
        authority.begin_session();

        tracing::info!(
            pool_capacity = config.pool_capacity,
            drain_limit = ?config.drain_limit,
            "bridge created"
        );

        Ok(Self {
            shared: Arc::new(BridgeShared {
                tracer: TraceBuilder::new(config.trace_max_depth),
                config,
                scheduler,
                router,
                authority,
                drivers: Arc::new(Mutex::new(Vec::new())),
                typed: Mutex::new(FxHashMap::default()),
                background: Mutex::new(None),
                pumping: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                ticks: AtomicU64::new(0),
            }),
        })
    }

    /// Create a bridge with the default configuration
    pub fn with_defaults() -> BridgeResult<Self> {
        Self::new(BridgeConfig::default())
    }

    fn typed<T: Send + 'static>(&self) -> Arc<TypedState<T>> {
        let shared = &self.shared;
        let mut typed = shared.typed.lock();
        let entry = typed.entry(TypeId::of::<T>()).or_insert_with(|| {
            Box::new(Arc::new(TypedState {
                pool: SlotPool::<T>::new(shared.config.pool_capacity, shared.router.clone()),
                extraction: RwLock::new(Arc::new(ExtractionTable::new())),
            }))
        });
        match entry.downcast_ref::<Arc<TypedState<T>>>() {
            Some(state) => state.clone(),
            None => unreachable!("typed state is keyed by its own TypeId"),
        }
    }

    fn ensure_running(&self) -> BridgeResult<()> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(BridgeError::ShutDown);
        }
        Ok(())
    }

    /// The slot pool for result type `T`
    pub fn pool<T: Send + 'static>(&self) -> SlotPool<T> {
        self.typed::<T>().pool.clone()
    }

    /// Register the result-extraction rule for a producer kind
    ///
    /// Applies to operations spawned after the call.
    pub fn register_extractor<T, F>(&self, kind: ProducerKind, rule: F)
    where
        T: Send + 'static,
        F: Fn(&mut dyn StepSequence<T>, Option<T>) -> Result<Option<T>, StepError>
            + Send
            + Sync
            + 'static,
    {
        let typed = self.typed::<T>();
        let mut table = typed.extraction.write();
        let mut updated = ExtractionTable::clone(&table);
        updated.register(kind, rule);
        *table = Arc::new(updated);
        tracing::debug!(%kind, "registered result extractor");
    }

    /// Register a fresh rental with the session's cancellation authority
    ///
    /// If the registry refuses the registration the slot is canceled at once
    /// and `false` is returned.
    fn register_for_cancellation<T: Send + 'static>(&self, handle: &SlotHandle<T>) -> bool {
        let canceler = Arc::new(SlotCanceler::new(handle.slot(), handle.version()));
        match self.shared.authority.register(canceler) {
            Ok(registration) => {
                let slot = handle.slot();
                // Hands the registration back if the slot already finished
                drop(slot.attach_registration(handle.version(), registration));
                true
            }
            Err(err) => {
                tracing::warn!(
                    slot = %handle.id(),
                    error = %err,
                    "registration refused; canceling"
                );
                handle.slot().cancel(handle.version());
                false
            }
        }
    }

    /// Run a step sequence to completion on the affinity thread
    ///
    /// Callable from any thread. The driver joins the next tick (or the current
    /// one's drain when spawned from another thread before it starts).
    pub fn spawn<T, S>(&self, sequence: S) -> BridgeResult<SlotHandle<T>>
    where
        T: Send + 'static,
        S: StepSequence<T> + 'static,
    {
        self.ensure_running()?;
        let typed = self.typed::<T>();
        let handle = typed.pool.rent();
        if !self.register_for_cancellation(&handle) {
            return Ok(handle);
        }

        let extraction = typed.extraction.read().clone();
        let driver: Box<dyn Drive> = Box::new(StepDriver::new(
            &handle,
            Box::new(sequence),
            extraction,
            self.shared.tracer,
        ));
        tracing::debug!(slot = %handle.id(), "spawned step sequence");

        let drivers = self.shared.drivers.clone();
        self.shared
            .scheduler
            .run_on_affinity(move || drivers.lock().push(driver));
        Ok(handle)
    }

    /// Run a blocking closure on a background worker
    ///
    /// The worker completes the slot: `Ok(v)` succeeds with `v`, an error or a
    /// panic faults the slot.
    pub fn spawn_blocking<T, F>(&self, job: F) -> BridgeResult<SlotHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StepError> + Send + 'static,
    {
        self.ensure_running()?;
        let background = self.background()?;
        let handle = self.typed::<T>().pool.rent();
        if !self.register_for_cancellation(&handle) {
            return Ok(handle);
        }

        let slot = handle.slot().clone();
        let version = handle.version();
        let submitted = background.submit(Box::new(move || {
            if !slot.is_live(version) {
                return;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(job))
                .unwrap_or_else(|payload| Err(StepError::from_panic(payload.as_ref())));
            let completion = match outcome {
                Ok(value) => Completion::Succeeded(Some(value)),
                Err(source) => Completion::Faulted(BridgeError::StepFailure {
                    trace: OwnerTrace::default(),
                    source,
                }),
            };
            slot.latch(version, completion);
        }));

        if let Err(err) = submitted {
            handle.slot().cancel(handle.version());
            return Err(err);
        }
        tracing::debug!(slot = %handle.id(), "spawned background job");
        Ok(handle)
    }

    fn background(&self) -> BridgeResult<Arc<BackgroundPool>> {
        let mut background = self.shared.background.lock();
        if let Some(pool) = background.as_ref() {
            return Ok(pool.clone());
        }
        let pool = Arc::new(BackgroundPool::start(
            self.shared.config.effective_background_workers(),
        )?);
        *background = Some(pool.clone());
        Ok(pool)
    }

    /// Run `callback` on the affinity thread
    pub fn run_on_affinity<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.scheduler.run_on_affinity(callback);
    }

    /// Drain cross-thread requests, then advance every driver once
    ///
    /// Must be called on the affinity thread, and not from inside a tick.
    pub fn pump_one_tick(&self) -> BridgeResult<TickReport> {
        let shared = &self.shared;
        if !shared.scheduler.is_affinity_thread() {
            return Err(BridgeError::NotAffinityThread);
        }
        if shared
            .pumping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BridgeError::ReentrantPump);
        }
        let _guard = PumpGuard(&shared.pumping);

        let tick = shared.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let drained = shared.scheduler.drain()?;

        // Continuations run during the ticks below may spawn; new drivers land
        // in the emptied table and are merged back after the existing ones.
        let mut drivers = std::mem::take(&mut *shared.drivers.lock());
        let mut surfaced = Vec::new();
        let before = drivers.len();

        drivers.retain_mut(|driver| match driver.tick() {
            DriveState::Suspended(wait) => {
                surfaced.push((driver.slot_id(), wait));
                true
            }
            DriveState::Finished => false,
        });
        let completed = before - drivers.len();

        let active = {
            let mut table = shared.drivers.lock();
            let added = std::mem::replace(&mut *table, drivers);
            table.extend(added);
            table.len()
        };

        tracing::trace!(tick, drained, completed, active, "tick complete");
        Ok(TickReport {
            tick,
            drained,
            surfaced,
            completed,
            active,
        })
    }

    /// React to a host lifecycle transition
    ///
    /// Returns the number of operations it canceled.
    pub fn on_host_lifecycle_transition(&self, event: LifecycleEvent) -> usize {
        self.shared.authority.on_lifecycle(event)
    }

    /// End the session: cancel everything pending and stop background workers
    ///
    /// Canceled host-affine continuations still need a final `pump_one_tick`
    /// to run. Later spawns fail with `ShutDown`.
    pub fn shutdown(&self) -> usize {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let canceled = self.shared.authority.end_session();
        let background = self.shared.background.lock().take();
        if let Some(background) = background {
            background.shutdown();
        }
        tracing::info!(canceled, "bridge shut down");
        canceled
    }

    /// Whether `shutdown` was called
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Active configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// The affinity scheduler
    pub fn scheduler(&self) -> &Arc<AffinityScheduler> {
        &self.shared.scheduler
    }

    /// The cancellation authority of this bridge's session
    pub fn authority(&self) -> &CancellationAuthority {
        &self.shared.authority
    }

    /// Ticks pumped so far
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    /// Drivers waiting in the table (excludes ones mid-tick)
    pub fn active_drivers(&self) -> usize {
        self.shared.drivers.lock().len()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.shared.config)
            .field("ticks", &self.tick_count())
            .field("active_drivers", &self.active_drivers())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RunPolicy;
    use crate::slot::SlotStatus;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use tickbridge_sdk::{once, steps, Step, StepSequenceExt};

    fn bridge() -> Bridge {
        Bridge::new(BridgeConfig::default().with_background_workers(1)).unwrap()
    }

    #[test]
    fn test_pump_off_affinity_thread() {
        let bridge = bridge();
        let b = bridge.clone();
        let result = thread::spawn(move || b.pump_one_tick()).join().unwrap();
        assert!(matches!(result, Err(BridgeError::NotAffinityThread)));
    }

    #[test]
    fn test_reentrant_pump_rejected() {
        let bridge = bridge();
        let seen = Arc::new(Mutex::new(None));

        let b = bridge.clone();
        let s = seen.clone();
        let handle = bridge.spawn(once::<()>(Wait::NextFrame)).unwrap();
        handle
            .register_continuation(
                move |_: ()| {
                    *s.lock() = Some(b.pump_one_tick().map(|_| ()));
                },
                (),
                RunPolicy::HostAffine,
            )
            .unwrap();

        bridge.pump_one_tick().unwrap();
        bridge.pump_one_tick().unwrap();
        assert!(matches!(
            *seen.lock(),
            Some(Err(BridgeError::ReentrantPump))
        ));
    }

    #[test]
    fn test_spawn_during_tick_joins_next_tick() {
        let bridge = bridge();
        let b = bridge.clone();
        let spawned = Arc::new(Mutex::new(None));
        let s = spawned.clone();

        let first = bridge.spawn(steps::<_, u8>(Vec::new(), Some(1))).unwrap();
        first
            .register_continuation(
                move |_: ()| {
                    *s.lock() = Some(b.spawn(once::<u8>(Wait::EndOfFrame)).unwrap());
                },
                (),
                RunPolicy::HostAffine,
            )
            .unwrap();

        let report = bridge.pump_one_tick().unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.active, 1);

        let second = spawned.lock().take().unwrap();
        let report = bridge.pump_one_tick().unwrap();
        assert_eq!(report.surfaced, vec![(second.id(), Wait::EndOfFrame)]);
    }

    #[test]
    fn test_extractor_applies_to_new_spawns() {
        const KIND: ProducerKind = ProducerKind::new("constant");
        let bridge = bridge();
        bridge.register_extractor::<u32, _>(KIND, |_, _| Ok(Some(77)));

        let handle = bridge
            .spawn(steps(vec![Step::Value(1u32)], None).with_kind(KIND))
            .unwrap();
        bridge.pump_one_tick().unwrap();
        bridge.pump_one_tick().unwrap();
        assert_eq!(handle.take_result().unwrap(), Some(77));
    }

    #[test]
    fn test_spawn_blocking_completes_off_thread() {
        let bridge = bridge();
        let handle = bridge
            .spawn_blocking(|| Ok(thread::current().name().map(str::to_owned)))
            .unwrap();
        assert_eq!(handle.wait(), SlotStatus::Succeeded);
        let name = handle.take_result().unwrap().flatten().unwrap();
        assert!(name.starts_with("tickbridge-bg-"));
    }

    #[test]
    fn test_spawn_blocking_failure_faults() {
        let bridge = bridge();
        let handle = bridge
            .spawn_blocking::<(), _>(|| Err(StepError::failed("disk full")))
            .unwrap();
        assert_eq!(handle.wait(), SlotStatus::Faulted);
        assert_eq!(handle.take_result().unwrap_err().to_string(), "disk full");
    }

    #[test]
    fn test_shutdown_cancels_and_rejects() {
        let bridge = bridge();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = bridge.spawn(once::<()>(Wait::NextFrame)).unwrap();
        let f = fired.clone();
        handle
            .register_continuation(
                move |_: ()| {
                    f.fetch_add(1, Ordering::SeqCst);
                },
                (),
                RunPolicy::HostAffine,
            )
            .unwrap();

        assert_eq!(bridge.shutdown(), 1);
        assert_eq!(bridge.shutdown(), 0);
        assert_eq!(handle.status(), SlotStatus::Canceled);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(matches!(
            bridge.spawn(once::<()>(Wait::NextFrame)),
            Err(BridgeError::ShutDown)
        ));

        // The abandoned driver is dropped on the next tick
        let report = bridge.pump_one_tick().unwrap();
        assert_eq!(report.active, 0);
        assert!(report.surfaced.is_empty());
    }

    #[test]
    fn test_refused_registration_cancels_slot() {
        let bridge = bridge();
        bridge.authority().end_session();
        let handle = bridge.spawn(once::<()>(Wait::NextFrame)).unwrap();
        assert_eq!(handle.status(), SlotStatus::Canceled);
        assert_eq!(bridge.active_drivers(), 0);
    }
}
