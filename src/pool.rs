//! Pooled service instances
//!
//! A [`Pool`] keeps a bounded list of instances and leases them out under
//! lock. Transient pools hand any free slot to any caller; scoped pools bind
//! a slot to one scope until that scope is disposed.
//!
//! All slot-list reads and writes happen under one pool-wide mutex. Instance
//! construction happens outside it: a slot is reserved first, then filled.

use crate::scope::ScopeId;
use crate::storage::{AnyInstance, erased_addr};
use crate::{DiError, Injectable, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Interval between availability checks while waiting for a free slot
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How slots are shared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolMode {
    /// Any free slot goes to any caller; released slots are reused
    Transient,
    /// One slot per scope, held until the scope is disposed
    Scoped,
}

/// Pool configuration
///
/// # Examples
///
/// ```rust
/// use service_container::PoolOptions;
/// use std::time::Duration;
///
/// let options = PoolOptions::default()
///     .max_size(4)
///     .wait_available(Duration::from_millis(250))
///     .exceed_limit_when_wait_timeout(true);
///
/// assert_eq!(options.max_size, 4);
/// assert_eq!(options.max_lock_duration, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum number of slots
    pub max_size: usize,
    /// A transient lease older than this is treated as released
    pub max_lock_duration: Duration,
    /// Create a slot beyond `max_size` when the wait times out
    pub exceed_limit_when_wait_timeout: bool,
    /// How long to wait for a free slot at capacity; zero fails immediately
    pub wait_available: Duration,
    /// Evict free slots unused for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 128,
            max_lock_duration: Duration::from_secs(60),
            exceed_limit_when_wait_timeout: false,
            wait_available: Duration::ZERO,
            idle_timeout: None,
        }
    }
}

impl PoolOptions {
    /// Set the maximum number of slots
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the maximum lock duration for transient leases
    pub fn max_lock_duration(mut self, duration: Duration) -> Self {
        self.max_lock_duration = duration;
        self
    }

    /// Allow growing past `max_size` after a wait times out
    pub fn exceed_limit_when_wait_timeout(mut self, exceed: bool) -> Self {
        self.exceed_limit_when_wait_timeout = exceed;
        self
    }

    /// Set how long to wait for a free slot
    pub fn wait_available(mut self, duration: Duration) -> Self {
        self.wait_available = duration;
        self
    }

    /// Enable idle eviction
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }
}

/// Snapshot of a pool's occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Slots currently in the pool, including ones being filled
    pub slots: usize,
    /// Slots currently leased or owned by a scope
    pub locked: usize,
}

/// A leased slot
#[derive(Clone)]
pub struct PoolLease {
    slot: u64,
    generation: u64,
    instance: AnyInstance,
}

impl PoolLease {
    /// Identifier of the leased slot within its pool
    #[inline]
    pub fn slot(&self) -> u64 {
        self.slot
    }

    #[inline]
    pub(crate) fn instance(&self) -> &AnyInstance {
        &self.instance
    }
}

impl std::fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLease")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

struct PoolSlot {
    id: u64,
    /// `None` while the slot is reserved and its instance is being built
    instance: Option<AnyInstance>,
    addr: usize,
    locked: bool,
    generation: u64,
    lock_expires: Instant,
    owner: Option<ScopeId>,
    idle_deadline: Option<Instant>,
}

impl PoolSlot {
    fn lease(&self) -> Option<PoolLease> {
        self.instance.as_ref().map(|instance| PoolLease {
            slot: self.id,
            generation: self.generation,
            instance: Arc::clone(instance),
        })
    }
}

#[derive(Default)]
struct PoolState {
    slots: Vec<PoolSlot>,
    next_slot: u64,
}

enum Acquire {
    Leased(PoolLease),
    Reserved { slot: u64, generation: u64 },
    Full,
}

/// A bounded set of reusable instances for one contract
pub struct Pool {
    id: u64,
    mode: PoolMode,
    options: PoolOptions,
    contract: &'static str,
    addr_of: fn(&AnyInstance) -> usize,
    state: Arc<Mutex<PoolState>>,
    stopped: Arc<AtomicBool>,
}

impl Pool {
    /// Create a pool for contract `C`
    ///
    /// Spawns the idle sweeper when `idle_timeout` is set.
    pub fn new<C: ?Sized + Injectable>(mode: PoolMode, options: PoolOptions) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let pool = Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            mode,
            options,
            contract: std::any::type_name::<C>(),
            addr_of: erased_addr::<C>,
            state: Arc::new(Mutex::new(PoolState::default())),
            stopped: Arc::new(AtomicBool::new(false)),
        };

        if let Some(idle) = pool.options.idle_timeout {
            pool.spawn_sweeper(idle);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            pool_id = pool.id,
            service = pool.contract,
            mode = ?mode,
            max_size = pool.options.max_size,
            "Created service pool"
        );

        pool
    }

    /// Unique pool identifier
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sharing mode
    #[inline]
    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    /// Configuration
    #[inline]
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Name of the contract the pool serves
    #[inline]
    pub fn contract(&self) -> &'static str {
        self.contract
    }

    /// Current occupancy.
    ///
    /// A transient lease past its maximum lock duration counts as free, since
    /// the next caller may take it over.
    pub fn status(&self) -> PoolStatus {
        let now = Instant::now();
        let state = self.state.lock();
        PoolStatus {
            slots: state.slots.len(),
            locked: state.slots.iter().filter(|s| self.is_held(s, now)).count(),
        }
    }

    #[inline]
    fn is_held(&self, slot: &PoolSlot, now: Instant) -> bool {
        slot.locked
            && (self.mode == PoolMode::Scoped || slot.instance.is_none() || slot.lock_expires > now)
    }

    /// Lease a slot, creating one with `create` if there is room.
    ///
    /// Returns `Ok(None)` when the pool is at capacity and no slot frees up
    /// within `wait_available` (and growing past the limit is not allowed).
    pub(crate) fn get_and_lock(
        &self,
        scope: Option<ScopeId>,
        create: &dyn Fn() -> Result<AnyInstance>,
    ) -> Result<Option<PoolLease>> {
        if self.mode == PoolMode::Scoped && scope.is_none() {
            return Err(DiError::ScopeRequired {
                type_name: self.contract,
            });
        }

        match self.acquire(scope, false) {
            Acquire::Leased(lease) => return Ok(Some(lease)),
            Acquire::Reserved { slot, generation } => {
                return self.fill(slot, generation, create).map(Some);
            }
            Acquire::Full => {}
        }

        if !self.options.wait_available.is_zero() {
            let deadline = Instant::now() + self.options.wait_available;
            while Instant::now() < deadline {
                std::thread::sleep(POLL_INTERVAL);
                match self.acquire(scope, false) {
                    Acquire::Leased(lease) => return Ok(Some(lease)),
                    Acquire::Reserved { slot, generation } => {
                        return self.fill(slot, generation, create).map(Some);
                    }
                    Acquire::Full => {}
                }
            }
        }

        if self.options.exceed_limit_when_wait_timeout {
            if let Acquire::Reserved { slot, generation } = self.acquire(scope, true) {
                return self.fill(slot, generation, create).map(Some);
            }
        }

        #[cfg(feature = "logging")]
        warn!(
            target: "service_container",
            pool_id = self.id,
            service = self.contract,
            max_size = self.options.max_size,
            "Pool exhausted"
        );

        Ok(None)
    }

    /// Take a free slot or reserve a new one, under the pool lock
    fn acquire(&self, scope: Option<ScopeId>, exceed: bool) -> Acquire {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(lease) = self.take_available(&mut state.slots, scope, now) {
            return Acquire::Leased(lease);
        }

        if !exceed && state.slots.len() >= self.options.max_size {
            return Acquire::Full;
        }

        let id = state.next_slot;
        state.next_slot += 1;
        state.slots.push(PoolSlot {
            id,
            instance: None,
            addr: 0,
            locked: true,
            generation: 1,
            lock_expires: now + self.options.max_lock_duration,
            owner: self.owner_for(scope),
            idle_deadline: self.idle_deadline(now),
        });
        Acquire::Reserved {
            slot: id,
            generation: 1,
        }
    }

    fn take_available(
        &self,
        slots: &mut [PoolSlot],
        scope: Option<ScopeId>,
        now: Instant,
    ) -> Option<PoolLease> {
        let idle_deadline = self.idle_deadline(now);

        if self.mode == PoolMode::Scoped {
            if let Some(owned) = slots
                .iter_mut()
                .find(|s| s.owner.is_some() && s.owner == scope && s.instance.is_some())
            {
                owned.idle_deadline = idle_deadline;
                return owned.lease();
            }
        }

        let free = slots.iter_mut().find(|s| {
            s.instance.is_some()
                && s.owner.is_none()
                && (!s.locked || (self.mode == PoolMode::Transient && s.lock_expires <= now))
        })?;
        free.locked = true;
        free.generation += 1;
        free.lock_expires = now + self.options.max_lock_duration;
        free.owner = self.owner_for(scope);
        free.idle_deadline = idle_deadline;

        #[cfg(feature = "logging")]
        trace!(
            target: "service_container",
            pool_id = self.id,
            slot = free.id,
            "Reusing pooled instance"
        );

        free.lease()
    }

    /// Build the instance for a reserved slot, outside the pool lock
    fn fill(
        &self,
        slot: u64,
        generation: u64,
        create: &dyn Fn() -> Result<AnyInstance>,
    ) -> Result<PoolLease> {
        let created = create();
        let mut state = self.state.lock();

        let instance = match created {
            Ok(instance) => instance,
            Err(e) => {
                state.slots.retain(|s| s.id != slot);
                return Err(e);
            }
        };

        let entry = state
            .slots
            .iter_mut()
            .find(|s| s.id == slot)
            .ok_or_else(|| DiError::Internal(format!("pool slot {slot} vanished while filling")))?;
        entry.addr = (self.addr_of)(&instance);
        entry.instance = Some(Arc::clone(&instance));

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            pool_id = self.id,
            slot = slot,
            slots = state.slots.len(),
            "Created pooled instance"
        );

        Ok(PoolLease {
            slot,
            generation,
            instance,
        })
    }

    /// Return a leased slot to the pool.
    ///
    /// A lease whose slot has since been re-leased is ignored.
    pub fn release(&self, lease: &PoolLease) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let Some(slot) = state
            .slots
            .iter_mut()
            .find(|s| s.id == lease.slot && s.generation == lease.generation)
        else {
            return false;
        };
        let was_locked = slot.locked;
        slot.locked = false;
        slot.owner = None;
        slot.idle_deadline = self.idle_deadline(now);
        was_locked
    }

    /// Release whichever locked slot holds the instance at `addr`
    pub fn release_instance(&self, addr: usize) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let Some(slot) = state
            .slots
            .iter_mut()
            .find(|s| s.locked && s.instance.is_some() && s.addr == addr)
        else {
            return false;
        };
        slot.locked = false;
        slot.owner = None;
        slot.idle_deadline = self.idle_deadline(now);
        true
    }

    #[inline]
    fn owner_for(&self, scope: Option<ScopeId>) -> Option<ScopeId> {
        match self.mode {
            PoolMode::Scoped => scope,
            PoolMode::Transient => None,
        }
    }

    #[inline]
    fn idle_deadline(&self, now: Instant) -> Option<Instant> {
        self.options.idle_timeout.map(|idle| now + idle)
    }

    fn spawn_sweeper(&self, idle: Duration) {
        let state = Arc::downgrade(&self.state);
        let stopped = Arc::clone(&self.stopped);
        let interval = (idle / 2).clamp(POLL_INTERVAL, Duration::from_secs(1));
        let pool_id = self.id;

        let spawned = std::thread::Builder::new()
            .name(format!("pool-sweeper-{pool_id}"))
            .spawn(move || sweep_loop(state, stopped, interval, pool_id));

        if let Err(_e) = spawned {
            #[cfg(feature = "logging")]
            warn!(
                target: "service_container",
                pool_id = pool_id,
                error = %_e,
                "Could not start idle sweeper; idle slots will not be evicted"
            );
        }
    }
}

fn sweep_loop(state: Weak<Mutex<PoolState>>, stopped: Arc<AtomicBool>, interval: Duration, _pool_id: u64) {
    loop {
        std::thread::sleep(interval);
        if stopped.load(Ordering::Acquire) {
            return;
        }
        let Some(state) = state.upgrade() else {
            return;
        };
        let _evicted = evict_idle(&mut state.lock().slots, Instant::now());

        #[cfg(feature = "logging")]
        if _evicted > 0 {
            debug!(
                target: "service_container",
                pool_id = _pool_id,
                evicted = _evicted,
                "Evicted idle pooled instances"
            );
        }
    }
}

/// Remove free slots past their idle deadline; locked or owned slots stay
fn evict_idle(slots: &mut Vec<PoolSlot>, now: Instant) -> usize {
    let before = slots.len();
    slots.retain(|s| {
        s.locked
            || s.owner.is_some()
            || s.instance.is_none()
            || s.idle_deadline.is_none_or(|deadline| deadline > now)
    });
    before - slots.len()
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("service", &self.contract)
            .field("mode", &self.mode)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{downcast, erase};
    use std::sync::atomic::AtomicUsize;

    struct Conn(usize);

    fn counter_factory(counter: &AtomicUsize) -> impl Fn() -> Result<AnyInstance> + '_ {
        move || Ok(erase(Arc::new(Conn(counter.fetch_add(1, Ordering::SeqCst)))))
    }

    fn conn(lease: &PoolLease) -> usize {
        downcast::<Conn>(lease.instance()).unwrap().0
    }

    #[test]
    fn test_transient_leases_are_distinct_until_full() {
        let pool = Pool::new::<Conn>(PoolMode::Transient, PoolOptions::default().max_size(3));
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);

        let leases: Vec<_> = (0..3)
            .map(|_| pool.get_and_lock(None, &create).unwrap().unwrap())
            .collect();
        let mut ids: Vec<_> = leases.iter().map(conn).collect();
        ids.dedup();
        assert_eq!(ids.len(), 3);

        assert!(pool.get_and_lock(None, &create).unwrap().is_none());
        assert_eq!(pool.status(), PoolStatus { slots: 3, locked: 3 });
    }

    #[test]
    fn test_release_makes_slot_reusable() {
        let pool = Pool::new::<Conn>(PoolMode::Transient, PoolOptions::default().max_size(1));
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);

        let first = pool.get_and_lock(None, &create).unwrap().unwrap();
        assert!(pool.release(&first));

        let second = pool.get_and_lock(None, &create).unwrap().unwrap();
        assert_eq!(conn(&first), conn(&second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The first lease is stale now
        assert!(!pool.release(&first));
        assert_eq!(pool.status().locked, 1);
    }

    #[test]
    fn test_release_instance_by_address() {
        let pool = Pool::new::<Conn>(PoolMode::Transient, PoolOptions::default().max_size(1));
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);

        let lease = pool.get_and_lock(None, &create).unwrap().unwrap();
        let instance = downcast::<Conn>(lease.instance()).unwrap();
        assert!(pool.release_instance(crate::storage::instance_addr(&instance)));
        assert_eq!(pool.status().locked, 0);
    }

    #[test]
    fn test_expired_lock_is_reclaimed() {
        let options = PoolOptions::default()
            .max_size(1)
            .max_lock_duration(Duration::from_millis(10));
        let pool = Pool::new::<Conn>(PoolMode::Transient, options);
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);

        let _held = pool.get_and_lock(None, &create).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(pool.get_and_lock(None, &create).unwrap().is_some());
    }

    #[test]
    fn test_status_ignores_expired_transient_locks() {
        let options = PoolOptions::default()
            .max_size(2)
            .max_lock_duration(Duration::from_millis(10));
        let pool = Pool::new::<Conn>(PoolMode::Transient, options);
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);

        let _held = pool.get_and_lock(None, &create).unwrap().unwrap();
        assert_eq!(pool.status(), PoolStatus { slots: 1, locked: 1 });

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(pool.status(), PoolStatus { slots: 1, locked: 0 });
    }

    #[test]
    fn test_status_keeps_scoped_slots_locked() {
        let options = PoolOptions::default().max_lock_duration(Duration::from_millis(10));
        let pool = Pool::new::<Conn>(PoolMode::Scoped, options);
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);

        let _owned = pool.get_and_lock(Some(ScopeId::next()), &create).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(pool.status().locked, 1);
    }

    #[test]
    fn test_scoped_pool_requires_scope() {
        let pool = Pool::new::<Conn>(PoolMode::Scoped, PoolOptions::default());
        let counter = AtomicUsize::new(0);
        let err = pool.get_and_lock(None, &counter_factory(&counter)).err().unwrap();
        assert!(matches!(err, DiError::ScopeRequired { .. }));
    }

    #[test]
    fn test_scoped_pool_binds_slot_to_scope() {
        let pool = Pool::new::<Conn>(PoolMode::Scoped, PoolOptions::default());
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);
        let (a, b) = (ScopeId::next(), ScopeId::next());

        let first = pool.get_and_lock(Some(a), &create).unwrap().unwrap();
        let again = pool.get_and_lock(Some(a), &create).unwrap().unwrap();
        let other = pool.get_and_lock(Some(b), &create).unwrap().unwrap();

        assert_eq!(conn(&first), conn(&again));
        assert_ne!(conn(&first), conn(&other));

        // Once released, another scope takes over the slot
        pool.release(&first);
        let c = ScopeId::next();
        let reused = pool.get_and_lock(Some(c), &create).unwrap().unwrap();
        assert_eq!(conn(&reused), conn(&first));
    }

    #[test]
    fn test_failed_creation_frees_reservation() {
        let pool = Pool::new::<Conn>(PoolMode::Transient, PoolOptions::default().max_size(1));
        let failing = || -> Result<AnyInstance> { Err(DiError::creation_failed::<Conn>("refused")) };
        assert!(pool.get_and_lock(None, &failing).is_err());
        assert_eq!(pool.status().slots, 0);
    }

    #[test]
    fn test_wait_then_get() {
        let options = PoolOptions::default()
            .max_size(1)
            .wait_available(Duration::from_millis(500));
        let pool = Arc::new(Pool::new::<Conn>(PoolMode::Transient, options));
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);

        let lease = pool.get_and_lock(None, &create).unwrap().unwrap();
        let releaser = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                pool.release(&lease);
            })
        };

        let started = Instant::now();
        let next = pool.get_and_lock(None, &create).unwrap();
        let waited = started.elapsed();
        releaser.join().unwrap();

        assert!(next.is_some());
        assert!(waited >= Duration::from_millis(45));
        assert!(waited < Duration::from_millis(400));
    }

    #[test]
    fn test_wait_timeout() {
        let options = PoolOptions::default()
            .max_size(1)
            .wait_available(Duration::from_millis(60));
        let pool = Pool::new::<Conn>(PoolMode::Transient, options);
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);

        let _held = pool.get_and_lock(None, &create).unwrap().unwrap();
        let started = Instant::now();
        assert!(pool.get_and_lock(None, &create).unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_exceed_after_timeout() {
        let options = PoolOptions::default()
            .max_size(1)
            .wait_available(Duration::from_millis(10))
            .exceed_limit_when_wait_timeout(true);
        let pool = Pool::new::<Conn>(PoolMode::Transient, options);
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);

        let _held = pool.get_and_lock(None, &create).unwrap().unwrap();
        assert!(pool.get_and_lock(None, &create).unwrap().is_some());
        assert_eq!(pool.status().slots, 2);
    }

    #[test]
    fn test_idle_eviction_skips_locked_and_owned() {
        let pool = Pool::new::<Conn>(
            PoolMode::Scoped,
            PoolOptions::default().idle_timeout(Duration::from_millis(20)),
        );
        let counter = AtomicUsize::new(0);
        let create = counter_factory(&counter);

        let owned = pool.get_and_lock(Some(ScopeId::next()), &create).unwrap().unwrap();
        let released = pool.get_and_lock(Some(ScopeId::next()), &create).unwrap().unwrap();
        pool.release(&released);

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(pool.status(), PoolStatus { slots: 1, locked: 1 });
        assert!(!pool.release(&released));
        assert!(pool.release(&owned));
    }

    #[test]
    fn test_evict_idle_direct() {
        let now = Instant::now();
        let slot = |id, locked, deadline| PoolSlot {
            id,
            instance: Some(erase(Arc::new(Conn(id as usize)))),
            addr: 0,
            locked,
            generation: 1,
            lock_expires: now,
            owner: None,
            idle_deadline: deadline,
        };
        let mut slots = vec![
            slot(0, false, Some(now - Duration::from_millis(1))),
            slot(1, true, Some(now - Duration::from_millis(1))),
            slot(2, false, Some(now + Duration::from_secs(5))),
            slot(3, false, None),
        ];
        assert_eq!(evict_idle(&mut slots, now), 1);
        assert!(slots.iter().all(|s| s.id != 0));
    }
}
