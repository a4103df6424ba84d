//! Per-client cached view of remote metadata.
//!
//! Every logical map has its own lock so that workers compiling for the
//! same client only contend on the category they touch. Remote fetches are
//! never made while one of these locks is held.
//!
//! Lock order: the class map is always taken first. Every other map may be
//! locked while holding it, one at a time, but never the other way round.
//! This makes unloading a class atomic with respect to lookups and to
//! fetches racing the unload.

use ahash::{AHashMap, AHashSet};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rjit_config::{GapRecovery, SequencerConfig};
use rjit_metrics::{SessionStats, SessionStatsSnapshot};
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::codec::{ClassFieldValue, ClassInfoField, UnpackedClass};
use crate::descriptor::{ClassDescriptor, ClassLoaderNamePair, HierarchyEntry, MethodDescriptor};
use crate::error::CodecError;
use crate::ids::{ClassId, ClientId, MethodId};
use crate::profile::{ProfileEntry, ProfileLookup};
use crate::sequencer::{Admission, FIRST_SEQ_NO, Sequencer};
use crate::unloaded::UnloadedAddressSet;
use crate::vm_info::VmInfo;

pub struct ClientSession {
    client_id: ClientId,

    in_use: AtomicUsize,
    num_active_threads: AtomicUsize,
    marked_for_deletion: AtomicBool,
    last_access: Mutex<Instant>,

    vm_info: OnceCell<Arc<VmInfo>>,
    java_lang_class: Mutex<Option<ClassId>>,
    rt_resolve: AtomicBool,
    request_unloaded_classes: AtomicBool,

    classes: Mutex<AHashMap<ClassId, ClassDescriptor>>,
    unloaded: Mutex<UnloadedAddressSet>,
    methods: Mutex<AHashMap<MethodId, MethodDescriptor>>,
    hierarchy: Mutex<AHashMap<ClassId, HierarchyEntry>>,
    class_by_name: Mutex<AHashMap<ClassLoaderNamePair, ClassId>>,
    class_chains: Mutex<AHashMap<ClassId, Arc<[u64]>>>,
    constant_pools: Mutex<AHashMap<u64, ClassId>>,
    static_finals: Mutex<AHashMap<u64, u64>>,

    sequencer: Sequencer,
    gap_recovery: GapRecovery,
    stats: SessionStats,
}

impl ClientSession {
    pub fn new(client_id: ClientId, config: &SequencerConfig) -> Self {
        Self::starting_at(client_id, FIRST_SEQ_NO, config)
    }

    /// A session whose first admissible request is `seq_no`
    pub fn starting_at(client_id: ClientId, seq_no: u32, config: &SequencerConfig) -> Self {
        Self {
            client_id,
            in_use: AtomicUsize::new(0),
            num_active_threads: AtomicUsize::new(0),
            marked_for_deletion: AtomicBool::new(false),
            last_access: Mutex::new(Instant::now()),
            vm_info: OnceCell::new(),
            java_lang_class: Mutex::new(None),
            rt_resolve: AtomicBool::new(false),
            request_unloaded_classes: AtomicBool::new(false),
            classes: Mutex::new(AHashMap::new()),
            unloaded: Mutex::new(UnloadedAddressSet::new()),
            methods: Mutex::new(AHashMap::new()),
            hierarchy: Mutex::new(AHashMap::new()),
            class_by_name: Mutex::new(AHashMap::new()),
            class_chains: Mutex::new(AHashMap::new()),
            constant_pools: Mutex::new(AHashMap::new()),
            static_finals: Mutex::new(AHashMap::new()),
            sequencer: Sequencer::starting_at(seq_no, config.wait_timeout()),
            gap_recovery: config.gap_recovery,
            stats: SessionStats::new(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Pin the session for one worker
    pub fn acquire(&self) {
        self.in_use.fetch_add(1, Ordering::AcqRel);
        self.touch();
    }

    /// Unpin the session and return the remaining count.
    ///
    /// # Panics
    ///
    /// Panics when called more often than [`ClientSession::acquire`], which
    /// means the lifetime bookkeeping is broken.
    pub fn release(&self) -> usize {
        match self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => panic!("client session {} released while not in use", self.client_id),
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn num_active_threads(&self) -> usize {
        self.num_active_threads.load(Ordering::Acquire)
    }

    pub fn mark_for_deletion(&self) {
        self.marked_for_deletion.store(true, Ordering::Release);
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.marked_for_deletion.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&self, now: Instant) {
        let mut last = self.last_access.lock();
        if now > *last {
            *last = now;
        }
    }

    pub fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    /// Not accessed for longer than `age` as of `now`
    pub fn is_stale_at(&self, now: Instant, age: Duration) -> bool {
        now.saturating_duration_since(self.last_access()) > age
    }

    /// Wait until request `seq_no` may run. The turn ends when the returned
    /// guard is dropped.
    pub fn enter_turn(&self, seq_no: u32) -> SequencedTurn<'_> {
        let admission = self.sequencer.admit(seq_no);
        let client_id = self.client_id;
        match &admission {
            Admission::InOrder => self.stats.sequencer.record_in_order(),
            Admission::Parked { waited } => {
                debug!(
                    %client_id,
                    seq_no,
                    ?waited,
                    "request resumed after waiting for its predecessor"
                );
                self.stats.sequencer.record_parked(*waited, false);
            }
            Admission::Late { expected } => {
                warn!(
                    %client_id,
                    seq_no,
                    expected,
                    "admitting request behind the expected sequence number"
                );
                self.stats.sequencer.record_late();
            }
            Admission::GapBridged { skipped, waited } => {
                warn!(
                    %client_id,
                    seq_no,
                    skipped_from = skipped.start,
                    skipped_to = skipped.end,
                    ?waited,
                    recovery = self.gap_recovery.name(),
                    "degraded ordering: predecessor never completed, bridging the gap"
                );
                self.stats.sequencer.record_parked(*waited, true);
                if self.gap_recovery.clears_caches() {
                    self.clear_caches();
                }
            }
        }
        self.num_active_threads.fetch_add(1, Ordering::AcqRel);
        SequencedTurn {
            session: self,
            seq_no,
            admission,
        }
    }

    pub fn expected_seq_no(&self) -> u32 {
        self.sequencer.expected_seq_no()
    }

    pub fn max_received_seq_no(&self) -> u32 {
        self.sequencer.max_received_seq_no()
    }

    /// Return the memoized VM info, running `fetch` only if it was never
    /// obtained. Concurrent callers wait for the one fetch in progress.
    pub fn get_or_fetch_vm_info<E>(
        &self,
        fetch: impl FnOnce() -> Result<VmInfo, E>,
    ) -> Result<Arc<VmInfo>, E> {
        self.vm_info
            .get_or_try_init(|| fetch().map(Arc::new))
            .map(Arc::clone)
    }

    pub fn vm_info(&self) -> Option<Arc<VmInfo>> {
        self.vm_info.get().cloned()
    }

    pub fn java_lang_class(&self) -> Option<ClassId> {
        *self.java_lang_class.lock()
    }

    pub fn set_java_lang_class(&self, class: ClassId) {
        self.java_lang_class.lock().get_or_insert(class);
    }

    pub fn rt_resolve(&self) -> bool {
        self.rt_resolve.load(Ordering::Acquire)
    }

    pub fn set_rt_resolve(&self, value: bool) {
        self.rt_resolve.store(value, Ordering::Release);
    }

    /// The session may have missed unload notifications and must ask the
    /// client for its full list before compiling
    pub fn request_unloaded_classes(&self) -> bool {
        self.request_unloaded_classes.load(Ordering::Acquire)
    }

    pub fn set_request_unloaded_classes(&self, value: bool) {
        self.request_unloaded_classes.store(value, Ordering::Release);
    }

    /// Copy of the cached descriptor, or `None` on a miss. Never fetches.
    pub fn get_class_descriptor(&self, class: ClassId) -> Option<ClassDescriptor> {
        let found = self.classes.lock().get(&class).cloned();
        self.stats.classes.record(found.is_some());
        found
    }

    /// Run `f` against the cached descriptor under the class lock
    pub fn with_class<R>(
        &self,
        class: ClassId,
        f: impl FnOnce(&ClassDescriptor) -> R,
    ) -> Option<R> {
        self.classes.lock().get(&class).map(f)
    }

    /// Mutable access to a cached descriptor, mostly for its sub-caches
    pub fn with_class_mut<R>(
        &self,
        class: ClassId,
        f: impl FnOnce(&mut ClassDescriptor) -> R,
    ) -> Option<R> {
        self.classes.lock().get_mut(&class).map(f)
    }

    /// Cached value of `field` if it can be served without asking the client
    pub fn settled_class_field(
        &self,
        class: ClassId,
        field: ClassInfoField,
    ) -> Option<ClassFieldValue> {
        self.classes
            .lock()
            .get(&class)
            .filter(|desc| desc.is_settled(field))
            .and_then(|desc| desc.field(field).cloned())
    }

    /// Cache a descriptor, merging with any partial entry already present.
    /// Returns `false` when the class has been unloaded meanwhile.
    pub fn cache_class_descriptor(&self, class: ClassId, descriptor: ClassDescriptor) -> bool {
        let mut classes = self.classes.lock();
        if self.unloaded.lock().contains_class(class) {
            return false;
        }
        let entry = classes.entry(class).or_default();
        entry.merge(descriptor);
        self.index_class(class, entry);
        true
    }

    /// Cache a bulk-fetched class together with the methods it declares.
    /// Returns `false` when the class has been unloaded meanwhile.
    pub fn cache_class(&self, class: ClassId, unpacked: UnpackedClass) -> bool {
        let UnpackedClass {
            descriptor,
            methods,
        } = unpacked;
        let mut classes = self.classes.lock();
        if self.unloaded.lock().contains_class(class) {
            return false;
        }
        let entry = classes.entry(class).or_default();
        entry.merge(descriptor);
        self.index_class(class, entry);

        let mut cached = self.methods.lock();
        for (method, descriptor) in methods {
            cached.entry(method).or_insert(descriptor);
        }
        true
    }

    /// Cache one incrementally fetched field and return the value now held
    /// by the cache, which is the older one if the field was already set.
    /// Returns `Ok(None)` when the class has been unloaded meanwhile.
    pub fn cache_class_field(
        &self,
        class: ClassId,
        field: ClassInfoField,
        value: ClassFieldValue,
    ) -> Result<Option<ClassFieldValue>, CodecError> {
        let mut classes = self.classes.lock();
        if self.unloaded.lock().contains_class(class) {
            return Ok(None);
        }
        let entry = match classes.entry(class) {
            Entry::Occupied(entry) => {
                let entry = entry.into_mut();
                entry.set_field(field, value)?;
                entry
            }
            Entry::Vacant(slot) => {
                let mut partial = ClassDescriptor::partial();
                partial.set_field(field, value)?;
                slot.insert(partial)
            }
        };
        self.index_class(class, entry);
        Ok(entry.field(field).cloned())
    }

    // Called with the class lock held.
    fn index_class(&self, class: ClassId, descriptor: &ClassDescriptor) {
        if let Some(pool) = descriptor.constant_pool() {
            self.constant_pools.lock().entry(pool).or_insert(class);
        }
        if let (Some(loader), Some(name)) = (descriptor.class_loader(), descriptor.name()) {
            self.class_by_name
                .lock()
                .entry(ClassLoaderNamePair::new(loader, name))
                .or_insert(class);
        }
    }

    pub fn cached_class_count(&self) -> usize {
        self.classes.lock().len()
    }

    pub fn is_class_unloaded(&self, class: ClassId) -> bool {
        self.unloaded.lock().contains_class(class)
    }

    pub fn is_address_unloaded(&self, address: u64) -> bool {
        self.unloaded.lock().contains(address)
    }

    /// Record a half-open address range the client has unloaded, such as
    /// the memory of an anonymous class
    pub fn record_unloaded_range(&self, start: u64, end: u64) {
        let _classes = self.classes.lock();
        self.unloaded.lock().insert_range(start, end);
    }

    /// Purge every trace of `unloaded` from the persistent caches and
    /// remember their addresses. Returns the number of class descriptors
    /// dropped.
    pub fn apply_unloaded_classes(&self, unloaded: &[ClassId]) -> usize {
        if unloaded.is_empty() {
            return 0;
        }
        let doomed: AHashSet<ClassId> = unloaded.iter().copied().collect();
        let mut removed = Vec::with_capacity(doomed.len());
        let mut removed_methods = Vec::new();

        {
            let mut classes = self.classes.lock();
            {
                let mut addresses = self.unloaded.lock();
                for class in &doomed {
                    addresses.insert_class(*class);
                }
            }
            for class in &doomed {
                if let Some(descriptor) = classes.remove(class) {
                    removed.push((*class, descriptor));
                }
            }

            {
                let mut methods = self.methods.lock();
                let owned: Vec<MethodId> = methods
                    .iter()
                    .filter(|(_, method)| doomed.contains(&method.owning_class()))
                    .map(|(id, _)| *id)
                    .collect();
                for id in owned {
                    if let Some(method) = methods.remove(&id) {
                        removed_methods.push(method);
                    }
                }
            }
            {
                let mut by_name = self.class_by_name.lock();
                for (class, descriptor) in &removed {
                    if let (Some(loader), Some(name)) =
                        (descriptor.class_loader(), descriptor.name())
                    {
                        let key = ClassLoaderNamePair::new(loader, name);
                        if by_name.get(&key) == Some(class) {
                            by_name.remove(&key);
                        }
                    }
                }
            }
            {
                let mut pools = self.constant_pools.lock();
                for (class, descriptor) in &removed {
                    if let Some(pool) = descriptor.constant_pool() {
                        if pools.get(&pool) == Some(class) {
                            pools.remove(&pool);
                        }
                    }
                }
            }
            {
                let mut chains = self.class_chains.lock();
                for class in &doomed {
                    chains.remove(class);
                }
            }
            {
                let mut hierarchy = self.hierarchy.lock();
                hierarchy.retain(|class, _| !doomed.contains(class));
                for entry in hierarchy.values_mut() {
                    entry.subclasses.retain(|class| !doomed.contains(class));
                }
            }
        }

        self.stats.record_unloaded(doomed.len());
        debug!(
            client_id = %self.client_id,
            reported = doomed.len(),
            classes = removed.len(),
            methods = removed_methods.len(),
            "applied unloaded classes"
        );
        // Descriptors are released here, after every lock is gone.
        let count = removed.len();
        drop(removed);
        drop(removed_methods);
        count
    }

    pub fn get_method_descriptor(&self, method: MethodId) -> Option<MethodDescriptor> {
        let found = self.methods.lock().get(&method).cloned();
        self.stats.methods.record(found.is_some());
        found
    }

    pub fn with_method<R>(
        &self,
        method: MethodId,
        f: impl FnOnce(&MethodDescriptor) -> R,
    ) -> Option<R> {
        self.methods.lock().get(&method).map(f)
    }

    /// Cache a method descriptor. An entry already present, and with it
    /// its profile table, is kept. Returns `false` if the owning class has
    /// been unloaded.
    pub fn cache_method_descriptor(&self, method: MethodId, descriptor: MethodDescriptor) -> bool {
        let unloaded = self.unloaded.lock();
        if unloaded.contains_class(descriptor.owning_class()) {
            return false;
        }
        self.methods.lock().entry(method).or_insert(descriptor);
        true
    }

    pub fn set_compiled_when_profiling(&self, method: MethodId) -> bool {
        self.methods
            .lock()
            .get_mut(&method)
            .map(|desc| desc.set_compiled_when_profiling(true))
            .is_some()
    }

    pub fn get_cached_profile(&self, method: MethodId, bytecode_index: u32) -> ProfileLookup {
        let lookup = self
            .methods
            .lock()
            .get(&method)
            .map_or(ProfileLookup::MethodUnknown, |desc| desc.profile(bytecode_index));
        self.stats.profiles.record(lookup.entry().is_some());
        lookup
    }

    /// Cache a profile entry for a known method. Returns `false` when the
    /// method is not cached.
    pub fn cache_profile(
        &self,
        method: MethodId,
        bytecode_index: u32,
        entry: Arc<ProfileEntry>,
    ) -> bool {
        self.methods
            .lock()
            .get_mut(&method)
            .map(|desc| desc.cache_profile(bytecode_index, entry))
            .is_some()
    }

    pub fn hierarchy_entry(&self, class: ClassId) -> Option<HierarchyEntry> {
        self.hierarchy.lock().get(&class).cloned()
    }

    pub fn cache_hierarchy_entry(&self, class: ClassId, entry: HierarchyEntry) {
        self.hierarchy.lock().insert(class, entry);
    }

    /// Record `subclass` under `superclass`, creating the entry if needed
    pub fn add_subclass(&self, superclass: ClassId, subclass: ClassId) {
        self.hierarchy
            .lock()
            .entry(superclass)
            .or_default()
            .subclasses
            .insert(subclass);
    }

    pub fn class_by_name(&self, key: &ClassLoaderNamePair) -> Option<ClassId> {
        self.class_by_name.lock().get(key).copied()
    }

    pub fn cache_class_by_name(&self, key: ClassLoaderNamePair, class: ClassId) -> bool {
        let _classes = self.classes.lock();
        if self.unloaded.lock().contains_class(class) {
            return false;
        }
        self.class_by_name.lock().entry(key).or_insert(class);
        true
    }

    pub fn class_of_constant_pool(&self, pool: u64) -> Option<ClassId> {
        self.constant_pools.lock().get(&pool).copied()
    }

    pub fn cache_constant_pool_class(&self, pool: u64, class: ClassId) -> bool {
        let _classes = self.classes.lock();
        if self.unloaded.lock().contains_class(class) {
            return false;
        }
        self.constant_pools.lock().entry(pool).or_insert(class);
        true
    }

    pub fn class_chain(&self, class: ClassId) -> Option<Arc<[u64]>> {
        self.class_chains.lock().get(&class).cloned()
    }

    pub fn cache_class_chain(&self, class: ClassId, chain: impl Into<Arc<[u64]>>) -> bool {
        let _classes = self.classes.lock();
        if self.unloaded.lock().contains_class(class) {
            return false;
        }
        self.class_chains.lock().entry(class).or_insert_with(|| chain.into());
        true
    }

    pub fn static_final_value(&self, address: u64) -> Option<u64> {
        self.static_finals.lock().get(&address).copied()
    }

    pub fn cache_static_final_value(&self, address: u64, value: u64) {
        self.static_finals.lock().entry(address).or_insert(value);
    }

    /// Drop every persistent cache. VM info and the unloaded addresses are
    /// kept; the next request resynchronises the unloaded list.
    pub fn clear_caches(&self) {
        let (classes, methods) = {
            let mut classes = self.classes.lock();
            let methods = std::mem::take(&mut *self.methods.lock());
            self.hierarchy.lock().clear();
            self.class_by_name.lock().clear();
            self.class_chains.lock().clear();
            self.constant_pools.lock().clear();
            self.static_finals.lock().clear();
            (std::mem::take(&mut *classes), methods)
        };
        self.set_request_unloaded_classes(true);
        self.stats.record_cache_clear();
        info!(
            client_id = %self.client_id,
            classes = classes.len(),
            methods = methods.len(),
            "cleared client session caches"
        );
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn stats_snapshot(&self) -> SessionStatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("client_id", &self.client_id)
            .field("in_use", &self.in_use())
            .field("marked_for_deletion", &self.is_marked_for_deletion())
            .field("expected_seq_no", &self.expected_seq_no())
            .finish_non_exhaustive()
    }
}

/// A request's exclusive turn in its client's sequence. Dropping it hands
/// the turn to the next request.
#[derive(Debug)]
pub struct SequencedTurn<'a> {
    session: &'a ClientSession,
    seq_no: u32,
    admission: Admission,
}

impl SequencedTurn<'_> {
    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }
}

impl Drop for SequencedTurn<'_> {
    fn drop(&mut self) {
        self.session.num_active_threads.fetch_sub(1, Ordering::AcqRel);
        self.session.sequencer.complete(self.seq_no);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::sample_record;
    use crate::codec::unpack_record;
    use crate::profile::ProfileData;
    use std::thread;

    fn session() -> ClientSession {
        ClientSession::new(ClientId::new(7), &SequencerConfig::default())
    }

    fn cached_class(session: &ClientSession, address: u64, name: &str) -> ClassId {
        let class = ClassId::new(address);
        let unpacked = unpack_record(class, sample_record(name, 3)).unwrap();
        assert!(session.cache_class(class, unpacked));
        class
    }

    #[test]
    fn test_acquire_release_counts() {
        let session = session();
        session.acquire();
        session.acquire();
        assert_eq!(session.in_use(), 2);
        assert_eq!(session.release(), 1);
        assert_eq!(session.release(), 0);
    }

    #[test]
    #[should_panic(expected = "released while not in use")]
    fn test_release_without_acquire_panics() {
        session().release();
    }

    #[test]
    fn test_vm_info_fetched_once() {
        let session = session();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let info = session
                .get_or_fetch_vm_info(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(VmInfo {
                        process_id: 42,
                        ..VmInfo::default()
                    })
                })
                .unwrap();
            assert_eq!(info.process_id, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_vm_info_fetch_is_retried() {
        let session = session();
        assert_eq!(session.get_or_fetch_vm_info(|| Err("down")), Err("down"));
        assert!(session.vm_info().is_none());
        assert!(session.get_or_fetch_vm_info(|| Ok::<_, ()>(VmInfo::default())).is_ok());
        assert!(session.vm_info().is_some());
    }

    #[test]
    fn test_lookup_never_fetches_and_counts_misses() {
        let session = session();
        assert!(session.get_class_descriptor(ClassId::new(0x10)).is_none());
        assert!(session.get_method_descriptor(MethodId::new(0x20)).is_none());
        let stats = session.stats_snapshot();
        assert_eq!(stats.classes.misses, 1);
        assert_eq!(stats.methods.misses, 1);
    }

    #[test]
    fn test_bulk_cache_indexes_class() {
        let session = session();
        let class = cached_class(&session, 0x1000, "java/util/ArrayList");
        let desc = session.get_class_descriptor(class).unwrap();
        assert!(desc.is_complete());

        let loader = desc.class_loader().unwrap();
        let key = ClassLoaderNamePair::new(loader, "java/util/ArrayList");
        assert_eq!(session.class_by_name(&key), Some(class));
        assert_eq!(session.class_of_constant_pool(desc.constant_pool().unwrap()), Some(class));

        let first = desc.methods_of_class().unwrap();
        let method = session.get_method_descriptor(first.nth(2)).unwrap();
        assert_eq!(method.owning_class(), class);
        assert_eq!(method.rom_method_index(), 2);
    }

    #[test]
    fn test_unload_purges_every_map() {
        let session = session();
        let class = cached_class(&session, 0x1000, "a/B");
        let parent = ClassId::new(0x2000);
        let desc = session.get_class_descriptor(class).unwrap();
        let pool = desc.constant_pool().unwrap();
        let key = ClassLoaderNamePair::new(desc.class_loader().unwrap(), "a/B");
        let method = desc.methods_of_class().unwrap();

        session.cache_hierarchy_entry(class, HierarchyEntry::with_flags(1));
        session.add_subclass(parent, class);
        assert!(session.cache_class_chain(class, vec![1, 2, 3]));

        assert_eq!(session.apply_unloaded_classes(&[class]), 1);

        assert!(session.get_class_descriptor(class).is_none());
        assert!(session.is_class_unloaded(class));
        assert!(session.is_address_unloaded(0x1000));
        assert!(session.get_method_descriptor(method).is_none());
        assert_eq!(session.class_by_name(&key), None);
        assert_eq!(session.class_of_constant_pool(pool), None);
        assert!(session.class_chain(class).is_none());
        assert!(session.hierarchy_entry(class).is_none());
        assert!(session.hierarchy_entry(parent).unwrap().subclasses.is_empty());
        assert_eq!(session.stats_snapshot().unloaded_classes, 1);
    }

    #[test]
    fn test_unloaded_class_is_not_resurrected() {
        let session = session();
        let class = ClassId::new(0x3000);
        session.apply_unloaded_classes(&[class]);

        let unpacked = unpack_record(class, sample_record("late/Fetch", 1)).unwrap();
        assert!(!session.cache_class(class, unpacked));
        assert!(!session.cache_class_descriptor(class, ClassDescriptor::partial()));
        assert_eq!(
            session.cache_class_field(
                class,
                ClassInfoField::NumberDimensions,
                ClassFieldValue::I32(0)
            ),
            Ok(None)
        );
        assert!(!session.cache_method_descriptor(
            MethodId::new(0x9000),
            MethodDescriptor::new(class, 0, false)
        ));
        assert!(session.get_class_descriptor(class).is_none());
    }

    #[test]
    fn test_unloaded_range_blocks_classes_inside_it() {
        let session = session();
        session.record_unloaded_range(0x5000, 0x6000);
        assert!(session.is_address_unloaded(0x5800));
        assert!(!session.is_address_unloaded(0x6000));

        let inside = ClassId::new(0x5100);
        assert!(session.is_class_unloaded(inside));
        let unpacked = unpack_record(inside, sample_record("anon/Lambda", 1)).unwrap();
        assert!(!session.cache_class(inside, unpacked));

        session.clear_caches();
        assert!(session.is_address_unloaded(0x5800));
        cached_class(&session, 0x6000, "anon/Neighbour");
    }

    #[test]
    fn test_concurrent_lookup_sees_whole_entry_or_nothing() {
        let session = Arc::new(session());
        let class = cached_class(&session, 0x4000, "race/Me");

        let reader = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for _ in 0..1000 {
                    match session.get_class_descriptor(class) {
                        Some(desc) => assert!(desc.is_complete()),
                        None => assert!(session.is_class_unloaded(class)),
                    }
                }
            })
        };
        session.apply_unloaded_classes(&[class]);
        reader.join().unwrap();
        assert!(session.get_class_descriptor(class).is_none());
    }

    #[test]
    fn test_profiles_need_a_known_method() {
        let session = session();
        let method = MethodId::new(0x500);
        let entry = Arc::new(ProfileEntry::new(
            4,
            ProfileData::Switch {
                counts: vec![1, 2],
            },
        ));

        assert_eq!(session.get_cached_profile(method, 4), ProfileLookup::MethodUnknown);
        assert!(!session.cache_profile(method, 4, Arc::clone(&entry)));

        assert!(session.cache_method_descriptor(
            method,
            MethodDescriptor::new(ClassId::new(0x50), 0, false)
        ));
        assert_eq!(session.get_cached_profile(method, 4), ProfileLookup::Miss);
        assert!(session.cache_profile(method, 4, Arc::clone(&entry)));
        assert_eq!(session.get_cached_profile(method, 4), ProfileLookup::Hit(entry));

        let stats = session.stats_snapshot();
        assert_eq!(stats.profiles.hits, 1);
        assert_eq!(stats.profiles.misses, 2);
    }

    #[test]
    fn test_clear_caches_keeps_vm_info() {
        let session = session();
        cached_class(&session, 0x1000, "x/Y");
        session.cache_static_final_value(0x88, 5);
        session
            .get_or_fetch_vm_info(|| Ok::<_, ()>(VmInfo::default()))
            .unwrap();

        session.clear_caches();

        assert_eq!(session.cached_class_count(), 0);
        assert_eq!(session.static_final_value(0x88), None);
        assert!(session.vm_info().is_some());
        assert!(session.request_unloaded_classes());
        assert_eq!(session.stats_snapshot().cache_clears, 1);
    }

    #[test]
    fn test_turn_guard_orders_requests() {
        let session = Arc::new(session());
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = [3_u32, 2]
            .into_iter()
            .map(|seq_no| {
                let session = Arc::clone(&session);
                let order = Arc::clone(&order);
                thread::spawn(move || {
                    let _turn = session.enter_turn(seq_no);
                    order.lock().push(seq_no);
                })
            })
            .collect();

        while session.sequencer.waiting_count() < 2 {
            thread::yield_now();
        }
        {
            let turn = session.enter_turn(1);
            assert_eq!(turn.admission(), &Admission::InOrder);
            assert_eq!(session.num_active_threads(), 1);
            order.lock().push(1);
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*order.lock(), vec![1, 2, 3]);
        assert_eq!(session.num_active_threads(), 0);
        let stats = session.stats_snapshot().sequencer;
        assert_eq!(stats.in_order, 1);
        assert_eq!(stats.parked, 2);
    }

    #[test]
    fn test_bridged_gap_clears_caches() {
        let config = SequencerConfig {
            wait_timeout_ms: 10,
            gap_recovery: GapRecovery::ClearCaches,
        };
        let session = ClientSession::new(ClientId::new(9), &config);
        cached_class(&session, 0x1000, "gap/Z");

        let turn = session.enter_turn(5);
        assert!(turn.admission().bridged_gap());
        drop(turn);

        assert_eq!(session.cached_class_count(), 0);
        assert!(session.request_unloaded_classes());
        assert_eq!(session.expected_seq_no(), 6);
        assert_eq!(session.stats_snapshot().sequencer.gaps_bridged, 1);
    }

    #[test]
    fn test_advance_recovery_keeps_caches() {
        let config = SequencerConfig {
            wait_timeout_ms: 10,
            gap_recovery: GapRecovery::Advance,
        };
        let session = ClientSession::new(ClientId::new(9), &config);
        cached_class(&session, 0x1000, "gap/Z");

        drop(session.enter_turn(2));
        assert_eq!(session.cached_class_count(), 1);
        assert!(!session.request_unloaded_classes());
    }

    #[test]
    fn test_staleness() {
        let session = session();
        let start = session.last_access();
        let age = Duration::from_secs(60);
        assert!(!session.is_stale_at(start + age, age));
        assert!(session.is_stale_at(start + age + Duration::from_millis(1), age));

        session.touch_at(start + age);
        assert!(!session.is_stale_at(start + age + Duration::from_millis(1), age));
    }
}
