//! Caches that live for exactly one compilation.
//!
//! Each map is allocated on first use and everything is thrown away at once
//! when the compilation ends. Nothing here is shared, so no locking.

use ahash::{AHashMap, AHashSet};
use std::sync::Arc;

use crate::ids::{ClassId, MethodId};
use crate::profile::{ProfileEntry, ProfileLookup, ProfileTable};

/// How a method reference was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolvedMethodKind {
    VirtualFromCp,
    VirtualFromOffset,
    Interface,
    Static,
    Special,
    ImproperInterface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedMethodKey {
    pub kind: ResolvedMethodKind,
    pub class: ClassId,
    pub cp_index: i32,
    /// Receiver class, for resolutions that depend on it
    pub class_object: Option<ClassId>,
}

impl ResolvedMethodKey {
    pub fn new(kind: ResolvedMethodKind, class: ClassId, cp_index: i32) -> Self {
        Self {
            kind,
            class,
            cp_index,
            class_object: None,
        }
    }

    pub fn with_class_object(mut self, class_object: ClassId) -> Self {
        self.class_object = Some(class_object);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethodEntry {
    /// `None` when the reference is still unresolved in the constant pool
    pub method: Option<MethodId>,
    pub vtable_slot: u32,
    pub info: u64,
}

#[derive(Debug, Default)]
pub struct CompilationScratch {
    profiles: Option<AHashMap<MethodId, ProfileTable>>,
    resolved_methods: Option<AHashMap<ResolvedMethodKey, ResolvedMethodEntry>>,
    /// Statics whose declaring class is known not to be loaded
    null_class_of_static: Option<AHashSet<(ClassId, i32)>>,
    /// Methods whose profile must be persisted once the compilation ends
    mirrors_to_persist: Option<Vec<MethodId>>,
}

impl CompilationScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile lookup without touching the session. A method never seen in
    /// this compilation reports [`ProfileLookup::MethodUnknown`].
    pub fn profile(&self, method: MethodId, bytecode_index: u32) -> ProfileLookup {
        match self.profiles.as_ref().and_then(|tables| tables.get(&method)) {
            Some(table) => ProfileLookup::from_table(Some(table), bytecode_index),
            None => ProfileLookup::MethodUnknown,
        }
    }

    pub fn cache_profile(
        &mut self,
        method: MethodId,
        bytecode_index: u32,
        entry: Arc<ProfileEntry>,
    ) {
        self.profiles
            .get_or_insert_with(AHashMap::new)
            .entry(method)
            .or_default()
            .entry(bytecode_index)
            .or_insert(entry);
    }

    pub fn resolved_method(&self, key: &ResolvedMethodKey) -> Option<&ResolvedMethodEntry> {
        self.resolved_methods.as_ref()?.get(key)
    }

    pub fn cache_resolved_method(&mut self, key: ResolvedMethodKey, entry: ResolvedMethodEntry) {
        self.resolved_methods
            .get_or_insert_with(AHashMap::new)
            .entry(key)
            .or_insert(entry);
    }

    pub fn is_class_of_static_null(&self, class: ClassId, cp_index: i32) -> bool {
        self.null_class_of_static
            .as_ref()
            .is_some_and(|set| set.contains(&(class, cp_index)))
    }

    pub fn cache_null_class_of_static(&mut self, class: ClassId, cp_index: i32) {
        self.null_class_of_static
            .get_or_insert_with(AHashSet::new)
            .insert((class, cp_index));
    }

    pub fn add_mirror_to_persist(&mut self, method: MethodId) {
        self.mirrors_to_persist
            .get_or_insert_with(Vec::new)
            .push(method);
    }

    pub fn mirrors_to_persist(&self) -> &[MethodId] {
        self.mirrors_to_persist.as_deref().unwrap_or_default()
    }

    /// Number of maps allocated so far
    pub fn allocated_maps(&self) -> usize {
        usize::from(self.profiles.is_some())
            + usize::from(self.resolved_methods.is_some())
            + usize::from(self.null_class_of_static.is_some())
            + usize::from(self.mirrors_to_persist.is_some())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
