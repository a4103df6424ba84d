//! In-memory snapshots of remote classes and methods.
//!
//! A [`ClassDescriptor`] may be partially populated: single fields arrive
//! through incremental fetches, the rest through one bulk fetch. Population
//! is idempotent, a field that is already cached keeps its value.

use ahash::{AHashMap, AHashSet};
use std::sync::Arc;

use crate::codec::{ClassFieldValue, ClassInfoField, RomClassImage};
use crate::error::CodecError;
use crate::ids::{ClassId, LoaderId, MethodId};
use crate::profile::{ProfileEntry, ProfileLookup, ProfileTable};

/// Key of the field attribute sub-caches. Static and instance fields, as
/// well as AOT and JIT resolution, are cached independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldAttributeKey {
    pub cp_index: i32,
    pub is_static: bool,
    pub is_aot: bool,
}

impl FieldAttributeKey {
    pub fn instance(cp_index: i32) -> Self {
        Self {
            cp_index,
            is_static: false,
            is_aot: false,
        }
    }

    pub fn static_field(cp_index: i32) -> Self {
        Self {
            cp_index,
            is_static: true,
            is_aot: false,
        }
    }

    pub fn for_aot(mut self) -> Self {
        self.is_aot = true;
        self
    }
}

/// Resolution result for a field reference in a constant pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAttributes {
    pub offset: u32,
    pub data_type: u8,
    pub is_volatile: bool,
    pub is_private: bool,
    pub is_final: bool,
    pub unresolved_in_cp: bool,
}

/// Key of a string read out of a remote ROM structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteStringKey {
    pub base: u64,
    pub offset: u32,
}

/// Lazily filled caches hanging off one class
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassSubCaches {
    field_attributes: AHashMap<FieldAttributeKey, FieldAttributes>,
    class_of_static: AHashMap<i32, ClassId>,
    constant_pool_classes: AHashMap<i32, ClassId>,
    field_or_static_names: AHashMap<i32, String>,
    remote_strings: AHashMap<RemoteStringKey, String>,
}

impl ClassSubCaches {
    pub fn field_attributes(&self, key: FieldAttributeKey) -> Option<FieldAttributes> {
        self.field_attributes.get(&key).copied()
    }

    pub fn cache_field_attributes(&mut self, key: FieldAttributeKey, attrs: FieldAttributes) {
        self.field_attributes.entry(key).or_insert(attrs);
    }

    pub fn class_of_static(&self, cp_index: i32) -> Option<ClassId> {
        self.class_of_static.get(&cp_index).copied()
    }

    pub fn cache_class_of_static(&mut self, cp_index: i32, class: ClassId) {
        self.class_of_static.entry(cp_index).or_insert(class);
    }

    pub fn constant_pool_class(&self, cp_index: i32) -> Option<ClassId> {
        self.constant_pool_classes.get(&cp_index).copied()
    }

    pub fn cache_constant_pool_class(&mut self, cp_index: i32, class: ClassId) {
        self.constant_pool_classes.entry(cp_index).or_insert(class);
    }

    pub fn field_or_static_name(&self, cp_index: i32) -> Option<&str> {
        self.field_or_static_names.get(&cp_index).map(String::as_str)
    }

    pub fn cache_field_or_static_name(&mut self, cp_index: i32, name: impl Into<String>) {
        self.field_or_static_names
            .entry(cp_index)
            .or_insert_with(|| name.into());
    }

    pub fn remote_string(&self, key: RemoteStringKey) -> Option<&str> {
        self.remote_strings.get(&key).map(String::as_str)
    }

    pub fn cache_remote_string(&mut self, key: RemoteStringKey, value: impl Into<String>) {
        self.remote_strings.entry(key).or_insert_with(|| value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.field_attributes.is_empty()
            && self.class_of_static.is_empty()
            && self.constant_pool_classes.is_empty()
            && self.field_or_static_names.is_empty()
            && self.remote_strings.is_empty()
    }
}

/// Cached snapshot of one remote class
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassDescriptor {
    rom_class: Option<Arc<RomClassImage>>,
    fields: [Option<ClassFieldValue>; ClassInfoField::COUNT],
    caches: ClassSubCaches,
}

impl ClassDescriptor {
    /// An empty descriptor, to be filled field by field
    pub fn partial() -> Self {
        Self::default()
    }

    pub fn rom_class(&self) -> Option<&Arc<RomClassImage>> {
        self.rom_class.as_ref()
    }

    /// Attach the ROM image unless one is already cached. The modifier
    /// fields are derived from it.
    pub fn set_rom_class(&mut self, image: Arc<RomClassImage>) {
        if self.rom_class.is_some() {
            return;
        }
        let modifiers = ClassFieldValue::U32(image.modifiers);
        let extra_modifiers = ClassFieldValue::U32(image.extra_modifiers);
        self.fill(ClassInfoField::RomClassModifiers, modifiers);
        self.fill(ClassInfoField::RomClassExtraModifiers, extra_modifiers);
        self.rom_class = Some(image);
    }

    /// Raw cached value of `field`
    pub fn field(&self, field: ClassInfoField) -> Option<&ClassFieldValue> {
        self.fields[field.index()].as_ref()
    }

    /// Whether the cached value of `field` can be served without asking the
    /// client. A class that was not yet initialized may have become
    /// initialized since, so only a cached `true` settles that field.
    pub fn is_settled(&self, field: ClassInfoField) -> bool {
        match (field, self.field(field)) {
            (_, None) => false,
            (ClassInfoField::ClassInitialized, Some(value)) => value.as_bool() == Some(true),
            (_, Some(_)) => true,
        }
    }

    /// Cache one field. An existing value is kept, except that the
    /// initialized flag may move from `false` to `true`.
    pub fn set_field(
        &mut self,
        field: ClassInfoField,
        value: ClassFieldValue,
    ) -> Result<(), CodecError> {
        let expected = field.kind();
        let found = value.kind();
        if expected != found {
            return Err(CodecError::FieldKindMismatch {
                field,
                expected,
                found,
            });
        }
        self.fill(field, value);
        Ok(())
    }

    fn fill(&mut self, field: ClassInfoField, value: ClassFieldValue) {
        let slot = &mut self.fields[field.index()];
        match slot {
            None => *slot = Some(value),
            Some(current) if field.is_monotonic() => {
                if current.as_bool() == Some(false) && value.as_bool() == Some(true) {
                    *current = value;
                }
            }
            Some(_) => {}
        }
    }

    /// Fold a freshly unpacked descriptor into this one. Fields and sub-cache
    /// entries that are already present win.
    pub fn merge(&mut self, other: ClassDescriptor) {
        let ClassDescriptor {
            rom_class,
            fields,
            caches,
        } = other;
        if let Some(image) = rom_class {
            self.set_rom_class(image);
        }
        for (field, value) in ClassInfoField::ALL.into_iter().zip(fields) {
            if let Some(value) = value {
                self.fill(field, value);
            }
        }
        if self.caches.is_empty() {
            self.caches = caches;
        }
    }

    /// Every field and the ROM image are cached
    pub fn is_complete(&self) -> bool {
        self.rom_class.is_some() && self.fields.iter().all(Option::is_some)
    }

    pub fn missing_fields(&self) -> Vec<ClassInfoField> {
        ClassInfoField::ALL
            .into_iter()
            .filter(|field| self.field(*field).is_none())
            .collect()
    }

    pub fn name(&self) -> Option<&str> {
        self.rom_class.as_deref().map(|image| image.name.as_str())
    }

    pub fn class_loader(&self) -> Option<LoaderId> {
        self.field(ClassInfoField::ClassLoader)
            .and_then(ClassFieldValue::as_loader)
    }

    pub fn parent_class(&self) -> Option<ClassId> {
        self.field(ClassInfoField::ParentClass)
            .and_then(ClassFieldValue::as_class)
    }

    pub fn interfaces(&self) -> &[ClassId] {
        self.field(ClassInfoField::Interfaces)
            .and_then(ClassFieldValue::as_classes)
            .unwrap_or_default()
    }

    pub fn methods_of_class(&self) -> Option<MethodId> {
        self.field(ClassInfoField::MethodsOfClass)
            .and_then(ClassFieldValue::as_method)
    }

    /// Address of the class's constant pool in the client
    pub fn constant_pool(&self) -> Option<u64> {
        self.field(ClassInfoField::ConstantPool)
            .and_then(ClassFieldValue::as_word)
    }

    pub fn is_initialized(&self) -> Option<bool> {
        self.field(ClassInfoField::ClassInitialized)
            .and_then(ClassFieldValue::as_bool)
    }

    pub fn method_count(&self) -> Option<usize> {
        self.rom_class
            .as_deref()
            .map(|image| image.method_count as usize)
    }

    pub fn caches(&self) -> &ClassSubCaches {
        &self.caches
    }

    pub fn caches_mut(&mut self) -> &mut ClassSubCaches {
        &mut self.caches
    }
}

/// Cached snapshot of one remote method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    owning_class: ClassId,
    /// Position of the method in the owning class's ROM method table
    rom_method_index: u32,
    tracing_enabled: bool,
    compiled_when_profiling: bool,
    profile: Option<ProfileTable>,
}

impl MethodDescriptor {
    pub fn new(owning_class: ClassId, rom_method_index: u32, tracing_enabled: bool) -> Self {
        Self {
            owning_class,
            rom_method_index,
            tracing_enabled,
            compiled_when_profiling: false,
            profile: None,
        }
    }

    pub fn owning_class(&self) -> ClassId {
        self.owning_class
    }

    pub fn rom_method_index(&self) -> u32 {
        self.rom_method_index
    }

    pub fn is_tracing_enabled(&self) -> bool {
        self.tracing_enabled
    }

    pub fn is_compiled_when_profiling(&self) -> bool {
        self.compiled_when_profiling
    }

    pub fn set_compiled_when_profiling(&mut self, value: bool) {
        self.compiled_when_profiling = value;
    }

    pub fn profile(&self, bytecode_index: u32) -> ProfileLookup {
        ProfileLookup::from_table(self.profile.as_ref(), bytecode_index)
    }

    /// Cache a profile entry; the table is created on first use
    pub fn cache_profile(&mut self, bytecode_index: u32, entry: Arc<ProfileEntry>) {
        self.profile
            .get_or_insert_with(ProfileTable::default)
            .entry(bytecode_index)
            .or_insert(entry);
    }

    pub fn has_profile_table(&self) -> bool {
        self.profile.is_some()
    }
}

/// Entry of the server-side class hierarchy table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyEntry {
    pub subclasses: AHashSet<ClassId>,
    pub flags: u32,
}

impl HierarchyEntry {
    pub fn with_flags(flags: u32) -> Self {
        Self {
            subclasses: AHashSet::new(),
            flags,
        }
    }
}

/// Key of the class-by-name index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassLoaderNamePair {
    pub loader: LoaderId,
    pub name: String,
}

impl ClassLoaderNamePair {
    pub fn new(loader: LoaderId, name: impl Into<String>) -> Self {
        Self {
            loader,
            name: name.into(),
        }
    }
}
