use serde::{Deserialize, Serialize};

use crate::ids::{ClassId, LoaderId};

/// Read barrier flavour used by the client's garbage collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadBarrierKind {
    #[default]
    None,
    RangeCheck,
    Always,
}

/// Write barrier flavour used by the client's garbage collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteBarrierKind {
    #[default]
    None,
    Always,
    OldCheck,
    CardMark,
    CardMarkAndOldCheck,
}

/// Number of primitive array classes the client reports, one per
/// primitive element type
pub const ARRAY_TYPE_CLASS_COUNT: usize = 8;

/// Facts about a client VM that do not change during its lifetime.
/// Fetched once per session and never refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VmInfo {
    pub system_class_loader: Option<LoaderId>,
    pub process_id: u64,
    pub can_method_enter_event_be_hooked: bool,
    pub can_method_exit_event_be_hooked: bool,
    pub uses_discontiguous_arraylets: bool,
    pub is_profiler_enabled: bool,
    pub arraylet_leaf_log_size: i32,
    pub arraylet_leaf_size: i32,
    pub overflow_safe_alloc_size: u64,
    pub compressed_reference_shift: i32,
    pub cache_start_address: u64,
    pub string_compression_enabled: bool,
    pub has_shared_class_cache: bool,
    pub eligible_for_persisting_profiles: bool,
    pub array_type_classes: [Option<ClassId>; ARRAY_TYPE_CLASS_COUNT],
    pub report_bytecode_info_at_catch_block: bool,
    pub read_barrier: ReadBarrierKind,
    pub write_barrier: WriteBarrierKind,
    pub compress_object_references: bool,
}

impl VmInfo {
    pub fn array_class_for_type(&self, type_code: usize) -> Option<ClassId> {
        self.array_type_classes.get(type_code).copied().flatten()
    }
}
