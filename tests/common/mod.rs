#![allow(dead_code)]

use ahash::AHashMap;
use parking_lot::Mutex;
use remotejit::session::{
    ClassFieldValue, ClassId, ClassInfoField, ClassInfoRecord, LoaderId, MethodId, RomClassImage,
    ServerStream, StreamError, VmInfo,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory stand-in for one client VM
#[derive(Default)]
pub struct FakeClient {
    records: Mutex<AHashMap<ClassId, ClassInfoRecord>>,
    unloaded: Mutex<Vec<ClassId>>,
    pub bulk_fetches: AtomicUsize,
    pub field_fetches: AtomicUsize,
    pub unloaded_fetches: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn define_class(&self, class: ClassId, record: ClassInfoRecord) {
        self.records.lock().insert(class, record);
    }

    pub fn unload_class(&self, class: ClassId) {
        self.records.lock().remove(&class);
        self.unloaded.lock().push(class);
    }

    pub fn stream(self: &Arc<Self>) -> FakeStream {
        FakeStream {
            client: Arc::clone(self),
        }
    }

    fn record(&self, class: ClassId) -> Result<ClassInfoRecord, StreamError> {
        self.records
            .lock()
            .get(&class)
            .cloned()
            .ok_or_else(|| StreamError::Client {
                what: format!("class {class}"),
                reason: "not loaded".to_string(),
            })
    }
}

/// One connection to a [`FakeClient`]
pub struct FakeStream {
    client: Arc<FakeClient>,
}

impl ServerStream for FakeStream {
    fn fetch_class_field(
        &mut self,
        class: ClassId,
        field: ClassInfoField,
    ) -> Result<ClassFieldValue, StreamError> {
        self.client.field_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.record(class)?.field(field))
    }

    fn fetch_full_class_descriptor(
        &mut self,
        class: ClassId,
    ) -> Result<ClassInfoRecord, StreamError> {
        self.client.bulk_fetches.fetch_add(1, Ordering::SeqCst);
        self.client.record(class)
    }

    fn fetch_vm_info(&mut self) -> Result<VmInfo, StreamError> {
        Ok(VmInfo {
            process_id: 1234,
            ..VmInfo::default()
        })
    }

    fn fetch_unloaded_classes(&mut self) -> Result<Vec<ClassId>, StreamError> {
        self.client.unloaded_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.unloaded.lock().clone())
    }
}

pub fn class_record(name: &str, methods: u32, methods_of_class: u64) -> ClassInfoRecord {
    ClassInfoRecord {
        rom_class: RomClassImage {
            name: name.to_string(),
            modifiers: 0x1,
            extra_modifiers: 0,
            method_count: methods,
            bytes: name.as_bytes().to_vec(),
        },
        methods_of_class: MethodId::new(methods_of_class),
        base_component_class: None,
        num_dimensions: 0,
        parent_class: Some(ClassId::new(0x10)),
        interfaces: Vec::new(),
        method_tracing: vec![0; methods as usize],
        class_has_final_fields: false,
        class_depth_and_flags: 1,
        class_initialized: true,
        byte_offset_to_lockword: 4,
        leaf_component_class: None,
        class_loader: LoaderId::new(0x20),
        host_class: None,
        component_class: None,
        array_class: None,
        total_instance_size: 16,
        remote_rom_class: methods_of_class + 0x8000,
        constant_pool: methods_of_class + 0x4000,
        class_flags: 0,
    }
}
