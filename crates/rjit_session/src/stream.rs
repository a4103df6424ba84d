//! The request/response channel to one client VM.
//!
//! Framing and serialization belong to the transport; the session layer
//! only needs these exchanges.

use crate::codec::{ClassFieldValue, ClassInfoField, ClassInfoRecord};
use crate::error::StreamError;
use crate::ids::ClassId;
use crate::vm_info::VmInfo;

pub trait ServerStream {
    /// Ask the client for one field of a class
    fn fetch_class_field(
        &mut self,
        class: ClassId,
        field: ClassInfoField,
    ) -> Result<ClassFieldValue, StreamError>;

    /// Ask the client for several fields of a class. Transports that can
    /// batch should override this to use a single round trip.
    fn fetch_class_fields(
        &mut self,
        class: ClassId,
        fields: &[ClassInfoField],
    ) -> Result<Vec<ClassFieldValue>, StreamError> {
        fields
            .iter()
            .map(|field| self.fetch_class_field(class, *field))
            .collect()
    }

    /// Ask the client for the full record of a class
    fn fetch_full_class_descriptor(&mut self, class: ClassId)
    -> Result<ClassInfoRecord, StreamError>;

    fn fetch_vm_info(&mut self) -> Result<VmInfo, StreamError>;

    /// Every class the client has unloaded so far, used to resynchronise a
    /// session that may have missed notifications
    fn fetch_unloaded_classes(&mut self) -> Result<Vec<ClassId>, StreamError>;
}
