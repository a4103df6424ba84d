//! Class descriptor codec
//!
//! Stateless conversion between the positional class record exchanged with
//! a client and the cached [`ClassDescriptor`]. A class can be populated
//! either from one full record (bulk fetch) or field by field (incremental
//! fetch); both paths produce the same descriptor.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::descriptor::{ClassDescriptor, MethodDescriptor};
use crate::error::CodecError;
use crate::ids::{ClassId, LoaderId, MethodId};

/// Shape of a single descriptor field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    U32,
    I32,
    Word,
    Bool,
    Class,
    Classes,
    Loader,
    Method,
}

/// One individually fetchable field of a class descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassInfoField {
    RomClassModifiers,
    RomClassExtraModifiers,
    MethodsOfClass,
    BaseComponentClass,
    NumberDimensions,
    ParentClass,
    Interfaces,
    ClassHasFinalFields,
    ClassDepthAndFlags,
    ClassInitialized,
    ByteOffsetToLockword,
    LeafComponentClass,
    ClassLoader,
    HostClass,
    ComponentClass,
    ArrayClass,
    TotalInstanceSize,
    RemoteRomClass,
    ConstantPool,
    ClassFlags,
}

impl ClassInfoField {
    pub const COUNT: usize = 20;

    pub const ALL: [ClassInfoField; Self::COUNT] = [
        ClassInfoField::RomClassModifiers,
        ClassInfoField::RomClassExtraModifiers,
        ClassInfoField::MethodsOfClass,
        ClassInfoField::BaseComponentClass,
        ClassInfoField::NumberDimensions,
        ClassInfoField::ParentClass,
        ClassInfoField::Interfaces,
        ClassInfoField::ClassHasFinalFields,
        ClassInfoField::ClassDepthAndFlags,
        ClassInfoField::ClassInitialized,
        ClassInfoField::ByteOffsetToLockword,
        ClassInfoField::LeafComponentClass,
        ClassInfoField::ClassLoader,
        ClassInfoField::HostClass,
        ClassInfoField::ComponentClass,
        ClassInfoField::ArrayClass,
        ClassInfoField::TotalInstanceSize,
        ClassInfoField::RemoteRomClass,
        ClassInfoField::ConstantPool,
        ClassInfoField::ClassFlags,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn kind(self) -> FieldKind {
        match self {
            ClassInfoField::RomClassModifiers
            | ClassInfoField::RomClassExtraModifiers
            | ClassInfoField::ByteOffsetToLockword => FieldKind::U32,
            ClassInfoField::NumberDimensions => FieldKind::I32,
            ClassInfoField::ClassDepthAndFlags
            | ClassInfoField::TotalInstanceSize
            | ClassInfoField::RemoteRomClass
            | ClassInfoField::ConstantPool
            | ClassInfoField::ClassFlags => FieldKind::Word,
            ClassInfoField::ClassHasFinalFields | ClassInfoField::ClassInitialized => {
                FieldKind::Bool
            }
            ClassInfoField::BaseComponentClass
            | ClassInfoField::ParentClass
            | ClassInfoField::LeafComponentClass
            | ClassInfoField::HostClass
            | ClassInfoField::ComponentClass
            | ClassInfoField::ArrayClass => FieldKind::Class,
            ClassInfoField::Interfaces => FieldKind::Classes,
            ClassInfoField::ClassLoader => FieldKind::Loader,
            ClassInfoField::MethodsOfClass => FieldKind::Method,
        }
    }

    /// Fields whose client-side value only ever moves in one direction
    pub const fn is_monotonic(self) -> bool {
        matches!(self, ClassInfoField::ClassInitialized)
    }
}

/// Value of one descriptor field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassFieldValue {
    U32(u32),
    I32(i32),
    Word(u64),
    Bool(bool),
    Class(Option<ClassId>),
    Classes(Vec<ClassId>),
    Loader(LoaderId),
    Method(MethodId),
}

impl ClassFieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            ClassFieldValue::U32(_) => FieldKind::U32,
            ClassFieldValue::I32(_) => FieldKind::I32,
            ClassFieldValue::Word(_) => FieldKind::Word,
            ClassFieldValue::Bool(_) => FieldKind::Bool,
            ClassFieldValue::Class(_) => FieldKind::Class,
            ClassFieldValue::Classes(_) => FieldKind::Classes,
            ClassFieldValue::Loader(_) => FieldKind::Loader,
            ClassFieldValue::Method(_) => FieldKind::Method,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ClassFieldValue::U32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ClassFieldValue::I32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_word(&self) -> Option<u64> {
        match self {
            ClassFieldValue::Word(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ClassFieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The referenced class; `None` both for a null reference and for a
    /// value of another kind
    pub fn as_class(&self) -> Option<ClassId> {
        match self {
            ClassFieldValue::Class(value) => *value,
            _ => None,
        }
    }

    pub fn as_classes(&self) -> Option<&[ClassId]> {
        match self {
            ClassFieldValue::Classes(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_loader(&self) -> Option<LoaderId> {
        match self {
            ClassFieldValue::Loader(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_method(&self) -> Option<MethodId> {
        match self {
            ClassFieldValue::Method(value) => Some(*value),
            _ => None,
        }
    }
}

/// Server-side copy of a class's immutable ROM data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomClassImage {
    pub name: String,
    pub modifiers: u32,
    pub extra_modifiers: u32,
    pub method_count: u32,
    /// Packed ROM class contents, interpreted by the compiler only
    pub bytes: Vec<u8>,
}

/// Full class record as sent by a client.
///
/// The order of fields is part of the wire contract. New fields go at the
/// end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfoRecord {
    pub rom_class: RomClassImage,
    pub methods_of_class: MethodId,
    pub base_component_class: Option<ClassId>,
    pub num_dimensions: i32,
    pub parent_class: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    /// One flag per method of the class, non-zero when tracing is enabled
    pub method_tracing: Vec<u8>,
    pub class_has_final_fields: bool,
    pub class_depth_and_flags: u64,
    pub class_initialized: bool,
    pub byte_offset_to_lockword: u32,
    pub leaf_component_class: Option<ClassId>,
    pub class_loader: LoaderId,
    pub host_class: Option<ClassId>,
    pub component_class: Option<ClassId>,
    pub array_class: Option<ClassId>,
    pub total_instance_size: u64,
    pub remote_rom_class: u64,
    pub constant_pool: u64,
    pub class_flags: u64,
}

impl ClassInfoRecord {
    /// Value the record carries for `field`
    pub fn field(&self, field: ClassInfoField) -> ClassFieldValue {
        match field {
            ClassInfoField::RomClassModifiers => ClassFieldValue::U32(self.rom_class.modifiers),
            ClassInfoField::RomClassExtraModifiers => {
                ClassFieldValue::U32(self.rom_class.extra_modifiers)
            }
            ClassInfoField::MethodsOfClass => ClassFieldValue::Method(self.methods_of_class),
            ClassInfoField::BaseComponentClass => {
                ClassFieldValue::Class(self.base_component_class)
            }
            ClassInfoField::NumberDimensions => ClassFieldValue::I32(self.num_dimensions),
            ClassInfoField::ParentClass => ClassFieldValue::Class(self.parent_class),
            ClassInfoField::Interfaces => ClassFieldValue::Classes(self.interfaces.clone()),
            ClassInfoField::ClassHasFinalFields => {
                ClassFieldValue::Bool(self.class_has_final_fields)
            }
            ClassInfoField::ClassDepthAndFlags => ClassFieldValue::Word(self.class_depth_and_flags),
            ClassInfoField::ClassInitialized => ClassFieldValue::Bool(self.class_initialized),
            ClassInfoField::ByteOffsetToLockword => {
                ClassFieldValue::U32(self.byte_offset_to_lockword)
            }
            ClassInfoField::LeafComponentClass => {
                ClassFieldValue::Class(self.leaf_component_class)
            }
            ClassInfoField::ClassLoader => ClassFieldValue::Loader(self.class_loader),
            ClassInfoField::HostClass => ClassFieldValue::Class(self.host_class),
            ClassInfoField::ComponentClass => ClassFieldValue::Class(self.component_class),
            ClassInfoField::ArrayClass => ClassFieldValue::Class(self.array_class),
            ClassInfoField::TotalInstanceSize => ClassFieldValue::Word(self.total_instance_size),
            ClassInfoField::RemoteRomClass => ClassFieldValue::Word(self.remote_rom_class),
            ClassInfoField::ConstantPool => ClassFieldValue::Word(self.constant_pool),
            ClassInfoField::ClassFlags => ClassFieldValue::Word(self.class_flags),
        }
    }
}

/// A class record split into what the session caches
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedClass {
    pub descriptor: ClassDescriptor,
    pub methods: Vec<(MethodId, MethodDescriptor)>,
}

/// Turn a full record into a complete descriptor plus one method
/// descriptor per method of the class.
pub fn unpack_record(class: ClassId, record: ClassInfoRecord) -> Result<UnpackedClass, CodecError> {
    let method_count = record.rom_class.method_count as usize;
    if record.method_tracing.len() != method_count {
        return Err(CodecError::MethodTableMismatch {
            class,
            expected: method_count,
            found: record.method_tracing.len(),
        });
    }

    let mut descriptor = ClassDescriptor::partial();
    for field in ClassInfoField::ALL {
        descriptor.set_field(field, record.field(field))?;
    }

    let methods = record
        .method_tracing
        .iter()
        .enumerate()
        .map(|(index, tracing)| {
            (
                record.methods_of_class.nth(index),
                MethodDescriptor::new(class, index as u32, *tracing != 0),
            )
        })
        .collect();

    descriptor.set_rom_class(Arc::new(record.rom_class));
    Ok(UnpackedClass {
        descriptor,
        methods,
    })
}

/// Inverse of [`unpack_record`]: rebuild the wire record from a complete
/// descriptor. Returns `None` while any field is still missing.
pub fn pack_record(
    descriptor: &ClassDescriptor,
    method_tracing: Vec<u8>,
) -> Option<ClassInfoRecord> {
    if !descriptor.is_complete() {
        return None;
    }
    let field = move |field: ClassInfoField| descriptor.field(field);
    Some(ClassInfoRecord {
        rom_class: RomClassImage::clone(descriptor.rom_class()?),
        methods_of_class: field(ClassInfoField::MethodsOfClass)?.as_method()?,
        base_component_class: field(ClassInfoField::BaseComponentClass)?.as_class(),
        num_dimensions: field(ClassInfoField::NumberDimensions)?.as_i32()?,
        parent_class: field(ClassInfoField::ParentClass)?.as_class(),
        interfaces: field(ClassInfoField::Interfaces)?.as_classes()?.to_vec(),
        method_tracing,
        class_has_final_fields: field(ClassInfoField::ClassHasFinalFields)?.as_bool()?,
        class_depth_and_flags: field(ClassInfoField::ClassDepthAndFlags)?.as_word()?,
        class_initialized: field(ClassInfoField::ClassInitialized)?.as_bool()?,
        byte_offset_to_lockword: field(ClassInfoField::ByteOffsetToLockword)?.as_u32()?,
        leaf_component_class: field(ClassInfoField::LeafComponentClass)?.as_class(),
        class_loader: field(ClassInfoField::ClassLoader)?.as_loader()?,
        host_class: field(ClassInfoField::HostClass)?.as_class(),
        component_class: field(ClassInfoField::ComponentClass)?.as_class(),
        array_class: field(ClassInfoField::ArrayClass)?.as_class(),
        total_instance_size: field(ClassInfoField::TotalInstanceSize)?.as_word()?,
        remote_rom_class: field(ClassInfoField::RemoteRomClass)?.as_word()?,
        constant_pool: field(ClassInfoField::ConstantPool)?.as_word()?,
        class_flags: field(ClassInfoField::ClassFlags)?.as_word()?,
    })
}
