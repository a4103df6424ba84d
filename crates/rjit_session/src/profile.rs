//! Interpreter profile data cached on behalf of the optimizer

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ids::ClassId;

/// What the client's interpreter recorded at one bytecode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileData {
    Branch { taken: u32, not_taken: u32 },
    Switch { counts: Vec<u32> },
    CallSite { receivers: Vec<(ClassId, u32)> },
}

/// Profile of one bytecode of one method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub bytecode_index: u32,
    pub data: ProfileData,
}

impl ProfileEntry {
    pub fn new(bytecode_index: u32, data: ProfileData) -> Self {
        Self {
            bytecode_index,
            data,
        }
    }
}

/// Bytecode index -> profile, created on first use per method
pub type ProfileTable = AHashMap<u32, Arc<ProfileEntry>>;

/// Outcome of a profile lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileLookup {
    /// The method itself is not cached, so nothing can be recorded for it
    MethodUnknown,
    /// The method is known but has no profile for that bytecode yet
    Miss,
    Hit(Arc<ProfileEntry>),
}

impl ProfileLookup {
    pub(crate) fn from_table(table: Option<&ProfileTable>, bytecode_index: u32) -> Self {
        table
            .and_then(|table| table.get(&bytecode_index))
            .map_or(ProfileLookup::Miss, |entry| {
                ProfileLookup::Hit(Arc::clone(entry))
            })
    }

    pub fn entry(&self) -> Option<&Arc<ProfileEntry>> {
        match self {
            ProfileLookup::Hit(entry) => Some(entry),
            ProfileLookup::MethodUnknown | ProfileLookup::Miss => None,
        }
    }

    pub fn is_method_known(&self) -> bool {
        !matches!(self, ProfileLookup::MethodUnknown)
    }
}
