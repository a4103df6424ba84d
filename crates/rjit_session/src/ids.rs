//! Opaque handles for metadata that lives in a client's address space.
//!
//! Every handle is the raw address the client reported. It is only
//! meaningful inside the session of that client and is never dereferenced
//! on the server.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! remote_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(address: u64) -> Self {
                Self(address)
            }

            /// Raw address in the client's address space
            pub const fn address(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

/// Identity of a client VM, unique for the lifetime of that VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(uid: u64) -> Self {
        Self(uid)
    }

    pub const fn uid(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

remote_handle!(
    /// A class of the client VM
    ClassId
);

remote_handle!(
    /// A method of the client VM
    MethodId
);

remote_handle!(
    /// A class loader of the client VM
    LoaderId
);

/// Size of one method record in the client's method table. Methods of a
/// class are laid out contiguously, so the n-th method of a class sits at
/// `methods_of_class + n * METHOD_RECORD_SIZE`.
pub const METHOD_RECORD_SIZE: u64 = 32;

impl MethodId {
    /// Handle of the `index`-th method in a contiguous method table
    pub const fn nth(self, index: usize) -> Self {
        Self(self.0 + index as u64 * METHOD_RECORD_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_table_stride() {
        let base = MethodId::new(0x1000);
        assert_eq!(base.nth(0), base);
        assert_eq!(base.nth(2).address(), 0x1000 + 2 * METHOD_RECORD_SIZE);
    }

    #[test]
    fn test_handle_formatting() {
        let class = ClassId::new(0xbeef);
        assert_eq!(class.to_string(), "0xbeef");
        assert_eq!(format!("{class:?}"), "ClassId(0xbeef)");
    }
}
