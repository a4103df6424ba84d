pub mod codec;
pub mod descriptor;
pub mod error;
pub mod fetch;
pub mod ids;
pub mod profile;
pub mod registry;
pub mod scratch;
pub mod sequencer;
pub mod session;
pub mod stream;
pub mod unloaded;
pub mod vm_info;

pub use crate::codec::{ClassFieldValue, ClassInfoField, ClassInfoRecord, RomClassImage};
pub use crate::descriptor::{ClassDescriptor, MethodDescriptor};
pub use crate::error::{CodecError, FetchError, StreamError};
pub use crate::fetch::DescriptorFetcher;
pub use crate::ids::{ClassId, ClientId, LoaderId, MethodId};
pub use crate::registry::{DeleteOutcome, SessionRegistry};
pub use crate::scratch::CompilationScratch;
pub use crate::sequencer::{Admission, FIRST_SEQ_NO};
pub use crate::session::{ClientSession, SequencedTurn};
pub use crate::stream::ServerStream;
pub use crate::vm_info::VmInfo;
