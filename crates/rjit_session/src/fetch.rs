//! Fetch-on-miss on behalf of one compilation.
//!
//! Lookups go to the session first. On a miss the client is asked, with no
//! session lock held, and the answer is folded into the cache. Two paths
//! exist: a bulk fetch of the full class record, and an incremental fetch
//! of just the fields a caller needs. Both leave the same descriptor behind.

use std::sync::Arc;
use tracing::debug;

use crate::codec::{ClassFieldValue, ClassInfoField, RomClassImage, unpack_record};
use crate::descriptor::ClassDescriptor;
use crate::error::{CodecError, FetchError};
use crate::ids::ClassId;
use crate::session::ClientSession;
use crate::stream::ServerStream;
use crate::vm_info::VmInfo;

pub struct DescriptorFetcher<'a, S: ServerStream + ?Sized> {
    session: &'a ClientSession,
    stream: &'a mut S,
}

impl<'a, S: ServerStream + ?Sized> DescriptorFetcher<'a, S> {
    pub fn new(session: &'a ClientSession, stream: &'a mut S) -> Self {
        Self { session, stream }
    }

    /// Complete descriptor of `class`, bulk-fetching it unless every field
    /// is already cached. `None` if the class has been unloaded.
    pub fn get_or_fetch_class(
        &mut self,
        class: ClassId,
    ) -> Result<Option<ClassDescriptor>, FetchError> {
        if self.session.is_class_unloaded(class) {
            return Ok(None);
        }
        let complete = self
            .session
            .with_class(class, ClassDescriptor::is_complete)
            .unwrap_or(false);
        if complete {
            self.session.stats().classes.record_hit();
        } else {
            self.session.stats().classes.record_miss();
            self.fetch_class(class)?;
        }
        Ok(self.session.with_class(class, ClassDescriptor::clone))
    }

    /// Bulk fetch: ask for the full record and cache it along with the
    /// methods of the class. Returns `false` if the class was unloaded
    /// while the request was in flight.
    pub fn fetch_class(&mut self, class: ClassId) -> Result<bool, FetchError> {
        let record = self.stream.fetch_full_class_descriptor(class)?;
        let unpacked = unpack_record(class, record)?;
        self.session.stats().record_bulk_fetch();
        let cached = self.session.cache_class(class, unpacked);
        if !cached {
            debug!(
                client_id = %self.session.client_id(),
                %class,
                "dropping fetched class, it was unloaded meanwhile"
            );
        }
        Ok(cached)
    }

    pub fn get_or_fetch_rom_class(
        &mut self,
        class: ClassId,
    ) -> Result<Option<Arc<RomClassImage>>, FetchError> {
        let cached = self
            .session
            .with_class(class, |desc| desc.rom_class().cloned())
            .flatten();
        if cached.is_some() || self.session.is_class_unloaded(class) {
            return Ok(cached);
        }
        self.fetch_class(class)?;
        Ok(self
            .session
            .with_class(class, |desc| desc.rom_class().cloned())
            .flatten())
    }

    /// Incremental fetch of a single field
    pub fn get_and_cache_class_field(
        &mut self,
        class: ClassId,
        field: ClassInfoField,
    ) -> Result<ClassFieldValue, FetchError> {
        if let Some(value) = self.session.settled_class_field(class, field) {
            self.session.stats().classes.record_hit();
            return Ok(value);
        }
        self.session.stats().classes.record_miss();

        let value = self.stream.fetch_class_field(class, field)?;
        self.session.stats().record_incremental_fetch();
        let cached = self
            .session
            .cache_class_field(class, field, value.clone())?;
        Ok(cached.unwrap_or(value))
    }

    /// Incremental fetch of several fields, with one round trip for all of
    /// those not cached yet. Values come back in the order requested.
    pub fn get_and_cache_class_fields(
        &mut self,
        class: ClassId,
        fields: &[ClassInfoField],
    ) -> Result<Vec<ClassFieldValue>, FetchError> {
        let mut values: Vec<Option<ClassFieldValue>> = fields
            .iter()
            .map(|field| self.session.settled_class_field(class, *field))
            .collect();
        let missing: Vec<ClassInfoField> = fields
            .iter()
            .zip(&values)
            .filter(|(_, value)| value.is_none())
            .map(|(field, _)| *field)
            .collect();

        if missing.is_empty() {
            self.session.stats().classes.record_hit();
        } else {
            self.session.stats().classes.record_miss();
            let fetched = self.stream.fetch_class_fields(class, &missing)?;
            if fetched.len() != missing.len() {
                return Err(CodecError::FieldCountMismatch {
                    requested: missing.len(),
                    found: fetched.len(),
                }
                .into());
            }
            self.session.stats().record_incremental_fetch();

            let mut fetched = missing.into_iter().zip(fetched);
            for (field, slot) in fields.iter().zip(values.iter_mut()) {
                if slot.is_some() {
                    continue;
                }
                if let Some((fetched_field, value)) = fetched.next() {
                    debug_assert_eq!(*field, fetched_field);
                    let cached = self
                        .session
                        .cache_class_field(class, fetched_field, value.clone())?;
                    *slot = Some(cached.unwrap_or(value));
                }
            }
        }

        Ok(values.into_iter().flatten().collect())
    }

    /// VM info of the client, fetched at most once per session
    pub fn get_or_fetch_vm_info(&mut self) -> Result<Arc<VmInfo>, FetchError> {
        let stream = &mut *self.stream;
        self.session
            .get_or_fetch_vm_info(|| stream.fetch_vm_info().map_err(FetchError::from))
    }

    /// Ask the client for everything it has unloaded and purge it. Clears
    /// the session's resynchronisation flag on success.
    pub fn sync_unloaded_classes(&mut self) -> Result<usize, FetchError> {
        let unloaded = self.stream.fetch_unloaded_classes()?;
        let removed = self.session.apply_unloaded_classes(&unloaded);
        self.session.set_request_unloaded_classes(false);
        debug!(
            client_id = %self.session.client_id(),
            reported = unloaded.len(),
            removed,
            "resynchronised unloaded classes"
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ClassInfoRecord;
    use crate::codec::tests::sample_record;
    use crate::error::StreamError;
    use crate::ids::{ClientId, LoaderId};
    use ahash::AHashMap;
    use rjit_config::SequencerConfig;

    /// In-memory client answering from a fixed set of records
    #[derive(Default)]
    struct RecordStream {
        records: AHashMap<ClassId, ClassInfoRecord>,
        unloaded: Vec<ClassId>,
        field_calls: usize,
        batch_calls: usize,
        bulk_calls: usize,
        vm_info_calls: usize,
        fail: bool,
        initialize_on_read: bool,
    }

    impl RecordStream {
        fn with_class(class: ClassId, record: ClassInfoRecord) -> Self {
            let mut stream = Self::default();
            stream.records.insert(class, record);
            stream
        }

        fn record(&self, class: ClassId) -> Result<&ClassInfoRecord, StreamError> {
            if self.fail {
                return Err(StreamError::Disconnected);
            }
            self.records.get(&class).ok_or_else(|| StreamError::Client {
                what: format!("class {class}"),
                reason: "unknown".to_string(),
            })
        }
    }

    impl ServerStream for RecordStream {
        fn fetch_class_field(
            &mut self,
            class: ClassId,
            field: ClassInfoField,
        ) -> Result<ClassFieldValue, StreamError> {
            self.field_calls += 1;
            let initialize = self.initialize_on_read;
            let value = self.record(class)?.field(field);
            if initialize {
                if let Some(record) = self.records.get_mut(&class) {
                    record.class_initialized = true;
                }
            }
            Ok(value)
        }

        fn fetch_class_fields(
            &mut self,
            class: ClassId,
            fields: &[ClassInfoField],
        ) -> Result<Vec<ClassFieldValue>, StreamError> {
            self.batch_calls += 1;
            let record = self.record(class)?;
            Ok(fields.iter().map(|field| record.field(*field)).collect())
        }

        fn fetch_full_class_descriptor(
            &mut self,
            class: ClassId,
        ) -> Result<ClassInfoRecord, StreamError> {
            self.bulk_calls += 1;
            self.record(class).cloned()
        }

        fn fetch_vm_info(&mut self) -> Result<VmInfo, StreamError> {
            self.vm_info_calls += 1;
            if self.fail {
                return Err(StreamError::Disconnected);
            }
            Ok(VmInfo {
                system_class_loader: Some(LoaderId::new(0x10)),
                ..VmInfo::default()
            })
        }

        fn fetch_unloaded_classes(&mut self) -> Result<Vec<ClassId>, StreamError> {
            Ok(self.unloaded.clone())
        }
    }

    fn session() -> ClientSession {
        ClientSession::new(ClientId::new(1), &SequencerConfig::default())
    }

    #[test]
    fn test_bulk_fetch_happens_once() {
        let class = ClassId::new(0x1000);
        let session = session();
        let mut stream = RecordStream::with_class(class, sample_record("p/Q", 2));
        let mut fetcher = DescriptorFetcher::new(&session, &mut stream);

        let first = fetcher.get_or_fetch_class(class).unwrap().unwrap();
        let second = fetcher.get_or_fetch_class(class).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name(), Some("p/Q"));
        assert_eq!(stream.bulk_calls, 1);
        assert_eq!(session.stats_snapshot().bulk_fetches, 1);
    }

    #[test]
    fn test_incremental_fetch_serves_from_cache() {
        let class = ClassId::new(0x1000);
        let session = session();
        let mut stream = RecordStream::with_class(class, sample_record("p/Q", 2));
        let mut fetcher = DescriptorFetcher::new(&session, &mut stream);

        let parent = fetcher
            .get_and_cache_class_field(class, ClassInfoField::ParentClass)
            .unwrap();
        assert_eq!(parent.as_class(), Some(ClassId::new(0x100)));
        fetcher
            .get_and_cache_class_field(class, ClassInfoField::ParentClass)
            .unwrap();

        assert_eq!(stream.field_calls, 1);
        let desc = session.get_class_descriptor(class).unwrap();
        assert!(!desc.is_complete());
        assert_eq!(desc.missing_fields().len(), ClassInfoField::COUNT - 1);
    }

    #[test]
    fn test_uninitialized_class_is_asked_again() {
        let class = ClassId::new(0x1000);
        let session = session();
        let mut record = sample_record("lazy/Init", 1);
        record.class_initialized = false;
        let mut stream = RecordStream::with_class(class, record);
        stream.initialize_on_read = true;
        let mut fetcher = DescriptorFetcher::new(&session, &mut stream);

        let first = fetcher
            .get_and_cache_class_field(class, ClassInfoField::ClassInitialized)
            .unwrap();
        let second = fetcher
            .get_and_cache_class_field(class, ClassInfoField::ClassInitialized)
            .unwrap();
        let third = fetcher
            .get_and_cache_class_field(class, ClassInfoField::ClassInitialized)
            .unwrap();

        assert_eq!(first.as_bool(), Some(false));
        assert_eq!(second.as_bool(), Some(true));
        assert_eq!(third.as_bool(), Some(true));
        assert_eq!(stream.field_calls, 2);
    }

    #[test]
    fn test_multi_field_fetch_uses_one_round_trip() {
        let class = ClassId::new(0x1000);
        let session = session();
        let mut stream = RecordStream::with_class(class, sample_record("p/Q", 2));
        let mut fetcher = DescriptorFetcher::new(&session, &mut stream);

        fetcher
            .get_and_cache_class_field(class, ClassInfoField::TotalInstanceSize)
            .unwrap();
        let fields = [
            ClassInfoField::ClassLoader,
            ClassInfoField::TotalInstanceSize,
            ClassInfoField::ConstantPool,
        ];
        let values = fetcher.get_and_cache_class_fields(class, &fields).unwrap();

        assert_eq!(values.len(), 3);
        assert_eq!(values[0].as_loader(), Some(LoaderId::new(0x50)));
        assert_eq!(values[1].as_word(), Some(24));
        assert_eq!(values[2].as_word(), Some(0xc000));
        assert_eq!(stream.batch_calls, 1);
        assert_eq!(stream.field_calls, 1);
    }

    #[test]
    fn test_incremental_and_bulk_converge() {
        let class = ClassId::new(0x1000);
        let record = sample_record("conv/Erge", 3);

        let bulk_only = session();
        let mut stream = RecordStream::with_class(class, record.clone());
        DescriptorFetcher::new(&bulk_only, &mut stream)
            .fetch_class(class)
            .unwrap();

        let mixed = session();
        let mut stream = RecordStream::with_class(class, record.clone());
        let mut fetcher = DescriptorFetcher::new(&mixed, &mut stream);
        fetcher
            .get_and_cache_class_fields(
                class,
                &[ClassInfoField::Interfaces, ClassInfoField::ClassInitialized],
            )
            .unwrap();
        fetcher.fetch_class(class).unwrap();
        fetcher
            .get_and_cache_class_field(class, ClassInfoField::ArrayClass)
            .unwrap();

        let bulk_then_incremental = session();
        let mut stream = RecordStream::with_class(class, record);
        let mut fetcher = DescriptorFetcher::new(&bulk_then_incremental, &mut stream);
        fetcher.fetch_class(class).unwrap();
        fetcher
            .get_and_cache_class_field(class, ClassInfoField::Interfaces)
            .unwrap();

        let expected = bulk_only.get_class_descriptor(class).unwrap();
        assert_eq!(mixed.get_class_descriptor(class).unwrap(), expected);
        assert_eq!(bulk_then_incremental.get_class_descriptor(class).unwrap(), expected);
    }

    #[test]
    fn test_transport_failure_leaves_session_usable() {
        let class = ClassId::new(0x1000);
        let other = ClassId::new(0x2000);
        let session = session();
        let mut stream = RecordStream::with_class(class, sample_record("ok/Fine", 1));
        stream.records.insert(other, sample_record("ok/Other", 1));
        DescriptorFetcher::new(&session, &mut stream)
            .fetch_class(class)
            .unwrap();

        stream.fail = true;
        let err = DescriptorFetcher::new(&session, &mut stream)
            .get_or_fetch_class(other)
            .unwrap_err();
        assert_eq!(err, FetchError::Stream(StreamError::Disconnected));

        stream.fail = false;
        let mut fetcher = DescriptorFetcher::new(&session, &mut stream);
        assert!(fetcher.get_or_fetch_class(class).unwrap().is_some());
        assert!(fetcher.get_or_fetch_class(other).unwrap().is_some());
    }

    #[test]
    fn test_short_batch_is_rejected() {
        struct ShortStream;
        impl ServerStream for ShortStream {
            fn fetch_class_field(
                &mut self,
                _: ClassId,
                _: ClassInfoField,
            ) -> Result<ClassFieldValue, StreamError> {
                Err(StreamError::Disconnected)
            }
            fn fetch_class_fields(
                &mut self,
                _: ClassId,
                _: &[ClassInfoField],
            ) -> Result<Vec<ClassFieldValue>, StreamError> {
                Ok(vec![ClassFieldValue::Bool(true)])
            }
            fn fetch_full_class_descriptor(
                &mut self,
                _: ClassId,
            ) -> Result<ClassInfoRecord, StreamError> {
                Err(StreamError::Disconnected)
            }
            fn fetch_vm_info(&mut self) -> Result<VmInfo, StreamError> {
                Err(StreamError::Disconnected)
            }
            fn fetch_unloaded_classes(&mut self) -> Result<Vec<ClassId>, StreamError> {
                Ok(Vec::new())
            }
        }

        let session = session();
        let err = DescriptorFetcher::new(&session, &mut ShortStream)
            .get_and_cache_class_fields(
                ClassId::new(1),
                &[ClassInfoField::ClassInitialized, ClassInfoField::ClassFlags],
            )
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::Codec(CodecError::FieldCountMismatch {
                requested: 2,
                found: 1
            })
        );
        assert!(session.get_class_descriptor(ClassId::new(1)).is_none());
    }

    #[test]
    fn test_vm_info_and_unloaded_sync() {
        let class = ClassId::new(0x1000);
        let session = session();
        session.set_request_unloaded_classes(true);
        let mut stream = RecordStream::with_class(class, sample_record("gone/Soon", 1));
        stream.unloaded = vec![class];

        let mut fetcher = DescriptorFetcher::new(&session, &mut stream);
        fetcher.fetch_class(class).unwrap();
        fetcher.get_or_fetch_vm_info().unwrap();
        let info = fetcher.get_or_fetch_vm_info().unwrap();
        assert_eq!(info.system_class_loader, Some(LoaderId::new(0x10)));

        assert_eq!(fetcher.sync_unloaded_classes().unwrap(), 1);
        assert!(!session.request_unloaded_classes());
        assert_eq!(fetcher.get_or_fetch_class(class).unwrap(), None);
        assert_eq!(stream.vm_info_calls, 1);
        assert_eq!(stream.bulk_calls, 1);
    }
}
