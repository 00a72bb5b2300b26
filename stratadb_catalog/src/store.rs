//! Object store persistence for the catalog.
//!
//! Two kinds of files live under the catalog's prefix: numbered log files,
//! one per committed batch, and a single checkpoint file that is rewritten
//! periodically. Log files are written with a conditional put so that two
//! writers racing on the same sequence number produce exactly one file; the
//! loser observes [`PersistCatalogResult::AlreadyExists`] and absorbs the
//! winner's batch.
//!
//! Every file starts with a ten byte identifier followed by a big-endian
//! crc32 of the bitcode-encoded payload.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path as ObjPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::catalog::CatalogSequenceNumber;
use crate::log::OrderedCatalogBatch;
use crate::serialize::CatalogCheckpoint;

#[derive(Debug, thiserror::Error)]
pub enum CatalogStoreError {
    #[error("object store error: {0:?}")]
    ObjectStore(#[from] object_store::Error),

    #[error("unrecognized catalog file")]
    UnrecognizedFile,

    #[error("crc32 checksum mismatch in catalog file")]
    Crc32Mismatch,

    #[error("serialization error: {0}")]
    Serialize(#[from] bitcode::Error),

    #[error("unexpected error: {0:?}")]
    Unexpected(#[from] anyhow::Error),
}

type Result<T, E = CatalogStoreError> = std::result::Result<T, E>;

/// Outcome of a conditional log put.
#[derive(Debug, Copy, Clone)]
pub enum PersistCatalogResult {
    Success,
    /// Another writer already persisted a file at this sequence number.
    AlreadyExists,
}

/// File extension of catalog log files.
pub const CATALOG_LOG_FILE_EXTENSION: &str = "catalog";

/// File extension of the catalog checkpoint file.
pub const CATALOG_CHECKPOINT_FILE_EXTENSION: &str = "catalog.checkpoint";

const LOG_FILE_TYPE_IDENTIFIER: &[u8] = b"strata.log";
const CHECKPOINT_FILE_TYPE_IDENTIFIER: &[u8] = b"strata.ckp";

/// The catalog's connection to the object store.
#[derive(Debug)]
pub struct ObjectStoreCatalog {
    pub(crate) catalog_id: Arc<str>,
    checkpoint_interval: u64,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreCatalog {
    pub(crate) fn new(
        catalog_id: Arc<str>,
        checkpoint_interval: u64,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            catalog_id,
            checkpoint_interval,
            store,
        }
    }

    pub(crate) fn checkpoint_interval(&self) -> u64 {
        self.checkpoint_interval
    }

    fn log_prefix(&self) -> ObjPath {
        ObjPath::from(format!("{}/catalogs", self.catalog_id))
    }

    fn log_path(&self, sequence: CatalogSequenceNumber) -> ObjPath {
        ObjPath::from(format!(
            "{}/catalogs/{:020}.{}",
            self.catalog_id,
            sequence.get(),
            CATALOG_LOG_FILE_EXTENSION
        ))
    }

    fn checkpoint_path(&self) -> ObjPath {
        ObjPath::from(format!(
            "{}/_catalog.{}",
            self.catalog_id, CATALOG_CHECKPOINT_FILE_EXTENSION
        ))
    }

    /// The most recent checkpoint, or `None` for a catalog that has never
    /// been initialized.
    pub(crate) async fn load_checkpoint(&self) -> Result<Option<CatalogCheckpoint>> {
        match self.store.get(&self.checkpoint_path()).await {
            Ok(response) => {
                let bytes = response.bytes().await?;
                verify_and_deserialize(CHECKPOINT_FILE_TYPE_IDENTIFIER, bytes).map(Some)
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// All log files with a sequence number greater than `sequence`, in
    /// ascending order.
    pub(crate) async fn load_logs_following(
        &self,
        sequence: CatalogSequenceNumber,
    ) -> Result<Vec<OrderedCatalogBatch>> {
        let prefix = self.log_prefix();
        let mut listing = self.store.list(Some(&prefix));
        let mut sequences = Vec::new();
        while let Some(meta) = listing.next().await {
            let meta = meta?;
            let Some(found) = parse_log_sequence(meta.location.filename()) else {
                debug!(location = %meta.location, "skipping non-log file in catalog prefix");
                continue;
            };
            if found > sequence {
                sequences.push(found);
            }
        }
        sequences.sort_unstable();
        let mut batches = Vec::with_capacity(sequences.len());
        for found in sequences {
            let bytes = self.store.get(&self.log_path(found)).await?.bytes().await?;
            batches.push(verify_and_deserialize(LOG_FILE_TYPE_IDENTIFIER, bytes)?);
        }
        Ok(batches)
    }

    /// The log file at exactly `sequence`, if one was persisted.
    pub(crate) async fn load_log(
        &self,
        sequence: CatalogSequenceNumber,
    ) -> Result<Option<OrderedCatalogBatch>> {
        match self.store.get(&self.log_path(sequence)).await {
            Ok(response) => {
                let bytes = response.bytes().await?;
                verify_and_deserialize(LOG_FILE_TYPE_IDENTIFIER, bytes).map(Some)
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Persists a committed batch with a create-only put. Exactly one writer
    /// wins each sequence number.
    pub(crate) async fn persist_log(
        &self,
        batch: &OrderedCatalogBatch,
    ) -> Result<PersistCatalogResult> {
        let bytes = serialize_catalog_file(LOG_FILE_TYPE_IDENTIFIER, batch)?;
        match self
            .store
            .put_opts(
                &self.log_path(batch.sequence_number()),
                PutPayload::from(bytes),
                PutOptions::from(PutMode::Create),
            )
            .await
        {
            Ok(_) => Ok(PersistCatalogResult::Success),
            Err(object_store::Error::AlreadyExists { .. }) => {
                Ok(PersistCatalogResult::AlreadyExists)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Rewrites the checkpoint file. Checkpoints only ever move forward, so
    /// last-writer-wins is safe here.
    pub(crate) async fn persist_checkpoint(&self, checkpoint: &CatalogCheckpoint) -> Result<()> {
        let bytes = serialize_catalog_file(CHECKPOINT_FILE_TYPE_IDENTIFIER, checkpoint)?;
        self.store
            .put(&self.checkpoint_path(), PutPayload::from(bytes))
            .await?;
        Ok(())
    }
}

fn parse_log_sequence(filename: Option<&str>) -> Option<CatalogSequenceNumber> {
    filename?
        .strip_suffix(&format!(".{CATALOG_LOG_FILE_EXTENSION}"))?
        .parse()
        .ok()
        .map(CatalogSequenceNumber::new)
}

fn serialize_catalog_file<T: Serialize>(identifier: &'static [u8], payload: &T) -> Result<Bytes> {
    let data = bitcode::serialize(payload)?;
    let checksum = crc32fast::hash(&data);
    let mut buf = Vec::with_capacity(identifier.len() + size_of::<u32>() + data.len());
    buf.extend_from_slice(identifier);
    buf.extend_from_slice(&checksum.to_be_bytes());
    buf.extend_from_slice(&data);
    Ok(buf.into())
}

fn verify_and_deserialize<T: DeserializeOwned>(
    identifier: &'static [u8],
    bytes: Bytes,
) -> Result<T> {
    let data = bytes
        .strip_prefix(identifier)
        .ok_or(CatalogStoreError::UnrecognizedFile)?;
    if data.len() < size_of::<u32>() {
        return Err(CatalogStoreError::UnrecognizedFile);
    }
    let (checksum, data) = data.split_at(size_of::<u32>());
    let expected = u32::from_be_bytes(checksum.try_into().expect("checksum is four bytes"));
    if crc32fast::hash(data) != expected {
        return Err(CatalogStoreError::Crc32Mismatch);
    }
    Ok(bitcode::deserialize(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratadb_id::CatalogId;
    use crate::log::{CatalogBatch, CatalogOp, CreateNamespaceLog};
    use crate::logical::DataModel;
    use object_store::memory::InMemory;
    use stratadb_id::NamespaceId;

    fn test_store() -> ObjectStoreCatalog {
        ObjectStoreCatalog::new("test-host".into(), 10, Arc::new(InMemory::new()))
    }

    fn batch_at(sequence: u64) -> OrderedCatalogBatch {
        OrderedCatalogBatch::new(
            CatalogBatch::new(
                0,
                vec![CatalogOp::CreateNamespace(CreateNamespaceLog {
                    namespace_id: NamespaceId::new(sequence),
                    name: format!("ns{sequence}").into(),
                    data_model: DataModel::Relational,
                    case_sensitive: false,
                })],
            ),
            CatalogSequenceNumber::new(sequence),
        )
    }

    #[tokio::test]
    async fn log_round_trip() {
        let store = test_store();
        let batch = batch_at(1);
        assert!(matches!(
            store.persist_log(&batch).await.unwrap(),
            PersistCatalogResult::Success
        ));
        let loaded = store
            .load_log(CatalogSequenceNumber::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, batch);
    }

    #[tokio::test]
    async fn second_writer_at_same_sequence_loses() {
        let store = test_store();
        store.persist_log(&batch_at(1)).await.unwrap();
        assert!(matches!(
            store.persist_log(&batch_at(1)).await.unwrap(),
            PersistCatalogResult::AlreadyExists
        ));
    }

    #[tokio::test]
    async fn missing_files_load_as_none() {
        let store = test_store();
        assert!(store.load_checkpoint().await.unwrap().is_none());
        assert!(
            store
                .load_log(CatalogSequenceNumber::new(42))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn logs_following_are_filtered_and_ordered() {
        let store = test_store();
        for sequence in [3, 1, 5, 2, 4] {
            store.persist_log(&batch_at(sequence)).await.unwrap();
        }
        let following = store
            .load_logs_following(CatalogSequenceNumber::new(2))
            .await
            .unwrap();
        let sequences: Vec<u64> = following
            .iter()
            .map(|b| b.sequence_number().get())
            .collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn corrupted_log_is_rejected() {
        let inner = Arc::new(InMemory::new());
        let store = ObjectStoreCatalog::new("test-host".into(), 10, Arc::clone(&inner) as _);
        let batch = batch_at(1);
        let mut bytes = serialize_catalog_file(LOG_FILE_TYPE_IDENTIFIER, &batch)
            .unwrap()
            .to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        inner
            .put(
                &store.log_path(CatalogSequenceNumber::new(1)),
                PutPayload::from(Bytes::from(bytes)),
            )
            .await
            .unwrap();
        let err = store.load_log(CatalogSequenceNumber::new(1)).await.unwrap_err();
        assert!(matches!(err, CatalogStoreError::Crc32Mismatch));
    }

    #[tokio::test]
    async fn wrong_identifier_is_rejected() {
        let err =
            verify_and_deserialize::<OrderedCatalogBatch>(LOG_FILE_TYPE_IDENTIFIER, Bytes::from_static(b"not a catalog file"))
                .unwrap_err();
        assert!(matches!(err, CatalogStoreError::UnrecognizedFile));
    }
}
