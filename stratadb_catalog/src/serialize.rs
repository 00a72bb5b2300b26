//! Serialized forms of catalog state.
//!
//! A [`Repository`] keeps a derived name index next to its authoritative
//! id map, so it serializes as the id map alone and rebuilds the index on
//! the way back in. [`CatalogCheckpoint`] is the durable image of an
//! [`InnerCatalog`] at one sequence number: the logical, allocation, and
//! administrative layers plus the id allocator's high-water marks. The
//! physical layer is deliberately absent; adapters re-register their
//! structures on reconnect.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stratadb_id::{
    AdapterId, AllocationId, CatalogId, EntityId, FieldId, IdAllocatorState, InterfaceId,
    NamespaceId, PartitionGroupId, PartitionId, PlacementId, SerdeVecMap, UserId,
};
use uuid::Uuid;

use crate::allocation::{
    AllocationCatalog, AllocationColumn, AllocationPartition, PartitionDefinition,
    PartitionDistribution, PartitionGroupDefinition, PlacementDefinition,
};
use crate::catalog::{
    AdapterDefinition, CatalogSequenceNumber, InnerCatalog, NamespaceSchema,
    QueryInterfaceDefinition, Repository, UserDefinition,
};
use crate::physical::PhysicalCatalog;
use crate::resource::CatalogResource;

impl<I, R> Serialize for Repository<I, R>
where
    I: CatalogId,
    R: CatalogResource<Identifier = I> + Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.repo.serialize(serializer)
    }
}

impl<'de, I, R> Deserialize<'de> for Repository<I, R>
where
    I: CatalogId,
    R: CatalogResource<Identifier = I> + Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let repo = SerdeVecMap::<I, Arc<R>>::deserialize(deserializer)?;
        let id_name_map = repo.iter().map(|(id, r)| (*id, r.name())).collect();
        Ok(Self { id_name_map, repo })
    }
}

/// A complete persisted image of the catalog at one sequence number.
///
/// Everything between a checkpoint and the head of the log is recovered by
/// replaying the log files that follow it.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CatalogCheckpoint {
    sequence: CatalogSequenceNumber,
    catalog_id: Arc<str>,
    catalog_uuid: Uuid,
    ids: IdAllocatorState,
    namespaces: Repository<NamespaceId, NamespaceSchema>,
    allocation: AllocationSnapshot,
    adapters: Repository<AdapterId, AdapterDefinition>,
    users: Repository<UserId, UserDefinition>,
    interfaces: Repository<InterfaceId, QueryInterfaceDefinition>,
}

impl CatalogCheckpoint {
    pub(crate) fn from_inner(inner: &InnerCatalog, ids: IdAllocatorState) -> Self {
        Self {
            sequence: inner.sequence,
            catalog_id: Arc::clone(&inner.catalog_id),
            catalog_uuid: inner.catalog_uuid,
            ids,
            namespaces: inner.namespaces.clone(),
            allocation: AllocationSnapshot::from(&inner.allocation),
            adapters: inner.adapters.clone(),
            users: inner.users.clone(),
            interfaces: inner.interfaces.clone(),
        }
    }

    /// Reconstructs the in-memory state, with every derived index rebuilt.
    pub(crate) fn into_inner(self) -> (InnerCatalog, IdAllocatorState) {
        let mut inner = InnerCatalog {
            sequence: self.sequence,
            catalog_id: self.catalog_id,
            catalog_uuid: self.catalog_uuid,
            namespaces: self.namespaces,
            allocation: self.allocation.into(),
            physical: PhysicalCatalog::default(),
            adapters: self.adapters,
            users: self.users,
            interfaces: self.interfaces,
            entity_index: Default::default(),
        };
        inner.rebuild_indexes();
        (inner, self.ids)
    }

    pub(crate) fn sequence_number(&self) -> CatalogSequenceNumber {
        self.sequence
    }
}

/// The authoritative maps of an [`AllocationCatalog`], without its lookup
/// indexes.
#[derive(Debug, Serialize, Deserialize)]
struct AllocationSnapshot {
    placements: SerdeVecMap<PlacementId, Arc<PlacementDefinition>>,
    columns: SerdeVecMap<(PlacementId, FieldId), AllocationColumn>,
    groups: SerdeVecMap<PartitionGroupId, Arc<PartitionGroupDefinition>>,
    partitions: SerdeVecMap<PartitionId, Arc<PartitionDefinition>>,
    distributions: SerdeVecMap<EntityId, PartitionDistribution>,
    allocations: SerdeVecMap<AllocationId, Arc<AllocationPartition>>,
}

impl From<&AllocationCatalog> for AllocationSnapshot {
    fn from(allocation: &AllocationCatalog) -> Self {
        Self {
            placements: allocation.placements.clone(),
            columns: allocation.columns.clone(),
            groups: allocation.groups.clone(),
            partitions: allocation.partitions.clone(),
            distributions: allocation.distributions.clone(),
            allocations: allocation.allocations.clone(),
        }
    }
}

impl From<AllocationSnapshot> for AllocationCatalog {
    fn from(snap: AllocationSnapshot) -> Self {
        // Indexes are rebuilt by the caller via InnerCatalog::rebuild_indexes.
        Self {
            placements: snap.placements,
            columns: snap.columns,
            groups: snap.groups,
            partitions: snap.partitions,
            distributions: snap.distributions,
            allocations: snap.allocations,
            placement_index: Default::default(),
            allocation_index: Default::default(),
            logical_placements: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratadb_id::CatalogId;
    use crate::log::{CatalogBatch, CatalogOp, CreateNamespaceLog, CreateTableLog};
    use crate::logical::DataModel;
    use pretty_assertions::assert_eq;
    use stratadb_id::IdAllocator;

    fn populated_inner() -> InnerCatalog {
        let mut inner = InnerCatalog::new("ckpt-test".into(), Uuid::new_v4());
        inner
            .apply_batch(&CatalogBatch::new(
                0,
                vec![
                    CatalogOp::CreateNamespace(CreateNamespaceLog {
                        namespace_id: NamespaceId::new(0),
                        name: "public".into(),
                        data_model: DataModel::Relational,
                        case_sensitive: false,
                    }),
                    CatalogOp::CreateTable(CreateTableLog {
                        namespace_id: NamespaceId::new(0),
                        table_id: EntityId::new(0),
                        name: "emp".into(),
                        columns: vec![],
                        constraints: vec![],
                    }),
                ],
            ))
            .unwrap();
        inner.sequence = CatalogSequenceNumber::new(1);
        inner
    }

    #[test]
    fn repository_round_trip_restores_name_index() {
        let mut repo: Repository<NamespaceId, NamespaceSchema> = Repository::new();
        repo.insert(
            NamespaceId::new(3),
            NamespaceSchema::new(NamespaceId::new(3), "sales".into(), DataModel::Document, true),
        )
        .unwrap();
        let json = serde_json::to_string(&repo).unwrap();
        let back: Repository<NamespaceId, NamespaceSchema> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, repo);
        assert_eq!(back.name_to_id("sales"), Some(NamespaceId::new(3)));
    }

    #[test]
    fn checkpoint_round_trip_preserves_state_and_ids() {
        let inner = populated_inner();
        let ids = IdAllocator::default();
        ids.next_namespace_id();
        ids.next_entity_id();

        let checkpoint = CatalogCheckpoint::from_inner(&inner, ids.state());
        let bytes = bitcode::serialize(&checkpoint).unwrap();
        let restored: CatalogCheckpoint = bitcode::deserialize(&bytes).unwrap();
        assert_eq!(restored.sequence_number(), CatalogSequenceNumber::new(1));

        let (restored_inner, id_state) = restored.into_inner();
        assert_eq!(restored_inner, inner);
        assert_eq!(id_state, ids.state());
        // The derived index comes back without being persisted.
        assert_eq!(
            restored_inner.namespace_id_of(EntityId::new(0)),
            Some(NamespaceId::new(0))
        );
    }

    #[test]
    fn checkpoint_drops_the_physical_layer() {
        let mut inner = populated_inner();
        inner
            .physical
            .ensure_store(AdapterId::new(7))
            .put(crate::physical::PhysicalEntity::Table(Arc::new(
                crate::physical::PhysicalTable {
                    id: stratadb_id::PhysicalId::new(0),
                    logical_id: EntityId::new(0),
                    allocation_id: AllocationId::new(0),
                    adapter_id: AdapterId::new(7),
                    namespace_name: "public".into(),
                    name: "emp".into(),
                    columns: vec![],
                },
            )));
        let checkpoint = CatalogCheckpoint::from_inner(&inner, IdAllocatorState::default());
        let (restored, _) = checkpoint.into_inner();
        assert!(restored.physical.stores.is_empty());
    }
}
