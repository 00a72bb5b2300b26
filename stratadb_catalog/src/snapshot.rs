//! Immutable, point-in-time views of the catalog.
//!
//! A snapshot is captured at publication and never changes afterwards, so
//! planners and executors can hold one across a whole query without seeing
//! concurrent DDL. Snapshots compare and hash structurally.

use std::sync::Arc;

use stratadb_id::{
    AdapterId, AllocationId, EntityId, FieldId, InterfaceId, NamespaceId, PartitionGroupId,
    PartitionId, PhysicalId, PlacementId, UserId,
};
use uuid::Uuid;

use crate::allocation::{
    AllocationCatalog, AllocationColumn, AllocationPartition, PartitionDefinition,
    PartitionDistribution, PartitionGroupDefinition, PlacementDefinition,
};
use crate::catalog::{
    AdapterDefinition, CatalogSequenceNumber, InnerCatalog, NamespaceSchema,
    QueryInterfaceDefinition, UserDefinition,
};
use crate::logical::{
    CollectionDefinition, ColumnDefinition, ConstraintDefinition, GraphDefinition, LogicalEntity,
    Pattern, TableDefinition,
};
use crate::physical::{PhysicalEntity, StoreCatalog};

/// One immutable catalog state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Snapshot {
    inner: InnerCatalog,
}

impl Snapshot {
    pub(crate) fn from_inner(inner: &InnerCatalog) -> Self {
        Self {
            inner: inner.clone(),
        }
    }

    pub fn sequence_number(&self) -> CatalogSequenceNumber {
        self.inner.sequence_number()
    }

    pub fn catalog_uuid(&self) -> Uuid {
        self.inner.catalog_uuid()
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<NamespaceSchema>> {
        self.inner.namespace_by_name(name)
    }

    pub fn namespace_by_id(&self, id: NamespaceId) -> Option<Arc<NamespaceSchema>> {
        self.inner.namespace_by_id(id)
    }

    pub fn namespaces(&self, pattern: Option<&Pattern>) -> Vec<Arc<NamespaceSchema>> {
        self.inner
            .namespaces()
            .resource_iter()
            .filter(|schema| pattern.is_none_or(|p| p.matches(&schema.name)))
            .map(Arc::clone)
            .collect()
    }

    /// Resolves an entity inside one namespace, honoring the namespace's
    /// case-sensitivity rule.
    pub fn logical_entity(&self, namespace: &str, name: &str) -> Option<LogicalEntity> {
        self.namespace(namespace)?.entity_by_name(name)
    }

    pub fn logical_entity_by_id(&self, id: EntityId) -> Option<LogicalEntity> {
        self.inner.logical_entity(id)
    }

    /// Global lookup by bare name, probing relational namespaces first,
    /// then document, then graph.
    pub fn find_entity(&self, name: &str) -> Option<LogicalEntity> {
        let relational = self
            .inner
            .namespaces()
            .resource_iter()
            .filter(|s| s.tables().is_some());
        let document = self
            .inner
            .namespaces()
            .resource_iter()
            .filter(|s| s.collections().is_some());
        let graph = self
            .inner
            .namespaces()
            .resource_iter()
            .filter(|s| s.graphs().is_some());
        relational
            .chain(document)
            .chain(graph)
            .find_map(|schema| schema.entity_by_name(name))
    }

    pub fn rel(&self) -> RelSnapshot<'_> {
        RelSnapshot { inner: &self.inner }
    }

    pub fn doc(&self) -> DocSnapshot<'_> {
        DocSnapshot { inner: &self.inner }
    }

    pub fn graph(&self) -> GraphSnapshot<'_> {
        GraphSnapshot { inner: &self.inner }
    }

    pub fn alloc(&self) -> AllocSnapshot<'_> {
        AllocSnapshot {
            allocation: self.inner.allocation(),
        }
    }

    pub fn physical(&self) -> PhysicalSnapshot<'_> {
        PhysicalSnapshot { inner: &self.inner }
    }

    pub fn adapter(&self, unique_name: &str) -> Option<Arc<AdapterDefinition>> {
        self.inner
            .adapters()
            .get_by_name(&unique_name.to_lowercase())
    }

    pub fn adapter_by_id(&self, id: AdapterId) -> Option<Arc<AdapterDefinition>> {
        self.inner.adapters().get_by_id(&id)
    }

    pub fn adapters(&self) -> Vec<Arc<AdapterDefinition>> {
        self.inner.adapters().resource_iter().map(Arc::clone).collect()
    }

    pub fn user(&self, name: &str) -> Option<Arc<UserDefinition>> {
        self.inner.users().get_by_name(&name.to_lowercase())
    }

    pub fn user_by_id(&self, id: UserId) -> Option<Arc<UserDefinition>> {
        self.inner.users().get_by_id(&id)
    }

    pub fn users(&self) -> Vec<Arc<UserDefinition>> {
        self.inner.users().resource_iter().map(Arc::clone).collect()
    }

    pub fn interface(&self, name: &str) -> Option<Arc<QueryInterfaceDefinition>> {
        self.inner.interfaces().get_by_name(&name.to_lowercase())
    }

    pub fn interface_by_id(&self, id: InterfaceId) -> Option<Arc<QueryInterfaceDefinition>> {
        self.inner.interfaces().get_by_id(&id)
    }

    pub fn interfaces(&self) -> Vec<Arc<QueryInterfaceDefinition>> {
        self.inner
            .interfaces()
            .resource_iter()
            .map(Arc::clone)
            .collect()
    }
}

/// Relational facet of a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct RelSnapshot<'a> {
    inner: &'a InnerCatalog,
}

impl RelSnapshot<'_> {
    pub fn table(&self, namespace: &str, name: &str) -> Option<Arc<TableDefinition>> {
        self.inner.namespace_by_name(namespace)?.table_by_name(name)
    }

    pub fn table_by_id(&self, id: EntityId) -> Option<Arc<TableDefinition>> {
        self.inner.table(id)
    }

    pub fn tables(&self, namespace: &str, pattern: Option<&Pattern>) -> Vec<Arc<TableDefinition>> {
        let Some(schema) = self.inner.namespace_by_name(namespace) else {
            return Vec::new();
        };
        let Some(repo) = schema.tables() else {
            return Vec::new();
        };
        repo.resource_iter()
            .filter(|table| pattern.is_none_or(|p| p.matches(&table.name)))
            .map(Arc::clone)
            .collect()
    }

    pub fn column(&self, table_id: EntityId, name: &str) -> Option<Arc<ColumnDefinition>> {
        let namespace_id = self.inner.namespace_id_of(table_id)?;
        let schema = self.inner.namespace_by_id(namespace_id)?;
        let table = schema.table_by_id(table_id)?;
        table.column_by_name(&schema.normalize(name))
    }

    pub fn column_by_id(&self, table_id: EntityId, column_id: FieldId) -> Option<Arc<ColumnDefinition>> {
        self.inner.table(table_id)?.column_by_id(column_id)
    }

    pub fn columns(&self, table_id: EntityId) -> Vec<Arc<ColumnDefinition>> {
        self.inner
            .table(table_id)
            .map(|t| t.columns_in_position_order())
            .unwrap_or_default()
    }

    pub fn constraints(&self, table_id: EntityId) -> Vec<ConstraintDefinition> {
        self.inner
            .table(table_id)
            .map(|t| t.constraints.clone())
            .unwrap_or_default()
    }

    pub fn primary_key(&self, table_id: EntityId) -> Option<ConstraintDefinition> {
        self.inner.table(table_id)?.primary_key().cloned()
    }

    /// Views and materialized views reading from the given entity.
    pub fn views_on(&self, entity_id: EntityId) -> Vec<Arc<TableDefinition>> {
        let mut views = Vec::new();
        for (_, schema) in self.inner.namespaces().iter() {
            let Some(tables) = schema.tables() else { continue };
            for table in tables.resource_iter() {
                if let Some(view) = &table.view {
                    if view.underlying.contains(&entity_id) {
                        views.push(Arc::clone(table));
                    }
                }
            }
        }
        views
    }
}

/// Document facet of a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct DocSnapshot<'a> {
    inner: &'a InnerCatalog,
}

impl DocSnapshot<'_> {
    pub fn collection(&self, namespace: &str, name: &str) -> Option<Arc<CollectionDefinition>> {
        let schema = self.inner.namespace_by_name(namespace)?;
        schema
            .collections()?
            .get_by_name(&schema.normalize(name))
    }

    pub fn collection_by_id(&self, id: EntityId) -> Option<Arc<CollectionDefinition>> {
        let namespace_id = self.inner.namespace_id_of(id)?;
        self.inner
            .namespace_by_id(namespace_id)?
            .collections()?
            .get_by_id(&id)
    }

    pub fn collections(
        &self,
        namespace: &str,
        pattern: Option<&Pattern>,
    ) -> Vec<Arc<CollectionDefinition>> {
        let Some(schema) = self.inner.namespace_by_name(namespace) else {
            return Vec::new();
        };
        let Some(repo) = schema.collections() else {
            return Vec::new();
        };
        repo.resource_iter()
            .filter(|c| pattern.is_none_or(|p| p.matches(&c.name)))
            .map(Arc::clone)
            .collect()
    }
}

/// Graph facet of a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct GraphSnapshot<'a> {
    inner: &'a InnerCatalog,
}

impl GraphSnapshot<'_> {
    pub fn graph(&self, namespace: &str, name: &str) -> Option<Arc<GraphDefinition>> {
        let schema = self.inner.namespace_by_name(namespace)?;
        schema.graphs()?.get_by_name(&schema.normalize(name))
    }

    pub fn graph_by_id(&self, id: EntityId) -> Option<Arc<GraphDefinition>> {
        let namespace_id = self.inner.namespace_id_of(id)?;
        self.inner
            .namespace_by_id(namespace_id)?
            .graphs()?
            .get_by_id(&id)
    }

    pub fn graphs(&self, namespace: &str, pattern: Option<&Pattern>) -> Vec<Arc<GraphDefinition>> {
        let Some(schema) = self.inner.namespace_by_name(namespace) else {
            return Vec::new();
        };
        let Some(repo) = schema.graphs() else {
            return Vec::new();
        };
        repo.resource_iter()
            .filter(|g| pattern.is_none_or(|p| p.matches(&g.name)))
            .map(Arc::clone)
            .collect()
    }
}

/// Allocation facet of a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct AllocSnapshot<'a> {
    allocation: &'a AllocationCatalog,
}

impl AllocSnapshot<'_> {
    pub fn placement(&self, id: PlacementId) -> Option<Arc<PlacementDefinition>> {
        self.allocation.placement(id)
    }

    pub fn placement_for(
        &self,
        logical_id: EntityId,
        adapter_id: AdapterId,
    ) -> Option<Arc<PlacementDefinition>> {
        self.allocation.placement_for(logical_id, adapter_id)
    }

    pub fn placements_for_entity(&self, logical_id: EntityId) -> Vec<Arc<PlacementDefinition>> {
        self.allocation.placements_for_entity(logical_id)
    }

    pub fn placements_on_adapter(&self, adapter_id: AdapterId) -> Vec<Arc<PlacementDefinition>> {
        self.allocation.placements_on_adapter(adapter_id)
    }

    pub fn columns_on_placement(&self, placement_id: PlacementId) -> Vec<AllocationColumn> {
        self.allocation.columns_on_placement(placement_id)
    }

    pub fn placements_of_column(
        &self,
        logical_id: EntityId,
        column_id: FieldId,
    ) -> Vec<AllocationColumn> {
        self.allocation.placements_of_column(logical_id, column_id)
    }

    pub fn group(&self, id: PartitionGroupId) -> Option<Arc<PartitionGroupDefinition>> {
        self.allocation.group(id)
    }

    pub fn groups_for_entity(&self, logical_id: EntityId) -> Vec<Arc<PartitionGroupDefinition>> {
        self.allocation.groups_for_entity(logical_id)
    }

    pub fn partition(&self, id: PartitionId) -> Option<Arc<PartitionDefinition>> {
        self.allocation.partition(id)
    }

    pub fn partitions_for_entity(&self, logical_id: EntityId) -> Vec<Arc<PartitionDefinition>> {
        self.allocation.partitions_for_entity(logical_id)
    }

    pub fn partitions_in_group(&self, group_id: PartitionGroupId) -> Vec<Arc<PartitionDefinition>> {
        self.allocation.partitions_in_group(group_id)
    }

    pub fn distribution(&self, logical_id: EntityId) -> Option<&PartitionDistribution> {
        self.allocation.distribution(logical_id)
    }

    pub fn allocation(&self, id: AllocationId) -> Option<Arc<AllocationPartition>> {
        self.allocation.allocation(id)
    }

    pub fn allocation_for(
        &self,
        placement_id: PlacementId,
        partition_id: PartitionId,
    ) -> Option<Arc<AllocationPartition>> {
        self.allocation.allocation_for(placement_id, partition_id)
    }

    pub fn allocations_on_placement(
        &self,
        placement_id: PlacementId,
    ) -> Vec<Arc<AllocationPartition>> {
        self.allocation.allocations_on_placement(placement_id)
    }

    pub fn allocations_of_partition(
        &self,
        partition_id: PartitionId,
    ) -> Vec<Arc<AllocationPartition>> {
        self.allocation.allocations_of_partition(partition_id)
    }

    pub fn allocations_for_entity(&self, logical_id: EntityId) -> Vec<Arc<AllocationPartition>> {
        self.allocation.allocations_for_entity(logical_id)
    }
}

/// Physical facet of a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalSnapshot<'a> {
    inner: &'a InnerCatalog,
}

impl PhysicalSnapshot<'_> {
    pub fn store(&self, adapter_id: AdapterId) -> Option<&StoreCatalog> {
        self.inner.physical().store(adapter_id)
    }

    pub fn entity(&self, adapter_id: AdapterId, id: PhysicalId) -> Option<&PhysicalEntity> {
        self.inner.physical().physical(adapter_id, id)
    }

    pub fn from_allocation(
        &self,
        adapter_id: AdapterId,
        allocation_id: AllocationId,
    ) -> Vec<&PhysicalEntity> {
        self.inner.physical().from_allocation(adapter_id, allocation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratadb_id::CatalogId;
    use crate::catalog::CatalogError;
    use crate::log::{
        CatalogBatch, CatalogOp, CreateCollectionLog, CreateNamespaceLog, CreateTableLog,
    };
    use crate::logical::DataModel;
    use pretty_assertions::assert_eq;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn populated_inner() -> Result<InnerCatalog, CatalogError> {
        let mut inner = InnerCatalog::new("snap-test".into(), Uuid::new_v4());
        inner.apply_batch(&CatalogBatch::new(
            0,
            vec![
                CatalogOp::CreateNamespace(CreateNamespaceLog {
                    namespace_id: NamespaceId::new(1),
                    name: "public".into(),
                    data_model: DataModel::Relational,
                    case_sensitive: false,
                }),
                CatalogOp::CreateNamespace(CreateNamespaceLog {
                    namespace_id: NamespaceId::new(2),
                    name: "docs".into(),
                    data_model: DataModel::Document,
                    case_sensitive: false,
                }),
                CatalogOp::CreateTable(CreateTableLog {
                    namespace_id: NamespaceId::new(1),
                    table_id: EntityId::new(10),
                    name: "shared".into(),
                    columns: vec![],
                    constraints: vec![],
                }),
                CatalogOp::CreateCollection(CreateCollectionLog {
                    namespace_id: NamespaceId::new(2),
                    collection_id: EntityId::new(11),
                    name: "shared".into(),
                }),
            ],
        ))?;
        Ok(inner)
    }

    #[test]
    fn find_entity_prefers_relational_over_document() {
        let inner = populated_inner().unwrap();
        let snapshot = Snapshot::from_inner(&inner);
        let found = snapshot.find_entity("shared").unwrap();
        assert_eq!(found.id(), EntityId::new(10));
        assert_eq!(found.data_model(), DataModel::Relational);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutations() {
        let mut inner = populated_inner().unwrap();
        let snapshot = Snapshot::from_inner(&inner);
        inner
            .apply_batch(&CatalogBatch::new(
                1,
                vec![CatalogOp::CreateTable(CreateTableLog {
                    namespace_id: NamespaceId::new(1),
                    table_id: EntityId::new(12),
                    name: "later".into(),
                    columns: vec![],
                    constraints: vec![],
                })],
            ))
            .unwrap();
        assert!(snapshot.rel().table("public", "later").is_none());
        assert!(inner.table(EntityId::new(12)).is_some());
    }

    #[test]
    fn snapshots_compare_and_hash_structurally() {
        let inner = populated_inner().unwrap();
        let a = Snapshot::from_inner(&inner);
        let b = Snapshot::from_inner(&inner);
        assert_eq!(a, b);
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn pattern_filters_table_listing() {
        let mut inner = populated_inner().unwrap();
        inner
            .apply_batch(&CatalogBatch::new(
                1,
                vec![CatalogOp::CreateTable(CreateTableLog {
                    namespace_id: NamespaceId::new(1),
                    table_id: EntityId::new(12),
                    name: "emp_salary".into(),
                    columns: vec![],
                    constraints: vec![],
                })],
            ))
            .unwrap();
        let snapshot = Snapshot::from_inner(&inner);
        let pattern = Pattern::of("emp%", false);
        let tables = snapshot.rel().tables("public", Some(&pattern));
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name.as_ref(), "emp_salary");
        let all = snapshot.rel().tables("public", None);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn case_insensitive_probe_round_trips() {
        let inner = populated_inner().unwrap();
        let snapshot = Snapshot::from_inner(&inner);
        // Stored lower-cased; probes in any casing resolve.
        assert!(snapshot.rel().table("public", "SHARED").is_some());
        assert!(snapshot.rel().table("PUBLIC", "Shared").is_some());
        assert!(snapshot.doc().collection("docs", "Shared").is_some());
    }
}
