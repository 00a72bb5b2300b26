//! Catalog operations and the batches that carry them through commit,
//! persistence, and broadcast.
//!
//! Every mutation of catalog state is expressed as a [`CatalogOp`]. A
//! [`CatalogBatch`] groups the ops of one logical change so they apply
//! all-or-nothing; an [`OrderedCatalogBatch`] is a batch stamped with the
//! sequence number it committed at. Physical-layer ops ride along in
//! batches but are not written to the durable log, since adapters rebuild
//! that state at startup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stratadb_id::{
    AdapterId, AllocationId, ConstraintId, EntityId, FieldId, IdAllocator, InterfaceId,
    NamespaceId, PartitionGroupId, PartitionId, PhysicalId, PlacementId, UserId,
};

use crate::allocation::{
    AllocationColumn, AllocationPartition, DataPlacementRole, PartitionDefinition,
    PartitionDistribution, PartitionGroupDefinition, PlacementDefinition,
};
use crate::catalog::{
    AdapterDefinition, CatalogSequenceNumber, QueryInterfaceDefinition, UserDefinition,
};
use crate::logical::{
    ColumnDefinition, ConstraintDefinition, DataModel, EntityType, PolyType, ViewDefinition,
};
use crate::physical::{
    PhysicalCollection, PhysicalColumn, PhysicalGraph, PhysicalTable,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogBatch {
    pub time_ns: i64,
    pub ops: Vec<CatalogOp>,
}

impl CatalogBatch {
    pub fn new(time_ns: i64, ops: Vec<CatalogOp>) -> Self {
        Self { time_ns, ops }
    }

    /// The batch with non-durable ops removed. The result may be empty;
    /// empty batches are still persisted so the sequence chain stays
    /// contiguous for replay.
    pub fn durable_only(&self) -> CatalogBatch {
        CatalogBatch {
            time_ns: self.time_ns,
            ops: self.ops.iter().filter(|op| op.is_durable()).cloned().collect(),
        }
    }

    /// Advances the id allocator past every id the batch references, so a
    /// replayed catalog never re-issues an id seen in the log.
    pub fn observe_ids(&self, ids: &IdAllocator) {
        for op in &self.ops {
            op.observe_ids(ids);
        }
    }
}

/// A committed batch, stamped with its position in the catalog log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedCatalogBatch {
    catalog_batch: CatalogBatch,
    sequence_number: CatalogSequenceNumber,
}

impl OrderedCatalogBatch {
    pub fn new(catalog_batch: CatalogBatch, sequence_number: CatalogSequenceNumber) -> Self {
        Self {
            catalog_batch,
            sequence_number,
        }
    }

    pub fn sequence_number(&self) -> CatalogSequenceNumber {
        self.sequence_number
    }

    pub fn batch(&self) -> &CatalogBatch {
        &self.catalog_batch
    }

    pub fn into_batch(self) -> CatalogBatch {
        self.catalog_batch
    }
}

impl PartialOrd for OrderedCatalogBatch {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedCatalogBatch {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence_number.cmp(&other.sequence_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogOp {
    CreateNamespace(CreateNamespaceLog),
    RenameNamespace(RenameNamespaceLog),
    DropNamespace(DropNamespaceLog),
    CreateTable(CreateTableLog),
    CreateView(CreateViewLog),
    CreateCollection(CreateCollectionLog),
    CreateGraph(CreateGraphLog),
    RenameEntity(RenameEntityLog),
    DropEntity(DropEntityLog),
    AddColumn(AddColumnLog),
    DropColumn(DropColumnLog),
    AddConstraint(AddConstraintLog),
    DropConstraint(DropConstraintLog),
    NotifyModifiedTables(NotifyModifiedTablesLog),
    UpdateMaterializedTime(UpdateMaterializedTimeLog),
    CreatePlacement(CreatePlacementLog),
    DropPlacement(DropPlacementLog),
    CreateAllocationColumn(CreateAllocationColumnLog),
    DropAllocationColumn(DropAllocationColumnLog),
    UpdateAllocationColumnPosition(UpdateAllocationColumnPositionLog),
    CreatePartitionGroup(CreatePartitionGroupLog),
    CreatePartition(CreatePartitionLog),
    DropPartitionGroup(DropPartitionGroupLog),
    DropPartition(DropPartitionLog),
    SetPartitionDistribution(SetPartitionDistributionLog),
    CreatePartitionPlacement(CreatePartitionPlacementLog),
    DropPartitionPlacement(DropPartitionPlacementLog),
    UpdatePartitionPlacementRole(UpdatePartitionPlacementRoleLog),
    RegisterAdapter(RegisterAdapterLog),
    DropAdapter(DropAdapterLog),
    CreateUser(CreateUserLog),
    DropUser(DropUserLog),
    RegisterInterface(RegisterInterfaceLog),
    DropInterface(DropInterfaceLog),
    RegisterPhysicalTable(RegisterPhysicalTableLog),
    RegisterPhysicalCollection(RegisterPhysicalCollectionLog),
    RegisterPhysicalGraph(RegisterPhysicalGraphLog),
    AddPhysicalColumn(AddPhysicalColumnLog),
    UpdatePhysicalColumnType(UpdatePhysicalColumnTypeLog),
    DropPhysicalColumn(DropPhysicalColumnLog),
    DropPhysicalEntity(DropPhysicalEntityLog),
}

impl CatalogOp {
    /// Physical-layer ops are applied in memory but never persisted.
    pub fn is_durable(&self) -> bool {
        !matches!(
            self,
            Self::RegisterPhysicalTable(_)
                | Self::RegisterPhysicalCollection(_)
                | Self::RegisterPhysicalGraph(_)
                | Self::AddPhysicalColumn(_)
                | Self::UpdatePhysicalColumnType(_)
                | Self::DropPhysicalColumn(_)
                | Self::DropPhysicalEntity(_)
        )
    }

    pub fn observe_ids(&self, ids: &IdAllocator) {
        match self {
            Self::CreateNamespace(log) => ids.observe_namespace_id(log.namespace_id),
            Self::RenameNamespace(log) => ids.observe_namespace_id(log.namespace_id),
            Self::DropNamespace(log) => ids.observe_namespace_id(log.namespace_id),
            Self::CreateTable(log) => {
                ids.observe_namespace_id(log.namespace_id);
                ids.observe_entity_id(log.table_id);
                for column in &log.columns {
                    ids.observe_field_id(column.id);
                }
                for constraint in &log.constraints {
                    ids.observe_constraint_id(constraint.id);
                }
            }
            Self::CreateView(log) => {
                ids.observe_namespace_id(log.namespace_id);
                ids.observe_entity_id(log.table_id);
                for column in &log.columns {
                    ids.observe_field_id(column.id);
                }
            }
            Self::CreateCollection(log) => {
                ids.observe_namespace_id(log.namespace_id);
                ids.observe_entity_id(log.collection_id);
            }
            Self::CreateGraph(log) => {
                ids.observe_namespace_id(log.namespace_id);
                ids.observe_entity_id(log.graph_id);
            }
            Self::RenameEntity(log) => ids.observe_entity_id(log.entity_id),
            Self::DropEntity(log) => ids.observe_entity_id(log.entity_id),
            Self::AddColumn(log) => {
                ids.observe_entity_id(log.table_id);
                ids.observe_field_id(log.column.id);
            }
            Self::DropColumn(log) => {
                ids.observe_entity_id(log.table_id);
                ids.observe_field_id(log.column_id);
            }
            Self::AddConstraint(log) => {
                ids.observe_entity_id(log.table_id);
                ids.observe_constraint_id(log.constraint.id);
            }
            Self::DropConstraint(log) => {
                ids.observe_entity_id(log.table_id);
                ids.observe_constraint_id(log.constraint_id);
            }
            Self::NotifyModifiedTables(log) => {
                for table_id in &log.table_ids {
                    ids.observe_entity_id(*table_id);
                }
            }
            Self::UpdateMaterializedTime(log) => ids.observe_entity_id(log.table_id),
            Self::CreatePlacement(log) => {
                ids.observe_placement_id(log.placement.id);
                ids.observe_entity_id(log.placement.logical_id);
                ids.observe_adapter_id(log.placement.adapter_id);
            }
            Self::DropPlacement(log) => ids.observe_placement_id(log.placement_id),
            Self::CreateAllocationColumn(log) => {
                ids.observe_placement_id(log.column.placement_id);
                ids.observe_field_id(log.column.column_id);
            }
            Self::DropAllocationColumn(log) => {
                ids.observe_placement_id(log.placement_id);
                ids.observe_field_id(log.column_id);
            }
            Self::UpdateAllocationColumnPosition(log) => {
                ids.observe_placement_id(log.placement_id);
                ids.observe_field_id(log.column_id);
            }
            Self::CreatePartitionGroup(log) => {
                ids.observe_partition_group_id(log.group.id);
                ids.observe_entity_id(log.group.logical_id);
            }
            Self::CreatePartition(log) => {
                ids.observe_partition_id(log.partition.id);
                ids.observe_partition_group_id(log.partition.group_id);
            }
            Self::DropPartitionGroup(log) => ids.observe_partition_group_id(log.group_id),
            Self::DropPartition(log) => ids.observe_partition_id(log.partition_id),
            Self::SetPartitionDistribution(log) => {
                ids.observe_entity_id(log.distribution.logical_id);
                for group_id in &log.distribution.group_ids {
                    ids.observe_partition_group_id(*group_id);
                }
                for partition_id in &log.distribution.partition_ids {
                    ids.observe_partition_id(*partition_id);
                }
            }
            Self::CreatePartitionPlacement(log) => {
                ids.observe_allocation_id(log.allocation.id);
                ids.observe_placement_id(log.allocation.placement_id);
                ids.observe_partition_id(log.allocation.partition_id);
            }
            Self::DropPartitionPlacement(log) => ids.observe_allocation_id(log.allocation_id),
            Self::UpdatePartitionPlacementRole(log) => ids.observe_allocation_id(log.allocation_id),
            Self::RegisterAdapter(log) => ids.observe_adapter_id(log.adapter.id),
            Self::DropAdapter(log) => ids.observe_adapter_id(log.adapter_id),
            Self::CreateUser(log) => ids.observe_user_id(log.user.id),
            Self::DropUser(log) => ids.observe_user_id(log.user_id),
            Self::RegisterInterface(log) => ids.observe_interface_id(log.interface.id),
            Self::DropInterface(log) => ids.observe_interface_id(log.interface_id),
            Self::RegisterPhysicalTable(log) => {
                ids.observe_physical_id(log.table.id);
                ids.observe_allocation_id(log.table.allocation_id);
            }
            Self::RegisterPhysicalCollection(log) => {
                ids.observe_physical_id(log.collection.id);
                ids.observe_allocation_id(log.collection.allocation_id);
            }
            Self::RegisterPhysicalGraph(log) => {
                ids.observe_physical_id(log.graph.id);
                ids.observe_allocation_id(log.graph.allocation_id);
            }
            Self::AddPhysicalColumn(log) => ids.observe_physical_id(log.physical_id),
            Self::UpdatePhysicalColumnType(log) => ids.observe_physical_id(log.physical_id),
            Self::DropPhysicalColumn(log) => ids.observe_physical_id(log.physical_id),
            Self::DropPhysicalEntity(log) => ids.observe_physical_id(log.physical_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNamespaceLog {
    pub namespace_id: NamespaceId,
    pub name: Arc<str>,
    pub data_model: DataModel,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameNamespaceLog {
    pub namespace_id: NamespaceId,
    pub new_name: Arc<str>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropNamespaceLog {
    pub namespace_id: NamespaceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTableLog {
    pub namespace_id: NamespaceId,
    pub table_id: EntityId,
    pub name: Arc<str>,
    pub columns: Vec<ColumnDefinition>,
    pub constraints: Vec<ConstraintDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateViewLog {
    pub namespace_id: NamespaceId,
    pub table_id: EntityId,
    pub name: Arc<str>,
    pub entity_type: EntityType,
    pub columns: Vec<ColumnDefinition>,
    pub view: ViewDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCollectionLog {
    pub namespace_id: NamespaceId,
    pub collection_id: EntityId,
    pub name: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGraphLog {
    pub namespace_id: NamespaceId,
    pub graph_id: EntityId,
    pub name: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameEntityLog {
    pub namespace_id: NamespaceId,
    pub entity_id: EntityId,
    pub new_name: Arc<str>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropEntityLog {
    pub namespace_id: NamespaceId,
    pub entity_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddColumnLog {
    pub namespace_id: NamespaceId,
    pub table_id: EntityId,
    pub column: ColumnDefinition,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropColumnLog {
    pub namespace_id: NamespaceId,
    pub table_id: EntityId,
    pub column_id: FieldId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddConstraintLog {
    pub namespace_id: NamespaceId,
    pub table_id: EntityId,
    pub constraint: ConstraintDefinition,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropConstraintLog {
    pub namespace_id: NamespaceId,
    pub table_id: EntityId,
    pub constraint_id: ConstraintId,
}

/// Underlying tables were written; bump the counters of materialized views
/// reading from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyModifiedTablesLog {
    pub table_ids: Vec<EntityId>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMaterializedTimeLog {
    pub table_id: EntityId,
    pub time_ns: i64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePlacementLog {
    pub placement: PlacementDefinition,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropPlacementLog {
    pub placement_id: PlacementId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAllocationColumnLog {
    pub column: AllocationColumn,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropAllocationColumnLog {
    pub placement_id: PlacementId,
    pub column_id: FieldId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAllocationColumnPositionLog {
    pub placement_id: PlacementId,
    pub column_id: FieldId,
    pub position: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePartitionGroupLog {
    pub group: PartitionGroupDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePartitionLog {
    pub partition: PartitionDefinition,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropPartitionGroupLog {
    pub group_id: PartitionGroupId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropPartitionLog {
    pub partition_id: PartitionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPartitionDistributionLog {
    pub distribution: PartitionDistribution,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePartitionPlacementLog {
    pub allocation: AllocationPartition,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropPartitionPlacementLog {
    pub allocation_id: AllocationId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePartitionPlacementRoleLog {
    pub allocation_id: AllocationId,
    pub role: DataPlacementRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAdapterLog {
    pub adapter: AdapterDefinition,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropAdapterLog {
    pub adapter_id: AdapterId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserLog {
    pub user: UserDefinition,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropUserLog {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInterfaceLog {
    pub interface: QueryInterfaceDefinition,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInterfaceLog {
    pub interface_id: InterfaceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPhysicalTableLog {
    pub table: PhysicalTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPhysicalCollectionLog {
    pub collection: PhysicalCollection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPhysicalGraphLog {
    pub graph: PhysicalGraph,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPhysicalColumnLog {
    pub adapter_id: AdapterId,
    pub physical_id: PhysicalId,
    pub column: PhysicalColumn,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePhysicalColumnTypeLog {
    pub adapter_id: AdapterId,
    pub physical_id: PhysicalId,
    pub column_id: FieldId,
    pub poly_type: PolyType,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropPhysicalColumnLog {
    pub adapter_id: AdapterId,
    pub physical_id: PhysicalId,
    pub column_id: FieldId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropPhysicalEntityLog {
    pub adapter_id: AdapterId,
    pub physical_id: PhysicalId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratadb_id::CatalogId;

    fn namespace_op() -> CatalogOp {
        CatalogOp::CreateNamespace(CreateNamespaceLog {
            namespace_id: NamespaceId::new(4),
            name: "public".into(),
            data_model: DataModel::Relational,
            case_sensitive: false,
        })
    }

    fn physical_op() -> CatalogOp {
        CatalogOp::DropPhysicalEntity(DropPhysicalEntityLog {
            adapter_id: AdapterId::new(1),
            physical_id: PhysicalId::new(9),
        })
    }

    #[test]
    fn durable_filter_strips_physical_ops() {
        let batch = CatalogBatch::new(100, vec![namespace_op(), physical_op()]);
        let durable = batch.durable_only();
        assert_eq!(durable.ops.len(), 1);
        assert!(matches!(durable.ops[0], CatalogOp::CreateNamespace(_)));
        assert_eq!(durable.time_ns, 100);
    }

    #[test]
    fn empty_batch_survives_durable_filter() {
        let batch = CatalogBatch::new(7, vec![physical_op()]);
        let durable = batch.durable_only();
        assert!(durable.ops.is_empty());
    }

    #[test]
    fn observing_a_batch_advances_the_allocator() {
        let ids = IdAllocator::default();
        let batch = CatalogBatch::new(
            0,
            vec![
                namespace_op(),
                CatalogOp::CreateTable(CreateTableLog {
                    namespace_id: NamespaceId::new(4),
                    table_id: EntityId::new(17),
                    name: "emp".into(),
                    columns: vec![],
                    constraints: vec![],
                }),
            ],
        );
        batch.observe_ids(&ids);
        assert_eq!(ids.next_namespace_id().get(), 5);
        assert_eq!(ids.next_entity_id().get(), 18);
    }

    #[test]
    fn ordered_batches_sort_by_sequence() {
        let early = OrderedCatalogBatch::new(
            CatalogBatch::new(0, vec![]),
            CatalogSequenceNumber::new(1),
        );
        let late = OrderedCatalogBatch::new(
            CatalogBatch::new(0, vec![]),
            CatalogSequenceNumber::new(2),
        );
        assert!(early < late);
    }

    #[test]
    fn ops_round_trip_through_serde() {
        let batch = CatalogBatch::new(
            42,
            vec![
                namespace_op(),
                CatalogOp::SetPartitionDistribution(SetPartitionDistributionLog {
                    distribution: PartitionDistribution {
                        logical_id: EntityId::new(3),
                        property: None,
                        group_ids: vec![PartitionGroupId::new(1)],
                        partition_ids: vec![PartitionId::new(2)],
                    },
                }),
            ],
        );
        let json = serde_json::to_string(&batch).unwrap();
        let back: CatalogBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(batch, back);
    }
}
