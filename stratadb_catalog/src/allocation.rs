//! Allocation layer: where logical entities are placed, how they are
//! partitioned, and which columns and partitions each adapter carries.
//!
//! The maps keyed by id are authoritative and are what gets persisted;
//! the tuple-keyed lookup indexes are rebuilt from them on load.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use stratadb_id::{
    AdapterId, AllocationId, EntityId, FieldId, PartitionGroupId, PartitionId, PlacementId,
    SerdeVecMap,
};

use crate::logical::DataModel;

/// How a placement came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementType {
    Manual,
    Automatic,
}

/// Freshness contract of a partition replica.
///
/// Every replica carries an explicit role; eager replication keeps
/// `UpToDate` replicas current on write, `Refreshable` replicas are only
/// touched by refresh operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPlacementRole {
    UpToDate,
    Refreshable,
}

impl fmt::Display for DataPlacementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up-to-date"),
            Self::Refreshable => write!(f, "refreshable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    None,
    Hash,
    Range,
    List,
    Temperature,
}

impl fmt::Display for PartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Hash => write!(f, "hash"),
            Self::Range => write!(f, "range"),
            Self::List => write!(f, "list"),
            Self::Temperature => write!(f, "temperature"),
        }
    }
}

/// Declared partitioning of a table, as requested by DDL.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionProperty {
    Hash {
        column_id: FieldId,
        partitions: u64,
    },
    Range {
        column_id: FieldId,
        /// Sorted upper bounds; k boundaries produce k + 1 partitions.
        boundaries: Vec<Arc<str>>,
    },
    List {
        column_id: FieldId,
        /// One value set per named partition; rows matching none fall into
        /// the unbound partition.
        values: Vec<Arc<str>>,
    },
    Temperature {
        column_id: FieldId,
        internal_partitions: u64,
        /// Access share (percent) above which a partition moves to hot.
        hot_access_in: u8,
        /// Access share (percent) below which a partition moves back to cold.
        hot_access_out: u8,
        #[serde_as(as = "serde_with::DurationSeconds<u64>")]
        frequency_interval: Duration,
    },
}

impl PartitionProperty {
    pub fn strategy(&self) -> PartitionStrategy {
        match self {
            Self::Hash { .. } => PartitionStrategy::Hash,
            Self::Range { .. } => PartitionStrategy::Range,
            Self::List { .. } => PartitionStrategy::List,
            Self::Temperature { .. } => PartitionStrategy::Temperature,
        }
    }

    pub fn column_id(&self) -> FieldId {
        match self {
            Self::Hash { column_id, .. }
            | Self::Range { column_id, .. }
            | Self::List { column_id, .. }
            | Self::Temperature { column_id, .. } => *column_id,
        }
    }
}

/// A container for the data of one logical entity on one adapter.
///
/// At most one placement exists per `(logical_id, adapter_id)` pair; the
/// columns and partitions it actually carries live in [`AllocationColumn`]
/// and [`AllocationPartition`] entries pointing back at it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlacementDefinition {
    pub id: PlacementId,
    pub logical_id: EntityId,
    pub adapter_id: AdapterId,
    pub data_model: DataModel,
}

/// A named group of partitions produced by one partitioning step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionGroupDefinition {
    pub id: PartitionGroupId,
    pub logical_id: EntityId,
    pub name: Arc<str>,
    pub qualifiers: Vec<Arc<str>>,
}

/// A single partition. Every partition belongs to exactly one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionDefinition {
    pub id: PartitionId,
    pub group_id: PartitionGroupId,
    pub logical_id: EntityId,
    pub name: Arc<str>,
    pub qualifiers: Vec<Arc<str>>,
    /// Catch-all partition that absorbs rows matching no qualifier.
    pub is_unbound: bool,
}

/// A replica of one partition on one placement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationPartition {
    pub id: AllocationId,
    pub placement_id: PlacementId,
    pub partition_id: PartitionId,
    pub logical_id: EntityId,
    pub adapter_id: AdapterId,
    pub placement_type: PlacementType,
    pub role: DataPlacementRole,
}

/// A column carried by a placement, with its adapter-local position.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationColumn {
    pub placement_id: PlacementId,
    pub logical_id: EntityId,
    pub adapter_id: AdapterId,
    pub column_id: FieldId,
    pub placement_type: PlacementType,
    pub position: u64,
}

/// The partition layout currently in force for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionDistribution {
    pub logical_id: EntityId,
    /// Absent for the implicit single-partition layout.
    pub property: Option<PartitionProperty>,
    pub group_ids: Vec<PartitionGroupId>,
    pub partition_ids: Vec<PartitionId>,
}

impl PartitionDistribution {
    pub fn strategy(&self) -> PartitionStrategy {
        self.property
            .as_ref()
            .map(|p| p.strategy())
            .unwrap_or(PartitionStrategy::None)
    }
}

/// All allocation state, spanning every entity and adapter.
#[derive(Debug, Clone, Default)]
pub struct AllocationCatalog {
    pub(crate) placements: SerdeVecMap<PlacementId, Arc<PlacementDefinition>>,
    pub(crate) columns: SerdeVecMap<(PlacementId, FieldId), AllocationColumn>,
    pub(crate) groups: SerdeVecMap<PartitionGroupId, Arc<PartitionGroupDefinition>>,
    pub(crate) partitions: SerdeVecMap<PartitionId, Arc<PartitionDefinition>>,
    pub(crate) distributions: SerdeVecMap<EntityId, PartitionDistribution>,
    pub(crate) allocations: SerdeVecMap<AllocationId, Arc<AllocationPartition>>,
    // Derived lookup indexes, rebuilt on load.
    pub(crate) placement_index: HashMap<(EntityId, AdapterId), PlacementId>,
    pub(crate) allocation_index: HashMap<(PlacementId, PartitionId), AllocationId>,
    pub(crate) logical_placements: HashMap<EntityId, Vec<PlacementId>>,
}

impl PartialEq for AllocationCatalog {
    fn eq(&self, other: &Self) -> bool {
        self.placements == other.placements
            && self.columns == other.columns
            && self.groups == other.groups
            && self.partitions == other.partitions
            && self.distributions == other.distributions
            && self.allocations == other.allocations
    }
}

impl Eq for AllocationCatalog {}

impl Hash for AllocationCatalog {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.placements.hash(state);
        self.columns.hash(state);
        self.groups.hash(state);
        self.partitions.hash(state);
        self.distributions.hash(state);
        self.allocations.hash(state);
    }
}

impl AllocationCatalog {
    pub fn placement(&self, id: PlacementId) -> Option<Arc<PlacementDefinition>> {
        self.placements.get(&id).map(Arc::clone)
    }

    pub fn placement_for(
        &self,
        logical_id: EntityId,
        adapter_id: AdapterId,
    ) -> Option<Arc<PlacementDefinition>> {
        self.placement_index
            .get(&(logical_id, adapter_id))
            .and_then(|id| self.placements.get(id))
            .map(Arc::clone)
    }

    pub fn placements_for_entity(&self, logical_id: EntityId) -> Vec<Arc<PlacementDefinition>> {
        self.logical_placements
            .get(&logical_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.placements.get(id))
            .map(Arc::clone)
            .collect()
    }

    pub fn placements_on_adapter(&self, adapter_id: AdapterId) -> Vec<Arc<PlacementDefinition>> {
        self.placements
            .iter()
            .filter(|(_, p)| p.adapter_id == adapter_id)
            .map(|(_, p)| Arc::clone(p))
            .collect()
    }

    /// Columns carried by a placement, in adapter-local position order.
    pub fn columns_on_placement(&self, placement_id: PlacementId) -> Vec<AllocationColumn> {
        let mut columns: Vec<_> = self
            .columns
            .iter()
            .filter(|((pid, _), _)| *pid == placement_id)
            .map(|(_, c)| c.clone())
            .collect();
        columns.sort_by_key(|c| c.position);
        columns
    }

    pub fn column_on_placement(
        &self,
        placement_id: PlacementId,
        column_id: FieldId,
    ) -> Option<&AllocationColumn> {
        self.columns.get(&(placement_id, column_id))
    }

    /// Every placement of `column_id` across all adapters.
    pub fn placements_of_column(
        &self,
        logical_id: EntityId,
        column_id: FieldId,
    ) -> Vec<AllocationColumn> {
        self.logical_placements
            .get(&logical_id)
            .into_iter()
            .flatten()
            .filter_map(|pid| self.columns.get(&(*pid, column_id)))
            .cloned()
            .collect()
    }

    pub fn group(&self, id: PartitionGroupId) -> Option<Arc<PartitionGroupDefinition>> {
        self.groups.get(&id).map(Arc::clone)
    }

    pub fn partition(&self, id: PartitionId) -> Option<Arc<PartitionDefinition>> {
        self.partitions.get(&id).map(Arc::clone)
    }

    pub fn groups_for_entity(&self, logical_id: EntityId) -> Vec<Arc<PartitionGroupDefinition>> {
        self.groups
            .iter()
            .filter(|(_, g)| g.logical_id == logical_id)
            .map(|(_, g)| Arc::clone(g))
            .collect()
    }

    pub fn partitions_for_entity(&self, logical_id: EntityId) -> Vec<Arc<PartitionDefinition>> {
        self.partitions
            .iter()
            .filter(|(_, p)| p.logical_id == logical_id)
            .map(|(_, p)| Arc::clone(p))
            .collect()
    }

    pub fn partitions_in_group(&self, group_id: PartitionGroupId) -> Vec<Arc<PartitionDefinition>> {
        self.partitions
            .iter()
            .filter(|(_, p)| p.group_id == group_id)
            .map(|(_, p)| Arc::clone(p))
            .collect()
    }

    pub fn distribution(&self, logical_id: EntityId) -> Option<&PartitionDistribution> {
        self.distributions.get(&logical_id)
    }

    pub fn strategy_of(&self, logical_id: EntityId) -> PartitionStrategy {
        self.distributions
            .get(&logical_id)
            .map(|d| d.strategy())
            .unwrap_or(PartitionStrategy::None)
    }

    pub fn allocation(&self, id: AllocationId) -> Option<Arc<AllocationPartition>> {
        self.allocations.get(&id).map(Arc::clone)
    }

    pub fn allocation_for(
        &self,
        placement_id: PlacementId,
        partition_id: PartitionId,
    ) -> Option<Arc<AllocationPartition>> {
        self.allocation_index
            .get(&(placement_id, partition_id))
            .and_then(|id| self.allocations.get(id))
            .map(Arc::clone)
    }

    pub fn allocations_on_placement(
        &self,
        placement_id: PlacementId,
    ) -> Vec<Arc<AllocationPartition>> {
        self.allocations
            .iter()
            .filter(|(_, a)| a.placement_id == placement_id)
            .map(|(_, a)| Arc::clone(a))
            .collect()
    }

    pub fn allocations_of_partition(
        &self,
        partition_id: PartitionId,
    ) -> Vec<Arc<AllocationPartition>> {
        self.allocations
            .iter()
            .filter(|(_, a)| a.partition_id == partition_id)
            .map(|(_, a)| Arc::clone(a))
            .collect()
    }

    pub fn allocations_for_entity(&self, logical_id: EntityId) -> Vec<Arc<AllocationPartition>> {
        self.allocations
            .iter()
            .filter(|(_, a)| a.logical_id == logical_id)
            .map(|(_, a)| Arc::clone(a))
            .collect()
    }

    /// Verifies that after the proposed removals every `(column, partition)`
    /// pair of the entity is still carried by at least one placement.
    ///
    /// `column_ids` is empty for document and graph entities, which only
    /// need partition coverage.
    pub(crate) fn check_survives_removal(
        &self,
        logical_id: EntityId,
        column_ids: &[FieldId],
        partition_ids: &[PartitionId],
        remove_columns: &HashSet<(PlacementId, FieldId)>,
        remove_partitions: &HashSet<(PlacementId, PartitionId)>,
    ) -> Result<(), String> {
        let placements = self
            .logical_placements
            .get(&logical_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for &partition_id in partition_ids {
            let hosts: Vec<PlacementId> = placements
                .iter()
                .copied()
                .filter(|pid| {
                    self.allocation_index.contains_key(&(*pid, partition_id))
                        && !remove_partitions.contains(&(*pid, partition_id))
                })
                .collect();
            if column_ids.is_empty() {
                if hosts.is_empty() {
                    return Err(format!(
                        "partition {partition_id} would lose its last replica"
                    ));
                }
                continue;
            }
            for &column_id in column_ids {
                let covered = hosts.iter().any(|pid| {
                    self.columns.contains_key(&(*pid, column_id))
                        && !remove_columns.contains(&(*pid, column_id))
                });
                if !covered {
                    return Err(format!(
                        "no remaining placement carries column {column_id} for partition {partition_id}"
                    ));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn insert_placement(&mut self, placement: Arc<PlacementDefinition>) {
        let key = (placement.logical_id, placement.adapter_id);
        self.placement_index.insert(key, placement.id);
        self.logical_placements
            .entry(placement.logical_id)
            .or_default()
            .push(placement.id);
        self.placements.insert(placement.id, placement);
    }

    pub(crate) fn remove_placement(&mut self, placement_id: PlacementId) {
        if let Some(placement) = self.placements.shift_remove(&placement_id) {
            self.placement_index
                .remove(&(placement.logical_id, placement.adapter_id));
            if let Some(ids) = self.logical_placements.get_mut(&placement.logical_id) {
                ids.retain(|id| *id != placement_id);
                if ids.is_empty() {
                    self.logical_placements.remove(&placement.logical_id);
                }
            }
        }
    }

    pub(crate) fn insert_column(&mut self, column: AllocationColumn) {
        self.columns
            .insert((column.placement_id, column.column_id), column);
    }

    pub(crate) fn remove_column(&mut self, placement_id: PlacementId, column_id: FieldId) {
        self.columns.shift_remove(&(placement_id, column_id));
    }

    pub(crate) fn insert_group(&mut self, group: Arc<PartitionGroupDefinition>) {
        self.groups.insert(group.id, group);
    }

    pub(crate) fn remove_group(&mut self, group_id: PartitionGroupId) {
        self.groups.shift_remove(&group_id);
    }

    pub(crate) fn insert_partition(&mut self, partition: Arc<PartitionDefinition>) {
        self.partitions.insert(partition.id, partition);
    }

    pub(crate) fn remove_partition(&mut self, partition_id: PartitionId) {
        self.partitions.shift_remove(&partition_id);
    }

    pub(crate) fn set_distribution(&mut self, distribution: PartitionDistribution) {
        self.distributions
            .insert(distribution.logical_id, distribution);
    }

    pub(crate) fn clear_distribution(&mut self, logical_id: EntityId) {
        self.distributions.shift_remove(&logical_id);
    }

    pub(crate) fn insert_allocation(&mut self, allocation: Arc<AllocationPartition>) {
        self.allocation_index.insert(
            (allocation.placement_id, allocation.partition_id),
            allocation.id,
        );
        self.allocations.insert(allocation.id, allocation);
    }

    pub(crate) fn remove_allocation(&mut self, allocation_id: AllocationId) {
        if let Some(allocation) = self.allocations.shift_remove(&allocation_id) {
            self.allocation_index
                .remove(&(allocation.placement_id, allocation.partition_id));
        }
    }

    /// Recomputes the lookup indexes from the authoritative maps.
    pub(crate) fn rebuild_indexes(&mut self) {
        self.placement_index.clear();
        self.logical_placements.clear();
        self.allocation_index.clear();
        for (id, placement) in &self.placements {
            self.placement_index
                .insert((placement.logical_id, placement.adapter_id), *id);
            self.logical_placements
                .entry(placement.logical_id)
                .or_default()
                .push(*id);
        }
        for (id, allocation) in &self.allocations {
            self.allocation_index
                .insert((allocation.placement_id, allocation.partition_id), *id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratadb_id::CatalogId;

    fn placement(id: u64, logical: u64, adapter: u64) -> Arc<PlacementDefinition> {
        Arc::new(PlacementDefinition {
            id: PlacementId::new(id),
            logical_id: EntityId::new(logical),
            adapter_id: AdapterId::new(adapter),
            data_model: DataModel::Relational,
        })
    }

    fn column(placement: u64, logical: u64, adapter: u64, column: u64, position: u64) -> AllocationColumn {
        AllocationColumn {
            placement_id: PlacementId::new(placement),
            logical_id: EntityId::new(logical),
            adapter_id: AdapterId::new(adapter),
            column_id: FieldId::new(column),
            placement_type: PlacementType::Manual,
            position,
        }
    }

    fn allocation(id: u64, placement: u64, partition: u64, logical: u64, adapter: u64) -> Arc<AllocationPartition> {
        Arc::new(AllocationPartition {
            id: AllocationId::new(id),
            placement_id: PlacementId::new(placement),
            partition_id: PartitionId::new(partition),
            logical_id: EntityId::new(logical),
            adapter_id: AdapterId::new(adapter),
            placement_type: PlacementType::Manual,
            role: DataPlacementRole::UpToDate,
        })
    }

    /// Two placements both carrying both columns and the single partition.
    fn two_adapter_catalog() -> AllocationCatalog {
        let mut alloc = AllocationCatalog::default();
        alloc.insert_placement(placement(1, 10, 100));
        alloc.insert_placement(placement(2, 10, 200));
        alloc.insert_column(column(1, 10, 100, 50, 0));
        alloc.insert_column(column(1, 10, 100, 51, 1));
        alloc.insert_column(column(2, 10, 200, 50, 0));
        alloc.insert_column(column(2, 10, 200, 51, 1));
        alloc.insert_allocation(allocation(1000, 1, 500, 10, 100));
        alloc.insert_allocation(allocation(1001, 2, 500, 10, 200));
        alloc
    }

    #[test]
    fn removal_passes_while_another_placement_covers() {
        let alloc = two_adapter_catalog();
        let remove_columns: HashSet<_> = [(PlacementId::new(1), FieldId::new(50)), (PlacementId::new(1), FieldId::new(51))]
            .into_iter()
            .collect();
        let remove_partitions: HashSet<_> =
            [(PlacementId::new(1), PartitionId::new(500))].into_iter().collect();
        alloc
            .check_survives_removal(
                EntityId::new(10),
                &[FieldId::new(50), FieldId::new(51)],
                &[PartitionId::new(500)],
                &remove_columns,
                &remove_partitions,
            )
            .unwrap();
    }

    #[test]
    fn removal_of_last_copy_is_detected() {
        let mut alloc = two_adapter_catalog();
        // Second placement no longer carries column 51.
        alloc.remove_column(PlacementId::new(2), FieldId::new(51));
        let remove_columns: HashSet<_> = [(PlacementId::new(1), FieldId::new(51))].into_iter().collect();
        let err = alloc
            .check_survives_removal(
                EntityId::new(10),
                &[FieldId::new(50), FieldId::new(51)],
                &[PartitionId::new(500)],
                &remove_columns,
                &HashSet::new(),
            )
            .unwrap_err();
        assert!(err.contains("column 51"), "unexpected detail: {err}");
    }

    #[test]
    fn partition_coverage_checked_without_columns() {
        let alloc = two_adapter_catalog();
        let remove_partitions: HashSet<_> = [
            (PlacementId::new(1), PartitionId::new(500)),
            (PlacementId::new(2), PartitionId::new(500)),
        ]
        .into_iter()
        .collect();
        let err = alloc
            .check_survives_removal(
                EntityId::new(10),
                &[],
                &[PartitionId::new(500)],
                &HashSet::new(),
                &remove_partitions,
            )
            .unwrap_err();
        assert!(err.contains("last replica"), "unexpected detail: {err}");
    }

    #[test]
    fn indexes_rebuild_from_authoritative_maps() {
        let mut alloc = two_adapter_catalog();
        let before = alloc.clone();
        alloc.placement_index.clear();
        alloc.allocation_index.clear();
        alloc.logical_placements.clear();
        alloc.rebuild_indexes();
        assert_eq!(
            alloc.placement_for(EntityId::new(10), AdapterId::new(200)).map(|p| p.id),
            before.placement_for(EntityId::new(10), AdapterId::new(200)).map(|p| p.id),
        );
        assert_eq!(
            alloc
                .allocation_for(PlacementId::new(1), PartitionId::new(500))
                .map(|a| a.id),
            Some(AllocationId::new(1000)),
        );
    }

    #[test]
    fn columns_come_back_in_position_order() {
        let mut alloc = AllocationCatalog::default();
        alloc.insert_placement(placement(1, 10, 100));
        alloc.insert_column(column(1, 10, 100, 51, 1));
        alloc.insert_column(column(1, 10, 100, 50, 0));
        let ordered = alloc.columns_on_placement(PlacementId::new(1));
        assert_eq!(
            ordered.iter().map(|c| c.column_id).collect::<Vec<_>>(),
            vec![FieldId::new(50), FieldId::new(51)],
        );
    }
}
