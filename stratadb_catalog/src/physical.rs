//! Physical layer: what each adapter actually materialized for the
//! allocations it hosts.
//!
//! Physical entities are replaced wholesale on change, never mutated in
//! place, so readers holding an `Arc` keep a consistent view. This layer is
//! rebuilt by adapters at startup and is not written to the durable log.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use stratadb_id::{AdapterId, AllocationId, EntityId, FieldId, PhysicalId, SerdeVecMap};

use crate::logical::PolyType;

/// A column as the adapter stores it, in adapter-local order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalColumn {
    pub column_id: FieldId,
    pub name: Arc<str>,
    pub position: u64,
    pub poly_type: PolyType,
    pub nullable: bool,
}

/// A named field of a document or graph entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalField {
    pub name: Arc<str>,
    pub position: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalTable {
    pub id: PhysicalId,
    pub logical_id: EntityId,
    pub allocation_id: AllocationId,
    pub adapter_id: AdapterId,
    pub namespace_name: Arc<str>,
    pub name: Arc<str>,
    pub columns: Vec<PhysicalColumn>,
}

impl PhysicalTable {
    pub fn column(&self, column_id: FieldId) -> Option<&PhysicalColumn> {
        self.columns.iter().find(|c| c.column_id == column_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalCollection {
    pub id: PhysicalId,
    pub logical_id: EntityId,
    pub allocation_id: AllocationId,
    pub adapter_id: AdapterId,
    pub namespace_name: Arc<str>,
    pub name: Arc<str>,
    pub fields: Vec<PhysicalField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalGraph {
    pub id: PhysicalId,
    pub logical_id: EntityId,
    pub allocation_id: AllocationId,
    pub adapter_id: AdapterId,
    pub namespace_name: Arc<str>,
    pub name: Arc<str>,
    pub fields: Vec<PhysicalField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalEntity {
    Table(Arc<PhysicalTable>),
    Collection(Arc<PhysicalCollection>),
    Graph(Arc<PhysicalGraph>),
}

impl PhysicalEntity {
    pub fn id(&self) -> PhysicalId {
        match self {
            Self::Table(t) => t.id,
            Self::Collection(c) => c.id,
            Self::Graph(g) => g.id,
        }
    }

    pub fn logical_id(&self) -> EntityId {
        match self {
            Self::Table(t) => t.logical_id,
            Self::Collection(c) => c.logical_id,
            Self::Graph(g) => g.logical_id,
        }
    }

    pub fn allocation_id(&self) -> AllocationId {
        match self {
            Self::Table(t) => t.allocation_id,
            Self::Collection(c) => c.allocation_id,
            Self::Graph(g) => g.allocation_id,
        }
    }

    pub fn adapter_id(&self) -> AdapterId {
        match self {
            Self::Table(t) => t.adapter_id,
            Self::Collection(c) => c.adapter_id,
            Self::Graph(g) => g.adapter_id,
        }
    }

    pub fn name(&self) -> Arc<str> {
        match self {
            Self::Table(t) => Arc::clone(&t.name),
            Self::Collection(c) => Arc::clone(&c.name),
            Self::Graph(g) => Arc::clone(&g.name),
        }
    }

    pub fn as_table(&self) -> Option<&Arc<PhysicalTable>> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }
}

/// Physical entities of a single adapter.
#[derive(Debug, Clone, Default)]
pub struct StoreCatalog {
    pub(crate) adapter_id: AdapterId,
    pub(crate) physicals: SerdeVecMap<PhysicalId, PhysicalEntity>,
    pub(crate) from_allocation: HashMap<AllocationId, Vec<PhysicalId>>,
}

impl PartialEq for StoreCatalog {
    fn eq(&self, other: &Self) -> bool {
        self.adapter_id == other.adapter_id && self.physicals == other.physicals
    }
}

impl Eq for StoreCatalog {}

impl Hash for StoreCatalog {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.adapter_id.hash(state);
        self.physicals.hash(state);
    }
}

impl StoreCatalog {
    pub fn new(adapter_id: AdapterId) -> Self {
        Self {
            adapter_id,
            physicals: SerdeVecMap::new(),
            from_allocation: HashMap::new(),
        }
    }

    pub fn adapter_id(&self) -> AdapterId {
        self.adapter_id
    }

    pub fn physical(&self, id: PhysicalId) -> Option<&PhysicalEntity> {
        self.physicals.get(&id)
    }

    /// Constant-time lookup of everything materialized for an allocation.
    pub fn from_allocation(&self, allocation_id: AllocationId) -> Vec<&PhysicalEntity> {
        self.from_allocation
            .get(&allocation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.physicals.get(id))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhysicalEntity> {
        self.physicals.iter().map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.physicals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.physicals.is_empty()
    }

    /// Inserts or replaces, keeping the allocation index in step.
    pub(crate) fn put(&mut self, entity: PhysicalEntity) {
        let id = entity.id();
        let allocation_id = entity.allocation_id();
        if let Some(previous) = self.physicals.insert(id, entity) {
            let previous_allocation = previous.allocation_id();
            if previous_allocation != allocation_id {
                self.unindex(previous_allocation, id);
            } else {
                // Same allocation, index entry already present.
                return;
            }
        }
        self.from_allocation.entry(allocation_id).or_default().push(id);
    }

    pub(crate) fn remove(&mut self, id: PhysicalId) -> Option<PhysicalEntity> {
        let entity = self.physicals.shift_remove(&id)?;
        self.unindex(entity.allocation_id(), id);
        Some(entity)
    }

    pub(crate) fn remove_for_allocation(&mut self, allocation_id: AllocationId) -> Vec<PhysicalId> {
        let ids = self.from_allocation.remove(&allocation_id).unwrap_or_default();
        for id in &ids {
            self.physicals.shift_remove(id);
        }
        ids
    }

    fn unindex(&mut self, allocation_id: AllocationId, id: PhysicalId) {
        if let Some(ids) = self.from_allocation.get_mut(&allocation_id) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.from_allocation.remove(&allocation_id);
            }
        }
    }

    pub(crate) fn rebuild_indexes(&mut self) {
        self.from_allocation.clear();
        for (id, entity) in &self.physicals {
            self.from_allocation
                .entry(entity.allocation_id())
                .or_default()
                .push(*id);
        }
    }
}

/// Physical state across all adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhysicalCatalog {
    pub(crate) stores: SerdeVecMap<AdapterId, StoreCatalog>,
}

impl Hash for PhysicalCatalog {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.stores.hash(state);
    }
}

impl PhysicalCatalog {
    pub fn store(&self, adapter_id: AdapterId) -> Option<&StoreCatalog> {
        self.stores.get(&adapter_id)
    }

    pub fn physical(&self, adapter_id: AdapterId, id: PhysicalId) -> Option<&PhysicalEntity> {
        self.stores.get(&adapter_id).and_then(|s| s.physical(id))
    }

    pub fn from_allocation(
        &self,
        adapter_id: AdapterId,
        allocation_id: AllocationId,
    ) -> Vec<&PhysicalEntity> {
        self.stores
            .get(&adapter_id)
            .map(|s| s.from_allocation(allocation_id))
            .unwrap_or_default()
    }

    pub(crate) fn ensure_store(&mut self, adapter_id: AdapterId) -> &mut StoreCatalog {
        if !self.stores.contains_key(&adapter_id) {
            self.stores.insert(adapter_id, StoreCatalog::new(adapter_id));
        }
        self.stores
            .get_mut(&adapter_id)
            .expect("store was just inserted")
    }

    pub(crate) fn store_mut(&mut self, adapter_id: AdapterId) -> Option<&mut StoreCatalog> {
        self.stores.get_mut(&adapter_id)
    }

    pub(crate) fn drop_store(&mut self, adapter_id: AdapterId) {
        self.stores.shift_remove(&adapter_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratadb_id::CatalogId;

    fn table(id: u64, allocation: u64, adapter: u64, name: &str) -> PhysicalEntity {
        PhysicalEntity::Table(Arc::new(PhysicalTable {
            id: PhysicalId::new(id),
            logical_id: EntityId::new(7),
            allocation_id: AllocationId::new(allocation),
            adapter_id: AdapterId::new(adapter),
            namespace_name: "public".into(),
            name: name.into(),
            columns: vec![PhysicalColumn {
                column_id: FieldId::new(1),
                name: "col0".into(),
                position: 0,
                poly_type: PolyType::Integer,
                nullable: false,
            }],
        }))
    }

    #[test]
    fn allocation_index_finds_entities() {
        let mut store = StoreCatalog::new(AdapterId::new(1));
        store.put(table(10, 100, 1, "tab_part0"));
        store.put(table(11, 101, 1, "tab_part1"));
        let found = store.from_allocation(AllocationId::new(100));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), PhysicalId::new(10));
        assert!(store.from_allocation(AllocationId::new(999)).is_empty());
    }

    #[test]
    fn replacement_swaps_value_without_duplicating_index() {
        let mut store = StoreCatalog::new(AdapterId::new(1));
        store.put(table(10, 100, 1, "before"));
        store.put(table(10, 100, 1, "after"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.physical(PhysicalId::new(10)).unwrap().name().as_ref(), "after");
        assert_eq!(store.from_allocation(AllocationId::new(100)).len(), 1);
    }

    #[test]
    fn removing_an_allocation_drops_its_entities() {
        let mut store = StoreCatalog::new(AdapterId::new(1));
        store.put(table(10, 100, 1, "a"));
        store.put(table(11, 100, 1, "b"));
        store.put(table(12, 101, 1, "c"));
        let removed = store.remove_for_allocation(AllocationId::new(100));
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.physical(PhysicalId::new(12)).is_some());
    }

    #[test]
    fn indexes_rebuild_after_load() {
        let mut store = StoreCatalog::new(AdapterId::new(1));
        store.put(table(10, 100, 1, "a"));
        store.from_allocation.clear();
        store.rebuild_indexes();
        assert_eq!(store.from_allocation(AllocationId::new(100)).len(), 1);
    }
}
