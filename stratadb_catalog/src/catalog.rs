//! The catalog: authoritative metadata for every namespace, entity,
//! placement, and adapter, guarded by a single writer and published to
//! readers as immutable snapshots.
//!
//! Mutations arrive as [`CatalogBatch`]es. A batch is validated against the
//! observed state, stamped with the next sequence number, persisted, then
//! applied to a clone of the inner state which replaces the original in one
//! swap. Readers never see a half-applied batch.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use bimap::BiHashMap;
use hashbrown::HashMap;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use stratadb_id::{
    AdapterId, CatalogId, EntityId, FieldId, IdAllocator, InterfaceId, NamespaceId, UserId,
};
use tracing::info;
use uuid::Uuid;

use crate::allocation::AllocationCatalog;
use crate::channel::CatalogSubscriptions;
use crate::log::{CatalogBatch, CatalogOp, OrderedCatalogBatch};
use crate::logical::{
    CollectionDefinition, ColumnDefinition, DataModel, GraphDefinition, LogicalEntity,
    TableDefinition, normalize_name,
};
use crate::materialized::MaterializedGuard;
use crate::physical::{PhysicalCatalog, PhysicalEntity};
use crate::resource::CatalogResource;
use crate::snapshot::Snapshot;
use crate::store::{CatalogStoreError, ObjectStoreCatalog};
use crate::time::{Time, TimeProvider};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown {kind}: '{name}'")]
    NotFound { kind: &'static str, name: Arc<str> },

    #[error("unknown {kind} id: {id}")]
    IdNotFound { kind: &'static str, id: u64 },

    #[error("{kind} '{name}' already exists in '{namespace}'")]
    AlreadyExists {
        kind: &'static str,
        namespace: Arc<str>,
        name: Arc<str>,
    },

    #[error("namespace '{name}' already exists")]
    NamespaceAlreadyExists { name: Arc<str> },

    #[error("namespace '{name}' is not empty, it still contains {entities} entities")]
    NamespaceNotEmpty { name: Arc<str>, entities: usize },

    #[error("invalid name '{name}': {context}")]
    InvalidName { name: Arc<str>, context: &'static str },

    #[error("namespace '{namespace}' does not hold {expected} entities")]
    WrongDataModel {
        namespace: Arc<str>,
        expected: DataModel,
    },

    #[error("invalid columns for table '{table}': {context}")]
    InvalidColumns { table: Arc<str>, context: String },

    #[error("column '{column}' of table '{table}' is referenced by constraint '{constraint}'")]
    ColumnInUse {
        table: Arc<str>,
        column: Arc<str>,
        constraint: Arc<str>,
    },

    #[error("entity '{entity}' is referenced by view '{view}'")]
    ViewDependsOnEntity { entity: Arc<str>, view: Arc<str> },

    #[error("constraint '{constraint}' already exists on table '{table}'")]
    DuplicateConstraint { table: Arc<str>, constraint: Arc<str> },

    #[error("invalid constraint on table '{table}': {context}")]
    InvalidConstraint { table: Arc<str>, context: String },

    #[error(
        "cannot remove placement of '{entity}' on adapter '{adapter}': {detail}"
    )]
    PlacementUnderflow {
        entity: Arc<str>,
        adapter: Arc<str>,
        detail: String,
    },

    #[error("placement of '{entity}' on adapter '{adapter}' already exists")]
    PlacementAlreadyExists { entity: Arc<str>, adapter: Arc<str> },

    #[error("column '{column}' is already placed on adapter '{adapter}'")]
    ColumnPlacementExists { column: Arc<str>, adapter: Arc<str> },

    #[error("invalid partitioning of '{entity}': {context}")]
    InvalidPartitioning { entity: Arc<str>, context: String },

    #[error("adapter '{adapter}' still hosts {placements} placements")]
    AdapterInUse { adapter: Arc<str>, placements: usize },

    #[error("adapter '{name}' already exists")]
    AdapterAlreadyExists { name: Arc<str> },

    #[error("user '{name}' already exists")]
    UserAlreadyExists { name: Arc<str> },

    #[error("query interface '{name}' already exists")]
    InterfaceAlreadyExists { name: Arc<str> },

    #[error("invalid refresh criteria for view '{view}': {context}")]
    InvalidRefreshCriteria { view: Arc<str>, context: &'static str },

    #[error("materialized view maintenance already in progress, retry {operation} later")]
    MaterializedViewBusy { operation: &'static str },

    #[error("catalog state failed integrity check: {context}")]
    CorruptState { context: String },

    #[error("cannot create namespace, limit of {limit} reached")]
    TooManyNamespaces { limit: usize },

    #[error("cannot create entity, limit of {limit} reached")]
    TooManyEntities { limit: usize },

    #[error("cannot add column to table '{table}', limit of {limit} reached")]
    TooManyColumns { table: Arc<str>, limit: usize },

    #[error(transparent)]
    Store(#[from] CatalogStoreError),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl CatalogError {
    /// For states that validated batch application should never reach.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(anyhow::anyhow!("{}", message.into()))
    }

    fn corrupt(context: impl Into<String>) -> Self {
        Self::CorruptState {
            context: context.into(),
        }
    }
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

/// Monotonic position in the catalog's log of committed batches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct CatalogSequenceNumber(u64);

impl CatalogSequenceNumber {
    pub fn new(number: u64) -> Self {
        Self(number)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CatalogSequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tunables of a catalog instance.
#[derive(Debug, Clone, Copy)]
pub struct CatalogArgs {
    /// A checkpoint is written every this many committed batches.
    pub checkpoint_interval: u64,
    /// How often the background sweep looks for stale interval-driven
    /// materialized views.
    pub refresh_sweep_interval: Duration,
}

impl CatalogArgs {
    pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 100;
    pub const DEFAULT_REFRESH_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
}

impl Default for CatalogArgs {
    fn default() -> Self {
        Self {
            checkpoint_interval: Self::DEFAULT_CHECKPOINT_INTERVAL,
            refresh_sweep_interval: Self::DEFAULT_REFRESH_SWEEP_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogLimits {
    pub num_namespaces: usize,
    /// Total logical entities across all namespaces.
    pub num_entities: usize,
    pub num_columns_per_table: usize,
}

impl CatalogLimits {
    pub const DEFAULT_NUM_NAMESPACES: usize = 1024;
    pub const DEFAULT_NUM_ENTITIES: usize = 10_000;
    pub const DEFAULT_NUM_COLUMNS_PER_TABLE: usize = 500;
}

impl Default for CatalogLimits {
    fn default() -> Self {
        Self {
            num_namespaces: Self::DEFAULT_NUM_NAMESPACES,
            num_entities: Self::DEFAULT_NUM_ENTITIES,
            num_columns_per_table: Self::DEFAULT_NUM_COLUMNS_PER_TABLE,
        }
    }
}

/// Id- and name-addressed storage for one kind of catalog resource.
///
/// The id map is authoritative; the name map mirrors it for lookups and is
/// kept in step by the mutating methods. Ids are never re-used, so callers
/// obtain them from the allocator before inserting here.
#[derive(Debug, Clone)]
pub struct Repository<I: CatalogId, R: CatalogResource<Identifier = I>> {
    pub(crate) id_name_map: BiHashMap<I, Arc<str>>,
    pub(crate) repo: stratadb_id::SerdeVecMap<I, Arc<R>>,
}

impl<I: CatalogId, R: CatalogResource<Identifier = I>> Repository<I, R> {
    pub fn new() -> Self {
        Self {
            id_name_map: BiHashMap::new(),
            repo: stratadb_id::SerdeVecMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.repo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repo.is_empty()
    }

    pub fn contains_id(&self, id: &I) -> bool {
        self.repo.contains_key(id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.id_name_map.contains_right(name)
    }

    pub fn get_by_id(&self, id: &I) -> Option<Arc<R>> {
        self.repo.get(id).map(Arc::clone)
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<R>> {
        self.id_name_map
            .get_by_right(name)
            .and_then(|id| self.repo.get(id))
            .map(Arc::clone)
    }

    pub fn name_to_id(&self, name: &str) -> Option<I> {
        self.id_name_map.get_by_right(name).copied()
    }

    pub fn id_to_name(&self, id: &I) -> Option<Arc<str>> {
        self.id_name_map.get_by_left(id).map(Arc::clone)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&I, &Arc<R>)> {
        self.repo.iter()
    }

    pub fn resource_iter(&self) -> impl Iterator<Item = &Arc<R>> {
        self.repo.iter().map(|(_, resource)| resource)
    }

    pub fn ids(&self) -> impl Iterator<Item = &I> {
        self.repo.keys()
    }

    pub fn names(&self) -> impl Iterator<Item = Arc<str>> + '_ {
        self.repo
            .iter()
            .filter_map(|(id, _)| self.id_name_map.get_by_left(id).map(Arc::clone))
    }

    pub(crate) fn insert(&mut self, id: I, resource: impl Into<Arc<R>>) -> Result<()> {
        let resource = resource.into();
        if self.repo.contains_key(&id) {
            return Err(CatalogError::unexpected(
                "attempted to insert duplicate id into repository",
            ));
        }
        if self.id_name_map.contains_right(&resource.name()) {
            return Err(CatalogError::unexpected(
                "attempted to insert duplicate name into repository",
            ));
        }
        self.id_name_map.insert(id, resource.name());
        self.repo.insert(id, resource);
        Ok(())
    }

    /// Replaces the resource stored under `id`, following a name change if
    /// the replacement carries one.
    pub(crate) fn update(&mut self, id: I, resource: impl Into<Arc<R>>) -> Result<()> {
        let resource = resource.into();
        if !self.repo.contains_key(&id) {
            return Err(CatalogError::unexpected(
                "attempted to update resource missing from repository",
            ));
        }
        if let Some(existing) = self.id_name_map.get_by_right(&resource.name()) {
            if *existing != id {
                return Err(CatalogError::unexpected(
                    "attempted to update resource to a name already in use",
                ));
            }
        }
        self.id_name_map.insert(id, resource.name());
        self.repo.insert(id, resource);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &I) -> Option<Arc<R>> {
        self.id_name_map.remove_by_left(id);
        self.repo.shift_remove(id)
    }
}

impl<I: CatalogId, R: CatalogResource<Identifier = I>> Default for Repository<I, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: CatalogId, R: CatalogResource<Identifier = I>> PartialEq for Repository<I, R> {
    fn eq(&self, other: &Self) -> bool {
        self.repo == other.repo
    }
}

impl<I: CatalogId, R: CatalogResource<Identifier = I> + Eq> Eq for Repository<I, R> {}

impl<I: CatalogId, R: CatalogResource<Identifier = I> + Hash> Hash for Repository<I, R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.repo.hash(state);
    }
}

/// The entities of a namespace, typed by the namespace's data model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceEntities {
    Relational(Repository<EntityId, TableDefinition>),
    Document(Repository<EntityId, CollectionDefinition>),
    Graph(Repository<EntityId, GraphDefinition>),
}

impl NamespaceEntities {
    fn for_model(data_model: DataModel) -> Self {
        match data_model {
            DataModel::Relational => Self::Relational(Repository::new()),
            DataModel::Document => Self::Document(Repository::new()),
            DataModel::Graph => Self::Graph(Repository::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Relational(repo) => repo.len(),
            Self::Document(repo) => repo.len(),
            Self::Graph(repo) => repo.len(),
        }
    }
}

/// A namespace and everything logically declared inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceSchema {
    pub id: NamespaceId,
    pub name: Arc<str>,
    pub data_model: DataModel,
    pub case_sensitive: bool,
    pub entities: NamespaceEntities,
}

impl NamespaceSchema {
    pub fn new(
        id: NamespaceId,
        name: Arc<str>,
        data_model: DataModel,
        case_sensitive: bool,
    ) -> Self {
        Self {
            id,
            name,
            data_model,
            case_sensitive,
            entities: NamespaceEntities::for_model(data_model),
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Normalizes an entity name according to this namespace's
    /// case-sensitivity rule.
    pub fn normalize(&self, name: &str) -> Arc<str> {
        normalize_name(name, self.case_sensitive)
    }

    pub fn tables(&self) -> Option<&Repository<EntityId, TableDefinition>> {
        match &self.entities {
            NamespaceEntities::Relational(repo) => Some(repo),
            _ => None,
        }
    }

    pub(crate) fn tables_mut(&mut self) -> Option<&mut Repository<EntityId, TableDefinition>> {
        match &mut self.entities {
            NamespaceEntities::Relational(repo) => Some(repo),
            _ => None,
        }
    }

    pub fn collections(&self) -> Option<&Repository<EntityId, CollectionDefinition>> {
        match &self.entities {
            NamespaceEntities::Document(repo) => Some(repo),
            _ => None,
        }
    }

    pub(crate) fn collections_mut(
        &mut self,
    ) -> Option<&mut Repository<EntityId, CollectionDefinition>> {
        match &mut self.entities {
            NamespaceEntities::Document(repo) => Some(repo),
            _ => None,
        }
    }

    pub fn graphs(&self) -> Option<&Repository<EntityId, GraphDefinition>> {
        match &self.entities {
            NamespaceEntities::Graph(repo) => Some(repo),
            _ => None,
        }
    }

    pub(crate) fn graphs_mut(&mut self) -> Option<&mut Repository<EntityId, GraphDefinition>> {
        match &mut self.entities {
            NamespaceEntities::Graph(repo) => Some(repo),
            _ => None,
        }
    }

    pub fn table_by_id(&self, id: EntityId) -> Option<Arc<TableDefinition>> {
        self.tables().and_then(|repo| repo.get_by_id(&id))
    }

    pub fn table_by_name(&self, name: &str) -> Option<Arc<TableDefinition>> {
        self.tables()
            .and_then(|repo| repo.get_by_name(&self.normalize(name)))
    }

    pub fn contains_entity_name(&self, name: &str) -> bool {
        let name = self.normalize(name);
        match &self.entities {
            NamespaceEntities::Relational(repo) => repo.contains_name(&name),
            NamespaceEntities::Document(repo) => repo.contains_name(&name),
            NamespaceEntities::Graph(repo) => repo.contains_name(&name),
        }
    }

    pub fn entity_by_name(&self, name: &str) -> Option<LogicalEntity> {
        let name = self.normalize(name);
        match &self.entities {
            NamespaceEntities::Relational(repo) => {
                repo.get_by_name(&name).map(LogicalEntity::Table)
            }
            NamespaceEntities::Document(repo) => {
                repo.get_by_name(&name).map(LogicalEntity::Collection)
            }
            NamespaceEntities::Graph(repo) => repo.get_by_name(&name).map(LogicalEntity::Graph),
        }
    }

    pub fn entity_by_id(&self, id: EntityId) -> Option<LogicalEntity> {
        match &self.entities {
            NamespaceEntities::Relational(repo) => repo.get_by_id(&id).map(LogicalEntity::Table),
            NamespaceEntities::Document(repo) => {
                repo.get_by_id(&id).map(LogicalEntity::Collection)
            }
            NamespaceEntities::Graph(repo) => repo.get_by_id(&id).map(LogicalEntity::Graph),
        }
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        match &self.entities {
            NamespaceEntities::Relational(repo) => repo.ids().copied().collect(),
            NamespaceEntities::Document(repo) => repo.ids().copied().collect(),
            NamespaceEntities::Graph(repo) => repo.ids().copied().collect(),
        }
    }

    pub fn entity_names(&self) -> Vec<Arc<str>> {
        match &self.entities {
            NamespaceEntities::Relational(repo) => repo.names().collect(),
            NamespaceEntities::Document(repo) => repo.names().collect(),
            NamespaceEntities::Graph(repo) => repo.names().collect(),
        }
    }

    fn remove_entity(&mut self, id: EntityId) -> bool {
        match &mut self.entities {
            NamespaceEntities::Relational(repo) => repo.remove(&id).is_some(),
            NamespaceEntities::Document(repo) => repo.remove(&id).is_some(),
            NamespaceEntities::Graph(repo) => repo.remove(&id).is_some(),
        }
    }

    fn rename_entity(&mut self, id: EntityId, new_name: Arc<str>) -> Result<()> {
        match &mut self.entities {
            NamespaceEntities::Relational(repo) => {
                let table = repo
                    .get_by_id(&id)
                    .ok_or_else(|| CatalogError::unexpected("renamed entity does not exist"))?;
                let mut table = (*table).clone();
                table.name = new_name;
                repo.update(id, table)
            }
            NamespaceEntities::Document(repo) => {
                let collection = repo
                    .get_by_id(&id)
                    .ok_or_else(|| CatalogError::unexpected("renamed entity does not exist"))?;
                let mut collection = (*collection).clone();
                collection.name = new_name;
                repo.update(id, collection)
            }
            NamespaceEntities::Graph(repo) => {
                let graph = repo
                    .get_by_id(&id)
                    .ok_or_else(|| CatalogError::unexpected("renamed entity does not exist"))?;
                let mut graph = (*graph).clone();
                graph.name = new_name;
                repo.update(id, graph)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterType {
    Store,
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    Embedded,
    Remote,
    Docker,
}

/// A registered data store or source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdapterDefinition {
    pub id: AdapterId,
    /// The name this instance was registered under.
    pub unique_name: Arc<str>,
    /// The adapter implementation, e.g. a template name.
    pub adapter_name: Arc<str>,
    pub adapter_type: AdapterType,
    pub mode: DeployMode,
    pub settings: stratadb_id::SerdeVecMap<Arc<str>, Arc<str>>,
}

/// A deployable adapter implementation known to this process. Templates are
/// registered at startup and are not part of durable catalog state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterTemplate {
    pub name: Arc<str>,
    pub adapter_type: AdapterType,
    pub modes: Vec<DeployMode>,
    pub default_settings: stratadb_id::SerdeVecMap<Arc<str>, Arc<str>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserDefinition {
    pub id: UserId,
    pub name: Arc<str>,
    pub password: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryInterfaceDefinition {
    pub id: InterfaceId,
    pub name: Arc<str>,
    pub interface_type: Arc<str>,
    pub settings: stratadb_id::SerdeVecMap<Arc<str>, Arc<str>>,
}

/// The complete catalog state at one sequence number.
#[derive(Debug, Clone)]
pub struct InnerCatalog {
    pub(crate) sequence: CatalogSequenceNumber,
    pub(crate) catalog_id: Arc<str>,
    pub(crate) catalog_uuid: Uuid,
    pub(crate) namespaces: Repository<NamespaceId, NamespaceSchema>,
    pub(crate) allocation: AllocationCatalog,
    pub(crate) physical: PhysicalCatalog,
    pub(crate) adapters: Repository<AdapterId, AdapterDefinition>,
    pub(crate) users: Repository<UserId, UserDefinition>,
    pub(crate) interfaces: Repository<InterfaceId, QueryInterfaceDefinition>,
    /// Derived: which namespace each entity lives in. Rebuilt on load.
    pub(crate) entity_index: HashMap<EntityId, NamespaceId>,
}

impl PartialEq for InnerCatalog {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
            && self.catalog_id == other.catalog_id
            && self.catalog_uuid == other.catalog_uuid
            && self.namespaces == other.namespaces
            && self.allocation == other.allocation
            && self.physical == other.physical
            && self.adapters == other.adapters
            && self.users == other.users
            && self.interfaces == other.interfaces
    }
}

impl Eq for InnerCatalog {}

impl Hash for InnerCatalog {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sequence.hash(state);
        self.catalog_id.hash(state);
        self.catalog_uuid.hash(state);
        self.namespaces.hash(state);
        self.allocation.hash(state);
        self.physical.hash(state);
        self.adapters.hash(state);
        self.users.hash(state);
        self.interfaces.hash(state);
    }
}

impl InnerCatalog {
    pub(crate) fn new(catalog_id: Arc<str>, catalog_uuid: Uuid) -> Self {
        Self {
            sequence: CatalogSequenceNumber::default(),
            catalog_id,
            catalog_uuid,
            namespaces: Repository::new(),
            allocation: AllocationCatalog::default(),
            physical: PhysicalCatalog::default(),
            adapters: Repository::new(),
            users: Repository::new(),
            interfaces: Repository::new(),
            entity_index: HashMap::new(),
        }
    }

    pub fn sequence_number(&self) -> CatalogSequenceNumber {
        self.sequence
    }

    pub fn catalog_id(&self) -> Arc<str> {
        Arc::clone(&self.catalog_id)
    }

    pub fn catalog_uuid(&self) -> Uuid {
        self.catalog_uuid
    }

    pub fn namespaces(&self) -> &Repository<NamespaceId, NamespaceSchema> {
        &self.namespaces
    }

    pub fn allocation(&self) -> &AllocationCatalog {
        &self.allocation
    }

    pub fn physical(&self) -> &PhysicalCatalog {
        &self.physical
    }

    pub fn adapters(&self) -> &Repository<AdapterId, AdapterDefinition> {
        &self.adapters
    }

    pub fn users(&self) -> &Repository<UserId, UserDefinition> {
        &self.users
    }

    pub fn interfaces(&self) -> &Repository<InterfaceId, QueryInterfaceDefinition> {
        &self.interfaces
    }

    /// Namespace names are stored lower-cased, regardless of the
    /// case-sensitivity of the entities inside them.
    pub fn namespace_by_name(&self, name: &str) -> Option<Arc<NamespaceSchema>> {
        self.namespaces.get_by_name(&name.to_lowercase())
    }

    pub fn namespace_by_id(&self, id: NamespaceId) -> Option<Arc<NamespaceSchema>> {
        self.namespaces.get_by_id(&id)
    }

    pub fn namespace_id_of(&self, entity_id: EntityId) -> Option<NamespaceId> {
        self.entity_index.get(&entity_id).copied()
    }

    pub fn logical_entity(&self, entity_id: EntityId) -> Option<LogicalEntity> {
        let namespace_id = self.entity_index.get(&entity_id)?;
        self.namespaces
            .get_by_id(namespace_id)?
            .entity_by_id(entity_id)
    }

    pub fn table(&self, entity_id: EntityId) -> Option<Arc<TableDefinition>> {
        let namespace_id = self.entity_index.get(&entity_id)?;
        self.namespaces
            .get_by_id(namespace_id)?
            .table_by_id(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entity_index.len()
    }

    pub(crate) fn rebuild_indexes(&mut self) {
        self.entity_index.clear();
        let mut entries = Vec::new();
        for (namespace_id, schema) in self.namespaces.iter() {
            for entity_id in schema.entity_ids() {
                entries.push((entity_id, *namespace_id));
            }
        }
        self.entity_index.extend(entries);
        self.allocation.rebuild_indexes();
        for (_, store) in self.physical.stores.iter_mut() {
            store.rebuild_indexes();
        }
    }

    /// Applies every op of a batch in order. The caller applies to a clone
    /// so a failure part-way leaves the visible state untouched.
    pub(crate) fn apply_batch(&mut self, batch: &CatalogBatch) -> Result<()> {
        for op in &batch.ops {
            self.apply_op(op)?;
        }
        Ok(())
    }

    fn apply_op(&mut self, op: &CatalogOp) -> Result<()> {
        match op {
            CatalogOp::CreateNamespace(log) => {
                let schema = NamespaceSchema::new(
                    log.namespace_id,
                    Arc::clone(&log.name),
                    log.data_model,
                    log.case_sensitive,
                );
                self.namespaces.insert(log.namespace_id, schema)
            }
            CatalogOp::RenameNamespace(log) => {
                let schema = self
                    .namespaces
                    .get_by_id(&log.namespace_id)
                    .ok_or_else(|| CatalogError::unexpected("renamed namespace does not exist"))?;
                let mut schema = (*schema).clone();
                schema.name = Arc::clone(&log.new_name);
                self.namespaces.update(log.namespace_id, schema)
            }
            CatalogOp::DropNamespace(log) => {
                let schema = self
                    .namespaces
                    .get_by_id(&log.namespace_id)
                    .ok_or_else(|| CatalogError::unexpected("dropped namespace does not exist"))?;
                if schema.entity_count() > 0 {
                    return Err(CatalogError::NamespaceNotEmpty {
                        name: Arc::clone(&schema.name),
                        entities: schema.entity_count(),
                    });
                }
                self.namespaces.remove(&log.namespace_id);
                Ok(())
            }
            CatalogOp::CreateTable(log) => {
                let mut columns = Repository::new();
                for column in &log.columns {
                    columns.insert(column.id, column.clone())?;
                }
                let table = TableDefinition {
                    id: log.table_id,
                    namespace_id: log.namespace_id,
                    name: Arc::clone(&log.name),
                    entity_type: crate::logical::EntityType::Entity,
                    columns,
                    constraints: log.constraints.clone(),
                    view: None,
                };
                self.insert_table(log.namespace_id, table)
            }
            CatalogOp::CreateView(log) => {
                let mut columns = Repository::new();
                for column in &log.columns {
                    columns.insert(column.id, column.clone())?;
                }
                let table = TableDefinition {
                    id: log.table_id,
                    namespace_id: log.namespace_id,
                    name: Arc::clone(&log.name),
                    entity_type: log.entity_type,
                    columns,
                    constraints: Vec::new(),
                    view: Some(log.view.clone()),
                };
                self.insert_table(log.namespace_id, table)
            }
            CatalogOp::CreateCollection(log) => {
                let schema = self
                    .namespaces
                    .get_by_id(&log.namespace_id)
                    .ok_or_else(|| CatalogError::unexpected("namespace does not exist"))?;
                let mut schema = (*schema).clone();
                let collections = schema.collections_mut().ok_or_else(|| {
                    CatalogError::unexpected("collection created in non-document namespace")
                })?;
                collections.insert(
                    log.collection_id,
                    CollectionDefinition {
                        id: log.collection_id,
                        namespace_id: log.namespace_id,
                        name: Arc::clone(&log.name),
                    },
                )?;
                self.namespaces.update(log.namespace_id, schema)?;
                self.entity_index.insert(log.collection_id, log.namespace_id);
                Ok(())
            }
            CatalogOp::CreateGraph(log) => {
                let schema = self
                    .namespaces
                    .get_by_id(&log.namespace_id)
                    .ok_or_else(|| CatalogError::unexpected("namespace does not exist"))?;
                let mut schema = (*schema).clone();
                let graphs = schema.graphs_mut().ok_or_else(|| {
                    CatalogError::unexpected("graph created in non-graph namespace")
                })?;
                graphs.insert(
                    log.graph_id,
                    GraphDefinition {
                        id: log.graph_id,
                        namespace_id: log.namespace_id,
                        name: Arc::clone(&log.name),
                    },
                )?;
                self.namespaces.update(log.namespace_id, schema)?;
                self.entity_index.insert(log.graph_id, log.namespace_id);
                Ok(())
            }
            CatalogOp::RenameEntity(log) => {
                let schema = self
                    .namespaces
                    .get_by_id(&log.namespace_id)
                    .ok_or_else(|| CatalogError::unexpected("namespace does not exist"))?;
                let mut schema = (*schema).clone();
                schema.rename_entity(log.entity_id, Arc::clone(&log.new_name))?;
                self.namespaces.update(log.namespace_id, schema)
            }
            CatalogOp::DropEntity(log) => {
                let schema = self
                    .namespaces
                    .get_by_id(&log.namespace_id)
                    .ok_or_else(|| CatalogError::unexpected("namespace does not exist"))?;
                let mut schema = (*schema).clone();
                if !schema.remove_entity(log.entity_id) {
                    return Err(CatalogError::unexpected("dropped entity does not exist"));
                }
                self.namespaces.update(log.namespace_id, schema)?;
                self.entity_index.remove(&log.entity_id);
                self.allocation.clear_distribution(log.entity_id);
                Ok(())
            }
            CatalogOp::AddColumn(log) => {
                self.update_table(log.namespace_id, log.table_id, |table| {
                    table.columns.insert(log.column.id, log.column.clone())
                })
            }
            CatalogOp::DropColumn(log) => {
                self.update_table(log.namespace_id, log.table_id, |table| {
                    let removed = table.columns.remove(&log.column_id).ok_or_else(|| {
                        CatalogError::unexpected("dropped column does not exist")
                    })?;
                    compact_column_positions(table, removed.position)
                })
            }
            CatalogOp::AddConstraint(log) => {
                self.update_table(log.namespace_id, log.table_id, |table| {
                    table.constraints.push(log.constraint.clone());
                    Ok(())
                })
            }
            CatalogOp::DropConstraint(log) => {
                self.update_table(log.namespace_id, log.table_id, |table| {
                    table.constraints.retain(|c| c.id != log.constraint_id);
                    Ok(())
                })
            }
            CatalogOp::NotifyModifiedTables(log) => {
                let mut due = Vec::new();
                for (namespace_id, schema) in self.namespaces.iter() {
                    let Some(tables) = schema.tables() else {
                        continue;
                    };
                    for (table_id, table) in tables.iter() {
                        let Some(view) = &table.view else { continue };
                        if view.criteria.is_some()
                            && view.underlying.iter().any(|u| log.table_ids.contains(u))
                        {
                            due.push((*namespace_id, *table_id));
                        }
                    }
                }
                for (namespace_id, table_id) in due {
                    self.update_table(namespace_id, table_id, |table| {
                        if let Some(view) = &mut table.view {
                            if let Some(criteria) = &mut view.criteria {
                                criteria.record_update();
                            }
                        }
                        Ok(())
                    })?;
                }
                Ok(())
            }
            CatalogOp::UpdateMaterializedTime(log) => {
                let namespace_id = self.namespace_id_of(log.table_id).ok_or_else(|| {
                    CatalogError::unexpected("refreshed view does not exist")
                })?;
                self.update_table(namespace_id, log.table_id, |table| {
                    let Some(view) = &mut table.view else {
                        return Err(CatalogError::unexpected(
                            "refresh time recorded for a table that is not a view",
                        ));
                    };
                    let Some(criteria) = &mut view.criteria else {
                        return Err(CatalogError::unexpected(
                            "refresh time recorded for a non-materialized view",
                        ));
                    };
                    criteria.record_refresh(Time::from_timestamp_nanos(log.time_ns));
                    Ok(())
                })
            }
            CatalogOp::CreatePlacement(log) => {
                self.allocation
                    .insert_placement(Arc::new(log.placement.clone()));
                Ok(())
            }
            CatalogOp::DropPlacement(log) => {
                self.allocation.remove_placement(log.placement_id);
                Ok(())
            }
            CatalogOp::CreateAllocationColumn(log) => {
                self.allocation.insert_column(log.column.clone());
                Ok(())
            }
            CatalogOp::DropAllocationColumn(log) => {
                self.allocation.remove_column(log.placement_id, log.column_id);
                Ok(())
            }
            CatalogOp::UpdateAllocationColumnPosition(log) => {
                let column = self
                    .allocation
                    .column_on_placement(log.placement_id, log.column_id)
                    .ok_or_else(|| {
                        CatalogError::unexpected("repositioned allocation column does not exist")
                    })?;
                let mut column = column.clone();
                column.position = log.position;
                self.allocation.insert_column(column);
                Ok(())
            }
            CatalogOp::CreatePartitionGroup(log) => {
                self.allocation.insert_group(Arc::new(log.group.clone()));
                Ok(())
            }
            CatalogOp::CreatePartition(log) => {
                self.allocation
                    .insert_partition(Arc::new(log.partition.clone()));
                Ok(())
            }
            CatalogOp::DropPartitionGroup(log) => {
                self.allocation.remove_group(log.group_id);
                Ok(())
            }
            CatalogOp::DropPartition(log) => {
                self.allocation.remove_partition(log.partition_id);
                Ok(())
            }
            CatalogOp::SetPartitionDistribution(log) => {
                self.allocation.set_distribution(log.distribution.clone());
                Ok(())
            }
            CatalogOp::CreatePartitionPlacement(log) => {
                self.allocation
                    .insert_allocation(Arc::new(log.allocation.clone()));
                Ok(())
            }
            CatalogOp::DropPartitionPlacement(log) => {
                self.allocation.remove_allocation(log.allocation_id);
                Ok(())
            }
            CatalogOp::UpdatePartitionPlacementRole(log) => {
                let allocation = self.allocation.allocation(log.allocation_id).ok_or_else(
                    || CatalogError::unexpected("updated partition placement does not exist"),
                )?;
                let mut allocation = (*allocation).clone();
                allocation.role = log.role;
                self.allocation.insert_allocation(Arc::new(allocation));
                Ok(())
            }
            CatalogOp::RegisterAdapter(log) => {
                self.adapters.insert(log.adapter.id, log.adapter.clone())
            }
            CatalogOp::DropAdapter(log) => {
                self.adapters.remove(&log.adapter_id);
                self.physical.drop_store(log.adapter_id);
                Ok(())
            }
            CatalogOp::CreateUser(log) => self.users.insert(log.user.id, log.user.clone()),
            CatalogOp::DropUser(log) => {
                self.users.remove(&log.user_id);
                Ok(())
            }
            CatalogOp::RegisterInterface(log) => {
                self.interfaces.insert(log.interface.id, log.interface.clone())
            }
            CatalogOp::DropInterface(log) => {
                self.interfaces.remove(&log.interface_id);
                Ok(())
            }
            CatalogOp::RegisterPhysicalTable(log) => {
                self.physical
                    .ensure_store(log.table.adapter_id)
                    .put(PhysicalEntity::Table(Arc::new(log.table.clone())));
                Ok(())
            }
            CatalogOp::RegisterPhysicalCollection(log) => {
                self.physical
                    .ensure_store(log.collection.adapter_id)
                    .put(PhysicalEntity::Collection(Arc::new(log.collection.clone())));
                Ok(())
            }
            CatalogOp::RegisterPhysicalGraph(log) => {
                self.physical
                    .ensure_store(log.graph.adapter_id)
                    .put(PhysicalEntity::Graph(Arc::new(log.graph.clone())));
                Ok(())
            }
            CatalogOp::AddPhysicalColumn(log) => {
                self.replace_physical_table(log.adapter_id, log.physical_id, |table| {
                    table.columns.push(log.column.clone());
                    table.columns.sort_by_key(|c| c.position);
                    Ok(())
                })
            }
            CatalogOp::UpdatePhysicalColumnType(log) => {
                self.replace_physical_table(log.adapter_id, log.physical_id, |table| {
                    let column = table
                        .columns
                        .iter_mut()
                        .find(|c| c.column_id == log.column_id)
                        .ok_or_else(|| {
                            CatalogError::unexpected("retyped physical column does not exist")
                        })?;
                    column.poly_type = log.poly_type;
                    Ok(())
                })
            }
            CatalogOp::DropPhysicalColumn(log) => {
                self.replace_physical_table(log.adapter_id, log.physical_id, |table| {
                    let Some(removed) = table.columns.iter().find(|c| c.column_id == log.column_id)
                    else {
                        return Err(CatalogError::unexpected(
                            "dropped physical column does not exist",
                        ));
                    };
                    let removed_position = removed.position;
                    table.columns.retain(|c| c.column_id != log.column_id);
                    for column in &mut table.columns {
                        if column.position > removed_position {
                            column.position -= 1;
                        }
                    }
                    Ok(())
                })
            }
            CatalogOp::DropPhysicalEntity(log) => {
                if let Some(store) = self.physical.store_mut(log.adapter_id) {
                    store.remove(log.physical_id);
                }
                Ok(())
            }
        }
    }

    fn insert_table(&mut self, namespace_id: NamespaceId, table: TableDefinition) -> Result<()> {
        let table_id = table.id;
        let schema = self
            .namespaces
            .get_by_id(&namespace_id)
            .ok_or_else(|| CatalogError::unexpected("namespace does not exist"))?;
        let mut schema = (*schema).clone();
        let tables = schema
            .tables_mut()
            .ok_or_else(|| CatalogError::unexpected("table created in non-relational namespace"))?;
        tables.insert(table_id, table)?;
        self.namespaces.update(namespace_id, schema)?;
        self.entity_index.insert(table_id, namespace_id);
        Ok(())
    }

    fn update_table<F>(
        &mut self,
        namespace_id: NamespaceId,
        table_id: EntityId,
        mutate: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut TableDefinition) -> Result<()>,
    {
        let schema = self
            .namespaces
            .get_by_id(&namespace_id)
            .ok_or_else(|| CatalogError::unexpected("namespace does not exist"))?;
        let mut schema = (*schema).clone();
        let tables = schema
            .tables_mut()
            .ok_or_else(|| CatalogError::unexpected("table op in non-relational namespace"))?;
        let table = tables
            .get_by_id(&table_id)
            .ok_or_else(|| CatalogError::unexpected("table does not exist"))?;
        let mut table = (*table).clone();
        mutate(&mut table)?;
        tables.update(table_id, table)?;
        self.namespaces.update(namespace_id, schema)
    }

    fn replace_physical_table<F>(
        &mut self,
        adapter_id: AdapterId,
        physical_id: stratadb_id::PhysicalId,
        mutate: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut crate::physical::PhysicalTable) -> Result<()>,
    {
        let store = self
            .physical
            .store_mut(adapter_id)
            .ok_or_else(|| CatalogError::unexpected("adapter has no physical store"))?;
        let entity = store
            .physical(physical_id)
            .ok_or_else(|| CatalogError::unexpected("physical entity does not exist"))?;
        let table = entity
            .as_table()
            .ok_or_else(|| CatalogError::unexpected("physical column op on a non-table"))?;
        let mut table = (**table).clone();
        mutate(&mut table)?;
        store.put(PhysicalEntity::Table(Arc::new(table)));
        Ok(())
    }

    /// Referential closure of the whole catalog. Run on every clone before
    /// it replaces the visible state and after every load.
    pub(crate) fn check_integrity(&self) -> Result<()> {
        for (entity_id, namespace_id) in &self.entity_index {
            let Some(schema) = self.namespaces.get_by_id(namespace_id) else {
                return Err(CatalogError::corrupt(format!(
                    "entity {entity_id} is indexed under missing namespace {namespace_id}"
                )));
            };
            if schema.entity_by_id(*entity_id).is_none() {
                return Err(CatalogError::corrupt(format!(
                    "entity {entity_id} is indexed but absent from namespace '{}'",
                    schema.name
                )));
            }
        }
        for (namespace_id, schema) in self.namespaces.iter() {
            for entity_id in schema.entity_ids() {
                if self.entity_index.get(&entity_id) != Some(namespace_id) {
                    return Err(CatalogError::corrupt(format!(
                        "entity {entity_id} of namespace '{}' is missing from the entity index",
                        schema.name
                    )));
                }
                if self.allocation.distribution(entity_id).is_none() {
                    return Err(CatalogError::corrupt(format!(
                        "entity {entity_id} has no partition distribution"
                    )));
                }
            }
        }
        for (placement_id, placement) in self.allocation.placements.iter() {
            if !self.entity_index.contains_key(&placement.logical_id) {
                return Err(CatalogError::corrupt(format!(
                    "placement {placement_id} references missing entity {}",
                    placement.logical_id
                )));
            }
            if !self.adapters.contains_id(&placement.adapter_id) {
                return Err(CatalogError::corrupt(format!(
                    "placement {placement_id} references missing adapter {}",
                    placement.adapter_id
                )));
            }
        }
        for ((placement_id, column_id), column) in self.allocation.columns.iter() {
            if !self.allocation.placements.contains_key(placement_id) {
                return Err(CatalogError::corrupt(format!(
                    "allocation column {column_id} references missing placement {placement_id}"
                )));
            }
            let Some(table) = self.table(column.logical_id) else {
                return Err(CatalogError::corrupt(format!(
                    "allocation column {column_id} references missing table {}",
                    column.logical_id
                )));
            };
            if table.column_by_id(*column_id).is_none() {
                return Err(CatalogError::corrupt(format!(
                    "allocation column {column_id} is absent from table '{}'",
                    table.name
                )));
            }
        }
        for (group_id, group) in self.allocation.groups.iter() {
            if !self.entity_index.contains_key(&group.logical_id) {
                return Err(CatalogError::corrupt(format!(
                    "partition group {group_id} references missing entity {}",
                    group.logical_id
                )));
            }
        }
        for (partition_id, partition) in self.allocation.partitions.iter() {
            if !self.allocation.groups.contains_key(&partition.group_id) {
                return Err(CatalogError::corrupt(format!(
                    "partition {partition_id} references missing group {}",
                    partition.group_id
                )));
            }
        }
        for (entity_id, distribution) in self.allocation.distributions.iter() {
            for group_id in &distribution.group_ids {
                if !self.allocation.groups.contains_key(group_id) {
                    return Err(CatalogError::corrupt(format!(
                        "distribution of entity {entity_id} lists missing group {group_id}"
                    )));
                }
            }
            for partition_id in &distribution.partition_ids {
                if !self.allocation.partitions.contains_key(partition_id) {
                    return Err(CatalogError::corrupt(format!(
                        "distribution of entity {entity_id} lists missing partition {partition_id}"
                    )));
                }
            }
        }
        for (allocation_id, allocation) in self.allocation.allocations.iter() {
            if !self.allocation.placements.contains_key(&allocation.placement_id) {
                return Err(CatalogError::corrupt(format!(
                    "partition placement {allocation_id} references missing placement {}",
                    allocation.placement_id
                )));
            }
            if !self.allocation.partitions.contains_key(&allocation.partition_id) {
                return Err(CatalogError::corrupt(format!(
                    "partition placement {allocation_id} references missing partition {}",
                    allocation.partition_id
                )));
            }
        }
        for (adapter_id, store) in self.physical.stores.iter() {
            for entity in store.iter() {
                if !self.allocation.allocations.contains_key(&entity.allocation_id()) {
                    return Err(CatalogError::corrupt(format!(
                        "physical entity {} on adapter {adapter_id} references missing allocation {}",
                        entity.id(),
                        entity.allocation_id()
                    )));
                }
            }
        }
        // A table with any placement must keep every column on at least one
        // of them.
        for (_, schema) in self.namespaces.iter() {
            let Some(tables) = schema.tables() else { continue };
            for (table_id, table) in tables.iter() {
                let placements = self.allocation.placements_for_entity(*table_id);
                if placements.is_empty() {
                    continue;
                }
                for (column_id, _) in table.columns.iter() {
                    let carried = placements
                        .iter()
                        .any(|p| self.allocation.columns.contains_key(&(p.id, *column_id)));
                    if !carried {
                        return Err(CatalogError::corrupt(format!(
                            "column {column_id} of table '{}' is carried by no placement",
                            table.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn compact_column_positions(table: &mut TableDefinition, removed_position: u64) -> Result<()> {
    let shifted: Vec<(FieldId, ColumnDefinition)> = table
        .columns
        .iter()
        .filter(|(_, c)| c.position > removed_position)
        .map(|(id, c)| {
            let mut column = (**c).clone();
            column.position -= 1;
            (*id, column)
        })
        .collect();
    for (id, column) in shifted {
        table.columns.update(id, column)?;
    }
    Ok(())
}

/// Handle to the catalog. Cheap reads go through [`Catalog::snapshot`];
/// mutations go through the async methods that build and commit batches.
#[derive(Debug)]
pub struct Catalog {
    pub(crate) catalog_id: Arc<str>,
    pub(crate) time_provider: Arc<dyn TimeProvider>,
    pub(crate) store: ObjectStoreCatalog,
    pub(crate) ids: IdAllocator,
    pub(crate) limits: CatalogLimits,
    pub(crate) args: CatalogArgs,
    pub(crate) guard: MaterializedGuard,
    pub(crate) templates:
        parking_lot::RwLock<stratadb_id::SerdeVecMap<Arc<str>, Arc<AdapterTemplate>>>,
    pub(crate) subscriptions: tokio::sync::RwLock<CatalogSubscriptions>,
    pub(crate) inner: parking_lot::RwLock<InnerCatalog>,
    pub(crate) published: parking_lot::RwLock<Arc<Snapshot>>,
    /// Taken for the verify-persist-apply section of every commit.
    pub(crate) write_permit: tokio::sync::Mutex<()>,
}

impl Catalog {
    pub async fn new(
        catalog_id: impl Into<Arc<str>>,
        store: Arc<dyn ObjectStore>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Arc<Self>> {
        Self::new_with_args(
            catalog_id,
            store,
            time_provider,
            CatalogArgs::default(),
            CatalogLimits::default(),
        )
        .await
    }

    pub async fn new_with_args(
        catalog_id: impl Into<Arc<str>>,
        store: Arc<dyn ObjectStore>,
        time_provider: Arc<dyn TimeProvider>,
        args: CatalogArgs,
        limits: CatalogLimits,
    ) -> Result<Arc<Self>> {
        let catalog_id: Arc<str> = catalog_id.into();
        let store =
            ObjectStoreCatalog::new(Arc::clone(&catalog_id), args.checkpoint_interval, store);
        let (inner, ids) = match store.load_checkpoint().await? {
            Some(checkpoint) => {
                let (mut inner, id_state) = checkpoint.into_inner();
                let ids = IdAllocator::from_state(&id_state);
                let logs = store.load_logs_following(inner.sequence).await?;
                for ordered in logs {
                    ordered.batch().observe_ids(&ids);
                    inner.apply_batch(ordered.batch())?;
                    inner.sequence = ordered.sequence_number();
                }
                inner.check_integrity()?;
                info!(
                    catalog_id = %catalog_id,
                    sequence = inner.sequence.get(),
                    "loaded catalog from object store"
                );
                (inner, ids)
            }
            None => {
                let inner = InnerCatalog::new(Arc::clone(&catalog_id), Uuid::new_v4());
                let ids = IdAllocator::default();
                store
                    .persist_checkpoint(&crate::serialize::CatalogCheckpoint::from_inner(
                        &inner,
                        ids.state(),
                    ))
                    .await?;
                info!(catalog_id = %catalog_id, "initialized new catalog");
                (inner, ids)
            }
        };
        let published = Arc::new(Snapshot::from_inner(&inner));
        Ok(Arc::new(Self {
            catalog_id,
            time_provider,
            store,
            ids,
            limits,
            args,
            guard: MaterializedGuard::default(),
            templates: parking_lot::RwLock::new(stratadb_id::SerdeVecMap::new()),
            subscriptions: tokio::sync::RwLock::new(CatalogSubscriptions::default()),
            inner: parking_lot::RwLock::new(inner),
            published: parking_lot::RwLock::new(published),
            write_permit: tokio::sync::Mutex::new(()),
        }))
    }

    /// An in-memory catalog for tests and embedded use.
    pub async fn new_in_memory(catalog_id: impl Into<Arc<str>>) -> Result<Arc<Self>> {
        let store = Arc::new(object_store::memory::InMemory::new());
        let time_provider = Arc::new(crate::time::SystemProvider::new());
        Self::new(catalog_id, store, time_provider).await
    }

    pub fn catalog_id(&self) -> Arc<str> {
        Arc::clone(&self.catalog_id)
    }

    pub fn catalog_uuid(&self) -> Uuid {
        self.inner.read().catalog_uuid
    }

    pub fn sequence_number(&self) -> CatalogSequenceNumber {
        self.inner.read().sequence
    }

    pub fn time_provider(&self) -> Arc<dyn TimeProvider> {
        Arc::clone(&self.time_provider)
    }

    pub fn limits(&self) -> CatalogLimits {
        self.limits
    }

    pub fn refresh_sweep_interval(&self) -> Duration {
        self.args.refresh_sweep_interval
    }

    pub fn materialized_guard(&self) -> &MaterializedGuard {
        &self.guard
    }

    /// The immutable snapshot most recently published by a commit.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.published.read())
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<NamespaceSchema>> {
        self.inner.read().namespace_by_name(name)
    }

    pub fn namespace_by_id(&self, id: NamespaceId) -> Option<Arc<NamespaceSchema>> {
        self.inner.read().namespace_by_id(id)
    }

    pub fn logical_entity(&self, id: EntityId) -> Option<LogicalEntity> {
        self.inner.read().logical_entity(id)
    }

    /// Materialized views whose refresh interval has elapsed at `now`.
    pub fn interval_views_due(&self, now: Time) -> Vec<Arc<TableDefinition>> {
        let inner = self.inner.read();
        let mut due = Vec::new();
        for (_, schema) in inner.namespaces.iter() {
            let Some(tables) = schema.tables() else { continue };
            for (_, table) in tables.iter() {
                if let Some(view) = &table.view {
                    if let Some(criteria) = &view.criteria {
                        if criteria.is_due(now) {
                            due.push(Arc::clone(table));
                        }
                    }
                }
            }
        }
        due
    }

    /// Templates describe deployable adapter implementations. They are a
    /// process-local registry, re-registered at startup.
    pub fn register_adapter_template(&self, template: AdapterTemplate) {
        let name: Arc<str> = Arc::from(template.name.to_lowercase());
        self.templates.write().insert(name, Arc::new(template));
    }

    pub fn adapter_template(&self, name: &str) -> Option<Arc<AdapterTemplate>> {
        self.templates
            .read()
            .get(name.to_lowercase().as_str())
            .map(Arc::clone)
    }

    pub fn adapter_templates(&self) -> Vec<Arc<AdapterTemplate>> {
        self.templates.read().values().map(Arc::clone).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{CreateNamespaceLog, CreateTableLog, DropNamespaceLog};
    use pretty_assertions::assert_eq;

    fn test_inner() -> InnerCatalog {
        InnerCatalog::new("test-catalog".into(), Uuid::new_v4())
    }

    fn relational_namespace(inner: &mut InnerCatalog, id: u64, name: &str) {
        inner
            .apply_batch(&CatalogBatch::new(
                0,
                vec![CatalogOp::CreateNamespace(CreateNamespaceLog {
                    namespace_id: NamespaceId::new(id),
                    name: name.into(),
                    data_model: DataModel::Relational,
                    case_sensitive: false,
                })],
            ))
            .unwrap();
    }

    #[test]
    fn repository_tracks_ids_and_names() {
        let mut repo: Repository<NamespaceId, NamespaceSchema> = Repository::new();
        let schema = NamespaceSchema::new(
            NamespaceId::new(1),
            "public".into(),
            DataModel::Relational,
            false,
        );
        repo.insert(NamespaceId::new(1), schema).unwrap();
        assert!(repo.contains_name("public"));
        assert_eq!(repo.name_to_id("public"), Some(NamespaceId::new(1)));
        assert_eq!(
            repo.get_by_name("public").unwrap().id,
            NamespaceId::new(1)
        );
    }

    #[test]
    fn repository_rejects_duplicate_id_and_name() {
        let mut repo: Repository<NamespaceId, NamespaceSchema> = Repository::new();
        repo.insert(
            NamespaceId::new(1),
            NamespaceSchema::new(NamespaceId::new(1), "a".into(), DataModel::Relational, true),
        )
        .unwrap();
        let dup_id = repo.insert(
            NamespaceId::new(1),
            NamespaceSchema::new(NamespaceId::new(1), "b".into(), DataModel::Relational, true),
        );
        assert!(dup_id.is_err());
        let dup_name = repo.insert(
            NamespaceId::new(2),
            NamespaceSchema::new(NamespaceId::new(2), "a".into(), DataModel::Relational, true),
        );
        assert!(dup_name.is_err());
    }

    #[test]
    fn repository_update_follows_renames() {
        let mut repo: Repository<NamespaceId, NamespaceSchema> = Repository::new();
        let schema = NamespaceSchema::new(
            NamespaceId::new(1),
            "old".into(),
            DataModel::Relational,
            false,
        );
        repo.insert(NamespaceId::new(1), schema.clone()).unwrap();
        let mut renamed = schema;
        renamed.name = "new".into();
        repo.update(NamespaceId::new(1), renamed).unwrap();
        assert!(!repo.contains_name("old"));
        assert_eq!(repo.name_to_id("new"), Some(NamespaceId::new(1)));
    }

    #[test]
    fn apply_create_namespace_registers_schema() {
        let mut inner = test_inner();
        relational_namespace(&mut inner, 1, "public");
        let schema = inner.namespace_by_name("public").unwrap();
        assert_eq!(schema.id, NamespaceId::new(1));
        assert_eq!(schema.data_model, DataModel::Relational);
        assert!(!schema.case_sensitive);
    }

    #[test]
    fn apply_drop_of_nonempty_namespace_fails() {
        let mut inner = test_inner();
        relational_namespace(&mut inner, 1, "public");
        inner
            .apply_batch(&CatalogBatch::new(
                0,
                vec![CatalogOp::CreateTable(CreateTableLog {
                    namespace_id: NamespaceId::new(1),
                    table_id: EntityId::new(10),
                    name: "emp".into(),
                    columns: vec![],
                    constraints: vec![],
                })],
            ))
            .unwrap();
        let err = inner
            .apply_batch(&CatalogBatch::new(
                0,
                vec![CatalogOp::DropNamespace(DropNamespaceLog {
                    namespace_id: NamespaceId::new(1),
                })],
            ))
            .unwrap_err();
        assert!(matches!(err, CatalogError::NamespaceNotEmpty { .. }));
    }

    #[test]
    fn entity_index_follows_create_and_drop() {
        let mut inner = test_inner();
        relational_namespace(&mut inner, 1, "public");
        inner
            .apply_batch(&CatalogBatch::new(
                0,
                vec![CatalogOp::CreateTable(CreateTableLog {
                    namespace_id: NamespaceId::new(1),
                    table_id: EntityId::new(10),
                    name: "emp".into(),
                    columns: vec![],
                    constraints: vec![],
                })],
            ))
            .unwrap();
        assert_eq!(
            inner.namespace_id_of(EntityId::new(10)),
            Some(NamespaceId::new(1))
        );
        inner
            .apply_batch(&CatalogBatch::new(
                0,
                vec![CatalogOp::DropEntity(crate::log::DropEntityLog {
                    namespace_id: NamespaceId::new(1),
                    entity_id: EntityId::new(10),
                })],
            ))
            .unwrap();
        assert_eq!(inner.namespace_id_of(EntityId::new(10)), None);
    }

    #[test]
    fn integrity_check_catches_dangling_placement() {
        let mut inner = test_inner();
        relational_namespace(&mut inner, 1, "public");
        inner
            .allocation
            .insert_placement(Arc::new(crate::allocation::PlacementDefinition {
                id: stratadb_id::PlacementId::new(1),
                logical_id: EntityId::new(999),
                adapter_id: AdapterId::new(1),
                data_model: DataModel::Relational,
            }));
        let err = inner.check_integrity().unwrap_err();
        assert!(matches!(err, CatalogError::CorruptState { .. }));
    }

    #[test]
    fn rebuild_indexes_restores_entity_index() {
        let mut inner = test_inner();
        relational_namespace(&mut inner, 1, "public");
        inner
            .apply_batch(&CatalogBatch::new(
                0,
                vec![CatalogOp::CreateTable(CreateTableLog {
                    namespace_id: NamespaceId::new(1),
                    table_id: EntityId::new(10),
                    name: "emp".into(),
                    columns: vec![],
                    constraints: vec![],
                })],
            ))
            .unwrap();
        inner.entity_index.clear();
        inner.rebuild_indexes();
        assert_eq!(
            inner.namespace_id_of(EntityId::new(10)),
            Some(NamespaceId::new(1))
        );
    }

    #[test]
    fn case_insensitive_namespace_normalizes_lookups() {
        let schema = NamespaceSchema::new(
            NamespaceId::new(1),
            "public".into(),
            DataModel::Relational,
            false,
        );
        assert_eq!(schema.normalize("Employee").as_ref(), "employee");
        let sensitive = NamespaceSchema::new(
            NamespaceId::new(2),
            "strict".into(),
            DataModel::Relational,
            true,
        );
        assert_eq!(sensitive.normalize("Employee").as_ref(), "Employee");
    }
}
