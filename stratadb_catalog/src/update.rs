//! The mutation facade of the catalog.
//!
//! Every method here follows the same shape: build a [`CatalogBatch`] against
//! the currently observed state, stamp it with the next sequence number, and
//! hand it to the commit path. The commit holds the write permit, proves the
//! batch still applies cleanly, persists it, and publishes the resulting
//! state as a fresh snapshot. When another writer advanced the catalog while
//! a batch was being built, the batch is rebuilt against the newer state and
//! tried again, so every validation in a builder closure is atomic with the
//! write it guards.

use std::sync::Arc;

use std::collections::HashSet;
use stratadb_id::{
    AllocationId, CatalogId, EntityId, FieldId, IdAllocator, PartitionId, PhysicalId, PlacementId,
    SerdeVecMap,
};
use tracing::{debug, warn};

use crate::allocation::{
    AllocationColumn, AllocationPartition, DataPlacementRole, PartitionDefinition,
    PartitionDistribution, PartitionGroupDefinition, PartitionProperty, PartitionStrategy,
    PlacementDefinition, PlacementType,
};
use crate::catalog::{
    AdapterDefinition, AdapterType, Catalog, CatalogError, CatalogLimits, DeployMode, InnerCatalog,
    NamespaceSchema, QueryInterfaceDefinition, Result, UserDefinition,
};
use crate::channel::CatalogUpdate;
use crate::log::{
    AddColumnLog, AddConstraintLog, AddPhysicalColumnLog, CatalogBatch, CatalogOp,
    CreateAllocationColumnLog, CreateCollectionLog, CreateGraphLog, CreateNamespaceLog,
    CreatePartitionGroupLog, CreatePartitionLog, CreatePartitionPlacementLog, CreatePlacementLog,
    CreateTableLog, CreateUserLog, CreateViewLog, DropAdapterLog, DropAllocationColumnLog,
    DropColumnLog, DropConstraintLog, DropEntityLog, DropInterfaceLog, DropNamespaceLog,
    DropPartitionGroupLog, DropPartitionLog, DropPartitionPlacementLog, DropPhysicalColumnLog,
    DropPhysicalEntityLog, DropPlacementLog, DropUserLog, NotifyModifiedTablesLog,
    OrderedCatalogBatch, RegisterAdapterLog, RegisterInterfaceLog, RegisterPhysicalCollectionLog,
    RegisterPhysicalGraphLog, RegisterPhysicalTableLog, RenameEntityLog, RenameNamespaceLog,
    SetPartitionDistributionLog, UpdateAllocationColumnPositionLog, UpdateMaterializedTimeLog,
    UpdatePartitionPlacementRoleLog, UpdatePhysicalColumnTypeLog,
};
use crate::logical::{
    CollectionDefinition, ColumnDefinition, ColumnSpec, ConstraintDefinition, ConstraintType,
    DataModel, EntityType, GraphDefinition, LogicalEntity, PolyType, TableDefinition,
    ViewDefinition,
};
use crate::materialized::{CriteriaType, GuardState, MaterializedCriteria};
use crate::physical::{
    PhysicalCollection, PhysicalColumn, PhysicalEntity, PhysicalField, PhysicalGraph,
    PhysicalTable,
};
use crate::serialize::CatalogCheckpoint;
use crate::snapshot::Snapshot;
use crate::store::PersistCatalogResult;
use crate::time::Time;

/// Name given to the partition group and partition of an unpartitioned
/// entity.
const DEFAULT_PARTITION_NAME: &str = "default";

/// Outcome of a single commit attempt.
#[derive(Debug)]
pub(crate) enum Prompt<Success, Retry = ()> {
    Success(Success),
    Retry(Retry),
}

impl Catalog {
    /// Creates a namespace. Namespace names are case-insensitive and stored
    /// lower-cased; `case_sensitive` governs the names of the entities
    /// inside.
    pub async fn create_namespace(
        &self,
        name: &str,
        data_model: DataModel,
        case_sensitive: bool,
    ) -> Result<Arc<NamespaceSchema>> {
        validate_object_name(name, "namespace")?;
        let normalized: Arc<str> = Arc::from(name.to_lowercase());
        let namespace_id = self
            .update_returning(|inner, ids| {
                if inner.namespaces.len() >= self.limits.num_namespaces {
                    return Err(CatalogError::TooManyNamespaces {
                        limit: self.limits.num_namespaces,
                    });
                }
                if inner.namespaces.contains_name(&normalized) {
                    return Err(CatalogError::NamespaceAlreadyExists {
                        name: Arc::clone(&normalized),
                    });
                }
                let namespace_id = ids.next_namespace_id();
                let batch = self.batch(vec![CatalogOp::CreateNamespace(CreateNamespaceLog {
                    namespace_id,
                    name: Arc::clone(&normalized),
                    data_model,
                    case_sensitive,
                })]);
                Ok((batch, namespace_id))
            })
            .await?;
        self.inner
            .read()
            .namespace_by_id(namespace_id)
            .ok_or_else(|| CatalogError::unexpected("created namespace not found"))
    }

    /// Renames a namespace. Rename is the only namespace mutation; the data
    /// model and case sensitivity are fixed at creation.
    pub async fn rename_namespace(
        &self,
        name: &str,
        new_name: &str,
    ) -> Result<Arc<NamespaceSchema>> {
        validate_object_name(new_name, "namespace")?;
        let normalized: Arc<str> = Arc::from(new_name.to_lowercase());
        let namespace_id = self
            .update_returning(|inner, _ids| {
                let schema = resolve_namespace(inner, name)?;
                if normalized != schema.name && inner.namespaces.contains_name(&normalized) {
                    return Err(CatalogError::NamespaceAlreadyExists {
                        name: Arc::clone(&normalized),
                    });
                }
                let batch = self.batch(vec![CatalogOp::RenameNamespace(RenameNamespaceLog {
                    namespace_id: schema.id,
                    new_name: Arc::clone(&normalized),
                })]);
                Ok((batch, schema.id))
            })
            .await?;
        self.inner
            .read()
            .namespace_by_id(namespace_id)
            .ok_or_else(|| CatalogError::unexpected("renamed namespace not found"))
    }

    /// Drops a namespace. Refused while any entity still lives inside it.
    pub async fn drop_namespace(&self, name: &str) -> Result<()> {
        self.update(|inner, _ids| {
            let schema = resolve_namespace(inner, name)?;
            if schema.entity_count() > 0 {
                return Err(CatalogError::NamespaceNotEmpty {
                    name: Arc::clone(&schema.name),
                    entities: schema.entity_count(),
                });
            }
            Ok(self.batch(vec![CatalogOp::DropNamespace(DropNamespaceLog {
                namespace_id: schema.id,
            })]))
        })
        .await
    }

    /// Creates a table in a relational namespace. `primary_key` names columns
    /// of `columns`; an empty slice creates a table without one. Primary key
    /// columns are forced non-nullable. The table starts with a single
    /// default partition and no placements.
    pub async fn create_table(
        &self,
        namespace: &str,
        name: &str,
        columns: &[ColumnSpec],
        primary_key: &[&str],
    ) -> Result<Arc<TableDefinition>> {
        validate_object_name(name, "table")?;
        let table_id = self
            .update_returning(|inner, ids| {
                let schema = resolve_model(inner, namespace, DataModel::Relational)?;
                check_entity_creatable(inner, &schema, name, "table", self.limits)?;
                let name = schema.normalize(name);
                let mut columns = build_columns(&schema, &name, columns, ids, self.limits)?;
                let constraints =
                    build_primary_key(&schema, &name, &mut columns, primary_key, ids)?;
                let table_id = ids.next_entity_id();
                let mut ops = vec![CatalogOp::CreateTable(CreateTableLog {
                    namespace_id: schema.id,
                    table_id,
                    name,
                    columns,
                    constraints,
                })];
                ops.extend(default_distribution_ops(ids, table_id));
                Ok((self.batch(ops), table_id))
            })
            .await?;
        self.inner
            .read()
            .table(table_id)
            .ok_or_else(|| CatalogError::unexpected("created table not found"))
    }

    /// Creates a view over the given tables. Views carry a column list like
    /// tables but no constraints, and are never placed on adapters.
    pub async fn create_view(
        &self,
        namespace: &str,
        name: &str,
        columns: &[ColumnSpec],
        query: &str,
        underlying: &[EntityId],
    ) -> Result<Arc<TableDefinition>> {
        validate_object_name(name, "view")?;
        let table_id = self
            .update_returning(|inner, ids| {
                let schema = resolve_model(inner, namespace, DataModel::Relational)?;
                check_entity_creatable(inner, &schema, name, "view", self.limits)?;
                let name = schema.normalize(name);
                let columns = build_columns(&schema, &name, columns, ids, self.limits)?;
                let underlying = resolve_underlying(inner, underlying)?;
                let table_id = ids.next_entity_id();
                let mut ops = vec![CatalogOp::CreateView(CreateViewLog {
                    namespace_id: schema.id,
                    table_id,
                    name,
                    entity_type: EntityType::View,
                    columns,
                    view: ViewDefinition {
                        query: Arc::from(query),
                        underlying,
                        criteria: None,
                    },
                })];
                ops.extend(default_distribution_ops(ids, table_id));
                Ok((self.batch(ops), table_id))
            })
            .await?;
        self.inner
            .read()
            .table(table_id)
            .ok_or_else(|| CatalogError::unexpected("created view not found"))
    }

    /// Creates a materialized view. `criteria` decides when it falls due for
    /// a refresh; the refresh itself is driven by
    /// [`notify_modified_tables`](Self::notify_modified_tables) for
    /// update-driven views and by the background sweep for interval-driven
    /// ones.
    pub async fn create_materialized_view(
        &self,
        namespace: &str,
        name: &str,
        columns: &[ColumnSpec],
        query: &str,
        underlying: &[EntityId],
        criteria: CriteriaType,
    ) -> Result<Arc<TableDefinition>> {
        validate_object_name(name, "view")?;
        match criteria {
            CriteriaType::Update { interval } if interval == 0 => {
                return Err(CatalogError::InvalidRefreshCriteria {
                    view: Arc::from(name),
                    context: "the update interval must be at least one modification",
                });
            }
            CriteriaType::Interval { period } if period.is_zero() => {
                return Err(CatalogError::InvalidRefreshCriteria {
                    view: Arc::from(name),
                    context: "the refresh period must not be zero",
                });
            }
            _ => {}
        }
        let Some(_hold) = self.guard.try_begin(GuardState::Creating) else {
            return Err(CatalogError::MaterializedViewBusy {
                operation: "create materialized view",
            });
        };
        let table_id = self
            .update_returning(|inner, ids| {
                let schema = resolve_model(inner, namespace, DataModel::Relational)?;
                check_entity_creatable(inner, &schema, name, "view", self.limits)?;
                let name = schema.normalize(name);
                let columns = build_columns(&schema, &name, columns, ids, self.limits)?;
                let underlying = resolve_underlying(inner, underlying)?;
                let table_id = ids.next_entity_id();
                let mut ops = vec![CatalogOp::CreateView(CreateViewLog {
                    namespace_id: schema.id,
                    table_id,
                    name,
                    entity_type: EntityType::MaterializedView,
                    columns,
                    view: ViewDefinition {
                        query: Arc::from(query),
                        underlying,
                        criteria: Some(MaterializedCriteria::new(
                            criteria.clone(),
                            self.time_provider.now(),
                        )),
                    },
                })];
                ops.extend(default_distribution_ops(ids, table_id));
                Ok((self.batch(ops), table_id))
            })
            .await?;
        self.inner
            .read()
            .table(table_id)
            .ok_or_else(|| CatalogError::unexpected("created materialized view not found"))
    }

    /// Creates a collection in a document namespace. Collections are
    /// schemaless at this layer; fields materialize per adapter.
    pub async fn create_collection(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Arc<CollectionDefinition>> {
        validate_object_name(name, "collection")?;
        let (namespace_id, collection_id) = self
            .update_returning(|inner, ids| {
                let schema = resolve_model(inner, namespace, DataModel::Document)?;
                check_entity_creatable(inner, &schema, name, "collection", self.limits)?;
                let collection_id = ids.next_entity_id();
                let mut ops = vec![CatalogOp::CreateCollection(CreateCollectionLog {
                    namespace_id: schema.id,
                    collection_id,
                    name: schema.normalize(name),
                })];
                ops.extend(default_distribution_ops(ids, collection_id));
                Ok((self.batch(ops), (schema.id, collection_id)))
            })
            .await?;
        self.inner
            .read()
            .namespace_by_id(namespace_id)
            .and_then(|schema| schema.collections()?.get_by_id(&collection_id))
            .ok_or_else(|| CatalogError::unexpected("created collection not found"))
    }

    /// Creates a property graph in a graph namespace.
    pub async fn create_graph(&self, namespace: &str, name: &str) -> Result<Arc<GraphDefinition>> {
        validate_object_name(name, "graph")?;
        let (namespace_id, graph_id) = self
            .update_returning(|inner, ids| {
                let schema = resolve_model(inner, namespace, DataModel::Graph)?;
                check_entity_creatable(inner, &schema, name, "graph", self.limits)?;
                let graph_id = ids.next_entity_id();
                let mut ops = vec![CatalogOp::CreateGraph(CreateGraphLog {
                    namespace_id: schema.id,
                    graph_id,
                    name: schema.normalize(name),
                })];
                ops.extend(default_distribution_ops(ids, graph_id));
                Ok((self.batch(ops), (schema.id, graph_id)))
            })
            .await?;
        self.inner
            .read()
            .namespace_by_id(namespace_id)
            .and_then(|schema| schema.graphs()?.get_by_id(&graph_id))
            .ok_or_else(|| CatalogError::unexpected("created graph not found"))
    }

    /// Renames an entity within its namespace.
    pub async fn rename_entity(
        &self,
        namespace: &str,
        name: &str,
        new_name: &str,
    ) -> Result<LogicalEntity> {
        validate_object_name(new_name, "entity")?;
        let entity_id = self
            .update_returning(|inner, _ids| {
                let schema = resolve_namespace(inner, namespace)?;
                let entity = resolve_entity(&schema, name)?;
                let normalized = schema.normalize(new_name);
                if normalized != entity.name() && schema.contains_entity_name(new_name) {
                    return Err(CatalogError::AlreadyExists {
                        kind: "entity",
                        namespace: Arc::clone(&schema.name),
                        name: normalized,
                    });
                }
                let batch = self.batch(vec![CatalogOp::RenameEntity(RenameEntityLog {
                    namespace_id: schema.id,
                    entity_id: entity.id(),
                    new_name: normalized,
                })]);
                Ok((batch, entity.id()))
            })
            .await?;
        self.inner
            .read()
            .logical_entity(entity_id)
            .ok_or_else(|| CatalogError::unexpected("renamed entity not found"))
    }

    /// Drops an entity with everything allocated under it: placements, their
    /// columns and partition placements, the partition layout, and the
    /// physical entities the adapters registered. Refused while any view
    /// still reads from the entity.
    pub async fn drop_entity(&self, namespace: &str, name: &str) -> Result<()> {
        let is_materialized = self
            .inner
            .read()
            .namespace_by_name(namespace)
            .and_then(|schema| schema.entity_by_name(name))
            .and_then(|entity| entity.as_table().map(|table| table.is_materialized()))
            .unwrap_or(false);
        let _hold = if is_materialized {
            match self.guard.try_begin(GuardState::Dropping) {
                Some(hold) => Some(hold),
                None => {
                    return Err(CatalogError::MaterializedViewBusy {
                        operation: "drop materialized view",
                    });
                }
            }
        } else {
            None
        };
        self.update(|inner, _ids| {
            let schema = resolve_namespace(inner, namespace)?;
            let entity = resolve_entity(&schema, name)?;
            let entity_id = entity.id();
            for (_, other) in inner.namespaces.iter() {
                let Some(tables) = other.tables() else { continue };
                for (table_id, table) in tables.iter() {
                    if *table_id == entity_id {
                        continue;
                    }
                    if let Some(view) = &table.view {
                        if view.underlying.contains(&entity_id) {
                            return Err(CatalogError::ViewDependsOnEntity {
                                entity: entity.name(),
                                view: Arc::clone(&table.name),
                            });
                        }
                    }
                }
            }
            let mut ops = Vec::new();
            for placement in inner.allocation.placements_for_entity(entity_id) {
                ops.extend(placement_cascade_ops(inner, &placement));
            }
            for partition in inner.allocation.partitions_for_entity(entity_id) {
                ops.push(CatalogOp::DropPartition(DropPartitionLog {
                    partition_id: partition.id,
                }));
            }
            for group in inner.allocation.groups_for_entity(entity_id) {
                ops.push(CatalogOp::DropPartitionGroup(DropPartitionGroupLog {
                    group_id: group.id,
                }));
            }
            ops.push(CatalogOp::DropEntity(DropEntityLog {
                namespace_id: schema.id,
                entity_id,
            }));
            Ok(self.batch(ops))
        })
        .await
    }

    /// Adds a column to a table. The column lands at the end of the ordinal
    /// order, and every existing placement of the table starts carrying it.
    pub async fn add_column(
        &self,
        namespace: &str,
        table: &str,
        column: ColumnSpec,
    ) -> Result<Arc<TableDefinition>> {
        validate_object_name(&column.name, "column")?;
        let table_id = self
            .update_returning(|inner, ids| {
                let (schema, table_def) = resolve_table(inner, namespace, table)?;
                if table_def.columns.len() >= self.limits.num_columns_per_table {
                    return Err(CatalogError::TooManyColumns {
                        table: Arc::clone(&table_def.name),
                        limit: self.limits.num_columns_per_table,
                    });
                }
                let name = schema.normalize(&column.name);
                if table_def.columns.contains_name(&name) {
                    return Err(CatalogError::AlreadyExists {
                        kind: "column",
                        namespace: Arc::clone(&table_def.name),
                        name,
                    });
                }
                let column_id = ids.next_field_id();
                let definition = ColumnDefinition {
                    id: column_id,
                    name,
                    position: table_def.columns.len() as u64,
                    poly_type: column.poly_type,
                    collection_type: column.collection_type,
                    length: column.length,
                    scale: column.scale,
                    dimension: column.dimension,
                    cardinality: column.cardinality,
                    nullable: column.nullable,
                    default: column.default.clone(),
                };
                let mut ops = vec![CatalogOp::AddColumn(AddColumnLog {
                    namespace_id: schema.id,
                    table_id: table_def.id,
                    column: definition,
                })];
                for placement in inner.allocation.placements_for_entity(table_def.id) {
                    ops.push(CatalogOp::CreateAllocationColumn(CreateAllocationColumnLog {
                        column: AllocationColumn {
                            placement_id: placement.id,
                            logical_id: table_def.id,
                            adapter_id: placement.adapter_id,
                            column_id,
                            placement_type: PlacementType::Automatic,
                            position: next_allocation_position(inner, placement.id),
                        },
                    }));
                }
                Ok((self.batch(ops), table_def.id))
            })
            .await?;
        self.inner
            .read()
            .table(table_id)
            .ok_or_else(|| CatalogError::unexpected("altered table not found"))
    }

    /// Drops a column from a table, along with its placements on every
    /// adapter. Refused while a constraint references the column. The
    /// remaining columns close ranks, keeping ordinal positions dense.
    pub async fn drop_column(
        &self,
        namespace: &str,
        table: &str,
        column: &str,
    ) -> Result<Arc<TableDefinition>> {
        let table_id = self
            .update_returning(|inner, _ids| {
                let (schema, table_def) = resolve_table(inner, namespace, table)?;
                let column_def = resolve_column(&schema, &table_def, column)?;
                if let Some(constraint) = table_def.constraints_on_column(column_def.id).first() {
                    return Err(CatalogError::ColumnInUse {
                        table: Arc::clone(&table_def.name),
                        column: Arc::clone(&column_def.name),
                        constraint: Arc::clone(&constraint.name),
                    });
                }
                if table_def.columns.len() == 1 {
                    return Err(CatalogError::InvalidColumns {
                        table: Arc::clone(&table_def.name),
                        context: "a table cannot lose its last column".to_string(),
                    });
                }
                let mut ops = Vec::new();
                for carried in inner
                    .allocation
                    .placements_of_column(table_def.id, column_def.id)
                {
                    ops.push(CatalogOp::DropAllocationColumn(DropAllocationColumnLog {
                        placement_id: carried.placement_id,
                        column_id: column_def.id,
                    }));
                }
                ops.push(CatalogOp::DropColumn(DropColumnLog {
                    namespace_id: schema.id,
                    table_id: table_def.id,
                    column_id: column_def.id,
                }));
                Ok((self.batch(ops), table_def.id))
            })
            .await?;
        self.inner
            .read()
            .table(table_id)
            .ok_or_else(|| CatalogError::unexpected("altered table not found"))
    }

    /// Adds a named constraint over existing columns of a table.
    pub async fn add_constraint(
        &self,
        namespace: &str,
        table: &str,
        name: &str,
        constraint_type: ConstraintType,
        columns: &[&str],
    ) -> Result<Arc<TableDefinition>> {
        validate_object_name(name, "constraint")?;
        let table_id = self
            .update_returning(|inner, ids| {
                let (schema, table_def) = resolve_table(inner, namespace, table)?;
                let constraint_name = schema.normalize(name);
                if table_def.constraint_by_name(&constraint_name).is_some() {
                    return Err(CatalogError::DuplicateConstraint {
                        table: Arc::clone(&table_def.name),
                        constraint: constraint_name,
                    });
                }
                if constraint_type == ConstraintType::PrimaryKey
                    && table_def.primary_key().is_some()
                {
                    return Err(CatalogError::InvalidConstraint {
                        table: Arc::clone(&table_def.name),
                        context: "the table already has a primary key".to_string(),
                    });
                }
                if columns.is_empty() {
                    return Err(CatalogError::InvalidConstraint {
                        table: Arc::clone(&table_def.name),
                        context: "a constraint needs at least one column".to_string(),
                    });
                }
                let mut column_ids = Vec::with_capacity(columns.len());
                for column in columns {
                    let column_def = resolve_column(&schema, &table_def, column)?;
                    if column_ids.contains(&column_def.id) {
                        return Err(CatalogError::InvalidConstraint {
                            table: Arc::clone(&table_def.name),
                            context: format!("column '{}' listed twice", column_def.name),
                        });
                    }
                    column_ids.push(column_def.id);
                }
                let batch = self.batch(vec![CatalogOp::AddConstraint(AddConstraintLog {
                    namespace_id: schema.id,
                    table_id: table_def.id,
                    constraint: ConstraintDefinition {
                        id: ids.next_constraint_id(),
                        name: constraint_name,
                        constraint_type,
                        column_ids,
                    },
                })]);
                Ok((batch, table_def.id))
            })
            .await?;
        self.inner
            .read()
            .table(table_id)
            .ok_or_else(|| CatalogError::unexpected("altered table not found"))
    }

    /// Drops a named constraint from a table.
    pub async fn drop_constraint(&self, namespace: &str, table: &str, name: &str) -> Result<()> {
        self.update(|inner, _ids| {
            let (schema, table_def) = resolve_table(inner, namespace, table)?;
            let constraint = table_def
                .constraint_by_name(&schema.normalize(name))
                .ok_or_else(|| CatalogError::NotFound {
                    kind: "constraint",
                    name: schema.normalize(name),
                })?;
            Ok(self.batch(vec![CatalogOp::DropConstraint(DropConstraintLog {
                namespace_id: schema.id,
                table_id: table_def.id,
                constraint_id: constraint.id,
            })]))
        })
        .await
    }

    /// Records one modification of each listed table against every
    /// update-driven materialized view reading from it. Returns the views
    /// whose refresh interval completed with this notification; their
    /// counters are reset.
    pub async fn notify_modified_tables(&self, table_ids: &[EntityId]) -> Result<Vec<EntityId>> {
        self.update_returning(|inner, _ids| {
            let mut fired = Vec::new();
            for (_, schema) in inner.namespaces.iter() {
                let Some(tables) = schema.tables() else { continue };
                for (view_id, table) in tables.iter() {
                    let Some(view) = &table.view else { continue };
                    let Some(criteria) = &view.criteria else { continue };
                    if view.underlying.iter().any(|u| table_ids.contains(u))
                        && criteria.fires_on_next_update()
                    {
                        fired.push(*view_id);
                    }
                }
            }
            let batch = self.batch(vec![CatalogOp::NotifyModifiedTables(
                NotifyModifiedTablesLog {
                    table_ids: table_ids.to_vec(),
                },
            )]);
            Ok((batch, fired))
        })
        .await
    }

    /// Records a completed refresh of a materialized view, resetting its
    /// modification counter and refresh timestamp.
    pub async fn update_materialized_time(&self, table_id: EntityId, now: Time) -> Result<()> {
        self.update(|inner, _ids| {
            let table = inner.table(table_id).ok_or(CatalogError::IdNotFound {
                kind: "table",
                id: table_id.get(),
            })?;
            if !table.is_materialized() {
                return Err(CatalogError::IdNotFound {
                    kind: "materialized view",
                    id: table_id.get(),
                });
            }
            Ok(self.batch(vec![CatalogOp::UpdateMaterializedTime(
                UpdateMaterializedTimeLog {
                    table_id,
                    time_ns: now.timestamp_nanos(),
                },
            )]))
        })
        .await
    }

    /// Creates a placement of an entity on an adapter. For tables, `columns`
    /// picks the carried columns; `None` carries all of them. Manual column
    /// lists must include the primary key, and whatever they leave out must
    /// stay covered by the other placements. The placement starts with an
    /// up-to-date partition placement for every partition of the entity.
    pub async fn add_placement(
        &self,
        namespace: &str,
        entity: &str,
        adapter: &str,
        columns: Option<&[&str]>,
    ) -> Result<Arc<PlacementDefinition>> {
        let placement_id = self
            .update_returning(|inner, ids| {
                let schema = resolve_namespace(inner, namespace)?;
                let logical = resolve_entity(&schema, entity)?;
                let adapter_def = resolve_adapter(inner, adapter)?;
                if inner
                    .allocation
                    .placement_for(logical.id(), adapter_def.id)
                    .is_some()
                {
                    return Err(CatalogError::PlacementAlreadyExists {
                        entity: logical.name(),
                        adapter: Arc::clone(&adapter_def.unique_name),
                    });
                }
                let placement_id = ids.next_placement_id();
                let placement_type = if columns.is_some() {
                    PlacementType::Manual
                } else {
                    PlacementType::Automatic
                };
                let mut ops = vec![CatalogOp::CreatePlacement(CreatePlacementLog {
                    placement: PlacementDefinition {
                        id: placement_id,
                        logical_id: logical.id(),
                        adapter_id: adapter_def.id,
                        data_model: logical.data_model(),
                    },
                })];
                if let Some(table) = logical.as_table() {
                    let carried = carried_columns(&schema, table, columns)?;
                    for (column_id, _) in table.columns.iter() {
                        let covered = carried.iter().any(|c| c.id == *column_id)
                            || !inner
                                .allocation
                                .placements_of_column(table.id, *column_id)
                                .is_empty();
                        if !covered {
                            let name = table
                                .column_by_id(*column_id)
                                .map(|c| c.name.to_string())
                                .unwrap_or_default();
                            return Err(CatalogError::InvalidColumns {
                                table: Arc::clone(&table.name),
                                context: format!(
                                    "column '{name}' would be carried by no placement"
                                ),
                            });
                        }
                    }
                    for (position, column) in carried.iter().enumerate() {
                        ops.push(CatalogOp::CreateAllocationColumn(
                            CreateAllocationColumnLog {
                                column: AllocationColumn {
                                    placement_id,
                                    logical_id: table.id,
                                    adapter_id: adapter_def.id,
                                    column_id: column.id,
                                    placement_type,
                                    position: position as u64,
                                },
                            },
                        ));
                    }
                }
                for partition in inner.allocation.partitions_for_entity(logical.id()) {
                    ops.push(CatalogOp::CreatePartitionPlacement(
                        CreatePartitionPlacementLog {
                            allocation: AllocationPartition {
                                id: ids.next_allocation_id(),
                                placement_id,
                                partition_id: partition.id,
                                logical_id: logical.id(),
                                adapter_id: adapter_def.id,
                                placement_type,
                                role: DataPlacementRole::UpToDate,
                            },
                        },
                    ));
                }
                Ok((self.batch(ops), placement_id))
            })
            .await?;
        self.inner
            .read()
            .allocation
            .placement(placement_id)
            .ok_or_else(|| CatalogError::unexpected("created placement not found"))
    }

    /// Removes the placement of an entity from an adapter, with everything
    /// allocated under it. Refused when any column or partition would lose
    /// its last copy, so the final placement of an entity only goes away
    /// with the entity itself.
    pub async fn drop_placement(&self, namespace: &str, entity: &str, adapter: &str) -> Result<()> {
        self.update(|inner, _ids| {
            let (_, logical, adapter_def, placement) =
                resolve_placement(inner, namespace, entity, adapter)?;
            let column_ids = entity_column_ids(&logical);
            let partition_ids: Vec<PartitionId> = inner
                .allocation
                .partitions_for_entity(logical.id())
                .iter()
                .map(|p| p.id)
                .collect();
            let remove_columns: HashSet<(PlacementId, FieldId)> = inner
                .allocation
                .columns_on_placement(placement.id)
                .iter()
                .map(|c| (placement.id, c.column_id))
                .collect();
            let remove_partitions: HashSet<(PlacementId, PartitionId)> = inner
                .allocation
                .allocations_on_placement(placement.id)
                .iter()
                .map(|a| (placement.id, a.partition_id))
                .collect();
            inner
                .allocation
                .check_survives_removal(
                    logical.id(),
                    &column_ids,
                    &partition_ids,
                    &remove_columns,
                    &remove_partitions,
                )
                .map_err(|detail| CatalogError::PlacementUnderflow {
                    entity: logical.name(),
                    adapter: Arc::clone(&adapter_def.unique_name),
                    detail,
                })?;
            Ok(self.batch(placement_cascade_ops(inner, &placement)))
        })
        .await
    }

    /// Starts carrying one more column on an existing table placement.
    pub async fn add_column_placement(
        &self,
        namespace: &str,
        entity: &str,
        adapter: &str,
        column: &str,
        position: Option<u64>,
    ) -> Result<AllocationColumn> {
        self.update_returning(|inner, _ids| {
            let (schema, logical, adapter_def, placement) =
                resolve_placement(inner, namespace, entity, adapter)?;
            let table = placed_table(&logical)?;
            let column_def = resolve_column(&schema, table, column)?;
            if inner
                .allocation
                .column_on_placement(placement.id, column_def.id)
                .is_some()
            {
                return Err(CatalogError::ColumnPlacementExists {
                    column: Arc::clone(&column_def.name),
                    adapter: Arc::clone(&adapter_def.unique_name),
                });
            }
            let position = match position {
                Some(position) => {
                    check_position_free(inner, table, placement.id, column_def.id, position)?;
                    position
                }
                None => next_allocation_position(inner, placement.id),
            };
            let allocation_column = AllocationColumn {
                placement_id: placement.id,
                logical_id: table.id,
                adapter_id: adapter_def.id,
                column_id: column_def.id,
                placement_type: PlacementType::Manual,
                position,
            };
            let batch = self.batch(vec![CatalogOp::CreateAllocationColumn(
                CreateAllocationColumnLog {
                    column: allocation_column.clone(),
                },
            )]);
            Ok((batch, allocation_column))
        })
        .await
    }

    /// Stops carrying a column on one placement. Refused for primary key
    /// columns, which every table placement carries, and when any partition
    /// would be left without a copy of the column.
    pub async fn drop_column_placement(
        &self,
        namespace: &str,
        entity: &str,
        adapter: &str,
        column: &str,
    ) -> Result<()> {
        self.update(|inner, _ids| {
            let (schema, logical, adapter_def, placement) =
                resolve_placement(inner, namespace, entity, adapter)?;
            let table = placed_table(&logical)?;
            let column_def = resolve_column(&schema, table, column)?;
            if inner
                .allocation
                .column_on_placement(placement.id, column_def.id)
                .is_none()
            {
                return Err(CatalogError::NotFound {
                    kind: "column placement",
                    name: Arc::clone(&column_def.name),
                });
            }
            if let Some(pk) = table.primary_key() {
                if pk.column_ids.contains(&column_def.id) {
                    return Err(CatalogError::ColumnInUse {
                        table: Arc::clone(&table.name),
                        column: Arc::clone(&column_def.name),
                        constraint: Arc::clone(&pk.name),
                    });
                }
            }
            let partition_ids: Vec<PartitionId> = inner
                .allocation
                .partitions_for_entity(table.id)
                .iter()
                .map(|p| p.id)
                .collect();
            let remove_columns = HashSet::from_iter([(placement.id, column_def.id)]);
            inner
                .allocation
                .check_survives_removal(
                    table.id,
                    &[column_def.id],
                    &partition_ids,
                    &remove_columns,
                    &HashSet::new(),
                )
                .map_err(|detail| CatalogError::PlacementUnderflow {
                    entity: logical.name(),
                    adapter: Arc::clone(&adapter_def.unique_name),
                    detail,
                })?;
            Ok(self.batch(vec![CatalogOp::DropAllocationColumn(
                DropAllocationColumnLog {
                    placement_id: placement.id,
                    column_id: column_def.id,
                },
            )]))
        })
        .await
    }

    /// Moves a column placement to another adapter-local position.
    pub async fn update_column_placement_position(
        &self,
        namespace: &str,
        entity: &str,
        adapter: &str,
        column: &str,
        position: u64,
    ) -> Result<()> {
        self.update(|inner, _ids| {
            let (schema, logical, _, placement) =
                resolve_placement(inner, namespace, entity, adapter)?;
            let table = placed_table(&logical)?;
            let column_def = resolve_column(&schema, table, column)?;
            if inner
                .allocation
                .column_on_placement(placement.id, column_def.id)
                .is_none()
            {
                return Err(CatalogError::NotFound {
                    kind: "column placement",
                    name: Arc::clone(&column_def.name),
                });
            }
            check_position_free(inner, table, placement.id, column_def.id, position)?;
            Ok(self.batch(vec![CatalogOp::UpdateAllocationColumnPosition(
                UpdateAllocationColumnPositionLog {
                    placement_id: placement.id,
                    column_id: column_def.id,
                    position,
                },
            )]))
        })
        .await
    }

    /// Adds a partition group to a list or range partitioned table. The
    /// group starts with one partition of the same name, placed wherever the
    /// table already has placements.
    pub async fn add_partition_group(
        &self,
        namespace: &str,
        table: &str,
        name: &str,
        qualifiers: &[&str],
    ) -> Result<Arc<PartitionGroupDefinition>> {
        validate_object_name(name, "partition group")?;
        let group_id = self
            .update_returning(|inner, ids| {
                let (schema, table_def) = resolve_table(inner, namespace, table)?;
                check_groups_mutable(inner, &table_def)?;
                let name = schema.normalize(name);
                if inner
                    .allocation
                    .groups_for_entity(table_def.id)
                    .iter()
                    .any(|g| g.name == name)
                {
                    return Err(CatalogError::AlreadyExists {
                        kind: "partition group",
                        namespace: Arc::clone(&table_def.name),
                        name,
                    });
                }
                let distribution =
                    resolve_distribution(inner, &table_def)?;
                let qualifiers: Vec<Arc<str>> =
                    qualifiers.iter().map(|q| Arc::from(*q)).collect();
                let group_id = ids.next_partition_group_id();
                let partition_id = ids.next_partition_id();
                let mut updated = distribution.clone();
                updated.group_ids.push(group_id);
                updated.partition_ids.push(partition_id);
                let mut ops = vec![
                    CatalogOp::CreatePartitionGroup(CreatePartitionGroupLog {
                        group: PartitionGroupDefinition {
                            id: group_id,
                            logical_id: table_def.id,
                            name: Arc::clone(&name),
                            qualifiers: qualifiers.clone(),
                        },
                    }),
                    CatalogOp::CreatePartition(CreatePartitionLog {
                        partition: PartitionDefinition {
                            id: partition_id,
                            group_id,
                            logical_id: table_def.id,
                            name,
                            qualifiers,
                            is_unbound: false,
                        },
                    }),
                    CatalogOp::SetPartitionDistribution(SetPartitionDistributionLog {
                        distribution: updated,
                    }),
                ];
                ops.extend(spread_partition_ops(inner, ids, table_def.id, partition_id));
                Ok((self.batch(ops), group_id))
            })
            .await?;
        self.inner
            .read()
            .allocation
            .group(group_id)
            .ok_or_else(|| CatalogError::unexpected("created partition group not found"))
    }

    /// Adds a partition to an existing group of a list or range partitioned
    /// table.
    pub async fn add_partition(
        &self,
        namespace: &str,
        table: &str,
        group: &str,
        name: &str,
        qualifiers: &[&str],
    ) -> Result<Arc<PartitionDefinition>> {
        validate_object_name(name, "partition")?;
        let partition_id = self
            .update_returning(|inner, ids| {
                let (schema, table_def) = resolve_table(inner, namespace, table)?;
                check_groups_mutable(inner, &table_def)?;
                let group_name = schema.normalize(group);
                let group_def = inner
                    .allocation
                    .groups_for_entity(table_def.id)
                    .into_iter()
                    .find(|g| g.name == group_name)
                    .ok_or(CatalogError::NotFound {
                        kind: "partition group",
                        name: group_name,
                    })?;
                let name = schema.normalize(name);
                if inner
                    .allocation
                    .partitions_for_entity(table_def.id)
                    .iter()
                    .any(|p| p.name == name)
                {
                    return Err(CatalogError::AlreadyExists {
                        kind: "partition",
                        namespace: Arc::clone(&table_def.name),
                        name,
                    });
                }
                let distribution = resolve_distribution(inner, &table_def)?;
                let partition_id = ids.next_partition_id();
                let mut updated = distribution.clone();
                updated.partition_ids.push(partition_id);
                let mut ops = vec![
                    CatalogOp::CreatePartition(CreatePartitionLog {
                        partition: PartitionDefinition {
                            id: partition_id,
                            group_id: group_def.id,
                            logical_id: table_def.id,
                            name,
                            qualifiers: qualifiers.iter().map(|q| Arc::from(*q)).collect(),
                            is_unbound: false,
                        },
                    }),
                    CatalogOp::SetPartitionDistribution(SetPartitionDistributionLog {
                        distribution: updated,
                    }),
                ];
                ops.extend(spread_partition_ops(inner, ids, table_def.id, partition_id));
                Ok((self.batch(ops), partition_id))
            })
            .await?;
        self.inner
            .read()
            .allocation
            .partition(partition_id)
            .ok_or_else(|| CatalogError::unexpected("created partition not found"))
    }

    /// Places one partition of an entity on an adapter that already holds a
    /// placement of it, with an explicit freshness role.
    pub async fn add_partition_placement(
        &self,
        namespace: &str,
        entity: &str,
        adapter: &str,
        partition_id: PartitionId,
        placement_type: PlacementType,
        role: DataPlacementRole,
    ) -> Result<Arc<AllocationPartition>> {
        let allocation_id = self
            .update_returning(|inner, ids| {
                let (_, logical, adapter_def, placement) =
                    resolve_placement(inner, namespace, entity, adapter)?;
                let partition = inner
                    .allocation
                    .partition(partition_id)
                    .filter(|p| p.logical_id == logical.id())
                    .ok_or(CatalogError::IdNotFound {
                        kind: "partition",
                        id: partition_id.get(),
                    })?;
                if inner
                    .allocation
                    .allocation_for(placement.id, partition_id)
                    .is_some()
                {
                    return Err(CatalogError::PlacementAlreadyExists {
                        entity: Arc::clone(&partition.name),
                        adapter: Arc::clone(&adapter_def.unique_name),
                    });
                }
                let allocation_id = ids.next_allocation_id();
                let batch = self.batch(vec![CatalogOp::CreatePartitionPlacement(
                    CreatePartitionPlacementLog {
                        allocation: AllocationPartition {
                            id: allocation_id,
                            placement_id: placement.id,
                            partition_id,
                            logical_id: logical.id(),
                            adapter_id: adapter_def.id,
                            placement_type,
                            role,
                        },
                    },
                )]);
                Ok((batch, allocation_id))
            })
            .await?;
        self.inner
            .read()
            .allocation
            .allocation(allocation_id)
            .ok_or_else(|| CatalogError::unexpected("created partition placement not found"))
    }

    /// Removes one partition from a placement, dropping the physical
    /// entities registered under its allocation. Refused when the partition
    /// would lose its last copy.
    pub async fn drop_partition_placement(
        &self,
        namespace: &str,
        entity: &str,
        adapter: &str,
        partition_id: PartitionId,
    ) -> Result<()> {
        self.update(|inner, _ids| {
            let (_, logical, adapter_def, placement) =
                resolve_placement(inner, namespace, entity, adapter)?;
            let allocation = inner
                .allocation
                .allocation_for(placement.id, partition_id)
                .ok_or(CatalogError::IdNotFound {
                    kind: "partition placement",
                    id: partition_id.get(),
                })?;
            let column_ids = entity_column_ids(&logical);
            let remove_partitions = HashSet::from_iter([(placement.id, partition_id)]);
            inner
                .allocation
                .check_survives_removal(
                    logical.id(),
                    &column_ids,
                    &[partition_id],
                    &HashSet::new(),
                    &remove_partitions,
                )
                .map_err(|detail| CatalogError::PlacementUnderflow {
                    entity: logical.name(),
                    adapter: Arc::clone(&adapter_def.unique_name),
                    detail,
                })?;
            let mut ops = Vec::new();
            for physical in inner.physical.from_allocation(adapter_def.id, allocation.id) {
                ops.push(CatalogOp::DropPhysicalEntity(DropPhysicalEntityLog {
                    adapter_id: adapter_def.id,
                    physical_id: physical.id(),
                }));
            }
            ops.push(CatalogOp::DropPartitionPlacement(
                DropPartitionPlacementLog {
                    allocation_id: allocation.id,
                },
            ));
            Ok(self.batch(ops))
        })
        .await
    }

    /// Changes the freshness role of one partition placement. The last
    /// up-to-date copy of a partition cannot be downgraded.
    pub async fn update_partition_placement_role(
        &self,
        namespace: &str,
        entity: &str,
        adapter: &str,
        partition_id: PartitionId,
        role: DataPlacementRole,
    ) -> Result<()> {
        self.update(|inner, _ids| {
            let (_, logical, adapter_def, placement) =
                resolve_placement(inner, namespace, entity, adapter)?;
            let allocation = inner
                .allocation
                .allocation_for(placement.id, partition_id)
                .ok_or(CatalogError::IdNotFound {
                    kind: "partition placement",
                    id: partition_id.get(),
                })?;
            if role == DataPlacementRole::Refreshable
                && allocation.role == DataPlacementRole::UpToDate
            {
                let covered_elsewhere = inner
                    .allocation
                    .allocations_of_partition(partition_id)
                    .iter()
                    .any(|a| a.id != allocation.id && a.role == DataPlacementRole::UpToDate);
                if !covered_elsewhere {
                    return Err(CatalogError::PlacementUnderflow {
                        entity: logical.name(),
                        adapter: Arc::clone(&adapter_def.unique_name),
                        detail: format!(
                            "partition {partition_id} would lose its last up-to-date copy"
                        ),
                    });
                }
            }
            Ok(self.batch(vec![CatalogOp::UpdatePartitionPlacementRole(
                UpdatePartitionPlacementRoleLog {
                    allocation_id: allocation.id,
                    role,
                },
            )]))
        })
        .await
    }

    /// Partitions a table according to `property`, replacing its single
    /// default partition with the derived layout. Every placement of the
    /// table receives allocations for the new partitions; physical entities
    /// under the old allocations are dropped so the adapters re-register
    /// them after migrating.
    pub async fn partition_table(
        &self,
        namespace: &str,
        table: &str,
        property: PartitionProperty,
    ) -> Result<PartitionDistribution> {
        let logical_id = self
            .update_returning(|inner, ids| {
                let (_, table_def) = resolve_table(inner, namespace, table)?;
                if table_def.is_view() {
                    return Err(CatalogError::InvalidPartitioning {
                        entity: Arc::clone(&table_def.name),
                        context: "views cannot be partitioned".to_string(),
                    });
                }
                let distribution = resolve_distribution(inner, &table_def)?;
                if distribution.property.is_some() {
                    return Err(CatalogError::InvalidPartitioning {
                        entity: Arc::clone(&table_def.name),
                        context: "the table is already partitioned, merge it first".to_string(),
                    });
                }
                validate_partition_property(&table_def, &property)?;
                let (groups, partitions) = partition_layout(ids, &table_def, &property);
                let mut ops = Vec::new();
                for group in &groups {
                    ops.push(CatalogOp::CreatePartitionGroup(CreatePartitionGroupLog {
                        group: group.clone(),
                    }));
                }
                for partition in &partitions {
                    ops.push(CatalogOp::CreatePartition(CreatePartitionLog {
                        partition: partition.clone(),
                    }));
                }
                let new_ids: Vec<PartitionId> = partitions.iter().map(|p| p.id).collect();
                ops.extend(move_placements_ops(inner, ids, table_def.id, &new_ids));
                for partition in inner.allocation.partitions_for_entity(table_def.id) {
                    ops.push(CatalogOp::DropPartition(DropPartitionLog {
                        partition_id: partition.id,
                    }));
                }
                for group in inner.allocation.groups_for_entity(table_def.id) {
                    ops.push(CatalogOp::DropPartitionGroup(DropPartitionGroupLog {
                        group_id: group.id,
                    }));
                }
                ops.push(CatalogOp::SetPartitionDistribution(
                    SetPartitionDistributionLog {
                        distribution: PartitionDistribution {
                            logical_id: table_def.id,
                            property: Some(property.clone()),
                            group_ids: groups.iter().map(|g| g.id).collect(),
                            partition_ids: new_ids,
                        },
                    },
                ));
                Ok((self.batch(ops), table_def.id))
            })
            .await?;
        self.inner
            .read()
            .allocation
            .distribution(logical_id)
            .cloned()
            .ok_or_else(|| CatalogError::unexpected("partitioned table has no distribution"))
    }

    /// Reverses partitioning, returning the table to a single default
    /// partition. Placements move onto the new partition; their physical
    /// entities are dropped for the adapters to rebuild.
    pub async fn merge_table(&self, namespace: &str, table: &str) -> Result<()> {
        self.update(|inner, ids| {
            let (_, table_def) = resolve_table(inner, namespace, table)?;
            let distribution = resolve_distribution(inner, &table_def)?;
            if distribution.property.is_none() {
                return Err(CatalogError::InvalidPartitioning {
                    entity: Arc::clone(&table_def.name),
                    context: "the table is not partitioned".to_string(),
                });
            }
            let group_id = ids.next_partition_group_id();
            let partition_id = ids.next_partition_id();
            let name: Arc<str> = Arc::from(DEFAULT_PARTITION_NAME);
            let mut ops = vec![
                CatalogOp::CreatePartitionGroup(CreatePartitionGroupLog {
                    group: PartitionGroupDefinition {
                        id: group_id,
                        logical_id: table_def.id,
                        name: Arc::clone(&name),
                        qualifiers: Vec::new(),
                    },
                }),
                CatalogOp::CreatePartition(CreatePartitionLog {
                    partition: PartitionDefinition {
                        id: partition_id,
                        group_id,
                        logical_id: table_def.id,
                        name,
                        qualifiers: Vec::new(),
                        is_unbound: false,
                    },
                }),
            ];
            ops.extend(move_placements_ops(inner, ids, table_def.id, &[partition_id]));
            for partition in inner.allocation.partitions_for_entity(table_def.id) {
                ops.push(CatalogOp::DropPartition(DropPartitionLog {
                    partition_id: partition.id,
                }));
            }
            for group in inner.allocation.groups_for_entity(table_def.id) {
                ops.push(CatalogOp::DropPartitionGroup(DropPartitionGroupLog {
                    group_id: group.id,
                }));
            }
            ops.push(CatalogOp::SetPartitionDistribution(
                SetPartitionDistributionLog {
                    distribution: PartitionDistribution {
                        logical_id: table_def.id,
                        property: None,
                        group_ids: vec![group_id],
                        partition_ids: vec![partition_id],
                    },
                },
            ));
            Ok(self.batch(ops))
        })
        .await
    }

    /// Whether removing the named columns and partitions from the adapter's
    /// placement would leave every remaining `(column, partition)` pair of
    /// the entity covered. The mutating methods run the same check inside
    /// their commit; a `true` here can go stale the moment another writer
    /// commits.
    pub fn validate_placement_constraints(
        &self,
        namespace: &str,
        entity: &str,
        adapter: &str,
        columns_to_remove: &[&str],
        partitions_to_remove: &[PartitionId],
    ) -> Result<bool> {
        let inner = self.inner.read();
        let (schema, logical, _, placement) =
            resolve_placement(&inner, namespace, entity, adapter)?;
        let mut remove_columns = HashSet::new();
        if let Some(table) = logical.as_table() {
            for column in columns_to_remove {
                let column_def = resolve_column(&schema, table, column)?;
                remove_columns.insert((placement.id, column_def.id));
            }
        } else if !columns_to_remove.is_empty() {
            return Err(CatalogError::InvalidColumns {
                table: logical.name(),
                context: "only tables carry column placements".to_string(),
            });
        }
        let remove_partitions: HashSet<(PlacementId, PartitionId)> = partitions_to_remove
            .iter()
            .map(|p| (placement.id, *p))
            .collect();
        let column_ids = entity_column_ids(&logical);
        let partition_ids: Vec<PartitionId> = inner
            .allocation
            .partitions_for_entity(logical.id())
            .iter()
            .map(|p| p.id)
            .collect();
        Ok(inner
            .allocation
            .check_survives_removal(
                logical.id(),
                &column_ids,
                &partition_ids,
                &remove_columns,
                &remove_partitions,
            )
            .is_ok())
    }

    /// Registers an adapter instance. When a template of `adapter_name` is
    /// known, its default settings fill in everything `settings` leaves out.
    pub async fn register_adapter(
        &self,
        unique_name: &str,
        adapter_name: &str,
        adapter_type: AdapterType,
        mode: DeployMode,
        settings: &[(&str, &str)],
    ) -> Result<Arc<AdapterDefinition>> {
        validate_object_name(unique_name, "adapter")?;
        let unique: Arc<str> = Arc::from(unique_name.to_lowercase());
        let template = self.adapter_template(adapter_name);
        if let Some(template) = &template {
            if !template.modes.contains(&mode) {
                return Err(CatalogError::InvalidName {
                    name: Arc::clone(&template.name),
                    context: "the adapter does not support this deploy mode",
                });
            }
        }
        let adapter_id = self
            .update_returning(|inner, ids| {
                if inner.adapters.contains_name(&unique) {
                    return Err(CatalogError::AdapterAlreadyExists {
                        name: Arc::clone(&unique),
                    });
                }
                let mut merged = SerdeVecMap::new();
                if let Some(template) = &template {
                    for (key, value) in template.default_settings.iter() {
                        merged.insert(Arc::clone(key), Arc::clone(value));
                    }
                }
                for (key, value) in settings {
                    merged.insert(Arc::from(*key), Arc::from(*value));
                }
                let adapter_id = ids.next_adapter_id();
                let batch = self.batch(vec![CatalogOp::RegisterAdapter(RegisterAdapterLog {
                    adapter: AdapterDefinition {
                        id: adapter_id,
                        unique_name: Arc::clone(&unique),
                        adapter_name: Arc::from(adapter_name),
                        adapter_type,
                        mode,
                        settings: merged,
                    },
                })]);
                Ok((batch, adapter_id))
            })
            .await?;
        self.inner
            .read()
            .adapters
            .get_by_id(&adapter_id)
            .ok_or_else(|| CatalogError::unexpected("registered adapter not found"))
    }

    /// Removes an adapter. Refused while it still hosts placements; its
    /// physical store goes away with it.
    pub async fn drop_adapter(&self, unique_name: &str) -> Result<()> {
        self.update(|inner, _ids| {
            let adapter_def = resolve_adapter(inner, unique_name)?;
            let placements = inner.allocation.placements_on_adapter(adapter_def.id);
            if !placements.is_empty() {
                return Err(CatalogError::AdapterInUse {
                    adapter: Arc::clone(&adapter_def.unique_name),
                    placements: placements.len(),
                });
            }
            Ok(self.batch(vec![CatalogOp::DropAdapter(DropAdapterLog {
                adapter_id: adapter_def.id,
            })]))
        })
        .await
    }

    pub async fn create_user(&self, name: &str, password: &str) -> Result<Arc<UserDefinition>> {
        validate_object_name(name, "user")?;
        let normalized: Arc<str> = Arc::from(name.to_lowercase());
        let user_id = self
            .update_returning(|inner, ids| {
                if inner.users.contains_name(&normalized) {
                    return Err(CatalogError::UserAlreadyExists {
                        name: Arc::clone(&normalized),
                    });
                }
                let user_id = ids.next_user_id();
                let batch = self.batch(vec![CatalogOp::CreateUser(CreateUserLog {
                    user: UserDefinition {
                        id: user_id,
                        name: Arc::clone(&normalized),
                        password: Arc::from(password),
                    },
                })]);
                Ok((batch, user_id))
            })
            .await?;
        self.inner
            .read()
            .users
            .get_by_id(&user_id)
            .ok_or_else(|| CatalogError::unexpected("created user not found"))
    }

    pub async fn drop_user(&self, name: &str) -> Result<()> {
        self.update(|inner, _ids| {
            let user = inner
                .users
                .get_by_name(&name.to_lowercase())
                .ok_or_else(|| CatalogError::NotFound {
                    kind: "user",
                    name: Arc::from(name),
                })?;
            Ok(self.batch(vec![CatalogOp::DropUser(DropUserLog {
                user_id: user.id,
            })]))
        })
        .await
    }

    pub async fn register_query_interface(
        &self,
        name: &str,
        interface_type: &str,
        settings: &[(&str, &str)],
    ) -> Result<Arc<QueryInterfaceDefinition>> {
        validate_object_name(name, "query interface")?;
        let normalized: Arc<str> = Arc::from(name.to_lowercase());
        let interface_id = self
            .update_returning(|inner, ids| {
                if inner.interfaces.contains_name(&normalized) {
                    return Err(CatalogError::InterfaceAlreadyExists {
                        name: Arc::clone(&normalized),
                    });
                }
                let mut collected = SerdeVecMap::new();
                for (key, value) in settings {
                    collected.insert(Arc::from(*key), Arc::from(*value));
                }
                let interface_id = ids.next_interface_id();
                let batch = self.batch(vec![CatalogOp::RegisterInterface(RegisterInterfaceLog {
                    interface: QueryInterfaceDefinition {
                        id: interface_id,
                        name: Arc::clone(&normalized),
                        interface_type: Arc::from(interface_type),
                        settings: collected,
                    },
                })]);
                Ok((batch, interface_id))
            })
            .await?;
        self.inner
            .read()
            .interfaces
            .get_by_id(&interface_id)
            .ok_or_else(|| CatalogError::unexpected("registered interface not found"))
    }

    pub async fn drop_query_interface(&self, name: &str) -> Result<()> {
        self.update(|inner, _ids| {
            let interface = inner
                .interfaces
                .get_by_name(&name.to_lowercase())
                .ok_or_else(|| CatalogError::NotFound {
                    kind: "query interface",
                    name: Arc::from(name),
                })?;
            Ok(self.batch(vec![CatalogOp::DropInterface(DropInterfaceLog {
                interface_id: interface.id,
            })]))
        })
        .await
    }

    /// Registers the physical table an adapter created for one allocation,
    /// replacing any previous physical entity of that allocation. Columns
    /// follow the allocation's column placements in adapter-local order;
    /// `column_names` supplies the name the adapter gave each of them.
    ///
    /// Physical registrations are not persisted. Adapters re-register their
    /// physical entities when the catalog is reloaded.
    pub async fn register_physical_table(
        &self,
        adapter: &str,
        allocation_id: AllocationId,
        name: &str,
        column_names: &[&str],
    ) -> Result<Arc<PhysicalTable>> {
        validate_object_name(name, "physical table")?;
        let (adapter_id, physical_id) = self
            .update_returning(|inner, ids| {
                let (adapter_def, allocation) = resolve_allocation(inner, adapter, allocation_id)?;
                let table = inner.table(allocation.logical_id).ok_or_else(|| {
                    CatalogError::unexpected("allocation references a missing table")
                })?;
                let namespace_name = resolve_namespace_name(inner, table.namespace_id)?;
                let carried = inner.allocation.columns_on_placement(allocation.placement_id);
                if carried.len() != column_names.len() {
                    return Err(CatalogError::InvalidColumns {
                        table: Arc::clone(&table.name),
                        context: format!(
                            "the placement carries {} columns, {} names given",
                            carried.len(),
                            column_names.len()
                        ),
                    });
                }
                let mut columns = Vec::with_capacity(carried.len());
                for (allocated, physical_name) in carried.iter().zip(column_names) {
                    let logical_column =
                        table.column_by_id(allocated.column_id).ok_or_else(|| {
                            CatalogError::unexpected("allocation column is absent from the table")
                        })?;
                    columns.push(PhysicalColumn {
                        column_id: allocated.column_id,
                        name: Arc::from(*physical_name),
                        position: allocated.position,
                        poly_type: logical_column.poly_type,
                        nullable: logical_column.nullable,
                    });
                }
                let physical_id = ids.next_physical_id();
                let batch = self.batch(vec![CatalogOp::RegisterPhysicalTable(
                    RegisterPhysicalTableLog {
                        table: PhysicalTable {
                            id: physical_id,
                            logical_id: allocation.logical_id,
                            allocation_id,
                            adapter_id: adapter_def.id,
                            namespace_name,
                            name: Arc::from(name),
                            columns,
                        },
                    },
                )]);
                Ok((batch, (adapter_def.id, physical_id)))
            })
            .await?;
        let inner = self.inner.read();
        inner
            .physical
            .physical(adapter_id, physical_id)
            .and_then(PhysicalEntity::as_table)
            .map(Arc::clone)
            .ok_or_else(|| CatalogError::unexpected("registered physical table not found"))
    }

    /// Registers the physical collection an adapter created for one
    /// allocation. `fields` lists the adapter-side field names in storage
    /// order.
    pub async fn register_physical_collection(
        &self,
        adapter: &str,
        allocation_id: AllocationId,
        name: &str,
        fields: &[&str],
    ) -> Result<Arc<PhysicalCollection>> {
        validate_object_name(name, "physical collection")?;
        let (adapter_id, physical_id) = self
            .update_returning(|inner, ids| {
                let (adapter_def, allocation) = resolve_allocation(inner, adapter, allocation_id)?;
                let Some(LogicalEntity::Collection(collection)) =
                    inner.logical_entity(allocation.logical_id)
                else {
                    return Err(CatalogError::IdNotFound {
                        kind: "collection",
                        id: allocation.logical_id.get(),
                    });
                };
                let namespace_name = resolve_namespace_name(inner, collection.namespace_id)?;
                let physical_id = ids.next_physical_id();
                let batch = self.batch(vec![CatalogOp::RegisterPhysicalCollection(
                    RegisterPhysicalCollectionLog {
                        collection: PhysicalCollection {
                            id: physical_id,
                            logical_id: allocation.logical_id,
                            allocation_id,
                            adapter_id: adapter_def.id,
                            namespace_name,
                            name: Arc::from(name),
                            fields: physical_fields(fields),
                        },
                    },
                )]);
                Ok((batch, (adapter_def.id, physical_id)))
            })
            .await?;
        let inner = self.inner.read();
        match inner.physical.physical(adapter_id, physical_id) {
            Some(PhysicalEntity::Collection(collection)) => Ok(Arc::clone(collection)),
            _ => Err(CatalogError::unexpected(
                "registered physical collection not found",
            )),
        }
    }

    /// Registers the physical graph an adapter created for one allocation.
    pub async fn register_physical_graph(
        &self,
        adapter: &str,
        allocation_id: AllocationId,
        name: &str,
        fields: &[&str],
    ) -> Result<Arc<PhysicalGraph>> {
        validate_object_name(name, "physical graph")?;
        let (adapter_id, physical_id) = self
            .update_returning(|inner, ids| {
                let (adapter_def, allocation) = resolve_allocation(inner, adapter, allocation_id)?;
                let Some(LogicalEntity::Graph(graph)) =
                    inner.logical_entity(allocation.logical_id)
                else {
                    return Err(CatalogError::IdNotFound {
                        kind: "graph",
                        id: allocation.logical_id.get(),
                    });
                };
                let namespace_name = resolve_namespace_name(inner, graph.namespace_id)?;
                let physical_id = ids.next_physical_id();
                let batch = self.batch(vec![CatalogOp::RegisterPhysicalGraph(
                    RegisterPhysicalGraphLog {
                        graph: PhysicalGraph {
                            id: physical_id,
                            logical_id: allocation.logical_id,
                            allocation_id,
                            adapter_id: adapter_def.id,
                            namespace_name,
                            name: Arc::from(name),
                            fields: physical_fields(fields),
                        },
                    },
                )]);
                Ok((batch, (adapter_def.id, physical_id)))
            })
            .await?;
        let inner = self.inner.read();
        match inner.physical.physical(adapter_id, physical_id) {
            Some(PhysicalEntity::Graph(graph)) => Ok(Arc::clone(graph)),
            _ => Err(CatalogError::unexpected(
                "registered physical graph not found",
            )),
        }
    }

    /// Adds a column to a registered physical table, at `position` or at the
    /// end. Type and nullability come from the logical column.
    pub async fn add_physical_column(
        &self,
        adapter: &str,
        physical_id: PhysicalId,
        column_id: FieldId,
        name: &str,
        position: Option<u64>,
    ) -> Result<Arc<PhysicalTable>> {
        validate_object_name(name, "physical column")?;
        let adapter_id = self
            .update_returning(|inner, _ids| {
                let (adapter_def, physical) = resolve_physical_table(inner, adapter, physical_id)?;
                if physical.column(column_id).is_some() {
                    return Err(CatalogError::AlreadyExists {
                        kind: "physical column",
                        namespace: Arc::clone(&physical.name),
                        name: Arc::from(name),
                    });
                }
                let table = inner.table(physical.logical_id).ok_or_else(|| {
                    CatalogError::unexpected("physical table references a missing table")
                })?;
                let logical_column =
                    table
                        .column_by_id(column_id)
                        .ok_or(CatalogError::IdNotFound {
                            kind: "column",
                            id: column_id.get(),
                        })?;
                let position = position.unwrap_or_else(|| {
                    physical
                        .columns
                        .iter()
                        .map(|c| c.position + 1)
                        .max()
                        .unwrap_or(0)
                });
                let batch = self.batch(vec![CatalogOp::AddPhysicalColumn(AddPhysicalColumnLog {
                    adapter_id: adapter_def.id,
                    physical_id,
                    column: PhysicalColumn {
                        column_id,
                        name: Arc::from(name),
                        position,
                        poly_type: logical_column.poly_type,
                        nullable: logical_column.nullable,
                    },
                })]);
                Ok((batch, adapter_def.id))
            })
            .await?;
        let inner = self.inner.read();
        inner
            .physical
            .physical(adapter_id, physical_id)
            .and_then(PhysicalEntity::as_table)
            .map(Arc::clone)
            .ok_or_else(|| CatalogError::unexpected("altered physical table not found"))
    }

    /// Replaces the stored type of one physical column. The physical entity
    /// is replaced wholesale; readers holding the previous one keep a
    /// consistent view.
    pub async fn update_physical_column_type(
        &self,
        adapter: &str,
        physical_id: PhysicalId,
        column_id: FieldId,
        poly_type: PolyType,
    ) -> Result<Arc<PhysicalTable>> {
        let adapter_id = self
            .update_returning(|inner, _ids| {
                let (adapter_def, physical) = resolve_physical_table(inner, adapter, physical_id)?;
                if physical.column(column_id).is_none() {
                    return Err(CatalogError::IdNotFound {
                        kind: "physical column",
                        id: column_id.get(),
                    });
                }
                let batch = self.batch(vec![CatalogOp::UpdatePhysicalColumnType(
                    UpdatePhysicalColumnTypeLog {
                        adapter_id: adapter_def.id,
                        physical_id,
                        column_id,
                        poly_type,
                    },
                )]);
                Ok((batch, adapter_def.id))
            })
            .await?;
        let inner = self.inner.read();
        inner
            .physical
            .physical(adapter_id, physical_id)
            .and_then(PhysicalEntity::as_table)
            .map(Arc::clone)
            .ok_or_else(|| CatalogError::unexpected("altered physical table not found"))
    }

    /// Drops a column from a registered physical table.
    pub async fn drop_physical_column(
        &self,
        adapter: &str,
        physical_id: PhysicalId,
        column_id: FieldId,
    ) -> Result<()> {
        self.update(|inner, _ids| {
            let (adapter_def, physical) = resolve_physical_table(inner, adapter, physical_id)?;
            if physical.column(column_id).is_none() {
                return Err(CatalogError::IdNotFound {
                    kind: "physical column",
                    id: column_id.get(),
                });
            }
            Ok(self.batch(vec![CatalogOp::DropPhysicalColumn(DropPhysicalColumnLog {
                adapter_id: adapter_def.id,
                physical_id,
                column_id,
            })]))
        })
        .await
    }

    /// Removes a physical entity from an adapter's store, typically after
    /// the adapter dropped the backing structure.
    pub async fn drop_physical_entity(
        &self,
        adapter: &str,
        physical_id: PhysicalId,
    ) -> Result<()> {
        self.update(|inner, _ids| {
            let adapter_def = resolve_adapter(inner, adapter)?;
            if inner.physical.physical(adapter_def.id, physical_id).is_none() {
                return Err(CatalogError::IdNotFound {
                    kind: "physical entity",
                    id: physical_id.get(),
                });
            }
            Ok(self.batch(vec![CatalogOp::DropPhysicalEntity(DropPhysicalEntityLog {
                adapter_id: adapter_def.id,
                physical_id,
            })]))
        })
        .await
    }

    fn batch(&self, ops: Vec<CatalogOp>) -> CatalogBatch {
        CatalogBatch::new(self.time_provider.now().timestamp_nanos(), ops)
    }

    /// Builds a batch against the observed state and commits it, retrying
    /// when another writer advances the catalog in between. The builder's
    /// second return value is handed back from the winning attempt.
    pub(crate) async fn update_returning<T, F>(&self, build: F) -> Result<T>
    where
        F: Fn(&InnerCatalog, &IdAllocator) -> Result<(CatalogBatch, T)>,
    {
        loop {
            let (ordered, value) = {
                let inner = self.inner.read();
                let (batch, value) = build(&inner, &self.ids)?;
                (
                    OrderedCatalogBatch::new(batch, inner.sequence_number().next()),
                    value,
                )
            };
            match self.commit(ordered).await? {
                Prompt::Success(update) => {
                    self.broadcast_update(update).await;
                    return Ok(value);
                }
                Prompt::Retry(()) => continue,
            }
        }
    }

    pub(crate) async fn update<F>(&self, build: F) -> Result<()>
    where
        F: Fn(&InnerCatalog, &IdAllocator) -> Result<CatalogBatch>,
    {
        self.update_returning(|inner, ids| build(inner, ids).map(|batch| (batch, ())))
            .await
    }

    /// Verify-persist-apply under the write permit. A batch built against a
    /// state the catalog has moved past is bounced back for a rebuild; a
    /// sequence collision in the store means an external writer got there
    /// first, its batch is absorbed before the rebuild.
    async fn commit(&self, ordered: OrderedCatalogBatch) -> Result<Prompt<Arc<CatalogUpdate>>> {
        let _permit = self.write_permit.lock().await;
        let next = {
            let inner = self.inner.read();
            if ordered.sequence_number() != inner.sequence_number().next() {
                debug!(
                    attempted = ordered.sequence_number().get(),
                    current = inner.sequence_number().get(),
                    "catalog advanced during batch construction, retrying"
                );
                return Ok(Prompt::Retry(()));
            }
            let mut next = inner.clone();
            next.apply_batch(ordered.batch())?;
            next.sequence = ordered.sequence_number();
            next.check_integrity()?;
            next
        };
        let durable = OrderedCatalogBatch::new(
            ordered.batch().durable_only(),
            ordered.sequence_number(),
        );
        match self.store.persist_log(&durable).await? {
            PersistCatalogResult::Success => {}
            PersistCatalogResult::AlreadyExists => {
                if let Some(external) = self.store.load_log(ordered.sequence_number()).await? {
                    debug!(
                        sequence = external.sequence_number().get(),
                        "absorbing batch committed by an external writer"
                    );
                    external.batch().observe_ids(&self.ids);
                    self.absorb_external(external)?;
                }
                return Ok(Prompt::Retry(()));
            }
        }
        self.publish(next);
        let sequence = ordered.sequence_number();
        if sequence.get() % self.store.checkpoint_interval() == 0 {
            let checkpoint = {
                let inner = self.inner.read();
                CatalogCheckpoint::from_inner(&inner, self.ids.state())
            };
            if let Err(error) = self.store.persist_checkpoint(&checkpoint).await {
                warn!(
                    %error,
                    sequence = sequence.get(),
                    "failed to persist catalog checkpoint"
                );
            }
        }
        Ok(Prompt::Success(Arc::new(CatalogUpdate::new(ordered))))
    }

    /// Replaces the inner state and the published snapshot in one step.
    /// Callers hold the write permit.
    fn publish(&self, next: InnerCatalog) {
        let snapshot = Arc::new(Snapshot::from_inner(&next));
        *self.inner.write() = next;
        *self.published.write() = snapshot;
    }

    fn absorb_external(&self, ordered: OrderedCatalogBatch) -> Result<()> {
        let mut next = self.inner.read().clone();
        next.apply_batch(ordered.batch())?;
        next.sequence = ordered.sequence_number();
        next.check_integrity()?;
        self.publish(next);
        Ok(())
    }
}

fn validate_object_name(name: &str, kind: &'static str) -> Result<()> {
    let _ = kind;
    if name.trim().is_empty() {
        return Err(CatalogError::InvalidName {
            name: Arc::from(name),
            context: "must not be empty",
        });
    }
    if name.contains('\0') {
        return Err(CatalogError::InvalidName {
            name: Arc::from(name),
            context: "must not contain NUL",
        });
    }
    Ok(())
}

fn resolve_namespace(inner: &InnerCatalog, name: &str) -> Result<Arc<NamespaceSchema>> {
    inner
        .namespace_by_name(name)
        .ok_or_else(|| CatalogError::NotFound {
            kind: "namespace",
            name: Arc::from(name.to_lowercase()),
        })
}

fn resolve_model(
    inner: &InnerCatalog,
    name: &str,
    expected: DataModel,
) -> Result<Arc<NamespaceSchema>> {
    let schema = resolve_namespace(inner, name)?;
    if schema.data_model != expected {
        return Err(CatalogError::WrongDataModel {
            namespace: Arc::clone(&schema.name),
            expected,
        });
    }
    Ok(schema)
}

fn resolve_entity(schema: &NamespaceSchema, name: &str) -> Result<LogicalEntity> {
    schema
        .entity_by_name(name)
        .ok_or_else(|| CatalogError::NotFound {
            kind: "entity",
            name: schema.normalize(name),
        })
}

fn resolve_table(
    inner: &InnerCatalog,
    namespace: &str,
    table: &str,
) -> Result<(Arc<NamespaceSchema>, Arc<TableDefinition>)> {
    let schema = resolve_namespace(inner, namespace)?;
    let table_def = schema
        .table_by_name(table)
        .ok_or_else(|| CatalogError::NotFound {
            kind: "table",
            name: schema.normalize(table),
        })?;
    Ok((schema, table_def))
}

fn resolve_column(
    schema: &NamespaceSchema,
    table: &TableDefinition,
    column: &str,
) -> Result<Arc<ColumnDefinition>> {
    table
        .column_by_name(&schema.normalize(column))
        .ok_or_else(|| CatalogError::NotFound {
            kind: "column",
            name: schema.normalize(column),
        })
}

fn resolve_adapter(inner: &InnerCatalog, name: &str) -> Result<Arc<AdapterDefinition>> {
    inner
        .adapters
        .get_by_name(&name.to_lowercase())
        .ok_or_else(|| CatalogError::NotFound {
            kind: "adapter",
            name: Arc::from(name.to_lowercase()),
        })
}

fn resolve_placement(
    inner: &InnerCatalog,
    namespace: &str,
    entity: &str,
    adapter: &str,
) -> Result<(
    Arc<NamespaceSchema>,
    LogicalEntity,
    Arc<AdapterDefinition>,
    Arc<PlacementDefinition>,
)> {
    let schema = resolve_namespace(inner, namespace)?;
    let logical = resolve_entity(&schema, entity)?;
    let adapter_def = resolve_adapter(inner, adapter)?;
    let placement = inner
        .allocation
        .placement_for(logical.id(), adapter_def.id)
        .ok_or_else(|| CatalogError::NotFound {
            kind: "placement",
            name: Arc::from(format!("{entity}@{adapter}")),
        })?;
    Ok((schema, logical, adapter_def, placement))
}

fn resolve_allocation(
    inner: &InnerCatalog,
    adapter: &str,
    allocation_id: AllocationId,
) -> Result<(Arc<AdapterDefinition>, Arc<AllocationPartition>)> {
    let adapter_def = resolve_adapter(inner, adapter)?;
    let allocation = inner
        .allocation
        .allocation(allocation_id)
        .filter(|a| a.adapter_id == adapter_def.id)
        .ok_or(CatalogError::IdNotFound {
            kind: "allocation",
            id: allocation_id.get(),
        })?;
    Ok((adapter_def, allocation))
}

fn resolve_physical_table(
    inner: &InnerCatalog,
    adapter: &str,
    physical_id: PhysicalId,
) -> Result<(Arc<AdapterDefinition>, Arc<PhysicalTable>)> {
    let adapter_def = resolve_adapter(inner, adapter)?;
    let table = inner
        .physical
        .physical(adapter_def.id, physical_id)
        .and_then(PhysicalEntity::as_table)
        .map(Arc::clone)
        .ok_or(CatalogError::IdNotFound {
            kind: "physical table",
            id: physical_id.get(),
        })?;
    Ok((adapter_def, table))
}

fn resolve_namespace_name(
    inner: &InnerCatalog,
    namespace_id: stratadb_id::NamespaceId,
) -> Result<Arc<str>> {
    inner
        .namespace_by_id(namespace_id)
        .map(|schema| Arc::clone(&schema.name))
        .ok_or_else(|| CatalogError::unexpected("entity references a missing namespace"))
}

fn resolve_distribution<'a>(
    inner: &'a InnerCatalog,
    table: &TableDefinition,
) -> Result<&'a PartitionDistribution> {
    inner
        .allocation
        .distribution(table.id)
        .ok_or_else(|| CatalogError::unexpected("entity has no partition distribution"))
}

fn resolve_underlying(inner: &InnerCatalog, underlying: &[EntityId]) -> Result<Vec<EntityId>> {
    for id in underlying {
        if inner.table(*id).is_none() {
            return Err(CatalogError::IdNotFound {
                kind: "table",
                id: id.get(),
            });
        }
    }
    Ok(underlying.to_vec())
}

fn placed_table(logical: &LogicalEntity) -> Result<&Arc<TableDefinition>> {
    logical.as_table().ok_or_else(|| CatalogError::InvalidColumns {
        table: logical.name(),
        context: "only tables carry column placements".to_string(),
    })
}

fn check_entity_creatable(
    inner: &InnerCatalog,
    schema: &NamespaceSchema,
    name: &str,
    kind: &'static str,
    limits: CatalogLimits,
) -> Result<()> {
    if inner.entity_count() >= limits.num_entities {
        return Err(CatalogError::TooManyEntities {
            limit: limits.num_entities,
        });
    }
    if schema.contains_entity_name(name) {
        return Err(CatalogError::AlreadyExists {
            kind,
            namespace: Arc::clone(&schema.name),
            name: schema.normalize(name),
        });
    }
    Ok(())
}

fn check_groups_mutable(inner: &InnerCatalog, table: &TableDefinition) -> Result<()> {
    let strategy = inner.allocation.strategy_of(table.id);
    if !matches!(strategy, PartitionStrategy::List | PartitionStrategy::Range) {
        return Err(CatalogError::InvalidPartitioning {
            entity: Arc::clone(&table.name),
            context: format!(
                "partition groups can only be changed under list or range partitioning, not {strategy}"
            ),
        });
    }
    Ok(())
}

fn check_position_free(
    inner: &InnerCatalog,
    table: &TableDefinition,
    placement_id: PlacementId,
    column_id: FieldId,
    position: u64,
) -> Result<()> {
    let taken = inner
        .allocation
        .columns_on_placement(placement_id)
        .iter()
        .any(|c| c.position == position && c.column_id != column_id);
    if taken {
        return Err(CatalogError::InvalidColumns {
            table: Arc::clone(&table.name),
            context: format!("position {position} is already taken on this placement"),
        });
    }
    Ok(())
}

fn build_columns(
    schema: &NamespaceSchema,
    table: &Arc<str>,
    specs: &[ColumnSpec],
    ids: &IdAllocator,
    limits: CatalogLimits,
) -> Result<Vec<ColumnDefinition>> {
    if specs.is_empty() {
        return Err(CatalogError::InvalidColumns {
            table: Arc::clone(table),
            context: "a table needs at least one column".to_string(),
        });
    }
    if specs.len() > limits.num_columns_per_table {
        return Err(CatalogError::TooManyColumns {
            table: Arc::clone(table),
            limit: limits.num_columns_per_table,
        });
    }
    let mut columns: Vec<ColumnDefinition> = Vec::with_capacity(specs.len());
    for (position, spec) in specs.iter().enumerate() {
        validate_object_name(&spec.name, "column")?;
        let name = schema.normalize(&spec.name);
        if columns.iter().any(|c| c.name == name) {
            return Err(CatalogError::InvalidColumns {
                table: Arc::clone(table),
                context: format!("column '{name}' listed twice"),
            });
        }
        columns.push(ColumnDefinition {
            id: ids.next_field_id(),
            name,
            position: position as u64,
            poly_type: spec.poly_type,
            collection_type: spec.collection_type,
            length: spec.length,
            scale: spec.scale,
            dimension: spec.dimension,
            cardinality: spec.cardinality,
            nullable: spec.nullable,
            default: spec.default.clone(),
        });
    }
    Ok(columns)
}

fn build_primary_key(
    schema: &NamespaceSchema,
    table: &Arc<str>,
    columns: &mut [ColumnDefinition],
    primary_key: &[&str],
    ids: &IdAllocator,
) -> Result<Vec<ConstraintDefinition>> {
    if primary_key.is_empty() {
        return Ok(Vec::new());
    }
    let mut column_ids = Vec::with_capacity(primary_key.len());
    for name in primary_key {
        let name = schema.normalize(name);
        let column = columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| CatalogError::InvalidConstraint {
                table: Arc::clone(table),
                context: format!("primary key references unknown column '{name}'"),
            })?;
        if column_ids.contains(&column.id) {
            return Err(CatalogError::InvalidConstraint {
                table: Arc::clone(table),
                context: format!("primary key lists column '{name}' twice"),
            });
        }
        column.nullable = false;
        column_ids.push(column.id);
    }
    Ok(vec![ConstraintDefinition {
        id: ids.next_constraint_id(),
        name: Arc::from(format!("pk_{table}")),
        constraint_type: ConstraintType::PrimaryKey,
        column_ids,
    }])
}

fn carried_columns(
    schema: &NamespaceSchema,
    table: &TableDefinition,
    columns: Option<&[&str]>,
) -> Result<Vec<Arc<ColumnDefinition>>> {
    let Some(names) = columns else {
        return Ok(table.columns_in_position_order());
    };
    let mut carried: Vec<Arc<ColumnDefinition>> = Vec::with_capacity(names.len());
    for name in names {
        let column = resolve_column(schema, table, name)?;
        if carried.iter().any(|c| c.id == column.id) {
            return Err(CatalogError::InvalidColumns {
                table: Arc::clone(&table.name),
                context: format!("column '{}' listed twice", column.name),
            });
        }
        carried.push(column);
    }
    if let Some(pk) = table.primary_key() {
        for column_id in &pk.column_ids {
            if !carried.iter().any(|c| c.id == *column_id) {
                let name = table
                    .column_by_id(*column_id)
                    .map(|c| c.name.to_string())
                    .unwrap_or_default();
                return Err(CatalogError::InvalidColumns {
                    table: Arc::clone(&table.name),
                    context: format!("a placement must carry primary key column '{name}'"),
                });
            }
        }
    }
    Ok(carried)
}

fn entity_column_ids(logical: &LogicalEntity) -> Vec<FieldId> {
    logical
        .as_table()
        .map(|t| t.columns.ids().copied().collect())
        .unwrap_or_default()
}

fn next_allocation_position(inner: &InnerCatalog, placement_id: PlacementId) -> u64 {
    inner
        .allocation
        .columns_on_placement(placement_id)
        .last()
        .map(|c| c.position + 1)
        .unwrap_or(0)
}

/// Ops giving a fresh entity its unpartitioned default distribution.
fn default_distribution_ops(ids: &IdAllocator, logical_id: EntityId) -> Vec<CatalogOp> {
    let group_id = ids.next_partition_group_id();
    let partition_id = ids.next_partition_id();
    let name: Arc<str> = Arc::from(DEFAULT_PARTITION_NAME);
    vec![
        CatalogOp::CreatePartitionGroup(CreatePartitionGroupLog {
            group: PartitionGroupDefinition {
                id: group_id,
                logical_id,
                name: Arc::clone(&name),
                qualifiers: Vec::new(),
            },
        }),
        CatalogOp::CreatePartition(CreatePartitionLog {
            partition: PartitionDefinition {
                id: partition_id,
                group_id,
                logical_id,
                name,
                qualifiers: Vec::new(),
                is_unbound: false,
            },
        }),
        CatalogOp::SetPartitionDistribution(SetPartitionDistributionLog {
            distribution: PartitionDistribution {
                logical_id,
                property: None,
                group_ids: vec![group_id],
                partition_ids: vec![partition_id],
            },
        }),
    ]
}

/// Ops dropping a placement with everything allocated under it, physical
/// entities first.
fn placement_cascade_ops(inner: &InnerCatalog, placement: &PlacementDefinition) -> Vec<CatalogOp> {
    let mut ops = Vec::new();
    for allocation in inner.allocation.allocations_on_placement(placement.id) {
        for physical in inner
            .physical
            .from_allocation(placement.adapter_id, allocation.id)
        {
            ops.push(CatalogOp::DropPhysicalEntity(DropPhysicalEntityLog {
                adapter_id: placement.adapter_id,
                physical_id: physical.id(),
            }));
        }
        ops.push(CatalogOp::DropPartitionPlacement(
            DropPartitionPlacementLog {
                allocation_id: allocation.id,
            },
        ));
    }
    for column in inner.allocation.columns_on_placement(placement.id) {
        ops.push(CatalogOp::DropAllocationColumn(DropAllocationColumnLog {
            placement_id: placement.id,
            column_id: column.column_id,
        }));
    }
    ops.push(CatalogOp::DropPlacement(DropPlacementLog {
        placement_id: placement.id,
    }));
    ops
}

/// Ops placing a newly created partition on every placement of the entity,
/// inheriting each placement's type and role.
fn spread_partition_ops(
    inner: &InnerCatalog,
    ids: &IdAllocator,
    logical_id: EntityId,
    partition_id: PartitionId,
) -> Vec<CatalogOp> {
    let mut ops = Vec::new();
    for placement in inner.allocation.placements_for_entity(logical_id) {
        let (placement_type, role) = inherited_placement_kind(inner, placement.id);
        ops.push(CatalogOp::CreatePartitionPlacement(
            CreatePartitionPlacementLog {
                allocation: AllocationPartition {
                    id: ids.next_allocation_id(),
                    placement_id: placement.id,
                    partition_id,
                    logical_id,
                    adapter_id: placement.adapter_id,
                    placement_type,
                    role,
                },
            },
        ));
    }
    ops
}

/// Ops moving every placement of the entity onto `new_partitions`: new
/// allocations first, then the old ones and their physical entities go.
fn move_placements_ops(
    inner: &InnerCatalog,
    ids: &IdAllocator,
    logical_id: EntityId,
    new_partitions: &[PartitionId],
) -> Vec<CatalogOp> {
    let mut ops = Vec::new();
    for placement in inner.allocation.placements_for_entity(logical_id) {
        let (placement_type, role) = inherited_placement_kind(inner, placement.id);
        for partition_id in new_partitions {
            ops.push(CatalogOp::CreatePartitionPlacement(
                CreatePartitionPlacementLog {
                    allocation: AllocationPartition {
                        id: ids.next_allocation_id(),
                        placement_id: placement.id,
                        partition_id: *partition_id,
                        logical_id,
                        adapter_id: placement.adapter_id,
                        placement_type,
                        role,
                    },
                },
            ));
        }
        for allocation in inner.allocation.allocations_on_placement(placement.id) {
            for physical in inner
                .physical
                .from_allocation(placement.adapter_id, allocation.id)
            {
                ops.push(CatalogOp::DropPhysicalEntity(DropPhysicalEntityLog {
                    adapter_id: placement.adapter_id,
                    physical_id: physical.id(),
                }));
            }
            ops.push(CatalogOp::DropPartitionPlacement(
                DropPartitionPlacementLog {
                    allocation_id: allocation.id,
                },
            ));
        }
    }
    ops
}

/// Placement type and role a new allocation on a placement inherits from the
/// allocations already there.
fn inherited_placement_kind(
    inner: &InnerCatalog,
    placement_id: PlacementId,
) -> (PlacementType, DataPlacementRole) {
    let allocations = inner.allocation.allocations_on_placement(placement_id);
    let placement_type = if allocations
        .iter()
        .any(|a| a.placement_type == PlacementType::Manual)
    {
        PlacementType::Manual
    } else {
        PlacementType::Automatic
    };
    let role = if allocations.is_empty()
        || allocations
            .iter()
            .any(|a| a.role == DataPlacementRole::UpToDate)
    {
        DataPlacementRole::UpToDate
    } else {
        DataPlacementRole::Refreshable
    };
    (placement_type, role)
}

fn validate_partition_property(
    table: &TableDefinition,
    property: &PartitionProperty,
) -> Result<()> {
    if table.column_by_id(property.column_id()).is_none() {
        return Err(CatalogError::IdNotFound {
            kind: "column",
            id: property.column_id().get(),
        });
    }
    let context = match property {
        PartitionProperty::Hash { partitions, .. } if *partitions < 2 => {
            Some("hash partitioning needs at least two partitions".to_string())
        }
        PartitionProperty::Range { boundaries, .. } if boundaries.is_empty() => {
            Some("range partitioning needs at least one boundary".to_string())
        }
        PartitionProperty::List { values, .. } => {
            if values.is_empty() {
                Some("list partitioning needs at least one value".to_string())
            } else {
                let mut seen = HashSet::new();
                values
                    .iter()
                    .find(|v| !seen.insert(Arc::clone(*v)))
                    .map(|v| format!("value '{v}' listed twice"))
            }
        }
        PartitionProperty::Temperature {
            internal_partitions,
            hot_access_in,
            hot_access_out,
            ..
        } => {
            if *internal_partitions == 0 {
                Some("temperature partitioning needs at least one internal partition per tier"
                    .to_string())
            } else if *hot_access_in > 100 {
                Some(format!("the hot threshold ({hot_access_in}%) exceeds 100%"))
            } else if hot_access_in <= hot_access_out {
                Some(format!(
                    "the hot threshold ({hot_access_in}%) must exceed the cool-down threshold ({hot_access_out}%)"
                ))
            } else {
                None
            }
        }
        _ => None,
    };
    match context {
        Some(context) => Err(CatalogError::InvalidPartitioning {
            entity: Arc::clone(&table.name),
            context,
        }),
        None => Ok(()),
    }
}

/// Derives the partition group and partition layout for a partitioning
/// request.
fn partition_layout(
    ids: &IdAllocator,
    table: &TableDefinition,
    property: &PartitionProperty,
) -> (Vec<PartitionGroupDefinition>, Vec<PartitionDefinition>) {
    type Member = (Arc<str>, Vec<Arc<str>>, bool);
    let layout: Vec<(Arc<str>, Vec<Arc<str>>, Vec<Member>)> = match property {
        PartitionProperty::Hash { partitions, .. } => (0..*partitions)
            .map(|i| {
                let name: Arc<str> = Arc::from(format!("hash_{i}"));
                (Arc::clone(&name), Vec::new(), vec![(name, Vec::new(), false)])
            })
            .collect(),
        PartitionProperty::Range { boundaries, .. } => {
            // k boundaries produce k + 1 partitions; each inner group carries
            // its lower and upper bound as qualifiers.
            let mut layout = Vec::with_capacity(boundaries.len() + 1);
            for i in 0..=boundaries.len() {
                let name: Arc<str> = Arc::from(format!("range_{i}"));
                let mut qualifiers = Vec::new();
                if i > 0 {
                    qualifiers.push(Arc::clone(&boundaries[i - 1]));
                }
                if i < boundaries.len() {
                    qualifiers.push(Arc::clone(&boundaries[i]));
                }
                layout.push((
                    Arc::clone(&name),
                    qualifiers.clone(),
                    vec![(name, qualifiers, false)],
                ));
            }
            layout
        }
        PartitionProperty::List { values, .. } => {
            let mut layout: Vec<_> = values
                .iter()
                .map(|value| {
                    (
                        Arc::clone(value),
                        vec![Arc::clone(value)],
                        vec![(Arc::clone(value), vec![Arc::clone(value)], false)],
                    )
                })
                .collect();
            let unbound: Arc<str> = Arc::from("unbound");
            layout.push((Arc::clone(&unbound), Vec::new(), vec![(unbound, Vec::new(), true)]));
            layout
        }
        PartitionProperty::Temperature {
            internal_partitions,
            ..
        } => ["hot", "cold"]
            .iter()
            .map(|tier| {
                let members = (0..*internal_partitions)
                    .map(|i| (Arc::from(format!("{tier}_{i}")) as Arc<str>, Vec::new(), false))
                    .collect();
                (Arc::from(*tier) as Arc<str>, Vec::new(), members)
            })
            .collect(),
    };
    let mut groups = Vec::with_capacity(layout.len());
    let mut partitions = Vec::new();
    for (group_name, group_qualifiers, members) in layout {
        let group_id = ids.next_partition_group_id();
        groups.push(PartitionGroupDefinition {
            id: group_id,
            logical_id: table.id,
            name: group_name,
            qualifiers: group_qualifiers,
        });
        for (partition_name, qualifiers, is_unbound) in members {
            partitions.push(PartitionDefinition {
                id: ids.next_partition_id(),
                group_id,
                logical_id: table.id,
                name: partition_name,
                qualifiers,
                is_unbound,
            });
        }
    }
    (groups, partitions)
}

fn physical_fields(fields: &[&str]) -> Vec<PhysicalField> {
    fields
        .iter()
        .enumerate()
        .map(|(position, name)| PhysicalField {
            name: Arc::from(*name),
            position: position as u64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogArgs;
    use crate::time::{SystemProvider, TimeProvider};
    use object_store::ObjectStore;
    use object_store::memory::InMemory;
    use pretty_assertions::assert_eq;

    fn emp_columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("id", PolyType::BigInt),
            ColumnSpec::new("name", PolyType::VarChar).nullable(true),
        ]
    }

    async fn relational_catalog(name: &'static str) -> Arc<Catalog> {
        let catalog = Catalog::new_in_memory(name).await.unwrap();
        catalog
            .create_namespace("public", DataModel::Relational, false)
            .await
            .unwrap();
        catalog
    }

    async fn register_store(catalog: &Catalog, name: &str) {
        catalog
            .register_adapter(name, "hsqldb", AdapterType::Store, DeployMode::Embedded, &[])
            .await
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn duplicate_and_nonempty_namespaces_are_refused() {
        let catalog = relational_catalog("namespaces").await;
        let err = catalog
            .create_namespace("PUBLIC", DataModel::Document, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NamespaceAlreadyExists { .. }));

        catalog
            .create_table("public", "emp", &emp_columns(), &["id"])
            .await
            .unwrap();
        let err = catalog.drop_namespace("public").await.unwrap_err();
        assert!(matches!(err, CatalogError::NamespaceNotEmpty { .. }));

        catalog.drop_entity("public", "emp").await.unwrap();
        catalog.drop_namespace("public").await.unwrap();
        assert!(catalog.namespace("public").is_none());
    }

    #[test_log::test(tokio::test)]
    async fn table_creation_assigns_default_partition() {
        let catalog = relational_catalog("tables").await;
        let table = catalog
            .create_table("public", "emp", &emp_columns(), &["id"])
            .await
            .unwrap();
        assert_eq!(table.columns.len(), 2);
        assert!(table.primary_key().is_some());

        let snapshot = catalog.snapshot();
        let partitions = snapshot.alloc().partitions_for_entity(table.id);
        assert_eq!(partitions.len(), 1);
        assert_eq!(
            snapshot.alloc().distribution(table.id).unwrap().strategy(),
            PartitionStrategy::None
        );
    }

    #[test_log::test(tokio::test)]
    async fn last_placement_of_an_entity_cannot_be_dropped() {
        let catalog = relational_catalog("placements").await;
        let table = catalog
            .create_table("public", "emp", &emp_columns(), &["id"])
            .await
            .unwrap();
        register_store(&catalog, "store_a").await;
        register_store(&catalog, "store_b").await;
        catalog
            .add_placement("public", "emp", "store_a", None)
            .await
            .unwrap();
        catalog
            .add_placement("public", "emp", "store_b", None)
            .await
            .unwrap();
        assert_eq!(
            catalog.snapshot().alloc().placements_for_entity(table.id).len(),
            2
        );

        catalog.drop_placement("public", "emp", "store_a").await.unwrap();
        let err = catalog
            .drop_placement("public", "emp", "store_b")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::PlacementUnderflow { .. }));

        // The final placement only goes away with the entity itself.
        catalog.drop_entity("public", "emp").await.unwrap();
        assert!(catalog.snapshot().alloc().placements_for_entity(table.id).is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn hash_partitioning_replaces_the_default_layout() {
        let catalog = relational_catalog("partitioning").await;
        let table = catalog
            .create_table("public", "emp", &emp_columns(), &["id"])
            .await
            .unwrap();
        register_store(&catalog, "store_a").await;
        catalog
            .add_placement("public", "emp", "store_a", None)
            .await
            .unwrap();
        let column_id = table.column_by_name("id").unwrap().id;

        let distribution = catalog
            .partition_table(
                "public",
                "emp",
                PartitionProperty::Hash {
                    column_id,
                    partitions: 3,
                },
            )
            .await
            .unwrap();
        assert_eq!(distribution.strategy(), PartitionStrategy::Hash);
        assert_eq!(distribution.partition_ids.len(), 3);

        // Every new partition landed on the existing placement.
        let snapshot = catalog.snapshot();
        let placement = snapshot
            .alloc()
            .placements_for_entity(table.id)
            .pop()
            .unwrap();
        assert_eq!(
            snapshot.alloc().allocations_on_placement(placement.id).len(),
            3
        );

        let err = catalog
            .partition_table(
                "public",
                "emp",
                PartitionProperty::Hash {
                    column_id,
                    partitions: 2,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPartitioning { .. }));

        catalog.merge_table("public", "emp").await.unwrap();
        let snapshot = catalog.snapshot();
        assert_eq!(
            snapshot.alloc().distribution(table.id).unwrap().strategy(),
            PartitionStrategy::None
        );
        assert_eq!(snapshot.alloc().partitions_for_entity(table.id).len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn update_driven_view_fires_after_its_interval() {
        let catalog = relational_catalog("views").await;
        let table = catalog
            .create_table("public", "emp", &emp_columns(), &["id"])
            .await
            .unwrap();
        let view = catalog
            .create_materialized_view(
                "public",
                "emp_names",
                &[ColumnSpec::new("name", PolyType::VarChar)],
                "SELECT name FROM emp",
                &[table.id],
                CriteriaType::Update { interval: 2 },
            )
            .await
            .unwrap();

        assert!(catalog.notify_modified_tables(&[table.id]).await.unwrap().is_empty());
        assert_eq!(
            catalog.notify_modified_tables(&[table.id]).await.unwrap(),
            vec![view.id]
        );
        // The counter reset with the firing notification.
        assert!(catalog.notify_modified_tables(&[table.id]).await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn restart_replays_the_log_and_preserves_ids() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let time: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());
        let first = {
            let catalog = Catalog::new("host", Arc::clone(&store), Arc::clone(&time))
                .await
                .unwrap();
            catalog
                .create_namespace("public", DataModel::Relational, false)
                .await
                .unwrap();
            catalog
                .create_table("public", "emp", &emp_columns(), &["id"])
                .await
                .unwrap()
        };

        let catalog = Catalog::new("host", store, time).await.unwrap();
        let schema = catalog.namespace("public").unwrap();
        let replayed = schema.table_by_name("emp").unwrap();
        assert_eq!(replayed.id, first.id);
        assert_eq!(replayed.columns.len(), 2);

        // Replay healed the id counters, so new entities never collide.
        let second = catalog
            .create_table("public", "dept", &emp_columns(), &["id"])
            .await
            .unwrap();
        assert!(second.id > first.id);
    }

    #[test_log::test(tokio::test)]
    async fn restart_loads_from_checkpoint() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let time: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());
        let args = CatalogArgs {
            checkpoint_interval: 1,
            ..Default::default()
        };
        let sequence = {
            let catalog = Catalog::new_with_args(
                "host",
                Arc::clone(&store),
                Arc::clone(&time),
                args,
                CatalogLimits::default(),
            )
            .await
            .unwrap();
            catalog
                .create_namespace("public", DataModel::Relational, false)
                .await
                .unwrap();
            catalog
                .create_table("public", "emp", &emp_columns(), &["id"])
                .await
                .unwrap();
            catalog.sequence_number()
        };

        let catalog = Catalog::new_with_args(
            "host",
            store,
            time,
            args,
            CatalogLimits::default(),
        )
        .await
        .unwrap();
        assert_eq!(catalog.sequence_number(), sequence);
        assert!(catalog.namespace("public").unwrap().table_by_name("emp").is_some());
    }

    #[test_log::test(tokio::test)]
    async fn physical_registrations_do_not_survive_restart() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let time: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());
        let (adapter_id, table_id) = {
            let catalog = Catalog::new("host", Arc::clone(&store), Arc::clone(&time))
                .await
                .unwrap();
            catalog
                .create_namespace("public", DataModel::Relational, false)
                .await
                .unwrap();
            let table = catalog
                .create_table("public", "emp", &emp_columns(), &["id"])
                .await
                .unwrap();
            register_store(&catalog, "store_a").await;
            catalog
                .add_placement("public", "emp", "store_a", None)
                .await
                .unwrap();
            let snapshot = catalog.snapshot();
            let allocation = snapshot
                .alloc()
                .allocations_for_entity(table.id)
                .pop()
                .unwrap();
            catalog
                .register_physical_table("store_a", allocation.id, "emp_part0", &["id", "name"])
                .await
                .unwrap();
            (allocation.adapter_id, table.id)
        };

        let catalog = Catalog::new("host", store, time).await.unwrap();
        let snapshot = catalog.snapshot();
        // The adapter registration and allocations are durable, the
        // physical layer is not.
        assert!(snapshot.adapter("store_a").is_some());
        assert!(!snapshot.alloc().allocations_for_entity(table_id).is_empty());
        assert!(
            snapshot
                .physical()
                .store(adapter_id)
                .is_none_or(|s| s.is_empty())
        );
    }

    #[test_log::test(tokio::test)]
    async fn concurrent_writers_all_commit() {
        let catalog = relational_catalog("concurrency").await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let catalog = Arc::clone(&catalog);
            handles.push(tokio::spawn(async move {
                catalog
                    .create_table("public", &format!("t{i}"), &emp_columns(), &["id"])
                    .await
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        let schema = catalog.namespace("public").unwrap();
        assert_eq!(schema.entity_count(), 8);
    }
}
