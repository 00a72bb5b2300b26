//! The trait shared by everything a [`Repository`](crate::catalog::Repository)
//! can hold.

use std::fmt::Debug;
use std::sync::Arc;

use stratadb_id::CatalogId;

use crate::catalog::{AdapterDefinition, NamespaceSchema, QueryInterfaceDefinition, UserDefinition};
use crate::logical::{CollectionDefinition, ColumnDefinition, GraphDefinition, TableDefinition};

pub trait CatalogResource: Debug + Clone + PartialEq + Send + Sync {
    type Identifier: CatalogId;

    fn id(&self) -> Self::Identifier;
    fn name(&self) -> Arc<str>;
}

impl CatalogResource for NamespaceSchema {
    type Identifier = stratadb_id::NamespaceId;

    fn id(&self) -> Self::Identifier {
        self.id
    }

    fn name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl CatalogResource for TableDefinition {
    type Identifier = stratadb_id::EntityId;

    fn id(&self) -> Self::Identifier {
        self.id
    }

    fn name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl CatalogResource for CollectionDefinition {
    type Identifier = stratadb_id::EntityId;

    fn id(&self) -> Self::Identifier {
        self.id
    }

    fn name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl CatalogResource for GraphDefinition {
    type Identifier = stratadb_id::EntityId;

    fn id(&self) -> Self::Identifier {
        self.id
    }

    fn name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl CatalogResource for ColumnDefinition {
    type Identifier = stratadb_id::FieldId;

    fn id(&self) -> Self::Identifier {
        self.id
    }

    fn name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl CatalogResource for AdapterDefinition {
    type Identifier = stratadb_id::AdapterId;

    fn id(&self) -> Self::Identifier {
        self.id
    }

    fn name(&self) -> Arc<str> {
        Arc::clone(&self.unique_name)
    }
}

impl CatalogResource for UserDefinition {
    type Identifier = stratadb_id::UserId;

    fn id(&self) -> Self::Identifier {
        self.id
    }

    fn name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl CatalogResource for QueryInterfaceDefinition {
    type Identifier = stratadb_id::InterfaceId;

    fn id(&self) -> Self::Identifier {
        self.id
    }

    fn name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}
