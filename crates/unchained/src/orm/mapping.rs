//! Sealed mapping output produced at finalize

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::{
    meta::Polymorphism,
    model::{Attr, ClassKind, Column, MapperArgs, ModelClass, Relationship, Row},
};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    /// Attribute the column is exposed as
    pub attr: String,
    /// Database column name
    pub name: String,
    pub column: Column,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Add columns not already present, keeping the existing order
    pub(crate) fn extend_columns<'a>(&mut self, columns: impl IntoIterator<Item = &'a ColumnSchema>) {
        for column in columns {
            if self.column(&column.attr).is_none() {
                self.columns.push(column.clone());
            }
        }
    }

    pub fn column(&self, attr: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.attr == attr)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.column.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// A model whose mapper has been built
#[derive(Debug, Clone)]
pub struct MappedModel {
    pub class: Arc<ModelClass>,
    /// `None` for single-table polymorphic subclasses
    pub table: Option<TableSchema>,
    /// Columns a single-table subclass adds to the table it shares
    pub shared_columns: Vec<ColumnSchema>,
    /// The mapped polymorphic parent, if any
    pub inherits: Option<String>,
    pub mapper_args: MapperArgs,
    pub relationships: IndexMap<String, Relationship>,
    pub materialized_view_for: Vec<String>,
}

impl MappedModel {
    pub fn name(&self) -> &str {
        self.class.name()
    }

    pub fn qualname(&self) -> String {
        self.class.qualname()
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_ref().map(|t| t.name.as_str())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.table
            .as_ref()
            .map(TableSchema::column_names)
            .unwrap_or_default()
    }

    pub fn is_materialized_view(&self) -> bool {
        !self.materialized_view_for.is_empty()
    }

    /// Resolve an attribute through the class's MRO
    pub fn attribute(&self, name: &str) -> Option<&Attr> {
        self.class.lookup(name)
    }

    /// Call a model method on an instance's values; `None` if no such method
    pub fn call(&self, method: &str, row: &Row) -> Option<anyhow::Result<Value>> {
        match self.attribute(method)? {
            Attr::Method(body) => Some(body(row)),
            _ => None,
        }
    }
}

/// Build the mapping of a concrete model class
pub(crate) fn map_model(cls: &Arc<ModelClass>) -> MappedModel {
    let mro = cls.mro();
    let meta = cls.meta().cloned().unwrap_or_default();

    // nearest mapped model above this one
    let parent = mro
        .iter()
        .skip(1)
        .position(|c| c.kind() == ClassKind::Model && !c.is_abstract())
        .map(|i| i + 1);
    let is_polymorphic_child =
        meta.polymorphic().is_some() && !meta.is_base_polymorphic_model() && parent.is_some();
    let inherits = parent
        .filter(|_| is_polymorphic_child)
        .map(|i| mro[i].name().to_owned());

    // joined subclasses only own the columns declared below their parent
    let scope = match parent {
        Some(end) if is_polymorphic_child => &mro[..end],
        _ => &mro[..],
    };

    let mut columns: IndexMap<String, ColumnSchema> = IndexMap::new();
    let mut relationships: IndexMap<String, Relationship> = IndexMap::new();
    for level in scope.iter().rev() {
        for (attr, value) in &level.clsdict().attrs {
            if let Some(column) = value.as_column() {
                columns.insert(
                    attr.clone(),
                    ColumnSchema {
                        attr: attr.clone(),
                        name: column.name.clone().unwrap_or_else(|| attr.clone()),
                        column: column.clone(),
                    },
                );
            } else if let Some(rel) = value.as_relationship() {
                relationships.insert(attr.clone(), rel.clone());
            }
        }
    }

    let single_table_child =
        is_polymorphic_child && meta.polymorphic() == Some(Polymorphism::Single);
    let (table, shared_columns) = match (&cls.clsdict().tablename, single_table_child) {
        (_, true) => (None, columns.into_values().collect()),
        (Some(name), false) => (
            Some(TableSchema {
                name: name.clone(),
                columns: columns.into_values().collect(),
            }),
            Vec::new(),
        ),
        (None, false) => (None, Vec::new()),
    };

    MappedModel {
        class: Arc::clone(cls),
        table,
        shared_columns,
        inherits,
        mapper_args: cls.clsdict().mapper_args.clone(),
        relationships,
        materialized_view_for: meta.mv_for().to_vec(),
    }
}
