//! The meta options every model understands
//!
//! Order matters: options read the values of the ones before them through
//! the partially filled `_meta` of the class under construction.

use indexmap::IndexMap;

use super::{
    meta::{
        ABSTRACT_OPTION, MetaDef, MetaOption, MetaValue, ModelMeta, Polymorphism,
        inherited_value, invalid_option,
    },
    model::{Attr, Column, McsArgs},
    snake_case,
};
use crate::error::{Error, Result};

/// The standard options, in resolution order
pub fn model_meta_options() -> Vec<Box<dyn MetaOption>> {
    vec![
        Box::new(AbstractMetaOption),
        Box::new(LazyMappedMetaOption),
        Box::new(RelationshipsMetaOption),
        Box::new(PolymorphicMetaOption),
        Box::new(PolymorphicOnColumnMetaOption),
        Box::new(PolymorphicIdentityMetaOption),
        Box::new(PolymorphicBaseMetaOption),
        Box::new(TableMetaOption),
        Box::new(PolymorphicBaseTablenameMetaOption),
        Box::new(ColumnMetaOption::primary_key()),
        Box::new(ColumnMetaOption::created_at()),
        Box::new(ColumnMetaOption::updated_at()),
        Box::new(MaterializedViewForMetaOption),
    ]
}

fn expect_bool(option: &str, value: &MetaValue, mcs_args: &McsArgs) -> Result<()> {
    match value {
        MetaValue::Bool(_) => Ok(()),
        other => Err(invalid_option(
            mcs_args,
            option,
            format!("expected a bool, got {}", other.kind()),
        )),
    }
}

fn meta_of(mcs_args: &McsArgs) -> ModelMeta {
    mcs_args.meta().cloned().unwrap_or_default()
}

/// Whether the class is polymorphic but not the root of its hierarchy
fn is_polymorphic_child(meta: &ModelMeta) -> bool {
    meta.polymorphic().is_some() && !meta.is_base_polymorphic_model()
}

#[derive(Debug)]
pub struct AbstractMetaOption;

impl MetaOption for AbstractMetaOption {
    fn name(&self) -> &str {
        ABSTRACT_OPTION
    }

    fn default_value(&self) -> MetaValue {
        MetaValue::Bool(false)
    }

    fn get_value(
        &self,
        meta: Option<&MetaDef>,
        base_meta: Option<&ModelMeta>,
        mcs_args: &McsArgs,
    ) -> Result<MetaValue> {
        if mcs_args.clsdict.abstract_marker {
            return Ok(MetaValue::Bool(true));
        }
        Ok(inherited_value(self, meta, base_meta))
    }

    fn check_value(&self, value: &MetaValue, mcs_args: &McsArgs) -> Result<()> {
        expect_bool(self.name(), value, mcs_args)
    }

    fn contribute_to_class(&self, mcs_args: &mut McsArgs, value: &MetaValue) -> Result<()> {
        if value.is_truthy() {
            mcs_args.clsdict.abstract_marker = true;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct LazyMappedMetaOption;

impl MetaOption for LazyMappedMetaOption {
    fn name(&self) -> &str {
        "lazy_mapped"
    }

    fn default_value(&self) -> MetaValue {
        MetaValue::Bool(true)
    }

    fn inherit(&self) -> bool {
        true
    }

    fn check_value(&self, value: &MetaValue, mcs_args: &McsArgs) -> Result<()> {
        expect_bool(self.name(), value, mcs_args)
    }
}

/// Expected attributes on related models, from `Meta.relationships` plus
/// every relationship with `back_populates` found on the class or its bases
#[derive(Debug)]
pub struct RelationshipsMetaOption;

impl MetaOption for RelationshipsMetaOption {
    fn name(&self) -> &str {
        "relationships"
    }

    fn inherit(&self) -> bool {
        true
    }

    fn get_value(
        &self,
        meta: Option<&MetaDef>,
        base_meta: Option<&ModelMeta>,
        mcs_args: &McsArgs,
    ) -> Result<MetaValue> {
        let mut expected: IndexMap<String, String> = match inherited_value(self, meta, base_meta) {
            MetaValue::Map(map) => map,
            MetaValue::None => IndexMap::new(),
            other => {
                return Err(invalid_option(
                    mcs_args,
                    self.name(),
                    format!("expected a map of model name to attribute, got {}", other.kind()),
                ));
            }
        };

        let lazy = meta_of(mcs_args).lazy_mapped();
        let inherited = mcs_args
            .bases
            .iter()
            .flat_map(|base| base.mro())
            .flat_map(|cls| cls.clsdict().attrs.iter());
        for (attr_name, attr) in mcs_args.clsdict.attrs.iter().chain(inherited) {
            let Some(rel) = attr.as_relationship() else {
                continue;
            };
            if rel.backref.is_some() && lazy {
                return Err(Error::LazyBackref {
                    model: mcs_args.model_repr(),
                    attr: attr_name.clone(),
                });
            }
            if let Some(back_populates) = &rel.back_populates {
                expected
                    .entry(rel.target.clone())
                    .or_insert_with(|| back_populates.clone());
            }
        }

        Ok(if expected.is_empty() {
            MetaValue::None
        } else {
            MetaValue::Map(expected)
        })
    }
}

#[derive(Debug)]
pub struct PolymorphicMetaOption;

impl MetaOption for PolymorphicMetaOption {
    fn name(&self) -> &str {
        "polymorphic"
    }

    fn default_value(&self) -> MetaValue {
        MetaValue::Bool(false)
    }

    fn inherit(&self) -> bool {
        true
    }

    fn get_value(
        &self,
        meta: Option<&MetaDef>,
        base_meta: Option<&ModelMeta>,
        _mcs_args: &McsArgs,
    ) -> Result<MetaValue> {
        Ok(match inherited_value(self, meta, base_meta) {
            MetaValue::Bool(true) => MetaValue::Str("joined".to_owned()),
            other => other,
        })
    }

    fn check_value(&self, value: &MetaValue, mcs_args: &McsArgs) -> Result<()> {
        match value {
            MetaValue::Bool(_) | MetaValue::None => Ok(()),
            MetaValue::Str(s) if s == "joined" || s == "single" => Ok(()),
            other => Err(invalid_option(
                mcs_args,
                self.name(),
                format!("expected true, false, 'joined' or 'single', got {other}"),
            )),
        }
    }
}

/// Discriminator column, owned by the polymorphic base
#[derive(Debug)]
pub struct PolymorphicOnColumnMetaOption;

impl MetaOption for PolymorphicOnColumnMetaOption {
    fn name(&self) -> &str {
        "polymorphic_on"
    }

    fn default_value(&self) -> MetaValue {
        MetaValue::Str("discriminator".to_owned())
    }

    fn inherit(&self) -> bool {
        true
    }

    fn check_value(&self, value: &MetaValue, mcs_args: &McsArgs) -> Result<()> {
        match value {
            MetaValue::Str(s) if !s.is_empty() => Ok(()),
            other => Err(invalid_option(
                mcs_args,
                self.name(),
                format!("expected a column name, got {other}"),
            )),
        }
    }

    fn contribute_to_class(&self, mcs_args: &mut McsArgs, value: &MetaValue) -> Result<()> {
        let meta = meta_of(mcs_args);
        if meta.polymorphic().is_none() || !meta.is_base_polymorphic_model() {
            return Ok(());
        }
        let Some(column) = value.as_str() else {
            return Ok(());
        };
        let clsdict = &mut mcs_args.clsdict;
        if clsdict.mapper_args.polymorphic_on.is_none() {
            clsdict.mapper_args.polymorphic_on = Some(column.to_owned());
        }
        if !clsdict.contains(column) {
            clsdict
                .attrs
                .insert(column.to_owned(), Attr::Column(Column::string(255).not_null()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct PolymorphicIdentityMetaOption;

impl MetaOption for PolymorphicIdentityMetaOption {
    fn name(&self) -> &str {
        "polymorphic_identity"
    }

    fn get_value(
        &self,
        meta: Option<&MetaDef>,
        base_meta: Option<&ModelMeta>,
        mcs_args: &McsArgs,
    ) -> Result<MetaValue> {
        let value = inherited_value(self, meta, base_meta);
        if value.is_none() && meta_of(mcs_args).polymorphic().is_some() {
            return Ok(MetaValue::Str(mcs_args.name.clone()));
        }
        Ok(value)
    }

    fn contribute_to_class(&self, mcs_args: &mut McsArgs, value: &MetaValue) -> Result<()> {
        let meta = meta_of(mcs_args);
        if meta.polymorphic().is_none() || meta.is_abstract() {
            return Ok(());
        }
        if let Some(identity) = value.as_str()
            && mcs_args.clsdict.mapper_args.polymorphic_identity.is_none()
        {
            mcs_args.clsdict.mapper_args.polymorphic_identity = Some(identity.to_owned());
        }
        Ok(())
    }
}

/// `_is_base_polymorphic_model`: the first concrete polymorphic class in
/// a hierarchy
#[derive(Debug)]
pub struct PolymorphicBaseMetaOption;

impl MetaOption for PolymorphicBaseMetaOption {
    fn name(&self) -> &str {
        "_is_base_polymorphic_model"
    }

    fn get_value(
        &self,
        _meta: Option<&MetaDef>,
        base_meta: Option<&ModelMeta>,
        mcs_args: &McsArgs,
    ) -> Result<MetaValue> {
        let meta = meta_of(mcs_args);
        let base_is_mapped_polymorphic =
            base_meta.is_some_and(|m| m.polymorphic().is_some() && !m.is_abstract());
        Ok(MetaValue::Bool(
            meta.polymorphic().is_some() && !meta.is_abstract() && !base_is_mapped_polymorphic,
        ))
    }
}

#[derive(Debug)]
pub struct TableMetaOption;

impl MetaOption for TableMetaOption {
    fn name(&self) -> &str {
        "table"
    }

    fn get_value(
        &self,
        meta: Option<&MetaDef>,
        base_meta: Option<&ModelMeta>,
        mcs_args: &McsArgs,
    ) -> Result<MetaValue> {
        let value = inherited_value(self, meta, base_meta);
        if !value.is_none() {
            return Ok(value);
        }
        let resolved = meta_of(mcs_args);
        if resolved.is_abstract()
            || (is_polymorphic_child(&resolved)
                && resolved.polymorphic() == Some(Polymorphism::Single))
        {
            return Ok(MetaValue::None);
        }
        Ok(MetaValue::Str(snake_case(&mcs_args.name)))
    }

    fn check_value(&self, value: &MetaValue, mcs_args: &McsArgs) -> Result<()> {
        match value {
            MetaValue::None => Ok(()),
            MetaValue::Str(s) if !s.is_empty() => Ok(()),
            other => Err(invalid_option(
                mcs_args,
                self.name(),
                format!("expected a table name, got {other}"),
            )),
        }
    }

    fn contribute_to_class(&self, mcs_args: &mut McsArgs, value: &MetaValue) -> Result<()> {
        if let Some(table) = value.as_str()
            && mcs_args.clsdict.tablename.is_none()
        {
            mcs_args.clsdict.tablename = Some(table.to_owned());
        }
        Ok(())
    }
}

/// `_base_tablename`: the polymorphic base's table, for the classes below it
#[derive(Debug)]
pub struct PolymorphicBaseTablenameMetaOption;

impl MetaOption for PolymorphicBaseTablenameMetaOption {
    fn name(&self) -> &str {
        "_base_tablename"
    }

    fn get_value(
        &self,
        _meta: Option<&MetaDef>,
        base_meta: Option<&ModelMeta>,
        mcs_args: &McsArgs,
    ) -> Result<MetaValue> {
        let meta = meta_of(mcs_args);
        if !is_polymorphic_child(&meta) {
            return Ok(MetaValue::None);
        }
        let Some(base_meta) = base_meta else {
            return Ok(MetaValue::None);
        };
        let table = if base_meta.is_base_polymorphic_model() {
            base_meta.table()
        } else {
            base_meta.base_tablename()
        };
        Ok(table.map_or(MetaValue::None, MetaValue::from))
    }

    fn contribute_to_class(&self, mcs_args: &mut McsArgs, value: &MetaValue) -> Result<()> {
        mcs_args.clsdict.base_tablename = value.as_str().map(str::to_owned);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StandardColumn {
    PrimaryKey,
    CreatedAt,
    UpdatedAt,
}

/// `pk`, `created_at` and `updated_at`: a renamable, disableable column
/// injected into every concrete model
#[derive(Debug)]
pub struct ColumnMetaOption {
    name: &'static str,
    default_column: &'static str,
    kind: StandardColumn,
}

impl ColumnMetaOption {
    pub const fn primary_key() -> Self {
        Self {
            name: "pk",
            default_column: "id",
            kind: StandardColumn::PrimaryKey,
        }
    }

    pub const fn created_at() -> Self {
        Self {
            name: "created_at",
            default_column: "created_at",
            kind: StandardColumn::CreatedAt,
        }
    }

    pub const fn updated_at() -> Self {
        Self {
            name: "updated_at",
            default_column: "updated_at",
            kind: StandardColumn::UpdatedAt,
        }
    }

    fn column(&self) -> Column {
        match self.kind {
            StandardColumn::PrimaryKey => Column::integer().primary_key(),
            StandardColumn::CreatedAt => Column::datetime().not_null().server_default("now()"),
            StandardColumn::UpdatedAt => Column::datetime()
                .not_null()
                .server_default("now()")
                .on_update("now()"),
        }
    }
}

impl MetaOption for ColumnMetaOption {
    fn name(&self) -> &str {
        self.name
    }

    fn default_value(&self) -> MetaValue {
        MetaValue::Str(self.default_column.to_owned())
    }

    fn inherit(&self) -> bool {
        true
    }

    fn get_value(
        &self,
        meta: Option<&MetaDef>,
        base_meta: Option<&ModelMeta>,
        _mcs_args: &McsArgs,
    ) -> Result<MetaValue> {
        Ok(match inherited_value(self, meta, base_meta) {
            MetaValue::Bool(true) => self.default_value(),
            MetaValue::Bool(false) => MetaValue::None,
            other => other,
        })
    }

    fn check_value(&self, value: &MetaValue, mcs_args: &McsArgs) -> Result<()> {
        match value {
            MetaValue::None => Ok(()),
            MetaValue::Str(s) if !s.is_empty() => Ok(()),
            other => Err(invalid_option(
                mcs_args,
                self.name,
                format!("expected a column name, None or False, got {other}"),
            )),
        }
    }

    fn contribute_to_class(&self, mcs_args: &mut McsArgs, value: &MetaValue) -> Result<()> {
        let Some(column_name) = value.as_str() else {
            return Ok(());
        };
        let meta = meta_of(mcs_args);
        if meta.is_abstract() || mcs_args.clsdict.contains(column_name) {
            return Ok(());
        }

        let column = if is_polymorphic_child(&meta) {
            // joined subclasses share the base's primary key, nothing else
            match (self.kind, meta.polymorphic(), meta.base_tablename()) {
                (StandardColumn::PrimaryKey, Some(Polymorphism::Joined), Some(base_table)) => {
                    self.column()
                        .foreign_key(format!("{base_table}.{column_name}"))
                }
                _ => return Ok(()),
            }
        } else {
            self.column()
        };

        let attrs = &mut mcs_args.clsdict.attrs;
        if self.kind == StandardColumn::PrimaryKey {
            attrs.shift_insert(0, column_name.to_owned(), Attr::Column(column));
        } else {
            attrs.insert(column_name.to_owned(), Attr::Column(column));
        }
        Ok(())
    }
}

/// `mv_for`: tables a materialized view model is computed from
#[derive(Debug)]
pub struct MaterializedViewForMetaOption;

impl MetaOption for MaterializedViewForMetaOption {
    fn name(&self) -> &str {
        "mv_for"
    }

    fn get_value(
        &self,
        meta: Option<&MetaDef>,
        base_meta: Option<&ModelMeta>,
        _mcs_args: &McsArgs,
    ) -> Result<MetaValue> {
        Ok(match inherited_value(self, meta, base_meta) {
            MetaValue::Str(table) => MetaValue::List(vec![table]),
            other => other,
        })
    }

    fn check_value(&self, value: &MetaValue, mcs_args: &McsArgs) -> Result<()> {
        match value {
            MetaValue::None | MetaValue::List(_) => Ok(()),
            other => Err(invalid_option(
                mcs_args,
                self.name(),
                format!("expected a table name or list of table names, got {other}"),
            )),
        }
    }
}
