//! Declarative per-model meta options
//!
//! Every model may carry a `Meta` definition ([`MetaDef`]) with options such
//! as `abstract`, `table` or `polymorphic`. While a model is being declared,
//! its metaclass runs a [`MetaOptionsFactory`]: each [`MetaOption`] resolves
//! its value (user value, inherited value or default), validates it, and then
//! gets a chance to contribute to the class being built (inject a column, set
//! the table name, fill mapper arguments).
//!
//! The resolved values end up in a [`ModelMeta`], which is stored on the
//! class and read by subclasses as their base meta.

use std::fmt;

use indexmap::IndexMap;
use log::trace;

use super::model::McsArgs;
use crate::error::{Error, Result};

/// Name of the option that must come first in every factory
pub const ABSTRACT_OPTION: &str = "abstract";

/// Options named `_` only contribute; their value is never stored
pub const CONTRIBUTE_ONLY: &str = "_";

/// A meta option value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MetaValue {
    #[default]
    None,
    Bool(bool),
    Str(String),
    List(Vec<String>),
    Map(IndexMap<String, String>),
}

impl MetaValue {
    /// Truthiness: `None`, `false`, and empty strings/lists/maps are falsy
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, String>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Short type description for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => write!(f, "{items:?}"),
            Self::Map(map) => write!(f, "{map:?}"),
        }
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl<S: Into<String>> From<Vec<S>> for MetaValue {
    fn from(value: Vec<S>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetaValue {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<T: Into<Self>> From<Option<T>> for MetaValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

/// The user-written `Meta` of a model declaration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaDef {
    attrs: IndexMap<String, MetaValue>,
}

impl MetaDef {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&MetaValue> {
        self.attrs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }
}

/// Supported polymorphism flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polymorphism {
    Joined,
    Single,
}

/// Resolved meta options of a model class (its `_meta`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelMeta {
    values: IndexMap<String, MetaValue>,
}

impl ModelMeta {
    pub fn get(&self, name: &str) -> Option<&MetaValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: MetaValue) {
        self.values.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name).is_some_and(MetaValue::is_truthy)
    }

    fn str_value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(MetaValue::as_str)
    }

    pub fn is_abstract(&self) -> bool {
        self.flag(ABSTRACT_OPTION)
    }

    pub fn lazy_mapped(&self) -> bool {
        self.flag("lazy_mapped")
    }

    pub fn table(&self) -> Option<&str> {
        self.str_value("table")
    }

    pub fn polymorphic(&self) -> Option<Polymorphism> {
        match self.get("polymorphic")? {
            MetaValue::Str(s) if s == "single" => Some(Polymorphism::Single),
            MetaValue::Str(s) if s == "joined" => Some(Polymorphism::Joined),
            MetaValue::Bool(true) => Some(Polymorphism::Joined),
            _ => None,
        }
    }

    pub fn polymorphic_on(&self) -> Option<&str> {
        self.str_value("polymorphic_on")
    }

    pub fn polymorphic_identity(&self) -> Option<&str> {
        self.str_value("polymorphic_identity")
    }

    /// Whether this model owns the discriminator of its polymorphic hierarchy
    pub fn is_base_polymorphic_model(&self) -> bool {
        self.flag("_is_base_polymorphic_model")
    }

    /// Table of the polymorphic base, for models below it
    pub fn base_tablename(&self) -> Option<&str> {
        self.str_value("_base_tablename")
    }

    /// `related model -> attribute expected on the related model`
    pub fn relationships(&self) -> IndexMap<String, String> {
        self.get("relationships")
            .and_then(MetaValue::as_map)
            .cloned()
            .unwrap_or_default()
    }

    /// Primary key column name, `None` when disabled
    pub fn pk(&self) -> Option<&str> {
        self.str_value("pk")
    }

    pub fn created_at(&self) -> Option<&str> {
        self.str_value("created_at")
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.str_value("updated_at")
    }

    /// Source tables when this model is a materialized view
    pub fn mv_for(&self) -> &[String] {
        self.get("mv_for")
            .and_then(MetaValue::as_list)
            .unwrap_or_default()
    }
}

/// One entry of a model's declarative configuration schema.
///
/// The default [`MetaOption::get_value`] starts from the default, takes the
/// base class's value when the option is inherited, and finally the user's
/// `Meta` value. Implementations override any of the three steps.
pub trait MetaOption: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn default_value(&self) -> MetaValue {
        MetaValue::None
    }

    /// Whether subclasses inherit the value resolved for their base
    fn inherit(&self) -> bool {
        false
    }

    fn get_value(
        &self,
        meta: Option<&MetaDef>,
        base_meta: Option<&ModelMeta>,
        _mcs_args: &McsArgs,
    ) -> Result<MetaValue> {
        Ok(inherited_value(self, meta, base_meta))
    }

    fn check_value(&self, _value: &MetaValue, _mcs_args: &McsArgs) -> Result<()> {
        Ok(())
    }

    fn contribute_to_class(&self, _mcs_args: &mut McsArgs, _value: &MetaValue) -> Result<()> {
        Ok(())
    }
}

/// The default value resolution: default, then inherited, then user value
pub fn inherited_value<O: MetaOption + ?Sized>(
    option: &O,
    meta: Option<&MetaDef>,
    base_meta: Option<&ModelMeta>,
) -> MetaValue {
    let name = option.name();
    if let Some(value) = meta.and_then(|m| m.get(name)) {
        return value.clone();
    }
    if option.inherit()
        && let Some(value) = base_meta.and_then(|m| m.get(name))
    {
        return value.clone();
    }
    option.default_value()
}

/// Build the error for an option value that failed validation
pub fn invalid_option(mcs_args: &McsArgs, option: &str, reason: impl Into<String>) -> Error {
    Error::InvalidMetaOption {
        model: mcs_args.model_repr(),
        option: option.to_owned(),
        reason: reason.into(),
    }
}

/// An ordered list of meta options, applied to each class under construction
#[derive(Debug)]
pub struct MetaOptionsFactory {
    options: Vec<Box<dyn MetaOption>>,
}

impl MetaOptionsFactory {
    /// Create a factory; the first option must be the abstract marker
    pub fn new(options: Vec<Box<dyn MetaOption>>) -> Result<Self> {
        match options.first() {
            Some(first) if first.name() == ABSTRACT_OPTION => Ok(Self { options }),
            Some(first) => Err(Error::AbstractOptionNotFirst {
                found: first.name().to_owned(),
            }),
            None => Err(Error::AbstractOptionNotFirst {
                found: "<nothing>".to_owned(),
            }),
        }
    }

    /// Factory with the standard model options
    pub fn model_defaults() -> Self {
        Self {
            options: super::options::model_meta_options(),
        }
    }

    /// Factory without the abstract-first check, for exercising single options
    #[cfg(test)]
    pub(crate) fn new_unchecked(options: Vec<Box<dyn MetaOption>>) -> Self {
        Self { options }
    }

    /// Append an option, e.g. for a custom base model's extra settings
    #[must_use]
    pub fn with_option(mut self, option: Box<dyn MetaOption>) -> Self {
        self.options.push(option);
        self
    }

    pub fn option_names(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(|o| o.name())
    }

    /// Run the binding protocol against a class under construction.
    ///
    /// Takes the user's `Meta` out of the class dict, resolves and validates
    /// every option against the first base meta found, rejects unknown user
    /// options, installs the result as the class's meta and finally lets each
    /// option contribute to the class dict.
    pub fn apply(&self, mcs_args: &mut McsArgs) -> Result<ModelMeta> {
        let user_meta = mcs_args.clsdict.meta_def.take();
        let base_meta = mcs_args.bases.iter().find_map(|b| b.meta()).cloned();

        mcs_args.clsdict.meta = Some(ModelMeta::default());

        let mut values = Vec::with_capacity(self.options.len());
        for option in &self.options {
            let value = option.get_value(user_meta.as_ref(), base_meta.as_ref(), mcs_args)?;
            option.check_value(&value, mcs_args)?;
            trace!(
                "{}: Meta.{} = {value}",
                mcs_args.model_repr(),
                option.name()
            );
            if option.name() != CONTRIBUTE_ONLY
                && let Some(meta) = mcs_args.clsdict.meta.as_mut()
            {
                meta.set(option.name(), value.clone());
            }
            values.push(value);
        }

        if let Some(user_meta) = &user_meta {
            let unknown: Vec<String> = user_meta
                .names()
                .filter(|name| !name.starts_with('_'))
                .filter(|name| !self.options.iter().any(|o| o.name() == *name))
                .map(str::to_owned)
                .collect();
            if !unknown.is_empty() {
                return Err(Error::UnknownMetaOptions {
                    model: mcs_args.model_repr(),
                    names: unknown,
                });
            }
        }

        for (option, value) in self.options.iter().zip(&values) {
            option.contribute_to_class(mcs_args, value)?;
        }

        Ok(mcs_args.clsdict.meta.clone().unwrap_or_default())
    }
}
