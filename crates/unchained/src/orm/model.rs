//! Model declarations and the classes built from them
//!
//! A [`ModelDef`] is what a bundle's `models` module declares: a name, the
//! module it lives in, its bases, its attributes and an optional `Meta`.
//! The registry turns each declaration into a [`ModelClass`], going through
//! the construction tuple [`McsArgs`] that meta options may rewrite.

use std::{fmt, ptr, sync::Arc};

use indexmap::IndexMap;
use serde_json::Value;

use super::meta::{MetaDef, MetaOptionsFactory, ModelMeta};

/// An instance's attribute values, as seen by model methods
pub type Row = serde_json::Map<String, Value>;

/// Behavior attached to a model class
pub type MethodFn = Arc<dyn Fn(&Row) -> anyhow::Result<Value> + Send + Sync>;

/// Class-level callback run around mapping at finalize
pub type ModelHook = Arc<dyn Fn(&ModelClass) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    BigInteger,
    String(Option<u32>),
    Text,
    Boolean,
    Float,
    Numeric,
    Date,
    DateTime,
    Json,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => f.write_str("INTEGER"),
            Self::BigInteger => f.write_str("BIGINT"),
            Self::String(Some(len)) => write!(f, "VARCHAR({len})"),
            Self::String(None) => f.write_str("VARCHAR"),
            Self::Text => f.write_str("TEXT"),
            Self::Boolean => f.write_str("BOOLEAN"),
            Self::Float => f.write_str("FLOAT"),
            Self::Numeric => f.write_str("NUMERIC"),
            Self::Date => f.write_str("DATE"),
            Self::DateTime => f.write_str("DATETIME"),
            Self::Json => f.write_str("JSON"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub ty: ColumnType,
    /// Database column name when it differs from the attribute name
    pub name: Option<String>,
    pub primary_key: bool,
    pub nullable: bool,
    pub unique: bool,
    pub index: bool,
    /// `"table.column"`
    pub foreign_key: Option<String>,
    pub default: Option<Value>,
    pub server_default: Option<String>,
    pub on_update: Option<String>,
}

impl Column {
    pub fn new(ty: ColumnType) -> Self {
        Self {
            ty,
            name: None,
            primary_key: false,
            nullable: true,
            unique: false,
            index: false,
            foreign_key: None,
            default: None,
            server_default: None,
            on_update: None,
        }
    }

    pub fn integer() -> Self {
        Self::new(ColumnType::Integer)
    }

    pub fn string(len: impl Into<Option<u32>>) -> Self {
        Self::new(ColumnType::String(len.into()))
    }

    pub fn text() -> Self {
        Self::new(ColumnType::Text)
    }

    pub fn boolean() -> Self {
        Self::new(ColumnType::Boolean)
    }

    pub fn datetime() -> Self {
        Self::new(ColumnType::DateTime)
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    #[must_use]
    pub fn foreign_key(mut self, target: impl Into<String>) -> Self {
        self.foreign_key = Some(target.into());
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn server_default(mut self, expr: impl Into<String>) -> Self {
        self.server_default = Some(expr.into());
        self
    }

    #[must_use]
    pub fn on_update(mut self, expr: impl Into<String>) -> Self {
        self.on_update = Some(expr.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Simple name of the related model
    pub target: String,
    /// Attribute on the related model pointing back at this one
    pub back_populates: Option<String>,
    /// Attribute to create on the related model
    pub backref: Option<String>,
    /// Association table for many-to-many relationships
    pub secondary: Option<String>,
}

impl Relationship {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            back_populates: None,
            backref: None,
            secondary: None,
        }
    }

    #[must_use]
    pub fn back_populates(mut self, attr: impl Into<String>) -> Self {
        self.back_populates = Some(attr.into());
        self
    }

    #[must_use]
    pub fn backref(mut self, attr: impl Into<String>) -> Self {
        self.backref = Some(attr.into());
        self
    }

    #[must_use]
    pub fn secondary(mut self, table: impl Into<String>) -> Self {
        self.secondary = Some(table.into());
        self
    }
}

/// One class attribute
#[derive(Clone)]
pub enum Attr {
    Column(Column),
    Relationship(Relationship),
    /// Plain class-level value
    Value(Value),
    Method(MethodFn),
    /// Evaluated per mapped subclass instead of being shared; used for
    /// foreign keys and relationships copied into mixins
    Declared(Box<Self>),
}

impl Attr {
    /// Unwrap any deferral
    pub fn resolved(&self) -> &Self {
        match self {
            Self::Declared(inner) => inner.resolved(),
            other => other,
        }
    }

    pub fn as_column(&self) -> Option<&Column> {
        match self.resolved() {
            Self::Column(column) => Some(column),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self.resolved() {
            Self::Relationship(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn is_declared(&self) -> bool {
        matches!(self, Self::Declared(_))
    }

    /// Wrap foreign-key columns and relationships for use in a mixin
    pub(crate) fn into_mixin_attr(self) -> Self {
        match self {
            Self::Column(column) if column.foreign_key.is_some() => {
                Self::Declared(Box::new(Self::Column(column)))
            }
            Self::Relationship(rel) => Self::Declared(Box::new(Self::Relationship(rel))),
            other => other,
        }
    }
}

impl fmt::Debug for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(column) => f.debug_tuple("Column").field(column).finish(),
            Self::Relationship(rel) => f.debug_tuple("Relationship").field(rel).finish(),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Method(_) => f.write_str("Method(..)"),
            Self::Declared(inner) => f.debug_tuple("Declared").field(inner).finish(),
        }
    }
}

impl From<Column> for Attr {
    fn from(column: Column) -> Self {
        Self::Column(column)
    }
}

impl From<Relationship> for Attr {
    fn from(rel: Relationship) -> Self {
        Self::Relationship(rel)
    }
}

/// `__mapper_args__`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapperArgs {
    pub polymorphic_on: Option<String>,
    pub polymorphic_identity: Option<String>,
}

/// First dotted segment of a module name
pub(crate) fn bundle_of(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

/// The mutable class dictionary of a class under construction
#[derive(Debug, Clone, Default)]
pub struct ClassDict {
    pub module: String,
    /// Name of the bundle that declared the class
    pub bundle: Option<String>,
    pub attrs: IndexMap<String, Attr>,
    /// `__tablename__`
    pub tablename: Option<String>,
    pub mapper_args: MapperArgs,
    /// `__abstract__`, only ever set through `Meta.abstract`
    pub abstract_marker: bool,
    pub base_tablename: Option<String>,
    /// The user's `Meta`, consumed by the meta options factory
    pub meta_def: Option<MetaDef>,
    /// `_meta`, installed by the meta options factory
    pub meta: Option<ModelMeta>,
}

impl ClassDict {
    pub fn contains(&self, attr: &str) -> bool {
        self.attrs.contains_key(attr)
    }
}

/// The metaclass of a model hierarchy: a name and the meta options it runs
#[derive(Debug)]
pub struct Metaclass {
    pub name: String,
    pub options: MetaOptionsFactory,
}

impl Metaclass {
    pub fn new(name: impl Into<String>, options: MetaOptionsFactory) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// The construction tuple of a model class
#[derive(Debug, Clone)]
pub struct McsArgs {
    pub mcs: Arc<Metaclass>,
    pub name: String,
    pub bases: Vec<Arc<ModelClass>>,
    pub clsdict: ClassDict,
}

impl McsArgs {
    pub fn module(&self) -> &str {
        &self.clsdict.module
    }

    /// `"module.Name"`
    pub fn model_repr(&self) -> String {
        format!("{}.{}", self.module(), self.name)
    }

    /// Meta values resolved so far
    pub fn meta(&self) -> Option<&ModelMeta> {
        self.clsdict.meta.as_ref()
    }

    pub fn is_abstract(&self) -> bool {
        self.clsdict.abstract_marker || self.meta().is_some_and(ModelMeta::is_abstract)
    }
}

/// A realized class plus the tuple it was built from, awaiting finalize
#[derive(Debug, Clone)]
pub struct McsInitArgs {
    pub cls: Arc<ModelClass>,
    pub mcs_args: McsArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// A framework base model (`Model`)
    BaseModel,
    Model,
    /// A mixin, either written by hand or synthesized from a shadowed model
    Mixin,
}

#[derive(Clone, Default)]
pub struct ModelHooks {
    pub before_mapping: Option<ModelHook>,
    pub after_mapping: Option<ModelHook>,
}

impl fmt::Debug for ModelHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHooks")
            .field("before_mapping", &self.before_mapping.is_some())
            .field("after_mapping", &self.after_mapping.is_some())
            .finish()
    }
}

/// A constructed model, mixin or base model class
#[derive(Debug)]
pub struct ModelClass {
    name: String,
    kind: ClassKind,
    bases: Vec<Arc<Self>>,
    clsdict: ClassDict,
    metaclass: Option<Arc<Metaclass>>,
    hooks: ModelHooks,
}

impl ModelClass {
    /// A framework base model; abstract and never mapped
    pub fn base_model(
        name: impl Into<String>,
        module: impl Into<String>,
        metaclass: Arc<Metaclass>,
    ) -> Self {
        let mut meta = ModelMeta::default();
        meta.set(super::meta::ABSTRACT_OPTION, true.into());
        Self {
            name: name.into(),
            kind: ClassKind::BaseModel,
            bases: Vec::new(),
            clsdict: ClassDict {
                module: module.into(),
                abstract_marker: true,
                meta: Some(meta),
                ..ClassDict::default()
            },
            metaclass: Some(metaclass),
            hooks: ModelHooks::default(),
        }
    }

    /// A hand-written mixin: attributes only, no meta
    pub fn mixin(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ClassKind::Mixin,
            bases: Vec::new(),
            clsdict: ClassDict {
                module: module.into(),
                ..ClassDict::default()
            },
            metaclass: None,
            hooks: ModelHooks::default(),
        }
    }

    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, attr: impl Into<Attr>) -> Self {
        self.clsdict.attrs.insert(name.into(), attr.into());
        self
    }

    #[must_use]
    pub fn with_bases(mut self, bases: Vec<Arc<Self>>) -> Self {
        self.bases = bases;
        self
    }

    pub(crate) fn from_mcs_args(mcs_args: McsArgs, hooks: ModelHooks) -> Self {
        Self {
            name: mcs_args.name,
            kind: ClassKind::Model,
            bases: mcs_args.bases,
            clsdict: mcs_args.clsdict,
            metaclass: Some(mcs_args.mcs),
            hooks,
        }
    }

    pub(crate) fn synthesized_mixin(name: String, bases: Vec<Arc<Self>>, clsdict: ClassDict) -> Self {
        Self {
            name,
            kind: ClassKind::Mixin,
            bases,
            clsdict,
            metaclass: None,
            hooks: ModelHooks::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.clsdict.module
    }

    /// The declaring bundle, or else the module's first dotted segment
    pub fn bundle_name(&self) -> &str {
        self.clsdict
            .bundle
            .as_deref()
            .unwrap_or_else(|| bundle_of(self.module()))
    }

    /// `"module.Name"`
    pub fn qualname(&self) -> String {
        format!("{}.{}", self.module(), self.name)
    }

    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    pub fn is_base_model(&self) -> bool {
        self.kind == ClassKind::BaseModel
    }

    pub fn bases(&self) -> &[Arc<Self>] {
        &self.bases
    }

    pub fn base_names(&self) -> Vec<&str> {
        self.bases.iter().map(|b| b.name()).collect()
    }

    pub fn clsdict(&self) -> &ClassDict {
        &self.clsdict
    }

    pub fn meta(&self) -> Option<&ModelMeta> {
        self.clsdict.meta.as_ref()
    }

    pub fn metaclass(&self) -> Option<&Arc<Metaclass>> {
        self.metaclass.as_ref()
    }

    pub fn hooks(&self) -> &ModelHooks {
        &self.hooks
    }

    pub fn is_abstract(&self) -> bool {
        self.clsdict.abstract_marker
    }

    /// Method resolution order: C3 linearization, falling back to a
    /// depth-first walk for hierarchies C3 rejects
    pub fn mro(&self) -> Vec<&Self> {
        c3_linearize(self).unwrap_or_else(|| {
            let mut seen: Vec<&Self> = Vec::new();
            depth_first(self, &mut seen);
            seen
        })
    }

    /// Look an attribute up through the MRO
    pub fn lookup(&self, attr: &str) -> Option<&Attr> {
        self.mro()
            .into_iter()
            .find_map(|cls| cls.clsdict.attrs.get(attr))
    }

    pub fn has_attr(&self, attr: &str) -> bool {
        self.lookup(attr).is_some()
    }

    /// Whether `other` appears in this class's MRO (itself included)
    pub fn inherits_from(&self, other: &Self) -> bool {
        self.mro().into_iter().any(|cls| ptr::eq(cls, other))
    }
}

fn c3_linearize(cls: &ModelClass) -> Option<Vec<&ModelClass>> {
    let mut sequences: Vec<Vec<&ModelClass>> = cls
        .bases
        .iter()
        .map(|base| c3_linearize(base))
        .collect::<Option<_>>()?;
    sequences.push(cls.bases.iter().map(AsRef::as_ref).collect());

    let mut result = vec![cls];
    loop {
        sequences.retain(|seq| !seq.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }
        let head = sequences.iter().map(|seq| seq[0]).find(|candidate| {
            !sequences
                .iter()
                .any(|seq| seq[1..].iter().any(|c| ptr::eq(*c, *candidate)))
        })?;
        result.push(head);
        for seq in &mut sequences {
            if ptr::eq(seq[0], head) {
                seq.remove(0);
            }
        }
    }
}

fn depth_first<'a>(cls: &'a ModelClass, seen: &mut Vec<&'a ModelClass>) {
    if seen.iter().any(|c| ptr::eq(*c, cls)) {
        return;
    }
    seen.push(cls);
    for base in &cls.bases {
        depth_first(base, seen);
    }
}

/// A base named in a model declaration
#[derive(Debug, Clone)]
pub enum BaseRef {
    /// A specific class
    Class(Arc<ModelClass>),
    /// The current best candidate registered under this model name
    Named(String),
}

impl From<Arc<ModelClass>> for BaseRef {
    fn from(cls: Arc<ModelClass>) -> Self {
        Self::Class(cls)
    }
}

impl From<&str> for BaseRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_owned())
    }
}

/// A model as declared by a bundle
#[derive(Debug, Clone)]
pub struct ModelDef {
    pub name: String,
    pub module: String,
    /// Declaring bundle; the models hook fills it in
    pub bundle: Option<String>,
    pub bases: Vec<BaseRef>,
    pub attrs: IndexMap<String, Attr>,
    pub meta: Option<MetaDef>,
    pub hooks: ModelHooks,
}

impl ModelDef {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            bundle: None,
            bases: Vec::new(),
            attrs: IndexMap::new(),
            meta: None,
            hooks: ModelHooks::default(),
        }
    }

    #[must_use]
    pub fn in_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle = Some(bundle.into());
        self
    }

    #[must_use]
    pub fn extends(mut self, base: impl Into<BaseRef>) -> Self {
        self.bases.push(base.into());
        self
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, attr: impl Into<Attr>) -> Self {
        self.attrs.insert(name.into(), attr.into());
        self
    }

    #[must_use]
    pub fn method<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Row) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.attrs.insert(name.into(), Attr::Method(Arc::new(body)));
        self
    }

    #[must_use]
    pub fn meta(mut self, meta: MetaDef) -> Self {
        self.meta = Some(meta);
        self
    }

    #[must_use]
    pub fn before_mapping<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ModelClass) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.before_mapping = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn after_mapping<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ModelClass) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.after_mapping = Some(Arc::new(hook));
        self
    }

    /// `"module.Name"`
    pub fn model_repr(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }
}
