//! The deferred model registry
//!
//! Bundles declare models in boot order, but a later bundle may provide the
//! authoritative version of a model an earlier bundle already declared. The
//! registry therefore never maps at declaration time (unless a model opts
//! out with `lazy_mapped = false`); it records every version, converts the
//! shadowed ones into mixins of the new version, and builds the mappings of
//! the surviving versions in [`ModelRegistry::finalize`].

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use log::{debug, info, trace};

use super::{
    mapping::{ColumnSchema, MappedModel, map_model},
    meta::MetaOptionsFactory,
    model::{BaseRef, ClassDict, McsArgs, McsInitArgs, Metaclass, ModelClass, ModelDef, bundle_of},
};
use crate::error::{Error, Result};

/// Module of the framework's default base model
pub const BASE_MODEL_MODULE: &str = "unchained.orm";

/// Name of the framework's default base model
pub const BASE_MODEL_NAME: &str = "Model";

/// Base models a converted class sits on, through registered ancestors too
fn collect_base_models(cls: &ModelClass, base_models: &mut Vec<Arc<ModelClass>>) {
    for base in cls.bases() {
        if base.is_base_model() {
            push_unique(base_models, Arc::clone(base));
        } else {
            collect_base_models(base, base_models);
        }
    }
}

fn push_unique(classes: &mut Vec<Arc<ModelClass>>, cls: Arc<ModelClass>) {
    if !classes.iter().any(|c| Arc::ptr_eq(c, &cls)) {
        classes.push(cls);
    }
}

#[derive(Debug)]
pub struct ModelRegistry {
    default_metaclass: Arc<Metaclass>,
    default_base: Arc<ModelClass>,
    /// `"module.Name"` -> base model; the last one is "the" base
    base_model_classes: IndexMap<String, Arc<ModelClass>>,
    /// name -> module -> construction tuple, every version ever declared
    registry: IndexMap<String, IndexMap<String, McsArgs>>,
    /// name -> current best candidate
    models: IndexMap<String, McsInitArgs>,
    /// name -> related model -> attribute expected on the related model
    relationships: IndexMap<String, IndexMap<String, String>>,
    initialized: IndexSet<String>,
    mapped: IndexMap<String, Arc<MappedModel>>,
    /// `"module.Name@bundle"` -> mixin synthesized for that bundle
    mixins: IndexMap<String, Arc<ModelClass>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// A registry with the framework's `Model` as the only base model
    pub fn new() -> Self {
        let metaclass = Arc::new(Metaclass::new(
            "ModelMetaclass",
            MetaOptionsFactory::model_defaults(),
        ));
        let base = Arc::new(ModelClass::base_model(
            BASE_MODEL_NAME,
            BASE_MODEL_MODULE,
            Arc::clone(&metaclass),
        ));
        let mut base_model_classes = IndexMap::new();
        base_model_classes.insert(base.qualname(), Arc::clone(&base));
        Self {
            default_metaclass: metaclass,
            default_base: base,
            base_model_classes,
            registry: IndexMap::new(),
            models: IndexMap::new(),
            relationships: IndexMap::new(),
            initialized: IndexSet::new(),
            mapped: IndexMap::new(),
            mixins: IndexMap::new(),
        }
    }

    /// The base model new models are forced onto (the last registered one)
    pub fn base_model(&self) -> &Arc<ModelClass> {
        self.base_model_classes
            .values()
            .last()
            .unwrap_or(&self.default_base)
    }

    pub fn base_model_names(&self) -> impl Iterator<Item = &str> {
        self.base_model_classes.keys().map(String::as_str)
    }

    pub fn register_base_model(&mut self, cls: Arc<ModelClass>) {
        debug!("Registering base model {}", cls.qualname());
        self.base_model_classes.shift_remove(&cls.qualname());
        self.base_model_classes.insert(cls.qualname(), cls);
    }

    /// Create and register a base model running its own meta options
    pub fn create_base_model(
        &mut self,
        name: &str,
        module: &str,
        options: MetaOptionsFactory,
    ) -> Arc<ModelClass> {
        let metaclass = Arc::new(Metaclass::new(format!("{name}Metaclass"), options));
        let cls = Arc::new(ModelClass::base_model(name, module, metaclass));
        self.register_base_model(Arc::clone(&cls));
        cls
    }

    /// Current best candidate registered under `name`
    pub fn get(&self, name: &str) -> Option<&McsInitArgs> {
        self.models.get(name)
    }

    pub fn models(&self) -> &IndexMap<String, McsInitArgs> {
        &self.models
    }

    /// Modules that declared a model called `name`, in declaration order
    pub fn versions(&self, name: &str) -> Vec<&str> {
        self.registry
            .get(name)
            .map(|modules| modules.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn relationships(&self, name: &str) -> Option<&IndexMap<String, String>> {
        self.relationships.get(name)
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.initialized.contains(name)
    }

    pub fn mapped(&self) -> &IndexMap<String, Arc<MappedModel>> {
        &self.mapped
    }

    pub fn mapped_model(&self, name: &str) -> Option<&Arc<MappedModel>> {
        self.mapped.get(name)
    }

    /// Forget every model; base models other than the default are dropped too
    pub fn reset(&mut self) {
        debug!("Resetting model registry");
        self.base_model_classes.clear();
        self.base_model_classes
            .insert(self.default_base.qualname(), Arc::clone(&self.default_base));
        self.registry.clear();
        self.models.clear();
        self.relationships.clear();
        self.initialized.clear();
        self.mapped.clear();
        self.mixins.clear();
    }

    /// Construct a model class from its declaration and register it
    pub fn declare(&mut self, def: ModelDef) -> Result<Arc<ModelClass>> {
        let model = def.model_repr();
        if def.attrs.contains_key("__abstract__") {
            return Err(Error::AbstractMarker { model });
        }

        let bases = def
            .bases
            .iter()
            .map(|base| self.resolve_base(&model, base))
            .collect::<Result<Vec<_>>>()?;

        let mut mcs_args = McsArgs {
            mcs: Arc::clone(
                self.base_model()
                    .metaclass()
                    .unwrap_or(&self.default_metaclass),
            ),
            name: def.name,
            bases,
            clsdict: ClassDict {
                module: def.module,
                bundle: def.bundle,
                attrs: def.attrs,
                meta_def: def.meta,
                ..ClassDict::default()
            },
        };

        self.pre_new(&mut mcs_args)?;
        let mcs = Arc::clone(&mcs_args.mcs);
        mcs.options.apply(&mut mcs_args)?;
        self.register_new(&mcs_args);

        let cls = Arc::new(ModelClass::from_mcs_args(mcs_args.clone(), def.hooks));
        trace!("{model} bases: {}", cls.base_names().join(", "));
        self.register(McsInitArgs {
            cls: Arc::clone(&cls),
            mcs_args,
        })?;
        Ok(cls)
    }

    fn resolve_base(&self, model: &str, base: &BaseRef) -> Result<Arc<ModelClass>> {
        match base {
            BaseRef::Class(cls) => Ok(Arc::clone(cls)),
            BaseRef::Named(name) => self
                .models
                .get(name)
                .map(|init| Arc::clone(&init.cls))
                .or_else(|| {
                    self.base_model_classes
                        .values()
                        .rev()
                        .find(|b| b.name() == name)
                        .cloned()
                })
                .ok_or_else(|| Error::UnknownBaseModel {
                    model: model.to_owned(),
                    base: name.clone(),
                }),
        }
    }

    /// Fix up the bases before the meta options run
    fn pre_new(&mut self, mcs_args: &mut McsArgs) -> Result<()> {
        self.ensure_correct_base_model(mcs_args)?;
        if let Some(mcs) = mcs_args
            .bases
            .iter()
            .flat_map(|b| b.mro())
            .find(|c| c.is_base_model())
            .and_then(ModelClass::metaclass)
        {
            mcs_args.mcs = Arc::clone(mcs);
        }

        if self.is_polymorphic(mcs_args) {
            return Ok(());
        }
        if self.should_convert_bases_to_mixins(mcs_args) {
            self.convert_bases_to_mixins(mcs_args);
        }
        Ok(())
    }

    fn ensure_correct_base_model(&self, mcs_args: &mut McsArgs) -> Result<()> {
        let correct = Arc::clone(self.base_model());
        mcs_args
            .bases
            .retain(|b| !b.is_base_model() || Arc::ptr_eq(b, &correct));
        if !mcs_args.bases.iter().any(|b| b.inherits_from(&correct)) {
            mcs_args.bases.push(Arc::clone(&correct));
        }

        let mut candidates: Vec<String> = Vec::new();
        for cls in mcs_args.bases.iter().flat_map(|b| b.mro()) {
            if cls.is_base_model() && !candidates.contains(&cls.qualname()) {
                candidates.push(cls.qualname());
            }
        }
        if candidates.len() > 1 {
            return Err(Error::AmbiguousBaseModel {
                model: mcs_args.model_repr(),
                candidates,
            });
        }
        Ok(())
    }

    fn is_polymorphic(&self, mcs_args: &McsArgs) -> bool {
        match mcs_args
            .clsdict
            .meta_def
            .as_ref()
            .and_then(|m| m.get("polymorphic"))
        {
            Some(value) => value.is_truthy(),
            None => mcs_args
                .bases
                .iter()
                .any(|b| b.meta().is_some_and(|m| m.polymorphic().is_some())),
        }
    }

    fn is_registered(&self, cls: &ModelClass) -> bool {
        self.registry
            .get(cls.name())
            .is_some_and(|modules| modules.contains_key(cls.module()))
    }

    fn should_convert_bases_to_mixins(&self, mcs_args: &McsArgs) -> bool {
        mcs_args.bases.iter().any(|b| self.is_registered(b))
            || self
                .registry
                .get(&mcs_args.name)
                .is_some_and(|modules| modules.keys().any(|m| m != mcs_args.module()))
    }

    /// Replace every registered base with a mixin copy of its class dict.
    ///
    /// A model shadowing an earlier one by name also gets the earlier
    /// version as a mixin. Base models found on the way are moved to the end.
    fn convert_bases_to_mixins(&mut self, mcs_args: &mut McsArgs) {
        let mut bases = mcs_args.bases.clone();
        if let Some(shadowed) = self.models.get(&mcs_args.name)
            && shadowed.cls.module() != mcs_args.module()
            && !bases.iter().any(|b| b.inherits_from(&shadowed.cls))
        {
            bases.insert(0, Arc::clone(&shadowed.cls));
        }

        let new_bundle = mcs_args
            .clsdict
            .bundle
            .clone()
            .unwrap_or_else(|| bundle_of(mcs_args.module()).to_owned());
        let mut base_models = Vec::new();
        let mut new_bases = Vec::new();
        for base in bases {
            if base.is_base_model() {
                push_unique(&mut base_models, base);
            } else if self.is_registered(&base) {
                let mixin = self.mixin_for(&base, &new_bundle, &mut base_models);
                push_unique(&mut new_bases, mixin);
            } else {
                push_unique(&mut new_bases, base);
            }
        }
        for base_model in base_models {
            push_unique(&mut new_bases, base_model);
        }

        debug!(
            "Converted bases of {} to mixins: {}",
            mcs_args.model_repr(),
            new_bases
                .iter()
                .map(|b| b.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        mcs_args.bases = new_bases;
    }

    /// Mixin copy of a registered class, shared by every class of
    /// `new_bundle` that converts it
    fn mixin_for(
        &mut self,
        base: &Arc<ModelClass>,
        new_bundle: &str,
        base_models: &mut Vec<Arc<ModelClass>>,
    ) -> Arc<ModelClass> {
        let key = format!("{}@{new_bundle}", base.qualname());
        if let Some(mixin) = self.mixins.get(&key) {
            collect_base_models(base, base_models);
            return Arc::clone(mixin);
        }

        let mut mixin_bases = Vec::new();
        for inner in base.bases() {
            if inner.is_base_model() {
                push_unique(base_models, Arc::clone(inner));
            } else if self.is_registered(inner) {
                let mixin = self.mixin_for(inner, new_bundle, base_models);
                push_unique(&mut mixin_bases, mixin);
            } else {
                push_unique(&mut mixin_bases, Arc::clone(inner));
            }
        }

        let clsdict = ClassDict {
            module: base.module().to_owned(),
            bundle: base.clsdict().bundle.clone(),
            attrs: base
                .clsdict()
                .attrs
                .iter()
                .map(|(name, attr)| (name.clone(), attr.clone().into_mixin_attr()))
                .collect(),
            meta: base.clsdict().meta.clone(),
            ..ClassDict::default()
        };
        let name = format!(
            "{}_{new_bundle}_Mixin_of_{}",
            base.name(),
            base.bundle_name()
        );
        let mixin = Arc::new(ModelClass::synthesized_mixin(name, mixin_bases, clsdict));
        self.mixins.insert(key, Arc::clone(&mixin));
        mixin
    }

    fn register_new(&mut self, mcs_args: &McsArgs) {
        self.registry
            .entry(mcs_args.name.clone())
            .or_default()
            .insert(mcs_args.module().to_owned(), mcs_args.clone());
    }

    fn register(&mut self, init_args: McsInitArgs) -> Result<()> {
        let name = init_args.cls.name().to_owned();
        let meta = init_args.cls.meta().cloned().unwrap_or_default();
        debug!("Registered model {}", init_args.cls.qualname());

        let expected = meta.relationships();
        if expected.is_empty() {
            self.relationships.shift_remove(&name);
        } else {
            self.relationships.insert(name.clone(), expected);
        }

        // a new version supersedes whatever was mapped under this name
        if self.initialized.shift_remove(&name) {
            self.mapped.shift_remove(&name);
        }
        self.models.insert(name.clone(), init_args);

        if !meta.lazy_mapped() {
            self.initialize(&name)?;
            self.share_single_table_columns();
        }
        Ok(())
    }

    /// Map every registered model that is not mapped yet.
    ///
    /// Models are visited in first-declaration order; each name maps its
    /// current best candidate only.
    pub fn finalize(&mut self) -> Result<&IndexMap<String, Arc<MappedModel>>> {
        let names: Vec<String> = self.registry.keys().cloned().collect();
        for name in &names {
            if self.initialized.contains(name) {
                continue;
            }
            self.check_relationships(name)?;
            self.initialize(name)?;
        }
        self.share_single_table_columns();
        self.check_relationship_targets()?;
        info!("Finalized {} mapped models", self.mapped.len());
        Ok(&self.mapped)
    }

    /// Add the columns of single-table subclasses to the table they share
    fn share_single_table_columns(&mut self) {
        let mut additions: Vec<(String, Vec<ColumnSchema>)> = Vec::new();
        for mapped in self.mapped.values() {
            if mapped.shared_columns.is_empty() {
                continue;
            }
            if let Some(owner) = self.table_owner(mapped) {
                additions.push((owner, mapped.shared_columns.clone()));
            }
        }
        for (owner, columns) in additions {
            if let Some(mapped) = self.mapped.get_mut(&owner)
                && let Some(table) = Arc::make_mut(mapped).table.as_mut()
            {
                trace!("Adding {} shared column(s) to {}", columns.len(), table.name);
                table.extend_columns(&columns);
            }
        }
    }

    /// Nearest mapped ancestor of a single-table subclass that owns a table
    fn table_owner(&self, mapped: &MappedModel) -> Option<String> {
        let mut parent = mapped.inherits.as_deref()?;
        loop {
            let model = self.mapped.get(parent)?;
            if model.table.is_some() {
                return Some(parent.to_owned());
            }
            parent = model.inherits.as_deref()?;
        }
    }

    fn check_relationships(&self, name: &str) -> Result<()> {
        let Some(expected) = self.relationships.get(name) else {
            return Ok(());
        };
        for (related, attr) in expected {
            let Some(counterpart) = self.models.get(related) else {
                return Err(Error::UnknownRelatedModel {
                    model: name.to_owned(),
                    related: related.clone(),
                });
            };
            if !counterpart.cls.has_attr(attr) {
                return Err(Error::IncompleteRelationship {
                    model: name.to_owned(),
                    related: related.clone(),
                    attr: attr.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_relationship_targets(&self) -> Result<()> {
        for mapped in self.mapped.values() {
            for rel in mapped.relationships.values() {
                if !self.models.contains_key(&rel.target) {
                    return Err(Error::UnknownRelatedModel {
                        model: mapped.name().to_owned(),
                        related: rel.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn initialize(&mut self, name: &str) -> Result<()> {
        let Some(init_args) = self.models.get(name) else {
            return Ok(());
        };
        let cls = Arc::clone(&init_args.cls);

        if let Some(hook) = &cls.hooks().before_mapping {
            hook(&cls).map_err(|source| Error::ModelHook {
                model: cls.qualname(),
                stage: "before_mapping",
                source,
            })?;
        }

        if cls.is_abstract() {
            trace!("Skipping mapping of abstract model {}", cls.qualname());
        } else {
            let mapped = map_model(&cls);
            debug!(
                "Mapped {} to {}",
                cls.qualname(),
                mapped.table_name().unwrap_or("<parent table>")
            );
            self.mapped.insert(name.to_owned(), Arc::new(mapped));
        }

        if let Some(hook) = &cls.hooks().after_mapping {
            hook(&cls).map_err(|source| Error::ModelHook {
                model: cls.qualname(),
                stage: "after_mapping",
                source,
            })?;
        }

        self.initialized.insert(name.to_owned());
        Ok(())
    }
}
