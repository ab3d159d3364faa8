//! Declarative models with deferred, override-aware mapping
//!
//! ```rust
//! use unchained::orm::{Column, ModelDef, ModelRegistry};
//!
//! let mut registry = ModelRegistry::new();
//! registry
//!     .declare(
//!         ModelDef::new("Foo", "vendor.models")
//!             .extends("Model")
//!             .attr("name", Column::string(64)),
//!     )
//!     .unwrap();
//! let mapped = registry.finalize().unwrap();
//! assert_eq!(mapped["Foo"].table_name(), Some("foo"));
//! ```

mod mapping;
mod meta;
mod model;
mod options;
mod registry;

#[cfg(test)]
mod tests;

pub use mapping::{ColumnSchema, MappedModel, TableSchema};
pub use meta::{
    ABSTRACT_OPTION, CONTRIBUTE_ONLY, MetaDef, MetaOption, MetaOptionsFactory, MetaValue,
    ModelMeta, Polymorphism, inherited_value, invalid_option,
};
pub use model::{
    Attr, BaseRef, ClassDict, ClassKind, Column, ColumnType, MapperArgs, McsArgs, McsInitArgs,
    Metaclass, MethodFn, ModelClass, ModelDef, ModelHook, ModelHooks, Relationship, Row,
};
pub use options::{
    AbstractMetaOption, ColumnMetaOption, LazyMappedMetaOption, MaterializedViewForMetaOption,
    PolymorphicBaseMetaOption, PolymorphicBaseTablenameMetaOption, PolymorphicIdentityMetaOption,
    PolymorphicMetaOption, PolymorphicOnColumnMetaOption, RelationshipsMetaOption,
    TableMetaOption, model_meta_options,
};
pub use registry::{BASE_MODEL_MODULE, BASE_MODEL_NAME, ModelRegistry};

/// `"FooBar"` -> `"foo_bar"`, `"HTTPRequest"` -> `"http_request"`
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let starts_word = prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit())
                || (prev.is_some_and(char::is_uppercase) && next.is_some_and(char::is_lowercase));
            if starts_word && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
