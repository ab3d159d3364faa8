//! Tests for the model registry and meta options

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::error::Error;

fn declare(registry: &mut ModelRegistry, def: ModelDef) -> std::sync::Arc<ModelClass> {
    registry.declare(def).expect("model declares")
}

#[test]
fn test_snake_case() {
    assert_eq!(snake_case("Foo"), "foo");
    assert_eq!(snake_case("FooBar"), "foo_bar");
    assert_eq!(snake_case("HTTPRequest"), "http_request");
    assert_eq!(snake_case("OAuth2Client"), "o_auth2_client");
    assert_eq!(snake_case("user_role"), "user_role");
}

#[test]
fn test_standard_columns_and_table_name() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("UserRole", "security.models").attr("name", Column::string(64)),
    );
    let mapped = registry.finalize().unwrap();
    let role = &mapped["UserRole"];
    assert_eq!(role.table_name(), Some("user_role"));
    assert_eq!(
        role.column_names(),
        ["id", "name", "created_at", "updated_at"]
    );
    assert_eq!(role.table.as_ref().unwrap().primary_key(), ["id"]);
    assert_eq!(role.class.base_names(), ["Model"]);
}

#[test]
fn test_column_options_rename_and_disable() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("Tag", "blog.models")
            .attr("label", Column::string(32))
            .meta(
                MetaDef::new()
                    .set("pk", "tag_id")
                    .set("created_at", false)
                    .set("updated_at", MetaValue::None),
            ),
    );
    let mapped = registry.finalize().unwrap();
    assert_eq!(mapped["Tag"].column_names(), ["tag_id", "label"]);
}

#[test]
fn test_existing_attribute_is_not_replaced() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("Event", "calendar.models").attr("created_at", Column::text()),
    );
    let mapped = registry.finalize().unwrap();
    let column = mapped["Event"]
        .table
        .as_ref()
        .and_then(|t| t.column("created_at"))
        .unwrap();
    assert_eq!(column.column.ty, ColumnType::Text);
}

#[test]
fn test_unknown_meta_option_names_model_and_option() {
    let mut registry = ModelRegistry::new();
    let err = registry
        .declare(ModelDef::new("Foo", "app.models").meta(MetaDef::new().set("bogus", "1")))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "unknown Meta option(s) bogus on app.models.Foo"
    );
}

#[test]
fn test_underscore_meta_attributes_are_ignored() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("Foo", "app.models").meta(MetaDef::new().set("_private", true)),
    );
}

#[test]
fn test_invalid_meta_values_are_rejected() {
    let mut registry = ModelRegistry::new();
    let err = registry
        .declare(ModelDef::new("Foo", "app.models").meta(MetaDef::new().set("polymorphic", "concrete")))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMetaOption { ref option, .. } if option == "polymorphic"));

    let err = registry
        .declare(ModelDef::new("Bar", "app.models").meta(MetaDef::new().set("abstract", "yes")))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMetaOption { ref option, .. } if option == "abstract"));
}

#[test]
fn test_abstract_marker_attribute_is_rejected() {
    let mut registry = ModelRegistry::new();
    let err = registry
        .declare(ModelDef::new("Base", "app.models").attr("__abstract__", Attr::Value(json!(true))))
        .unwrap_err();
    assert!(matches!(err, Error::AbstractMarker { .. }));
}

#[test]
fn test_abstract_models_are_not_mapped_but_share_columns() {
    let mut registry = ModelRegistry::new();
    let base = declare(
        &mut registry,
        ModelDef::new("Timestamped", "core.models")
            .attr("deleted", Column::boolean())
            .meta(MetaDef::new().set("abstract", true)),
    );
    assert!(base.is_abstract());
    assert!(base.clsdict().tablename.is_none());
    assert!(!base.clsdict().contains("id"));

    declare(
        &mut registry,
        ModelDef::new("Post", "blog.models")
            .extends(base)
            .attr("title", Column::string(255)),
    );
    let mapped = registry.finalize().unwrap();
    assert!(!mapped.contains_key("Timestamped"));
    assert_eq!(
        mapped["Post"].column_names(),
        ["deleted", "id", "title", "created_at", "updated_at"]
    );
    // abstract is never inherited
    assert!(!mapped["Post"].class.meta().unwrap().is_abstract());
}

#[test]
fn test_factory_requires_abstract_first() {
    let err = MetaOptionsFactory::new(vec![Box::new(TableMetaOption)]).unwrap_err();
    assert!(matches!(err, Error::AbstractOptionNotFirst { found } if found == "table"));
    assert!(MetaOptionsFactory::new(model_meta_options()).is_ok());
}

#[test]
fn test_single_option_factory_under_test() {
    let factory = MetaOptionsFactory::new_unchecked(vec![Box::new(TableMetaOption)]);
    let metaclass = std::sync::Arc::new(Metaclass::new("Test", MetaOptionsFactory::model_defaults()));
    let mut mcs_args = McsArgs {
        mcs: metaclass,
        name: "LineItem".to_owned(),
        bases: Vec::new(),
        clsdict: ClassDict {
            module: "shop.models".to_owned(),
            ..ClassDict::default()
        },
    };
    let meta = factory.apply(&mut mcs_args).unwrap();
    assert_eq!(meta.table(), Some("line_item"));
    assert_eq!(mcs_args.clsdict.tablename.as_deref(), Some("line_item"));
}

#[test]
fn test_override_by_name_converts_to_mixin() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("Foo", "vendor.models")
            .extends("Model")
            .method("greeting", |_| Ok(json!("hello from vendor"))),
    );
    let foo = declare(
        &mut registry,
        ModelDef::new("Foo", "override.models")
            .extends("Model")
            .attr("name", Column::string(64)),
    );
    assert_eq!(foo.base_names(), ["Foo_override_Mixin_of_vendor", "Model"]);
    assert_eq!(registry.versions("Foo"), ["vendor.models", "override.models"]);

    let mapped = registry.finalize().unwrap();
    assert_eq!(mapped.len(), 1);
    let foo = &mapped["Foo"];
    assert_eq!(foo.class.module(), "override.models");
    assert!(foo.column_names().contains(&"id"));
    assert!(foo.column_names().contains(&"name"));
    // behavior of the shadowed version survives
    let greeting = foo.call("greeting", &Row::new()).unwrap().unwrap();
    assert_eq!(greeting, json!("hello from vendor"));
}

#[test]
fn test_extending_registered_model_converts_it() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("User", "security.models").attr("email", Column::string(255)),
    );
    let user = declare(
        &mut registry,
        ModelDef::new("User", "app.models")
            .extends("User")
            .attr("nickname", Column::string(64)),
    );
    assert_eq!(user.base_names(), ["User_app_Mixin_of_security", "Model"]);

    let mapped = registry.finalize().unwrap();
    assert_eq!(
        mapped["User"].column_names(),
        ["id", "email", "created_at", "updated_at", "nickname"]
    );
}

#[test]
fn test_foreign_keys_and_relationships_are_deferred_in_mixins() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("Author", "blog.models")
            .attr("posts", Relationship::new("Post").back_populates("author")),
    );
    declare(
        &mut registry,
        ModelDef::new("Post", "blog.models")
            .attr("author_id", Column::integer().foreign_key("author.id"))
            .attr("author", Relationship::new("Author").back_populates("posts"))
            .attr("title", Column::string(255)),
    );
    let post = declare(
        &mut registry,
        ModelDef::new("Post", "app.models").attr("subtitle", Column::string(255)),
    );

    let mixin = &post.bases()[0];
    assert_eq!(mixin.kind(), ClassKind::Mixin);
    let attrs = &mixin.clsdict().attrs;
    assert!(attrs["author_id"].is_declared());
    assert!(attrs["author"].is_declared());
    assert!(!attrs["title"].is_declared());

    let mapped = registry.finalize().unwrap();
    let post = &mapped["Post"];
    assert_eq!(
        post.table.as_ref().unwrap().column("author_id").unwrap().column.foreign_key.as_deref(),
        Some("author.id")
    );
    assert_eq!(post.relationships["author"].target, "Author");
}

#[test]
fn test_multiple_roots_keep_declared_order() {
    let mut registry = ModelRegistry::new();
    let a = declare(&mut registry, ModelDef::new("A", "one.models"));
    let b = declare(&mut registry, ModelDef::new("B", "one.models"));
    let c = declare(&mut registry, ModelDef::new("C", "one.models"));
    let d = declare(
        &mut registry,
        ModelDef::new("D", "two.models").extends(a).extends(b).extends(c),
    );
    assert_eq!(
        d.base_names(),
        [
            "A_two_Mixin_of_one",
            "B_two_Mixin_of_one",
            "C_two_Mixin_of_one",
            "Model"
        ]
    );
}

#[test]
fn test_diamond_converts_each_base_once() {
    let mut registry = ModelRegistry::new();
    let a = declare(
        &mut registry,
        ModelDef::new("A", "one.models")
            .attr("a", Column::integer())
            .meta(MetaDef::new().set("abstract", true)),
    );
    let b = declare(&mut registry, ModelDef::new("B", "one.models").extends(a.clone()));
    let c = declare(&mut registry, ModelDef::new("C", "one.models").extends(a));
    let d = declare(
        &mut registry,
        ModelDef::new("D", "two.models").extends(b).extends(c),
    );
    assert_eq!(
        d.base_names(),
        ["B_two_Mixin_of_one", "C_two_Mixin_of_one", "Model"]
    );
    let b_mixin = &d.bases()[0];
    let c_mixin = &d.bases()[1];
    assert!(std::sync::Arc::ptr_eq(&b_mixin.bases()[0], &c_mixin.bases()[0]));

    let mro: Vec<_> = d.mro().into_iter().map(ModelClass::name).collect();
    assert_eq!(
        mro,
        [
            "D",
            "B_two_Mixin_of_one",
            "C_two_Mixin_of_one",
            "A_one_Mixin_of_one",
            "Model"
        ]
    );
}

#[test]
fn test_polymorphic_base_and_subclass() {
    let mut registry = ModelRegistry::new();
    let base = declare(
        &mut registry,
        ModelDef::new("Base", "shapes.models").meta(
            MetaDef::new()
                .set("polymorphic", true)
                .set("table", "bases"),
        ),
    );
    assert_eq!(base.clsdict().tablename.as_deref(), Some("bases"));
    assert_eq!(base.clsdict().base_tablename, None);
    assert_eq!(
        base.clsdict().mapper_args.polymorphic_on.as_deref(),
        Some("discriminator")
    );

    let circle = declare(
        &mut registry,
        ModelDef::new("Circle", "shapes.models")
            .extends(base)
            .attr("radius", Column::integer()),
    );
    assert_eq!(circle.clsdict().base_tablename.as_deref(), Some("bases"));
    assert_eq!(
        circle.clsdict().mapper_args.polymorphic_identity.as_deref(),
        Some("Circle")
    );
    assert_eq!(circle.clsdict().mapper_args.polymorphic_on, None);
    // polymorphic models never convert their bases
    assert_eq!(circle.base_names(), ["Base"]);

    let mapped = registry.finalize().unwrap();
    let circle = &mapped["Circle"];
    assert_eq!(circle.inherits.as_deref(), Some("Base"));
    assert_eq!(circle.table_name(), Some("circle"));
    assert_eq!(circle.column_names(), ["id", "radius"]);
    let pk = circle.table.as_ref().unwrap().column("id").unwrap();
    assert_eq!(pk.column.foreign_key.as_deref(), Some("bases.id"));

    let base = &mapped["Base"];
    assert!(base.column_names().contains(&"discriminator"));
    assert_eq!(base.mapper_args.polymorphic_identity.as_deref(), Some("Base"));
}

#[test]
fn test_single_table_polymorphism_shares_base_table() {
    let mut registry = ModelRegistry::new();
    let base = declare(
        &mut registry,
        ModelDef::new("Vehicle", "garage.models")
            .meta(MetaDef::new().set("polymorphic", "single")),
    );
    declare(
        &mut registry,
        ModelDef::new("Truck", "garage.models")
            .extends(base)
            .meta(MetaDef::new().set("polymorphic_identity", "truck")),
    );
    let mapped = registry.finalize().unwrap();
    let truck = &mapped["Truck"];
    assert_eq!(truck.table, None);
    assert_eq!(truck.inherits.as_deref(), Some("Vehicle"));
    assert_eq!(truck.mapper_args.polymorphic_identity.as_deref(), Some("truck"));
}

#[test]
fn test_single_table_subclass_columns_live_in_base_table() {
    let mut registry = ModelRegistry::new();
    let base = declare(
        &mut registry,
        ModelDef::new("Vehicle", "garage.models")
            .attr("wheels", Column::integer())
            .meta(MetaDef::new().set("polymorphic", "single")),
    );
    let truck = declare(
        &mut registry,
        ModelDef::new("Truck", "garage.models")
            .extends(base)
            .attr("payload", Column::integer()),
    );
    declare(
        &mut registry,
        ModelDef::new("DumpTruck", "garage.models")
            .extends(truck)
            .attr("bed_volume", Column::integer())
            .attr("payload", Column::integer().not_null()),
    );
    let mapped = registry.finalize().unwrap();

    let columns: Vec<String> = mapped["Vehicle"]
        .column_names()
        .into_iter()
        .map(str::to_owned)
        .collect();
    assert_eq!(&columns[columns.len() - 2..], ["payload", "bed_volume"]);
    assert!(columns.iter().any(|c| c == "wheels"));
    assert!(columns.iter().any(|c| c == "discriminator"));
    assert_eq!(mapped["Truck"].table, None);
    assert_eq!(mapped["DumpTruck"].inherits.as_deref(), Some("Truck"));

    // finalizing again does not duplicate the shared columns
    let again = registry.finalize().unwrap();
    assert_eq!(again["Vehicle"].column_names(), columns);
}

#[test]
fn test_relationship_expectations_are_checked_at_finalize() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("Post", "blog.models")
            .attr("author", Relationship::new("Author").back_populates("posts")),
    );
    declare(&mut registry, ModelDef::new("Author", "blog.models"));
    assert_eq!(
        registry.relationships("Post").unwrap()["Author"],
        "posts"
    );
    let err = registry.finalize().unwrap_err();
    assert!(
        matches!(err, Error::IncompleteRelationship { ref related, ref attr, .. } if related == "Author" && attr == "posts"),
        "{err}"
    );
}

#[test]
fn test_later_version_completes_relationship() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("Post", "blog.models")
            .attr("author", Relationship::new("Author").back_populates("posts")),
    );
    declare(&mut registry, ModelDef::new("Author", "blog.models"));
    declare(
        &mut registry,
        ModelDef::new("Author", "app.models")
            .attr("posts", Relationship::new("Post").back_populates("author")),
    );
    let mapped = registry.finalize().unwrap();
    assert_eq!(mapped["Author"].class.module(), "app.models");
}

#[test]
fn test_relationship_to_unregistered_model_fails() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("Post", "blog.models")
            .meta(MetaDef::new().set("relationships", [("Author", "posts")].into_iter().collect::<MetaValue>())),
    );
    let err = registry.finalize().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Post declares a relationship with Author, but no model named Author was registered"
    );
}

#[test]
fn test_backref_on_lazy_model_is_rejected() {
    let mut registry = ModelRegistry::new();
    let err = registry
        .declare(
            ModelDef::new("Post", "blog.models")
                .attr("author", Relationship::new("Author").backref("posts")),
        )
        .unwrap_err();
    assert!(matches!(err, Error::LazyBackref { ref attr, .. } if attr == "author"));

    // eager models may use backrefs
    declare(
        &mut registry,
        ModelDef::new("Author", "blog.models").meta(MetaDef::new().set("lazy_mapped", false)),
    );
    declare(
        &mut registry,
        ModelDef::new("Comment", "blog.models")
            .attr("author", Relationship::new("Author").backref("comments"))
            .meta(MetaDef::new().set("lazy_mapped", false)),
    );
    assert!(registry.is_initialized("Comment"));
}

#[test]
fn test_eager_model_is_mapped_at_declaration() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("Setting", "core.models").meta(MetaDef::new().set("lazy_mapped", false)),
    );
    assert!(registry.is_initialized("Setting"));
    assert!(registry.mapped_model("Setting").is_some());
}

#[test]
fn test_mapping_hooks_run_in_order() {
    use std::sync::{Arc, Mutex};

    let calls = Arc::new(Mutex::new(Vec::new()));
    let before = Arc::clone(&calls);
    let after = Arc::clone(&calls);
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("Audit", "core.models")
            .before_mapping(move |cls| {
                before.lock().unwrap().push(format!("before {}", cls.name()));
                Ok(())
            })
            .after_mapping(move |cls| {
                after.lock().unwrap().push(format!("after {}", cls.name()));
                Ok(())
            }),
    );
    registry.finalize().unwrap();
    assert_eq!(*calls.lock().unwrap(), ["before Audit", "after Audit"]);
}

#[test]
fn test_materialized_view_accepts_string() {
    let mut registry = ModelRegistry::new();
    declare(
        &mut registry,
        ModelDef::new("SalesReport", "reports.models").meta(MetaDef::new().set("mv_for", "orders")),
    );
    let mapped = registry.finalize().unwrap();
    assert!(mapped["SalesReport"].is_materialized_view());
    assert_eq!(mapped["SalesReport"].materialized_view_for, ["orders"]);
}

#[test]
fn test_custom_base_model_replaces_default() {
    let mut registry = ModelRegistry::new();
    let soft_delete = MetaOptionsFactory::model_defaults().with_option(Box::new(SoftDeleteOption));
    let base = registry.create_base_model("SoftModel", "app.orm", soft_delete);

    let foo = declare(
        &mut registry,
        ModelDef::new("Foo", "app.models")
            .extends("Model")
            .meta(MetaDef::new().set("soft_delete", true)),
    );
    assert!(std::sync::Arc::ptr_eq(&foo.bases()[0], &base));
    let mapped = registry.finalize().unwrap();
    assert!(mapped["Foo"].column_names().contains(&"deleted_at"));
}

#[test]
fn test_ambiguous_base_models() {
    let mut registry = ModelRegistry::new();
    let first = registry.create_base_model("First", "a.orm", MetaOptionsFactory::model_defaults());
    let old = declare(&mut registry, ModelDef::new("Old", "a.models"));
    assert!(std::sync::Arc::ptr_eq(&old.bases()[0], &first));

    registry.create_base_model("Second", "b.orm", MetaOptionsFactory::model_defaults());
    let err = registry
        .declare(
            ModelDef::new("New", "b.models")
                .extends(old)
                .meta(MetaDef::new().set("polymorphic", true)),
        )
        .unwrap_err();
    assert!(matches!(err, Error::AmbiguousBaseModel { .. }), "{err}");
}

#[test]
fn test_reset_then_replay_is_identical() {
    fn replay(registry: &mut ModelRegistry) -> Vec<(String, String, Vec<String>)> {
        declare(registry, ModelDef::new("Foo", "vendor.models").attr("a", Column::integer()));
        declare(registry, ModelDef::new("Foo", "app.models").attr("b", Column::integer()));
        declare(registry, ModelDef::new("Bar", "app.models"));
        registry
            .models()
            .iter()
            .map(|(name, init)| {
                (
                    name.clone(),
                    init.cls.qualname(),
                    init.cls.base_names().into_iter().map(str::to_owned).collect(),
                )
            })
            .collect()
    }

    let mut registry = ModelRegistry::new();
    let first = replay(&mut registry);
    registry.reset();
    assert!(registry.models().is_empty());
    let second = replay(&mut registry);
    assert_eq!(first, second);
}

#[derive(Debug)]
struct SoftDeleteOption;

impl MetaOption for SoftDeleteOption {
    fn name(&self) -> &str {
        "soft_delete"
    }

    fn default_value(&self) -> MetaValue {
        MetaValue::Bool(false)
    }

    fn inherit(&self) -> bool {
        true
    }

    fn contribute_to_class(&self, mcs_args: &mut McsArgs, value: &MetaValue) -> crate::Result<()> {
        if value.is_truthy() && !mcs_args.is_abstract() {
            mcs_args
                .clsdict
                .attrs
                .insert("deleted_at".to_owned(), Attr::Column(Column::datetime()));
        }
        Ok(())
    }
}
