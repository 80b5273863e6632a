//! Integration tests for type and instance authorization.

use std::sync::Arc;

use async_trait::async_trait;
use corvid_rules::prelude::*;
use corvid_rules::Result;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Test domain
// ---------------------------------------------------------------------------

const TITLE: PropertyInfo = PropertyInfo::new("Document", "Title");
const OWNER: Property<String> = Property::new("Document", "Owner");
const PUBLISH: PropertyInfo = PropertyInfo::new("Document", "Publish");

#[derive(Default)]
struct Document {
    values: PropertyBag,
}

impl BusinessObject for Document {
    fn read_property(&self, property: &PropertyInfo) -> Option<Value> {
        self.values.read(property)
    }

    fn write_property(&self, property: &PropertyInfo, value: Value) -> Result<()> {
        self.values.store(property, value);
        Ok(())
    }

    fn declare_rules(rules: &mut RuleSetBuilder) -> Result<()> {
        rules.add_authorization(IsInRole::entry(
            AuthorizationAction::WriteProperty,
            Some(TITLE),
            ["editor"],
        ))?;
        rules.add_authorization(IsNotInRole::entry(
            AuthorizationAction::DeleteObject,
            None,
            ["guest"],
        ))?;
        rules.add_authorization(AuthorizationRuleEntry::new(
            AuthorizationRuleDescriptor::builder("owner_only", AuthorizationAction::EditObject).build(),
            OwnerOnly,
        ))?;
        rules.add_authorization(AuthorizationRuleEntry::new(
            AuthorizationRuleDescriptor::builder(
                "requires_title_write",
                AuthorizationAction::ExecuteMethod,
            )
            .element(PUBLISH)
            .build(),
            RequiresTitleWrite,
        ))?;
        Ok(())
    }
}

/// Only the principal named in `Owner` may edit; type-level questions are denied.
struct OwnerOnly;

#[async_trait]
impl AuthorizationRule for OwnerOnly {
    async fn execute(&self, ctx: &mut AuthorizationContext<'_>) -> std::result::Result<(), RuleFault> {
        let owner = ctx.target().and_then(|t| t.read_property(&OWNER.info()));
        match owner {
            Some(Value::String(owner)) if owner == ctx.principal().name() => ctx.allow(),
            Some(_) => ctx.deny("not the owner"),
            None => ctx.deny("no instance"),
        }
        Ok(())
    }
}

/// Publishing needs the right to edit the title.
struct RequiresTitleWrite;

#[async_trait]
impl AuthorizationRule for RequiresTitleWrite {
    async fn execute(&self, ctx: &mut AuthorizationContext<'_>) -> std::result::Result<(), RuleFault> {
        let can_edit = ctx
            .require(AuthorizationAction::WriteProperty, Some(TITLE))
            .await?;
        if !can_edit {
            ctx.deny("title is read-only");
        }
        Ok(())
    }
}

fn engine() -> (Arc<RuleRegistry>, AuthorizationEngine) {
    let registry = Arc::new(RuleRegistry::new());
    let engine = AuthorizationEngine::new(Arc::clone(&registry));
    (registry, engine)
}

fn owned_by(name: &str) -> Arc<Document> {
    let document = Arc::new(Document::default());
    document.values.set(&OWNER, name.to_string()).unwrap();
    document
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unguarded_actions_are_allowed() {
    let (_registry, engine) = engine();
    let anonymous = Principal::anonymous();

    assert!(engine.can_create::<Document>(&anonymous).await.unwrap());
    assert!(engine.can_get::<Document>(&anonymous).await.unwrap());
    assert!(
        engine
            .can_read_property::<Document>(&anonymous, TITLE)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn role_rules_decide_member_access() {
    let (_registry, engine) = engine();
    let editor = Principal::new("ada").with_role("editor");
    let reader = Principal::new("bob").with_role("reader");

    assert!(engine.can_write_property::<Document>(&editor, TITLE).await.unwrap());
    assert!(!engine.can_write_property::<Document>(&reader, TITLE).await.unwrap());
}

#[tokio::test]
async fn excluded_role_cannot_delete() {
    let (_registry, engine) = engine();
    let guest = Principal::new("eve").with_role("guest");
    let member = Principal::new("ada").with_role("member");

    assert!(!engine.can_delete::<Document>(&guest).await.unwrap());
    assert!(engine.can_delete::<Document>(&member).await.unwrap());
}

#[tokio::test]
async fn instance_rules_see_the_target() {
    let (_registry, engine) = engine();
    let own = owned_by("ada");
    let other = owned_by("bob");
    let ada = Principal::new("ada");

    assert!(
        engine
            .is_authorized(&own, &ada, AuthorizationAction::EditObject, None)
            .await
            .unwrap()
    );
    assert!(
        !engine
            .is_authorized(&other, &ada, AuthorizationAction::EditObject, None)
            .await
            .unwrap()
    );
    assert_eq!(engine.cached_decisions(), 0);
}

#[tokio::test]
async fn type_level_decision_does_not_leak_into_instances() {
    let (_registry, engine) = engine();
    let own = owned_by("ada");
    let other = owned_by("bob");
    let ada = Principal::new("ada");

    assert!(!engine.can_edit::<Document>(&ada).await.unwrap());
    assert_eq!(engine.cached_decisions(), 1);

    assert!(
        engine
            .is_authorized(&own, &ada, AuthorizationAction::EditObject, None)
            .await
            .unwrap()
    );
    assert!(
        !engine
            .is_authorized(&other, &ada, AuthorizationAction::EditObject, None)
            .await
            .unwrap()
    );
    assert_eq!(engine.cached_decisions(), 1);
}

#[tokio::test]
async fn delegated_permission_is_evaluated_and_cached() {
    let (_registry, engine) = engine();
    let editor = Principal::new("ada").with_role("editor");
    let anonymous = Principal::anonymous();

    assert!(engine.can_execute_method::<Document>(&editor, PUBLISH).await.unwrap());
    assert!(!engine.can_execute_method::<Document>(&anonymous, PUBLISH).await.unwrap());
    // publish and title write, for both principals
    assert_eq!(engine.cached_decisions(), 4);

    engine.clear_cache();
    assert_eq!(engine.cached_decisions(), 0);
}

#[tokio::test]
async fn member_actions_require_a_member() {
    let (_registry, engine) = engine();
    let err = engine
        .has_permission::<Document>(&Principal::anonymous(), AuthorizationAction::ReadProperty, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RuleError::Config(_)));
}

#[tokio::test]
async fn rules_are_locked_after_first_question() {
    let (registry, engine) = engine();
    engine
        .can_create::<Document>(&Principal::anonymous())
        .await
        .unwrap();

    let err = registry
        .register_authorization::<Document>(IsInRole::entry(
            AuthorizationAction::CreateObject,
            None,
            ["admin"],
        ))
        .unwrap_err();
    assert!(matches!(err, RuleError::Locked { .. }));
}
