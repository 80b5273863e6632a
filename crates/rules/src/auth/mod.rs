//! Authorization rules.
//!
//! Authorization is the yes/no sibling of validation: rules are registered
//! per type and per [`AuthorizationAction`], run in priority order, and their
//! decisions are combined with logical AND. An action with no rules is
//! allowed.

mod context;
mod engine;
pub mod rules;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use context::AuthorizationContext;
pub use engine::AuthorizationEngine;
pub use rules::{IsInRole, IsNotInRole};

use crate::descriptor::RuleId;
use crate::error::{Result, RuleError, RuleFault};
use crate::property::PropertyInfo;

/// Operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorizationAction {
    /// Read a property.
    ReadProperty,
    /// Write a property.
    WriteProperty,
    /// Invoke a method.
    ExecuteMethod,
    /// Create an instance of the type.
    CreateObject,
    /// Fetch an instance of the type.
    GetObject,
    /// Save changes to an instance.
    EditObject,
    /// Delete an instance.
    DeleteObject,
}

impl AuthorizationAction {
    /// Whether the action is about a member rather than the whole type.
    pub fn targets_member(self) -> bool {
        matches!(
            self,
            Self::ReadProperty | Self::WriteProperty | Self::ExecuteMethod
        )
    }
}

impl fmt::Display for AuthorizationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadProperty => "read-property",
            Self::WriteProperty => "write-property",
            Self::ExecuteMethod => "execute-method",
            Self::CreateObject => "create-object",
            Self::GetObject => "get-object",
            Self::EditObject => "edit-object",
            Self::DeleteObject => "delete-object",
        };
        f.write_str(s)
    }
}

/// The identity an authorization question is asked for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Principal {
    name: String,
    roles: Vec<String>,
    authenticated: bool,
}

impl Principal {
    /// Authenticated principal without roles.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
            authenticated: true,
        }
    }

    /// Unauthenticated principal with an empty name.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Add a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Principal name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Roles held by the principal.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Whether the principal has authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Whether the principal holds `role`.
    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Immutable metadata of an authorization rule.
#[derive(Debug, Clone)]
pub struct AuthorizationRuleDescriptor {
    id: RuleId,
    action: AuthorizationAction,
    element: Option<PropertyInfo>,
    priority: i32,
    cache_result: bool,
}

impl AuthorizationRuleDescriptor {
    /// Start describing a rule called `name` for `action`.
    pub fn builder(
        name: impl Into<String>,
        action: AuthorizationAction,
    ) -> AuthorizationRuleDescriptorBuilder {
        AuthorizationRuleDescriptorBuilder {
            name: name.into(),
            action,
            element: None,
            priority: 0,
            cache_result: true,
            args: Vec::new(),
        }
    }

    /// Rule identity.
    pub fn id(&self) -> &RuleId {
        &self.id
    }

    /// Action the rule answers for.
    pub fn action(&self) -> AuthorizationAction {
        self.action
    }

    /// Member the rule answers for, `None` for type-level actions.
    pub fn element(&self) -> Option<PropertyInfo> {
        self.element
    }

    /// Lower runs first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether the decision may be cached per principal.
    pub fn cache_result(&self) -> bool {
        self.cache_result
    }

    pub(crate) fn matches(&self, action: AuthorizationAction, element: Option<PropertyInfo>) -> bool {
        self.action == action && self.element == element
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match (self.action.targets_member(), self.element.is_some()) {
            (true, false) => Err(RuleError::Config(format!(
                "authorization rule '{}' for {} needs a member",
                self.id, self.action
            ))),
            (false, true) => Err(RuleError::Config(format!(
                "authorization rule '{}' for {} cannot target a member",
                self.id, self.action
            ))),
            _ => Ok(()),
        }
    }
}

/// Builder for [`AuthorizationRuleDescriptor`].
#[derive(Debug, Clone)]
pub struct AuthorizationRuleDescriptorBuilder {
    name: String,
    action: AuthorizationAction,
    element: Option<PropertyInfo>,
    priority: i32,
    cache_result: bool,
    args: Vec<(String, String)>,
}

impl AuthorizationRuleDescriptorBuilder {
    /// Member the rule applies to.
    pub fn element(mut self, element: impl Into<PropertyInfo>) -> Self {
        self.element = Some(element.into());
        self
    }

    /// Lower runs first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Allow caching the decision per principal. On by default.
    pub fn cache_result(mut self, cache_result: bool) -> Self {
        self.cache_result = cache_result;
        self
    }

    /// Add an argument to the rule URI.
    pub fn arg(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.args.push((key.into(), value.to_string()));
        self
    }

    /// Freeze the descriptor.
    pub fn build(self) -> AuthorizationRuleDescriptor {
        let id = self.args.iter().fold(
            RuleId::new(&self.name, self.element.as_ref()).with_arg("action", self.action),
            |id, (k, v)| id.with_arg(k, v),
        );
        AuthorizationRuleDescriptor {
            id,
            action: self.action,
            element: self.element,
            priority: self.priority,
            cache_result: self.cache_result,
        }
    }
}

/// Authorization rule body.
///
/// A rule denies through [`AuthorizationContext::deny`]; returning without a
/// decision allows. Returning `Err` denies as well, except for configuration
/// faults, which surface to the caller.
#[async_trait]
pub trait AuthorizationRule: Send + Sync {
    /// Decide.
    async fn execute(&self, ctx: &mut AuthorizationContext<'_>) -> std::result::Result<(), RuleFault>;
}

/// Registered authorization rule.
#[derive(Clone)]
pub struct AuthorizationRuleEntry {
    descriptor: Arc<AuthorizationRuleDescriptor>,
    rule: Arc<dyn AuthorizationRule>,
}

impl AuthorizationRuleEntry {
    /// Pair a descriptor with a body.
    pub fn new(descriptor: AuthorizationRuleDescriptor, rule: impl AuthorizationRule + 'static) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            rule: Arc::new(rule),
        }
    }

    /// Rule metadata.
    pub fn descriptor(&self) -> &AuthorizationRuleDescriptor {
        &self.descriptor
    }

    /// Rule identity.
    pub fn id(&self) -> &RuleId {
        self.descriptor.id()
    }

    pub(crate) fn rule(&self) -> &Arc<dyn AuthorizationRule> {
        &self.rule
    }
}

impl fmt::Debug for AuthorizationRuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRuleEntry")
            .field("id", self.id())
            .field("priority", &self.descriptor.priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALARY: PropertyInfo = PropertyInfo::new("Employee", "Salary");

    #[test]
    fn principal_roles() {
        let p = Principal::new("ada").with_role("admin");
        assert!(p.is_authenticated());
        assert!(p.is_in_role("admin"));
        assert!(!p.is_in_role("guest"));
        assert!(!Principal::anonymous().is_authenticated());
    }

    #[test]
    fn descriptor_id_carries_action() {
        let d = AuthorizationRuleDescriptor::builder("is_in_role", AuthorizationAction::ReadProperty)
            .element(SALARY)
            .arg("roles", "hr")
            .build();
        assert_eq!(
            d.id().as_str(),
            "rule://is_in_role/Employee.Salary?action=read-property&roles=hr"
        );
        assert!(d.cache_result());
    }

    #[test]
    fn member_actions_need_a_member() {
        let missing = AuthorizationRuleDescriptor::builder("r", AuthorizationAction::WriteProperty).build();
        assert!(matches!(missing.validate(), Err(RuleError::Config(_))));

        let extra = AuthorizationRuleDescriptor::builder("r", AuthorizationAction::DeleteObject)
            .element(SALARY)
            .build();
        assert!(extra.validate().is_err());

        let ok = AuthorizationRuleDescriptor::builder("r", AuthorizationAction::EditObject).build();
        assert!(ok.validate().is_ok());
    }
}
