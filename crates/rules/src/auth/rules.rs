//! Role based authorization rules.

use async_trait::async_trait;

use super::{
    AuthorizationAction, AuthorizationContext, AuthorizationRule, AuthorizationRuleDescriptor,
    AuthorizationRuleEntry,
};
use crate::error::RuleFault;
use crate::property::PropertyInfo;

/// Allows principals holding at least one of the roles. No roles allows everyone.
#[derive(Debug, Clone)]
pub struct IsInRole {
    roles: Vec<String>,
}

impl IsInRole {
    /// Rule body for `roles`.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Registered rule for `action` on `element`.
    pub fn entry<I, S>(
        action: AuthorizationAction,
        element: Option<PropertyInfo>,
        roles: I,
    ) -> AuthorizationRuleEntry
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rule = Self::new(roles);
        let descriptor = describe("is_in_role", action, element, &rule.roles);
        AuthorizationRuleEntry::new(descriptor, rule)
    }
}

#[async_trait]
impl AuthorizationRule for IsInRole {
    async fn execute(&self, ctx: &mut AuthorizationContext<'_>) -> Result<(), RuleFault> {
        let principal = ctx.principal();
        if self.roles.is_empty() || self.roles.iter().any(|r| principal.is_in_role(r)) {
            ctx.allow();
        } else {
            let reason = format!(
                "'{}' is not in any of the roles [{}]",
                principal.name(),
                self.roles.join(", ")
            );
            ctx.deny(reason);
        }
        Ok(())
    }
}

/// Denies principals holding any of the roles.
#[derive(Debug, Clone)]
pub struct IsNotInRole {
    roles: Vec<String>,
}

impl IsNotInRole {
    /// Rule body for `roles`.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Registered rule for `action` on `element`.
    pub fn entry<I, S>(
        action: AuthorizationAction,
        element: Option<PropertyInfo>,
        roles: I,
    ) -> AuthorizationRuleEntry
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rule = Self::new(roles);
        let descriptor = describe("is_not_in_role", action, element, &rule.roles);
        AuthorizationRuleEntry::new(descriptor, rule)
    }
}

#[async_trait]
impl AuthorizationRule for IsNotInRole {
    async fn execute(&self, ctx: &mut AuthorizationContext<'_>) -> Result<(), RuleFault> {
        let principal = ctx.principal();
        match self.roles.iter().find(|r| principal.is_in_role(r)) {
            Some(role) => {
                let reason = format!("'{}' is in the excluded role '{role}'", principal.name());
                ctx.deny(reason);
            }
            None => ctx.allow(),
        }
        Ok(())
    }
}

fn describe(
    name: &str,
    action: AuthorizationAction,
    element: Option<PropertyInfo>,
    roles: &[String],
) -> AuthorizationRuleDescriptor {
    let builder = AuthorizationRuleDescriptor::builder(name, action).arg("roles", roles.join(","));
    match element {
        Some(element) => builder.element(element).build(),
        None => builder.build(),
    }
}
