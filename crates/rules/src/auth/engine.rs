//! Authorization evaluation and the per-principal decision cache.
//!
//! Only type-level decisions are cached. A question about an instance may
//! depend on that instance's state, so it is always evaluated.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{AuthorizationAction, AuthorizationContext, AuthorizationRuleEntry, Principal};
use crate::config::AuthorizationConfig;
use crate::error::{Result, RuleError, RuleFault};
use crate::object::{BusinessObject, TypeKey};
use crate::property::PropertyInfo;
use crate::registry::{RuleRegistry, RuleSet};

/// An (action, member) pair under evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Permission {
    pub action: AuthorizationAction,
    pub element: Option<PropertyInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    type_key: TypeKey,
    permission: Permission,
    principal: PrincipalKey,
}

/// Everything about a principal that role rules can observe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PrincipalKey {
    name: String,
    authenticated: bool,
    roles: Vec<String>,
}

impl From<&Principal> for PrincipalKey {
    fn from(principal: &Principal) -> Self {
        let mut roles = principal.roles().to_vec();
        roles.sort_unstable();
        roles.dedup();
        Self {
            name: principal.name().to_string(),
            authenticated: principal.is_authenticated(),
            roles,
        }
    }
}

/// Answers "may this principal do X" for registered types.
///
/// Type-level decisions are cached per type, action, member and principal
/// (name, roles and authentication) when every rule involved allows it.
/// Instance-level questions are never served from or stored in the cache.
pub struct AuthorizationEngine {
    registry: Arc<RuleRegistry>,
    config: AuthorizationConfig,
    cache: DashMap<CacheKey, bool>,
}

impl AuthorizationEngine {
    /// Engine with default configuration.
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self::with_config(registry, AuthorizationConfig::default())
    }

    /// Engine with explicit configuration.
    pub fn with_config(registry: Arc<RuleRegistry>, config: AuthorizationConfig) -> Self {
        Self {
            registry,
            config,
            cache: DashMap::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    /// Type-level question; no instance is available to the rules.
    pub async fn has_permission<T: BusinessObject>(
        &self,
        principal: &Principal,
        action: AuthorizationAction,
        element: Option<PropertyInfo>,
    ) -> Result<bool> {
        self.evaluate_for::<T>(None, principal, Permission { action, element })
            .await
    }

    /// Instance-level question; rules can inspect `target`.
    pub async fn is_authorized<T: BusinessObject>(
        &self,
        target: &Arc<T>,
        principal: &Principal,
        action: AuthorizationAction,
        element: Option<PropertyInfo>,
    ) -> Result<bool> {
        let target: Arc<dyn BusinessObject> = Arc::clone(target) as Arc<dyn BusinessObject>;
        self.evaluate_for::<T>(Some(target), principal, Permission { action, element })
            .await
    }

    /// May `principal` read `property`.
    pub async fn can_read_property<T: BusinessObject>(
        &self,
        principal: &Principal,
        property: impl Into<PropertyInfo>,
    ) -> Result<bool> {
        let property = property.into();
        self.has_permission::<T>(principal, AuthorizationAction::ReadProperty, Some(property))
            .await
    }

    /// May `principal` write `property`.
    pub async fn can_write_property<T: BusinessObject>(
        &self,
        principal: &Principal,
        property: impl Into<PropertyInfo>,
    ) -> Result<bool> {
        let property = property.into();
        self.has_permission::<T>(principal, AuthorizationAction::WriteProperty, Some(property))
            .await
    }

    /// May `principal` invoke `method`.
    pub async fn can_execute_method<T: BusinessObject>(
        &self,
        principal: &Principal,
        method: impl Into<PropertyInfo>,
    ) -> Result<bool> {
        let method = method.into();
        self.has_permission::<T>(principal, AuthorizationAction::ExecuteMethod, Some(method))
            .await
    }

    /// May `principal` create instances of `T`.
    pub async fn can_create<T: BusinessObject>(&self, principal: &Principal) -> Result<bool> {
        self.has_permission::<T>(principal, AuthorizationAction::CreateObject, None)
            .await
    }

    /// May `principal` fetch instances of `T`.
    pub async fn can_get<T: BusinessObject>(&self, principal: &Principal) -> Result<bool> {
        self.has_permission::<T>(principal, AuthorizationAction::GetObject, None)
            .await
    }

    /// May `principal` save instances of `T`.
    pub async fn can_edit<T: BusinessObject>(&self, principal: &Principal) -> Result<bool> {
        self.has_permission::<T>(principal, AuthorizationAction::EditObject, None)
            .await
    }

    /// May `principal` delete instances of `T`.
    pub async fn can_delete<T: BusinessObject>(&self, principal: &Principal) -> Result<bool> {
        self.has_permission::<T>(principal, AuthorizationAction::DeleteObject, None)
            .await
    }

    /// Forget every cached decision.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of cached decisions.
    pub fn cached_decisions(&self) -> usize {
        self.cache.len()
    }

    async fn evaluate_for<T: BusinessObject>(
        &self,
        target: Option<Arc<dyn BusinessObject>>,
        principal: &Principal,
        permission: Permission,
    ) -> Result<bool> {
        if permission.action.targets_member() != permission.element.is_some() {
            return Err(RuleError::Config(format!(
                "{} {} a member",
                permission.action,
                if permission.element.is_some() {
                    "does not take"
                } else {
                    "requires"
                }
            )));
        }
        let rules = self.registry.resolve::<T>()?;
        let evaluation = Evaluation {
            engine: self,
            rules: &rules,
            principal,
            target,
        };
        evaluation.evaluate(permission, Vec::new()).await
    }
}

impl fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("config", &self.config)
            .field("cached_decisions", &self.cache.len())
            .finish()
    }
}

/// One top-level question and everything delegated from it.
pub(crate) struct Evaluation<'a> {
    engine: &'a AuthorizationEngine,
    rules: &'a RuleSet,
    pub(super) principal: &'a Principal,
    pub(super) target: Option<Arc<dyn BusinessObject>>,
}

impl<'a> Evaluation<'a> {
    pub(super) fn evaluate(
        &'a self,
        permission: Permission,
        chain: Vec<Permission>,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            let type_key = self.rules.type_key();
            if chain.contains(&permission) {
                return Err(RuleError::AuthorizationCycle {
                    type_name: type_key.name(),
                    action: permission.action.to_string(),
                    element: permission
                        .element
                        .map_or_else(|| "(type)".to_string(), |e| e.to_string()),
                });
            }

            let matched: Vec<&AuthorizationRuleEntry> = self
                .rules
                .authorization_rules(permission.action, permission.element)
                .collect();
            if matched.is_empty() {
                return Ok(true);
            }

            let config = &self.engine.config;
            let key = (config.cache_enabled
                && self.target.is_none()
                && matched.iter().all(|e| e.descriptor().cache_result()))
            .then(|| CacheKey {
                type_key,
                permission,
                principal: PrincipalKey::from(self.principal),
            });
            let cached = key
                .as_ref()
                .and_then(|k| self.engine.cache.get(k).map(|hit| *hit));
            if let Some(allowed) = cached {
                debug!(type_name = type_key.name(), action = %permission.action, allowed, "authorization cache hit");
                return Ok(allowed);
            }

            let mut allowed = true;
            for entry in matched {
                let mut ctx = AuthorizationContext {
                    evaluation: self,
                    permission,
                    chain: chain.clone(),
                    allowed: true,
                    reason: None,
                };
                let outcome = AssertUnwindSafe(entry.rule().execute(&mut ctx))
                    .catch_unwind()
                    .await;
                let granted = match outcome {
                    Ok(Ok(())) => ctx.allowed,
                    Ok(Err(RuleFault::Config(error))) => return Err(error),
                    Ok(Err(fault)) => {
                        warn!(rule = %entry.id(), error = %fault, "authorization rule failed, denying");
                        false
                    }
                    Err(_) => {
                        warn!(rule = %entry.id(), "authorization rule panicked, denying");
                        false
                    }
                };
                if !granted {
                    debug!(
                        rule = %entry.id(),
                        principal = self.principal.name(),
                        reason = ctx.reason.as_deref().unwrap_or(""),
                        "authorization denied"
                    );
                    allowed = false;
                    if config.short_circuit_on_deny {
                        break;
                    }
                }
            }

            if let Some(key) = key {
                self.engine.cache.insert(key, allowed);
            }
            Ok(allowed)
        }
        .boxed()
    }
}
