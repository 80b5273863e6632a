//! The view an authorization rule gets of the question it is deciding.

use std::fmt;
use std::sync::Arc;

use super::AuthorizationAction;
use super::Principal;
use super::engine::{Evaluation, Permission};
use crate::error::Result;
use crate::object::BusinessObject;
use crate::property::PropertyInfo;

/// What an authorization rule sees.
pub struct AuthorizationContext<'a> {
    pub(super) evaluation: &'a Evaluation<'a>,
    pub(super) permission: Permission,
    pub(super) chain: Vec<Permission>,
    pub(super) allowed: bool,
    pub(super) reason: Option<String>,
}

impl<'a> AuthorizationContext<'a> {
    /// Who is asking.
    pub fn principal(&self) -> &'a Principal {
        self.evaluation.principal
    }

    /// What is being asked.
    pub fn action(&self) -> AuthorizationAction {
        self.permission.action
    }

    /// Member being asked about, `None` for type-level actions.
    pub fn element(&self) -> Option<PropertyInfo> {
        self.permission.element
    }

    /// The instance, when the question is about one.
    pub fn target(&self) -> Option<&'a Arc<dyn BusinessObject>> {
        self.evaluation.target.as_ref()
    }

    /// Grant. This is also the outcome when a rule decides nothing.
    pub fn allow(&mut self) {
        self.allowed = true;
        self.reason = None;
    }

    /// Refuse with a reason.
    pub fn deny(&mut self, reason: impl Into<String>) {
        self.allowed = false;
        self.reason = Some(reason.into());
    }

    /// Current decision.
    pub fn has_permission(&self) -> bool {
        self.allowed
    }

    /// Reason given by [`deny`](Self::deny).
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Ask the rules of another action or member of the same type.
    ///
    /// Asking for a permission that is already being evaluated further up
    /// the chain fails with [`RuleError::AuthorizationCycle`].
    ///
    /// [`RuleError::AuthorizationCycle`]: crate::error::RuleError::AuthorizationCycle
    pub async fn require(
        &self,
        action: AuthorizationAction,
        element: Option<PropertyInfo>,
    ) -> Result<bool> {
        let mut chain = self.chain.clone();
        chain.push(self.permission);
        self.evaluation
            .evaluate(Permission { action, element }, chain)
            .await
    }
}

impl fmt::Debug for AuthorizationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationContext")
            .field("principal", &self.principal().name())
            .field("action", &self.permission.action)
            .field("element", &self.permission.element)
            .field("allowed", &self.allowed)
            .finish()
    }
}
