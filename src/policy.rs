// 🛡️ Authorization Policy - capability check at the API boundary
//
// (actor, action, resource) -> Allow | Deny(reason)
//
// The ledger itself never consults a policy. The HTTP layer resolves the
// resource a request touches (usually the owning office) and asks first.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entities::OfficeId;
use crate::error::{AipError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    Admin,
    #[default]
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    /// Unknown roles fall back to `Member`.
    pub fn parse(value: &str) -> Role {
        if value.trim().eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Member
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub office_id: Option<OfficeId>,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, office_id: Option<OfficeId>, role: Role) -> Self {
        Actor {
            id: id.into(),
            office_id,
            role,
        }
    }

    pub fn anonymous() -> Self {
        Actor::new("anonymous", None, Role::Member)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Read,
    ManageFiscalYear,
    CreatePpa,
    DeletePpa,
    SetPpaActive,
    CreateEntry,
    UpdateEntry,
    DeleteEntry,
    CreatePlan,
    AttachPlanItem,
    DetachPlanItem,
}

impl Action {
    pub fn is_read(&self) -> bool {
        matches!(self, Action::Read)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resource {
    /// Anything not owned by a single office
    Global,
    FiscalYear,
    Office(OfficeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// `Forbidden` on deny.
    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(AipError::Forbidden(reason)),
        }
    }
}

pub trait Policy: Send + Sync {
    fn check(&self, actor: &Actor, action: Action, resource: &Resource) -> Decision;

    /// Check and log denials.
    fn authorize(&self, actor: &Actor, action: Action, resource: &Resource) -> Result<()> {
        let decision = self.check(actor, action, resource);
        if let Decision::Deny(reason) = &decision {
            warn!(actor = %actor.id, ?action, ?resource, reason = %reason, "request denied by policy");
        }
        decision.into_result()
    }
}

// ============================================================================
// IMPLEMENTATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Policy for AllowAll {
    fn check(&self, _actor: &Actor, _action: Action, _resource: &Resource) -> Decision {
        Decision::Allow
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl Policy for DenyAll {
    fn check(&self, _actor: &Actor, action: Action, _resource: &Resource) -> Decision {
        Decision::Deny(format!("{:?} is not permitted", action))
    }
}

/// Reads are open. Fiscal-year administration needs the admin role. Every
/// other mutation is limited to the actor's own office (admins may act on
/// any office).
#[derive(Debug, Clone, Copy, Default)]
pub struct OfficeScoped;

impl Policy for OfficeScoped {
    fn check(&self, actor: &Actor, action: Action, resource: &Resource) -> Decision {
        if action.is_read() {
            return Decision::Allow;
        }

        if action == Action::ManageFiscalYear || *resource == Resource::FiscalYear {
            return if actor.is_admin() {
                Decision::Allow
            } else {
                Decision::Deny("fiscal year administration requires the admin role".to_string())
            };
        }

        if actor.is_admin() {
            return Decision::Allow;
        }

        match (resource, &actor.office_id) {
            (Resource::Office(owner), Some(own)) if owner == own => Decision::Allow,
            (Resource::Office(owner), Some(own)) => {
                Decision::Deny(format!("office {} cannot modify data of office {}", own, owner))
            }
            (Resource::Office(_), None) => Decision::Deny("actor has no office".to_string()),
            (_, _) => Decision::Deny(format!("{:?} requires an office-owned resource", action)),
        }
    }
}
