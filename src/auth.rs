use crate::engine::SchedulingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Member,
}

/// An authenticated caller, as resolved by the identity provider.
#[derive(Debug, Clone)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(name: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            name: name.into(),
            roles,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self::new(name, vec![Role::Admin])
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Proof that the caller holds the Admin role. Every mutating engine operation takes one.
#[derive(Debug, Clone)]
pub struct Admin {
    name: String,
}

impl Admin {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub fn require_admin(principal: &Principal) -> Result<Admin, SchedulingError> {
    if principal.has_role(Role::Admin) {
        Ok(Admin {
            name: principal.name.clone(),
        })
    } else {
        tracing::warn!("{} denied: admin role required", principal.name);
        Err(SchedulingError::Forbidden)
    }
}
