use std::collections::HashSet;
use std::fmt;

use crate::domain::{Role, User};
use crate::error::RelayError;
use crate::SubjectId;

/// What a subject must be to enter a workflow or browsing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// A registered user holding exactly this role.
    Role(Role),
    /// A configured admin id, or a user whose role is admin.
    Admin,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Role(role) => write!(f, "{role}"),
            Requirement::Admin => f.write_str("admin"),
        }
    }
}

/// Single place where role checks are made.
#[derive(Debug, Clone, Default)]
pub struct AccessGuard {
    admin_ids: HashSet<SubjectId>,
}

impl AccessGuard {
    pub fn new(admin_ids: impl IntoIterator<Item = SubjectId>) -> Self {
        Self {
            admin_ids: admin_ids.into_iter().collect(),
        }
    }

    pub fn is_admin(&self, subject_id: SubjectId, user: Option<&User>) -> bool {
        self.admin_ids.contains(&subject_id) || user.is_some_and(|u| u.role == Role::Admin)
    }

    pub fn allows(&self, subject_id: SubjectId, user: Option<&User>, requirement: Requirement) -> bool {
        match requirement {
            Requirement::Admin => self.is_admin(subject_id, user),
            Requirement::Role(role) => user.is_some_and(|u| u.is_registered && u.role == role),
        }
    }

    pub fn check(
        &self,
        subject_id: SubjectId,
        user: Option<&User>,
        requirement: Requirement,
    ) -> Result<(), RelayError> {
        if self.allows(subject_id, user, requirement) {
            Ok(())
        } else {
            tracing::debug!(subject_id = %subject_id, requirement = %requirement, "Access denied");
            Err(RelayError::Permission {
                required: requirement.to_string(),
            })
        }
    }
}
