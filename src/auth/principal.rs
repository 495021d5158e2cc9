//! Principal model and permission checks.

use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use crate::directory::{DirectoryGroup, DirectoryUser};

pub const ADMINISTRATOR_GROUP: &str = "administrator";
pub const GENERAL_GROUP: &str = "general";

/// Attributes recognised but not mapped onto a principal field.
const IGNORED_ATTRIBUTES: [&str; 2] = ["sub", "email_verified"];

/// An authenticated identity resolved from the directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Principal {
    pub email: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub enabled: bool,
    pub group: String,
    /// Raw session reference, when the principal was resolved from or created a session.
    #[serde(skip)]
    pub session: Option<String>,
}

impl Principal {
    /// Build a principal from a directory record and its memberships.
    ///
    /// `email`, `given_name` and `family_name` are mapped explicitly. Anything
    /// else is dropped; unknown names are logged at debug level.
    #[must_use]
    pub fn from_directory(user: &DirectoryUser, memberships: &[DirectoryGroup]) -> Self {
        let mut principal = Self {
            email: user.username.clone(),
            given_name: None,
            family_name: None,
            enabled: user.enabled,
            group: resolve_group(memberships),
            session: None,
        };

        for attribute in &user.attributes {
            match attribute.name.as_str() {
                "email" => principal.email.clone_from(&attribute.value),
                "given_name" => principal.given_name = Some(attribute.value.clone()),
                "family_name" => principal.family_name = Some(attribute.value.clone()),
                name if IGNORED_ATTRIBUTES.contains(&name) => {}
                name => debug!(attribute = name, "Ignoring unmapped directory attribute"),
            }
        }

        principal
    }

    #[must_use]
    pub fn with_session(mut self, session: String) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        match (self.given_name.as_deref(), self.family_name.as_deref()) {
            (Some(given), Some(family)) => format!("{given} {family}"),
            (Some(name), None) | (None, Some(name)) => name.to_string(),
            (None, None) => self.email.clone(),
        }
    }
}

/// Collapse directory memberships to a single group label.
///
/// Lowest precedence wins, groups without precedence rank last, and the name
/// breaks any remaining tie. No memberships resolves to `general`.
#[must_use]
pub fn resolve_group(memberships: &[DirectoryGroup]) -> String {
    memberships
        .iter()
        .min_by(|left, right| {
            let rank = |group: &DirectoryGroup| (group.precedence.is_none(), group.precedence);
            rank(left)
                .cmp(&rank(right))
                .then_with(|| left.name.cmp(&right.name))
        })
        .map_or_else(|| GENERAL_GROUP.to_string(), |group| group.name.clone())
}

/// The caller of the current request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CurrentPrincipal {
    Anonymous,
    Authenticated(Principal),
}

impl CurrentPrincipal {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    #[must_use]
    pub fn is_member_of(&self, group: &str) -> bool {
        match self {
            Self::Anonymous => false,
            Self::Authenticated(principal) => principal.group == group,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.is_member_of(ADMINISTRATOR_GROUP)
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(principal) => Some(principal),
        }
    }

    #[must_use]
    pub fn into_principal(self) -> Option<Principal> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(principal) => Some(principal),
        }
    }
}

impl From<Principal> for CurrentPrincipal {
    fn from(principal: Principal) -> Self {
        Self::Authenticated(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::UserAttribute;

    fn user(attributes: Vec<UserAttribute>) -> DirectoryUser {
        DirectoryUser {
            username: "a@example.com".to_string(),
            enabled: true,
            status: Some("CONFIRMED".to_string()),
            attributes,
        }
    }

    #[test]
    fn no_memberships_resolves_to_general() {
        assert_eq!(resolve_group(&[]), GENERAL_GROUP);
    }

    #[test]
    fn tie_break_without_precedence_uses_name() {
        let groups = [
            DirectoryGroup::new("general"),
            DirectoryGroup::new("administrator"),
        ];
        assert_eq!(resolve_group(&groups), ADMINISTRATOR_GROUP);
    }

    #[test]
    fn lowest_precedence_wins() {
        let groups = [
            DirectoryGroup::new("administrator").with_precedence(10),
            DirectoryGroup::new("general").with_precedence(1),
        ];
        assert_eq!(resolve_group(&groups), GENERAL_GROUP);
    }

    #[test]
    fn groups_with_precedence_rank_before_unranked() {
        let groups = [
            DirectoryGroup::new("administrator"),
            DirectoryGroup::new("general").with_precedence(50),
        ];
        assert_eq!(resolve_group(&groups), GENERAL_GROUP);
    }

    #[test]
    fn attribute_mapping_is_explicit() {
        let principal = Principal::from_directory(
            &user(vec![
                UserAttribute::new("sub", "0f3c"),
                UserAttribute::new("email", "ada@example.com"),
                UserAttribute::new("given_name", "Ada"),
                UserAttribute::new("family_name", "Lovelace"),
                UserAttribute::new("custom:favourite_color", "green"),
            ]),
            &[],
        );
        assert_eq!(principal.email, "ada@example.com");
        assert_eq!(principal.given_name.as_deref(), Some("Ada"));
        assert_eq!(principal.family_name.as_deref(), Some("Lovelace"));
        assert_eq!(principal.group, GENERAL_GROUP);
        assert_eq!(principal.full_name(), "Ada Lovelace");
    }

    #[test]
    fn email_falls_back_to_username() {
        let principal = Principal::from_directory(&user(vec![]), &[]);
        assert_eq!(principal.email, "a@example.com");
        assert_eq!(principal.full_name(), "a@example.com");
    }

    #[test]
    fn anonymous_is_never_a_member() {
        let anonymous = CurrentPrincipal::Anonymous;
        for group in [ADMINISTRATOR_GROUP, GENERAL_GROUP, "", "anything"] {
            assert!(!anonymous.is_member_of(group));
        }
        assert!(!anonymous.is_admin());
        assert!(!anonymous.is_authenticated());
    }

    #[test]
    fn membership_is_exact_group_match() {
        let principal = Principal::from_directory(
            &user(vec![]),
            &[DirectoryGroup::new(ADMINISTRATOR_GROUP)],
        );
        let current = CurrentPrincipal::from(principal);
        assert!(current.is_admin());
        assert!(current.is_member_of(ADMINISTRATOR_GROUP));
        assert!(!current.is_member_of(GENERAL_GROUP));
    }
}
