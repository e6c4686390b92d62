use std::fmt;

use crate::credential::UserPass;
use crate::pattern::Matcher;

/// A named subject that can log in and hold group memberships.
///
/// Names are lowercase identifiers (`^[a-z][a-z0-9_]*$` by authoring
/// convention; the engine does not enforce the shape). A user conventionally
/// also belongs to a group bearing its own name.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub description: String,
    pub groups: Vec<Group>,
}

impl User {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups(mut self, groups: Vec<Group>) -> Self {
        self.groups = groups;
        self
    }
}

/// A named collection of users. Equality is by name.
#[derive(Debug, Clone, Eq)]
pub struct Group {
    pub name: String,
    pub description: String,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
        }
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// A named capability bundle granted via memberships.
///
/// In a rule, the role field is itself a pattern, so the matcher may be a
/// compiled glob; a role named by a membership line carries `Always`.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub matcher: Matcher,
}

impl Role {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            matcher: Matcher::Always,
        }
    }

    pub fn pattern(name: impl Into<String>, matcher: Matcher) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            matcher,
        }
    }
}

/// The subject side of a membership: a user or a group, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    User(String),
    Group(String),
}

/// Binding of a role to a member.
#[derive(Debug, Clone)]
pub struct Membership {
    pub role: Role,
    pub member: Member,
}

/// Verb of a request (`GET`, `PUT`, ...); in a rule, a pattern over verbs.
#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub matcher: Matcher,
}

impl Action {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matcher: Matcher::Always,
        }
    }

    pub fn pattern(name: impl Into<String>, matcher: Matcher) -> Self {
        Self {
            name: name.into(),
            matcher,
        }
    }
}

/// Normalized absolute path of a target object; in a rule, a pattern over
/// resource paths.
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub matcher: Matcher,
}

impl Resource {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matcher: Matcher::Always,
        }
    }

    pub fn pattern(name: impl Into<String>, matcher: Matcher) -> Self {
        Self {
            name: name.into(),
            matcher,
        }
    }
}

/// Verdict carried by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Allow,
    Deny,
}

impl Permission {
    pub fn name(&self) -> &'static str {
        match self {
            Permission::Allow => "allow",
            Permission::Deny => "deny",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Permission::Allow),
            "deny" => Ok(Permission::Deny),
            other => Err(format!("unknown permission '{other}'")),
        }
    }
}

/// One access rule: permission plus matchers over action, role, and resource.
///
/// All three matchers are compiled before the rule enters a domain.
#[derive(Debug, Clone)]
pub struct Rule {
    pub permission: Permission,
    pub action: Action,
    pub role: Role,
    pub resource: Resource,
    pub description: String,
}

impl Rule {
    /// One-line summary for diagnostics.
    pub fn brief(&self) -> String {
        format!(
            "{} {} {} {}",
            self.permission, self.action.name, self.role.name, self.resource.name
        )
    }
}

/// Users and groups, loaded once at startup and frozen.
#[derive(Debug, Clone, Default)]
pub struct SubjectDomain {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
}

impl SubjectDomain {
    pub fn user_by_name(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|user| user.name == name)
    }

    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.name == name)
    }
}

/// Roles and memberships, reloaded per request.
#[derive(Debug, Clone, Default)]
pub struct RoleDomain {
    pub roles: Vec<Role>,
    pub memberships: Vec<Membership>,
}

impl RoleDomain {
    /// Roles granted to a user, directly or through any of its groups.
    pub fn roles_for_user(&self, user: &User) -> Vec<&Role> {
        let mut roles: Vec<&Role> = Vec::new();
        for membership in &self.memberships {
            let contains = match &membership.member {
                Member::User(name) => *name == user.name,
                Member::Group(name) => user.groups.iter().any(|group| group.name == *name),
            };
            if contains && !roles.iter().any(|role| role.name == membership.role.name) {
                roles.push(&membership.role);
            }
        }
        roles
    }
}

/// Ordered rules. Order is significant: file order within a file, and
/// nearest-ancestor-first across per-directory rule files.
#[derive(Debug, Clone, Default)]
pub struct RuleDomain {
    pub rules: Vec<Rule>,
}

/// Username/password records, loaded once at startup and frozen.
#[derive(Debug, Clone, Default)]
pub struct PasswordDomain {
    pub passwords: Vec<UserPass>,
}

impl PasswordDomain {
    pub fn password_for_user(&self, username: &str) -> Option<&UserPass> {
        self.passwords
            .iter()
            .find(|record| record.username == username)
    }
}

/// Request-scoped view over all four sub-domains.
///
/// Borrows the long-lived subject and password domains; owns the role and
/// rule domains freshly loaded for one request.
#[derive(Debug)]
pub struct Domain<'a> {
    pub subjects: &'a SubjectDomain,
    pub roles: RoleDomain,
    pub rules: RuleDomain,
    pub passwords: &'a PasswordDomain,
}

impl Domain<'_> {
    pub fn user_for_name(&self, name: &str) -> Option<&User> {
        self.subjects.user_by_name(name)
    }

    pub fn roles_for_user(&self, user: &User) -> Vec<&Role> {
        self.roles.roles_for_user(user)
    }
}
