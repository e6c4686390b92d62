use tracing::debug;

use crate::domain::{Action, Domain, Permission, Resource, Role, Rule, User};

/// One access request to resolve: an action verb, a normalized resource
/// path, and the user resolved from the request's credentials (absent when
/// authentication produced no identity).
#[derive(Debug)]
pub struct AccessRequest {
    pub action: Action,
    pub resource: Resource,
    pub user: Option<User>,
}

/// Resolves requests against a request-scoped domain.
///
/// Candidate rules are enumerated in domain order: nearest-directory rules
/// first, file order within a file. The first rule whose action, resource,
/// and role matchers all succeed wins; there is no specificity or
/// permission preference.
#[derive(Debug)]
pub struct Solver<'a> {
    pub domain: &'a Domain<'a>,
}

impl<'a> Solver<'a> {
    pub fn new(domain: &'a Domain<'a>) -> Self {
        Self { domain }
    }

    /// All rules matching the request, in decision order.
    pub fn find_rules(&self, request: &AccessRequest) -> Vec<&'a Rule> {
        let user = match &request.user {
            Some(user) if !user.name.is_empty() && !request.action.name.is_empty() => user,
            _ => return Vec::new(),
        };
        let user_roles = self.domain.roles_for_user(user);
        debug!(
            user = %user.name,
            roles = ?user_roles.iter().map(|role| role.name.as_str()).collect::<Vec<_>>(),
            "solving"
        );
        self.domain
            .rules
            .rules
            .iter()
            .filter(|rule| {
                rule.action.matcher.matches(&request.action.name)
                    && rule.resource.matcher.matches(&request.resource.name)
                    && user_roles
                        .iter()
                        .any(|role| rule.role.matcher.matches(&role.name))
            })
            .collect()
    }

    /// The winning rule, or the default deny when nothing matches.
    pub fn solve(&self, request: &AccessRequest) -> Rule {
        match self.find_rules(request).first() {
            Some(rule) => {
                debug!(rule = %rule.brief(), "winning rule");
                (*rule).clone()
            }
            None => default_rule(request),
        }
    }
}

/// The deny-by-default rule, preserving the request's action and resource.
pub fn default_rule(request: &AccessRequest) -> Rule {
    Rule {
        permission: Permission::Deny,
        action: request.action.clone(),
        role: Role::named("*"),
        resource: request.resource.clone(),
        description: "<<DEFAULT>>".to_string(),
    }
}
