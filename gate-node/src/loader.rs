use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use crate::credential::UserPass;
use crate::domain::{
    Action, Group, Member, Membership, PasswordDomain, Permission, Resource, Role, RoleDomain,
    Rule, RuleDomain, SubjectDomain, User,
};
use crate::error::{GateError, Result};
use crate::pattern::{clean_path, compile_pattern, split_negation, Matcher};

static RULE_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rule\s+(?P<permission>\S+)\s+(?P<action>\S+)\s+(?P<role>\S+)\s+(?P<resource>\S+)")
        .unwrap()
});
static MEMBERSHIP_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^member\s+(?P<role>\S+)\s+(?P<members>\S+)").unwrap());
static USER_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^user\s+(?P<users>\S+)\s+(?P<groups>\S+)").unwrap());
static PASSWORD_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^password\s+(?P<username>\S+)\s+(?P<password>\S+)").unwrap());

/// Parser for the four line grammars: rule, member, user, password.
///
/// `prefix` is prepended to every resource pattern before normalization and
/// compilation; the filesystem loader sets it to the rule file's directory.
#[derive(Debug, Default, Clone)]
pub struct TextLoader {
    pub prefix: String,
}

impl TextLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Parse `rule PERMISSION ACTIONS ROLES RESOURCES` lines.
    ///
    /// Each comma-separated field expands by cartesian product into one rule
    /// per (action, role, resource) triple.
    pub fn read_rules(&self, text: &str) -> Result<Vec<Rule>> {
        parse_lines(text, &RULE_RX, |caps| self.parse_rule_line(caps))
    }

    fn parse_rule_line(&self, caps: &Captures<'_>) -> Result<Vec<Rule>> {
        let permission: Permission = match caps["permission"].parse() {
            Ok(permission) => permission,
            Err(reason) => {
                debug!(line = &caps[0], "dropping rule line: {reason}");
                return Ok(Vec::new());
            }
        };
        let mut rules = Vec::new();
        for action_pat in parse_list(&caps["action"]) {
            for role_pat in parse_list(&caps["role"]) {
                for resource_pat in parse_list(&caps["resource"]) {
                    let rule = Rule {
                        permission,
                        action: self.parse_action(action_pat)?,
                        role: self.parse_role(role_pat)?,
                        resource: self.parse_resource(resource_pat)?,
                        description: caps[0].to_string(),
                    };
                    debug!(rule = %rule.brief(), "loaded rule");
                    rules.push(rule);
                }
            }
        }
        Ok(rules)
    }

    fn parse_action(&self, pattern: &str) -> Result<Action> {
        let (_, body) = split_negation(pattern);
        Ok(Action::pattern(body, compile_pattern(pattern, true)?))
    }

    fn parse_role(&self, pattern: &str) -> Result<Role> {
        let (_, body) = split_negation(pattern);
        Ok(Role::pattern(body, compile_pattern(pattern, true)?))
    }

    /// Resource patterns are rooted at the loader prefix: the negation
    /// prefix is split off first, then the body is joined onto the prefix
    /// and path-normalized before glob compilation.
    fn parse_resource(&self, pattern: &str) -> Result<Resource> {
        let (negated, body) = split_negation(pattern);
        let resource_path = clean_path(&format!("{}{}", self.prefix, body));
        let mut matcher = Matcher::glob(&resource_path)?;
        if negated {
            matcher = Matcher::negate(matcher);
        }
        Ok(Resource::pattern(resource_path, matcher))
    }

    /// Parse `user USERS GROUPS` lines: one user per listed name, all
    /// carrying the listed groups.
    pub fn read_users(&self, text: &str) -> Result<Vec<User>> {
        parse_lines(text, &USER_RX, |caps| {
            let groups: Vec<Group> = parse_list(&caps["groups"]).map(Group::new).collect();
            Ok(parse_list(&caps["users"])
                .map(|name| {
                    User::new(name, format!("@{name}")).with_groups(groups.clone())
                })
                .collect())
        })
    }

    /// Parse `member ROLE MEMBERS` lines. A member starting with `@` names a
    /// user; anything else names a group.
    pub fn read_memberships(&self, text: &str) -> Result<Vec<Membership>> {
        parse_lines(text, &MEMBERSHIP_RX, |caps| {
            let role_name = &caps["role"];
            Ok(parse_list(&caps["members"])
                .map(|member| Membership {
                    role: Role::named(role_name),
                    member: match member.strip_prefix('@') {
                        Some(user) => Member::User(user.to_string()),
                        None => Member::Group(member.to_string()),
                    },
                })
                .collect())
        })
    }

    /// Parse `password USERNAME PASSWORD` lines.
    pub fn read_passwords(&self, text: &str) -> Result<Vec<UserPass>> {
        parse_lines(text, &PASSWORD_RX, |caps| {
            Ok(vec![UserPass::new(&caps["username"], &caps["password"])])
        })
    }
}

fn parse_lines<T>(
    text: &str,
    rx: &Regex,
    parse: impl Fn(&Captures<'_>) -> Result<Vec<T>>,
) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for line in text.lines() {
        let line = trim_line(line);
        if let Some(caps) = rx.captures(&line) {
            records.extend(parse(&caps)?);
        }
    }
    Ok(records)
}

fn parse_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',')
}

fn trim_line(line: &str) -> String {
    let line = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    line.trim().to_string()
}

/// Loads the user, membership, and password domain files, plus the rule
/// tree for a resource path.
///
/// Domain files must be readable: a missing or malformed-at-the-invariant
/// level file is an error for the caller to treat as fatal. Memberships and
/// passwords that reference a user absent from the subject domain are
/// rejected here.
#[derive(Debug, Default)]
pub struct DomainFileLoader;

impl DomainFileLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load_user_file(&self, user_file: &Path) -> Result<SubjectDomain> {
        let text = fs::read_to_string(user_file)?;
        let users = TextLoader::new().read_users(&text)?;
        let mut groups: Vec<Group> = Vec::new();
        for user in &users {
            for group in &user.groups {
                if !groups.contains(group) {
                    groups.push(group.clone());
                }
            }
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(SubjectDomain { users, groups })
    }

    pub fn load_membership_file(
        &self,
        memberships_file: &Path,
        subjects: &SubjectDomain,
    ) -> Result<RoleDomain> {
        let text = fs::read_to_string(memberships_file)?;
        let memberships = TextLoader::new().read_memberships(&text)?;
        for membership in &memberships {
            if let Member::User(name) = &membership.member {
                if subjects.user_by_name(name).is_none() {
                    return Err(GateError::Domain(format!(
                        "membership for role '{}' references unknown user '{name}'",
                        membership.role.name
                    )));
                }
            }
        }
        let mut roles: Vec<Role> = Vec::new();
        for membership in &memberships {
            if !roles.iter().any(|role| role.name == membership.role.name) {
                roles.push(membership.role.clone());
            }
        }
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(RoleDomain { roles, memberships })
    }

    pub fn load_password_file(
        &self,
        password_file: &Path,
        subjects: &SubjectDomain,
    ) -> Result<PasswordDomain> {
        let text = fs::read_to_string(password_file)?;
        let passwords = TextLoader::new().read_passwords(&text)?;
        for record in &passwords {
            if subjects.user_by_name(&record.username).is_none() {
                return Err(GateError::Domain(format!(
                    "password record references unknown user '{}'",
                    record.username
                )));
            }
        }
        Ok(PasswordDomain { passwords })
    }

    pub fn load_rules_for_resource(
        &self,
        resource_root: &Path,
        resource: &str,
        rule_file_name: &str,
    ) -> Result<RuleDomain> {
        let loader = FileSystemLoader::new(resource_root, rule_file_name);
        Ok(RuleDomain {
            rules: loader.load_rules(resource)?,
        })
    }
}

/// Walks the ancestor directories of a resource path, reading the
/// per-directory rule file from each, nearest ancestor first.
///
/// Missing or unreadable rule files are skipped; they are the common case
/// for most directories in a resource tree.
#[derive(Debug)]
pub struct FileSystemLoader {
    pub resource_root: PathBuf,
    pub rule_file_name: String,
}

impl FileSystemLoader {
    pub fn new(resource_root: impl Into<PathBuf>, rule_file_name: impl Into<String>) -> Self {
        Self {
            resource_root: resource_root.into(),
            rule_file_name: rule_file_name.into(),
        }
    }

    pub fn load_rules(&self, resource: &str) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        for dir in resource_ancestors(resource) {
            rules.extend(self.load_rule_file(&dir)?);
        }
        Ok(rules)
    }

    fn load_rule_file(&self, dir: &str) -> Result<Vec<Rule>> {
        let rule_file = self.rule_file_path(dir);
        let text = match fs::read_to_string(&rule_file) {
            Ok(text) => text,
            Err(err) => {
                debug!(file = %rule_file.display(), error = %err, "skipping rule file");
                return Ok(Vec::new());
            }
        };
        TextLoader::with_prefix(format!("{dir}/")).read_rules(&text)
    }

    fn rule_file_path(&self, dir: &str) -> PathBuf {
        self.resource_root
            .join(dir.trim_start_matches('/'))
            .join(&self.rule_file_name)
    }
}

/// Ancestor directories of a normalized absolute resource path, nearest
/// first, ending at `/`. The resource itself is not included; `/` has no
/// ancestors.
pub fn resource_ancestors(resource: &str) -> Vec<String> {
    let trimmed = if resource.len() > 1 {
        resource.trim_end_matches('/')
    } else {
        resource
    };
    if trimmed == "/" || trimmed.is_empty() {
        return Vec::new();
    }
    let mut ancestors = Vec::new();
    let mut current = trimmed;
    while let Some(idx) = current.rfind('/') {
        if idx == 0 {
            ancestors.push("/".to_string());
            break;
        }
        current = &current[..idx];
        ancestors.push(current.to_string());
    }
    ancestors
}
