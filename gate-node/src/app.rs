use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::auth::{system_clock, AuthTokenRequest, Authenticator, Clock};
use crate::cipher::SealingCipher;
use crate::config::GateConfig;
use crate::credential::{BearerToken, Cookie, UserPass};
use crate::domain::{Action, Domain, PasswordDomain, Resource, Rule, SubjectDomain};
use crate::error::Result;
use crate::loader::DomainFileLoader;
use crate::pattern::{clean_path, normalize_resource};
use crate::solver::{AccessRequest, Solver};

/// Credential material accompanying a request.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    /// Raw `Authorization` header value, if any
    pub header: Option<String>,
    /// Session cookie value, if any
    pub cookie: Option<String>,
}

/// One resource request to authorize and optionally serve.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub action: String,
    pub resource: String,
    pub auth: AuthRequest,
    pub body: Vec<u8>,
}

impl ResourceRequest {
    pub fn new(action: impl Into<String>, resource: impl Into<String>, auth: AuthRequest) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            auth,
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

/// Transport-agnostic response: status code, headers, body.
#[derive(Debug, Clone)]
pub struct ResourceResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

fn status_result(status: u16) -> ResourceResponse {
    ResourceResponse {
        status,
        headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
        body: format!("{status}\n").into_bytes(),
    }
}

/// Orchestrating façade over the authenticator, loaders, and solver.
///
/// Subject and password domains load once at construction and stay frozen;
/// the role domain and the resource-scoped rule domain are rebuilt for each
/// access check. Construction fails if any domain file is unreadable or
/// violates a domain invariant.
pub struct App {
    resource_root: PathBuf,
    domain_root: PathBuf,
    rule_file_name: String,
    default_cookie_lifetime: u64,
    subjects: Arc<SubjectDomain>,
    passwords: Arc<PasswordDomain>,
    authenticator: Authenticator,
}

impl App {
    pub fn new(config: &GateConfig) -> Result<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Build the app with an injected clock, for deterministic expiry tests.
    pub fn with_clock(config: &GateConfig, clock: Clock) -> Result<Self> {
        let domain_root = PathBuf::from(&config.domain.domain_root);
        let loader = DomainFileLoader::new();
        let subjects = Arc::new(loader.load_user_file(&domain_root.join("user.txt"))?);
        let passwords = Arc::new(
            loader.load_password_file(&domain_root.join("password.txt"), &subjects)?,
        );
        // Parse role.txt once so a broken domain root fails startup rather
        // than every request; it is still re-read per access check.
        loader.load_membership_file(&domain_root.join("role.txt"), &subjects)?;

        let cipher = Arc::new(SealingCipher::new(config.auth.cipher_key.expose()));
        let authenticator = Authenticator::new(
            Arc::clone(&subjects),
            Arc::clone(&passwords),
            cipher,
            config.auth.cookie_name.clone(),
        )
        .with_clock(clock);

        info!(
            users = subjects.users.len(),
            groups = subjects.groups.len(),
            domain_root = %domain_root.display(),
            resource_root = %config.domain.resource_root,
            "domains loaded"
        );

        Ok(Self {
            resource_root: PathBuf::from(&config.domain.resource_root),
            domain_root,
            rule_file_name: config.domain.rule_file_name.clone(),
            default_cookie_lifetime: config.auth.default_cookie_lifetime_seconds,
            subjects,
            passwords,
            authenticator,
        })
    }

    pub fn cookie_name(&self) -> &str {
        self.authenticator.cookie_name()
    }

    /// Verify a userpass and mint a login cookie.
    pub fn login(&self, userpass: &UserPass) -> Result<Option<Cookie>> {
        info!(username = %userpass.username, "login");
        match self.authenticator.auth_userpass(userpass) {
            Some(verified) => {
                let request = AuthTokenRequest {
                    userpass: verified,
                    description: "login".to_string(),
                    lifetime: Some(self.default_cookie_lifetime),
                };
                Ok(Some(self.authenticator.auth_request_cookie(&request)?))
            }
            None => Ok(None),
        }
    }

    /// Verify the embedded userpass and mint a bearer token.
    pub fn auth_token(&self, request: &AuthTokenRequest) -> Result<Option<BearerToken>> {
        match self.authenticator.auth_userpass(&request.userpass) {
            Some(_) => Ok(Some(self.authenticator.auth_request_token(request)?)),
            None => Ok(None),
        }
    }

    /// Resolve request credentials to a username, or `""` when anonymous.
    pub fn authenticate(&self, auth: &AuthRequest) -> String {
        let verified = self.authenticator.authenticate(
            None,
            auth.header.as_deref(),
            auth.cookie.as_deref(),
        );
        debug!(username = verified.as_ref().map(|u| u.username.as_str()).unwrap_or(""), "authenticate");
        match verified {
            Some(userpass) => userpass.username,
            None => String::new(),
        }
    }

    /// Authorize a request and render the decision record.
    pub fn check_access(&self, request: &ResourceRequest) -> Result<ResourceResponse> {
        let username = self.authenticate(&request.auth);
        let (allowed, record) = self.is_allowed(&request.action, &request.resource, &username)?;
        Ok(ResourceResponse {
            status: if allowed { 200 } else { 401 },
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: serde_json::to_vec_pretty(&record)?,
        })
    }

    /// Solve a request and report whether the winning rule allows it.
    pub fn is_allowed(
        &self,
        action: &str,
        resource: &str,
        username: &str,
    ) -> Result<(bool, serde_json::Value)> {
        let rule = self.solve(action, resource, username)?;
        let record = json!({
            "permission": rule.permission.name(),
            "action": action,
            "resource": resource,
            "user": username,
            "role": rule.role.name,
        });
        Ok((rule.permission.name() == "allow", record))
    }

    /// Resolve the winning rule for one request.
    pub fn solve(&self, action_name: &str, resource_path: &str, username: &str) -> Result<Rule> {
        let resource_path = normalize_resource(resource_path);
        let domain = self.make_domain(&resource_path)?;
        let user = domain.user_for_name(username).cloned();
        debug!(
            action = action_name,
            resource = %resource_path,
            user = username,
            groups = ?user.as_ref().map(|u| u.groups.iter().map(|g| g.name.as_str()).collect::<Vec<_>>()),
            rules = domain.rules.rules.len(),
            "solve"
        );
        let request = AccessRequest {
            action: Action::named(action_name),
            resource: Resource::named(resource_path),
            user,
        };
        Ok(Solver::new(&domain).solve(&request))
    }

    fn make_domain(&self, resource_path: &str) -> Result<Domain<'_>> {
        let loader = DomainFileLoader::new();
        Ok(Domain {
            subjects: &self.subjects,
            roles: loader
                .load_membership_file(&self.domain_root.join("role.txt"), &self.subjects)?,
            rules: loader.load_rules_for_resource(
                &self.resource_root,
                resource_path,
                &self.rule_file_name,
            )?,
            passwords: &self.passwords,
        })
    }

    /// Serve a file or directory index, access-checked.
    pub fn resource_get(&self, request: &ResourceRequest) -> Result<ResourceResponse> {
        self.resource_request(request, true, |path| {
            if path.is_dir() {
                return self.dir_index(path);
            }
            let body = fs::read(path)?;
            debug!(action = %request.action, bytes = body.len(), path = %path.display(), "resource_get");
            Ok(ResourceResponse {
                status: 200,
                headers: file_headers(path)?,
                body,
            })
        })
    }

    /// Headers only, access-checked.
    pub fn resource_head(&self, request: &ResourceRequest) -> Result<ResourceResponse> {
        self.resource_request(request, true, |path| {
            Ok(ResourceResponse {
                status: 200,
                headers: file_headers(path)?,
                body: Vec::new(),
            })
        })
    }

    /// Write the request body to the resource path, access-checked.
    pub fn resource_put(&self, request: &ResourceRequest) -> Result<ResourceResponse> {
        self.resource_request(request, false, |path| {
            debug!(action = %request.action, bytes = request.body.len(), path = %path.display(), "resource_put");
            fs::write(path, &request.body)?;
            Ok(ResourceResponse {
                status: 201,
                headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
                body: format!("OK : {} bytes", request.body.len()).into_bytes(),
            })
        })
    }

    fn resource_request<F>(
        &self,
        request: &ResourceRequest,
        must_exist: bool,
        with_path: F,
    ) -> Result<ResourceResponse>
    where
        F: FnOnce(&Path) -> Result<ResourceResponse>,
    {
        // clean_path keeps `..` segments from escaping the resource root
        let normalized = clean_path(&normalize_resource(&request.resource));
        let path = self.resource_root.join(normalized.trim_start_matches('/'));
        let exists = fs::metadata(&path).is_ok();
        debug!(action = %request.action, path = %path.display(), exists, "resource_request");
        if must_exist && !exists {
            return Ok(status_result(404));
        }
        let decision = self.check_access(request)?;
        if decision.status == 200 {
            with_path(&path)
        } else {
            Ok(status_result(401))
        }
    }

    fn dir_index(&self, path: &Path) -> Result<ResourceResponse> {
        let mut names: Vec<String> = fs::read_dir(path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();

        let mut rows: Vec<(String, String, String)> = Vec::new();
        for name in names {
            let meta = fs::metadata(path.join(&name))?;
            let mtime: DateTime<Utc> = meta.modified()?.into();
            rows.push((name, meta.len().to_string(), mtime.to_rfc3339()));
        }

        let widths = rows.iter().fold(
            ("name".len(), "size".len(), "mtime".len()),
            |acc, (name, size, mtime)| {
                (
                    acc.0.max(name.len()),
                    acc.1.max(size.len()),
                    acc.2.max(mtime.len()),
                )
            },
        );
        let mut table = String::new();
        table.push_str(&format!(
            "| {:<w0$} | {:>w1$} | {:<w2$} |\n",
            "name",
            "size",
            "mtime",
            w0 = widths.0,
            w1 = widths.1,
            w2 = widths.2
        ));
        table.push_str(&format!(
            "|{:-<w0$}|{:->w1$}|{:-<w2$}|\n",
            "",
            "",
            "",
            w0 = widths.0 + 2,
            w1 = widths.1 + 2,
            w2 = widths.2 + 2
        ));
        for (name, size, mtime) in rows {
            table.push_str(&format!(
                "| {:<w0$} | {:>w1$} | {:<w2$} |\n",
                name,
                size,
                mtime,
                w0 = widths.0,
                w1 = widths.1,
                w2 = widths.2
            ));
        }

        Ok(ResourceResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: table.into_bytes(),
        })
    }
}

fn file_headers(path: &Path) -> Result<Vec<(String, String)>> {
    let meta = fs::metadata(path)?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    Ok(vec![
        ("Content-Length".to_string(), meta.len().to_string()),
        ("Content-Type".to_string(), "application/binary".to_string()),
        ("ETag".to_string(), format!("{}-{mtime}", meta.len())),
    ])
}
