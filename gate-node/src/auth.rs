use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::cipher::Cipher;
use crate::credential::{BearerToken, Cookie, UserPass};
use crate::domain::{PasswordDomain, SubjectDomain};
use crate::error::Result;

/// Injectable wall clock returning unix seconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// System clock in unix seconds.
pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    })
}

/// Request to mint a sealed credential for a verified userpass.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AuthTokenRequest {
    pub userpass: UserPass,
    pub description: String,
    pub lifetime: Option<u64>,
}

static BASIC_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Basic +(\S+)$").unwrap());
static BEARER_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Bearer +(\S+)$").unwrap());

/// Verifies credentials and mints sealed session cookies and bearer tokens.
///
/// Every verification path returns `None` on any defect: unknown user, wrong
/// password, undecodable header, failed decipher, malformed payload, or
/// expired token. Errors never cross this boundary for authentication
/// failures.
pub struct Authenticator {
    subjects: Arc<SubjectDomain>,
    passwords: Arc<PasswordDomain>,
    cipher: Arc<dyn Cipher>,
    cookie_name: String,
    clock: Clock,
}

impl Authenticator {
    pub fn new(
        subjects: Arc<SubjectDomain>,
        passwords: Arc<PasswordDomain>,
        cipher: Arc<dyn Cipher>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            subjects,
            passwords,
            cipher,
            cookie_name: cookie_name.into(),
            clock: system_clock(),
        }
    }

    /// Replace the clock, for deterministic expiry tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Authenticate by one of the following, in order of precedence:
    /// - Raw username and password
    /// - HTTP Basic Auth header
    /// - HTTP `Authorization: Bearer` token
    /// - HTTP cookie
    ///
    /// A header that parses as Basic decides the outcome on its own: a bad
    /// password does not fall through to the cookie. A Basic-shaped header
    /// whose payload cannot be decoded counts as no credential at all, so
    /// cookie verification still runs. The same short-circuit applies to a
    /// parsed Bearer token.
    pub fn authenticate(
        &self,
        userpass: Option<&UserPass>,
        auth_header: Option<&str>,
        cookie: Option<&str>,
    ) -> Option<UserPass> {
        if let Some(candidate) = userpass {
            if let Some(verified) = self.auth_userpass(candidate) {
                return Some(verified);
            }
        }
        if let Some(header) = auth_header {
            if let Some(candidate) = parse_basic(header) {
                return self.auth_userpass(&candidate);
            }
            if let Some(token) = parse_bearer(header) {
                return self.auth_token(&token);
            }
        }
        cookie.and_then(|value| self.auth_cookie(&Cookie::new(&self.cookie_name, value)))
    }

    /// Verify username and password.
    pub fn auth_userpass(&self, userpass: &UserPass) -> Option<UserPass> {
        let user = self.subjects.user_by_name(&userpass.username)?;
        let record = self.passwords.password_for_user(&user.name)?;
        let matches =
            record.username == userpass.username && record.password == userpass.password;
        debug!(username = %userpass.username, matches, "auth_userpass");
        if matches {
            Some(userpass.clone())
        } else {
            None
        }
    }

    /// Decode a cookie.
    pub fn auth_cookie(&self, cookie: &Cookie) -> Option<UserPass> {
        self.secret_to_userpass(&cookie.value)
    }

    /// Decode a bearer token.
    pub fn auth_token(&self, token: &BearerToken) -> Option<UserPass> {
        self.secret_to_userpass(&token.value)
    }

    /// Mint a new session cookie.
    pub fn auth_request_cookie(&self, request: &AuthTokenRequest) -> Result<Cookie> {
        Ok(Cookie::new(
            &self.cookie_name,
            self.auth_request_to_secret(request)?,
        ))
    }

    /// Mint a new bearer token.
    pub fn auth_request_token(&self, request: &AuthTokenRequest) -> Result<BearerToken> {
        Ok(BearerToken::new(
            self.auth_request_to_secret(request)?,
            &request.description,
        ))
    }

    /// Seal a userpass with issue and expiry metadata.
    ///
    /// Plaintext layout: `5:<username>:<issued>:<lifetime>:<expiry>:<password>`.
    /// The leading `5` is the field count after it; a zero lifetime means the
    /// credential never expires.
    pub fn auth_request_to_secret(&self, request: &AuthTokenRequest) -> Result<String> {
        let issued = (self.clock)();
        let lifetime = request.lifetime.unwrap_or(0);
        let expiry = if lifetime != 0 { issued + lifetime } else { 0 };
        debug!(
            username = %request.userpass.username,
            issued,
            lifetime,
            expiry,
            "minting secret"
        );
        let plaintext = format!(
            "5:{}:{}:{}:{}:{}",
            request.userpass.username, issued, lifetime, expiry, request.userpass.password
        );
        self.cipher.encipher(&plaintext)
    }

    /// Unseal a credential back into a userpass, enforcing expiry.
    ///
    /// The password is the final split field and may itself contain `:`.
    pub fn secret_to_userpass(&self, secret: &str) -> Option<UserPass> {
        let plaintext = self.cipher.decipher(secret).ok()?;
        let fields: Vec<&str> = plaintext.splitn(6, ':').collect();
        let &[n_fields, username, issued, lifetime, expiry, password] = fields.as_slice() else {
            return None;
        };
        if n_fields != "5" {
            return None;
        }
        let issued: u64 = issued.parse().ok()?;
        let lifetime: u64 = lifetime.parse().ok()?;
        let expiry: u64 = expiry.parse().ok()?;
        if expiry != 0 && lifetime != 0 && (self.clock)() >= expiry {
            debug!(username, issued, lifetime, expiry, "credential expired");
            return None;
        }
        Some(UserPass::new(username, password))
    }
}

/// Parse an `Authorization: Basic` header into a userpass.
///
/// Returns `None` for anything that is not a decodable `user:password`
/// payload; the caller treats that as an absent credential.
fn parse_basic(auth_header: &str) -> Option<UserPass> {
    let caps = BASIC_RX.captures(auth_header)?;
    let decoded = STANDARD.decode(&caps[1]).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    debug!(username, "parsed basic credential");
    Some(UserPass::new(username, password))
}

/// Parse an `Authorization: Bearer` header into a token.
fn parse_bearer(auth_header: &str) -> Option<BearerToken> {
    let caps = BEARER_RX.captures(auth_header)?;
    Some(BearerToken::new(&caps[1], ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::SealingCipher;
    use crate::domain::{Group, User};
    use crate::error::GateError;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Identity cipher so tests can hand-craft sealed payloads.
    struct PlainCipher;

    impl Cipher for PlainCipher {
        fn encipher(&self, plaintext: &str) -> Result<String> {
            Ok(plaintext.to_string())
        }

        fn decipher(&self, sealed: &str) -> Result<String> {
            if sealed == "<unreadable>" {
                return Err(GateError::Cipher("unreadable".to_string()));
            }
            Ok(sealed.to_string())
        }
    }

    fn subjects() -> Arc<SubjectDomain> {
        Arc::new(SubjectDomain {
            users: vec![User::new("alice", "@alice").with_groups(vec![Group::new("eng")])],
            groups: vec![Group::new("eng")],
        })
    }

    fn passwords() -> Arc<PasswordDomain> {
        Arc::new(PasswordDomain {
            passwords: vec![UserPass::new("alice", "wonderland")],
        })
    }

    fn ticking_clock(start: u64) -> (Clock, Arc<AtomicU64>) {
        let now = Arc::new(AtomicU64::new(start));
        let handle = Arc::clone(&now);
        (Arc::new(move || now.load(Ordering::Relaxed)), handle)
    }

    fn authenticator(cipher: Arc<dyn Cipher>, clock: Clock) -> Authenticator {
        Authenticator::new(subjects(), passwords(), cipher, "authsession").with_clock(clock)
    }

    fn sealing_authenticator(clock: Clock) -> Authenticator {
        authenticator(Arc::new(SealingCipher::new("test-key")), clock)
    }

    #[test]
    fn test_auth_userpass() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        assert!(auth.auth_userpass(&UserPass::new("alice", "wonderland")).is_some());
        assert!(auth.auth_userpass(&UserPass::new("alice", "wrong")).is_none());
        assert!(auth.auth_userpass(&UserPass::new("mallory", "wonderland")).is_none());
    }

    #[test]
    fn test_token_round_trip_before_expiry() {
        let (clock, now) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let request = AuthTokenRequest {
            userpass: UserPass::new("alice", "wonderland"),
            description: "ci".to_string(),
            lifetime: Some(60),
        };
        let token = auth.auth_request_token(&request).unwrap();
        assert_eq!(token.description, "ci");

        now.store(1059, Ordering::Relaxed);
        let verified = auth.auth_token(&token).unwrap();
        assert_eq!(verified, UserPass::new("alice", "wonderland"));
    }

    #[test]
    fn test_token_expires_at_exact_expiry() {
        let (clock, now) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let request = AuthTokenRequest {
            userpass: UserPass::new("alice", "wonderland"),
            description: String::new(),
            lifetime: Some(1),
        };
        let token = auth.auth_request_token(&request).unwrap();

        now.store(1001, Ordering::Relaxed);
        assert!(auth.auth_token(&token).is_none());
    }

    #[test]
    fn test_zero_lifetime_never_expires() {
        let (clock, now) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let request = AuthTokenRequest {
            userpass: UserPass::new("alice", "wonderland"),
            description: String::new(),
            lifetime: None,
        };
        let token = auth.auth_request_token(&request).unwrap();

        now.store(u64::MAX, Ordering::Relaxed);
        assert!(auth.auth_token(&token).is_some());
    }

    #[test]
    fn test_password_with_colons_round_trips() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let request = AuthTokenRequest {
            userpass: UserPass::new("alice", "a:b:c:d"),
            description: String::new(),
            lifetime: Some(60),
        };
        let secret = auth.auth_request_to_secret(&request).unwrap();
        let verified = auth.secret_to_userpass(&secret).unwrap();
        assert_eq!(verified.password, "a:b:c:d");
    }

    #[test]
    fn test_malformed_payloads_yield_none() {
        let (clock, _) = ticking_clock(1000);
        let auth = authenticator(Arc::new(PlainCipher), clock);
        // wrong field count tag
        assert!(auth.secret_to_userpass("4:alice:0:0:0:pw").is_none());
        // too few fields
        assert!(auth.secret_to_userpass("5:alice:0:0:pw").is_none());
        // non-integer timestamps
        assert!(auth.secret_to_userpass("5:alice:abc:0:0:pw").is_none());
        assert!(auth.secret_to_userpass("5:alice:0:abc:0:pw").is_none());
        assert!(auth.secret_to_userpass("5:alice:0:0:abc:pw").is_none());
        // undecipherable
        assert!(auth.secret_to_userpass("<unreadable>").is_none());
        // empty
        assert!(auth.secret_to_userpass("").is_none());
    }

    #[test]
    fn test_authenticate_userpass_precedence() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let verified = auth.authenticate(
            Some(&UserPass::new("alice", "wonderland")),
            Some("Basic garbage"),
            None,
        );
        assert_eq!(verified.unwrap().username, "alice");
    }

    #[test]
    fn test_authenticate_basic_header() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let header = format!("Basic {}", STANDARD.encode("alice:wonderland"));
        let verified = auth.authenticate(None, Some(&header), None);
        assert_eq!(verified.unwrap().username, "alice");
    }

    #[test]
    fn test_authenticate_basic_bad_password_does_not_use_cookie() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let cookie = auth
            .auth_request_cookie(&AuthTokenRequest {
                userpass: UserPass::new("alice", "wonderland"),
                description: "login".to_string(),
                lifetime: Some(60),
            })
            .unwrap();
        let header = format!("Basic {}", STANDARD.encode("alice:wrong"));
        assert!(auth
            .authenticate(None, Some(&header), Some(&cookie.value))
            .is_none());
    }

    #[test]
    fn test_authenticate_malformed_basic_falls_through_to_cookie() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let cookie = auth
            .auth_request_cookie(&AuthTokenRequest {
                userpass: UserPass::new("alice", "wonderland"),
                description: "login".to_string(),
                lifetime: Some(60),
            })
            .unwrap();
        let verified = auth.authenticate(None, Some("Basic !!!not-base64!!!"), Some(&cookie.value));
        assert_eq!(verified.unwrap().username, "alice");
    }

    #[test]
    fn test_authenticate_malformed_basic_without_cookie_is_none() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        assert!(auth
            .authenticate(None, Some("Basic !!!not-base64!!!"), None)
            .is_none());
    }

    #[test]
    fn test_authenticate_bearer_token() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let token = auth
            .auth_request_token(&AuthTokenRequest {
                userpass: UserPass::new("alice", "wonderland"),
                description: String::new(),
                lifetime: Some(60),
            })
            .unwrap();
        let header = format!("Bearer {}", token.value);
        let verified = auth.authenticate(None, Some(&header), None);
        assert_eq!(verified.unwrap().username, "alice");
    }

    #[test]
    fn test_authenticate_bad_bearer_does_not_use_cookie() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let cookie = auth
            .auth_request_cookie(&AuthTokenRequest {
                userpass: UserPass::new("alice", "wonderland"),
                description: "login".to_string(),
                lifetime: Some(60),
            })
            .unwrap();
        assert!(auth
            .authenticate(None, Some("Bearer bogus"), Some(&cookie.value))
            .is_none());
    }

    #[test]
    fn test_authenticate_cookie_only() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        let cookie = auth
            .auth_request_cookie(&AuthTokenRequest {
                userpass: UserPass::new("alice", "wonderland"),
                description: "login".to_string(),
                lifetime: Some(60),
            })
            .unwrap();
        let verified = auth.authenticate(None, None, Some(&cookie.value));
        assert_eq!(verified.unwrap().username, "alice");
    }

    #[test]
    fn test_authenticate_nothing() {
        let (clock, _) = ticking_clock(1000);
        let auth = sealing_authenticator(clock);
        assert!(auth.authenticate(None, None, None).is_none());
    }
}
