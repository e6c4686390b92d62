use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GateError, Result};

/// Compiled predicate over action names, role names, or resource paths.
///
/// Rules carry one matcher per field. `Always` is the unconditional `*`
/// used for action and role fields; `Glob` holds an anchored regex compiled
/// from a glob pattern together with the original pattern text for
/// diagnostics; `Not` inverts an inner matcher (the `!` prefix).
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Matches every value
    Always,
    /// Anchored regex compiled from a glob pattern
    Glob { pattern: String, regex: Regex },
    /// Negation of the inner matcher
    Not(Box<Matcher>),
}

impl Matcher {
    /// Compile a glob pattern into a matcher.
    pub fn glob(pattern: &str) -> Result<Self> {
        Ok(Matcher::Glob {
            pattern: pattern.to_string(),
            regex: glob_to_regex(pattern, false)?,
        })
    }

    /// Invert a matcher.
    pub fn negate(inner: Matcher) -> Self {
        Matcher::Not(Box::new(inner))
    }

    /// Test a value against the matcher.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Always => true,
            Matcher::Glob { regex, .. } => regex.is_match(value),
            Matcher::Not(inner) => !inner.matches(value),
        }
    }

    /// Original pattern text, for diagnostics.
    pub fn pattern(&self) -> String {
        match self {
            Matcher::Always => "*".to_string(),
            Matcher::Glob { pattern, .. } => pattern.clone(),
            Matcher::Not(inner) => format!("!{}", inner.pattern()),
        }
    }
}

/// Split a leading `!` negation prefix off a pattern.
pub fn split_negation(pattern: &str) -> (bool, &str) {
    match pattern.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    }
}

/// Compile a rule-field pattern, honoring negation and the unconditional `*`.
///
/// Action and role fields pass `star_always_matches = true`, so a bare `*`
/// bypasses glob compilation entirely. Resource fields compile `*` like any
/// other glob, where it keeps its single-segment meaning.
pub fn compile_pattern(pattern: &str, star_always_matches: bool) -> Result<Matcher> {
    let (negated, body) = split_negation(pattern);
    let inner = if body == "*" && star_always_matches {
        Matcher::Always
    } else {
        Matcher::glob(body)?
    };
    Ok(if negated { Matcher::negate(inner) } else { inner })
}

/// Translate a glob into an anchored regex.
///
/// Token semantics, scanning left to right:
/// - `.` is a literal dot
/// - `?` is one character that is neither `/` nor `.`
/// - `**` at start-of-pattern or after `/` is one or more of any character
///   (zero or more when `deep_matches_empty` is set)
/// - `*` at start-of-pattern or after `/` is zero or more non-`/` characters
///   not starting with `.` or `/`
/// - `*` elsewhere is zero or more non-`/` characters
/// - any other character is a literal
///
/// The segment-initial `*` forbids the character at its own position from
/// being `.` or `/` even when it matches nothing. That guard is resolved
/// here against the next pattern token: a following literal `.` or `/`
/// forces the star to consume at least one character.
pub fn glob_to_regex(glob: &str, deep_matches_empty: bool) -> Result<Regex> {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^(?:");
    let mut i = 0;
    while i < chars.len() {
        let at_segment_start = i == 0 || chars[i - 1] == '/';
        match chars[i] {
            '.' => {
                out.push_str(r"\.");
                i += 1;
            }
            '?' => {
                out.push_str("[^/.]");
                i += 1;
            }
            '*' if at_segment_start && chars.get(i + 1) == Some(&'*') => {
                out.push_str(if deep_matches_empty { ".*?" } else { ".+?" });
                i += 2;
            }
            '*' if at_segment_start => {
                let next_forbidden = matches!(chars.get(i + 1), Some(&'.') | Some(&'/'));
                if next_forbidden {
                    out.push_str("[^/.][^/]*");
                } else {
                    out.push_str("(?:[^/.][^/]*)?");
                }
                i += 1;
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            other => {
                out.push_str(&regex::escape(&other.to_string()));
                i += 1;
            }
        }
    }
    out.push_str(")$");
    Regex::new(&out).map_err(|err| GateError::Pattern(format!("glob '{glob}': {err}")))
}

static SLASHES_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"//+").unwrap());
static LEADING_DOT_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\./").unwrap());
static LEADING_DOTDOT_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\.\.(?:$|/)").unwrap());
static SLASH_DOT_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\./").unwrap());
static ROOT_DOTDOT_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/\.\.(?:$|/)").unwrap());
static SEGMENT_DOTDOT_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^/]+/\.\.(?:$|/)").unwrap());
static INNER_DOTDOT_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[^/]+/\.\./").unwrap());

/// Normalize a path by rewriting to a fixed point.
///
/// Collapses duplicate slashes, drops `.` segments, and resolves `..`
/// without consulting the filesystem. A `..` that would climb above the
/// root (or above a relative start) is stripped.
pub fn clean_path(path: &str) -> String {
    let mut path = path.to_string();
    loop {
        let prev = path.clone();
        path = SLASHES_RX.replace_all(&path, "/").into_owned();
        path = LEADING_DOT_RX.replace(&path, "").into_owned();
        path = LEADING_DOTDOT_RX.replace(&path, "").into_owned();
        path = SLASH_DOT_RX.replace(&path, "/").into_owned();
        path = ROOT_DOTDOT_RX.replace(&path, "/").into_owned();
        path = SEGMENT_DOTDOT_RX.replace(&path, "").into_owned();
        path = INNER_DOTDOT_RX.replace(&path, "/").into_owned();
        if path == prev {
            return path;
        }
    }
}

/// Normalize a resource path to a single leading slash.
pub fn normalize_resource(path: &str) -> String {
    SLASHES_RX.replace_all(&format!("/{path}"), "/").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn matches(glob: &str, path: &str) -> bool {
        glob_to_regex(glob, false).unwrap().is_match(path)
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(".a"), ".a");
        assert_eq!(clean_path("/.a"), "/.a");
        assert_eq!(clean_path("."), ".");
        assert_eq!(clean_path("./"), "");
        assert_eq!(clean_path(".."), "");
        assert_eq!(clean_path("../"), "");
        assert_eq!(clean_path("/.."), "/");
        assert_eq!(clean_path("/../a"), "/a");
        assert_eq!(clean_path("a"), "a");
        assert_eq!(clean_path("/a"), "/a");
        assert_eq!(clean_path("//a"), "/a");
        assert_eq!(clean_path("//a//"), "/a/");
        assert_eq!(clean_path("dir//a//"), "dir/a/");
        assert_eq!(clean_path("/root//a//"), "/root/a/");
        assert_eq!(clean_path("dir/../a/b"), "a/b");
        assert_eq!(clean_path("/root/../b"), "/b");
        assert_eq!(clean_path("dir/a/../b"), "dir/b");
        assert_eq!(clean_path("dir/a/../../b/c"), "b/c");
        assert_eq!(clean_path("/a//b"), "/a/b");
        assert_eq!(clean_path("/a/../b"), "/b");
        assert_eq!(clean_path("a/b/../../c"), "c");
        assert_eq!(clean_path("/a/./b"), "/a/b");
    }

    #[test]
    fn test_normalize_resource() {
        assert_eq!(normalize_resource("a/b"), "/a/b");
        assert_eq!(normalize_resource("/a/b"), "/a/b");
        assert_eq!(normalize_resource("//a//b"), "/a/b");
        assert_eq!(normalize_resource(""), "/");
    }

    #[test]
    fn test_glob_literal() {
        assert!(!matches("a/b", ""));
        assert!(!matches("a/b", "a"));
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/bc"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        assert!(matches("a+b", "a+b"));
        assert!(!matches("a+b", "aab"));
        assert!(matches("(x)", "(x)"));
    }

    #[test]
    fn test_glob_question_mark() {
        assert!(matches("a?c", "abc"));
        assert!(!matches("a?c", "a/c"));
        assert!(!matches("a?c", "a.c"));
        assert!(!matches("a?c", "ac"));
    }

    #[test]
    fn test_glob_star() {
        assert!(matches("*.c", "a.c"));
        assert!(!matches("*.c", "b.b"));
        assert!(!matches("*.c", "d/a.c"));
        assert!(!matches("*.c", ".c"));
    }

    #[test]
    fn test_glob_inner_star() {
        assert!(matches("a*.c", "a.c"));
        assert!(matches("a*.c", "abc.c"));
        assert!(!matches("a*.c", "a/b.c"));
    }

    #[test]
    fn test_glob_star_star() {
        assert!(matches("**", "a.c"));
        assert!(matches("**", "d/a.c"));
        assert!(matches("**", "d/e/a.c"));
        assert!(matches("**", "d/e/b"));
        assert!(!matches("**", ""));

        assert!(!matches("**/*.c", "a.c"));
        assert!(matches("**/*.c", "d/a.c"));
        assert!(matches("**/*.c", "d/e/a.c"));
        assert!(!matches("**/*.c", "d/e/b"));

        assert!(!matches("/**", "a.c"));
        assert!(!matches("/**", "d/a.c"));
        assert!(matches("/**", "/a.c"));
        assert!(matches("/**", "/d/a.c"));
    }

    #[test]
    fn test_glob_deep_matches_empty() {
        let rx = glob_to_regex("**", true).unwrap();
        assert!(rx.is_match(""));
        assert!(rx.is_match("d/e/a.c"));
    }

    #[test]
    fn test_segment_star_does_not_swallow_slash() {
        assert!(!matches("*/b", "/b"));
        assert!(matches("*/b", "a/b"));
        assert!(matches("/*", "/"));
        assert!(matches("/*", "/abc"));
        assert!(!matches("/*", "/.hidden"));
        assert!(!matches("/*", "/a/b"));
    }

    #[test]
    fn test_compile_pattern_star_always_matches() {
        let action = compile_pattern("*", true).unwrap();
        assert!(matches!(action, Matcher::Always));
        assert!(action.matches("GET"));
        assert!(action.matches("anything/even/.this"));

        let resource = compile_pattern("*", false).unwrap();
        assert!(resource.matches("segment"));
        assert!(!resource.matches("a/b"));
    }

    #[test]
    fn test_compile_pattern_negation() {
        let matcher = compile_pattern("!GET", true).unwrap();
        assert!(!matcher.matches("GET"));
        assert!(matcher.matches("PUT"));
        assert_eq!(matcher.pattern(), "!GET");
    }

    #[test]
    fn test_matcher_pattern_diagnostics() {
        let matcher = compile_pattern("/docs/**", false).unwrap();
        assert_eq!(matcher.pattern(), "/docs/**");
        assert_eq!(compile_pattern("*", true).unwrap().pattern(), "*");
    }

    proptest! {
        #[test]
        fn clean_path_is_idempotent(path in "[a-c./]{0,24}") {
            let once = clean_path(&path);
            prop_assert_eq!(clean_path(&once), once);
        }

        #[test]
        fn normalize_resource_has_single_leading_slash(path in "[a-c./]{0,24}") {
            let normalized = normalize_resource(&path);
            prop_assert!(normalized.starts_with('/'));
            prop_assert!(!normalized.contains("//"));
        }
    }
}
