//! Path-like token extraction from an agent command line.
//!
//! The scanner walks argv the way a shell-launched agent would see it:
//! leading `NAME=value` assignments, then the executable, then arguments.
//! Options known to take a path make their value a candidate whatever its
//! shape; everything else must look like a path on its own.

use crate::paths::canonicalize::{CanonicalPath, Canonicalizer};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Options whose value is always treated as a path
pub const PATH_OPTION_NAMES: &[&str] = &[
    "-C",
    "-c",
    "-f",
    "-o",
    "--cd",
    "--config",
    "--config-file",
    "--config-path",
    "--cwd",
    "--directory",
    "--file",
    "--input",
    "--log-file",
    "--output",
    "--path",
    "--policy",
    "--project",
    "--root",
    "--settings",
    "--workdir",
];

/// File-name suffixes that mark a bare token as a path
pub const PATH_SUFFIX_HINTS: &[&str] = &[
    ".cfg", ".conf", ".crt", ".csr", ".env", ".ini", ".json", ".key", ".md", ".pem", ".py", ".sh",
    ".toml", ".txt", ".yaml", ".yml",
];

/// Where in the invocation a candidate path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    WorkingDirectory,
    EnvAssignment,
    Executable,
    OptionValue,
    Argument,
}

/// A token that canonicalized to a path worth checking
#[derive(Debug, Clone)]
pub struct Candidate {
    pub token: String,
    pub source: CandidateSource,
    pub path: CanonicalPath,
}

/// Resolves a bare program name (no `/`) to the file that would run
pub trait ExecutableResolver {
    fn resolve(&self, program: &str, cwd: &Path) -> Option<PathBuf>;
}

/// `PATH` lookup using the process environment
#[derive(Debug, Default, Clone)]
pub struct SearchPathResolver {
    search_path: Option<OsString>,
}

impl SearchPathResolver {
    pub fn from_env() -> Self {
        Self {
            search_path: std::env::var_os("PATH"),
        }
    }

    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }
}

impl ExecutableResolver for SearchPathResolver {
    fn resolve(&self, program: &str, cwd: &Path) -> Option<PathBuf> {
        which::which_in(program, self.search_path.as_ref(), cwd).ok()
    }
}

/// Resolver that never finds anything; executables are then checked only
/// when written with a path
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLookup;

impl ExecutableResolver for NoLookup {
    fn resolve(&self, _program: &str, _cwd: &Path) -> Option<PathBuf> {
        None
    }
}

/// Extracts [`Candidate`]s from argv
pub struct TokenScanner<'a> {
    canonicalizer: &'a Canonicalizer,
    resolver: &'a dyn ExecutableResolver,
}

impl<'a> TokenScanner<'a> {
    pub fn new(canonicalizer: &'a Canonicalizer, resolver: &'a dyn ExecutableResolver) -> Self {
        Self {
            canonicalizer,
            resolver,
        }
    }

    /// Every path-like token of `argv`, in argv order
    pub fn scan(&self, argv: &[String], cwd: &Path) -> Vec<Candidate> {
        let mut out = Vec::new();
        let mut idx = 0;

        while let Some(token) = argv.get(idx) {
            if !is_env_assignment(token) {
                break;
            }
            if let Some((_, value)) = token.split_once('=') {
                if let Some(path) = path_part(value) {
                    self.push(&mut out, value, path, CandidateSource::EnvAssignment, cwd);
                }
            }
            idx += 1;
        }

        if let Some(program) = argv.get(idx) {
            if let Some(path) = path_part(program) {
                self.push(&mut out, program, path, CandidateSource::Executable, cwd);
            } else if let Some(resolved) = self.resolver.resolve(program, cwd) {
                out.push(Candidate {
                    token: program.clone(),
                    source: CandidateSource::Executable,
                    path: self
                        .canonicalizer
                        .canonicalize(&resolved.to_string_lossy(), cwd),
                });
            }
            idx += 1;
        }

        if idx < argv.len() {
            self.scan_arguments(&argv[idx..], cwd, &mut out);
        }
        out
    }

    fn scan_arguments(&self, args: &[String], cwd: &Path, out: &mut Vec<Candidate>) {
        let mut expect_value = false;
        let mut options_done = false;

        for arg in args {
            if arg.is_empty() {
                continue;
            }
            if expect_value {
                expect_value = false;
                if let Some(path) = option_value_path(arg) {
                    self.push(out, arg, path, CandidateSource::OptionValue, cwd);
                }
                continue;
            }
            if !options_done && arg == "--" {
                options_done = true;
                continue;
            }

            if !options_done && arg.starts_with('-') && arg != "-" {
                if let Some((option, value)) = arg.split_once('=') {
                    let path = if is_path_option(option) {
                        option_value_path(value)
                    } else {
                        path_part(value)
                    };
                    if let Some(path) = path {
                        self.push(out, value, path, CandidateSource::OptionValue, cwd);
                    }
                    continue;
                }
                if is_path_option(arg) {
                    expect_value = true;
                    continue;
                }
                if let Some(value) = attached_short_option_value(arg) {
                    if let Some(path) = path_part(value) {
                        self.push(out, value, path, CandidateSource::OptionValue, cwd);
                    }
                }
                continue;
            }

            let whole_token = path_prefix(arg) || file_url_path(arg).is_some() || !arg.contains('=');
            if whole_token {
                if let Some(path) = path_part(arg) {
                    self.push(out, arg, path, CandidateSource::Argument, cwd);
                }
                continue;
            }
            if let Some((_, value)) = arg.split_once('=') {
                if let Some(path) = path_part(value) {
                    self.push(out, value, path, CandidateSource::Argument, cwd);
                }
            }
        }
    }

    fn push(
        &self,
        out: &mut Vec<Candidate>,
        token: &str,
        path: &str,
        source: CandidateSource,
        cwd: &Path,
    ) {
        out.push(Candidate {
            token: token.to_string(),
            source,
            path: self.canonicalizer.canonicalize(path, cwd),
        });
    }
}

/// True when `value` should be treated as a filesystem path
pub fn looks_like_path(value: &str) -> bool {
    path_part(value).is_some()
}

/// The filesystem path `value` names, if any.
///
/// Tokens with a path prefix are paths even when they contain `://`;
/// `file://` URLs yield their path; any other `scheme://` token does not.
pub fn path_part(value: &str) -> Option<&str> {
    if value.is_empty() {
        return None;
    }
    if path_prefix(value) {
        return Some(value);
    }
    if let Some(path) = file_url_path(value) {
        return Some(path);
    }
    if value.contains("://") {
        return None;
    }
    if value.contains('/') {
        return Some(value);
    }
    let lower = value.to_ascii_lowercase();
    PATH_SUFFIX_HINTS
        .iter()
        .any(|hint| lower.ends_with(hint))
        .then_some(value)
}

/// Value of an option known to take a path: anything but a non-file URL
fn option_value_path(value: &str) -> Option<&str> {
    if value.is_empty() {
        return None;
    }
    if path_prefix(value) {
        return Some(value);
    }
    if let Some(path) = file_url_path(value) {
        return Some(path);
    }
    (!value.contains("://")).then_some(value)
}

fn path_prefix(value: &str) -> bool {
    value.starts_with('/')
        || value.starts_with('~')
        || value.starts_with("./")
        || value.starts_with("../")
        || value == "."
        || value == ".."
}

/// `file:///etc/x` and `file://host/etc/x` -> `/etc/x`
fn file_url_path(value: &str) -> Option<&str> {
    let scheme = value.get(..7)?;
    if !scheme.eq_ignore_ascii_case("file://") {
        return None;
    }
    let rest = &value[7..];
    let start = rest.find('/')?;
    Some(&rest[start..])
}

fn is_path_option(option: &str) -> bool {
    PATH_OPTION_NAMES.contains(&option)
}

/// Split leading `NAME=value` assignments from the command proper
pub fn split_env_assignments(argv: &[String]) -> (Vec<(String, String)>, &[String]) {
    let count = argv.iter().take_while(|t| is_env_assignment(t)).count();
    let env = argv[..count]
        .iter()
        .filter_map(|t| t.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    (env, &argv[count..])
}

/// `NAME=value` with a shell-valid variable name
fn is_env_assignment(token: &str) -> bool {
    let Some((name, _)) = token.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Value glued to a short option: `-f/etc/passwd` -> `/etc/passwd`
fn attached_short_option_value(token: &str) -> Option<&str> {
    let body = token.strip_prefix('-')?;
    if body.starts_with('-') {
        return None;
    }
    let mut chars = body.chars();
    chars.next()?;
    let value = chars.as_str();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::canonicalize::CaseSensitivity;

    struct FixedResolver(PathBuf);

    impl ExecutableResolver for FixedResolver {
        fn resolve(&self, _program: &str, _cwd: &Path) -> Option<PathBuf> {
            Some(self.0.clone())
        }
    }

    fn canon() -> Canonicalizer {
        Canonicalizer::new(CaseSensitivity::Sensitive).with_home(Some(PathBuf::from("/home/me")))
    }

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn paths(candidates: &[Candidate]) -> Vec<String> {
        candidates
            .iter()
            .map(|c| c.path.as_path().display().to_string())
            .collect()
    }

    #[test]
    fn flags_and_plain_values_are_not_paths() {
        let c = canon();
        let scanner = TokenScanner::new(&c, &NoLookup);
        let found = scanner.scan(&argv(&["codex", "--model", "gpt-5"]), Path::new("/work"));
        assert!(found.is_empty());
    }

    #[test]
    fn mixed_arguments_follow_shape_rules() {
        let c = canon();
        let scanner = TokenScanner::new(&c, &NoLookup);
        let found = scanner.scan(
            &argv(&[
                "tool",
                "--verbose",
                "config=./app.yaml",
                "README.md",
                "../deploy.sh",
                "token=abc123",
                "plain",
            ]),
            Path::new("/work/repo"),
        );
        assert_eq!(
            paths(&found),
            vec!["/work/repo/app.yaml", "/work/repo/README.md", "/work/deploy.sh"]
        );
    }

    #[test]
    fn path_options_capture_their_values() {
        let c = canon();
        let scanner = TokenScanner::new(&c, &NoLookup);
        let found = scanner.scan(
            &argv(&["tool", "--config", "settings", "--policy=./policy.json", "-f/etc/shadow"]),
            Path::new("/work"),
        );
        assert_eq!(
            paths(&found),
            vec!["/work/settings", "/work/policy.json", "/etc/shadow"]
        );
        assert!(found.iter().all(|c| c.source == CandidateSource::OptionValue));
    }

    #[test]
    fn env_assignments_before_the_program_are_checked() {
        let c = canon();
        let scanner = TokenScanner::new(&c, &NoLookup);
        let found = scanner.scan(
            &argv(&["TOKEN_FILE=./secret/token.env", "LANG=C", "python3", "-V"]),
            Path::new("/work"),
        );
        assert_eq!(paths(&found), vec!["/work/secret/token.env"]);
        assert_eq!(found[0].source, CandidateSource::EnvAssignment);
    }

    #[test]
    fn bare_program_is_resolved_through_the_resolver() {
        let c = canon();
        let resolver = FixedResolver(PathBuf::from("/opt/secret/bin/tool"));
        let scanner = TokenScanner::new(&c, &resolver);
        let found = scanner.scan(&argv(&["tool"]), Path::new("/work"));
        assert_eq!(paths(&found), vec!["/opt/secret/bin/tool"]);
        assert_eq!(found[0].source, CandidateSource::Executable);
        assert_eq!(found[0].token, "tool");
    }

    #[test]
    fn explicit_program_path_is_canonicalized() {
        let c = canon();
        let scanner = TokenScanner::new(&c, &NoLookup);
        let found = scanner.scan(&argv(&["~/bin/agent", "run"]), Path::new("/work"));
        assert_eq!(paths(&found), vec!["/home/me/bin/agent"]);
    }

    #[test]
    fn double_dash_ends_option_parsing() {
        let c = canon();
        let scanner = TokenScanner::new(&c, &NoLookup);
        let found = scanner.scan(&argv(&["tool", "--", "-weird/name"]), Path::new("/work"));
        assert_eq!(paths(&found), vec!["/work/-weird/name"]);
    }

    #[test]
    fn path_prefixed_tokens_with_scheme_separators_are_checked() {
        let c = canon();
        let scanner = TokenScanner::new(&c, &NoLookup);
        let found = scanner.scan(
            &argv(&["cat", "/secret/key://x", "--config", "/secret/a://b"]),
            Path::new("/work"),
        );
        assert_eq!(paths(&found), vec!["/secret/key:/x", "/secret/a:/b"]);
        assert_eq!(found[0].token, "/secret/key://x");
        assert_eq!(found[1].source, CandidateSource::OptionValue);
    }

    #[test]
    fn file_urls_yield_their_path() {
        let c = canon();
        let scanner = TokenScanner::new(&c, &NoLookup);
        let found = scanner.scan(
            &argv(&[
                "curl",
                "file:///secret/key",
                "FILE://localhost/etc/shadow",
                "--output=file:///tmp/out",
                "https://example.com/secret/key",
            ]),
            Path::new("/work"),
        );
        assert_eq!(paths(&found), vec!["/secret/key", "/etc/shadow", "/tmp/out"]);
        assert_eq!(found[0].token, "file:///secret/key");
    }

    #[test]
    fn path_options_skip_only_non_file_urls() {
        let c = canon();
        let scanner = TokenScanner::new(&c, &NoLookup);
        let found = scanner.scan(
            &argv(&["tool", "--config", "https://example.com/c.toml", "-o", "file:///secret/o"]),
            Path::new("/work"),
        );
        assert_eq!(paths(&found), vec!["/secret/o"]);
    }

    #[test]
    fn urls_are_not_paths() {
        assert_eq!(path_part("file:///etc/hosts"), Some("/etc/hosts"));
        assert_eq!(path_part("/a://b"), Some("/a://b"));
        assert_eq!(path_part("file://hostonly"), None);
        assert!(!looks_like_path("https://example.com/a/b"));
        assert!(looks_like_path("~/.ssh"));
        assert!(looks_like_path("notes/todo"));
        assert!(looks_like_path("Config.TOML"));
        assert!(!looks_like_path("gpt-5"));
    }

    #[test]
    fn env_assignment_requires_a_valid_name() {
        assert!(is_env_assignment("A_B=1"));
        assert!(!is_env_assignment("1A=1"));
        assert!(!is_env_assignment("=x"));
        assert!(!is_env_assignment("--opt=x"));
    }

    #[test]
    fn leading_assignments_split_from_command() {
        let args = argv(&["A=1", "B=./x", "run", "C=2"]);
        let (env, rest) = split_env_assignments(&args);
        assert_eq!(
            env,
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "./x".to_string())]
        );
        assert_eq!(rest, &args[2..]);
    }

    #[test]
    fn attached_short_values_skip_long_options() {
        assert_eq!(attached_short_option_value("-f/etc/passwd"), Some("/etc/passwd"));
        assert_eq!(attached_short_option_value("--file"), None);
        assert_eq!(attached_short_option_value("-v"), None);
    }
}
