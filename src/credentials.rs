//! Credential resolution
//!
//! Credentials come from, in order of precedence:
//! 1. an explicit username and password
//! 2. a netrc file entry for the server host (`~/.netrc` unless a path is given)
//! 3. an interactive prompt, unless running non-interactively
//!
//! When none of these yields both a username and a password the run cannot start.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Username and password for a Subsonic server
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name
    pub username: String,
    /// Password (only ever sent as a salted token)
    pub password: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One `machine` (or `default`) block of a netrc file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetrcEntry {
    /// `login` value
    pub login: Option<String>,
    /// `password` value
    pub password: Option<String>,
}

/// Parsed netrc file
#[derive(Clone, Debug, Default)]
pub struct Netrc {
    machines: Vec<(String, NetrcEntry)>,
    default: Option<NetrcEntry>,
}

/// Where the next token of a netrc file goes
enum Expect {
    Keyword,
    MachineName,
    Login,
    Password,
    Account,
}

impl Netrc {
    /// Parse netrc text. Unknown keywords are ignored and `macdef` bodies skipped.
    pub fn parse(text: &str) -> Self {
        let mut netrc = Netrc::default();
        // None = the `default` block, Some(i) = machines[i]
        let mut current: Option<Option<usize>> = None;
        let mut expect = Expect::Keyword;
        let mut in_macdef = false;

        for line in text.lines() {
            if in_macdef {
                if line.trim().is_empty() {
                    in_macdef = false;
                }
                continue;
            }

            for token in line.split_whitespace() {
                if in_macdef {
                    break;
                }
                if matches!(expect, Expect::Keyword) && token.starts_with('#') {
                    break;
                }
                expect = match expect {
                    Expect::Keyword => match token {
                        "machine" => Expect::MachineName,
                        "default" => {
                            netrc.default = Some(NetrcEntry::default());
                            current = Some(None);
                            Expect::Keyword
                        }
                        "login" => Expect::Login,
                        "password" => Expect::Password,
                        "account" => Expect::Account,
                        "macdef" => {
                            in_macdef = true;
                            Expect::Keyword
                        }
                        _ => Expect::Keyword,
                    },
                    Expect::MachineName => {
                        netrc
                            .machines
                            .push((token.to_string(), NetrcEntry::default()));
                        current = Some(Some(netrc.machines.len() - 1));
                        Expect::Keyword
                    }
                    Expect::Login => {
                        if let Some(entry) = netrc.entry_mut(current) {
                            entry.login = Some(token.to_string());
                        }
                        Expect::Keyword
                    }
                    Expect::Password => {
                        if let Some(entry) = netrc.entry_mut(current) {
                            entry.password = Some(token.to_string());
                        }
                        Expect::Keyword
                    }
                    Expect::Account => Expect::Keyword,
                };
            }
        }

        netrc
    }

    /// Read and parse a netrc file
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        std::fs::read_to_string(path).map(|text| Self::parse(&text))
    }

    /// Entry for a machine, falling back to the `default` block
    pub fn find(&self, machine: &str) -> Option<&NetrcEntry> {
        self.machines
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(machine))
            .map(|(_, entry)| entry)
            .or(self.default.as_ref())
    }

    fn entry_mut(&mut self, current: Option<Option<usize>>) -> Option<&mut NetrcEntry> {
        match current? {
            None => self.default.as_mut(),
            Some(i) => self.machines.get_mut(i).map(|(_, entry)| entry),
        }
    }
}

/// Interactive source of credentials
pub trait Prompt {
    /// Ask for a username
    fn username(&self) -> std::io::Result<String>;
    /// Ask for the password of `username` without echoing it
    fn password(&self, username: &str) -> std::io::Result<String>;
}

/// Prompt on the controlling terminal
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn username(&self) -> std::io::Result<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "username: ")?;
        stderr.flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }

    fn password(&self, username: &str) -> std::io::Result<String> {
        rpassword::prompt_password(format!("password for {username}: "))
    }
}

/// Inputs to credential resolution
#[derive(Clone, Debug, Default)]
pub struct CredentialRequest {
    /// Username given on the command line
    pub username: Option<String>,
    /// Password given on the command line
    pub password: Option<String>,
    /// Explicit netrc file (defaults to `~/.netrc`)
    pub netrc_file: Option<PathBuf>,
    /// Machine names to look up in the netrc file, most specific first
    pub machines: Vec<String>,
    /// Whether prompting is allowed
    pub interactive: bool,
}

/// Resolve credentials by precedence: explicit > netrc > prompt.
pub fn resolve(request: &CredentialRequest, prompt: &dyn Prompt) -> Result<Credentials> {
    if let (Some(user), Some(password)) = (&request.username, &request.password) {
        tracing::debug!("Using credentials from arguments");
        return Ok(Credentials::new(user, password));
    }

    if let Some(found) = from_netrc(request)? {
        return Ok(found);
    }

    if !request.interactive {
        return Err(Error::Credentials(
            "unable to get user and password from netrc file or arguments".to_string(),
        ));
    }

    let username = match &request.username {
        Some(user) => user.clone(),
        None => prompt
            .username()
            .map_err(|e| Error::Credentials(format!("failed to read username: {e}")))?,
    };
    if username.is_empty() {
        return Err(Error::Credentials("no username given".to_string()));
    }
    let password = match &request.password {
        Some(password) => password.clone(),
        None => prompt
            .password(&username)
            .map_err(|e| Error::Credentials(format!("failed to read password: {e}")))?,
    };

    Ok(Credentials::new(username, password))
}

fn from_netrc(request: &CredentialRequest) -> Result<Option<Credentials>> {
    let path = match request.netrc_file.clone().or_else(default_netrc_path) {
        Some(path) => path,
        None => return Ok(None),
    };

    let netrc = match Netrc::from_file(&path) {
        Ok(netrc) => netrc,
        // A missing default file is normal; a missing explicit one is a mistake
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && request.netrc_file.is_none() => {
            return Ok(None);
        }
        Err(e) => {
            return Err(Error::Credentials(format!(
                "failed to read netrc file {}: {e}",
                path.display()
            )));
        }
    };

    for machine in &request.machines {
        let Some(entry) = netrc.find(machine) else {
            continue;
        };
        let (Some(login), Some(password)) = (&entry.login, &entry.password) else {
            continue;
        };
        if request.username.as_ref().is_some_and(|u| u != login) {
            continue;
        }
        tracing::debug!(machine = %machine, path = %path.display(), "Using credentials from netrc");
        return Ok(Some(Credentials::new(login, password)));
    }

    Ok(None)
}

fn default_netrc_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".netrc"))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct ScriptedPrompt {
        username: &'static str,
        password: &'static str,
        calls: Cell<u32>,
    }

    impl ScriptedPrompt {
        fn new(username: &'static str, password: &'static str) -> Self {
            Self {
                username,
                password,
                calls: Cell::new(0),
            }
        }
    }

    impl Prompt for ScriptedPrompt {
        fn username(&self) -> std::io::Result<String> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.username.to_string())
        }

        fn password(&self, _username: &str) -> std::io::Result<String> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.password.to_string())
        }
    }

    fn write_netrc(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("netrc");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parses_machines_and_default() {
        let netrc = Netrc::parse(
            "machine music.local login alice password sesame\n\
             # comment line\n\
             machine other\n  login bob\n  password hunter2\n\
             default login anon password guest\n",
        );
        assert_eq!(
            netrc.find("music.local"),
            Some(&NetrcEntry {
                login: Some("alice".into()),
                password: Some("sesame".into())
            })
        );
        assert_eq!(
            netrc.find("OTHER").and_then(|e| e.login.as_deref()),
            Some("bob")
        );
        assert_eq!(
            netrc.find("unknown").and_then(|e| e.login.as_deref()),
            Some("anon")
        );
    }

    #[test]
    fn skips_macdef_bodies() {
        let netrc = Netrc::parse(
            "macdef init\nmachine fake login x password y\n\n\
             machine real login alice password sesame\n",
        );
        assert!(netrc.find("fake").is_none());
        assert!(netrc.find("real").is_some());
    }

    #[test]
    fn explicit_credentials_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_netrc(&dir, "machine h login netrc password netrc\n");
        let prompt = ScriptedPrompt::new("p", "p");
        let request = CredentialRequest {
            username: Some("alice".into()),
            password: Some("sesame".into()),
            netrc_file: Some(path),
            machines: vec!["h".into()],
            interactive: true,
        };

        let creds = resolve(&request, &prompt).unwrap();
        assert_eq!(creds, Credentials::new("alice", "sesame"));
        assert_eq!(prompt.calls.get(), 0);
    }

    #[test]
    fn netrc_is_used_before_prompting() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_netrc(&dir, "machine music.local login alice password sesame\n");
        let prompt = ScriptedPrompt::new("p", "p");
        let request = CredentialRequest {
            netrc_file: Some(path),
            machines: vec!["music.local".into()],
            interactive: true,
            ..CredentialRequest::default()
        };

        let creds = resolve(&request, &prompt).unwrap();
        assert_eq!(creds, Credentials::new("alice", "sesame"));
        assert_eq!(prompt.calls.get(), 0);
    }

    #[test]
    fn netrc_entry_for_other_user_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_netrc(&dir, "machine music.local login alice password sesame\n");
        let prompt = ScriptedPrompt::new("unused", "typed");
        let request = CredentialRequest {
            username: Some("bob".into()),
            netrc_file: Some(path),
            machines: vec!["music.local".into()],
            interactive: true,
            ..CredentialRequest::default()
        };

        let creds = resolve(&request, &prompt).unwrap();
        assert_eq!(creds, Credentials::new("bob", "typed"));
        assert_eq!(prompt.calls.get(), 1, "only the password is prompted");
    }

    #[test]
    fn prompts_when_nothing_else_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_netrc(&dir, "");
        let prompt = ScriptedPrompt::new("carol", "secret");
        let request = CredentialRequest {
            netrc_file: Some(path),
            machines: vec!["music.local".into()],
            interactive: true,
            ..CredentialRequest::default()
        };

        let creds = resolve(&request, &prompt).unwrap();
        assert_eq!(creds, Credentials::new("carol", "secret"));
    }

    #[test]
    fn non_interactive_without_credentials_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_netrc(&dir, "machine elsewhere login a password b\n");
        let prompt = ScriptedPrompt::new("p", "p");
        let request = CredentialRequest {
            netrc_file: Some(path),
            machines: vec!["music.local".into()],
            interactive: false,
            ..CredentialRequest::default()
        };

        let err = resolve(&request, &prompt).unwrap_err();
        assert!(matches!(err, Error::Credentials(_)));
        assert_eq!(err.severity(), crate::error::Severity::Fatal);
        assert_eq!(prompt.calls.get(), 0);
    }

    #[test]
    fn missing_explicit_netrc_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = CredentialRequest {
            netrc_file: Some(dir.path().join("does-not-exist")),
            machines: vec!["music.local".into()],
            interactive: true,
            ..CredentialRequest::default()
        };

        let err = resolve(&request, &ScriptedPrompt::new("p", "p")).unwrap_err();
        assert!(matches!(err, Error::Credentials(_)));
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("alice", "sesame"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("sesame"));
    }
}
