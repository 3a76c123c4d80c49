// Toolflow — Tool credentials from the environment
//
// Third-party tools authenticate with values read from variables named
// `{TOOL}_{KIND}`, e.g. `GITHUB_ACCESS_TOKEN` or `BRAVE_SUBSCRIPTION_KEY`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CredentialKind {
    ApiKey,
    SecretKey,
    SubscriptionKey,
    AccessKey,
    AccessToken,
    SecretToken,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 6] = [
        CredentialKind::ApiKey,
        CredentialKind::SecretKey,
        CredentialKind::SubscriptionKey,
        CredentialKind::AccessKey,
        CredentialKind::AccessToken,
        CredentialKind::SecretToken,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            CredentialKind::ApiKey => "API_KEY",
            CredentialKind::SecretKey => "SECRET_KEY",
            CredentialKind::SubscriptionKey => "SUBSCRIPTION_KEY",
            CredentialKind::AccessKey => "ACCESS_KEY",
            CredentialKind::AccessToken => "ACCESS_TOKEN",
            CredentialKind::SecretToken => "SECRET_TOKEN",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Env var prefix for a tool id.
///
/// Tool ids of the form `APP__ACTION` share the credentials of `APP`.
pub fn env_prefix(tool: &str) -> String {
    let app = tool.split("__").next().unwrap_or(tool).trim();
    app.chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn env_var_name(tool: &str, kind: CredentialKind) -> String {
    format!("{}_{}", env_prefix(tool), kind.suffix())
}

/// Credentials found for one tool.
#[derive(Clone, Default)]
pub struct ToolCredentials {
    prefix: String,
    values: BTreeMap<CredentialKind, String>,
}

impl ToolCredentials {
    /// Resolve from the process environment.
    pub fn resolve(tool: &str) -> Self {
        Self::resolve_with(tool, |name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(tool: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = env_prefix(tool);
        let values = CredentialKind::ALL
            .iter()
            .filter_map(|&kind| {
                let name = format!("{}_{}", prefix, kind.suffix());
                lookup(&name)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (kind, v))
            })
            .collect();
        Self { prefix, values }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn get(&self, kind: CredentialKind) -> Option<&str> {
        self.values.get(&kind).map(String::as_str)
    }

    pub fn kinds(&self) -> impl Iterator<Item = CredentialKind> + '_ {
        self.values.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(ENV_NAME, value)` pairs for every credential found.
    pub fn env_pairs(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.values
            .iter()
            .map(|(kind, v)| (format!("{}_{}", self.prefix, kind.suffix()), v.clone()))
    }
}

impl fmt::Debug for ToolCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCredentials")
            .field("prefix", &self.prefix)
            .field("kinds", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Collect the credential env for a set of tools, to hand to a spawned server.
pub fn server_env<'a, I>(tools: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    server_env_with(tools, |name| std::env::var(name).ok())
}

pub fn server_env_with<'a, I, F>(tools: I, lookup: F) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
    F: Fn(&str) -> Option<String>,
{
    let mut env = HashMap::new();
    for tool in tools {
        let creds = ToolCredentials::resolve_with(tool, &lookup);
        if creds.is_empty() {
            tracing::debug!(tool = %tool, prefix = %creds.prefix(), "No credentials in environment");
            continue;
        }
        for (name, value) in creds.env_pairs() {
            env.insert(name, value);
        }
    }
    env
}
