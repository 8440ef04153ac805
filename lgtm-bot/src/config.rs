use anyhow::{bail, Context, Result};
use std::env;

use crate::forge::{ForgeDialect, RepoRef};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Clone)]
pub struct Config {
    pub webhook_secret: String,
    pub forge_token: String,
    /// REST base URL. For Gitea this includes `/api/v1`.
    pub forge_api_url: String,
    pub dialect: ForgeDialect,
    /// Repositories whose events are acted on. Empty means none.
    pub repos: Vec<RepoRef>,
    pub host: String,
    pub port: u16,
    /// Reconcile every open pull request on startup.
    pub backfill: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("forge_api_url", &self.forge_api_url)
            .field("dialect", &self.dialect)
            .field("repos", &self.repos)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backfill", &self.backfill)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let webhook_secret = lookup("LGTM_WEBHOOK_SECRET")
            .filter(|s| !s.is_empty())
            .context("LGTM_WEBHOOK_SECRET environment variable is required")?;

        let forge_token = lookup("FORGE_TOKEN")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .context("FORGE_TOKEN environment variable is required")?;

        let forge_api_url = lookup("FORGE_API_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let dialect = match lookup("FORGE_DIALECT") {
            Some(value) => value.parse().context("FORGE_DIALECT is invalid")?,
            None => ForgeDialect::default(),
        };

        let repos = parse_repos(&lookup("LGTM_REPOS").unwrap_or_default())
            .context("LGTM_REPOS is invalid")?;

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "8000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let backfill = match lookup("LGTM_BACKFILL") {
            Some(value) => parse_bool(&value).context("LGTM_BACKFILL must be true or false")?,
            None => true,
        };

        Ok(Config {
            webhook_secret,
            forge_token,
            forge_api_url,
            dialect,
            repos,
            host,
            port,
            backfill,
        })
    }
}

/// Parse a comma or whitespace separated `owner/repo` list.
pub fn parse_repos(value: &str) -> Result<Vec<RepoRef>> {
    let mut repos: Vec<RepoRef> = Vec::new();
    for entry in value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
    {
        let repo: RepoRef = entry.parse()?;
        if !repos.contains(&repo) {
            repos.push(repo);
        }
    }
    Ok(repos)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("'{}' is not a boolean", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [("LGTM_WEBHOOK_SECRET", "s3cret"), ("FORGE_TOKEN", "tok")];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();

        assert_eq!(config.webhook_secret, "s3cret");
        assert_eq!(config.forge_token, "tok");
        assert_eq!(config.forge_api_url, DEFAULT_API_URL);
        assert_eq!(config.dialect, ForgeDialect::GitHub);
        assert!(config.repos.is_empty());
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert!(config.backfill);
    }

    #[test]
    fn test_full_gitea_config() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("FORGE_API_URL", "https://git.example.com/api/v1/"),
            ("FORGE_DIALECT", "gitea"),
            ("LGTM_REPOS", "octo/widgets, octo/gadgets\nteam/infra"),
            ("PORT", "9000"),
            ("LGTM_BACKFILL", "false"),
        ]);

        let config = load(&vars).unwrap();

        assert_eq!(config.forge_api_url, "https://git.example.com/api/v1");
        assert_eq!(config.dialect, ForgeDialect::Gitea);
        assert_eq!(
            config.repos,
            vec![
                RepoRef::new("octo", "widgets"),
                RepoRef::new("octo", "gadgets"),
                RepoRef::new("team", "infra"),
            ]
        );
        assert_eq!(config.port, 9000);
        assert!(!config.backfill);
    }

    #[test]
    fn test_missing_or_empty_secret_is_rejected() {
        let err = load(&[("FORGE_TOKEN", "tok")]).unwrap_err();
        assert!(err.to_string().contains("LGTM_WEBHOOK_SECRET"));

        let err = load(&[("LGTM_WEBHOOK_SECRET", ""), ("FORGE_TOKEN", "tok")]).unwrap_err();
        assert!(err.to_string().contains("LGTM_WEBHOOK_SECRET"));
    }

    #[test]
    fn test_blank_token_is_rejected() {
        let err = load(&[("LGTM_WEBHOOK_SECRET", "s"), ("FORGE_TOKEN", "  ")]).unwrap_err();
        assert!(err.to_string().contains("FORGE_TOKEN"));
    }

    #[test]
    fn test_malformed_repo_is_an_error() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("LGTM_REPOS", "octo/widgets,widgets"));

        let err = load(&vars).unwrap_err();
        assert!(format!("{:#}", err).contains("owner/repo"));
    }

    #[test]
    fn test_unknown_dialect_is_an_error() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("FORGE_DIALECT", "gitlab"));

        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_parse_repos_deduplicates() {
        let repos = parse_repos("a/b a/b,,c/d").unwrap();
        assert_eq!(repos, vec![RepoRef::new("a", "b"), RepoRef::new("c", "d")]);
        assert!(parse_repos("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
