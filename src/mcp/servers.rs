//! Launch presets for well-known tool-servers
//!
//! Credentials only ever travel through the child's environment so they do
//! not show up in process listings or in [`LaunchSpec::display`].

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::transport::LaunchSpec;

pub const GITHUB_IMAGE: &str = "ghcr.io/github/github-mcp-server";
pub const GITHUB_TOKEN_VAR: &str = "GITHUB_PERSONAL_ACCESS_TOKEN";
pub const FIRECRAWL_KEY_VAR: &str = "FIRECRAWL_API_KEY";

#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const PATH_SEPARATOR: &str = ":";

#[cfg(windows)]
const DOCKER_PATHS: &[&str] = &[
    r"C:\Program Files\Docker\Docker\resources\bin",
    r"C:\ProgramData\DockerDesktop\version-bin",
];
#[cfg(not(windows))]
const DOCKER_PATHS: &[&str] = &["/usr/local/bin", "/opt/homebrew/bin"];

/// GitHub tool groups the server can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum GithubToolset {
    Repos,
    Issues,
    Users,
    PullRequests,
    CodeSecurity,
    Experiments,
    All,
}

impl GithubToolset {
    pub fn as_str(&self) -> &'static str {
        match self {
            GithubToolset::Repos => "repos",
            GithubToolset::Issues => "issues",
            GithubToolset::Users => "users",
            GithubToolset::PullRequests => "pull_requests",
            GithubToolset::CodeSecurity => "code_security",
            GithubToolset::Experiments => "experiments",
            GithubToolset::All => "all",
        }
    }
}

impl fmt::Display for GithubToolset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GithubToolset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repos" => Ok(GithubToolset::Repos),
            "issues" => Ok(GithubToolset::Issues),
            "users" => Ok(GithubToolset::Users),
            "pull_requests" => Ok(GithubToolset::PullRequests),
            "code_security" => Ok(GithubToolset::CodeSecurity),
            "experiments" => Ok(GithubToolset::Experiments),
            "all" => Ok(GithubToolset::All),
            other => Err(format!("unknown GitHub toolset: {other}")),
        }
    }
}

/// `docker run` the GitHub server with the given toolsets. An empty list
/// means all of them.
pub fn github(token: &str, toolsets: &[GithubToolset], image: Option<&str>) -> LaunchSpec {
    let toolsets = if toolsets.is_empty() {
        GithubToolset::All.to_string()
    } else {
        toolsets
            .iter()
            .map(GithubToolset::as_str)
            .collect::<Vec<_>>()
            .join(",")
    };

    let path = extend_path(&env::var("PATH").unwrap_or_default(), DOCKER_PATHS);
    LaunchSpec::new("docker")
        .args(["run", "-i", "--rm", "-e", GITHUB_TOKEN_VAR, "-e", "TOOLSETS"])
        .arg(image.unwrap_or(GITHUB_IMAGE))
        .env(GITHUB_TOKEN_VAR, token)
        .env("TOOLSETS", toolsets)
        .env("PATH", path)
}

/// The Firecrawl server. `command` defaults to `npx -y firecrawl-mcp`.
pub fn firecrawl(api_key: &str, command: Option<&[String]>) -> LaunchSpec {
    let (program, args) = match command {
        Some([program, args @ ..]) => (program.clone(), args.to_vec()),
        _ => (
            "npx".to_string(),
            vec!["-y".to_string(), "firecrawl-mcp".to_string()],
        ),
    };
    LaunchSpec::new(program)
        .args(args)
        .env(FIRECRAWL_KEY_VAR, api_key)
}

/// Prepend directories missing from `current`
fn extend_path(current: &str, extra: &[&str]) -> String {
    let present: Vec<&str> = current.split(PATH_SEPARATOR).collect();
    extra
        .iter()
        .copied()
        .filter(|dir| !present.contains(dir))
        .chain((!current.is_empty()).then_some(current))
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR)
}
