//! Runtime version resolution
//!
//! Resolves aliases such as `lts`, `iron` or `20` into concrete Node.js
//! versions using the public release index.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

static RELEASE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)$").expect("valid release regex"));

static VERSION_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+)(?:\.(\d+|x))?(?:\.(\d+|x))?$").expect("valid range regex")
});

/// Version catalog lookup
#[async_trait]
pub trait VersionResolver: Send + Sync {
    /// Candidate versions for `alias`, newest first
    async fn resolve(&self, alias: &str, latest_of_major_only: bool) -> AppResult<Vec<String>>;
}

/// One entry of the release index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: (u64, u64, u64),
    /// LTS codename, lowercased
    pub lts: Option<String>,
}

impl Release {
    /// Parse `v20.11.0` style versions
    pub fn parse(version: &str, lts: Option<&str>) -> Option<Self> {
        let caps = RELEASE_VERSION.captures(version.trim())?;
        let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
        Some(Self {
            version: (part(1)?, part(2)?, part(3)?),
            lts: lts.map(|s| s.to_ascii_lowercase()),
        })
    }

    pub fn display(&self) -> String {
        let (major, minor, patch) = self.version;
        format!("{}.{}.{}", major, minor, patch)
    }
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    version: String,
    #[serde(default)]
    lts: serde_json::Value,
}

enum Selector {
    Lts,
    /// Only the newest LTS line
    ActiveLts,
    All,
    Range {
        major: u64,
        minor: Option<u64>,
        patch: Option<u64>,
    },
    Codename(String),
}

impl Selector {
    fn parse(alias: &str) -> Self {
        let alias = alias.trim().to_ascii_lowercase();
        match alias.as_str() {
            "lts" | "lts_latest" | "lts/*" => return Selector::Lts,
            "lts_active" | "active" => return Selector::ActiveLts,
            "current" | "latest" | "node" | "*" => return Selector::All,
            _ => {}
        }

        if let Some(caps) = VERSION_RANGE.captures(&alias) {
            let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
            if let Some(major) = num(1) {
                return Selector::Range {
                    major,
                    minor: num(2),
                    patch: num(3),
                };
            }
        }

        let codename = alias.strip_prefix("lts/").unwrap_or(&alias).to_string();
        Selector::Codename(codename)
    }

    fn matches(&self, release: &Release, active_major: Option<u64>) -> bool {
        let (major, minor, patch) = release.version;
        match self {
            Selector::Lts => release.lts.is_some(),
            Selector::ActiveLts => release.lts.is_some() && Some(major) == active_major,
            Selector::All => true,
            Selector::Range {
                major: want_major,
                minor: want_minor,
                patch: want_patch,
            } => {
                major == *want_major
                    && want_minor.is_none_or(|m| m == minor)
                    && want_patch.is_none_or(|p| p == patch)
            }
            Selector::Codename(name) => release.lts.as_deref() == Some(name.as_str()),
        }
    }
}

/// Pick candidate versions for `alias` from a release list, newest first
pub fn select_versions(releases: &[Release], alias: &str, latest_of_major_only: bool) -> Vec<String> {
    let selector = Selector::parse(alias);
    let active_major = releases
        .iter()
        .filter(|r| r.lts.is_some())
        .map(|r| r.version.0)
        .max();

    let mut matching: Vec<&Release> = releases
        .iter()
        .filter(|r| selector.matches(r, active_major))
        .collect();
    matching.sort_by_key(|r| Reverse(r.version));
    matching.dedup_by_key(|r| r.version);

    let mut seen_majors = HashSet::new();
    matching
        .into_iter()
        .filter(|r| !latest_of_major_only || seen_majors.insert(r.version.0))
        .map(Release::display)
        .collect()
}

/// Resolver backed by the Node.js distribution index
pub struct NodeReleaseIndex {
    client: reqwest::Client,
    url: String,
}

impl NodeReleaseIndex {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn fetch(&self) -> AppResult<Vec<Release>> {
        let entries: Vec<IndexEntry> = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::VersionResolution(e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::VersionResolution(e.to_string()))?;

        Ok(entries
            .iter()
            .filter_map(|e| Release::parse(&e.version, e.lts.as_str()))
            .collect())
    }
}

#[async_trait]
impl VersionResolver for NodeReleaseIndex {
    async fn resolve(&self, alias: &str, latest_of_major_only: bool) -> AppResult<Vec<String>> {
        let releases = self.fetch().await?;
        tracing::debug!(url = %self.url, releases = releases.len(), "Fetched release index");
        Ok(select_versions(&releases, alias, latest_of_major_only))
    }
}

/// Resolver answering from a fixed table, for offline runs
#[derive(Debug, Clone, Default)]
pub struct FixedVersions {
    table: HashMap<String, Vec<String>>,
}

impl FixedVersions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, alias: impl Into<String>, versions: &[&str]) -> Self {
        self.table
            .insert(alias.into(), versions.iter().map(|v| v.to_string()).collect());
        self
    }
}

#[async_trait]
impl VersionResolver for FixedVersions {
    async fn resolve(&self, alias: &str, _latest_of_major_only: bool) -> AppResult<Vec<String>> {
        Ok(self.table.get(alias).cloned().unwrap_or_default())
    }
}
