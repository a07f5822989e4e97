use anyhow::Result;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ReleaseSettings;
use crate::core::UpdateError;
use crate::upgrade::version_check::normalize_tag;

/// A release resolved to one downloadable archive.
///
/// Produced by [`ReleaseClient`]; immutable once fetched. When the release carries
/// no matching asset, `download_url` points at the repository's automatic
/// source archive for the tag and `is_source_archive` is set. That is a valid
/// result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseInfo {
    pub tag: String,
    pub asset_name: String,
    pub download_url: String,
    pub notes: String,
    pub is_prerelease: bool,
    pub is_source_archive: bool,
}

impl ReleaseInfo {
    /// Tag without a leading `v`.
    #[must_use]
    pub fn version(&self) -> &str {
        normalize_tag(&self.tag)
    }
}

/// Release as returned by the API. Only the fields the engine reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRelease {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ApiAsset>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
}

/// One downloadable file attached to a release.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// Picks the release asset to download from an ordered list of name globs.
#[derive(Debug, Clone)]
pub struct AssetSelector {
    patterns: Vec<Pattern>,
}

impl AssetSelector {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    anyhow::Error::from(UpdateError::ConfigError {
                        message: format!("invalid asset pattern '{p}': {e}"),
                    })
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
        })
    }

    /// First asset matching the earliest pattern. Matching ignores case.
    #[must_use]
    pub fn select<'a>(&self, assets: &'a [ApiAsset]) -> Option<&'a ApiAsset> {
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::default()
        };
        self.patterns
            .iter()
            .find_map(|pattern| assets.iter().find(|a| pattern.matches_with(&a.name, options)))
    }
}

/// File name and URL of the automatic source archive for `tag`.
///
/// The name embeds the tag so cache lookups by version find it later.
#[must_use]
pub fn source_archive(web_base: &str, repo: &str, tag: &str) -> (String, String) {
    let repo_name = repo.rsplit('/').next().unwrap_or(repo);
    let name = format!("{}-{}.zip", repo_name, normalize_tag(tag));
    let url = format!("{}/{}/archive/refs/tags/{}.zip", web_base.trim_end_matches('/'), repo, tag);
    (name, url)
}

/// Build the HTTP client used for API calls and downloads.
pub fn build_http_client(settings: &ReleaseSettings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(&settings.user_agent)
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()
        .map_err(|e| {
            UpdateError::NetworkError {
                operation: "build HTTP client".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
}

/// Queries the remote release registry.
///
/// Failures surface as [`UpdateError::NetworkError`] carrying the raw message.
/// Background callers treat them as "no update available".
pub struct ReleaseClient {
    client: reqwest::Client,
    api_base: String,
    web_base: String,
    selector: AssetSelector,
    include_prereleases: bool,
}

impl ReleaseClient {
    /// Client for the registry described by `settings`.
    ///
    /// # Arguments
    ///
    /// * `settings` - API and web base URLs, user agent, timeout, asset patterns and
    ///   whether pre-releases count as updates
    ///
    /// # Errors
    ///
    /// Fails when an asset pattern is not a valid glob or the HTTP client cannot be
    /// built.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use hotswap_updater::config::EngineConfig;
    /// use hotswap_updater::upgrade::ReleaseClient;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let config = EngineConfig::new("acme/widget", "/opt/widget", "Widget.exe");
    /// let client = ReleaseClient::new(&config.release)?;
    /// let latest = client.fetch_latest("acme/widget").await?;
    /// println!("{} -> {}", latest.tag, latest.download_url);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(settings: &ReleaseSettings) -> Result<Self> {
        Ok(Self {
            client: build_http_client(settings)?,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            web_base: settings.web_base.clone(),
            selector: AssetSelector::new(&settings.asset_patterns)?,
            include_prereleases: settings.include_prereleases,
        })
    }

    /// Newest release. With `include_prereleases` the full list is consulted so a
    /// newer pre-release wins over the latest stable release.
    pub async fn fetch_latest(&self, repo: &str) -> Result<ReleaseInfo> {
        let release = if self.include_prereleases {
            let url = format!("{}/repos/{}/releases", self.api_base, repo);
            let releases: Vec<ApiRelease> = self.get_json(&url, "list releases").await?;
            releases.into_iter().find(|r| !r.draft).ok_or_else(|| UpdateError::NetworkError {
                operation: "list releases".to_string(),
                reason: format!("repository {repo} has no published releases"),
            })?
        } else {
            let url = format!("{}/repos/{}/releases/latest", self.api_base, repo);
            self.get_json(&url, "query latest release").await?
        };

        let info = self.to_release_info(repo, release);
        info!("Latest release of {}: {}", repo, info.tag);
        Ok(info)
    }

    /// Release with exactly this tag.
    pub async fn fetch_by_tag(&self, repo: &str, tag: &str) -> Result<ReleaseInfo> {
        let url = format!("{}/repos/{}/releases/tags/{}", self.api_base, repo, tag);
        let release: ApiRelease = self.get_json(&url, "query release by tag").await?;
        Ok(self.to_release_info(repo, release))
    }

    /// Release for an installed version, trying the `v`-prefixed tag first.
    pub async fn fetch_for_version(&self, repo: &str, version: &str) -> Result<ReleaseInfo> {
        let bare = normalize_tag(version);
        match self.fetch_by_tag(repo, &format!("v{bare}")).await {
            Ok(info) => Ok(info),
            Err(first) => {
                debug!("Tag v{} not found ({}), trying {}", bare, first, bare);
                self.fetch_by_tag(repo, bare).await
            }
        }
    }

    /// Resolve API metadata to a downloadable archive.
    #[must_use]
    pub fn to_release_info(&self, repo: &str, release: ApiRelease) -> ReleaseInfo {
        let notes = release.body.unwrap_or_default();
        match self.selector.select(&release.assets) {
            Some(asset) => ReleaseInfo {
                asset_name: asset.name.clone(),
                download_url: asset.browser_download_url.clone(),
                tag: release.tag_name,
                notes,
                is_prerelease: release.prerelease,
                is_source_archive: false,
            },
            None => {
                debug!(
                    "No asset of {} matches the configured patterns; using the source archive",
                    release.tag_name
                );
                let (asset_name, download_url) =
                    source_archive(&self.web_base, repo, &release.tag_name);
                ReleaseInfo {
                    asset_name,
                    download_url,
                    tag: release.tag_name,
                    notes,
                    is_prerelease: release.prerelease,
                    is_source_archive: true,
                }
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, operation: &str) -> Result<T> {
        debug!("GET {}", url);
        let network_error = |reason: String| UpdateError::NetworkError {
            operation: operation.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| network_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(network_error(format!("HTTP {status}: {}", body.trim())).into());
        }

        Ok(response.json::<T>().await.map_err(|e| network_error(e.to_string()))?)
    }
}
