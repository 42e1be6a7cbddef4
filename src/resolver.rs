use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use reqwest::{
    Client,
    header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA},
};
use serde::Deserialize;
use tracing::debug;

use crate::{
    config::LauncherConfig,
    error::ResolveError,
    version::{Platform, ResolvedVersion, ServerVersion},
};

const SERVER_MARKER: &str = "serverBedrock";

// The feed varies its response by client, so look like a browser.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/apng,*/*;q=0.8";
const BROWSER_ACCEPT_LANGUAGE: &str = "en-GB,en;q=0.9,en-US;q=0.8";

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+\.[0-9]+\.[0-9]+\.[0-9]+").unwrap());

#[derive(Debug, Deserialize)]
struct Feed {
    result: FeedResult,
}

#[derive(Debug, Deserialize)]
struct FeedResult {
    links: Vec<FeedLink>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedLink {
    download_type: String,
    download_url: String,
}

/// Builds the HTTP client used for both the feed and package downloads.
/// gzip/deflate negotiation comes from reqwest's decompression features.
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(headers)
        .build()
}

#[derive(Debug, Clone)]
pub struct VersionResolver {
    client: Client,
    feed_url: String,
    platform: Option<Platform>,
    preview: bool,
}

impl VersionResolver {
    pub fn new(config: &LauncherConfig) -> Result<Self, ResolveError> {
        Ok(Self {
            client: build_http_client()?,
            feed_url: config.download_page.clone(),
            platform: Platform::current(),
            preview: config.preview,
        })
    }

    /// Resolve for a specific platform instead of the host's.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn platform_key(&self) -> Result<String, ResolveError> {
        self.platform
            .map(|p| p.feed_key(self.preview))
            .ok_or_else(|| ResolveError::UnknownPlatform(std::env::consts::OS.to_string()))
    }

    pub async fn check_available_version(&self) -> Result<ResolvedVersion, ResolveError> {
        let key = self.platform_key()?;

        let body = self
            .client
            .get(&self.feed_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let resolved = resolve_from_feed(&body, &key)?;
        debug!("Feed offers {} for {}", resolved, key);
        Ok(resolved)
    }
}

/// Picks the download for `platform_key` out of a raw feed document and
/// reads the build number from its URL.
pub fn resolve_from_feed(body: &str, platform_key: &str) -> Result<ResolvedVersion, ResolveError> {
    let feed: Feed =
        serde_json::from_str(body).map_err(|e| ResolveError::FeedFormat(e.to_string()))?;

    let downloads: HashMap<String, String> = feed
        .result
        .links
        .into_iter()
        .filter(|link| link.download_type.contains(SERVER_MARKER))
        .map(|link| {
            (
                link.download_type.replace(SERVER_MARKER, ""),
                link.download_url,
            )
        })
        .collect();

    let url = downloads
        .get(platform_key)
        .ok_or_else(|| ResolveError::UnknownPlatform(platform_key.to_string()))?;

    let version = VERSION_RE
        .find(url)
        .ok_or_else(|| ResolveError::FeedFormat(format!("no version in {url}")))?
        .as_str()
        .parse::<ServerVersion>()
        .map_err(|e| ResolveError::FeedFormat(e.to_string()))?;

    Ok(ResolvedVersion {
        version,
        url: url.clone(),
    })
}
