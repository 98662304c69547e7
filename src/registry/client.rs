// RegistryClient speaks the registry HTTP API v2 on behalf of the dashboard
// and the purge job: catalog walks, tag listings, manifest and config
// inspection, and tag deletion by digest. It also owns the catalog snapshot
// and the per-repository tag counts the UI reads between refreshes.

use crate::common::{CollectionUtils, FormatUtils, RegistryApi, Timer};
use crate::config::{PerformanceConfig, RegistryConfig};
use crate::digest::DigestUtils;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler, ValidationErrorHandler};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::Repository;
use crate::registry::auth::{Auth, AuthScheme};
use crate::registry::credentials::{Credentials, DockerKeychain};
use crate::registry::manifest::{
    self, ImageInfo, IndexManifest, ManifestResponse, ManifestType, SchemaV1Manifest,
};
use crate::registry::token_manager::{self, CATALOG_SCOPE, TokenManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, LINK};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use url::Url;

pub const USER_AGENT: &str = "registry-ui";
const CONTENT_DIGEST_HEADER: &str = "Docker-Content-Digest";

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagsPage {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct RegistryClientBuilder {
    address: String,
    credentials: Credentials,
    verify_tls: bool,
    timeout: Duration,
    page_size: usize,
}

impl RegistryClientBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: Credentials::anonymous(),
            verify_tls: true,
            timeout: Duration::from_secs(30),
            page_size: 100,
        }
    }

    /// Builder preloaded from config, credentials resolved from password file or keychain
    pub fn from_config(registry: &RegistryConfig, performance: &PerformanceConfig) -> Result<Self> {
        let credentials = if registry.auth_with_keychain {
            DockerKeychain::default_path()?.lookup(&registry.hostname)?
        } else {
            Credentials::new(registry.username.clone(), registry.resolve_password()?)
        };

        Ok(Self::new(registry.address())
            .with_credentials(credentials)
            .with_verify_tls(registry.verify_tls)
            .with_timeout(registry.timeout())
            .with_page_size(performance.catalog_page_size))
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Build the client and discover the registry's auth scheme.
    ///
    /// Fails when the registry is unreachable or answers the root probe with
    /// anything but 200 or a supported 401 challenge.
    pub async fn build(self) -> Result<RegistryClient> {
        let output = Logger::new("registry.client");
        let address = self.address.trim_end_matches('/').to_string();
        let base_url = ValidationErrorHandler::validate_registry_url(&address)?;

        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(Duration::from_secs(10)));
        if !self.verify_tls {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let http = builder
            .build()
            .map_err(|e| RegistryError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let auth = Auth::new(http.clone(), &address, self.credentials);
        let scheme = auth.discover_auth_scheme(&output).await?;
        match &scheme {
            AuthScheme::Anonymous => output.info("Registry does not require authentication"),
            AuthScheme::Basic => output.info("Registry uses basic authentication"),
            AuthScheme::Bearer { realm, service } => output.info(&format!(
                "Registry uses token authentication (realm={}, service={})",
                realm, service
            )),
        }
        if scheme != AuthScheme::Anonymous && auth.credentials().is_anonymous() {
            output.warning("Registry requires authentication but no credentials are configured");
        }

        let tokens = TokenManager::new(auth, scheme, Logger::new("registry.auth"));

        Ok(RegistryClient {
            http,
            address,
            base_url,
            tokens,
            page_size: self.page_size,
            catalog: RwLock::new(Arc::new(Vec::new())),
            catalog_ready: AtomicBool::new(false),
            tag_counts: Mutex::new(HashMap::new()),
            output,
        })
    }
}

pub struct RegistryClient {
    http: Client,
    address: String,
    base_url: Url,
    tokens: TokenManager,
    page_size: usize,
    catalog: RwLock<Arc<Vec<Repository>>>,
    catalog_ready: AtomicBool,
    tag_counts: Mutex<HashMap<String, usize>>,
    output: Logger,
}

impl RegistryClient {
    pub fn builder(address: impl Into<String>) -> RegistryClientBuilder {
        RegistryClientBuilder::new(address)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn auth_scheme(&self) -> &AuthScheme {
        self.tokens.scheme()
    }

    /// True once the first catalog walk has completed
    pub fn is_catalog_ready(&self) -> bool {
        self.catalog_ready.load(Ordering::Acquire)
    }

    /// Current catalog snapshot
    pub fn catalog(&self) -> Arc<Vec<Repository>> {
        self.catalog
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    /// Repositories from the cached snapshot, or from a fresh paginated walk.
    ///
    /// A fresh walk replaces the snapshot only once every page has been read.
    /// When the walk fails the previous snapshot is returned.
    pub async fn list_repositories(&self, use_cache: bool) -> Vec<Repository> {
        if use_cache {
            let cached = self.catalog();
            if !cached.is_empty() {
                return cached.as_ref().clone();
            }
        }

        if let Err(e) = self.refresh_catalog().await {
            self.output
                .error(&format!("[RefreshCatalog] Error fetching catalog: {}", e));
        }
        self.catalog().as_ref().clone()
    }

    /// Walk the whole catalog and publish it; returns the snapshot size.
    ///
    /// An empty result keeps the previous snapshot.
    pub async fn refresh_catalog(&self) -> Result<usize> {
        let timer = Timer::start("[RefreshCatalog] Job complete");
        self.output.info("[RefreshCatalog] Started reading catalog...");

        let repositories = self.try_list_catalog().await?;
        if repositories.is_empty() {
            self.output.warning(
                "[RefreshCatalog] Catalog looks empty, preserving previous list if any.",
            );
        } else if let Ok(mut guard) = self.catalog.write() {
            *guard = Arc::new(repositories);
        }
        self.catalog_ready.store(true, Ordering::Release);

        let count = self.catalog().len();
        timer.log_elapsed(&self.output, &format!(": {} repos found", count));
        Ok(count)
    }

    async fn try_list_catalog(&self) -> Result<Vec<Repository>> {
        let mut next = Some(format!("{}/v2/_catalog?n={}", self.address, self.page_size));
        let mut visited = HashSet::new();
        let mut seen = HashSet::new();
        let mut repositories = Vec::new();

        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                self.output
                    .warning(&format!("[RefreshCatalog] Pagination loops back to {}", url));
                break;
            }

            let token = self.tokens.get_token(CATALOG_SCOPE).await;
            let response = self
                .send(Method::GET, &url, &token, None, "catalog listing")
                .await?;
            if !response.status().is_success() {
                return Err(HttpErrorHandler::from_response(response, "catalog listing").await);
            }

            next = self.next_page_url(response.headers())?;
            let page: CatalogPage = response.json().await.map_err(|e| {
                NetworkErrorHandler::handle_network_error(&e, "catalog listing")
            })?;

            let batch = page.repositories.unwrap_or_default();
            self.output
                .debug(&format!("[RefreshCatalog] Repo batch received: {:?}", batch));
            for path in batch {
                if seen.insert(path.clone()) {
                    repositories.push(Repository::from_path(&path));
                }
            }
        }

        Ok(repositories)
    }

    fn next_page_url(&self, headers: &HeaderMap) -> Result<Option<String>> {
        let Some(link) = headers.get(LINK).and_then(|v| v.to_str().ok()) else {
            return Ok(None);
        };
        match parse_next_link(link) {
            Some(target) => Ok(Some(self.base_url.join(&target)?.to_string())),
            None => Ok(None),
        }
    }

    /// Tags of a repository in registry order; updates the cached tag count.
    ///
    /// A 404 means the repository has no tags. Other failures are logged and
    /// yield an empty list without touching the count.
    pub async fn list_tags(&self, repository: &str) -> Vec<String> {
        match self.try_list_tags(repository).await {
            Ok(tags) => {
                self.set_tag_count(repository, tags.len());
                tags
            }
            Err(RegistryError::NotFound(_)) => {
                self.set_tag_count(repository, 0);
                Vec::new()
            }
            Err(e) => {
                self.output
                    .error(&format!("Error listing tags for repo {}: {}", repository, e));
                Vec::new()
            }
        }
    }

    async fn try_list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let mut next = Some(format!("{}/v2/{}/tags/list", self.address, repository));
        let mut visited = HashSet::new();
        let mut tags = Vec::new();

        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                break;
            }

            let token = self
                .tokens
                .get_token(&token_manager::pull_scope(repository))
                .await;
            let response = self
                .send(Method::GET, &url, &token, None, "tag listing")
                .await?;
            if !response.status().is_success() {
                return Err(HttpErrorHandler::from_response(
                    response,
                    &format!("tag listing for {}", repository),
                )
                .await);
            }

            next = self.next_page_url(response.headers())?;
            let page: TagsPage = response
                .json()
                .await
                .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "tag listing"))?;
            tags.extend(page.tags.unwrap_or_default());
        }

        Ok(tags)
    }

    fn set_tag_count(&self, repository: &str, count: usize) {
        if let Ok(mut counts) = self.tag_counts.lock() {
            counts.insert(repository.to_string(), count);
        }
    }

    /// Fetch a manifest by tag or digest asking for `media_type`.
    ///
    /// Failures are logged and yield `None`. The digest is taken from
    /// `Docker-Content-Digest`, or computed over the body when the header is absent.
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
    ) -> Option<ManifestResponse> {
        let token = self
            .tokens
            .get_token(&token_manager::pull_scope(repository))
            .await;
        match self
            .try_get_manifest(repository, reference, media_type, &token)
            .await
        {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                self.output.error(&format!(
                    "Error fetching manifest {}:{}: {}",
                    repository, reference, e
                ));
                None
            }
        }
    }

    async fn try_get_manifest(
        &self,
        repository: &str,
        reference: &str,
        accept: &str,
        token: &str,
    ) -> Result<ManifestResponse> {
        let url = format!("{}/v2/{}/manifests/{}", self.address, repository, reference);
        let response = self
            .send(Method::GET, &url, token, Some(accept), "manifest fetch")
            .await?;
        if !response.status().is_success() {
            return Err(HttpErrorHandler::from_response(
                response,
                &format!("manifest fetch for {}:{}", repository, reference),
            )
            .await);
        }

        let header_digest = response
            .headers()
            .get(CONTENT_DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "manifest fetch"))?
            .to_vec();

        let digest = match header_digest {
            Some(digest) => digest,
            None => {
                let digest = DigestUtils::compute_docker_digest(&body);
                self.output.detail(&format!(
                    "No {} header for {}:{}, computed {}",
                    CONTENT_DIGEST_HEADER, repository, reference, digest
                ));
                digest
            }
        };
        self.output.detail(&format!("Manifest type: {}", media_type));

        Ok(ManifestResponse {
            digest,
            media_type,
            body,
        })
    }

    async fn try_get_blob(&self, repository: &str, digest: &str, token: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v2/{}/blobs/{}", self.address, repository, digest);
        let response = self
            .send(Method::GET, &url, token, None, "config blob fetch")
            .await?;
        if !response.status().is_success() {
            return Err(HttpErrorHandler::from_response(
                response,
                &format!("config blob fetch for {}@{}", repository, digest),
            )
            .await);
        }
        Ok(response
            .bytes()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "config blob fetch"))?
            .to_vec())
    }

    /// Delete a tag by resolving it to its manifest digest first.
    ///
    /// Every tag pointing at the same digest goes with it. Returns `true` on
    /// success, after decrementing the cached tag count.
    pub async fn delete_tag(&self, repository: &str, tag: &str) -> bool {
        match self.try_delete_tag(repository, tag).await {
            Ok(digest) => {
                if let Ok(mut counts) = self.tag_counts.lock() {
                    if let Some(count) = counts.get_mut(repository) {
                        *count = count.saturating_sub(1);
                    }
                }
                self.output.info(&format!(
                    "Image {}:{} ({}) has been successfully deleted.",
                    repository, tag, digest
                ));
                true
            }
            Err(e) => {
                self.output
                    .error(&format!("Error deleting image {}:{}: {}", repository, tag, e));
                false
            }
        }
    }

    async fn try_delete_tag(&self, repository: &str, tag: &str) -> Result<String> {
        let token = self
            .tokens
            .get_token(&token_manager::delete_scope(repository))
            .await;
        let accept = manifest::STORED_MANIFEST_TYPES.join(", ");
        let digest = self
            .try_get_manifest(repository, tag, &accept, &token)
            .await?
            .digest;
        if !DigestUtils::is_valid_docker_digest(&digest) {
            return Err(RegistryError::Registry(format!(
                "Refusing to delete {}:{} by malformed digest {}",
                repository, tag, digest
            )));
        }

        let url = format!("{}/v2/{}/manifests/{}", self.address, repository, digest);
        let response = self
            .send(Method::DELETE, &url, &token, None, "manifest deletion")
            .await?;
        if response.status() != StatusCode::ACCEPTED && !response.status().is_success() {
            return Err(HttpErrorHandler::from_response(
                response,
                &format!("manifest deletion for {}@{}", repository, digest),
            )
            .await);
        }
        Ok(digest)
    }

    /// Detail view of a tag or digest: index platforms or image config data
    pub async fn get_image_info(&self, repository: &str, reference: &str) -> Result<ImageInfo> {
        let result = self.try_get_image_info(repository, reference).await;
        match &result {
            Ok(info) if info.is_image => self.output.detail(&format!(
                "{}:{} {} ({})",
                repository,
                reference,
                info.platforms,
                FormatUtils::pretty_size(info.image_size)
            )),
            Ok(_) => {}
            Err(e) => self.output.error(&format!(
                "Error fetching image reference {}:{}: {}",
                repository, reference, e
            )),
        }
        result
    }

    async fn try_get_image_info(&self, repository: &str, reference: &str) -> Result<ImageInfo> {
        let token = self
            .tokens
            .get_token(&token_manager::pull_scope(repository))
            .await;
        let response = self
            .try_get_manifest(repository, reference, &manifest::accept_any_manifest(), &token)
            .await?;

        match response.manifest_type() {
            t if t.is_index() => ImageInfo::from_index(repository, reference, &response),
            ManifestType::DockerV1 => ImageInfo::from_schema_v1(repository, reference, &response),
            t if t.is_image() => {
                let image: manifest::ImageManifest = response.parse()?;
                let config = self
                    .try_get_blob(repository, &image.config.digest, &token)
                    .await?;
                ImageInfo::from_image(repository, reference, &response, &config)
            }
            _ => Err(RegistryError::Registry(format!(
                "Image reference {}:{} is neither index nor image ({})",
                repository, reference, response.media_type
            ))),
        }
    }

    /// Creation time of the image behind `tag`.
    ///
    /// An index resolves to its linux/amd64 child, else its first non-attestation
    /// child. `None` when the time is missing, unparseable or the zero instant,
    /// or when the lookup fails.
    pub async fn get_image_created(&self, repository: &str, tag: &str) -> Option<DateTime<Utc>> {
        match self.try_get_image_created(repository, tag).await {
            Ok(created) => created,
            Err(e) => {
                self.output.error(&format!(
                    "Cannot read creation time of {}:{}: {}",
                    repository, tag, e
                ));
                None
            }
        }
    }

    async fn try_get_image_created(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let token = self
            .tokens
            .get_token(&token_manager::pull_scope(repository))
            .await;
        let accept = manifest::accept_any_manifest();
        let mut response = self
            .try_get_manifest(repository, tag, &accept, &token)
            .await?;

        if response.manifest_type().is_index() {
            let index: IndexManifest = response.parse()?;
            let Some(child) = index.default_child() else {
                return Ok(None);
            };
            response = self
                .try_get_manifest(repository, &child.digest, &accept, &token)
                .await?;
        }

        match response.manifest_type() {
            ManifestType::DockerV1 => Ok(response.parse::<SchemaV1Manifest>()?.created()),
            t if t.is_image() => {
                let image: manifest::ImageManifest = response.parse()?;
                let config = self
                    .try_get_blob(repository, &image.config.digest, &token)
                    .await?;
                let config: manifest::ConfigBlob = serde_json::from_slice(&config)?;
                Ok(config.created())
            }
            _ => Ok(None),
        }
    }

    /// Snapshot of the per-repository tag counts
    pub fn tag_counts(&self) -> HashMap<String, usize> {
        self.tag_counts
            .lock()
            .map(|counts| counts.clone())
            .unwrap_or_default()
    }

    /// Tag counts aggregated per `repo_path/name`, including every repository below it
    pub fn sub_repo_tag_counts(&self, repo_path: &str, names: &[String]) -> HashMap<String, usize> {
        let counts = self.tag_counts();
        let mut result = HashMap::new();
        for name in names {
            let sub_repo = if repo_path.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", repo_path, name)
            };
            let prefix = format!("{}/", sub_repo);
            let total: usize = counts
                .iter()
                .filter(|(k, _)| **k == sub_repo || k.starts_with(&prefix))
                .map(|(_, v)| *v)
                .sum();
            if total > 0 {
                result.insert(sub_repo, total);
            }
        }
        result
    }

    /// Namespaces present in the cached catalog, sorted
    pub fn namespaces(&self) -> Vec<String> {
        CollectionUtils::unique_sorted(self.catalog().iter().map(|r| r.namespace.clone()))
    }

    /// Cached repositories grouped by namespace
    pub fn repositories_by_namespace(&self) -> HashMap<String, Vec<Repository>> {
        let mut grouped: HashMap<String, Vec<Repository>> = HashMap::new();
        for repository in self.catalog().iter() {
            grouped
                .entry(repository.namespace.clone())
                .or_default()
                .push(repository.clone());
        }
        grouped
    }

    /// One tag-count pass over the cached catalog
    pub async fn count_tags(&self) {
        let timer = Timer::start("[CountTags] Job complete");
        self.output.info("[CountTags] Started counting tags...");
        for repository in self.catalog().iter() {
            self.list_tags(&repository.path).await;
        }
        timer.log_elapsed(&self.output, ".");
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        accept: Option<&str>,
        operation: &str,
    ) -> Result<Response> {
        let mut request = self.http.request(method, url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        request = self
            .tokens
            .auth()
            .authorize(request, self.tokens.scheme(), token);

        request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn list_repositories(&self, use_cache: bool) -> Vec<Repository> {
        RegistryClient::list_repositories(self, use_cache).await
    }

    async fn list_tags(&self, repository: &str) -> Vec<String> {
        RegistryClient::list_tags(self, repository).await
    }

    async fn get_image_created(&self, repository: &str, tag: &str) -> Option<DateTime<Utc>> {
        RegistryClient::get_image_created(self, repository, tag).await
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> bool {
        RegistryClient::delete_tag(self, repository, tag).await
    }
}

/// Target of the `rel="next"` entry of a `Link` header
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        let is_next = params.split(';').any(|param| {
            param
                .trim()
                .strip_prefix("rel=")
                .map(|rel| rel.trim_matches('"').eq_ignore_ascii_case("next"))
                .unwrap_or(false)
        });
        (is_next && !target.is_empty()).then(|| target.to_string())
    })
}
