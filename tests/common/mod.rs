//! In-memory registry served over HTTP for integration tests.
//!
//! Implements just enough of the registry API v2 for the client: root probe,
//! paginated catalog, tag listing, manifest GET/DELETE, config blobs and a
//! token realm. Auth mode, digest headers and failures are switchable.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Response, StatusCode, Uri};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use registry_ui::digest::DigestUtils;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const DOCKER_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

#[derive(Debug, Clone)]
pub enum MockAuth {
    Anonymous,
    Basic { username: String, password: String },
    Bearer { token: String, use_access_token: bool },
    /// 401 with a challenge the client cannot use
    Unsupported,
}

#[derive(Debug, Clone)]
struct StoredManifest {
    media_type: String,
    body: Vec<u8>,
}

pub struct MockRegistry {
    pub address: String,
    auth: Mutex<MockAuth>,
    /// repository -> (tag, digest) in registry order
    repositories: Mutex<BTreeMap<String, Vec<(String, String)>>>,
    manifests: Mutex<HashMap<String, StoredManifest>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    pub omit_digest_header: AtomicBool,
    pub fail_catalog: AtomicBool,
    /// Each catalog page after the first repeats the previous page's last name
    pub repeat_page_boundary: AtomicBool,
    /// The final catalog page links back to the first one
    pub link_back_to_first: AtomicBool,
    pub catalog_requests: AtomicUsize,
    pub token_requests: AtomicUsize,
    pub token_scopes: Mutex<Vec<String>>,
    pub token_authorization: Mutex<Vec<String>>,
    pub deleted_digests: Mutex<Vec<String>>,
}

impl MockRegistry {
    pub fn set_auth(&self, auth: MockAuth) {
        *self.auth.lock().unwrap() = auth;
    }

    pub fn create_repository(&self, repository: &str) {
        self.repositories
            .lock()
            .unwrap()
            .entry(repository.to_string())
            .or_default();
    }

    /// Store a single-platform image and tag it; returns the manifest digest
    pub fn add_image(&self, repository: &str, tag: &str, created: &str) -> String {
        let config = serde_json::json!({
            "created": created,
            "architecture": "amd64",
            "os": "linux",
            "config": {}
        });
        let config_body = serde_json::to_vec(&config).unwrap();
        let config_digest = DigestUtils::compute_docker_digest(&config_body);
        self.blobs
            .lock()
            .unwrap()
            .insert(config_digest.clone(), config_body.clone());

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_V2,
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "digest": config_digest,
                "size": config_body.len()
            },
            "layers": [
                {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": format!("sha256:{}", "1".repeat(64)), "size": 1000},
                {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": format!("sha256:{}", "2".repeat(64)), "size": 234}
            ]
        });
        let digest = self.store_manifest(DOCKER_V2, serde_json::to_vec_pretty(&manifest).unwrap());
        self.tag(repository, tag, &digest);
        digest
    }

    /// Store an index over the given child digests and tag it
    pub fn add_index(&self, repository: &str, tag: &str, children: &[(&str, &str)]) -> String {
        let manifests: Vec<serde_json::Value> = children
            .iter()
            .map(|(digest, arch)| {
                serde_json::json!({
                    "mediaType": DOCKER_V2,
                    "digest": digest,
                    "size": 100,
                    "platform": {"architecture": arch, "os": "linux"}
                })
            })
            .collect();
        let index = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_INDEX,
            "manifests": manifests
        });
        let digest = self.store_manifest(OCI_INDEX, serde_json::to_vec(&index).unwrap());
        self.tag(repository, tag, &digest);
        digest
    }

    pub fn store_manifest(&self, media_type: &str, body: Vec<u8>) -> String {
        let digest = DigestUtils::compute_docker_digest(&body);
        self.manifests.lock().unwrap().insert(
            digest.clone(),
            StoredManifest {
                media_type: media_type.to_string(),
                body,
            },
        );
        digest
    }

    pub fn manifest_body(&self, digest: &str) -> Vec<u8> {
        self.manifests.lock().unwrap()[digest].body.clone()
    }

    pub fn tag(&self, repository: &str, tag: &str, digest: &str) {
        let mut repositories = self.repositories.lock().unwrap();
        let tags = repositories.entry(repository.to_string()).or_default();
        tags.retain(|(t, _)| t != tag);
        tags.push((tag.to_string(), digest.to_string()));
    }

    pub fn tags(&self, repository: &str) -> Vec<String> {
        self.repositories
            .lock()
            .unwrap()
            .get(repository)
            .map(|tags| tags.iter().map(|(t, _)| t.clone()).collect())
            .unwrap_or_default()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let header = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        match &*self.auth.lock().unwrap() {
            MockAuth::Anonymous => true,
            MockAuth::Basic { username, password } => {
                header == format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
            }
            MockAuth::Bearer { token, .. } => header == format!("Bearer {}", token),
            MockAuth::Unsupported => false,
        }
    }

    fn challenge(&self) -> String {
        match &*self.auth.lock().unwrap() {
            MockAuth::Basic { .. } => r#"Basic realm="Registry Realm""#.to_string(),
            MockAuth::Bearer { .. } => format!(
                r#"Bearer realm="{}/token",service="mock-registry""#,
                self.address
            ),
            _ => r#"Negotiate realm="corp""#.to_string(),
        }
    }

    fn handle(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Response<Body> {
        let path = uri.path();
        let query = parse_query(uri.query().unwrap_or(""));

        if path == "/token" {
            return self.issue_token(&query, headers);
        }
        if !self.authorized(headers) {
            return Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .header("www-authenticate", self.challenge())
                .body(Body::from(r#"{"errors":[{"code":"UNAUTHORIZED"}]}"#))
                .unwrap();
        }
        if path == "/v2/" {
            return json(StatusCode::OK, "{}".to_string());
        }
        if path == "/v2/_catalog" {
            return self.catalog(&query);
        }

        let Some(rest) = path.strip_prefix("/v2/") else {
            return not_found();
        };
        if let Some(repository) = rest.strip_suffix("/tags/list") {
            return self.tags_list(repository);
        }
        if let Some((repository, reference)) = rest.rsplit_once("/manifests/") {
            if *method == Method::DELETE {
                return self.delete_manifest(repository, reference);
            }
            return self.get_manifest(repository, reference);
        }
        if let Some((_, digest)) = rest.rsplit_once("/blobs/") {
            return match self.blobs.lock().unwrap().get(digest) {
                Some(body) => Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "application/octet-stream")
                    .body(Body::from(body.clone()))
                    .unwrap(),
                None => not_found(),
            };
        }
        not_found()
    }

    fn issue_token(&self, query: &HashMap<String, String>, headers: &HeaderMap) -> Response<Body> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        self.token_scopes
            .lock()
            .unwrap()
            .push(query.get("scope").cloned().unwrap_or_default());
        self.token_authorization.lock().unwrap().push(
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string(),
        );

        match &*self.auth.lock().unwrap() {
            MockAuth::Bearer {
                token,
                use_access_token: true,
            } => json(
                StatusCode::OK,
                serde_json::json!({ "access_token": token }).to_string(),
            ),
            MockAuth::Bearer { token, .. } => json(
                StatusCode::OK,
                serde_json::json!({ "token": token, "expires_in": 300 }).to_string(),
            ),
            _ => not_found(),
        }
    }

    fn catalog(&self, query: &HashMap<String, String>) -> Response<Body> {
        self.catalog_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_catalog.load(Ordering::SeqCst) {
            return json(
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"errors":[{"code":"UNKNOWN"}]}"#.to_string(),
            );
        }

        let n: usize = query.get("n").and_then(|n| n.parse().ok()).unwrap_or(100);
        let last = query.get("last").cloned().unwrap_or_default();
        let repeat = self.repeat_page_boundary.load(Ordering::SeqCst);
        let names: Vec<String> = self
            .repositories
            .lock()
            .unwrap()
            .keys()
            .filter(|name| {
                last.is_empty()
                    || name.as_str() > last.as_str()
                    || (repeat && name.as_str() == last.as_str())
            })
            .cloned()
            .collect();

        let page: Vec<String> = names.iter().take(n).cloned().collect();
        let body = serde_json::json!({ "repositories": page }).to_string();
        let mut response = Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json");
        if names.len() > n {
            if let Some(last) = page.last() {
                response = response.header(
                    "link",
                    format!(r#"</v2/_catalog?last={}&n={}>; rel="next""#, last, n),
                );
            }
        } else if self.link_back_to_first.load(Ordering::SeqCst) {
            response = response.header("link", format!(r#"</v2/_catalog?n={}>; rel="next""#, n));
        }
        response.body(Body::from(body)).unwrap()
    }

    fn tags_list(&self, repository: &str) -> Response<Body> {
        match self.repositories.lock().unwrap().get(repository) {
            Some(tags) => {
                let names: Vec<&str> = tags.iter().map(|(t, _)| t.as_str()).collect();
                json(
                    StatusCode::OK,
                    serde_json::json!({ "name": repository, "tags": names }).to_string(),
                )
            }
            None => json(
                StatusCode::NOT_FOUND,
                r#"{"errors":[{"code":"NAME_UNKNOWN"}]}"#.to_string(),
            ),
        }
    }

    fn resolve(&self, repository: &str, reference: &str) -> Option<String> {
        if reference.starts_with("sha256:") {
            return Some(reference.to_string());
        }
        self.repositories
            .lock()
            .unwrap()
            .get(repository)?
            .iter()
            .find(|(t, _)| t == reference)
            .map(|(_, d)| d.clone())
    }

    fn get_manifest(&self, repository: &str, reference: &str) -> Response<Body> {
        let Some(digest) = self.resolve(repository, reference) else {
            return not_found();
        };
        let Some(stored) = self.manifests.lock().unwrap().get(&digest).cloned() else {
            return not_found();
        };

        let mut response = Response::builder()
            .status(StatusCode::OK)
            .header("content-type", stored.media_type);
        if !self.omit_digest_header.load(Ordering::SeqCst) {
            response = response.header("docker-content-digest", digest);
        }
        response.body(Body::from(stored.body)).unwrap()
    }

    fn delete_manifest(&self, repository: &str, reference: &str) -> Response<Body> {
        if !reference.starts_with("sha256:") {
            return json(
                StatusCode::BAD_REQUEST,
                r#"{"errors":[{"code":"DIGEST_INVALID"}]}"#.to_string(),
            );
        }
        let mut repositories = self.repositories.lock().unwrap();
        let Some(tags) = repositories.get_mut(repository) else {
            return not_found();
        };
        let before = tags.len();
        tags.retain(|(_, d)| d != reference);
        if tags.len() == before {
            return not_found();
        }
        self.deleted_digests
            .lock()
            .unwrap()
            .push(reference.to_string());
        Response::builder()
            .status(StatusCode::ACCEPTED)
            .body(Body::empty())
            .unwrap()
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn json(status: StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn not_found() -> Response<Body> {
    json(
        StatusCode::NOT_FOUND,
        r#"{"errors":[{"code":"MANIFEST_UNKNOWN"}]}"#.to_string(),
    )
}

async fn dispatch(
    State(registry): State<Arc<MockRegistry>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response<Body> {
    registry.handle(&method, &uri, &headers)
}

/// Start a mock registry on an ephemeral port
pub async fn start_registry(auth: MockAuth) -> Arc<MockRegistry> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let registry = Arc::new(MockRegistry {
        address: format!("http://{}", addr),
        auth: Mutex::new(auth),
        repositories: Mutex::new(BTreeMap::new()),
        manifests: Mutex::new(HashMap::new()),
        blobs: Mutex::new(HashMap::new()),
        omit_digest_header: AtomicBool::new(false),
        fail_catalog: AtomicBool::new(false),
        repeat_page_boundary: AtomicBool::new(false),
        link_back_to_first: AtomicBool::new(false),
        catalog_requests: AtomicUsize::new(0),
        token_requests: AtomicUsize::new(0),
        token_scopes: Mutex::new(Vec::new()),
        token_authorization: Mutex::new(Vec::new()),
        deleted_digests: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .fallback(dispatch)
        .with_state(Arc::clone(&registry));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    registry
}
