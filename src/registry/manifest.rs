//! Manifest media types and the documents registries return for them
//!
//! Registries serve the same image as Docker schema 1, Docker schema 2, OCI
//! manifests or multi-platform indexes. The types here classify a response and
//! pull out what the dashboard and the purge engine need from each variant.

use crate::common::CollectionUtils;
use crate::digest::DigestUtils;
use crate::error::{RegistryError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MEDIA_TYPE_DOCKER_V1: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const MEDIA_TYPE_DOCKER_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Types accepted when resolving a tag to the digest of its stored manifest
pub const STORED_MANIFEST_TYPES: [&str; 4] = [
    MEDIA_TYPE_DOCKER_V2,
    MEDIA_TYPE_DOCKER_LIST,
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_OCI_INDEX,
];

/// Accept header value for inspection requests, schema 1 as last resort
pub fn accept_any_manifest() -> String {
    let mut types = STORED_MANIFEST_TYPES.to_vec();
    types.push(MEDIA_TYPE_DOCKER_V1);
    types.join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestType {
    DockerV1,
    DockerV2,
    DockerList,
    OciManifest,
    OciIndex,
    Unknown,
}

impl ManifestType {
    pub fn from_media_type(media_type: &str) -> Self {
        let media_type = media_type.split(';').next().unwrap_or("").trim();
        match media_type {
            MEDIA_TYPE_DOCKER_V1 | "application/vnd.docker.distribution.manifest.v1+json" => {
                ManifestType::DockerV1
            }
            MEDIA_TYPE_DOCKER_V2 => ManifestType::DockerV2,
            MEDIA_TYPE_DOCKER_LIST => ManifestType::DockerList,
            MEDIA_TYPE_OCI_MANIFEST => ManifestType::OciManifest,
            MEDIA_TYPE_OCI_INDEX => ManifestType::OciIndex,
            _ => ManifestType::Unknown,
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, ManifestType::DockerList | ManifestType::OciIndex)
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self,
            ManifestType::DockerV1 | ManifestType::DockerV2 | ManifestType::OciManifest
        )
    }
}

/// One manifest fetch: media type, content digest and the body as received
#[derive(Debug, Clone)]
pub struct ManifestResponse {
    pub digest: String,
    pub media_type: String,
    pub body: Vec<u8>,
}

impl ManifestResponse {
    /// Classify from Content-Type, falling back to the document itself
    pub fn manifest_type(&self) -> ManifestType {
        let from_header = ManifestType::from_media_type(&self.media_type);
        if from_header != ManifestType::Unknown {
            return from_header;
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Probe {
            schema_version: Option<u32>,
            media_type: Option<String>,
            manifests: Option<serde_json::Value>,
        }

        match serde_json::from_slice::<Probe>(&self.body) {
            Ok(Probe {
                media_type: Some(media_type),
                ..
            }) => ManifestType::from_media_type(&media_type),
            Ok(Probe {
                schema_version: Some(1),
                ..
            }) => ManifestType::DockerV1,
            Ok(Probe {
                manifests: Some(_), ..
            }) => ManifestType::OciIndex,
            Ok(Probe {
                schema_version: Some(2),
                ..
            }) => ManifestType::OciManifest,
            _ => ManifestType::Unknown,
        }
    }

    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            RegistryError::Parse(format!("Malformed manifest {}: {}", self.digest, e))
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = self.variant.as_deref().filter(|v| !v.is_empty()) {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: Option<String>,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// Docker schema 2 or OCI image manifest
#[derive(Debug, Clone, Deserialize)]
pub struct ImageManifest {
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    pub fn total_size(&self) -> u64 {
        self.layers.iter().map(|l| l.size).sum()
    }
}

/// Docker manifest list or OCI index
#[derive(Debug, Clone, Deserialize)]
pub struct IndexManifest {
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

impl IndexManifest {
    /// Child used for single-valued lookups: linux/amd64 when present, else
    /// the first child. Attestation entries (`unknown/unknown`) are never picked.
    pub fn default_child(&self) -> Option<&Descriptor> {
        let mut children = self.manifests.iter().filter(|m| {
            !m.platform
                .as_ref()
                .is_some_and(|p| p.os == "unknown" && p.architecture == "unknown")
        });
        let first = children.clone().next();
        children
            .find(|m| {
                m.platform
                    .as_ref()
                    .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
            })
            .or(first)
    }

    /// Unique sorted platforms joined with ", "
    pub fn platforms(&self) -> String {
        let platforms = self
            .manifests
            .iter()
            .map(|m| m.platform.as_ref().map(Platform::to_string).unwrap_or_default());
        CollectionUtils::unique_sorted(platforms).join(", ")
    }
}

/// Docker schema 1 manifest; image metadata lives in `history[].v1Compatibility`
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaV1Manifest {
    #[serde(default)]
    pub history: Vec<V1History>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct V1History {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct V1Compatibility {
    created: Option<String>,
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    os: String,
    #[serde(rename = "Size", default)]
    size: u64,
}

impl SchemaV1Manifest {
    fn entries(&self) -> Vec<V1Compatibility> {
        self.history
            .iter()
            .filter_map(|h| serde_json::from_str(&h.v1_compatibility).ok())
            .collect()
    }

    /// Creation time of the newest layer
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.entries()
            .first()
            .and_then(|e| e.created.as_deref())
            .and_then(parse_created)
    }

    pub fn platform(&self) -> String {
        self.entries()
            .first()
            .map(|e| {
                Platform {
                    architecture: e.architecture.clone(),
                    os: e.os.clone(),
                    variant: None,
                }
                .to_string()
            })
            .unwrap_or_default()
    }

    pub fn total_size(&self) -> u64 {
        self.entries().iter().map(|e| e.size).sum()
    }
}

/// The image config blob, only the fields the dashboard shows
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigBlob {
    pub created: Option<String>,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub variant: Option<String>,
}

impl ConfigBlob {
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created.as_deref().and_then(parse_created)
    }

    pub fn platform(&self) -> String {
        Platform {
            architecture: self.architecture.clone(),
            os: self.os.clone(),
            variant: self.variant.clone(),
        }
        .to_string()
    }
}

/// Parse an RFC 3339 creation time; the zero instant counts as absent.
///
/// Signature artifacts are published with `0001-01-01T00:00:00Z`.
pub fn parse_created(value: &str) -> Option<DateTime<Utc>> {
    let created = DateTime::parse_from_rfc3339(value.trim())
        .ok()?
        .with_timezone(&Utc);
    let zero = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).single();
    (Some(created) != zero).then_some(created)
}

/// Everything the dashboard shows for one tag or digest
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageInfo {
    pub is_image_index: bool,
    pub is_image: bool,
    pub repository: String,
    pub reference: String,
    pub digest: String,
    pub media_type: String,
    pub platforms: String,
    pub manifest: serde_json::Value,

    pub image_size: u64,
    pub created: Option<DateTime<Utc>>,
    pub config_image_id: String,
    pub config_file: serde_json::Value,
}

impl ImageInfo {
    pub fn from_index(
        repository: &str,
        reference: &str,
        response: &ManifestResponse,
    ) -> Result<Self> {
        let index: IndexManifest = response.parse()?;
        Ok(Self {
            is_image_index: true,
            repository: repository.to_string(),
            reference: reference.to_string(),
            digest: response.digest.clone(),
            media_type: response.media_type.clone(),
            platforms: index.platforms(),
            manifest: response.json()?,
            ..Self::default()
        })
    }

    pub fn from_image(
        repository: &str,
        reference: &str,
        response: &ManifestResponse,
        config_body: &[u8],
    ) -> Result<Self> {
        let manifest: ImageManifest = response.parse()?;
        let config: ConfigBlob = serde_json::from_slice(config_body)?;
        Ok(Self {
            is_image_index: false,
            is_image: true,
            repository: repository.to_string(),
            reference: reference.to_string(),
            digest: response.digest.clone(),
            media_type: response.media_type.clone(),
            platforms: config.platform(),
            manifest: response.json()?,
            image_size: manifest.total_size(),
            created: config.created(),
            config_image_id: DigestUtils::short_id(&manifest.config.digest).unwrap_or_default(),
            config_file: serde_json::from_slice(config_body)?,
        })
    }

    pub fn from_schema_v1(
        repository: &str,
        reference: &str,
        response: &ManifestResponse,
    ) -> Result<Self> {
        let manifest: SchemaV1Manifest = response.parse()?;
        Ok(Self {
            is_image: true,
            repository: repository.to_string(),
            reference: reference.to_string(),
            digest: response.digest.clone(),
            media_type: response.media_type.clone(),
            platforms: manifest.platform(),
            manifest: response.json()?,
            image_size: manifest.total_size(),
            created: manifest.created(),
            ..Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(media_type: &str, body: &str) -> ManifestResponse {
        ManifestResponse {
            digest: DigestUtils::compute_docker_digest(body.as_bytes()),
            media_type: media_type.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn classifies_media_types() {
        assert!(ManifestType::from_media_type(MEDIA_TYPE_OCI_INDEX).is_index());
        assert!(ManifestType::from_media_type(MEDIA_TYPE_DOCKER_LIST).is_index());
        assert!(
            ManifestType::from_media_type(&format!("{}; charset=utf-8", MEDIA_TYPE_DOCKER_V2))
                .is_image()
        );
        assert_eq!(
            ManifestType::from_media_type("text/plain"),
            ManifestType::Unknown
        );
    }

    #[test]
    fn infers_type_from_body_when_header_is_generic() {
        let v1 = response("application/json", r#"{"schemaVersion":1,"history":[]}"#);
        assert_eq!(v1.manifest_type(), ManifestType::DockerV1);

        let index = response("", r#"{"schemaVersion":2,"manifests":[]}"#);
        assert_eq!(index.manifest_type(), ManifestType::OciIndex);
    }

    #[test]
    fn index_platforms_are_unique_and_sorted() {
        let body = r#"{
            "schemaVersion": 2,
            "manifests": [
                {"digest": "sha256:a", "size": 1, "platform": {"os": "linux", "architecture": "arm64", "variant": "v8"}},
                {"digest": "sha256:b", "size": 1, "platform": {"os": "linux", "architecture": "amd64"}},
                {"digest": "sha256:c", "size": 1, "platform": {"os": "linux", "architecture": "amd64"}}
            ]
        }"#;
        let info = ImageInfo::from_index("team/app", "1.0", &response(MEDIA_TYPE_OCI_INDEX, body))
            .unwrap();
        assert!(info.is_image_index);
        assert_eq!(info.platforms, "linux/amd64, linux/arm64/v8");
    }

    #[test]
    fn image_info_sums_layers_and_reads_config() {
        let manifest = r#"{
            "schemaVersion": 2,
            "config": {"digest": "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9", "size": 10},
            "layers": [{"digest": "sha256:l1", "size": 100}, {"digest": "sha256:l2", "size": 23}]
        }"#;
        let config = br#"{"created":"2024-03-01T10:00:00.123456789Z","architecture":"amd64","os":"linux"}"#;
        let info = ImageInfo::from_image(
            "team/app",
            "1.0",
            &response(MEDIA_TYPE_DOCKER_V2, manifest),
            config,
        )
        .unwrap();

        assert!(info.is_image);
        assert!(!info.is_image_index);
        assert_eq!(info.image_size, 123);
        assert_eq!(info.platforms, "linux/amd64");
        assert_eq!(info.config_image_id, "b94d27b9934d");
        assert_eq!(
            info.created.map(|c| c.to_rfc3339()),
            Some("2024-03-01T10:00:00.123456789+00:00".to_string())
        );
    }

    #[test]
    fn schema_v1_created_from_first_history_entry() {
        let body = r#"{
            "schemaVersion": 1,
            "history": [
                {"v1Compatibility": "{\"created\":\"2023-05-06T07:08:09Z\",\"architecture\":\"amd64\",\"os\":\"linux\",\"Size\":42}"},
                {"v1Compatibility": "{\"created\":\"2020-01-01T00:00:00Z\"}"}
            ]
        }"#;
        let manifest: SchemaV1Manifest = response(MEDIA_TYPE_DOCKER_V1, body).parse().unwrap();
        assert_eq!(
            manifest.created(),
            parse_created("2023-05-06T07:08:09Z")
        );
        assert_eq!(manifest.platform(), "linux/amd64");
        assert_eq!(manifest.total_size(), 42);
    }

    #[test]
    fn zero_time_is_absent() {
        assert_eq!(parse_created("0001-01-01T00:00:00Z"), None);
        assert_eq!(parse_created("not a date"), None);
        assert!(parse_created("2024-01-01T00:00:00+02:00").is_some());
    }

    #[test]
    fn only_the_exact_zero_instant_is_absent() {
        assert!(parse_created("0001-06-01T00:00:00Z").is_some());
        assert!(parse_created("0001-01-01T00:00:01Z").is_some());
        assert_eq!(parse_created("0001-01-01T00:00:00+00:00"), None);
    }

    fn index_of(children: &[(&str, &str, &str)]) -> IndexManifest {
        let manifests: Vec<serde_json::Value> = children
            .iter()
            .map(|(digest, os, arch)| {
                serde_json::json!({
                    "digest": digest,
                    "size": 1,
                    "platform": {"os": os, "architecture": arch}
                })
            })
            .collect();
        serde_json::from_value(serde_json::json!({ "manifests": manifests })).unwrap()
    }

    #[test]
    fn default_child_prefers_linux_amd64() {
        let index = index_of(&[
            ("sha256:arm", "linux", "arm64"),
            ("sha256:amd", "linux", "amd64"),
        ]);
        assert_eq!(index.default_child().map(|d| d.digest.as_str()), Some("sha256:amd"));
    }

    #[test]
    fn default_child_skips_attestations() {
        let index = index_of(&[
            ("sha256:att", "unknown", "unknown"),
            ("sha256:arm", "linux", "arm64"),
        ]);
        assert_eq!(index.default_child().map(|d| d.digest.as_str()), Some("sha256:arm"));

        let only_attestations = index_of(&[("sha256:att", "unknown", "unknown")]);
        assert!(only_attestations.default_child().is_none());
        assert!(IndexManifest { manifests: Vec::new() }.default_child().is_none());
    }
}
