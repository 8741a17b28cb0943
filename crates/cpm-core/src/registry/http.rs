//! HTTP registry client.
//!
//! Endpoints, relative to the registry base URL:
//!
//! - `GET  /packages/{name}/versions`
//! - `GET  /packages/{name}/{version}/manifest`
//! - `GET  /packages/{name}/{version}/archive.tar.gz`
//! - `GET  /packages/search?q={query}`
//! - `POST /packages/upload` (multipart: `name`, `version`, `package`)

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use cpm_schema::{Manifest, PackageName, Version};

use super::Registry;
use crate::engine::Engine;
use crate::error::Rejection;
use crate::pack;
use crate::promise::Promise;

/// One row of a search response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    /// Package name.
    pub name: String,
    /// Latest published version.
    #[serde(default)]
    pub version: Option<String>,
    /// One-line summary.
    #[serde(default)]
    pub description: Option<String>,
    /// Author.
    #[serde(default)]
    pub author: Option<String>,
    /// Project homepage.
    #[serde(default)]
    pub homepage: Option<String>,
    /// Download count reported by the registry.
    #[serde(default)]
    pub downloads: u64,
}

/// Response of `GET /packages/search`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchResults {
    /// The query as the registry understood it.
    #[serde(default)]
    pub query: String,
    /// Matching packages.
    #[serde(default)]
    pub packages: Vec<SearchHit>,
    /// Total number of matches.
    #[serde(default)]
    pub total: usize,
}

#[derive(Clone, Deserialize)]
#[serde(untagged)]
enum VersionList {
    Wrapped { versions: Vec<VersionEntry> },
    Bare(Vec<VersionEntry>),
}

#[derive(Clone, Deserialize)]
#[serde(untagged)]
enum VersionEntry {
    Detailed { version: String },
    Plain(String),
}

impl VersionList {
    fn into_versions(self, name: &str) -> Vec<Version> {
        let entries = match self {
            Self::Wrapped { versions } | Self::Bare(versions) => versions,
        };
        entries
            .into_iter()
            .filter_map(|entry| {
                let raw = match entry {
                    VersionEntry::Detailed { version } | VersionEntry::Plain(version) => version,
                };
                Version::parse(&raw)
                    .inspect_err(|e| warn!(package = name, "skipping unparseable version: {e}"))
                    .ok()
            })
            .collect()
    }
}

/// A [`Registry`] backed by the CPM registry HTTP API.
#[derive(Clone)]
pub struct HttpRegistry {
    engine: Engine,
    client: Client,
    base: Arc<str>,
    auth_token: Option<Arc<str>>,
}

impl fmt::Debug for HttpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRegistry")
            .field("base", &self.base)
            .field("authenticated", &self.auth_token.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpRegistry {
    /// Build a client for the registry at `base_url`.
    pub fn new(engine: &Engine, base_url: &str, timeout: Duration) -> Result<Self, Rejection> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(crate::USER_AGENT)
            .build()
            .map_err(|e| Rejection::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            engine: engine.clone(),
            client,
            base: Arc::from(base_url.trim_end_matches('/')),
            auth_token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` on uploads.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.map(Arc::from);
        self
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Search package names and descriptions.
    pub fn search(&self, query: &str) -> Promise<SearchResults> {
        let client = self.client.clone();
        let url = self.url("/packages/search");
        let query = query.to_string();
        self.engine.spawn(async move {
            let response = client
                .get(&url)
                .query(&[("q", query.as_str())])
                .send()
                .await
                .map_err(|e| transport_error(&url, &e))?;
            read_json(check_status(response, &format!("search '{query}'")).await?, &url).await
        })
    }

    /// Upload a packed archive for `manifest`'s name and version.
    pub fn publish(&self, manifest: &Manifest, archive: Bytes) -> Promise<()> {
        let client = self.client.clone();
        let url = self.url("/packages/upload");
        let token = self.auth_token.clone();
        let name = manifest.name.to_string();
        let version = manifest.version.to_string();

        self.engine.spawn(async move {
            let file_name = format!("{name}-{version}.tar.gz");
            let part = reqwest::multipart::Part::stream(archive)
                .file_name(file_name)
                .mime_str("application/gzip")
                .map_err(|e| Rejection::invalid_argument(e.to_string()))?;
            let form = reqwest::multipart::Form::new()
                .text("name", name.clone())
                .text("version", version.clone())
                .part("package", part);

            let mut request = client.post(&url).multipart(form);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| transport_error(&url, &e))?;
            check_status(response, &format!("{name}@{version}")).await?;
            debug!("published {name}@{version}");
            Ok(())
        })
    }

    fn get_json<T>(&self, path: String, what: String) -> Promise<T>
    where
        T: DeserializeOwned + Clone + Send + 'static,
    {
        let client = self.client.clone();
        let url = self.url(&path);
        self.engine.spawn(async move {
            debug!(%url, "GET");
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| transport_error(&url, &e))?;
            read_json(check_status(response, &what).await?, &url).await
        })
    }
}

impl Registry for HttpRegistry {
    fn list_versions(&self, name: &PackageName) -> Promise<Vec<Version>> {
        let package = name.to_string();
        self.get_json::<VersionList>(
            format!("/packages/{name}/versions"),
            format!("package '{name}'"),
        )
        .map(move |list| list.into_versions(&package))
    }

    fn fetch_manifest(&self, name: &PackageName, version: &Version) -> Promise<Arc<Manifest>> {
        let client = self.client.clone();
        let url = self.url(&format!("/packages/{name}/{version}/manifest"));
        let what = format!("{name}@{version}");
        self.engine.spawn(async move {
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| transport_error(&url, &e))?;
            let text = check_status(response, &what)
                .await?
                .text()
                .await
                .map_err(|e| transport_error(&url, &e))?;
            Ok(Arc::new(Manifest::from_json(&text)?))
        })
    }

    fn artifact_url(&self, name: &PackageName, version: &Version) -> String {
        self.url(&format!("/packages/{name}/{version}/archive.tar.gz"))
    }

    fn fetch_artifact(&self, name: &PackageName, version: &Version, dest: &Path) -> Promise<()> {
        let client = self.client.clone();
        let url = self.artifact_url(name, version);
        let what = format!("{name}@{version}");
        let dest = dest.to_path_buf();
        self.engine.spawn(async move {
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| transport_error(&url, &e))?;
            let data = check_status(response, &what)
                .await?
                .bytes()
                .await
                .map_err(|e| transport_error(&url, &e))?;

            let files = tokio::task::spawn_blocking(move || pack::unpack_archive(&data, &dest))
                .await
                .map_err(|_| Rejection::handler_failed())??;
            debug!(files = files.len(), "unpacked {what}");
            Ok(())
        })
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response, Rejection> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(Rejection::not_found(format!("{what} not found in registry")));
    }
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    Err(Rejection::transport(if body.is_empty() {
        format!("registry returned {status} for {what}")
    } else {
        format!("registry returned {status} for {what}: {body}")
    }))
}

async fn read_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, Rejection> {
    response
        .json::<T>()
        .await
        .map_err(|e| Rejection::transport(format!("invalid response from {url}: {e}")))
}

fn transport_error(url: &str, err: &reqwest::Error) -> Rejection {
    if err.is_timeout() {
        Rejection::timeout(format!("request to {url} timed out"))
    } else {
        Rejection::transport(format!("request to {url} failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use mockito::Server;

    fn registry(engine: &Engine, url: &str) -> HttpRegistry {
        HttpRegistry::new(engine, url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_list_versions_wrapped_and_bare() {
        let engine = Engine::start().unwrap();
        let mut server = Server::new_async().await;

        let _wrapped = server
            .mock("GET", "/packages/zlib/versions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"package":"zlib","versions":[
                    {"version":"1.3.0","created_at":"2024-01-02"},
                    {"version":"1.2.11","created_at":"2023-05-01"},
                    {"version":"not-a-version","created_at":"2023-01-01"}
                ]}"#,
            )
            .create_async()
            .await;
        let _bare = server
            .mock("GET", "/packages/cjson/versions")
            .with_status(200)
            .with_body(r#"["1.7.15", "1.7.16"]"#)
            .create_async()
            .await;

        let reg = registry(&engine, &server.url());
        let zlib = reg.list_versions(&PackageName::new("zlib")).await.unwrap();
        assert_eq!(zlib, vec![Version::new(1, 3, 0), Version::new(1, 2, 11)]);

        let cjson = reg.list_versions(&PackageName::new("cjson")).await.unwrap();
        assert_eq!(cjson.len(), 2);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let engine = Engine::start().unwrap();
        let mut server = Server::new_async().await;

        let _missing = server
            .mock("GET", "/packages/ghost/versions")
            .with_status(404)
            .create_async()
            .await;
        let _broken = server
            .mock("GET", "/packages/zlib/1.0.0/manifest")
            .with_status(500)
            .with_body("database locked")
            .create_async()
            .await;

        let reg = registry(&engine, &server.url());
        let missing = reg.list_versions(&PackageName::new("ghost")).await.unwrap_err();
        assert_eq!(missing.kind, ErrorKind::NotFound);

        let broken = reg
            .fetch_manifest(&PackageName::new("zlib"), &Version::new(1, 0, 0))
            .await
            .unwrap_err();
        assert_eq!(broken.kind, ErrorKind::TransportError);
        assert!(broken.message.contains("database locked"));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_fetch_manifest_parses_document() {
        let engine = Engine::start().unwrap();
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/packages/libpng/1.6.0/manifest")
            .with_status(200)
            .with_body(r#"{"name":"libpng","version":"1.6.0","dependencies":{"zlib":"^1.2.0"}}"#)
            .create_async()
            .await;

        let reg = registry(&engine, &format!("{}/", server.url()));
        let manifest = reg
            .fetch_manifest(&PackageName::new("libpng"), &Version::new(1, 6, 0))
            .await
            .unwrap();
        assert_eq!(manifest.dependencies[0].constraint.to_string(), "^1.2.0");
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_fetch_artifact_unpacks() {
        let engine = Engine::start().unwrap();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("zlib.h"), "#define ZLIB_VERSION \"1.3.0\"\n").unwrap();
        let archive = pack::pack_directory(src.path()).unwrap();

        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/packages/zlib/1.3.0/archive.tar.gz")
            .with_status(200)
            .with_body(archive)
            .create_async()
            .await;

        let reg = registry(&engine, &server.url());
        let dest = tempfile::tempdir().unwrap();
        reg.fetch_artifact(&PackageName::new("zlib"), &Version::new(1, 3, 0), dest.path())
            .await
            .unwrap();
        assert!(dest.path().join("zlib.h").exists());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_search_and_publish() {
        let engine = Engine::start().unwrap();
        let mut server = Server::new_async().await;
        let _search = server
            .mock("GET", "/packages/search")
            .match_query(mockito::Matcher::UrlEncoded("q".into(), "json".into()))
            .with_status(200)
            .with_body(
                r#"{"query":"json","total":1,"packages":[
                    {"name":"cjson","version":"1.7.16","description":"Ultralightweight JSON parser","downloads":42}
                ]}"#,
            )
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/packages/upload")
            .match_header("authorization", "Bearer s3cret")
            .with_status(201)
            .with_body(r#"{"status":"success"}"#)
            .create_async()
            .await;

        let reg = registry(&engine, &server.url()).with_auth_token(Some("s3cret".into()));
        let results = reg.search("json").await.unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.packages[0].name, "cjson");
        assert_eq!(results.packages[0].downloads, 42);

        let manifest = Manifest::new(PackageName::new("mathlib"), Version::new(0, 1, 0));
        reg.publish(&manifest, Bytes::from_static(b"not really gzip"))
            .await
            .unwrap();
        upload.assert_async().await;
        engine.shutdown();
    }
}
