//! Azure Machine Learning model registry over the ARM REST API.
//!
//! Authentication uses the OAuth2 client-credentials grant for the service
//! principal. Model artifacts are read straight from the workspace datastore
//! (blob storage) with a storage-scoped token, so the principal needs
//! `Storage Blob Data Reader` on the backing account.

use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::model::{ModelRegistry, RegisteredModel, ServicePrincipal, WorkspaceRef, WorkspaceSession};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::{Component, Path, PathBuf};

const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";
const STORAGE_API_VERSION: &str = "2021-08-06";
const DEFAULT_STORAGE_SUFFIX: &str = "core.windows.net";

pub struct AzureMlRegistry {
    config: RegistryConfig,
}

impl AzureMlRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }
}

impl ModelRegistry for AzureMlRegistry {
    fn connect(
        &self,
        workspace: &WorkspaceRef,
        auth: &ServicePrincipal,
    ) -> Result<Box<dyn WorkspaceSession>> {
        let client = Client::builder().build()?;

        let management_scope = format!("{}/.default", self.config.management_endpoint.trim_end_matches('/'));
        let token = request_token(&client, &self.config.authority_host, auth, &management_scope)?;

        let workspace_url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
            self.config.management_endpoint.trim_end_matches('/'),
            workspace.subscription,
            workspace.resource_group,
            workspace.name
        );

        let session = AzureMlWorkspace {
            client,
            token,
            auth: auth.clone(),
            authority_host: self.config.authority_host.clone(),
            api_version: self.config.api_version.clone(),
            workspace_url,
            name: workspace.name.clone(),
        };

        let resource: WorkspaceResource = session
            .get_json(&session.url(""))?
            .ok_or_else(|| {
                Error::RegistryError(format!(
                    "Workspace {} not found in resource group {}",
                    workspace.name, workspace.resource_group
                ))
            })?;
        tracing::info!("Connected to ML workspace {}", resource.name);

        Ok(Box::new(session))
    }
}

struct AzureMlWorkspace {
    client: Client,
    token: String,
    auth: ServicePrincipal,
    authority_host: String,
    api_version: String,
    workspace_url: String,
    name: String,
}

impl AzureMlWorkspace {
    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}?api-version={}", self.workspace_url, self.api_version)
        } else {
            format!("{}/{}?api-version={}", self.workspace_url, path, self.api_version)
        }
    }

    /// `Ok(None)` when the resource does not exist.
    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self.client.get(url).bearer_auth(&self.token).send()?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::RegistryError(format!("GET {} returned {}: {}", url, status, body)));
        }

        Ok(Some(response.json()?))
    }

    fn latest_version(&self, model_name: &str) -> Result<String> {
        let container: ModelContainer = self
            .get_json(&self.url(&format!("models/{}", model_name)))?
            .ok_or_else(|| Error::ModelNotFound(model_name.to_string()))?;

        container
            .properties
            .latest_version
            .ok_or_else(|| Error::ModelNotFound(format!("{} has no registered versions", model_name)))
    }

    fn list_blobs(&self, container_url: &str, prefix: &str, token: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(container_url)
                .bearer_auth(token)
                .header("x-ms-version", STORAGE_API_VERSION)
                .query(&[("restype", "container"), ("comp", "list"), ("prefix", prefix)]);
            if let Some(marker) = &marker {
                request = request.query(&[("marker", marker.as_str())]);
            }

            let body = request
                .send()?
                .error_for_status()
                .map_err(|e| Error::DownloadFailed(format!("Listing {} failed: {}", container_url, e)))?
                .text()?;

            let (page, next) = blob_listing(&body)?;
            names.extend(
                page.into_iter()
                    .filter(|name| name == prefix || name.starts_with(&format!("{}/", prefix))),
            );

            marker = next;
            if marker.is_none() {
                break;
            }
        }

        Ok(names)
    }
}

impl WorkspaceSession for AzureMlWorkspace {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_models(&self) -> Result<Vec<RegisteredModel>> {
        let containers: Page<ModelContainer> = self
            .get_json(&self.url("models"))?
            .ok_or_else(|| Error::RegistryError(format!("Workspace {} has no model registry", self.name)))?;

        let mut models = Vec::new();
        for container in containers.value {
            let versions: Page<ModelVersion> = self
                .get_json(&self.url(&format!("models/{}/versions", container.name)))?
                .unwrap_or(Page { value: Vec::new() });

            models.extend(versions.value.into_iter().map(|version| RegisteredModel {
                name: container.name.clone(),
                version: version.name,
            }));
        }

        Ok(models)
    }

    fn download(
        &self,
        model_name: &str,
        version: Option<&str>,
        target_dir: &Path,
    ) -> Result<PathBuf> {
        let version = match version {
            Some(version) => version.to_string(),
            None => self.latest_version(model_name)?,
        };

        let model_version: ModelVersion = self
            .get_json(&self.url(&format!("models/{}/versions/{}", model_name, version)))?
            .ok_or_else(|| Error::ModelNotFound(format!("{}::{}", model_name, version)))?;

        let model_uri = model_version.properties.model_uri.ok_or_else(|| {
            Error::RegistryError(format!("{}::{} has no model URI", model_name, version))
        })?;
        let location = DatastorePath::parse(&model_uri)?;

        let datastore: Datastore = self
            .get_json(&self.url(&format!("datastores/{}", location.datastore)))?
            .ok_or_else(|| Error::RegistryError(format!("Datastore {} not found", location.datastore)))?;
        let properties = datastore.properties;
        let account = properties.account_name.ok_or_else(|| {
            Error::RegistryError(format!("Datastore {} is not backed by blob storage", location.datastore))
        })?;
        let container = properties.container_name.ok_or_else(|| {
            Error::RegistryError(format!("Datastore {} has no container", location.datastore))
        })?;
        let suffix = properties
            .endpoint
            .unwrap_or_else(|| DEFAULT_STORAGE_SUFFIX.to_string());
        let container_url = format!("https://{}.blob.{}/{}", account, suffix, container);

        let storage_token = request_token(&self.client, &self.authority_host, &self.auth, STORAGE_SCOPE)?;
        let blobs = self.list_blobs(&container_url, &location.prefix, &storage_token)?;
        if blobs.is_empty() {
            return Err(Error::DownloadFailed(format!(
                "No artifacts for {}::{} under {}",
                model_name, version, model_uri
            )));
        }

        let model_dir = target_dir.join(model_name);
        tracing::info!("Downloading {} files of {}::{} to {}", blobs.len(), model_name, version, model_dir.display());

        for blob in &blobs {
            let relative = blob[location.prefix.len()..].trim_start_matches('/');
            if Path::new(relative).components().any(|c| !matches!(c, Component::Normal(_))) {
                return Err(Error::DownloadFailed(format!("Refusing blob outside the model directory: {}", blob)));
            }
            let dest = if relative.is_empty() {
                model_dir.join(blob.rsplit('/').next().unwrap_or(blob))
            } else {
                model_dir.join(relative)
            };

            if dest.exists() {
                tracing::debug!("{} already present", dest.display());
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }

            tracing::debug!("Fetching {}", blob);
            let mut response = self
                .client
                .get(blob_url(&container_url, blob)?)
                .bearer_auth(&storage_token)
                .header("x-ms-version", STORAGE_API_VERSION)
                .send()?
                .error_for_status()
                .map_err(|e| Error::DownloadFailed(format!("{}: {}", blob, e)))?;

            let mut file = fs::File::create(&dest)?;
            response
                .copy_to(&mut file)
                .map_err(|e| Error::DownloadFailed(format!("{}: {}", blob, e)))?;
        }

        tracing::info!("Loaded model {} to {}", model_name, model_dir.display());
        Ok(model_dir)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

fn request_token(
    client: &Client,
    authority_host: &str,
    auth: &ServicePrincipal,
    scope: &str,
) -> Result<String> {
    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        authority_host.trim_end_matches('/'),
        auth.tenant_id()?
    );

    let response = client
        .post(&url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", auth.client_id()?),
            ("client_secret", auth.client_secret()?),
            ("scope", scope),
        ])
        .send()
        .map_err(|e| Error::AuthenticationFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(Error::AuthenticationFailed(format!("Token request returned {}: {}", status, body)));
    }

    let token: TokenResponse = response
        .json()
        .map_err(|e| Error::AuthenticationFailed(e.to_string()))?;
    Ok(token.access_token)
}

#[derive(Deserialize)]
struct Page<T> {
    value: Vec<T>,
}

#[derive(Deserialize)]
struct WorkspaceResource {
    name: String,
}

#[derive(Deserialize)]
struct ModelContainer {
    name: String,
    #[serde(default)]
    properties: ContainerProperties,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerProperties {
    latest_version: Option<String>,
}

#[derive(Deserialize)]
struct ModelVersion {
    name: String,
    #[serde(default)]
    properties: VersionProperties,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionProperties {
    model_uri: Option<String>,
}

#[derive(Deserialize)]
struct Datastore {
    #[serde(default)]
    properties: DatastoreProperties,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatastoreProperties {
    account_name: Option<String>,
    container_name: Option<String>,
    endpoint: Option<String>,
}

/// Datastore name and path prefix of an `azureml://.../datastores/{ds}/paths/{prefix}` URI.
#[derive(Debug, PartialEq, Eq)]
struct DatastorePath {
    datastore: String,
    prefix: String,
}

impl DatastorePath {
    fn parse(uri: &str) -> Result<Self> {
        let invalid = || Error::RegistryError(format!("Unsupported model URI: {}", uri));

        let (_, rest) = uri.split_once("/datastores/").ok_or_else(invalid)?;
        let (datastore, prefix) = rest.split_once("/paths/").ok_or_else(invalid)?;
        let prefix = prefix.trim_matches('/');
        if datastore.is_empty() || prefix.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            datastore: datastore.to_string(),
            prefix: prefix.to_string(),
        })
    }
}

/// Blob names and the continuation marker of one `List Blobs` page.
fn blob_listing(body: &str) -> Result<(Vec<String>, Option<String>)> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut names = Vec::new();
    let mut marker = None;
    let mut element: Option<Vec<u8>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => element = Some(start.name().as_ref().to_vec()),
            Ok(Event::End(_)) => element = None,
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| Error::DownloadFailed(format!("Malformed blob listing: {}", e)))?
                    .into_owned();
                match element.as_deref() {
                    Some(b"Name") => names.push(value),
                    Some(b"NextMarker") if !value.is_empty() => marker = Some(value),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::DownloadFailed(format!(
                    "Malformed blob listing at {}: {}",
                    reader.error_position(),
                    e
                )))
            }
        }
    }

    Ok((names, marker))
}

/// `<container_url>/<blob>` with every path segment of `blob` percent-encoded.
fn blob_url(container_url: &str, blob: &str) -> Result<Url> {
    let mut url = Url::parse(container_url)
        .map_err(|e| Error::RegistryError(format!("Invalid container url {}: {}", container_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| Error::RegistryError(format!("Container url {} cannot hold a path", container_url)))?
        .pop_if_empty()
        .extend(blob.split('/'));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datastore_uri() {
        let uri = "azureml://subscriptions/sub/resourcegroups/dev/workspaces/ecb-dev/datastores/workspaceblobstore/paths/LocalUpload/1234/led-large-16384-arxiv/";
        let location = DatastorePath::parse(uri).unwrap();

        assert_eq!(location.datastore, "workspaceblobstore");
        assert_eq!(location.prefix, "LocalUpload/1234/led-large-16384-arxiv");
    }

    #[test]
    fn test_parse_rejects_non_datastore_uri() {
        assert!(DatastorePath::parse("https://example.com/model.bin").is_err());
        assert!(DatastorePath::parse("azureml://datastores/ds/paths/").is_err());
    }

    #[test]
    fn test_blob_listing_decodes_entities() {
        let body = "<?xml version=\"1.0\" encoding=\"utf-8\"?><EnumerationResults><Prefix>m</Prefix><Blobs>\
            <Blob><Name>m/config.json</Name><Properties><Content-Length>12</Content-Length></Properties></Blob>\
            <Blob><Name>m/a&amp;b.txt</Name></Blob>\
            <Blob><Name>m/with&#x20;space&#33;.bin</Name></Blob>\
            </Blobs><NextMarker /></EnumerationResults>";

        let (names, marker) = blob_listing(body).unwrap();
        assert_eq!(names, vec!["m/config.json", "m/a&b.txt", "m/with space!.bin"]);
        assert_eq!(marker, None);
    }

    #[test]
    fn test_blob_listing_reads_next_marker() {
        let body = "<EnumerationResults><Blobs><Blob><Name>m/x</Name></Blob></Blobs>\
            <NextMarker>2!72!MDAwMDE0&#x21;</NextMarker></EnumerationResults>";

        let (names, marker) = blob_listing(body).unwrap();
        assert_eq!(names, vec!["m/x"]);
        assert_eq!(marker.as_deref(), Some("2!72!MDAwMDE0!"));
    }

    #[test]
    fn test_blob_listing_rejects_broken_xml() {
        assert!(matches!(
            blob_listing("<EnumerationResults><Name>m/&bogus;</Name></EnumerationResults>"),
            Err(Error::DownloadFailed(_))
        ));
    }

    #[test]
    fn test_blob_url_encodes_segments() {
        let url = blob_url("https://acct.blob.core.windows.net/models", "m/a b/c?d#e%f.bin").unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/models/m/a%20b/c%3Fd%23e%25f.bin"
        );
    }
}
