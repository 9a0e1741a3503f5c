//! HTTP client for the SLS machine group API

use super::{Credentials, DirectoryClient, DirectoryClientFactory, RequestSigner};
use crate::error::DirectoryError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// API version sent with every request
const API_VERSION: &str = "0.6.0";

/// Default public endpoint, one host per project
pub const DEFAULT_ENDPOINT_TEMPLATE: &str = "https://{project}.{region}.log.aliyuncs.com";

/// Page size for list calls (the service maximum)
pub const PAGE_SIZE: u32 = 500;

/// Settings shared by all regional clients
#[derive(Debug, Clone)]
pub struct SlsClientConfig {
    /// Endpoint with `{region}` and `{project}` placeholders
    pub endpoint_template: String,
    /// Timeout applied to each HTTP request
    pub request_timeout: Duration,
}

impl Default for SlsClientConfig {
    fn default() -> Self {
        Self {
            endpoint_template: DEFAULT_ENDPOINT_TEMPLATE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListMachineGroupsResponse {
    #[serde(default)]
    machinegroups: Vec<String>,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineGroupResponse {
    #[serde(default)]
    machine_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListMachinesResponse {
    #[serde(default)]
    machines: Vec<MachineEntry>,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct MachineEntry {
    #[serde(default)]
    ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: String,
    error_message: String,
}

/// Offset of the next page, if any
fn next_offset(offset: u32, page_len: usize, total: u32) -> Option<u32> {
    let next = offset + page_len as u32;
    if page_len < PAGE_SIZE as usize || next >= total {
        None
    } else {
        Some(next)
    }
}

/// Directory client for a single region
pub struct SlsClient {
    http: Client,
    region: String,
    endpoint_template: String,
    signer: Arc<RequestSigner>,
}

impl SlsClient {
    pub fn new(
        http: Client,
        region: impl Into<String>,
        endpoint_template: impl Into<String>,
        signer: Arc<RequestSigner>,
    ) -> Self {
        Self {
            http,
            region: region.into(),
            endpoint_template: endpoint_template.into(),
            signer,
        }
    }

    /// Resolve the endpoint for a project
    fn base_url(&self, project: &str) -> Result<Url, DirectoryError> {
        let rendered = self
            .endpoint_template
            .replace("{region}", &self.region)
            .replace("{project}", project);

        Url::parse(&rendered).map_err(|e| DirectoryError::Endpoint {
            region: self.region.clone(),
            reason: format!("{rendered}: {e}"),
        })
    }

    /// Signed GET returning a decoded JSON body
    async fn get<T: DeserializeOwned>(
        &self,
        project: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DirectoryError> {
        let mut url = self.base_url(project)?;
        url.set_path(path);
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }

        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let log_headers = [
            ("x-log-apiversion", API_VERSION),
            ("x-log-signaturemethod", "hmac-sha1"),
            ("x-log-bodyrawsize", "0"),
        ];
        let string_to_sign =
            RequestSigner::string_to_sign("GET", "", "", &date, &log_headers, path, query);
        let authorization = self.signer.authorization(&string_to_sign);

        debug!(region = %self.region, project = %project, url = %url, "Querying log service");

        let mut request = self
            .http
            .get(url.clone())
            .header("Date", &date)
            .header("Authorization", authorization);
        for (name, value) in log_headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|source| DirectoryError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|source| DirectoryError::Transport {
                url: url.to_string(),
                source,
            })?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_slice::<ErrorBody>(&body) {
                Ok(err) => (err.error_code, err.error_message),
                Err(_) => (
                    status.canonical_reason().unwrap_or("Unknown").to_string(),
                    String::from_utf8_lossy(&body).into_owned(),
                ),
            };
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        serde_json::from_slice(&body).map_err(|e| DirectoryError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl DirectoryClient for SlsClient {
    async fn list_machine_groups(&self, project: &str) -> Result<Vec<String>, DirectoryError> {
        let mut groups = Vec::new();
        let mut offset = 0;

        loop {
            let query = [("offset", offset.to_string()), ("size", PAGE_SIZE.to_string())];
            let page: ListMachineGroupsResponse =
                self.get(project, "/machinegroups", &query).await?;
            let page_len = page.machinegroups.len();
            groups.extend(page.machinegroups);

            match next_offset(offset, page_len, page.total) {
                Some(next) => offset = next,
                None => break,
            }
        }

        Ok(groups)
    }

    async fn get_machine_group_membership(
        &self,
        project: &str,
        group: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let path = format!("/machinegroups/{group}");
        let body: MachineGroupResponse = self.get(project, &path, &[]).await?;
        Ok(body.machine_list)
    }

    async fn list_actual_machines(
        &self,
        project: &str,
        group: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let path = format!("/machinegroups/{group}/machines");
        let mut machines = Vec::new();
        let mut offset = 0;

        loop {
            let query = [("offset", offset.to_string()), ("size", PAGE_SIZE.to_string())];
            let page: ListMachinesResponse = self.get(project, &path, &query).await?;
            let page_len = page.machines.len();
            machines.extend(
                page.machines
                    .into_iter()
                    .map(|m| m.ip)
                    .filter(|ip| !ip.is_empty()),
            );

            match next_offset(offset, page_len, page.total) {
                Some(next) => offset = next,
                None => break,
            }
        }

        Ok(machines)
    }
}

/// Creates regional [`SlsClient`]s sharing one connection pool
pub struct SlsClientFactory {
    http: Client,
    signer: Arc<RequestSigner>,
    config: SlsClientConfig,
}

impl SlsClientFactory {
    pub fn new(credentials: Credentials, config: SlsClientConfig) -> Result<Self, DirectoryError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(DirectoryError::Client)?;

        Ok(Self {
            http,
            signer: Arc::new(RequestSigner::new(credentials)),
            config,
        })
    }
}

impl DirectoryClientFactory for SlsClientFactory {
    fn client_for_region(&self, region: &str) -> Result<Arc<dyn DirectoryClient>, DirectoryError> {
        let client = SlsClient::new(
            self.http.clone(),
            region,
            self.config.endpoint_template.clone(),
            Arc::clone(&self.signer),
        );
        // Catch a broken template before any project work starts
        client.base_url("project")?;
        Ok(Arc::new(client))
    }
}
