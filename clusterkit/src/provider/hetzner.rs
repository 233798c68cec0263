//! Hetzner Cloud HTTP client

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use hcloud_models::{
    Action, ActionResponse, AttachToNetworkRequest, CreateFirewallRequest, CreateNetworkRequest,
    CreateServerRequest, CreateServerResponse, CreateSshKeyRequest, Datacenter,
    DatacentersResponse, ErrorResponse, Firewall, FirewallResponse, FirewallsResponse, Meta,
    Network, NetworkResponse, NetworksResponse, Server, ServerResponse, ServerType,
    ServerTypesResponse, ServersResponse, SshKey, SshKeyResponse, SshKeysResponse,
};
use reqwest::{header, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::{ClusterError, ResourceKind, Result};
use crate::poll::PollPolicy;
use crate::provider::{CloudProvider, ResourceSummary};

pub const DEFAULT_BASE_URL: &str = "https://api.hetzner.cloud/v1";

const PER_PAGE: u32 = 50;

const ACTION_INTERVAL: Duration = Duration::from_secs(1);
const ACTION_DEADLINE: Duration = Duration::from_secs(300);

/// List responses that can be walked page by page
trait Paginated: DeserializeOwned {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Meta);
}

macro_rules! paginated {
    ($response:ty, $field:ident, $item:ty) => {
        impl Paginated for $response {
            type Item = $item;

            fn into_parts(self) -> (Vec<$item>, Meta) {
                (self.$field, self.meta)
            }
        }
    };
}

paginated!(ServersResponse, servers, Server);
paginated!(NetworksResponse, networks, Network);
paginated!(FirewallsResponse, firewalls, Firewall);
paginated!(SshKeysResponse, ssh_keys, SshKey);
paginated!(DatacentersResponse, datacenters, Datacenter);
paginated!(ServerTypesResponse, server_types, ServerType);

fn collection(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Server => "/servers",
        ResourceKind::Network => "/networks",
        ResourceKind::Firewall => "/firewalls",
        ResourceKind::SshKey => "/ssh_keys",
    }
}

/// HTTP client for the Hetzner Cloud API
pub struct HetznerClient {
    client: Client,
    base_url: String,
    token: SecretString,
    action_poll: PollPolicy,
}

impl HetznerClient {
    /// Create a client against the public API
    pub fn new(token: SecretString) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    /// Create a client against `base_url`
    pub fn with_base_url(base_url: &str, token: SecretString) -> Result<Self> {
        Url::parse(base_url)
            .map_err(|e| ClusterError::ConfigError(format!("invalid API url {base_url}: {e}")))?;

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            action_poll: PollPolicy::new(ACTION_INTERVAL, ACTION_DEADLINE),
        })
    }

    /// Override how long to wait for server actions to finish
    pub fn with_action_poll(mut self, policy: PollPolicy) -> Self {
        self.action_poll = policy;
        self
    }

    /// Read the API token from the environment variable `var`
    pub fn from_env(var: &str) -> Result<Self> {
        let token = std::env::var(var).map_err(|_| {
            ClusterError::ConfigError(format!("environment variable {var} holding the API token is not set"))
        })?;
        Self::new(SecretString::from(token))
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    async fn check(method: &str, url: &str, response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!("HTTP {} {} failed: {} - {}", method, url, status, body);
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| format!("{}: {}", e.error.code, e.error.message))
            .unwrap_or(body);
        Err(ClusterError::ProviderError {
            status: status.as_u16(),
            message,
        })
    }

    /// Make a GET request
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, self.bearer())
            .query(query)
            .send()
            .await?;

        let body = Self::check("GET", &url, response).await?.json().await?;
        Ok(body)
    }

    /// Make a POST request
    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, self.bearer())
            .json(body)
            .send()
            .await?;

        let body = Self::check("POST", &url, response).await?.json().await?;
        Ok(body)
    }

    /// Make a DELETE request, ignoring the response body
    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        debug!("DELETE {}", url);

        let response = self
            .client
            .delete(&url)
            .header(header::AUTHORIZATION, self.bearer())
            .send()
            .await?;

        Self::check("DELETE", &url, response).await?;
        Ok(())
    }

    /// Walk every page of a collection
    async fn list_all<R: Paginated>(&self, path: &str, filter: &[(&str, String)]) -> Result<Vec<R::Item>> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let mut query = filter.to_vec();
            query.push(("page", page.to_string()));
            query.push(("per_page", PER_PAGE.to_string()));

            let response: R = self.get(path, &query).await?;
            let (batch, meta) = response.into_parts();
            items.extend(batch);

            match meta.pagination.next_page {
                Some(next) if next > page => page = next,
                _ => return Ok(items),
            }
        }
    }

    /// Poll `/actions/{id}` until the action left the running state
    async fn wait_for_action(&self, action: Action) -> Result<()> {
        let what = format!("{} action {}", action.command, action.id);
        let path = format!("/actions/{}", action.id);
        let mut pending = Some(action);
        self.action_poll
            .poll(&what, |_| {
                let known = pending.take();
                let path = &path;
                async move {
                    let action = match known {
                        Some(action) => action,
                        None => self.get::<ActionResponse>(path, &[]).await?.action,
                    };
                    action_finished(action)
                }
            })
            .await?;
        Ok(())
    }

    async fn first_by_name<R: Paginated>(&self, path: &str, name: &str) -> Result<Option<R::Item>> {
        let mut found = self.list_all::<R>(path, &[("name", name.to_string())]).await?;
        Ok(if found.is_empty() { None } else { Some(found.remove(0)) })
    }
}

#[async_trait]
impl CloudProvider for HetznerClient {
    async fn create_ssh_key(&self, request: &CreateSshKeyRequest) -> Result<SshKey> {
        let response: SshKeyResponse = self.post("/ssh_keys", request).await?;
        Ok(response.ssh_key)
    }

    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<Network> {
        let response: NetworkResponse = self.post("/networks", request).await?;
        Ok(response.network)
    }

    async fn create_firewall(&self, request: &CreateFirewallRequest) -> Result<Firewall> {
        let response: FirewallResponse = self.post("/firewalls", request).await?;
        Ok(response.firewall)
    }

    async fn create_server(&self, request: &CreateServerRequest) -> Result<Server> {
        let response: CreateServerResponse = self.post("/servers", request).await?;
        Ok(response.server)
    }

    async fn server(&self, id: u64) -> Result<Server> {
        let response: ServerResponse = self.get(&format!("/servers/{id}"), &[]).await?;
        Ok(response.server)
    }

    async fn server_by_name(&self, name: &str) -> Result<Option<Server>> {
        self.first_by_name::<ServersResponse>("/servers", name).await
    }

    async fn network_by_name(&self, name: &str) -> Result<Option<Network>> {
        self.first_by_name::<NetworksResponse>("/networks", name).await
    }

    async fn firewall_by_name(&self, name: &str) -> Result<Option<Firewall>> {
        self.first_by_name::<FirewallsResponse>("/firewalls", name).await
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        self.list_all::<ServersResponse>("/servers", &[]).await
    }

    async fn list_resources(&self, kind: ResourceKind) -> Result<Vec<ResourceSummary>> {
        let path = collection(kind);
        let summaries = match kind {
            ResourceKind::Server => self
                .list_all::<ServersResponse>(path, &[])
                .await?
                .into_iter()
                .map(|s| (s.id, s.name, s.labels))
                .collect::<Vec<_>>(),
            ResourceKind::Network => self
                .list_all::<NetworksResponse>(path, &[])
                .await?
                .into_iter()
                .map(|n| (n.id, n.name, n.labels))
                .collect(),
            ResourceKind::Firewall => self
                .list_all::<FirewallsResponse>(path, &[])
                .await?
                .into_iter()
                .map(|f| (f.id, f.name, f.labels))
                .collect(),
            ResourceKind::SshKey => self
                .list_all::<SshKeysResponse>(path, &[])
                .await?
                .into_iter()
                .map(|k| (k.id, k.name, k.labels))
                .collect(),
        };
        Ok(summaries
            .into_iter()
            .map(|(id, name, labels)| ResourceSummary {
                kind,
                id,
                name,
                labels,
            })
            .collect())
    }

    async fn delete_resource(&self, kind: ResourceKind, id: u64) -> Result<()> {
        self.delete(&format!("{}/{id}", collection(kind))).await
    }

    async fn attach_to_network(&self, server_id: u64, network_id: u64, ip: Ipv4Addr) -> Result<()> {
        let request = AttachToNetworkRequest {
            network: network_id,
            ip: ip.to_string(),
        };
        let response: ActionResponse = self
            .post(&format!("/servers/{server_id}/actions/attach_to_network"), &request)
            .await?;
        debug!("attach_to_network action {} is {}", response.action.id, response.action.status);
        self.wait_for_action(response.action).await
    }

    async fn reboot_server(&self, server_id: u64) -> Result<()> {
        let response: ActionResponse = self
            .post(&format!("/servers/{server_id}/actions/reboot"), &serde_json::json!({}))
            .await?;
        debug!("reboot action {} is {}", response.action.id, response.action.status);
        self.wait_for_action(response.action).await
    }

    async fn list_datacenters(&self) -> Result<Vec<Datacenter>> {
        self.list_all::<DatacentersResponse>("/datacenters", &[]).await
    }

    async fn list_server_types(&self) -> Result<Vec<ServerType>> {
        self.list_all::<ServerTypesResponse>("/server_types", &[]).await
    }
}

fn action_finished(action: Action) -> Result<bool> {
    match action.status.as_str() {
        Action::SUCCESS => Ok(true),
        Action::ERROR => Err(ClusterError::ActionFailed {
            message: action
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| format!("action {} ended in error", action.id)),
            command: action.command,
        }),
        _ => Ok(false),
    }
}
