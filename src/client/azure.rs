//! Azure Resource Manager REST implementation of [`ResourceClient`].
//!
//! Talks directly to the ARM endpoints with a client-credentials OAuth2
//! token. The token is cached and refreshed shortly before expiry; the
//! underlying HTTP client is built once with connect and request timeouts so
//! a stalled ARM call cannot hang a provisioning run forever.

use super::{
    NetworkInterface, PublicIpAddress, ResourceClient, ResourceGroup, SecurityGroup, Subnet,
    VirtualMachine, VirtualNetwork,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::params::{tags, OsType};
use crate::spec::{ImageDetails, RunnerSpec};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
const DEFAULT_AUTHORITY_ENDPOINT: &str = "https://login.microsoftonline.com";

const RESOURCE_GROUP_API_VERSION: &str = "2021-04-01";
const NETWORK_API_VERSION: &str = "2023-04-01";
const COMPUTE_API_VERSION: &str = "2023-07-01";
const SKUS_API_VERSION: &str = "2021-07-01";

/// Resource types detached automatically on forced resource-group deletion.
const FORCE_DELETION_TYPES: &str =
    "Microsoft.Compute/virtualMachines,Microsoft.Compute/virtualMachineScaleSets";

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Treat tokens as stale a minute early so an in-flight request never
    /// crosses the expiry boundary.
    fn is_valid(&self) -> bool {
        self.expires_at - ChronoDuration::seconds(60) > Utc::now()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// ARM REST client scoped to one subscription.
pub struct AzureClient {
    http: Client,
    config: Config,
    management_endpoint: Url,
    authority_endpoint: Url,
    token: RwLock<Option<AccessToken>>,
}

impl AzureClient {
    /// Creates a client against the public Azure endpoints.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_endpoints(
            config,
            DEFAULT_MANAGEMENT_ENDPOINT,
            DEFAULT_AUTHORITY_ENDPOINT,
        )
    }

    /// Creates a client against custom endpoints (sovereign clouds, tests).
    pub fn with_endpoints(config: Config, management: &str, authority: &str) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(Error::Http)?;
        let management_endpoint = Url::parse(management)
            .map_err(|e| Error::Config(format!("invalid management endpoint: {e}")))?;
        let authority_endpoint = Url::parse(authority)
            .map_err(|e| Error::Config(format!("invalid authority endpoint: {e}")))?;
        Ok(Self {
            http,
            config,
            management_endpoint,
            authority_endpoint,
            token: RwLock::new(None),
        })
    }

    /// Returns a valid bearer token, fetching a fresh one when the cached
    /// token is absent or about to expire.
    async fn bearer_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_valid() {
                return Ok(token.token.clone());
            }
        }

        let mut guard = self.token.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(token) = guard.as_ref() {
            if token.is_valid() {
                return Ok(token.token.clone());
            }
        }

        let url = self
            .authority_endpoint
            .join(&format!(
                "{}/oauth2/v2.0/token",
                self.config.credentials.tenant_id
            ))
            .map_err(|e| Error::Auth(format!("invalid token endpoint: {e}")))?;

        let scope = format!("{}/.default", self.management_endpoint.as_str().trim_end_matches('/'));
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        debug!(tenant = %self.config.credentials.tenant_id, "requesting ARM access token");
        let resp = self.http.post(url).form(&form).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token request failed (status {status}): {}",
                excerpt(&body)
            )));
        }
        let token_resp: TokenResponse = resp.json().await?;
        let token = AccessToken {
            token: token_resp.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token_resp.expires_in),
        };
        let value = token.token.clone();
        *guard = Some(token);
        Ok(value)
    }

    fn resource_url(&self, path: &str, api_version: &str) -> Result<Url> {
        let mut url = self
            .management_endpoint
            .join(path)
            .map_err(|e| Error::Config(format!("invalid resource path '{path}': {e}")))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    fn group_path(&self, resource_group: &str, provider_path: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}",
            self.config.subscription_id, resource_group, provider_path
        )
    }

    /// Sends a request with bearer auth and maps non-success responses:
    /// 404 becomes [`Error::NotFound`], everything else [`Error::Api`].
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let token = self.bearer_token().await?;
        let path = url.path().to_string();
        let mut req = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(path));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: excerpt(&body),
            });
        }
        Ok(resp)
    }

    async fn put(&self, url: Url, body: Value) -> Result<Value> {
        let resp = self.send(Method::PUT, url, Some(&body)).await?;
        Ok(resp.json().await?)
    }

    fn vm_payload(&self, spec: &RunnerSpec, nic_id: &str, disk_size_gb: u32) -> Value {
        let image_reference = match &spec.image {
            ImageDetails::Urn {
                publisher,
                offer,
                sku,
                version,
            } => json!({
                "publisher": publisher,
                "offer": offer,
                "sku": sku,
                "version": version,
            }),
            ImageDetails::Id { id, .. } => json!({ "id": id }),
        };

        let mut os_disk = json!({
            "createOption": "FromImage",
            "diskSizeGB": disk_size_gb,
        });
        if spec.use_ephemeral_storage {
            // Ephemeral OS disks live on the host's resource disk and
            // require read-only caching.
            os_disk["caching"] = json!("ReadOnly");
            os_disk["diffDiskSettings"] = json!({
                "option": "Local",
                "placement": "ResourceDisk",
            });
        } else {
            os_disk["caching"] = json!("ReadWrite");
            os_disk["managedDisk"] = json!({
                "storageAccountType": spec.storage_account_type,
            });
        }
        if disk_size_gb == 0 {
            // Let the platform pick the image default instead of sending 0.
            if let Some(disk) = os_disk.as_object_mut() {
                disk.remove("diskSizeGB");
            }
        }

        let mut os_profile = json!({
            "computerName": spec.name,
            "adminUsername": spec.admin_username,
        });
        if let Some(user_data) = &spec.user_data {
            let encoded = base64::engine::general_purpose::STANDARD.encode(user_data);
            os_profile["customData"] = json!(encoded);
        }
        if spec.os_type == OsType::Linux {
            let keys: Vec<Value> = spec
                .ssh_public_keys
                .iter()
                .map(|key| {
                    json!({
                        "path": format!("/home/{}/.ssh/authorized_keys", spec.admin_username),
                        "keyData": key,
                    })
                })
                .collect();
            os_profile["linuxConfiguration"] = json!({
                "disablePasswordAuthentication": true,
                "ssh": { "publicKeys": keys },
            });
        }

        let mut properties = json!({
            "hardwareProfile": { "vmSize": spec.vm_size },
            "storageProfile": {
                "imageReference": image_reference,
                "osDisk": os_disk,
            },
            "osProfile": os_profile,
            "networkProfile": {
                "networkInterfaces": [ { "id": nic_id } ],
            },
        });
        if spec.confidential {
            properties["securityProfile"] = json!({
                "securityType": "ConfidentialVM",
                "uefiSettings": {
                    "secureBootEnabled": true,
                    "vTpmEnabled": true,
                },
            });
        }

        json!({
            "location": self.config.location,
            "tags": spec.tags,
            "properties": properties,
        })
    }

    fn security_rules(spec: &RunnerSpec) -> Vec<Value> {
        spec.open_inbound_ports
            .iter()
            .enumerate()
            .map(|(idx, port)| {
                json!({
                    "name": format!("allow-inbound-{port}"),
                    "properties": {
                        "priority": 200 + idx as u32,
                        "direction": "Inbound",
                        "access": "Allow",
                        "protocol": "Tcp",
                        "sourceAddressPrefix": "*",
                        "sourcePortRange": "*",
                        "destinationAddressPrefix": "*",
                        "destinationPortRange": port.to_string(),
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl ResourceClient for AzureClient {
    async fn create_resource_group(
        &self,
        name: &str,
        tags: &HashMap<String, String>,
    ) -> Result<ResourceGroup> {
        let path = format!(
            "/subscriptions/{}/resourcegroups/{}",
            self.config.subscription_id, name
        );
        let url = self.resource_url(&path, RESOURCE_GROUP_API_VERSION)?;
        let body = json!({
            "location": self.config.location,
            "tags": tags,
        });
        let value = self.put(url, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn delete_resource_group(&self, name: &str, force: bool) -> Result<()> {
        let path = format!(
            "/subscriptions/{}/resourcegroups/{}",
            self.config.subscription_id, name
        );
        let mut url = self.resource_url(&path, RESOURCE_GROUP_API_VERSION)?;
        if force {
            url.query_pairs_mut()
                .append_pair("forceDeletionTypes", FORCE_DELETION_TYPES);
        }
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn create_virtual_network(&self, name: &str, cidr: &str) -> Result<VirtualNetwork> {
        let path = self.group_path(name, &format!("Microsoft.Network/virtualNetworks/{name}"));
        let url = self.resource_url(&path, NETWORK_API_VERSION)?;
        let body = json!({
            "location": self.config.location,
            "properties": {
                "addressSpace": { "addressPrefixes": [cidr] },
            },
        });
        let value = self.put(url, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create_subnet(&self, name: &str, cidr: &str) -> Result<Subnet> {
        let path = self.group_path(
            name,
            &format!("Microsoft.Network/virtualNetworks/{name}/subnets/{name}"),
        );
        let url = self.resource_url(&path, NETWORK_API_VERSION)?;
        let body = json!({
            "properties": { "addressPrefix": cidr },
        });
        let value = self.put(url, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create_public_ip(&self, name: &str) -> Result<PublicIpAddress> {
        let path = self.group_path(name, &format!("Microsoft.Network/publicIPAddresses/{name}"));
        let url = self.resource_url(&path, NETWORK_API_VERSION)?;
        let body = json!({
            "location": self.config.location,
            "sku": { "name": "Standard" },
            "properties": { "publicIPAllocationMethod": "Static" },
        });
        let value = self.put(url, body).await?;
        Ok(PublicIpAddress {
            id: value.get("id").and_then(Value::as_str).map(String::from),
            ip_address: value
                .pointer("/properties/ipAddress")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    async fn create_network_security_group(
        &self,
        name: &str,
        spec: &RunnerSpec,
    ) -> Result<SecurityGroup> {
        let path = self.group_path(
            name,
            &format!("Microsoft.Network/networkSecurityGroups/{name}"),
        );
        let url = self.resource_url(&path, NETWORK_API_VERSION)?;
        let body = json!({
            "location": self.config.location,
            "properties": { "securityRules": Self::security_rules(spec) },
        });
        let value = self.put(url, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create_network_interface(
        &self,
        name: &str,
        subnet_id: &str,
        security_group_id: &str,
        public_ip_id: Option<&str>,
        accelerated_networking: bool,
    ) -> Result<NetworkInterface> {
        let path = self.group_path(name, &format!("Microsoft.Network/networkInterfaces/{name}"));
        let url = self.resource_url(&path, NETWORK_API_VERSION)?;

        let mut ip_configuration = json!({
            "name": format!("{name}-ipconfig"),
            "properties": {
                "subnet": { "id": subnet_id },
                "privateIPAllocationMethod": "Dynamic",
            },
        });
        if let Some(public_ip_id) = public_ip_id {
            ip_configuration["properties"]["publicIPAddress"] = json!({ "id": public_ip_id });
        }

        let body = json!({
            "location": self.config.location,
            "properties": {
                "enableAcceleratedNetworking": accelerated_networking,
                "networkSecurityGroup": { "id": security_group_id },
                "ipConfigurations": [ip_configuration],
            },
        });
        let value = self.put(url, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create_virtual_machine(
        &self,
        spec: &RunnerSpec,
        nic_id: &str,
        disk_size_gb: u32,
    ) -> Result<()> {
        let path = self.group_path(
            &spec.name,
            &format!("Microsoft.Compute/virtualMachines/{}", spec.name),
        );
        let url = self.resource_url(&path, COMPUTE_API_VERSION)?;
        let body = self.vm_payload(spec, nic_id, disk_size_gb);
        self.put(url, body).await?;
        Ok(())
    }

    async fn get_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualMachine> {
        let path = self.group_path(
            resource_group,
            &format!("Microsoft.Compute/virtualMachines/{name}"),
        );
        let mut url = self.resource_url(&path, COMPUTE_API_VERSION)?;
        url.query_pairs_mut().append_pair("$expand", "instanceView");
        let resp = self.send(Method::GET, url, None).await?;
        Ok(resp.json().await?)
    }

    async fn list_virtual_machines(&self, pool_id: &str) -> Result<Vec<Option<VirtualMachine>>> {
        let path = format!(
            "/subscriptions/{}/providers/Microsoft.Compute/virtualMachines",
            self.config.subscription_id
        );
        let url = self.resource_url(&path, COMPUTE_API_VERSION)?;
        let resp = self.send(Method::GET, url, None).await?;

        #[derive(Deserialize)]
        struct ListResponse {
            #[serde(default)]
            value: Vec<Option<VirtualMachine>>,
        }
        let list: ListResponse = resp.json().await?;

        // A null entry is kept so the caller can flag the protocol violation;
        // concrete records are filtered down to the requested pool.
        Ok(list
            .value
            .into_iter()
            .filter(|entry| match entry {
                None => true,
                Some(vm) => vm.tags.get(tags::POOL_ID).map(String::as_str) == Some(pool_id),
            })
            .collect())
    }

    async fn max_ephemeral_disk_size(&self, vm_size: &str) -> Result<u32> {
        let path = format!(
            "/subscriptions/{}/providers/Microsoft.Compute/skus",
            self.config.subscription_id
        );
        let mut url = self.resource_url(&path, SKUS_API_VERSION)?;
        url.query_pairs_mut().append_pair(
            "$filter",
            &format!("location eq '{}'", self.config.location),
        );
        let resp = self.send(Method::GET, url, None).await?;

        #[derive(Deserialize)]
        struct SkuCapability {
            name: String,
            value: String,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Sku {
            name: String,
            resource_type: String,
            #[serde(default)]
            capabilities: Vec<SkuCapability>,
        }
        #[derive(Deserialize)]
        struct SkuListResponse {
            #[serde(default)]
            value: Vec<Sku>,
        }
        let list: SkuListResponse = resp.json().await?;

        let sku = list
            .value
            .iter()
            .find(|sku| sku.resource_type == "virtualMachines" && sku.name == vm_size)
            .ok_or_else(|| Error::NotFound(format!("VM size {vm_size}")))?;

        let max_mb: u64 = sku
            .capabilities
            .iter()
            .find(|cap| cap.name == "MaxResourceVolumeMB")
            .and_then(|cap| cap.value.parse().ok())
            .ok_or_else(|| {
                Error::InvalidSpec(format!(
                    "VM size {vm_size} does not support ephemeral OS disks"
                ))
            })?;

        Ok((max_mb / 1024) as u32)
    }

    async fn deallocate_virtual_machine(&self, resource_group: &str, name: &str) -> Result<()> {
        let path = self.group_path(
            resource_group,
            &format!("Microsoft.Compute/virtualMachines/{name}/deallocate"),
        );
        let url = self.resource_url(&path, COMPUTE_API_VERSION)?;
        self.send(Method::POST, url, None).await?;
        Ok(())
    }

    async fn start_virtual_machine(&self, resource_group: &str, name: &str) -> Result<()> {
        let path = self.group_path(
            resource_group,
            &format!("Microsoft.Compute/virtualMachines/{name}/start"),
        );
        let url = self.resource_url(&path, COMPUTE_API_VERSION)?;
        self.send(Method::POST, url, None).await?;
        Ok(())
    }
}

/// Truncates API error bodies so log lines and error chains stay readable.
fn excerpt(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() > MAX {
        format!("{}... (truncated)", &body[..MAX])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::params::{BootstrapInstance, OsArch};

    fn test_config() -> Config {
        Config {
            subscription_id: "sub-123".to_string(),
            location: "westeurope".to_string(),
            credentials: Credentials {
                tenant_id: "tenant".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
            },
            ..Config::default()
        }
    }

    fn test_spec(ephemeral: bool, confidential: bool) -> RunnerSpec {
        let params = BootstrapInstance {
            name: "runner-01".to_string(),
            pool_id: "pool-1".to_string(),
            flavor: "Standard_D2s_v3".to_string(),
            image: "Canonical:0001-com-ubuntu-server-jammy:22_04-lts-gen2:latest".to_string(),
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            user_data: Some("#!/bin/bash\n".to_string()),
            extra_specs: None,
        };
        let mut spec = RunnerSpec::from_bootstrap(&params, "ctrl-1", &test_config()).unwrap();
        spec.use_ephemeral_storage = ephemeral;
        spec.confidential = confidential;
        spec
    }

    #[test]
    fn test_vm_payload_ephemeral_disk() {
        let client = AzureClient::new(test_config()).unwrap();
        let payload = client.vm_payload(&test_spec(true, false), "/nic/id", 63);
        let os_disk = payload.pointer("/properties/storageProfile/osDisk").unwrap();
        assert_eq!(os_disk["diffDiskSettings"]["option"], "Local");
        assert_eq!(os_disk["caching"], "ReadOnly");
        assert_eq!(os_disk["diskSizeGB"], 63);
        assert!(os_disk.get("managedDisk").is_none());
    }

    #[test]
    fn test_vm_payload_managed_disk_default_size() {
        let client = AzureClient::new(test_config()).unwrap();
        let payload = client.vm_payload(&test_spec(false, false), "/nic/id", 0);
        let os_disk = payload.pointer("/properties/storageProfile/osDisk").unwrap();
        assert_eq!(os_disk["managedDisk"]["storageAccountType"], "Standard_LRS");
        // Size 0 means "image default"; the field is omitted entirely.
        assert!(os_disk.get("diskSizeGB").is_none());
    }

    #[test]
    fn test_vm_payload_confidential_security_profile() {
        let client = AzureClient::new(test_config()).unwrap();
        let payload = client.vm_payload(&test_spec(true, true), "/nic/id", 63);
        assert_eq!(
            payload.pointer("/properties/securityProfile/securityType").unwrap(),
            "ConfidentialVM"
        );
    }

    #[test]
    fn test_vm_payload_custom_data_is_base64() {
        let client = AzureClient::new(test_config()).unwrap();
        let payload = client.vm_payload(&test_spec(false, false), "/nic/id", 0);
        let custom_data = payload
            .pointer("/properties/osProfile/customData")
            .and_then(Value::as_str)
            .unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(custom_data)
            .unwrap();
        assert_eq!(decoded, b"#!/bin/bash\n");
    }

    #[test]
    fn test_security_rules_from_ports() {
        let mut spec = test_spec(false, false);
        spec.open_inbound_ports = vec![22, 443];
        let rules = AzureClient::security_rules(&spec);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0]["properties"]["destinationPortRange"], "22");
        assert_eq!(rules[0]["properties"]["priority"], 200);
        assert_eq!(rules[1]["properties"]["priority"], 201);
    }

    #[test]
    fn test_excerpt_truncates_long_bodies() {
        let long = "x".repeat(2048);
        assert!(excerpt(&long).len() < 600);
        assert_eq!(excerpt("short"), "short");
    }
}
