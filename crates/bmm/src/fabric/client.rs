//! HTTP flow controller client.
//!
//! Each RPC is a `POST {base}/{method}` with named JSON arguments.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::models::{
    NoArgs, OuterPortAssociationArgs, RegionArgs, RegionList, ServerPort, ServerPortArgs,
    ServerPortList,
};
use super::traits::FlowControllerRpc;
use crate::error::{BmmError, Result};

/// Default timeout for controller requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Flow controller reached over HTTP.
#[derive(Clone)]
pub struct HttpFlowController {
    client: Client,
    base_url: String,
}

impl HttpFlowController {
    /// Create a client for the controller at `base_url`.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Invoke a method, discarding the response body.
    async fn call<B: Serialize + Sync>(&self, method: &str, args: &B) -> Result<()> {
        self.send(method, args).await.map(drop)
    }

    /// Invoke a method and decode its JSON response.
    async fn query<T, B>(&self, method: &str, args: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let text = self.send(method, args).await?;
        serde_json::from_str(&text).map_err(|e| {
            warn!(method, error = %e, body = %text, "Failed to parse response");
            BmmError::Serialization(e)
        })
    }

    async fn send<B: Serialize + Sync>(&self, method: &str, args: &B) -> Result<String> {
        let url = format!("{}/{method}", self.base_url);
        debug!(url = %url, "Flow controller request");

        let response = self.client.post(&url).json(args).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(BmmError::FlowController {
                method: method.to_string(),
                message: format!("HTTP {}: {text}", status.as_u16()),
            })
        }
    }
}

#[async_trait]
impl FlowControllerRpc for HttpFlowController {
    async fn set_server_port(&self, port: &ServerPort, region: &str) -> Result<()> {
        self.call(
            "setServerPort",
            &ServerPortArgs {
                dpid: &port.dpid,
                port_no: port.port,
                region_name: region,
            },
        )
        .await
    }

    async fn clear_server_port(&self, port: &ServerPort, region: &str) -> Result<()> {
        self.call(
            "clearServerPort",
            &ServerPortArgs {
                dpid: &port.dpid,
                port_no: port.port,
                region_name: region,
            },
        )
        .await
    }

    async fn create_region(&self, region: &str) -> Result<()> {
        self.call("createRegion", &RegionArgs { region_name: region })
            .await
    }

    async fn destroy_region(&self, region: &str) -> Result<()> {
        self.call("destroyRegion", &RegionArgs { region_name: region })
            .await
    }

    async fn set_outer_port_association_setting(
        &self,
        port: &ServerPort,
        vlan_id: u16,
        region: &str,
    ) -> Result<()> {
        self.call(
            "setOuterPortAssociationSetting",
            &OuterPortAssociationArgs {
                dpid: &port.dpid,
                port_no: port.port,
                vlan_id_min: vlan_id,
                vlan_id_max: vlan_id,
                region_name: region,
            },
        )
        .await
    }

    async fn clear_outer_port_association_setting(
        &self,
        port: &ServerPort,
        vlan_id: u16,
        region: &str,
    ) -> Result<()> {
        self.call(
            "clearOuterPortAssociationSetting",
            &OuterPortAssociationArgs {
                dpid: &port.dpid,
                port_no: port.port,
                vlan_id_min: vlan_id,
                vlan_id_max: vlan_id,
                region_name: region,
            },
        )
        .await
    }

    async fn show_region(&self) -> Result<Vec<String>> {
        let list: RegionList = self.query("showRegion", &NoArgs {}).await?;
        Ok(list.regions)
    }

    async fn show_server_ports(&self, region: &str) -> Result<Vec<ServerPort>> {
        let list: ServerPortList = self
            .query("showServerPort", &RegionArgs { region_name: region })
            .await?;
        Ok(list.server_ports)
    }

    async fn save(&self) -> Result<()> {
        self.call("save", &NoArgs {}).await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_show_region_parses_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/showRegion"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "regions": ["tenantA", "tenantB"] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpFlowController::new(server.uri()).unwrap();
        let regions = client.show_region().await.unwrap();
        assert_eq!(regions, vec!["tenantA", "tenantB"]);
    }

    #[tokio::test]
    async fn test_set_server_port_sends_named_args() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/setServerPort"))
            .and(body_json(serde_json::json!({
                "dpid": "0x0001",
                "portNo": 11,
                "regionName": "tenantA"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpFlowController::new(format!("{}/", server.uri())).unwrap();
        client
            .set_server_port(&ServerPort::new("0x0001", 11), "tenantA")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_outer_port_association_uses_single_vlan_range() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/setOuterPortAssociationSetting"))
            .and(body_json(serde_json::json!({
                "dpid": "0x0010",
                "portNo": 48,
                "vlanIdMin": 100,
                "vlanIdMax": 100,
                "regionName": "tenantA"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpFlowController::new(server.uri()).unwrap();
        client
            .set_outer_port_association_setting(&ServerPort::new("0x0010", 48), 100, "tenantA")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_maps_to_flow_controller_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/createRegion"))
            .respond_with(ResponseTemplate::new(500).set_body_string("region limit reached"))
            .mount(&server)
            .await;

        let client = HttpFlowController::new(server.uri()).unwrap();
        let err = client.create_region("tenantA").await.unwrap_err();
        match err {
            BmmError::FlowController { method, message } => {
                assert_eq!(method, "createRegion");
                assert!(message.contains("500"));
                assert!(message.contains("region limit reached"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_show_server_ports() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/showServerPort"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "serverPorts": [{ "dpid": "0x0001", "port": 11 }]
            })))
            .mount(&server)
            .await;

        let client = HttpFlowController::new(server.uri()).unwrap();
        let ports = client.show_server_ports("tenantA").await.unwrap();
        assert_eq!(ports, vec![ServerPort::new("0x0001", 11)]);
    }
}
