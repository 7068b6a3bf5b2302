//! Server configuration
//!
//! Loaded once at start-up from a JSON file and shared read-only with every
//! connection task. The credential maps are keyed by the decimal string form
//! of the user id, matching the JSON artifact.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::Deserialize;

use crate::error::{DiameterError, DiameterResult};

/// Diameter server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Diameter Identity of this peer (FQDN)
    pub origin_host: String,

    /// Diameter realm of this peer
    pub origin_realm: String,

    /// IP address advertised in Host-IP-Address AVPs
    pub host_ip_address: String,

    /// Product name advertised in CEA/DWA
    pub product_name: String,

    /// Vendor ID advertised in CEA/DWA
    #[serde(default)]
    pub vendor_id: u32,

    /// Authentication applications this peer supports
    #[serde(default)]
    pub auth_application_ids: Vec<u32>,

    /// Accounting applications this peer supports
    #[serde(default)]
    pub acct_application_ids: Vec<u32>,

    /// user id -> password
    #[serde(default)]
    pub userid_2_password: HashMap<String, String>,

    /// user id -> OAuth token handed out on successful authentication
    #[serde(default, rename = "userid_2_oauthtoken")]
    pub userid_2_oauth_token: HashMap<String, String>,
}

impl ServerConfig {
    /// Load the configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> DiameterResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| DiameterError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json(&data)
    }

    /// Parse the configuration from a JSON string
    pub fn from_json(data: &str) -> DiameterResult<Self> {
        let config: Self = serde_json::from_str(data)
            .map_err(|e| DiameterError::Config(format!("parse: {e}")))?;
        config.host_ip_address.parse::<IpAddr>().map_err(|e| {
            DiameterError::Config(format!(
                "host_ip_address {:?}: {e}",
                config.host_ip_address
            ))
        })?;
        Ok(config)
    }

    /// The advertised host IP, validated at load time
    pub fn host_ip(&self) -> IpAddr {
        self.host_ip_address
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    /// Password configured for a user id
    pub fn password_for(&self, user_id: u32) -> Option<&str> {
        self.userid_2_password
            .get(&user_id.to_string())
            .map(String::as_str)
    }

    /// OAuth token configured for a user id
    pub fn oauth_token_for(&self, user_id: u32) -> Option<&str> {
        self.userid_2_oauth_token
            .get(&user_id.to_string())
            .map(String::as_str)
    }
}

#[cfg(test)]
impl ServerConfig {
    /// Configuration shared by the protocol tests: supports one auth and one
    /// acct application, and knows user 7 with password "secret".
    pub(crate) fn test_fixture() -> Self {
        Self::from_json(
            r#"{
            "origin_host": "aaa.nasgate.example.com",
            "origin_realm": "nasgate.example.com",
            "host_ip_address": "127.0.0.1",
            "product_name": "nasgate-aaad",
            "vendor_id": 0,
            "auth_application_ids": [16777251],
            "acct_application_ids": [3],
            "userid_2_password": {"7": "secret"},
            "userid_2_oauthtoken": {"7": "tok-xyz"}
        }"#,
        )
        .unwrap()
    }
}
