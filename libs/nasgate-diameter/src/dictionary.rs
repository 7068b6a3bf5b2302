//! Command and AVP dictionary
//!
//! The dictionary is data, not code: it ships as a JSON artifact read once
//! at start-up and shared read-only afterwards. It drives request validation
//! (which AVP groups a command must carry) and gives human-readable names to
//! commands, AVPs, applications, vendors and disconnect causes for logging.
//!
//! Commands and AVPs arrive as JSON arrays (JSON object keys can only be
//! strings) and are re-keyed by code during load.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{DiameterError, DiameterResult};

/// Command metadata
#[derive(Debug, Clone, Deserialize)]
pub struct CommandDef {
    /// Command name, e.g. "Capabilities-Exchange"
    pub name: String,
    /// Command code
    pub code: u32,
    /// True when the catalogued form is the request
    #[serde(default)]
    pub request: bool,
    /// Application the command belongs to
    #[serde(default)]
    pub application_id: u32,
    /// Required AVP groups: each inner group must be satisfied by at least
    /// one present AVP of a listed code
    #[serde(default, rename = "avps")]
    pub required_avps: Vec<Vec<u32>>,
}

/// AVP metadata
#[derive(Debug, Clone, Deserialize)]
pub struct AvpDef {
    /// AVP name, e.g. "Origin-Host"
    pub name: String,
    /// AVP code
    pub code: u32,
    /// Display type tag ("Unsigned32", "UTF8String", "Address", ...),
    /// consulted for debug output only
    #[serde(rename = "type")]
    pub avp_type: String,
}

/// On-disk dictionary layout
#[derive(Debug, Default, Deserialize)]
struct DictionaryFile {
    #[serde(default)]
    commands: Vec<CommandDef>,
    #[serde(default)]
    avps: Vec<AvpDef>,
    #[serde(default)]
    auth_app_meta: HashMap<String, String>,
    #[serde(default)]
    acct_app_meta: HashMap<String, String>,
    #[serde(default)]
    vendor_meta: HashMap<String, String>,
    #[serde(default)]
    cause_meta: HashMap<String, String>,
}

/// Loaded dictionary, keyed by code
#[derive(Debug, Default)]
pub struct Dictionary {
    commands: HashMap<u32, CommandDef>,
    avps: HashMap<u32, AvpDef>,
    auth_apps: HashMap<String, String>,
    acct_apps: HashMap<String, String>,
    vendors: HashMap<String, String>,
    causes: HashMap<String, String>,
}

impl Dictionary {
    /// Load the dictionary from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> DiameterResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            DiameterError::Dictionary(format!("read {}: {e}", path.display()))
        })?;
        Self::from_json(&data)
    }

    /// Parse the dictionary from a JSON string
    pub fn from_json(data: &str) -> DiameterResult<Self> {
        let file: DictionaryFile = serde_json::from_str(data)
            .map_err(|e| DiameterError::Dictionary(format!("parse: {e}")))?;

        let mut dict = Self {
            commands: HashMap::new(),
            avps: HashMap::new(),
            auth_apps: file.auth_app_meta,
            acct_apps: file.acct_app_meta,
            vendors: file.vendor_meta,
            causes: file.cause_meta,
        };
        for avp in file.avps {
            dict.avps.insert(avp.code, avp);
        }
        for cmd in file.commands {
            dict.commands.insert(cmd.code, cmd);
        }
        Ok(dict)
    }

    /// Look up a command by code
    pub fn command(&self, code: u32) -> Option<&CommandDef> {
        self.commands.get(&code)
    }

    /// Look up an AVP by code
    pub fn avp(&self, code: u32) -> Option<&AvpDef> {
        self.avps.get(&code)
    }

    /// Human-readable vendor name
    pub fn vendor_name(&self, id: u32) -> Option<&str> {
        self.vendors.get(&id.to_string()).map(String::as_str)
    }

    /// Human-readable authentication application name
    pub fn auth_app_name(&self, id: u32) -> Option<&str> {
        self.auth_apps.get(&id.to_string()).map(String::as_str)
    }

    /// Human-readable accounting application name
    pub fn acct_app_name(&self, id: u32) -> Option<&str> {
        self.acct_apps.get(&id.to_string()).map(String::as_str)
    }

    /// Human-readable disconnect cause name
    pub fn cause_name(&self, id: u32) -> Option<&str> {
        self.causes.get(&id.to_string()).map(String::as_str)
    }

    /// Vendor names for a list of ids, `Unknown(<id>)` for unmapped ones
    pub fn vendor_names(&self, ids: &[u32]) -> Vec<String> {
        names_for(ids, |id| self.vendor_name(id))
    }

    /// Auth application names for a list of ids
    pub fn auth_app_names(&self, ids: &[u32]) -> Vec<String> {
        names_for(ids, |id| self.auth_app_name(id))
    }

    /// Acct application names for a list of ids
    pub fn acct_app_names(&self, ids: &[u32]) -> Vec<String> {
        names_for(ids, |id| self.acct_app_name(id))
    }
}

fn names_for<'a>(ids: &[u32], lookup: impl Fn(u32) -> Option<&'a str>) -> Vec<String> {
    ids.iter()
        .map(|&id| match lookup(id) {
            Some(name) => name.to_string(),
            None => format!("Unknown({id})"),
        })
        .collect()
}

#[cfg(test)]
impl Dictionary {
    /// Dictionary covering the base commands plus the test auth command,
    /// shared by the protocol tests.
    pub(crate) fn test_fixture() -> Self {
        Self::from_json(
            r#"{
            "commands": [
                {"name": "Capabilities-Exchange", "code": 257, "request": true,
                 "application_id": 0, "avps": [[264], [296], [257], [266], [269]]},
                {"name": "Device-Watchdog", "code": 280, "request": true,
                 "application_id": 0, "avps": [[264], [296]]},
                {"name": "Disconnect-Peer", "code": 282, "request": true,
                 "application_id": 0, "avps": [[264], [296], [273]]},
                {"name": "User-Auth", "code": 234567, "request": true,
                 "application_id": 16777251, "avps": [[1], [2]]}
            ],
            "avps": [
                {"name": "User-Name", "code": 1, "type": "Unsigned32"},
                {"name": "User-Password", "code": 2, "type": "UTF8String"},
                {"name": "Host-IP-Address", "code": 257, "type": "Address"},
                {"name": "Origin-Host", "code": 264, "type": "DiameterIdentity"},
                {"name": "Origin-Realm", "code": 296, "type": "DiameterIdentity"},
                {"name": "Result-Code", "code": 268, "type": "Unsigned32"}
            ],
            "auth_app_meta": {"0": "Diameter Common Messages", "16777251": "3GPP S6a"},
            "acct_app_meta": {"3": "Diameter Base Accounting"},
            "vendor_meta": {"0": "Reserved", "10415": "3GPP"},
            "cause_meta": {"0": "REBOOTING", "1": "BUSY", "2": "DO_NOT_WANT_TO_TALK_TO_YOU"}
        }"#,
        )
        .unwrap()
    }
}
