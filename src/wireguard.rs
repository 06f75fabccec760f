//! WireGuard protocol parser
//!
//! Two link forms are accepted and tried in this order:
//!
//! 1. `wireguard://base64(JSON)` with `secretKey`, `endpoint` (`host:port`),
//!    `publicKey`, `address` (string or list), `preSharedKey`, `reserved`,
//!    `mtu` and `remark`.
//! 2. `wireguard://urlencoded(secret-key)@host:port?publickey=..&address=..&mtu=..#remark`.
//!
//! Only when both fail is a [`ParseError`] returned.
//!
//! The secret key is the identifier. WireGuard runs over UDP and carries no
//! transport or TLS block, so security is always `none`.

use crate::ProtocolParser;
use crate::constants::{defaults, scheme};
use crate::error::{BuildError, ParseError, Result};
use crate::link::{self, LinkParts, Query, QueryField};
use crate::outbound::{self, Outbound};
use crate::summary::{self, Details, GeneralConfig};
use serde::Deserialize;
use serde_json::json;

/// WireGuard configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireGuardConfig {
    /// Local private key
    pub secret_key: String,
    /// Peer address (IPv6 bracketed)
    pub address: String,
    /// Peer port
    pub port: String,
    /// Peer public key
    pub public_key: Option<String>,
    /// Local interface addresses, comma separated
    pub local_address: Option<String>,
    /// Optional pre-shared key
    pub pre_shared_key: Option<String>,
    /// Reserved bytes, comma separated
    pub reserved: Option<String>,
    /// Interface MTU; zero means unset
    pub mtu: i32,
    /// Security type, always `none`
    pub security: Option<String>,
    /// Remark/description
    pub remark: Option<String>,
}

static WIREGUARD_FIELDS: &[QueryField<WireGuardConfig>] = &[
    QueryField::text("publickey", |c| &mut c.public_key),
    QueryField::text("address", |c| &mut c.local_address),
    QueryField::text("presharedkey", |c| &mut c.pre_shared_key),
    QueryField::text("reserved", |c| &mut c.reserved),
    QueryField::int("mtu", |c| &mut c.mtu),
];

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressList {
    One(String),
    Many(Vec<String>),
}

/// JSON link body.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonForm {
    secret_key: String,
    endpoint: String,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    address: Option<AddressList>,
    #[serde(default)]
    pre_shared_key: Option<String>,
    #[serde(default)]
    reserved: Option<Vec<u8>>,
    #[serde(default)]
    mtu: Option<i32>,
    #[serde(default)]
    remark: Option<String>,
}

/// WireGuard protocol parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireGuard {
    /// Link this descriptor was parsed from
    pub orig_link: String,
    /// WireGuard configuration
    pub config: WireGuardConfig,
}

impl WireGuard {
    /// Peer endpoint as `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.config.address, self.config.port)
    }

    fn parse_json(body: &str) -> Result<WireGuardConfig> {
        let form: JsonForm = serde_json::from_str(&link::decode_base64_str(body)?)?;
        if form.secret_key.is_empty() {
            return Err(ParseError::MalformedUri("empty secretKey".to_string()));
        }
        let (address, port) = link::split_host_port(&form.endpoint)?;
        let local_address = form.address.map(|list| match list {
            AddressList::One(address) => address,
            AddressList::Many(list) => list.join(","),
        });
        let reserved = form.reserved.map(|bytes| {
            bytes
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(",")
        });

        Ok(WireGuardConfig {
            secret_key: form.secret_key,
            address,
            port,
            public_key: form.public_key.filter(|s| !s.is_empty()),
            local_address: local_address.filter(|s| !s.is_empty()),
            pre_shared_key: form.pre_shared_key.filter(|s| !s.is_empty()),
            reserved,
            mtu: form.mtu.unwrap_or_default(),
            remark: form.remark.filter(|s| !s.is_empty()),
            ..Default::default()
        })
    }

    fn parse_query(body: &str) -> Result<WireGuardConfig> {
        let parts = LinkParts::split(body);
        let secret_key = parts.userinfo_required()?;
        if secret_key.is_empty() {
            return Err(ParseError::MalformedUri("empty secret key".to_string()));
        }
        let (address, port) = parts.host_and_port()?;

        let mut config = WireGuardConfig {
            secret_key,
            address,
            port,
            remark: parts.remark(),
            ..Default::default()
        };
        link::apply_query(&mut config, WIREGUARD_FIELDS, &Query::parse(parts.query));
        Ok(config)
    }
}

fn comma_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ProtocolParser for WireGuard {
    const NAME: &'static str = "wireguard";

    fn parse(link: &str) -> Result<Self> {
        let body = link::strip_scheme(link, scheme::WIREGUARD)?;
        let mut config = WireGuard::parse_json(body).or_else(|_| WireGuard::parse_query(body))?;
        config.security.get_or_insert_with(|| defaults::NONE.to_string());

        Ok(WireGuard {
            orig_link: link.to_string(),
            config,
        })
    }

    fn orig_link(&self) -> &str {
        &self.orig_link
    }

    fn details(&self) -> String {
        let c = &self.config;
        let mut out = Details::default();
        out.field("Protocol", Self::NAME)
            .field("Remark", c.remark.as_deref().unwrap_or_default())
            .field("Endpoint", self.endpoint())
            .field("MTU", c.mtu)
            .field("Local Addresses", summary::or_none(c.local_address.as_deref()))
            .field("Public Key", summary::or_none(c.public_key.as_deref()))
            .field("Secret Key", &c.secret_key);
        if let Some(reserved) = &c.reserved {
            out.field("Reserved", reserved);
        }
        out.finish()
    }

    fn summary(&self) -> GeneralConfig {
        let c = &self.config;
        GeneralConfig {
            protocol: Self::NAME.to_string(),
            address: c.address.clone(),
            port: c.port.clone(),
            id: c.secret_key.clone(),
            network: "udp".to_string(),
            tls: summary::tls_mode(c.security.as_deref()),
            remark: summary::text(&c.remark),
            orig_link: self.orig_link.clone(),
            ..Default::default()
        }
    }

    fn build_outbound(&self, _allow_insecure: bool) -> Result<Outbound, BuildError> {
        let c = &self.config;
        outbound::port_number(&c.port)?;

        let mut peer = json!({
            "endpoint": self.endpoint(),
            "publicKey": c.public_key.as_deref().unwrap_or_default(),
        });
        if let Some(psk) = &c.pre_shared_key {
            peer["preSharedKey"] = json!(psk);
        }

        let mut settings = json!({
            "secretKey": c.secret_key,
            "address": comma_list(c.local_address.as_deref()),
            "peers": [peer],
            "mtu": if c.mtu > 0 { c.mtu } else { defaults::WIREGUARD_MTU },
        });
        if let Some(reserved) = &c.reserved {
            let bytes = comma_list(Some(reserved))
                .iter()
                .map(|b| b.parse::<u8>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| BuildError::invalid("reserved", reserved.as_str()))?;
            settings["reserved"] = json!(bytes);
        }

        Ok(Outbound::new(Self::NAME, settings))
    }
}
