//! Shadowsocks protocol parser
//!
//! Link formats:
//!
//! - SIP002: `ss://userinfo@hostname:port[/][?plugin][#tag]`, where `userinfo` is
//!   Base64 `method:password` or percent-encoded plain `method:password`
//!   (2022 ciphers).
//! - Legacy: `ss://base64(method:password@hostname:port)[#tag]`.
//!
//! **plugin**: Optional; e.g. `plugin-name;opt=value`, URL-encoded. Kept on the
//! descriptor and shown in details; the engine outbound does not carry it.
//!
//! **tag**: Optional; fragment decoded as remark.
//!
//! Transport is always `tcp` and security defaults to `none`.

use crate::ProtocolParser;
use crate::constants::{defaults, scheme};
use crate::error::{BuildError, ParseError, Result};
use crate::link::{self, LinkParts, Query, QueryField};
use crate::outbound::{self, Outbound, StreamParams};
use crate::summary::{self, Details, GeneralConfig};
use serde_json::json;

/// Shadowsocks configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowsocksConfig {
    /// Encryption method (aes-256-gcm, chacha20-poly1305, etc.)
    pub method: String,
    /// Password
    pub password: String,
    /// Server address (IPv6 bracketed)
    pub address: String,
    /// Server port
    pub port: String,
    /// Transport type, always `tcp` after parsing
    pub r#type: Option<String>,
    /// Security type
    pub security: Option<String>,
    /// Plugin information
    pub plugin: Option<String>,
    /// Tag/remark
    pub remark: Option<String>,
}

static SHADOWSOCKS_FIELDS: &[QueryField<ShadowsocksConfig>] = &[
    QueryField::text("plugin", |c| &mut c.plugin),
    QueryField::text("type", |c| &mut c.r#type),
    QueryField::text("security", |c| &mut c.security),
];

/// Shadowsocks protocol parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadowsocks {
    /// Link this descriptor was parsed from
    pub orig_link: String,
    /// Shadowsocks configuration
    pub config: ShadowsocksConfig,
}

/// Splits `method:password` at the first colon.
fn method_password(credentials: &str) -> Result<(String, String)> {
    let (method, password) = credentials.split_once(':').ok_or_else(|| {
        ParseError::MalformedUri("missing ':' in method:password".to_string())
    })?;
    if method.is_empty() {
        return Err(ParseError::MalformedUri("empty cipher method".to_string()));
    }
    Ok((method.to_string(), password.to_string()))
}

impl ProtocolParser for Shadowsocks {
    const NAME: &'static str = "shadowsocks";

    fn parse(link: &str) -> Result<Self> {
        let parts = LinkParts::split(link::strip_scheme(link, scheme::SHADOWSOCKS)?);

        let (method, password, address, port) = match parts.userinfo {
            Some(_) => {
                let userinfo = parts.userinfo_required()?;
                let credentials = link::decode_base64_str(&userinfo)
                    .ok()
                    .filter(|decoded| decoded.contains(':'))
                    .unwrap_or(userinfo);
                let (method, password) = method_password(&credentials)?;
                let (address, port) = parts.host_and_port()?;
                (method, password, address, port)
            }
            None => {
                let decoded = link::decode_base64_str(parts.host_port)?;
                let inner = LinkParts::split(&decoded);
                let (method, password) = method_password(&inner.userinfo_required()?)?;
                let (address, port) = inner.host_and_port()?;
                (method, password, address, port)
            }
        };

        let mut config = ShadowsocksConfig {
            method,
            password,
            address,
            port,
            remark: parts.remark(),
            ..Default::default()
        };
        link::apply_query(&mut config, SHADOWSOCKS_FIELDS, &Query::parse(parts.query));

        config.r#type.get_or_insert_with(|| defaults::NETWORK.to_string());
        config.security.get_or_insert_with(|| defaults::NONE.to_string());

        Ok(Shadowsocks {
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
            .field("Network", summary::or_none(c.r#type.as_deref()))
            .field("Address", &c.address)
            .field("Port", &c.port)
            .field("Method", &c.method)
            .field("Password", &c.password);
        if let Some(plugin) = &c.plugin {
            out.field("Plugin", plugin);
        }
        out.finish()
    }

    fn summary(&self) -> GeneralConfig {
        let c = &self.config;
        GeneralConfig {
            protocol: Self::NAME.to_string(),
            address: c.address.clone(),
            port: c.port.clone(),
            id: c.password.clone(),
            network: summary::text(&c.r#type),
            tls: summary::tls_mode(c.security.as_deref()),
            remark: summary::text(&c.remark),
            orig_link: self.orig_link.clone(),
            ..Default::default()
        }
    }

    fn build_outbound(&self, allow_insecure: bool) -> Result<Outbound, BuildError> {
        let c = &self.config;
        let port = outbound::port_number(&c.port)?;

        let settings = json!({
            "servers": [{
                "address": c.address,
                "port": port,
                "method": c.method,
                "password": c.password,
            }]
        });

        let params = StreamParams {
            network: c.r#type.as_deref(),
            security: c.security.as_deref(),
            ..Default::default()
        };
        let stream = outbound::build_stream(&params, allow_insecure);
        Ok(Outbound::new(Self::NAME, settings).with_stream(stream))
    }
}
