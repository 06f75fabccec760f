//! VLess protocol parser
//!
//! URI format (RFC 3986): `vless://<id>@<address>:<port>[?<query>][#<fragment>]`
//!
//! **Required**: `id` (user UUID), `address` (host or IP), `port` (1–65535).
//!
//! **Query parameters** (optional, `application/x-www-form-urlencoded`): `encryption`, `flow` (e.g. `xtls-rprx-vision`),
//! `security` (none/tls/reality), `type` (tcp/ws/grpc/h2/httpupgrade/splithttp/xhttp/kcp/quic), `headerType`, `host`,
//! `path`, `sni`, `alpn`, `fp`, `pbk` (Reality public key), `sid` (Reality short ID), `spx`, `serviceName`, `mode`,
//! `allowInsecure`, `seed`, `quicSecurity`, `key`.
//!
//! ## Defaults
//!
//! `type` defaults to `tcp` and `security` to `none`; the fingerprint only defaults when TLS or Reality is on.

use crate::ProtocolParser;
use crate::constants::{defaults, scheme};
use crate::error::{BuildError, Result};
use crate::link::{self, LinkParts, Query, QueryField};
use crate::outbound::{self, Outbound, StreamParams};
use crate::summary::{self, Details, GeneralConfig};
use serde_json::json;

/// VLess configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VLessConfig {
    /// User ID (UUID)
    pub id: String,
    /// Server address (IPv6 bracketed)
    pub address: String,
    /// Server port
    pub port: String,
    /// Encryption method
    pub encryption: Option<String>,
    /// Flow control (for XTLS)
    pub flow: Option<String>,
    /// Security type (tls, reality, none)
    pub security: Option<String>,
    /// Network type (tcp, kcp, ws, h2, quic, grpc, ...)
    pub r#type: Option<String>,
    /// Header type
    pub header_type: Option<String>,
    /// Host header
    pub host: Option<String>,
    /// Path (for ws/h2/httpupgrade/xhttp)
    pub path: Option<String>,
    /// SNI (Server Name Indication)
    pub sni: Option<String>,
    /// ALPN list, comma separated
    pub alpn: Option<String>,
    /// Fingerprint
    pub fp: Option<String>,
    /// Public key (for Reality)
    pub pbk: Option<String>,
    /// Short ID (for Reality)
    pub sid: Option<String>,
    /// Spider-x (for Reality)
    pub spx: Option<String>,
    /// gRPC service name
    pub service_name: Option<String>,
    /// gRPC / xhttp mode
    pub mode: Option<String>,
    /// Per-link insecure flag
    pub allow_insecure: Option<String>,
    /// Seed (for mKCP)
    pub seed: Option<String>,
    /// QUIC header security
    pub quic_security: Option<String>,
    /// QUIC key
    pub key: Option<String>,
    /// Remark/description
    pub remark: Option<String>,
}

static VLESS_FIELDS: &[QueryField<VLessConfig>] = &[
    QueryField::text("encryption", |c| &mut c.encryption),
    QueryField::text("flow", |c| &mut c.flow),
    QueryField::text("security", |c| &mut c.security),
    QueryField::text("type", |c| &mut c.r#type),
    QueryField::text("headerType", |c| &mut c.header_type),
    QueryField::text("host", |c| &mut c.host),
    QueryField::text("path", |c| &mut c.path),
    QueryField::text("sni", |c| &mut c.sni),
    QueryField::text("alpn", |c| &mut c.alpn),
    QueryField::text("fp", |c| &mut c.fp),
    QueryField::text("pbk", |c| &mut c.pbk),
    QueryField::text("sid", |c| &mut c.sid),
    QueryField::text("spx", |c| &mut c.spx),
    QueryField::text("serviceName", |c| &mut c.service_name),
    QueryField::text("mode", |c| &mut c.mode),
    QueryField::text("allowInsecure", |c| &mut c.allow_insecure),
    QueryField::text("seed", |c| &mut c.seed),
    QueryField::text("quicSecurity", |c| &mut c.quic_security),
    QueryField::text("key", |c| &mut c.key),
];

/// VLess protocol parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VLess {
    /// Link this descriptor was parsed from
    pub orig_link: String,
    /// VLess configuration
    pub config: VLessConfig,
}

impl VLess {
    fn stream_params(&self) -> StreamParams<'_> {
        let c = &self.config;
        StreamParams {
            network: c.r#type.as_deref(),
            header_type: c.header_type.as_deref(),
            host: c.host.as_deref(),
            path: c.path.as_deref(),
            service_name: c.service_name.as_deref(),
            mode: c.mode.as_deref(),
            seed: c.seed.as_deref(),
            quic_security: c.quic_security.as_deref(),
            key: c.key.as_deref(),
            security: c.security.as_deref(),
            sni: c.sni.as_deref(),
            alpn: c.alpn.as_deref(),
            fingerprint: c.fp.as_deref(),
            allow_insecure: c.allow_insecure.as_deref(),
            public_key: c.pbk.as_deref(),
            short_id: c.sid.as_deref(),
            spider_x: c.spx.as_deref(),
        }
    }
}

impl ProtocolParser for VLess {
    const NAME: &'static str = "vless";

    fn parse(link: &str) -> Result<Self> {
        let parts = LinkParts::split(link::strip_scheme(link, scheme::VLESS)?);
        let id = parts.userinfo_required()?;
        let (address, port) = parts.host_and_port()?;

        let mut config = VLessConfig {
            id,
            address,
            port,
            remark: parts.remark(),
            ..Default::default()
        };
        link::apply_query(&mut config, VLESS_FIELDS, &Query::parse(parts.query));

        if link::is_http_family(config.r#type.as_deref(), config.header_type.as_deref()) {
            config.path.get_or_insert_with(|| defaults::HTTP_PATH.to_string());
        }
        config.r#type.get_or_insert_with(|| defaults::NETWORK.to_string());
        config.security.get_or_insert_with(|| defaults::NONE.to_string());
        if matches!(config.security.as_deref(), Some("tls" | "reality")) {
            config.fp.get_or_insert_with(|| defaults::FINGERPRINT.to_string());
        }
        link::strip_service_slash(&mut config.service_name);

        Ok(VLess {
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
            .field("UUID", &c.id)
            .field("Flow", summary::or_none(c.flow.as_deref()));
        summary::stream_details(&mut out, &self.stream_params());
        out.finish()
    }

    fn summary(&self) -> GeneralConfig {
        let c = &self.config;
        GeneralConfig {
            protocol: Self::NAME.to_string(),
            address: c.address.clone(),
            port: c.port.clone(),
            id: c.id.clone(),
            host: summary::text(&c.host),
            path: summary::text(&c.path),
            network: summary::text(&c.r#type),
            tls: summary::tls_mode(c.security.as_deref()),
            sni: summary::text(&c.sni),
            alpn: summary::text(&c.alpn),
            fingerprint: summary::text(&c.fp),
            service_name: summary::text(&c.service_name),
            mode: summary::text(&c.mode),
            header_type: summary::text(&c.header_type),
            remark: summary::text(&c.remark),
            orig_link: self.orig_link.clone(),
            ..Default::default()
        }
    }

    fn build_outbound(&self, allow_insecure: bool) -> Result<Outbound, BuildError> {
        let c = &self.config;
        let port = outbound::port_number(&c.port)?;

        let mut user = json!({
            "id": c.id,
            "encryption": c.encryption.as_deref().unwrap_or(defaults::NONE),
        });
        if let Some(flow) = &c.flow {
            user["flow"] = json!(flow);
        }
        let settings = json!({
            "vnext": [{
                "address": c.address,
                "port": port,
                "users": [user],
            }]
        });

        let stream = outbound::build_stream(&self.stream_params(), allow_insecure);
        Ok(Outbound::new(Self::NAME, settings).with_stream(stream))
    }
}
