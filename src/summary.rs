//! Protocol-agnostic projection of a descriptor.

use crate::constants::defaults;
use crate::outbound::StreamParams;
use serde::Serialize;
use std::fmt::{self, Write as _};

/// Canonical summary record shared by every protocol.
///
/// Produced by [`ProtocolParser::summary`](crate::ProtocolParser::summary);
/// empty strings mean the link did not carry the field.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct GeneralConfig {
    /// Protocol name (`vmess`, `vless`, ...)
    pub protocol: String,
    /// Server address (IPv6 bracketed)
    pub address: String,
    /// Server port
    pub port: String,
    /// User id, password or secret key
    pub id: String,
    /// VMess alter id
    #[serde(skip_serializing_if = "String::is_empty")]
    pub aid: String,
    /// Host header / authority
    pub host: String,
    /// Request path or KCP seed
    pub path: String,
    /// Transport (tcp, ws, grpc, ...)
    pub network: String,
    /// Security mode; `none` when disabled
    pub tls: String,
    /// Server name indication
    pub sni: String,
    /// ALPN list, comma separated
    pub alpn: String,
    /// uTLS fingerprint
    pub fingerprint: String,
    /// gRPC service name
    pub service_name: String,
    /// gRPC / xhttp mode
    pub mode: String,
    /// Header type (`none`, `http`, ...)
    #[serde(rename = "type")]
    pub header_type: String,
    /// Remark taken from the link fragment
    pub remark: String,
    /// Link the descriptor was parsed from
    pub orig_link: String,
}

/// Security mode as reported in summaries and probe results.
pub(crate) fn tls_mode(security: Option<&str>) -> String {
    match security {
        None | Some("") => "none".to_string(),
        Some(mode) => mode.to_string(),
    }
}

pub(crate) fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Line-oriented `Label: value` text used by `details()`.
#[derive(Debug, Default)]
pub(crate) struct Details(String);

impl Details {
    pub(crate) fn field(&mut self, label: &str, value: impl fmt::Display) -> &mut Self {
        let _ = writeln!(self.0, "{}: {}", label, value);
        self
    }

    pub(crate) fn finish(self) -> String {
        self.0
    }
}

/// Display value for an optional field; `none` when empty.
pub(crate) fn or_none(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or(defaults::NONE)
}

/// Transport and security lines shared by the stream-based protocols.
pub(crate) fn stream_details(out: &mut Details, p: &StreamParams<'_>) {
    match p.network.unwrap_or_default() {
        "" => {}
        "http" | "httpupgrade" | "ws" | "h2" | "splithttp" | "xhttp" => {
            out.field("Host", or_none(p.host)).field("Path", or_none(p.path));
        }
        "kcp" => {
            out.field("KCP Seed", or_none(p.seed));
        }
        "grpc" => {
            out.field("ServiceName", or_none(p.service_name))
                .field("Authority", or_none(p.host));
        }
        _ => {}
    }

    match p.security.unwrap_or_default() {
        "reality" => {
            out.field("TLS", "reality")
                .field("Public key", or_none(p.public_key))
                .field("SNI", or_none(p.sni))
                .field("ShortID", or_none(p.short_id))
                .field("SpiderX", or_none(p.spider_x))
                .field("Fingerprint", or_none(p.fingerprint));
        }
        "tls" => {
            // SNI falls back to the host for display only
            let sni = p.sni.filter(|s| !s.is_empty()).or(p.host);
            out.field("TLS", "tls")
                .field("SNI", or_none(sni))
                .field("ALPN", or_none(p.alpn))
                .field("Fingerprint", or_none(p.fingerprint));
            if let Some(insecure) = p.allow_insecure.filter(|v| !v.is_empty()) {
                out.field("Insecure", insecure);
            }
        }
        _ => {
            out.field("TLS", defaults::NONE);
        }
    }
}
