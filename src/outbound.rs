//! Engine-facing outbound configuration.
//!
//! The shape follows xray's `OutboundDetourConfig`: a protocol-specific
//! `settings` object plus `streamSettings` describing transport and security.
//! Building one never touches the network.

use crate::constants::defaults;
use crate::error::BuildError;
use crate::link::flag_enabled;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Outbound object handed to the engine.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Outbound {
    /// Outbound tag
    pub tag: String,
    /// Engine protocol name
    pub protocol: String,
    /// Protocol-specific settings
    pub settings: serde_json::Value,
    /// Transport and security settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<StreamSettings>,
}

impl Outbound {
    pub(crate) fn new(protocol: &str, settings: serde_json::Value) -> Self {
        Outbound {
            tag: defaults::OUTBOUND_TAG.to_string(),
            protocol: protocol.to_string(),
            settings,
            stream_settings: None,
        }
    }

    pub(crate) fn with_stream(mut self, stream: StreamSettings) -> Self {
        self.stream_settings = Some(stream);
        self
    }
}

/// `streamSettings` block.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    /// Transport name
    pub network: String,
    /// Security mode (`none`, `tls`, `reality`)
    pub security: String,
    /// Transport-specific block; absent for unknown networks
    #[serde(flatten)]
    pub transport: Option<TransportSettings>,
    /// Security-specific block
    #[serde(flatten)]
    pub security_settings: Option<SecuritySettings>,
}

/// Transport-specific settings, serialized under the engine's `<name>Settings` key.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum TransportSettings {
    /// Raw TCP, optionally with HTTP header obfuscation
    TcpSettings(TcpConfig),
    /// mKCP
    KcpSettings(KcpConfig),
    /// WebSocket
    WsSettings(WsConfig),
    /// HTTP/2
    HttpSettings(HttpConfig),
    /// HTTP upgrade
    HttpupgradeSettings(HttpUpgradeConfig),
    /// gRPC
    GrpcSettings(GrpcConfig),
    /// QUIC
    QuicSettings(QuicConfig),
    /// Split HTTP
    SplithttpSettings(SplitHttpConfig),
    /// XHTTP
    XhttpSettings(SplitHttpConfig),
}

/// Security-specific settings.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum SecuritySettings {
    /// Plain TLS
    TlsSettings(TlsConfig),
    /// REALITY
    RealitySettings(RealityConfig),
}

/// Raw TCP transport.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TcpConfig {
    /// Header obfuscation (`none` or `http` with a `Host` request header)
    pub header: serde_json::Value,
}

/// mKCP transport.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KcpConfig {
    /// Obfuscation seed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    /// Packet header disguise type
    pub header: serde_json::Value,
}

/// WebSocket transport.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WsConfig {
    /// Request path
    pub path: String,
    /// Extra request headers (`Host`, `User-Agent`)
    pub headers: BTreeMap<String, String>,
}

/// HTTP/2 transport.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HttpConfig {
    /// Candidate hosts; omitted when empty
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<String>,
    /// Request path
    pub path: String,
}

/// HTTPUpgrade transport.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HttpUpgradeConfig {
    /// `Host` header
    pub host: String,
    /// Request path
    pub path: String,
}

/// gRPC transport.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrpcConfig {
    /// Service name without a leading slash
    pub service_name: String,
    /// `:authority` pseudo-header
    pub authority: String,
    /// `multi` mode instead of `gun`
    pub multi_mode: bool,
    /// Seconds without traffic before a health check
    pub idle_timeout: u32,
    /// Seconds to wait for a health check reply
    pub health_check_timeout: u32,
    /// Initial HTTP/2 window size
    pub initial_windows_size: u32,
}

/// QUIC transport.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuicConfig {
    /// Packet encryption method
    pub security: String,
    /// Encryption key
    pub key: String,
    /// Packet header disguise type
    pub header: serde_json::Value,
}

/// SplitHTTP / XHTTP transport.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SplitHttpConfig {
    /// `Host` header
    pub host: String,
    /// Request path
    pub path: String,
    /// Upload mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// TLS client settings.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// SNI sent in the ClientHello
    pub server_name: String,
    /// ALPN protocols in preference order
    pub alpn: Vec<String>,
    /// uTLS fingerprint
    pub fingerprint: String,
    /// Skip certificate verification
    pub allow_insecure: bool,
}

/// REALITY client settings.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealityConfig {
    /// SNI of the camouflage target
    pub server_name: String,
    /// uTLS fingerprint
    pub fingerprint: String,
    /// Server public key
    pub public_key: String,
    /// Short id
    pub short_id: String,
    /// Crawler path; omitted when empty
    #[serde(skip_serializing_if = "String::is_empty")]
    pub spider_x: String,
}

/// Borrowed view of the stream-related descriptor fields.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StreamParams<'a> {
    pub network: Option<&'a str>,
    pub header_type: Option<&'a str>,
    pub host: Option<&'a str>,
    pub path: Option<&'a str>,
    pub service_name: Option<&'a str>,
    pub mode: Option<&'a str>,
    pub seed: Option<&'a str>,
    pub quic_security: Option<&'a str>,
    pub key: Option<&'a str>,
    pub security: Option<&'a str>,
    pub sni: Option<&'a str>,
    pub alpn: Option<&'a str>,
    pub fingerprint: Option<&'a str>,
    pub allow_insecure: Option<&'a str>,
    pub public_key: Option<&'a str>,
    pub short_id: Option<&'a str>,
    pub spider_x: Option<&'a str>,
}

fn or_empty(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn comma_list(value: Option<&str>) -> Vec<String> {
    non_empty(value)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Builds `streamSettings` from the descriptor's stream fields.
pub(crate) fn build_stream(p: &StreamParams<'_>, allow_insecure: bool) -> StreamSettings {
    let network = non_empty(p.network).unwrap_or(defaults::NETWORK);
    let security = non_empty(p.security).unwrap_or(defaults::NONE);

    StreamSettings {
        network: network.to_string(),
        security: security.to_string(),
        transport: build_transport(network, p),
        security_settings: build_security(security, p, allow_insecure),
    }
}

fn browser_headers(host: Option<&str>) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Host".to_string(), or_empty(host));
    headers.insert("User-Agent".to_string(), defaults::USER_AGENT.to_string());
    headers
}

fn build_transport(network: &str, p: &StreamParams<'_>) -> Option<TransportSettings> {
    let transport = match network {
        "tcp" => {
            let header = match non_empty(p.header_type) {
                None | Some("none") => json!({ "type": "none" }),
                Some(_) => json!({
                    "type": "http",
                    "request": {
                        "path": comma_list(p.path.or(Some(defaults::HTTP_PATH))),
                        "headers": {
                            "Host": comma_list(p.host),
                            "User-Agent": [defaults::USER_AGENT],
                        }
                    }
                }),
            };
            TransportSettings::TcpSettings(TcpConfig { header })
        }
        "kcp" => TransportSettings::KcpSettings(KcpConfig {
            seed: non_empty(p.seed).map(str::to_string),
            header: json!({ "type": non_empty(p.header_type).unwrap_or(defaults::NONE) }),
        }),
        "ws" => TransportSettings::WsSettings(WsConfig {
            path: or_empty(p.path),
            headers: browser_headers(p.host),
        }),
        "http" | "h2" => TransportSettings::HttpSettings(HttpConfig {
            host: comma_list(p.host),
            path: or_empty(p.path),
        }),
        "httpupgrade" => TransportSettings::HttpupgradeSettings(HttpUpgradeConfig {
            host: or_empty(p.host),
            path: or_empty(p.path),
        }),
        "grpc" => {
            let service_name = or_empty(p.service_name);
            TransportSettings::GrpcSettings(GrpcConfig {
                service_name: service_name
                    .strip_prefix('/')
                    .map(str::to_string)
                    .unwrap_or(service_name),
                authority: or_empty(p.host),
                multi_mode: p.mode != Some("gun"),
                idle_timeout: 60,
                health_check_timeout: 20,
                initial_windows_size: 65536,
            })
        }
        "quic" => TransportSettings::QuicSettings(QuicConfig {
            security: non_empty(p.quic_security)
                .unwrap_or(defaults::NONE)
                .to_string(),
            key: or_empty(p.key),
            header: json!({ "type": non_empty(p.header_type).unwrap_or(defaults::NONE) }),
        }),
        "splithttp" => TransportSettings::SplithttpSettings(SplitHttpConfig {
            host: or_empty(p.host),
            path: or_empty(p.path),
            mode: non_empty(p.mode).map(str::to_string),
        }),
        "xhttp" => TransportSettings::XhttpSettings(SplitHttpConfig {
            host: or_empty(p.host),
            path: or_empty(p.path),
            mode: Some(non_empty(p.mode).unwrap_or("auto").to_string()),
        }),
        _ => return None,
    };
    Some(transport)
}

fn build_security(
    security: &str,
    p: &StreamParams<'_>,
    allow_insecure: bool,
) -> Option<SecuritySettings> {
    let server_name = or_empty(non_empty(p.sni).or(p.host));
    let fingerprint = non_empty(p.fingerprint)
        .filter(|fp| *fp != defaults::NONE)
        .unwrap_or(defaults::FINGERPRINT)
        .to_string();

    match security {
        "tls" => {
            let mut alpn = comma_list(p.alpn.filter(|a| *a != defaults::NONE));
            if alpn.is_empty() {
                alpn.push(defaults::ALPN.to_string());
            }
            Some(SecuritySettings::TlsSettings(TlsConfig {
                server_name,
                alpn,
                fingerprint,
                allow_insecure: allow_insecure || flag_enabled(p.allow_insecure),
            }))
        }
        "reality" => Some(SecuritySettings::RealitySettings(RealityConfig {
            server_name,
            fingerprint,
            public_key: or_empty(p.public_key),
            short_id: or_empty(p.short_id),
            spider_x: or_empty(p.spider_x),
        })),
        _ => None,
    }
}

/// Validates a port for the engine: numeric and non-zero.
pub(crate) fn port_number(port: &str) -> Result<u16, BuildError> {
    match port.trim().parse::<u16>() {
        Ok(n) if n != 0 => Ok(n),
        _ => Err(BuildError::invalid("port", port)),
    }
}
