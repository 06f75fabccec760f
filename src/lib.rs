//! # VPN Link Probe
//!
//! Parse VPN proxy protocol links into typed descriptors, build engine outbound
//! configurations from them and probe each link's real delay and throughput
//! through an external proxy engine.
//! Supports VMess, VLess, Trojan, Shadowsocks and WireGuard.
//!
//! ## Features
//!
//! - Parse protocol links into structured Rust types with protocol-specific defaults
//! - Project any descriptor onto one protocol-agnostic summary record
//! - Build xray-style outbound objects (`settings` + `streamSettings`)
//! - Probe many links concurrently with a bounded worker count
//! - Order results and write them as `txt` or `csv`
//!
//! ## Supported Protocols
//!
//! - **[VMess]** (`vmess://`): Base64 JSON, with the legacy `cipher:uuid@host:port?query` form as fallback
//! - **[VLess]** (`vless://`): Full parameter support including Reality, XTLS
//! - **[Trojan]** (`trojan://`): TLS, Reality, query and fragment (remark)
//! - **[Shadowsocks]** (`ss://`): SIP002 and legacy Base64 forms, plugin and tag
//! - **[WireGuard]** (`wireguard://`): Base64 JSON, with the `secret-key@host:port?query` form as fallback
//!
//! ## Link format and parsing rules (unified)
//!
//! - **Scheme prefix**: Case-insensitive (e.g. `VMESS://` is valid).
//! - **Port**: must be a valid u16 to parse; zero or non-numeric JSON ports fail at build time.
//! - **Query string**: Parsed as `application/x-www-form-urlencoded`; parameter names are case-sensitive,
//!   the first value of a repeated key wins, unknown keys are ignored.
//! - **Fragment (`#`)**: Percent-decoded as remark; kept raw if it does not decode.
//! - **IPv6**: Literal addresses are stored as `[addr]`.
//! - **Errors**: wrong prefix → `UnrecognizedScheme`; any structural failure → `MalformedUri`.
//!
//! ## Example
//!
//! ```rust
//! use vpn_link_probe::Protocol;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let protocol = Protocol::parse("trojan://secret@example.com:443?type=ws#node")?;
//!
//! let summary = protocol.summary();
//! assert_eq!(summary.tls, "tls");
//!
//! let outbound = protocol.build_outbound(false)?;
//! println!("{}", serde_json::to_string_pretty(&outbound)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under the MIT license.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod constants;
mod engine;
mod error;
mod link;
mod outbound;
mod probe;
mod report;
mod shadowsocks;
mod speedtest;
mod summary;
mod trojan;
mod vless;
mod vmess;
mod wireguard;
mod xray;

#[cfg(test)]
mod links_comprehensive;

pub use constants::probe as probe_defaults;
pub use engine::{Engine, Instance, Payload, ProbeRequest, ProbeResponse};
pub use error::{BuildError, OutputError, ParseError, ProbeError, Result};
pub use outbound::{Outbound, SecuritySettings, StreamSettings, TransportSettings};
pub use probe::{Outcome, ProbeConfig, ProbeConfigBuilder, Prober, SkipReason, read_links};
pub use report::{
    ProbeResult, ReportFormat, is_ahead, resolve_output_path, sort_results, write_report,
};
pub use shadowsocks::{Shadowsocks, ShadowsocksConfig};
pub use summary::GeneralConfig;
pub use trojan::{Trojan, TrojanConfig};
pub use vless::{VLess, VLessConfig};
pub use vmess::{VMess, VMessConfig};
pub use wireguard::{WireGuard, WireGuardConfig};
pub use xray::XrayEngine;

/// Capability set shared by every protocol descriptor
pub trait ProtocolParser: Sized {
    /// Protocol name as used by the engine (`vmess`, `vless`, ...)
    const NAME: &'static str;

    /// Parse a protocol link string into a descriptor, applying protocol defaults
    ///
    /// # Errors
    ///
    /// Returns `ParseError::UnrecognizedScheme` if the prefix does not match and
    /// `ParseError::MalformedUri` if the link cannot be decoded.
    ///
    /// # Example
    ///
    /// ```rust
    /// use vpn_link_probe::{VLess, ProtocolParser};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let vless = VLess::parse("vless://uuid@example.com:443?security=tls")?;
    /// assert_eq!(vless.config.fp.as_deref(), Some("chrome"));
    /// # Ok(())
    /// # }
    /// ```
    fn parse(link: &str) -> Result<Self>;

    /// The link this descriptor was parsed from
    fn orig_link(&self) -> &str;

    /// Human-readable `Label: value` lines
    fn details(&self) -> String;

    /// Protocol-agnostic summary record
    fn summary(&self) -> GeneralConfig;

    /// Build the engine outbound; `allow_insecure` is OR-ed with the link's own flag
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidField` for values the engine cannot accept,
    /// such as a non-numeric or zero port.
    fn build_outbound(&self, allow_insecure: bool) -> Result<Outbound, BuildError>;
}

/// Enum representing different protocol types
///
/// Use `Protocol::parse()` to detect the scheme and parse any supported link.
///
/// # Example
///
/// ```rust
/// use vpn_link_probe::Protocol;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let protocol = Protocol::parse("vless://uuid@[2001:db8::1]:443")?;
///
/// match &protocol {
///     Protocol::VMess(v) => println!("VMess: {}", v.config.add),
///     Protocol::VLess(v) => println!("VLess: {}", v.config.address),
///     Protocol::Trojan(t) => println!("Trojan: {}", t.config.address),
///     Protocol::Shadowsocks(s) => println!("Shadowsocks: {}", s.config.address),
///     Protocol::WireGuard(w) => println!("WireGuard: {}", w.endpoint()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// VMess protocol
    VMess(VMess),
    /// VLess protocol
    VLess(VLess),
    /// Trojan protocol
    Trojan(Trojan),
    /// Shadowsocks protocol
    Shadowsocks(Shadowsocks),
    /// WireGuard protocol
    WireGuard(WireGuard),
}

type Constructor = fn(&str) -> Result<Protocol>;

/// Scheme prefix → variant constructor.
static REGISTRY: &[(&str, Constructor)] = &[
    (constants::scheme::VMESS, |link| VMess::parse(link).map(Protocol::VMess)),
    (constants::scheme::VLESS, |link| VLess::parse(link).map(Protocol::VLess)),
    (constants::scheme::TROJAN, |link| Trojan::parse(link).map(Protocol::Trojan)),
    (constants::scheme::SHADOWSOCKS, |link| {
        Shadowsocks::parse(link).map(Protocol::Shadowsocks)
    }),
    (constants::scheme::WIREGUARD, |link| {
        WireGuard::parse(link).map(Protocol::WireGuard)
    }),
];

impl Protocol {
    /// Parse any protocol link and return the appropriate protocol variant
    ///
    /// The scheme prefix is matched case-insensitively against the registry;
    /// surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::UnrecognizedScheme` when no variant claims the
    /// prefix, or the variant's own `ParseError` otherwise.
    pub fn parse(link: &str) -> Result<Self> {
        let link = link.trim();
        for (prefix, construct) in REGISTRY {
            let matches = link
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
            if matches {
                return construct(link);
            }
        }
        let scheme_name = link.split("://").next().unwrap_or("unknown");
        Err(ParseError::UnrecognizedScheme(format!(
            "unsupported protocol: {}",
            scheme_name
        )))
    }

    /// Protocol name
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::VMess(_) => VMess::NAME,
            Protocol::VLess(_) => VLess::NAME,
            Protocol::Trojan(_) => Trojan::NAME,
            Protocol::Shadowsocks(_) => Shadowsocks::NAME,
            Protocol::WireGuard(_) => WireGuard::NAME,
        }
    }

    /// The link this descriptor was parsed from
    pub fn orig_link(&self) -> &str {
        match self {
            Protocol::VMess(v) => v.orig_link(),
            Protocol::VLess(v) => v.orig_link(),
            Protocol::Trojan(t) => t.orig_link(),
            Protocol::Shadowsocks(s) => s.orig_link(),
            Protocol::WireGuard(w) => w.orig_link(),
        }
    }

    /// Human-readable details
    pub fn details(&self) -> String {
        match self {
            Protocol::VMess(v) => v.details(),
            Protocol::VLess(v) => v.details(),
            Protocol::Trojan(t) => t.details(),
            Protocol::Shadowsocks(s) => s.details(),
            Protocol::WireGuard(w) => w.details(),
        }
    }

    /// Protocol-agnostic summary record
    pub fn summary(&self) -> GeneralConfig {
        match self {
            Protocol::VMess(v) => v.summary(),
            Protocol::VLess(v) => v.summary(),
            Protocol::Trojan(t) => t.summary(),
            Protocol::Shadowsocks(s) => s.summary(),
            Protocol::WireGuard(w) => w.summary(),
        }
    }

    /// Build the engine outbound
    ///
    /// # Errors
    ///
    /// Returns `BuildError` if a field cannot be expressed in engine configuration.
    pub fn build_outbound(&self, allow_insecure: bool) -> Result<Outbound, BuildError> {
        match self {
            Protocol::VMess(v) => v.build_outbound(allow_insecure),
            Protocol::VLess(v) => v.build_outbound(allow_insecure),
            Protocol::Trojan(t) => t.build_outbound(allow_insecure),
            Protocol::Shadowsocks(s) => s.build_outbound(allow_insecure),
            Protocol::WireGuard(w) => w.build_outbound(allow_insecure),
        }
    }
}
