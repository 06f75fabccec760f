//! Shared constants for protocol schemes, defaults and error messages.

use std::time::Duration;

/// Protocol URI scheme prefixes (lowercase, with `://`).
pub mod scheme {
    /// VMess: `vmess://`
    pub const VMESS: &str = "vmess://";
    /// VLESS: `vless://`
    pub const VLESS: &str = "vless://";
    /// Shadowsocks: `ss://`
    pub const SHADOWSOCKS: &str = "ss://";
    /// Trojan: `trojan://`
    pub const TROJAN: &str = "trojan://";
    /// WireGuard: `wireguard://`
    pub const WIREGUARD: &str = "wireguard://";
}

/// Values filled in when a link leaves a field empty.
pub mod defaults {
    /// Byte-stream transport.
    pub const NETWORK: &str = "tcp";
    /// uTLS fingerprint used whenever TLS is on and the link names none.
    pub const FINGERPRINT: &str = "chrome";
    /// ALPN applied at build time when TLS is on.
    pub const ALPN: &str = "http/1.1";
    /// Path for HTTP-family transports.
    pub const HTTP_PATH: &str = "/";
    /// Placeholder shown by `details()` for empty fields.
    pub const NONE: &str = "none";
    /// Tag given to every built outbound.
    pub const OUTBOUND_TAG: &str = "proxy";
    /// User-Agent injected into WebSocket and HTTP-obfuscated TCP headers.
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.131 Safari/537.36";
    /// WireGuard MTU when the link gives none.
    pub const WIREGUARD_MTU: i32 = 1420;
}

/// Probe defaults, mirrored by the CLI flags.
pub mod probe {
    use super::Duration;

    /// Upper bound for every request issued through an engine instance.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    /// Upper bound for the engine to bring an instance up.
    pub const START_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default worker count.
    pub const THREADS: usize = 5;
    /// Default delay-measurement target.
    pub const TARGET_URL: &str = "https://google.com/";
    /// Default speed-test payload in KB.
    pub const SPEEDTEST_AMOUNT_KB: u32 = 10_000;
    /// Largest accepted speed-test payload in KB (1 GB per direction).
    pub const MAX_SPEEDTEST_AMOUNT_KB: u32 = 1_000_000;
    /// Speed-test download endpoint; the payload size is appended in bytes.
    pub const SPEEDTEST_DOWN_URL: &str = "https://speed.cloudflare.com/__down?bytes=";
    /// Speed-test upload endpoint.
    pub const SPEEDTEST_UP_URL: &str = "https://speed.cloudflare.com/__up";
}

/// Common error message fragments for link parsing.
pub mod error_msg {
    /// Missing `@` in userinfo@host part.
    pub const MISSING_AT: &str = "missing '@' in main part";
    /// Missing `:` in host:port part.
    pub const MISSING_COLON_HOST_PORT: &str = "missing ':' in host:port";
    /// Invalid port value.
    pub const INVALID_PORT: &str = "invalid port";
    /// Link must start with scheme (use with format!).
    pub const MUST_START_WITH: &str = "link must start with";
}
