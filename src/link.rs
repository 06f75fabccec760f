//! Link decoding shared by every variant.
//!
//! A URI-shaped link is split the same way for all schemes:
//! `scheme://[userinfo@]host:port[/][?query][#fragment]`.
//!
//! Query parameters are applied through a per-variant [`QueryField`] table: a
//! static list of `(query key, field accessor, value type)` entries. Keys not in
//! the table are ignored and keys absent from the link leave the field empty.

use crate::constants::error_msg;
use crate::error::{ParseError, Result};
use base64::Engine;
use std::collections::HashMap;
use std::net::Ipv6Addr;

/// Accessor into a descriptor field, tagged with the type the query value is
/// coerced to.
pub(crate) enum Slot<T> {
    /// Text field; an empty value leaves it unset.
    Text(fn(&mut T) -> &mut Option<String>),
    /// Integer field; the value is read as a leading signed decimal, zero otherwise.
    Int(fn(&mut T) -> &mut i32),
}

/// One entry of a declarative query-key table.
pub(crate) struct QueryField<T: 'static> {
    pub key: &'static str,
    pub slot: Slot<T>,
}

impl<T: 'static> QueryField<T> {
    /// Text entry for `key`.
    pub(crate) const fn text(key: &'static str, slot: fn(&mut T) -> &mut Option<String>) -> Self {
        QueryField {
            key,
            slot: Slot::Text(slot),
        }
    }

    /// Integer entry for `key`.
    pub(crate) const fn int(key: &'static str, slot: fn(&mut T) -> &mut i32) -> Self {
        QueryField {
            key,
            slot: Slot::Int(slot),
        }
    }
}

/// Sets every field of `target` whose key appears in `params`.
pub(crate) fn apply_query<T>(target: &mut T, table: &[QueryField<T>], params: &Query) {
    for field in table {
        let Some(value) = params.get(field.key) else {
            continue;
        };
        match field.slot {
            Slot::Text(slot) => {
                if !value.is_empty() {
                    *slot(target) = Some(value.to_string());
                }
            }
            Slot::Int(slot) => *slot(target) = leading_int(value),
        }
    }
}

/// Reads the leading signed decimal of `value`; anything unreadable is zero.
pub(crate) fn leading_int(value: &str) -> i32 {
    let value = value.trim_start();
    let (sign, digits) = match value.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, value.strip_prefix('+').unwrap_or(value)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end]
        .parse::<i64>()
        .ok()
        .and_then(|n| i32::try_from(sign * n).ok())
        .unwrap_or(0)
}

/// Decoded query string; the first value of a repeated key wins.
#[derive(Debug, Default)]
pub(crate) struct Query(HashMap<String, String>);

impl Query {
    pub(crate) fn parse(raw: Option<&str>) -> Self {
        let mut params = HashMap::new();
        if let Some(raw) = raw {
            for (key, value) in url::form_urlencoded::parse(raw.as_bytes()).into_owned() {
                params.entry(key).or_insert(value);
            }
        }
        Query(params)
    }

    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Raw pieces of `scheme://[userinfo@]host:port[?query][#fragment]`.
#[derive(Debug)]
pub(crate) struct LinkParts<'a> {
    pub userinfo: Option<&'a str>,
    pub host_port: &'a str,
    pub query: Option<&'a str>,
    pub fragment: Option<&'a str>,
}

impl<'a> LinkParts<'a> {
    /// Splits a link body (the part after `scheme://`).
    pub(crate) fn split(body: &'a str) -> Self {
        let (before_hash, fragment) = match body.split_once('#') {
            Some((main, fragment)) => (main, Some(fragment)),
            None => (body, None),
        };
        let (main, query) = match before_hash.split_once('?') {
            Some((main, query)) => (main, Some(query)),
            None => (before_hash, None),
        };
        let (userinfo, host_port) = match main.rfind('@') {
            Some(pos) => (Some(&main[..pos]), &main[pos + 1..]),
            None => (None, main),
        };
        LinkParts {
            userinfo,
            host_port: host_port.trim_end_matches('/'),
            query,
            fragment,
        }
    }

    /// Percent-decoded userinfo; a decoding failure keeps the raw text.
    pub(crate) fn userinfo_required(&self) -> Result<String> {
        let raw = self
            .userinfo
            .ok_or_else(|| ParseError::MalformedUri(error_msg::MISSING_AT.to_string()))?;
        Ok(percent_decode_lossy(raw))
    }

    /// Host (IPv6 bracketed) and port text.
    pub(crate) fn host_and_port(&self) -> Result<(String, String)> {
        split_host_port(self.host_port)
    }

    /// Fragment decoded as a remark.
    pub(crate) fn remark(&self) -> Option<String> {
        self.fragment
            .filter(|f| !f.is_empty())
            .map(percent_decode_lossy)
    }
}

/// Splits `host:port`, accepting `[v6]:port` and bare `v6:port`; the port must
/// be a valid u16. A bare host that still holds a `:` must be an IPv6 address.
pub(crate) fn split_host_port(host_port: &str) -> Result<(String, String)> {
    let (host, port) = if let Some(rest) = host_port.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(|| {
            ParseError::MalformedUri(format!("unterminated IPv6 literal: {}", host_port))
        })?;
        let port = after.strip_prefix(':').ok_or_else(|| {
            ParseError::MalformedUri(error_msg::MISSING_COLON_HOST_PORT.to_string())
        })?;
        (host, port)
    } else {
        host_port.rsplit_once(':').ok_or_else(|| {
            ParseError::MalformedUri(error_msg::MISSING_COLON_HOST_PORT.to_string())
        })?
    };

    if host.is_empty() {
        return Err(ParseError::MalformedUri(format!("empty host in {}", host_port)));
    }
    if host.contains(':') && host.parse::<Ipv6Addr>().is_err() {
        return Err(ParseError::MalformedUri(format!("too many colons in {}", host_port)));
    }
    port.parse::<u16>().map_err(|e| {
        ParseError::MalformedUri(format!("{} {:?}: {}", error_msg::INVALID_PORT, port, e))
    })?;

    Ok((bracket_ipv6(host), port.to_string()))
}

/// Wraps a bare IPv6 literal in brackets so it stays valid in `host:port`.
pub(crate) fn bracket_ipv6(address: &str) -> String {
    if address.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]", address)
    } else {
        address.to_string()
    }
}

pub(crate) fn percent_decode_lossy(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Decodes base64 in any of the common alphabets, with or without padding.
/// Whitespace (pasted links often wrap) is removed first.
pub(crate) fn decode_base64(input: &str) -> Result<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};

    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let unpadded = compact.trim_end_matches('=');
    STANDARD_NO_PAD
        .decode(unpadded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(unpadded))
        .or_else(|_| STANDARD.decode(&compact))
        .or_else(|_| URL_SAFE.decode(&compact))
        .map_err(ParseError::from)
}

/// Decodes base64 text into a UTF-8 string.
pub(crate) fn decode_base64_str(input: &str) -> Result<String> {
    Ok(String::from_utf8(decode_base64(input)?)?)
}

/// Returns the link body after a case-insensitive `prefix`.
pub(crate) fn strip_scheme<'a>(link: &'a str, prefix: &str) -> Result<&'a str> {
    match link.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => Ok(&link[prefix.len()..]),
        _ => Err(ParseError::UnrecognizedScheme(format!(
            "{} {}",
            error_msg::MUST_START_WITH,
            prefix
        ))),
    }
}

/// True for transports that speak HTTP and therefore need a request path.
pub(crate) fn is_http_family(network: Option<&str>, header_type: Option<&str>) -> bool {
    header_type == Some("http")
        || matches!(network, Some("http" | "ws" | "h2" | "xhttp" | "splithttp"))
}

/// Drops one leading `/` from a gRPC service name.
pub(crate) fn strip_service_slash(service_name: &mut Option<String>) {
    if let Some(name) = service_name {
        if let Some(stripped) = name.strip_prefix('/') {
            *name = stripped.to_string();
        }
    }
}

/// True when a per-link insecure flag is set (`1` or `true`).
pub(crate) fn flag_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "True" | "TRUE"))
}
