use crate::error::RelayError;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Refuse targets that point into private or reserved address space.
///
/// Only IP literals are checked. Hostnames are accepted without a DNS
/// lookup, so a name resolving to a private address is not caught here.
///
/// # Errors
/// [`RelayError::ForbiddenTarget`] for:
/// - IPv4 addresses in private/reserved ranges
/// - IPv6 loopback, link-local or unique-local addresses
/// - `localhost`
pub fn check_target(url: &Url) -> Result<(), RelayError> {
    match url.host() {
        Some(Host::Ipv4(ip)) if is_blocked_ipv4(ip) => Err(RelayError::ForbiddenTarget(
            format!("Private or reserved IPv4 address: {ip}"),
        )),
        Some(Host::Ipv6(ip)) if is_blocked_ipv6(ip) => Err(RelayError::ForbiddenTarget(
            format!("Private or reserved IPv6 address: {ip}"),
        )),
        Some(Host::Domain(domain)) if domain.eq_ignore_ascii_case("localhost") => Err(
            RelayError::ForbiddenTarget("localhost".to_string()),
        ),
        Some(_) => Ok(()),
        None => Err(RelayError::BadRequest(format!("No host in URL: {url}"))),
    }
}

/// Blocked ranges:
/// - `0.0.0.0/8`      "this" network
/// - `10.0.0.0/8`     RFC 1918
/// - `127.0.0.0/8`    loopback
/// - `169.254.0.0/16` link-local, cloud metadata
/// - `172.16.0.0/12`  RFC 1918
/// - `192.168.0.0/16` RFC 1918
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();

    a == 0
        || a == 10
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

/// Loopback, `fe80::/10` link-local and `fc00::/7` unique-local. IPv4-mapped
/// addresses are checked as IPv4.
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    let s = ip.segments();

    ip.is_loopback()
        || ip.is_unspecified()
        || (s[0] & 0xffc0) == 0xfe80
        || (s[0] & 0xfe00) == 0xfc00
}
