//! How this machine identifies itself to the status service.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::Path;

use lazyploy_core::AgentConfig;

const HOSTNAME_VARS: &[&str] = &["HOSTNAME", "COMPUTERNAME", "HOST"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    /// `<ip>:<game port>`; also the key of the server record.
    pub address: String,
}

/// Resolve hostname and address, honouring config overrides. May block on
/// DNS for the catalog host.
pub fn discover(config: &AgentConfig) -> HostIdentity {
    let hostname = config.hostname.clone().unwrap_or_else(|| {
        hostname_from(|key| std::env::var(key).ok(), Path::new("/etc/hostname"))
    });
    let address = config.address.clone().unwrap_or_else(|| {
        let ip = local_ip_towards(&config.catalog_url)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        format!("{ip}:{}", config.port)
    });
    HostIdentity { hostname, address }
}

fn hostname_from(env: impl Fn(&str) -> Option<String>, etc_hostname: &Path) -> String {
    HOSTNAME_VARS
        .iter()
        .filter_map(|key| env(key))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .or_else(|| {
            std::fs::read_to_string(etc_hostname)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| "unknown".into())
}

/// Local address the OS would route catalog traffic from. Connecting a UDP
/// socket sends nothing.
fn local_ip_towards(catalog_url: &str) -> Option<IpAddr> {
    let target = host_port(catalog_url)?;
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(target.as_str()).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// `http://host[:port]/path` → `host:port`.
fn host_port(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let authority = rest.split('/').next()?;
    if authority.is_empty() {
        return None;
    }
    let has_port = authority
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    if has_port {
        return Some(authority.to_string());
    }
    let port = if scheme.eq_ignore_ascii_case("https") { 443 } else { 80 };
    Some(format!("{authority}:{port}"))
}
