//! Optional refusal of proxy targets on local or private networks.
//!
//! The check resolves the host itself, so a hostname that later resolves
//! differently for the HTTP client (DNS rebinding) is not covered.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::warn;
use url::Host;

use crate::error::{GatewayError, Service, UpstreamFailure};
use crate::validator::ValidUrl;

pub async fn ensure_public(target: &ValidUrl) -> Result<(), GatewayError> {
    let url = target.as_url();
    let port = url.port_or_known_default().unwrap_or(80);

    let addresses: Vec<IpAddr> = match url.host() {
        Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
        Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
        Some(Host::Domain(domain)) => tokio::net::lookup_host((domain, port))
            .await
            .map_err(|e| {
                warn!(host = %domain, error = %e, "failed to resolve proxy target");
                GatewayError::upstream(Service::Proxy, UpstreamFailure::Connect)
            })?
            .map(|addr| addr.ip())
            .collect(),
        None => return Err(GatewayError::InvalidUrl("URL has no host".to_string())),
    };

    if let Some(ip) = addresses.iter().find(|ip| is_non_public(ip)) {
        warn!(host = %target.host(), %ip, "refusing proxy target on a non-public network");
        return Err(GatewayError::DestinationBlocked(target.host().to_string()));
    }
    Ok(())
}

pub fn is_non_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_non_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_non_public_v4(&v4),
            None => is_non_public_v6(v6),
        },
    }
}

fn is_non_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // carrier-grade NAT, 100.64.0.0/10
        || (a == 100 && (64..=127).contains(&b))
}

fn is_non_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // unique local, fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local, fe80::/10
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::validate;

    #[test]
    fn classifies_addresses() {
        for raw in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
            "::1",
            "::",
            "fd00::1",
            "fe80::1",
            "::ffff:127.0.0.1",
        ] {
            let ip: IpAddr = raw.parse().unwrap();
            assert!(is_non_public(&ip), "{raw} treated as public");
        }

        for raw in ["93.184.216.34", "8.8.8.8", "100.128.0.1", "2606:4700::1111"] {
            let ip: IpAddr = raw.parse().unwrap();
            assert!(!is_non_public(&ip), "{raw} treated as private");
        }
    }

    #[tokio::test]
    async fn blocks_literal_private_targets() {
        let target = validate("http://169.254.169.254/latest/meta-data").unwrap();
        let err = ensure_public(&target).await.unwrap_err();
        assert!(matches!(err, GatewayError::DestinationBlocked(_)));
    }

    #[tokio::test]
    async fn allows_literal_public_targets() {
        let target = validate("https://93.184.216.34/").unwrap();
        assert!(ensure_public(&target).await.is_ok());
    }
}
