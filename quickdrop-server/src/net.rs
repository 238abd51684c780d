use std::net::IpAddr;

use tracing::{debug, warn};

/// First non-loopback IPv4 address of this machine, or `localhost`.
pub fn local_ip() -> String {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            let candidates = interfaces
                .into_iter()
                .filter(|iface| !iface.is_loopback())
                .map(|iface| iface.ip());
            first_ipv4(candidates).unwrap_or_else(|| "localhost".to_string())
        }
        Err(e) => {
            warn!("Failed to list network interfaces: {e}");
            "localhost".to_string()
        }
    }
}

fn first_ipv4(addrs: impl IntoIterator<Item = IpAddr>) -> Option<String> {
    addrs
        .into_iter()
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .map(|ip| ip.to_string())
}

/// Open `url` in the default browser. Failure is logged, never fatal.
pub fn open_browser(url: &str) {
    match open::that(url) {
        Ok(()) => debug!("Opened browser at {url}"),
        Err(e) => warn!("Failed to open browser: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn picks_first_ipv4() {
        let addrs = [
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
        ];
        assert_eq!(first_ipv4(addrs), Some("192.168.1.20".to_string()));
    }

    #[test]
    fn skips_loopback_and_ipv6_only() {
        let addrs = [
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ];
        assert_eq!(first_ipv4(addrs), None);
    }

    #[test]
    fn local_ip_is_never_empty() {
        assert!(!local_ip().is_empty());
    }
}
