//! Client identity for rate limiting.
//!
//! Forwarding headers are only believed when the direct peer is a trusted
//! proxy; anyone else could put whatever they like in `X-Forwarded-For`.

use std::collections::HashSet;
use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderName};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone)]
pub struct ClientIdentityResolver {
    trusted_proxies: HashSet<IpAddr>,
    proxy_headers: Vec<HeaderName>,
}

impl ClientIdentityResolver {
    pub fn new(config: &RateLimitConfig) -> Self {
        let proxy_headers = config
            .proxy_headers
            .iter()
            .filter_map(|name| match HeaderName::try_from(name.as_str()) {
                Ok(header) => Some(header),
                Err(_) => {
                    tracing::warn!(header = %name, "Ignoring invalid proxy header name");
                    None
                }
            })
            .collect();

        Self {
            trusted_proxies: config.trusted_proxies.iter().copied().collect(),
            proxy_headers,
        }
    }

    /// The address requests from `peer` are accounted against.
    pub fn resolve(&self, peer: IpAddr, headers: &HeaderMap) -> IpAddr {
        if !self.trusted_proxies.contains(&peer) {
            return peer;
        }

        self.proxy_headers
            .iter()
            .filter_map(|name| headers.get(name)?.to_str().ok())
            .find_map(|value| value.split(',').next()?.trim().parse().ok())
            .unwrap_or(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn resolver(trusted: &[&str]) -> ClientIdentityResolver {
        ClientIdentityResolver::new(&RateLimitConfig {
            trusted_proxies: trusted.iter().map(|ip| ip.parse().unwrap()).collect(),
            ..RateLimitConfig::default()
        })
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_untrusted_peer_headers_ignored() {
        let peer: IpAddr = "203.0.113.9".parse().unwrap();
        let forged = headers(&[("x-forwarded-for", "1.2.3.4")]);
        assert_eq!(resolver(&[]).resolve(peer, &forged), peer);
    }

    #[test]
    fn test_trusted_proxy_uses_first_forwarded_address() {
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let forwarded = headers(&[("x-forwarded-for", "198.51.100.7, 10.0.0.1")]);
        assert_eq!(
            resolver(&["10.0.0.1"]).resolve(proxy, &forwarded),
            "198.51.100.7".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_falls_through_to_next_header() {
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let map = headers(&[("x-forwarded-for", "garbage"), ("x-real-ip", "198.51.100.8")]);
        assert_eq!(
            resolver(&["10.0.0.1"]).resolve(proxy, &map),
            "198.51.100.8".parse::<IpAddr>().unwrap()
        );

        assert_eq!(resolver(&["10.0.0.1"]).resolve(proxy, &HeaderMap::new()), proxy);
    }
}
