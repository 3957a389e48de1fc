// src/worker/ssrf.rs
// Resolves a dataset URL's hostname and rejects loopback / link-local /
// RFC-1918 private ranges unless explicitly permitted.

use std::net::IpAddr;

use url::Url;

use super::error::WorkerError;

pub fn check_scheme(url: &Url) -> Result<(), WorkerError> {
    match url.scheme() {
        "http" | "https" | "file" => Ok(()),
        other => Err(WorkerError::validation(format!(
            "unsupported URL scheme: {}",
            other
        ))),
    }
}

fn is_disallowed(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_link_local() || v4.is_private() || v4.is_broadcast(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unique_local() || v6.is_unicast_link_local(),
    }
}

/// Resolves the URL's host and rejects it if every resolved address is in a
/// disallowed range, unless `allow_private` is set.
pub async fn check_host_safety(url: &Url, allow_private: bool) -> Result<(), WorkerError> {
    if allow_private {
        return Ok(());
    }

    if url.scheme() == "file" {
        return Ok(());
    }

    let host = url
        .host_str()
        .ok_or_else(|| WorkerError::validation("URL has no host"))?;
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| WorkerError::network(format!("DNS resolution failed: {}", e)))?;

    let mut resolved_any = false;
    for addr in addrs {
        resolved_any = true;
        if is_disallowed(addr.ip()) {
            return Err(WorkerError::validation(format!(
                "refusing to fetch from a private/loopback address: {}",
                addr.ip()
            )));
        }
    }

    if !resolved_any {
        return Err(WorkerError::network("host did not resolve to any address"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_scheme() {
        let url = Url::parse("ftp://example.com/data.csv").unwrap();
        assert!(check_scheme(&url).is_err());
    }

    #[test]
    fn accepts_http_https_file() {
        assert!(check_scheme(&Url::parse("http://example.com").unwrap()).is_ok());
        assert!(check_scheme(&Url::parse("https://example.com").unwrap()).is_ok());
        assert!(check_scheme(&Url::parse("file:///tmp/data.csv").unwrap()).is_ok());
    }

    #[test]
    fn private_ranges_are_disallowed() {
        assert!(is_disallowed("127.0.0.1".parse().unwrap()));
        assert!(is_disallowed("10.0.0.5".parse().unwrap()));
        assert!(is_disallowed("169.254.1.1".parse().unwrap()));
        assert!(!is_disallowed("93.184.216.34".parse().unwrap()));
    }

    #[tokio::test]
    async fn allow_private_bypasses_resolution() {
        let url = Url::parse("http://localhost/data.csv").unwrap();
        assert!(check_host_safety(&url, true).await.is_ok());
    }
}
