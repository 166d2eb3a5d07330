use std::sync::OnceLock;

use http::header;
use reqwest::RequestBuilder;

/// Hop-by-hop headers never forwarded in either direction. `Host` is listed
/// too: the outbound client derives it from the upstream URL.
fn hop_by_hop_header_names() -> &'static [&'static str; 9] {
    static HOP_BY_HOP_HEADER_NAMES: OnceLock<[&'static str; 9]> = OnceLock::new();

    HOP_BY_HOP_HEADER_NAMES.get_or_init(|| {
        let mut names = [
            header::CONNECTION.as_str(),
            "keep-alive",
            header::PROXY_AUTHENTICATE.as_str(),
            header::PROXY_AUTHORIZATION.as_str(),
            header::TE.as_str(),
            header::TRAILER.as_str(),
            header::TRANSFER_ENCODING.as_str(),
            header::UPGRADE.as_str(),
            header::HOST.as_str(),
        ];
        names.sort_unstable();
        names
    })
}

pub(crate) fn is_hop_by_hop(name: &http::HeaderName) -> bool {
    hop_by_hop_header_names().contains(&name.as_str())
}

/// Copy every end-to-end header of the inbound request onto the outbound
/// builder, acting as a transparent proxy.
pub(crate) fn insert_proxied_headers_into(
    mut request: RequestBuilder,
    headers: &http::HeaderMap,
) -> RequestBuilder {
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        request = request.header(name, value);
    }

    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_filtered() {
        let mut headers = http::HeaderMap::new();
        headers.insert(header::HOST, "proxy.local".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert("x-custom", "kept".parse().unwrap());

        let kept: Vec<_> = headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
            .map(|(name, _)| name.as_str().to_string())
            .collect();

        assert_eq!(kept.len(), 2);
        assert!(kept.contains(&"content-type".to_string()));
        assert!(kept.contains(&"x-custom".to_string()));
    }
}
