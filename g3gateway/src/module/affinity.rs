/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use http::{HeaderMap, HeaderName, HeaderValue, header};
use once_cell::sync::Lazy;
use regex::Regex;

const HEADER_PREFIX: &str = "x-scrapoxy";
pub(crate) const HEADER_PROXYNAME: HeaderName = HeaderName::from_static("x-scrapoxy-proxyname");
pub(crate) const HEADER_PROXYERROR: HeaderName = HeaderName::from_static("x-scrapoxy-proxyerror");
pub(crate) const HEADER_MODE: HeaderName = HeaderName::from_static("x-scrapoxy-mode");

const COOKIE_NAME: &str = "scrapoxy-proxyname";
const COOKIE_EXPIRED: &str = "expires=Thu, 01 Jan 1970 00:00:00 GMT";

static COOKIE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)scrapoxy-proxyname=([^;]+);?\s*").unwrap_or_else(|_| unreachable!())
});

fn proxyname_from_cookie(headers: &mut HeaderMap) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?.to_str().ok()?;
    let captures = COOKIE_REGEX.captures(cookie)?;
    let proxyname = captures.get(1)?.as_str().trim().to_string();

    let left = COOKIE_REGEX.replace(cookie, "").trim().to_string();
    if left.is_empty() {
        headers.remove(header::COOKIE);
    } else if let Ok(v) = HeaderValue::from_str(&left) {
        headers.insert(header::COOKIE, v);
    }

    if proxyname.is_empty() {
        None
    } else {
        Some(proxyname)
    }
}

/// Get the requested proxy id, from the affinity header or else from the cookie.
///
/// The affinity cookie is removed from the `Cookie` header when used.
pub(crate) fn proxyname_from_headers(headers: &mut HeaderMap) -> Option<String> {
    if let Some(v) = headers.get(&HEADER_PROXYNAME).and_then(|v| v.to_str().ok()) {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }

    proxyname_from_cookie(headers)
}

/// Remove every header using the reserved prefix.
pub(crate) fn remove_reserved_headers(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(HEADER_PREFIX))
        .cloned()
        .collect();
    for name in names {
        headers.remove(name);
    }
}

fn cookie_attrs(secure: bool) -> &'static str {
    if secure {
        "HttpOnly; Secure; SameSite=None"
    } else {
        "HttpOnly"
    }
}

/// The cookie pair binding `proxy_id`, a domain scoped one and a host scoped one.
pub(crate) fn affinity_set_cookies(proxy_id: &str, domain: &str, secure: bool) -> [String; 2] {
    let attrs = cookie_attrs(secure);
    [
        format!("{COOKIE_NAME}={proxy_id}; Domain=.{domain}; {attrs}"),
        format!("{COOKIE_NAME}={proxy_id}; {attrs}"),
    ]
}

/// The expiring cookie pair.
pub(crate) fn affinity_clear_cookies(domain: &str, secure: bool) -> [String; 2] {
    let attrs = cookie_attrs(secure);
    [
        format!("{COOKIE_NAME}=; Domain=.{domain}; {attrs}; {COOKIE_EXPIRED}"),
        format!("{COOKIE_NAME}=; {attrs}; {COOKIE_EXPIRED}"),
    ]
}

/// Get the domain from a `Host` header value.
pub(crate) fn parse_domain(host: &str) -> Option<&str> {
    let host = host.trim();
    let domain = if let Some(v) = host.strip_prefix('[') {
        match v.find(']') {
            Some(p) => &v[..p],
            None => return None,
        }
    } else {
        match host.rfind(':') {
            Some(p) => &host[..p],
            None => host,
        }
    };
    if domain.is_empty() { None } else { Some(domain) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-scrapoxy-proxyname"),
            HeaderValue::from_static("conn1:key1"),
        );
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("scrapoxy-proxyname=conn2:key2; a=b"),
        );
        assert_eq!(
            proxyname_from_headers(&mut headers).as_deref(),
            Some("conn1:key1")
        );
        // the cookie is left untouched when the header is used
        assert_eq!(
            headers.get(header::COOKIE).unwrap(),
            "scrapoxy-proxyname=conn2:key2; a=b"
        );
    }

    #[test]
    fn from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("a=b; Scrapoxy-Proxyname=conn2:key2; c=d"),
        );
        assert_eq!(
            proxyname_from_headers(&mut headers).as_deref(),
            Some("conn2:key2")
        );
        assert_eq!(headers.get(header::COOKIE).unwrap(), "a=b; c=d");
    }

    #[test]
    fn from_cookie_only() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("scrapoxy-proxyname=conn3:key3"),
        );
        assert_eq!(
            proxyname_from_headers(&mut headers).as_deref(),
            Some("conn3:key3")
        );
        assert!(headers.get(header::COOKIE).is_none());
    }

    #[test]
    fn empty_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-scrapoxy-proxyname"),
            HeaderValue::from_static(""),
        );
        assert!(proxyname_from_headers(&mut headers).is_none());
    }

    #[test]
    fn remove_reserved() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_PROXYNAME, HeaderValue::from_static("a"));
        headers.insert(HEADER_MODE, HeaderValue::from_static("tunnel"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        remove_reserved_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn cookies() {
        let [a, b] = affinity_set_cookies("p1", "example.com", false);
        assert_eq!(a, "scrapoxy-proxyname=p1; Domain=.example.com; HttpOnly");
        assert_eq!(b, "scrapoxy-proxyname=p1; HttpOnly");

        let [a, b] = affinity_set_cookies("p1", "example.com", true);
        assert_eq!(
            a,
            "scrapoxy-proxyname=p1; Domain=.example.com; HttpOnly; Secure; SameSite=None"
        );
        assert_eq!(b, "scrapoxy-proxyname=p1; HttpOnly; Secure; SameSite=None");

        let [a, b] = affinity_clear_cookies("example.com", false);
        assert_eq!(
            a,
            "scrapoxy-proxyname=; Domain=.example.com; HttpOnly; expires=Thu, 01 Jan 1970 00:00:00 GMT"
        );
        assert_eq!(
            b,
            "scrapoxy-proxyname=; HttpOnly; expires=Thu, 01 Jan 1970 00:00:00 GMT"
        );

        let [_, b] = affinity_clear_cookies("example.com", true);
        assert!(b.contains("HttpOnly; Secure; SameSite=None; expires=Thu, 01 Jan 1970"));
    }

    #[test]
    fn domain() {
        assert_eq!(parse_domain("example.com:80"), Some("example.com"));
        assert_eq!(parse_domain("example.com"), Some("example.com"));
        assert_eq!(parse_domain("[::1]:443"), Some("::1"));
        assert_eq!(parse_domain(":80"), None);
        assert_eq!(parse_domain(""), None);
    }
}
