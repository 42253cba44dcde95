//! Host header normalization helpers.

/// Strips a trailing `:port` from a Host header value.
///
/// Bracketed IPv6 literals keep their brackets; an unbracketed value with
/// more than one colon is returned unchanged rather than mangled.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        if let Some(end) = host.find(']') {
            return &host[..=end];
        }
        return host;
    }
    match host.rfind(':') {
        Some(idx)
            if host[..idx].find(':').is_none()
                && !host[idx + 1..].is_empty()
                && host[idx + 1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            &host[..idx]
        }
        _ => host,
    }
}

/// Canonical routing key for a configured vhost: trimmed, port stripped,
/// lower-cased. The data plane compares Host headers case-sensitively
/// against keys produced here.
pub fn normalize_vhost(vhost: &str) -> String {
    strip_port(vhost.trim()).to_ascii_lowercase()
}
