use url::Url;

/// Parses an HTTP(S) probe target, defaulting the scheme to https.
pub fn parse_http_url(input: &str) -> Option<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = if trimmed.contains("://") {
        Url::parse(trimmed).ok()?
    } else {
        Url::parse(&format!("https://{trimmed}")).ok()?
    };
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url),
        _ => None,
    }
}

/// Checks that a TCP target looks like `host:port` with a numeric port.
pub fn is_host_port(input: &str) -> bool {
    let Some((host, port)) = input.trim().rsplit_once(':') else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    !host.is_empty() && port.parse::<u16>().is_ok_and(|port| port > 0)
}
