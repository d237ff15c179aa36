/// A fresh opaque session token.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Normalizes a user-supplied collector URL.
///
/// Surrounding whitespace is dropped, a blank URL falls back to `default`
/// and a URL without a scheme is assumed to be https. Returns `None` when the
/// result does not parse as an http(s) URL, including when another scheme
/// was given.
pub fn normalize_endpoint(endpoint: &str, default: &str) -> Option<String> {
    let trimmed = endpoint.trim();
    let candidate = if trimmed.is_empty() {
        default.trim().to_string()
    } else if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    match url::Url::parse(&candidate) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {
            Some(candidate)
        }
        _ => None,
    }
}

/// Renders an optional measurement as a rounded integer, `0` when absent.
pub fn rounded_or_zero(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{}", v.round() as i64),
        _ => "0".to_string(),
    }
}
