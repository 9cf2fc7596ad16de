//! Injection-pattern scanning.
//!
//! A fixed OWASP-style pattern table is applied to query parameters, header
//! values and the keys/values of JSON bodies. A hit denies the request; the
//! pipeline maps a denial to 403.
use once_cell::sync::Lazy;
use regex::Regex;

static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    let sources = [
        // SQL
        r"(?i)\b(union|select|insert|update|delete|drop|alter|create|truncate|exec|execute)\b",
        r"(?i)\b(from|into|where|having|join)\b",
        // XSS
        r"(?i)(<script|<iframe|<object|<embed|<svg|<img|on[a-z]+ ?=)",
        r"(?i)(javascript:|data:|vbscript:)",
        // Command
        r"(?i)\b(system|eval|bash|powershell)\b",
        // Path traversal
        r"(?i)(\.\./|\betc/passwd\b)",
    ];
    sources
        .iter()
        .filter_map(|src| match Regex::new(src) {
            Ok(re) => Some(re),
            Err(err) => {
                tracing::error!(pattern = src, error = %err, "invalid injection pattern");
                None
            }
        })
        .collect()
});

/// True when `input` matches any injection pattern.
pub fn is_injection(input: &str) -> bool {
    INJECTION_PATTERNS.iter().any(|re| re.is_match(input))
}

/// Scan a raw query string (`k=v&k2=v2`), both keys and values.
pub fn scan_query(query: &str) -> Option<String> {
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        for part in [key, value] {
            if !part.is_empty() && is_injection(part) {
                return Some(part.to_string());
            }
        }
    }
    None
}

/// Scan header (name, value) pairs.
pub fn scan_headers<'a>(
    headers: impl Iterator<Item = (&'a str, &'a str)>,
) -> Option<String> {
    for (name, value) in headers {
        if is_injection(name) || is_injection(value) {
            return Some(format!("{name}: {value}"));
        }
    }
    None
}

/// Scan a JSON document's keys and scalar values, recursively.
pub fn scan_json(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, inner) in map {
                if is_injection(key) {
                    return Some(key.clone());
                }
                if let Some(hit) = scan_json(inner) {
                    return Some(hit);
                }
            }
            None
        }
        serde_json::Value::Array(items) => items.iter().find_map(scan_json),
        serde_json::Value::String(s) => is_injection(s).then(|| s.clone()),
        other => {
            let rendered = other.to_string();
            is_injection(&rendered).then_some(rendered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_keywords_are_flagged() {
        assert!(is_injection("1 UNION SELECT password"));
        assert!(is_injection("drop table users"));
        assert!(!is_injection("unionized workers"));
    }

    #[test]
    fn xss_vectors_are_flagged() {
        assert!(is_injection("<script>alert(1)</script>"));
        assert!(is_injection("javascript:void(0)"));
        assert!(is_injection("<img src=x onerror=alert(1)>"));
    }

    #[test]
    fn path_traversal_is_flagged() {
        assert!(is_injection("../../etc/passwd"));
        assert!(!is_injection("/api/v1/user"));
    }

    #[test]
    fn clean_inputs_pass() {
        assert!(scan_query("id=42&name=alice").is_none());
        assert!(scan_query("q=select+1").is_some());
    }

    #[test]
    fn header_scan_covers_names_and_values() {
        let headers = [("x-note", "<script>x</script>")];
        assert!(scan_headers(headers.iter().map(|(n, v)| (*n, *v))).is_some());

        let clean = [("accept", "application/json")];
        assert!(scan_headers(clean.iter().map(|(n, v)| (*n, *v))).is_none());
    }

    #[test]
    fn json_scan_recurses() {
        let doc: serde_json::Value =
            serde_json::from_str(r#"{"user": {"bio": "1; DROP TABLE users"}}"#).unwrap();
        assert!(scan_json(&doc).is_some());

        let clean: serde_json::Value =
            serde_json::from_str(r#"{"user": {"bio": "hello world", "age": 3}}"#).unwrap();
        assert!(scan_json(&clean).is_none());
    }
}
