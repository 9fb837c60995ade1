//! Hostname helpers shared by the issuer, the challenge coordinator and settings.

/// Trims, lowercases and strips a leading `*.` and a trailing `.`.
pub fn normalize_domain(domain: &str) -> String {
    let lowered = domain.trim().to_lowercase();
    let without_wildcard = lowered.strip_prefix("*.").unwrap_or(&lowered);
    without_wildcard
        .strip_suffix('.')
        .unwrap_or(without_wildcard)
        .to_string()
}

/// Registrable root of `domain` according to the public suffix list.
///
/// Falls back to the last two labels for names the list does not know.
pub fn apex_domain(domain: &str) -> String {
    let normalized = normalize_domain(domain);
    if let Some(apex) = psl::domain_str(&normalized) {
        return apex.to_string();
    }

    let labels: Vec<&str> = normalized.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return normalized;
    }
    labels[labels.len() - 2..].join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("  CDN.Example.COM. "), "cdn.example.com");
        assert_eq!(normalize_domain("*.example.com"), "example.com");
        assert_eq!(normalize_domain("example.com"), "example.com");
    }

    #[test]
    fn test_apex_domain() {
        assert_eq!(apex_domain("cdn.example.com"), "example.com");
        assert_eq!(apex_domain("a.b.example.co.uk"), "example.co.uk");
        assert_eq!(apex_domain("*.static.example.com"), "example.com");
        assert_eq!(apex_domain("example.com"), "example.com");
    }
}
