//! Namespace resolution for provisioner controllers

/// Environment variable holding the controller's namespace (downward API)
pub const NAMESPACE_ENV: &str = "POD_NAMESPACE";

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespace the controller operates in
///
/// Reads `POD_NAMESPACE`, falling back to `default`.
pub fn resolve_namespace() -> String {
    resolve_namespace_from(std::env::var(NAMESPACE_ENV).ok())
}

/// Resolve from an optional configured value; blank counts as unset
pub fn resolve_namespace_from(configured: Option<String>) -> String {
    configured
        .map(|ns| ns.trim().to_string())
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_namespace_wins() {
        assert_eq!(
            resolve_namespace_from(Some("hobbyfarm".to_string())),
            "hobbyfarm"
        );
    }

    #[test]
    fn blank_or_missing_falls_back_to_default() {
        assert_eq!(resolve_namespace_from(None), DEFAULT_NAMESPACE);
        assert_eq!(resolve_namespace_from(Some("  ".to_string())), DEFAULT_NAMESPACE);
    }
}
