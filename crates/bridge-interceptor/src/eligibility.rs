//! Per-call proxy eligibility.
//!
//! Only same-host requests to the configured debugging service are ever
//! proxied. This is a safety boundary: the bridge must not become a way
//! to route arbitrary page traffic through the privileged context.

use tracing::trace;
use url::Url;

use crate::config::BridgeConfig;

/// Domain-rule evaluator, consumed from the external rule layer.
pub trait DomainRuleEvaluator: Send + Sync {
    /// Whether `candidate_origin` matches `rule_pattern`.
    fn is_eligible(&self, rule_pattern: &str, candidate_origin: &str) -> bool;
}

impl<F> DomainRuleEvaluator for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn is_eligible(&self, rule_pattern: &str, candidate_origin: &str) -> bool {
        self(rule_pattern, candidate_origin)
    }
}

/// Decide whether a URL requested by the page should be proxied.
///
/// False when there is no configuration, when the page origin fails the
/// domain rule, or when the URL's host is not exactly the configured
/// service host.
pub fn should_proxy_url(
    config: Option<&BridgeConfig>,
    evaluator: &dyn DomainRuleEvaluator,
    page_origin: &str,
    url: &str,
) -> bool {
    let Some(config) = config else {
        return false;
    };
    if !evaluator.is_eligible(&config.domain_rules, page_origin) {
        trace!(origin = page_origin, "page origin not covered by domain rule");
        return false;
    }
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    match parsed.host_str() {
        Some(host) => host == config.service_host(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(service_address: &str) -> BridgeConfig {
        BridgeConfig {
            domain_rules: "*.example.com".to_string(),
            enable_ssl: true,
            service_address: service_address.to_string(),
        }
    }

    fn allow_all(_rule: &str, _origin: &str) -> bool {
        true
    }

    fn deny_all(_rule: &str, _origin: &str) -> bool {
        false
    }

    #[test]
    fn test_no_configuration_disables_proxying() {
        assert!(!should_proxy_url(
            None,
            &allow_all,
            "https://app.example.com",
            "https://svc.local/api",
        ));
    }

    #[test]
    fn test_matching_service_host_is_proxied() {
        let config = config("svc.local");
        assert!(should_proxy_url(
            Some(&config),
            &allow_all,
            "https://app.example.com",
            "https://svc.local/api",
        ));
    }

    #[test]
    fn test_other_hosts_pass_through() {
        let config = config("svc.local");
        assert!(!should_proxy_url(
            Some(&config),
            &allow_all,
            "https://app.example.com",
            "https://other.example/",
        ));
    }

    #[test]
    fn test_ineligible_origin_passes_through() {
        let config = config("svc.local");
        assert!(!should_proxy_url(
            Some(&config),
            &deny_all,
            "https://unrelated.site",
            "https://svc.local/api",
        ));
    }

    #[test]
    fn test_configured_port_does_not_change_host_match() {
        let config = config("svc.local:9229");
        assert!(should_proxy_url(
            Some(&config),
            &allow_all,
            "https://app.example.com",
            "https://svc.local:9229/json/list",
        ));
    }

    #[test]
    fn test_ipv6_service_address_matches() {
        let config = config("[::1]:9229");
        assert!(should_proxy_url(
            Some(&config),
            &allow_all,
            "https://app.example.com",
            "ws://[::1]:9229/stream",
        ));
    }

    #[test]
    fn test_unparseable_url_passes_through() {
        let config = config("svc.local");
        assert!(!should_proxy_url(
            Some(&config),
            &allow_all,
            "https://app.example.com",
            "not a url",
        ));
    }
}
