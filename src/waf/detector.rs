use crate::probe::fetch::FetchResult;

/// Status codes that usually mean a filter rejected the probe rather than
/// the application itself.
pub const BLOCK_STATUSES: [u16; 2] = [403, 406];

/// Heuristic WAF block: only the status code is trusted, body wording
/// varies too much between vendors.
pub fn is_blocked_status(status: u16) -> bool {
    BLOCK_STATUSES.contains(&status)
}

/// Best-effort vendor guess for telemetry on a blocked response.
pub fn guess_vendor(result: &FetchResult) -> Option<&'static str> {
    let server = result.header("server").unwrap_or_default().to_lowercase();
    let body = result.body.to_lowercase();

    if server.contains("cloudflare") || result.header("cf-ray").is_some() || body.contains("ray id") {
        Some("Cloudflare")
    } else if server.contains("akamai") || body.contains("reference #") {
        Some("Akamai")
    } else if server.contains("sucuri") {
        Some("Sucuri")
    } else if server.contains("imperva") || server.contains("incapsula") || body.contains("incident id") {
        Some("Imperva")
    } else if server.contains("big-ip") || server.contains("bigip") {
        Some("F5 BIG-IP")
    } else if server.contains("barracuda") {
        Some("Barracuda")
    } else if server.contains("fortiweb") {
        Some("FortiWeb")
    } else if body.contains("mod_security") || body.contains("modsecurity") {
        Some("ModSecurity")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn result(status: u16, server: &str, body: &str) -> FetchResult {
        let mut headers = HashMap::new();
        headers.insert("server".to_string(), server.to_string());
        FetchResult {
            status,
            final_url: "https://t.example/".into(),
            headers,
            body: body.into(),
            bytes: body.as_bytes().to_vec(),
            elapsed: Duration::ZERO,
            redirects: 0,
            truncated: false,
        }
    }

    #[test]
    fn test_block_statuses() {
        assert!(is_blocked_status(403));
        assert!(is_blocked_status(406));
        assert!(!is_blocked_status(429));
        assert!(!is_blocked_status(200));
    }

    #[test]
    fn test_vendor_guess() {
        assert_eq!(guess_vendor(&result(403, "cloudflare", "")), Some("Cloudflare"));
        assert_eq!(guess_vendor(&result(406, "Apache", "Not Acceptable! ModSecurity")), Some("ModSecurity"));
        assert_eq!(guess_vendor(&result(403, "nginx", "forbidden")), None);
    }
}
