use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use bounty_hunter::checks::fingerprint::favicon_hash;
use bounty_hunter::checks::jwt::hs256_token;
use bounty_hunter::checks::{
    AccessControlCheck, AuthCheck, FaviconDb, FingerprintCheck, JwtCheck, OobSsrfCheck, RedirectCheck,
    SignedUrlCheck,
};
use bounty_hunter::config::{RoleSession, Settings};
use bounty_hunter::probe::BoundedFetcher;
use bounty_hunter::report::{MemoryReporter, ReportSink};
use bounty_hunter::scheduler::CheckModule;
use serde_json::json;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn fetcher() -> Arc<BoundedFetcher> {
    let settings = Settings {
        jitter_s: 0.0,
        pacing: false,
        retries: 0,
        allowed_hosts: vec!["127.0.0.1".to_string()],
        ..Settings::default()
    };
    Arc::new(BoundedFetcher::new(&settings).unwrap())
}

fn reporter() -> (Arc<MemoryReporter>, Arc<dyn ReportSink>) {
    let r = Arc::new(MemoryReporter::new());
    let sink: Arc<dyn ReportSink> = r.clone();
    (r, sink)
}

async fn not_found_fallback(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .with_priority(10)
        .mount(server)
        .await;
}

#[tokio::test]
async fn open_redirect_is_recorded_once_per_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .and(query_param("next", "https://evil.example/"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "https://evil.example/"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("login form"))
        .mount(&server)
        .await;

    let (mem, sink) = reporter();
    let check = RedirectCheck::new(fetcher(), sink);
    check.run(&[format!("{}/login", server.uri())]).await.unwrap();

    let records = mem.records_in("Open Redirect");
    assert_eq!(records.len(), 1);
    assert!(records[0].evidence.contains("`next`"));
    assert!(records[0].curl.starts_with("curl -i '"));
}

#[tokio::test]
async fn unsigned_jwt_acceptance_is_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(|req: &Request| {
            let auth = req
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if auth.starts_with("Bearer ") && auth.ends_with('.') {
                ResponseTemplate::new(200).set_body_string("{\"user\": \"test\"}")
            } else {
                ResponseTemplate::new(401)
            }
        })
        .mount(&server)
        .await;
    not_found_fallback(&server).await;

    let (mem, sink) = reporter();
    let check = JwtCheck::new(fetcher(), sink, BTreeMap::new());
    check.run(&[format!("{}/anything?x=1", server.uri())]).await.unwrap();

    assert_eq!(mem.records_in("JWT alg=none acceptance").len(), 1);
    assert!(mem.records_in("JWT key confusion (heuristic)").is_empty());
    assert!(mem.records()[0].endpoint.ends_with("/api/me"));
}

#[tokio::test]
async fn signed_url_without_enforcement_is_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(200).set_body_string("file contents"))
        .mount(&server)
        .await;

    let (mem, sink) = reporter();
    let check = SignedUrlCheck::new(fetcher(), sink);
    let endpoints = vec![
        format!("{}/blob?sp=r&se=1700000000&sig=abc", server.uri()),
        format!("{}/blob?plain=1", server.uri()),
    ];
    check.run(&endpoints).await.unwrap();

    let stripped = mem.records_in("Signed URL Misuse — Signature Not Enforced");
    assert_eq!(stripped.len(), 1);
    assert!(!stripped[0].endpoint.contains("sig="));
    let tampered = mem.records_in("Signed URL Misuse — Expiry Tampering");
    assert_eq!(tampered.len(), 1);
    assert!(tampered[0].endpoint.contains("se=1700864000"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn known_favicon_is_fingerprinted() {
    let icon = b"\x00\x00\x01\x00fake-icon-bytes".to_vec();
    let hash = favicon_hash(&icon);
    let mut db_file = tempfile::NamedTempFile::new().unwrap();
    write!(db_file, "{}", json!({ hash.to_string(): {"product": "Acme CI", "notes": "stock icon"} })).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/favicon.ico"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(icon))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("Server", "nginx").set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let (mem, sink) = reporter();
    let check = FingerprintCheck::new(fetcher(), sink, FaviconDb::load(Some(db_file.path())));
    let endpoints = vec![format!("{}/a", server.uri()), format!("{}/b?x=1", server.uri())];
    check.run(&endpoints).await.unwrap();

    let records = mem.records_in("Technology Fingerprint");
    assert_eq!(records.len(), 1);
    assert!(records[0].evidence.contains("Acme CI"));
    assert!(records[0].evidence.contains("Server: nginx"));
    assert_eq!(records[0].headers.as_ref().unwrap().get("server").map(String::as_str), Some("nginx"));
}

#[tokio::test]
async fn auth_check_flags_bypass_cors_and_discrepancy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .and(header("cookie", "sid=1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Access-Control-Allow-Origin", "https://bh-origin.example")
                .insert_header("Access-Control-Allow-Credentials", "true")
                .set_body_string("Admin console"),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Please log in"))
        .with_priority(2)
        .mount(&server)
        .await;
    not_found_fallback(&server).await;

    let mut roles = BTreeMap::new();
    let mut user = RoleSession::default();
    user.cookies.insert("sid".to_string(), "1".to_string());
    roles.insert("user".to_string(), user);

    let (mem, sink) = reporter();
    let check = AuthCheck::new(fetcher(), sink, &roles);
    check.run(&[format!("{}/home", server.uri())]).await.unwrap();

    assert_eq!(mem.records_in("Auth Bypass (heuristic)").len(), 1);
    assert_eq!(mem.records_in("CORS Misconfiguration").len(), 1);
    let discrepancies = mem.records_in("Authorization discrepancy");
    assert_eq!(discrepancies.len(), 1);
    assert!(discrepancies[0].endpoint.ends_with("/admin"));
    assert!(discrepancies[0].evidence.contains("anon-desktop:401"));
    assert!(discrepancies[0].evidence.contains("user-mobile:200"));
}

#[tokio::test]
async fn role_tokens_drive_privilege_checks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("admin"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/users/\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"email\": \"x@y\"}"))
        .mount(&server)
        .await;
    not_found_fallback(&server).await;

    let mut tokens = BTreeMap::new();
    tokens.insert("user".to_string(), hs256_token(&json!({"sub": "1", "role": "user"}), "k").unwrap());
    tokens.insert("editor".to_string(), hs256_token(&json!({"sub": "2", "role": "editor"}), "k").unwrap());

    let (mem, sink) = reporter();
    let check = AccessControlCheck::new(fetcher(), sink, tokens);
    check.run(&[format!("{}/", server.uri())]).await.unwrap();

    assert_eq!(mem.records_in("Potential Vertical Privilege Escalation").len(), 2);
    let horizontal = mem.records_in("Potential Horizontal Privilege Escalation");
    assert_eq!(horizontal.len(), 2);
    assert!(horizontal.iter().any(|r| r.endpoint.ends_with("/api/users/2")));
    assert!(horizontal.iter().any(|r| r.endpoint.ends_with("/api/users/1")));
}

#[tokio::test]
async fn access_control_without_tokens_sends_nothing() {
    let server = MockServer::start().await;
    not_found_fallback(&server).await;

    let (mem, sink) = reporter();
    let check = AccessControlCheck::new(fetcher(), sink, BTreeMap::new());
    check.run(&[server.uri()]).await.unwrap();
    assert!(mem.records().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn oob_probe_is_queued_per_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fetch"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (mem, sink) = reporter();
    let check = OobSsrfCheck::new(fetcher(), sink, "oob.test", "bh-ssrf");
    check.run(&[format!("{}/fetch", server.uri())]).await.unwrap();

    let records = mem.records_in("SSRF (OOB probe queued)");
    assert_eq!(records.len(), 9);
    assert!(records.iter().all(|r| r.evidence.contains(".oob.test/ping")));
}
