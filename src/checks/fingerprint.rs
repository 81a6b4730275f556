use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::future::join_all;
use serde::Deserialize;

use crate::config::ModuleKind;
use crate::probe::fetch::BoundedFetcher;
use crate::report::{RawRecord, ReportSink};
use crate::scheduler::CheckModule;
use crate::utils::unique_roots;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaviconEntry {
    #[serde(default = "unknown_product")]
    pub product: String,
    #[serde(default)]
    pub notes: String,
}

fn unknown_product() -> String {
    "Unknown".to_string()
}

const BUILTIN: &[(&str, &str)] = &[
    ("116323821", "Jenkins"),
    ("-203227154", "Apache Tomcat"),
    ("-1581907337", "SonarQube"),
];

/// Favicon hash → product. Keys are decimal signed hashes, as Shodan prints them.
#[derive(Debug, Clone)]
pub struct FaviconDb {
    entries: HashMap<String, FaviconEntry>,
}

impl FaviconDb {
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|(hash, product)| {
                let entry = FaviconEntry { product: product.to_string(), notes: "Default favicon".to_string() };
                (hash.to_string(), entry)
            })
            .collect();
        Self { entries }
    }

    /// Built-in table overlaid with a JSON file of the same shape. An
    /// unreadable or malformed file leaves the built-in table alone.
    pub fn load(extra: Option<&Path>) -> Self {
        let mut db = Self::builtin();
        let Some(path) = extra else {
            return db;
        };
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<HashMap<String, FaviconEntry>>(&text) {
                Ok(more) => db.entries.extend(more),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring malformed favicon db"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "favicon db unreadable"),
        }
        db
    }

    pub fn lookup(&self, hash: i32) -> Option<&FaviconEntry> {
        self.entries.get(&hash.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// MurmurHash3 x86 32-bit.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k1: u32 = 0;
        for (i, b) in tail.iter().enumerate() {
            k1 ^= (*b as u32) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;
    h1
}

/// Base64 with a newline after every 76 characters, the way Python's
/// `base64.encodebytes` formats it.
fn mime_base64(data: &[u8]) -> String {
    let flat = BASE64.encode(data);
    let mut out = String::with_capacity(flat.len() + flat.len() / 76 + 1);
    for line in flat.as_bytes().chunks(76) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out
}

/// Shodan-compatible favicon hash.
pub fn favicon_hash(data: &[u8]) -> i32 {
    murmur3_32(mime_base64(data).as_bytes(), 0) as i32
}

/// Server, CDN and framework hints from a root response.
pub fn stack_hints(headers: &HashMap<String, String>, body: &str) -> Vec<String> {
    let mut hints = Vec::new();
    if let Some(server) = headers.get("server") {
        hints.push(format!("Server: {}", server));
    }
    if let Some(powered) = headers.get("x-powered-by") {
        hints.push(format!("X-Powered-By: {}", powered));
    }

    let cdn = if headers.contains_key("cf-ray") || headers.contains_key("cf-cache-status") {
        Some("Cloudflare")
    } else if headers.contains_key("x-amz-cf-id") || headers.contains_key("x-amz-cf-pop") {
        Some("Amazon CloudFront")
    } else if headers.contains_key("x-fastly-request-id") || headers.contains_key("fastly-debug-digest") {
        Some("Fastly")
    } else if headers.contains_key("x-azure-ref") {
        Some("Azure CDN")
    } else {
        None
    };
    if let Some(cdn) = cdn {
        hints.push(format!("CDN: {}", cdn));
    }

    if headers.contains_key("x-nextjs-cache") || body.contains("__NEXT_DATA__") {
        hints.push("Next.js".into());
    }
    if body.contains("wp-content") || body.contains("wp-includes") {
        hints.push("WordPress".into());
    }
    if body.contains("_nuxt") {
        hints.push("Nuxt.js".into());
    }
    if body.contains("ng-version") {
        hints.push("Angular".into());
    }
    hints
}

pub struct FingerprintCheck {
    fetcher: Arc<BoundedFetcher>,
    reporter: Arc<dyn ReportSink>,
    db: FaviconDb,
}

impl FingerprintCheck {
    pub fn new(fetcher: Arc<BoundedFetcher>, reporter: Arc<dyn ReportSink>, db: FaviconDb) -> Self {
        Self { fetcher, reporter, db }
    }

    async fn check_root(&self, root: &str) -> anyhow::Result<()> {
        let (headers, hints) = match self.fetcher.get(&format!("{}/", root)).await {
            Ok(r) => {
                let hints = stack_hints(&r.headers, &r.body);
                (r.headers, hints)
            }
            Err(e) => {
                tracing::debug!(root, error = %e, "root fetch failed");
                (HashMap::new(), Vec::new())
            }
        };

        let favicon = format!("{}/favicon.ico", root);
        let resp = match self.fetcher.get(&favicon).await {
            Ok(r) if r.status < 400 && !r.bytes.is_empty() => r,
            Ok(_) => return Ok(()),
            Err(e) => {
                tracing::debug!(url = %favicon, error = %e, "favicon fetch failed");
                return Ok(());
            }
        };

        let hash = favicon_hash(&resp.bytes);
        let Some(entry) = self.db.lookup(hash) else {
            tracing::debug!(root, hash, "favicon not in database");
            return Ok(());
        };

        let mut evidence = format!("Product: {}\nFavicon hash: {}\nNotes: {}", entry.product, hash, entry.notes);
        if !hints.is_empty() {
            evidence.push_str(&format!("\nStack: {}", hints.join(", ")));
        }
        let headers: BTreeMap<String, String> = headers.into_iter().collect();
        let rec = RawRecord::new("Technology Fingerprint", root, evidence)
            .with_curl(format!("curl -i '{}'", favicon))
            .with_headers(headers);
        self.reporter.record(rec).await
    }
}

#[async_trait]
impl CheckModule for FingerprintCheck {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Fingerprint
    }

    async fn run(&self, endpoints: &[String]) -> anyhow::Result<()> {
        let roots = unique_roots(endpoints);
        for res in join_all(roots.iter().map(|r| self.check_root(r))).await {
            res?;
        }
        Ok(())
    }
}
