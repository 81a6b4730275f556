use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use reqwest::{Client, Method, Response};
use url::Url;

use crate::config::{Settings, MAX_RETRIES};
use crate::errors::FetchFailure;
use crate::http_client::{build_transport, random_user_agent};
use crate::probe::throttle::{Throttle, ThrottlePermit};

const BACKOFF_INITIAL_MS: u64 = 200;
const BACKOFF_MAX_MS: u64 = 5_000;

/// A single logical request. Redirects are chased by the fetcher unless
/// `follow_redirects` is turned off.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub follow_redirects: bool,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            follow_redirects: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    pub final_url: String,
    /// Lower-cased header names; repeated headers are joined with ", ".
    pub headers: HashMap<String, String>,
    /// Body decoded lossily as UTF-8.
    pub body: String,
    /// Raw body bytes, for binary content.
    pub bytes: Vec<u8>,
    pub elapsed: Duration,
    pub redirects: usize,
    /// Body was cut (or skipped) because it exceeded the size ceiling.
    pub truncated: bool,
}

impl FetchResult {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn is_redirect(&self) -> bool {
        is_redirect_status(self.status)
    }
}

pub fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub max_response_size: usize,
    pub max_redirect_depth: usize,
    pub allowed_hosts: Vec<String>,
    pub retries: u32,
    pub random_ua: bool,
}

impl FetchLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_response_size: settings.max_response_size,
            max_redirect_depth: settings.max_redirect_depth,
            allowed_hosts: settings
                .allowed_hosts
                .iter()
                .map(|h| h.trim().trim_start_matches('.').to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            retries: settings.retries,
            random_ua: settings.random_ua,
        }
    }

    /// Empty allow-list means no restriction. Entries match the host itself
    /// or any subdomain of it.
    pub fn host_allowed(&self, url: &Url) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        let host = match url.host_str() {
            Some(h) => h.to_lowercase(),
            None => return false,
        };
        self.allowed_hosts
            .iter()
            .any(|a| host == *a || host.ends_with(&format!(".{}", a)))
    }
}

/// The one HTTP primitive every module goes through: global and per-host
/// concurrency caps, host pacing, manual redirect chasing and a hard body
/// ceiling. Transport errors come back as `FetchFailure`, never panics.
pub struct BoundedFetcher {
    client: Client,
    throttle: Throttle,
    limits: FetchLimits,
    sent: AtomicU64,
}

impl BoundedFetcher {
    pub fn new(settings: &Settings) -> reqwest::Result<Self> {
        Ok(Self::with_client(build_transport(settings)?, settings))
    }

    pub fn with_client(client: Client, settings: &Settings) -> Self {
        let throttle = Throttle::new(settings.max_concurrency, settings.per_host)
            .with_pacing(settings.pacing, settings.jitter());
        Self {
            client,
            throttle,
            limits: FetchLimits::from_settings(settings),
            sent: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> &FetchLimits {
        &self.limits
    }

    /// Number of network requests actually put on the wire.
    pub fn requests_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub async fn get(&self, url: &str) -> Result<FetchResult, FetchFailure> {
        self.fetch(FetchRequest::get(url)).await
    }

    pub async fn fetch(&self, req: FetchRequest) -> Result<FetchResult, FetchFailure> {
        let mut current = Url::parse(&req.url).map_err(|_| FetchFailure::InvalidUrl(req.url.clone()))?;
        if !matches!(current.scheme(), "http" | "https") {
            return Err(FetchFailure::UnsupportedScheme(req.url.clone()));
        }

        let mut method = req.method.clone();
        let mut body = req.body.clone();
        let mut hops = 0usize;

        loop {
            let (resp, permit, started) = self.send_with_retries(&req, &method, &current, body.as_deref()).await?;
            let status = resp.status().as_u16();

            if req.follow_redirects && is_redirect_status(status) {
                if let Some(next) = resolve_location(&resp, &current) {
                    if hops >= self.limits.max_redirect_depth {
                        tracing::debug!(url = %current, hops, "redirect depth limit reached");
                        return self.finish(resp, permit, current, hops, started).await;
                    }
                    if !matches!(next.scheme(), "http" | "https") || !self.limits.host_allowed(&next) {
                        tracing::debug!(from = %current, to = %next, "refusing off-scope redirect");
                        return self.finish(resp, permit, current, hops, started).await;
                    }

                    drop(resp);
                    drop(permit);
                    if status == 303 || (matches!(status, 301 | 302) && method != Method::GET && method != Method::HEAD) {
                        method = Method::GET;
                        body = None;
                    }
                    hops += 1;
                    current = next;
                    continue;
                }
            }

            return self.finish(resp, permit, current, hops, started).await;
        }
    }

    async fn send_with_retries(
        &self,
        req: &FetchRequest,
        method: &Method,
        url: &Url,
        body: Option<&str>,
    ) -> Result<(Response, ThrottlePermit, Instant), FetchFailure> {
        let host = url.host_str().unwrap_or_default().to_lowercase();
        let max_attempts = self.limits.retries.min(MAX_RETRIES) + 1;
        let mut backoff = BACKOFF_INITIAL_MS;

        for attempt in 1..=max_attempts {
            let permit = self
                .throttle
                .acquire(&host)
                .await
                .map_err(|e| FetchFailure::Transport(e.to_string()))?;

            let mut builder = self.client.request(method.clone(), url.clone());
            for (k, v) in &req.headers {
                builder = builder.header(k.as_str(), v.as_str());
            }
            if self.limits.random_ua && !req.has_header("user-agent") {
                builder = builder.header(reqwest::header::USER_AGENT, random_user_agent());
            }
            if let Some(b) = body {
                builder = builder.body(b.to_string());
            }

            let started = Instant::now();
            self.sent.fetch_add(1, Ordering::Relaxed);
            match builder.send().await {
                Ok(resp) => return Ok((resp, permit, started)),
                Err(e) => {
                    let failure = FetchFailure::from(e);
                    drop(permit);
                    if !failure.is_connect() || attempt >= max_attempts {
                        tracing::debug!(url = %url, error = %failure, "fetch failed");
                        return Err(failure);
                    }
                    // exponential backoff with cap
                    tokio::time::sleep(Duration::from_millis(backoff.min(BACKOFF_MAX_MS))).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
        Err(FetchFailure::Connect(format!("{} unreachable after {} attempts", url, max_attempts)))
    }

    async fn finish(
        &self,
        resp: Response,
        permit: ThrottlePermit,
        url: Url,
        hops: usize,
        started: Instant,
    ) -> Result<FetchResult, FetchFailure> {
        let status = resp.status().as_u16();
        let headers = collect_headers(&resp);
        let (bytes, truncated) = read_capped(resp, self.limits.max_response_size).await?;
        let elapsed = started.elapsed();
        drop(permit);

        if truncated {
            tracing::debug!(url = %url, cap = self.limits.max_response_size, "response body truncated");
        }
        tracing::debug!(url = %url, status, hops, ms = elapsed.as_millis() as u64, "fetched");

        Ok(FetchResult {
            status,
            final_url: url.to_string(),
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            bytes,
            elapsed,
            redirects: hops,
            truncated,
        })
    }
}

fn resolve_location(resp: &Response, current: &Url) -> Option<Url> {
    let loc = resp.headers().get(reqwest::header::LOCATION)?.to_str().ok()?;
    current.join(loc.trim()).ok()
}

fn collect_headers(resp: &Response) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::with_capacity(resp.headers().len());
    for (k, v) in resp.headers() {
        let value = String::from_utf8_lossy(v.as_bytes()).into_owned();
        map.entry(k.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

/// Stream the body up to `cap` bytes. An advertised length over the cap
/// skips the body entirely.
async fn read_capped(mut resp: Response, cap: usize) -> Result<(Vec<u8>, bool), FetchFailure> {
    if let Some(len) = resp.content_length() {
        if len > cap as u64 {
            return Ok((Vec::new(), true));
        }
    }

    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        let room = cap.saturating_sub(buf.len());
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            return Ok((buf, true));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((buf, false))
}
