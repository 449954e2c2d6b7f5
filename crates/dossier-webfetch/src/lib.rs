//! # Tiered URL Fetcher
//!
//! A deterministic escalation pipeline for fetching a single URL, with a
//! three-class failure taxonomy deciding which tiers run:
//!
//! - **Class 1, bot-blocked** (403/429): the domain is live but guards
//!   against bots. Escalate through every tier.
//! - **Class 2, dead domain** (DNS failure): skip HTTP tiers entirely and
//!   go straight to archive recovery. DNS results are cached process-wide.
//! - **Class 3, content removed** (404): log and attempt archive recovery.
//!
//! Tiers, in order: plain HTTP with rotated browser User-Agents, headless
//! browser (feature-gated), structured fetch for regulatory domains
//! (config-gated), the EDGAR full-text index for sec.gov, and finally the
//! Wayback Machine plus a slug-based relocation search.

pub mod rate_limiter;

mod browser;

use async_trait::async_trait;
use dossier::config::{DomainPolicies, SearchConfig};
use dossier::error::Result;
use dossier::tools::{FetchOutcome, SearchProvider, UrlFetcher};
use dossier::DEFAULT_HTTP_CONNECT_TIMEOUT;
use rate_limiter::DomainRateLimiter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const CONTENT_CAP: usize = 50_000;

/// Rotated browser User-Agents for Tier 1 (reduce bot blocking).
const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Domains that always redirect to an auth wall in a browser; the browser
/// tier is skipped for these entirely.
const BROWSER_SKIP_DOMAINS: [&str; 12] = [
    "linkedin.com",
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "reddit.com",
    "glassdoor.com",
    "bloomberg.com",
    "wsj.com",
    "ft.com",
    "threads.net",
];

/// URL path fragments indicating an auth-wall redirect happened during
/// navigation.
const AUTH_WALL_PATHS: [&str; 6] = ["/authwall", "/login", "/signin", "/signup", "/auth/", "/gated"];

const WAYBACK_AVAILABLE: &str = "https://archive.org/wayback/available";
const EDGAR_FTS: &str = "https://efts.sec.gov/LATEST/search-index";

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_default()
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub(crate) fn is_pdf_url(url: &str) -> bool {
    url.trim_end_matches('/').to_lowercase().ends_with(".pdf")
}

pub(crate) fn is_sec_gov_url(url: &str) -> bool {
    host_of(url).contains("sec.gov")
}

fn is_sec_litigation_url(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| u.path().to_lowercase().contains("/litigation/"))
        .unwrap_or(false)
}

fn is_regulatory_domain(url: &str) -> bool {
    let host = host_of(url);
    ["sec.gov", "finra.org", "dfpi.ca.gov"]
        .iter()
        .any(|d| host.contains(d))
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub(crate) fn is_browser_skip_url(url: &str) -> bool {
    let host = host_of(url);
    BROWSER_SKIP_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub(crate) fn is_auth_wall_redirect(final_url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(final_url) else {
        return false;
    };
    let path = parsed.path().to_lowercase();
    AUTH_WALL_PATHS
        .iter()
        .any(|frag| path.starts_with(frag) || path.contains(frag))
}

/// Derive an EDGAR full-text search key from a sec.gov URL: the CIK for
/// `/edgar/data/CIK/...` paths, else the filename stem.
fn edgar_query_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let parts: Vec<&str> = parsed
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    if let Some(data_idx) = parts.iter().position(|p| *p == "data") {
        if parts.contains(&"edgar") {
            if let Some(cik) = parts.get(data_idx + 1) {
                if cik.chars().all(|c| c.is_ascii_digit()) {
                    return Some((*cik).to_string());
                }
            }
        }
    }
    let last = parts.last()?;
    Some(match last.rsplit_once('.') {
        Some((stem, _ext)) => stem.to_string(),
        None => (*last).to_string(),
    })
}

/// DNS pre-check seam; injectable so the failure taxonomy is testable.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolves(&self, host: &str) -> bool;
}

/// System resolver with a process-wide result cache.
pub struct SystemDns;

fn dns_cache() -> &'static dashmap::DashMap<String, bool> {
    static CACHE: OnceLock<dashmap::DashMap<String, bool>> = OnceLock::new();
    CACHE.get_or_init(dashmap::DashMap::new)
}

#[async_trait]
impl DnsResolver for SystemDns {
    async fn resolves(&self, host: &str) -> bool {
        if host.is_empty() {
            return true; // can't parse; let the normal fetch decide
        }
        if let Some(cached) = dns_cache().get(host) {
            return *cached;
        }
        let resolved = tokio::net::lookup_host((host, 443u16)).await.is_ok();
        dns_cache().insert(host.to_string(), resolved);
        resolved
    }
}

fn truncate_chars(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        None => text.to_string(),
        Some((idx, _)) => text[..idx].to_string(),
    }
}

// ============================================================================
// Tier 1: plain HTTP
// ============================================================================

/// Direct page fetch with rotated browser-like headers. On 403/429/503 the
/// outcome carries a reason so the caller can escalate.
pub struct WebFetcher {
    client: reqwest::Client,
    ua_index: AtomicUsize,
    sec_user_agent: String,
    timeout: Duration,
}

impl WebFetcher {
    pub fn new(sec_contact_email: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
                .redirect(reqwest::redirect::Policy::limited(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            ua_index: AtomicUsize::new(0),
            // SEC requires a contact email in the User-Agent.
            sec_user_agent: format!("DossierResearch/0.4 {sec_contact_email}"),
            timeout,
        }
    }

    fn next_user_agent(&self) -> &'static str {
        let idx = self.ua_index.fetch_add(1, Ordering::Relaxed);
        USER_AGENTS[idx % USER_AGENTS.len()]
    }

    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let ua: String = if is_sec_gov_url(url) {
            self.sec_user_agent.clone()
        } else {
            self.next_user_agent().to_string()
        };
        let request = self
            .client
            .get(url)
            .header("User-Agent", ua)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", "https://www.google.com/");

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(url, error = %e, "web_fetch_error");
                let reason = truncate_chars(&e.to_string(), 200);
                return FetchOutcome::inaccessible("error", reason);
            }
        };

        let status = response.status();
        match status.as_u16() {
            200 => {
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let body = response.text().await.unwrap_or_default();
                let text = if content_type.contains("text/html") {
                    html2text::from_read(body.as_bytes(), 100)
                } else {
                    body
                };
                FetchOutcome::success(truncate_chars(&text, CONTENT_CAP), "200")
            }
            403 => FetchOutcome::inaccessible("403", "blocked_403"),
            429 => FetchOutcome::inaccessible("429", "rate_limited_429"),
            503 => FetchOutcome::inaccessible("503", "unavailable_503"),
            s => FetchOutcome::inaccessible(s.to_string(), format!("http_{s}")),
        }
    }

    pub(crate) fn sec_user_agent(&self) -> &str {
        &self.sec_user_agent
    }

    #[cfg_attr(not(feature = "browser"), allow(dead_code))]
    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }
}

// ============================================================================
// The escalation cascade, as data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Browser,
    Structured,
    Edgar,
    Archive,
}

/// Tiers run after a failed Tier-1 fetch, in order.
const ESCALATION: [Tier; 4] = [Tier::Browser, Tier::Structured, Tier::Edgar, Tier::Archive];

/// The tiered fetcher. See module docs for the taxonomy.
pub struct TieredFetcher {
    tier1: WebFetcher,
    limiter: DomainRateLimiter,
    dns: Arc<dyn DnsResolver>,
    /// Used by dead-URL recovery to look for relocated content.
    relocation_search: Option<Arc<dyn SearchProvider>>,
    use_structured_fetch: bool,
    browser_timeout: Duration,
    wayback_api: String,
    edgar_api: String,
}

impl TieredFetcher {
    pub fn new(search_config: &SearchConfig, policies: DomainPolicies) -> Self {
        Self {
            tier1: WebFetcher::new(
                &search_config.sec_contact_email,
                Duration::from_secs(search_config.request_timeout),
            ),
            limiter: DomainRateLimiter::new(policies),
            dns: Arc::new(SystemDns),
            relocation_search: None,
            use_structured_fetch: search_config.use_structured_fetch,
            browser_timeout: Duration::from_millis(search_config.browser_timeout_ms),
            wayback_api: WAYBACK_AVAILABLE.to_string(),
            edgar_api: EDGAR_FTS.to_string(),
        }
    }

    #[must_use]
    pub fn with_dns(mut self, dns: Arc<dyn DnsResolver>) -> Self {
        self.dns = dns;
        self
    }

    #[must_use]
    pub fn with_relocation_search(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.relocation_search = Some(provider);
        self
    }

    #[must_use]
    pub fn with_wayback_api(mut self, api: impl Into<String>) -> Self {
        self.wayback_api = api.into();
        self
    }

    #[must_use]
    pub fn with_edgar_api(mut self, api: impl Into<String>) -> Self {
        self.edgar_api = api.into();
        self
    }

    async fn run_tier(&self, tier: Tier, url: &str) -> FetchOutcome {
        match tier {
            Tier::Browser => browser::fetch(url, &self.tier1, self.browser_timeout).await,
            Tier::Structured => self.tier_structured(url).await,
            Tier::Edgar => self.tier_edgar(url).await,
            Tier::Archive => self.tier_wayback(url).await,
        }
    }

    /// Structured fetch for regulatory domains, behind config and the
    /// browser feature.
    async fn tier_structured(&self, url: &str) -> FetchOutcome {
        if !self.use_structured_fetch {
            return FetchOutcome::inaccessible("skip", "structured_fetch_disabled");
        }
        if !is_regulatory_domain(url) {
            return FetchOutcome::inaccessible("skip", "not_regulatory_domain");
        }
        browser::fetch_structured(url, &self.tier1, self.browser_timeout).await
    }

    /// EDGAR full-text search for sec.gov URLs that the site refused to
    /// serve. Litigation pages are not in the EFTS index.
    async fn tier_edgar(&self, url: &str) -> FetchOutcome {
        if !is_sec_gov_url(url) {
            return FetchOutcome::inaccessible("skip", "not_sec_gov");
        }
        if is_sec_litigation_url(url) {
            return FetchOutcome::inaccessible("skip", "sec_litigation_not_in_efts");
        }
        let Some(query) = edgar_query_from_url(url).filter(|q| !q.trim().is_empty()) else {
            return FetchOutcome::inaccessible("skip", "edgar_no_query");
        };

        let query = truncate_chars(query.trim(), 200);
        let response = self
            .tier1
            .client
            .get(&self.edgar_api)
            .header("User-Agent", self.tier1.sec_user_agent())
            .query(&[("q", query.as_str()), ("start", "0"), ("count", "10")])
            .send()
            .await;
        let data: serde_json::Value = match response {
            Ok(r) if r.status().is_success() => match r.json().await {
                Ok(v) => v,
                Err(e) => {
                    return FetchOutcome::inaccessible(
                        "error",
                        format!("edgar_error: {}", truncate_chars(&e.to_string(), 150)),
                    )
                }
            },
            Ok(r) => {
                return FetchOutcome::inaccessible(
                    r.status().to_string(),
                    "edgar_error: non-success status",
                )
            }
            Err(e) => {
                return FetchOutcome::inaccessible(
                    "error",
                    format!("edgar_error: {}", truncate_chars(&e.to_string(), 150)),
                )
            }
        };

        let hits = ["hits", "results", "data"]
            .iter()
            .find_map(|key| data.get(*key).and_then(serde_json::Value::as_array))
            .cloned()
            .unwrap_or_default();

        let mut parts: Vec<String> = Vec::new();
        for item in hits.iter().take(15) {
            let candidates = ["snippet", "text", "content", "description", "body"];
            let direct = candidates
                .iter()
                .find_map(|key| item.get(*key).and_then(serde_json::Value::as_str))
                .map(str::trim)
                .filter(|s| !s.is_empty());
            if let Some(text) = direct {
                parts.push(text.to_string());
            }
            for nested_key in ["_source", "document"] {
                if let Some(nested) = item.get(nested_key) {
                    if let Some(text) = candidates
                        .iter()
                        .find_map(|key| nested.get(*key).and_then(serde_json::Value::as_str))
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                    {
                        parts.push(text.to_string());
                        break;
                    }
                }
            }
        }

        if parts.is_empty() {
            return FetchOutcome::inaccessible("200", "edgar_no_snippets");
        }
        FetchOutcome::success(truncate_chars(&parts.join("\n\n"), CONTENT_CAP), "200")
    }

    /// Wayback availability check; a good snapshot is fetched via Tier 1.
    async fn tier_wayback(&self, url: &str) -> FetchOutcome {
        let response = self
            .tier1
            .client
            .get(&self.wayback_api)
            .header("User-Agent", USER_AGENTS[0])
            .query(&[("url", url)])
            .send()
            .await;
        let data: serde_json::Value = match response {
            Ok(r) if r.status().is_success() => match r.json().await {
                Ok(v) => v,
                Err(_) => {
                    return FetchOutcome::inaccessible("200", "wayback_invalid_response")
                }
            },
            Ok(r) => {
                return FetchOutcome::inaccessible(
                    r.status().to_string(),
                    "wayback_error: non-success status",
                )
            }
            Err(e) => {
                return FetchOutcome::inaccessible(
                    "error",
                    format!("wayback_error: {}", truncate_chars(&e.to_string(), 150)),
                )
            }
        };

        let closest = data
            .get("archived_snapshots")
            .and_then(|s| s.get("closest"));
        let Some(closest) = closest else {
            return FetchOutcome::inaccessible("200", "wayback_no_snapshot");
        };
        if closest.get("status").and_then(serde_json::Value::as_str) != Some("200") {
            return FetchOutcome::inaccessible("200", "wayback_snapshot_not_200");
        }
        let snapshot_url = closest
            .get("url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");
        if !snapshot_url.starts_with("http") {
            return FetchOutcome::inaccessible("200", "wayback_bad_snapshot_url");
        }

        let fetched = self.tier1.fetch(snapshot_url).await;
        if fetched.content.is_some() {
            return FetchOutcome {
                inaccessible_reason: None,
                ..fetched
            };
        }
        FetchOutcome::inaccessible(fetched.status, "wayback_fetch_failed")
    }

    /// Extract meaningful terms from a dead URL's path slug and search for
    /// the same content on live domains.
    async fn search_for_relocated(&self, url: &str) -> Option<FetchOutcome> {
        let search = self.relocation_search.as_ref()?;
        let parsed = url::Url::parse(url).ok()?;
        let mut slug = parsed.path().trim_end_matches('/').rsplit('/').next()?.to_string();
        for ext in [".html", ".htm", ".asp", ".aspx", ".php"] {
            if slug.to_lowercase().ends_with(ext) {
                slug.truncate(slug.len() - ext.len());
                break;
            }
        }
        let terms = slug.replace(['-', '_'], " ").trim().to_string();
        if terms.split_whitespace().count() < 3 {
            return None; // slug too short to give useful search signal
        }

        let host = parsed.host_str().unwrap_or("");
        let host_parts: Vec<&str> = host.split('.').collect();
        let org_hint = if host_parts.len() >= 2 {
            host_parts[host_parts.len() - 2]
        } else {
            host_parts.first().copied().unwrap_or("")
        };

        let query = format!("\"{terms}\" {org_hint}").trim().to_string();
        tracing::debug!(query, original_url = url, "searching_for_relocated_content");

        let response = search.search(&query, 3).await.ok()?;
        let top = response.results.first()?;
        let fetched = self.tier1.fetch(&top.url).await;
        if fetched.content.is_some() {
            return Some(FetchOutcome {
                inaccessible_reason: None,
                ..fetched
            });
        }
        None
    }

    /// Recovery pipeline for dead domains and removed content:
    /// Wayback Machine, then content-relocation search.
    async fn recover_dead_url(&self, url: &str, domain: &str) -> FetchOutcome {
        metrics::counter!("dossier_dead_domain_total", "method" => "attempt").increment(1);

        let wayback = self.tier_wayback(url).await;
        if wayback.content.is_some() {
            tracing::info!(url, domain, "dead_url_recovered_via_wayback");
            metrics::counter!("dossier_dead_domain_total", "method" => "wayback").increment(1);
            return wayback;
        }

        if let Some(relocated) = self.search_for_relocated(url).await {
            if relocated.content.is_some() {
                tracing::info!(original_url = url, domain, "dead_url_content_found_elsewhere");
                metrics::counter!("dossier_dead_domain_total", "method" => "relocated")
                    .increment(1);
                return relocated;
            }
        }

        metrics::counter!("dossier_dead_domain_total", "method" => "unrecoverable").increment(1);
        FetchOutcome::inaccessible(
            "dead",
            format!(
                "Domain {domain} no longer resolves (DNS failure). Wayback Machine and content-relocation recovery both failed."
            ),
        )
    }

    async fn run_cascade(&self, url: &str, tier1_outcome: FetchOutcome) -> FetchOutcome {
        let domain = host_of(url);
        let mut failures: Vec<FetchOutcome> = vec![tier1_outcome];
        for (i, tier) in ESCALATION.iter().enumerate() {
            metrics::counter!(
                "dossier_fetch_escalation_total",
                "from_tier" => (i + 1).to_string(),
                "to_tier" => (i + 2).to_string()
            )
            .increment(1);
            let outcome = self.run_tier(*tier, url).await;
            metrics::counter!(
                "dossier_fetch_total",
                "tier" => (i + 2).to_string(),
                "domain" => domain.clone()
            )
            .increment(1);
            if outcome.content.is_some() {
                return outcome;
            }
            failures.push(outcome);
        }
        // Return the most informative failure, latest tier first.
        failures
            .iter()
            .rev()
            .find(|f| {
                f.inaccessible_reason
                    .as_deref()
                    .is_some_and(|r| !r.starts_with("structured_fetch")
                        && !r.starts_with("not_")
                        && !r.starts_with("browser_not")
                        && !r.starts_with("sec_litigation")
                        && !r.starts_with("edgar_no_query"))
            })
            .or(failures.last())
            .cloned()
            .unwrap_or_default()
    }

    async fn fetch_inner(&self, url: &str) -> FetchOutcome {
        let hostname = host_of(url);

        // Class 2: dead domain. No point sending HTTP at it.
        if !self.dns.resolves(&hostname).await {
            tracing::warn!(
                domain = %hostname,
                url,
                action = "skipping_to_archive_recovery",
                "domain_dns_failed"
            );
            return self.recover_dead_url(url, &hostname).await;
        }

        let outcome = self.tier1.fetch(url).await;
        metrics::counter!("dossier_fetch_total", "tier" => "1", "domain" => hostname.clone())
            .increment(1);
        if outcome.content.is_some() {
            return outcome;
        }

        match outcome.status.as_str() {
            // Class 3: content removed. Archive recovery.
            "404" => {
                tracing::info!(url, domain = %hostname, "content_removed");
                let mut recovered = self.recover_dead_url(url, &hostname).await;
                if recovered.content.is_some() {
                    recovered.inaccessible_reason = Some(
                        "Original URL returned 404 (content removed). Recovered via archive/relocation."
                            .to_string(),
                    );
                }
                recovered
            }
            // Class 1 (403/429) and any other non-200: escalate the cascade.
            _ => self.run_cascade(url, outcome).await,
        }
    }
}

#[async_trait]
impl UrlFetcher for TieredFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let _permit = self.limiter.acquire(url).await;
        self.fetch_inner(url).await
    }
}

/// Convenience constructor returning the fetcher as the core seam type.
pub fn build_fetcher(
    search_config: &SearchConfig,
    policies: DomainPolicies,
    relocation_search: Option<Arc<dyn SearchProvider>>,
) -> Result<Arc<dyn UrlFetcher>> {
    let mut fetcher = TieredFetcher::new(search_config, policies);
    if let Some(provider) = relocation_search {
        fetcher = fetcher.with_relocation_search(provider);
    }
    Ok(Arc::new(fetcher))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedDns(bool);

    #[async_trait]
    impl DnsResolver for FixedDns {
        async fn resolves(&self, _host: &str) -> bool {
            self.0
        }
    }

    fn fetcher() -> TieredFetcher {
        TieredFetcher::new(&SearchConfig::default(), DomainPolicies::default())
    }

    #[test]
    fn test_edgar_query_from_cik_path() {
        assert_eq!(
            edgar_query_from_url("https://www.sec.gov/Archives/edgar/data/1045810/000104581023000017/filing.htm"),
            Some("1045810".to_string())
        );
    }

    #[test]
    fn test_edgar_query_from_filename_stem() {
        assert_eq!(
            edgar_query_from_url("https://www.sec.gov/files/aapl-20230930.htm"),
            Some("aapl-20230930".to_string())
        );
        assert_eq!(edgar_query_from_url("https://www.sec.gov/"), None);
    }

    #[test]
    fn test_sec_litigation_urls_excluded() {
        assert!(is_sec_litigation_url(
            "https://www.sec.gov/litigation/litreleases/lr-12345"
        ));
        assert!(!is_sec_litigation_url(
            "https://www.sec.gov/cgi-bin/browse-edgar"
        ));
    }

    #[test]
    fn test_browser_skip_domains() {
        assert!(is_browser_skip_url("https://www.linkedin.com/in/someone"));
        assert!(is_browser_skip_url("https://x.com/user"));
        assert!(!is_browser_skip_url("https://example.com/profile"));
    }

    #[test]
    fn test_auth_wall_detection() {
        assert!(is_auth_wall_redirect("https://www.linkedin.com/authwall?x=1"));
        assert!(is_auth_wall_redirect("https://site.example/login"));
        assert!(is_auth_wall_redirect("https://site.example/app/auth/start"));
        assert!(!is_auth_wall_redirect("https://site.example/article/login-trends-2024"));
    }

    #[test]
    fn test_pdf_url_detection() {
        assert!(is_pdf_url("https://example.com/report.PDF"));
        assert!(is_pdf_url("https://example.com/report.pdf/"));
        assert!(!is_pdf_url("https://example.com/report.pdf.html"));
    }

    #[tokio::test]
    async fn test_tier1_success_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("plain body text")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&server)
            .await;
        let outcome = fetcher().fetch(&format!("{}/page", server.uri())).await;
        assert_eq!(outcome.content.as_deref(), Some("plain body text"));
        assert_eq!(outcome.status, "200");
    }

    #[tokio::test]
    async fn test_tier1_html_is_converted_to_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><h1>Title</h1><p>Paragraph.</p></body></html>")
                    .insert_header("content-type", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;
        let outcome = fetcher().fetch(&format!("{}/x", server.uri())).await;
        let content = outcome.content.unwrap();
        assert!(content.contains("Title"));
        assert!(content.contains("Paragraph."));
        assert!(!content.contains("<h1>"));
    }

    #[tokio::test]
    async fn test_dead_domain_skips_http_and_recovers_via_wayback() {
        // The page server must never be hit: DNS says the domain is dead.
        let page_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old-page"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&page_server)
            .await;

        let archive_server = MockServer::start().await;
        let snapshot_url = format!("{}/snapshot", archive_server.uri());
        Mock::given(method("GET"))
            .and(path("/wayback/available"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "archived_snapshots": {"closest": {"status": "200", "url": snapshot_url}}
            })))
            .mount(&archive_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/snapshot"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("archived copy")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&archive_server)
            .await;

        let fetcher = fetcher()
            .with_dns(Arc::new(FixedDns(false)))
            .with_wayback_api(format!("{}/wayback/available", archive_server.uri()));
        let outcome = fetcher
            .fetch(&format!("{}/old-page", page_server.uri()))
            .await;
        assert_eq!(outcome.content.as_deref(), Some("archived copy"));
        assert!(outcome.inaccessible_reason.is_none());
    }

    #[tokio::test]
    async fn test_dead_domain_unrecoverable_reports_reason() {
        let archive_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "archived_snapshots": {}
            })))
            .mount(&archive_server)
            .await;
        let fetcher = fetcher()
            .with_dns(Arc::new(FixedDns(false)))
            .with_wayback_api(format!("{}/wayback/available", archive_server.uri()));
        let outcome = fetcher.fetch("http://gone.example/page").await;
        assert!(outcome.content.is_none());
        assert_eq!(outcome.status, "dead");
        assert!(outcome
            .inaccessible_reason
            .unwrap()
            .contains("no longer resolves"));
    }

    #[tokio::test]
    async fn test_403_escalates_cascade_to_wayback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocked"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let archive_server = MockServer::start().await;
        let snapshot_url = format!("{}/snap", archive_server.uri());
        Mock::given(method("GET"))
            .and(path("/wayback/available"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "archived_snapshots": {"closest": {"status": "200", "url": snapshot_url}}
            })))
            .mount(&archive_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/snap"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("from the archive")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&archive_server)
            .await;

        let fetcher = fetcher()
            .with_wayback_api(format!("{}/wayback/available", archive_server.uri()));
        let outcome = fetcher.fetch(&format!("{}/blocked", server.uri())).await;
        assert_eq!(outcome.content.as_deref(), Some("from the archive"));
    }

    #[tokio::test]
    async fn test_404_attempts_archive_recovery_and_annotates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/removed"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let archive_server = MockServer::start().await;
        let snapshot_url = format!("{}/snap", archive_server.uri());
        Mock::given(method("GET"))
            .and(path("/wayback/available"))
            .and(query_param("url", format!("{}/removed", server.uri())))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "archived_snapshots": {"closest": {"status": "200", "url": snapshot_url}}
            })))
            .mount(&archive_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/snap"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("rescued")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&archive_server)
            .await;

        let fetcher = fetcher()
            .with_wayback_api(format!("{}/wayback/available", archive_server.uri()));
        let outcome = fetcher.fetch(&format!("{}/removed", server.uri())).await;
        assert_eq!(outcome.content.as_deref(), Some("rescued"));
        assert!(outcome.inaccessible_reason.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_exhausted_cascade_returns_informative_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocked"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let archive_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "archived_snapshots": {}
            })))
            .mount(&archive_server)
            .await;
        let fetcher = fetcher()
            .with_wayback_api(format!("{}/wayback/available", archive_server.uri()));
        let outcome = fetcher.fetch(&format!("{}/blocked", server.uri())).await;
        assert!(outcome.content.is_none());
        assert_eq!(
            outcome.inaccessible_reason.as_deref(),
            Some("wayback_no_snapshot")
        );
    }

    #[tokio::test]
    async fn test_relocation_search_recovers_moved_content() {
        use dossier::tools::{NormalizedResult, SearchResponse};
        use parking_lot::Mutex;

        struct OneShotSearch {
            url: Mutex<String>,
        }

        #[async_trait]
        impl SearchProvider for OneShotSearch {
            async fn search(&self, query: &str, _max: u32) -> Result<SearchResponse> {
                assert!(query.contains('"'));
                Ok(SearchResponse {
                    query: query.to_string(),
                    provider: "tavily".into(),
                    total_results: 1,
                    results: vec![NormalizedResult {
                        title: "moved".into(),
                        url: self.url.lock().clone(),
                        ..Default::default()
                    }],
                })
            }
            fn name(&self) -> &'static str {
                "tavily"
            }
        }

        let live_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/new-home"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("relocated content")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&live_server)
            .await;
        let archive_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "archived_snapshots": {}
            })))
            .mount(&archive_server)
            .await;

        let search = Arc::new(OneShotSearch {
            url: Mutex::new(format!("{}/new-home", live_server.uri())),
        });
        let fetcher = fetcher()
            .with_dns(Arc::new(FixedDns(false)))
            .with_wayback_api(format!("{}/wayback/available", archive_server.uri()))
            .with_relocation_search(search);

        let outcome = fetcher
            .fetch("http://dead.example/annual-fraud-settlement-report-2019.html")
            .await;
        assert_eq!(outcome.content.as_deref(), Some("relocated content"));
    }

    #[tokio::test]
    async fn test_short_slug_skips_relocation() {
        let fetcher = fetcher();
        // Two-word slug gives no useful search signal.
        assert!(fetcher
            .search_for_relocated("http://dead.example/about-us.html")
            .await
            .is_none());
    }
}
