//! Headless-browser fetch tier (CDP via chromiumoxide), feature-gated.
//!
//! Without the `browser` feature the tier reports itself unavailable and the
//! cascade continues. Known auth-walled domains are skipped before a browser
//! ever launches, and post-navigation redirects to login paths are treated
//! as 403s.

use crate::WebFetcher;
use dossier::tools::FetchOutcome;
use std::time::Duration;

#[cfg(not(feature = "browser"))]
pub(crate) async fn fetch(
    _url: &str,
    _tier1: &WebFetcher,
    _timeout: Duration,
) -> FetchOutcome {
    FetchOutcome::inaccessible("skip", "browser_not_available")
}

#[cfg(not(feature = "browser"))]
pub(crate) async fn fetch_structured(
    _url: &str,
    _tier1: &WebFetcher,
    _timeout: Duration,
) -> FetchOutcome {
    FetchOutcome::inaccessible("skip", "browser_not_available")
}

#[cfg(feature = "browser")]
pub(crate) async fn fetch(url: &str, tier1: &WebFetcher, timeout: Duration) -> FetchOutcome {
    if crate::is_browser_skip_url(url) {
        return FetchOutcome::inaccessible("skip", "browser_skip_gated_domain");
    }
    if crate::is_pdf_url(url) {
        return fetch_pdf(url, tier1).await;
    }
    match tokio::time::timeout(timeout, render_page(url)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => FetchOutcome::inaccessible(
            "error",
            format!("browser_error: {}", truncate(&e.to_string(), 150)),
        ),
        Err(_) => FetchOutcome::inaccessible("timeout", "browser_timeout"),
    }
}

/// Structured fetch: rendered page reduced to cleaned text. Used only for
/// regulatory domains where the rendered DOM is far cleaner than raw HTML.
#[cfg(feature = "browser")]
pub(crate) async fn fetch_structured(
    url: &str,
    tier1: &WebFetcher,
    timeout: Duration,
) -> FetchOutcome {
    // Same rendering pipeline; the html2text pass already yields markdown-ish
    // output with headings and link text preserved.
    fetch(url, tier1, timeout).await
}

#[cfg(feature = "browser")]
fn truncate(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        None => text.to_string(),
        Some((idx, _)) => text[..idx].to_string(),
    }
}

#[cfg(feature = "browser")]
async fn render_page(
    url: &str,
) -> Result<FetchOutcome, Box<dyn std::error::Error + Send + Sync>> {
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use futures::StreamExt;

    let config = BrowserConfig::builder()
        .no_sandbox()
        .build()
        .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { e.into() })?;
    let (mut browser, mut handler) = Browser::launch(config).await?;
    let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

    let result = async {
        let page = browser.new_page(url).await?;
        page.wait_for_navigation().await?;
        let final_url = page.url().await?.unwrap_or_default();
        if crate::is_auth_wall_redirect(&final_url) {
            tracing::debug!(original_url = url, redirected_to = %final_url, "browser_auth_wall");
            return Ok(FetchOutcome::inaccessible("403", "browser_auth_wall"));
        }
        let html = page.content().await?;
        let text = html2text::from_read(html.as_bytes(), 100);
        Ok(FetchOutcome::success(truncate(&text, 50_000), "200"))
    }
    .await;

    let _ = browser.close().await;
    handler_task.abort();
    result
}

#[cfg(feature = "browser")]
async fn fetch_pdf(url: &str, tier1: &WebFetcher) -> FetchOutcome {
    // PDFs don't need rendering; pull the bytes and extract text.
    let client = reqwest::Client::builder()
        .timeout(tier1.timeout())
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());
    let ua = if crate::is_sec_gov_url(url) {
        tier1.sec_user_agent().to_string()
    } else {
        crate::USER_AGENTS[0].to_string()
    };
    let response = match client.get(url).header("User-Agent", ua).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            return FetchOutcome::inaccessible(
                r.status().as_u16().to_string(),
                format!("browser_pdf_{}", r.status().as_u16()),
            )
        }
        Err(e) => {
            return FetchOutcome::inaccessible(
                "error",
                format!("browser_pdf_error: {}", truncate(&e.to_string(), 150)),
            )
        }
    };
    let bytes = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            return FetchOutcome::inaccessible(
                "error",
                format!("browser_pdf_error: {}", truncate(&e.to_string(), 150)),
            )
        }
    };
    match pdf_extract::extract_text_from_mem(&bytes) {
        Ok(text) => FetchOutcome::success(truncate(&text, 50_000), "200"),
        Err(e) => FetchOutcome::inaccessible(
            "200",
            format!("pdf_no_text_extraction: {}", truncate(&e.to_string(), 100)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier::config::SearchConfig;

    #[tokio::test]
    async fn test_unavailable_tier_reports_skip() {
        // With the default feature set the browser tier must degrade, never
        // fail the cascade.
        let tier1 = WebFetcher::new(
            &SearchConfig::default().sec_contact_email,
            Duration::from_secs(5),
        );
        let outcome = fetch("https://example.com/x", &tier1, Duration::from_secs(1)).await;
        if cfg!(not(feature = "browser")) {
            assert_eq!(outcome.inaccessible_reason.as_deref(), Some("browser_not_available"));
        }
    }
}
