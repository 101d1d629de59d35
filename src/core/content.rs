//! Full-text retrieval for candidate URLs.
//!
//! Every failure is folded into a placeholder string so one bad URL never
//! aborts a run. Fetches for a batch run in parallel behind a semaphore and the
//! caller receives results in candidate order.

use anyhow::{Context, Result, bail};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use url::Url;

use crate::core::extract::ArticleCandidate;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

pub const NO_URL_PLACEHOLDER: &str = "(No URL provided)";
pub const EMPTY_CONTENT_PLACEHOLDER: &str = "[Content could not be extracted from this page]";

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static EXCESS_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" {2,}").expect("valid regex"));

/// Containers that usually hold the article body, in order of preference.
const MAIN_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role='main']",
    "[itemprop='articleBody']",
    ".post-content",
    ".entry-content",
    ".article-body",
    "#content",
    ".content",
];

/// Elements dropped wholesale while collecting text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "nav", "header", "footer", "aside", "form",
    "button", "svg", "template", "select",
];

/// Class or id fragments that mark boilerplate.
const BOILERPLATE_MARKERS: &[&str] = &[
    "nav", "menu", "sidebar", "footer", "advert", "ads", "promo", "cookie", "share", "social",
    "newsletter", "related", "comment",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul",
    "ol", "blockquote", "pre", "br", "tr", "table", "figure", "figcaption", "dd", "dt",
];

pub fn error_placeholder(reason: impl std::fmt::Display) -> String {
    format!("[Error fetching article: {}]", reason)
}

#[derive(Clone)]
pub struct ContentFetcher {
    client: reqwest::Client,
    max_parallel: usize,
}

impl ContentFetcher {
    pub fn new(max_parallel: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            max_parallel: max_parallel.max(1),
        })
    }

    /// Fetches every candidate concurrently, at most `max_parallel` at a time.
    /// The returned vector is index-aligned with `candidates`.
    pub async fn fetch_all(&self, candidates: &[ArticleCandidate]) -> Vec<String> {
        let mut contents = vec![String::new(); candidates.len()];
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        for (idx, candidate) in candidates.iter().enumerate() {
            if candidate.url.trim().is_empty() {
                contents[idx] = NO_URL_PLACEHOLDER.to_string();
                continue;
            }

            let fetcher = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let url = candidate.url.clone();
            tasks.spawn(async move {
                let content = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        info!(url = %url, "fetching content");
                        fetcher.fetch(&url).await
                    }
                    Err(e) => error_placeholder(e),
                };
                (idx, content)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, content)) => contents[idx] = content,
                Err(e) => warn!(error = %e, "content fetch task failed"),
            }
        }

        // A panicked task leaves its slot empty.
        for slot in contents.iter_mut().filter(|c| c.is_empty()) {
            *slot = error_placeholder("fetch task aborted");
        }
        contents
    }

    /// Fetches one URL and reduces it to readable text, degrading every
    /// failure to a placeholder.
    pub async fn fetch(&self, url: &str) -> String {
        if url.trim().is_empty() {
            return NO_URL_PLACEHOLDER.to_string();
        }
        match self.try_fetch(url).await {
            Ok(text) if text.is_empty() => EMPTY_CONTENT_PLACEHOLDER.to_string(),
            Ok(text) => text,
            Err(e) => {
                warn!(url = %url, error = %e, "content fetch failed");
                error_placeholder(format!("{:#}", e))
            }
        }
    }

    async fn try_fetch(&self, raw_url: &str) -> Result<String> {
        let url = Url::parse(raw_url.trim()).context("invalid URL")?;
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!("unsupported URL scheme '{}'", url.scheme());
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .context("fetch URL")?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            bail!("HTTP {}", status.as_u16());
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.context("read body")? {
            let room = MAX_BODY_BYTES - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let html = String::from_utf8_lossy(&body);
        Ok(readable_text(&html))
    }
}

/// Readability-style extraction: pick the most likely article container,
/// collect its text while skipping boilerplate, then normalize whitespace.
pub fn readable_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    if let Some(root) = main_container(&document) {
        collect_text(root, &mut raw);
    }
    clean_whitespace(&raw)
}

fn main_container(document: &Html) -> Option<ElementRef<'_>> {
    for selector_str in MAIN_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(el) = document
            .select(&selector)
            .find(|el| el.text().any(|t| !t.trim().is_empty()))
        {
            return Some(el);
        }
    }

    densest_paragraph_parent(document).or_else(|| {
        Selector::parse("body")
            .ok()
            .and_then(|body| document.select(&body).next())
    })
}

/// The element whose direct `<p>` children carry the most text.
fn densest_paragraph_parent(document: &Html) -> Option<ElementRef<'_>> {
    let p = Selector::parse("p").ok()?;
    let mut best: Option<(ElementRef<'_>, usize)> = None;

    for para in document.select(&p) {
        let Some(parent) = para.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let score: usize = parent
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|child| child.value().name() == "p")
            .map(|child| child.text().map(str::len).sum::<usize>())
            .sum();
        if best.as_ref().is_none_or(|(_, s)| score > *s) {
            best = Some((parent, score));
        }
    }

    best.filter(|(_, score)| *score > 0).map(|(el, _)| el)
}

fn is_boilerplate(el: &ElementRef<'_>) -> bool {
    let value = el.value();
    if SKIP_TAGS.contains(&value.name()) {
        return true;
    }
    let marked = |token: &str| {
        let token = token.to_ascii_lowercase();
        BOILERPLATE_MARKERS
            .iter()
            .any(|m| token == *m || token.starts_with(&format!("{m}-")) || token.ends_with(&format!("-{m}")))
    };
    value.classes().any(marked) || value.id().is_some_and(marked)
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let words: Vec<&str> = text.split_whitespace().collect();
                if words.is_empty() {
                    if !text.is_empty() && !out.ends_with([' ', '\n']) {
                        out.push(' ');
                    }
                    continue;
                }
                if text.starts_with(char::is_whitespace) && !out.ends_with([' ', '\n']) {
                    out.push(' ');
                }
                out.push_str(&words.join(" "));
                if text.ends_with(char::is_whitespace) {
                    out.push(' ');
                }
            }
            Node::Element(_) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_boilerplate(&child_el) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&child_el.value().name());
                if block {
                    out.push('\n');
                }
                collect_text(child_el, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Trims each line, collapses 3+ newlines to a blank line and runs of spaces
/// to one.
pub fn clean_whitespace(raw: &str) -> String {
    let trimmed_lines = raw.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    let text = EXCESS_NEWLINES.replace_all(&trimmed_lines, "\n\n");
    let text = EXCESS_SPACES.replace_all(&text, " ");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::MockHttp;
    use axum::{Router, http::StatusCode, routing::get};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ARTICLE_PAGE: &str = r#"<html><head><title>T</title><script>var x = 1;</script></head>
<body>
  <nav><a href="/">Home</a> <a href="/world">World</a></nav>
  <header class="site-header">Daily Paper</header>
  <article>
    <h1>Rust   1.90 released</h1>
    <p>The Rust team    shipped a new release.</p>
    <div class="share-buttons">Share this</div>
    <p>It includes <b>faster</b> builds.</p>
  </article>
  <footer>Copyright</footer>
</body></html>"#;

    fn candidate(url: &str) -> ArticleCandidate {
        ArticleCandidate {
            title: "t".to_string(),
            url: url.to_string(),
            summary: String::new(),
        }
    }

    #[test]
    fn readable_text_keeps_article_body_only() {
        let text = readable_text(ARTICLE_PAGE);
        assert!(text.contains("Rust 1.90 released"));
        assert!(text.contains("The Rust team shipped a new release."));
        assert!(text.contains("It includes faster builds."));
        assert!(!text.contains("Home"));
        assert!(!text.contains("Share this"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("\n\n\n"));
        assert!(!text.contains("  "));
    }

    #[test]
    fn falls_back_to_densest_paragraph_block() {
        let html = r#"<body><div id="menu"><p>Menu</p></div>
            <div class="story"><p>First paragraph of the story.</p><p>Second paragraph.</p></div></body>"#;
        let text = readable_text(html);
        assert_eq!(text, "First paragraph of the story.\n\nSecond paragraph.");
    }

    #[test]
    fn whitespace_cleanup_collapses_runs() {
        assert_eq!(clean_whitespace("  a  \n\n\n\n b    c \n"), "a\n\nb c");
    }

    #[tokio::test]
    async fn empty_url_yields_placeholder_without_network() {
        let fetcher = ContentFetcher::new(2).unwrap();
        assert_eq!(fetcher.fetch("").await, NO_URL_PLACEHOLDER);
        let out = fetcher.fetch_all(&[candidate(""), candidate("  ")]).await;
        assert_eq!(out, vec![NO_URL_PLACEHOLDER, NO_URL_PLACEHOLDER]);
    }

    #[tokio::test]
    async fn failures_degrade_to_placeholders() {
        let app = Router::new()
            .route("/ok", get(|| async { axum::response::Html(ARTICLE_PAGE) }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/blank",
                get(|| async { axum::response::Html("<html><body><script>x</script></body></html>") }),
            );
        let server = MockHttp::start(app).await;
        let fetcher = ContentFetcher::new(3).unwrap();

        let out = fetcher
            .fetch_all(&[
                candidate(&server.url("/ok")),
                candidate(&server.url("/missing")),
                candidate("ftp://files.example/a.txt"),
                candidate(&server.url("/blank")),
                candidate(""),
            ])
            .await;

        assert!(out[0].contains("The Rust team shipped a new release."));
        assert_eq!(out[1], "[Error fetching article: HTTP 404]");
        assert!(out[2].starts_with("[Error fetching article: unsupported URL scheme"));
        assert_eq!(out[3], EMPTY_CONTENT_PLACEHOLDER);
        assert_eq!(out[4], NO_URL_PLACEHOLDER);
    }

    #[tokio::test]
    async fn body_read_is_capped() {
        let big = format!("<html><body><pre>{}</pre></body></html>", "a".repeat(MAX_BODY_BYTES + 4096));
        let app = Router::new().route("/big", get(move || async move { big }));
        let server = MockHttp::start(app).await;
        let fetcher = ContentFetcher::new(1).unwrap();

        let text = fetcher.fetch(&server.url("/big")).await;
        assert!(text.len() <= MAX_BODY_BYTES);
        assert!(text.starts_with("aaaa"));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_and_results_stay_aligned() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (in_flight_h, peak_h) = (Arc::clone(&in_flight), Arc::clone(&peak));

        let app = Router::new().route(
            "/page/{n}",
            get(move |axum::extract::Path(n): axum::extract::Path<usize>| {
                let in_flight = Arc::clone(&in_flight_h);
                let peak = Arc::clone(&peak_h);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // Later pages answer first.
                    tokio::time::sleep(Duration::from_millis(20 + (12 - n as u64) * 5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    axum::response::Html(format!("<article><p>page {n}</p></article>"))
                }
            }),
        );
        let server = MockHttp::start(app).await;
        let fetcher = ContentFetcher::new(3).unwrap();

        let candidates: Vec<_> = (0..12)
            .map(|n| candidate(&server.url(&format!("/page/{n}"))))
            .collect();
        let out = fetcher.fetch_all(&candidates).await;

        for (n, text) in out.iter().enumerate() {
            assert_eq!(text, &format!("page {n}"));
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }
}
