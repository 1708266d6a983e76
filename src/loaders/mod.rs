// Document loaders
// Fetch web pages and sitemaps over HTTP and turn them into plain-text documents


use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, anyhow};
use fancy_regex::Regex;
use indicatif::{ProgressBar, ProgressStyle};
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use ureq::Agent;
use url::Url;

use crate::config::LoaderConfig;
use crate::document::Document;
use crate::{RagError, Result};

/// Elements whose text is never shown to a reader
const HIDDEN_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Elements that start a new line of text
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main",
    "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

static BLANK_LINES_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t\r]*\n)+").expect("valid regex"));

static TRAILING_SPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r]+(?=\n)").expect("valid regex"));

/// URLs listed by a sitemap, with their optional annotations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<String>,
}

/// Parsed sitemap document
#[derive(Debug, Clone, PartialEq)]
pub enum Sitemap {
    /// A `<urlset>` of pages
    UrlSet(Vec<SitemapEntry>),
    /// A `<sitemapindex>` pointing at further sitemaps
    Index(Vec<String>),
}

/// Blocking HTTP client used by the loaders. Requests are never retried.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    agent: Agent,
}

impl HttpFetcher {
    #[inline]
    pub fn new(config: &LoaderConfig) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .user_agent(&config.user_agent)
            .build()
            .into();

        Self { agent }
    }

    /// GET `url` and return the body as text
    #[inline]
    pub fn fetch(&self, url: &Url) -> Result<String> {
        self.try_get(url)
            .map_err(|e| RagError::http(format!("{:#}", e)))
    }

    fn try_get(&self, url: &Url) -> anyhow::Result<String> {
        debug!("Making HTTP GET request to: {}", url);

        match self.agent.get(url.as_str()).call() {
            Ok(mut response) => {
                let text = response
                    .body_mut()
                    .read_to_string()
                    .with_context(|| format!("Failed to read response body from {}", url))?;
                debug!("Read {} bytes from {}", text.len(), url);
                Ok(text)
            }
            Err(ureq::Error::StatusCode(code)) => {
                debug!("HTTP request failed with status {}: {}", code, url);
                Err(anyhow!("HTTP error {} for {}", code, url))
            }
            Err(e) => Err(anyhow::Error::from(e))
                .with_context(|| format!("Failed to make HTTP request to {}", url)),
        }
    }

    /// Fetch a single page and extract its visible text
    #[inline]
    pub fn load_page(&self, url: &str) -> Result<Document> {
        let url = validate_url(url)?;
        let html = self.fetch(&url)?;
        let document = extract_page(&html, url.as_str());
        info!(
            "Loaded page {} ({} chars of text)",
            url,
            document.content.chars().count()
        );
        Ok(document)
    }

    /// Fetch a sitemap and load every page it lists.
    ///
    /// A sitemap index is followed one level deep. Pages (and nested
    /// sitemaps) that fail to load are logged and skipped; failing to fetch
    /// or parse the top-level sitemap is an error.
    #[inline]
    pub fn load_sitemap(&self, url: &str) -> Result<Vec<Document>> {
        let url = validate_url(url)?;
        let xml = self.fetch(&url)?;

        let entries = match parse_sitemap(&xml)? {
            Sitemap::UrlSet(entries) => entries,
            Sitemap::Index(sitemaps) => {
                info!("{} is a sitemap index with {} sitemaps", url, sitemaps.len());
                let mut entries = Vec::new();
                for nested in sitemaps {
                    match self.load_nested_sitemap(&nested) {
                        Ok(found) => entries.extend(found),
                        Err(e) => warn!("Skipping sitemap {}: {}", nested, e),
                    }
                }
                entries
            }
        };

        info!("Sitemap {} lists {} pages", url, entries.len());

        let bar = if console::user_attended_stderr() {
            ProgressBar::new(entries.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Loading {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            )
        } else {
            ProgressBar::hidden()
        };

        let mut documents = Vec::with_capacity(entries.len());
        for entry in entries {
            bar.set_message(entry.loc.clone());
            match self.load_page(&entry.loc) {
                Ok(document) => documents.push(annotate(document, &entry)),
                Err(e) => warn!("Skipping page {}: {}", entry.loc, e),
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        info!("Loaded {} pages from sitemap {}", documents.len(), url);
        Ok(documents)
    }

    fn load_nested_sitemap(&self, url: &str) -> Result<Vec<SitemapEntry>> {
        let url = validate_url(url)?;
        match parse_sitemap(&self.fetch(&url)?)? {
            Sitemap::UrlSet(entries) => Ok(entries),
            Sitemap::Index(_) => {
                warn!("Not following nested sitemap index {}", url);
                Ok(Vec::new())
            }
        }
    }
}

fn annotate(mut document: Document, entry: &SitemapEntry) -> Document {
    for (key, value) in [
        ("lastmod", &entry.lastmod),
        ("changefreq", &entry.changefreq),
        ("priority", &entry.priority),
    ] {
        if let Some(value) = value {
            document = document.with_metadata(key, value.as_str());
        }
    }
    document
}

/// Validate that `url_str` is an absolute HTTP(S) URL with a host
#[inline]
pub fn validate_url(url_str: &str) -> Result<Url> {
    let invalid = |reason: &str| RagError::InvalidParameter {
        mode: "url".to_string(),
        parameter: url_str.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(url_str.trim()).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid("URL must use HTTP or HTTPS scheme"));
    }
    if url.host_str().is_none() {
        return Err(invalid("URL must have a valid host"));
    }
    Ok(url)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Failed to create CSS selector {}: {:?}", css, e).into())
}

/// Turn an HTML page into a document of its visible text.
///
/// Metadata: `source`, plus `title`, `description` and `language` when the
/// page declares them.
#[inline]
pub fn extract_page(html: &str, source: &str) -> Document {
    let page = Html::parse_document(html);

    let mut text = String::new();
    for node in page.tree.root().descendants() {
        let skipped = node.ancestors().any(|ancestor| {
            ancestor.value().as_element().is_some_and(|element| {
                element.name() == "head" || HIDDEN_ELEMENTS.contains(&element.name())
            })
        });
        if skipped {
            continue;
        }

        if let Some(element) = node.value().as_element() {
            if BLOCK_ELEMENTS.contains(&element.name()) {
                push_line_break(&mut text);
            }
        } else if let Some(fragment) = node.value().as_text() {
            // Text that follows a closed block element starts a new line too
            let after_block = node.prev_sibling().is_some_and(|sibling| {
                sibling
                    .value()
                    .as_element()
                    .is_some_and(|element| BLOCK_ELEMENTS.contains(&element.name()))
            });
            if after_block {
                push_line_break(&mut text);
            }
            text.push_str(fragment);
        }
    }

    let mut document = Document::new(clean_text(&text), source);

    let title = first_text(&page, "title");
    if let Some(title) = title {
        document = document.with_metadata("title", title);
    }
    if let Some(description) = first_attr(&page, r#"meta[name="description"]"#, "content") {
        document = document.with_metadata("description", description);
    }
    if let Some(language) = first_attr(&page, "html", "lang") {
        document = document.with_metadata("language", language);
    }

    debug!(
        "Extracted {} chars of text from {}",
        document.content.len(),
        source
    );
    document
}

fn push_line_break(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

fn first_text(page: &Html, css: &str) -> Option<String> {
    let selector = selector(css).ok()?;
    page.select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

fn first_attr(page: &Html, css: &str, attr: &str) -> Option<String> {
    let selector = selector(css).ok()?;
    page.select(&selector)
        .next()
        .and_then(|element| element.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Trim trailing whitespace on each line and collapse runs of blank lines
fn clean_text(text: &str) -> String {
    let text = TRAILING_SPACE_REGEX.replace_all(text, "");
    let text = BLANK_LINES_REGEX.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Parse a sitemap (`<urlset>`) or sitemap index (`<sitemapindex>`)
#[inline]
pub fn parse_sitemap(xml: &str) -> Result<Sitemap> {
    let page = Html::parse_document(xml);

    if page.select(&selector("sitemapindex")?).next().is_some() {
        let locs = page
            .select(&selector("sitemapindex > sitemap > loc")?)
            .map(|loc| loc.text().collect::<String>().trim().to_string())
            .filter(|loc| !loc.is_empty())
            .collect();
        return Ok(Sitemap::Index(locs));
    }

    if page.select(&selector("urlset")?).next().is_none() {
        return Err(RagError::http(
            "Document is neither a sitemap urlset nor a sitemap index",
        ));
    }

    let loc = selector("loc")?;
    let lastmod = selector("lastmod")?;
    let changefreq = selector("changefreq")?;
    let priority = selector("priority")?;

    let child_text = |url: &scraper::ElementRef<'_>, child: &Selector| {
        url.select(child)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|text| !text.is_empty())
    };

    let entries = page
        .select(&selector("urlset > url")?)
        .filter_map(|url| {
            Some(SitemapEntry {
                loc: child_text(&url, &loc)?,
                lastmod: child_text(&url, &lastmod),
                changefreq: child_text(&url, &changefreq),
                priority: child_text(&url, &priority),
            })
        })
        .collect();

    Ok(Sitemap::UrlSet(entries))
}
