use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const MAX_RESULTS: usize = 8;
const MAX_PAGE_CHARS: usize = 20_000;

/// Web lookups behind the `search`, `goto` and `down` commands.
pub trait WebAccess: Send + Sync {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<String>>;
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>>;
    fn download<'a>(&'a self, url: &'a str, dir: &'a Path) -> BoxFuture<'a, Result<PathBuf>>;
}

pub struct HttpWebAccess {
    http: reqwest::Client,
    search_endpoint: String,
}

impl HttpWebAccess {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("talkshell/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            search_endpoint: std::env::var("TALKSHELL_SEARCH_URL")
                .unwrap_or_else(|_| SEARCH_ENDPOINT.to_string()),
        })
    }

    async fn get_text(&self, url: &Url) -> Result<(String, bool)> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{url} returned HTTP {status}");
        }
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("html"));
        let body = response.text().await.context("failed to read response body")?;
        Ok((body, is_html))
    }
}

impl WebAccess for HttpWebAccess {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let url = Url::parse_with_params(&self.search_endpoint, &[("q", query)])
                .context("invalid search endpoint")?;
            let (html, _) = self.get_text(&url).await?;
            let results = parse_search_results(&html);
            if results.is_empty() {
                return Ok(format!("No results for '{query}'."));
            }
            Ok(results
                .iter()
                .enumerate()
                .map(|(i, r)| format!("{}. {}\n   {}\n   {}", i + 1, r.title, r.url, r.snippet))
                .collect::<Vec<_>>()
                .join("\n"))
        })
    }

    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let url = parse_web_url(url)?;
            let (body, is_html) = self.get_text(&url).await?;
            let text = if is_html { page_text(&body) } else { body };
            Ok(truncate_chars(&text, MAX_PAGE_CHARS))
        })
    }

    fn download<'a>(&'a self, url: &'a str, dir: &'a Path) -> BoxFuture<'a, Result<PathBuf>> {
        Box::pin(async move {
            let url = parse_web_url(url)?;
            let response = self
                .http
                .get(url.clone())
                .send()
                .await
                .with_context(|| format!("request to {url} failed"))?;
            if !response.status().is_success() {
                bail!("{url} returned HTTP {}", response.status());
            }
            let bytes = response.bytes().await.context("failed to read download")?;
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let target = dir.join(download_file_name(&url));
            tokio::fs::write(&target, &bytes)
                .await
                .with_context(|| format!("failed to write {}", target.display()))?;
            Ok(target)
        })
    }
}

/// Only http(s) URLs are fetched.
pub fn parse_web_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid URL '{raw}'"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => bail!("only http:// and https:// URLs are allowed, got {other}://"),
    }
}

fn download_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("download")
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SearchResult {
    title: String,
    url: String,
    snippet: String,
}

fn parse_search_results(html: &str) -> Vec<SearchResult> {
    const MARKER: &str = "class=\"result__a\"";
    let anchors: Vec<usize> = html.match_indices(MARKER).map(|(i, _)| i).collect();
    let mut results = Vec::new();
    for (n, &anchor) in anchors.iter().enumerate() {
        let end = anchors.get(n + 1).copied().unwrap_or(html.len());
        let block = &html[anchor..end];

        let href = html[..anchor]
            .rfind("href=\"")
            .and_then(|start| {
                let value = &html[start + 6..anchor];
                value.find('"').map(|end| &value[..end])
            })
            .unwrap_or_default();
        let title = between(block, ">", "</a>").map(strip_tags).unwrap_or_default();
        let snippet = block
            .find("result__snippet")
            .and_then(|p| between(&block[p..], ">", "</"))
            .map(strip_tags)
            .unwrap_or_default();

        let url = resolve_result_href(&decode_entities(href));
        if !title.is_empty() && !url.is_empty() {
            results.push(SearchResult {
                title,
                url,
                snippet,
            });
        }
        if results.len() >= MAX_RESULTS {
            break;
        }
    }
    results
}

/// Unwraps DuckDuckGo redirect links (`...?uddg=<encoded>`).
fn resolve_result_href(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or(absolute)
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let begin = text.find(start)? + start.len();
    let finish = text[begin..].find(end)?;
    Some(&text[begin..begin + finish])
}

fn page_text(html: &str) -> String {
    let body = between(html, "<body", "</body>").unwrap_or(html);
    let mut cleaned = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find("<script").or_else(|| rest.find("<style")) {
        cleaned.push_str(&rest[..start]);
        let close = if rest[start..].starts_with("<script") {
            "</script>"
        } else {
            "</style>"
        };
        rest = match rest[start..].find(close) {
            Some(end) => &rest[start + end + close.len()..],
            None => "",
        };
    }
    cleaned.push_str(rest);

    strip_tags(&cleaned)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(out.trim())
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|&semi| semi <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" | "#39" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=semi]),
        }
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\n[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}
