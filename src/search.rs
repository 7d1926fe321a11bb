use anyhow::{Context, Result, anyhow};
use scraper::{Html, Selector};
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// One search result lead.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A fetched page: rendered text plus the raw markup.
#[derive(Debug, Clone)]
pub struct Page {
    pub title: String,
    pub text: String,
    pub raw_html: String,
}

/// Blocking HTTP client for searches and page fetches. Every request
/// carries the configured timeout.
pub struct WebClient {
    client: reqwest::blocking::Client,
}

impl WebClient {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Text search against the DuckDuckGo HTML endpoint.
    pub fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[("q", query)])
            .send()
            .with_context(|| format!("Search request failed for '{query}'"))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Search for '{}' returned status {}",
                query,
                response.status()
            ));
        }

        let body = response.text().context("Failed to read search response")?;
        Ok(parse_search_results(&body, max_results))
    }

    /// Fetch a page and extract its visible text.
    pub fn fetch_page(&self, url: &str) -> Result<Page> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to fetch {url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("Fetching {} returned status {}", url, response.status()));
        }

        let raw_html = response.text().context("Failed to read page body")?;
        let document = Html::parse_document(&raw_html);

        let title = Selector::parse("title")
            .ok()
            .and_then(|sel| document.select(&sel).next())
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let text = visible_text(&document);

        Ok(Page { title, text, raw_html })
    }

    /// Cheap reachability probe for candidate URLs.
    pub fn is_reachable(&self, url: &str) -> bool {
        self.client
            .head(url)
            .send()
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

/// Pull `(title, url, snippet)` triples out of a DuckDuckGo HTML results
/// page. Result links are redirect-wrapped; see `decode_result_href`.
fn parse_search_results(body: &str, max_results: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(body);
    let (Some(result_sel), Some(link_sel), Some(snippet_sel)) = (
        Selector::parse("div.result").ok(),
        Selector::parse("a.result__a").ok(),
        Selector::parse(".result__snippet").ok(),
    ) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for result in document.select(&result_sel) {
        if hits.len() >= max_results {
            break;
        }
        let Some(link) = result.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(url) = decode_result_href(href) else {
            continue;
        };
        let title = link.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }
        let snippet = result
            .select(&snippet_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        hits.push(SearchHit { title, url, snippet });
    }
    hits
}

/// DuckDuckGo wraps result links as `//duckduckgo.com/l/?uddg=<encoded>`.
/// Unwrap to the target URL; plain http(s) hrefs pass through.
fn decode_result_href(href: &str) -> Option<String> {
    let absolute = if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        href.to_string()
    };

    let parsed = url::Url::parse(&absolute).ok()?;
    if parsed.domain() == Some("duckduckgo.com") {
        return parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }
    match parsed.scheme() {
        "http" | "https" => Some(absolute),
        _ => None,
    }
}

/// Text a reader would see: every text node except script/style/template
/// noise, whitespace collapsed.
fn visible_text(document: &Html) -> String {
    let mut out = String::new();
    for node in document.tree.nodes() {
        let scraper::Node::Text(text) = node.value() else {
            continue;
        };
        let skip = node
            .parent()
            .map(|parent| match parent.value() {
                scraper::Node::Element(el) => {
                    matches!(el.name(), "script" | "style" | "noscript" | "template")
                }
                _ => false,
            })
            .unwrap_or(false);
        if !skip {
            out.push_str(text);
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_result_href_unwraps_redirect() {
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Facme.com%2Fcareers&rut=abc";
        assert_eq!(
            decode_result_href(href),
            Some("https://acme.com/careers".to_string())
        );
    }

    #[test]
    fn test_decode_result_href_passes_plain_urls() {
        assert_eq!(
            decode_result_href("https://acme.com/jobs/1"),
            Some("https://acme.com/jobs/1".to_string())
        );
        assert_eq!(decode_result_href("javascript:void(0)"), None);
        assert_eq!(decode_result_href("not a url"), None);
    }

    #[test]
    fn test_parse_search_results() {
        let body = r#"
            <html><body>
            <div class="result">
                <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fboards.greenhouse.io%2Facme%2F1">Platform Engineer - Acme</a>
                <a class="result__snippet">Build the platform at Acme.</a>
            </div>
            <div class="result">
                <a class="result__a" href="https://jobs.lever.co/beta/2">Rust Engineer</a>
                <a class="result__snippet">Ship Rust services.</a>
            </div>
            <div class="result"><span>no link here</span></div>
            </body></html>
        "#;

        let hits = parse_search_results(body, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://boards.greenhouse.io/acme/1");
        assert_eq!(hits[0].title, "Platform Engineer - Acme");
        assert_eq!(hits[0].snippet, "Build the platform at Acme.");
        assert_eq!(hits[1].url, "https://jobs.lever.co/beta/2");

        let capped = parse_search_results(body, 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_visible_text_skips_script_and_style() {
        let document = Html::parse_document(
            "<html><head><style>.x{color:red}</style></head>\
             <body><h1>Senior  Platform\nEngineer</h1>\
             <script>var hidden = 1;</script><p>Remote, full time</p></body></html>",
        );
        let text = visible_text(&document);
        assert!(text.contains("Senior Platform Engineer"));
        assert!(text.contains("Remote, full time"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains("color:red"));
    }
}
