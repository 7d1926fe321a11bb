use anyhow::Result;
use rand::Rng;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::llm::{LlmProvider, extract_json, truncate};
use crate::models::NewListing;
use crate::search::{Page, WebClient};

/// Page text handed to the lead parser.
const LEAD_TEXT_BUDGET: usize = 15_000;
const SEARCH_RESULTS_PER_QUERY: usize = 20;

const CAREERS_LINK_HINTS: [&str; 5] = ["careers", "jobs", "join", "apply", "work with us"];

const PARSE_SYSTEM_PROMPT: &str = "You are a job posting parser. Extract the following fields \
from the page text of a job posting:\n\
- company (string)\n\
- role (string)\n\
- location (string or null)\n\
- employment_type (string or null)\n\
- description (string - a concise summary of the posting)\n\n\
Return ONLY a valid JSON object with exactly those fields.";

/// A candidate lead as produced by web search.
#[derive(Debug, Clone)]
pub struct RawLead {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new listing was created.
    Created,
    /// The source URL is already in the store; defined no-op.
    Duplicate,
    /// The lead could not be turned into a listing (fetch/parse failure,
    /// navigation artifact, missing fields). Logged, never fatal.
    Skipped,
}

#[derive(Debug, Default)]
pub struct DiscoveryStats {
    pub leads_seen: usize,
    pub created: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Deserialize)]
struct LeadDetails {
    #[serde(default)]
    company: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    employment_type: Option<String>,
    #[serde(default)]
    description: String,
}

/// Resolves and memoizes company careers pages. Strategy chain: cache,
/// URL pattern guessing, company-domain scan, web search. Exactly one
/// cache write happens per miss, success or not.
pub struct CareersResolver<'a> {
    db: &'a Database,
    web: &'a WebClient,
}

impl<'a> CareersResolver<'a> {
    pub fn new(db: &'a Database, web: &'a WebClient) -> Self {
        Self { db, web }
    }

    pub fn find_careers_url(&self, company: &str, lead_url: &str) -> Result<Option<String>> {
        if let Some(entry) = self.db.cached_careers(company)? {
            debug!("careers cache hit for {company}");
            return Ok(entry.locator().map(str::to_string));
        }

        match self.resolve(company, lead_url) {
            Some((url, note)) => {
                self.db.cache_careers(company, &url, true, note)?;
                Ok(Some(url))
            }
            None => {
                self.db.cache_careers(company, "", false, "careers url not found")?;
                Ok(None)
            }
        }
    }

    fn resolve(&self, company: &str, lead_url: &str) -> Option<(String, &'static str)> {
        for candidate in pattern_candidates(company) {
            if self.web.is_reachable(&candidate) {
                return Some((candidate, "found via pattern guess"));
            }
        }

        if let Some(host) = host_of(lead_url) {
            if !is_aggregator_host(&host) {
                if let Some(url) = self.scrape_careers_link(&host) {
                    return Some((url, "found via domain scan"));
                }
            }
        }

        match self.web.search(&format!("{company} careers page"), 1) {
            Ok(hits) => hits
                .into_iter()
                .next()
                .map(|hit| (hit.url, "found via web search")),
            Err(e) => {
                warn!("careers search failed for {company}: {e:#}");
                None
            }
        }
    }

    /// Scan the company's own front page for a careers link.
    fn scrape_careers_link(&self, host: &str) -> Option<String> {
        let root = format!("https://{host}");
        let page = match self.web.fetch_page(&root) {
            Ok(page) => page,
            Err(e) => {
                debug!("could not fetch {root}: {e:#}");
                return None;
            }
        };

        let document = Html::parse_document(&page.raw_html);
        let anchor_sel = Selector::parse("a[href]").ok()?;
        let base = url::Url::parse(&root).ok()?;

        for link in document.select(&anchor_sel) {
            let text = link.text().collect::<String>().to_lowercase();
            if !CAREERS_LINK_HINTS.iter().any(|hint| text.contains(hint)) {
                continue;
            }
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Ok(full) = base.join(href) else {
                continue;
            };
            let full = full.to_string();
            if self.web.is_reachable(&full) {
                return Some(full);
            }
        }
        None
    }
}

/// Gates which discovered leads become listings: URL dedup, careers
/// resolution, ghost verification. Verification failure tags the listing
/// rather than dropping it -- a human can still rescue a real posting.
pub struct DiscoveryGuard<'a> {
    db: &'a Database,
    web: &'a WebClient,
    provider: &'a dyn LlmProvider,
    config: &'a Config,
    resolver: CareersResolver<'a>,
}

impl<'a> DiscoveryGuard<'a> {
    pub fn new(
        db: &'a Database,
        web: &'a WebClient,
        provider: &'a dyn LlmProvider,
        config: &'a Config,
    ) -> Self {
        Self {
            db,
            web,
            provider,
            config,
            resolver: CareersResolver::new(db, web),
        }
    }

    /// One discovery pass over all configured search queries.
    pub fn run(&self) -> Result<DiscoveryStats> {
        let mut stats = DiscoveryStats::default();
        let queries = build_queries(&self.config.keywords, &self.config.locations);
        if queries.is_empty() {
            info!("no search keywords configured, discovery pass is a no-op");
            return Ok(stats);
        }

        for query in &queries {
            info!("searching: {query}");
            let hits = match self.web.search(query, SEARCH_RESULTS_PER_QUERY) {
                Ok(hits) => hits,
                Err(e) => {
                    warn!("search failed for '{query}': {e:#}");
                    stats.errors += 1;
                    continue;
                }
            };

            for hit in hits {
                stats.leads_seen += 1;
                let lead = RawLead {
                    title: hit.title,
                    url: hit.url,
                    snippet: hit.snippet,
                    source: "web_search".to_string(),
                };
                match self.ingest(&lead) {
                    Ok(IngestOutcome::Created) => stats.created += 1,
                    Ok(IngestOutcome::Duplicate) => stats.duplicates += 1,
                    Ok(IngestOutcome::Skipped) => stats.skipped += 1,
                    Err(e) => {
                        warn!("failed to ingest {}: {e:#}", lead.url);
                        stats.errors += 1;
                    }
                }
            }

            // Politeness delay between queries
            let pause = rand::thread_rng().gen_range(1.0..3.0);
            std::thread::sleep(Duration::from_secs_f64(pause));
        }

        info!(
            "discovery pass done: {} seen, {} created, {} duplicates, {} skipped, {} errors",
            stats.leads_seen, stats.created, stats.duplicates, stats.skipped, stats.errors
        );
        Ok(stats)
    }

    /// Decide whether one lead may enter the store. Network and parse
    /// faults are contained here; only store failures propagate.
    pub fn ingest(&self, lead: &RawLead) -> Result<IngestOutcome> {
        let Some(url) = clean_tracking_url(&lead.url) else {
            return Ok(IngestOutcome::Skipped);
        };

        if is_navigation_artifact(&lead.title) {
            debug!("skipping navigation artifact: {} ({})", lead.title, lead.snippet);
            return Ok(IngestOutcome::Skipped);
        }

        if self.db.listing_for_url(&url)?.is_some() {
            debug!("skipping duplicate: {url}");
            return Ok(IngestOutcome::Duplicate);
        }

        let page = match self.web.fetch_page(&url) {
            Ok(page) => page,
            Err(e) => {
                warn!("could not fetch lead {url}: {e:#}");
                return Ok(IngestOutcome::Skipped);
            }
        };
        if page.text.trim().is_empty() {
            return Ok(IngestOutcome::Skipped);
        }

        let details = match self.parse_lead(&page, &url) {
            Ok(details) => details,
            Err(e) => {
                warn!("could not parse lead {url}: {e:#}");
                return Ok(IngestOutcome::Skipped);
            }
        };
        if details.company.trim().is_empty() || details.role.trim().is_empty() {
            warn!("lead {url} missing company or role, skipping");
            return Ok(IngestOutcome::Skipped);
        }

        let careers_url = self
            .resolver
            .find_careers_url(&details.company, &url)?;
        let verified = self.verify(&details.role, &url, careers_url.as_deref());

        let description = if details.description.trim().is_empty() {
            truncate(&page.text, LEAD_TEXT_BUDGET).to_string()
        } else {
            details.description
        };

        let new = NewListing {
            url,
            company: details.company,
            role: details.role,
            description,
            location: details.location,
            employment_type: details.employment_type,
            source: lead.source.clone(),
            careers_url,
            careers_page_verified: verified,
        };

        match self.db.insert_listing(&new)? {
            Some(key) => {
                info!(
                    "new listing {key}: {} / {} (verified={verified})",
                    new.company, new.role
                );
                self.db.audit(
                    Some(&key),
                    "discovered",
                    &format!("{} / {} via {}", new.company, new.role, new.source),
                )?;
                Ok(IngestOutcome::Created)
            }
            None => Ok(IngestOutcome::Duplicate),
        }
    }

    /// Ghost-listing check. A lead living on the careers host is verified
    /// by definition and needs no fetch; otherwise the careers page must
    /// mention the role title.
    fn verify(&self, role: &str, lead_url: &str, careers_url: Option<&str>) -> bool {
        let Some(careers) = careers_url else {
            return false;
        };

        if let (Some(lead_host), Some(careers_host)) = (host_of(lead_url), host_of(careers)) {
            if lead_host == careers_host {
                debug!("lead is on the careers host, self-verified");
                return true;
            }
        }

        match self.web.fetch_page(careers) {
            Ok(page) => {
                let matched = page_matches_title(&page.text, role);
                if !matched {
                    info!("'{role}' not found on {careers}, possible ghost listing");
                }
                matched
            }
            Err(e) => {
                warn!("could not fetch careers page {careers}: {e:#}");
                false
            }
        }
    }

    fn parse_lead(&self, page: &Page, url: &str) -> Result<LeadDetails> {
        let user = format!(
            "URL: {url}\n\nPAGE TITLE: {}\n\nPAGE TEXT:\n{}",
            page.title,
            truncate(&page.text, LEAD_TEXT_BUDGET)
        );
        let response = self.provider.complete(PARSE_SYSTEM_PROMPT, &user, 2048)?;
        extract_json(&response)
    }
}

// --- Lead and URL helpers ---

/// Strip tracking query parameters and fragments so equal postings key
/// equally. Empty input yields None.
pub fn clean_tracking_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return None;
    }
    let end = trimmed
        .find(['?', '#'])
        .unwrap_or(trimmed.len());
    Some(trimmed[..end].to_string())
}

pub fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .host_str()
        .map(|h| h.to_lowercase())
}

/// Aggregator hosts never count as a company's own domain.
pub fn is_aggregator_host(host: &str) -> bool {
    host.contains("linkedin.") || host.contains("indeed.")
}

/// Candidate careers URLs from the company name alone.
pub fn pattern_candidates(company: &str) -> Vec<String> {
    let slug: String = company
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if slug.is_empty() {
        return Vec::new();
    }
    vec![
        format!("https://careers.{slug}.com"),
        format!("https://{slug}.com/careers"),
        format!("https://{slug}.com/jobs"),
        format!("https://www.{slug}.com/careers"),
    ]
}

/// Significant words of a role title: lowercased, split on anything
/// non-alphanumeric, short connectives dropped.
pub fn significant_title_words(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_string)
        .collect()
}

/// The ghost heuristic: at least 2 of the first 3 significant title
/// words must appear in the page text.
pub fn page_matches_title(page_text: &str, title: &str) -> bool {
    let words = significant_title_words(title);
    let probe: Vec<&String> = words.iter().take(3).collect();
    if probe.is_empty() {
        return false;
    }
    let haystack = page_text.to_lowercase();
    let matches = probe.iter().filter(|w| haystack.contains(w.as_str())).count();
    matches >= 2
}

/// Search-result titles that are site chrome rather than postings.
fn is_navigation_artifact(title: &str) -> bool {
    let trimmed = title.trim();
    if trimmed.len() < 10 {
        return true;
    }
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(^jobs\s+in\s)|(\sjobs$)|(^see\s+all\b)|(^view\s+all\b)|(^search\s)|(unsubscribe)")
            .ok()
    })
    .as_ref()
    .map(|re| re.is_match(trimmed))
    .unwrap_or(false)
}

fn build_queries(keywords: &[String], locations: &[String]) -> Vec<String> {
    const SITE_FILTER: &str = "site:greenhouse.io OR site:lever.co OR site:workday.com";
    let mut queries = Vec::new();
    for keyword in keywords {
        if locations.is_empty() {
            queries.push(format!("{keyword} jobs {SITE_FILTER}"));
        } else {
            for location in locations {
                queries.push(format!("{keyword} jobs in {location} {SITE_FILTER}"));
            }
        }
    }
    queries
}
