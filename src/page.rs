//! Document-source profiles and page metadata.
//!
//! A profile tells waymark how to read pages from one source: which hosts
//! belong to it, which element holds the article body, and whether the
//! MediaWiki page guard applies. Page metadata supplies the `DocumentKey`
//! that spans are stored under.

use glob::Pattern;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::{ContentBoundary, Document, ExtractionRules};
use crate::domain::DocumentKey;
use crate::healing::HealingSettings;

/// Element id of the MediaWiki article body
pub const MEDIAWIKI_CONTENT_ROOT: &str = "mw-content-text";

/// Source code used when no profile matches
pub const UNKNOWN_SOURCE: &str = "unknown";

const UNDEFINED_AUTHOR: &str = "Undefined";

/// How to read pages from one document source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
    /// Short source code stored with every span (e.g. "bw")
    pub code: String,

    /// Host glob patterns (e.g. "*.bahai.works")
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Element id of the content boundary; empty means `<body>`
    #[serde(default = "default_content_root")]
    pub content_root: String,

    /// Apply the MediaWiki page guard
    #[serde(default = "default_mediawiki")]
    pub mediawiki: bool,

    /// Override of the healer's relative length tolerance
    #[serde(default)]
    pub length_tolerance: Option<f64>,
}

fn default_content_root() -> String {
    MEDIAWIKI_CONTENT_ROOT.to_string()
}

fn default_mediawiki() -> bool {
    true
}

impl SourceProfile {
    pub fn new(code: impl Into<String>, hosts: &[&str]) -> Self {
        Self {
            code: code.into(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            content_root: default_content_root(),
            mediawiki: default_mediawiki(),
            length_tolerance: None,
        }
    }

    /// Whether a hostname belongs to this source
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|raw| match Pattern::new(&raw.to_ascii_lowercase()) {
            Ok(pattern) => pattern.matches(&host),
            Err(e) => {
                warn!(profile = %self.code, pattern = %raw, error = %e, "Invalid host pattern");
                false
            }
        })
    }

    /// Extraction rules for pages of this source
    pub fn extraction_rules(&self) -> ExtractionRules {
        if self.content_root.is_empty() {
            ExtractionRules::with_boundary(ContentBoundary::Body)
        } else {
            ExtractionRules::with_boundary(ContentBoundary::ElementId(self.content_root.clone()))
        }
    }

    /// Healer settings with this profile's tolerance applied
    pub fn healing_settings(&self, base: &HealingSettings) -> HealingSettings {
        match self.length_tolerance {
            Some(tolerance) => base.clone().with_tolerance(tolerance),
            None => base.clone(),
        }
    }
}

/// Built-in profiles for the three known wikis
pub fn default_profiles() -> Vec<SourceProfile> {
    vec![
        SourceProfile::new("bw", &["bahai.works", "*.bahai.works"]),
        SourceProfile::new("bp", &["bahaipedia.org", "*.bahaipedia.org"]),
        SourceProfile::new("bd", &["bahaidata.org", "*.bahaidata.org"]),
    ]
}

/// First profile whose host patterns match
pub fn profile_for_host<'a>(profiles: &'a [SourceProfile], host: &str) -> Option<&'a SourceProfile> {
    profiles.iter().find(|p| p.matches_host(host))
}

/// Metadata scraped from a rendered page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub source_code: String,
    pub page_id: u64,
    pub revision_id: u64,
    pub url: String,
    pub title: String,
    pub author: String,
}

impl PageMetadata {
    /// Scrape metadata from a page
    ///
    /// `markup` is the raw page source; page and revision ids live in
    /// inline scripts, so they are read from the source rather than from
    /// the parsed tree.
    pub fn scrape(url: &str, profiles: &[SourceProfile], doc: &Document, markup: &str) -> Self {
        let source_code = host_of(url)
            .and_then(|host| profile_for_host(profiles, &host))
            .map(|p| p.code.clone())
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

        let page_id = scrape_config_var(markup, "wgArticleId").unwrap_or(0);
        if page_id == 0 {
            debug!(url = %url, "No wgArticleId found in page source");
        }

        Self {
            source_code,
            page_id,
            revision_id: scrape_config_var(markup, "wgCurRevisionId").unwrap_or(0),
            url: url.to_string(),
            title: page_title(doc),
            author: page_author(doc),
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.source_code.clone(), self.page_id)
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(|h| h.to_string())
}

/// Read `"name": N` (JSON config) or `name = N` (legacy globals)
fn scrape_config_var(markup: &str, name: &str) -> Option<u64> {
    let quoted = format!("\"{}\"", name);
    find_assignment(markup, &quoted, ':').or_else(|| find_assignment(markup, name, '='))
}

fn find_assignment(haystack: &str, key: &str, separator: char) -> Option<u64> {
    haystack.match_indices(key).find_map(|(pos, _)| {
        let rest = haystack[pos + key.len()..].trim_start();
        let rest = rest.strip_prefix(separator)?.trim_start();
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        rest[..digits_end].parse().ok()
    })
}

/// `<title>` text up to the first " - "
fn page_title(doc: &Document) -> String {
    let title = doc
        .first_element_by_tag("title")
        .map(|node| doc.text_content(node))
        .unwrap_or_default();
    title
        .split(" - ")
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn page_author(doc: &Document) -> String {
    if let Some(header) = doc.element_by_id("header_author_text") {
        let text = match doc.find_element(header, |e| e.has_class("fn")) {
            Some(fn_node) => doc.text_content(fn_node),
            None => doc.text_content(header),
        };
        let text = text.trim();
        return if text.is_empty() {
            UNDEFINED_AUTHOR.to_string()
        } else {
            text.to_string()
        };
    }

    let meta = doc.find_element(doc.root(), |e| {
        e.tag == "meta" && e.attr("name") == Some("author")
    });
    meta.and_then(|node| doc.element(node))
        .and_then(|e| e.attr("content"))
        .filter(|content| !content.is_empty())
        .unwrap_or(UNDEFINED_AUTHOR)
        .to_string()
}

/// Why a page view stays hibernating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hibernation {
    /// Not the read view (edit, history, ...)
    NotReadView,
    SpecialPage,
    DiffView,
    VisualEditorActive,
    /// No usable document key
    MissingKey,
}

/// Decide whether a page may be annotated
pub fn check_page(
    url: &str,
    profile: Option<&SourceProfile>,
    doc: &Document,
    key: &DocumentKey,
) -> Result<(), Hibernation> {
    if profile.map(|p| p.mediawiki).unwrap_or(false) {
        let body = doc
            .first_element_by_tag("body")
            .and_then(|node| doc.element(node));
        let has = |class: &str| body.map(|b| b.has_class(class)).unwrap_or(false);

        if !has("action-view") {
            return Err(Hibernation::NotReadView);
        }
        if has("ns-special") || has("ns--1") {
            return Err(Hibernation::SpecialPage);
        }
        let is_diff = Url::parse(url)
            .ok()
            .and_then(|u| u.query().map(|q| q.contains("diff=")))
            .unwrap_or_else(|| url.contains("diff="));
        if is_diff {
            return Err(Hibernation::DiffView);
        }
        if has("ve-active") {
            return Err(Hibernation::VisualEditorActive);
        }
    }

    if !key.is_complete() {
        return Err(Hibernation::MissingKey);
    }
    Ok(())
}
