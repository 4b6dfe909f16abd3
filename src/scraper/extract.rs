//! Article extraction.
//!
//! Readability supplies the main text and cleaned HTML. Everything else is
//! recovered from the raw DOM with ordered selector strategies: the first
//! strategy that yields a usable value wins, so list order is priority.

use ::scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

use super::dates::parse_date;
use crate::models::ContentRecord;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("readability failed: {0}")]
    Readability(String),

    #[error("invalid selector {selector:?}: {message}")]
    Selector {
        selector: &'static str,
        message: String,
    },
}

/// Where a strategy reads its value from.
#[derive(Debug, Clone, Copy)]
enum Read {
    Text,
    Content,
    /// `datetime` attribute when present, text otherwise.
    DateTime,
}

struct Strategy {
    selector: Selector,
    read: Read,
}

impl Strategy {
    fn value(&self, element: ElementRef<'_>) -> Option<String> {
        let raw = match self.read {
            Read::Text => element.text().collect::<String>(),
            Read::Content => element.value().attr("content")?.to_string(),
            Read::DateTime => match element.value().attr("datetime") {
                Some(value) => value.to_string(),
                None => element.text().collect::<String>(),
            },
        };
        let value = raw.replace('\0', "").trim().to_string();
        (!value.is_empty()).then_some(value)
    }
}

const META_KEYWORDS: &[&str] = &["meta[name='keywords']", "meta[property='keywords']"];

const META_DESCRIPTION: &[&str] = &[
    "meta[name='description']",
    "meta[property='description']",
    "meta[property='og:description']",
];

const AUTHOR: &[&str] = &[
    "[itemprop='author']",
    ".author",
    ".article-author",
    ".post-author",
    "meta[name='author']",
    "meta[property='article:author']",
];

const CATEGORY: &[&str] = &[
    "[itemprop='articleSection']",
    ".category",
    ".article-category",
    ".post-category",
    ".breadcrumb a:last-child",
    "meta[property='article:section']",
];

const TAG_LINKS: &[&str] = &[".tags a", ".tag a", ".keywords a", "[rel='tag']", ".article-tags a"];

const LEAD_IMAGE: &[&str] = &["meta[property='og:image']", "meta[name='twitter:image']"];

const ARTICLE_IMAGES: &[&str] = &[
    "article img",
    ".article-content img",
    ".content img",
    "[itemprop='articleBody'] img",
];

const PUBLISHED: &[&str] = &[
    "meta[property='article:published_time']",
    "meta[name='publishdate']",
    "meta[name='pubdate']",
    "[itemprop='datePublished']",
    ".published",
    ".article-date",
    ".post-date",
    "time[datetime]",
];

const SOCIAL_META: &str = "meta[property^='og:'], meta[name^='twitter:']";

/// Compiled selector tables. Build once and share.
pub struct Strategies {
    keywords: Vec<Strategy>,
    description: Vec<Strategy>,
    author: Vec<Strategy>,
    category: Vec<Strategy>,
    tags: Vec<Strategy>,
    lead_image: Vec<Strategy>,
    images: Vec<Selector>,
    published: Vec<Strategy>,
    social: Selector,
}

fn parse_selector(selector: &'static str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::Selector {
        selector,
        message: e.to_string(),
    })
}

/// Meta selectors read `content`; everything else reads `default`.
fn table(selectors: &[&'static str], default: Read) -> Result<Vec<Strategy>, ExtractError> {
    selectors
        .iter()
        .map(|&s| -> Result<Strategy, ExtractError> {
            let read = if s.starts_with("meta") { Read::Content } else { default };
            Ok(Strategy {
                selector: parse_selector(s)?,
                read,
            })
        })
        .collect()
}

impl Strategies {
    pub fn compile() -> Result<Self, ExtractError> {
        Ok(Self {
            keywords: table(META_KEYWORDS, Read::Content)?,
            description: table(META_DESCRIPTION, Read::Content)?,
            author: table(AUTHOR, Read::Text)?,
            category: table(CATEGORY, Read::Text)?,
            tags: table(TAG_LINKS, Read::Text)?,
            lead_image: table(LEAD_IMAGE, Read::Content)?,
            images: ARTICLE_IMAGES
                .iter()
                .map(|&s| parse_selector(s))
                .collect::<Result<_, _>>()?,
            published: table(PUBLISHED, Read::DateTime)?,
            social: parse_selector(SOCIAL_META)?,
        })
    }
}

/// First value accepted by `accept`, walking strategies in order and
/// elements in document order.
fn first_found<T>(
    doc: &Html,
    strategies: &[Strategy],
    accept: impl Fn(String) -> Option<T>,
) -> Option<T> {
    strategies.iter().find_map(|strategy| {
        doc.select(&strategy.selector)
            .filter_map(|element| strategy.value(element))
            .find_map(&accept)
    })
}

fn all_found<'a>(doc: &'a Html, strategies: &'a [Strategy]) -> impl Iterator<Item = String> + 'a {
    strategies.iter().flat_map(move |strategy| {
        doc.select(&strategy.selector)
            .filter_map(move |element| strategy.value(element))
    })
}

/// Builds an unvalidated record from a decoded page.
pub fn extract(html: &str, url: &Url, strategies: &Strategies) -> Result<ContentRecord, ExtractError> {
    let product = readability::extractor::extract(&mut html.as_bytes(), url)
        .map_err(|e| ExtractError::Readability(format!("{e:?}")))?;

    let mut record = ContentRecord {
        full_text: normalize_text(&product.text),
        content_html: product.content.replace('\0', ""),
        ..Default::default()
    };

    let doc = Html::parse_document(html);

    record.meta_keywords = first_found(&doc, &strategies.keywords, Some).unwrap_or_default();
    record.meta_description = first_found(&doc, &strategies.description, Some).unwrap_or_default();
    record.meta_data = social_metadata(&doc, &strategies.social);
    record.category = first_found(&doc, &strategies.category, Some).unwrap_or_default();
    record.author = first_found(&doc, &strategies.author, Some).unwrap_or_default();
    record.published_at = first_found(&doc, &strategies.published, |v| parse_date(&v));

    for keyword in record.meta_keywords.clone().split(',') {
        record.push_tag(keyword);
    }
    for tag in all_found(&doc, &strategies.tags) {
        record.push_tag(&tag);
    }

    if let Some(lead) = first_found(&doc, &strategies.lead_image, Some) {
        record.push_image(&normalize_image_url(&lead));
    }
    for selector in &strategies.images {
        for img in doc.select(selector) {
            let src = img
                .value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"))
                .map(|s| s.replace('\0', ""));
            if let Some(src) = src.filter(|s| !s.trim().is_empty()) {
                record.push_image(&normalize_image_url(src.trim()));
            }
        }
    }

    Ok(record)
}

/// Open Graph and Twitter card properties. `:` in keys becomes `_`.
fn social_metadata(doc: &Html, selector: &Selector) -> std::collections::BTreeMap<String, String> {
    let mut out = std::collections::BTreeMap::new();
    for meta in doc.select(selector) {
        let element = meta.value();
        let key = element
            .attr("property")
            .filter(|k| !k.is_empty())
            .or_else(|| element.attr("name"));
        if let (Some(key), Some(value)) = (key, element.attr("content")) {
            out.entry(key.replace(':', "_"))
                .or_insert_with(|| value.replace('\0', ""));
        }
    }
    out
}

fn normalize_image_url(src: &str) -> String {
    match src.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => src.to_string(),
    }
}

/// Trims each line, collapses inner whitespace runs and drops blank lines.
fn normalize_text(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
