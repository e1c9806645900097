//! Queryable document capability.
//!
//! Extraction runs against [`QueryableDocument`] so the same rules apply to a
//! parsed static response ([`StaticDocument`]) and to a live browser tab
//! (`crate::browser::LiveDocument`).

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).unwrap()
});

static BACKGROUND_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)background(?:-image)?\s*:\s*([^;}]+)").unwrap()
});

/// Element selection, attribute reads and style lookup over a rendered page.
pub trait QueryableDocument {
    type Node<'a>
    where
        Self: 'a;

    /// URL relative references resolve against.
    fn base_url(&self) -> &Url;

    /// Full markup of the document.
    fn markup(&self) -> Result<String>;

    fn select<'a>(&'a self, selector: &str) -> Result<Vec<Self::Node<'a>>>;

    /// First descendant of `scope` matching `selector`.
    fn select_in<'a>(&'a self, scope: &Self::Node<'a>, selector: &str) -> Result<Option<Self::Node<'a>>>;

    fn attr(&self, node: &Self::Node<'_>, name: &str) -> Option<String>;

    fn text(&self, node: &Self::Node<'_>) -> Option<String>;

    /// `background-image` URL applied to `node`, if any.
    fn background_image(&self, node: &Self::Node<'_>) -> Option<String>;

    /// Every background image URL declared in the document.
    fn background_images(&self) -> Result<Vec<String>> {
        let nodes = self.select("[style]")?;
        Ok(nodes.iter().filter_map(|n| self.background_image(n)).collect())
    }
}

/// Document parsed from raw markup.
pub struct StaticDocument {
    html: Html,
    markup: String,
    base_url: Url,
}

impl StaticDocument {
    pub fn parse(markup: impl Into<String>, base_url: Url) -> Self {
        let markup = markup.into();
        Self {
            html: Html::parse_document(&markup),
            markup,
            base_url,
        }
    }

    pub fn has_match(&self, selector: &str) -> Result<bool> {
        let selector = parse_selector(selector)?;
        Ok(self.html.select(&selector).next().is_some())
    }
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|_| anyhow!("invalid selector `{}`", selector))
}

/// First `url(...)` of a background declaration list.
pub fn background_url_from_style(style: &str) -> Option<String> {
    BACKGROUND_DECL
        .captures_iter(style)
        .filter_map(|decl| CSS_URL.captures(decl.get(1)?.as_str()))
        .filter_map(|url| url.get(1).map(|m| m.as_str().trim().to_string()))
        .find(|url| !url.is_empty())
}

impl QueryableDocument for StaticDocument {
    type Node<'a> = ElementRef<'a> where Self: 'a;

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn markup(&self) -> Result<String> {
        Ok(self.markup.clone())
    }

    fn select<'a>(&'a self, selector: &str) -> Result<Vec<ElementRef<'a>>> {
        let selector = parse_selector(selector)?;
        Ok(self.html.select(&selector).collect())
    }

    fn select_in<'a>(&'a self, scope: &ElementRef<'a>, selector: &str) -> Result<Option<ElementRef<'a>>> {
        let selector = parse_selector(selector)?;
        Ok(scope.select(&selector).next())
    }

    fn attr(&self, node: &ElementRef<'_>, name: &str) -> Option<String> {
        node.value().attr(name).map(|s| s.to_string())
    }

    fn text(&self, node: &ElementRef<'_>) -> Option<String> {
        let text = node.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn background_image(&self, node: &ElementRef<'_>) -> Option<String> {
        background_url_from_style(node.value().attr("style")?)
    }

    // Inline declarations plus rules in <style> blocks.
    fn background_images(&self) -> Result<Vec<String>> {
        let mut urls: Vec<String> = self
            .select("[style]")?
            .iter()
            .filter_map(|n| self.background_image(n))
            .collect();

        for block in self.select("style")? {
            let css = block.text().collect::<String>();
            for decl in BACKGROUND_DECL.captures_iter(&css) {
                if let Some(value) = decl.get(1) {
                    urls.extend(
                        CSS_URL
                            .captures_iter(value.as_str())
                            .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string())),
                    );
                }
            }
        }
        Ok(urls)
    }
}
