//! Dataset extraction from a converged page.

use std::collections::HashSet;

use anyhow::Result as AnyResult;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info};

use crate::document::QueryableDocument;
use crate::error::{Result, ScrapeError, Stage};
use crate::records::{CardField, FieldRead, JsonField, Record, RecordSchema, SENTINEL};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").unwrap());

/// One dataset the caller wants out of the page.
#[derive(Debug, Clone)]
pub enum DatasetRequest {
    Links,
    Images,
    Emails,
    Records { name: String, schema: RecordSchema },
}

impl DatasetRequest {
    /// Key of the dataset in the output artifact.
    pub fn name(&self) -> &str {
        match self {
            DatasetRequest::Links => "links",
            DatasetRequest::Images => "images",
            DatasetRequest::Emails => "emails",
            DatasetRequest::Records { name, .. } => name,
        }
    }

    /// Whether the dataset can be read from a JSON payload.
    pub fn supports_json(&self) -> bool {
        match self {
            DatasetRequest::Emails => true,
            DatasetRequest::Records { schema, .. } => schema.is_json(),
            DatasetRequest::Links | DatasetRequest::Images => false,
        }
    }

    /// Whether the dataset can be read from an HTML document.
    pub fn supports_document(&self) -> bool {
        match self {
            DatasetRequest::Records { schema, .. } => !schema.is_json(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Items {
    Strings(Vec<String>),
    Records(Vec<Record>),
}

/// A named, typed collection extracted from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub name: String,
    pub items: Items,
}

impl ExtractionResult {
    pub fn strings(name: &str, items: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            items: Items::Strings(items),
        }
    }

    pub fn records(name: &str, items: Vec<Record>) -> Self {
        Self {
            name: name.to_string(),
            items: Items::Records(items),
        }
    }

    pub fn len(&self) -> usize {
        match &self.items {
            Items::Strings(v) => v.len(),
            Items::Records(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Value {
        match &self.items {
            Items::Strings(v) => serde_json::json!(v),
            Items::Records(v) => serde_json::to_value(v).unwrap_or_else(|_| Value::Array(vec![])),
        }
    }
}

/// Extract every requested dataset from a document.
pub fn extract_document<D: QueryableDocument>(
    doc: &D,
    requests: &[DatasetRequest],
) -> Result<Vec<ExtractionResult>> {
    let url = doc.base_url().to_string();
    let stage_err = |e: anyhow::Error| ScrapeError::fetch(Stage::Extract, url.clone(), e);

    let mut results = Vec::with_capacity(requests.len());
    for request in requests {
        let result = match request {
            DatasetRequest::Links => ExtractionResult::strings("links", extract_links(doc).map_err(stage_err)?),
            DatasetRequest::Images => ExtractionResult::strings("images", extract_images(doc).map_err(stage_err)?),
            DatasetRequest::Emails => {
                let markup = doc.markup().map_err(stage_err)?;
                ExtractionResult::strings("emails", extract_emails(&markup))
            }
            DatasetRequest::Records { name, schema } => match schema {
                RecordSchema::Cards { card_selector, fields } => {
                    debug!("mapping `{}` cards into {:?}", card_selector, schema.field_names());
                    let records = map_card_records(doc, card_selector, fields).map_err(stage_err)?;
                    ExtractionResult::records(name, records)
                }
                RecordSchema::Json { .. } => {
                    return Err(ScrapeError::SchemaMismatch {
                        url: url.clone(),
                        dataset: name.clone(),
                        description: "JSON record schema applied to an HTML document".to_string(),
                    })
                }
            },
        };
        info!("📦 {}: {} raw item(s)", result.name, result.len());
        results.push(result);
    }
    Ok(results)
}

/// Extract every requested dataset from a JSON payload.
pub fn extract_json(value: &Value, source_url: &str, requests: &[DatasetRequest]) -> Result<Vec<ExtractionResult>> {
    let mut results = Vec::with_capacity(requests.len());
    for request in requests {
        let mismatch = |description: String| ScrapeError::SchemaMismatch {
            url: source_url.to_string(),
            dataset: request.name().to_string(),
            description,
        };

        let result = match request {
            DatasetRequest::Emails => ExtractionResult::strings("emails", extract_emails(&value.to_string())),
            DatasetRequest::Records { name, schema: schema @ RecordSchema::Json { pointer, fields } } => {
                debug!("mapping `{}` items into {:?}", name, schema.field_names());
                let records = map_json_records(value, pointer.as_deref(), fields).map_err(mismatch)?;
                ExtractionResult::records(name, records)
            }
            other => {
                return Err(mismatch(format!(
                    "`{}` needs an HTML document but the resource is {}",
                    other.name(),
                    describe(value)
                )))
            }
        };
        info!("📦 {}: {} raw item(s)", result.name, result.len());
        results.push(result);
    }
    Ok(results)
}

/// Resolve `raw` against `base`; only URLs with a host survive.
pub fn resolve_url(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match base.join(raw) {
        Ok(url) if url.has_host() => Some(url.to_string()),
        Ok(url) => {
            debug!("dropping host-less URL {}", url);
            None
        }
        Err(_) => None,
    }
}

pub fn extract_links<D: QueryableDocument>(doc: &D) -> AnyResult<Vec<String>> {
    let base = doc.base_url();
    Ok(doc
        .select("a[href]")?
        .iter()
        .filter_map(|a| doc.attr(a, "href"))
        .filter_map(|href| resolve_url(base, &href))
        .collect())
}

pub fn extract_images<D: QueryableDocument>(doc: &D) -> AnyResult<Vec<String>> {
    let base = doc.base_url();
    let mut raw = Vec::new();

    for img in doc.select("img")? {
        if let Some(src) = doc.attr(&img, "src").or_else(|| doc.attr(&img, "data-src")) {
            raw.push(src);
        }
    }
    for node in doc.select("img[srcset], source[srcset]")? {
        if let Some(candidate) = doc.attr(&node, "srcset").as_deref().and_then(first_srcset_candidate) {
            raw.push(candidate);
        }
    }
    raw.extend(doc.background_images()?);

    Ok(raw.iter().filter_map(|src| resolve_url(base, src)).collect())
}

/// First URL of a `srcset` attribute.
pub fn first_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .next()?
        .split_whitespace()
        .next()
        .map(|s| s.to_string())
}

/// Email addresses in `text`, unique case-insensitively, first spelling kept.
pub fn extract_emails(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    EMAIL_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|email| seen.insert(email.to_lowercase()))
        .collect()
}

fn map_card_records<D: QueryableDocument>(doc: &D, card_selector: &str, fields: &[CardField]) -> AnyResult<Vec<Record>> {
    let base = doc.base_url();
    let cards = doc.select(card_selector)?;
    let mut records = Vec::with_capacity(cards.len());

    for card in &cards {
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            let value = match doc.select_in(card, &field.selector)? {
                Some(node) => match &field.read {
                    FieldRead::Text => doc.text(&node),
                    FieldRead::Attr { name, resolve_url: true } => {
                        doc.attr(&node, name).and_then(|v| resolve_url(base, &v))
                    }
                    FieldRead::Attr { name, resolve_url: false } => doc.attr(&node, name),
                },
                None => None,
            };
            values.push((field.name.clone(), or_sentinel(value)));
        }
        records.push(Record::new(values));
    }
    Ok(records)
}

/// Map a JSON array of objects through `fields`. Errors describe the
/// offending payload.
pub fn map_json_records(value: &Value, pointer: Option<&str>, fields: &[JsonField]) -> std::result::Result<Vec<Record>, String> {
    let root = match pointer {
        Some(p) => value
            .pointer(p)
            .ok_or_else(|| format!("field `{}` is absent from {}", p, describe(value)))?,
        None => value,
    };

    let items = root
        .as_array()
        .ok_or_else(|| format!("expected an array, found {}", describe(root)))?;

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let obj = item
                .as_object()
                .ok_or_else(|| format!("item {} is {}, expected an object", idx, describe(item)))?;
            let values = fields
                .iter()
                .map(|field| {
                    let joined = field
                        .keys
                        .iter()
                        .filter_map(|k| obj.get(k).and_then(scalar_text))
                        .collect::<Vec<_>>()
                        .join(" ");
                    (field.name.clone(), or_sentinel(Some(joined)))
                })
                .collect();
            Ok(Record::new(values))
        })
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn or_sentinel(value: Option<String>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => SENTINEL.to_string(),
    }
}

/// Short description of a JSON value for error reports.
pub fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "a boolean".to_string(),
        Value::Number(_) => "a number".to_string(),
        Value::String(_) => "a string".to_string(),
        Value::Array(a) => format!("an array of {} item(s)", a.len()),
        Value::Object(o) => {
            let keys: Vec<&str> = o.keys().take(5).map(|k| k.as_str()).collect();
            format!("an object with keys [{}]", keys.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::StaticDocument;
    use serde_json::json;

    fn doc(markup: &str) -> StaticDocument {
        StaticDocument::parse(markup, Url::parse("https://example.com/dir/page.html").unwrap())
    }

    #[test]
    fn email_fixture_yields_unique_valid_set() {
        let emails = extract_emails("contact a@b.com or a@b.com, not-an-email, also @nope.");
        assert_eq!(emails, vec!["a@b.com".to_string()]);
    }

    #[test]
    fn emails_are_case_insensitive_but_case_preserving() {
        let emails = extract_emails("Jane.Doe@Example.COM then jane.doe@example.com then x@y.org");
        assert_eq!(emails, vec!["Jane.Doe@Example.COM".to_string(), "x@y.org".to_string()]);
    }

    #[test]
    fn resolves_relative_and_drops_invalid_urls() {
        let base = Url::parse("https://example.com/dir/page.html").unwrap();
        assert_eq!(resolve_url(&base, "other.html").as_deref(), Some("https://example.com/dir/other.html"));
        assert_eq!(resolve_url(&base, "/root").as_deref(), Some("https://example.com/root"));
        assert_eq!(resolve_url(&base, "https://cdn.test/a.png").as_deref(), Some("https://cdn.test/a.png"));
        assert_eq!(resolve_url(&base, "//cdn.test/b.png").as_deref(), Some("https://cdn.test/b.png"));
        assert_eq!(resolve_url(&base, "   "), None);
        assert_eq!(resolve_url(&base, "javascript:void(0)"), None);
        assert_eq!(resolve_url(&base, "mailto:a@b.com"), None);
        assert_eq!(resolve_url(&base, "http://[::1"), None);
    }

    #[test]
    fn links_are_absolute_and_never_empty() {
        let d = doc(r##"
            <a href="/a">a</a>
            <a href="b">b</a>
            <a href="">empty</a>
            <a>no href</a>
            <a href="javascript:alert(1)">js</a>
            <a href="https://other.org/x#frag">x</a>
        "##);
        let links = extract_links(&d).unwrap();
        assert_eq!(
            links,
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/dir/b".to_string(),
                "https://other.org/x#frag".to_string(),
            ]
        );
    }

    #[test]
    fn images_cover_src_srcset_and_backgrounds() {
        let d = doc(r#"
            <img src="/logo.png">
            <img data-src="lazy.jpg">
            <img src="">
            <picture><source srcset="/wide.webp 2x, /narrow.webp 1x"></picture>
            <div style="background-image: url('/bg.jpg')"></div>
        "#);
        let images = extract_images(&d).unwrap();
        assert_eq!(
            images,
            vec![
                "https://example.com/logo.png".to_string(),
                "https://example.com/dir/lazy.jpg".to_string(),
                "https://example.com/wide.webp".to_string(),
                "https://example.com/bg.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn srcset_first_candidate() {
        assert_eq!(first_srcset_candidate("a.png 1x, b.png 2x").as_deref(), Some("a.png"));
        assert_eq!(first_srcset_candidate("  "), None);
    }

    #[test]
    fn broker_records_default_missing_fields() {
        let payload = json!([
            { "company": "Acme Brokers", "first_name": "Jo", "last_name": "Doe", "email": "jo@acme.com" },
            { "first_name": "Sam", "email": "" },
            { "company": null }
        ]);
        let RecordSchema::Json { fields, .. } = RecordSchema::brokers() else { unreachable!() };
        let records = map_json_records(&payload, None, &fields).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("firm"), Some("Acme Brokers"));
        assert_eq!(records[0].get("contact_person"), Some("Jo Doe"));
        assert_eq!(records[1].get("firm"), Some("N/A"));
        assert_eq!(records[1].get("contact_person"), Some("Sam"));
        assert_eq!(records[1].get("email"), Some("N/A"));
        for record in &records {
            assert_eq!(record.fields().len(), 3);
        }
        assert_eq!(records[2].get("contact_person"), Some("N/A"));
    }

    #[test]
    fn non_array_payload_is_a_schema_mismatch() {
        let payload = json!({ "error": "rate limited" });
        let request = DatasetRequest::Records {
            name: "brokers".into(),
            schema: RecordSchema::brokers(),
        };
        let err = extract_json(&payload, "https://example.com/api", &[request]).unwrap_err();
        match err {
            ScrapeError::SchemaMismatch { dataset, description, .. } => {
                assert_eq!(dataset, "brokers");
                assert!(description.contains("expected an array"));
                assert!(description.contains("error"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn absent_pointer_is_a_schema_mismatch() {
        let payload = json!({ "data": { "items": [] } });
        let fields = vec![JsonField::new("id", &["id"])];
        let err = map_json_records(&payload, Some("/data/brokers"), &fields).unwrap_err();
        assert!(err.contains("/data/brokers"));
        assert!(map_json_records(&payload, Some("/data/items"), &fields).unwrap().is_empty());
    }

    #[test]
    fn non_object_item_is_rejected() {
        let fields = vec![JsonField::new("id", &["id"])];
        let err = map_json_records(&json!([{ "id": 1 }, "oops"]), None, &fields).unwrap_err();
        assert!(err.contains("item 1"));
    }

    #[test]
    fn card_records_have_stable_shape() {
        let d = doc(r#"
            <div class="game">
                <a class="title">Star Drift</a>
                <span class="genre">Shooter</span>
                <img src="/covers/star.jpg">
                <a class="trailer" href="https://video.test/star">trailer</a>
            </div>
            <div class="game"><span class="platforms">PC, PS5</span></div>
        "#);
        let request = DatasetRequest::Records {
            name: "games".into(),
            schema: RecordSchema::games(),
        };
        let results = extract_document(&d, &[request]).unwrap();
        let Items::Records(records) = &results[0].items else { panic!("expected records") };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some("Star Drift"));
        assert_eq!(records[0].get("image"), Some("https://example.com/covers/star.jpg"));
        assert_eq!(records[0].get("release_date"), Some("N/A"));
        assert_eq!(records[1].get("name"), Some("N/A"));
        assert_eq!(records[1].get("platforms"), Some("PC, PS5"));
        assert_eq!(records[1].get("trailer"), Some("N/A"));
        assert!(records.iter().all(|r| r.fields().len() == 7));
    }

    #[test]
    fn links_on_json_resource_are_rejected() {
        let err = extract_json(&json!([]), "https://example.com/api", &[DatasetRequest::Links]).unwrap_err();
        assert!(matches!(err, ScrapeError::SchemaMismatch { .. }));
    }

    #[test]
    fn emails_from_json_payload() {
        let payload = json!([{ "email": "x@y.com" }, { "note": "write to X@Y.com" }]);
        let results = extract_json(&payload, "https://example.com/api", &[DatasetRequest::Emails]).unwrap();
        assert_eq!(results[0].items, Items::Strings(vec!["x@y.com".to_string()]));
    }
}
