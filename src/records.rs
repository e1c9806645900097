//! Structured record schemas.
//!
//! A schema maps raw items (objects of a JSON array, or card elements of a
//! page) into a fixed output shape. Every declared field is always present
//! in the output; anything missing becomes [`SENTINEL`].

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Placeholder for absent fields.
pub const SENTINEL: &str = "N/A";

/// One mapped record. Field order follows the schema declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<(String, String)> {
        self.fields
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Output field built from one or more keys of a JSON object. Multiple keys
/// are joined with a space (e.g. first + last name).
#[derive(Debug, Clone)]
pub struct JsonField {
    pub name: String,
    pub keys: Vec<String>,
}

impl JsonField {
    pub fn new(name: &str, keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// How a card field reads its sub-element.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRead {
    Text,
    /// Attribute value; URL attributes are resolved against the page URL.
    Attr { name: String, resolve_url: bool },
}

#[derive(Debug, Clone)]
pub struct CardField {
    pub name: String,
    pub selector: String,
    pub read: FieldRead,
}

impl CardField {
    pub fn text(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            read: FieldRead::Text,
        }
    }

    pub fn url(name: &str, selector: &str, attr: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            read: FieldRead::Attr {
                name: attr.to_string(),
                resolve_url: true,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum RecordSchema {
    /// Array of objects, optionally nested under a JSON pointer.
    Json {
        pointer: Option<String>,
        fields: Vec<JsonField>,
    },
    /// Repeated card elements with per-field sub-selectors.
    Cards {
        card_selector: String,
        fields: Vec<CardField>,
    },
}

impl RecordSchema {
    /// IBBA broker directory (`/wp-json/brokers/all`).
    pub fn brokers() -> Self {
        RecordSchema::Json {
            pointer: None,
            fields: vec![
                JsonField::new("firm", &["company"]),
                JsonField::new("contact_person", &["first_name", "last_name"]),
                JsonField::new("email", &["email"]),
            ],
        }
    }

    /// IGDB coming-soon game cards.
    pub fn games() -> Self {
        RecordSchema::Cards {
            card_selector: ".game".to_string(),
            fields: vec![
                CardField::text("name", ".title"),
                CardField::text("genre", ".genre"),
                CardField::text("platforms", ".platforms"),
                CardField::text("release_date", ".release-date"),
                CardField::text("publisher", ".company"),
                CardField::url("image", "img", "src"),
                CardField::url("trailer", "a.trailer", "href"),
            ],
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, RecordSchema::Json { .. })
    }

    pub fn field_names(&self) -> Vec<&str> {
        match self {
            RecordSchema::Json { fields, .. } => fields.iter().map(|f| f.name.as_str()).collect(),
            RecordSchema::Cards { fields, .. } => fields.iter().map(|f| f.name.as_str()).collect(),
        }
    }
}
