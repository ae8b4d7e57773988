use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandleKind {
    /// Shipped with one of the well-known default categories.
    BuiltIn,
    #[default]
    Custom,
}

impl HandleKind {
    pub const ALL: [&'static str; 2] = ["builtin", "custom"];
}

/// A directory the user picked, addressed through its scoped `resource_uri`.
///
/// `source_path` is only for display and may be stale; all I/O goes through
/// `resource_uri`. Only `validated` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryHandle {
    pub display_name: String,
    pub source_path: String,
    pub resource_uri: String,
    #[serde(default)]
    pub kind: HandleKind,
    #[serde(default = "default_true")]
    pub validated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub color: String,
    pub directories: Vec<DirectoryHandle>,
    #[serde(default = "default_true")]
    pub checked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    /// Case-insensitive name comparison used for uniqueness checks.
    pub fn has_name(&self, name: &str) -> bool {
        name_key(&self.name) == name_key(name)
    }
}

pub(crate) fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Partial update for [`Category`]. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub directories: Option<Vec<DirectoryHandle>>,
}

impl CategoryPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none() && self.directories.is_none()
    }
}

/// One directory feeding an aggregation request, tagged with the category it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDirectory {
    pub owner_category_id: String,
    pub handle: DirectoryHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeClass {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl MimeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeClass::Image => "image",
            MimeClass::Video => "video",
            MimeClass::Audio => "audio",
            MimeClass::Document => "document",
            MimeClass::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub path: String,
    pub resource_uri: String,
    pub name: String,
    pub mime: String,
    pub mime_class: MimeClass,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub owner_category_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Date,
    Name,
    Type,
    Size,
}

impl SortField {
    pub const ALL: [&'static str; 4] = ["date", "name", "type", "size"];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Date => "date",
            SortField::Name => "name",
            SortField::Type => "type",
            SortField::Size => "size",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub const ALL: [&'static str; 2] = ["asc", "desc"];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Listing order, written as `<field>-<order>` (e.g. `date-desc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SortKey {
    pub field: SortField,
    pub order: SortOrder,
}

impl SortKey {
    pub fn new(field: SortField, order: SortOrder) -> Self {
        Self { field, order }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.field.as_str(), self.order.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, order) = s
            .split_once('-')
            .ok_or_else(|| format!("sort key must look like `date-desc`, got `{s}`"))?;
        let field = match field {
            "date" => SortField::Date,
            "name" => SortField::Name,
            "type" => SortField::Type,
            "size" => SortField::Size,
            other => return Err(format!("unknown sort field `{other}`")),
        };
        let order = match order {
            "asc" => SortOrder::Asc,
            "desc" => SortOrder::Desc,
            other => return Err(format!("unknown sort order `{other}`")),
        };
        Ok(Self { field, order })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    pub const ALL: [&'static str; 3] = ["light", "dark", "system"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    List,
}

impl ViewMode {
    pub const ALL: [&'static str; 2] = ["grid", "list"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: Theme,
    pub default_view: ViewMode,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl Settings {
    pub fn sort_key(&self) -> SortKey {
        SortKey::new(self.sort_by, self.sort_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_parses_and_prints() {
        let key: SortKey = "size-asc".parse().unwrap();
        assert_eq!(key, SortKey::new(SortField::Size, SortOrder::Asc));
        assert_eq!(key.to_string(), "size-asc");
        assert_eq!(SortKey::default().to_string(), "date-desc");
    }

    #[test]
    fn sort_key_rejects_garbage() {
        assert!("date".parse::<SortKey>().is_err());
        assert!("colour-asc".parse::<SortKey>().is_err());
        assert!("name-up".parse::<SortKey>().is_err());
    }

    #[test]
    fn category_name_match_ignores_case_and_padding() {
        let now = Utc::now();
        let cat = Category {
            id: "c1".into(),
            name: "WhatsApp".into(),
            color: "#25D366".into(),
            directories: vec![],
            checked: true,
            created_at: now,
            updated_at: now,
        };
        assert!(cat.has_name("whatsapp"));
        assert!(cat.has_name("  WHATSAPP "));
        assert!(!cat.has_name("Telegram"));
    }

    #[test]
    fn handle_serializes_camel_case() {
        let handle = DirectoryHandle {
            display_name: "Media".into(),
            source_path: "/sdcard/Media".into(),
            resource_uri: "scoped://Media".into(),
            kind: HandleKind::BuiltIn,
            validated: true,
        };
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(json["displayName"], "Media");
        assert_eq!(json["resourceUri"], "scoped://Media");
        assert_eq!(json["kind"], "builtin");
    }
}
