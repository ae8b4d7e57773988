//! Portable export/import of categories and settings.
//!
//! A manifest on disk is UTF-8 JSON with exactly four top-level fields:
//! `version`, `categories`, `settings` and `timestamp`. Older versions are
//! upgraded through a [`MigrationChain`] and the result is structurally
//! validated before it is turned into typed data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::kv::write_atomic;
use crate::model::{name_key, Category, HandleKind, Settings, SortField, SortOrder, Theme, ViewMode};
use crate::resolver::AddressScheme;

pub const CURRENT_VERSION: SchemaVersion = SchemaVersion::new(2, 0);

const TOP_LEVEL_FIELDS: [&str; 4] = ["version", "categories", "settings", "timestamp"];
const CATEGORY_FIELDS: [&str; 6] = ["id", "name", "color", "directories", "createdAt", "updatedAt"];

/// Dotted numeric version, compared component by component (`1.10 > 1.9`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || CoreError::UnknownSchemaVersion(s.to_string());
        let mut parts = s.trim().split('.');
        let major = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let minor = match parts.next() {
            Some(minor) => minor.parse().map_err(|_| bad())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self { major, minor })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationManifest {
    #[serde(rename = "version")]
    pub schema_version: String,
    pub categories: Vec<Category>,
    pub settings: Settings,
    pub timestamp: DateTime<Utc>,
}

impl ConfigurationManifest {
    pub fn new(categories: Vec<Category>, settings: Settings) -> Self {
        Self {
            schema_version: CURRENT_VERSION.to_string(),
            categories,
            settings,
            timestamp: Utc::now(),
        }
    }
}

/// One step of the chain. `apply` is a pure transform of the raw JSON and
/// `check` lists its postcondition violations.
pub struct Migration {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub name: &'static str,
    apply: fn(&mut Value, &AddressScheme),
    check: fn(&Value) -> Vec<String>,
}

pub struct MigrationChain {
    migrations: Vec<Migration>,
    target: SchemaVersion,
    scheme: AddressScheme,
}

impl MigrationChain {
    pub fn new(mut migrations: Vec<Migration>, target: SchemaVersion, scheme: AddressScheme) -> Self {
        migrations.sort_by_key(|m| m.from);
        Self {
            migrations,
            target,
            scheme,
        }
    }

    /// 1.0 → 1.1 → 2.0.
    pub fn standard(scheme: AddressScheme) -> Self {
        Self::new(
            vec![
                Migration {
                    from: SchemaVersion::new(1, 0),
                    to: SchemaVersion::new(1, 1),
                    name: "directory-handles",
                    apply: paths_to_handles,
                    check: check_handles,
                },
                Migration {
                    from: SchemaVersion::new(1, 1),
                    to: SchemaVersion::new(2, 0),
                    name: "timestamps-and-settings",
                    apply: backfill_timestamps,
                    check: check_timestamps,
                },
            ],
            CURRENT_VERSION,
            scheme,
        )
    }

    pub fn target(&self) -> SchemaVersion {
        self.target
    }

    /// Runs every migration whose `from` is at or above the manifest's version,
    /// in order, until it reaches the target. Current manifests pass through untouched.
    pub fn migrate(&self, mut manifest: Value) -> Result<Value> {
        let mut current = read_version(&manifest)?;
        if current == self.target {
            return Ok(manifest);
        }
        if current > self.target {
            return Err(CoreError::UnknownSchemaVersion(current.to_string()));
        }

        let start = current;
        for migration in self.migrations.iter().filter(|m| m.from >= start) {
            if current == self.target {
                break;
            }
            (migration.apply)(&mut manifest, &self.scheme);
            let violations = (migration.check)(&manifest);
            if !violations.is_empty() {
                return Err(CoreError::InvalidManifest {
                    violations: violations
                        .into_iter()
                        .map(|v| format!("after {}: {v}", migration.name))
                        .collect(),
                });
            }
            if let Some(obj) = manifest.as_object_mut() {
                obj.insert("version".into(), Value::String(migration.to.to_string()));
            }
            debug!(from = %migration.from, to = %migration.to, "migrated manifest");
            current = migration.to;
        }

        if current != self.target {
            return Err(CoreError::UnknownSchemaVersion(current.to_string()));
        }
        Ok(manifest)
    }

    /// Migrate, validate and decode raw manifest JSON.
    pub fn decode(&self, raw: &str) -> Result<ConfigurationManifest> {
        let value: Value = serde_json::from_str(raw).map_err(|e| CoreError::InvalidManifest {
            violations: vec![format!("not valid JSON: {e}")],
        })?;
        let value = self.migrate(value)?;
        let violations = validate(&value, self.target);
        if !violations.is_empty() {
            return Err(CoreError::InvalidManifest { violations });
        }
        Ok(serde_json::from_value(value)?)
    }
}

fn read_version(manifest: &Value) -> Result<SchemaVersion> {
    match manifest.get("version") {
        Some(Value::String(s)) => s.parse(),
        Some(Value::Number(n)) => n.to_string().parse(),
        Some(_) => Err(CoreError::InvalidManifest {
            violations: vec!["`version` must be a string".into()],
        }),
        None => Err(CoreError::InvalidManifest {
            violations: vec!["missing field `version`".into()],
        }),
    }
}

fn categories_mut(manifest: &mut Value) -> impl Iterator<Item = &mut Map<String, Value>> {
    manifest
        .get_mut("categories")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object_mut)
}

fn categories(manifest: &Value) -> impl Iterator<Item = &Map<String, Value>> {
    manifest
        .get("categories")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

// 1.0 stored plain paths in `directories`.
fn paths_to_handles(manifest: &mut Value, scheme: &AddressScheme) {
    for category in categories_mut(manifest) {
        let Some(dirs) = category.get_mut("directories").and_then(Value::as_array_mut) else {
            continue;
        };
        for dir in dirs.iter_mut() {
            if let Value::String(path) = dir {
                let handle = serde_json::json!({
                    "displayName": scheme.display_name(path),
                    "sourcePath": path.clone(),
                    "resourceUri": scheme.resolve(path),
                    "kind": "custom",
                    "validated": true,
                });
                *dir = handle;
            }
        }
    }
}

fn check_handles(manifest: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    for (i, category) in categories(manifest).enumerate() {
        let Some(dirs) = category.get("directories").and_then(Value::as_array) else {
            continue;
        };
        for (j, dir) in dirs.iter().enumerate() {
            if dir.get("resourceUri").and_then(Value::as_str).is_none() {
                violations.push(format!("categories[{i}].directories[{j}] has no resourceUri"));
            }
        }
    }
    violations
}

// 1.1 could lack `createdAt`/`updatedAt`, `checked` and parts of `settings`.
fn backfill_timestamps(manifest: &mut Value, _scheme: &AddressScheme) {
    let fallback = manifest.get("timestamp").cloned();
    for category in categories_mut(manifest) {
        if !category.contains_key("createdAt") {
            if let Some(ts) = &fallback {
                category.insert("createdAt".into(), ts.clone());
            }
        }
        if !category.contains_key("updatedAt") {
            if let Some(created) = category.get("createdAt").cloned() {
                category.insert("updatedAt".into(), created);
            }
        }
        category
            .entry("checked")
            .or_insert(Value::Bool(true));
    }

    let Some(obj) = manifest.as_object_mut() else {
        return;
    };
    let defaults = serde_json::to_value(Settings::default()).unwrap_or_default();
    let settings = obj
        .entry("settings")
        .or_insert_with(|| Value::Object(Map::new()));
    if let (Some(settings), Some(defaults)) = (settings.as_object_mut(), defaults.as_object()) {
        for (key, value) in defaults {
            settings.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

fn check_timestamps(manifest: &Value) -> Vec<String> {
    categories(manifest)
        .enumerate()
        .filter(|(_, c)| c.contains_key("createdAt") && !c.contains_key("updatedAt"))
        .map(|(i, _)| format!("categories[{i}] has createdAt but no updatedAt"))
        .collect()
}

fn is_timestamp(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .map(|s| DateTime::parse_from_rfc3339(s).is_ok())
        .unwrap_or(false)
}

fn check_enum(violations: &mut Vec<String>, at: &str, value: Option<&Value>, allowed: &[&str]) {
    match value.and_then(Value::as_str) {
        Some(s) if allowed.contains(&s) => {}
        Some(s) => violations.push(format!("{at} is `{s}`, expected one of {allowed:?}")),
        None => violations.push(format!("{at} is missing or not a string")),
    }
}

/// Full structural validation. Returns every violation found, empty when valid.
pub fn validate(manifest: &Value, expected: SchemaVersion) -> Vec<String> {
    let mut violations = Vec::new();
    let Some(obj) = manifest.as_object() else {
        return vec!["manifest must be a JSON object".into()];
    };

    for field in TOP_LEVEL_FIELDS {
        if !obj.contains_key(field) {
            violations.push(format!("missing field `{field}`"));
        }
    }
    for key in obj.keys() {
        if !TOP_LEVEL_FIELDS.contains(&key.as_str()) {
            violations.push(format!("unexpected field `{key}`"));
        }
    }

    match obj.get("version").and_then(Value::as_str) {
        Some(v) if v.parse::<SchemaVersion>().ok() == Some(expected) => {}
        Some(v) => violations.push(format!("version is `{v}`, expected `{expected}`")),
        None if obj.contains_key("version") => violations.push("`version` must be a string".into()),
        None => {}
    }

    if obj.contains_key("timestamp") && !is_timestamp(obj.get("timestamp")) {
        violations.push("`timestamp` is not an RFC 3339 date".into());
    }

    match obj.get("settings") {
        Some(Value::Object(settings)) => {
            check_enum(&mut violations, "settings.theme", settings.get("theme"), &Theme::ALL);
            check_enum(
                &mut violations,
                "settings.defaultView",
                settings.get("defaultView"),
                &ViewMode::ALL,
            );
            check_enum(&mut violations, "settings.sortBy", settings.get("sortBy"), &SortField::ALL);
            check_enum(
                &mut violations,
                "settings.sortOrder",
                settings.get("sortOrder"),
                &SortOrder::ALL,
            );
        }
        Some(_) => violations.push("`settings` must be an object".into()),
        None => {}
    }

    match obj.get("categories") {
        Some(Value::Array(items)) => validate_categories(items, &mut violations),
        Some(_) => violations.push("`categories` must be an array".into()),
        None => {}
    }

    violations
}

fn validate_categories(items: &[Value], violations: &mut Vec<String>) {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for (i, item) in items.iter().enumerate() {
        let at = format!("categories[{i}]");
        let Some(category) = item.as_object() else {
            violations.push(format!("{at} must be an object"));
            continue;
        };
        for field in CATEGORY_FIELDS {
            if !category.contains_key(field) {
                violations.push(format!("{at} missing field `{field}`"));
            }
        }
        for field in ["id", "name", "color"] {
            if let Some(value) = category.get(field) {
                match value.as_str() {
                    Some(s) if field != "color" && s.trim().is_empty() => {
                        violations.push(format!("{at}.{field} must not be empty"))
                    }
                    Some(_) => {}
                    None => violations.push(format!("{at}.{field} must be a string")),
                }
            }
        }
        if let Some(id) = category.get("id").and_then(Value::as_str) {
            if !ids.insert(id.to_string()) {
                violations.push(format!("{at}.id `{id}` is duplicated"));
            }
        }
        if let Some(name) = category.get("name").and_then(Value::as_str) {
            if !names.insert(name_key(name)) {
                violations.push(format!("{at}.name `{name}` is duplicated"));
            }
        }
        for field in ["createdAt", "updatedAt"] {
            if category.contains_key(field) && !is_timestamp(category.get(field)) {
                violations.push(format!("{at}.{field} is not an RFC 3339 date"));
            }
        }
        if let Some(checked) = category.get("checked") {
            if !checked.is_boolean() {
                violations.push(format!("{at}.checked must be a boolean"));
            }
        }
        match category.get("directories") {
            Some(Value::Array(dirs)) => {
                for (j, dir) in dirs.iter().enumerate() {
                    validate_handle(&format!("{at}.directories[{j}]"), dir, violations);
                }
            }
            Some(_) => violations.push(format!("{at}.directories must be an array")),
            None => {}
        }
    }
}

fn validate_handle(at: &str, dir: &Value, violations: &mut Vec<String>) {
    let Some(dir) = dir.as_object() else {
        violations.push(format!("{at} must be an object"));
        return;
    };
    for field in ["displayName", "sourcePath", "resourceUri"] {
        if dir.get(field).and_then(Value::as_str).is_none() {
            violations.push(format!("{at}.{field} is missing or not a string"));
        }
    }
    if dir.contains_key("kind") {
        check_enum(violations, &format!("{at}.kind"), dir.get("kind"), &HandleKind::ALL);
    }
    if let Some(validated) = dir.get("validated") {
        if !validated.is_boolean() {
            violations.push(format!("{at}.validated must be a boolean"));
        }
    }
}

/// Writes the manifest as pretty JSON, replacing `path` atomically.
pub async fn export_manifest(
    path: &Path,
    categories: Vec<Category>,
    settings: Settings,
) -> Result<ConfigurationManifest> {
    let manifest = ConfigurationManifest::new(categories, settings);
    let bytes = serde_json::to_vec_pretty(&manifest)?;
    write_atomic(path.to_path_buf(), bytes).await?;
    info!(path = %path.display(), categories = manifest.categories.len(), "exported manifest");
    Ok(manifest)
}

pub async fn import_manifest(path: &Path, chain: &MigrationChain) -> Result<ConfigurationManifest> {
    let raw = tokio::fs::read_to_string(path).await?;
    let manifest = chain.decode(&raw)?;
    info!(path = %path.display(), categories = manifest.categories.len(), "imported manifest");
    Ok(manifest)
}
