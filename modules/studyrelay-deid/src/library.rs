//! The named script registry.
//!
//! Scripts live as files under a library directory with a single JSON
//! manifest (`scripts.json`) describing them. Built-ins are seeded on
//! open and are immutable. Every write path validates by parsing first,
//! so a broken script can never be registered. Reads return owned
//! snapshots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DeidError, Result};
use crate::script::AnonymizationScript;

const MANIFEST_FILE: &str = "scripts.json";

const BUILTINS: &[(&str, &str, &str, &str)] = &[
    (
        "baseline",
        "Baseline de-identification",
        "Clears identity, staff, site, and date fields; hashes instance UIDs.",
        include_str!("../scripts/baseline.anon"),
    ),
    (
        "preserve-dates",
        "De-identify, preserve dates",
        "Baseline profile with acquisition dates kept intact.",
        include_str!("../scripts/preserve-dates.anon"),
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptCategory {
    Builtin,
    User,
    Imported,
}

/// One manifest row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub category: ScriptCategory,
    pub path: PathBuf,
    pub builtin: bool,
    #[serde(default)]
    pub source_url: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    scripts: BTreeMap<String, ScriptEntry>,
}

/// File-backed script registry.
pub struct ScriptLibrary {
    dir: PathBuf,
    manifest: RwLock<Manifest>,
}

impl ScriptLibrary {
    /// Open (or initialize) a library directory, seeding built-ins that
    /// are not yet present.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let mut manifest: Manifest = if manifest_path.exists() {
            let raw = std::fs::read_to_string(&manifest_path)?;
            serde_json::from_str(&raw)
                .map_err(|e| DeidError::Library(format!("corrupt manifest: {e}")))?
        } else {
            Manifest::default()
        };

        let mut seeded = 0;
        for (name, display, description, content) in BUILTINS {
            if manifest.scripts.contains_key(*name) {
                continue;
            }
            // Built-ins must always parse; a failure here is a packaging bug.
            AnonymizationScript::parse(content)?;
            let rel = PathBuf::from(format!("{name}.anon"));
            std::fs::write(dir.join(&rel), content)?;
            let now = Utc::now();
            manifest.scripts.insert(
                (*name).to_string(),
                ScriptEntry {
                    name: (*name).to_string(),
                    display_name: (*display).to_string(),
                    description: (*description).to_string(),
                    category: ScriptCategory::Builtin,
                    path: rel,
                    builtin: true,
                    source_url: None,
                    created: now,
                    modified: now,
                },
            );
            seeded += 1;
        }

        let library = Self {
            dir,
            manifest: RwLock::new(manifest),
        };
        if seeded > 0 {
            info!(seeded, "Seeded builtin anonymization scripts");
            library.persist()?;
        }
        Ok(library)
    }

    /// Snapshot of every entry, sorted by name.
    pub fn list(&self) -> Vec<ScriptEntry> {
        self.manifest
            .read()
            .map(|m| m.scripts.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entry(&self, name: &str) -> Option<ScriptEntry> {
        self.manifest
            .read()
            .ok()
            .and_then(|m| m.scripts.get(name).cloned())
    }

    /// Script source text by name.
    pub fn content(&self, name: &str) -> Result<String> {
        let entry = self
            .entry(name)
            .ok_or_else(|| DeidError::Library(format!("no script named `{name}`")))?;
        Ok(std::fs::read_to_string(self.dir.join(&entry.path))?)
    }

    /// Register a user-authored script. Rejects duplicates and syntax
    /// errors before anything is written.
    pub fn add(
        &self,
        name: &str,
        display_name: &str,
        description: &str,
        content: &str,
    ) -> Result<ScriptEntry> {
        self.add_with_category(name, display_name, description, content, ScriptCategory::User, None)
    }

    /// The import channel: same as `add` but records provenance. The
    /// admin surface owns the actual fetch.
    pub fn import(
        &self,
        name: &str,
        display_name: &str,
        description: &str,
        content: &str,
        source_url: &str,
    ) -> Result<ScriptEntry> {
        self.add_with_category(
            name,
            display_name,
            description,
            content,
            ScriptCategory::Imported,
            Some(source_url.to_string()),
        )
    }

    fn add_with_category(
        &self,
        name: &str,
        display_name: &str,
        description: &str,
        content: &str,
        category: ScriptCategory,
        source_url: Option<String>,
    ) -> Result<ScriptEntry> {
        validate_name(name)?;
        AnonymizationScript::parse(content)?;

        let rel = PathBuf::from(format!("{name}.anon"));
        let entry = {
            let mut manifest = self
                .manifest
                .write()
                .map_err(|_| DeidError::Library("manifest lock poisoned".into()))?;
            if manifest.scripts.contains_key(name) {
                return Err(DeidError::Library(format!("script `{name}` already exists")));
            }
            let now = Utc::now();
            let entry = ScriptEntry {
                name: name.to_string(),
                display_name: display_name.to_string(),
                description: description.to_string(),
                category,
                path: rel.clone(),
                builtin: false,
                source_url,
                created: now,
                modified: now,
            };
            manifest.scripts.insert(name.to_string(), entry.clone());
            entry
        };
        std::fs::write(self.dir.join(&rel), content)?;
        self.persist()?;
        Ok(entry)
    }

    /// Replace a script's content. Built-ins are immutable.
    pub fn update(&self, name: &str, content: &str) -> Result<ScriptEntry> {
        AnonymizationScript::parse(content)?;
        let entry = {
            let mut manifest = self
                .manifest
                .write()
                .map_err(|_| DeidError::Library("manifest lock poisoned".into()))?;
            let entry = manifest
                .scripts
                .get_mut(name)
                .ok_or_else(|| DeidError::Library(format!("no script named `{name}`")))?;
            if entry.builtin {
                return Err(DeidError::Library(format!(
                    "builtin script `{name}` is immutable"
                )));
            }
            entry.modified = Utc::now();
            entry.clone()
        };
        std::fs::write(self.dir.join(&entry.path), content)?;
        self.persist()?;
        Ok(entry)
    }

    /// Remove a script. Built-ins are immutable.
    pub fn delete(&self, name: &str) -> Result<()> {
        let entry = {
            let mut manifest = self
                .manifest
                .write()
                .map_err(|_| DeidError::Library("manifest lock poisoned".into()))?;
            let entry = manifest
                .scripts
                .get(name)
                .ok_or_else(|| DeidError::Library(format!("no script named `{name}`")))?;
            if entry.builtin {
                return Err(DeidError::Library(format!(
                    "builtin script `{name}` is immutable"
                )));
            }
            let entry = entry.clone();
            manifest.scripts.remove(name);
            entry
        };
        let _ = std::fs::remove_file(self.dir.join(&entry.path));
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let json = {
            let manifest = self
                .manifest
                .read()
                .map_err(|_| DeidError::Library("manifest lock poisoned".into()))?;
            serde_json::to_string_pretty(&*manifest)
                .map_err(|e| DeidError::Library(e.to_string()))?
        };
        let tmp = self.dir.join(format!(".{MANIFEST_FILE}.tmp"));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.dir.join(MANIFEST_FILE))?;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DeidError::Library(format!(
            "script name `{name}` must be non-empty and alphanumeric/dash/underscore"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_seeds_builtins() {
        let dir = TempDir::new().unwrap();
        let lib = ScriptLibrary::open(dir.path()).unwrap();
        let entries = lib.list();
        assert!(entries.iter().any(|e| e.name == "baseline" && e.builtin));
        assert!(entries.iter().any(|e| e.name == "preserve-dates"));

        // Builtin content is valid and loadable.
        let content = lib.content("baseline").unwrap();
        AnonymizationScript::parse(&content).unwrap();

        // Reopening does not duplicate.
        drop(lib);
        let lib = ScriptLibrary::open(dir.path()).unwrap();
        assert_eq!(
            lib.list().iter().filter(|e| e.name == "baseline").count(),
            1
        );
    }

    #[test]
    fn add_validates_syntax() {
        let dir = TempDir::new().unwrap();
        let lib = ScriptLibrary::open(dir.path()).unwrap();
        let err = lib
            .add("bad", "Bad", "", "(0010,0010) := mangle[(0010,0010)]")
            .unwrap_err();
        assert!(matches!(err, DeidError::ScriptSyntax { .. }));
        assert!(lib.entry("bad").is_none());
    }

    #[test]
    fn builtins_are_immutable() {
        let dir = TempDir::new().unwrap();
        let lib = ScriptLibrary::open(dir.path()).unwrap();
        assert!(lib.update("baseline", "(0010,0040) keep").is_err());
        assert!(lib.delete("baseline").is_err());
    }

    #[test]
    fn user_script_lifecycle() {
        let dir = TempDir::new().unwrap();
        let lib = ScriptLibrary::open(dir.path()).unwrap();

        lib.add("site", "Site profile", "desc", "(0010,0040) keep").unwrap();
        assert!(lib.add("site", "dup", "", "(0010,0040) keep").is_err());

        lib.update("site", "(0010,0010) := \"ANON\"").unwrap();
        assert_eq!(lib.content("site").unwrap(), "(0010,0010) := \"ANON\"");

        lib.delete("site").unwrap();
        assert!(lib.entry("site").is_none());
    }

    #[test]
    fn import_records_source() {
        let dir = TempDir::new().unwrap();
        let lib = ScriptLibrary::open(dir.path()).unwrap();
        let entry = lib
            .import(
                "shared",
                "Shared",
                "",
                "(0010,0040) keep",
                "https://example.org/shared.anon",
            )
            .unwrap();
        assert_eq!(entry.category, ScriptCategory::Imported);
        assert_eq!(
            entry.source_url.as_deref(),
            Some("https://example.org/shared.anon")
        );
    }
}
