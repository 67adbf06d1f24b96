use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use medctx_common::{MedError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Cohort table registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub uri: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// One explicitly listed per-entity signal file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalFileDef {
    pub uri: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A group of per-entity time-series files sharing one extraction schema.
///
/// Files come from the explicit `files` list plus, when `root` is set, every
/// file under `root` whose extension matches `extension`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalGroupDef {
    pub name: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    /// Stripped from file stems before they are used as entity ids.
    #[serde(default)]
    pub id_prefix: Option<String>,
    #[serde(default)]
    pub files: Vec<SignalFileDef>,
}

/// A resolved signal file and the entity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalFile {
    pub path: PathBuf,
    pub entity_id: String,
}

/// Maps logical cohort/group identifiers to physical locations.
pub trait CatalogResolver: Send + Sync {
    /// Physical path of a cohort table, `None` when the id is unknown.
    fn resolve_cohort_path(&self, table_id: &str) -> Option<PathBuf>;

    /// Files of a signal group with their entity ids.
    ///
    /// Files whose entity id cannot be resolved are omitted; an unknown
    /// group yields an empty list.
    fn resolve_group_files(&self, group_id: &str, entity_key: &str) -> Vec<SignalFile>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    tables: Vec<TableDef>,
    #[serde(default)]
    groups: Vec<SignalGroupDef>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    tables: HashMap<String, TableDef>,
    groups: HashMap<String, SignalGroupDef>,
    base_dir: Option<PathBuf>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&mut self, table: TableDef) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn register_group(&mut self, group: SignalGroupDef) {
        self.groups.insert(group.name.clone(), group);
    }

    pub fn get(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(name)
            .ok_or_else(|| MedError::Planning(format!("unknown cohort table: {name}")))
    }

    pub fn group(&self, name: &str) -> Result<&SignalGroupDef> {
        self.groups
            .get(name)
            .ok_or_else(|| MedError::Planning(format!("unknown signal group: {name}")))
    }

    pub fn tables(&self) -> Vec<TableDef> {
        let mut out = self.tables.values().cloned().collect::<Vec<_>>();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn groups(&self) -> Vec<SignalGroupDef> {
        let mut out = self.groups.values().cloned().collect::<Vec<_>>();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Load a catalog document; relative URIs resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)?;
        let mut cat = Self::from_json_str(&s)?;
        cat.base_dir = path.parent().map(Path::to_path_buf);
        Ok(cat)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let doc: CatalogDocument =
            serde_json::from_str(s).map_err(|e| MedError::InvalidConfig(e.to_string()))?;
        let mut cat = Catalog::new();
        for t in doc.tables {
            cat.register_table(t);
        }
        for g in doc.groups {
            cat.register_group(g);
        }
        Ok(cat)
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn resolve_uri(&self, uri: &str) -> PathBuf {
        let p = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
        match &self.base_dir {
            Some(base) if p.is_relative() => base.join(p),
            _ => p,
        }
    }

    fn listed_root_files(&self, group: &SignalGroupDef) -> Vec<PathBuf> {
        let Some(root) = group.root.as_deref() else {
            return Vec::new();
        };
        let root = self.resolve_uri(root);
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(group = %group.name, root = %root.display(), error = %e, "signal group root not readable");
                return Vec::new();
            }
        };
        let wanted = group
            .extension
            .as_deref()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase());
        let mut out = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| match &wanted {
                Some(ext) => p
                    .extension()
                    .and_then(|x| x.to_str())
                    .is_some_and(|x| x.eq_ignore_ascii_case(ext)),
                None => true,
            })
            .collect::<Vec<_>>();
        out.sort();
        out
    }
}

impl CatalogResolver for Catalog {
    fn resolve_cohort_path(&self, table_id: &str) -> Option<PathBuf> {
        self.tables.get(table_id).map(|t| self.resolve_uri(&t.uri))
    }

    fn resolve_group_files(&self, group_id: &str, entity_key: &str) -> Vec<SignalFile> {
        let Some(group) = self.groups.get(group_id) else {
            debug!(group = %group_id, "signal group not in catalog");
            return Vec::new();
        };

        let mut out = Vec::with_capacity(group.files.len());
        for f in &group.files {
            let path = self.resolve_uri(&f.uri);
            let entity_id = f
                .entity_id
                .clone()
                .or_else(|| f.metadata.get(entity_key).cloned())
                .or_else(|| entity_id_from_path(&path, group.id_prefix.as_deref()));
            match entity_id {
                Some(entity_id) => out.push(SignalFile { path, entity_id }),
                None => debug!(group = %group_id, uri = %f.uri, "signal file has no resolvable entity id"),
            }
        }
        for path in self.listed_root_files(group) {
            if out.iter().any(|f| f.path == path) {
                continue;
            }
            match entity_id_from_path(&path, group.id_prefix.as_deref()) {
                Some(entity_id) => out.push(SignalFile { path, entity_id }),
                None => debug!(group = %group_id, path = %path.display(), "signal file has no resolvable entity id"),
            }
        }
        out
    }
}

/// File stem with an optional prefix stripped; `None` when nothing remains.
pub fn entity_id_from_path(path: &Path, prefix: Option<&str>) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let id = match prefix {
        Some(p) => stem.strip_prefix(p).unwrap_or(stem),
        None => stem,
    };
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

fn default_format() -> String {
    "parquet".to_string()
}
