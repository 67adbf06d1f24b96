//! Known signal parameters and name matching against decoded columns.
//!
//! Signal files from different monitors name the same channel differently
//! (`HR`, `Solar8000/HR`, `ECG_HR`). The registry maps every alias and
//! device-prefixed form back to one canonical key.

use std::collections::HashMap;
use std::path::Path;

use medctx_common::{MedError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub key: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl ParameterInfo {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            unit: None,
            aliases: Vec::new(),
            category: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryDocument {
    Wrapped { parameters: Vec<ParameterInfo> },
    Bare(Vec<ParameterInfo>),
}

#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    params: Vec<ParameterInfo>,
    // lowercased key or alias -> index into `params`
    index: HashMap<String, usize>,
}

impl ParameterRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Common vital-sign channels.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();
        for p in [
            ParameterInfo::new("HR", "Heart rate")
                .with_unit("bpm")
                .with_aliases(&["HeartRate", "ECG_HR", "PLETH_HR"]),
            ParameterInfo::new("SBP", "Systolic blood pressure")
                .with_unit("mmHg")
                .with_aliases(&["ART_SBP", "NIBP_SBP"]),
            ParameterInfo::new("DBP", "Diastolic blood pressure")
                .with_unit("mmHg")
                .with_aliases(&["ART_DBP", "NIBP_DBP"]),
            ParameterInfo::new("MBP", "Mean blood pressure")
                .with_unit("mmHg")
                .with_aliases(&["ART_MBP", "NIBP_MBP", "MAP"]),
            ParameterInfo::new("SPO2", "Oxygen saturation")
                .with_unit("%")
                .with_aliases(&["PLETH_SPO2", "SaO2"]),
            ParameterInfo::new("ETCO2", "End-tidal CO2")
                .with_unit("mmHg")
                .with_aliases(&["CO2", "ET_CO2"]),
            ParameterInfo::new("RR", "Respiratory rate")
                .with_unit("/min")
                .with_aliases(&["RESP_RATE", "VENT_RR"]),
            ParameterInfo::new("BT", "Body temperature")
                .with_unit("°C")
                .with_aliases(&["TEMP", "BODY_TEMP"]),
            ParameterInfo::new("BIS", "Bispectral index").with_aliases(&["BIS_INDEX"]),
            ParameterInfo::new("CVP", "Central venous pressure")
                .with_unit("mmHg")
                .with_aliases(&["CVP_MEAN"]),
        ] {
            reg.register(p.with_category("vital"));
        }
        reg
    }

    /// Accepts either `{"parameters": [...]}` or a bare array.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let doc: RegistryDocument = serde_json::from_str(s)
            .map_err(|e| MedError::InvalidConfig(format!("parameter registry: {e}")))?;
        let params = match doc {
            RegistryDocument::Wrapped { parameters } => parameters,
            RegistryDocument::Bare(p) => p,
        };
        let mut reg = Self::empty();
        for p in params {
            reg.register(p);
        }
        Ok(reg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&s)
    }

    /// Add or replace a parameter. Aliases already claimed by another
    /// parameter move to the new one.
    pub fn register(&mut self, info: ParameterInfo) {
        let idx = match self.params.iter().position(|p| p.key.eq_ignore_ascii_case(&info.key)) {
            Some(i) => {
                self.index.retain(|_, v| *v != i);
                self.params[i] = info;
                i
            }
            None => {
                self.params.push(info);
                self.params.len() - 1
            }
        };
        let p = &self.params[idx];
        for name in std::iter::once(&p.key).chain(p.aliases.iter()) {
            self.index.insert(name.trim().to_ascii_lowercase(), idx);
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterInfo> {
        self.params.iter()
    }

    /// Case-insensitive lookup by key or alias, with or without a
    /// `Device/` prefix.
    pub fn resolve(&self, name: &str) -> Option<&ParameterInfo> {
        let lowered = name.trim().to_ascii_lowercase();
        if let Some(&i) = self.index.get(&lowered) {
            return Some(&self.params[i]);
        }
        let (_, channel) = lowered.rsplit_once('/')?;
        self.index.get(channel).map(|&i| &self.params[i])
    }

    pub fn canonical_key(&self, name: &str) -> Option<String> {
        self.resolve(name).map(|p| p.key.clone())
    }

    /// True when `column` carries the parameter named by `requested`.
    pub fn matches(&self, requested: &str, column: &str) -> bool {
        if requested.trim().eq_ignore_ascii_case(column.trim()) {
            return true;
        }
        match (self.resolve(requested), self.resolve(column)) {
            (Some(a), Some(b)) => a.key == b.key,
            _ => false,
        }
    }

    /// Info for each key; unknown keys get a bare entry named after themselves.
    pub fn describe(&self, keys: &[String]) -> Vec<ParameterInfo> {
        keys.iter()
            .map(|k| {
                self.resolve(k)
                    .cloned()
                    .unwrap_or_else(|| ParameterInfo::new(k.clone(), k.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_aliases_and_device_prefixes() {
        let reg = ParameterRegistry::builtin();
        assert_eq!(reg.canonical_key("hr").as_deref(), Some("HR"));
        assert_eq!(reg.canonical_key("Solar8000/HR").as_deref(), Some("HR"));
        assert_eq!(reg.canonical_key("Solar8000/ART_SBP").as_deref(), Some("SBP"));
        assert_eq!(reg.canonical_key("Unknown/XYZ"), None);
        assert!(reg.matches("HR", "Solar8000/HR"));
        assert!(!reg.matches("HR", "SBP"));
    }

    #[test]
    fn json_registry_overrides_and_extends() {
        let mut reg = ParameterRegistry::builtin();
        let extra = ParameterRegistry::from_json_str(
            r#"{"parameters": [{"key": "PPV", "display_name": "Pulse pressure variation", "unit": "%", "aliases": ["Primus/PPV"]}]}"#,
        )
        .expect("registry json");
        for p in extra.iter().cloned() {
            reg.register(p);
        }
        assert_eq!(reg.canonical_key("ppv").as_deref(), Some("PPV"));

        reg.register(ParameterInfo::new("HR", "Pulse").with_aliases(&["PULSE"]));
        assert_eq!(reg.resolve("pulse").map(|p| p.display_name.as_str()), Some("Pulse"));
        assert_eq!(reg.canonical_key("ECG_HR"), None);
        assert_eq!(reg.len(), 11);
    }

    #[test]
    fn describe_keeps_unknown_keys() {
        let reg = ParameterRegistry::builtin();
        let out = reg.describe(&["SPO2".to_string(), "custom".to_string()]);
        assert_eq!(out[0].unit.as_deref(), Some("%"));
        assert_eq!(out[1].display_name, "custom");
    }

    #[test]
    fn bare_array_document_parses() {
        let reg = ParameterRegistry::from_json_str(r#"[{"key": "A"}]"#).expect("bare");
        assert!(reg.resolve("a").is_some());
        assert!(ParameterRegistry::from_json_str("{").is_err());
    }
}
