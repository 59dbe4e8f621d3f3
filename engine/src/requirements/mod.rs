//! Document requirement tracking
//!
//! When a user asks for a document to be drafted, the tracker picks the
//! matching template and keeps a checklist of the data still needed. Items
//! start `pending` (or `needs_search` when their legal basis must be looked
//! up) and flip to `collected` once the user supplies a value.
//!
//! Deterministic and template driven; no network I/O.

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;

use crate::classifier::normalize;

const EMBEDDED_TEMPLATES: &str = include_str!("../../templates/requirements.toml");
const MAX_KEY_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    Pending,
    Collected,
    NeedsSearch,
}

/// One piece of data a document needs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequirementItem {
    pub name: String,
    pub description: String,
    pub status: RequirementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legal_basis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TemplateFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    drafting_cues: Vec<String>,
    kinds: Vec<DocumentTemplate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemTemplate {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub legal_basis: Option<String>,
    #[serde(default)]
    pub needs_search: bool,
}

/// Template for one kind of document
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentTemplate {
    pub id: String,
    pub label: String,
    pub keywords: Vec<String>,
    pub items: Vec<ItemTemplate>,
}

impl DocumentTemplate {
    fn item_for_key(&self, key: &str) -> Option<&ItemTemplate> {
        self.items.iter().find(|item| {
            field_key(&item.name) == key || item.aliases.iter().any(|a| field_key(a) == key)
        })
    }
}

#[derive(Debug, Clone)]
pub struct RequirementTracker {
    cues: Vec<String>,
    kinds: Vec<DocumentTemplate>,
}

impl RequirementTracker {
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let file: TemplateFile = toml::from_str(contents)
            .map_err(|e| EngineError::Template(format!("Failed to parse templates: {}", e)))?;

        for kind in &file.kinds {
            if kind.items.is_empty() {
                return Err(EngineError::Template(format!(
                    "Document kind '{}' has no items",
                    kind.id
                )));
            }
            if kind.keywords.is_empty() {
                return Err(EngineError::Template(format!(
                    "Document kind '{}' has no keywords",
                    kind.id
                )));
            }
        }

        Ok(Self {
            cues: file.drafting_cues.iter().map(|c| normalize(c)).collect(),
            kinds: file
                .kinds
                .into_iter()
                .map(|mut kind| {
                    kind.keywords = kind.keywords.iter().map(|k| normalize(k)).collect();
                    kind
                })
                .collect(),
        })
    }

    pub fn embedded() -> Result<Self, EngineError> {
        Self::from_toml_str(EMBEDDED_TEMPLATES)
    }

    pub fn load_or_embedded(path: Option<&Path>) -> Result<Self, EngineError> {
        match path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|e| {
                    EngineError::Template(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml_str(&contents)
            }
            None => Self::embedded(),
        }
    }

    pub fn kind(&self, id: &str) -> Option<&DocumentTemplate> {
        self.kinds.iter().find(|k| k.id == id)
    }

    /// The user is asking for a document to be written
    pub fn is_drafting_request(&self, message: &str) -> bool {
        let text = normalize(message);
        self.cues.iter().any(|cue| text.contains(cue.as_str()))
    }

    /// Document kind named in the message; the longest keyword match wins
    pub fn detect_document_kind(&self, message: &str) -> Option<&DocumentTemplate> {
        let text = normalize(message);
        self.kinds
            .iter()
            .filter_map(|kind| {
                kind.keywords
                    .iter()
                    .filter(|k| text.contains(k.as_str()))
                    .map(|k| k.chars().count())
                    .max()
                    .map(|len| (len, kind))
            })
            // Earlier kinds win ties
            .fold(None, |best: Option<(usize, &DocumentTemplate)>, (len, kind)| match best {
                Some((best_len, _)) if best_len >= len => best,
                _ => Some((len, kind)),
            })
            .map(|(_, kind)| kind)
    }

    /// Fresh checklist for a document kind
    pub fn build_checklist(&self, kind_id: &str) -> Option<Vec<RequirementItem>> {
        let kind = self.kind(kind_id)?;
        Some(
            kind.items
                .iter()
                .map(|item| RequirementItem {
                    name: item.name.clone(),
                    description: item.description.clone(),
                    status: if item.needs_search {
                        RequirementStatus::NeedsSearch
                    } else {
                        RequirementStatus::Pending
                    },
                    legal_basis: item.legal_basis.clone(),
                    value: None,
                })
                .collect(),
        )
    }

    /// Apply user supplied values; keys may be item names or aliases
    pub fn apply_user_data(
        &self,
        kind_id: &str,
        items: Vec<RequirementItem>,
        data: &HashMap<String, String>,
    ) -> Vec<RequirementItem> {
        let Some(kind) = self.kind(kind_id) else {
            return items;
        };

        let mut values: HashMap<&str, &str> = HashMap::new();
        for (key, value) in data {
            if let Some(item) = kind.item_for_key(&field_key(key)) {
                if !value.trim().is_empty() {
                    values.insert(item.name.as_str(), value.trim());
                }
            }
        }

        items
            .into_iter()
            .map(|mut item| {
                if let Some(value) = values.get(item.name.as_str()) {
                    item.value = Some(value.to_string());
                    item.status = RequirementStatus::Collected;
                }
                item
            })
            .collect()
    }
}

/// Normalized form of a user-typed field name
fn field_key(raw: &str) -> String {
    normalize(raw)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Parse `field: value` lines out of a message
pub fn extract_user_data(message: &str) -> HashMap<String, String> {
    let mut data = HashMap::new();
    for line in message.lines() {
        let line = line.trim().trim_start_matches(['-', '*', '•']).trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = field_key(key);
        let value = value.trim();
        if key.is_empty() || value.is_empty() || key.chars().count() > MAX_KEY_CHARS {
            continue;
        }
        data.insert(key, value.to_string());
    }
    data
}

/// Prompt block listing what the document still needs
pub fn missing_block(kind: &DocumentTemplate, items: &[RequirementItem]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "DOCUMENT CHECKLIST ({}):", kind.label);

    let pending: Vec<&RequirementItem> = items
        .iter()
        .filter(|i| i.status == RequirementStatus::Pending)
        .collect();
    let to_verify: Vec<&RequirementItem> = items
        .iter()
        .filter(|i| i.status == RequirementStatus::NeedsSearch)
        .collect();
    let collected: Vec<&RequirementItem> = items
        .iter()
        .filter(|i| i.status == RequirementStatus::Collected)
        .collect();

    if pending.is_empty() && to_verify.is_empty() {
        out.push_str("All required data has been collected. Draft the document.\n");
    } else {
        out.push_str("Ask the user for the missing data before drafting.\n");
    }

    if !pending.is_empty() {
        out.push_str("Still missing:\n");
        for item in pending {
            let _ = writeln!(out, "- {}: {}", item.name, item.description);
        }
    }
    if !to_verify.is_empty() {
        out.push_str("Needs legal verification:\n");
        for item in to_verify {
            match &item.legal_basis {
                Some(basis) => {
                    let _ = writeln!(out, "- {}: {} ({})", item.name, item.description, basis);
                }
                None => {
                    let _ = writeln!(out, "- {}: {}", item.name, item.description);
                }
            }
        }
    }
    if !collected.is_empty() {
        out.push_str("Collected:\n");
        for item in collected {
            let _ = writeln!(
                out,
                "- {}: {}",
                item.name,
                item.value.as_deref().unwrap_or_default()
            );
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> RequirementTracker {
        RequirementTracker::embedded().unwrap()
    }

    #[test]
    fn test_detect_longest_keyword() {
        let t = tracker();
        let kind = t
            .detect_document_kind("Necesito una demanda de divorcio")
            .unwrap();
        assert_eq!(kind.id, "demanda_divorcio");

        let kind = t
            .detect_document_kind("Redacta un contrato de arrendamiento para un local")
            .unwrap();
        assert_eq!(kind.id, "contrato_arrendamiento");

        assert!(t.detect_document_kind("¿Qué dice el artículo 15?").is_none());
    }

    #[test]
    fn test_drafting_cues() {
        let t = tracker();
        assert!(t.is_drafting_request("Redáctame un poder notarial"));
        assert!(!t.is_drafting_request("¿Es legal el despido sin aviso?"));
    }

    #[test]
    fn test_checklist_initial_statuses() {
        let items = tracker().build_checklist("demanda_laboral").unwrap();
        let prestaciones = items.iter().find(|i| i.name == "prestaciones").unwrap();
        assert_eq!(prestaciones.status, RequirementStatus::NeedsSearch);
        assert!(prestaciones.legal_basis.is_some());
        let trabajador = items.iter().find(|i| i.name == "trabajador").unwrap();
        assert_eq!(trabajador.status, RequirementStatus::Pending);
        assert!(tracker().build_checklist("unknown").is_none());
    }

    #[test]
    fn test_apply_user_data_with_aliases() {
        let t = tracker();
        let items = t.build_checklist("contrato_arrendamiento").unwrap();
        let data = extract_user_data("Inquilino: Ana López\n- Renta mensual: 800 EUR\nnota sin valor:\n");
        let items = t.apply_user_data("contrato_arrendamiento", items, &data);

        let arrendatario = items.iter().find(|i| i.name == "arrendatario").unwrap();
        assert_eq!(arrendatario.status, RequirementStatus::Collected);
        assert_eq!(arrendatario.value.as_deref(), Some("Ana López"));

        let renta = items.iter().find(|i| i.name == "renta").unwrap();
        assert_eq!(renta.value.as_deref(), Some("800 EUR"));

        let arrendador = items.iter().find(|i| i.name == "arrendador").unwrap();
        assert_eq!(arrendador.status, RequirementStatus::Pending);
    }

    #[test]
    fn test_extract_user_data_keys() {
        let data = extract_user_data("Fecha de ingreso: 1 de marzo de 2020\nhola");
        assert_eq!(data.get("fecha_de_ingreso").map(String::as_str), Some("1 de marzo de 2020"));
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn test_missing_block_lists_states() {
        let t = tracker();
        let kind = t.kind("poder_notarial").unwrap();
        let items = t.build_checklist("poder_notarial").unwrap();
        let mut data = HashMap::new();
        data.insert("otorgante".to_string(), "Luis Pérez".to_string());
        let items = t.apply_user_data("poder_notarial", items, &data);

        let block = missing_block(kind, &items);
        assert!(block.starts_with("DOCUMENT CHECKLIST (Poder notarial):"));
        assert!(block.contains("Still missing:\n- apoderado"));
        assert!(block.contains("Needs legal verification:\n- facultades"));
        assert!(block.contains("Collected:\n- otorgante: Luis Pérez"));
    }

    #[test]
    fn test_template_without_items_rejected() {
        let result = RequirementTracker::from_toml_str(
            r#"
version = 1

[[kinds]]
id = "vacio"
label = "Vacío"
keywords = ["vacio"]
items = []
"#,
        );
        assert!(matches!(result, Err(EngineError::Template(_))));
    }
}
