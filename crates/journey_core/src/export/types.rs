//! Types for journey export/import

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    CoreError, Result,
    context::PlatformContext,
    export::{EXPORT_TOOL, EXPORT_TOOL_VERSION},
    model::{
        CircleOfTrust, EmailTemplate, Journey, Node, ObjectKind, Record, Saml2Entity, Script,
        SocialProvider, Theme,
    },
};

/// Provenance block written once per export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMeta {
    pub origin_realm: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_am_version: Option<String>,

    pub export_date: DateTime<Utc>,

    pub export_tool: String,

    pub export_tool_version: String,

    #[serde(flatten)]
    pub extra: Record,
}

impl ExportMeta {
    pub fn new(ctx: &PlatformContext) -> Self {
        Self {
            origin_realm: ctx.realm_name().to_string(),
            origin_am_version: ctx.am_version.clone(),
            export_date: Utc::now(),
            export_tool: EXPORT_TOOL.to_string(),
            export_tool_version: EXPORT_TOOL_VERSION.to_string(),
            extra: Record::new(),
        }
    }
}

/// One journey with every object it needs, keyed by original object id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ExportMeta>,

    #[serde(rename = "innerNodes", alias = "innernodes", default)]
    pub inner_nodes: BTreeMap<String, Node>,

    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,

    #[serde(default)]
    pub scripts: BTreeMap<String, Script>,

    /// Keyed by template name without the `emailTemplate/` prefix
    #[serde(rename = "emailTemplates", default)]
    pub email_templates: BTreeMap<String, EmailTemplate>,

    #[serde(rename = "socialIdentityProviders", default)]
    pub social_identity_providers: BTreeMap<String, SocialProvider>,

    #[serde(default)]
    pub themes: Vec<Theme>,

    #[serde(rename = "saml2Entities", alias = "federationEntities", default)]
    pub saml2_entities: BTreeMap<String, Saml2Entity>,

    #[serde(rename = "circlesOfTrust", default)]
    pub circles_of_trust: BTreeMap<String, CircleOfTrust>,

    #[serde(alias = "journey")]
    pub tree: Journey,
}

impl JourneyBundle {
    pub fn new(tree: Journey) -> Self {
        Self {
            meta: None,
            inner_nodes: BTreeMap::new(),
            nodes: BTreeMap::new(),
            scripts: BTreeMap::new(),
            email_templates: BTreeMap::new(),
            social_identity_providers: BTreeMap::new(),
            themes: Vec::new(),
            saml2_entities: BTreeMap::new(),
            circles_of_trust: BTreeMap::new(),
            tree,
        }
    }

    pub fn name(&self) -> &str {
        &self.tree.id
    }

    /// Nodes and inner nodes together
    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().chain(self.inner_nodes.values())
    }
}

/// Several journeys in one document, metadata only at the top
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiJourneyBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ExportMeta>,

    /// Keyed by journey name, in file order
    pub trees: IndexMap<String, JourneyBundle>,
}

/// Either shape of an export file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportDocument {
    Multi(MultiJourneyBundle),
    Single(Box<JourneyBundle>),
}

impl ExportDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CoreError::serialization("export document", e))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::serialization("export document", e))
    }

    /// Journey names in document order
    pub fn journey_names(&self) -> Vec<String> {
        match self {
            ExportDocument::Multi(multi) => multi.trees.keys().cloned().collect(),
            ExportDocument::Single(bundle) => vec![bundle.name().to_string()],
        }
    }

    pub fn journey(&self, name: &str) -> Option<&JourneyBundle> {
        match self {
            ExportDocument::Multi(multi) => multi.trees.get(name),
            ExportDocument::Single(bundle) if bundle.name() == name => Some(bundle),
            ExportDocument::Single(_) => None,
        }
    }

    pub fn first_journey(&self) -> Option<&JourneyBundle> {
        match self {
            ExportDocument::Multi(multi) => multi.trees.values().next(),
            ExportDocument::Single(bundle) => Some(bundle),
        }
    }

    /// All bundles keyed by journey name
    pub fn into_bundles(self) -> BTreeMap<String, JourneyBundle> {
        match self {
            ExportDocument::Multi(multi) => multi.trees.into_iter().collect(),
            ExportDocument::Single(bundle) => {
                let mut bundles = BTreeMap::new();
                bundles.insert(bundle.name().to_string(), *bundle);
                bundles
            }
        }
    }
}

/// Result of installing a single object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectOutcome {
    /// Written with a single upsert
    Upserted,
    Created,
    Updated,
    Failed { message: String },
}

impl ObjectOutcome {
    pub fn failed(message: impl ToString) -> Self {
        Self::Failed {
            message: message.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ObjectOutcome::Failed { .. })
    }
}

/// Per-object status of one journey import
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub journey: String,

    pub objects: BTreeMap<ObjectKind, BTreeMap<String, ObjectOutcome>>,

    /// Old node id -> new node id, empty unless ids were regenerated
    pub id_remap: BTreeMap<String, String>,
}

impl ImportReport {
    pub fn new(journey: impl Into<String>) -> Self {
        Self {
            journey: journey.into(),
            objects: BTreeMap::new(),
            id_remap: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, kind: ObjectKind, id: impl Into<String>, outcome: ObjectOutcome) {
        self.objects
            .entry(kind)
            .or_default()
            .insert(id.into(), outcome);
    }

    pub fn outcome(&self, kind: ObjectKind, id: &str) -> Option<&ObjectOutcome> {
        self.objects.get(&kind).and_then(|objects| objects.get(id))
    }

    pub fn failures(&self) -> impl Iterator<Item = (ObjectKind, &str, &ObjectOutcome)> {
        self.objects.iter().flat_map(|(kind, objects)| {
            objects
                .iter()
                .filter(|(_, outcome)| outcome.is_failure())
                .map(move |(id, outcome)| (*kind, id.as_str(), outcome))
        })
    }

    /// `true` when no object failed
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Outcome of importing a batch of journeys
#[derive(Debug, Default)]
pub struct BatchImportReport {
    /// Install order the resolver computed
    pub order: Vec<String>,

    pub imported: Vec<ImportReport>,

    /// Journeys whose import failed
    pub failed: BTreeMap<String, CoreError>,

    /// Journeys not installed, with their outstanding dependencies
    pub unresolved: BTreeMap<String, Vec<String>>,
}

impl BatchImportReport {
    /// The unresolved set as a single diagnostic
    pub fn unresolved_error(&self) -> Option<CoreError> {
        if self.unresolved.is_empty() {
            None
        } else {
            Some(CoreError::DependencyUnresolved {
                unresolved: self.unresolved.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_document_with_legacy_inner_nodes() {
        let text = json!({
            "tree": { "_id": "Login", "nodes": { "p1": { "nodeType": "PageNode" } } },
            "nodes": {},
            "innernodes": {
                "i1": { "_id": "i1", "_type": { "_id": "UsernameCollectorNode" } }
            }
        })
        .to_string();
        let document = ExportDocument::from_json(&text).unwrap();
        let bundle = document.journey("Login").unwrap();
        assert!(bundle.inner_nodes.contains_key("i1"));
        assert_eq!(document.journey_names(), vec!["Login"]);
        assert!(document.journey("Other").is_none());
    }

    #[test]
    fn test_multi_document_has_one_meta_block() {
        let ctx = PlatformContext::default();
        let mut trees = IndexMap::new();
        trees.insert("A".to_string(), JourneyBundle::new(Journey::new("A")));
        trees.insert("B".to_string(), JourneyBundle::new(Journey::new("B")));
        let document = ExportDocument::Multi(MultiJourneyBundle {
            meta: Some(ExportMeta::new(&ctx)),
            trees,
        });

        let text = document.to_json().unwrap();
        assert_eq!(text.matches("exportTool\"").count(), 1);

        let parsed = ExportDocument::from_json(&text).unwrap();
        assert_eq!(parsed.first_journey().unwrap().name(), "A");
        assert_eq!(parsed, document);
    }

    #[test]
    fn test_multi_document_keeps_file_order() {
        let text = r#"{
            "trees": {
                "Zeta": { "tree": { "_id": "Zeta", "nodes": {} }, "nodes": {} },
                "Alpha": { "tree": { "_id": "Alpha", "nodes": {} }, "nodes": {} }
            }
        }"#;
        let document = ExportDocument::from_json(text).unwrap();
        assert_eq!(document.journey_names(), vec!["Zeta", "Alpha"]);
        assert_eq!(document.first_journey().unwrap().name(), "Zeta");

        let written = document.to_json().unwrap();
        assert!(written.find("\"Zeta\"").unwrap() < written.find("\"Alpha\"").unwrap());
    }

    #[test]
    fn test_report_failures() {
        let mut report = ImportReport::new("Login");
        report.record(ObjectKind::Script, "s1", ObjectOutcome::Upserted);
        assert!(report.is_complete());
        report.record(
            ObjectKind::CircleOfTrust,
            "cot",
            ObjectOutcome::failed("rejected"),
        );
        let failures: Vec<_> = report.failures().map(|(kind, id, _)| (kind, id)).collect();
        assert_eq!(failures, vec![(ObjectKind::CircleOfTrust, "cot")]);
    }
}
