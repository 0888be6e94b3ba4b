//! Realm-level journey operations: deletion, listing, description and
//! custom node analysis

use std::collections::BTreeMap;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    CoreError, Result,
    context::PlatformContext,
    export::JourneyBundle,
    gateway::{GatewayError, ObjectGateway},
    model::{Journey, ObjectKind, Theme},
    node_types::{is_container, ootb_node_types},
};

/// Per-node status of a multi-node deletion
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DeletionReport {
    pub deleted_nodes: Vec<String>,

    /// Node id -> failure
    pub failed_nodes: BTreeMap<String, String>,
}

impl DeletionReport {
    pub(crate) fn deleted(&mut self, id: String) {
        self.deleted_nodes.push(id);
    }

    pub(crate) fn failed(&mut self, id: String, error: impl ToString) {
        self.failed_nodes.insert(id, error.to_string());
    }

    pub fn is_complete(&self) -> bool {
        self.failed_nodes.is_empty()
    }
}

/// Outcome of deleting one journey
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneyDeletion {
    pub journey: String,

    /// Empty unless the deletion was deep
    pub nodes: DeletionReport,
}

/// Outcome of deleting every journey of a realm
#[derive(Debug, Default)]
pub struct BatchDeletion {
    pub deleted: Vec<JourneyDeletion>,

    /// Journeys whose tree could not be deleted
    pub failed: BTreeMap<String, CoreError>,
}

impl BatchDeletion {
    pub fn deleted_node_count(&self) -> usize {
        self.deleted
            .iter()
            .map(|journey| journey.nodes.deleted_nodes.len())
            .sum()
    }

    pub fn failed_node_count(&self) -> usize {
        self.deleted
            .iter()
            .map(|journey| journey.nodes.failed_nodes.len())
            .sum()
    }
}

/// Delete a journey. A deep deletion also removes every node of the
/// journey and every inner node of its containers.
pub async fn delete_journey<G: ObjectGateway + ?Sized>(
    gateway: &G,
    ctx: &PlatformContext,
    name: &str,
    deep: bool,
) -> Result<JourneyDeletion> {
    let tree = gateway
        .delete_tree(ctx, name)
        .await
        .map_err(|e| CoreError::lookup(ObjectKind::Tree, name, e))?;
    debug!(journey = %name, deep, "Deleted journey flow");

    let mut nodes = DeletionReport::default();
    if deep {
        let outcomes = join_all(
            tree.nodes
                .iter()
                .map(|(id, node_ref)| delete_node_deep(gateway, ctx, id, &node_ref.node_type)),
        )
        .await;
        for (id, result) in outcomes.into_iter().flatten() {
            match result {
                Ok(()) => nodes.deleted(id),
                Err(e) => {
                    warn!(journey = %name, node = %id, error = %e, "Failed to delete node");
                    nodes.failed(id, e);
                }
            }
        }
    }

    info!(
        journey = %name,
        deleted_nodes = nodes.deleted_nodes.len(),
        failed_nodes = nodes.failed_nodes.len(),
        "Deleted journey"
    );
    Ok(JourneyDeletion {
        journey: name.to_string(),
        nodes,
    })
}

/// Delete one node; a container's inner nodes go first
async fn delete_node_deep<G: ObjectGateway + ?Sized>(
    gateway: &G,
    ctx: &PlatformContext,
    id: &str,
    node_type: &str,
) -> Vec<(String, std::result::Result<(), GatewayError>)> {
    let container = is_container(node_type);
    let mut outcomes = Vec::new();

    if container {
        let inner = match gateway.get_node(ctx, id, node_type).await {
            Ok(node) => node.inner_nodes(),
            Err(e) => {
                outcomes.push((id.to_string(), Err(e)));
                return outcomes;
            }
        };
        let results = join_all(
            inner
                .iter()
                .map(|inner| gateway.delete_node(ctx, &inner.id, &inner.node_type)),
        )
        .await;
        outcomes.extend(
            inner
                .into_iter()
                .zip(results)
                .map(|(inner, result)| (inner.id, result.map(|_| ()))),
        );
    }

    let result = match gateway.delete_node(ctx, id, node_type).await {
        Ok(_) => Ok(()),
        // Some platform versions remove a container along with its inner nodes
        Err(e) if container && e.is_node_already_gone() => Ok(()),
        Err(e) => Err(e),
    };
    outcomes.push((id.to_string(), result));
    outcomes
}

/// Delete every journey of the realm
pub async fn delete_journeys<G: ObjectGateway + ?Sized>(
    gateway: &G,
    ctx: &PlatformContext,
    deep: bool,
) -> Result<BatchDeletion> {
    let mut names: Vec<String> = gateway
        .list_trees(ctx)
        .await
        .map_err(|e| CoreError::gateway("listing journeys", e))?
        .into_iter()
        .map(|tree| tree.id)
        .collect();
    names.sort();

    let mut batch = BatchDeletion::default();
    for name in names {
        match delete_journey(gateway, ctx, &name, deep).await {
            Ok(deletion) => batch.deleted.push(deletion),
            Err(e) => {
                crate::log_error!(format!("Failed to delete journey {}", name), e);
                batch.failed.insert(name, e);
            }
        }
    }

    info!(
        journeys = batch.deleted.len(),
        failed_journeys = batch.failed.len(),
        deleted_nodes = batch.deleted_node_count(),
        failed_nodes = batch.failed_node_count(),
        "Deleted journeys"
    );
    Ok(batch)
}

/// Summary of what a bundle contains
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneyDescription {
    pub name: String,
    pub enabled: bool,

    /// Node type -> count, over nodes and inner nodes
    pub node_types: BTreeMap<String, usize>,

    /// Script name -> description
    pub scripts: BTreeMap<String, Option<String>>,

    /// Template id -> display name
    pub email_templates: BTreeMap<String, Option<String>>,

    pub themes: Vec<String>,
    pub social_identity_providers: Vec<String>,
    pub saml2_entities: Vec<String>,
    pub circles_of_trust: Vec<String>,
}

pub fn describe_bundle(bundle: &JourneyBundle) -> JourneyDescription {
    let mut node_types = BTreeMap::new();
    for node in bundle.all_nodes() {
        *node_types.entry(node.type_name().to_string()).or_insert(0) += 1;
    }

    JourneyDescription {
        name: bundle.name().to_string(),
        enabled: bundle.tree.enabled(),
        node_types,
        scripts: bundle
            .scripts
            .values()
            .map(|script| {
                (
                    script.name.clone(),
                    script.description().map(str::to_string),
                )
            })
            .collect(),
        email_templates: bundle
            .email_templates
            .values()
            .map(|template| {
                (
                    template.id.clone(),
                    template.display_name().map(str::to_string),
                )
            })
            .collect(),
        themes: bundle.themes.iter().map(|theme| theme.name.clone()).collect(),
        social_identity_providers: bundle.social_identity_providers.keys().cloned().collect(),
        saml2_entities: bundle
            .saml2_entities
            .values()
            .map(|entity| entity.entity_id.clone())
            .collect(),
        circles_of_trust: bundle.circles_of_trust.keys().cloned().collect(),
    }
}

/// `true` when the journey uses a node type that does not ship with the
/// platform version of `ctx`. Without a known version every journey counts
/// as custom.
pub async fn is_custom<G: ObjectGateway + ?Sized>(
    gateway: &G,
    ctx: &PlatformContext,
    tree: &Journey,
) -> Result<bool> {
    let Some(ootb) = ctx.am_version.as_deref().and_then(ootb_node_types) else {
        debug!(journey = %tree.id, version = ?ctx.am_version, "No node catalogue for version");
        return Ok(true);
    };

    for (id, node_ref) in &tree.nodes {
        if !ootb.contains(node_ref.node_type.as_str()) {
            debug!(journey = %tree.id, node_type = %node_ref.node_type, "Custom node type");
            return Ok(true);
        }
        if is_container(&node_ref.node_type) {
            let container = gateway
                .get_node(ctx, id, &node_ref.node_type)
                .await
                .map_err(|e| CoreError::lookup(ObjectKind::Node, id, e))?;
            if let Some(inner) = container
                .inner_nodes()
                .into_iter()
                .find(|inner| !ootb.contains(inner.node_type.as_str()))
            {
                debug!(journey = %tree.id, node_type = %inner.node_type, "Custom inner node type");
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JourneySummary {
    pub name: String,
    pub enabled: bool,

    /// Only set when custom analysis was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<bool>,
}

/// Journeys of the realm sorted by name
pub async fn list_journeys<G: ObjectGateway + ?Sized>(
    gateway: &G,
    ctx: &PlatformContext,
    analyze_custom: bool,
) -> Result<Vec<JourneySummary>> {
    let mut trees = gateway
        .list_trees(ctx)
        .await
        .map_err(|e| CoreError::gateway("listing journeys", e))?;
    trees.sort_by(|a, b| a.id.cmp(&b.id));

    let mut summaries = Vec::with_capacity(trees.len());
    for tree in &trees {
        let custom = if analyze_custom {
            Some(is_custom(gateway, ctx, tree).await?)
        } else {
            None
        };
        summaries.push(JourneySummary {
            name: tree.id.clone(),
            enabled: tree.enabled(),
            custom,
        });
    }
    Ok(summaries)
}

/// Theme by id or, failing that, by name
pub async fn find_theme<G: ObjectGateway + ?Sized>(
    gateway: &G,
    ctx: &PlatformContext,
    id_or_name: &str,
) -> Result<Theme> {
    let mut themes = gateway
        .get_themes(ctx)
        .await
        .map_err(|e| CoreError::gateway("reading themes", e))?;
    let by_id = themes.iter().position(|theme| theme.id == id_or_name);
    let index = by_id.or_else(|| themes.iter().position(|theme| theme.name == id_or_name));
    match index {
        Some(index) => Ok(themes.swap_remove(index)),
        None => Err(CoreError::not_found(ObjectKind::Theme, id_or_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportOptions;
    use crate::export::JourneyExporter;
    use crate::gateway::NODE_DID_NOT_EXIST_MESSAGE;
    use crate::model::Node;
    use crate::test_utils::test::{InMemoryGateway, login_realm};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_shallow_delete_keeps_nodes() {
        let gateway = login_realm();
        let ctx = PlatformContext::default();
        let deletion = delete_journey(&gateway, &ctx, "Login", false).await.unwrap();
        assert!(deletion.nodes.deleted_nodes.is_empty());

        let state = gateway.snapshot();
        assert!(state.trees.is_empty());
        assert_eq!(state.nodes.len(), 11);
    }

    #[tokio::test]
    async fn test_deep_delete_removes_inner_nodes() {
        let gateway = login_realm();
        let ctx = PlatformContext::default();
        let deletion = delete_journey(&gateway, &ctx, "Login", true).await.unwrap();

        assert!(deletion.nodes.is_complete());
        assert_eq!(deletion.nodes.deleted_nodes.len(), 11);
        assert!(gateway.snapshot().nodes.is_empty());

        // inner nodes are removed before their container
        let deletes = gateway.calls_to("delete_node");
        let position = |id: &str| deletes.iter().position(|call| call == id).unwrap();
        assert!(position("inner-user") < position("page-1"));
    }

    #[tokio::test]
    async fn test_container_already_gone_counts_as_deleted() {
        let gateway = login_realm();
        gateway.fail(
            "delete_node",
            "page-1",
            GatewayError::server(500, NODE_DID_NOT_EXIST_MESSAGE),
        );
        let ctx = PlatformContext::default();
        let deletion = delete_journey(&gateway, &ctx, "Login", true).await.unwrap();
        assert!(deletion.nodes.is_complete());
        assert!(deletion.nodes.deleted_nodes.contains(&"page-1".to_string()));
    }

    #[tokio::test]
    async fn test_node_failures_are_recorded() {
        let gateway = login_realm();
        gateway.fail(
            "delete_node",
            "inner-pass",
            GatewayError::server(503, "unavailable"),
        );
        let ctx = PlatformContext::default();
        let deletion = delete_journey(&gateway, &ctx, "Login", true).await.unwrap();
        assert_eq!(
            deletion.nodes.failed_nodes.keys().collect::<Vec<_>>(),
            vec!["inner-pass"]
        );
        assert_eq!(deletion.nodes.deleted_nodes.len(), 10);
    }

    #[tokio::test]
    async fn test_delete_missing_journey() {
        let gateway = InMemoryGateway::new();
        let ctx = PlatformContext::default();
        let err = delete_journey(&gateway, &ctx, "Nope", true).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: ObjectKind::Tree, .. }));
    }

    #[tokio::test]
    async fn test_delete_all_journeys() {
        let gateway = login_realm();
        gateway.add_tree(Journey::new("Empty"));
        let ctx = PlatformContext::default();
        let batch = delete_journeys(&gateway, &ctx, true).await.unwrap();
        assert_eq!(batch.deleted.len(), 2);
        assert_eq!(batch.deleted_node_count(), 11);
        assert_eq!(batch.failed_node_count(), 0);
        assert!(batch.failed.is_empty());
    }

    #[tokio::test]
    async fn test_describe_bundle() {
        let gateway = login_realm();
        let ctx = PlatformContext::default();
        let bundle = JourneyExporter::new(&gateway, &ctx)
            .export_journey("Login", &ExportOptions::default())
            .await
            .unwrap();
        let description = describe_bundle(&bundle);

        assert_eq!(description.node_types["ScriptedDecisionNode"], 3);
        assert_eq!(description.node_types["PageNode"], 1);
        assert_eq!(description.node_types.values().sum::<usize>(), 11);
        assert_eq!(
            description.scripts.keys().collect::<Vec<_>>(),
            vec!["Google", "Inner", "Outer", "Social"]
        );
        assert_eq!(
            description.email_templates["emailTemplate/welcome"].as_deref(),
            Some("Welcome")
        );
        assert_eq!(description.themes, vec!["Blue"]);
        assert_eq!(description.social_identity_providers, vec!["google"]);
    }

    #[tokio::test]
    async fn test_custom_analysis() {
        let gateway = login_realm();
        let v72 = PlatformContext::default().with_version("7.2.0");
        let login = gateway.snapshot().trees["Login"].clone();
        assert!(!is_custom(&gateway, &v72, &login).await.unwrap());

        // unknown or missing version
        assert!(is_custom(&gateway, &PlatformContext::default(), &login).await.unwrap());
        let v9 = PlatformContext::default().with_version("9.9.0");
        assert!(is_custom(&gateway, &v9, &login).await.unwrap());

        // custom type hidden inside a page
        gateway.add_node(Node::new("page-2", "PageNode").with_property(
            "nodes",
            serde_json::json!([{ "_id": "risk-1", "nodeType": "AcmeRiskNode" }]),
        ));
        let paged = Journey::new("Paged").with_node("page-2", "PageNode");
        assert!(is_custom(&gateway, &v72, &paged).await.unwrap());

        let vendor = Journey::new("Vendor").with_node("v-1", "AcmeRiskNode");
        assert!(is_custom(&gateway, &v72, &vendor).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_journeys() {
        let gateway = login_realm();
        let mut old = Journey::new("Old");
        old.extra
            .insert("enabled".to_string(), serde_json::json!(false));
        gateway.add_tree(old);
        let ctx = PlatformContext::default().with_version("7.2.0");

        let summaries = list_journeys(&gateway, &ctx, false).await.unwrap();
        assert_eq!(
            summaries,
            vec![
                JourneySummary {
                    name: "Login".to_string(),
                    enabled: true,
                    custom: None,
                },
                JourneySummary {
                    name: "Old".to_string(),
                    enabled: false,
                    custom: None,
                },
            ]
        );

        let analyzed = list_journeys(&gateway, &ctx, true).await.unwrap();
        assert!(analyzed.iter().all(|summary| summary.custom == Some(false)));
    }

    #[tokio::test]
    async fn test_find_theme() {
        let gateway = login_realm();
        let ctx = PlatformContext::default();
        assert_eq!(find_theme(&gateway, &ctx, "theme-red").await.unwrap().name, "Red");
        assert_eq!(find_theme(&gateway, &ctx, "Gold").await.unwrap().id, "theme-gold");

        let err = find_theme(&gateway, &ctx, "Starter").await.unwrap_err();
        assert_eq!(err.to_string(), "theme 'Starter' not found");
    }
}
