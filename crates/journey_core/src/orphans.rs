//! Orphaned node detection and cleanup
//!
//! A node is orphaned when no journey's node table and no container node's
//! inner-node list references it.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    CoreError, Result,
    context::PlatformContext,
    gateway::{GatewayError, ObjectGateway},
    journeys::DeletionReport,
    model::Node,
    node_types::is_container,
};

/// Orphans found in a realm
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct OrphanReport {
    /// Sorted by node id
    pub orphans: Vec<Node>,

    /// Node types whose listing failed, with the failure. Orphans of these
    /// types are not in `orphans`.
    pub skipped_types: BTreeMap<String, String>,
}

impl OrphanReport {
    /// `true` when every node type could be scanned
    pub fn is_complete(&self) -> bool {
        self.skipped_types.is_empty()
    }

    pub fn orphan_ids(&self) -> Vec<&str> {
        self.orphans.iter().map(|node| node.id.as_str()).collect()
    }
}

/// Scan every node type of the realm for nodes no journey reaches
pub async fn find_orphaned_nodes<G: ObjectGateway + ?Sized>(
    gateway: &G,
    ctx: &PlatformContext,
) -> Result<OrphanReport> {
    let node_types = gateway
        .list_node_types(ctx)
        .await
        .map_err(|e| CoreError::gateway("listing node types", e))?;

    let listings = join_all(node_types.iter().map(|node_type| async move {
        (
            node_type.id.clone(),
            gateway.list_nodes_by_type(ctx, &node_type.id).await,
        )
    }))
    .await;

    let mut report = OrphanReport::default();
    let mut all_nodes: BTreeMap<String, Node> = BTreeMap::new();
    for (node_type, listing) in listings {
        match listing {
            Ok(nodes) => {
                debug!(node_type = %node_type, count = nodes.len(), "Listed nodes");
                all_nodes.extend(nodes.into_iter().map(|node| (node.id.clone(), node)));
            }
            Err(e) => {
                warn!(node_type = %node_type, error = %e, "Skipping node type");
                report.skipped_types.insert(node_type, e.to_string());
            }
        }
    }

    let active = active_node_ids(gateway, ctx, &all_nodes).await?;
    report.orphans = all_nodes
        .into_values()
        .filter(|node| !active.contains(&node.id))
        .collect();

    info!(
        orphans = report.orphans.len(),
        active = active.len(),
        skipped_types = report.skipped_types.len(),
        "Scanned for orphaned nodes"
    );
    Ok(report)
}

/// Node ids referenced by any journey, containers expanded one level
async fn active_node_ids<G: ObjectGateway + ?Sized>(
    gateway: &G,
    ctx: &PlatformContext,
    listed: &BTreeMap<String, Node>,
) -> Result<BTreeSet<String>> {
    let trees = gateway
        .list_trees(ctx)
        .await
        .map_err(|e| CoreError::gateway("listing journeys", e))?;

    let mut active = BTreeSet::new();
    let mut containers = Vec::new();
    for tree in &trees {
        for (id, node_ref) in &tree.nodes {
            active.insert(id.clone());
            if is_container(&node_ref.node_type) {
                containers.push((id.clone(), node_ref.node_type.clone()));
            }
        }
    }

    // Containers whose type listing failed are read one by one
    let fetched = join_all(
        containers
            .iter()
            .filter(|(id, _)| !listed.contains_key(id))
            .map(|(id, node_type)| gateway.get_node(ctx, id, node_type)),
    )
    .await;

    let mut fetched_nodes = Vec::new();
    for result in fetched {
        match result {
            Ok(node) => fetched_nodes.push(node),
            Err(GatewayError::NotFound { id, .. }) => {
                warn!(node = %id, "Journey references a missing container node");
            }
            Err(e) => return Err(CoreError::gateway("reading container node", e)),
        }
    }

    let listed_containers = containers.iter().filter_map(|(id, _)| listed.get(id));
    for container in listed_containers.chain(fetched_nodes.iter()) {
        active.extend(container.inner_nodes().into_iter().map(|inner| inner.id));
    }
    Ok(active)
}

/// Delete orphaned nodes. Deletions are independent; failures are recorded
/// in the returned report.
pub async fn remove_orphaned_nodes<G: ObjectGateway + ?Sized>(
    gateway: &G,
    ctx: &PlatformContext,
    orphans: &[Node],
) -> DeletionReport {
    let results = join_all(orphans.iter().map(|node| async move {
        let result = gateway.delete_node(ctx, &node.id, node.type_name()).await;
        (node.id.clone(), result)
    }))
    .await;

    let mut report = DeletionReport::default();
    for (id, result) in results {
        match result {
            Ok(_) => report.deleted(id),
            Err(e) => {
                warn!(node = %id, error = %e, "Failed to delete orphaned node");
                report.failed(id, e);
            }
        }
    }
    info!(
        deleted = report.deleted_nodes.len(),
        failed = report.failed_nodes.len(),
        "Removed orphaned nodes"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Journey;
    use crate::test_utils::test::InMemoryGateway;
    use pretty_assertions::assert_eq;

    /// Ten message nodes, seven referenced: five from `First`, one only
    /// through the page node's inner list, one from `Second`
    fn realm() -> InMemoryGateway {
        let gateway = InMemoryGateway::new();
        for i in 0..10 {
            gateway.add_node(Node::new(format!("m{}", i), "MessageNode"));
        }
        gateway.add_node(Node::new("page-1", "PageNode").with_property(
            "nodes",
            serde_json::json!([{ "_id": "m5", "nodeType": "MessageNode" }]),
        ));

        let mut first = Journey::new("First").with_node("page-1", "PageNode");
        for i in 0..5 {
            first = first.with_node(format!("m{}", i), "MessageNode");
        }
        gateway.add_tree(first);
        gateway.add_tree(Journey::new("Second").with_node("m6", "MessageNode"));
        gateway
    }

    #[tokio::test]
    async fn test_finds_unreferenced_nodes() {
        let gateway = realm();
        let ctx = PlatformContext::default();
        let report = find_orphaned_nodes(&gateway, &ctx).await.unwrap();
        assert_eq!(report.orphan_ids(), vec!["m7", "m8", "m9"]);
        assert!(report.is_complete());
        assert!(gateway.calls_to("get_node").is_empty());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_failed_listing_is_reported() {
        let gateway = realm();
        gateway.fail(
            "list_nodes_by_type",
            "MessageNode",
            GatewayError::server(500, "listing failed"),
        );
        let ctx = PlatformContext::default();
        let report = find_orphaned_nodes(&gateway, &ctx).await.unwrap();
        assert!(report.orphans.is_empty());
        assert!(!report.is_complete());
        assert_eq!(
            report.skipped_types["MessageNode"],
            "Server error 500: listing failed"
        );
        assert!(logs_contain("Skipping node type"));
    }

    #[tokio::test]
    async fn test_unlisted_container_is_read_directly() {
        let gateway = realm();
        gateway.fail(
            "list_nodes_by_type",
            "PageNode",
            GatewayError::server(500, "listing failed"),
        );
        let ctx = PlatformContext::default();
        let report = find_orphaned_nodes(&gateway, &ctx).await.unwrap();
        assert_eq!(report.orphan_ids(), vec!["m7", "m8", "m9"]);
        assert_eq!(gateway.calls_to("get_node"), vec!["page-1"]);
    }

    #[tokio::test]
    async fn test_removal_continues_past_failures() {
        let gateway = realm();
        gateway.fail(
            "delete_node",
            "m8",
            GatewayError::server(503, "unavailable"),
        );
        let ctx = PlatformContext::default();
        let report = find_orphaned_nodes(&gateway, &ctx).await.unwrap();

        let deletion = remove_orphaned_nodes(&gateway, &ctx, &report.orphans).await;
        assert_eq!(deletion.deleted_nodes, vec!["m7", "m9"]);
        assert_eq!(
            deletion.failed_nodes.keys().collect::<Vec<_>>(),
            vec!["m8"]
        );

        let remaining = find_orphaned_nodes(&gateway, &ctx).await.unwrap();
        assert_eq!(remaining.orphan_ids(), vec!["m8"]);
    }
}
