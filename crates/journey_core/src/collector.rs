//! Dependency collection
//!
//! Walks a journey's node graph once and gathers every object the journey
//! needs. Nodes are fetched in two concurrent waves: the journey's own nodes
//! first, then the inner nodes of any containers found among them.
//! Dependency detection looks only at each node's type and properties.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{
    CoreError, Result,
    context::PlatformContext,
    export::JourneyBundle,
    gateway::ObjectGateway,
    model::{
        CircleOfTrust, EmailTemplate, InnerNodeRef, Journey, Node, ObjectKind, Saml2Entity,
        Saml2EntitySummary, Script, SocialProvider, Theme,
    },
    node_types::{EMPTY_SCRIPT, NodeClass},
    script::{ScriptBody, encode_base64_url},
};

/// Federation entities and circles of trust of the realm
struct FederationCatalog {
    entities: Vec<Saml2EntitySummary>,
    circles: Vec<CircleOfTrust>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Outer,
    Inner,
}

/// What the inspected nodes of one journey reference
#[derive(Debug, Default)]
struct DependencyScan {
    include_dependencies: bool,
    scripts: BTreeSet<String>,
    email_templates: BTreeSet<String>,
    saml2_entity_ids: BTreeSet<String>,
    social_providers: bool,
    /// Union of all provider selections; empty means keep every provider
    provider_filter: BTreeSet<String>,
    theme_refs: BTreeSet<String>,
    inner_nodes: Vec<InnerNodeRef>,
}

impl DependencyScan {
    fn new(include_dependencies: bool) -> Self {
        Self {
            include_dependencies,
            ..Self::default()
        }
    }

    fn inspect(&mut self, node: &Node, scope: Scope, ctx: &PlatformContext) {
        let class = NodeClass::of(node.type_name());

        if class.container && scope == Scope::Outer {
            self.inner_nodes.extend(node.inner_nodes());
            if self.include_dependencies && ctx.supports_themes() {
                if let Some(theme) = node.stage().and_then(theme_reference_from_stage) {
                    self.theme_refs.insert(theme);
                }
            }
        }

        if !self.include_dependencies {
            return;
        }

        if class.scripted {
            if let Some(script) = node.script().filter(|s| *s != EMPTY_SCRIPT) {
                self.scripts.insert(script.to_string());
            }
        }
        if class.email_template && ctx.supports_email_templates() {
            if let Some(name) = node.email_template_name() {
                self.email_templates.insert(name.to_string());
            }
        }
        if class.saml2 {
            if scope == Scope::Inner {
                warn!(node = %node.id, "SAML2 inner node");
            }
            self.saml2_entity_ids.extend(node.saml2_entity_ids());
        }
        if class.social_handler {
            self.social_providers = true;
        }
        if class.provider_select {
            self.provider_filter.extend(node.filtered_providers());
        }
    }
}

/// Theme id referenced by a page node's `stage` field
///
/// Current platforms store a JSON object with a `themeId` member; older ones
/// store `themeId=<id>`. Anything else means no theme.
pub fn theme_reference_from_stage(stage: &str) -> Option<String> {
    let structured = serde_json::from_str::<Value>(stage)
        .ok()
        .and_then(|value| value.get("themeId").and_then(Value::as_str).map(str::to_string));

    structured
        .or_else(|| {
            stage
                .strip_prefix("themeId=")
                .map(|rest| rest.split_once('=').map_or(rest, |(head, _)| head).to_string())
        })
        .filter(|theme| !theme.is_empty())
}

/// Collects journeys and their dependencies through a gateway
///
/// The federation catalog is read at most once per collector, so one
/// collector should serve exactly one top-level export run.
pub struct DependencyCollector<'a, G: ObjectGateway + ?Sized> {
    gateway: &'a G,
    ctx: &'a PlatformContext,
    federation: OnceCell<FederationCatalog>,
}

impl<'a, G: ObjectGateway + ?Sized> DependencyCollector<'a, G> {
    pub fn new(gateway: &'a G, ctx: &'a PlatformContext) -> Self {
        Self {
            gateway,
            ctx,
            federation: OnceCell::new(),
        }
    }

    /// Bundle a fetched journey with its nodes and, when requested, every
    /// dependency. Script bodies are left in the gateway's base64 form.
    pub async fn collect(
        &self,
        tree: Journey,
        include_dependencies: bool,
    ) -> Result<JourneyBundle> {
        let journey = tree.id.clone();
        debug!(journey = %journey, nodes = tree.nodes.len(), "Collecting journey");

        let mut scan = DependencyScan::new(include_dependencies);
        let refs: Vec<(String, String)> = tree
            .nodes
            .iter()
            .map(|(id, node_ref)| (id.clone(), node_ref.node_type.clone()))
            .collect();
        let mut bundle = JourneyBundle::new(tree);

        for node in self.fetch_nodes(&refs, false).await? {
            scan.inspect(&node, Scope::Outer, self.ctx);
            bundle.nodes.insert(node.id.clone(), node);
        }

        let inner_refs: Vec<(String, String)> = scan
            .inner_nodes
            .drain(..)
            .map(|inner| (inner.id, inner.node_type))
            .collect();
        for node in self.fetch_nodes(&inner_refs, true).await? {
            scan.inspect(&node, Scope::Inner, self.ctx);
            bundle.inner_nodes.insert(node.id.clone(), node);
        }

        if !include_dependencies {
            return Ok(bundle);
        }

        bundle.email_templates = self.fetch_email_templates(&scan.email_templates).await;

        if !scan.saml2_entity_ids.is_empty() {
            let (entities, circles) = self.federation_dependencies(&scan.saml2_entity_ids).await?;
            bundle.saml2_entities = entities;
            bundle.circles_of_trust = circles;
        }

        if scan.social_providers {
            for provider in self.fetch_social_providers(&scan.provider_filter).await? {
                if let Some(transform) = &provider.transform {
                    scan.scripts.insert(transform.clone());
                }
                bundle
                    .social_identity_providers
                    .insert(provider.id.clone(), provider);
            }
        }

        bundle.scripts = self.fetch_scripts(&scan.scripts).await?;

        if self.ctx.supports_themes() {
            bundle.themes = self.fetch_themes(&journey, &scan.theme_refs).await;
        }

        info!(
            journey = %journey,
            nodes = bundle.nodes.len(),
            inner_nodes = bundle.inner_nodes.len(),
            scripts = bundle.scripts.len(),
            "Collected journey dependencies"
        );
        Ok(bundle)
    }

    /// Fetch a wave of nodes concurrently; every fetch runs to completion and
    /// the first failure is returned
    async fn fetch_nodes(&self, refs: &[(String, String)], inner: bool) -> Result<Vec<Node>> {
        let label = if inner { "inner node" } else { "node" };
        let results = join_all(
            refs.iter()
                .map(|(id, node_type)| self.gateway.get_node(self.ctx, id, node_type)),
        )
        .await;

        let mut nodes = Vec::with_capacity(results.len());
        let mut first_error = None;
        for ((id, node_type), result) in refs.iter().zip(results) {
            match result {
                Ok(node) => {
                    debug!(node = %id, node_type = %node_type, "Read {}", label);
                    nodes.push(node);
                }
                Err(e) => {
                    warn!(
                        node = %id,
                        node_type = %node_type,
                        error = %e,
                        "Failed to read {}",
                        label
                    );
                    first_error.get_or_insert_with(|| {
                        CoreError::gateway(format!("reading {} '{}' ({})", label, id, node_type), e)
                    });
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(nodes),
        }
    }

    async fn fetch_email_templates(
        &self,
        names: &BTreeSet<String>,
    ) -> BTreeMap<String, EmailTemplate> {
        let results = join_all(
            names
                .iter()
                .map(|name| self.gateway.get_email_template(self.ctx, name)),
        )
        .await;

        let mut templates = BTreeMap::new();
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(template) => {
                    templates.insert(template.key().to_string(), template);
                }
                Err(e) => {
                    let error = CoreError::lookup(ObjectKind::EmailTemplate, name, e);
                    crate::log_error!(format!("Skipping email template \"{}\"", name), error);
                }
            }
        }
        templates
    }

    async fn federation(&self) -> Result<&FederationCatalog> {
        self.federation
            .get_or_try_init(|| async {
                debug!("Reading federation catalog");
                let entities = self
                    .gateway
                    .list_saml2_entities(self.ctx)
                    .await
                    .map_err(|e| CoreError::gateway("listing SAML2 entities", e))?;
                let circles = self
                    .gateway
                    .list_circles_of_trust(self.ctx)
                    .await
                    .map_err(|e| CoreError::gateway("listing circles of trust", e))?;
                Ok(FederationCatalog { entities, circles })
            })
            .await
    }

    async fn federation_dependencies(
        &self,
        entity_ids: &BTreeSet<String>,
    ) -> Result<(BTreeMap<String, Saml2Entity>, BTreeMap<String, CircleOfTrust>)> {
        let catalog = self.federation().await?;

        let summaries: Vec<&Saml2EntitySummary> = entity_ids
            .iter()
            .filter_map(|entity_id| {
                let summary = catalog.entities.iter().find(|e| &e.entity_id == entity_id);
                if summary.is_none() {
                    warn!(entity_id = %entity_id, "SAML2 entity not found in realm");
                }
                summary
            })
            .collect();

        let entities = join_all(summaries.into_iter().map(|s| self.fetch_saml2_entity(s)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let trusted: Vec<String> = entities.iter().map(|e| e.entity_id.clone()).collect();
        let circles = catalog
            .circles
            .iter()
            .filter(|cot| cot.trusts_any(&trusted))
            .map(|cot| (cot.id.clone(), cot.clone()))
            .collect();

        let entities = entities
            .into_iter()
            .map(|entity| (entity.id.clone(), entity))
            .collect();
        Ok((entities, circles))
    }

    async fn fetch_saml2_entity(&self, summary: &Saml2EntitySummary) -> Result<Saml2Entity> {
        let mut entity = self
            .gateway
            .get_saml2_entity(self.ctx, &summary.location, &summary.id)
            .await
            .map_err(|e| CoreError::lookup(ObjectKind::Saml2Entity, &summary.entity_id, e))?;

        // Import needs the location; it is stripped again before sending
        entity.entity_location = Some(summary.location.clone());
        if entity.is_remote() {
            let xml = self
                .gateway
                .get_saml2_metadata(self.ctx, &entity.entity_id)
                .await
                .map_err(|e| {
                    CoreError::gateway(format!("reading metadata of '{}'", entity.entity_id), e)
                })?;
            entity.metadata = Some(ScriptBody::Text(encode_base64_url(&xml)));
        }
        debug!(entity_id = %entity.entity_id, location = %summary.location, "Read SAML2 entity");
        Ok(entity)
    }

    async fn fetch_social_providers(
        &self,
        filter: &BTreeSet<String>,
    ) -> Result<Vec<SocialProvider>> {
        let providers = self
            .gateway
            .list_social_providers(self.ctx)
            .await
            .map_err(|e| CoreError::gateway("listing social identity providers", e))?;
        Ok(providers
            .into_iter()
            .filter(|provider| filter.is_empty() || filter.contains(&provider.id))
            .collect())
    }

    async fn fetch_scripts(&self, ids: &BTreeSet<String>) -> Result<BTreeMap<String, Script>> {
        let results = join_all(ids.iter().map(|id| self.gateway.get_script(self.ctx, id))).await;

        let mut scripts = BTreeMap::new();
        for (id, result) in ids.iter().zip(results) {
            let script = result.map_err(|e| CoreError::lookup(ObjectKind::Script, id, e))?;
            debug!(script = %id, name = %script.name, "Read script");
            scripts.insert(id.clone(), script);
        }
        Ok(scripts)
    }

    /// Themes referenced by a page stage or linked to the journey
    async fn fetch_themes(&self, journey: &str, refs: &BTreeSet<String>) -> Vec<Theme> {
        match self.gateway.get_themes(self.ctx).await {
            Ok(themes) => themes
                .into_iter()
                .filter(|theme| {
                    refs.contains(&theme.id)
                        || refs.contains(&theme.name)
                        || theme.linked_trees.iter().any(|tree| tree == journey)
                })
                .collect(),
            Err(e) => {
                crate::log_error!("Failed to read themes", CoreError::gateway("reading themes", e));
                Vec::new()
            }
        }
    }
}
