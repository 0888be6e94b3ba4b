//! Object gateway: the seam to the platform's configuration REST API
//!
//! Transport, authentication and retries/timeouts are the implementor's
//! concern. Core code only sees async key-value operations per object kind
//! that either succeed or fail with a [`GatewayError`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::{
    context::PlatformContext,
    model::{
        CircleOfTrust, EmailTemplate, Journey, Node, ObjectKind, Saml2Entity, Saml2EntitySummary,
        Script, SocialProvider, Theme, TypeRef,
    },
};

/// Failure reported by the gateway for a single call
#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("{kind} '{id}' not found")]
    #[diagnostic(code(journey_core::gateway::not_found))]
    NotFound { kind: ObjectKind, id: String },

    /// Target rejected one or more attributes of the payload
    #[error("Validation failed: {message}")]
    #[diagnostic(code(journey_core::gateway::validation))]
    Validation {
        message: String,
        /// Attributes the target would have accepted, when it says so
        valid_attributes: Vec<String>,
    },

    #[error("Conflict: {message}")]
    #[diagnostic(code(journey_core::gateway::conflict))]
    Conflict { message: String },

    #[error("Server error {status}: {message}")]
    #[diagnostic(code(journey_core::gateway::server))]
    Server { status: u16, message: String },

    #[error("Transport error: {0}")]
    #[diagnostic(code(journey_core::gateway::transport))]
    Transport(String),
}

impl GatewayError {
    pub fn not_found(kind: ObjectKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            valid_attributes: Vec::new(),
        }
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            GatewayError::NotFound { id, .. } => id,
            GatewayError::Validation { message, .. }
            | GatewayError::Conflict { message }
            | GatewayError::Server { message, .. } => message,
            GatewayError::Transport(message) => message,
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

// Messages the platform uses for failures the core knows how to handle

/// Node upsert rejected because its script does not exist on the target
pub const MISSING_SCRIPT_MESSAGE: &str = "Data validation failed for the attribute, Script";

/// Journey upsert rejected because of attributes the target does not know
pub const INVALID_ATTRIBUTE_MESSAGE: &str = "Invalid attribute specified.";

/// Social provider upsert rejected by targets that no longer accept the field
pub const REDIRECT_URI_REJECTED_MESSAGE: &str = "Unable to update SMS config: Data validation failed for the attribute, Redirect after form post URL";

/// Container deletion failing because its inner nodes were removed first
pub const NODE_DID_NOT_EXIST_MESSAGE: &str = "Unable to read SMS config: Node did not exist";

impl GatewayError {
    pub(crate) fn is_missing_script(&self) -> bool {
        matches!(
            self,
            GatewayError::Validation { message, .. } if message == MISSING_SCRIPT_MESSAGE
        )
    }

    pub(crate) fn rejected_attributes(&self) -> Option<&[String]> {
        match self {
            GatewayError::Validation {
                message,
                valid_attributes,
            } if message == INVALID_ATTRIBUTE_MESSAGE => Some(valid_attributes),
            _ => None,
        }
    }

    pub(crate) fn is_redirect_uri_rejected(&self) -> bool {
        matches!(
            self,
            GatewayError::Server { status: 500, message } if message == REDIRECT_URI_REJECTED_MESSAGE
        )
    }

    pub(crate) fn is_node_already_gone(&self) -> bool {
        matches!(
            self,
            GatewayError::Server { status: 500, message } if message == NODE_DID_NOT_EXIST_MESSAGE
        )
    }
}

#[async_trait]
pub trait ObjectGateway: Send + Sync {
    // Journeys
    async fn get_tree(&self, ctx: &PlatformContext, name: &str) -> GatewayResult<Journey>;
    async fn list_trees(&self, ctx: &PlatformContext) -> GatewayResult<Vec<Journey>>;
    async fn put_tree(
        &self,
        ctx: &PlatformContext,
        name: &str,
        tree: &Journey,
    ) -> GatewayResult<Journey>;
    async fn delete_tree(&self, ctx: &PlatformContext, name: &str) -> GatewayResult<Journey>;

    // Nodes
    async fn get_node(
        &self,
        ctx: &PlatformContext,
        id: &str,
        node_type: &str,
    ) -> GatewayResult<Node>;
    async fn list_node_types(&self, ctx: &PlatformContext) -> GatewayResult<Vec<TypeRef>>;
    async fn list_nodes_by_type(
        &self,
        ctx: &PlatformContext,
        node_type: &str,
    ) -> GatewayResult<Vec<Node>>;
    async fn put_node(
        &self,
        ctx: &PlatformContext,
        id: &str,
        node_type: &str,
        node: &Node,
    ) -> GatewayResult<Node>;
    async fn delete_node(
        &self,
        ctx: &PlatformContext,
        id: &str,
        node_type: &str,
    ) -> GatewayResult<Node>;

    // Scripts; bodies are always in the base64 gateway form here
    async fn get_script(&self, ctx: &PlatformContext, id: &str) -> GatewayResult<Script>;
    async fn put_script(
        &self,
        ctx: &PlatformContext,
        id: &str,
        script: &Script,
    ) -> GatewayResult<Script>;

    // Email templates, addressed by name without the `emailTemplate/` prefix
    async fn get_email_template(
        &self,
        ctx: &PlatformContext,
        name: &str,
    ) -> GatewayResult<EmailTemplate>;
    async fn put_email_template(
        &self,
        ctx: &PlatformContext,
        name: &str,
        template: &EmailTemplate,
    ) -> GatewayResult<EmailTemplate>;

    // SAML2 federation entities
    async fn list_saml2_entities(
        &self,
        ctx: &PlatformContext,
    ) -> GatewayResult<Vec<Saml2EntitySummary>>;
    async fn get_saml2_entity(
        &self,
        ctx: &PlatformContext,
        location: &str,
        id: &str,
    ) -> GatewayResult<Saml2Entity>;
    /// Raw XML metadata document of an entity
    async fn get_saml2_metadata(
        &self,
        ctx: &PlatformContext,
        entity_id: &str,
    ) -> GatewayResult<String>;
    /// Entities whose entity id matches exactly
    async fn find_saml2_entities(
        &self,
        ctx: &PlatformContext,
        entity_id: &str,
    ) -> GatewayResult<Vec<Saml2EntitySummary>>;
    /// Remote entities are created from their base64url metadata document
    async fn create_saml2_entity(
        &self,
        ctx: &PlatformContext,
        location: &str,
        entity: &Saml2Entity,
        metadata: Option<&str>,
    ) -> GatewayResult<Saml2Entity>;
    async fn update_saml2_entity(
        &self,
        ctx: &PlatformContext,
        location: &str,
        entity: &Saml2Entity,
    ) -> GatewayResult<Saml2Entity>;

    // Circles of trust
    async fn list_circles_of_trust(&self, ctx: &PlatformContext)
    -> GatewayResult<Vec<CircleOfTrust>>;
    async fn create_circle_of_trust(
        &self,
        ctx: &PlatformContext,
        cot: &CircleOfTrust,
    ) -> GatewayResult<CircleOfTrust>;
    async fn update_circle_of_trust(
        &self,
        ctx: &PlatformContext,
        id: &str,
        cot: &CircleOfTrust,
    ) -> GatewayResult<CircleOfTrust>;

    // Social identity providers
    async fn list_social_providers(
        &self,
        ctx: &PlatformContext,
    ) -> GatewayResult<Vec<SocialProvider>>;
    async fn put_social_provider(
        &self,
        ctx: &PlatformContext,
        provider_type: &str,
        id: &str,
        provider: &SocialProvider,
    ) -> GatewayResult<SocialProvider>;

    // Themes are one composite record per realm
    async fn get_themes(&self, ctx: &PlatformContext) -> GatewayResult<Vec<Theme>>;
    async fn put_themes(
        &self,
        ctx: &PlatformContext,
        themes: &BTreeMap<String, Theme>,
    ) -> GatewayResult<Vec<Theme>>;
}
