//! Platform configuration objects
//!
//! The platform's schemas are not modelled in full. Every object keeps the
//! handful of attributes the dependency engine inspects as typed fields and
//! carries everything else through untouched in a flattened attribute map,
//! so that export -> import -> export preserves unknown attributes.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::script::ScriptBody;

/// Untyped attribute bag of a configuration object
pub type Record = serde_json::Map<String, Value>;

/// The kinds of configuration objects the gateway manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Tree,
    Node,
    Script,
    EmailTemplate,
    Saml2Entity,
    CircleOfTrust,
    SocialProvider,
    Theme,
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ObjectKind::Tree => "journey",
            ObjectKind::Node => "node",
            ObjectKind::Script => "script",
            ObjectKind::EmailTemplate => "email template",
            ObjectKind::Saml2Entity => "SAML2 entity",
            ObjectKind::CircleOfTrust => "circle of trust",
            ObjectKind::SocialProvider => "social identity provider",
            ObjectKind::Theme => "theme",
        };
        f.write_str(label)
    }
}

/// Common behaviour of stored configuration objects
pub trait ConfigObject {
    fn object_id(&self) -> &str;

    fn attributes_mut(&mut self) -> &mut Record;

    /// Drop the source revision so the target assigns its own
    fn strip_revision(&mut self) {
        self.attributes_mut().remove("_rev");
    }
}

macro_rules! config_object {
    ($ty:ty, $attrs:ident) => {
        impl ConfigObject for $ty {
            fn object_id(&self) -> &str {
                &self.id
            }

            fn attributes_mut(&mut self) -> &mut Record {
                &mut self.$attrs
            }
        }
    };
}

/// `{ "_id": ... }` type reference used by nodes and providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRef {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(flatten)]
    pub extra: Record,
}

impl TypeRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extra: Record::new(),
        }
    }
}

/// Entry of a journey's node table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    #[serde(rename = "nodeType")]
    pub node_type: String,

    #[serde(flatten)]
    pub extra: Record,
}

impl NodeRef {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            extra: Record::new(),
        }
    }
}

/// A journey (tree): the root of an export/import unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, NodeRef>,

    #[serde(
        rename = "identityResource",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub identity_resource: Option<String>,

    #[serde(flatten)]
    pub extra: Record,
}

config_object!(Journey, extra);

impl Journey {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: BTreeMap::new(),
            identity_resource: None,
            extra: Record::new(),
        }
    }

    pub fn with_node(mut self, id: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.nodes.insert(id.into(), NodeRef::new(node_type));
        self
    }

    /// `false` only when the journey is explicitly disabled
    pub fn enabled(&self) -> bool {
        self.extra
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

/// Reference from a container node to one of its inner nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerNodeRef {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "nodeType")]
    pub node_type: String,

    #[serde(flatten)]
    pub extra: Record,
}

/// A node object with its type-specific property bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_type")]
    pub node_type: TypeRef,

    #[serde(flatten)]
    pub properties: Record,
}

config_object!(Node, properties);

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: TypeRef::new(node_type),
            properties: Record::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn type_name(&self) -> &str {
        &self.node_type.id
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn script(&self) -> Option<&str> {
        self.property_str("script")
    }

    pub fn email_template_name(&self) -> Option<&str> {
        self.property_str("emailTemplateName")
    }

    pub fn identity_resource(&self) -> Option<&str> {
        self.property_str("identityResource")
    }

    pub fn set_identity_resource(&mut self, resource: impl Into<String>) {
        self.properties
            .insert("identityResource".to_string(), Value::String(resource.into()));
    }

    pub fn stage(&self) -> Option<&str> {
        self.property_str("stage")
    }

    /// Journey invoked by an inner-tree evaluator node
    pub fn inner_tree(&self) -> Option<&str> {
        self.property_str("tree")
    }

    pub fn filtered_providers(&self) -> Vec<String> {
        self.properties
            .get("filteredProviders")
            .and_then(Value::as_array)
            .map(|providers| {
                providers
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inner node references of a container node, in page order.
    /// Entries that do not look like references are skipped.
    pub fn inner_nodes(&self) -> Vec<InnerNodeRef> {
        self.properties
            .get("nodes")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// SAML2 entity ids a federation node points at. `metaAlias` looks like
    /// `/alpha/iSPAzure`; only its last segment is the entity id.
    pub fn saml2_entity_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(alias) = self.property_str("metaAlias") {
            if let Some(last) = alias.rsplit('/').next() {
                if !last.is_empty() {
                    ids.push(last.to_string());
                }
            }
        }
        if let Some(idp) = self.property_str("idpEntityId") {
            ids.push(idp.to_string());
        }
        ids
    }
}

/// A script with its body in one of the interchangeable representations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    pub script: ScriptBody,

    #[serde(flatten)]
    pub extra: Record,
}

config_object!(Script, extra);

impl Script {
    pub fn description(&self) -> Option<&str> {
        self.extra.get("description").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTemplate {
    /// Stored as `emailTemplate/<name>`
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(flatten)]
    pub extra: Record,
}

config_object!(EmailTemplate, extra);

impl EmailTemplate {
    /// Bundle key: the template name without the `emailTemplate/` prefix
    pub fn key(&self) -> &str {
        self.id.split_once('/').map_or(&self.id, |(_, name)| name)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.extra.get("displayName").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialProvider {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_type")]
    pub provider_type: TypeRef,

    /// Id of the profile normalisation script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,

    #[serde(flatten)]
    pub extra: Record,
}

config_object!(SocialProvider, extra);

/// Listing entry of the federation entity catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saml2EntitySummary {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "entityId")]
    pub entity_id: String,

    /// `hosted` or `remote`
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saml2Entity {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "entityId")]
    pub entity_id: String,

    /// Recorded at export time; never sent to the target
    #[serde(
        rename = "entityLocation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub entity_location: Option<String>,

    /// Base64url metadata document of remote entities
    #[serde(
        rename = "base64EntityXML",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata: Option<ScriptBody>,

    #[serde(flatten)]
    pub extra: Record,
}

config_object!(Saml2Entity, extra);

impl Saml2Entity {
    pub fn is_remote(&self) -> bool {
        self.entity_location.as_deref() == Some("remote")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleOfTrust {
    #[serde(rename = "_id")]
    pub id: String,

    /// Entries look like `<entityId>|saml2`
    #[serde(
        rename = "trustedProviders",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub trusted_providers: Vec<String>,

    #[serde(flatten)]
    pub extra: Record,
}

config_object!(CircleOfTrust, extra);

impl CircleOfTrust {
    pub fn trusts_any(&self, entity_ids: &[String]) -> bool {
        self.trusted_providers.iter().any(|provider| {
            provider
                .strip_suffix("|saml2")
                .is_some_and(|entity| entity_ids.iter().any(|id| id == entity))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "linkedTrees", default, skip_serializing_if = "Vec::is_empty")]
    pub linked_trees: Vec<String>,

    #[serde(flatten)]
    pub extra: Record,
}

config_object!(Theme, extra);
