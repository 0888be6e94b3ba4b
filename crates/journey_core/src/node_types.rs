//! Static node type classification
//!
//! Dependency detection is driven purely by a node's type tag. Types the
//! tables do not mention are treated as opaque leaf nodes.

use std::collections::BTreeSet;

/// Nodes that embed an ordered list of inner nodes
pub const CONTAINER_NODE_TYPES: &[&str] = &["PageNode", "CustomPageNode"];

/// Nodes whose `script` property references a script object
pub const SCRIPTED_NODE_TYPES: &[&str] = &[
    "ConfigProviderNode",
    "ScriptedDecisionNode",
    "ClientScriptNode",
    "SocialProviderHandlerNode",
    "CustomScriptNode",
];

/// Nodes whose `emailTemplateName` property references an email template
pub const EMAIL_TEMPLATE_NODE_TYPES: &[&str] = &["EmailSuspendNode", "EmailTemplateNode"];

pub const SAML2_NODE_TYPE: &str = "product-Saml2Node";
pub const SOCIAL_PROVIDER_HANDLER_NODE_TYPE: &str = "SocialProviderHandlerNode";
pub const SELECT_IDP_NODE_TYPE: &str = "SelectIdPNode";
pub const INNER_TREE_EVALUATOR_NODE_TYPE: &str = "InnerTreeEvaluatorNode";

/// Script property value meaning "no script configured"
pub const EMPTY_SCRIPT: &str = "[Empty]";

/// What a node type contributes to a journey's dependency closure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeClass {
    pub container: bool,
    pub scripted: bool,
    pub email_template: bool,
    pub saml2: bool,
    pub social_handler: bool,
    pub provider_select: bool,
    pub inner_tree: bool,
}

impl NodeClass {
    pub fn of(node_type: &str) -> Self {
        Self {
            container: is_container(node_type),
            scripted: SCRIPTED_NODE_TYPES.contains(&node_type),
            email_template: EMAIL_TEMPLATE_NODE_TYPES.contains(&node_type),
            saml2: node_type == SAML2_NODE_TYPE,
            social_handler: node_type == SOCIAL_PROVIDER_HANDLER_NODE_TYPE,
            provider_select: node_type == SELECT_IDP_NODE_TYPE,
            inner_tree: node_type == INNER_TREE_EVALUATOR_NODE_TYPE,
        }
    }
}

pub fn is_container(node_type: &str) -> bool {
    CONTAINER_NODE_TYPES.contains(&node_type)
}

const OOTB_NODE_TYPES_6: &[&str] = &[
    "AbstractSocialAuthLoginNode",
    "AccountLockoutNode",
    "AgentDataStoreDecisionNode",
    "AnonymousUserNode",
    "AuthLevelDecisionNode",
    "ChoiceCollectorNode",
    "CookiePresenceDecisionNode",
    "CreatePasswordNode",
    "DataStoreDecisionNode",
    "InnerTreeEvaluatorNode",
    "LdapDecisionNode",
    "MessageNode",
    "MetadataNode",
    "MeterNode",
    "ModifyAuthLevelNode",
    "OneTimePasswordCollectorDecisionNode",
    "OneTimePasswordGeneratorNode",
    "OneTimePasswordSmsSenderNode",
    "OneTimePasswordSmtpSenderNode",
    "PageNode",
    "PasswordCollectorNode",
    "PersistentCookieDecisionNode",
    "PollingWaitNode",
    "ProvisionDynamicAccountNode",
    "ProvisionIdmAccountNode",
    "PushAuthenticationSenderNode",
    "PushResultVerifierNode",
    "RecoveryCodeCollectorDecisionNode",
    "RecoveryCodeDisplayNode",
    "RegisterLogoutWebhookNode",
    "RemoveSessionPropertiesNode",
    "RetryLimitDecisionNode",
    "ScriptedDecisionNode",
    "SessionDataNode",
    "SetFailureUrlNode",
    "SetPersistentCookieNode",
    "SetSessionPropertiesNode",
    "SetSuccessUrlNode",
    "SocialFacebookNode",
    "SocialGoogleNode",
    "SocialNode",
    "SocialOAuthIgnoreProfileNode",
    "SocialOpenIdConnectNode",
    "TimerStartNode",
    "TimerStopNode",
    "UsernameCollectorNode",
    "WebAuthnAuthenticationNode",
    "WebAuthnRegistrationNode",
    "ZeroPageLoginNode",
];

// 6.5 ships the same catalogue as 6.0
const OOTB_NODE_TYPES_6_5: &[&str] = OOTB_NODE_TYPES_6;

const OOTB_NODE_TYPES_7: &[&str] = &[
    "AcceptTermsAndConditionsNode",
    "AccountActiveDecisionNode",
    "AccountLockoutNode",
    "AgentDataStoreDecisionNode",
    "AnonymousSessionUpgradeNode",
    "AnonymousUserNode",
    "AttributeCollectorNode",
    "AttributePresentDecisionNode",
    "AttributeValueDecisionNode",
    "AuthLevelDecisionNode",
    "ChoiceCollectorNode",
    "ConsentNode",
    "CookiePresenceDecisionNode",
    "CreateObjectNode",
    "CreatePasswordNode",
    "DataStoreDecisionNode",
    "DeviceGeoFencingNode",
    "DeviceLocationMatchNode",
    "DeviceMatchNode",
    "DeviceProfileCollectorNode",
    "DeviceSaveNode",
    "DeviceTamperingVerificationNode",
    "DisplayUserNameNode",
    "EmailSuspendNode",
    "EmailTemplateNode",
    "IdentifyExistingUserNode",
    "IncrementLoginCountNode",
    "InnerTreeEvaluatorNode",
    "IotAuthenticationNode",
    "IotRegistrationNode",
    "KbaCreateNode",
    "KbaDecisionNode",
    "KbaVerifyNode",
    "LdapDecisionNode",
    "LoginCountDecisionNode",
    "MessageNode",
    "MetadataNode",
    "MeterNode",
    "ModifyAuthLevelNode",
    "OneTimePasswordCollectorDecisionNode",
    "OneTimePasswordGeneratorNode",
    "OneTimePasswordSmsSenderNode",
    "OneTimePasswordSmtpSenderNode",
    "PageNode",
    "PasswordCollectorNode",
    "PatchObjectNode",
    "PersistentCookieDecisionNode",
    "PollingWaitNode",
    "ProfileCompletenessDecisionNode",
    "ProvisionDynamicAccountNode",
    "ProvisionIdmAccountNode",
    "PushAuthenticationSenderNode",
    "PushResultVerifierNode",
    "QueryFilterDecisionNode",
    "RecoveryCodeCollectorDecisionNode",
    "RecoveryCodeDisplayNode",
    "RegisterLogoutWebhookNode",
    "RemoveSessionPropertiesNode",
    "RequiredAttributesDecisionNode",
    "RetryLimitDecisionNode",
    "ScriptedDecisionNode",
    "SelectIdPNode",
    "SessionDataNode",
    "SetFailureUrlNode",
    "SetPersistentCookieNode",
    "SetSessionPropertiesNode",
    "SetSuccessUrlNode",
    "SocialFacebookNode",
    "SocialGoogleNode",
    "SocialNode",
    "SocialOAuthIgnoreProfileNode",
    "SocialOpenIdConnectNode",
    "SocialProviderHandlerNode",
    "TermsAndConditionsDecisionNode",
    "TimeSinceDecisionNode",
    "TimerStartNode",
    "TimerStopNode",
    "UsernameCollectorNode",
    "ValidatedPasswordNode",
    "ValidatedUsernameNode",
    "WebAuthnAuthenticationNode",
    "WebAuthnDeviceStorageNode",
    "WebAuthnRegistrationNode",
    "ZeroPageLoginNode",
    "product-CertificateCollectorNode",
    "product-CertificateUserExtractorNode",
    "product-CertificateValidationNode",
    "product-KerberosNode",
    "product-ReCaptchaNode",
    "product-Saml2Node",
    "product-WriteFederationInformationNode",
];

const ADDED_IN_7_1: &[&str] = &[
    "PushRegistrationNode",
    "GetAuthenticatorAppNode",
    "MultiFactorRegistrationOptionsNode",
    "OptOutMultiFactorAuthenticationNode",
];

const ADDED_IN_7_2: &[&str] = &[
    "OathRegistrationNode",
    "OathTokenVerifierNode",
    "PassthroughAuthenticationNode",
    "ConfigProviderNode",
    "DebugNode",
];

/// Out-of-the-box node types of a platform version, `None` when the
/// version is unknown
pub fn ootb_node_types(version: &str) -> Option<BTreeSet<&'static str>> {
    let layers: &[&[&str]] = match version {
        "7.2.0" => &[OOTB_NODE_TYPES_7, ADDED_IN_7_1, ADDED_IN_7_2],
        "7.1.0" => &[OOTB_NODE_TYPES_7, ADDED_IN_7_1],
        "7.0.0" | "7.0.1" | "7.0.2" => &[OOTB_NODE_TYPES_7],
        "6.5.3" | "6.5.2.3" | "6.5.2.2" | "6.5.2.1" | "6.5.2" | "6.5.1" | "6.5.0.2"
        | "6.5.0.1" => &[OOTB_NODE_TYPES_6_5],
        "6.0.0.7" | "6.0.0.6" | "6.0.0.5" | "6.0.0.4" | "6.0.0.3" | "6.0.0.2" | "6.0.0.1"
        | "6.0.0" => &[OOTB_NODE_TYPES_6],
        _ => return None,
    };
    Some(layers.iter().flat_map(|layer| layer.iter().copied()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let page = NodeClass::of("PageNode");
        assert!(page.container);
        assert!(!page.scripted);

        let handler = NodeClass::of("SocialProviderHandlerNode");
        assert!(handler.scripted);
        assert!(handler.social_handler);

        assert_eq!(NodeClass::of("SomeVendorNode"), NodeClass::default());
    }

    #[test]
    fn test_version_catalogues_are_layered() {
        let v72 = ootb_node_types("7.2.0").unwrap();
        let v71 = ootb_node_types("7.1.0").unwrap();
        let v70 = ootb_node_types("7.0.1").unwrap();
        assert!(v72.contains("DebugNode"));
        assert!(!v71.contains("DebugNode"));
        assert!(v71.contains("PushRegistrationNode"));
        assert!(!v70.contains("PushRegistrationNode"));
        assert!(v70.is_subset(&v71) && v71.is_subset(&v72));
        assert!(ootb_node_types("8.0.0").is_none());
    }
}
