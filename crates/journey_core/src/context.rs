//! Explicit realm and deployment context handed to every core operation

use serde::{Deserialize, Serialize};

/// Platform deployment variant of the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentType {
    #[default]
    Cloud,
    ForgeOps,
    Classic,
}

impl DeploymentType {
    /// Email templates and themes live in the identity-management layer,
    /// which classic deployments do not have.
    pub fn supports_platform_config(self) -> bool {
        matches!(self, DeploymentType::Cloud | DeploymentType::ForgeOps)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformContext {
    /// Realm the operation runs against
    pub realm: String,

    #[serde(default)]
    pub deployment: DeploymentType,

    /// Platform version, used for custom node analysis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub am_version: Option<String>,

    /// Managed object name to bind identity resources to instead of the
    /// deployment default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_user_override: Option<String>,
}

impl Default for PlatformContext {
    fn default() -> Self {
        Self {
            realm: "alpha".to_string(),
            deployment: DeploymentType::default(),
            am_version: None,
            managed_user_override: None,
        }
    }
}

impl PlatformContext {
    pub fn new(realm: impl Into<String>, deployment: DeploymentType) -> Self {
        Self {
            realm: realm.into(),
            deployment,
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.am_version = Some(version.into());
        self
    }

    /// Realm name without leading or trailing slashes
    pub fn realm_name(&self) -> &str {
        self.realm.trim_matches('/')
    }

    /// Managed user object of the realm, e.g. `alpha_user` in cloud tenants
    pub fn managed_user(&self) -> String {
        if let Some(name) = &self.managed_user_override {
            return name.clone();
        }
        match self.deployment {
            DeploymentType::Cloud => format!("{}_user", self.realm_name()),
            _ => "user".to_string(),
        }
    }

    /// Concrete identity resource of the realm, e.g. `managed/alpha_user`
    pub fn managed_user_resource(&self) -> String {
        format!("managed/{}", self.managed_user())
    }

    pub fn supports_email_templates(&self) -> bool {
        self.deployment.supports_platform_config()
    }

    pub fn supports_themes(&self) -> bool {
        self.deployment.supports_platform_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_user_resource() {
        let cloud = PlatformContext::new("/bravo", DeploymentType::Cloud);
        assert_eq!(cloud.managed_user_resource(), "managed/bravo_user");

        let forgeops = PlatformContext::new("root", DeploymentType::ForgeOps);
        assert_eq!(forgeops.managed_user_resource(), "managed/user");

        let mut custom = PlatformContext::new("alpha", DeploymentType::Cloud);
        custom.managed_user_override = Some("alpha_member".into());
        assert_eq!(custom.managed_user_resource(), "managed/alpha_member");
    }

    #[test]
    fn test_classic_has_no_platform_config() {
        let classic = PlatformContext::new("root", DeploymentType::Classic);
        assert!(!classic.supports_email_templates());
        assert!(!classic.supports_themes());
    }
}
