//! `stageset.toml`: engine settings, object types, relations, and policies.

use serde::Deserialize;
use stageset_kernel::{
    Capability, Cardinality, ChangeSetEngine, ChangeSetError, EngineConfig, OwnershipSchema,
    PermissionCodePolicy, PolicyRegistry,
};
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to read config {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },

    #[error(transparent)]
    Schema(#[from] ChangeSetError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StagesetConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub types: Vec<TypeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeConfig {
    pub name: String,
    #[serde(default)]
    pub extends: Option<String>,
    /// Owned relations: changes to targets travel with this type.
    #[serde(default)]
    pub owns: Vec<RelationConfig>,
    /// Plain relations: publish ordering only.
    #[serde(default)]
    pub has: Vec<RelationConfig>,
    #[serde(default)]
    pub permissions: Option<PermissionsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationConfig {
    pub relation: String,
    pub target: String,
    #[serde(default = "default_cardinality")]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub foreign_key: Option<String>,
}

fn default_cardinality() -> Cardinality {
    Cardinality::One
}

/// Permission codes per capability. `all` applies to every capability.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub all: Vec<String>,
    #[serde(default)]
    pub view: Vec<String>,
    #[serde(default)]
    pub edit: Vec<String>,
    #[serde(default)]
    pub create: Vec<String>,
    #[serde(default)]
    pub delete: Vec<String>,
    #[serde(default)]
    pub publish: Vec<String>,
}

impl PermissionsConfig {
    fn codes(&self, capability: Capability) -> &[String] {
        match capability {
            Capability::View => &self.view,
            Capability::Edit => &self.edit,
            Capability::Create => &self.create,
            Capability::Delete => &self.delete,
            Capability::Publish => &self.publish,
        }
    }

    pub fn to_policy(&self) -> PermissionCodePolicy {
        let mut policy = PermissionCodePolicy::new();
        for capability in [
            Capability::View,
            Capability::Edit,
            Capability::Create,
            Capability::Delete,
            Capability::Publish,
        ] {
            for code in self.all.iter().chain(self.codes(capability)) {
                policy = policy.grant(capability, code.clone());
            }
        }
        policy
    }
}

impl StagesetConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&text).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    pub fn schema(&self) -> Result<OwnershipSchema, ConfigError> {
        let mut builder = OwnershipSchema::builder();
        for ty in &self.types {
            builder = match &ty.extends {
                Some(parent) => builder.extend(&ty.name, parent),
                None => builder.declare(&ty.name),
            };
        }
        for ty in &self.types {
            let relations = ty
                .owns
                .iter()
                .map(|rel| (rel, true))
                .chain(ty.has.iter().map(|rel| (rel, false)));
            for (rel, owned) in relations {
                builder = builder.relation(
                    &ty.name,
                    &rel.relation,
                    &rel.target,
                    rel.cardinality,
                    owned,
                    rel.foreign_key.clone(),
                );
            }
        }
        Ok(builder.build()?)
    }

    pub fn policies(&self) -> PolicyRegistry {
        let mut registry = PolicyRegistry::new();
        for ty in &self.types {
            if let Some(permissions) = &ty.permissions {
                registry.register(&ty.name, permissions.to_policy());
            }
        }
        registry
    }

    pub fn into_engine(self) -> Result<ChangeSetEngine, ConfigError> {
        let schema = self.schema()?;
        let policies = self.policies();
        Ok(ChangeSetEngine::new(schema, policies, self.engine))
    }
}
