use agentdb_store::StoreConfig;
use agentdb_types::AgentDbError;

/// Agent runtime configuration.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Content store settings.
    pub store: StoreConfig,
    /// Mutable-name service. `None` keeps stream names in process.
    pub name_service_url: Option<String>,
    /// Ability a delegation must carry to read another agent's memory.
    pub read_ability: String,
    /// Lifetime of delegations issued without an explicit TTL.
    pub default_ttl_hours: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            name_service_url: None,
            read_ability: "agent/read".to_string(),
            default_ttl_hours: 24.0,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, AgentDbError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentDbError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            store: StoreConfig::from_lookup(&lookup)?,
            ..Self::default()
        };
        if let Some(url) = lookup("AGENTDB_NAME_SERVICE_URL") {
            config.name_service_url = Some(url.trim_end_matches('/').to_string());
        }
        Ok(config)
    }
}
