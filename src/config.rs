/// Base URL configuration for one model tier, environment-overridable via
/// `<TIER>_PORT`.
#[derive(Debug, Clone)]
pub struct TierConfig {
    pub base_url: String,
}

impl TierConfig {
    fn from_env(tier_env_prefix: &str, default_port: u16) -> Self {
        let port = std::env::var(format!("{tier_env_prefix}_PORT"))
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(default_port);
        Self {
            base_url: format!("http://127.0.0.1:{port}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub fast: TierConfig,
    pub balanced: TierConfig,
    pub strong: TierConfig,
    pub workspace_base: std::path::PathBuf,
    pub disk_threshold: f64,
}

impl Config {
    pub fn from_env() -> Self {
        let workspace_base = std::env::var("HCONDUCTOR_WORKSPACE_BASE")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        let disk_threshold = std::env::var("HCONDUCTOR_DISK_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.8);

        Self {
            fast: TierConfig::from_env("FAST", 8081),
            balanced: TierConfig::from_env("BALANCED", 8082),
            strong: TierConfig::from_env("STRONG", 8083),
            workspace_base,
            disk_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_system_temp_and_eighty_percent_threshold() {
        std::env::remove_var("HCONDUCTOR_WORKSPACE_BASE");
        std::env::remove_var("HCONDUCTOR_DISK_THRESHOLD");
        let config = Config::from_env();
        assert_eq!(config.workspace_base, std::env::temp_dir());
        assert_eq!(config.disk_threshold, 0.8);
    }
}
