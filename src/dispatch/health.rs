use std::time::{Duration, Instant};

use reqwest::Client;

use crate::config::TierConfig;

#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    AllHealthy,
    Degraded,
    Offline,
}

#[derive(Debug, Clone)]
pub struct AllProxiesHealth {
    pub fast: HealthCheckResult,
    pub balanced: HealthCheckResult,
    pub strong: HealthCheckResult,
}

impl AllProxiesHealth {
    pub fn overall_status(&self) -> OverallStatus {
        let healthy_count = [&self.fast, &self.balanced, &self.strong]
            .iter()
            .filter(|r| r.healthy)
            .count();
        match healthy_count {
            3 => OverallStatus::AllHealthy,
            0 => OverallStatus::Offline,
            _ => OverallStatus::Degraded,
        }
    }

    pub fn summary(&self) -> String {
        [("fast", &self.fast), ("balanced", &self.balanced), ("strong", &self.strong)]
            .iter()
            .map(|(name, result)| {
                if result.healthy {
                    format!("{name}: OK ({}ms)", result.latency_ms)
                } else {
                    format!("{name}: FAIL ({})", result.error.as_deref().unwrap_or("unknown"))
                }
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

pub async fn check_proxy_health(client: &Client, config: &TierConfig, timeout: Duration) -> HealthCheckResult {
    let start = Instant::now();
    match client.get(&config.base_url).timeout(timeout).send().await {
        Ok(response) if response.status().is_success() => HealthCheckResult {
            healthy: true,
            latency_ms: start.elapsed().as_millis() as u64,
            error: None,
        },
        Ok(response) => HealthCheckResult {
            healthy: false,
            latency_ms: start.elapsed().as_millis() as u64,
            error: Some(format!("unhealthy status: {}", response.status())),
        },
        Err(e) if e.is_timeout() => HealthCheckResult {
            healthy: false,
            latency_ms: start.elapsed().as_millis() as u64,
            error: Some(format!("timeout connecting to {}", config.base_url)),
        },
        Err(e) => HealthCheckResult {
            healthy: false,
            latency_ms: start.elapsed().as_millis() as u64,
            error: Some(format!("connection failed: {e}")),
        },
    }
}

pub async fn check_all_proxies(
    client: &Client,
    fast: &TierConfig,
    balanced: &TierConfig,
    strong: &TierConfig,
    timeout: Duration,
) -> AllProxiesHealth {
    AllProxiesHealth {
        fast: check_proxy_health(client, fast, timeout).await,
        balanced: check_proxy_health(client, balanced, timeout).await,
        strong: check_proxy_health(client, strong, timeout).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(healthy: bool) -> HealthCheckResult {
        HealthCheckResult {
            healthy,
            latency_ms: 1,
            error: None,
        }
    }

    #[test]
    fn overall_status_all_healthy() {
        let health = AllProxiesHealth {
            fast: result(true),
            balanced: result(true),
            strong: result(true),
        };
        assert_eq!(health.overall_status(), OverallStatus::AllHealthy);
    }

    #[test]
    fn overall_status_degraded_when_partial() {
        let health = AllProxiesHealth {
            fast: result(true),
            balanced: result(false),
            strong: result(false),
        };
        assert_eq!(health.overall_status(), OverallStatus::Degraded);
    }

    #[test]
    fn overall_status_offline_when_none_healthy() {
        let health = AllProxiesHealth {
            fast: result(false),
            balanced: result(false),
            strong: result(false),
        };
        assert_eq!(health.overall_status(), OverallStatus::Offline);
    }
}
