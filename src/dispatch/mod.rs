mod health;
mod response;

pub use health::{check_all_proxies, AllProxiesHealth, HealthCheckResult, OverallStatus};
pub use response::{ParsedResponse, ResponseFormat};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::TierConfig;
use crate::error::{HConductorError, Result};

/// Fixed task-type -> model-tier routing table. A closed enumeration,
/// deliberately not an open class hierarchy.
pub const TASK_TYPE_ROUTING: &[(&str, Tier)] = &[
    ("tdd_worker", Tier::Fast),
    ("qa_review", Tier::Balanced),
    ("strategic_filter", Tier::Strong),
    ("memory_update", Tier::Strong),
    ("ticket_validation", Tier::Fast),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Fast,
    Balanced,
    Strong,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Balanced => "balanced",
            Tier::Strong => "strong",
        }
    }
}

fn route_to_tier(task_type: &str) -> Result<Tier> {
    TASK_TYPE_ROUTING
        .iter()
        .find(|(t, _)| *t == task_type)
        .map(|(_, tier)| *tier)
        .ok_or_else(|| {
            HConductorError::contract(format!(
                "unknown task type '{task_type}'; valid types: {}",
                TASK_TYPE_ROUTING
                    .iter()
                    .map(|(t, _)| *t)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub success: bool,
    pub response: String,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    model: &'a str,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Single outbound boundary to the three tiered model backends. Builds its
/// own timeout-scoped reqwest client and dispatches across named tiers
/// instead of one hardcoded provider.
pub struct ModelDispatcher {
    client: Client,
    tiers: HashMap<Tier, TierConfig>,
}

impl ModelDispatcher {
    pub fn new(fast: TierConfig, balanced: TierConfig, strong: TierConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with static configuration");

        let mut tiers = HashMap::new();
        tiers.insert(Tier::Fast, fast);
        tiers.insert(Tier::Balanced, balanced);
        tiers.insert(Tier::Strong, strong);

        Self { client, tiers }
    }

    fn tier_config(&self, tier: Tier) -> &TierConfig {
        self.tiers.get(&tier).expect("all three tiers are always registered")
    }

    pub fn route_to_model(&self, task_type: &str) -> Result<Tier> {
        route_to_tier(task_type)
    }

    /// Substitutes `{var}` placeholders with values from `prompt_vars`. A
    /// missing variable fails without ever reaching the backend.
    fn render_prompt(template: &str, prompt_vars: &HashMap<String, String>) -> Result<String> {
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];
            let Some(close) = after_open.find('}') else {
                rendered.push_str(&rest[open..]);
                rest = "";
                break;
            };
            let key = &after_open[..close];
            let value = prompt_vars
                .get(key)
                .ok_or_else(|| HConductorError::contract(format!("missing prompt variable: {key}")))?;
            rendered.push_str(value);
            rest = &after_open[close + 1..];
        }
        rendered.push_str(rest);
        Ok(rendered)
    }

    pub async fn send_request(
        &self,
        task_type: &str,
        prompt_vars: &HashMap<String, String>,
        max_retries: u32,
    ) -> DispatchResult {
        let tier = match self.route_to_tier_or_fail(task_type) {
            Ok(t) => t,
            Err(e) => {
                return DispatchResult {
                    success: false,
                    response: String::new(),
                    latency_ms: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        let user_prompt = match Self::render_prompt(
            prompt_vars.get("__template__").map(|s| s.as_str()).unwrap_or(""),
            prompt_vars,
        ) {
            Ok(p) => p,
            Err(e) => {
                return DispatchResult {
                    success: false,
                    response: String::new(),
                    latency_ms: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        let config = self.tier_config(tier);
        let payload = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "",
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            model: tier.as_str(),
        };

        let url = format!("{}/v1/chat/completions", config.base_url);
        let mut last_error = None;
        let mut latency_ms = 0u64;

        for attempt in 0..=max_retries {
            let start = Instant::now();
            match self.client.post(&url).json(&payload).send().await {
                Ok(response) => {
                    latency_ms = start.elapsed().as_millis() as u64;
                    if response.status().is_success() {
                        match response.json::<ChatResponse>().await {
                            Ok(parsed) => {
                                let content = parsed
                                    .choices
                                    .into_iter()
                                    .next()
                                    .map(|c| c.message.content)
                                    .unwrap_or_default();
                                return DispatchResult {
                                    success: true,
                                    response: content,
                                    latency_ms,
                                    error: None,
                                };
                            }
                            Err(e) => last_error = Some(format!("malformed response body: {e}")),
                        }
                    } else {
                        last_error = Some(format!("HTTP {}", response.status()));
                    }
                }
                Err(e) if e.is_timeout() => {
                    latency_ms = start.elapsed().as_millis() as u64;
                    last_error = Some(format!("request timeout to {} tier", tier.as_str()));
                }
                Err(e) => {
                    latency_ms = start.elapsed().as_millis() as u64;
                    last_error = Some(format!("connection failed to {} tier: {e}", tier.as_str()));
                }
            }

            if attempt < max_retries {
                let delay = Duration::from_millis(500 * (1u64 << attempt));
                tokio::time::sleep(delay).await;
            }
        }

        DispatchResult {
            success: false,
            response: String::new(),
            latency_ms,
            error: last_error,
        }
    }

    fn route_to_tier_or_fail(&self, task_type: &str) -> Result<Tier> {
        route_to_tier(task_type)
    }

    pub fn parse_response(&self, raw: &str, expected: ResponseFormat) -> Result<ParsedResponse> {
        response::parse(raw, expected)
    }

    pub async fn check_health(&self, tier: Tier, timeout: Duration) -> HealthCheckResult {
        health::check_proxy_health(&self.client, self.tier_config(tier), timeout).await
    }

    pub async fn check_all_health(&self, timeout: Duration) -> AllProxiesHealth {
        health::check_all_proxies(
            &self.client,
            self.tier_config(Tier::Fast),
            self.tier_config(Tier::Balanced),
            self.tier_config(Tier::Strong),
            timeout,
        )
        .await
    }
}

impl std::hash::Hash for Tier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (*self as u8).hash(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_known_task_types() {
        assert_eq!(route_to_tier("tdd_worker").unwrap(), Tier::Fast);
        assert_eq!(route_to_tier("qa_review").unwrap(), Tier::Balanced);
        assert_eq!(route_to_tier("strategic_filter").unwrap(), Tier::Strong);
        assert_eq!(route_to_tier("memory_update").unwrap(), Tier::Strong);
        assert_eq!(route_to_tier("ticket_validation").unwrap(), Tier::Fast);
    }

    #[test]
    fn rejects_unknown_task_type() {
        assert!(route_to_tier("nonsense").is_err());
    }

    #[test]
    fn render_prompt_substitutes_variables() {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "world".to_string());
        let rendered = ModelDispatcher::render_prompt("hello {name}", &vars).unwrap();
        assert_eq!(rendered, "hello world");
    }

    #[test]
    fn render_prompt_fails_on_missing_variable() {
        let vars = HashMap::new();
        let err = ModelDispatcher::render_prompt("hello {name}", &vars).unwrap_err();
        assert!(matches!(err, HConductorError::Contract { .. }));
    }
}
