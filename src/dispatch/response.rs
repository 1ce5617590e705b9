use regex::Regex;

use crate::error::{HConductorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Code,
    Json,
    Decision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
    NeedsRefinement,
}

#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub content: String,
    pub format: ResponseFormat,
    pub warnings: Vec<String>,
}

fn code_fence_re() -> Regex {
    Regex::new(r"(?s)```(?:\w+)?\n(.*?)```").expect("static pattern compiles")
}

pub fn parse(raw: &str, expected: ResponseFormat) -> Result<ParsedResponse> {
    match expected {
        ResponseFormat::Text => Ok(ParsedResponse {
            content: raw.to_string(),
            format: ResponseFormat::Text,
            warnings: vec![],
        }),

        ResponseFormat::Code => {
            let blocks: Vec<String> = code_fence_re()
                .captures_iter(raw)
                .map(|c| c[1].to_string())
                .collect();
            if blocks.is_empty() {
                Ok(ParsedResponse {
                    content: raw.to_string(),
                    format: ResponseFormat::Code,
                    warnings: vec!["no code blocks found, returning raw response".to_string()],
                })
            } else {
                Ok(ParsedResponse {
                    content: blocks.join("\n\n"),
                    format: ResponseFormat::Code,
                    warnings: vec![],
                })
            }
        }

        ResponseFormat::Json => {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
                return Ok(ParsedResponse {
                    content: value.to_string(),
                    format: ResponseFormat::Json,
                    warnings: vec![],
                });
            }
            let json_fence = Regex::new(r"(?s)```json\n(.*?)```").expect("static pattern compiles");
            if let Some(caps) = json_fence.captures(raw) {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&caps[1]) {
                    return Ok(ParsedResponse {
                        content: value.to_string(),
                        format: ResponseFormat::Json,
                        warnings: vec![],
                    });
                }
            }
            Err(HConductorError::contract(format!(
                "could not parse JSON from response: {}...",
                &raw[..raw.len().min(100)]
            )))
        }

        ResponseFormat::Decision => {
            let upper = raw.to_uppercase();
            let content = if upper.contains("APPROVED") {
                "APPROVED"
            } else if upper.contains("REJECTED") {
                "REJECTED"
            } else if upper.contains("NEEDS_REFINEMENT") {
                "NEEDS_REFINEMENT"
            } else {
                return Err(HConductorError::contract(format!(
                    "could not extract decision from: {}...",
                    &raw[..raw.len().min(100)]
                )));
            };
            Ok(ParsedResponse {
                content: content.to_string(),
                format: ResponseFormat::Decision,
                warnings: vec![],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_identity() {
        let parsed = parse("hello", ResponseFormat::Text).unwrap();
        assert_eq!(parsed.content, "hello");
    }

    #[test]
    fn code_extracts_fenced_blocks() {
        let parsed = parse("```python\nprint(1)\n```", ResponseFormat::Code).unwrap();
        assert_eq!(parsed.content, "print(1)\n");
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn code_without_fence_warns_and_returns_raw() {
        let parsed = parse("print(1)", ResponseFormat::Code).unwrap();
        assert_eq!(parsed.content, "print(1)");
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn json_parses_direct() {
        let parsed = parse(r#"{"a": 1}"#, ResponseFormat::Json).unwrap();
        assert!(parsed.content.contains("\"a\""));
    }

    #[test]
    fn json_falls_back_to_fenced_block() {
        let parsed = parse("```json\n{\"a\": 1}\n```", ResponseFormat::Json).unwrap();
        assert!(parsed.content.contains("\"a\""));
    }

    #[test]
    fn json_errors_when_unparseable() {
        assert!(parse("not json at all", ResponseFormat::Json).is_err());
    }

    #[test]
    fn decision_extracts_keyword() {
        assert_eq!(parse("Verdict: APPROVED.", ResponseFormat::Decision).unwrap().content, "APPROVED");
        assert_eq!(parse("REJECTED due to bugs", ResponseFormat::Decision).unwrap().content, "REJECTED");
    }

    #[test]
    fn decision_errors_without_keyword() {
        assert!(parse("unclear response", ResponseFormat::Decision).is_err());
    }
}
