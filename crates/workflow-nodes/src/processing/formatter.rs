//! Formatter Executor
//!
//! Renders the node's inputs into a preset template, has the model write
//! the final text at a low fixed temperature, and cleans up the reply.

use std::sync::Arc;

use async_trait::async_trait;
use node_engine::{
    ExecutorRegistration, FlowIO, ModelOptions, NodeContext, NodeDescriptor, NodeExecutor, NodeInputs, NodeKind,
    NodeOutcome, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Sampling temperature for every formatter call
pub const FORMATTER_TEMPERATURE: f32 = 0.2;

const FORMATTER_MAX_TOKENS: u32 = 1024;

/// Lead-ins a model tends to put before the actual content
const LEAD_INS: &[&str] = &[
    "sure",
    "certainly",
    "of course",
    "absolutely",
    "here is",
    "here's",
    "below is",
];

/// Sign-offs a model tends to append after the content
const SIGN_OFFS: &[&str] = &[
    "let me know",
    "i hope this helps",
    "hope this helps",
    "feel free to",
    "is there anything else",
];

/// Template presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatterPreset {
    #[default]
    Chat,
    Email,
    Report,
    Custom,
}

impl FormatterPreset {
    fn instructions(&self) -> &'static str {
        match self {
            FormatterPreset::Chat => "Rewrite the content below as a concise, conversational chat reply.",
            FormatterPreset::Email => {
                "Write a complete email from the content below. Start with a 'Subject:' line, then the body."
            }
            FormatterPreset::Report => {
                "Write a structured report from the content below, with a title, short sections and a summary."
            }
            FormatterPreset::Custom => "",
        }
    }
}

/// Formatter executor
///
/// # Config
/// - `preset` (optional) - `chat` (default), `email`, `report` or `custom`
/// - `template` - Required for `custom`; placeholders `{{content}}`,
///   `{{tone}}`, `{{audience}}`, `{{format}}`
/// - `tone`, `audience`, `format` (optional) - Style hints
/// - `model`, `seed` (optional) - Passed to the model
///
/// # Inputs
/// - Any ports; rendered as text
///
/// # Outputs
/// - `out` - Cleaned text. A failed model call yields empty text with
///   `meta.error` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatterExecutor;

impl FormatterExecutor {
    /// Port ID for the formatted text
    pub const PORT_OUTPUT: &'static str = "out";

    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor::for_kind(
            NodeKind::Formatter,
            "Formatter",
            "Render inputs as chat, email, report or custom text",
        )
    }

    fn render(config: &Value, content: &str) -> std::result::Result<(FormatterPreset, String), String> {
        let preset: FormatterPreset = match config.get("preset") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| format!("invalid preset {}: {}", value, e))?,
            None => FormatterPreset::default(),
        };
        let hint = |key: &str| config.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());

        if preset == FormatterPreset::Custom {
            let template = hint("template").ok_or_else(|| "custom preset requires a 'template'".to_string())?;
            let rendered = template
                .replace("{{content}}", content)
                .replace("{{tone}}", hint("tone").unwrap_or("neutral"))
                .replace("{{audience}}", hint("audience").unwrap_or("general"))
                .replace("{{format}}", hint("format").unwrap_or("plain text"));
            return Ok((preset, rendered));
        }

        let mut prompt = preset.instructions().to_string();
        if let Some(tone) = hint("tone") {
            prompt.push_str(&format!("\nTone: {}.", tone));
        }
        if let Some(audience) = hint("audience") {
            prompt.push_str(&format!("\nAudience: {}.", audience));
        }
        if let Some(format) = hint("format") {
            prompt.push_str(&format!("\nOutput format: {}.", format));
        }
        prompt.push_str("\nReply with the final text only.\n\nContent:\n");
        prompt.push_str(content);
        Ok((preset, prompt))
    }
}

fn starts_with_any(line: &str, prefixes: &[&str]) -> bool {
    let lower = line.trim().to_lowercase();
    prefixes.iter().any(|p| lower.starts_with(p))
}

/// Post-process a model reply
///
/// Drops code fence lines, a boilerplate lead-in line, trailing sign-off
/// lines, trailing whitespace on every line, and runs of blank lines.
pub fn clean_reply(text: &str) -> String {
    let mut lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();

    while lines.first().map_or(false, |l| l.trim().is_empty()) {
        lines.remove(0);
    }
    if let Some(first) = lines.first() {
        let first = first.trim();
        let short = first.chars().count() <= 100;
        let ends_as_lead_in = first.ends_with(':') || first.ends_with('!') || first.ends_with('.');
        if starts_with_any(first, LEAD_INS) && short && ends_as_lead_in && lines.len() > 1 {
            lines.remove(0);
        }
    }

    loop {
        match lines.last() {
            Some(last) if last.trim().is_empty() => {
                lines.pop();
            }
            Some(last) if starts_with_any(last, SIGN_OFFS) && lines.len() > 1 => {
                lines.pop();
            }
            _ => break,
        }
    }

    let mut cleaned = String::new();
    let mut blank_run = 0;
    for line in lines {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !cleaned.is_empty() {
            cleaned.push('\n');
        }
        cleaned.push_str(line);
    }
    cleaned.trim().to_string()
}

#[async_trait]
impl NodeExecutor for FormatterExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>, inputs: &NodeInputs) -> Result<NodeOutcome> {
        if let Some(failure) = crate::upstream_failure(&ctx.node.id, inputs) {
            return Ok(NodeOutcome::all(failure));
        }

        let (preset, prompt) = match Self::render(&ctx.node.config, &inputs.combined_text()) {
            Ok(rendered) => rendered,
            Err(message) => return Ok(NodeOutcome::all(FlowIO::error(message))),
        };

        let options = ModelOptions {
            model: ctx.node.config_str("model").map(str::to_string),
            system: None,
            temperature: FORMATTER_TEMPERATURE,
            max_tokens: FORMATTER_MAX_TOKENS,
            seed: ctx.node.config.get("seed").and_then(Value::as_u64),
        };

        let output = match ctx.call_model(&prompt, &options).await {
            Ok(response) => FlowIO::text(clean_reply(&response.text)),
            Err(e) => {
                log::warn!("FormatterExecutor {}: model call failed: {}", ctx.node.id, e);
                FlowIO::text("").with_meta("error", json!(e.to_string()))
            }
        };

        log::debug!("FormatterExecutor {}: rendered {:?} output", ctx.node.id, preset);
        Ok(NodeOutcome::all(
            output
                .with_meta("preset", json!(preset))
                .with_meta("temperature", json!(FORMATTER_TEMPERATURE)),
        ))
    }
}

inventory::submit!(ExecutorRegistration {
    kind: NodeKind::Formatter,
    subtype: None,
    descriptor: FormatterExecutor::descriptor,
    executor: || Arc::new(FormatterExecutor),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ScriptedModel;
    use crate::storage::InMemoryIndex;
    use crate::test_support::{run_node, services_with};
    use node_engine::GraphNode;

    fn formatter(config: Value) -> GraphNode {
        let mut node = GraphNode::new("fmt", NodeKind::Formatter);
        node.config = config;
        node
    }

    fn inputs(text: &str) -> NodeInputs {
        let mut inputs = NodeInputs::new();
        inputs.push("in", FlowIO::text(text));
        inputs
    }

    #[test]
    fn test_clean_reply() {
        let raw = "Sure! Here's your email:\n```\nSubject: Hi\n\n\n\nBody   \n```\n\nLet me know if you need changes.\n";
        assert_eq!(clean_reply(raw), "Subject: Hi\n\nBody");
    }

    #[test]
    fn test_clean_reply_keeps_real_content() {
        assert_eq!(clean_reply("Sure."), "Sure.");
        assert_eq!(clean_reply("  Plain text  "), "Plain text");
        assert_eq!(clean_reply("Here is the plan\nstep one"), "Here is the plan\nstep one");
    }

    #[test]
    fn test_render_hints() {
        let (preset, prompt) =
            FormatterExecutor::render(&json!({"preset": "email", "tone": "friendly", "audience": "customers"}), "body")
                .unwrap();
        assert_eq!(preset, FormatterPreset::Email);
        assert!(prompt.contains("Subject:"));
        assert!(prompt.contains("Tone: friendly."));
        assert!(prompt.contains("Audience: customers."));
        assert!(prompt.ends_with("body"));
    }

    #[test]
    fn test_custom_template() {
        let config = json!({"preset": "custom", "template": "[{{tone}}] {{content}}"});
        let (_, prompt) = FormatterExecutor::render(&config, "hello").unwrap();
        assert_eq!(prompt, "[neutral] hello");

        assert!(FormatterExecutor::render(&json!({"preset": "custom"}), "x").is_err());
        assert!(FormatterExecutor::render(&json!({"preset": "poem"}), "x").is_err());
    }

    #[tokio::test]
    async fn test_fixed_low_temperature() {
        let model = Arc::new(ScriptedModel::new("Certainly! Here is the reply:\nHello there"));
        let services = services_with(model.clone(), Arc::new(InMemoryIndex::new()));

        let outcome = run_node(&FormatterExecutor, &formatter(json!({"preset": "chat"})), &inputs("hi"), &services).await;
        assert_eq!(outcome.output, FlowIO::text("Hello there")
            .with_meta("preset", json!("chat"))
            .with_meta("temperature", json!(FORMATTER_TEMPERATURE)));
        assert_eq!(model.calls()[0].options.temperature, FORMATTER_TEMPERATURE);
    }

    #[tokio::test]
    async fn test_model_failure_sets_meta_error() {
        let services = services_with(Arc::new(ScriptedModel::failing("offline")), Arc::new(InMemoryIndex::new()));
        let outcome = run_node(&FormatterExecutor, &formatter(json!({})), &inputs("hi"), &services).await;
        assert!(!outcome.output.is_error());
        assert_eq!(outcome.output.error_message().as_deref(), Some("Service error: offline"));
    }
}
