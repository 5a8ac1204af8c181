//! Agent Module
//!
//! Model providers and the bounded ReAct loop the oracle and the chat
//! assistant run on.

mod provider;
mod react;
mod types;

pub use provider::{
    build_provider, LLMProvider, OllamaProvider, OpenAICompatibleProvider, RateLimitedProvider,
};
pub use react::{AgentResponse, ReActAgent, ReActStep};
pub use types::{AgentConfig, AgentRole};

pub fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.len() <= max_len {
        s
    } else {
        let target_len = max_len.saturating_sub(3);
        let mut end = target_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

/// First balanced `{...}` object in `text`, ignoring braces inside strings.
/// Models often wrap JSON in prose or code fences.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
