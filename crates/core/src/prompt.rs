//! Structured prompt builder.
//!
//! A `Prompt` is an ordered list of `{role, content}` blocks. The markup the
//! inference backend expects is defined in exactly one place — the
//! `MarkupFamily` serializers — so the wire format is testable independently
//! of the assembly logic that decides *which* blocks go in.

use serde::{Deserialize, Serialize};

/// The role of a prompt block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (assistant persona, rules)
    System,
    /// The end user
    User,
    /// The model
    Assistant,
}

/// A single role-delimited block of prompt text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBlock {
    pub role: Role,
    pub content: String,
}

/// Prompt markup families understood by the supported backends.
///
/// `Llama3` must be reproduced byte-for-byte when talking to a
/// Llama-3-family GGUF model; `Plain` is an unambiguous fallback for
/// models without a chat template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupFamily {
    /// `<|start_header_id|>{role}<|end_header_id|>\n\n{content}<|eot_id|>`
    /// per block, closed with an assistant header cue. No leading
    /// `<|begin_of_text|>` — the backend prepends BOS itself, and a
    /// duplicate degrades response quality.
    Llama3,
    /// `{system}\n\nUser: {content}\nBot: {content}` with a trailing
    /// `Bot:` cue.
    Plain,
}

impl MarkupFamily {
    /// Stop sequences the backend should honor for this family, beyond
    /// its own EOS token.
    pub fn stop_sequences(&self) -> Vec<String> {
        match self {
            Self::Llama3 => vec!["<|eot_id|>".into()],
            Self::Plain => vec!["User:".into(), "Bot:".into()],
        }
    }

    fn render_block(&self, block: &PromptBlock, out: &mut String) {
        match self {
            Self::Llama3 => {
                let role = match block.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                out.push_str("<|start_header_id|>");
                out.push_str(role);
                out.push_str("<|end_header_id|>\n\n");
                out.push_str(&block.content);
                out.push_str("<|eot_id|>");
            }
            Self::Plain => {
                match block.role {
                    Role::System => {
                        out.push_str(&block.content);
                        out.push_str("\n\n");
                    }
                    Role::User => {
                        out.push_str("User: ");
                        out.push_str(&block.content);
                        out.push('\n');
                    }
                    Role::Assistant => {
                        out.push_str("Bot: ");
                        out.push_str(&block.content);
                        out.push('\n');
                    }
                }
            }
        }
    }

    fn completion_cue(&self) -> &'static str {
        match self {
            Self::Llama3 => "<|start_header_id|>assistant<|end_header_id|>",
            Self::Plain => "Bot:",
        }
    }
}

/// An ordered sequence of role-delimited blocks, ready to serialize.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    blocks: Vec<PromptBlock>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a prompt with a system block.
    pub fn system(content: impl Into<String>) -> Self {
        let mut p = Self::new();
        p.push(Role::System, content);
        p
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) -> &mut Self {
        self.blocks.push(PromptBlock {
            role,
            content: content.into(),
        });
        self
    }

    /// Append one prior exchange: a user block followed by an assistant block.
    pub fn push_exchange(
        &mut self,
        user: impl Into<String>,
        assistant: impl Into<String>,
    ) -> &mut Self {
        self.push(Role::User, user);
        self.push(Role::Assistant, assistant);
        self
    }

    pub fn blocks(&self) -> &[PromptBlock] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Serialize all blocks in order and close with the family's
    /// assistant completion cue.
    pub fn render(&self, family: MarkupFamily) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            family.render_block(block, &mut out);
        }
        out.push_str(family.completion_cue());
        out
    }
}

/// Render a lone user turn — user block plus completion cue.
///
/// This is the unit the input budget is measured against: the cost of the
/// current request as it will appear in the assembled prompt.
pub fn render_user_turn(text: &str, family: MarkupFamily) -> String {
    let mut p = Prompt::new();
    p.push(Role::User, text);
    p.render(family)
}

/// Render one prior exchange (user + assistant blocks, no cue) as it
/// appears inside the assembled prompt and in the `context` field of a
/// generation response.
pub fn render_exchange(user: &str, assistant: &str, family: MarkupFamily) -> String {
    let mut out = String::new();
    family.render_block(
        &PromptBlock {
            role: Role::User,
            content: user.to_string(),
        },
        &mut out,
    );
    family.render_block(
        &PromptBlock {
            role: Role::Assistant,
            content: assistant.to_string(),
        },
        &mut out,
    );
    out
}
