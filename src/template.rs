//! # Prompt templates
//!
//! Everything the assistant says to the model is built here:
//!
//! - [`PartnerMode`] picks the thinking-partner persona (critical, balanced,
//!   expansive).
//! - [`Purpose`] names the kind of document being written.
//! - [`compose_prompt`] lays out the user prompt of a chat turn; [`chat_instruction`]
//!   is its system instruction.
//! - [`ghost_prompt`] / [`ghost_instruction`] do the same for ghost-writing.
//!
//! Modes and purposes parse leniently: case and surrounding whitespace are
//! ignored and unknown names fall back to the default, so a stale client never
//! fails a request.
//!
//! All truncation is by characters, never bytes, so multi-byte text is never split.
//!
//! ## Chat prompt layout
//!
//! ```text
//! Purpose: writing (creative and analytical writing)
//! Partner mode: balanced
//!
//! Document content:
//! <first 2000 characters of the document>
//!
//! Selected text: <selection, omitted when blank>
//!
//! Relevant memories:
//! - <memory 1>
//! - <memory 2>
//!
//! User message: <message>
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Thinking-partner persona.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartnerMode {
    Critical,
    #[default]
    Balanced,
    Expansive,
}

impl PartnerMode {
    pub fn name(&self) -> &'static str {
        match self {
            PartnerMode::Critical => "critical",
            PartnerMode::Balanced => "balanced",
            PartnerMode::Expansive => "expansive",
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            PartnerMode::Critical => {
                "You are a critical thinking partner. Challenge assumptions, identify flaws, \
                 and ask probing questions. Be rigorous and analytical."
            }
            PartnerMode::Balanced => {
                "You are a balanced thinking partner. Weigh options thoughtfully, provide \
                 multiple perspectives, and help refine ideas with constructive feedback."
            }
            PartnerMode::Expansive => {
                "You are an expansive thinking partner. Explore possibilities freely, make \
                 creative connections, and encourage bold ideas without immediate criticism."
            }
        }
    }

    /// Lenient parse: unknown names yield [`PartnerMode::Balanced`].
    pub fn parse_lenient(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl FromStr for PartnerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(PartnerMode::Critical),
            "balanced" => Ok(PartnerMode::Balanced),
            "expansive" => Ok(PartnerMode::Expansive),
            other => Err(format!("unknown partner mode {other:?}")),
        }
    }
}

impl fmt::Display for PartnerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the document is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Writing,
    Accounting,
    Research,
    #[default]
    General,
}

impl Purpose {
    pub fn name(&self) -> &'static str {
        match self {
            Purpose::Writing => "writing",
            Purpose::Accounting => "accounting",
            Purpose::Research => "research",
            Purpose::General => "general",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Purpose::Writing => "creative and analytical writing",
            Purpose::Accounting => "financial and accounting documentation",
            Purpose::Research => "academic and research writing",
            Purpose::General => "general writing",
        }
    }

    /// Lenient parse: unknown names yield [`Purpose::General`].
    pub fn parse_lenient(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "writing" => Ok(Purpose::Writing),
            "accounting" => Ok(Purpose::Accounting),
            "research" => Ok(Purpose::Research),
            "general" => Ok(Purpose::General),
            other => Err(format!("unknown purpose {other:?}")),
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// First `n` characters of `text`.
pub fn prefix_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Last `n` characters of `text`.
pub fn last_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match text.char_indices().rev().nth(n - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

/// System instruction of a chat turn.
pub fn chat_instruction(partner: PartnerMode, purpose: Purpose) -> String {
    format!(
        "{} You are helping with {}.",
        partner.instruction(),
        purpose.description()
    )
}

/// Inputs of one chat prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub purpose: Purpose,
    pub partner: PartnerMode,
    pub document_content: &'a str,
    pub selected_text: Option<&'a str>,
    pub memories: &'a [String],
    pub message: &'a str,
    /// Characters of `document_content` to include.
    pub document_prefix_chars: usize,
}

/// Lay out the user prompt of a chat turn.
pub fn compose_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = format!(
        "Purpose: {} ({})\nPartner mode: {}\n\nDocument content:\n{}\n\n",
        ctx.purpose.name(),
        ctx.purpose.description(),
        ctx.partner.name(),
        prefix_chars(ctx.document_content, ctx.document_prefix_chars),
    );

    if let Some(selected) = ctx.selected_text.filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("Selected text: {selected}\n\n"));
    }

    if !ctx.memories.is_empty() {
        prompt.push_str("Relevant memories:\n");
        for memory in ctx.memories {
            prompt.push_str(&format!("- {memory}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("User message: {}", ctx.message));
    prompt
}

/// System instruction for ghost-writing.
pub fn ghost_instruction(purpose: Purpose) -> String {
    format!(
        "You are an AI writing assistant for {}. Your job is to predict what the user will \
         write next. Respond ONLY with the predicted continuation text (10-30 words). Match \
         the user's writing style and tone exactly. Do NOT include explanations, apologies, \
         or meta-commentary.",
        purpose.description()
    )
}

/// User prompt for ghost-writing over the text before the cursor.
pub fn ghost_prompt(window: &str) -> String {
    format!("Text written so far:\n\n{window}\n\n---\nPredict the next 10-30 words:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn context<'a>(memories: &'a [String]) -> PromptContext<'a> {
        PromptContext {
            purpose: Purpose::Writing,
            partner: PartnerMode::Critical,
            document_content: "Chapter one.",
            selected_text: None,
            memories,
            message: "Is this opening weak?",
            document_prefix_chars: 2000,
        }
    }

    #[test]
    fn modes_parse_leniently() {
        assert_eq!(PartnerMode::parse_lenient(" CRITICAL "), PartnerMode::Critical);
        assert_eq!(PartnerMode::parse_lenient("brutal"), PartnerMode::Balanced);
        assert_eq!(Purpose::parse_lenient("Research"), Purpose::Research);
        assert_eq!(Purpose::parse_lenient("poetry"), Purpose::General);
        assert!("poetry".parse::<Purpose>().is_err());
    }

    #[test]
    fn prompt_lists_memories_and_skips_blank_selection() {
        let memories = vec!["The narrator lies.".to_string(), "Set in 1920".to_string()];
        let mut ctx = context(&memories);
        ctx.selected_text = Some("   ");

        assert_eq!(
            compose_prompt(&ctx),
            "Purpose: writing (creative and analytical writing)\n\
             Partner mode: critical\n\
             \n\
             Document content:\n\
             Chapter one.\n\
             \n\
             Relevant memories:\n\
             - The narrator lies.\n\
             - Set in 1920\n\
             \n\
             User message: Is this opening weak?"
        );
    }

    #[test]
    fn prompt_includes_selection_without_memories() {
        let mut ctx = context(&[]);
        ctx.selected_text = Some("Chapter");

        let prompt = compose_prompt(&ctx);
        assert!(prompt.contains("Selected text: Chapter\n\nUser message:"));
        assert!(!prompt.contains("Relevant memories"));
    }

    #[test]
    fn document_is_truncated_by_characters() {
        let document = "é".repeat(3000);
        let mut ctx = context(&[]);
        ctx.document_content = &document;

        let prompt = compose_prompt(&ctx);
        assert!(prompt.contains(&"é".repeat(2000)));
        assert!(!prompt.contains(&"é".repeat(2001)));
    }

    #[test]
    fn char_slicing_handles_short_and_multibyte_text() {
        assert_eq!(prefix_chars("héllo", 2), "hé");
        assert_eq!(prefix_chars("hi", 10), "hi");
        assert_eq!(last_chars("héllo", 4), "éllo");
        assert_eq!(last_chars("hi", 10), "hi");
        assert_eq!(last_chars("hi", 0), "");
    }

    #[test]
    fn instructions_mention_purpose() {
        assert!(chat_instruction(PartnerMode::Expansive, Purpose::Accounting)
            .ends_with("You are helping with financial and accounting documentation."));
        assert!(ghost_instruction(Purpose::Research).contains("academic and research writing"));
        assert!(ghost_prompt("abc").starts_with("Text written so far:\n\nabc\n\n---"));
    }
}
