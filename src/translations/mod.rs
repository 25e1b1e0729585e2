use anyhow::{Context, Result};
use tera::{Context as TeraContext, Tera};

use crate::languages::Direction;

const JA_TO_EN_TEMPLATE: &str = include_str!("prompts/ja_to_en.tera");
const EN_TO_JA_TEMPLATE: &str = include_str!("prompts/en_to_ja.tera");
const GROUPING_TEMPLATE: &str = include_str!("prompts/grouping.tera");
const USER_TEMPLATE: &str = include_str!("prompts/user_prompt.tera");

/// Whether the request carries plain text or a span array to be regrouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Text,
    Grouped,
}

pub fn render_system_prompt(direction: Direction, kind: PromptKind) -> Result<String> {
    let template = match direction {
        Direction::JaToEn => JA_TO_EN_TEMPLATE,
        Direction::EnToJa => EN_TO_JA_TEMPLATE,
    };
    let context = direction_context(direction);
    let mut prompt = Tera::one_off(template, &context, false)
        .with_context(|| format!("failed to render {} system prompt", direction))?;
    if kind == PromptKind::Grouped {
        let grouping = Tera::one_off(GROUPING_TEMPLATE, &context, false)
            .with_context(|| "failed to render grouping instructions")?;
        prompt.push_str(&grouping);
    }
    Ok(prompt)
}

pub fn render_user_prompt(text: &str) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("text", text);
    Tera::one_off(USER_TEMPLATE, &context, false).with_context(|| "failed to render user prompt")
}

fn direction_context(direction: Direction) -> TeraContext {
    let mut context = TeraContext::new();
    context.insert("source_name", direction.source().name());
    context.insert("target_name", direction.target().name());
    context.insert("direction", direction.as_str());
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_differ_by_direction() {
        let ja_en = render_system_prompt(Direction::JaToEn, PromptKind::Text).unwrap();
        let en_ja = render_system_prompt(Direction::EnToJa, PromptKind::Text).unwrap();
        assert!(ja_en.contains("Japanese to English"));
        assert!(en_ja.contains("English to Japanese"));
        assert_ne!(ja_en, en_ja);
    }

    #[test]
    fn both_directions_forbid_questions_and_commentary() {
        for direction in [Direction::JaToEn, Direction::EnToJa] {
            let prompt = render_system_prompt(direction, PromptKind::Text).unwrap();
            assert!(prompt.contains("Output ONLY the translated text"));
            assert!(prompt.contains("Never ask clarifying questions"));
        }
    }

    #[test]
    fn grouped_prompt_describes_the_response_shape() {
        let prompt = render_system_prompt(Direction::EnToJa, PromptKind::Grouped).unwrap();
        assert!(prompt.contains(r#""start""#));
        assert!(prompt.contains("<Japanese text>"));
        let plain = render_system_prompt(Direction::EnToJa, PromptKind::Text).unwrap();
        assert!(prompt.starts_with(&plain));
    }

    #[test]
    fn user_prompt_wraps_text() {
        let prompt = render_user_prompt("Task").unwrap();
        insta::assert_snapshot!(prompt.trim_end().replace('\n', "|"), @"Translate the following text:||Task");
    }
}
