//! Prompt templates for distillation and system-prompt assembly.
//!
//! The distillation rules (durability, user-specificity, canonical keys,
//! contradiction handling, confidence calibration) are shared text baked
//! into both passes of the protocol; only the task framing and output
//! shape differ between extraction and validation.

/// Pass 1: liberal candidate extraction.
///
/// Given the existing memory set and a conversation segment, produce a
/// superset of candidate memory operations. Recall matters more than
/// precision here - Pass 2 is responsible for rejecting noise.
pub const EXTRACTION_PROMPT: &str = "\
You are a memory management system. You are given:
1. A conversation segment between a user and an assistant
2. Existing memories from previous segments

Your job: produce an UPDATED memory list.

You may:
- ADD new memories discovered in this conversation
- UPDATE existing memories if new information refines or contradicts them
- KEEP existing memories that are still valid and unchanged
- EXPIRE memories that are clearly no longer true

Rules:
- Only store DURABLE information: preferences, facts, constraints, commitments, entities, long-term instructions
- Only store USER-SPECIFIC facts/preferences (e.g. \"User lives in Seattle\"). Do NOT store general world knowledge or trivia (e.g. \"Paris is capital of France\") unless it relates to the user directly.
- Do NOT store ephemeral things: greetings, filler, \"ok\", \"thanks\", reactions, questions without answers
- Use canonical snake_case keys (e.g. \"preferred_language\" not \"the language they like\")
- Be precise with values
- If the user contradicts an earlier memory, the LATEST statement wins - use UPDATE
- You MAY infer implicit preferences if strongly supported by multiple messages (e.g. user always asks for vegetarian -> dietary_preference: vegetarian)
- Confidence should reflect how explicit and certain the information is: direct statement = 0.95, inferred = 0.7, ambiguous = 0.5
- Err on the side of extracting a candidate when unsure; a later validation pass will reject it if it shouldn't be kept

EXISTING MEMORIES:
{existing_memories}

CONVERSATION SEGMENT (turns {start_turn} to {end_turn}):
{conversation}

Return ONLY valid JSON with no markdown formatting, no code fences:
{{
  \"memories\": [
    {{
      \"action\": \"add|update|keep|expire\",
      \"type\": \"preference|fact|commitment|constraint|entity|instruction\",
      \"category\": \"language|schedule|personal|work|health|location|dietary|financial|family|tech|communication|travel|general\",
      \"key\": \"canonical_snake_case_key\",
      \"value\": \"the actual information\",
      \"confidence\": 0.95,
      \"reasoning\": \"why this should be stored\"
    }}
  ]
}}";

/// Pass 2: strict validation of Pass 1's candidates against the original
/// segment. `keep`/`expire` candidates referencing an existing memory skip
/// this pass entirely (see `Distiller::validate_candidates`); only `add`
/// and `update` candidates are judged here.
pub const VALIDATION_PROMPT: &str = "\
You are validating candidate memories extracted from a conversation. Be strict:
reject anything that is general world knowledge, ephemeral conversational noise,
a question without a settled answer, or not clearly about this specific user.

A candidate should be ACCEPTED only if:
- It is durable (will still matter in future conversations)
- It is specific to this user, not a fact about the world
- The conversation segment actually supports it

CANDIDATES:
{candidates_json}

CONVERSATION SEGMENT:
{conversation}

Return ONLY valid JSON with no markdown formatting, no code fences:
{{
  \"validations\": [
    {{
      \"key\": \"canonical_snake_case_key\",
      \"verdict\": \"accept|reject\",
      \"reason\": \"short justification\"
    }}
  ]
}}";

/// System prompt skeleton the agent rebuilds every turn.
pub const SYSTEM_PROMPT_TEMPLATE: &str = "\
You are a helpful assistant with persistent memory across a long conversation.

{profile_section}
{memories_section}
## Behavior Rules
- Apply memories implicitly - weave them into your responses naturally
- Do NOT parrot memories back (don't say \"as you mentioned earlier\" unless it's natural)
- If the current user message contradicts a memory, follow the CURRENT message
- If you're uncertain whether a remembered fact still holds, ask to confirm
- Be concise and helpful";

pub const PROFILE_SECTION: &str = "\
## User Profile
{profile_yaml}
";

pub const MEMORIES_SECTION: &str = "\
## Relevant Memories
{memories_list}
";

/// Render a template's single `{placeholder}` occurrences by simple
/// substring replacement. Templates here are fixed and trusted, so this
/// avoids pulling in a templating crate for a handful of `{name}` slots.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_all_placeholders() {
        let out = render(
            EXTRACTION_PROMPT,
            &[
                ("existing_memories", "(none)"),
                ("start_turn", "1"),
                ("end_turn", "5"),
                ("conversation", "USER: hi"),
            ],
        );
        assert!(!out.contains("{existing_memories}"));
        assert!(out.contains("turns 1 to 5"));
        assert!(out.contains("USER: hi"));
    }

    #[test]
    fn profile_section_renders_yaml_block() {
        let out = render(PROFILE_SECTION, &[("profile_yaml", "- name: Ada")]);
        assert!(out.contains("- name: Ada"));
    }

    #[test]
    fn system_prompt_template_embeds_sections() {
        let out = render(
            SYSTEM_PROMPT_TEMPLATE,
            &[("profile_section", "## User Profile\n"), ("memories_section", "")],
        );
        assert!(out.contains("## Behavior Rules"));
        assert!(out.contains("## User Profile"));
    }
}
