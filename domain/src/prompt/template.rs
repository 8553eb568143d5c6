//! Prompt templates for mapping and synthesis steps

/// Templates for generating the prompts of downstream steps.
///
/// Batch prompts are the user's message, sent verbatim.
pub struct PromptTemplate;

impl PromptTemplate {
    /// Prompt asking one provider to map agreements and tensions across all
    /// batch answers without merging them.
    pub fn mapping_prompt(original_prompt: &str, outputs: &[(&str, &str)]) -> String {
        let mut prompt = format!(
            r#"You are mapping a discussion between several independent experts.

Original question:
{}

Expert answers:
"#,
            original_prompt
        );

        for (provider, text) in outputs {
            prompt.push_str(&format!("\n--- {} ---\n{}\n", provider, text));
        }

        prompt.push_str(
            r#"
Do NOT merge these answers into a single answer. Instead, narrate the landscape:

1. **Agreements**: points every expert supports, and how strongly
2. **Tensions**: where experts disagree, what each side claims, and what the disagreement hinges on
3. **Decision framing**: which choices the reader actually has to make, and which facts or preferences would settle each one

Name the experts when attributing positions. Keep the map concise and neutral."#,
        );

        prompt
    }

    /// Prompt asking one provider to synthesize the other providers' answers.
    ///
    /// `outputs` must already exclude the synthesizer's own answer. When a
    /// mapping exists it is embedded as a conflict resolution map the
    /// synthesis has to resolve point by point.
    pub fn synthesis_prompt(
        original_prompt: &str,
        outputs: &[(&str, &str)],
        conflict_map: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            r#"Original question:
{}

Answers from other experts:
"#,
            original_prompt
        );

        for (provider, text) in outputs {
            prompt.push_str(&format!("\n--- {} ---\n{}\n", provider, text));
        }

        if let Some(map) = conflict_map {
            prompt.push_str(&format!(
                r#"
=== Conflict resolution map ===
{}
=== End of conflict resolution map ===

The map above lists the tensions between the answers. Your synthesis MUST explicitly resolve every tension it names, stating which position you adopt and why.
"#,
                map
            ));
        }

        prompt.push_str(
            r#"
Combine your own knowledge with the strongest elements of these answers into one complete, self-contained response to the original question. Correct errors instead of repeating them. Do not mention that other experts were consulted."#,
        );

        prompt
    }
}
