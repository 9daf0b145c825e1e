//! Prompt assembly for lead massaging.

use crate::domains::massage::models::LeadRecord;

/// Fixed output-format rules appended to every massage prompt so the model
/// returns a bare value that can be written straight into the column.
const OUTPUT_RULES: &str = "Output rules:\n\
- Respond with the transformed text only. No JSON, no quotes, no labels.\n\
- Be concise.\n\
- If the input is unclear or empty, respond with an empty output.";

/// Build the transformation prompt for one lead.
///
/// One `name: \"value\"` line per source column in order (missing columns
/// render as an empty string), then the batch's instruction, then the fixed
/// output rules.
pub fn build_massage_prompt(
    lead: &LeadRecord,
    source_columns: &[String],
    instruction: &str,
) -> String {
    let mut prompt = String::new();
    for name in source_columns {
        let value = lead.value_trimmed(name);
        prompt.push_str(&format!("{name}: \"{value}\"\n"));
    }
    prompt.push('\n');
    prompt.push_str(instruction.trim());
    prompt.push_str("\n\n");
    prompt.push_str(OUTPUT_RULES);
    prompt
}
