//! The assistant persona and single-turn prompt assembly.

/// Fixed system instruction sent with every chat-form completion.
pub const SYSTEM_PROMPT: &str =
    "You are Nirvana, a secure, mindful local AI assistant. Respond with a sense of humour";

/// Wrap a single-turn message in the persona template.
///
/// Both the template and the question are trimmed; validation has already
/// rejected blank input by the time this runs.
pub fn build_prompt(user_input: &str) -> String {
    format!("{}\nQuestion:\n{}", SYSTEM_PROMPT.trim(), user_input.trim())
}
