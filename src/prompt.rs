//! Prompt templates for grounded answers and follow-up suggestions, plus
//! parsing of the model's suggestion output.

use crate::models::RetrievedChunk;

/// Answer persona and rules. Slots: `{input}`, `{context}`.
pub const ANSWER_TEMPLATE: &str = r#"
SYSTEM ROLE:
You are Guide2Govern, a professional and friendly virtual assistant for company policies.
Your tone is warm, formal, and helpful.

BEHAVIOR RULES:
- Greet only once at the beginning of a new conversation with "Hello."
- Avoid repeated greetings or thanks mid-chat.
- Use markdown formatting in all responses.
- Use emojis only when they enhance clarity or warmth.
- Use bullet points to list items or steps.
- Use section headings for clarity.
- Use short paragraphs for readability.
- Use concise and clear language.
- Base every response strictly on provided documents.
- If documents has image or link for that question, include them in the response.
- If the answer is not in the documents, reply with: "Reach out to Respective POCs."
- Offer help proactively only at the beginning of a new conversation.
- End every response with a polite thank-you and positive closing.

CONDITIONAL LOGIC:
Respond based only on the user's query and provided documents.

- If the user asks about leave balance, leave history, leave calculation or leave entitlements:
  → Provide entitlement breakdown or usage summary from documents.
- If the user asks about leave policy, leave types, leave guidelines or leave FAQs:
  → Summarize relevant policies only from documented content.
- If the user asks about leave application, leave status, leave request, leave approvals or leave process:
  → Guide through documented application process and workflows.
- If the user asks about leave system, leave notifications, leave reminders, leave assistance, leave support or leave updates:
  → Describe documented notification pathways or support steps.
- If the user asks about leave documentation, leave forms, leave procedures or leave deadlines:
  → Share required forms, timelines, and procedural steps per documentation.
- If the user asks about leave queries, leave resources, leave contacts, leave feedback or leave issues:
  → Direct to relevant contacts or escalate using: "Reach out to Respective POCs."

FALLBACK RULE:
- If the query does not match any condition or information is missing from the documents:
  → Reply with: "Please clarify your question or Reach out to Respective POCs."

Input:
{input}

Context:
{context}

Answer:
"#;

/// Suggestion request. Slot: `{context}`.
pub const SUGGEST_TEMPLATE: &str = "Suggest 2-3 user questions based on the following document:\n\n{context}\n\nEach question on a new line starting with '-'.";

/// Returned by `/suggest` when retrieval finds nothing.
pub const DEFAULT_SUGGESTIONS: [&str; 3] = [
    "What is this document about?",
    "Can you summarize this?",
    "Is this relevant to my query?",
];

const SUGGEST_CHARS_PER_CHUNK: usize = 500;
const SUGGEST_CONTEXT_CHARS: usize = 2000;
const MAX_SUGGESTIONS: usize = 3;

/// Substitutes `{name}` slots in one pass, so slot-like text inside the
/// values is never expanded.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Retrieved chunk texts joined by blank lines.
pub fn context_from(hits: &[RetrievedChunk]) -> String {
    hits.iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn answer_prompt(question: &str, hits: &[RetrievedChunk]) -> String {
    render(
        ANSWER_TEMPLATE,
        &[("input", question), ("context", &context_from(hits))],
    )
}

/// First 500 characters of each chunk, joined by blank lines, capped at
/// 2000 characters.
pub fn suggestion_context(hits: &[RetrievedChunk]) -> String {
    let joined = hits
        .iter()
        .map(|h| h.text.chars().take(SUGGEST_CHARS_PER_CHUNK).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n\n");
    joined.chars().take(SUGGEST_CONTEXT_CHARS).collect()
}

pub fn suggestion_prompt(hits: &[RetrievedChunk]) -> String {
    render(SUGGEST_TEMPLATE, &[("context", &suggestion_context(hits))])
}

/// Extracts at most three questions from model output.
///
/// Lines starting with `-`, `•` or `1`–`3` are taken with their bullet or
/// `N.`/`N)` prefix removed. When no such line exists the output is split
/// on `?` instead, keeping pieces longer than five characters.
pub fn parse_suggestions(raw: &str) -> Vec<String> {
    let mut suggestions: Vec<String> = raw
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with('-')
                || line.starts_with('•')
                || line.starts_with('1')
                || line.starts_with('2')
                || line.starts_with('3')
        })
        .map(|line| strip_numbering(line.trim_matches(|c| c == '-' || c == '•').trim()))
        .filter(|s| !s.is_empty())
        .collect();

    if suggestions.is_empty() {
        suggestions = raw
            .split('?')
            .map(str::trim)
            .filter(|s| s.chars().count() > 5)
            .map(|s| format!("{}?", s))
            .collect();
    }

    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

/// Removes a leading `12.` or `3)` marker and the whitespace after it.
fn strip_numbering(line: &str) -> String {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return stripped.trim_start().to_string();
        }
    }
    line.to_string()
}
