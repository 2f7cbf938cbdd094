//! System prompt and request text for record classification.
//!
//! Callers can override the prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constant here is
//! used only when no override is provided.

/// Default instruction for labelling one review comment.
///
/// The model sees the reviewers, their comments and the cropped page strip,
/// and answers with a two-field JSON object.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a very professional quality analyst, expert in UI and content testing. Reviewers have marked up a document during user acceptance testing. For one defect you will receive the list of reviewers, their comments, and an image of the page region the comments refer to.

<DEFINITIONS>
1. Content Defect: the defect is about textual or content changes and issues.
2. UI Defect: the defect is about UI issues such as missing elements, alignment or spacing.
3. Change: the defect asks for a new feature or a change to an existing feature.
4. Bug: the defect is about an existing feature that does not work as expected.
</DEFINITIONS>

<TASKS>
1. Read the image and the comments and categorise the nature as "Content" or "UI".
2. Read the image and the comments and categorise the type as "Change" or "Bug".
</TASKS>

<OUTPUT>
{
    "nature": "Content/UI",
    "type": "Change/Bug"
}
</OUTPUT>

Respond with the JSON object from the <OUTPUT> section only. Do not repeat the sections above and do not explain your reasoning."#;

/// Build the user text for one record: reviewers first, then their comments.
///
/// Both lists are rendered as `['a', 'b']`, so replies stay distinguishable
/// from the original comment.
pub fn record_text(authors: &[String], contents: &[String]) -> String {
    format!("{},{}", quoted_list(authors), quoted_list(contents))
}

fn quoted_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| quote(s)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Single quotes, or double quotes when the text has an apostrophe and no
/// double quote. Backslash, the chosen quote and control characters are escaped.
fn quote(s: &str) -> String {
    let q = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(q);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == q => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(q);
    out
}
