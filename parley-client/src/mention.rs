use std::collections::HashSet;

#[derive(pest_derive::Parser)]
#[grammar = "mention.pest"]
struct MentionParser;

/// Returns the distinct `@handle`s referenced by `text`, in order of first
/// appearance, without the leading `@`
pub fn extract_mentions(text: &str) -> Vec<String> {
    use pest::Parser;
    let pairs = match MentionParser::parse(Rule::text, text) {
        Ok(pairs) => pairs,
        Err(err) => {
            // the grammar accepts any input, so this should be unreachable
            tracing::warn!(?err, "failed scanning comment text for mentions");
            return Vec::new();
        }
    };
    let mut seen = HashSet::new();
    pairs
        .flatten()
        .filter(|p| p.as_rule() == Rule::handle)
        .map(|p| p.as_str())
        .filter(|handle| seen.insert(*handle))
        .map(String::from)
        .collect()
}
