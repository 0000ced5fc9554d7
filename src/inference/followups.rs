/// Mines follow-up questions from free-text analysis output.
///
/// Line-oriented heuristic: a line whose trimmed form starts with a bullet
/// marker (`-` or `*`) is one follow-up. The marker and the character after
/// it are stripped, the remainder whitespace-trimmed. Blank remainders and
/// horizontal rules are dropped.
pub fn extract_follow_ups(analysis: &str) -> Vec<String> {
    analysis
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            if !trimmed.starts_with('-') && !trimmed.starts_with('*') {
                return None;
            }
            let mut chars = trimmed.chars();
            chars.next();
            chars.next();
            let question = chars.as_str().trim();
            if question.is_empty() || question.chars().all(|c| c == '-' || c == '*') {
                return None;
            }
            Some(question.to_string())
        })
        .collect()
}
