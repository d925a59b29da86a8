//! Recovering question/answer pairs from free-form model output.
//!
//! Models asked for one JSON object per line still wrap replies in code
//! fences, emit arrays, add trailing commas, or break an object across
//! lines. [`parse_pairs`] walks the reply line by line with a two-state
//! machine and keeps every object that parses; a broken fragment is dropped
//! without affecting its neighbours.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A validated pair, both sides trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    /// Chunk the pair was generated from.
    pub chunk_index: usize,
}

#[derive(Deserialize)]
struct Candidate {
    question: String,
    answer: String,
}

enum ParseState {
    Outside,
    Accumulating(String),
}

/// Extract every valid pair from `raw`. Never fails; returns an empty list
/// when nothing usable is found.
pub fn parse_pairs(raw: &str, chunk_index: usize) -> Vec<QaPair> {
    let mut pairs = Vec::new();
    let mut state = ParseState::Outside;

    for line in raw.lines() {
        let Some(line) = normalise_line(line) else {
            continue;
        };

        state = match state {
            ParseState::Accumulating(mut buffer) if !line.starts_with('{') => {
                buffer.push_str(line);
                if line.ends_with('}') {
                    accept(&buffer, chunk_index, &mut pairs);
                    ParseState::Outside
                } else {
                    ParseState::Accumulating(buffer)
                }
            }
            ParseState::Accumulating(abandoned) => {
                debug!("Chunk {}: dropping unterminated fragment {:?}", chunk_index, abandoned);
                open(line, chunk_index, &mut pairs)
            }
            ParseState::Outside if line.starts_with('{') => open(line, chunk_index, &mut pairs),
            ParseState::Outside => ParseState::Outside,
        };
    }

    if let ParseState::Accumulating(buffer) = state {
        debug!("Chunk {}: discarding unterminated fragment {:?}", chunk_index, buffer);
    }

    pairs
}

/// Start a candidate at a line beginning with `{`.
fn open(line: &str, chunk_index: usize, pairs: &mut Vec<QaPair>) -> ParseState {
    if line.ends_with('}') {
        accept(line, chunk_index, pairs);
        ParseState::Outside
    } else {
        ParseState::Accumulating(line.to_string())
    }
}

/// Trim decoration; `None` for lines that carry no content.
fn normalise_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("```") {
        return None;
    }

    let line = line.trim_matches('`').trim();
    if line.is_empty() || line == "[" || line == "]" {
        return None;
    }

    Some(match line.strip_suffix(',') {
        Some(rest) if rest.trim_end().ends_with('}') => rest.trim_end(),
        _ => line,
    })
}

fn accept(candidate: &str, chunk_index: usize, pairs: &mut Vec<QaPair>) {
    match serde_json::from_str::<Candidate>(candidate) {
        Ok(c) => {
            let question = c.question.trim();
            let answer = c.answer.trim();
            if question.is_empty() || answer.is_empty() {
                debug!("Chunk {}: skipping pair with empty field", chunk_index);
                return;
            }
            pairs.push(QaPair {
                question: question.to_string(),
                answer: answer.to_string(),
                chunk_index,
            });
        }
        Err(e) => debug!("Chunk {}: malformed candidate ({}): {}", chunk_index, e, candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qa(pairs: &[QaPair]) -> Vec<(&str, &str)> {
        pairs
            .iter()
            .map(|p| (p.question.as_str(), p.answer.as_str()))
            .collect()
    }

    #[test]
    fn one_object_per_line() {
        let raw = "{\"question\": \"What is X?\", \"answer\": \"X is Y.\"}\n\
                   {\"question\": \"How long?\", \"answer\": \"Five days.\"}";
        let pairs = parse_pairs(raw, 2);
        assert_eq!(qa(&pairs), vec![("What is X?", "X is Y."), ("How long?", "Five days.")]);
        assert!(pairs.iter().all(|p| p.chunk_index == 2));
    }

    #[test]
    fn object_split_across_lines_is_joined() {
        let raw = "{\"question\":\"Q1\",\"answer\":\"A1\"}\n{\"question\":\"Q2\"\n,\"answer\":\"A2\"}";
        assert_eq!(qa(&parse_pairs(raw, 0)), vec![("Q1", "A1"), ("Q2", "A2")]);
    }

    #[test]
    fn malformed_object_does_not_block_others() {
        let raw = "{\"question\":\"Q1\",\"answer\":\"A1\"}\n{\"question\": \"Q3\", \"answer\":}";
        assert_eq!(qa(&parse_pairs(raw, 0)), vec![("Q1", "A1")]);
    }

    #[test]
    fn fenced_array_with_commas() {
        let raw = "Here you go:\n```json\n[\n  {\"question\": \"Q1\", \"answer\": \"A1\"},\n  {\"question\": \"Q2\", \"answer\": \"A2\"}\n]\n```";
        assert_eq!(qa(&parse_pairs(raw, 0)), vec![("Q1", "A1"), ("Q2", "A2")]);
    }

    #[test]
    fn inline_backticks_stripped() {
        let raw = "`{\"question\": \"Q\", \"answer\": \"A\"}`";
        assert_eq!(qa(&parse_pairs(raw, 0)), vec![("Q", "A")]);
    }

    #[test]
    fn new_object_abandons_open_fragment() {
        let raw = "{\"question\": \"lost\"\n{\"question\": \"Q\", \"answer\": \"A\"}";
        assert_eq!(qa(&parse_pairs(raw, 0)), vec![("Q", "A")]);
    }

    #[test]
    fn multi_line_pretty_object() {
        let raw = "{\n  \"question\": \"Q\",\n  \"answer\": \"A\"\n}";
        assert_eq!(qa(&parse_pairs(raw, 0)), vec![("Q", "A")]);
    }

    #[test]
    fn empty_or_missing_fields_rejected() {
        let raw = "{\"question\": \"  \", \"answer\": \"A\"}\n\
                   {\"question\": \"Q\"}\n\
                   {\"question\": 1, \"answer\": \"A\"}\n\
                   {\"question\": \" Q \", \"answer\": \" A \"}";
        assert_eq!(qa(&parse_pairs(raw, 0)), vec![("Q", "A")]);
    }

    #[test]
    fn unterminated_fragment_at_end_is_dropped() {
        let raw = "{\"question\": \"Q\", \"answer\": \"A\"}\n{\"question\": \"Q2\",";
        assert_eq!(parse_pairs(raw, 0).len(), 1);
    }

    #[test]
    fn prose_yields_nothing() {
        assert!(parse_pairs("I cannot help with that.", 0).is_empty());
        assert!(parse_pairs("", 0).is_empty());
    }
}
