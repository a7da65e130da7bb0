//! Context block assembly and prompt rendering.

use crate::retriever::RetrievedChunk;

/// Joins retrieved chunk texts with newlines, preserving retrieval order.
pub fn assemble_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rough token estimate used for budgeting (four characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// Keeps the longest prefix of `chunks` that fits within `budget` tokens.
///
/// The most relevant chunk is always kept, even when it alone exceeds the
/// budget. `None` disables the cap.
pub fn apply_token_budget(
    chunks: Vec<RetrievedChunk>,
    budget: Option<usize>,
) -> Vec<RetrievedChunk> {
    let Some(mut remaining) = budget else {
        return chunks;
    };
    let mut kept = Vec::new();
    for hit in chunks {
        let cost = estimate_tokens(&hit.chunk.text);
        if kept.is_empty() {
            remaining = remaining.saturating_sub(cost);
            kept.push(hit);
            continue;
        }
        if cost > remaining {
            break;
        }
        remaining -= cost;
        kept.push(hit);
    }
    kept
}

/// Renders the user prompt sent to the generator.
pub fn build_prompt(context: &str, question: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("Based on the following context items, please answer the query.\n");
    prompt.push_str("Give yourself room to think by extracting relevant passages from the context before answering the query.\n");
    prompt.push_str("Don't return the thinking, only return the answer.\n");
    prompt.push_str("Make sure your answers are as explanatory as possible.\n\n");
    prompt.push_str("Context:\n");
    prompt.push_str(context);
    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(question);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use pretty_assertions::assert_eq;

    fn hit(id: usize, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            distance: id as f32,
            chunk: Chunk {
                id,
                page_number: 0,
                text: text.to_string(),
            },
        }
    }

    #[test]
    fn joins_in_retrieval_order_without_dedup() {
        let context = assemble_context(&[hit(2, "second"), hit(0, "first"), hit(3, "second")]);
        assert_eq!(context, "second\nfirst\nsecond");
        assert_eq!(assemble_context(&[]), "");
    }

    #[test]
    fn budget_keeps_prefix_and_first_chunk() {
        let chunks = vec![hit(0, &"a".repeat(40)), hit(1, &"b".repeat(40)), hit(2, "c")];
        let kept = apply_token_budget(chunks.clone(), Some(15));
        assert_eq!(kept.len(), 1);

        let kept = apply_token_budget(chunks.clone(), Some(25));
        assert_eq!(kept.len(), 3);

        let kept = apply_token_budget(chunks.clone(), Some(1));
        assert_eq!(kept, vec![chunks[0].clone()]);

        assert_eq!(apply_token_budget(chunks.clone(), None), chunks);
    }

    #[test]
    fn prompt_carries_context_and_question() {
        let prompt = build_prompt("Attendance must be 75%.", "What is the attendance requirement?");
        assert!(prompt.contains("Context:\nAttendance must be 75%.\n\n"));
        assert!(prompt.ends_with("Question: What is the attendance requirement?"));
    }
}
