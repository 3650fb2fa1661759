//! Prompts for page transcription and multi-model merge

/// Reply a model gives for a page with nothing written on it
pub const NO_TEXT_MARKER: &str = "[no-text]";

pub const TRANSCRIBE_SYSTEM: &str = "You are a precise transcription engine for user-owned handwritten notes.
Task: Transcribe exactly what is written into plain UTF-8 text.
Preserve original line breaks and spacing. Only include bullets if they are present.
Never invent, summarize, or paraphrase. If a word/region is unreadable, write [illegible].
If there is no readable text, output [no-text]. Output text only.";

pub const TRANSCRIBE_PROMPT: &str =
    "Transcribe this page to plain text only. Preserve line breaks. No commentary.";

pub const MERGE_SYSTEM: &str = "You are an expert at merging multiple transcriptions of handwritten text.
Your task is to analyze multiple AI transcriptions of the same document and produce the most accurate merged result.

Guidelines:
- Compare all versions and identify the most likely correct text
- Preserve the original structure, line breaks, and formatting
- When transcriptions disagree, choose the most coherent and contextually appropriate version
- Fix obvious OCR errors by comparing across versions
- Maintain the author's original writing style and intent
- Output ONLY the final merged transcription with no commentary or explanation";

const REFUSAL_TRIGGERS: &[&str] = &[
    "i'm sorry",
    "i am sorry",
    "cannot assist",
    "can't assist",
    "i can't",
    "i cannot",
];

/// User message for the merge call: numbered transcriptions with the model
/// that produced each, in configured model order
pub fn build_merge_prompt(transcriptions: &[(String, String)]) -> String {
    let mut parts = vec![
        "I have multiple AI transcriptions of the same handwritten document. Please merge them into the most accurate final version.\n"
            .to_string(),
    ];

    for (i, (model, text)) in transcriptions.iter().enumerate() {
        parts.push(format!("=== TRANSCRIPTION {} ({}) ===", i + 1, model));
        parts.push(text.clone());
        parts.push(String::new());
    }

    parts.push("=== INSTRUCTIONS ===".to_string());
    parts.push(
        "Please provide the best merged transcription that combines the most accurate elements from all versions above."
            .to_string(),
    );
    parts.join("\n")
}

/// True when the reply opens with a refusal.
///
/// Only the first line is checked; the page itself may well contain
/// "I can't" in the author's handwriting.
pub fn looks_like_refusal(reply: &str) -> bool {
    let first_line = reply.trim_start().lines().next().unwrap_or("").to_lowercase();
    REFUSAL_TRIGGERS.iter().any(|t| first_line.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prompt_numbers_transcriptions() {
        let prompt = build_merge_prompt(&[
            ("gpt-4o".to_string(), "hello wrld".to_string()),
            ("qwen".to_string(), "hello world".to_string()),
        ]);
        assert!(prompt.contains("=== TRANSCRIPTION 1 (gpt-4o) ===\nhello wrld\n"));
        assert!(prompt.contains("=== TRANSCRIPTION 2 (qwen) ===\nhello world\n"));
        assert!(prompt.ends_with("all versions above."));
        let instructions = prompt.find("=== INSTRUCTIONS ===").unwrap();
        assert!(instructions > prompt.find("TRANSCRIPTION 2").unwrap());
    }

    #[test]
    fn test_refusal_detection() {
        assert!(looks_like_refusal("I'm sorry, but I can't help with that."));
        assert!(looks_like_refusal("  I cannot transcribe this image"));
        assert!(!looks_like_refusal("Shopping list\nI can't forget the milk"));
        assert!(!looks_like_refusal(NO_TEXT_MARKER));
    }
}
