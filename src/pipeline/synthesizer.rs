use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::{CallPolicy, Reference};
use crate::error::ProviderError;
use crate::llm::{GenerationRequest, LanguageModelClient};
use crate::prompts::SYNTHESIS_PROMPT;

const SYNTHESIS_MAX_OUTPUT: u32 = 2000;
const SYNTHESIS_TEMPERATURE: f64 = 0.5;
const FALLBACK_EXAMPLE_CHARS: usize = 200;

/// Output of the synthesis stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    /// Never empty.
    pub content: String,
    /// True when `content` is the deterministic template.
    pub fallback: bool,
}

/// Stage 4: merges the prompt and both reference lists into one analysis
/// with a single model call.
#[derive(Clone)]
pub struct Synthesizer {
    llm: Arc<dyn LanguageModelClient>,
    policy: CallPolicy,
    refs_per_origin: usize,
    reference_char_limit: usize,
}

impl Synthesizer {
    /// Create a synthesizer rendering at most `refs_per_origin` references of
    /// each origin, each capped at `reference_char_limit` characters.
    pub fn new(
        llm: Arc<dyn LanguageModelClient>,
        policy: CallPolicy,
        refs_per_origin: usize,
        reference_char_limit: usize,
    ) -> Self {
        Self {
            llm,
            policy,
            refs_per_origin,
            reference_char_limit,
        }
    }

    /// Produce the final analysis. Never fails and never returns empty content.
    pub async fn synthesize(
        &self,
        enhanced_prompt: &str,
        internal_refs: &[Reference],
        external_refs: &[Reference],
        raw_input: &str,
    ) -> Synthesis {
        let start = Instant::now();
        let request = GenerationRequest::new(
            SYNTHESIS_PROMPT,
            self.build_context(enhanced_prompt, internal_refs, external_refs, raw_input),
        )
        .with_max_output(SYNTHESIS_MAX_OUTPUT)
        .with_temperature(SYNTHESIS_TEMPERATURE);

        let outcome = self
            .policy
            .call("synthesize", || self.llm.generate(request.clone()))
            .await
            .map_err(ProviderError::from)
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(ProviderError::EmptyCompletion)
                } else {
                    Ok(text.trim().to_string())
                }
            });

        match outcome {
            Ok(content) => {
                info!(
                    latency_ms = start.elapsed().as_millis(),
                    chars = content.len(),
                    "Analysis synthesized"
                );
                Synthesis {
                    content,
                    fallback: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "Synthesis failed, using fallback template");
                Synthesis {
                    content: fallback_content(raw_input, internal_refs, external_refs),
                    fallback: true,
                }
            }
        }
    }

    /// Render the combined context sent as the synthesis user turn.
    pub fn build_context(
        &self,
        enhanced_prompt: &str,
        internal_refs: &[Reference],
        external_refs: &[Reference],
        raw_input: &str,
    ) -> String {
        let mut context = String::new();

        let _ = writeln!(context, "## Original request\n{}\n", raw_input);
        let _ = writeln!(context, "## Enhanced analysis prompt\n{}\n", enhanced_prompt);

        self.render_section(&mut context, "Internal references", 'I', internal_refs);
        self.render_section(&mut context, "External references", 'E', external_refs);

        context.trim_end().to_string()
    }

    fn render_section(&self, out: &mut String, heading: &str, tag: char, refs: &[Reference]) {
        let _ = writeln!(out, "## {} ({} retrieved)", heading, refs.len());
        if refs.is_empty() {
            let _ = writeln!(out, "None available.\n");
            return;
        }

        for (i, reference) in refs.iter().take(self.refs_per_origin).enumerate() {
            let _ = writeln!(
                out,
                "[{}{}] {} ({}) relevance {:.2}\n{}\n",
                tag,
                i + 1,
                reference.title,
                reference.source_or_url,
                reference.relevance_score,
                truncate_chars(&reference.content, self.reference_char_limit)
            );
        }
    }
}

/// Deterministic stand-in used when the synthesis call fails.
pub fn fallback_content(
    raw_input: &str,
    internal_refs: &[Reference],
    external_refs: &[Reference],
) -> String {
    let mut content = String::new();

    let _ = writeln!(content, "# Analysis request\n{}\n", raw_input);
    let _ = writeln!(
        content,
        "Automated synthesis was unavailable, so this summary lists what was retrieved.\n"
    );
    let _ = writeln!(content, "- Internal references found: {}", internal_refs.len());
    let _ = writeln!(content, "- External references found: {}", external_refs.len());

    if let Some(first) = internal_refs.first() {
        let _ = write!(
            content,
            "\nExample internal reference: {} ({})\n{}\n",
            first.title,
            first.source_or_url,
            truncate_chars(&first.content, FALLBACK_EXAMPLE_CHARS)
        );
    }
    if let Some(first) = external_refs.first() {
        let _ = write!(
            content,
            "\nExample external reference: {} ({})\n{}\n",
            first.title,
            first.source_or_url,
            truncate_chars(&first.content, FALLBACK_EXAMPLE_CHARS)
        );
    }

    content.trim_end().to_string()
}

/// Cut `text` to at most `limit` characters, marking the cut with an ellipsis.
fn truncate_chars(text: &str, limit: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
