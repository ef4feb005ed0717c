/// Context assembly — memory preamble plus a sliding window over the
/// story, fitted to the model's context budget.

use thiserror::Error;
use tracing::debug;

use crate::core::model::{TokenCodec, TokenId};
use crate::schema::sampling::ModelContext;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error(
        "memory uses {memory_tokens} tokens, leaving no room for history within \
         {max_context_tokens} tokens minus {generation_length} reserved for generation"
    )]
    Overflow {
        memory_tokens: usize,
        max_context_tokens: usize,
        generation_length: usize,
    },
    #[error("story end index {end} is past the story length {len}")]
    EndOutOfRange { end: usize, len: usize },
}

/// What to build a context from.
#[derive(Debug, Clone, Copy)]
pub struct ContextRequest<'a> {
    pub memory: &'a str,
    pub story: &'a [String],
    /// Exclusive story index to stop at; `None` uses the whole story.
    /// Earlier indices are used when regenerating a past entry.
    pub end: Option<usize>,
    /// Pending player input, possibly empty.
    pub input: &'a str,
}

impl<'a> ContextRequest<'a> {
    pub fn new(memory: &'a str, story: &'a [String]) -> Self {
        Self {
            memory,
            story,
            end: None,
            input: "",
        }
    }

    pub fn end(mut self, end: usize) -> Self {
        self.end = Some(end);
        self
    }

    pub fn input(mut self, input: &'a str) -> Self {
        self.input = input;
        self
    }
}

/// The assembled token context with the bookkeeping a caller may want to
/// log or display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub tokens: Vec<TokenId>,
    pub memory_tokens: usize,
    /// Prompt tokens dropped from the oldest end of the history.
    pub truncated_tokens: usize,
}

/// Builds the token sequence fed to the decoder.
///
/// The memory preamble is a fixed prefix and is never truncated. The
/// story slice and pending input are joined with single spaces, encoded,
/// and only the newest tokens that fit the remaining budget are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        Self
    }

    /// The prompt text before tokenization and truncation: memory, then the
    /// story slice, then the input, separated by single spaces.
    pub fn prompt_text(&self, request: &ContextRequest<'_>) -> Result<String, ContextError> {
        let history = self.history_text(request)?;
        let memory = request.memory.trim();
        Ok(match (memory.is_empty(), history.is_empty()) {
            (true, _) => history,
            (false, true) => memory.to_string(),
            (false, false) => format!("{} {}", memory, history),
        })
    }

    pub fn assemble<C: TokenCodec + ?Sized>(
        &self,
        codec: &C,
        request: &ContextRequest<'_>,
        model: &ModelContext,
    ) -> Result<AssembledContext, ContextError> {
        let history = self.history_text(request)?;
        let memory = request.memory.trim();

        let mut tokens = if memory.is_empty() {
            Vec::new()
        } else {
            codec.encode(memory)
        };
        let memory_tokens = tokens.len();

        let budget = model.max_context_tokens as i64
            - model.generation_length as i64
            - memory_tokens as i64;
        if budget <= 0 {
            return Err(ContextError::Overflow {
                memory_tokens,
                max_context_tokens: model.max_context_tokens,
                generation_length: model.generation_length,
            });
        }
        let budget = budget as usize;

        let prompt_tokens = if history.is_empty() {
            Vec::new()
        } else if memory.is_empty() {
            codec.encode(&history)
        } else {
            // Leading space so memory + prompt decodes to the joined text.
            codec.encode(&format!(" {}", history))
        };

        let truncated_tokens = prompt_tokens.len().saturating_sub(budget);
        tokens.extend_from_slice(&prompt_tokens[truncated_tokens..]);

        if truncated_tokens > 0 {
            debug!(
                truncated_tokens,
                kept = prompt_tokens.len() - truncated_tokens,
                memory_tokens,
                "history truncated to fit context budget"
            );
        }

        Ok(AssembledContext {
            tokens,
            memory_tokens,
            truncated_tokens,
        })
    }

    fn history_text(&self, request: &ContextRequest<'_>) -> Result<String, ContextError> {
        let len = request.story.len();
        let end = request.end.unwrap_or(len);
        if end > len {
            return Err(ContextError::EndOutOfRange { end, len });
        }

        let mut parts: Vec<&str> = request.story[..end].iter().map(String::as_str).collect();
        let input = request.input.trim();
        if !input.is_empty() {
            parts.push(input);
        }
        Ok(parts.join(" "))
    }
}
