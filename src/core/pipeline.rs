/// The adventure session: input → context → decode → output → story.
///
/// Wires together the filter pipeline, context assembly and the sampling
/// decoder around one adventure and a shared model handle.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::config::{ConfigError, EngineConfig};
use crate::core::context::{ContextAssembler, ContextError, ContextRequest};
use crate::core::filters::{FilterError, FilterPipeline, ModuleRegistry};
use crate::core::model::LanguageModel;
use crate::core::sampler::{GenerationError, SamplingDecoder};
use crate::core::text::clean_generated_text;
use crate::schema::adventure::{Adventure, AdventureSnapshot, EntryRef, SnapshotError};
use crate::schema::sampling::ModelContext;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("context overflow: {0}")]
    ContextOverflow(ContextError),
    #[error("generation exceeded its {limit:?} time limit after {elapsed:?}")]
    GenerationTimedOut {
        elapsed: std::time::Duration,
        limit: std::time::Duration,
    },
    #[error("generation failed: {0}")]
    GenerationFailed(GenerationError),
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(#[from] SnapshotError),
    #[error("model is busy with another generation")]
    ModelBusy,
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("no story entry at index {index} (story has {len})")]
    InvalidEntry { index: usize, len: usize },
    #[error("invalid entry reference: {0}")]
    InvalidReference(String),
    #[error("story has no turn to undo")]
    EmptyStory,
    #[error("session has no model")]
    MissingModel,
}

impl SessionError {
    /// Whether trying the same turn again, possibly with other input, can
    /// succeed without changing configuration.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::GenerationTimedOut { .. }
                | SessionError::GenerationFailed(_)
                | SessionError::ModelBusy
        )
    }
}

impl From<ContextError> for SessionError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::EndOutOfRange { end, len } => {
                SessionError::InvalidEntry { index: end, len }
            }
            overflow @ ContextError::Overflow { .. } => SessionError::ContextOverflow(overflow),
        }
    }
}

impl From<GenerationError> for SessionError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::TimedOut { elapsed, limit } => {
                SessionError::GenerationTimedOut { elapsed, limit }
            }
            other => SessionError::GenerationFailed(other),
        }
    }
}

/// One recorded action/result pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Story index of the action; the result sits at `index + 1`.
    pub index: usize,
    pub action: String,
    pub result: String,
}

/// An adventure in play. Built via `Session::builder()`.
///
/// Every operation that can fail leaves the story as it was.
pub struct Session<M: LanguageModel> {
    model: Arc<Mutex<M>>,
    adventure: Adventure,
    pipeline: FilterPipeline,
    assembler: ContextAssembler,
    config: EngineConfig,
    generation_count: u64,
}

/// Builder for constructing a `Session`.
pub struct SessionBuilder<M: LanguageModel> {
    model: Option<Arc<Mutex<M>>>,
    adventure: Option<Adventure>,
    config: Option<EngineConfig>,
    pipeline: Option<FilterPipeline>,
    registry: Option<ModuleRegistry>,
}

impl<M: LanguageModel> Session<M> {
    pub fn builder() -> SessionBuilder<M> {
        SessionBuilder {
            model: None,
            adventure: None,
            config: None,
            pipeline: None,
            registry: None,
        }
    }

    pub fn adventure(&self) -> &Adventure {
        &self.adventure
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    pub fn model(&self) -> &Arc<Mutex<M>> {
        &self.model
    }

    /// Play one turn: filter the action, generate a result, record both.
    pub fn send(&mut self, text: &str) -> Result<Turn, SessionError> {
        let action = self.pipeline.apply_input(text);
        let turn = self.play(action)?;
        info!(
            adventure = %self.adventure.name,
            index = turn.index,
            result_len = turn.result.len(),
            "turn recorded"
        );
        Ok(turn)
    }

    /// Open a fresh adventure with its first prompt.
    pub fn start(&mut self, prompt: &str) -> Result<Turn, SessionError> {
        debug!(adventure = %self.adventure.name, "adventure started");
        self.send(prompt)
    }

    /// Regenerate the last result from the same, already filtered, action.
    pub fn retry(&mut self) -> Result<Turn, SessionError> {
        let (action, result) = self.adventure.revert().ok_or(SessionError::EmptyStory)?;
        match self.play(action.clone()) {
            Ok(turn) => {
                info!(adventure = %self.adventure.name, index = turn.index, "turn retried");
                Ok(turn)
            }
            Err(e) => {
                self.adventure.push_turn(action, result);
                Err(e)
            }
        }
    }

    /// Drop the last action/result pair.
    pub fn revert(&mut self) -> Result<Turn, SessionError> {
        let (action, result) = self.adventure.revert().ok_or(SessionError::EmptyStory)?;
        let index = self.adventure.len();
        info!(adventure = %self.adventure.name, index, "turn reverted");
        Ok(Turn {
            index,
            action,
            result,
        })
    }

    /// Replace one entry in place, returning its previous text.
    pub fn edit_entry(&mut self, index: usize, text: &str) -> Result<String, SessionError> {
        let len = self.adventure.len();
        let previous = self
            .adventure
            .edit(index, text)
            .ok_or(SessionError::InvalidEntry { index, len })?;
        info!(adventure = %self.adventure.name, index, "entry edited");
        Ok(previous)
    }

    /// Rewrite the entry at `index` as `text` followed by a fresh
    /// continuation generated from the story before it.
    pub fn alter_generate(&mut self, index: usize, text: &str) -> Result<String, SessionError> {
        let len = self.adventure.len();
        if index >= len {
            return Err(SessionError::InvalidEntry { index, len });
        }

        let text = text.trim();
        let raw = self.generate(text, Some(index))?;
        let continuation = self.pipeline.apply_output(&raw);
        let entry = if continuation.is_empty() {
            text.to_string()
        } else {
            format!("{} {}", text, continuation)
        };

        self.adventure.edit(index, entry.clone());
        info!(adventure = %self.adventure.name, index, "entry regenerated");
        Ok(entry)
    }

    pub fn set_memory(&mut self, text: &str) {
        self.adventure.memory = text.trim().to_string();
        debug!(adventure = %self.adventure.name, len = self.adventure.memory.len(), "memory set");
    }

    /// Resolve a display reference back to its story entry.
    pub fn select_entry(&self, reference: &str) -> Result<(EntryRef, &str), SessionError> {
        let entry = EntryRef::parse(reference)
            .ok_or_else(|| SessionError::InvalidReference(reference.to_string()))?;
        let text = self
            .adventure
            .entry(entry.index())
            .ok_or(SessionError::InvalidEntry {
                index: entry.index(),
                len: self.adventure.len(),
            })?;
        Ok((entry, text))
    }

    /// The whole story through the display formatter.
    pub fn display(&self) -> String {
        self.pipeline.format_display(self.adventure.story())
    }

    pub fn snapshot(&self) -> AdventureSnapshot {
        self.adventure.to_snapshot()
    }

    pub fn snapshot_json(&self) -> Result<String, SessionError> {
        Ok(self.adventure.to_json()?)
    }

    /// Replace the adventure from a JSON snapshot. A rejected snapshot
    /// leaves the current adventure in place.
    pub fn load_snapshot(&mut self, json: &str) -> Result<(), SessionError> {
        let adventure = Adventure::from_json(json).map_err(|e| {
            warn!(error = %e, "snapshot rejected");
            e
        })?;
        info!(adventure = %adventure.name, entries = adventure.len(), "snapshot loaded");
        self.adventure = adventure;
        Ok(())
    }

    fn play(&mut self, action: String) -> Result<Turn, SessionError> {
        let raw = self.generate(&action, None)?;
        let result = self.pipeline.apply_output(&raw);
        let index = self.adventure.len();
        self.adventure.push_turn(action.clone(), result.clone());
        Ok(Turn {
            index,
            action,
            result,
        })
    }

    fn decoder(&self, limits: &ModelContext, generation: u64) -> SamplingDecoder {
        let ai = &self.config.ai;
        SamplingDecoder::for_context(ai.sampling(), limits)
            .batch_size(ai.batch_size)
            .timeout(ai.timeout())
            .seed(ai.seed.map(|seed| seed.wrapping_add(generation)))
    }

    /// Run the model over the context ending at `end` plus `input` and
    /// return the cleaned raw text.
    fn generate(&mut self, input: &str, end: Option<usize>) -> Result<String, SessionError> {
        let generation = self.generation_count;
        self.generation_count += 1;

        let model = self.model.try_lock().ok_or(SessionError::ModelBusy)?;
        let limits = ModelContext::for_codec(&*model, self.config.ai.generation_length);
        let decoder = self.decoder(&limits, generation);

        let mut request = ContextRequest::new(&self.adventure.memory, self.adventure.story())
            .input(input);
        if let Some(end) = end {
            request = request.end(end);
        }
        let context = self.assembler.assemble(&*model, &request, &limits)?;

        let raw = decoder
            .generate_text(&*model, &context.tokens)
            .map_err(|e| {
                warn!(error = %e, "generation failed; turn not recorded");
                SessionError::from(e)
            })?;
        Ok(clean_generated_text(&raw))
    }
}

impl<M: LanguageModel> SessionBuilder<M> {
    pub fn model(mut self, model: M) -> Self {
        self.model = Some(Arc::new(Mutex::new(model)));
        self
    }

    /// Use a model handle shared with other sessions.
    pub fn shared_model(mut self, model: Arc<Mutex<M>>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn adventure(mut self, adventure: Adventure) -> Self {
        self.adventure = Some(adventure);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this pipeline instead of resolving configured modules.
    pub fn pipeline(mut self, pipeline: FilterPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Resolve configured modules against this registry instead of the
    /// built-in one.
    pub fn registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Session<M>, SessionError> {
        let model = self.model.ok_or(SessionError::MissingModel)?;
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let pipeline = match self.pipeline {
            Some(pipeline) => pipeline,
            None => self
                .registry
                .unwrap_or_else(ModuleRegistry::with_builtins)
                .resolve(&config.modules, &config.display)?,
        };

        Ok(Session {
            model,
            adventure: self
                .adventure
                .unwrap_or_else(|| Adventure::new("adventure")),
            pipeline,
            assembler: ContextAssembler::new(),
            config,
            generation_count: 0,
        })
    }
}
