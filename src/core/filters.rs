/// Filter pipeline — typed text transforms at the input, output and
/// display extension points, resolved from a static module registry.

use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::core::config::{DisplayConfig, ModulesConfig};
use crate::core::reveal::wrap_tag;
use crate::core::text;
use crate::schema::adventure::{EntryKind, EntryRef};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown filter module: {0}")]
    UnknownModule(String),
    #[error("invalid module id '{0}', expected domain:module")]
    InvalidModuleId(String),
    #[error("module {module} provides no {point} capability")]
    MissingCapability {
        module: String,
        point: ExtensionPoint,
    },
}

/// The three places a module can hook into a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionPoint {
    Input,
    Output,
    Display,
}

impl fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtensionPoint::Input => "input",
            ExtensionPoint::Output => "output",
            ExtensionPoint::Display => "display",
        })
    }
}

/// Transforms player input before it reaches the context.
pub trait InputFilter: Send + Sync {
    fn apply(&self, text: &str) -> String;
}

/// Transforms cleaned model output before it is recorded.
pub trait OutputFilter: Send + Sync {
    fn apply(&self, text: &str) -> String;
}

/// Renders the whole story for display.
pub trait DisplayFormatter: Send + Sync {
    fn format(&self, story: &[String]) -> String;
}

impl<F> InputFilter for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn apply(&self, text: &str) -> String {
        self(text)
    }
}

impl<F> OutputFilter for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn apply(&self, text: &str) -> String {
        self(text)
    }
}

impl<F> DisplayFormatter for F
where
    F: Fn(&[String]) -> String + Send + Sync,
{
    fn format(&self, story: &[String]) -> String {
        self(story)
    }
}

/// Ordered filters for each extension point.
///
/// Input and output filters compose left to right in registration order.
/// At most one display formatter is active; without one the story is
/// joined with newlines.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    input: Vec<Arc<dyn InputFilter>>,
    output: Vec<Arc<dyn OutputFilter>>,
    display: Option<Arc<dyn DisplayFormatter>>,
}

impl fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("input", &self.input.len())
            .field("output", &self.output.len())
            .field("display", &self.display.is_some())
            .finish()
    }
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_input(&mut self, filter: Arc<dyn InputFilter>) {
        self.input.push(filter);
    }

    pub fn register_output(&mut self, filter: Arc<dyn OutputFilter>) {
        self.output.push(filter);
    }

    /// Replace the display formatter.
    pub fn set_display(&mut self, formatter: Arc<dyn DisplayFormatter>) {
        self.display = Some(formatter);
    }

    pub fn with_input(mut self, filter: impl InputFilter + 'static) -> Self {
        self.register_input(Arc::new(filter));
        self
    }

    pub fn with_output(mut self, filter: impl OutputFilter + 'static) -> Self {
        self.register_output(Arc::new(filter));
        self
    }

    pub fn with_display(mut self, formatter: impl DisplayFormatter + 'static) -> Self {
        self.set_display(Arc::new(formatter));
        self
    }

    pub fn len(&self, point: ExtensionPoint) -> usize {
        match point {
            ExtensionPoint::Input => self.input.len(),
            ExtensionPoint::Output => self.output.len(),
            ExtensionPoint::Display => usize::from(self.display.is_some()),
        }
    }

    pub fn apply_input(&self, text: &str) -> String {
        self.input
            .iter()
            .fold(text.to_string(), |acc, filter| filter.apply(&acc))
    }

    pub fn apply_output(&self, text: &str) -> String {
        self.output
            .iter()
            .fold(text.to_string(), |acc, filter| filter.apply(&acc))
    }

    pub fn format_display(&self, story: &[String]) -> String {
        match &self.display {
            Some(formatter) => formatter.format(story),
            None => story.join("\n"),
        }
    }
}

/// A `domain:module` pair naming a filter module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId {
    pub domain: String,
    pub module: String,
}

impl ModuleId {
    pub fn new(domain: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            module: module.into(),
        }
    }

    pub fn parse(id: &str) -> Result<Self, FilterError> {
        let id = id.trim();
        match id.split_once(':') {
            Some((domain, module))
                if !domain.trim().is_empty()
                    && !module.trim().is_empty()
                    && !module.contains(':') =>
            {
                Ok(Self::new(domain.trim(), module.trim()))
            }
            _ => Err(FilterError::InvalidModuleId(id.to_string())),
        }
    }

    /// Parse a comma-separated list, keeping order and skipping blanks.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, FilterError> {
        list.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.module)
    }
}

/// A named bundle of capabilities. A module may provide any subset.
pub trait FilterModule: Send + Sync {
    fn id(&self) -> ModuleId;

    fn input_filter(&self) -> Option<Arc<dyn InputFilter>> {
        None
    }

    fn output_filter(&self) -> Option<Arc<dyn OutputFilter>> {
        None
    }

    fn display_formatter(&self, _display: &DisplayConfig) -> Option<Arc<dyn DisplayFormatter>> {
        None
    }
}

/// Known filter modules, looked up by id when a configuration is resolved.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: FxHashMap<ModuleId, Arc<dyn FilterModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `adventure:standard` and `adventure:transcript`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StandardModule));
        registry.register(Arc::new(TranscriptModule));
        registry
    }

    /// Add a module, replacing any with the same id.
    pub fn register(&mut self, module: Arc<dyn FilterModule>) {
        self.modules.insert(module.id(), module);
    }

    pub fn get(&self, id: &ModuleId) -> Option<&Arc<dyn FilterModule>> {
        self.modules.get(id)
    }

    fn lookup(&self, id: &ModuleId) -> Result<&Arc<dyn FilterModule>, FilterError> {
        self.modules
            .get(id)
            .ok_or_else(|| FilterError::UnknownModule(id.to_string()))
    }

    /// Configured entries in order; each entry may itself be a
    /// comma-separated list.
    fn configured(entries: &[String]) -> Result<Vec<ModuleId>, FilterError> {
        let mut ids = Vec::new();
        for entry in entries {
            ids.extend(ModuleId::parse_list(entry)?);
        }
        Ok(ids)
    }

    /// Build a pipeline from configured module ids. An empty display
    /// module id leaves the pipeline without a formatter.
    pub fn resolve(
        &self,
        modules: &ModulesConfig,
        display: &DisplayConfig,
    ) -> Result<FilterPipeline, FilterError> {
        let mut pipeline = FilterPipeline::new();

        for id in Self::configured(&modules.input_filters)? {
            let filter = self
                .lookup(&id)?
                .input_filter()
                .ok_or(FilterError::MissingCapability {
                    module: id.to_string(),
                    point: ExtensionPoint::Input,
                })?;
            pipeline.register_input(filter);
        }

        for id in Self::configured(&modules.output_filters)? {
            let filter = self
                .lookup(&id)?
                .output_filter()
                .ok_or(FilterError::MissingCapability {
                    module: id.to_string(),
                    point: ExtensionPoint::Output,
                })?;
            pipeline.register_output(filter);
        }

        if !modules.display_filter.trim().is_empty() {
            let id = ModuleId::parse(&modules.display_filter)?;
            let module = self.lookup(&id)?;
            let formatter =
                module
                    .display_formatter(display)
                    .ok_or(FilterError::MissingCapability {
                        module: id.to_string(),
                        point: ExtensionPoint::Display,
                    })?;
            pipeline.set_display(formatter);
        }

        debug!(
            input = pipeline.len(ExtensionPoint::Input),
            output = pipeline.len(ExtensionPoint::Output),
            display = %modules.display_filter,
            "filter modules resolved"
        );
        Ok(pipeline)
    }
}

// ---------------------------------------------------------------------------
// adventure:standard
// ---------------------------------------------------------------------------

/// Normalizes quotes and trims player input.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardInput;

impl InputFilter for StandardInput {
    fn apply(&self, text: &str) -> String {
        text::formalize_quotes(text).trim().to_string()
    }
}

/// Trims generated text back to its last complete sentence and tidies it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardOutput;

impl OutputFilter for StandardOutput {
    fn apply(&self, text: &str) -> String {
        let quoted = text::formalize_quotes(text);
        let complete = text::remove_sentence_fragment(quoted.trim()).trim();
        let closed = text::fix_end_quote(complete);
        text::clean_white_space(closed.trim())
    }
}

/// Tags each entry with its story index and separates entries with a
/// paragraph break after a finished sentence, a space otherwise.
#[derive(Debug, Clone, Default)]
pub struct StandardDisplay {
    pub action_style: Option<String>,
    pub result_style: Option<String>,
}

impl StandardDisplay {
    pub fn from_config(display: &DisplayConfig) -> Self {
        Self {
            action_style: display.action_style.clone(),
            result_style: display.result_style.clone(),
        }
    }

    fn style(&self, index: usize) -> Option<&str> {
        match EntryKind::of_index(index) {
            EntryKind::Action => self.action_style.as_deref(),
            EntryKind::Result => self.result_style.as_deref(),
        }
    }
}

impl DisplayFormatter for StandardDisplay {
    fn format(&self, story: &[String]) -> String {
        let mut out = String::new();
        for (index, entry) in story.iter().enumerate() {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            if !out.is_empty() {
                let previous = &story[index - 1];
                if text::ends_on_sentence_boundary(previous) {
                    out.push_str("\n\n");
                } else {
                    out.push(' ');
                }
            }

            let tagged = wrap_tag(&EntryRef(index).tag_body(), entry);
            match self.style(index) {
                Some(style) => out.push_str(&wrap_tag(style, &tagged)),
                None => out.push_str(&tagged),
            }
        }
        out
    }
}

struct StandardModule;

impl FilterModule for StandardModule {
    fn id(&self) -> ModuleId {
        ModuleId::new("adventure", "standard")
    }

    fn input_filter(&self) -> Option<Arc<dyn InputFilter>> {
        Some(Arc::new(StandardInput))
    }

    fn output_filter(&self) -> Option<Arc<dyn OutputFilter>> {
        Some(Arc::new(StandardOutput))
    }

    fn display_formatter(&self, display: &DisplayConfig) -> Option<Arc<dyn DisplayFormatter>> {
        Some(Arc::new(StandardDisplay::from_config(display)))
    }
}

// ---------------------------------------------------------------------------
// adventure:transcript
// ---------------------------------------------------------------------------

struct TranscriptModule;

impl FilterModule for TranscriptModule {
    fn id(&self) -> ModuleId {
        ModuleId::new("adventure", "transcript")
    }

    fn input_filter(&self) -> Option<Arc<dyn InputFilter>> {
        Some(Arc::new(|text: &str| format!("> {}", text)))
    }

    fn output_filter(&self) -> Option<Arc<dyn OutputFilter>> {
        Some(Arc::new(|text: &str| {
            let end = text::last_sentence_end(text).unwrap_or(0);
            format!(": {}", &text[..end])
        }))
    }

    fn display_formatter(&self, _display: &DisplayConfig) -> Option<Arc<dyn DisplayFormatter>> {
        Some(Arc::new(|story: &[String]| story.join("\n")))
    }
}
