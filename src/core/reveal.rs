/// Typewriter reveal — incremental display of a growing story string that
/// keeps inline `[name]…[/name]` markup balanced in every frame.
///
/// [`RevealFrames`] is the pure stepping logic; [`StreamingRevealer`] runs
/// it as a cancellable task against one display surface.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::config::RevealConfig;

/// An inline markup tag found at the start of a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag<'a> {
    /// `[name]` or `[name=value]`.
    Open { raw: &'a str, name: &'a str },
    /// `[/name]`.
    Close { raw: &'a str },
}

impl<'a> Tag<'a> {
    pub fn raw(&self) -> &'a str {
        match self {
            Tag::Open { raw, .. } | Tag::Close { raw } => raw,
        }
    }
}

/// Recognize a tag at the very start of `s`.
pub fn tag_at(s: &str) -> Option<Tag<'_>> {
    let rest = s.strip_prefix('[')?;
    let end = rest.find(']')?;
    let inner = &rest[..end];
    if inner.is_empty() || inner.contains('[') {
        return None;
    }
    let raw = &s[..end + 2];
    match inner.strip_prefix('/') {
        Some(name) if !name.is_empty() && !name.contains('/') => Some(Tag::Close { raw }),
        Some(_) => None,
        None => Some(Tag::Open {
            raw,
            name: tag_name(inner),
        }),
    }
}

fn tag_name(body: &str) -> &str {
    body.split('=').next().unwrap_or(body)
}

/// The close sequence matching an opening tag body: `ref=3` → `[/ref]`.
pub fn closing_tag(body: &str) -> String {
    format!("[/{}]", tag_name(body))
}

/// Wrap `text` in an opening tag with the given body and its close.
pub fn wrap_tag(body: &str, text: &str) -> String {
    format!("[{}]{}{}", body, text, closing_tag(body))
}

/// Remove all markup tags, leaving the visible text.
pub fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while pos < text.len() {
        match tag_at(&text[pos..]) {
            Some(tag) => pos += tag.raw().len(),
            None => {
                let len = next_char_len(&text[pos..]);
                out.push_str(&text[pos..pos + len]);
                pos += len;
            }
        }
    }
    out
}

/// Replay the tags in `text` and return the close sequences still open at
/// its end, innermost last.
fn open_tags(text: &str) -> Vec<String> {
    let mut stack = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        match tag_at(&text[pos..]) {
            Some(Tag::Open { raw, name }) => {
                stack.push(format!("[/{}]", name));
                pos += raw.len();
            }
            Some(Tag::Close { raw }) => {
                stack.pop();
                pos += raw.len();
            }
            None => pos += next_char_len(&text[pos..]),
        }
    }
    stack
}

fn next_char_len(s: &str) -> usize {
    s.chars().next().map_or(1, char::len_utf8)
}

/// Byte offset in `target` where revealing resumes after `shown`: the end
/// of their common prefix, moved back so it never splits a tag.
pub fn resume_point(shown: &str, target: &str) -> usize {
    let mut common = 0;
    for ((i, a), b) in target.char_indices().zip(shown.chars()) {
        if a != b {
            break;
        }
        common = i + a.len_utf8();
    }

    // Step back if the prefix ends inside a tag.
    if let Some(open) = target[..common].rfind('[') {
        if !target[open..common].contains(']') {
            if let Some(tag) = tag_at(&target[open..]) {
                if open + tag.raw().len() > common {
                    return open;
                }
            }
        }
    }
    common
}

/// Frames that grow from a shown string toward a target one character at
/// a time. Tags are consumed whole; every frame closes the tags that are
/// still open so it is valid markup on its own. The last frame is the
/// target itself when the target's markup is balanced.
#[derive(Debug, Clone)]
pub struct RevealFrames<'a> {
    target: &'a str,
    pos: usize,
    open: Vec<String>,
}

impl<'a> RevealFrames<'a> {
    pub fn new(shown: &str, target: &'a str) -> Self {
        let pos = resume_point(shown, target);
        Self {
            target,
            pos,
            open: open_tags(&target[..pos]),
        }
    }

    /// Characters still to reveal.
    pub fn remaining(&self) -> usize {
        self.target[self.pos..].chars().count()
    }

    fn frame(&self) -> String {
        let mut frame = String::with_capacity(self.pos + self.open.len() * 8);
        frame.push_str(&self.target[..self.pos]);
        for close in self.open.iter().rev() {
            frame.push_str(close);
        }
        frame
    }
}

impl Iterator for RevealFrames<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.pos >= self.target.len() {
            return None;
        }

        while let Some(tag) = tag_at(&self.target[self.pos..]) {
            match tag {
                Tag::Open { raw, name } => {
                    self.open.push(format!("[/{}]", name));
                    self.pos += raw.len();
                }
                Tag::Close { raw } => {
                    self.open.pop();
                    self.pos += raw.len();
                }
            }
        }

        if self.pos < self.target.len() {
            self.pos += next_char_len(&self.target[self.pos..]);
        }
        Some(self.frame())
    }
}

/// How a display update should be presented.
#[derive(Debug, Clone)]
pub enum RevealPlan<'a> {
    Animate(RevealFrames<'a>),
    /// Nothing new, or too much to animate: show the target at once.
    Instant,
}

impl<'a> RevealPlan<'a> {
    pub fn new(shown: &str, target: &'a str, max_animated_growth: usize) -> Self {
        let frames = RevealFrames::new(shown, target);
        let growth = frames.remaining();
        if growth == 0 || growth > max_animated_growth {
            RevealPlan::Instant
        } else {
            RevealPlan::Animate(frames)
        }
    }
}

/// Something that can show the story text.
pub trait DisplaySurface: Send + Sync + 'static {
    fn render(&self, text: &str);
}

struct ActiveReveal {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Reveals display updates on a single surface, one at a time.
///
/// Starting a new reveal stops the one in flight first. Whether it
/// completes or is cancelled, a reveal always ends by rendering its full
/// target.
pub struct StreamingRevealer<S: DisplaySurface> {
    surface: Arc<S>,
    config: RevealConfig,
    shown: Arc<Mutex<String>>,
    active: Option<ActiveReveal>,
}

impl<S: DisplaySurface> StreamingRevealer<S> {
    pub fn new(surface: Arc<S>, config: RevealConfig) -> Self {
        Self {
            surface,
            config,
            shown: Arc::new(Mutex::new(String::new())),
            active: None,
        }
    }

    pub fn surface(&self) -> &Arc<S> {
        &self.surface
    }

    /// The last fully shown target.
    pub fn shown(&self) -> String {
        self.shown.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Cancel any reveal in flight, then start revealing `target`.
    pub async fn reveal(&mut self, target: impl Into<String>) {
        self.cancel().await;

        let target = target.into();
        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(run_reveal(
            Arc::clone(&self.surface),
            Arc::clone(&self.shown),
            target,
            self.config.clone(),
            cancelled,
        ));
        self.active = Some(ActiveReveal { cancel, handle });
    }

    /// Stop the reveal in flight, if any. Returns once its final render
    /// has happened.
    pub async fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.cancel.send(true);
            if let Err(e) = active.handle.await {
                warn!(error = %e, "reveal task ended abnormally");
            }
        }
    }

    /// Wait for the reveal in flight to run to completion.
    pub async fn finish(&mut self) {
        if let Some(active) = self.active.take() {
            if let Err(e) = active.handle.await {
                warn!(error = %e, "reveal task ended abnormally");
            }
        }
    }
}

async fn run_reveal<S: DisplaySurface>(
    surface: Arc<S>,
    shown: Arc<Mutex<String>>,
    target: String,
    config: RevealConfig,
    mut cancelled: watch::Receiver<bool>,
) {
    let previous = shown.lock().clone();
    match RevealPlan::new(&previous, &target, config.max_animated_growth) {
        RevealPlan::Animate(frames) => {
            debug!(steps = frames.remaining(), "reveal started");
            for frame in frames {
                surface.render(&frame);
                tokio::select! {
                    _ = tokio::time::sleep(config.step_delay()) => {}
                    // A sent value or a dropped sender both mean stop.
                    _ = cancelled.changed() => {
                        debug!("reveal cancelled");
                        break;
                    }
                }
            }
        }
        RevealPlan::Instant => {
            debug!(len = target.len(), "display updated without animation");
        }
    }

    surface.render(&target);
    *shown.lock() = target;
}
