/// Reveal integration tests — the typewriter task against a recording surface.

use adventure_engine::core::config::RevealConfig;
use adventure_engine::core::reveal::{tag_at, DisplaySurface, RevealFrames, StreamingRevealer, Tag};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Recorder {
    frames: Mutex<Vec<String>>,
}

impl Recorder {
    fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }
}

impl DisplaySurface for Recorder {
    fn render(&self, text: &str) {
        self.frames.lock().push(text.to_string());
    }
}

fn balanced(text: &str) -> bool {
    let mut depth = 0i32;
    let mut pos = 0;
    while pos < text.len() {
        match tag_at(&text[pos..]) {
            Some(Tag::Open { raw, .. }) => {
                depth += 1;
                pos += raw.len();
            }
            Some(Tag::Close { raw }) => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
                pos += raw.len();
            }
            None => pos += text[pos..].chars().next().map_or(1, char::len_utf8),
        }
    }
    depth == 0
}

const STORY: &str = "[i][ref=0]You enter the clearing.[/ref][/i]\n\n[ref=1]The wolf growls.[/ref]";

#[tokio::test(start_paused = true)]
async fn reveal_steps_through_every_character() {
    let surface = Arc::new(Recorder::default());
    let mut revealer = StreamingRevealer::new(Arc::clone(&surface), RevealConfig::default());

    revealer.reveal(STORY).await;
    revealer.finish().await;

    let frames = surface.frames();
    let expected_steps = RevealFrames::new("", STORY).count();
    assert_eq!(frames.len(), expected_steps + 1);
    assert!(frames.iter().all(|frame| balanced(frame)));
    assert_eq!(frames.last().map(String::as_str), Some(STORY));
    assert_eq!(frames[0], "[i][ref=0]Y[/ref][/i]");
}

#[tokio::test(start_paused = true)]
async fn appended_turn_animates_only_new_text() {
    let surface = Arc::new(Recorder::default());
    let mut revealer = StreamingRevealer::new(Arc::clone(&surface), RevealConfig::default());

    revealer.reveal(STORY).await;
    revealer.finish().await;
    let before = surface.frames().len();

    let next = format!("{}\n\n[i][ref=2]You wait.[/ref][/i]", STORY);
    revealer.reveal(next.clone()).await;
    revealer.finish().await;

    let frames = surface.frames();
    let new_frames = &frames[before..];
    assert!(new_frames.iter().all(|frame| frame.starts_with(STORY)));
    assert_eq!(new_frames.last(), Some(&next));
    assert_eq!(revealer.shown(), next);
}

#[tokio::test(start_paused = true)]
async fn new_reveal_cancels_in_flight_one() {
    let surface = Arc::new(Recorder::default());
    let mut revealer = StreamingRevealer::new(Arc::clone(&surface), RevealConfig::default());

    revealer.reveal(STORY).await;
    tokio::task::yield_now().await;
    assert!(revealer.is_active());

    let rewritten = "[ref=0]A different story.[/ref]";
    revealer.reveal(rewritten).await;
    revealer.finish().await;

    let frames = surface.frames();
    let first_done = frames
        .iter()
        .position(|frame| frame == STORY)
        .expect("cancelled reveal still ends on its target");
    assert!(first_done < RevealFrames::new("", STORY).count());
    assert!(frames.iter().all(|frame| balanced(frame)));
    assert_eq!(frames.last().map(String::as_str), Some(rewritten));
    assert!(!revealer.is_active());
}

#[tokio::test(start_paused = true)]
async fn large_rewrite_shown_at_once() {
    let surface = Arc::new(Recorder::default());
    let config = RevealConfig {
        step_delay_ms: 25,
        max_animated_growth: 10,
    };
    let mut revealer = StreamingRevealer::new(Arc::clone(&surface), config);

    revealer.reveal(STORY).await;
    revealer.finish().await;

    assert_eq!(surface.frames(), vec![STORY.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn dropping_revealer_still_completes() {
    let surface = Arc::new(Recorder::default());
    let mut revealer = StreamingRevealer::new(Arc::clone(&surface), RevealConfig::default());
    revealer.reveal(STORY).await;
    drop(revealer);

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(surface.frames().last().map(String::as_str), Some(STORY));
}
