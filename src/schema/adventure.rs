use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("adventure name is empty")]
    EmptyName,
    #[error("story has {0} entries; a completed story alternates action and result")]
    UnpairedStory(usize),
}

/// A single play-through: a persistent memory preamble plus the story so
/// far, alternating player actions (even indices) and model results (odd
/// indices) in chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Adventure {
    pub name: String,
    /// Scene and style preamble, always placed at the head of the context.
    pub memory: String,
    story: Vec<String>,
}

/// Which side of a turn a story entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Action,
    Result,
}

impl EntryKind {
    pub fn of_index(index: usize) -> Self {
        if index % 2 == 0 {
            Self::Action
        } else {
            Self::Result
        }
    }
}

impl Adventure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            memory: String::new(),
            story: Vec::new(),
        }
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    pub fn story(&self) -> &[String] {
        &self.story
    }

    pub fn len(&self) -> usize {
        self.story.len()
    }

    pub fn is_empty(&self) -> bool {
        self.story.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&str> {
        self.story.get(index).map(String::as_str)
    }

    /// Number of completed action/result pairs.
    pub fn turns(&self) -> usize {
        self.story.len() / 2
    }

    /// Record a completed turn. Both halves go in together so the story
    /// never holds a dangling action.
    pub fn push_turn(&mut self, action: impl Into<String>, result: impl Into<String>) {
        self.story.push(action.into());
        self.story.push(result.into());
    }

    /// Drop the most recent action/result pair, returning it.
    pub fn revert(&mut self) -> Option<(String, String)> {
        if self.story.len() < 2 {
            return None;
        }
        let result = self.story.pop()?;
        let action = self.story.pop()?;
        Some((action, result))
    }

    /// Replace a single entry in place. Returns the previous text, or
    /// `None` if the index is out of range.
    pub fn edit(&mut self, index: usize, text: impl Into<String>) -> Option<String> {
        let slot = self.story.get_mut(index)?;
        Some(std::mem::replace(slot, text.into()))
    }

    pub fn to_snapshot(&self) -> AdventureSnapshot {
        AdventureSnapshot {
            name: self.name.clone(),
            memory: self.memory.clone(),
            story: self.story.clone(),
        }
    }

    /// Restore from a snapshot, rejecting records that break the
    /// adventure's invariants.
    pub fn from_snapshot(snapshot: AdventureSnapshot) -> Result<Self, SnapshotError> {
        if snapshot.name.trim().is_empty() {
            return Err(SnapshotError::EmptyName);
        }
        if snapshot.story.len() % 2 != 0 {
            return Err(SnapshotError::UnpairedStory(snapshot.story.len()));
        }
        Ok(Self {
            name: snapshot.name,
            memory: snapshot.memory,
            story: snapshot.story,
        })
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(&self.to_snapshot())?)
    }

    pub fn from_json(input: &str) -> Result<Self, SnapshotError> {
        let snapshot: AdventureSnapshot = serde_json::from_str(input)?;
        Self::from_snapshot(snapshot)
    }
}

/// The persisted form of an [`Adventure`], as exchanged with save/load
/// collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdventureSnapshot {
    pub name: String,
    pub memory: String,
    pub story: Vec<String>,
}

/// A story index recovered from a display reference tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRef(pub usize);

impl EntryRef {
    /// Parse the payload of a reference tag. Accepts both the bare index
    /// (`"3"`) and the full tag body (`"ref=3"`).
    pub fn parse(reference: &str) -> Option<Self> {
        let body = reference.trim();
        let digits = body.strip_prefix("ref=").unwrap_or(body);
        digits.parse().ok().map(EntryRef)
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn tag_body(self) -> String {
        format!("ref={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_adventure() -> Adventure {
        let mut adventure = Adventure::new("Wolf Clearing").with_memory("A dark forest.");
        adventure.push_turn("You enter the clearing.", "A wolf growls.");
        adventure
    }

    #[test]
    fn push_turn_keeps_story_paired() {
        let mut adventure = sample_adventure();
        adventure.push_turn("You raise your sword.", "The wolf backs away.");
        assert_eq!(adventure.len(), 4);
        assert_eq!(adventure.turns(), 2);
        assert_eq!(adventure.entry(2), Some("You raise your sword."));
    }

    #[test]
    fn revert_drops_last_pair() {
        let mut adventure = sample_adventure();
        let dropped = adventure.revert().unwrap();
        assert_eq!(dropped.0, "You enter the clearing.");
        assert_eq!(dropped.1, "A wolf growls.");
        assert!(adventure.is_empty());
        assert!(adventure.revert().is_none());
    }

    #[test]
    fn edit_replaces_single_entry() {
        let mut adventure = sample_adventure();
        let old = adventure.edit(1, "A wolf whimpers.").unwrap();
        assert_eq!(old, "A wolf growls.");
        assert_eq!(adventure.entry(1), Some("A wolf whimpers."));
        assert!(adventure.edit(9, "nothing").is_none());
    }

    #[test]
    fn entry_kind_alternates() {
        assert_eq!(EntryKind::of_index(0), EntryKind::Action);
        assert_eq!(EntryKind::of_index(1), EntryKind::Result);
        assert_eq!(EntryKind::of_index(4), EntryKind::Action);
    }

    #[test]
    fn json_round_trip() {
        let adventure = sample_adventure();
        let json = adventure.to_json().unwrap();
        let restored = Adventure::from_json(&json).unwrap();
        assert_eq!(restored, adventure);
    }

    #[test]
    fn snapshot_has_exact_fields() {
        let json = sample_adventure().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["memory", "name", "story"]);
    }

    #[test]
    fn malformed_snapshots_rejected() {
        assert!(matches!(
            Adventure::from_json(r#"{"name": "x", "memory": ""}"#),
            Err(SnapshotError::Json(_))
        ));
        assert!(matches!(
            Adventure::from_json(r#"{"name": " ", "memory": "", "story": []}"#),
            Err(SnapshotError::EmptyName)
        ));
        assert!(matches!(
            Adventure::from_json(r#"{"name": "x", "memory": "", "story": ["a"]}"#),
            Err(SnapshotError::UnpairedStory(1))
        ));
    }

    #[test]
    fn entry_ref_parsing() {
        assert_eq!(EntryRef::parse("3"), Some(EntryRef(3)));
        assert_eq!(EntryRef::parse("ref=12"), Some(EntryRef(12)));
        assert_eq!(EntryRef::parse("c"), None);
        assert_eq!(EntryRef(5).tag_body(), "ref=5");
    }
}
