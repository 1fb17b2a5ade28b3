//! Checkpoint bucket tree and journal.
//!
//! Every suspendable engine operation is wrapped in a frame. On a first
//! run `enter` reports [`FrameEntry::Started`], the body executes, and
//! `exit` marks the frame completed together with any value that must be
//! reproduced on resume. On a resumed run, `enter` for a frame the tree
//! already records as completed returns the captured value without the
//! body ever executing, so a resumed session skips everything already
//! done and picks up at the exact nested position where it suspended.
//!
//! Frames never overlap: each nested call gets its own disjoint
//! sub-bucket, and a key that does not match the recorded one at the
//! replay cursor is a fatal consistency fault.

use crate::error::CheckpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version identifier for the checkpoint tree format.
pub const CHECKPOINT_VERSION: u32 = 1;

/// The operation a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Data-model initialization.
    Initialize,
    /// Entry into the initial configuration.
    EnterInitial,
    /// One main-loop pass: stabilization plus invoke startup.
    Iteration,
    /// One transition-selection round inside a macrostep.
    Select,
    /// One microstep inside a macrostep.
    Microstep,
    /// Starting invokes for states entered during a macrostep.
    StartInvokes,
}

impl FrameKind {
    fn as_str(self) -> &'static str {
        match self {
            FrameKind::Initialize => "initialize",
            FrameKind::EnterInitial => "enter_initial",
            FrameKind::Iteration => "iteration",
            FrameKind::Select => "select",
            FrameKind::Microstep => "microstep",
            FrameKind::StartInvokes => "start_invokes",
        }
    }
}

/// Typed slot address: an integer index qualified by the frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameKey {
    pub kind: FrameKind,
    pub index: u32,
}

impl FrameKey {
    pub fn new(kind: FrameKind, index: u32) -> Self {
        Self { kind, index }
    }
}

impl std::fmt::Display for FrameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.kind.as_str(), self.index)
    }
}

/// Completion state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Executing,
    Completed,
}

/// One slot in the bucket tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub key: FrameKey,
    pub state: SlotState,

    /// Captured result reproduced on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Sub-buckets of nested frames, in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Bucket>,
}

impl Bucket {
    fn executing(key: FrameKey) -> Self {
        Self {
            key,
            state: SlotState::Executing,
            value: None,
            children: Vec::new(),
        }
    }
}

/// A complete, serializable checkpoint of a session's progress.
///
/// The storage medium is the host's concern; this tree is plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointTree {
    /// Format version.
    pub version: u32,

    /// Checksum of the document the session was running; resume against a
    /// graph built from a different document is refused.
    pub document_checksum: String,

    /// When the checkpoint was exported.
    pub created_at: DateTime<Utc>,

    /// Top-level frames in execution order.
    #[serde(default)]
    pub frames: Vec<Bucket>,
}

/// Result of [`Journal::enter`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEntry {
    /// Not recorded; execute the body and call `exit` when done.
    Started,
    /// Already completed on a previous run; the body must be skipped and
    /// the captured value used instead.
    Completed(Option<Value>),
}

/// Records and replays frame completion against the bucket tree.
#[derive(Debug)]
pub struct Journal {
    tree: CheckpointTree,
    /// Child indices of the currently open frames, outermost first.
    open: Vec<usize>,
    /// Replay cursor per open level; `cursors[d]` is the next child to
    /// visit at depth `d` (depth 0 is the top level).
    cursors: Vec<usize>,
}

impl Journal {
    /// Creates an empty journal for a fresh session.
    pub fn new(document_checksum: impl Into<String>) -> Self {
        Self {
            tree: CheckpointTree {
                version: CHECKPOINT_VERSION,
                document_checksum: document_checksum.into(),
                created_at: Utc::now(),
                frames: Vec::new(),
            },
            open: Vec::new(),
            cursors: vec![0],
        }
    }

    /// Loads an exported tree for replay.
    ///
    /// Verifies the format version, the document checksum, and that every
    /// recorded frame completed (suspension only ever happens between
    /// frames, so an open frame means the tree is corrupt).
    pub fn resume(
        tree: CheckpointTree,
        document_checksum: &str,
    ) -> Result<Self, CheckpointError> {
        if tree.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: tree.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        if tree.document_checksum != document_checksum {
            return Err(CheckpointError::DocumentMismatch {
                recorded: tree.document_checksum,
                actual: document_checksum.to_string(),
            });
        }
        if let Some(key) = first_incomplete(&tree.frames) {
            return Err(CheckpointError::IncompleteFrame { key });
        }

        Ok(Self {
            tree,
            open: Vec::new(),
            cursors: vec![0],
        })
    }

    /// Opens a frame, or reports that it already completed.
    pub fn enter(&mut self, key: FrameKey) -> Result<FrameEntry, CheckpointError> {
        let depth = self.open.len();
        let cursor = self.cursors[depth];

        let mut children = &mut self.tree.frames;
        for &i in &self.open {
            children = &mut children[i].children;
        }

        if cursor < children.len() {
            let existing = &children[cursor];
            if existing.key != key {
                return Err(CheckpointError::FrameMismatch {
                    recorded: existing.key,
                    attempted: key,
                });
            }
            match existing.state {
                SlotState::Executing => Err(CheckpointError::IncompleteFrame { key }),
                SlotState::Completed => {
                    let value = existing.value.clone();
                    self.cursors[depth] += 1;
                    Ok(FrameEntry::Completed(value))
                }
            }
        } else {
            children.push(Bucket::executing(key));
            let index = children.len() - 1;
            self.open.push(index);
            self.cursors.push(0);
            Ok(FrameEntry::Started)
        }
    }

    /// Closes the innermost open frame, storing its captured value.
    pub fn exit(&mut self, key: FrameKey, value: Option<Value>) -> Result<(), CheckpointError> {
        let Some(&last) = self.open.last() else {
            return Err(CheckpointError::NoOpenFrame { key });
        };

        let mut children = &mut self.tree.frames;
        for &i in &self.open[..self.open.len() - 1] {
            children = &mut children[i].children;
        }
        let bucket = &mut children[last];
        if bucket.key != key {
            return Err(CheckpointError::FrameMismatch {
                recorded: bucket.key,
                attempted: key,
            });
        }
        bucket.state = SlotState::Completed;
        bucket.value = value;

        self.open.pop();
        self.cursors.pop();
        let depth = self.open.len();
        self.cursors[depth] += 1;
        Ok(())
    }

    /// True while the replay cursor at the current nesting level still
    /// has recorded frames ahead of it. Callers use this to keep
    /// replaying instead of performing the work (or the waiting) whose
    /// outcome is already recorded.
    pub fn is_replaying(&self) -> bool {
        let depth = self.open.len();
        let cursor = self.cursors[depth];
        let mut children = &self.tree.frames;
        for &i in &self.open {
            children = &children[i].children;
        }
        cursor < children.len()
    }

    /// Exports the tree. Only called between frames, where everything
    /// recorded so far has completed.
    pub fn export(&self) -> CheckpointTree {
        debug_assert!(self.open.is_empty(), "export with open frames");
        let mut tree = self.tree.clone();
        tree.created_at = Utc::now();
        tree
    }
}

fn first_incomplete(buckets: &[Bucket]) -> Option<FrameKey> {
    for bucket in buckets {
        if bucket.state == SlotState::Executing {
            return Some(bucket.key);
        }
        if let Some(key) = first_incomplete(&bucket.children) {
            return Some(key);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(kind: FrameKind, index: u32) -> FrameKey {
        FrameKey::new(kind, index)
    }

    #[test]
    fn test_record_and_replay() {
        let mut journal = Journal::new("abc");

        assert_eq!(
            journal.enter(key(FrameKind::Initialize, 0)).unwrap(),
            FrameEntry::Started
        );
        journal
            .exit(key(FrameKind::Initialize, 0), Some(json!({"n": 1})))
            .unwrap();

        assert_eq!(
            journal.enter(key(FrameKind::EnterInitial, 1)).unwrap(),
            FrameEntry::Started
        );
        journal.exit(key(FrameKind::EnterInitial, 1), None).unwrap();

        let tree = journal.export();
        let mut replay = Journal::resume(tree, "abc").unwrap();

        assert_eq!(
            replay.enter(key(FrameKind::Initialize, 0)).unwrap(),
            FrameEntry::Completed(Some(json!({"n": 1})))
        );
        assert_eq!(
            replay.enter(key(FrameKind::EnterInitial, 1)).unwrap(),
            FrameEntry::Completed(None)
        );

        // Past the recorded range: back to recording.
        assert_eq!(
            replay.enter(key(FrameKind::Iteration, 2)).unwrap(),
            FrameEntry::Started
        );
        replay.exit(key(FrameKind::Iteration, 2), None).unwrap();
    }

    #[test]
    fn test_nested_frames() {
        let mut journal = Journal::new("abc");

        journal.enter(key(FrameKind::Iteration, 2)).unwrap();
        journal.enter(key(FrameKind::Select, 0)).unwrap();
        journal
            .exit(key(FrameKind::Select, 0), Some(json!([4, 7])))
            .unwrap();
        journal.enter(key(FrameKind::Microstep, 1)).unwrap();
        journal.exit(key(FrameKind::Microstep, 1), None).unwrap();
        journal.exit(key(FrameKind::Iteration, 2), None).unwrap();

        let tree = journal.export();
        assert_eq!(tree.frames.len(), 1);
        assert_eq!(tree.frames[0].children.len(), 2);
        assert_eq!(tree.frames[0].children[0].value, Some(json!([4, 7])));
    }

    #[test]
    fn test_frame_mismatch_is_fatal() {
        let mut journal = Journal::new("abc");
        journal.enter(key(FrameKind::Initialize, 0)).unwrap();
        journal.exit(key(FrameKind::Initialize, 0), None).unwrap();

        let mut replay = Journal::resume(journal.export(), "abc").unwrap();
        let err = replay.enter(key(FrameKind::Iteration, 0)).unwrap_err();
        assert!(matches!(err, CheckpointError::FrameMismatch { .. }));
    }

    #[test]
    fn test_exit_key_must_match_open_frame() {
        let mut journal = Journal::new("abc");
        journal.enter(key(FrameKind::Iteration, 0)).unwrap();
        let err = journal
            .exit(key(FrameKind::Select, 0), None)
            .unwrap_err();
        assert!(matches!(err, CheckpointError::FrameMismatch { .. }));
    }

    #[test]
    fn test_resume_rejects_wrong_document() {
        let journal = Journal::new("abc");
        let err = Journal::resume(journal.export(), "def").unwrap_err();
        assert!(matches!(err, CheckpointError::DocumentMismatch { .. }));
    }

    #[test]
    fn test_resume_rejects_wrong_version() {
        let mut tree = Journal::new("abc").export();
        tree.version = 99;
        let err = Journal::resume(tree, "abc").unwrap_err();
        assert!(matches!(err, CheckpointError::UnsupportedVersion { found: 99, .. }));
    }

    #[test]
    fn test_resume_rejects_incomplete_frame() {
        let mut tree = Journal::new("abc").export();
        tree.frames.push(Bucket::executing(key(FrameKind::Iteration, 0)));
        let err = Journal::resume(tree, "abc").unwrap_err();
        assert!(matches!(err, CheckpointError::IncompleteFrame { .. }));
    }

    #[test]
    fn test_tree_serde_roundtrip() {
        let mut journal = Journal::new("abc");
        journal.enter(key(FrameKind::Iteration, 2)).unwrap();
        journal.enter(key(FrameKind::Select, 0)).unwrap();
        journal
            .exit(key(FrameKind::Select, 0), Some(json!([1])))
            .unwrap();
        journal.exit(key(FrameKind::Iteration, 2), Some(json!({"c": [3]}))).unwrap();

        let tree = journal.export();
        let text = serde_json::to_string(&tree).unwrap();
        let back: CheckpointTree = serde_json::from_str(&text).unwrap();

        assert_eq!(back.version, CHECKPOINT_VERSION);
        assert_eq!(back.document_checksum, "abc");
        assert_eq!(back.frames[0].children[0].value, Some(json!([1])));
        assert_eq!(back.frames[0].value, Some(json!({"c": [3]})));
    }

    #[test]
    fn test_is_replaying_tracks_cursor() {
        let mut journal = Journal::new("abc");
        journal.enter(key(FrameKind::Initialize, 0)).unwrap();
        journal.exit(key(FrameKind::Initialize, 0), None).unwrap();
        journal.enter(key(FrameKind::Iteration, 1)).unwrap();
        journal.exit(key(FrameKind::Iteration, 1), None).unwrap();
        assert!(!journal.is_replaying());

        let mut replay = Journal::resume(journal.export(), "abc").unwrap();
        assert!(replay.is_replaying());
        replay.enter(key(FrameKind::Initialize, 0)).unwrap();
        assert!(replay.is_replaying());
        replay.enter(key(FrameKind::Iteration, 1)).unwrap();
        assert!(!replay.is_replaying());
    }

    #[test]
    fn test_sibling_frames_replay_in_order() {
        let mut journal = Journal::new("abc");
        for i in 0..3 {
            journal.enter(key(FrameKind::Iteration, i)).unwrap();
            journal
                .exit(key(FrameKind::Iteration, i), Some(json!(i)))
                .unwrap();
        }

        let mut replay = Journal::resume(journal.export(), "abc").unwrap();
        for i in 0..3 {
            assert_eq!(
                replay.enter(key(FrameKind::Iteration, i)).unwrap(),
                FrameEntry::Completed(Some(json!(i)))
            );
        }
    }
}
