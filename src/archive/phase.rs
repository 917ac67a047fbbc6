//! Lifecycle of a single archive download

use std::fmt;

/// How a download ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Central directory written, every byte delivered
    Success,
    /// Client went away or a newer download superseded this one
    Aborted,
    /// Storage or encoding failure
    Error,
}

/// Phase of an archive download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchivePhase {
    /// Not started
    Idle,
    /// Registering as the task's active download
    Locking,
    /// Writing `metadata.json`
    MetadataWrite,
    /// Fetching and writing image entries
    ImageStreaming,
    /// Writing the central directory
    Finalizing,
    /// Done
    Closed(CloseReason),
}

impl ArchivePhase {
    /// Whether `next` may follow this phase
    pub fn can_transition(self, next: ArchivePhase) -> bool {
        use ArchivePhase::*;
        match (self, next) {
            (Closed(_), _) => false,
            (_, Closed(CloseReason::Aborted | CloseReason::Error)) => true,
            (Idle, Locking) => true,
            (Locking, MetadataWrite | ImageStreaming) => true,
            (MetadataWrite, ImageStreaming) => true,
            (ImageStreaming, Finalizing) => true,
            (Finalizing, Closed(CloseReason::Success)) => true,
            _ => false,
        }
    }

    /// Move to `next`, refusing (and logging) invalid transitions
    pub fn advance(&mut self, next: ArchivePhase) -> bool {
        if self.can_transition(next) {
            *self = next;
            true
        } else {
            tracing::warn!(from = %self, to = %next, "Rejected archive phase transition");
            false
        }
    }

    /// Whether the download has ended
    pub fn is_closed(self) -> bool {
        matches!(self, ArchivePhase::Closed(_))
    }
}

impl fmt::Display for ArchivePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchivePhase::Idle => f.write_str("idle"),
            ArchivePhase::Locking => f.write_str("locking"),
            ArchivePhase::MetadataWrite => f.write_str("metadata-write"),
            ArchivePhase::ImageStreaming => f.write_str("image-streaming"),
            ArchivePhase::Finalizing => f.write_str("finalizing"),
            ArchivePhase::Closed(CloseReason::Success) => f.write_str("closed(success)"),
            ArchivePhase::Closed(CloseReason::Aborted) => f.write_str("closed(aborted)"),
            ArchivePhase::Closed(CloseReason::Error) => f.write_str("closed(error)"),
        }
    }
}
