use crate::models::UpdateTarget;
use serde::Serialize;
use uuid::Uuid;

/// Broadcast to subscribers of an `UpdateManager` while runs progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UpdateEvent {
    Started {
        run_id: Uuid,
        target: UpdateTarget,
        total: usize,
    },
    /// Chapters of this manga were added or removed.
    MangaUpdated { run_id: Uuid, manga_id: i64 },
    Finished {
        run_id: Uuid,
        target: UpdateTarget,
        cancelled: bool,
    },
}

impl UpdateEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            UpdateEvent::Started { run_id, .. }
            | UpdateEvent::MangaUpdated { run_id, .. }
            | UpdateEvent::Finished { run_id, .. } => *run_id,
        }
    }
}
