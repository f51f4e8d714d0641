use crate::config::{LibraryUpdateConfig, MangaRestriction};
use crate::models::{LibraryManga, MangaStatus, DEFAULT_CATEGORY};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Completed,
    NotCaughtUp,
    NotStarted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Completed => write!(f, "Skipped because series is complete"),
            SkipReason::NotCaughtUp => write!(f, "Skipped because there are unread chapters"),
            SkipReason::NotStarted => write!(f, "Skipped because series has not been started"),
        }
    }
}

/// Manga picked for a run plus the category ids it counts as updating.
#[derive(Debug, Default)]
pub struct Selection {
    pub manga: Vec<LibraryManga>,
    pub category_ids: Vec<i32>,
}

/// Picks manga from the library for a category-scoped or library-wide run.
///
/// Library rows repeat a manga once per category, so exclusion is decided by
/// manga id: a manga in any excluded category is dropped even when another of
/// its rows matches.
pub fn select(
    library: &[LibraryManga],
    known_categories: &[i32],
    category: Option<i32>,
    settings: &LibraryUpdateConfig,
) -> Selection {
    let (rows, category_ids): (Vec<&LibraryManga>, Vec<i32>) = match category {
        Some(id) => (library.iter().filter(|m| m.category == id).collect(), vec![id]),
        None if !settings.categories.is_empty() => (
            library
                .iter()
                .filter(|m| settings.categories.contains(&m.category))
                .collect(),
            settings.categories.clone(),
        ),
        None => {
            let mut ids = known_categories.to_vec();
            ids.push(DEFAULT_CATEGORY);
            (library.iter().collect(), ids)
        }
    };

    let excluded: HashSet<i64> = library
        .iter()
        .filter(|m| settings.exclude_categories.contains(&m.category))
        .map(|m| m.id)
        .collect();

    let manga = distinct_sorted(rows.into_iter().filter(|m| !excluded.contains(&m.id)));
    Selection { manga, category_ids }
}

/// Picks an explicit set of manga by id; category exclusion does not apply.
pub fn explicit(library: &[LibraryManga], ids: &[i64]) -> Vec<LibraryManga> {
    distinct_sorted(library.iter().filter(|m| ids.contains(&m.id)))
}

/// Every library manga once, ordered by title.
pub fn distinct(library: &[LibraryManga]) -> Vec<LibraryManga> {
    distinct_sorted(library.iter())
}

fn distinct_sorted<'a>(rows: impl Iterator<Item = &'a LibraryManga>) -> Vec<LibraryManga> {
    let mut seen = HashSet::new();
    let mut manga: Vec<LibraryManga> = rows.filter(|m| seen.insert(m.id)).cloned().collect();
    manga.sort_by(|a, b| a.title.cmp(&b.title));
    manga
}

/// First restriction a manga violates, checked as completed, then unread,
/// then not started.
pub fn skip_reason(manga: &LibraryManga, restrictions: &[MangaRestriction]) -> Option<SkipReason> {
    if restrictions.contains(&MangaRestriction::NonCompleted) && manga.status == MangaStatus::Completed {
        Some(SkipReason::Completed)
    } else if restrictions.contains(&MangaRestriction::HasUnread) && manga.unread != 0 {
        Some(SkipReason::NotCaughtUp)
    } else if restrictions.contains(&MangaRestriction::NonRead) && manga.total_chapters > 0 && !manga.has_read() {
        Some(SkipReason::NotStarted)
    } else {
        None
    }
}

/// Splits candidates into those to update and those skipped with their reason.
pub fn apply_restrictions(
    manga: Vec<LibraryManga>,
    restrictions: &[MangaRestriction],
) -> (Vec<LibraryManga>, Vec<(LibraryManga, String)>) {
    let mut eligible = Vec::with_capacity(manga.len());
    let mut skipped = Vec::new();
    for m in manga {
        match skip_reason(&m, restrictions) {
            Some(reason) => skipped.push((m, reason.to_string())),
            None => eligible.push(m),
        }
    }
    (eligible, skipped)
}
