use crate::config::NotificationConfig;
use crate::models::{Chapter, LibraryManga};
use crate::traits::{NotificationChannel, Notifier};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// Titles listed inline before the rest is summarised as "and N more".
const MAX_LISTED_TITLES: usize = 5;

/// Renders update progress with an indicatif bar and results through `tracing`.
pub struct ConsoleNotifier {
    config: NotificationConfig,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleNotifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            config,
            bar: Mutex::new(None),
        }
    }

    fn bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.config.progress_bar {
            return None;
        }
        let mut slot = self.bar.lock().unwrap_or_else(|p| p.into_inner());
        let bar = slot.get_or_insert_with(|| {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb
        });
        bar.set_length(total as u64);
        Some(bar.clone())
    }
}

fn summarize(titles: &[String]) -> String {
    let mut listed = titles.iter().take(MAX_LISTED_TITLES).cloned().collect::<Vec<_>>().join(", ");
    if titles.len() > MAX_LISTED_TITLES {
        listed.push_str(&format!(" and {} more", titles.len() - MAX_LISTED_TITLES));
    }
    listed
}

impl Notifier for ConsoleNotifier {
    fn show_progress(&self, manga: &LibraryManga, current: usize, total: usize) {
        match self.bar(total) {
            Some(bar) => {
                bar.set_position(current as u64);
                bar.set_message(manga.title.clone());
            }
            None => info!("🔄 [{}/{}] {}", current + 1, total, manga.title),
        }
    }

    fn show_queue_size_warning(&self) {
        warn!("⚠️ Large update queue for a single source; it may rate limit or ban this client");
    }

    fn show_result(&self, updates: &[(LibraryManga, Vec<Chapter>)]) {
        let total: usize = updates.iter().map(|(_, chapters)| chapters.len()).sum();
        info!("📚 {} new chapters in {} manga", total, updates.len());
        for (manga, chapters) in updates {
            let names = chapters.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ");
            info!("  ✨ {}: {}", manga.title, names);
        }
    }

    fn show_skipped(&self, titles: &[String], report: &Path) {
        info!("⏭️ Skipped {} manga: {}", titles.len(), summarize(titles));
        if !report.as_os_str().is_empty() {
            info!("   Details in {}", report.display());
        }
    }

    fn show_errors(&self, titles: &[String], report: &Path) {
        warn!("❌ Failed to update {} manga: {}", titles.len(), summarize(titles));
        if !report.as_os_str().is_empty() {
            warn!("   Details in {}", report.display());
        }
    }

    fn cancel_progress(&self) {
        if let Some(bar) = self.bar.lock().unwrap_or_else(|p| p.into_inner()).take() {
            bar.finish_and_clear();
        }
    }

    fn is_channel_enabled(&self, channel: NotificationChannel) -> bool {
        match channel {
            NotificationChannel::Progress => self.config.progress_bar,
            NotificationChannel::Skipped => self.config.skipped_enabled,
            NotificationChannel::Errors => self.config.errors_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_title_lists_are_truncated() {
        let titles: Vec<String> = (1..=7).map(|i| format!("M{}", i)).collect();
        assert_eq!(summarize(&titles), "M1, M2, M3, M4, M5 and 2 more");
        assert_eq!(summarize(&titles[..2]), "M1, M2");
    }

    #[test]
    fn channels_follow_configuration() {
        let notifier = ConsoleNotifier::new(NotificationConfig {
            skipped_enabled: false,
            errors_enabled: true,
            progress_bar: false,
        });
        assert!(!notifier.is_channel_enabled(NotificationChannel::Skipped));
        assert!(notifier.is_channel_enabled(NotificationChannel::Errors));
        assert!(!notifier.is_channel_enabled(NotificationChannel::Progress));
    }

    #[test]
    fn progress_bar_is_dropped_on_cancel() {
        let notifier = ConsoleNotifier::new(NotificationConfig::default());
        let manga = crate::testing::library_manga(1, "Alpha", 1);
        notifier.show_progress(&manga, 0, 3);
        assert!(notifier.bar.lock().unwrap().is_some());
        notifier.cancel_progress();
        assert!(notifier.bar.lock().unwrap().is_none());
    }
}
