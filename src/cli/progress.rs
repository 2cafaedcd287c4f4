//! Progress bars and listings for the command line.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::download::{DownloadProgress, DownloadRecord};
use crate::filter::{FilterGroup, FilterSet};
use crate::model::{CompletionStatus, ContentId, ContentSummary, DownloadStatus};
use crate::stats::{BatchStats, TransferStats};
use crate::{format_bytes, format_elapsed, format_runtime, format_speed};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╌")
}

/// Creates a progress bar for a single video download.
pub fn make_progress_bar(size: u64, name: &str) -> ProgressBar {
    let bar = ProgressBar::new(size);
    bar.set_style(bar_style(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} @ {bytes_per_sec} - {msg}",
    ));
    bar.set_message(name.to_string());
    bar
}

/// Creates a progress bar for the whole batch.
pub fn make_total_progress_bar(size: u64) -> ProgressBar {
    let bar = ProgressBar::new(size);
    bar.set_style(bar_style(
        "Total [{bar:40.green/white}] {bytes}/{total_bytes} @ {bytes_per_sec}",
    ));
    bar
}

/// [`DownloadProgress`] drawing one bar per video under a total bar.
pub struct BarProgress {
    multi: MultiProgress,
    total: ProgressBar,
    bars: Mutex<HashMap<ContentId, ProgressBar>>,
}

impl BarProgress {
    pub fn new(total_size: u64) -> Self {
        let multi = MultiProgress::new();
        let total = multi.add(make_total_progress_bar(total_size));
        Self {
            multi,
            total,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn take_bar(&self, id: ContentId) -> Option<ProgressBar> {
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn finish(&self) {
        self.total.finish_and_clear();
        self.multi.clear().ok();
    }
}

impl DownloadProgress for BarProgress {
    fn on_start(&self, item: &ContentSummary, size: Option<u64>) {
        self.total.inc_length(size.unwrap_or(0));
        let bar = self
            .multi
            .insert_before(&self.total, make_progress_bar(size.unwrap_or(0), &item.name));
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.id, bar);
    }

    fn on_progress(&self, id: ContentId, bytes_delta: u64, _speed: u64) {
        if let Some(bar) = self
            .bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            bar.inc(bytes_delta);
        }
        self.total.inc(bytes_delta);
    }

    fn on_complete(&self, item: &ContentSummary, stats: &TransferStats) {
        if let Some(bar) = self.take_bar(item.id) {
            bar.finish_and_clear();
        }
        let _ = self.multi.println(format!(
            "  {} - {} in {} ({} avg, {} peak)",
            item.name,
            format_bytes(stats.bytes),
            format_elapsed(stats.elapsed),
            format_speed(stats.average_speed),
            format_speed(stats.peak_speed),
        ));
    }

    fn on_error(&self, id: ContentId, error: &str) {
        if let Some(bar) = self.take_bar(id) {
            bar.abandon();
        }
        let _ = self
            .multi
            .println(format!("  {} {id}: {error}", style("failed").red()));
    }
}

fn completion_label(status: CompletionStatus) -> String {
    match status {
        CompletionStatus::NotStarted => String::new(),
        CompletionStatus::InProgress { percent } => {
            style(format!("{percent}%")).yellow().to_string()
        }
        CompletionStatus::Completed => style("done").green().to_string(),
    }
}

/// Prints one line per item with its id, markers, and running time.
pub fn print_content_list(title: &str, items: &[ContentSummary], total: usize) {
    println!("\n{SEPARATOR}");
    println!("{title}");
    println!("{SEPARATOR}");

    if items.is_empty() {
        println!("  Nothing here yet.");
    }
    for item in items {
        let bookmark = if item.bookmarked { "*" } else { " " };
        let offline = match item.download {
            DownloadStatus::Downloaded => style("⬇").cyan().to_string(),
            DownloadStatus::NotDownloaded => " ".to_string(),
        };
        println!(
            "  {:>6} {bookmark}{offline} {} ({}, {}) {}",
            item.id,
            item.name,
            item.kind.label(),
            format_runtime(item.duration),
            completion_label(item.completion),
        );
    }

    println!("{SEPARATOR}");
    println!("  showing {} of {total}", items.len());
}

fn print_group(group: &FilterGroup) {
    if group.options.is_empty() {
        return;
    }
    println!("  {}:", group.kind.label());
    for option in &group.options {
        let mark = if option.is_on {
            style("[x]").green().to_string()
        } else {
            "[ ]".to_string()
        };
        println!("    {mark} {} ({})", option.name, option.key);
    }
}

pub fn print_filters(filters: &FilterSet) {
    println!("\n{SEPARATOR}");
    println!("Filters ({} applied)", filters.applied_count());
    println!("{SEPARATOR}");
    for group in [
        &filters.platforms,
        &filters.categories,
        &filters.content_types,
        &filters.difficulties,
    ] {
        print_group(group);
    }
    if let Some(search) = &filters.search {
        println!("  Search: {search}");
    }
    if let Some(completion) = filters.completion {
        println!("  Completion: {}", completion.as_param());
    }
    if filters.bookmarked_only {
        println!("  Bookmarked only");
    }
    println!("  Sort: {}", filters.sort.as_param());
    println!("{SEPARATOR}");
}

pub fn print_downloads(records: &[DownloadRecord]) {
    println!("\n{SEPARATOR}");
    println!("Downloads");
    println!("{SEPARATOR}");
    if records.is_empty() {
        println!("  No downloads.");
    }
    for record in records {
        println!(
            "  {:>6} {} ({}, {})",
            record.content.id,
            record.content.name,
            format_bytes(record.size),
            record.downloaded_at.format("%Y-%m-%d %H:%M"),
        );
    }
    let total: u64 = records.iter().map(|r| r.size).sum();
    println!("{SEPARATOR}");
    println!("  {} video(s), {} on disk", records.len(), format_bytes(total));
}

/// Prints a summary of a download batch.
pub fn print_summary(stats: &BatchStats) {
    if stats.downloaded == 0 && stats.skipped == 0 && stats.failed == 0 {
        return;
    }

    println!("\n{SEPARATOR}");
    println!("Download Summary");
    println!("{SEPARATOR}");

    if stats.downloaded > 0 {
        println!("  Videos downloaded: {}", stats.downloaded);
        println!("  Total size:        {}", format_bytes(stats.bytes));
        println!("  Total time:        {}", format_elapsed(stats.elapsed));
        println!("  Average speed:     {}", format_speed(stats.average_speed()));
        println!("  Peak speed:        {}", format_speed(stats.peak_speed));
    }
    if stats.skipped > 0 {
        println!("  Already on disk:   {}", stats.skipped);
    }
    if stats.failed > 0 {
        println!("  Failed:            {}", style(stats.failed).red());
    }

    println!("{SEPARATOR}");
}
