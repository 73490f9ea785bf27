//! Text rendering of queue state for users.

use crate::domain::{ItemStatus, ItemView};
use crate::queue::{QueueEvent, SkipOutcome};

/// One line per command, shown by `help`.
pub const HELP_LINES: &[(&str, &str)] = &[
    ("add url [pitch]", "queue a video, optionally pitch-shifted by -12..=12 semitones"),
    ("list", "show the current playlist"),
    ("next", "play the next ready entry on the playlist"),
    ("remove id", "delete one of your entries from the playlist"),
    ("move id position", "change the position of an entry (admins only)"),
    ("reset", "clear the playlist (admins only)"),
];

pub fn render_help() -> String {
    let mut lines = vec!["Commands:".to_string()];
    lines.extend(
        HELP_LINES
            .iter()
            .map(|(usage, text)| format!("`{}`: {}.", usage, text)),
    );
    lines.join("\n")
}

fn status_suffix(item: &ItemView) -> String {
    match item.status {
        ItemStatus::Ready => String::new(),
        ItemStatus::Failed => format!(
            " (failed: {})",
            item.failure_reason.as_deref().unwrap_or("unknown error")
        ),
        status => format!(" ({})", status),
    }
}

/// A numbered queue line, e.g. ``1. `Song [+2]` (fetching)``.
pub fn render_item_line(position: usize, item: &ItemView) -> String {
    format!(
        "{}. `{}` #{}{}",
        position,
        item.display_name,
        item.id,
        status_suffix(item)
    )
}

pub fn render_queue(items: &[ItemView]) -> String {
    if items.is_empty() {
        return "No songs in queue!".to_string();
    }
    let mut lines = vec!["Up Next".to_string()];
    lines.extend(
        items
            .iter()
            .enumerate()
            .map(|(i, item)| render_item_line(i + 1, item)),
    );
    lines.join("\n")
}

pub fn render_now_playing(item: &ItemView) -> String {
    match &item.served_url {
        Some(url) => format!("Now playing `{}`\n{}", item.display_name, url),
        None => format!("Now playing `{}`", item.display_name),
    }
}

pub fn render_skip(outcome: &SkipOutcome) -> String {
    match (&outcome.now_playing, outcome.waiting) {
        (Some(item), _) => render_now_playing(item),
        (None, true) => "Nothing is ready yet, the next song will start once loaded.".to_string(),
        (None, false) => "No songs in queue!".to_string(),
    }
}

/// User-facing line for an event, `None` for internal bookkeeping.
pub fn render_event(event: &QueueEvent) -> Option<String> {
    match event {
        QueueEvent::Admitted { item } => Some(format!("Loading `{}`...", item.url)),
        QueueEvent::Transitioned { .. } => None,
        QueueEvent::Failed { item, reason } => {
            Some(format!("Failed to load `{}`: {}", item.display_name, reason))
        }
        QueueEvent::NowPlaying { item } => Some(render_now_playing(item)),
        QueueEvent::Finished { item } => Some(format!("Finished `{}`.", item.display_name)),
        QueueEvent::Removed { item } => Some(format!(
            "Successfully deleted `{}` from the queue.",
            item.display_name
        )),
        QueueEvent::Reset { count } => Some(format!("Queue cleared, {} songs removed.", count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemId, PitchShift, QueueItem, TransitionPayload};

    fn item(id: u64, title: &str, shift: i32, status: ItemStatus) -> ItemView {
        let mut item = QueueItem::new(
            ItemId(id),
            "alice",
            "https://a.test/x.mp4",
            PitchShift::new(shift).unwrap(),
        );
        item.apply(ItemStatus::Fetching, TransitionPayload::titled(title));
        item.status = status;
        item.view()
    }

    #[test]
    fn test_render_queue() {
        assert_eq!(render_queue(&[]), "No songs in queue!");
        let rendered = render_queue(&[
            item(1, "First", 0, ItemStatus::Ready),
            item(2, "Second", 2, ItemStatus::Transcoding),
        ]);
        assert_eq!(
            rendered,
            "Up Next\n1. `First` #1\n2. `Second [+2]` #2 (transcoding)"
        );
    }

    #[test]
    fn test_render_failed_line() {
        let mut view = item(3, "Song", 0, ItemStatus::Failed);
        view.failure_reason = Some("Access denied: private".to_string());
        assert_eq!(
            render_item_line(1, &view),
            "1. `Song` #3 (failed: Access denied: private)"
        );
    }

    #[test]
    fn test_render_events() {
        let view = item(1, "Song", -1, ItemStatus::Failed);
        let failed = QueueEvent::Failed {
            item: view,
            reason: "boom".to_string(),
        };
        assert_eq!(
            render_event(&failed).as_deref(),
            Some("Failed to load `Song [-1]`: boom")
        );
        let transitioned = QueueEvent::Transitioned {
            id: ItemId(1),
            from: ItemStatus::Pending,
            to: ItemStatus::Fetching,
        };
        assert!(render_event(&transitioned).is_none());
    }

    #[test]
    fn test_render_skip_waiting() {
        let outcome = SkipOutcome {
            waiting: true,
            ..Default::default()
        };
        assert!(render_skip(&outcome).starts_with("Nothing is ready yet"));
        assert_eq!(render_skip(&SkipOutcome::default()), "No songs in queue!");
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = render_help();
        assert!(help.starts_with("Commands:"));
        assert_eq!(help.lines().count(), HELP_LINES.len() + 1);
    }
}
