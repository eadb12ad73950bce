use crate::cache::CacheSource;
use crate::hook::SyncMark;
use ratatui::prelude::Color;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Get the display color for a record's sync mark
pub fn mark_color(mark: SyncMark) -> Color {
  match mark {
    SyncMark::Synced => Color::White,
    SyncMark::PendingCreate => Color::Magenta,
    SyncMark::Modified => Color::Yellow,
  }
}

/// Short label for where the shown data came from
pub fn source_label(source: Option<CacheSource>) -> &'static str {
  match source {
    Some(CacheSource::Network) => "live",
    Some(CacheSource::Cache) => "cached",
    Some(CacheSource::Fallback) => "built-in",
    None => "",
  }
}
