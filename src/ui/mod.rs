pub mod components;
pub mod renderfns;
pub mod views;

use crate::app::{App, Mode};
use ratatui::prelude::*;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  let panel = app.current_panel();
  renderfns::draw_header(
    frame,
    chunks[0],
    app.title(),
    panel.name(),
    app.connectivity(),
    panel.unsynced_count(),
  );

  let rows = panel.rows();
  views::draw_resource_list(
    frame,
    chunks[1],
    &views::ListContext {
      name: panel.name(),
      rows: &rows,
      selected: app.selected(),
      loading: panel.loading(),
      offline: panel.is_offline_mode(),
      source: views::describe_source(panel.source()),
    },
  );

  // The hook's own error wins over transient action feedback
  match (panel.error(), app.status_message()) {
    (Some(error), _) => renderfns::draw_footer(frame, chunks[2], Some(&error), true),
    (None, Some((message, is_error))) => {
      renderfns::draw_footer(frame, chunks[2], Some(message), is_error)
    }
    (None, None) => renderfns::draw_footer(frame, chunks[2], None, false),
  }

  match app.mode() {
    Mode::Command => components::draw_command_overlay(
      frame,
      chunks[1],
      app.command_input(),
      &app.autocomplete_suggestions(),
      app.selected_suggestion(),
    ),
    Mode::Prompt { title, input, .. } => components::draw_prompt(frame, chunks[1], title, input),
    Mode::Normal => {}
  }

  if let Some(message) = panel.conflict_message() {
    components::draw_conflict_overlay(frame, chunks[1], panel.name(), &message);
  }
}
