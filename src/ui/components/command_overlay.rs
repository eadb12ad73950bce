use crate::commands::Command;
use crate::ui::components::TextInput;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph};

const MAX_SUGGESTIONS: usize = 8;

/// Floating box anchored at the top-left of the content area
fn overlay_area(area: Rect, rows: u16) -> Rect {
  let width = (area.width * 60 / 100).clamp(30, 60).min(area.width);
  let height = (rows + 2).min(area.height);
  Rect::new(area.x + 1, area.y + 1, width.saturating_sub(1), height)
}

/// Draw the `:` command overlay with autocomplete
pub fn draw_command_overlay(
  frame: &mut Frame,
  area: Rect,
  input: &str,
  suggestions: &[&Command],
  selected_suggestion: usize,
) {
  let shown = suggestions.len().min(MAX_SUGGESTIONS) as u16;
  let overlay = overlay_area(area, 1 + shown);
  frame.render_widget(Clear, overlay);

  let block = Block::default()
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Yellow))
    .title(" Command ");
  let inner = block.inner(overlay);
  frame.render_widget(block, overlay);

  if inner.height == 0 {
    return;
  }

  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([Constraint::Length(1), Constraint::Min(0)])
    .split(inner);

  let input_line = Line::from(vec![
    Span::styled(":", Style::default().fg(Color::Yellow)),
    Span::raw(input),
    Span::styled("_", Style::default().fg(Color::Yellow)),
  ]);
  frame.render_widget(Paragraph::new(input_line), chunks[0]);

  if suggestions.is_empty() || chunks[1].height == 0 {
    return;
  }

  let items: Vec<ListItem> = suggestions
    .iter()
    .take(MAX_SUGGESTIONS)
    .map(|cmd| {
      ListItem::new(Line::from(vec![
        Span::styled(
          format!("{:<13}", cmd.name),
          Style::default().fg(Color::Cyan),
        ),
        Span::styled(cmd.description, Style::default().fg(Color::DarkGray)),
      ]))
    })
    .collect();

  let list =
    List::new(items).highlight_style(Style::default().bg(Color::DarkGray).fg(Color::White));
  let mut state = ListState::default();
  state.select(Some(selected_suggestion.min(MAX_SUGGESTIONS - 1)));
  frame.render_stateful_widget(list, chunks[1], &mut state);
}

/// Draw a one-line text prompt (add / rename)
pub fn draw_prompt(frame: &mut Frame, area: Rect, title: &str, input: &TextInput) {
  let overlay = overlay_area(area, 1);
  frame.render_widget(Clear, overlay);

  let block = Block::default()
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Cyan))
    .title(format!(" {} ", title));
  let inner = block.inner(overlay);
  frame.render_widget(block, overlay);

  let (before, after) = input.split_at_cursor();
  let line = Line::from(vec![
    Span::raw(before),
    Span::styled("_", Style::default().fg(Color::Cyan)),
    Span::raw(after),
  ]);
  frame.render_widget(Paragraph::new(line), inner);
}
