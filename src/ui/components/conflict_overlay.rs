use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

/// Blocking prompt shown while the backend has rejected a queued change.
/// Only `x` (discard) and `s` (resubmit) dismiss it.
pub fn draw_conflict_overlay(frame: &mut Frame, area: Rect, resource: &str, message: &str) {
  let width = (area.width * 70 / 100).clamp(40, 80).min(area.width);
  let height = 9.min(area.height);
  let overlay = Rect::new(
    area.x + area.width.saturating_sub(width) / 2,
    area.y + area.height.saturating_sub(height) / 2,
    width,
    height,
  );
  frame.render_widget(Clear, overlay);

  let block = Block::default()
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Red))
    .title(format!(" Sync conflict: {} ", resource))
    .title_alignment(Alignment::Center);

  let text = vec![
    Line::from(Span::styled(message, Style::default().fg(Color::White))),
    Line::raw(""),
    Line::from(Span::styled(
      "Your offline change was not applied.",
      Style::default().fg(Color::DarkGray),
    )),
    Line::raw(""),
    Line::from(vec![
      Span::styled("<x>", Style::default().fg(Color::Cyan)),
      Span::styled(" discard my change   ", Style::default().fg(Color::DarkGray)),
      Span::styled("<s>", Style::default().fg(Color::Cyan)),
      Span::styled(" send it again", Style::default().fg(Color::DarkGray)),
    ]),
  ];

  let paragraph = Paragraph::new(text)
    .block(block)
    .wrap(Wrap { trim: true });
  frame.render_widget(paragraph, overlay);
}
