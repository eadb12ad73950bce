use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

const HINTS: &[(&str, &str)] = &[
  ("<:>", "command"),
  ("<a>", "add"),
  ("<e>", "edit"),
  ("<d>", "delete"),
  ("<r>", "retry"),
  ("<C>", "clear cache"),
  ("<q>", "quit"),
];

/// Draw the status bar: the latest message if any, key hints otherwise
pub fn draw_footer(frame: &mut Frame, area: Rect, message: Option<&str>, is_error: bool) {
  let line = match message {
    Some(message) => {
      let color = if is_error { Color::Red } else { Color::Green };
      Line::from(Span::styled(
        format!(" {}", message),
        Style::default().fg(color),
      ))
    }
    None => {
      let mut spans = vec![Span::raw(" ")];
      for (key, label) in HINTS {
        spans.push(Span::styled(*key, Style::default().fg(Color::Cyan)));
        spans.push(Span::styled(
          format!(" {}   ", label),
          Style::default().fg(Color::DarkGray),
        ));
      }
      Line::from(spans)
    }
  };

  let paragraph = Paragraph::new(line).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}
