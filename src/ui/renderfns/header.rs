use crate::connectivity::{ConnectivitySnapshot, ConnectivityState};
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Text and color of the connectivity indicator
pub fn indicator(snapshot: &ConnectivitySnapshot) -> (String, Color) {
  let (label, color) = match snapshot.state {
    ConnectivityState::Online => ("ONLINE".to_string(), Color::Green),
    ConnectivityState::Degraded => ("DEGRADED".to_string(), Color::Yellow),
    ConnectivityState::Offline if snapshot.blocker_detected => {
      ("OFFLINE (blocked)".to_string(), Color::Red)
    }
    ConnectivityState::Offline => ("OFFLINE".to_string(), Color::Red),
  };
  if snapshot.retry_armed {
    (format!("{} retrying…", label), Color::Yellow)
  } else {
    (label, color)
  }
}

/// Draw the header bar with title, current resource, and connection status
pub fn draw_header(
  frame: &mut Frame,
  area: Rect,
  title: &str,
  resource: &str,
  snapshot: &ConnectivitySnapshot,
  unsynced: usize,
) {
  let (status, status_color) = indicator(snapshot);

  let mut spans = vec![
    Span::styled(" acon ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", title), Style::default().fg(Color::White)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", resource),
      Style::default().fg(Color::Yellow).bold(),
    ),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" ● {} ", status), Style::default().fg(status_color).bold()),
  ];

  if unsynced > 0 {
    spans.push(Span::styled("│", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(
      format!(" {} unsynced ", unsynced),
      Style::default().fg(Color::Magenta),
    ));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn snapshot(state: ConnectivityState) -> ConnectivitySnapshot {
    ConnectivitySnapshot {
      state,
      blocker_detected: false,
      consecutive_failures: 0,
      os_online: true,
      retry_armed: false,
      last_failure: None,
      generation: 0,
    }
  }

  #[test]
  fn test_indicator_labels() {
    assert_eq!(indicator(&snapshot(ConnectivityState::Online)).0, "ONLINE");
    assert_eq!(
      indicator(&snapshot(ConnectivityState::Degraded)).0,
      "DEGRADED"
    );
    assert_eq!(indicator(&snapshot(ConnectivityState::Offline)).0, "OFFLINE");
  }

  #[test]
  fn test_indicator_blocked_and_retrying() {
    let mut s = snapshot(ConnectivityState::Offline);
    s.blocker_detected = true;
    assert_eq!(indicator(&s), ("OFFLINE (blocked)".to_string(), Color::Red));

    s.retry_armed = true;
    assert_eq!(indicator(&s).0, "OFFLINE (blocked) retrying…");
  }
}
