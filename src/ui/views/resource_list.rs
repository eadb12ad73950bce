use crate::hook::{Row, SyncMark};
use crate::ui::renderfns::{mark_color, source_label, truncate};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

/// What the list needs to know about the current resource
pub struct ListContext<'a> {
  pub name: &'a str,
  pub rows: &'a [Row],
  pub selected: usize,
  pub loading: bool,
  pub offline: bool,
  pub source: &'a str,
}

/// Draw the current resource's records
pub fn draw_resource_list(frame: &mut Frame, area: Rect, ctx: &ListContext) {
  let mut title = format!(" {} ({}) ", ctx.name, ctx.rows.len());
  if ctx.loading {
    title = format!(" {} (loading...) ", ctx.name);
  } else if ctx.offline {
    title = format!(" {} ({}, offline, {}) ", ctx.name, ctx.rows.len(), ctx.source);
  }

  let border = if ctx.offline { Color::Red } else { Color::Blue };
  let block = Block::default()
    .title(title)
    .title_alignment(Alignment::Center)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(border));

  if ctx.rows.is_empty() {
    let content = if ctx.loading {
      "Loading..."
    } else {
      "Nothing here yet. Press 'a' to add one."
    };
    let paragraph = Paragraph::new(content)
      .block(block)
      .style(Style::default().fg(Color::DarkGray))
      .alignment(Alignment::Center);
    frame.render_widget(paragraph, area);
    return;
  }

  let width = area.width.saturating_sub(8) as usize;
  let items: Vec<ListItem> = ctx
    .rows
    .iter()
    .map(|row| {
      let style = Style::default().fg(mark_color(row.mark));
      let suffix = match row.mark {
        SyncMark::Synced => "",
        SyncMark::PendingCreate => "  (not yet saved)",
        SyncMark::Modified => "  (edited offline)",
      };
      ListItem::new(Line::from(vec![
        Span::styled(format!(" {} ", row.mark.glyph()), style.bold()),
        Span::styled(truncate(&row.title, width), style),
        Span::styled(suffix, Style::default().fg(Color::DarkGray)),
      ]))
    })
    .collect();

  let list = List::new(items)
    .block(block)
    .highlight_style(Style::default().bg(Color::DarkGray).fg(Color::White));

  let mut state = ListState::default();
  state.select(Some(ctx.selected.min(ctx.rows.len() - 1)));
  frame.render_stateful_widget(list, area, &mut state);
}

/// Label for the list title
pub fn describe_source(source: Option<crate::cache::CacheSource>) -> &'static str {
  match source_label(source) {
    "" => "no data",
    label => label,
  }
}
