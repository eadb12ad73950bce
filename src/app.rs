use crate::commands::{self, Command};
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, ConnectivitySnapshot, Subscription};
use crate::event::{Event, EventHandler};
use crate::hook::{HookContext, RecordKey, Resolution, ResourceHook, ResourcePanel};
use crate::resources::{Book, Lecture, NewsItem, Product, Professor, Quiz, Subject, Year};
use crate::ui;
use crate::ui::components::{InputResult, TextInput};
use color_eyre::{eyre::eyre, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::future::Future;
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// What a submitted prompt does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptTarget {
  Add,
  Rename(RecordKey),
}

/// Input mode
#[derive(Debug, Clone)]
pub enum Mode {
  Normal,
  Command,
  Prompt {
    title: String,
    input: TextInput,
    target: PromptTarget,
  },
}

/// One hook per resource kind, in command order
fn build_panels(ctx: &HookContext) -> Vec<Arc<dyn ResourcePanel>> {
  vec![
    Arc::new(ResourceHook::<Year>::new(ctx.clone())),
    Arc::new(ResourceHook::<Subject>::new(ctx.clone())),
    Arc::new(ResourceHook::<Lecture>::new(ctx.clone())),
    Arc::new(ResourceHook::<Book>::new(ctx.clone())),
    Arc::new(ResourceHook::<Product>::new(ctx.clone())),
    Arc::new(ResourceHook::<NewsItem>::new(ctx.clone())),
    Arc::new(ResourceHook::<Professor>::new(ctx.clone())),
    Arc::new(ResourceHook::<Quiz>::new(ctx.clone())),
  ]
}

/// Main application state
pub struct App {
  /// Resource hooks, one per resource kind
  panels: Vec<Arc<dyn ResourcePanel>>,

  /// Index of the panel on screen
  current: usize,

  /// Panels already loaded once
  activated: Vec<bool>,

  /// Selected row in the current list
  selected: usize,

  /// Current input mode
  mode: Mode,

  /// Command input buffer (after pressing :)
  command_input: String,

  /// Selected autocomplete suggestion index
  selected_suggestion: usize,

  /// Feedback from the last finished action, and whether it failed
  status: Option<(String, bool)>,

  /// Last connectivity state seen
  connectivity: ConnectivitySnapshot,

  monitor: Arc<ConnectivityMonitor>,

  /// Header text
  title: String,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(
    config: &Config,
    monitor: Arc<ConnectivityMonitor>,
    ctx: HookContext,
    initial_resource: Option<&str>,
  ) -> Result<Self> {
    let panels = build_panels(&ctx);
    let current = match initial_resource {
      Some(name) => resource_index(&panels, name)
        .ok_or_else(|| eyre!("Unknown resource: {} (try years, books, news...)", name))?,
      None => 0,
    };
    let (tx, _rx) = mpsc::unbounded_channel();

    Ok(Self {
      activated: vec![false; panels.len()],
      panels,
      current,
      selected: 0,
      mode: Mode::Normal,
      command_input: String::new(),
      selected_suggestion: 0,
      status: None,
      connectivity: monitor.snapshot(),
      monitor,
      title: config.title(),
      event_tx: tx,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();

    let _connectivity = self.watch_connectivity();
    self.watch_panels();
    self.activate_current();

    let result = self.main_loop(&mut terminal, &mut events).await;

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn main_loop<B: Backend>(
    &mut self,
    terminal: &mut Terminal<B>,
    events: &mut EventHandler,
  ) -> Result<()> {
    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }
    Ok(())
  }

  fn watch_connectivity(&self) -> Subscription {
    let tx = self.event_tx.clone();
    self.monitor.subscribe(move |_| {
      let _ = tx.send(Event::Connectivity);
    })
  }

  fn watch_panels(&self) {
    for panel in &self.panels {
      let mut changes = panel.changes();
      let name = panel.name();
      let tx = self.event_tx.clone();
      tokio::spawn(async move {
        while changes.changed().await.is_ok() {
          if tx.send(Event::ResourceChanged(name)).is_err() {
            break;
          }
        }
      });
    }
  }

  fn activate_current(&mut self) {
    if self.activated[self.current] {
      return;
    }
    self.activated[self.current] = true;
    let panel = Arc::clone(self.current_panel());
    tokio::spawn(async move { panel.activate().await });
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick | Event::Connectivity => self.connectivity = self.monitor.snapshot(),
      Event::ResourceChanged(name) => {
        if name == self.current_panel().name() {
          self.clamp_selection();
        }
      }
      Event::ActionDone { action, result } => {
        self.status = Some(match result {
          Ok(()) => (format!("{}: done", action), false),
          Err(e) => (format!("{}: {}", action, e), true),
        });
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    // A rejected offline change must be settled before anything else
    if self.current_panel().conflict_message().is_some() {
      self.handle_conflict_key(key);
      return;
    }

    match self.mode {
      Mode::Normal => self.handle_normal_mode_key(key),
      Mode::Command => self.handle_command_mode_key(key),
      Mode::Prompt { .. } => self.handle_prompt_key(key),
    }
  }

  fn handle_conflict_key(&mut self, key: KeyEvent) {
    let resolution = match key.code {
      KeyCode::Char('x') => Resolution::Discard,
      KeyCode::Char('s') => Resolution::Resubmit,
      _ => return,
    };
    let panel = Arc::clone(self.current_panel());
    let action = match resolution {
      Resolution::Discard => "discard",
      Resolution::Resubmit => "resubmit",
    };
    self.spawn_action(action, async move { panel.resolve_conflict(resolution).await });
  }

  fn handle_normal_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('q') => self.should_quit = true,

      // Navigation
      KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
      KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),

      // Mode switches
      KeyCode::Char(':') => {
        self.mode = Mode::Command;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      KeyCode::Char('a') => {
        self.mode = Mode::Prompt {
          title: format!("New in {}", self.current_panel().name()),
          input: TextInput::new(),
          target: PromptTarget::Add,
        };
      }
      KeyCode::Char('e') => {
        if let Some(row) = self.selected_row() {
          self.mode = Mode::Prompt {
            title: "Rename".to_string(),
            input: TextInput::with_value(&row.title),
            target: PromptTarget::Rename(row.key),
          };
        }
      }

      // Actions
      KeyCode::Char('d') => {
        if let Some(row) = self.selected_row() {
          let panel = Arc::clone(self.current_panel());
          self.spawn_action("delete", async move { panel.remove(&row.key).await });
        }
      }
      KeyCode::Char('r') => self.retry(),
      KeyCode::Char('C') => self.clear_cache(),

      _ => {}
    }
  }

  fn handle_command_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Esc => {
        self.mode = Mode::Normal;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      KeyCode::Enter => {
        self.mode = Mode::Normal;
        self.execute_command();
        self.selected_suggestion = 0;
      }
      KeyCode::Tab | KeyCode::Down => {
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = (self.selected_suggestion + 1) % suggestions.len();
        }
      }
      KeyCode::BackTab | KeyCode::Up => {
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = if self.selected_suggestion == 0 {
            suggestions.len() - 1
          } else {
            self.selected_suggestion - 1
          };
        }
      }
      KeyCode::Backspace => {
        self.command_input.pop();
        self.selected_suggestion = 0;
      }
      KeyCode::Char(c) => {
        self.command_input.push(c);
        self.selected_suggestion = 0;
      }
      _ => {}
    }
  }

  fn handle_prompt_key(&mut self, key: KeyEvent) {
    let Mode::Prompt { input, target, .. } = &mut self.mode else {
      return;
    };
    match input.handle_key(key) {
      InputResult::Submitted(value) => {
        let target = target.clone();
        self.mode = Mode::Normal;
        let title = value.trim().to_string();
        let panel = Arc::clone(self.current_panel());
        match target {
          PromptTarget::Add => {
            self.spawn_action("add", async move { panel.create_titled(&title).await })
          }
          PromptTarget::Rename(key) => {
            self.spawn_action("rename", async move { panel.retitle(&key, &title).await })
          }
        }
      }
      InputResult::Cancelled => self.mode = Mode::Normal,
      InputResult::Consumed | InputResult::NotHandled => {}
    }
  }

  fn execute_command(&mut self) {
    // Either the selected suggestion or the raw input
    let suggestions = commands::get_suggestions(&self.command_input);
    let cmd = match suggestions.get(self.selected_suggestion) {
      Some(command) => command.name.to_string(),
      None => self.command_input.trim().to_lowercase(),
    };
    self.command_input.clear();

    match cmd.as_str() {
      "retry" => self.retry(),
      "clear-cache" => self.clear_cache(),
      "quit" => self.should_quit = true,
      name => match resource_index(&self.panels, name) {
        Some(index) => self.switch_to(index),
        None => self.status = Some((format!("Unknown command: {}", name), true)),
      },
    }
  }

  fn switch_to(&mut self, index: usize) {
    if index != self.current {
      self.current = index;
      self.selected = 0;
      self.status = None;
    }
    self.activate_current();
  }

  fn retry(&mut self) {
    self.status = Some(("retrying…".to_string(), false));
    let panel = Arc::clone(self.current_panel());
    self.spawn_action("retry", async move { panel.retry_connection().await });
  }

  fn clear_cache(&mut self) {
    let panel = self.current_panel();
    panel.clear_cache();
    self.status = Some((format!("cleared cached {}", panel.name()), false));
  }

  fn spawn_action<F>(&self, action: &'static str, work: F)
  where
    F: Future<Output = std::result::Result<(), String>> + Send + 'static,
  {
    let tx = self.event_tx.clone();
    tokio::spawn(async move {
      let result = work.await;
      let _ = tx.send(Event::ActionDone { action, result });
    });
  }

  fn move_selection(&mut self, delta: i32) {
    let len = self.current_panel().rows().len();
    if len > 0 {
      self.selected = (self.selected as i32 + delta).rem_euclid(len as i32) as usize;
    }
  }

  fn clamp_selection(&mut self) {
    let len = self.current_panel().rows().len();
    self.selected = self.selected.min(len.saturating_sub(1));
  }

  fn selected_row(&self) -> Option<crate::hook::Row> {
    self.current_panel().rows().into_iter().nth(self.selected)
  }

  // Accessors for UI rendering
  pub fn current_panel(&self) -> &Arc<dyn ResourcePanel> {
    &self.panels[self.current]
  }

  pub fn selected(&self) -> usize {
    self.selected
  }

  pub fn mode(&self) -> &Mode {
    &self.mode
  }

  pub fn command_input(&self) -> &str {
    &self.command_input
  }

  pub fn title(&self) -> &str {
    &self.title
  }

  pub fn connectivity(&self) -> &ConnectivitySnapshot {
    &self.connectivity
  }

  pub fn status_message(&self) -> Option<(&str, bool)> {
    self
      .status
      .as_ref()
      .map(|(message, is_error)| (message.as_str(), *is_error))
  }

  pub fn autocomplete_suggestions(&self) -> Vec<&'static Command> {
    commands::get_suggestions(&self.command_input)
  }

  pub fn selected_suggestion(&self) -> usize {
    self.selected_suggestion
  }
}

fn resource_index(panels: &[Arc<dyn ResourcePanel>], name: &str) -> Option<usize> {
  let name = name.trim().to_lowercase();
  let resolved = commands::COMMANDS
    .iter()
    .find(|c| c.name == name || c.aliases.contains(&name.as_str()))
    .map(|c| c.name)
    .unwrap_or(name.as_str());
  panels.iter().position(|p| p.name() == resolved)
}
