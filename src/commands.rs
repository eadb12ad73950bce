/// Available commands and autocomplete logic

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "years",
    aliases: &["y", "year"],
    description: "Academic years",
  },
  Command {
    name: "subjects",
    aliases: &["s", "subject"],
    description: "Subjects per year",
  },
  Command {
    name: "lectures",
    aliases: &["l", "lecture"],
    description: "Recorded lectures",
  },
  Command {
    name: "books",
    aliases: &["b", "book"],
    description: "Library books",
  },
  Command {
    name: "products",
    aliases: &["p", "product", "shop"],
    description: "Shop products",
  },
  Command {
    name: "news",
    aliases: &["n", "announcements"],
    description: "News and announcements",
  },
  Command {
    name: "professors",
    aliases: &["prof", "professor", "staff"],
    description: "Teaching staff",
  },
  Command {
    name: "quizzes",
    aliases: &["quiz", "exams"],
    description: "Quizzes",
  },
  Command {
    name: "retry",
    aliases: &["r", "reconnect"],
    description: "Retry the backend connection",
  },
  Command {
    name: "clear-cache",
    aliases: &["cc", "clear"],
    description: "Drop cached data for this resource",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit acon",
  },
];

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.trim().to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    let priority = if cmd.name == input_lower {
      0
    } else if cmd.aliases.contains(&input_lower.as_str()) {
      1
    } else if cmd.name.starts_with(&input_lower) {
      2
    } else if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      3
    } else if cmd.name.contains(&input_lower) {
      4
    } else if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      5
    } else {
      continue;
    };
    matches.push((cmd, priority));
  }

  // Stable sort keeps declaration order within a priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_match() {
    let suggestions = get_suggestions("books");
    assert_eq!(suggestions[0].name, "books");
  }

  #[test]
  fn test_alias_beats_prefix() {
    // "p" is an alias of products and a prefix of professors
    let suggestions = get_suggestions("p");
    assert_eq!(suggestions[0].name, "products");
    assert!(suggestions.iter().any(|c| c.name == "professors"));
  }

  #[test]
  fn test_prefix_match() {
    let suggestions = get_suggestions("lec");
    assert_eq!(suggestions[0].name, "lectures");
  }

  #[test]
  fn test_fuzzy_match() {
    let suggestions = get_suggestions("cache");
    assert_eq!(suggestions[0].name, "clear-cache");
  }

  #[test]
  fn test_no_match() {
    assert!(get_suggestions("zzz").is_empty());
  }
}
