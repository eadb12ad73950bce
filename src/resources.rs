//! Resource kinds managed by the console.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A document type stored in one backend collection.
pub trait Resource:
  Clone + std::fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
  /// Backend collection name, also used as the cache key
  const COLLECTION: &'static str;

  /// Human-readable label for lists
  fn title(&self) -> &str;

  /// Copy with a new label
  fn with_title(&self, title: &str) -> Self;

  /// New record with only a label filled in
  fn draft(title: &str) -> Self;

  /// Client-side validation before anything is sent or queued.
  fn validate(&self) -> Result<(), String> {
    if self.title().trim().is_empty() {
      Err(format!("{} need a title", Self::COLLECTION))
    } else {
      Ok(())
    }
  }

  /// Minimal dataset served when neither the backend nor the cache can help.
  fn fallback() -> Vec<Self> {
    Vec::new()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Year {
  pub name: String,
  #[serde(default)]
  pub order: u32,
}

impl Resource for Year {
  const COLLECTION: &'static str = "years";

  fn title(&self) -> &str {
    &self.name
  }

  fn with_title(&self, title: &str) -> Self {
    Self {
      name: title.to_string(),
      ..self.clone()
    }
  }

  fn draft(title: &str) -> Self {
    Self {
      name: title.to_string(),
      order: 0,
    }
  }

  fn fallback() -> Vec<Self> {
    ["First Year", "Second Year", "Third Year", "Fourth Year"]
      .iter()
      .zip(1..)
      .map(|(name, order)| Year {
        name: name.to_string(),
        order,
      })
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
  pub name: String,
  #[serde(default)]
  pub year_id: Option<String>,
}

impl Resource for Subject {
  const COLLECTION: &'static str = "subjects";

  fn title(&self) -> &str {
    &self.name
  }

  fn with_title(&self, title: &str) -> Self {
    Self {
      name: title.to_string(),
      ..self.clone()
    }
  }

  fn draft(title: &str) -> Self {
    Self {
      name: title.to_string(),
      year_id: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lecture {
  pub title: String,
  #[serde(default)]
  pub subject_id: Option<String>,
  #[serde(default)]
  pub video_url: Option<String>,
}

impl Resource for Lecture {
  const COLLECTION: &'static str = "lectures";

  fn title(&self) -> &str {
    &self.title
  }

  fn with_title(&self, title: &str) -> Self {
    Self {
      title: title.to_string(),
      ..self.clone()
    }
  }

  fn draft(title: &str) -> Self {
    Self {
      title: title.to_string(),
      subject_id: None,
      video_url: None,
    }
  }

  fn validate(&self) -> Result<(), String> {
    if self.title.trim().is_empty() {
      return Err("lectures need a title".to_string());
    }
    match &self.video_url {
      Some(url) if url::Url::parse(url).is_err() => Err(format!("invalid video URL: {}", url)),
      _ => Ok(()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
  pub title: String,
  #[serde(default)]
  pub author: Option<String>,
  /// Price in minor currency units
  #[serde(default)]
  pub price: u64,
}

impl Resource for Book {
  const COLLECTION: &'static str = "books";

  fn title(&self) -> &str {
    &self.title
  }

  fn with_title(&self, title: &str) -> Self {
    Self {
      title: title.to_string(),
      ..self.clone()
    }
  }

  fn draft(title: &str) -> Self {
    Self {
      title: title.to_string(),
      author: None,
      price: 0,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
  pub name: String,
  #[serde(default)]
  pub price: u64,
  #[serde(default)]
  pub stock: u32,
}

impl Resource for Product {
  const COLLECTION: &'static str = "products";

  fn title(&self) -> &str {
    &self.name
  }

  fn with_title(&self, title: &str) -> Self {
    Self {
      name: title.to_string(),
      ..self.clone()
    }
  }

  fn draft(title: &str) -> Self {
    Self {
      name: title.to_string(),
      price: 0,
      stock: 0,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
  pub title: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub published_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Resource for NewsItem {
  const COLLECTION: &'static str = "news";

  fn title(&self) -> &str {
    &self.title
  }

  fn with_title(&self, title: &str) -> Self {
    Self {
      title: title.to_string(),
      ..self.clone()
    }
  }

  fn draft(title: &str) -> Self {
    Self {
      title: title.to_string(),
      body: String::new(),
      published_at: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Professor {
  pub name: String,
  #[serde(default)]
  pub department: Option<String>,
}

impl Resource for Professor {
  const COLLECTION: &'static str = "professors";

  fn title(&self) -> &str {
    &self.name
  }

  fn with_title(&self, title: &str) -> Self {
    Self {
      name: title.to_string(),
      ..self.clone()
    }
  }

  fn draft(title: &str) -> Self {
    Self {
      name: title.to_string(),
      department: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
  pub title: String,
  #[serde(default)]
  pub lecture_id: Option<String>,
  #[serde(default)]
  pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
  pub prompt: String,
  pub choices: Vec<String>,
  pub answer: usize,
}

impl Resource for Quiz {
  const COLLECTION: &'static str = "quizzes";

  fn title(&self) -> &str {
    &self.title
  }

  fn with_title(&self, title: &str) -> Self {
    Self {
      title: title.to_string(),
      ..self.clone()
    }
  }

  fn draft(title: &str) -> Self {
    Self {
      title: title.to_string(),
      lecture_id: None,
      questions: Vec::new(),
    }
  }

  fn validate(&self) -> Result<(), String> {
    if self.title.trim().is_empty() {
      return Err("quizzes need a title".to_string());
    }
    for (i, q) in self.questions.iter().enumerate() {
      if q.answer >= q.choices.len() {
        return Err(format!("question {} has no valid answer", i + 1));
      }
    }
    Ok(())
  }
}
