use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::SchedulingConfig;

/// Classification bucket for a card. Not a grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    New,
    Learning,
    Review,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::New => "new",
            Difficulty::Learning => "learning",
            Difficulty::Review => "review",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Difficulty::New),
            "learning" => Ok(Difficulty::Learning),
            "review" => Ok(Difficulty::Review),
            other => Err(anyhow::anyhow!("unknown difficulty '{}'", other)),
        }
    }
}

/// Self-reported recall quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Again,
    Hard,
    #[serde(alias = "medium")]
    Good,
    Easy,
}

impl Grade {
    pub const ALL: [Grade; 4] = [Grade::Again, Grade::Hard, Grade::Good, Grade::Easy];

    /// Good and Easy count as recalled; Again and Hard do not.
    pub fn is_correct(&self) -> bool {
        matches!(self, Grade::Good | Grade::Easy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flashcard {
    pub id: String,
    pub front: String,
    pub back: String,
    pub difficulty: Difficulty,
    pub interval: u32, // in `SchedulingConfig::interval_unit`s
    pub ease_factor: f64,
    pub repetitions: u32,
    pub next_review: DateTime<Utc>,
    pub last_reviewed: Option<DateTime<Utc>>,
}

impl Flashcard {
    /// A brand new card, due immediately.
    pub fn new(
        id: impl Into<String>,
        front: impl Into<String>,
        back: impl Into<String>,
        config: &SchedulingConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            front: front.into(),
            back: back.into(),
            difficulty: Difficulty::New,
            interval: config.initial_interval,
            ease_factor: config.initial_ease,
            repetitions: 0,
            next_review: now,
            last_reviewed: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deck {
    pub id: String,
    pub title: String,
    pub subject: String,
    pub description: String,
    pub cards: Vec<Flashcard>,
}

impl Deck {
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn position_of(&self, card_id: &str) -> Option<usize> {
        self.cards.iter().position(|c| c.id == card_id)
    }

    pub fn due_count(&self, now: DateTime<Utc>) -> usize {
        self.cards.iter().filter(|c| c.is_due(now)).count()
    }
}

/// Emitted once per graded card for the persistence collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct CardUpdate {
    pub deck_id: String,
    pub card: Flashcard,
}

/// A generated deck as it arrives for import: plain term/definition pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDeck {
    pub title: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub flashcards: Vec<NewFlashcard>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFlashcard {
    #[serde(alias = "front")]
    pub term: String,
    #[serde(alias = "back")]
    pub definition: String,
}

/// Dashboard row for a stored deck.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeckSummary {
    pub id: String,
    pub title: String,
    pub subject: String,
    pub description: String,
    pub card_count: i64,
    pub due_count: i64,
}
