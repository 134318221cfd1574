//! Review sessions over a deck.
//!
//! A [`Session`] is a plain value owned by whoever presents it. Every change
//! goes through a [`ReviewEngine`] method taking `&mut Session`; afterwards the
//! caller re-reads state through the getters or [`ReviewEngine::view`].

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::deck_source::DeckSource;
use crate::error::{PersistenceWarning, ReviewError};
use crate::models::{CardUpdate, Deck, Difficulty, Flashcard, Grade};
use crate::persistence::CardUpdateSink;
use crate::srs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub studied: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub started_at: DateTime<Utc>,
}

impl SessionStats {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            studied: 0,
            correct: 0,
            incorrect: 0,
            started_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    deck: Deck,
    initial_order: Vec<usize>,
    order: Vec<usize>, // indices into deck.cards
    cursor: usize,
    revealed: bool,
    results: HashMap<String, Grade>,
    stats: SessionStats,
    completed: bool,
}

impl Session {
    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    pub fn deck_id(&self) -> &str {
        &self.deck.id
    }

    /// Card ids in presentation order.
    pub fn order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.deck.cards[i].id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn results(&self) -> &HashMap<String, Grade> {
        &self.results
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn current_card(&self) -> Result<&Flashcard, ReviewError> {
        if self.order.is_empty() {
            return Err(ReviewError::EmptyDeck);
        }
        self.order
            .get(self.cursor)
            .map(|&i| &self.deck.cards[i])
            .ok_or(ReviewError::InvalidState("session is completed"))
    }

    fn ensure_presentable(&self) -> Result<(), ReviewError> {
        if self.order.is_empty() {
            return Err(ReviewError::EmptyDeck);
        }
        if self.completed {
            return Err(ReviewError::InvalidState("session is completed"));
        }
        Ok(())
    }

    fn reset(&mut self, order: Vec<usize>, now: DateTime<Utc>) {
        self.completed = order.is_empty();
        self.order = order;
        self.cursor = 0;
        self.revealed = false;
        self.results.clear();
        self.stats = SessionStats::new(now);
    }
}

/// What a grade did to the current card.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeOutcome {
    pub card: Flashcard,
    pub completed: bool,
    pub warning: Option<PersistenceWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Percent of studied cards graded Good or Easy, 0..=100.
    pub accuracy: u32,
    pub cards_studied: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub elapsed_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntervalPreview {
    pub again: u32,
    pub hard: u32,
    pub good: u32,
    pub easy: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardView {
    pub id: String,
    pub front: String,
    /// Only present once revealed.
    pub back: Option<String>,
    pub difficulty: Difficulty,
    pub interval_preview: Option<IntervalPreview>,
}

/// Read-only projection handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub deck_id: String,
    pub deck_title: String,
    pub cursor: usize,
    pub position: usize,
    pub total: usize,
    pub progress_percent: u32,
    pub current_card: Option<CardView>,
    pub revealed: bool,
    pub stats: SessionStats,
    pub completed: bool,
    pub results: HashMap<String, Grade>,
}

pub struct ReviewEngine {
    config: SchedulingConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn CardUpdateSink>,
}

impl ReviewEngine {
    pub fn new(
        config: SchedulingConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn CardUpdateSink>,
    ) -> Self {
        Self { config, clock, sink }
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Starts a session over `deck`, in `order` if given (a subset of card ids
    /// is allowed) or the deck's own order otherwise.
    pub fn start_session(
        &self,
        deck: Deck,
        order: Option<&[String]>,
    ) -> Result<Session, ReviewError> {
        let order = match order {
            Some(ids) => resolve_order(&deck, ids)?,
            None => (0..deck.cards.len()).collect(),
        };

        info!(
            "Starting session on deck {} ({} of {} cards)",
            deck.id,
            order.len(),
            deck.cards.len()
        );
        if order.is_empty() {
            warn!("Deck {} has no cards to review", deck.id);
        }

        let now = self.clock.now();
        Ok(Session {
            deck,
            initial_order: order.clone(),
            completed: order.is_empty(),
            order,
            cursor: 0,
            revealed: false,
            results: HashMap::new(),
            stats: SessionStats::new(now),
        })
    }

    /// Fetches `deck_id` from `source` and starts a session on it.
    pub async fn start_from_source<S: DeckSource>(
        &self,
        source: &S,
        deck_id: &str,
        order: Option<&[String]>,
    ) -> Result<Session, ReviewError> {
        let deck = source.fetch_deck(deck_id).await?;
        self.start_session(deck, order)
    }

    pub fn reveal(&self, session: &mut Session) -> Result<(), ReviewError> {
        session.ensure_presentable()?;
        session.revealed = true;
        Ok(())
    }

    /// Grades the current card, reschedules it and moves on.
    ///
    /// The card is updated in memory before the update is handed to the sink;
    /// a refused hand-off comes back as a warning and changes nothing else.
    pub fn grade(
        &self,
        session: &mut Session,
        grade: Grade,
    ) -> Result<GradeOutcome, ReviewError> {
        session.ensure_presentable()?;
        if !session.revealed {
            return Err(ReviewError::InvalidState("answer has not been revealed"));
        }

        let now = self.clock.now();
        let index = session.order[session.cursor];
        let updated =
            srs::calculate_next_review(&session.deck.cards[index], grade, &self.config, now);
        session.deck.cards[index] = updated.clone();

        session.results.insert(updated.id.clone(), grade);
        session.stats.studied += 1;
        if grade.is_correct() {
            session.stats.correct += 1;
        } else {
            session.stats.incorrect += 1;
        }

        session.cursor += 1;
        session.revealed = false;
        if session.cursor == session.order.len() {
            session.completed = true;
            info!(
                "Session on deck {} completed: {}/{} correct",
                session.deck.id, session.stats.correct, session.stats.studied
            );
        }

        debug!(
            "Graded card {} as {:?}: interval {} ease {:.2} reps {}",
            updated.id, grade, updated.interval, updated.ease_factor, updated.repetitions
        );

        let warning = self
            .sink
            .card_updated(&CardUpdate {
                deck_id: session.deck.id.clone(),
                card: updated.clone(),
            })
            .err();
        if let Some(w) = &warning {
            warn!("{}", w);
        }

        Ok(GradeOutcome {
            card: updated,
            completed: session.completed,
            warning,
        })
    }

    /// Manual navigation. Clamped at both ends and never completes the session.
    pub fn advance(&self, session: &mut Session, direction: Direction) -> Result<(), ReviewError> {
        session.ensure_presentable()?;
        let last = session.order.len() - 1;
        session.cursor = match direction {
            Direction::Next => (session.cursor + 1).min(last),
            Direction::Previous => session.cursor.saturating_sub(1),
        };
        session.revealed = false;
        Ok(())
    }

    /// Reorders the session uniformly at random. Stats and results are kept.
    pub fn shuffle<R: Rng + ?Sized>(&self, session: &mut Session, rng: &mut R) {
        session.order.shuffle(rng);
        session.cursor = 0;
        session.revealed = false;
        session.completed = session.order.is_empty();
        debug!("Shuffled session on deck {}", session.deck.id);
    }

    /// Back to the start with the original order; results and stats cleared.
    pub fn restart(&self, session: &mut Session) {
        let order = session.initial_order.clone();
        session.reset(order, self.clock.now());
        info!("Restarted session on deck {}", session.deck.id);
    }

    pub fn summary(&self, session: &Session) -> Summary {
        let stats = &session.stats;
        let accuracy = if stats.studied == 0 {
            0
        } else {
            (stats.correct as f64 / stats.studied as f64 * 100.0).round() as u32
        };
        let elapsed_ms = (self.clock.now() - stats.started_at).num_milliseconds().max(0);

        Summary {
            accuracy,
            cards_studied: stats.studied,
            correct: stats.correct,
            incorrect: stats.incorrect,
            elapsed_minutes: (elapsed_ms as f64 / 60_000.0).round() as i64,
        }
    }

    pub fn view(&self, session: &Session) -> SessionView {
        let total = session.order.len();
        let current_card = session
            .order
            .get(session.cursor)
            .filter(|_| !session.completed)
            .map(|&i| self.card_view(&session.deck.cards[i], session.revealed));

        let progress_percent = if total == 0 || session.completed {
            100
        } else {
            ((session.cursor + 1) as f64 / total as f64 * 100.0).round() as u32
        };

        SessionView {
            deck_id: session.deck.id.clone(),
            deck_title: session.deck.title.clone(),
            cursor: session.cursor,
            position: (session.cursor + 1).min(total),
            total,
            progress_percent,
            current_card,
            revealed: session.revealed,
            stats: session.stats,
            completed: session.completed,
            results: session.results.clone(),
        }
    }

    fn card_view(&self, card: &Flashcard, revealed: bool) -> CardView {
        let interval_preview = revealed.then(|| {
            let [again, hard, good, easy] =
                srs::preview_intervals(card, &self.config, self.clock.now());
            IntervalPreview {
                again,
                hard,
                good,
                easy,
            }
        });

        CardView {
            id: card.id.clone(),
            front: card.front.clone(),
            back: revealed.then(|| card.back.clone()),
            difficulty: card.difficulty,
            interval_preview,
        }
    }
}

fn resolve_order(deck: &Deck, ids: &[String]) -> Result<Vec<usize>, ReviewError> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .map(|id| {
            if !seen.insert(id.as_str()) {
                return Err(ReviewError::DuplicateCard(id.clone()));
            }
            deck.position_of(id)
                .ok_or_else(|| ReviewError::UnknownCard(id.clone()))
        })
        .collect()
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
