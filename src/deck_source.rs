use std::collections::HashMap;
use std::future::Future;

use crate::error::ReviewError;
use crate::models::Deck;

/// Supplies complete deck snapshots by id.
pub trait DeckSource {
    fn fetch_deck(&self, deck_id: &str) -> impl Future<Output = Result<Deck, ReviewError>> + Send;
}

/// Decks held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDeckSource {
    decks: HashMap<String, Deck>,
}

impl InMemoryDeckSource {
    pub fn new(decks: impl IntoIterator<Item = Deck>) -> Self {
        Self {
            decks: decks.into_iter().map(|d| (d.id.clone(), d)).collect(),
        }
    }

    pub fn insert(&mut self, deck: Deck) {
        self.decks.insert(deck.id.clone(), deck);
    }
}

impl DeckSource for InMemoryDeckSource {
    async fn fetch_deck(&self, deck_id: &str) -> Result<Deck, ReviewError> {
        self.decks
            .get(deck_id)
            .cloned()
            .ok_or_else(|| ReviewError::NotFound(deck_id.to_string()))
    }
}
