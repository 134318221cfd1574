use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReviewError {
    #[error("deck has no cards")]
    EmptyDeck,
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
    #[error("deck '{0}' not found")]
    NotFound(String),
    #[error("card '{0}' is not part of the deck")]
    UnknownCard(String),
    #[error("card '{0}' appears more than once in the order")]
    DuplicateCard(String),
}

/// Non-fatal: the card was graded in memory but its update could not be handed off.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceWarning {
    #[error("card writer is not running; update for card '{0}' was dropped")]
    WriterUnavailable(String),
    #[error("failed to store card '{card_id}': {reason}")]
    Storage { card_id: String, reason: String },
}
