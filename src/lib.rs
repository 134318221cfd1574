//! Flashcard review sessions with SM-2 style scheduling, served over HTTP.

pub mod api;
pub mod clock;
pub mod config;
pub mod data;
pub mod db;
pub mod deck_source;
pub mod error;
pub mod models;
pub mod persistence;
pub mod session;
pub mod srs;

pub use error::{PersistenceWarning, ReviewError};
pub use models::{Deck, Difficulty, Flashcard, Grade};
pub use session::{Direction, ReviewEngine, Session, SessionView, Summary};
