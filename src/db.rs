use chrono::{DateTime, Utc};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, Pool, Row, Sqlite};
use std::str::FromStr;
use uuid::Uuid;

use crate::config::SchedulingConfig;
use crate::data::demo_deck;
use crate::deck_source::DeckSource;
use crate::error::ReviewError;
use crate::models::{CardUpdate, Deck, DeckSummary, Difficulty, Flashcard, NewDeck};

/// 9999-12-31T23:59:59Z. Timestamps are stored as RFC 3339 text and compared
/// as strings, which only orders correctly for four digit years.
const MAX_STORED_SECS: i64 = 253_402_300_799;

fn storable(ts: DateTime<Utc>) -> DateTime<Utc> {
    match DateTime::from_timestamp(MAX_STORED_SECS, 0) {
        Some(max) if ts > max => max,
        _ => ts,
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for Flashcard {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let difficulty: String = row.try_get("difficulty")?;
        let difficulty = difficulty
            .parse::<Difficulty>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        let interval: i64 = row.try_get("interval")?;
        let repetitions: i64 = row.try_get("repetitions")?;

        Ok(Flashcard {
            id: row.try_get("card_id")?,
            front: row.try_get("front")?,
            back: row.try_get("back")?,
            difficulty,
            interval: interval.clamp(1, u32::MAX as i64) as u32,
            ease_factor: row.try_get("ease_factor")?,
            repetitions: repetitions.clamp(0, u32::MAX as i64) as u32,
            next_review: row.try_get("next_review")?,
            last_reviewed: row.try_get("last_reviewed")?,
        })
    }
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .log_statements(log::LevelFilter::Trace);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let db = Db { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// A private in-memory database on a single connection.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .log_statements(log::LevelFilter::Trace);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Db { pool };
        db.migrate().await?;

        Ok(db)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                deck_id TEXT NOT NULL REFERENCES decks(id) ON DELETE CASCADE,
                card_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                front TEXT NOT NULL,
                back TEXT NOT NULL,
                difficulty TEXT NOT NULL DEFAULT 'new',
                interval INTEGER NOT NULL DEFAULT 1,
                ease_factor REAL NOT NULL DEFAULT 2.5,
                repetitions INTEGER NOT NULL DEFAULT 0,
                next_review DATETIME NOT NULL,
                last_reviewed DATETIME,
                PRIMARY KEY (deck_id, card_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn seed_database_if_empty(&self) -> anyhow::Result<()> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM decks")
            .fetch_one(&self.pool)
            .await?;

        if count == 0 {
            let deck = demo_deck(Utc::now());
            self.insert_deck(&deck).await?;
            info!("Seeded demo deck '{}' ({} cards)", deck.title, deck.cards.len());
        }
        Ok(())
    }

    pub async fn insert_deck(&self, deck: &Deck) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO decks (id, title, subject, description) VALUES (?, ?, ?, ?)")
            .bind(&deck.id)
            .bind(&deck.title)
            .bind(&deck.subject)
            .bind(&deck.description)
            .execute(&mut *tx)
            .await?;

        for (position, card) in deck.cards.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO cards (deck_id, card_id, position, front, back, difficulty,
                                   interval, ease_factor, repetitions, next_review, last_reviewed)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&deck.id)
            .bind(&card.id)
            .bind(position as i64)
            .bind(&card.front)
            .bind(&card.back)
            .bind(card.difficulty.as_str())
            .bind(card.interval as i64)
            .bind(card.ease_factor)
            .bind(card.repetitions as i64)
            .bind(storable(card.next_review))
            .bind(card.last_reviewed.map(storable))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Stores a generated deck with fresh ids and default scheduling state.
    pub async fn import_deck(
        &self,
        new_deck: NewDeck,
        config: &SchedulingConfig,
    ) -> anyhow::Result<Deck> {
        let now = Utc::now();
        let deck = Deck {
            id: Uuid::new_v4().to_string(),
            title: new_deck.title,
            subject: new_deck.subject,
            description: new_deck.description,
            cards: new_deck
                .flashcards
                .into_iter()
                .map(|c| {
                    Flashcard::new(Uuid::new_v4().to_string(), c.term, c.definition, config, now)
                })
                .collect(),
        };

        self.insert_deck(&deck).await?;
        info!("Imported deck '{}' ({} cards)", deck.title, deck.cards.len());

        Ok(deck)
    }

    pub async fn get_deck(&self, deck_id: &str) -> anyhow::Result<Option<Deck>> {
        let row = sqlx::query("SELECT id, title, subject, description FROM decks WHERE id = ?")
            .bind(deck_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let cards = sqlx::query_as::<_, Flashcard>(
            "SELECT * FROM cards WHERE deck_id = ? ORDER BY position ASC",
        )
        .bind(deck_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Deck {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            subject: row.try_get("subject")?,
            description: row.try_get("description")?,
            cards,
        }))
    }

    /// Writes a graded card's scheduling fields.
    ///
    /// Returns false when the stored card was reviewed more recently than
    /// `update`, so repeated or reordered deliveries leave the newest state.
    pub async fn upsert_card(&self, update: &CardUpdate) -> anyhow::Result<bool> {
        let card = &update.card;
        let last_reviewed = card.last_reviewed.map(storable);
        let result = sqlx::query(
            r#"
            UPDATE cards SET
                difficulty = ?, interval = ?, ease_factor = ?, repetitions = ?,
                next_review = ?, last_reviewed = ?
            WHERE deck_id = ? AND card_id = ?
              AND (last_reviewed IS NULL OR ? IS NULL OR last_reviewed <= ?)
            "#,
        )
        .bind(card.difficulty.as_str())
        .bind(card.interval as i64)
        .bind(card.ease_factor)
        .bind(card.repetitions as i64)
        .bind(storable(card.next_review))
        .bind(last_reviewed)
        .bind(&update.deck_id)
        .bind(&card.id)
        .bind(last_reviewed)
        .bind(last_reviewed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: i64 =
            sqlx::query_scalar("SELECT count(*) FROM cards WHERE deck_id = ? AND card_id = ?")
                .bind(&update.deck_id)
                .bind(&card.id)
                .fetch_one(&self.pool)
                .await?;
        if exists > 0 {
            return Ok(false);
        }

        anyhow::bail!("card {} of deck {} is not stored", card.id, update.deck_id)
    }

    pub async fn list_decks(&self) -> anyhow::Result<Vec<DeckSummary>> {
        self.list_decks_at(Utc::now()).await
    }

    pub async fn list_decks_at(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<DeckSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.title, d.subject, d.description,
                   count(c.card_id) AS card_count,
                   coalesce(sum(CASE WHEN c.next_review <= ? THEN 1 ELSE 0 END), 0) AS due_count
            FROM decks d
            LEFT JOIN cards c ON c.deck_id = d.id
            GROUP BY d.id
            ORDER BY d.created_at ASC, d.title ASC
            "#,
        )
        .bind(storable(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DeckSummary {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    subject: row.try_get("subject")?,
                    description: row.try_get("description")?,
                    card_count: row.try_get("card_count")?,
                    due_count: row.try_get("due_count")?,
                })
            })
            .collect()
    }
}

impl DeckSource for Db {
    async fn fetch_deck(&self, deck_id: &str) -> Result<Deck, ReviewError> {
        match self.get_deck(deck_id).await {
            Ok(Some(deck)) => Ok(deck),
            Ok(None) => Err(ReviewError::NotFound(deck_id.to_string())),
            Err(e) => {
                log::error!("Failed to load deck {}: {:#}", deck_id, e);
                Err(ReviewError::NotFound(deck_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DEMO_CARDS, DEMO_DECK_ID};
    use crate::models::NewFlashcard;
    use chrono::Duration;

    async fn seeded() -> Db {
        let db = Db::in_memory().await.unwrap();
        db.seed_database_if_empty().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_seed_once() {
        let db = seeded().await;
        db.seed_database_if_empty().await.unwrap();

        let decks = db.list_decks().await.unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0].id, DEMO_DECK_ID);
        assert_eq!(decks[0].card_count, DEMO_CARDS.len() as i64);
        assert_eq!(decks[0].due_count, DEMO_CARDS.len() as i64);
    }

    #[tokio::test]
    async fn test_fetch_deck_keeps_order_and_fields() {
        let db = seeded().await;
        let deck = db.fetch_deck(DEMO_DECK_ID).await.unwrap();

        let ids: Vec<&str> = deck.cards.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2", "f3", "f4", "f5", "f6"]);
        assert_eq!(deck.cards[2].difficulty, Difficulty::Review);
        assert_eq!(deck.cards[2].ease_factor, 2.8);
        assert_eq!(deck.cards[5].interval, 14);
    }

    #[tokio::test]
    async fn test_fetch_missing_deck() {
        let db = seeded().await;
        assert_eq!(
            db.fetch_deck("nope").await,
            Err(ReviewError::NotFound("nope".into()))
        );
    }

    #[tokio::test]
    async fn test_upsert_ignores_stale_updates() {
        let db = seeded().await;
        let deck = db.fetch_deck(DEMO_DECK_ID).await.unwrap();
        let now = Utc::now();

        let mut newer = deck.cards[0].clone();
        newer.interval = 9;
        newer.last_reviewed = Some(now);
        let mut older = deck.cards[0].clone();
        older.interval = 4;
        older.last_reviewed = Some(now - Duration::minutes(1));

        let update = |card: Flashcard| CardUpdate {
            deck_id: DEMO_DECK_ID.to_string(),
            card,
        };

        assert!(db.upsert_card(&update(newer.clone())).await.unwrap());
        // duplicate delivery is harmless
        assert!(db.upsert_card(&update(newer.clone())).await.unwrap());
        assert!(!db.upsert_card(&update(older)).await.unwrap());

        let stored = db.fetch_deck(DEMO_DECK_ID).await.unwrap();
        assert_eq!(stored.cards[0].interval, 9);
        assert_eq!(stored.cards[0].last_reviewed, Some(now));
    }

    #[tokio::test]
    async fn test_upsert_unknown_card_fails() {
        let db = seeded().await;
        let card = Flashcard::new("ghost", "q", "a", &SchedulingConfig::default(), Utc::now());
        let result = db
            .upsert_card(&CardUpdate {
                deck_id: DEMO_DECK_ID.to_string(),
                card,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_far_future_review_is_not_due() {
        let db = seeded().await;
        let deck = db.fetch_deck(DEMO_DECK_ID).await.unwrap();
        let now = Utc::now();

        let mut card = deck.cards[0].clone();
        // lands past year 9999
        card.next_review = now + Duration::days(5_998_626);
        card.last_reviewed = Some(now);
        assert!(db
            .upsert_card(&CardUpdate {
                deck_id: DEMO_DECK_ID.to_string(),
                card,
            })
            .await
            .unwrap());

        let decks = db.list_decks().await.unwrap();
        assert_eq!(decks[0].due_count, DEMO_CARDS.len() as i64 - 1);

        let stored = db.fetch_deck(DEMO_DECK_ID).await.unwrap();
        assert_eq!(stored.cards[0].next_review.timestamp(), MAX_STORED_SECS);
        assert!(!stored.cards[0].is_due(now));
    }

    #[tokio::test]
    async fn test_import_and_due_counts() {
        let db = Db::in_memory().await.unwrap();
        let config = SchedulingConfig::default();
        let deck = db
            .import_deck(
                NewDeck {
                    title: "Biology".into(),
                    subject: "Science".into(),
                    description: String::new(),
                    flashcards: vec![
                        NewFlashcard {
                            term: "Cell".into(),
                            definition: "Basic unit of life".into(),
                        },
                        NewFlashcard {
                            term: "DNA".into(),
                            definition: "Carrier of genetic information".into(),
                        },
                    ],
                },
                &config,
            )
            .await
            .unwrap();

        let mut card = deck.cards[1].clone();
        card.next_review = Utc::now() + Duration::days(5);
        card.last_reviewed = Some(Utc::now());
        db.upsert_card(&CardUpdate {
            deck_id: deck.id.clone(),
            card,
        })
        .await
        .unwrap();

        let decks = db.list_decks().await.unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0].card_count, 2);
        assert_eq!(decks[0].due_count, 1);

        let stored = db.fetch_deck(&deck.id).await.unwrap();
        assert_eq!(stored.cards[0].front, "Cell");
        assert_eq!(stored.cards[0].difficulty, Difficulty::New);
        assert_eq!(stored.cards[0].ease_factor, config.initial_ease);
    }
}
