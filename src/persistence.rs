use log::{debug, error, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::db::Db;
use crate::error::PersistenceWarning;
use crate::models::CardUpdate;

/// Receives graded cards. Implementations must not block.
pub trait CardUpdateSink: Send + Sync {
    fn card_updated(&self, update: &CardUpdate) -> Result<(), PersistenceWarning>;
}

impl CardUpdateSink for UnboundedSender<CardUpdate> {
    fn card_updated(&self, update: &CardUpdate) -> Result<(), PersistenceWarning> {
        self.send(update.clone())
            .map_err(|_| PersistenceWarning::WriterUnavailable(update.card.id.clone()))
    }
}

/// Starts the background task that upserts graded cards into the store.
///
/// The task ends once every sender is dropped.
pub fn spawn_card_writer(db: Db) -> (UnboundedSender<CardUpdate>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_card_writer(db, rx));
    (tx, handle)
}

async fn run_card_writer(db: Db, mut rx: UnboundedReceiver<CardUpdate>) {
    while let Some(update) = rx.recv().await {
        match db.upsert_card(&update).await {
            Ok(true) => debug!("Stored card {} of deck {}", update.card.id, update.deck_id),
            Ok(false) => debug!(
                "Skipped stale update for card {} of deck {}",
                update.card.id, update.deck_id
            ),
            Err(e) => {
                let warning = PersistenceWarning::Storage {
                    card_id: update.card.id.clone(),
                    reason: e.to_string(),
                };
                warn!("{}", warning);
            }
        }
    }
    debug!("Card writer stopped");
}

/// Waits for the writer to drain its queue. Returns false if the task
/// panicked or was cancelled.
pub async fn join_card_writer(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!("Card writer task failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
pub(crate) use recording::RecordingSink;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulingConfig;
    use crate::deck_source::DeckSource;
    use crate::models::Flashcard;
    use chrono::Utc;

    fn update(id: &str) -> CardUpdate {
        CardUpdate {
            deck_id: "d1".into(),
            card: Flashcard::new(id, "q", "a", &SchedulingConfig::default(), Utc::now()),
        }
    }

    #[test]
    fn test_channel_sink_reports_closed_writer() {
        let (tx, rx) = mpsc::unbounded_channel::<CardUpdate>();
        assert!(tx.card_updated(&update("a")).is_ok());
        drop(rx);
        assert_eq!(
            tx.card_updated(&update("b")),
            Err(PersistenceWarning::WriterUnavailable("b".into()))
        );
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::default();
        sink.card_updated(&update("a")).unwrap();
        assert_eq!(sink.updates().len(), 1);

        let refusing = RecordingSink::refusing();
        assert!(refusing.card_updated(&update("a")).is_err());
        assert!(refusing.updates().is_empty());
    }

    #[tokio::test]
    async fn test_card_writer_stores_updates() {
        let db = Db::in_memory().await.unwrap();
        db.seed_database_if_empty().await.unwrap();
        let deck = db.list_decks().await.unwrap().remove(0);
        let mut stored = db.fetch_deck(&deck.id).await.unwrap();
        let mut card = stored.cards.remove(0);
        card.interval = 42;
        card.last_reviewed = Some(Utc::now());

        let (tx, handle) = spawn_card_writer(db.clone());
        tx.card_updated(&CardUpdate {
            deck_id: deck.id.clone(),
            card: card.clone(),
        })
        .unwrap();
        drop(tx);
        assert!(join_card_writer(handle).await);

        let reloaded = db.fetch_deck(&deck.id).await.unwrap();
        assert_eq!(reloaded.cards[0].interval, 42);
    }

    #[tokio::test]
    async fn test_join_reports_failed_writer() {
        let handle: JoinHandle<()> = tokio::spawn(async { panic!("disk on fire") });
        assert!(!join_card_writer(handle).await);

        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        assert!(!join_card_writer(handle).await);
    }
}
