use crate::config::SchedulingConfig;
use crate::models::{Difficulty, Flashcard, Grade};
use chrono::{DateTime, Utc};

/// Calculates a card's scheduling fields after a grade.
///
/// Again: repetitions reset, interval back to 1, ease drops by the again penalty.
/// Hard:  repetitions kept, interval grows by the hard multiplier, ease drops by
///        the hard penalty.
/// Good:  repetitions + 1, interval grows by the ease factor, ease unchanged.
/// Easy:  repetitions + 1, interval grows by ease * easy bonus, ease rises by
///        the easy bonus.
///
/// Ease never goes below `config.ease_floor`; interval stays within
/// `1..=config.max_interval`. `next_review` is `now + interval` in
/// `config.interval_unit`s, saturating at the latest representable instant.
pub fn calculate_next_review(
    card: &Flashcard,
    grade: Grade,
    config: &SchedulingConfig,
    now: DateTime<Utc>,
) -> Flashcard {
    let mut next = card.clone();
    let max = config.max_interval;

    match grade {
        Grade::Again => {
            next.repetitions = 0;
            next.interval = 1;
            next.ease_factor = card.ease_factor - config.again_ease_penalty;
            next.difficulty = Difficulty::Learning;
        }
        Grade::Hard => {
            next.interval = scale_interval(card.interval, config.hard_interval_multiplier, max);
            next.ease_factor = card.ease_factor - config.hard_ease_penalty;
            next.difficulty = Difficulty::Learning;
        }
        Grade::Good => {
            next.repetitions = card.repetitions.saturating_add(1);
            next.interval = scale_interval(card.interval, card.ease_factor, max);
            next.difficulty = if next.repetitions >= config.review_after_repetitions {
                Difficulty::Review
            } else {
                Difficulty::Learning
            };
        }
        Grade::Easy => {
            next.repetitions = card.repetitions.saturating_add(1);
            let factor = card.ease_factor * config.easy_interval_bonus;
            next.interval = scale_interval(card.interval, factor, max);
            next.ease_factor = card.ease_factor + config.easy_ease_bonus;
            next.difficulty = Difficulty::Review;
        }
    }

    // Cards loaded from elsewhere may carry an ease below the floor already.
    next.ease_factor = next.ease_factor.max(config.ease_floor);

    next.next_review = now
        .checked_add_signed(config.interval_unit.duration(next.interval))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    next.last_reviewed = Some(now);

    next
}

/// Interval each grade would produce, in `Grade::ALL` order.
pub fn preview_intervals(
    card: &Flashcard,
    config: &SchedulingConfig,
    now: DateTime<Utc>,
) -> [u32; 4] {
    Grade::ALL.map(|grade| calculate_next_review(card, grade, config, now).interval)
}

fn scale_interval(interval: u32, factor: f64, max: u32) -> u32 {
    let max = max.max(1);
    let scaled = (interval.clamp(1, max) as f64 * factor).round();
    if scaled >= max as f64 {
        max
    } else {
        (scaled as u32).max(1)
    }
}
