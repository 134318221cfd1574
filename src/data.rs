use chrono::{DateTime, Utc};

use crate::models::{Deck, Difficulty, Flashcard};

pub struct DemoCard {
    pub id: &'static str,
    pub front: &'static str,
    pub back: &'static str,
    pub difficulty: Difficulty,
    pub interval: u32,
    pub ease_factor: f64,
    pub repetitions: u32,
}

pub const DEMO_DECK_ID: &str = "cs-fundamentals";

pub const DEMO_CARDS: &[DemoCard] = &[
    DemoCard {
        id: "f1",
        front: "What is an Algorithm?",
        back: "A step-by-step procedure for solving a problem: a finite sequence of well-defined instructions a computer can execute.",
        difficulty: Difficulty::New,
        interval: 1,
        ease_factor: 2.5,
        repetitions: 0,
    },
    DemoCard {
        id: "f2",
        front: "Define Big O Notation",
        back: "An upper bound on an algorithm's growth in time or space as the input size grows, used to compare efficiency.",
        difficulty: Difficulty::Learning,
        interval: 3,
        ease_factor: 2.3,
        repetitions: 1,
    },
    DemoCard {
        id: "f3",
        front: "What is a Data Structure?",
        back: "A way of organizing and storing data so it can be accessed and modified efficiently, e.g. arrays, linked lists, trees and graphs.",
        difficulty: Difficulty::Review,
        interval: 7,
        ease_factor: 2.8,
        repetitions: 3,
    },
    DemoCard {
        id: "f4",
        front: "Explain Recursion",
        back: "A function solving a problem by calling itself on a smaller instance, with a base case that stops the recursion.",
        difficulty: Difficulty::New,
        interval: 1,
        ease_factor: 2.5,
        repetitions: 0,
    },
    DemoCard {
        id: "f5",
        front: "What is Object-Oriented Programming?",
        back: "A paradigm built around objects bundling data and methods; key ideas are encapsulation, inheritance, polymorphism and abstraction.",
        difficulty: Difficulty::Learning,
        interval: 2,
        ease_factor: 2.4,
        repetitions: 1,
    },
    DemoCard {
        id: "f6",
        front: "Define Binary Search",
        back: "Finding a target in a sorted array by repeatedly halving the search range around the middle element.",
        difficulty: Difficulty::Review,
        interval: 14,
        ease_factor: 3.0,
        repetitions: 4,
    },
];

/// The built-in deck, every card due at `now`.
pub fn demo_deck(now: DateTime<Utc>) -> Deck {
    Deck {
        id: DEMO_DECK_ID.to_string(),
        title: "Computer Science Fundamentals".to_string(),
        subject: "Computer Science".to_string(),
        description: "Essential concepts and definitions in computer science".to_string(),
        cards: DEMO_CARDS
            .iter()
            .map(|c| Flashcard {
                id: c.id.to_string(),
                front: c.front.to_string(),
                back: c.back.to_string(),
                difficulty: c.difficulty,
                interval: c.interval,
                ease_factor: c.ease_factor,
                repetitions: c.repetitions,
                next_review: now,
                last_reviewed: None,
            })
            .collect(),
    }
}
