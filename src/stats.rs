use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use strum::IntoEnumIterator;
use time::Date;

use crate::entry::{DiaryEntry, Mood, Weather};

/// Aggregate figures over a set of entries, as shown by `diary stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    /// Every mood in declaration order, including the ones never used.
    pub moods: Vec<(Mood, usize)>,
    pub weather: Vec<(Weather, usize)>,
    pub untracked_mood: usize,
    /// Keyed by `YYYY-MM`; entries with unreadable dates are left out.
    pub per_month: BTreeMap<String, usize>,
    pub distinct_tags: usize,
    pub current_streak: u32,
}

impl Stats {
    pub fn from_entries(entries: &[DiaryEntry], today: Date) -> Self {
        let moods = Mood::iter()
            .map(|mood| {
                let count = entries.iter().filter(|e| e.mood == Some(mood)).count();
                (mood, count)
            })
            .collect();
        let weather = Weather::iter()
            .map(|kind| {
                let count = entries.iter().filter(|e| e.weather == Some(kind)).count();
                (kind, count)
            })
            .collect();

        let mut per_month = BTreeMap::new();
        let mut days = BTreeSet::new();
        for day in entries.iter().filter_map(DiaryEntry::day) {
            let key = format!("{:04}-{:02}", day.year(), u8::from(day.month()));
            *per_month.entry(key).or_insert(0) += 1;
            days.insert(day);
        }

        let distinct_tags = entries
            .iter()
            .flat_map(|e| e.tags.iter())
            .collect::<BTreeSet<_>>()
            .len();

        Self {
            total: entries.len(),
            moods,
            weather,
            untracked_mood: entries.iter().filter(|e| e.mood.is_none()).count(),
            per_month,
            distinct_tags,
            current_streak: streak_ending_near(&days, today),
        }
    }
}

/// Consecutive days with at least one entry, counted back from today, or from
/// yesterday when nothing has been written yet today.
fn streak_ending_near(days: &BTreeSet<Date>, today: Date) -> u32 {
    let start = if days.contains(&today) {
        Some(today)
    } else {
        today.previous_day().filter(|d| days.contains(d))
    };
    let mut streak = 0;
    let mut cursor = start;
    while let Some(day) = cursor.filter(|d| days.contains(d)) {
        streak += 1;
        cursor = day.previous_day();
    }
    streak
}
