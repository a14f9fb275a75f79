//! Day buckets and time-windowed runs for rendering a thread.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{NaiveDate, TimeZone};

use crate::models::Message;
use crate::utils::temp_id_millis;

#[derive(Debug, Clone, PartialEq)]
pub struct DayGroup {
    pub date: NaiveDate,
    /// Runs of messages with no gap of `group_gap` or more between neighbours
    pub groups: Vec<Vec<Arc<Message>>>,
}

/// One rendered block: a time group tagged with its day
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayUnit {
    pub date: NaiveDate,
    pub group: Vec<Arc<Message>>,
}

/// Order by `created_at`, then by the time embedded in temp ids, then by id
pub fn compare_chronologically(a: &Message, b: &Message) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| {
            let a_ms = a.temp_id.as_deref().and_then(temp_id_millis);
            let b_ms = b.temp_id.as_deref().and_then(temp_id_millis);
            a_ms.cmp(&b_ms)
        })
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_chronologically(messages: &mut [Arc<Message>]) {
    messages.sort_by(|a, b| compare_chronologically(a, b));
}

/// Bucket a chronologically ordered list by calendar day in `tz`, then split
/// each day wherever two consecutive messages are `gap` or more apart.
///
/// The gap is measured from the last message placed in the open group, so a
/// group may span longer than `gap` end to end.
pub fn group_by_day<Tz: TimeZone>(
    messages: &[Arc<Message>],
    gap: chrono::Duration,
    tz: &Tz,
) -> Vec<DayGroup> {
    let mut days: Vec<DayGroup> = Vec::new();

    for msg in messages {
        let date = msg.created_at.with_timezone(tz).date_naive();

        if days.last().map_or(true, |day| day.date != date) {
            days.push(DayGroup {
                date,
                groups: Vec::new(),
            });
        }
        let Some(day) = days.last_mut() else {
            continue;
        };

        match day.groups.last_mut() {
            Some(group)
                if group
                    .last()
                    .is_some_and(|prev| msg.created_at - prev.created_at < gap) =>
            {
                group.push(msg.clone());
            }
            _ => day.groups.push(vec![msg.clone()]),
        }
    }

    days
}

/// Flattened `{date, group}` units, newest first for an inverted list
pub fn display_units<Tz: TimeZone>(
    messages: &[Arc<Message>],
    gap: chrono::Duration,
    tz: &Tz,
) -> Vec<DisplayUnit> {
    let mut units: Vec<DisplayUnit> = group_by_day(messages, gap, tz)
        .into_iter()
        .flat_map(|day| {
            let date = day.date;
            day.groups
                .into_iter()
                .map(move |group| DisplayUnit { date, group })
        })
        .collect();
    units.reverse();
    units
}

/// True if `group[index]` opens a run of messages by the same sender
/// (where the avatar is drawn)
pub fn starts_sender_run(group: &[Arc<Message>], index: usize) -> bool {
    match (index.checked_sub(1).and_then(|i| group.get(i)), group.get(index)) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(prev), Some(current)) => prev.sender_id != current.sender_id,
    }
}
