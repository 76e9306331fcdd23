//! Next-occurrence arithmetic for recurring tasks
//!
//! Anchored at the previous due date, never at "now", so a task rolled
//! over late does not drift.

use chrono::{DateTime, Duration, Months, Utc};

use crate::model::{Frequency, RecurrenceRule};

/// Next due date after `due` under `rule`
///
/// Monthly steps keep the time of day and clamp the day of month to the
/// end of a shorter target month. An absent due date stays absent, as
/// does a date past the representable range.
pub fn next_due(due: Option<DateTime<Utc>>, rule: &RecurrenceRule) -> Option<DateTime<Utc>> {
    let due = due?;
    let interval = rule.interval.max(1);
    match rule.frequency {
        Frequency::Daily => due.checked_add_signed(Duration::days(i64::from(interval))),
        Frequency::Weekly => due.checked_add_signed(Duration::days(7 * i64::from(interval))),
        Frequency::Monthly => due.checked_add_months(Months::new(interval)),
    }
}
