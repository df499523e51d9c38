use chrono::{Local, NaiveDate};
use std::fmt;

/// Source of "today" for date fields rendered without an explicit value.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to one calendar date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// en-US short date, the default rendering for an empty date field.
pub const DEFAULT_DATE_FORMAT: &str = "%m/%d/%Y";

pub(crate) struct DateFormat(String);

impl DateFormat {
    pub(crate) fn new(pattern: &str) -> Option<Self> {
        use chrono::format::{Item, StrftimeItems};
        if pattern.trim().is_empty() {
            return None;
        }
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return None;
        }
        Some(Self(pattern.to_string()))
    }

    pub(crate) fn render(&self, date: NaiveDate) -> String {
        date.format(&self.0).to_string()
    }
}

impl fmt::Debug for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DateFormat").field(&self.0).finish()
    }
}
