//! Epochs: calendar-aligned recurring intervals and their boundary predicates.
//!
//! An [`Epoch`] decides whether two instants straddle the start of a new
//! interval. Every predicate has the same shape:
//!
//! 1. Order the two instants.
//! 2. If they are at least `max_duration` apart, a boundary lies between them.
//! 3. Otherwise compare the bucket index of each instant (month number,
//!    Sunday-started week number, day number, or fixed hour bucket).
//!
//! All buckets are computed in UTC, so fractional-hour epochs align with
//! midnight UTC. Predicates are pure functions of their inputs and never
//! read the wall clock.
//!
//! The [`Catalog`] holds the epochs served by the announcer, sorted by
//! descending `max_duration`. It is built once and shared by reference.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::SelectError;

/// A bucket length in whole hours that divides a day evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourSpan(u32);

impl HourSpan {
    pub const ONE: Self = Self(1);
    pub const TWO: Self = Self(2);
    pub const FOUR: Self = Self(4);
    pub const EIGHT: Self = Self(8);

    /// Accepts 1, 2, 3, 4, 6, 8, 12 and 24.
    pub fn new(hours: u32) -> Result<Self, SelectError> {
        if hours == 0 || 24 % hours != 0 {
            return Err(SelectError::InvalidHourSpan(hours));
        }
        Ok(Self(hours))
    }

    pub fn hours(self) -> u32 {
        self.0
    }
}

/// Bucket strategy used by an epoch's boundary predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Calendar month.
    Month,
    /// Week starting on Sunday.
    Week,
    /// Calendar day.
    Day,
    /// Fixed buckets starting at midnight.
    Hours(HourSpan),
}

impl Boundary {
    fn bucket(&self, t: &DateTime<Utc>) -> i64 {
        // Day 1 (0001-01-01) was a Monday, so multiples of 7 are Sundays.
        let day = i64::from(t.num_days_from_ce());
        match *self {
            Boundary::Month => i64::from(t.year()) * 12 + i64::from(t.month0()),
            Boundary::Week => day.div_euclid(7),
            Boundary::Day => day,
            Boundary::Hours(HourSpan(n)) => day * i64::from(24 / n) + i64::from(t.hour() / n),
        }
    }
}

/// The time window bounding one selection call: `(start, now]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Basis {
    start: DateTime<Utc>,
    now: DateTime<Utc>,
}

impl Basis {
    /// Creates a basis. `start` must be strictly before `now`.
    pub fn new(start: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self, SelectError> {
        if start >= now {
            return Err(SelectError::InvalidBasis { start, now });
        }
        Ok(Self { start, now })
    }

    /// The default window ending at `now`: twice the catalog's longest epoch.
    pub fn ending_at(now: DateTime<Utc>, catalog: &Catalog) -> Self {
        let span = catalog
            .longest()
            .map(|e| e.max_duration * 2)
            .unwrap_or_else(|| Duration::days(1));
        Self {
            start: now - span,
            now,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Whether `t` lies in `(start, now]`.
    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        self.start < *t && *t <= self.now
    }
}

/// A recurring interval with a boundary predicate.
#[derive(Debug, Clone)]
pub struct Epoch {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub boundary: Boundary,
}

impl PartialEq for Epoch {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Epoch {}

impl Epoch {
    pub fn monthly() -> Self {
        Self {
            id: "monthly",
            label: "Monthly",
            description: "Changes at the beginning of every calendar month (UTC)",
            min_duration: Duration::days(28),
            max_duration: Duration::days(31),
            boundary: Boundary::Month,
        }
    }

    pub fn weekly() -> Self {
        Self {
            id: "weekly",
            label: "Weekly",
            description: "Changes at the beginning of every week, starting Sunday (UTC)",
            min_duration: Duration::days(7),
            max_duration: Duration::days(7),
            boundary: Boundary::Week,
        }
    }

    pub fn daily() -> Self {
        Self {
            id: "daily",
            label: "Daily",
            description: "Changes at the beginning of every day (UTC)",
            min_duration: Duration::days(1),
            max_duration: Duration::days(1),
            boundary: Boundary::Day,
        }
    }

    pub fn eight_hourly() -> Self {
        Self::n_hourly(
            HourSpan::EIGHT,
            "eight_hourly",
            "Eight-hourly",
            "Changes every eight hours, starting at midnight (UTC)",
        )
    }

    pub fn four_hourly() -> Self {
        Self::n_hourly(
            HourSpan::FOUR,
            "four_hourly",
            "Four-hourly",
            "Changes every four hours, starting at midnight (UTC)",
        )
    }

    pub fn two_hourly() -> Self {
        Self::n_hourly(
            HourSpan::TWO,
            "two_hourly",
            "Two-hourly",
            "Changes every two hours, starting at midnight (UTC)",
        )
    }

    pub fn hourly() -> Self {
        Self::n_hourly(HourSpan::ONE, "hourly", "Hourly", "Changes at the beginning of every hour")
    }

    /// An epoch of fixed `span`-hour buckets aligned with midnight UTC.
    pub fn n_hourly(
        span: HourSpan,
        id: &'static str,
        label: &'static str,
        description: &'static str,
    ) -> Self {
        let period = Duration::hours(i64::from(span.hours()));
        Self {
            id,
            label,
            description,
            min_duration: period,
            max_duration: period,
            boundary: Boundary::Hours(span),
        }
    }

    /// Whether a new instance of this epoch begins between `prev` and `next`.
    ///
    /// Symmetric in `prev` and `next`. The basis is accepted for predicates
    /// that need an anchor; the built-in boundaries ignore it.
    pub fn is_epochal(&self, prev: &DateTime<Utc>, next: &DateTime<Utc>, _basis: &Basis) -> bool {
        let (earlier, later) = if prev <= next {
            (prev, next)
        } else {
            (next, prev)
        };
        if *later - *earlier >= self.max_duration {
            return true;
        }
        self.boundary.bucket(earlier) != self.boundary.bucket(later)
    }
}

/// Immutable, ordered set of epochs (descending `max_duration`).
#[derive(Debug, Clone)]
pub struct Catalog {
    epochs: Vec<Epoch>,
}

impl Catalog {
    /// Builds a catalog, stably sorting by descending `max_duration` so
    /// that ties keep their declaration order.
    pub fn new(mut epochs: Vec<Epoch>) -> Self {
        epochs.sort_by(|a, b| b.max_duration.cmp(&a.max_duration));
        Self { epochs }
    }

    /// The epochs served by the announcer.
    pub fn standard() -> Self {
        Self::new(vec![
            Epoch::monthly(),
            Epoch::weekly(),
            Epoch::daily(),
            Epoch::eight_hourly(),
            Epoch::four_hourly(),
            Epoch::two_hourly(),
            Epoch::hourly(),
        ])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Epoch> {
        self.epochs.iter()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Epoch> {
        self.epochs.iter().find(|e| e.id == id)
    }

    /// Position of the epoch in catalog order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.epochs.iter().position(|e| e.id == id)
    }

    pub fn longest(&self) -> Option<&Epoch> {
        self.epochs.first()
    }

    /// Resolves `ids` to epochs in catalog order, dropping duplicates.
    pub fn subset<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<&Epoch>, SelectError> {
        let mut positions = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.as_ref();
            let pos = self
                .position(id)
                .ok_or_else(|| SelectError::UnknownEpoch(id.to_string()))?;
            positions.push(pos);
        }
        positions.sort_unstable();
        positions.dedup();
        Ok(positions.into_iter().map(|p| &self.epochs[p]).collect())
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a Epoch;
    type IntoIter = std::slice::Iter<'a, Epoch>;

    fn into_iter(self) -> Self::IntoIter {
        self.epochs.iter()
    }
}
