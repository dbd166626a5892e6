//! Page-range expressions such as `1-5, 8, 11-13`.
//!
//! An expression is a comma separated list of single pages and `low-high`
//! ranges. Every token is validated against the comic's page count before the
//! ranges are merged, so one bad token rejects the whole request.

use std::fmt;
use std::ops::RangeInclusive;

use crate::error::RangeError;

/// Inclusive run of one-based page numbers. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageInterval {
    start: u32,
    end: u32,
}

impl PageInterval {
    /// Returns `None` when `start` is zero or greater than `end`.
    #[must_use]
    pub fn new(start: u32, end: u32) -> Option<Self> {
        (start >= 1 && start <= end).then_some(Self { start, end })
    }

    #[must_use]
    pub fn single(page: u32) -> Option<Self> {
        Self::new(page, page)
    }

    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> u32 {
        self.end
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.end - self.start + 1
    }

    #[must_use]
    pub fn pages(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl fmt::Display for PageInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Ascending, disjoint, non-adjacent page intervals.
///
/// Built once per export request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<PageInterval>,
}

impl IntervalSet {
    /// Every page of a comic with `total_pages` pages.
    pub fn all(total_pages: u32) -> Result<Self, RangeError> {
        let interval = PageInterval::new(1, total_pages).ok_or(RangeError::NoPages)?;
        Ok(Self {
            intervals: vec![interval],
        })
    }

    /// Collapses overlapping and touching intervals with the usual sort-and-sweep.
    #[must_use]
    pub fn merge(mut intervals: Vec<PageInterval>) -> Self {
        intervals.sort_by_key(|interval| (interval.start, interval.end));

        let mut merged: Vec<PageInterval> = Vec::with_capacity(intervals.len());
        for interval in intervals {
            match merged.last_mut() {
                Some(running) if interval.start <= running.end.saturating_add(1) => {
                    running.end = running.end.max(interval.end);
                }
                _ => merged.push(interval),
            }
        }

        Self { intervals: merged }
    }

    #[must_use]
    pub fn intervals(&self) -> &[PageInterval] {
        &self.intervals
    }

    /// Total number of pages covered.
    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.intervals.iter().map(PageInterval::page_count).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Page numbers in export order: intervals ascending, pages ascending.
    pub fn pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.intervals.iter().flat_map(PageInterval::pages)
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, interval) in self.intervals.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{interval}")?;
        }
        Ok(())
    }
}

/// Parses a page-range expression for a comic with `total_pages` pages.
///
/// Blank input selects every page.
pub fn parse_ranges(text: &str, total_pages: u32) -> Result<IntervalSet, RangeError> {
    if total_pages == 0 {
        return Err(RangeError::NoPages);
    }

    if text.trim().is_empty() {
        return IntervalSet::all(total_pages);
    }

    let intervals = text
        .split(',')
        .enumerate()
        .map(|(idx, raw)| parse_token(raw.trim(), idx + 1, total_pages))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(IntervalSet::merge(intervals))
}

fn parse_token(token: &str, position: usize, total: u32) -> Result<PageInterval, RangeError> {
    if token.is_empty() {
        return Err(RangeError::EmptyToken { position });
    }

    let out_of_bounds = || RangeError::OutOfBounds {
        token: token.to_string(),
        total,
    };

    match token.split_once('-') {
        None => {
            let page = parse_page(token, token, total)?;
            if page == 0 || page > total {
                return Err(out_of_bounds());
            }
            PageInterval::single(page).ok_or_else(out_of_bounds)
        }
        Some((low, high)) => {
            let low = parse_page(low.trim(), token, total)?;
            let high = parse_page(high.trim(), token, total)?;
            if low == 0 || low > total || high > total {
                return Err(out_of_bounds());
            }
            if low >= high {
                return Err(RangeError::Reversed {
                    token: token.to_string(),
                });
            }
            PageInterval::new(low, high).ok_or_else(out_of_bounds)
        }
    }
}

// `str::parse` accepts a leading '+', page numbers must be bare digits.
fn parse_page(text: &str, token: &str, total: u32) -> Result<u32, RangeError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed {
            token: token.to_string(),
        });
    }

    // Only overflow can fail here, and such a page cannot exist.
    text.parse().map_err(|_| RangeError::OutOfBounds {
        token: token.to_string(),
        total,
    })
}
