//! Candidate selection
//!
//! Which discovered candidates a session attaches to is a policy, not a
//! hardcoded "first one wins". Filters narrow the candidate list first; the
//! strategy then decides how many of the survivors get a transfer.

use crate::descriptors::Candidate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How many candidates to attach to
#[derive(Default)]
pub enum SelectionStrategy {
    /// Attach to the first candidate that attaches successfully
    #[default]
    First,
    /// Attach to every candidate
    All,
    /// Attach to the first successfully attached candidate accepted by the predicate
    Matching(Box<dyn Fn(&Candidate) -> bool + Send>),
}

impl SelectionStrategy {
    /// Candidates to try, in enumeration order
    pub fn select(&self, candidates: Vec<Candidate>, filters: &[DeviceFilter]) -> Vec<Candidate> {
        candidates
            .into_iter()
            .filter(|c| DeviceFilter::allows(filters, c))
            .filter(|c| match self {
                SelectionStrategy::Matching(predicate) => predicate(c),
                _ => true,
            })
            .collect()
    }

    /// Whether attaching stops after the first success
    pub fn single(&self) -> bool {
        !matches!(self, SelectionStrategy::All)
    }
}

impl fmt::Debug for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionStrategy::First => f.write_str("First"),
            SelectionStrategy::All => f.write_str("All"),
            SelectionStrategy::Matching(_) => f.write_str("Matching(..)"),
        }
    }
}

/// Config-level selection mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    #[default]
    First,
    All,
}

impl From<SelectionMode> for SelectionStrategy {
    fn from(mode: SelectionMode) -> Self {
        match mode {
            SelectionMode::First => SelectionStrategy::First,
            SelectionMode::All => SelectionStrategy::All,
        }
    }
}

/// VID:PID filter, `None` meaning wildcard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn matches(&self, candidate: &Candidate) -> bool {
        self.vendor_id.is_none_or(|v| v == candidate.vendor_id)
            && self.product_id.is_none_or(|p| p == candidate.product_id)
    }

    /// No filters means everything is allowed
    pub fn allows(filters: &[DeviceFilter], candidate: &Candidate) -> bool {
        filters.is_empty() || filters.iter().any(|f| f.matches(candidate))
    }

    fn parse_id(s: &str, what: &str) -> Result<Option<u16>, String> {
        if s == "*" {
            return Ok(None);
        }
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if hex.is_empty() || hex.len() > 4 {
            return Err(format!("Invalid {} '{}', expected up to 4 hex digits", what, s));
        }
        u16::from_str_radix(hex, 16)
            .map(Some)
            .map_err(|_| format!("Invalid {} '{}', expected hex", what, s))
    }
}

impl FromStr for DeviceFilter {
    type Err = String;

    /// Format: "0xVID:0xPID", "VID:PID" or with `*` for either side
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((vid, pid)) = s.trim().split_once(':') else {
            return Err(format!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x046d:0xc077' or '0x046d:*')",
                s
            ));
        };

        Ok(Self {
            vendor_id: Self::parse_id(vid, "VID")?,
            product_id: Self::parse_id(pid, "PID")?,
        })
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(v) => write!(f, "0x{:04x}", v)?,
            None => f.write_str("*")?,
        }
        f.write_str(":")?;
        match self.product_id {
            Some(p) => write!(f, "0x{:04x}", p),
            None => f.write_str("*"),
        }
    }
}
