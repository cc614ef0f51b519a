//! Version constraint parsing and dotted-numeric comparison.
//!
//! Two constraint forms are understood: `">=X"` (minimum) and a bare `"X"`
//! (exact). An absent or blank constraint is always satisfied. Comparison is
//! lenient and never fails: components are compared as integers, missing
//! trailing components count as `0`, and non-numeric components parse as `0`.
//!
//! An unknown installed version never satisfies an active constraint. This
//! fail-closed rule keeps CI runs deterministic.
use std::cmp::Ordering;
use std::fmt;

/// A parsed version constraint.
///
/// # Examples
///
/// ```
/// use converge_cli::version::Constraint;
///
/// assert_eq!(Constraint::parse(Some(">=2.0")), Constraint::Minimum("2.0".into()));
/// assert_eq!(Constraint::parse(Some("1.4.2")), Constraint::Exact("1.4.2".into()));
/// assert_eq!(Constraint::parse(None), Constraint::Any);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// No constraint; any installed version (even unknown) is acceptable.
    Any,
    /// The installed version must compare equal.
    Exact(String),
    /// The installed version must compare greater than or equal.
    Minimum(String),
}

impl Constraint {
    /// Parse a constraint string from a manifest entry.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::Any;
        };
        raw.strip_prefix(">=").map_or_else(
            || Self::Exact(raw.to_string()),
            |min| Self::Minimum(min.trim().to_string()),
        )
    }

    /// Whether this constraint restricts the installed version at all.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Any)
    }

    /// Evaluate this constraint against an installed version.
    #[must_use]
    pub fn check(&self, installed: Option<&str>) -> VersionCheck {
        match (self, installed.map(str::trim).filter(|v| !v.is_empty())) {
            (Self::Any, _) => VersionCheck::Satisfied,
            (_, None) => VersionCheck::Unknown,
            (Self::Exact(want), Some(have)) => {
                if compare(have, want) == Ordering::Equal {
                    VersionCheck::Satisfied
                } else {
                    VersionCheck::Unsatisfied
                }
            }
            (Self::Minimum(min), Some(have)) => {
                if compare(have, min) == Ordering::Less {
                    VersionCheck::Unsatisfied
                } else {
                    VersionCheck::Satisfied
                }
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Exact(v) => write!(f, "{v}"),
            Self::Minimum(v) => write!(f, ">={v}"),
        }
    }
}

/// Outcome of checking an installed version against a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// The installed version meets the constraint.
    Satisfied,
    /// The installed version is known and fails the constraint.
    Unsatisfied,
    /// The installed version is unknown while a constraint is active.
    Unknown,
}

impl VersionCheck {
    /// Only [`VersionCheck::Satisfied`] counts as satisfied.
    #[must_use]
    pub const fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Whether `installed` satisfies `constraint`.
///
/// # Examples
///
/// ```
/// use converge_cli::version::{Constraint, satisfies};
///
/// let min = Constraint::parse(Some(">=2.0.0"));
/// assert!(satisfies(Some("2.4.0"), &min));
/// assert!(!satisfies(None, &min));
/// assert!(satisfies(None, &Constraint::Any));
/// ```
#[must_use]
pub fn satisfies(installed: Option<&str>, constraint: &Constraint) -> bool {
    constraint.check(installed).is_satisfied()
}

/// Compare two dotted versions numerically.
///
/// # Examples
///
/// ```
/// use std::cmp::Ordering;
/// use converge_cli::version::compare;
///
/// assert_eq!(compare("1.10", "1.9"), Ordering::Greater);
/// assert_eq!(compare("2.0", "2.0.0"), Ordering::Equal);
/// ```
#[must_use]
pub fn compare(a: &str, b: &str) -> Ordering {
    let left: Vec<u64> = components(a);
    let right: Vec<u64> = components(b);
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

fn components(v: &str) -> Vec<u64> {
    v.trim()
        .split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0))
        .collect()
}
