//! Resume-point arithmetic.
//!
//! Every variant resumes the same way: re-query the stage's progress and
//! continue at the first unit the server does not list as answered.

use std::collections::BTreeSet;

use super::types::{Unit, UnitId};
use crate::progress::StageProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// Index of the first unanswered unit.
    At(usize),
    /// Nothing left to do.
    Complete,
}

pub fn first_unanswered(units: &[Unit], progress: &StageProgress) -> ResumePoint {
    if progress.completed {
        return ResumePoint::Complete;
    }
    units
        .iter()
        .position(|u| !progress.is_answered(&u.id))
        .map_or(ResumePoint::Complete, ResumePoint::At)
}

/// First unanswered unit strictly after `current`.
pub fn next_unanswered(units: &[Unit], answered: &BTreeSet<UnitId>, current: usize) -> Option<usize> {
    units
        .iter()
        .enumerate()
        .skip(current + 1)
        .find(|(_, u)| !answered.contains(&u.id))
        .map(|(i, _)| i)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
