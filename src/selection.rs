//! Module-block selection rules.
//!
//! `Selection` models the picker a scheduling client drives cell by cell; it
//! is pure accumulation state and never consults occupancy. The structural
//! check in [`validate_block`] is shared with the reservation writer so a
//! block that slips past a buggy client is still rejected before commit.

use chrono::NaiveDate;

use crate::model::ModuleGrid;

/// One grid cell picked in the client UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pick {
    pub date: NaiveDate,
    pub ordinal: u16,
}

/// What [`Selection::toggle`] did with a pick. All outcomes are user-facing
/// guidance; none abort the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Added,
    /// The pick was already held and was toggled off.
    Removed,
    /// The prior accumulation was discarded; the selection restarted with
    /// only the new pick (cross-date pick or broken contiguity).
    Reset { dropped: Vec<Pick> },
    /// The selection already holds the required count; pick ignored.
    Full,
}

/// Accumulates a candidate module block for one exam.
#[derive(Debug, Clone)]
pub struct Selection {
    required: u16,
    picks: Vec<Pick>,
}

impl Selection {
    pub fn new(required: u16) -> Self {
        Self {
            required,
            picks: Vec::new(),
        }
    }

    pub fn picks(&self) -> &[Pick] {
        &self.picks
    }

    pub fn required(&self) -> u16 {
        self.required
    }

    pub fn is_complete(&self) -> bool {
        self.picks.len() == self.required as usize
    }

    /// The accumulated ordinals, sorted. Ready for [`validate_block`] once
    /// the selection is complete.
    pub fn ordinals(&self) -> Vec<u16> {
        let mut ordinals: Vec<u16> = self.picks.iter().map(|p| p.ordinal).collect();
        ordinals.sort_unstable();
        ordinals
    }

    /// Apply one pick.
    ///
    /// Rule order matters: toggle-off wins over everything, a cross-date pick
    /// resets the accumulation, a pick beyond the required count is ignored,
    /// and a pick that breaks contiguity resets to just itself.
    pub fn toggle(&mut self, pick: Pick) -> PickOutcome {
        if let Some(pos) = self.picks.iter().position(|p| *p == pick) {
            self.picks.remove(pos);
            return PickOutcome::Removed;
        }

        if let Some(first) = self.picks.first()
            && first.date != pick.date
        {
            let dropped = std::mem::take(&mut self.picks);
            self.picks.push(pick);
            return PickOutcome::Reset { dropped };
        }

        if self.picks.len() >= self.required as usize {
            return PickOutcome::Full;
        }

        self.picks.push(pick);

        let ordinals = self.ordinals();
        if ordinals.windows(2).any(|pair| pair[1] - pair[0] > 1) {
            let dropped: Vec<Pick> = self
                .picks
                .iter()
                .copied()
                .filter(|p| *p != pick)
                .collect();
            self.picks.clear();
            self.picks.push(pick);
            return PickOutcome::Reset { dropped };
        }

        PickOutcome::Added
    }
}

/// Structural violation in a candidate block. Maps onto the user guidance a
/// client shows next to the grid; never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    WrongCount { expected: u16, got: usize },
    NotContiguous,
    Unsorted,
    UnknownOrdinal(u16),
}

impl std::fmt::Display for SelectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionError::WrongCount { expected, got } => {
                write!(f, "exam requires {expected} modules, selection has {got}")
            }
            SelectionError::NotContiguous => write!(f, "selected modules are not contiguous"),
            SelectionError::Unsorted => write!(f, "module ordinals must be sorted and unique"),
            SelectionError::UnknownOrdinal(ordinal) => {
                write!(f, "module {ordinal} is not on the grid")
            }
        }
    }
}

impl std::error::Error for SelectionError {}

/// Structural check applied before any occupancy test: exact required count,
/// sorted unique ordinals, no gap greater than 1, every ordinal on the grid.
pub fn validate_block(
    grid: &ModuleGrid,
    required: u16,
    ordinals: &[u16],
) -> Result<(), SelectionError> {
    if ordinals.len() != required as usize {
        return Err(SelectionError::WrongCount {
            expected: required,
            got: ordinals.len(),
        });
    }
    for pair in ordinals.windows(2) {
        if pair[1] <= pair[0] {
            return Err(SelectionError::Unsorted);
        }
        if pair[1] - pair[0] > 1 {
            return Err(SelectionError::NotContiguous);
        }
    }
    for &ordinal in ordinals {
        if !grid.contains(ordinal) {
            return Err(SelectionError::UnknownOrdinal(ordinal));
        }
    }
    Ok(())
}
