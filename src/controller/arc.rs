use std::collections::HashMap;

use crate::prelude::SV;

/// Outcome of one [ArcTracker::track] call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcUpdate {
    /// Current arc of this satellite
    pub arc: u32,
    /// True if this arc was just created
    pub new: bool,
    /// Arc that was interrupted, if any
    pub retired: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct ArcState {
    arc: u32,
    indicator: i32,
}

/// Phase arc tracker. Each satellite has its own arc counter,
/// that increments every time its arc indicator changes value.
#[derive(Debug, Clone, Default)]
pub struct ArcTracker {
    inner: HashMap<SV, ArcState>,
}

impl ArcTracker {
    pub fn new() -> Self {
        Self {
            inner: HashMap::with_capacity(16),
        }
    }

    /// Updates the arc of `sv`, observed with this `indicator`.
    pub fn track(&mut self, sv: SV, indicator: i32) -> ArcUpdate {
        match self.inner.get_mut(&sv) {
            Some(state) if state.indicator == indicator => ArcUpdate {
                arc: state.arc,
                new: false,
                retired: None,
            },
            Some(state) => {
                let retired = state.arc;
                state.arc += 1;
                state.indicator = indicator;
                ArcUpdate {
                    arc: state.arc,
                    new: true,
                    retired: Some(retired),
                }
            },
            None => {
                self.inner.insert(sv, ArcState { arc: 0, indicator });
                ArcUpdate {
                    arc: 0,
                    new: true,
                    retired: None,
                }
            },
        }
    }

    /// Current arc of `sv`
    pub fn arc(&self, sv: &SV) -> Option<u32> {
        self.inner.get(sv).map(|state| state.arc)
    }

    /// Number of tracked satellites
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
