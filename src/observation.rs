//! Observations and epoch-wise stream
use crate::{
    error::Error,
    prelude::{Epoch, Vector3, SV},
};

/// Single frequency range and phase [Observation] of one satellite,
/// already corrected and expressed in meters.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Sampling [Epoch]
    pub t: Epoch,
    /// Epoch key, shared by all observations of one receiver state
    pub key: u32,
    /// Observed satellite
    pub sv: SV,
    /// Satellite position, ECEF [m]
    pub sat_ecef: Vector3<f64>,
    /// Geometric range between satellite and nominal position [m]
    pub rho: f64,
    /// Pseudo range [m]
    pub pseudo_range: f64,
    /// Carrier phase range [m]
    pub phase_range: f64,
    /// Phase arc indicator. Any change of value between two
    /// consecutive observations of the same satellite means the
    /// phase tracking was interrupted (cycle slip, re-acquisition).
    pub arc: i32,
}

impl Observation {
    /// Prefit range and phase residuals, `(range - rho, phase - rho)`.
    pub fn prefit(&self) -> (f64, f64) {
        (self.pseudo_range - self.rho, self.phase_range - self.rho)
    }

    /// Initial guess of this arc's phase ambiguity [m]
    pub fn initial_ambiguity(&self) -> f64 {
        self.phase_range - self.pseudo_range
    }
}

/// All [Observation]s sharing one epoch key.
#[derive(Debug, Clone, Copy)]
pub struct EpochObservations<'a> {
    /// Epoch key
    pub key: u32,
    /// Key of the following epoch, if any
    pub next_key: Option<u32>,
    /// [Observation]s
    pub observations: &'a [Observation],
}

impl<'a> EpochObservations<'a> {
    /// Sampling [Epoch] of this set, None if it is empty
    pub fn t(&self) -> Option<Epoch> {
        self.observations.first().map(|ob| ob.t)
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// True if this set is empty. Never true when produced by [ObservationStream].
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Time ordered, pre-loaded stream of [Observation]s.
#[derive(Debug, Clone, Default)]
pub struct ObservationStream {
    inner: Vec<Observation>,
}

impl ObservationStream {
    /// Builds a new [ObservationStream], verifying keys never decrease.
    pub fn new(inner: Vec<Observation>) -> Result<Self, Error> {
        if inner.is_empty() {
            return Err(Error::EmptyStream);
        }
        for pair in inner.windows(2) {
            if pair[1].key < pair[0].key {
                return Err(Error::NonIncreasingKey(pair[1].key, pair[0].key));
            }
        }
        Ok(Self { inner })
    }

    /// Total number of [Observation]s
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if this stream is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// First epoch key
    pub fn first_key(&self) -> Option<u32> {
        self.inner.first().map(|ob| ob.key)
    }

    /// Last epoch key, used as end marker.
    pub fn last_key(&self) -> Option<u32> {
        self.inner.last().map(|ob| ob.key)
    }

    /// Iterates this stream epoch by epoch.
    pub fn epochs(&self) -> EpochIter<'_> {
        EpochIter {
            pos: 0,
            data: &self.inner,
        }
    }
}

/// [EpochObservations] iterator
pub struct EpochIter<'a> {
    pos: usize,
    data: &'a [Observation],
}

impl<'a> Iterator for EpochIter<'a> {
    type Item = EpochObservations<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let key = self.data[start].key;
        // the group ends when the next record's key differs
        let end = self.data[start..]
            .iter()
            .position(|ob| ob.key != key)
            .map(|offset| start + offset)
            .unwrap_or(self.data.len());

        self.pos = end;

        Some(EpochObservations {
            key,
            next_key: self.data.get(end).map(|ob| ob.key),
            observations: &self.data[start..end],
        })
    }
}
