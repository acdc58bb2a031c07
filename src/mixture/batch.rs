use log::debug;
use nalgebra::Vector2;

use crate::prelude::SV;

/// One (range, phase) residual, tagged with its origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Residual {
    /// Epoch key
    pub key: u32,
    /// Satellite
    pub sv: SV,
    /// (range, phase) residual [m]
    pub value: Vector2<f64>,
}

/// Accumulates [Residual]s between two reclustering passes.
/// The batch is allocated for a nominal capacity but grows past it
/// rather than dropping samples.
#[derive(Debug, Clone)]
pub struct ResidualBatch {
    capacity: usize,
    inner: Vec<Residual>,
}

impl ResidualBatch {
    /// Allocates a new [ResidualBatch]
    pub fn malloc(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Push a new [Residual]
    pub fn push(&mut self, residual: Residual) {
        if self.inner.len() == self.capacity {
            debug!(
                "{} ({}) - residual batch grows past {}",
                residual.key, residual.sv, self.capacity
            );
        }
        self.inner.push(residual);
    }

    /// Number of accumulated residuals
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if nothing was accumulated
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Nominal capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Accumulated [Residual]s
    pub fn residuals(&self) -> &[Residual] {
        &self.inner
    }

    /// Residual values, in accumulation order
    pub fn values(&self) -> Vec<Vector2<f64>> {
        self.inner.iter().map(|r| r.value).collect()
    }

    /// Reset, keeping the allocation
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::Constellation;

    #[test]
    fn batch_grows() {
        let sv = SV::new(Constellation::GPS, 1);
        let mut batch = ResidualBatch::malloc(2);
        for i in 0..5 {
            batch.push(Residual {
                key: i,
                sv,
                value: Vector2::new(i as f64, 0.0),
            });
        }
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.capacity(), 2);
        assert_eq!(batch.values()[4], Vector2::new(4.0, 0.0));

        batch.clear();
        assert!(batch.is_empty());
    }
}
