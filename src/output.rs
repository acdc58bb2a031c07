//! Epoch solutions and emitted lines
use crate::{
    cfg::OutputOpts,
    estimator::NonBiasState,
    prelude::{Epoch, Vector3, SV},
};

/// Solution of one committed epoch
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Epoch key
    pub key: u32,
    /// Sampling [Epoch]
    pub t: Epoch,
    /// Estimated [NonBiasState]
    pub state: NonBiasState,
    /// Corrected receiver position, ECEF [m]
    pub ecef: Vector3<f64>,
    /// Corrected receiver position, as an ENU offset from the nominal position [m]
    pub enu: Vector3<f64>,
    /// (satellite, arc, ambiguity [m]), in observation order
    pub ambiguities: Vec<(SV, u32, f64)>,
    /// Number of observations of this epoch
    pub observations: usize,
    /// Number of observations classified as outliers
    pub outliers: usize,
    /// Satellites whose observation was classified as an outlier
    pub rejected: Vec<SV>,
    /// True if this epoch was solved again without its outliers
    pub recommitted: bool,
    /// Number of phase arcs started at this epoch
    pub new_arcs: usize,
}

impl Solution {
    /// Returns the [OutputLine]s selected by `opts`
    pub fn lines(&self, opts: &OutputOpts) -> Vec<OutputLine> {
        let t = self.t.to_gpst_seconds();
        let mut lines = Vec::with_capacity(3);
        if opts.ecef {
            lines.push(OutputLine::Ecef(t, self.ecef));
        }
        if opts.enu {
            lines.push(OutputLine::Enu(t, self.enu));
        }
        if opts.ambiguities {
            lines.push(OutputLine::Ambiguities(
                t,
                self.ambiguities.iter().map(|(_, _, amb)| *amb).collect(),
            ));
        }
        lines
    }
}

/// One line of output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    /// `xyz <t> <x> <y> <z>`
    Ecef(f64, Vector3<f64>),
    /// `enu <t> <e> <n> <u>`
    Enu(f64, Vector3<f64>),
    /// `gps <t> <amb>...`
    Ambiguities(f64, Vec<f64>),
}

impl std::fmt::Display for OutputLine {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Ecef(t, xyz) => write!(f, "xyz {:.3} {:.4} {:.4} {:.4}", t, xyz[0], xyz[1], xyz[2]),
            Self::Enu(t, enu) => write!(f, "enu {:.3} {:.4} {:.4} {:.4}", t, enu[0], enu[1], enu[2]),
            Self::Ambiguities(t, ambiguities) => {
                write!(f, "gps {:.3}", t)?;
                for amb in ambiguities.iter() {
                    write!(f, " {:.4}", amb)?;
                }
                Ok(())
            },
        }
    }
}

/// Run statistics
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Number of processed epochs
    pub epochs: usize,
    /// Number of committed epochs
    pub commits: usize,
    /// Number of epochs solved again without their outliers
    pub recommits: usize,
    /// Number of skipped (underdetermined) epochs
    pub skipped: usize,
    /// Number of outlying observations
    pub outliers: usize,
    /// Number of reclustering passes
    pub reclusterings: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "epochs={} commits={} recommits={} skipped={} outliers={} reclusterings={}",
            self.epochs,
            self.commits,
            self.recommits,
            self.skipped,
            self.outliers,
            self.reclusterings
        )
    }
}
