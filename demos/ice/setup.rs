use gnss_ice::prelude::Config;
use serde::Deserialize;

// Demo deployment. The station position is mandatory and must
// be provided by the setup script.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Setup {
    /// Estimation [Config]
    #[serde(default)]
    pub config: Config,
    /// Observation file, superseded by the command line
    #[serde(default)]
    pub observations: Option<String>,
    /// Directory where residual batches and the final model are dumped
    #[serde(default)]
    pub dump_dir: Option<String>,
}
