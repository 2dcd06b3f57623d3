use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use kuka_c3::MoveGroup;

use crate::errors::GateError;

/// Top-level gateway configuration. Key names follow the historical JSON
/// format, including the `oscResponsPosition` spelling, which deployed
/// configurations depend on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamConfig {
    #[serde(default, rename = "oscRequestPositionPath")]
    pub osc_request_position_path: Option<String>,

    #[serde(default, rename = "oscResponseAddress")]
    pub osc_response_address: Option<String>,
    #[serde(default, rename = "oscResponsePositionPath")]
    pub osc_response_position_path: Option<String>,

    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub name: String,
    /// `host:port` of the robot's C3 endpoint.
    #[serde(default)]
    pub address: String,

    #[serde(default, rename = "oscRequestAxisPath")]
    pub osc_request_axis_path: Option<String>,
    #[serde(default, rename = "oscRequestCoordsPath")]
    pub osc_request_coords_path: Option<String>,
    #[serde(default, rename = "oscRequestPositionPath")]
    pub osc_request_position_path: Option<String>,

    /// Falls back to the team-level response address when absent.
    #[serde(default, rename = "oscResponseAddress")]
    pub osc_response_address: Option<String>,

    #[serde(default, rename = "oscResponseAxes")]
    pub osc_response_axes: Option<String>,
    #[serde(default, rename = "oscResponseCoords")]
    pub osc_response_coords: Option<String>,
    #[serde(default, rename = "oscResponsPosition")]
    pub osc_response_position: Option<String>,

    #[serde(default, rename = "moveGroups")]
    pub move_groups: Vec<MoveGroup>,
}

impl TeamConfig {
    /// Reads the configuration file; a missing file yields the default
    /// (empty) configuration so a fresh deployment can start up.
    pub fn load(path: &Path) -> Result<Self, GateError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(TeamConfig::default());
            }
            Err(err) => {
                return Err(GateError::Config(format!(
                    "open {}: {err}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&raw)
            .map_err(|err| GateError::Config(format!("decode {}: {err}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), GateError> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|err| GateError::Config(format!("encode: {err}")))?;
        fs::write(path, raw)
            .map_err(|err| GateError::Config(format!("write {}: {err}", path.display())))
    }

    /// Empty configuration with `count` blank robots, for `--init`.
    pub fn skeleton(count: usize) -> Self {
        Self {
            bots: (0..count).map(|_| BotConfig::default()).collect(),
            ..Self::default()
        }
    }
}
