use std::fmt;

/// Well-known variable slots on the robot controller.
///
/// `$`-prefixed names are read-only actuals, `COM_*` names drive the motion
/// program and `@PROXY_*` names are served by the C3 bridge itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum C3VariableName {
    AxisAct,
    PosAct,
    ComAction,
    ComE6Axis,
    ComE6Pos,
    ComRoundm,
    ComValue1,
    ComValue2,
    ComValue3,
    ComValue4,
    ProxyType,
    ProxyVersion,
    ProxyHostname,
    ProxyAddress,
    ProxyPort,
}

impl C3VariableName {
    pub fn as_str(&self) -> &'static str {
        match self {
            C3VariableName::AxisAct => "$AXIS_ACT",
            C3VariableName::PosAct => "$POS_ACT",
            C3VariableName::ComAction => "COM_ACTION",
            C3VariableName::ComE6Axis => "COM_E6AXIS",
            C3VariableName::ComE6Pos => "COM_E6POS",
            C3VariableName::ComRoundm => "COM_ROUNDM",
            C3VariableName::ComValue1 => "COM_VALUE1", // $VEL.CP
            C3VariableName::ComValue2 => "COM_VALUE2", // $VEL_AXIS
            C3VariableName::ComValue3 => "COM_VALUE3", // $ACC.CP
            C3VariableName::ComValue4 => "COM_VALUE4", // $ACC_AXIS
            C3VariableName::ProxyType => "@PROXY_TYPE",
            C3VariableName::ProxyVersion => "@PROXY_VERSION",
            C3VariableName::ProxyHostname => "@PROXY_HOSTNAME",
            C3VariableName::ProxyAddress => "@PROXY_ADDRESS",
            C3VariableName::ProxyPort => "@PROXY_PORT",
        }
    }
}

impl fmt::Display for C3VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// COM_ACTION values understood by the robot's motion program. The reserved
/// internal routines (100/200/300/400) are written as their decimal form.
pub mod com_action {
    pub const EMPTY: &str = "1";
    pub const MOVE_JOINT: &str = "2";
    pub const MOVE_LINEAR: &str = "3";
    pub const SET_SPEED: &str = "6";
    pub const SET_AXIS_SPEED: &str = "7";
}

/// COM_ROUNDM value disabling motion blending.
pub const COM_ROUNDM_NONE: &str = "-1";
