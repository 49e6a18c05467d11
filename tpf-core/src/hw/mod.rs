//! Hardware access: temperature sensors, the fan control file and DMI
//! identification.

mod fan;
mod identity;
mod sensors;

pub use fan::{parse_fan_state, transition_commands, Actuator, FanInterface, ProcFan};
pub use identity::detect_machine_identity;
pub use sensors::SensorReader;

#[cfg(test)]
pub use fan::MockFanInterface;
