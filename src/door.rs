use std::time::Duration;

use crate::clock::Clock;
use crate::config::DeviceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DoorState {
    Closed,
    Open,
}

/// Servo driving the door latch.
pub trait DoorActuator {
    /// Move to `angle` degrees (0..=180).
    fn set_angle(&mut self, angle: u16);
}

/// The door and its latch positions. Only a granted login opens it, and it
/// always closes again after the dwell.
pub struct Door {
    actuator: Box<dyn DoorActuator>,
    state: DoorState,
    open_angle: u16,
    closed_angle: u16,
    dwell: Duration,
}

impl Door {
    /// Drive the actuator to the closed position.
    pub fn new(mut actuator: Box<dyn DoorActuator>, config: &DeviceConfig) -> Self {
        actuator.set_angle(config.door_closed_angle);
        Self {
            actuator,
            state: DoorState::Closed,
            open_angle: config.door_open_angle,
            closed_angle: config.door_closed_angle,
            dwell: config.door_dwell,
        }
    }

    pub fn state(&self) -> DoorState {
        self.state
    }

    /// Open, hold for the dwell, close.
    pub fn open_momentarily(&mut self, clock: &dyn Clock) {
        self.actuator.set_angle(self.open_angle);
        self.state = DoorState::Open;
        log::info!("🚪 Door {} for {:?}", self.state, self.dwell);

        clock.sleep(self.dwell);

        self.actuator.set_angle(self.closed_angle);
        self.state = DoorState::Closed;
        log::info!("🚪 Door {}", self.state);
    }
}

/// Stand-in actuator for hosts without a servo.
#[derive(Debug, Default)]
pub struct LoggingServo {
    angle: Option<u16>,
}

impl LoggingServo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn angle(&self) -> Option<u16> {
        self.angle
    }
}

impl DoorActuator for LoggingServo {
    fn set_angle(&mut self, angle: u16) {
        log::info!("⚙️ Servo -> {}°", angle);
        self.angle = Some(angle);
    }
}
