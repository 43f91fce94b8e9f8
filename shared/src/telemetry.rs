//! Telemetry values
//!
//! Plain values decoded from MAVLink message fields. Decoding takes raw field
//! values so this crate stays independent of the MAVLink dialect crate.

use std::fmt;

/// Connection state of the link to the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub is_connected: bool,
}

/// Readiness flags derived from GPS and home position messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Health {
    /// GPS reports a 3D fix or better
    pub is_global_position_ok: bool,
    /// A home position has been received
    pub is_home_position_ok: bool,
    /// Both of the above
    pub is_armable: bool,
}

impl Health {
    pub fn new(is_global_position_ok: bool, is_home_position_ok: bool) -> Self {
        Self {
            is_global_position_ok,
            is_home_position_ok,
            is_armable: is_global_position_ok && is_home_position_ok,
        }
    }

    /// Either position source is usable
    pub fn is_position_ready(&self) -> bool {
        self.is_global_position_ok || self.is_home_position_ok
    }
}

/// Global position of the vehicle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Altitude above mean sea level
    pub absolute_altitude_m: f32,
    /// Altitude above home
    pub relative_altitude_m: f32,
}

impl Position {
    /// From GLOBAL_POSITION_INT fields (degE7, mm)
    pub fn from_global_position_int(lat: i32, lon: i32, alt: i32, relative_alt: i32) -> Self {
        Self {
            latitude_deg: lat as f64 / 1e7,
            longitude_deg: lon as f64 / 1e7,
            absolute_altitude_m: alt as f32 / 1000.0,
            relative_altitude_m: relative_alt as f32 / 1000.0,
        }
    }
}

/// Battery state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Battery {
    pub voltage_v: f32,
    /// 0-100, `None` when the autopilot does not estimate it
    pub remaining_percent: Option<f32>,
}

impl Battery {
    /// From SYS_STATUS fields (mV, percent with -1 = unknown)
    pub fn from_sys_status(voltage_battery: u16, battery_remaining: i8) -> Self {
        Self {
            voltage_v: voltage_battery as f32 / 1000.0,
            remaining_percent: (battery_remaining >= 0).then_some(battery_remaining as f32),
        }
    }
}

/// Autopilot family, needed to decode `custom_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Autopilot {
    Px4,
    ArduPilot,
    #[default]
    Generic,
}

/// Flight mode reported by the autopilot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightMode {
    Unknown,
    Ready,
    Takeoff,
    Hold,
    Mission,
    ReturnToLaunch,
    Land,
    Offboard,
    FollowMe,
    Manual,
    Altctl,
    Posctl,
    Acro,
    Stabilized,
    Rattitude,
    Guided,
    Circle,
    Drift,
    Sport,
    Flip,
    AutoTune,
    Brake,
    Throw,
    SmartRtl,
}

impl FlightMode {
    /// Decode HEARTBEAT.custom_mode for the given autopilot
    pub fn decode(autopilot: Autopilot, custom_mode: u32) -> Self {
        match autopilot {
            Autopilot::Px4 => Self::from_px4_custom_mode(custom_mode),
            Autopilot::ArduPilot => Self::from_ardupilot_custom_mode(custom_mode),
            Autopilot::Generic => Self::Unknown,
        }
    }

    /// PX4 packs the main mode in byte 2 and the sub mode in byte 3
    pub fn from_px4_custom_mode(custom_mode: u32) -> Self {
        let main_mode = (custom_mode >> 16) & 0xff;
        let sub_mode = (custom_mode >> 24) & 0xff;

        match main_mode {
            1 => Self::Manual,
            2 => Self::Altctl,
            3 => Self::Posctl,
            4 => match sub_mode {
                1 => Self::Ready,
                2 => Self::Takeoff,
                3 => Self::Hold,
                4 => Self::Mission,
                5 => Self::ReturnToLaunch,
                6 | 9 => Self::Land,
                8 => Self::FollowMe,
                _ => Self::Unknown,
            },
            5 => Self::Acro,
            6 => Self::Offboard,
            7 => Self::Stabilized,
            8 => Self::Rattitude,
            _ => Self::Unknown,
        }
    }

    /// ArduPilot Copter mode numbers
    pub fn from_ardupilot_custom_mode(custom_mode: u32) -> Self {
        match custom_mode {
            0 => Self::Stabilized,
            1 => Self::Acro,
            2 => Self::Altctl,
            3 => Self::Mission,
            4 => Self::Guided,
            5 => Self::Hold,
            6 => Self::ReturnToLaunch,
            7 => Self::Circle,
            9 => Self::Land,
            11 => Self::Drift,
            13 => Self::Sport,
            14 => Self::Flip,
            15 => Self::AutoTune,
            16 => Self::Posctl,
            17 => Self::Brake,
            18 => Self::Throw,
            21 => Self::SmartRtl,
            23 => Self::FollowMe,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlightMode::Unknown => "UNKNOWN",
            FlightMode::Ready => "READY",
            FlightMode::Takeoff => "TAKEOFF",
            FlightMode::Hold => "HOLD",
            FlightMode::Mission => "MISSION",
            FlightMode::ReturnToLaunch => "RETURN_TO_LAUNCH",
            FlightMode::Land => "LAND",
            FlightMode::Offboard => "OFFBOARD",
            FlightMode::FollowMe => "FOLLOW_ME",
            FlightMode::Manual => "MANUAL",
            FlightMode::Altctl => "ALTCTL",
            FlightMode::Posctl => "POSCTL",
            FlightMode::Acro => "ACRO",
            FlightMode::Stabilized => "STABILIZED",
            FlightMode::Rattitude => "RATTITUDE",
            FlightMode::Guided => "GUIDED",
            FlightMode::Circle => "CIRCLE",
            FlightMode::Drift => "DRIFT",
            FlightMode::Sport => "SPORT",
            FlightMode::Flip => "FLIP",
            FlightMode::AutoTune => "AUTOTUNE",
            FlightMode::Brake => "BRAKE",
            FlightMode::Throw => "THROW",
            FlightMode::SmartRtl => "SMART_RTL",
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_scaling() {
        let pos = Position::from_global_position_int(473_977_418, 85_455_939, 488_120, 10_050);
        assert!((pos.latitude_deg - 47.3977418).abs() < 1e-9);
        assert!((pos.longitude_deg - 8.5455939).abs() < 1e-9);
        assert!((pos.absolute_altitude_m - 488.12).abs() < 1e-3);
        assert!((pos.relative_altitude_m - 10.05).abs() < 1e-3);
    }

    #[test]
    fn test_battery_unknown_remaining() {
        let battery = Battery::from_sys_status(12_600, -1);
        assert!((battery.voltage_v - 12.6).abs() < 1e-3);
        assert_eq!(battery.remaining_percent, None);

        let battery = Battery::from_sys_status(16_000, 87);
        assert_eq!(battery.remaining_percent, Some(87.0));
    }

    #[test]
    fn test_px4_modes() {
        // AUTO (4) / LOITER (3)
        assert_eq!(FlightMode::from_px4_custom_mode(0x0304_0000), FlightMode::Hold);
        // AUTO (4) / TAKEOFF (2)
        assert_eq!(FlightMode::from_px4_custom_mode(0x0204_0000), FlightMode::Takeoff);
        assert_eq!(FlightMode::from_px4_custom_mode(0x0003_0000), FlightMode::Posctl);
        assert_eq!(FlightMode::from_px4_custom_mode(0x0006_0000), FlightMode::Offboard);
        assert_eq!(FlightMode::from_px4_custom_mode(0), FlightMode::Unknown);
    }

    #[test]
    fn test_ardupilot_modes() {
        assert_eq!(FlightMode::from_ardupilot_custom_mode(4), FlightMode::Guided);
        assert_eq!(FlightMode::from_ardupilot_custom_mode(6), FlightMode::ReturnToLaunch);
        assert_eq!(FlightMode::from_ardupilot_custom_mode(9), FlightMode::Land);
        assert_eq!(FlightMode::from_ardupilot_custom_mode(99), FlightMode::Unknown);
    }

    #[test]
    fn test_generic_autopilot_is_unknown() {
        assert_eq!(FlightMode::decode(Autopilot::Generic, 4), FlightMode::Unknown);
        assert_eq!(FlightMode::ReturnToLaunch.to_string(), "RETURN_TO_LAUNCH");
    }

    #[test]
    fn test_health_readiness() {
        assert!(!Health::default().is_position_ready());
        assert!(Health::new(false, true).is_position_ready());
        assert!(!Health::new(true, false).is_armable);
        assert!(Health::new(true, true).is_armable);
    }
}
