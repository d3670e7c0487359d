//! Commands sent to the Lightwave hub.
//!
//! Device commands have the form `!<device><body>|<label>|<name>`, where the
//! label and name are shown on the hub's display. Hub-wide commands such as
//! registration carry no device.

use std::fmt;

/// Pairs this client with the hub.
pub const REGISTER: &str = "!F*p";

/// Removes every paired client from the hub.
pub const DEREGISTER_ALL: &str = "!F*xP";

/// Highest dim level the hub accepts.
pub const MAX_BRIGHTNESS_LEVEL: u8 = 32;

/// A command waiting to be delivered to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    device_id: Option<String>,
    label: String,
}

impl Command {
    /// Creates a command from raw protocol text.
    #[must_use]
    pub fn raw(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            device_id: None,
            label: label.into(),
        }
    }

    /// Creates a command addressed to a device, e.g. `R1D3`.
    #[must_use]
    pub fn device(device_id: &str, body: &str, action: &str, name: &str) -> Self {
        Self {
            text: format!("!{device_id}{body}|{action}|{name}"),
            device_id: Some(device_id.to_owned()),
            label: format!("{name}: {action}"),
        }
    }

    /// Registers this client with the hub.
    #[must_use]
    pub fn register() -> Self {
        Self::raw(REGISTER, "Register")
    }

    /// Deregisters all clients from the hub.
    #[must_use]
    pub fn deregister_all() -> Self {
        Self::raw(DEREGISTER_ALL, "Deregister all")
    }

    /// Turns a dimmable light on at full brightness.
    #[must_use]
    pub fn turn_on_light(device_id: &str, name: &str) -> Self {
        Self::device(device_id, "FdP32", "Turn On", name)
    }

    /// Turns a switch on.
    #[must_use]
    pub fn turn_on_switch(device_id: &str, name: &str) -> Self {
        Self::device(device_id, "F1", "Turn On", name)
    }

    /// Turns a light on at a brightness in `0..=255`.
    #[must_use]
    pub fn turn_on_with_brightness(device_id: &str, name: &str, brightness: u8) -> Self {
        let level = brightness_level(brightness);
        Self::device(
            device_id,
            &format!("FdP{level}"),
            &format!("Lights {level}"),
            name,
        )
    }

    /// Turns a light or switch off.
    #[must_use]
    pub fn turn_off(device_id: &str, name: &str) -> Self {
        Self::device(device_id, "F0", "Turn Off", name)
    }

    /// Sets the target temperature of a TRV.
    #[must_use]
    pub fn set_temperature(device_id: &str, temperature: f64, name: &str) -> Self {
        Self::device(
            device_id,
            &format!("F*tP{temperature:.1}"),
            "Set Target",
            name,
        )
    }

    /// Returns the protocol text, without transaction id.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the addressed device, if any.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Returns the human-readable label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Scales a brightness in `0..=255` to the hub's dim level in `1..=32`.
///
/// Equivalent to `round(b * 31 / 255) + 1`; the quotient never lands on
/// exactly .5, so integer rounding is exact.
#[must_use]
pub const fn brightness_level(brightness: u8) -> u8 {
    let scaled = (brightness as u16 * 31 + 127) / 255;
    scaled as u8 + 1
}
