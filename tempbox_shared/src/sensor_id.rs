//! One-wire ROM codes used to address temperature sensors.
//!
//! A ROM code is 8 bytes: family code, 48-bit serial number and a Dallas/Maxim
//! CRC-8 over the first seven bytes. Ids are written as colon-separated hex
//! (`28:69:A1:69:35:19:01:5D`) in configuration files, telemetry and on the
//! MCU wire protocol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorIdError {
    #[error("sensor id '{0}' must be 8 hex bytes")]
    Length(String),
    #[error("sensor id '{0}' contains invalid hex")]
    Hex(String),
    #[error("sensor id '{id}' has CRC {found:#04x}, expected {expected:#04x}")]
    Crc { id: String, expected: u8, found: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SensorId([u8; 8]);

impl SensorId {
    /// Build an id from raw ROM bytes, checking the trailing CRC.
    pub fn from_rom(rom: [u8; 8]) -> Result<Self, SensorIdError> {
        let expected = crc8(&rom[..7]);
        if expected != rom[7] {
            return Err(SensorIdError::Crc {
                id: format_rom(&rom),
                expected,
                found: rom[7],
            });
        }
        Ok(Self(rom))
    }

    pub fn rom(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn family_code(&self) -> u8 {
        self.0[0]
    }
}

impl FromStr for SensorId {
    type Err = SensorIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | ' '))
            .collect();
        if digits.len() != 16 || !digits.is_ascii() {
            return Err(SensorIdError::Length(s.to_string()));
        }
        let mut rom = [0u8; 8];
        for (i, byte) in rom.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| SensorIdError::Hex(s.to_string()))?;
        }
        Self::from_rom(rom)
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_rom(&self.0))
    }
}

impl TryFrom<String> for SensorId {
    type Error = SensorIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SensorId> for String {
    fn from(id: SensorId) -> Self {
        id.to_string()
    }
}

fn format_rom(rom: &[u8; 8]) -> String {
    rom.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Dallas/Maxim CRC-8 (polynomial x^8 + x^5 + x^4 + 1, reflected).
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &b in data {
        let mut byte = b;
        for _ in 0..8 {
            let mix = (crc ^ byte) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            byte >>= 1;
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_separated() {
        let id: SensorId = "28:69:A1:69:35:19:01:5D".parse().unwrap();
        assert_eq!(id.rom(), &[0x28, 0x69, 0xA1, 0x69, 0x35, 0x19, 0x01, 0x5D]);
        assert_eq!(id.family_code(), 0x28);
        assert_eq!(id.to_string(), "28:69:A1:69:35:19:01:5D");
    }

    #[test]
    fn test_parse_plain_and_lowercase() {
        let id: SensorId = "28965fe322200162".parse().unwrap();
        assert_eq!(id.to_string(), "28:96:5F:E3:22:20:01:62");
    }

    #[test]
    fn test_rejects_bad_crc() {
        let err = "28:69:A1:69:35:19:01:5E".parse::<SensorId>().unwrap_err();
        assert!(matches!(err, SensorIdError::Crc { expected: 0x5D, found: 0x5E, .. }));
    }

    #[test]
    fn test_rejects_wrong_length_and_hex() {
        assert!(matches!("28:69:A1".parse::<SensorId>(), Err(SensorIdError::Length(_))));
        assert!(matches!("ZZ:69:A1:69:35:19:01:5D".parse::<SensorId>(), Err(SensorIdError::Hex(_))));
    }

    #[test]
    fn test_crc_of_full_rom_is_zero() {
        let rom = [0x28, 0xD5, 0x55, 0x6B, 0x35, 0x19, 0x01, 0x99];
        assert_eq!(crc8(&rom), 0);
    }
}
