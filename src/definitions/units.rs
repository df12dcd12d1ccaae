// Copyright (c) 2026 Decode Detroit
// Author: Patton Doyle
// Licence: GNU GPLv3
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! This module implements the duration and memory size values written in
//! application descriptors.
//!
//! Durations are either a number of milliseconds or a number followed by one
//! of the units ms, s, m, h, or d. Memory sizes are either a number of bytes
//! or a number followed by K, M, or G (powers of 1024).

// Import standard library features
use std::fmt;
use std::time::Duration;

/// A duration as it appears in the descriptor file
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationSetting {
    Millis(u64),  // a bare number of milliseconds
    Text(String), // a number with an optional unit suffix
}

// Implement the conversion for the duration setting
impl DurationSetting {
    /// A method to convert the setting into a duration
    ///
    pub fn to_duration(&self) -> Result<Duration, String> {
        match self {
            DurationSetting::Millis(millis) => Ok(Duration::from_millis(*millis)),
            DurationSetting::Text(text) => parse_duration(text),
        }
    }
}

/// A function to parse a duration string such as `1m`, `30s`, or `500`
///
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let (number, unit) = split_number(text)?;
    let multiplier = match unit.to_ascii_lowercase().as_str() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(format!("unknown duration unit in '{}'", text.trim())),
    };

    // Reject values that would overflow
    number
        .checked_mul(multiplier)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration '{}' is too large", text.trim()))
}

/// A function to render a duration with the largest unit that divides it
///
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    for (unit, size) in [("d", 86_400_000), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)] {
        if millis > 0 && millis % size == 0 {
            return format!("{}{}", millis / size, unit);
        }
    }
    format!("{}ms", millis)
}

/// A memory size as it appears in the descriptor file
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeSetting {
    Bytes(u64),   // a bare number of bytes
    Text(String), // a number with an optional K, M, or G suffix
}

// Implement the conversion for the size setting
impl SizeSetting {
    /// A method to convert the setting into a memory size
    ///
    pub fn to_size(&self) -> Result<MemorySize, String> {
        match self {
            SizeSetting::Bytes(bytes) => Ok(MemorySize(*bytes)),
            SizeSetting::Text(text) => MemorySize::parse(text),
        }
    }
}

/// A resident memory amount, in bytes
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemorySize(pub u64);

// Implement key features of the memory size
impl MemorySize {
    /// A function to parse a size string such as `150M` or `1G`
    ///
    pub fn parse(text: &str) -> Result<MemorySize, String> {
        let (number, unit) = split_number(text)?;
        let multiplier: u64 = match unit.to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" => 1 << 10,
            "M" | "MB" => 1 << 20,
            "G" | "GB" => 1 << 30,
            _ => return Err(format!("unknown size unit in '{}'", text.trim())),
        };
        number
            .checked_mul(multiplier)
            .map(MemorySize)
            .ok_or_else(|| format!("size '{}' is too large", text.trim()))
    }
}

// Display the memory size with the largest whole unit
impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (unit, size) in [("G", 1u64 << 30), ("M", 1 << 20), ("K", 1 << 10)] {
            if self.0 > 0 && self.0 % size == 0 {
                return write!(f, "{}{}", self.0 / size, unit);
            }
        }
        write!(f, "{}B", self.0)
    }
}

/// A helper function to split a value into its leading number and unit
///
fn split_number(text: &str) -> Result<(u64, &str), String> {
    let text = text.trim();
    let split = text
        .find(|character: char| !character.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);

    // Require at least one digit
    if digits.is_empty() {
        return Err(format!("'{}' does not start with a number", text));
    }
    let number = digits
        .parse::<u64>()
        .map_err(|error| format!("invalid number in '{}': {}", text, error))?;
    Ok((number, unit.trim()))
}
