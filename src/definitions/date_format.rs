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

//! This module implements the timestamp format used to prefix lines in the
//! log sinks. Formats are written with moment-style tokens
//! (`YYYY-MM-DD HH:mm:ss`) and compiled once into a chrono format string.

// Import standard library features
use std::fmt;

// Import Chrono features
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone};

// Moment tokens and their chrono counterparts, longest tokens first
//
// Tokens chrono has no rendering for are listed without one and rejected.
const TOKENS: &[(&str, Option<&str>)] = &[
    ("YYYY", Some("%Y")),
    ("MMMM", Some("%B")),
    ("DDDD", Some("%j")),
    ("dddd", Some("%A")),
    ("MMM", Some("%b")),
    ("DDD", Some("%-j")),
    ("ddd", Some("%a")),
    ("SSS", Some("%3f")),
    ("YY", Some("%y")),
    ("MM", Some("%m")),
    ("Do", None),
    ("DD", Some("%d")),
    ("dd", None),
    ("HH", Some("%H")),
    ("hh", Some("%I")),
    ("mm", Some("%M")),
    ("SS", None),
    ("ss", Some("%S")),
    ("ZZ", Some("%z")),
    ("M", Some("%-m")),
    ("D", Some("%-d")),
    ("d", Some("%w")),
    ("H", Some("%-H")),
    ("h", Some("%-I")),
    ("m", Some("%-M")),
    ("S", None),
    ("s", Some("%-S")),
    ("A", Some("%p")),
    ("a", Some("%P")),
    ("Z", Some("%:z")),
    ("X", Some("%s")),
];

/// A compiled log date format
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogDateFormat {
    pattern: String, // the format as written in the descriptor
    chrono: String,  // the equivalent chrono format string
}

// Implement key features of the log date format
impl LogDateFormat {
    /// A function to compile a moment-style pattern
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is empty, has an unterminated `[`
    /// literal, uses a token without a chrono rendering (`Do`, `dd`, `SS`,
    /// `S`), or produces a format chrono cannot render.
    ///
    pub fn parse(pattern: &str) -> Result<LogDateFormat, String> {
        if pattern.trim().is_empty() {
            return Err("log date format is empty".into());
        }

        let mut chrono = String::new();
        let mut rest = pattern;
        'outer: while !rest.is_empty() {
            // Copy bracketed text verbatim
            if let Some(literal) = rest.strip_prefix('[') {
                let end = literal
                    .find(']')
                    .ok_or_else(|| format!("unterminated '[' in log date format '{}'", pattern))?;
                push_literal(&mut chrono, &literal[..end]);
                rest = &literal[end + 1..];
                continue;
            }

            // Replace the longest matching token
            for (token, replacement) in TOKENS {
                if let Some(remaining) = rest.strip_prefix(token) {
                    let replacement = replacement.ok_or_else(|| {
                        format!("unsupported token '{}' in log date format '{}'", token, pattern)
                    })?;
                    chrono.push_str(replacement);
                    rest = remaining;
                    continue 'outer;
                }
            }

            // Keep any other character as is
            let mut characters = rest.chars();
            if let Some(character) = characters.next() {
                push_literal(&mut chrono, &character.to_string());
            }
            rest = characters.as_str();
        }

        // Make sure chrono accepts the result
        if StrftimeItems::new(&chrono).any(|item| matches!(item, Item::Error)) {
            return Err(format!("unsupported log date format '{}'", pattern));
        }

        Ok(LogDateFormat {
            pattern: pattern.to_string(),
            chrono,
        })
    }

    /// A method to return the chrono format string
    ///
    #[cfg(test)]
    pub fn chrono_format(&self) -> &str {
        &self.chrono
    }

    /// A method to format the current local time
    ///
    pub fn now(&self) -> String {
        self.format(&Local::now())
    }

    /// A method to format the provided time
    ///
    pub fn format<Tz>(&self, time: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        time.format(&self.chrono).to_string()
    }
}

// Display the log date format as originally written
impl fmt::Display for LogDateFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

/// A helper function to append literal text to a chrono format string
///
fn push_literal(chrono: &mut String, text: &str) {
    chrono.push_str(&text.replace('%', "%%"));
}

// Tests of the date format module
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate};

    // Convert the common moment formats
    #[test]
    fn translate_tokens() {
        let format = LogDateFormat::parse("YYYY-MM-DD HH:mm:ss").unwrap();
        assert_eq!(format.chrono_format(), "%Y-%m-%d %H:%M:%S");

        let format = LogDateFormat::parse("D/M/YY h:mm A").unwrap();
        assert_eq!(format.chrono_format(), "%-d/%-m/%y %-I:%M %p");

        let format = LogDateFormat::parse("[at] HH:mm [100%]").unwrap();
        assert_eq!(format.chrono_format(), "at %H:%M 100%%");
        let format = LogDateFormat::parse("YYYY DDDD DDD d").unwrap();
        assert_eq!(format.chrono_format(), "%Y %j %-j %w");
    }

    // Render a fixed time
    #[test]
    fn render_time() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let time = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_milli_opt(9, 5, 2, 42)
            .unwrap()
            .and_local_timezone(offset)
            .unwrap();
        let format = LogDateFormat::parse("YYYY-MM-DD HH:mm:ss.SSS").unwrap();
        assert_eq!(format.format(&time), "2024-03-07 09:05:02.042");
        assert_eq!(format.to_string(), "YYYY-MM-DD HH:mm:ss.SSS");
    }

    // Reject broken formats
    #[test]
    fn invalid_formats() {
        assert!(LogDateFormat::parse("").is_err());
        assert!(LogDateFormat::parse("[YYYY").is_err());
    }

    // Reject the tokens chrono cannot render, but not inside literals
    #[test]
    fn unsupported_tokens() {
        for pattern in ["MMMM Do", "dd HH:mm", "HH:mm:ss.SS", "ss.S"] {
            let error = LogDateFormat::parse(pattern).unwrap_err();
            assert!(error.starts_with("unsupported token"), "{}", error);
        }
        let format = LogDateFormat::parse("[Do dd SS] DDD").unwrap();
        assert_eq!(format.chrono_format(), "Do dd SS %-j");
    }

    // Render the day of the year and weekday number
    #[test]
    fn render_day_tokens() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let time = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 2)
            .unwrap()
            .and_local_timezone(offset)
            .unwrap();
        let format = LogDateFormat::parse("DDDD DDD d dddd").unwrap();
        assert_eq!(format.format(&time), "067 67 4 Thursday");
    }
}
