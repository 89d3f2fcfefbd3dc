//! Display colors attached to ROIs.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An opaque RGB display color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Default color for ROIs created without one.
    pub const RED: Color = Color::from_rgb(0xff, 0x00, 0x00);
    /// Color reported for names the cache does not know.
    pub const WHITE: Color = Color::from_rgb(0xff, 0xff, 0xff);

    /// Creates a color from its components.
    #[must_use]
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Formats the color as `#rrggbb`.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Palette color for the n-th ROI.
    #[must_use]
    pub fn palette(index: usize) -> Self {
        const PALETTE: [Color; 10] = [
            Color::from_rgb(0x4a, 0x9e, 0xff),
            Color::from_rgb(0xef, 0x44, 0x44),
            Color::from_rgb(0x10, 0xb9, 0x81),
            Color::from_rgb(0xf5, 0x9e, 0x0b),
            Color::from_rgb(0x8b, 0x5c, 0xff),
            Color::from_rgb(0xf4, 0x72, 0xb6),
            Color::from_rgb(0x22, 0xc5, 0xe5),
            Color::from_rgb(0x84, 0xcc, 0x16),
            Color::from_rgb(0xf9, 0x73, 0x16),
            Color::from_rgb(0x06, 0xb6, 0xd4),
        ];
        PALETTE[index % PALETTE.len()]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::RED
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Error returned when a color string is not `#rrggbb` or `#rgb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseColorError(pub String);

impl fmt::Display for ParseColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid color '{}'", self.0)
    }
}

impl std::error::Error for ParseColorError {}

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseColorError(s.to_string());
        let digits = s.trim().strip_prefix('#').ok_or_else(err)?;
        if !digits.is_ascii() {
            return Err(err());
        }
        match digits.len() {
            6 => {
                let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16);
                Ok(Self {
                    r: channel(0).map_err(|_| err())?,
                    g: channel(2).map_err(|_| err())?,
                    b: channel(4).map_err(|_| err())?,
                })
            }
            3 => {
                // #rgb expands each nibble: #f80 == #ff8800
                let channel = |i: usize| u8::from_str_radix(&digits[i..=i], 16).map(|v| v * 17);
                Ok(Self {
                    r: channel(0).map_err(|_| err())?,
                    g: channel(1).map_err(|_| err())?,
                    b: channel(2).map_err(|_| err())?,
                })
            }
            _ => Err(err()),
        }
    }
}
