//! Map and layer symbology.
//!
//! Both structs deserialize from the `[render]` section of the pipeline
//! TOML. Colors are written as `#rrggbb` or `#rrggbbaa`; sizes are in
//! typographic points (1/72 inch) so they scale with the DPI.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Self = Self::opaque(255, 255, 255);
    pub const BLACK: Self = Self::opaque(0, 0, 0);

    #[must_use]
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub(crate) fn to_color(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }
}

/// A color string that is not `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid color '{0}': expected #rrggbb or #rrggbbaa")]
pub struct InvalidColor(pub String);

impl FromStr for Rgba {
    type Err = InvalidColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix('#')
            .filter(|h| (h.len() == 6 || h.len() == 8) && h.is_ascii())
            .ok_or_else(|| InvalidColor(s.to_string()))?;

        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| InvalidColor(s.to_string()))
        };

        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: if hex.len() == 8 { channel(6)? } else { 255 },
        })
    }
}

impl TryFrom<String> for Rgba {
    type Error = InvalidColor;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgba> for String {
    fn from(value: Rgba) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

/// Symbol drawn at each point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerShape {
    #[default]
    Circle,
    Square,
    Triangle,
}

/// Symbology for one layer.
///
/// `fill` applies to polygons and point markers, `stroke` to polygon
/// outlines, lines and marker outlines. A `None` color skips that pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerStyle {
    pub fill: Option<Rgba>,
    pub stroke: Option<Rgba>,
    /// Outline and line width in points.
    pub stroke_width: f32,
    pub marker: MarkerShape,
    /// Marker diameter in points.
    pub marker_size: f32,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            fill: Some(Rgba::opaque(0x9e, 0xca, 0xe1)),
            stroke: Some(Rgba::opaque(0x31, 0x82, 0xbd)),
            stroke_width: 0.75,
            marker: MarkerShape::Circle,
            marker_size: 6.0,
        }
    }
}

/// Canvas size, resolution and framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapStyle {
    /// Physical width in inches.
    pub width_in: f32,
    /// Physical height in inches.
    pub height_in: f32,
    pub dpi: u32,
    /// Margin around the data extent as a fraction of its larger side.
    pub padding: f64,
    pub background: Rgba,
}

impl Default for MapStyle {
    fn default() -> Self {
        Self {
            width_in: 8.0,
            height_in: 6.0,
            dpi: 150,
            padding: 0.05,
            background: Rgba::WHITE,
        }
    }
}

impl MapStyle {
    /// Canvas size in pixels, `None` if either side rounds to zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn canvas_size(&self) -> Option<(u32, u32)> {
        let scale = self.dpi as f32;
        let width = (self.width_in * scale).round();
        let height = (self.height_in * scale).round();

        if !(width >= 1.0 && height >= 1.0 && width.is_finite() && height.is_finite()) {
            return None;
        }

        Some((width as u32, height as u32))
    }

    /// Pixels per typographic point at this DPI.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn px_per_point(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}
