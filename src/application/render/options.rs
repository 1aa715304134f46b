//! Caller-facing render options and their normalisation from loosely typed input.

use serde::Deserialize;
use thiserror::Error;

use super::{dpi::MAX_DPI, types::PixelTarget};

pub const DEFAULT_RESOLUTION: u32 = 300;
pub const TRANSPARENT: &str = "transparent";

/// A TeX colour: either a `#RRGGBB` triplet or an xcolor name/expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Color {
    /// Upper-case hex digits without the leading `#`.
    Hex(String),
    Named(String),
}

impl Color {
    pub fn black() -> Self {
        Color::Named("black".to_string())
    }

    pub fn parse(value: &str) -> Result<Self, OptionsError> {
        let trimmed = value.trim();
        if let Some(hex) = trimmed.strip_prefix('#') {
            if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Ok(Color::Hex(hex.to_ascii_uppercase()));
            }
            return Err(OptionsError::InvalidColor(value.to_string()));
        }

        let allowed = |c: char| c.is_ascii_alphanumeric() || c == '!' || c == '.';
        if trimmed.is_empty() || !trimmed.chars().all(allowed) {
            return Err(OptionsError::InvalidColor(value.to_string()));
        }
        Ok(Color::Named(trimmed.to_string()))
    }

    pub fn is_black(&self) -> bool {
        match self {
            Color::Hex(hex) => hex == "000000",
            Color::Named(name) => name.eq_ignore_ascii_case("black"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Background {
    Transparent,
    Fill(Color),
}

/// Normalised options for one render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub resolution: u32,
    pub foreground: Color,
    pub background: Background,
    pub font_size_pt: Option<u32>,
    pub display_mode: bool,
    /// Pixel targets before `scale_factor` is applied.
    pub target_width_px: Option<u32>,
    pub target_height_px: Option<u32>,
    pub padding_px: u32,
    pub scale_factor: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            foreground: Color::black(),
            background: Background::Transparent,
            font_size_pt: None,
            display_mode: true,
            target_width_px: None,
            target_height_px: None,
            padding_px: 0,
            scale_factor: 1.0,
        }
    }
}

impl RenderOptions {
    /// Pixel target before scaling, or `None` when neither axis is constrained.
    pub fn pixel_target(&self) -> Option<PixelTarget> {
        let target = PixelTarget::new(
            self.target_width_px.map(f64::from),
            self.target_height_px.map(f64::from),
        );
        (!target.is_unconstrained()).then_some(target)
    }

    /// Resolution of the single-pass path: `resolution * scale_factor`, at most [`MAX_DPI`].
    pub fn scaled_resolution(&self) -> u32 {
        let scaled = (f64::from(self.resolution) * self.scale_factor).round();
        scaled.clamp(1.0, f64::from(MAX_DPI)) as u32
    }

    pub fn transparent_background(&self) -> bool {
        matches!(self.background, Background::Transparent)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("invalid color `{0}`: expected #RRGGBB or a color name")]
    InvalidColor(String),
}

/// A scalar as it arrives from a query string, form body or JSON body.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    fn as_text(&self) -> String {
        match self {
            FieldValue::Text(text) => text.trim().to_string(),
            FieldValue::Integer(value) => value.to_string(),
            FieldValue::Float(value) => value.to_string(),
            FieldValue::Bool(value) => value.to_string(),
        }
    }

    /// Leading-digits integer parse; `None` when nothing numeric is present.
    fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(value) => Some(*value),
            FieldValue::Float(value) if value.is_finite() => Some(value.trunc() as i64),
            FieldValue::Float(_) | FieldValue::Bool(_) => None,
            FieldValue::Text(text) => {
                let text = text.trim();
                let (sign, digits) = match text.strip_prefix('-') {
                    Some(rest) => (-1, rest),
                    None => (1, text.strip_prefix('+').unwrap_or(text)),
                };
                let end = digits
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(digits.len());
                digits[..end].parse::<i64>().ok().map(|value| sign * value)
            }
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(value) => Some(*value as f64),
            FieldValue::Float(value) => Some(*value),
            FieldValue::Bool(_) => None,
            FieldValue::Text(text) => text.trim().parse::<f64>().ok(),
        }
    }

    fn as_positive_u32(&self) -> Option<u32> {
        self.as_integer()
            .filter(|value| *value > 0)
            .and_then(|value| u32::try_from(value).ok())
    }
}

/// Render options exactly as supplied by a caller; every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawRenderOptions {
    #[serde(alias = "resolution")]
    pub dpi: Option<FieldValue>,
    pub color: Option<FieldValue>,
    #[serde(rename = "backgroundColor")]
    pub background_color: Option<FieldValue>,
    #[serde(rename = "fontSize")]
    pub font_size: Option<FieldValue>,
    pub display: Option<FieldValue>,
    pub width: Option<FieldValue>,
    pub height: Option<FieldValue>,
    pub padding: Option<FieldValue>,
    pub scale: Option<FieldValue>,
}

impl RawRenderOptions {
    /// Apply defaults and lenient parsing. Only malformed colours are rejected.
    pub fn normalize(&self) -> Result<RenderOptions, OptionsError> {
        let defaults = RenderOptions::default();

        let resolution = self
            .dpi
            .as_ref()
            .and_then(FieldValue::as_positive_u32)
            .unwrap_or(defaults.resolution);

        let foreground = match non_blank(self.color.as_ref()) {
            Some(value) => Color::parse(&value)?,
            None => defaults.foreground,
        };

        let background = match non_blank(self.background_color.as_ref()) {
            Some(value) if value.eq_ignore_ascii_case(TRANSPARENT) => Background::Transparent,
            Some(value) => Background::Fill(Color::parse(&value)?),
            None => Background::Transparent,
        };

        let display_mode = match self.display.as_ref() {
            Some(FieldValue::Bool(value)) => *value,
            Some(other) => !other.as_text().eq_ignore_ascii_case("false"),
            None => true,
        };

        let padding_px = self
            .padding
            .as_ref()
            .and_then(FieldValue::as_positive_u32)
            .unwrap_or(defaults.padding_px);

        let scale_factor = self
            .scale
            .as_ref()
            .and_then(FieldValue::as_float)
            .filter(|value| value.is_finite() && *value > 0.0)
            .unwrap_or(defaults.scale_factor);

        Ok(RenderOptions {
            resolution,
            foreground,
            background,
            font_size_pt: self.font_size.as_ref().and_then(FieldValue::as_positive_u32),
            display_mode,
            target_width_px: self.width.as_ref().and_then(FieldValue::as_positive_u32),
            target_height_px: self.height.as_ref().and_then(FieldValue::as_positive_u32),
            padding_px,
            scale_factor,
        })
    }
}

fn non_blank(value: Option<&FieldValue>) -> Option<String> {
    value.map(FieldValue::as_text).filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Option<FieldValue> {
        Some(FieldValue::Text(value.to_string()))
    }

    #[test]
    fn empty_input_yields_defaults() {
        let options = RawRenderOptions::default().normalize().expect("defaults");
        assert_eq!(options, RenderOptions::default());
        assert!(options.pixel_target().is_none());
        assert!(options.transparent_background());
        assert_eq!(options.scaled_resolution(), 300);
    }

    #[test]
    fn numeric_strings_are_parsed_leniently() {
        let raw = RawRenderOptions {
            dpi: text("150dpi"),
            width: text("200"),
            height: text("abc"),
            padding: text("-4"),
            scale: text("1.5"),
            font_size: Some(FieldValue::Integer(14)),
            ..Default::default()
        };
        let options = raw.normalize().expect("valid");
        assert_eq!(options.resolution, 150);
        assert_eq!(options.target_width_px, Some(200));
        assert_eq!(options.target_height_px, None);
        assert_eq!(options.padding_px, 0);
        assert_eq!(options.scale_factor, 1.5);
        assert_eq!(options.font_size_pt, Some(14));
        assert_eq!(options.scaled_resolution(), 225);
    }

    #[test]
    fn non_positive_values_fall_back_to_defaults() {
        let raw = RawRenderOptions {
            dpi: Some(FieldValue::Integer(0)),
            width: text("0"),
            scale: Some(FieldValue::Float(-2.0)),
            ..Default::default()
        };
        let options = raw.normalize().expect("valid");
        assert_eq!(options.resolution, DEFAULT_RESOLUTION);
        assert_eq!(options.target_width_px, None);
        assert_eq!(options.scale_factor, 1.0);
    }

    #[test]
    fn display_is_false_only_when_explicit() {
        let parse = |value: Option<FieldValue>| {
            RawRenderOptions {
                display: value,
                ..Default::default()
            }
            .normalize()
            .expect("valid")
            .display_mode
        };
        assert!(parse(None));
        assert!(parse(text("true")));
        assert!(parse(text("yes")));
        assert!(!parse(text("false")));
        assert!(!parse(Some(FieldValue::Bool(false))));
    }

    #[test]
    fn colors_are_normalised_and_validated() {
        assert_eq!(
            Color::parse("#ff00aa").expect("hex"),
            Color::Hex("FF00AA".into())
        );
        assert_eq!(
            Color::parse("red!50").expect("named"),
            Color::Named("red!50".into())
        );
        assert!(Color::parse("#12345").is_err());
        assert!(Color::parse("red}\\input{/etc/passwd").is_err());
        assert!(Color::parse("black").expect("named").is_black());
        assert!(Color::parse("#000000").expect("hex").is_black());
    }

    #[test]
    fn background_sentinel_and_fill() {
        let transparent = RawRenderOptions {
            background_color: text("Transparent"),
            ..Default::default()
        };
        assert!(transparent.normalize().expect("valid").transparent_background());

        let filled = RawRenderOptions {
            background_color: text("white"),
            ..Default::default()
        };
        assert_eq!(
            filled.normalize().expect("valid").background,
            Background::Fill(Color::Named("white".into()))
        );

        let invalid = RawRenderOptions {
            color: text("#zzzzzz"),
            ..Default::default()
        };
        assert!(matches!(
            invalid.normalize(),
            Err(OptionsError::InvalidColor(_))
        ));
    }

    #[test]
    fn deserialises_mixed_json_scalars() {
        let raw: RawRenderOptions = serde_json::from_value(serde_json::json!({
            "resolution": 600,
            "width": "320",
            "scale": 2.5,
            "display": false,
            "backgroundColor": "transparent"
        }))
        .expect("json");
        let options = raw.normalize().expect("valid");
        assert_eq!(options.resolution, 600);
        assert_eq!(options.target_width_px, Some(320));
        assert_eq!(options.scale_factor, 2.5);
        assert!(!options.display_mode);
        assert_eq!(
            options.pixel_target(),
            Some(PixelTarget::new(Some(320.0), None))
        );
    }

    #[test]
    fn scaled_resolution_is_bounded() {
        let options = RenderOptions {
            resolution: 150,
            scale_factor: 2.0,
            ..RenderOptions::default()
        };
        assert_eq!(options.scaled_resolution(), 300);

        let huge = RawRenderOptions {
            dpi: Some(FieldValue::Text("100000".into())),
            scale: Some(FieldValue::Integer(100)),
            ..Default::default()
        }
        .normalize()
        .expect("valid");
        assert_eq!(huge.scaled_resolution(), MAX_DPI);

        let tiny = RenderOptions {
            resolution: 1,
            scale_factor: 0.01,
            ..RenderOptions::default()
        };
        assert_eq!(tiny.scaled_resolution(), 1);
    }
}
