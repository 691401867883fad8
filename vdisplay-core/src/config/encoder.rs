//! Encoder option string parsing
//!
//! Options are given in `-key value` form, e.g.
//! `-codec hevc -preset ll -rc cbr -bitrate 20M -gop 120`.
//! Keys the pipeline does not interpret are kept and handed to the backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Video codec for encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.264 / AVC
    #[default]
    H264,
    /// H.265 / HEVC
    Hevc,
    /// Uncompressed surfaces (no hardware encoder)
    Raw,
}

impl Codec {
    /// FFmpeg encoder name for NVENC, if this codec uses one
    pub fn nvenc_encoder(&self) -> Option<&'static str> {
        match self {
            Self::H264 => Some("h264_nvenc"),
            Self::Hevc => Some("hevc_nvenc"),
            Self::Raw => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::H264 => "H.264",
            Self::Hevc => "HEVC",
            Self::Raw => "Raw",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "h264" | "avc" | "264" => Ok(Self::H264),
            "hevc" | "h265" | "265" => Ok(Self::Hevc),
            "raw" | "none" => Ok(Self::Raw),
            _ => Err(format!("Unknown codec: {}", s)),
        }
    }
}

/// Rate control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateControl {
    #[default]
    Cbr,
    Vbr,
    /// Constant QP
    ConstQp,
}

impl RateControl {
    /// Value for the NVENC `rc` option
    pub fn nvenc_value(&self) -> &'static str {
        match self {
            Self::Cbr => "cbr",
            Self::Vbr => "vbr",
            Self::ConstQp => "constqp",
        }
    }
}

impl std::str::FromStr for RateControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cbr" => Ok(Self::Cbr),
            "vbr" => Ok(Self::Vbr),
            "constqp" | "cqp" => Ok(Self::ConstQp),
            _ => Err(format!("Unknown rate control mode: {}", s)),
        }
    }
}

/// Parsed encoder options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderOptions {
    pub codec: Codec,
    /// Encoder preset (e.g. "ll", "p1".."p7")
    pub preset: String,
    pub rate_control: RateControl,
    /// Target bitrate in bits per second
    pub bitrate: u64,
    /// Keyframe interval in frames (None = encoder default)
    pub gop: Option<u32>,
    /// Frame rate override; defaults to the display refresh rate
    pub fps: Option<u32>,
    /// Options passed through to the backend untouched
    pub extra: BTreeMap<String, String>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            codec: Codec::H264,
            preset: "ll".to_string(),
            rate_control: RateControl::Cbr,
            bitrate: 8_000_000,
            gop: None,
            fps: None,
            extra: BTreeMap::new(),
        }
    }
}

impl EncoderOptions {
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_gop(mut self, gop: u32) -> Self {
        self.gop = Some(gop);
        self
    }

    /// Bitrate in kbps
    pub fn bitrate_kbps(&self) -> u64 {
        self.bitrate / 1000
    }
}

/// Parse a bitrate such as "8M", "500k" or "2500000"
pub fn parse_bitrate(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last() {
        Some('k' | 'K') => (&value[..value.len() - 1], 1_000.0),
        Some('m' | 'M') => (&value[..value.len() - 1], 1_000_000.0),
        _ => (value, 1.0),
    };
    let number: f64 = digits
        .parse()
        .map_err(|_| format!("Invalid bitrate: {}", value))?;
    if number <= 0.0 {
        return Err(format!("Bitrate must be positive: {}", value));
    }
    Ok((number * multiplier) as u64)
}

impl std::str::FromStr for EncoderOptions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = Self::default();
        let mut tokens = s.split_whitespace().peekable();

        while let Some(token) = tokens.next() {
            let key = token
                .strip_prefix('-')
                .ok_or_else(|| format!("Expected an option, found '{}'", token))?
                .to_lowercase();
            let value = match tokens.peek() {
                Some(next) if !next.starts_with('-') || next.parse::<f64>().is_ok() => {
                    tokens.next().unwrap_or_default()
                }
                _ => "",
            };

            let require = |value: &str| {
                if value.is_empty() {
                    Err(format!("Option -{} needs a value", key))
                } else {
                    Ok(value.to_string())
                }
            };

            match key.as_str() {
                "codec" => options.codec = require(value)?.parse()?,
                "preset" => options.preset = require(value)?,
                "rc" => options.rate_control = require(value)?.parse()?,
                "bitrate" => options.bitrate = parse_bitrate(&require(value)?)?,
                "gop" => {
                    options.gop = Some(
                        require(value)?
                            .parse()
                            .map_err(|_| format!("Invalid gop: {}", value))?,
                    )
                }
                "fps" => {
                    options.fps = Some(
                        require(value)?
                            .parse()
                            .map_err(|_| format!("Invalid fps: {}", value))?,
                    )
                }
                _ => {
                    options.extra.insert(key.clone(), value.to_string());
                }
            }
        }

        Ok(options)
    }
}

impl std::fmt::Display for EncoderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "-codec {} -preset {} -rc {} -bitrate {}",
            match self.codec {
                Codec::H264 => "h264",
                Codec::Hevc => "hevc",
                Codec::Raw => "raw",
            },
            self.preset,
            self.rate_control.nvenc_value(),
            self.bitrate
        )?;
        if let Some(gop) = self.gop {
            write!(f, " -gop {}", gop)?;
        }
        if let Some(fps) = self.fps {
            write!(f, " -fps {}", fps)?;
        }
        for (key, value) in &self.extra {
            write!(f, " -{}", key)?;
            if !value.is_empty() {
                write!(f, " {}", value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_option_string() {
        let options: EncoderOptions = "-codec hevc -preset p4 -rc vbr -bitrate 20M -gop 120 -fps 90"
            .parse()
            .unwrap();
        assert_eq!(options.codec, Codec::Hevc);
        assert_eq!(options.preset, "p4");
        assert_eq!(options.rate_control, RateControl::Vbr);
        assert_eq!(options.bitrate, 20_000_000);
        assert_eq!(options.gop, Some(120));
        assert_eq!(options.fps, Some(90));
    }

    #[test]
    fn test_empty_string_is_default() {
        let options: EncoderOptions = "".parse().unwrap();
        assert_eq!(options, EncoderOptions::default());
    }

    #[test]
    fn test_unknown_keys_are_passed_through() {
        let options: EncoderOptions = "-tuning_info ull -zerolatency".parse().unwrap();
        assert_eq!(options.extra.get("tuning_info").map(String::as_str), Some("ull"));
        assert_eq!(options.extra.get("zerolatency").map(String::as_str), Some(""));
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!("-codec vp9".parse::<EncoderOptions>().is_err());
        assert!("-bitrate".parse::<EncoderOptions>().is_err());
        assert!("codec h264".parse::<EncoderOptions>().is_err());
    }

    #[test]
    fn test_bitrate_units() {
        assert_eq!(parse_bitrate("500k"), Ok(500_000));
        assert_eq!(parse_bitrate("1.5M"), Ok(1_500_000));
        assert_eq!(parse_bitrate("2500000"), Ok(2_500_000));
        assert!(parse_bitrate("-1").is_err());
    }

    #[test]
    fn test_display_reparses() {
        let options = EncoderOptions::default().with_codec(Codec::Hevc).with_gop(60);
        let reparsed: EncoderOptions = options.to_string().parse().unwrap();
        assert_eq!(reparsed, options);
    }
}
