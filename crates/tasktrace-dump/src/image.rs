//! Data-URI helpers for screenshot payloads.

use crate::{Error, Result};
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static DATA_URI_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:image/(png|jpeg|jpg);base64,").expect("valid data uri regex")
});

// Captured screenshots are not always canonically padded
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// Format declared by a data URI; anything unrecognized is treated as PNG
    pub fn from_data_uri(data: &str) -> Self {
        match DATA_URI_PREFIX.captures(data).and_then(|c| c.get(1)) {
            Some(m) if m.as_str() != "png" => ImageFormat::Jpeg,
            _ => ImageFormat::Png,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => ImageFormat::Jpeg,
            _ => ImageFormat::Png,
        }
    }
}

/// Strip a recognized `data:image/...;base64,` prefix, if present
pub fn strip_data_uri_prefix(data: &str) -> &str {
    match DATA_URI_PREFIX.find(data) {
        Some(m) => &data[m.end()..],
        None => data,
    }
}

/// Decode a screenshot payload into its format and raw image bytes
pub fn decode_payload(data: &str) -> Result<(ImageFormat, Vec<u8>)> {
    let format = ImageFormat::from_data_uri(data);
    let bytes = LENIENT
        .decode(strip_data_uri_prefix(data).trim())
        .map_err(|e| Error::InvalidImageData(e.to_string()))?;
    Ok((format, bytes))
}

/// Re-encode raw image bytes as a data URI
pub fn encode_payload(format: ImageFormat, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", format.mime(), STANDARD.encode(bytes))
}
