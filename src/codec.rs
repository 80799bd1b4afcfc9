//! Known video codec allow-list and the validator built on it.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodecInfo {
    pub value: String,
    pub name: String,
}

struct CodecRow {
    value: &'static str,
    name: &'static str,
}

macro_rules! codec_table {
    (
        $( [$value:expr, $name:expr] ),* $(,)?
    ) => {
        const CODEC_TABLE: &[CodecRow] = &[
            $( CodecRow {
                value: $value,
                name: $name,
            } ),*
        ];

        /// Codec names (as ffprobe reports them in `codec_name`) accepted by the default validator.
        pub const VALID_CODECS: &[&str] = &[ $($value),* ];
    };
}

codec_table!(
    ["h264", "H.264 / AVC"],
    ["h265", "H.265 / HEVC"],
    ["vp8", "VP8"],
    ["vp9", "VP9"],
);

/// Exact, case-sensitive membership test against an immutable codec list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecValidator {
    allowed: &'static [&'static str],
}

impl CodecValidator {
    pub const fn new(allowed: &'static [&'static str]) -> Self {
        Self { allowed }
    }

    pub fn is_valid(&self, codec_name: &str) -> bool {
        self.allowed.contains(&codec_name)
    }

    pub fn codecs(&self) -> &'static [&'static str] {
        self.allowed
    }
}

impl Default for CodecValidator {
    fn default() -> Self {
        Self::new(VALID_CODECS)
    }
}

/// Whether `codec_name` is in the built-in allow-list.
pub fn is_valid_codec(codec_name: &str) -> bool {
    CodecValidator::default().is_valid(codec_name)
}

/// Display info for an allow-listed codec; None for anything else.
pub fn get_codec_info(codec: &str) -> Option<CodecInfo> {
    CODEC_TABLE
        .iter()
        .find(|r| r.value == codec)
        .map(|row| CodecInfo {
            value: row.value.to_string(),
            name: row.name.to_string(),
        })
}

/// Info for every allow-listed codec, in table order.
pub fn all_codec_info() -> Vec<CodecInfo> {
    VALID_CODECS.iter().filter_map(|c| get_codec_info(c)).collect()
}
