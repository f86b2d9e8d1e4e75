//! Column compression codecs for the Parquet output.
//!
//! - None: uncompressed pages
//! - Snappy: fast, moderate ratio (default)
//! - Gzip: slower, better ratio
//! - Zstd: good ratio at reasonable speed

use parquet::basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel};

/// Compression codec applied to every column chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Snappy,
    Gzip,
    Zstd,
}

impl Compression {
    /// Parse compression from string (case-insensitive).
    ///
    /// Valid values: "none", "snappy", "gzip", "zstd"
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "uncompressed" => Some(Compression::None),
            "snappy" => Some(Compression::Snappy),
            "gzip" => Some(Compression::Gzip),
            "zstd" => Some(Compression::Zstd),
            _ => Option::None,
        }
    }

    /// Get a human-readable name for this compression type.
    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Snappy => "snappy",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }

    /// Codec setting for the Parquet writer, at the codec's default level.
    pub fn to_parquet(self) -> ParquetCompression {
        match self {
            Compression::None => ParquetCompression::UNCOMPRESSED,
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Gzip => ParquetCompression::GZIP(GzipLevel::default()),
            Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!(Compression::from_str("none"), Some(Compression::None));
        assert_eq!(Compression::from_str("SNAPPY"), Some(Compression::Snappy));
        assert_eq!(Compression::from_str("Gzip"), Some(Compression::Gzip));
        assert_eq!(Compression::from_str("zstd"), Some(Compression::Zstd));
        assert_eq!(Compression::from_str("brotli"), Option::None);
        assert_eq!(Compression::from_str(""), Option::None);
    }

    #[test]
    fn test_name_round_trips_through_from_str() {
        for c in [
            Compression::None,
            Compression::Snappy,
            Compression::Gzip,
            Compression::Zstd,
        ] {
            assert_eq!(Compression::from_str(c.name()), Some(c));
        }
    }

    #[test]
    fn test_default_is_snappy() {
        assert_eq!(Compression::default(), Compression::Snappy);
        assert_eq!(Compression::default().to_parquet(), ParquetCompression::SNAPPY);
    }

    #[test]
    fn test_to_parquet() {
        assert_eq!(
            Compression::None.to_parquet(),
            ParquetCompression::UNCOMPRESSED
        );
        assert!(matches!(
            Compression::Zstd.to_parquet(),
            ParquetCompression::ZSTD(_)
        ));
    }
}
