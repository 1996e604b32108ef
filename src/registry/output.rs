//! Egress protocol descriptors

use std::fmt;
use std::str::FromStr;

use super::error::RegistryError;

/// Egress protocols a stream can be published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputProtocol {
    Rtsp,
    Rtmp,
    /// SIP-derived surveillance protocol
    Gb28181,
    /// Proprietary push/pull protocol
    Dmi,
}

impl OutputProtocol {
    pub const ALL: [OutputProtocol; 4] = [
        OutputProtocol::Rtsp,
        OutputProtocol::Rtmp,
        OutputProtocol::Gb28181,
        OutputProtocol::Dmi,
    ];

    /// Lower-cased protocol name
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputProtocol::Rtsp => "rtsp",
            OutputProtocol::Rtmp => "rtmp",
            OutputProtocol::Gb28181 => "gb28181",
            OutputProtocol::Dmi => "dmi",
        }
    }
}

impl FromStr for OutputProtocol {
    type Err = RegistryError;

    /// Case-insensitive lookup against the allow-list
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputProtocol::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RegistryError::UnsupportedProtocol(s.to_string()))
    }
}

impl fmt::Display for OutputProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One egress protocol enabled on a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub protocol: OutputProtocol,
    pub enabled: bool,
    /// Protocol-specific parameter (e.g. a GB28181 channel id)
    pub param: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("RTSP".parse::<OutputProtocol>(), Ok(OutputProtocol::Rtsp));
        assert_eq!("GB28181".parse::<OutputProtocol>(), Ok(OutputProtocol::Gb28181));
        assert_eq!("dmi".parse::<OutputProtocol>(), Ok(OutputProtocol::Dmi));
        assert_eq!(
            "hls".parse::<OutputProtocol>(),
            Err(RegistryError::UnsupportedProtocol("hls".into()))
        );
    }

    #[test]
    fn test_display_lower_case() {
        assert_eq!(OutputProtocol::Rtmp.to_string(), "rtmp");
    }
}
