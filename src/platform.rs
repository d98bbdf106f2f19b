use crate::error::ProbeError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    /// Detects the host family. Called once at startup; the result picks the
    /// strategy every sampler uses for the lifetime of the process.
    pub fn current() -> Result<Self, ProbeError> {
        Self::from_family(std::env::consts::FAMILY)
    }

    pub fn from_family(family: &str) -> Result<Self, ProbeError> {
        match family {
            "unix" => Ok(Self::Posix),
            "windows" => Ok(Self::Windows),
            other => Err(ProbeError::PlatformUnsupported(other.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Posix => f.write_str("posix"),
            Self::Windows => f.write_str("windows"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_families() {
        assert_eq!(Platform::from_family("unix").unwrap(), Platform::Posix);
        assert_eq!(Platform::from_family("windows").unwrap(), Platform::Windows);
    }

    #[test]
    fn unknown_family_is_unsupported() {
        let err = Platform::from_family("wasm").unwrap_err();
        assert!(matches!(err, ProbeError::PlatformUnsupported(ref f) if f == "wasm"));
    }

    #[test]
    fn current_matches_build_target() {
        let platform = Platform::current().unwrap();
        if cfg!(windows) {
            assert_eq!(platform, Platform::Windows);
        } else {
            assert_eq!(platform, Platform::Posix);
        }
    }
}
