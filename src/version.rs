use std::{
    fmt::{self, Display},
    str::FromStr,
};

use crate::error::VersionError;

/// Four component Bedrock build number, e.g. `1.21.95.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

/// Latest build advertised by the download feed for this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub version: ServerVersion,
    pub url: String,
}

/// Host operating systems the feed publishes server packages for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
}

impl Platform {
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Platform::Windows)
        } else if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else {
            None
        }
    }

    /// Key under which the feed lists this platform once the `serverBedrock`
    /// marker has been stripped from its download type.
    pub fn feed_key(&self, preview: bool) -> String {
        let os = match self {
            Platform::Windows => "Windows",
            Platform::Linux => "Linux",
        };
        if preview {
            format!("Preview{os}")
        } else {
            os.to_string()
        }
    }
}

impl Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.build
        )
    }
}

impl Display for ResolvedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.url)
    }
}

impl FromStr for ServerVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut split = s.split('.');

        let major_str = split.next().ok_or(VersionError::MissingMajor)?;
        let minor_str = split.next().ok_or(VersionError::MissingMinor)?;
        let patch_str = split.next().ok_or(VersionError::MissingPatch)?;
        let build_str = split.next().ok_or(VersionError::MissingBuild)?;

        if split.next().is_some() {
            return Err(VersionError::ExtraComponents);
        }

        let major = major_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectMajor(major_str.to_string()))?;

        let minor = minor_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectMinor(minor_str.to_string()))?;

        let patch = patch_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectPatch(patch_str.to_string()))?;

        let build = build_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectBuild(build_str.to_string()))?;

        Ok(Self {
            major,
            minor,
            patch,
            build,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_four_components() {
        let v: ServerVersion = "1.21.95.1".parse().unwrap();
        assert_eq!(
            v,
            ServerVersion {
                major: 1,
                minor: 21,
                patch: 95,
                build: 1
            }
        );
        assert_eq!(v.to_string(), "1.21.95.1");
    }

    #[test]
    fn rejects_short_and_long_versions() {
        assert_eq!(
            "1.21.95".parse::<ServerVersion>(),
            Err(VersionError::MissingBuild)
        );
        assert_eq!(
            "1.21.95.1.7".parse::<ServerVersion>(),
            Err(VersionError::ExtraComponents)
        );
        assert_eq!(
            "1.x.95.1".parse::<ServerVersion>(),
            Err(VersionError::IncorrectMinor("x".into()))
        );
    }

    #[test]
    fn orders_numerically_not_lexically() {
        let older: ServerVersion = "1.21.9.1".parse().unwrap();
        let newer: ServerVersion = "1.21.10.0".parse().unwrap();
        assert!(newer > older);
    }

    #[test]
    fn feed_key_includes_preview_prefix() {
        assert_eq!(Platform::Linux.feed_key(false), "Linux");
        assert_eq!(Platform::Windows.feed_key(true), "PreviewWindows");
    }
}
