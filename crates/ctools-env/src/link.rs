//! How a cached package was placed into an environment.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Link mechanism recorded in `conda-meta/*.json` under `link.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkType {
    /// Files share an inode with the cache copy
    HardLink = 1,
    SoftLink = 2,
    Copy = 3,
    /// Root install, nothing relocated
    Directory = 4,
}

impl LinkType {
    pub const ALL: [LinkType; 4] = [
        LinkType::HardLink,
        LinkType::SoftLink,
        LinkType::Copy,
        LinkType::Directory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::HardLink => "hard-link",
            LinkType::SoftLink => "soft-link",
            LinkType::Copy => "copy",
            LinkType::Directory => "directory",
        }
    }

    /// Legacy integer form.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(LinkType::HardLink),
            2 => Some(LinkType::SoftLink),
            3 => Some(LinkType::Copy),
            4 => Some(LinkType::Directory),
            _ => None,
        }
    }

    pub fn code(&self) -> u64 {
        *self as u64
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hard-link" | "hardlink" => Ok(LinkType::HardLink),
            "soft-link" | "softlink" => Ok(LinkType::SoftLink),
            "copy" => Ok(LinkType::Copy),
            "directory" => Ok(LinkType::Directory),
            other => other
                .parse::<u64>()
                .ok()
                .and_then(LinkType::from_code)
                .ok_or_else(|| format!("unknown link type: {s}")),
        }
    }
}

impl Serialize for LinkType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LinkType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LinkTypeVisitor;

        impl Visitor<'_> for LinkTypeVisitor {
            type Value = LinkType;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a link type name or an integer between 1 and 4")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<LinkType, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<LinkType, E> {
                LinkType::from_code(v).ok_or_else(|| E::custom(format!("unknown link type code: {v}")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<LinkType, E> {
                u64::try_from(v)
                    .ok()
                    .and_then(LinkType::from_code)
                    .ok_or_else(|| E::custom(format!("unknown link type code: {v}")))
            }
        }

        deserializer.deserialize_any(LinkTypeVisitor)
    }
}
