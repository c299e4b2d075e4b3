//! Domain primitives for the reconciliation engine.
//!
//! Strongly-typed identifiers and the platform tag shared by models,
//! matcher and validator.

pub mod events;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Steam catalog app id.
///
/// Stored as a string because it is a document key, but relationship
/// fields (`demo_id`, `full_game_id`) are expected to be numeric; the
/// validator flags non-numeric values.
///
/// # Examples
///
/// ```rust
/// use demoarr::domain::AppId;
///
/// let id = AppId::new("440");
/// assert!(id.is_numeric());
/// assert_eq!(id.to_string(), "440");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AppId(String);

impl AppId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id consists solely of ASCII digits.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AppId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AppId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Serialize for AppId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AppId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = String::deserialize(deserializer)?;
        Ok(Self(id))
    }
}

/// Source platform tag carried by game references and free listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Steam,
    Itch,
    GameJolt,
}

impl Platform {
    /// The secondary platforms the matcher links against the catalog.
    pub const SECONDARY: [Self; 2] = [Self::Itch, Self::GameJolt];

    /// Whether listings on this platform are predominantly
    /// demo-equivalents of catalog games. The matcher's precedence
    /// rule denies auto-links from demo-like platforms whenever the
    /// catalog entity carries its own demo/full pair.
    #[must_use]
    pub const fn is_demo_like(self) -> bool {
        matches!(self, Self::Itch)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Steam => "steam",
            Self::Itch => "itch",
            Self::GameJolt => "game_jolt",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
