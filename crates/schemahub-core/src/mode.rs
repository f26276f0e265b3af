//! Subject and context operating modes.

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Operating mode of a subject (or, under the empty subject, a context).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Normal operation: registrations and reads allowed.
    #[default]
    ReadWrite,
    /// Reads only; any write is rejected.
    ReadOnly,
    /// Migration mode: compatibility checks are skipped and schemas may be
    /// inserted with caller-chosen ids.
    Import,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::ReadWrite => "READWRITE",
            Mode::ReadOnly => "READONLY",
            Mode::Import => "IMPORT",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READWRITE" => Ok(Mode::ReadWrite),
            "READONLY" => Ok(Mode::ReadOnly),
            "IMPORT" => Ok(Mode::Import),
            other => Err(RegistryError::InvalidMode(other.to_string())),
        }
    }
}
