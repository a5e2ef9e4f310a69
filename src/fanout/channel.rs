//! Typed broadcast channels and their wire names.

use crate::reload::DocumentName;
use std::fmt;

/// A named broadcast channel understood by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `<document>:update` for a config document.
    ConfigUpdate(DocumentName),
    /// `disk:update`
    Disk,
    /// `recyclebin:update`
    RecycleBin,
    /// `quote:update`
    Quote,
    /// `media:update`
    Media,
    /// `realtime:update`, the catch-all for stream records.
    Realtime,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigUpdate(doc) => write!(f, "{}:update", doc.as_str()),
            Self::Disk => f.write_str("disk:update"),
            Self::RecycleBin => f.write_str("recyclebin:update"),
            Self::Quote => f.write_str("quote:update"),
            Self::Media => f.write_str("media:update"),
            Self::Realtime => f.write_str("realtime:update"),
        }
    }
}
