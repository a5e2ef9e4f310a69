//! Status topics and how each one is fed.

use crate::config::PollConfig;
use crate::fanout::Channel;
use crate::worker;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A stream of status snapshots, each with its own broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTopic {
    Media,
    Disk,
    RecycleBin,
    Quote,
    Realtime,
}

impl StatusTopic {
    pub const ALL: [Self; 5] = [
        Self::Media,
        Self::Disk,
        Self::RecycleBin,
        Self::Quote,
        Self::Realtime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Disk => "disk",
            Self::RecycleBin => "recyclebin",
            Self::Quote => "quote",
            Self::Realtime => "realtime",
        }
    }

    pub fn channel(self) -> Channel {
        match self {
            Self::Media => Channel::Media,
            Self::Disk => Channel::Disk,
            Self::RecycleBin => Channel::RecycleBin,
            Self::Quote => Channel::Quote,
            Self::Realtime => Channel::Realtime,
        }
    }

    /// Worker endpoint polled for this topic; `None` for push-only topics.
    pub fn endpoint(self) -> Option<&'static str> {
        match self {
            Self::Media => Some(worker::MEDIA_PATH),
            Self::Disk => Some(worker::DISK_PATH),
            Self::RecycleBin => Some(worker::RECYCLE_BIN_PATH),
            Self::Quote => Some(worker::QUOTE_PATH),
            Self::Realtime => None,
        }
    }

    /// Poll interval from `config`; zero means push-only.
    pub fn poll_interval(self, config: &PollConfig) -> Duration {
        let ms = match self {
            Self::Media => config.media_ms,
            Self::Disk => config.disk_ms,
            Self::RecycleBin => config.recyclebin_ms,
            Self::Quote => config.quote_ms,
            Self::Realtime => 0,
        };
        if self.endpoint().is_none() {
            return Duration::ZERO;
        }
        Duration::from_millis(ms)
    }
}

impl fmt::Display for StatusTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Informational view of one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub topic: StatusTopic,
    pub poll_interval: Duration,
    pub has_snapshot: bool,
    /// Sinks that received a replay of this topic.
    pub subscriber_count: usize,
}
