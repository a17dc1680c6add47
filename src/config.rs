//! Automaton configuration.
//!
//! The configuration is small: it carries facts about the trace that change
//! how some payloads must be interpreted. It can be built in code or loaded
//! from JSON:
//!
//! ```json
//! {
//!   "tracer_version": "2.7.0"
//! }
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Version of the tracer (lttng-modules) that produced the trace.
///
/// Ordering only considers `major.minor.patch`; the `extra` suffix
/// (`-rc1`, `-pre`, ...) is kept for display.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TracerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub extra: Option<String>,
}

/// lttng-modules releases before this one emit `sched_wak*` priorities with a
/// +100 offset.
pub const PRIO_OFFSET_FIX_VERSION: TracerVersion = TracerVersion::new(2, 7, 1);

impl TracerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            extra: None,
        }
    }

    fn key(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

impl PartialEq for TracerVersion {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TracerVersion {}

impl PartialOrd for TracerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TracerVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for TracerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(extra) = &self.extra {
            write!(f, "{extra}")?;
        }
        Ok(())
    }
}

impl FromStr for TracerVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let numeric_end = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        let (numeric, extra) = s.split_at(numeric_end);

        let parts: Vec<&str> = numeric.split('.').collect();
        if parts.len() != 3 {
            return Err(anyhow::anyhow!(
                "Invalid tracer version {s}, expected major.minor.patch"
            ));
        }

        let parse = |part: &str| -> Result<u32> {
            part.parse::<u32>()
                .with_context(|| format!("Invalid tracer version component {part:?} in {s}"))
        };

        Ok(Self {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
            extra: (!extra.is_empty()).then(|| extra.to_string()),
        })
    }
}

impl TryFrom<String> for TracerVersion {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TracerVersion> for String {
    fn from(version: TracerVersion) -> Self {
        version.to_string()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutomatonConfig {
    /// Version of the tracer that recorded the trace. Unknown means a
    /// current tracer.
    #[serde(default)]
    pub tracer_version: Option<TracerVersion>,
}

impl AutomatonConfig {
    pub fn from_json(buf: &str) -> Result<Self> {
        let config: AutomatonConfig = serde_json::from_str(buf)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let buf = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&buf)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Whether `sched_wak*` priorities need the +100 offset removed.
    pub fn needs_prio_offset_fix(&self) -> bool {
        self.tracer_version
            .as_ref()
            .is_some_and(|v| *v < PRIO_OFFSET_FIX_VERSION)
    }
}
