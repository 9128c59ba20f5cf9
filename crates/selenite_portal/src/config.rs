use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::portal::PortalId;
use crate::traveller::TravellerId;

const MIN_RECURSION_LIMIT: u32 = 1;
const MAX_RECURSION_LIMIT: u32 = 64;
const MIN_NEAR_CLIP_OFFSET: f32 = 0.0;
const MAX_NEAR_CLIP_OFFSET: f32 = 1.0;
const MIN_NEAR_CLIP_LIMIT: f32 = 0.01;
const MAX_NEAR_CLIP_LIMIT: f32 = 5.0;

/// Authoring-time portal tuning. Sanitized once when loaded or applied;
/// never re-validated per frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortalSettings {
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: u32,
    #[serde(default = "default_near_clip_offset")]
    pub near_clip_offset: f32,
    #[serde(default = "default_near_clip_limit")]
    pub near_clip_limit: f32,
    #[serde(default)]
    pub log_debug_messages: bool,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
            near_clip_offset: default_near_clip_offset(),
            near_clip_limit: default_near_clip_limit(),
            log_debug_messages: false,
        }
    }
}

impl PortalSettings {
    pub fn sanitize(mut self) -> Self {
        self.recursion_limit = self
            .recursion_limit
            .clamp(MIN_RECURSION_LIMIT, MAX_RECURSION_LIMIT);
        self.near_clip_offset = self
            .near_clip_offset
            .clamp(MIN_NEAR_CLIP_OFFSET, MAX_NEAR_CLIP_OFFSET);
        self.near_clip_limit = self
            .near_clip_limit
            .clamp(MIN_NEAR_CLIP_LIMIT, MAX_NEAR_CLIP_LIMIT);
        self
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let parsed = toml::from_str::<Self>(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to deserialize portal settings: {e}"),
            )
        })?;
        Ok(parsed.sanitize())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let settings = self.sanitize();
        let serialized = toml::to_string_pretty(&settings).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize portal settings: {e}"),
            )
        })?;
        fs::write(path, serialized)
    }
}

fn default_recursion_limit() -> u32 {
    5
}

fn default_near_clip_offset() -> f32 {
    0.05
}

fn default_near_clip_limit() -> f32 {
    0.2
}

/// Setup-time configuration failures. Detected once when the scene is
/// assembled; frame-time code assumes a validated system and degrades to
/// skips instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    MissingLinkedPortal(PortalId),
    AsymmetricLink {
        portal: PortalId,
        linked: PortalId,
    },
    MaterialCountMismatch {
        /// `None` when the mismatch is caught at registration, before an id
        /// exists.
        traveller: Option<TravellerId>,
        originals: usize,
        clones: usize,
    },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::MissingLinkedPortal(portal) => {
                write!(f, "portal {} has no linked portal", portal.0)
            }
            SetupError::AsymmetricLink { portal, linked } => write!(
                f,
                "portal {} links to portal {}, which does not link back",
                portal.0, linked.0
            ),
            SetupError::MaterialCountMismatch {
                traveller: Some(traveller),
                originals,
                clones,
            } => write!(
                f,
                "traveller {} has {originals} original materials but {clones} clone materials",
                traveller.0
            ),
            SetupError::MaterialCountMismatch {
                traveller: None,
                originals,
                clones,
            } => write!(
                f,
                "traveller has {originals} original materials but {clones} clone materials"
            ),
        }
    }
}

impl std::error::Error for SetupError {}
