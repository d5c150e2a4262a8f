//! Allocator configuration
//!
//! A [`SpaceConfig`] fixes the geometry of a managed stream at creation time.
//! It can be built in code or loaded from TOML:
//!
//! ```toml
//! page_count = 1000
//! page_size = 512
//! max_root_len = 16
//! btree_order = 4
//! ```

use crate::error::{Result, SpaceError};
use crate::node::NodeLayout;
use crate::scalar::{Operator, DEFAULT_WIDTH};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use validator::Validate;

fn default_width() -> u8 {
    DEFAULT_WIDTH
}

/// Geometry of a managed stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SpaceConfig {
    /// Pages available to clients
    #[validate(range(min = 1))]
    pub page_count: u32,

    /// Bytes per page
    #[validate(range(min = 32))]
    pub page_size: u32,

    /// Holes the flat root index may hold
    #[validate(range(min = 4))]
    pub max_root_len: u16,

    /// Maximum children per B-tree node
    #[validate(range(min = 3))]
    pub btree_order: u16,

    /// Bytes per encoded position or size
    #[serde(default = "default_width")]
    #[validate(range(min = 2, max = 8))]
    pub width: u8,
}

impl SpaceConfig {
    pub fn new(page_count: u32, page_size: u32, max_root_len: u16, btree_order: u16) -> Self {
        SpaceConfig {
            page_count,
            page_size,
            max_root_len,
            btree_order,
            width: DEFAULT_WIDTH,
        }
    }

    pub fn with_width(mut self, width: u8) -> Self {
        self.width = width;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SpaceConfig = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| SpaceError::InvalidConfig(e.to_string()))
    }

    pub fn operator(&self) -> Result<Operator> {
        Operator::new(self.width)
    }

    pub fn order(&self) -> usize {
        self.btree_order as usize
    }

    /// Field ranges plus the cross-field geometry rules
    ///
    /// A node must fit between the boundary tags of a single page.
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        let op = self.operator()?;
        let layout = NodeLayout::new(op, self.order());
        let room = self.page_size as usize - 2 * op.len();
        if layout.encoded_len() > room {
            return Err(SpaceError::InvalidConfig(format!(
                "order {} needs {} bytes per node, but a page of {} bytes leaves {}",
                self.btree_order,
                layout.encoded_len(),
                self.page_size,
                room
            )));
        }

        if self.max_root_len as u64 > op.max_value() {
            return Err(SpaceError::InvalidConfig(format!(
                "max_root_len {} does not fit a {}-byte field",
                self.max_root_len, self.width
            )));
        }

        Ok(())
    }
}

impl Default for SpaceConfig {
    fn default() -> Self {
        SpaceConfig::new(1000, 512, 16, 4)
    }
}
