//! Page identity and the page-list scan.

pub mod listing;

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

pub use listing::{parse_page_list, page_link_pattern};

/// Identifier assigned by the wiki to each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u32);

impl PageId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Identifier → title, ordered by identifier.
pub type PageList = BTreeMap<PageId, String>;
