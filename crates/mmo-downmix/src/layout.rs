//! Layout registry (`layouts.yaml`)

use crate::error::{DownmixError, DownmixResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Layout id of plain stereo
pub const STEREO_LAYOUT_ID: &str = "LAYOUT.2_0";

/// One layout entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub label: Option<String>,
    /// Speaker ids in interleaved channel order
    pub channel_order: Vec<String>,
}

impl Layout {
    pub fn channel_count(&self) -> usize {
        self.channel_order.len()
    }

    pub fn speaker_index(&self, speaker: &str) -> Option<usize> {
        self.channel_order.iter().position(|s| s == speaker)
    }
}

#[derive(Debug, Deserialize)]
struct LayoutsFile {
    layouts: BTreeMap<String, serde_yml::Value>,
}

/// All known layouts, keyed by id
#[derive(Debug, Clone, Default)]
pub struct LayoutRegistry {
    layouts: BTreeMap<String, Layout>,
}

impl LayoutRegistry {
    /// Parse `layouts.yaml`; `origin` names the file in errors
    pub fn from_yaml(text: &str, origin: &str) -> DownmixResult<Self> {
        let yaml_err = |error| DownmixError::Yaml {
            path: origin.to_string(),
            error,
        };
        let file: LayoutsFile = serde_yml::from_str(text).map_err(yaml_err)?;

        let mut layouts = BTreeMap::new();
        for (id, value) in file.layouts {
            if id == "_meta" {
                continue;
            }
            let layout: Layout = serde_yml::from_value(value).map_err(yaml_err)?;
            if layout.channel_order.is_empty() {
                return Err(DownmixError::EmptyLayout(id));
            }
            layouts.insert(id, layout);
        }

        Ok(Self { layouts })
    }

    pub fn get(&self, layout_id: &str) -> Option<&Layout> {
        self.layouts.get(layout_id)
    }

    pub fn contains(&self, layout_id: &str) -> bool {
        self.layouts.contains_key(layout_id)
    }

    /// Layout ids in sorted order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.layouts.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Layout)> {
        self.layouts.iter().map(|(id, layout)| (id.as_str(), layout))
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}
