//! Enumeration tables - which functions make up a composite device

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, Result};

/// A compiled-in enumeration table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preset {
    pub name: &'static str,
    pub functions: &'static [&'static str],
}

impl Preset {
    pub fn contains(&self, function: &str) -> bool {
        self.functions.iter().any(|f| *f == function)
    }
}

/// Enumeration tables, addressed 1-based
pub const PRESETS: &[Preset] = &[
    Preset {
        name: "table1",
        functions: &["disp", "msc", "uac", "touch"],
    },
    Preset {
        name: "table2",
        functions: &["msc", "uac"],
    },
    Preset {
        name: "table3",
        functions: &["msc"],
    },
    Preset {
        name: "table4",
        functions: &["uvc", "uac"],
    },
    Preset {
        name: "table5",
        functions: &["cdc_acm", "msc"],
    },
];

/// Tracks the active enumeration table
#[derive(Debug, Clone, Default)]
pub struct PresetSelector {
    /// 1-based index into `PRESETS`, 0 while no table is selected
    current: usize,
}

impl PresetSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a table index without changing the selection
    ///
    /// Index 0 is coerced to 1 with a warning.
    pub fn resolve(index: usize) -> Result<usize> {
        let index = if index == 0 {
            warn!("Enumeration table index 0 is invalid, using table 1");
            1
        } else {
            index
        };
        if index > PRESETS.len() {
            return Err(AppError::Range(format!(
                "enumeration table {} does not exist ({} available)",
                index,
                PRESETS.len()
            )));
        }
        Ok(index)
    }

    /// Activate a table, returning its function count
    pub fn select(&mut self, index: usize) -> Result<usize> {
        let index = Self::resolve(index)?;
        self.current = index;
        let preset = &PRESETS[index - 1];
        info!(
            "Selected enumeration table {} ({}): {:?}",
            index, preset.name, preset.functions
        );
        Ok(preset.functions.len())
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<&'static Preset> {
        self.current.checked_sub(1).and_then(|i| PRESETS.get(i))
    }

    /// Expected function count (`max_dev_num`), 0 when unbounded
    pub fn expected_count(&self) -> usize {
        self.current().map_or(0, |p| p.functions.len())
    }

    /// Whether `function` takes part in composition under the current table
    pub fn admits(&self, function: &str) -> bool {
        self.current().map_or(true, |p| p.contains(function))
    }
}
