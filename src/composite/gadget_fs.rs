//! File-backed USB device stack
//!
//! Publishes the composite descriptor into a directory, in the spirit of a
//! gadget-fs/configfs tree:
//!
//! ```text
//! <root>/descriptors     raw descriptor buffer
//! <root>/manifest.json   interfaces and endpoints per function
//! <root>/state           "configured" or "not attached"
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::stack::{EndpointHandle, InterfaceHandle, UsbDeviceStack};
use crate::error::{AppError, Result};

pub const DESCRIPTORS_FILE: &str = "descriptors";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const STATE_FILE: &str = "state";

pub const STATE_CONFIGURED: &str = "configured";
pub const STATE_NOT_ATTACHED: &str = "not attached";

/// Interface/endpoint manifest written on initialize
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub interfaces: Vec<ManifestEntry>,
    pub endpoints: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub function: String,
    /// Interface number or endpoint address
    pub value: u8,
}

/// Write a text attribute in a single write() call, newline terminated
fn write_file(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| AppError::Internal(format!("Failed to open {}: {}", path.display(), e)))?;

    let data: std::borrow::Cow<[u8]> = if content.ends_with('\n') {
        content.as_bytes().into()
    } else {
        let mut buf = content.as_bytes().to_vec();
        buf.push(b'\n');
        buf.into()
    };

    file.write_all(&data)
        .map_err(|e| AppError::Internal(format!("Failed to write to {}: {}", path.display(), e)))?;
    file.flush()
        .map_err(|e| AppError::Internal(format!("Failed to flush {}: {}", path.display(), e)))?;
    Ok(())
}

fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path)
        .map_err(|e| AppError::Internal(format!("Failed to create {}: {}", path.display(), e)))?;
    file.write_all(data)
        .map_err(|e| AppError::Internal(format!("Failed to write to {}: {}", path.display(), e)))?;
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| AppError::Internal(format!("Failed to read {}: {}", path.display(), e)))
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        AppError::Internal(format!(
            "Failed to create directory {}: {}",
            path.display(),
            e
        ))
    })
}

fn remove_file(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| {
            AppError::Internal(format!("Failed to remove file {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

/// Stack implementation writing into an output directory
#[derive(Debug)]
pub struct FileStack {
    root: PathBuf,
    pending: Manifest,
    has_descriptor: bool,
    initialized: bool,
}

impl FileStack {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending: Manifest::default(),
            has_descriptor: false,
            initialized: false,
        }
    }

    /// Read the published state attribute of a stack directory
    pub fn read_state(root: &Path) -> Result<String> {
        read_file(&root.join(STATE_FILE))
    }

    /// Whether a stack directory currently presents a device
    pub fn is_configured(root: &Path) -> bool {
        Self::read_state(root).is_ok_and(|s| s == STATE_CONFIGURED)
    }

    pub fn read_descriptor(root: &Path) -> Result<Vec<u8>> {
        let path = root.join(DESCRIPTORS_FILE);
        fs::read(&path)
            .map_err(|e| AppError::Internal(format!("Failed to read {}: {}", path.display(), e)))
    }

    pub fn read_manifest(root: &Path) -> Result<Manifest> {
        let content = read_file(&root.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl UsbDeviceStack for FileStack {
    fn register_descriptor(&mut self, descriptor: Bytes) -> Result<()> {
        create_dir(&self.root)?;
        write_bytes(&self.root.join(DESCRIPTORS_FILE), &descriptor)?;
        self.pending = Manifest::default();
        self.has_descriptor = true;
        debug!(
            "Wrote {} descriptor bytes to {}",
            descriptor.len(),
            self.root.display()
        );
        Ok(())
    }

    fn add_interface(&mut self, interface: InterfaceHandle) -> Result<()> {
        self.pending.interfaces.push(ManifestEntry {
            function: interface.function,
            value: interface.number,
        });
        Ok(())
    }

    fn add_endpoint(&mut self, endpoint: EndpointHandle) -> Result<()> {
        self.pending.endpoints.push(ManifestEntry {
            function: endpoint.function,
            value: endpoint.address,
        });
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        if !self.has_descriptor {
            return Err(AppError::NotReady(
                "no descriptor registered with the stack".to_string(),
            ));
        }
        let manifest = serde_json::to_string_pretty(&self.pending)?;
        write_file(&self.root.join(MANIFEST_FILE), &manifest)?;
        write_file(&self.root.join(STATE_FILE), STATE_CONFIGURED)?;
        self.initialized = true;
        info!("USB device presented via {}", self.root.display());
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<()> {
        if self.root.exists() {
            write_file(&self.root.join(STATE_FILE), STATE_NOT_ATTACHED)?;
            remove_file(&self.root.join(MANIFEST_FILE))?;
        }
        if self.initialized {
            info!("USB device withdrawn from {}", self.root.display());
        }
        self.initialized = false;
        self.has_descriptor = false;
        Ok(())
    }
}
