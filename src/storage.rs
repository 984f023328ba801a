// src/storage.rs
//! Channel snapshot persistence
//!
//! Channels live in memory; the store writes a JSON snapshot per channel so
//! an operator can inspect state and a restarted node can reload it. One
//! file per channel, named by channel id.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use crate::channel::Channel;
use crate::error::StorageError;
use crate::types::ChannelId;

const SNAPSHOT_PREFIX: &str = "channel-";
const SNAPSHOT_SUFFIX: &str = ".json";

/// Directory-backed store of channel snapshots.
#[derive(Debug, Clone)]
pub struct ChannelStore {
    root: PathBuf,
}

impl ChannelStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> std::result::Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn snapshot_path(&self, id: &ChannelId) -> PathBuf {
        self.root.join(format!("{}{}{}", SNAPSHOT_PREFIX, id.to_hex(), SNAPSHOT_SUFFIX))
    }

    /// Writes the channel's snapshot, replacing any previous one.
    pub fn save(&self, channel: &Channel) -> std::result::Result<(), StorageError> {
        let encoded = serde_json::to_string_pretty(channel)?;
        fs::write(self.snapshot_path(&channel.id()), encoded)?;
        debug!("channel {} snapshot saved", channel.id());
        Ok(())
    }

    /// Reads a channel snapshot back, or `None` if none was saved.
    pub fn load(&self, id: &ChannelId) -> std::result::Result<Option<Channel>, StorageError> {
        let bytes = match fs::read(self.snapshot_path(id)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let channel = serde_json::from_slice(&bytes)?;
        Ok(Some(channel))
    }

    /// Ids of every channel with a snapshot on disk. Files that do not look
    /// like snapshots are ignored.
    pub fn list(&self) -> std::result::Result<Vec<ChannelId>, StorageError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let hex = match name
                .strip_prefix(SNAPSHOT_PREFIX)
                .and_then(|rest| rest.strip_suffix(SNAPSHOT_SUFFIX))
            {
                Some(hex) => hex,
                None => continue,
            };
            if let Some(id) = ChannelId::from_hex(hex) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Deletes a channel's snapshot. Missing snapshots are not an error.
    pub fn remove(&self, id: &ChannelId) -> std::result::Result<(), StorageError> {
        match fs::remove_file(self.snapshot_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
