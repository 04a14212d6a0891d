use std::{env, path::PathBuf, time::Duration};

use crate::txn::tx_manager::CommitMode;

pub const DATA_DIR_ENV: &str = "QUARRY_DATA_DIR";
pub const LISTEN_ADDR_ENV: &str = "QUARRY_LISTEN_ADDR";

pub const PAGE_FILE_NAME: &str = "quarry.db";
pub const WAL_FILE_NAME: &str = "quarry.wal";

/// Configuration for a storage engine instance and its listener
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the page file and the WAL (default: ./data)
    pub data_dir: PathBuf,

    /// Address the line protocol listens on (default: 127.0.0.1:13306)
    pub listen_addr: String,

    /// Number of buffer pool frames (default: 64)
    pub buffer_pool_frames: usize,

    /// How commits order index mutation against WAL durability (default: staged)
    pub commit_mode: CommitMode,

    /// Deadline applied to every network command (default: 2s)
    pub op_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            listen_addr: String::from("127.0.0.1:13306"),
            buffer_pool_frames: 64,
            commit_mode: CommitMode::Staged,
            op_timeout: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Defaults overridden by `QUARRY_DATA_DIR` and `QUARRY_LISTEN_ADDR` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = env::var_os(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = env::var(LISTEN_ADDR_ENV) {
            config.listen_addr = addr;
        }
        config
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    pub fn with_buffer_pool_frames(mut self, frames: usize) -> Self {
        self.buffer_pool_frames = frames;
        self
    }

    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn page_file_path(&self) -> PathBuf {
        self.data_dir.join(PAGE_FILE_NAME)
    }

    pub fn wal_file_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}
