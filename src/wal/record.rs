use serde::{Deserialize, Serialize};

use crate::storage::page::PageId;

pub type Lsn = u64;
pub type TxId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Begin,
    Insert,
    Delete,
    Commit,
    Abort,
}

impl LogType {
    /// Whether replaying this record mutates the index.
    pub fn is_data(&self) -> bool {
        matches!(self, LogType::Insert | LogType::Delete)
    }
}

/// One entry of the write-ahead log. Immutable once appended.
///
/// `lsn` is assigned by the log on append; the value set by the caller is
/// ignored. Data records name the key they touch, the value it held when the
/// write was buffered (`old_value`) and the value written (`new_value`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub tx_id: TxId,
    #[serde(rename = "type")]
    pub log_type: LogType,
    #[serde(default)]
    pub page_id: PageId,
    #[serde(default)]
    pub offset: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Vec<u8>>,
}

impl LogRecord {
    fn control(tx_id: TxId, log_type: LogType) -> Self {
        Self {
            lsn: 0,
            tx_id,
            log_type,
            page_id: 0,
            offset: 0,
            key: None,
            old_value: None,
            new_value: None,
        }
    }

    pub fn begin(tx_id: TxId) -> Self {
        Self::control(tx_id, LogType::Begin)
    }

    pub fn commit(tx_id: TxId) -> Self {
        Self::control(tx_id, LogType::Commit)
    }

    pub fn abort(tx_id: TxId) -> Self {
        Self::control(tx_id, LogType::Abort)
    }

    pub fn insert(tx_id: TxId, key: &[u8], old_value: Option<&[u8]>, new_value: &[u8]) -> Self {
        Self {
            key: Some(key.to_vec()),
            old_value: old_value.map(<[u8]>::to_vec),
            new_value: Some(new_value.to_vec()),
            ..Self::control(tx_id, LogType::Insert)
        }
    }

    pub fn delete(tx_id: TxId, key: &[u8], old_value: Option<&[u8]>) -> Self {
        Self {
            key: Some(key.to_vec()),
            old_value: old_value.map(<[u8]>::to_vec),
            ..Self::control(tx_id, LogType::Delete)
        }
    }
}
