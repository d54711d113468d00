use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionState;

/// One disk to snapshot: its time-limited write URL plus the LUN (or disk
/// id) used by the host path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskTarget {
    pub blob_url: Option<String>,
    #[serde(default)]
    pub lun_or_id: Option<String>,
}

impl DiskTarget {
    pub fn new(blob_url: impl Into<String>) -> Self {
        Self {
            blob_url: Some(blob_url.into()),
            lun_or_id: None,
        }
    }

    pub fn with_lun(mut self, lun_or_id: impl Into<String>) -> Self {
        self.lun_or_id = Some(lun_or_id.into());
        self
    }

    /// URL with the SAS query stripped, safe to log.
    pub fn display_url(&self) -> &str {
        match &self.blob_url {
            Some(url) => url.split('?').next().unwrap_or(url),
            None => "<none>",
        }
    }
}

/// Metadata tag applied to every disk's snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTag {
    pub key: String,
    pub value: String,
}

impl MetadataTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Everything one snapshot run needs. Treated as immutable once dispatch
/// begins; the host pre-snapshot step produces an updated copy instead of
/// mutating in place.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    #[serde(default)]
    pub task_id: String,
    pub disks: Vec<DiskTarget>,
    #[serde(default)]
    pub metadata: Vec<MetadataTag>,
    #[serde(default)]
    pub include_lun_list: Vec<i32>,
    #[serde(default)]
    pub well_known_setting_flags: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub encryption: Option<EncryptionState>,
    #[serde(default)]
    pub snapshot_task_token: String,
    /// Set when the backup excludes some attached disks; only the guest
    /// path honours per-disk selection.
    #[serde(default)]
    pub is_any_disk_excluded: bool,
}

impl SnapshotRequest {
    pub fn new(task_id: impl Into<String>, disks: Vec<DiskTarget>) -> Self {
        Self {
            task_id: task_id.into(),
            disks,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push(MetadataTag::new(key, value));
        self
    }

    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    pub fn is_vm_ade_enabled(&self) -> bool {
        self.encryption
            .as_ref()
            .is_some_and(|e| e.is_vm_ade_enabled)
    }

    /// Copy of this request with encryption state replaced.
    pub fn with_encryption(&self, encryption: EncryptionState) -> Self {
        Self {
            encryption: Some(encryption),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_url_strips_sas_query() {
        let disk = DiskTarget::new("https://acct.blob.core.windows.net/vhds/os.vhd?sv=1&sig=secret");
        assert_eq!(disk.display_url(), "https://acct.blob.core.windows.net/vhds/os.vhd");
    }

    #[test]
    fn display_url_for_missing_url() {
        let disk = DiskTarget::default();
        assert_eq!(disk.display_url(), "<none>");
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let json = r#"{"disks": [{"blobUrl": "https://a/b?sig=x", "lunOrId": "0"}, {"blobUrl": null}]}"#;
        let req: SnapshotRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.disk_count(), 2);
        assert_eq!(req.disks[0].lun_or_id.as_deref(), Some("0"));
        assert!(req.disks[1].blob_url.is_none());
        assert!(req.metadata.is_empty());
        assert!(req.snapshot_task_token.is_empty());
        assert!(!req.is_vm_ade_enabled());
    }

    #[test]
    fn metadata_order_is_preserved() {
        let req = SnapshotRequest::new("t", vec![])
            .with_metadata("b", "2")
            .with_metadata("a", "1");
        let keys: Vec<_> = req.metadata.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, ["b", "a"]);
    }

    #[test]
    fn with_encryption_leaves_original_untouched() {
        let req = SnapshotRequest::new("t", vec![DiskTarget::new("https://a/b?s")]);
        let updated = req.with_encryption(EncryptionState {
            is_vm_ade_enabled: true,
            ..Default::default()
        });
        assert!(updated.is_vm_ade_enabled());
        assert!(!req.is_vm_ade_enabled());
        assert_eq!(updated.disks, req.disks);
    }
}
