//! JSON bodies exchanged with the host broker.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `{"key": .., "value": ..}` entry used for both settings and metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreSnapshotRequestBody<'a> {
    pub task_id: &'a str,
    pub snapshot_task_token: &'a str,
    /// Only sent when disk details are requested.
    #[serde(rename = "isVMADEEnabled", skip_serializing_if = "Option::is_none")]
    pub is_vm_ade_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PreSnapshotResponseBody {
    #[serde(default, rename = "isOsDiskADEEncrypted", deserialize_with = "lenient_bool")]
    pub is_os_disk_ade_encrypted: bool,
    #[serde(default, rename = "areDataDisksADEEncrypted", deserialize_with = "lenient_bool")]
    pub are_data_disks_ade_encrypted: bool,
    #[serde(default, rename = "encryptionDetails")]
    pub encryption_details: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoSnapshotRequestBody<'a> {
    pub task_id: &'a str,
    pub disk_ids: &'a [i32],
    pub settings: Vec<KeyValue>,
    pub snapshot_task_token: &'a str,
    pub snapshot_metadata: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoSnapshotResponseBody {
    #[serde(default)]
    pub snapshot_info: Vec<HostSnapshotInfo>,
}

/// One disk's entry in the broker's `snapshotInfo` array.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSnapshotInfo {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_successful: bool,
    #[serde(default)]
    pub snapshot_uri: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status_code: u16,
    #[serde(default)]
    pub dd_snapshot_identifier: Option<HostDdSnapshotIdentifier>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDdSnapshotIdentifier {
    pub creation_time: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub token: String,
}

// The broker has been seen sending booleans both as JSON bools and as
// "true"/"false" strings.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

fn lenient_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let status = match &value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(status.and_then(|s| u16::try_from(s).ok()).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presnapshot_body_omits_ade_flag_unless_requested() {
        let body = PreSnapshotRequestBody {
            task_id: "t1",
            snapshot_task_token: "tok",
            is_vm_ade_enabled: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"taskId": "t1", "snapshotTaskToken": "tok"})
        );

        let body = PreSnapshotRequestBody {
            is_vm_ade_enabled: Some(true),
            ..body
        };
        assert_eq!(serde_json::to_value(&body).unwrap()["isVMADEEnabled"], true);
    }

    #[test]
    fn snapshot_info_accepts_string_flags() {
        let body: DoSnapshotResponseBody = serde_json::from_str(
            r#"{"snapshotInfo": [
                {"isSuccessful": "true", "snapshotUri": "https://a/b?snapshot=1", "errorMessage": null, "statusCode": "201"},
                {"isSuccessful": false, "snapshotUri": null, "errorMessage": "boom", "statusCode": 409}
            ]}"#,
        )
        .unwrap();
        assert_eq!(body.snapshot_info.len(), 2);
        assert!(body.snapshot_info[0].is_successful);
        assert_eq!(body.snapshot_info[0].status_code, 201);
        assert!(!body.snapshot_info[1].is_successful);
        assert_eq!(body.snapshot_info[1].error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn dosnapshot_body_shape() {
        let disk_ids = [0, 2];
        let body = DoSnapshotRequestBody {
            task_id: "t1",
            disk_ids: &disk_ids,
            settings: vec![KeyValue::new("isOsDiskADEEncrypted", false)],
            snapshot_task_token: "tok",
            snapshot_metadata: vec![KeyValue::new("backupId", "b1")],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["diskIds"], serde_json::json!([0, 2]));
        assert_eq!(json["settings"][0]["key"], "isOsDiskADEEncrypted");
        assert_eq!(json["snapshotMetadata"][0]["value"], "b1");
    }
}
