use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Disk-encryption details fetched from the host broker. Holds key-vault
/// references and wrapped secrets, so it is kept as a secret and never
/// printed.
#[derive(Clone)]
pub struct EncryptionDetails(SecretString);

impl EncryptionDetails {
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self(SecretString::from(value.to_string()))
    }

    /// Parse the secret back into JSON for embedding in a host request body.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(self.0.expose_secret())
    }

    /// Number of top-level entries, for logging without revealing content.
    pub fn entry_count(&self) -> usize {
        match self.to_json() {
            Ok(serde_json::Value::Object(map)) => map.len(),
            Ok(serde_json::Value::Array(items)) => items.len(),
            Ok(serde_json::Value::Null) | Err(_) => 0,
            Ok(_) => 1,
        }
    }
}

impl std::fmt::Debug for EncryptionDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionDetails([REDACTED])")
    }
}

/// ADE state of the VM as known to this run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionState {
    #[serde(rename = "isVMADEEnabled")]
    pub is_vm_ade_enabled: bool,
    #[serde(default, rename = "isOsDiskADEEncrypted")]
    pub is_os_disk_ade_encrypted: bool,
    #[serde(default, rename = "areDataDisksADEEncrypted")]
    pub are_data_disks_ade_encrypted: bool,
    #[serde(skip)]
    pub details: Option<EncryptionDetails>,
}
