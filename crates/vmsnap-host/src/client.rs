use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use vmsnap_core::{
    BlobSnapshotInfo, DifferentialSnapshotIdentifier, EncryptionDetails, EncryptionState, Freezer,
    RunOutcome, SnapshotRequest,
};
use vmsnap_telemetry::{keys, RunTelemetry};

use crate::error::HostError;
use crate::redact::redact_json;
use crate::ticks::creation_time_to_ticks;
use crate::wire::{
    DoSnapshotRequestBody, DoSnapshotResponseBody, HostSnapshotInfo, KeyValue,
    PreSnapshotRequestBody, PreSnapshotResponseBody,
};

/// The request never got an HTTP response (wrong host IP, refused, timed out).
pub const CONNECTION_FAILURE_STATUS: u16 = 555;
/// HTTP 500 that did not come from the broker itself.
pub const BROKER_NOT_RUNNING_STATUS: u16 = 556;
/// Success status with nothing in the body.
pub const EMPTY_BODY_STATUS: u16 = 557;
/// The call failed inside the guest (encoding, decoding, bad address).
pub const LOCAL_EXCEPTION_STATUS: u16 = 558;

const API_VERSION: &str = "2017-12-01";
const SNAPSHOT_PATH: &str = "/metadata/recsvc/snapshot";
const BROKER_ERROR_PREFIX: &str = "{ \"error\"";

const OS_DISK_ADE_KEY: &str = "isOsDiskADEEncrypted";
const DATA_DISKS_ADE_KEY: &str = "areDataDisksADEEncrypted";
const ENCRYPTION_DETAILS_KEY: &str = "encryptionDetails";

/// Result of the availability probe.
#[derive(Clone, Debug)]
pub struct PreSnapshotOutcome {
    pub status_code: u16,
    /// Disk-encryption state returned by the broker for ADE-enabled VMs.
    pub encryption: Option<EncryptionState>,
}

impl PreSnapshotOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status_code, 200 | 201)
    }
}

/// Result of a host-delegated snapshot.
#[derive(Clone, Debug)]
pub struct HostSnapshotOutcome {
    pub infos: Vec<BlobSnapshotInfo>,
    pub outcome: RunOutcome,
    pub status_code: u16,
    pub thaw_errors: Vec<String>,
}

/// Client for the host-resident snapshot broker.
#[derive(Clone, Debug)]
pub struct HostSnapshotClient {
    client: Client,
    pre_snapshot_url: Url,
    do_snapshot_url: Url,
    telemetry: RunTelemetry,
}

impl HostSnapshotClient {
    pub fn new(host_ip: &str, request_timeout: Duration, telemetry: RunTelemetry) -> Result<Self, HostError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HostError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            pre_snapshot_url: broker_url(host_ip, "presnapshot")?,
            do_snapshot_url: broker_url(host_ip, "dosnapshot")?,
            telemetry,
        })
    }

    /// Probe the broker. With `fetch_disk_details` on an ADE-enabled VM the
    /// response also carries the disks' encryption state. Never fails: every
    /// problem is folded into the returned status code.
    #[instrument(skip_all, fields(task_id = %request.task_id))]
    pub async fn pre_snapshot(&self, request: &SnapshotRequest, fetch_disk_details: bool) -> PreSnapshotOutcome {
        let outcome = match self.try_pre_snapshot(request, fetch_disk_details).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, status = e.status_code(), "presnapshot failed");
                PreSnapshotOutcome {
                    status_code: e.status_code(),
                    encryption: None,
                }
            }
        };
        info!(status = outcome.status_code, "presnapshot completed");
        self.telemetry
            .record(keys::HOST_STATUS_PRE_SNAPSHOT, outcome.status_code);
        outcome
    }

    async fn try_pre_snapshot(
        &self,
        request: &SnapshotRequest,
        fetch_disk_details: bool,
    ) -> Result<PreSnapshotOutcome, HostError> {
        let body = serde_json::to_value(PreSnapshotRequestBody {
            task_id: &request.task_id,
            snapshot_task_token: &request.snapshot_task_token,
            is_vm_ade_enabled: fetch_disk_details.then(|| request.is_vm_ade_enabled()),
        })?;
        let (status, text) = self.post(&self.pre_snapshot_url, &body).await?;
        classify_status(status, &text)?;

        let mut encryption = None;
        if is_success(status) && request.is_vm_ade_enabled() {
            let parsed: PreSnapshotResponseBody = serde_json::from_str(&text)?;
            let details = parsed
                .encryption_details
                .filter(|v| !v.is_null())
                .map(|v| EncryptionDetails::from_json(&v));
            debug!(
                os_disk_encrypted = parsed.is_os_disk_ade_encrypted,
                data_disks_encrypted = parsed.are_data_disks_ade_encrypted,
                details_entries = details.as_ref().map_or(0, EncryptionDetails::entry_count),
                "presnapshot returned encryption state"
            );
            encryption = Some(EncryptionState {
                is_vm_ade_enabled: true,
                is_os_disk_ade_encrypted: parsed.is_os_disk_ade_encrypted,
                are_data_disks_ade_encrypted: parsed.are_data_disks_ade_encrypted,
                details,
            });
        }
        Ok(PreSnapshotOutcome {
            status_code: status,
            encryption,
        })
    }

    /// Hand the whole snapshot to the broker. The caller holds the freeze;
    /// when `freezer` is given it is thawed exactly once, as soon as the
    /// broker call returns (or fails), before the response is interpreted.
    #[instrument(skip_all, fields(task_id = %request.task_id, disks = request.disk_count()))]
    pub async fn do_snapshot(&self, request: &SnapshotRequest, freezer: Option<&dyn Freezer>) -> HostSnapshotOutcome {
        let started = Instant::now();
        let sent = self.send_do_snapshot(request).await;
        self.telemetry
            .record_duration(keys::SNAPSHOT_TIME_TAKEN, started.elapsed());

        let mut outcome = RunOutcome::default();
        let mut thaw_errors = Vec::new();
        if let Some(freezer) = freezer {
            let thaw_started = Instant::now();
            let thaw = freezer.thaw().await;
            self.telemetry
                .record_duration(keys::THAW_TIME, thaw_started.elapsed());
            outcome.is_inconsistent = !thaw.is_ok();
            outcome.unable_to_sleep = thaw.unable_to_sleep;
            thaw_errors = thaw.errors;
        }

        let (status_code, infos) = match sent.and_then(|(status, text)| {
            classify_status(status, &text)?;
            Ok((status, parse_snapshot_infos(status, &text)?))
        }) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, status = e.status_code(), "dosnapshot failed");
                (e.status_code(), Vec::new())
            }
        };

        outcome.all_failed = !infos.iter().any(|i| i.is_successful);
        outcome.all_snapshots_failed = outcome.all_failed;
        self.telemetry
            .record(keys::HOST_STATUS_DO_SNAPSHOT, status_code);
        info!(
            status = status_code,
            disks_returned = infos.len(),
            all_failed = outcome.all_failed,
            inconsistent = outcome.is_inconsistent,
            "dosnapshot completed"
        );
        HostSnapshotOutcome {
            infos,
            outcome,
            status_code,
            thaw_errors,
        }
    }

    async fn send_do_snapshot(&self, request: &SnapshotRequest) -> Result<(u16, String), HostError> {
        let body = serde_json::to_value(do_snapshot_body(request)?)?;
        self.post(&self.do_snapshot_url, &body).await
    }

    async fn post(&self, url: &Url, body: &Value) -> Result<(u16, String), HostError> {
        debug!(url = %url, body = %redact_json(body), "host request");
        let resp = self
            .client
            .post(url.clone())
            .headers(broker_headers())
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| HostError::Connection(e.to_string()))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        debug!(status, body_len = text.len(), "host response");
        Ok((status, text))
    }
}

fn broker_url(host_ip: &str, operation: &str) -> Result<Url, HostError> {
    let url = Url::parse(&format!(
        "http://{host_ip}{SNAPSHOT_PATH}/{operation}?api-version={API_VERSION}"
    ))
    .map_err(|e| HostError::InvalidAddress(format!("{host_ip}: {e}")))?;
    if url.host_str().is_none() {
        return Err(HostError::InvalidAddress(host_ip.to_string()));
    }
    Ok(url)
}

fn broker_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let _ = headers.insert(HeaderName::from_static("backup"), HeaderValue::from_static("true"));
    let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let _ = headers.insert(HeaderName::from_static("useragent"), HeaderValue::from_static("VMSnapshot"));
    headers
}

fn is_success(status: u16) -> bool {
    matches!(status, 200 | 201)
}

/// Map anomalous broker answers onto their dedicated failures.
fn classify_status(status: u16, body: &str) -> Result<(), HostError> {
    if is_success(status) && body.trim().is_empty() {
        return Err(HostError::EmptyBody { status });
    }
    if status == 500 && !body.starts_with(BROKER_ERROR_PREFIX) {
        return Err(HostError::BrokerNotRunning { status });
    }
    Ok(())
}

fn do_snapshot_body(request: &SnapshotRequest) -> Result<DoSnapshotRequestBody<'_>, HostError> {
    let mut settings: Vec<KeyValue> = request
        .well_known_setting_flags
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
        .collect();
    let mut metadata: Vec<KeyValue> = request
        .metadata
        .iter()
        .map(|tag| KeyValue::new(tag.key.clone(), tag.value.clone()))
        .collect();

    if let Some(encryption) = request.encryption.as_ref().filter(|e| e.is_vm_ade_enabled) {
        settings.push(KeyValue::new(OS_DISK_ADE_KEY, encryption.is_os_disk_ade_encrypted));
        settings.push(KeyValue::new(DATA_DISKS_ADE_KEY, encryption.are_data_disks_ade_encrypted));
        let details = match &encryption.details {
            Some(details) => details.to_json()?,
            None => Value::Object(Default::default()),
        };
        metadata.push(KeyValue::new(ENCRYPTION_DETAILS_KEY, details));
    }

    Ok(DoSnapshotRequestBody {
        task_id: &request.task_id,
        disk_ids: &request.include_lun_list,
        settings,
        snapshot_task_token: &request.snapshot_task_token,
        snapshot_metadata: metadata,
    })
}

/// Decode the `snapshotInfo` array of a dosnapshot response. Non-success
/// statuses carry no per-disk data.
fn parse_snapshot_infos(status: u16, body: &str) -> Result<Vec<BlobSnapshotInfo>, HostError> {
    if !is_success(status) {
        return Ok(Vec::new());
    }
    let parsed: DoSnapshotResponseBody = serde_json::from_str(body)?;
    Ok(parsed.snapshot_info.into_iter().map(to_blob_info).collect())
}

fn to_blob_info(info: HostSnapshotInfo) -> BlobSnapshotInfo {
    debug!(
        successful = info.is_successful,
        status = info.status_code,
        has_dd_identifier = info.dd_snapshot_identifier.is_some(),
        "host snapshot entry"
    );
    let mut blob = BlobSnapshotInfo {
        is_successful: info.is_successful,
        snapshot_uri: info.snapshot_uri,
        error_message: info.error_message,
        status_code: info.status_code,
        dd_snapshot_identifier: None,
    };
    if let Some(dd) = info.dd_snapshot_identifier {
        match creation_time_to_ticks(&dd.creation_time) {
            Ok(ticks) => {
                blob.dd_snapshot_identifier = Some(DifferentialSnapshotIdentifier {
                    creation_time_utc_ticks: ticks,
                    id: dd.id,
                    token: dd.token,
                });
            }
            Err(e) => {
                warn!(error = %e, "dropping host snapshot entry with bad creation time");
                blob.is_successful = false;
                blob.snapshot_uri = None;
                blob.error_message = Some(e.to_string());
            }
        }
    }
    blob
}
