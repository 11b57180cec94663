use serde::{Deserialize, Serialize};

use crate::tx::types::Certificate;

/// A staking certificate with the position of the transaction carrying it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateEntry {
    pub tx_id: String,
    pub block_num: u64,
    pub tx_ordinal: u64,
    pub cert_index: usize,
    pub certificate: Certificate,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationStatus {
    pub is_registered: bool,
    pub pool_key_hash: Option<String>,
}

/// Fold certificates oldest first
pub fn delegation_status(entries: &[CertificateEntry]) -> DelegationStatus {
    let mut sorted: Vec<&CertificateEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| (e.block_num, e.tx_ordinal, e.cert_index));

    let mut status = DelegationStatus::default();
    for entry in sorted {
        match &entry.certificate {
            Certificate::StakeRegistration { .. } => status.is_registered = true,
            Certificate::StakeDeregistration { .. } => {
                status.is_registered = false;
                status.pool_key_hash = None;
            }
            Certificate::StakeDelegation { pool_key_hash, .. } => {
                status.pool_key_hash = Some(pool_key_hash.clone());
            }
        }
    }
    status
}
