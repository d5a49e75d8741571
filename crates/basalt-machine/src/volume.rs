//! Talos VolumeConfig documents.
//!
//! Standalone `v1alpha1` documents that configure encryption for the
//! system partitions (STATE, EPHEMERAL). They are emitted only for
//! partitions explicitly marked for encryption, and only as part of the
//! bootstrap-phase document set — key enrollment is one-time.

use serde::{Deserialize, Serialize};

use crate::document::{EncryptionKeyNodeId, EncryptionKeySection, EncryptionSection};
use crate::error::MachineResult;

/// A Talos block VolumeConfig document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeConfigDoc {
    pub api_version: String,
    pub kind: String,
    /// Partition label: "STATE" or "EPHEMERAL".
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionSection>,
}

impl VolumeConfigDoc {
    /// A LUKS2-encrypted volume using the node-derived key in the given
    /// slots.
    pub fn encrypted(name: &str, key_slots: &[u32]) -> Self {
        Self {
            api_version: "v1alpha1".to_string(),
            kind: "VolumeConfig".to_string(),
            name: name.to_string(),
            encryption: Some(EncryptionSection {
                provider: "luks2".to_string(),
                keys: key_slots
                    .iter()
                    .map(|slot| EncryptionKeySection {
                        node_id: Some(EncryptionKeyNodeId {}),
                        slot: *slot,
                    })
                    .collect(),
            }),
        }
    }

    /// Render the document as YAML.
    pub fn to_yaml(&self) -> MachineResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
