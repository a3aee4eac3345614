//! Secret Manager: encrypted rows in, one cluster secret out.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_cluster::k8s_openapi::api::core::v1::Secret;
use keel_cluster::k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use keel_cluster::{ClusterClient, Manifest, ResourceKind, apply, delete_if_exists};
use keel_core::names::{LABEL_MANAGED_BY, MANAGED_BY};
use keel_state::EnvVar;
use tracing::{debug, info};

use crate::cipher::SecretCipher;
use crate::error::SecretResult;

/// One encrypted key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEntry {
    pub key: String,
    pub ciphertext: String,
    pub iv_tag: String,
}

impl From<&EnvVar> for SecretEntry {
    fn from(var: &EnvVar) -> Self {
        Self {
            key: var.key.clone(),
            ciphertext: var.ciphertext.clone(),
            iv_tag: var.iv_tag.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SecretManager {
    cluster: Arc<dyn ClusterClient>,
    cipher: Arc<SecretCipher>,
}

impl SecretManager {
    pub fn new(cluster: Arc<dyn ClusterClient>, cipher: Arc<SecretCipher>) -> Self {
        Self { cluster, cipher }
    }

    pub fn cipher(&self) -> &SecretCipher {
        &self.cipher
    }

    /// Decrypt every entry, then write them as one secret.
    ///
    /// Nothing is written if any entry fails to decrypt.
    pub async fn materialize(
        &self,
        namespace: &str,
        name: &str,
        entries: &[SecretEntry],
    ) -> SecretResult<()> {
        let mut data = BTreeMap::new();
        for entry in entries {
            let value = self.cipher.decrypt(&entry.ciphertext, &entry.iv_tag)?;
            data.insert(entry.key.clone(), value);
        }
        self.write(namespace, name, data).await
    }

    /// Write plaintext values as a secret, fully replacing previous content
    /// so removed keys disappear.
    pub async fn write(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> SecretResult<()> {
        let keys = data.len();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    MANAGED_BY.to_string(),
                )])),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(data),
            ..Default::default()
        };
        apply(self.cluster.as_ref(), &Manifest::Secret(secret)).await?;
        info!(%namespace, secret = %name, keys, "secret materialized");
        Ok(())
    }

    /// Delete a secret; absent is fine.
    pub async fn delete(&self, namespace: &str, name: &str) -> SecretResult<()> {
        let existed =
            delete_if_exists(self.cluster.as_ref(), ResourceKind::Secret, Some(namespace), name)
                .await?;
        debug!(%namespace, secret = %name, existed, "secret deleted");
        Ok(())
    }
}
