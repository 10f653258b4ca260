//! Resolving remote nodes to their published ECDH keys.

use tessera_crypto::{derive_shared_key, parse_peer_public_key, KeyMaterialProvider, PublicKey, SharedKey};

use crate::error::ServiceError;
use crate::hub::Hub;

/// Looks up the public key a node published on the hub.
///
/// # Errors
///
/// - `NotFound` if the hub does not know the node.
/// - `InvalidInput` if the node has no public key.
/// - `UpstreamUnavailable` if the published key cannot be parsed.
pub async fn peer_public_key(hub: &dyn Hub, node_id: &str) -> Result<PublicKey, ServiceError> {
    let node = hub.node(node_id).await?.ok_or_else(|| {
        ServiceError::NotFound(format!("Remote node with ID {node_id} does not exist."))
    })?;

    let encoded = node.public_key.ok_or_else(|| {
        ServiceError::InvalidInput(format!(
            "Remote node with ID {node_id} does not provide a public key"
        ))
    })?;

    parse_peer_public_key(&encoded).map_err(|e| {
        tracing::error!(node_id, error = %e, "hub published an unusable public key");
        ServiceError::UpstreamUnavailable(format!(
            "Public key of remote node {node_id} is malformed"
        ))
    })
}

/// Derives the key shared between this node and `node_id`.
pub async fn shared_key_with(
    hub: &dyn Hub,
    keys: &dyn KeyMaterialProvider,
    node_id: &str,
) -> Result<SharedKey, ServiceError> {
    let peer = peer_public_key(hub, node_id).await?;
    derive_shared_key(keys.local_private_key(), &peer).map_err(|e| {
        tracing::error!(node_id, error = %e, "shared key derivation failed");
        ServiceError::Internal(e.to_string())
    })
}
