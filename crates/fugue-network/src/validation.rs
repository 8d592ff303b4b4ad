//! Inbound envelope validation

use std::collections::HashSet;
use std::time::Duration;

use fugue_primitives::Address;
use fugue_types::{Observers, Subscription};
use tracing::debug;

use crate::envelope::{unix_millis, AppProtocolVersion, MessageEnvelope};
use crate::error::{NetworkError, NetworkResult};
use crate::peer::Peer;

/// Validation settings
#[derive(Debug, Clone, Default)]
pub struct ValidatorConfig {
    /// Signers whose other protocol versions are reported instead of
    /// silently rejected. `None` trusts any valid signer.
    pub trusted_signers: Option<HashSet<Address>>,
    /// Accepted clock skew. `None` disables the timestamp check.
    pub timestamp_buffer: Option<Duration>,
}

/// A trusted peer announced a protocol version different from ours.
#[derive(Debug, Clone)]
pub struct DifferentVersion {
    /// Announcing peer
    pub peer: Peer,
    /// Our version
    pub local: AppProtocolVersion,
    /// Their version
    pub remote: AppProtocolVersion,
}

/// Checks protocol, timestamp, signature and structure of every envelope.
pub struct MessageValidator {
    local: AppProtocolVersion,
    config: ValidatorConfig,
    different_version: Observers<DifferentVersion>,
}

impl MessageValidator {
    /// Validator for a node running `local`
    pub fn new(local: AppProtocolVersion, config: ValidatorConfig) -> Self {
        Self {
            local,
            config,
            different_version: Observers::new(),
        }
    }

    /// Local protocol version
    pub fn local_protocol(&self) -> &AppProtocolVersion {
        &self.local
    }

    /// Observe trusted peers running other versions.
    pub fn on_different_version<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DifferentVersion) + Send + Sync + 'static,
    {
        self.different_version.subscribe(handler)
    }

    /// Full validation
    pub fn validate(&self, envelope: &MessageEnvelope) -> NetworkResult<()> {
        self.validate_protocol(envelope)?;
        self.validate_timestamp(envelope, unix_millis())?;
        envelope.verify_signature()?;
        envelope.message.validate()
    }

    /// Accept our own version; report and accept same-number versions from
    /// trusted signers; reject everything else.
    pub fn validate_protocol(&self, envelope: &MessageEnvelope) -> NetworkResult<()> {
        let remote = &envelope.protocol;
        if *remote == self.local {
            return Ok(());
        }

        let trusted = remote.verify()
            && self
                .config
                .trusted_signers
                .as_ref()
                .map_or(true, |signers| signers.contains(&remote.signer));

        if trusted {
            self.different_version.emit(&DifferentVersion {
                peer: envelope.sender,
                local: self.local.clone(),
                remote: remote.clone(),
            });
        }

        if !trusted || remote.version != self.local.version {
            debug!(
                peer = %envelope.sender,
                local = self.local.version,
                remote = remote.version,
                trusted,
                "Rejecting envelope with different protocol"
            );
            return Err(NetworkError::InvalidProtocol(format!(
                "peer {} runs v{} signed by {}, local is v{}",
                envelope.sender, remote.version, remote.signer, self.local.version
            )));
        }
        Ok(())
    }

    /// Reject envelopes whose timestamp is further than the buffer from `now`.
    pub fn validate_timestamp(&self, envelope: &MessageEnvelope, now: u64) -> NetworkResult<()> {
        let Some(buffer) = self.config.timestamp_buffer else {
            return Ok(());
        };
        let buffer_ms = buffer.as_millis() as u64;
        if now.abs_diff(envelope.timestamp) > buffer_ms {
            return Err(NetworkError::InvalidMessageTimestamp {
                timestamp: envelope.timestamp,
                now,
                buffer_ms,
            });
        }
        Ok(())
    }
}
