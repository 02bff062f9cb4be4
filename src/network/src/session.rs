//! Per-peer session keys for message authentication.
//!
//! Outgoing keys are cached per destination node. Each one pairs a fresh
//! ephemeral X25519 key with the destination's long-term key. Incoming keys
//! are cached per session public key, and only once a message authenticated
//! with them has verified. Both caches are safe to drop at any time.

use crate::errors::NetworkError;
use curve25519_dalek::montgomery::MontgomeryPoint;
use overlay_core::crypto::x25519_public_from_ed25519;
use overlay_core::types::{NodeId, PublicKeyBytes, Timestamp};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Default lifetime of a session key in milliseconds.
pub const DEFAULT_SESSION_KEY_LIFETIME: u64 = 60 * 60 * 1000;

/// Key material for authenticating messages to one destination.
#[derive(Clone, PartialEq, Eq)]
pub struct OutgoingSessionKey {
    /// Ephemeral public key announced in the envelope
    pub session_public_key: [u8; 32],
    /// ECDH output, used as the HMAC key
    pub shared_secret: [u8; 32],
    pub created_at: Timestamp,
}

/// Shared secret derived for a session public key seen in an incoming envelope.
#[derive(Clone, PartialEq, Eq)]
pub struct IncomingSessionKey {
    pub shared_secret: [u8; 32],
    pub created_at: Timestamp,
    /// Whether the secret came from the cache
    pub cached: bool,
}

/// Derives and caches session keys in both directions.
pub struct SessionKeyManager {
    x25519_secret: [u8; 32],
    lifetime: u64,
    outgoing: Mutex<HashMap<NodeId, OutgoingSessionKey>>,
    incoming: Mutex<HashMap<[u8; 32], IncomingSessionKey>>,
}

impl SessionKeyManager {
    /// Creates a manager for a node with the given long-term X25519 secret.
    pub fn new(x25519_secret: [u8; 32], lifetime: u64) -> Self {
        Self {
            x25519_secret,
            lifetime,
            outgoing: Mutex::new(HashMap::new()),
            incoming: Mutex::new(HashMap::new()),
        }
    }

    fn is_expired(&self, created_at: Timestamp, now: Timestamp) -> bool {
        created_at.saturating_add(self.lifetime) < now
    }

    /// Returns the session key for messages to `destination`, generating a new
    /// one if none is cached or the cached one expired.
    pub fn outgoing_key(
        &self,
        destination: &NodeId,
        destination_public_key: &PublicKeyBytes,
        now: Timestamp,
    ) -> Result<OutgoingSessionKey, NetworkError> {
        let mut outgoing = self.outgoing.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = outgoing.get(destination) {
            if !self.is_expired(entry.created_at, now) {
                return Ok(entry.clone());
            }
        }

        let destination_x25519 = x25519_public_from_ed25519(destination_public_key)
            .map_err(|e| NetworkError::InvalidKey(e.to_string()))?;

        let mut session_secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut session_secret);

        let entry = OutgoingSessionKey {
            session_public_key: MontgomeryPoint::mul_base_clamped(session_secret).to_bytes(),
            shared_secret: MontgomeryPoint(destination_x25519)
                .mul_clamped(session_secret)
                .to_bytes(),
            created_at: now,
        };

        debug!(destination = ?destination, "generated outgoing session key");
        outgoing.insert(*destination, entry.clone());

        Ok(entry)
    }

    /// Returns the shared secret for an incoming session public key.
    ///
    /// A freshly derived secret is not cached; call [`Self::confirm_incoming`]
    /// once it has authenticated a message.
    pub fn incoming_key(
        &self,
        session_public_key: &[u8; 32],
        now: Timestamp,
    ) -> Result<IncomingSessionKey, NetworkError> {
        {
            let incoming = self.incoming.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = incoming.get(session_public_key) {
                if !self.is_expired(entry.created_at, now) {
                    return Ok(entry.clone());
                }
            }
        }

        let shared_secret = MontgomeryPoint(*session_public_key)
            .mul_clamped(self.x25519_secret)
            .to_bytes();

        // Low order points yield an all-zero secret anyone can compute.
        if shared_secret == [0u8; 32] {
            return Err(NetworkError::InvalidKey("low order session public key".to_string()));
        }

        Ok(IncomingSessionKey {
            shared_secret,
            created_at: now,
            cached: false,
        })
    }

    /// Caches an incoming key after it authenticated a message.
    pub fn confirm_incoming(&self, session_public_key: [u8; 32], key: &IncomingSessionKey) {
        if key.cached {
            return;
        }

        let mut incoming = self.incoming.lock().unwrap_or_else(PoisonError::into_inner);
        incoming.insert(
            session_public_key,
            IncomingSessionKey {
                shared_secret: key.shared_secret,
                created_at: key.created_at,
                cached: true,
            },
        );
    }

    /// Drops expired entries from both caches.
    pub fn prune(&self, now: Timestamp) {
        let mut outgoing = self.outgoing.lock().unwrap_or_else(PoisonError::into_inner);
        outgoing.retain(|_, entry| !self.is_expired(entry.created_at, now));
        drop(outgoing);

        let mut incoming = self.incoming.lock().unwrap_or_else(PoisonError::into_inner);
        incoming.retain(|_, entry| !self.is_expired(entry.created_at, now));
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn incoming_len(&self) -> usize {
        self.incoming.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
