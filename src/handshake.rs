//! Identity handshake.
//!
//! ```text
//! listener                         dialer
//!    │ ── BeginHandshake ──────────► │
//!    │ ◄──────────── IdToken{token} ─│  token loaded from settings
//!    │ ── ClientIdentified{id,tok} ─►│  token saved to settings
//! ```
//!
//! The listener keeps a [`ClientDirectory`] of logical clients keyed by
//! token. Presenting a known token reclaims the same client id, unless that
//! client is still connected, in which case a fresh client is created.

use std::collections::HashMap;

use rand::Rng;

use crate::peer::OwnerId;

/// Length of generated identity tokens.
pub const TOKEN_LENGTH: usize = 32;

const TOKEN_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_.~$%^&*(){}[]";

/// Generate a random identity token.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}

/// A logical client known to a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClientRecord {
    pub(crate) client_id: u32,
    pub(crate) token: String,
    pub(crate) owner: OwnerId,
}

/// Logical clients of one listener.
#[derive(Debug, Default)]
pub(crate) struct ClientDirectory {
    by_token: HashMap<String, ClientRecord>,
    order: Vec<String>,
}

impl ClientDirectory {
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Find or create the logical client presenting `token`.
    ///
    /// `is_live` tells whether an owner is bound to a live connection.
    /// `allocate` yields the client id and owner for a new record.
    /// Returns the record and whether it was newly created.
    pub(crate) fn identify<L, A>(&mut self, token: &str, is_live: L, allocate: A) -> (ClientRecord, bool)
    where
        L: Fn(OwnerId) -> bool,
        A: FnOnce() -> (u32, OwnerId),
    {
        if let Some(record) = self.by_token.get(token) {
            if !is_live(record.owner) {
                return (record.clone(), false);
            }
        }

        let (client_id, owner) = allocate();
        let mut token = generate_token();
        while self.by_token.contains_key(&token) {
            token = generate_token();
        }
        let record = ClientRecord {
            client_id,
            token: token.clone(),
            owner,
        };
        self.by_token.insert(token.clone(), record.clone());
        self.order.push(token);
        (record, true)
    }

    /// Every record, oldest first.
    pub(crate) fn records(&self) -> impl Iterator<Item = &ClientRecord> {
        self.order.iter().filter_map(|token| self.by_token.get(token))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_token.len()
    }
}
