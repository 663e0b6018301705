//! Identity registry: who may log in and how to reach them.
//!
//! The table is static configuration. Password checking against it is a
//! placeholder for a real authentication service, which is why the session
//! only depends on the [`Authenticator`] trait.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A known participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Lower-case login name.
    pub login_id: String,
    /// Name shown next to messages.
    pub display_name: String,
    /// Short avatar glyph.
    pub avatar: String,
    /// Stable address the transport registers and dials.
    pub network_address: String,
}

/// An identity together with its credential, as stored in the config table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Public identity data.
    #[serde(flatten)]
    pub identity: Identity,
    /// Plain-text password.
    pub password: String,
}

impl IdentityRecord {
    /// Create a new record.
    pub fn new(
        login_id: &str,
        password: &str,
        display_name: &str,
        avatar: &str,
        network_address: &str,
    ) -> Self {
        Self {
            identity: Identity {
                login_id: login_id.to_string(),
                display_name: display_name.to_string(),
                avatar: avatar.to_string(),
                network_address: network_address.to_string(),
            },
            password: password.to_string(),
        }
    }
}

/// The two built-in participants.
pub fn default_identities() -> Vec<IdentityRecord> {
    vec![
        IdentityRecord::new("khusbu", "khusbu123", "Khusbu", "👩", "abhi-chat-khusbu-2025"),
        IdentityRecord::new("abhijit", "abhi123", "Abhijit", "👨", "abhi-chat-abhijit-2025"),
    ]
}

/// Normalize a login id as typed by a user.
pub fn normalize_login_id(login_id: &str) -> String {
    login_id.trim().to_lowercase()
}

/// Resolves credentials to identities.
pub trait Authenticator: Send + Sync {
    /// Check credentials and return the matching identity.
    fn resolve(&self, login_id: &str, password: &str) -> Result<Identity>;

    /// The single other participant `local` talks to.
    fn counterpart(&self, local: &Identity) -> Result<Identity>;

    /// All identities, without credentials.
    fn identities(&self) -> Vec<Identity>;
}

/// Table-backed registry.
#[derive(Debug, Clone)]
pub struct StaticRegistry {
    records: Vec<IdentityRecord>,
}

impl StaticRegistry {
    /// Build a registry from config records.
    ///
    /// Login ids are normalized; duplicates are rejected.
    pub fn new(records: Vec<IdentityRecord>) -> Result<Self> {
        let mut normalized: Vec<IdentityRecord> = Vec::with_capacity(records.len());
        for mut record in records {
            record.identity.login_id = normalize_login_id(&record.identity.login_id);
            if record.identity.login_id.is_empty() {
                return Err(Error::Config("identity with empty login id".to_string()));
            }
            if normalized
                .iter()
                .any(|r| r.identity.login_id == record.identity.login_id)
            {
                return Err(Error::Config(format!(
                    "duplicate identity '{}'",
                    record.identity.login_id
                )));
            }
            normalized.push(record);
        }
        Ok(Self {
            records: normalized,
        })
    }

    /// Look up an identity by login id, without checking credentials.
    pub fn find(&self, login_id: &str) -> Option<&Identity> {
        let login_id = normalize_login_id(login_id);
        self.records
            .iter()
            .map(|r| &r.identity)
            .find(|i| i.login_id == login_id)
    }
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self {
            records: default_identities(),
        }
    }
}

impl Authenticator for StaticRegistry {
    fn resolve(&self, login_id: &str, password: &str) -> Result<Identity> {
        let login_id = normalize_login_id(login_id);
        self.records
            .iter()
            .find(|r| r.identity.login_id == login_id && r.password == password)
            .map(|r| r.identity.clone())
            .ok_or(Error::Auth(login_id))
    }

    fn counterpart(&self, local: &Identity) -> Result<Identity> {
        let mut others = self
            .records
            .iter()
            .filter(|r| r.identity.login_id != local.login_id);
        match (others.next(), others.next()) {
            (Some(other), None) => Ok(other.identity.clone()),
            (None, _) => Err(Error::Config(format!(
                "no counterpart configured for '{}'",
                local.login_id
            ))),
            (Some(_), Some(_)) => Err(Error::Config(
                "identity table must hold exactly two participants".to_string(),
            )),
        }
    }

    fn identities(&self) -> Vec<Identity> {
        self.records.iter().map(|r| r.identity.clone()).collect()
    }
}
