//! Immutable, versioned view of the user/key directory

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::{ApiCredential, CredentialId, Exchange, User, UserId};
use crate::store::DirectoryRecord;

/// One user with every credential they own
#[derive(Debug, Clone, PartialEq)]
pub struct UserEntry {
    pub user: User,
    pub credentials: Vec<ApiCredential>,
}

/// Change detected between two consecutive snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    UserAdded(UserId),
    UserUpdated(UserId),
    UserRemoved(UserId),
    CredentialAdded { user_id: UserId, credential_id: CredentialId },
    CredentialUpdated { user_id: UserId, credential_id: CredentialId },
    CredentialRemoved { user_id: UserId, credential_id: CredentialId },
}

#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
    users: HashMap<UserId, UserEntry>,
}

impl Default for DirectorySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl DirectorySnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            loaded_at: Utc::now(),
            users: HashMap::new(),
        }
    }

    pub fn from_records(version: u64, records: Vec<DirectoryRecord>) -> Self {
        let users: HashMap<UserId, UserEntry> = records
            .into_iter()
            .map(|record| {
                (
                    record.user.id,
                    UserEntry {
                        user: record.user,
                        credentials: record.credentials,
                    },
                )
            })
            .collect();

        for entry in users.values() {
            let mut primaries: HashMap<Exchange, usize> = HashMap::new();
            for credential in entry.credentials.iter().filter(|c| c.is_eligible()) {
                *primaries.entry(credential.exchange).or_default() += 1;
            }
            for (exchange, count) in primaries.into_iter().filter(|(_, n)| *n > 1) {
                warn!(
                    user_id = %entry.user.id,
                    exchange = %exchange,
                    count,
                    "[RELOAD] Multiple eligible primary credentials, using the oldest"
                );
            }
        }

        Self {
            version,
            loaded_at: Utc::now(),
            users,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn user(&self, id: UserId) -> Option<&UserEntry> {
        self.users.get(&id)
    }

    pub fn credential(&self, id: CredentialId) -> Option<&ApiCredential> {
        self.users
            .values()
            .flat_map(|entry| entry.credentials.iter())
            .find(|c| c.id == id)
    }

    /// The credential that drives execution for (user, exchange): valid,
    /// active and primary; the oldest wins if the directory holds several
    pub fn eligible_credential(&self, user_id: UserId, exchange: Exchange) -> Option<&ApiCredential> {
        self.users
            .get(&user_id)?
            .credentials
            .iter()
            .filter(|c| c.exchange == exchange && c.is_eligible())
            .min_by_key(|c| (c.created_at, c.id))
    }

    /// Active users holding an eligible credential on `exchange`, ordered by id
    pub fn tradable_users(&self, exchange: Exchange) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .users
            .values()
            .filter(|entry| entry.user.active)
            .filter(|entry| self.eligible_credential(entry.user.id, exchange).is_some())
            .map(|entry| entry.user.id)
            .collect();
        ids.sort();
        ids
    }

    /// Events turning `self` into `next`
    pub fn diff(&self, next: &DirectorySnapshot) -> Vec<DirectoryEvent> {
        let mut events = Vec::new();

        for (id, new_entry) in &next.users {
            match self.users.get(id) {
                None => {
                    events.push(DirectoryEvent::UserAdded(*id));
                    for credential in &new_entry.credentials {
                        events.push(DirectoryEvent::CredentialAdded {
                            user_id: *id,
                            credential_id: credential.id,
                        });
                    }
                }
                Some(old_entry) => {
                    if old_entry.user != new_entry.user {
                        events.push(DirectoryEvent::UserUpdated(*id));
                    }
                    diff_credentials(*id, &old_entry.credentials, &new_entry.credentials, &mut events);
                }
            }
        }

        for (id, old_entry) in &self.users {
            if !next.users.contains_key(id) {
                for credential in &old_entry.credentials {
                    events.push(DirectoryEvent::CredentialRemoved {
                        user_id: *id,
                        credential_id: credential.id,
                    });
                }
                events.push(DirectoryEvent::UserRemoved(*id));
            }
        }

        events
    }
}

fn diff_credentials(
    user_id: UserId,
    old: &[ApiCredential],
    new: &[ApiCredential],
    events: &mut Vec<DirectoryEvent>,
) {
    for credential in new {
        match old.iter().find(|c| c.id == credential.id) {
            None => events.push(DirectoryEvent::CredentialAdded {
                user_id,
                credential_id: credential.id,
            }),
            Some(previous) if !previous.same_trading_state(credential) => {
                events.push(DirectoryEvent::CredentialUpdated {
                    user_id,
                    credential_id: credential.id,
                })
            }
            Some(_) => {}
        }
    }
    for credential in old {
        if !new.iter().any(|c| c.id == credential.id) {
            events.push(DirectoryEvent::CredentialRemoved {
                user_id,
                credential_id: credential.id,
            });
        }
    }
}
