use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::datastore::DataStore;
use crate::datetime::timestamp_serde;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub uid: Uuid,
    pub name: String,
    pub email: String,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
    #[serde(rename = "createdAt", with = "timestamp_serde")]
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.email)
    }
}

/// What the identity provider hands back after a successful sign-in.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub photo_url: Option<String>,
}

/// Signs in, creating the user profile on first login, and records the
/// session.
#[instrument(skip(store, identity, now), fields(email = %identity.email))]
pub fn login(
    store: &DataStore,
    identity: Identity,
    now: DateTime<Utc>,
) -> anyhow::Result<UserProfile> {
    let email = identity.email.trim().to_string();
    if !looks_like_email(&email) {
        return Err(anyhow!("invalid email address: {email}"));
    }

    let user = match store.find_user_by_email(&email)? {
        Some(existing) => {
            debug!(uid = %existing.uid, "existing user signed in");
            existing
        }
        None => {
            let name = if identity.name.trim().is_empty() {
                email.split('@').next().unwrap_or_default().to_string()
            } else {
                identity.name.trim().to_string()
            };
            let user = UserProfile {
                uid: Uuid::new_v4(),
                name,
                email,
                photo_url: identity.photo_url,
                created_at: now,
            };
            store.insert_user(&user)?;
            info!(uid = %user.uid, "new user profile saved");
            user
        }
    };

    store.write_session(user.uid)?;
    info!(uid = %user.uid, "signed in");
    Ok(user)
}

#[instrument(skip(store))]
pub fn logout(store: &DataStore) -> anyhow::Result<()> {
    store.clear_session()?;
    info!("signed out");
    Ok(())
}

#[instrument(skip(store))]
pub fn current_user(store: &DataStore) -> anyhow::Result<Option<UserProfile>> {
    let Some(uid) = store.read_session()? else {
        return Ok(None);
    };
    store.find_user(uid)
}

pub fn require_user(store: &DataStore) -> anyhow::Result<UserProfile> {
    current_user(store)?
        .ok_or_else(|| anyhow!("not signed in; run `taskbuddy login <email>` first"))
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::{Identity, current_user, login, logout, require_user};
    use crate::datastore::DataStore;

    fn identity(email: &str) -> Identity {
        Identity {
            name: "Ada Lovelace".to_string(),
            email: email.to_string(),
            photo_url: None,
        }
    }

    #[test]
    fn login_reuses_existing_profile() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open");
        let now = Utc::now();

        let first = login(&store, identity("ada@example.com"), now).expect("first login");
        logout(&store).expect("logout");
        assert!(current_user(&store).expect("session").is_none());

        let second = login(&store, identity("ADA@example.com"), now).expect("second login");
        assert_eq!(first.uid, second.uid);
        assert_eq!(second.first_name(), "Ada");
        assert_eq!(require_user(&store).expect("signed in").uid, first.uid);
    }

    #[test]
    fn login_rejects_bad_email() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open");
        assert!(login(&store, identity("not-an-email"), Utc::now()).is_err());
        assert!(require_user(&store).is_err());
    }
}
