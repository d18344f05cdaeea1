//! Persons: named identities bound one-to-one to a signatory.
//!
//! A [`Person`] shares its UUID with its [`Signatory`] and is signed by it over
//! `(nick, name, email, signature_date)`. A person nobody references (no
//! authority names it author, no delegate authorizer names it delegate, no
//! successor chain names it successor) is an orphan; orphans older than the
//! configured grace period are garbage collected unless their signatory holds
//! private key material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{
    AuthorityStore, BackendTransaction, DelegateStore, PersonStore, SignatoryStore,
};
use crate::crypto::{CryptoError, SignatureData, SignatureVersion};
use crate::events::AuthorityEvent;
use crate::signatory::{KeyStorage, PrivateSignatory, Signatory};
use crate::{Error, Result, Transaction};

/// Errors from person operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PersonError {
    #[error("Person not found: {uuid}")]
    PersonNotFound { uuid: Uuid },

    /// Another locally private person already uses the nick.
    #[error("Nick already in use by a private person: {nick}")]
    NickAlreadyInUse { nick: String },

    #[error("Person already exists: {uuid}")]
    PersonAlreadyExists { uuid: Uuid },

    /// Explicit deletion requires the person to be orphan.
    #[error("Person {uuid} is still referenced")]
    PersonNotOrphan { uuid: Uuid },
}

impl PersonError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersonError::PersonNotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PersonError::NickAlreadyInUse { .. } | PersonError::PersonAlreadyExists { .. }
        )
    }

    pub fn is_deletion_conflict(&self) -> bool {
        matches!(self, PersonError::PersonNotOrphan { .. })
    }
}

impl From<PersonError> for Error {
    fn from(err: PersonError) -> Self {
        Error::Person(err)
    }
}

/// A named identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Same as the signatory UUID.
    pub uuid: Uuid,
    pub nick: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub signature_date: DateTime<Utc>,
    pub signature_version: SignatureVersion,
    pub signature_data: SignatureData,
    /// Set while nothing references this person.
    pub orphan_since: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct PersonSignable<'a> {
    nick: &'a str,
    name: Option<&'a str>,
    email: Option<&'a str>,
    signature_date: i64,
}

impl Person {
    fn signable(&self) -> PersonSignable<'_> {
        PersonSignable {
            nick: &self.nick,
            name: self.name.as_deref(),
            email: self.email.as_deref(),
            signature_date: self.signature_date.timestamp_millis(),
        }
    }

    /// Create and persist a person for a locally held signatory.
    ///
    /// The nick must not be used by another locally private person.
    pub fn create(
        txn: &mut Transaction<'_>,
        signatory: &PrivateSignatory,
        nick: &str,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Person> {
        for existing in txn.persons_by_nick(nick)? {
            if existing.uuid != signatory.uuid() && Signatory::is_private(&**txn, existing.uuid)? {
                return Err(PersonError::NickAlreadyInUse {
                    nick: nick.to_string(),
                }
                .into());
            }
        }
        if txn.get_person(signatory.uuid())?.is_some() {
            return Err(PersonError::PersonAlreadyExists {
                uuid: signatory.uuid(),
            }
            .into());
        }

        let mut person = Person {
            uuid: signatory.uuid(),
            nick: nick.to_string(),
            name: name.map(str::to_string),
            email: email.map(str::to_string),
            signature_date: txn.now(),
            signature_version: SignatureVersion::CURRENT,
            signature_data: SignatureData::new(Vec::new()),
            orphan_since: None,
        };
        person.signature_data =
            signatory.sign_canonical(person.signature_version, &person.signable())?;
        txn.put_person(person.clone())?;
        info!(person = %person.uuid, nick = %person.nick, "Created person");
        Self::update_orphan_since(txn, person.uuid)?;
        Self::load(&**txn, person.uuid)
    }

    pub fn get(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<Option<Person>> {
        txn.get_person(uuid)
    }

    /// Load a person or fail with `PersonNotFound`.
    pub fn load(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<Person> {
        txn.get_person(uuid)?
            .ok_or_else(|| PersonError::PersonNotFound { uuid }.into())
    }

    pub fn by_nick(txn: &dyn BackendTransaction, nick: &str) -> Result<Vec<Person>> {
        txn.persons_by_nick(nick)
    }

    /// Change the display name and email, re-signing with the person's signatory.
    pub fn update(
        &mut self,
        txn: &mut Transaction<'_>,
        signatory: &PrivateSignatory,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<()> {
        if signatory.uuid() != self.uuid {
            return Err(crate::crypto::CryptoError::NoPrivateKey {
                signatory: self.uuid,
            }
            .into());
        }
        self.name = name.map(str::to_string);
        self.email = email.map(str::to_string);
        self.signature_date = txn.now();
        self.signature_version = SignatureVersion::CURRENT;
        self.signature_data = signatory.sign_canonical(self.signature_version, &self.signable())?;
        txn.put_person(self.clone())?;
        debug!(person = %self.uuid, "Updated person");
        Ok(())
    }

    /// Verify the person's signature with its stored signatory.
    pub fn verify(&self, txn: &dyn BackendTransaction) -> Result<()> {
        let signatory = Signatory::load(txn, self.uuid)?;
        self.verify_with(&signatory)
    }

    pub fn verify_with(&self, signatory: &Signatory) -> Result<()> {
        signatory.verify_canonical(
            self.signature_version,
            &self.signature_data,
            &self.signable(),
            || format!("person {}", self.uuid),
        )
    }

    /// Store a person received from elsewhere, with its public signatory.
    ///
    /// The signatory must carry the person's UUID and, when one is stored under
    /// that UUID, its public key; otherwise this fails with `KeyMismatch`. The
    /// signature is verified before anything is written. An existing local copy
    /// is replaced only by a more recently signed one; the local orphan state is
    /// recomputed.
    pub fn register(txn: &mut Transaction<'_>, person: &Person, signatory: &Signatory) -> Result<()> {
        if signatory.uuid != person.uuid {
            return Err(CryptoError::KeyMismatch {
                signatory: person.uuid,
            }
            .into());
        }
        person.verify_with(signatory)?;
        Signatory::register(&mut **txn, signatory)?;
        let replace = match txn.get_person(person.uuid)? {
            Some(local) => local.signature_date < person.signature_date,
            None => true,
        };
        if replace {
            let mut stored = person.clone();
            stored.orphan_since = None;
            txn.put_person(stored)?;
            debug!(person = %person.uuid, "Registered person");
        }
        Self::update_orphan_since(txn, person.uuid)
    }

    /// Whether an authority, a delegate authorizer or a successor chain references `uuid`.
    pub fn is_referenced(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<bool> {
        Ok(!txn.authorities_by_author(uuid)?.is_empty()
            || !txn.authorizers_by_delegate(uuid)?.is_empty()
            || !txn.root_nodes_by_successor(uuid)?.is_empty())
    }

    /// Recompute the orphan timestamp of `uuid` after its references changed.
    ///
    /// A person that loses its last reference becomes orphan now; a referenced
    /// person has its orphan timestamp cleared. Missing persons are ignored.
    pub fn update_orphan_since(txn: &mut Transaction<'_>, uuid: Uuid) -> Result<()> {
        let Some(mut person) = txn.get_person(uuid)? else {
            return Ok(());
        };
        let referenced = Self::is_referenced(&**txn, uuid)?;
        let orphan_since = match (referenced, person.orphan_since) {
            (true, Some(_)) => None,
            (false, None) => Some(txn.now()),
            _ => return Ok(()),
        };
        person.orphan_since = orphan_since;
        txn.put_person(person)?;
        debug!(person = %uuid, orphan = !referenced, "Person orphan state changed");
        txn.emit(AuthorityEvent::PersonOrphanChanged {
            person_uuid: uuid,
            orphan: !referenced,
        });
        Ok(())
    }

    /// Delete an orphan person.
    ///
    /// The signatory is deleted too unless it carries private key material.
    pub fn delete(txn: &mut Transaction<'_>, uuid: Uuid) -> Result<()> {
        let person = Self::load(&**txn, uuid)?;
        if person.orphan_since.is_none() || Self::is_referenced(&**txn, uuid)? {
            return Err(PersonError::PersonNotOrphan { uuid }.into());
        }
        txn.delete_person(uuid)?;
        if !Signatory::is_private(&**txn, uuid)? {
            txn.delete_signatory(uuid)?;
        }
        info!(person = %uuid, nick = %person.nick, "Deleted person");
        Ok(())
    }

    /// Delete orphans older than the configured grace period.
    ///
    /// Persons whose signatory carries private key material are kept. Returns the
    /// deleted UUIDs.
    pub fn delete_old_orphans(txn: &mut Transaction<'_>) -> Result<Vec<Uuid>> {
        let cutoff = txn.now() - txn.manager().config().orphan_grace_period();
        let mut deleted = Vec::new();
        for person in txn.orphans_since_before(cutoff)? {
            if Signatory::is_private(&**txn, person.uuid)? {
                continue;
            }
            if Self::is_referenced(&**txn, person.uuid)? {
                continue;
            }
            Self::delete(txn, person.uuid)?;
            deleted.push(person.uuid);
        }
        if !deleted.is_empty() {
            info!(count = deleted.len(), "Garbage collected orphan persons");
        }
        Ok(deleted)
    }

    pub fn is_orphan(&self) -> bool {
        self.orphan_since.is_some()
    }
}

/// A person whose signatory's private key is locally usable.
#[derive(Debug, Clone)]
pub struct PrivatePerson {
    pub person: Person,
    pub signatory: PrivateSignatory,
}

impl PrivatePerson {
    /// Generate a signatory with the given storage and create its person.
    pub fn create(
        txn: &mut Transaction<'_>,
        storage: KeyStorage,
        nick: &str,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<PrivatePerson> {
        let signatory = PrivateSignatory::generate(txn, storage)?;
        let person = Person::create(txn, &signatory, nick, name, email)?;
        Ok(PrivatePerson { person, signatory })
    }

    pub fn load(txn: &Transaction<'_>, uuid: Uuid) -> Result<PrivatePerson> {
        Ok(PrivatePerson {
            person: Person::load(&**txn, uuid)?,
            signatory: PrivateSignatory::load(txn, uuid)?,
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.person.uuid
    }
}
