//! Transaction plumbing shared by the repositories.
//!
//! Multi-owner operations are sent as one `BEGIN … COMMIT` script. Each
//! owner contributes a statement fragment; a fragment that detects a
//! broken precondition raises `THROW "poolgate:<reason>"`, which rolls
//! the whole script back. The marker is recovered from the statement
//! errors and mapped to a typed [`Abort`].

use std::collections::HashMap;

use poolgate_core::error::PoolgateError;

use crate::error::DbError;

const MARKER_PREFIX: &str = "poolgate:";

/// A precondition failure raised from inside a transaction script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    GrantMissing,
    GrantExpired,
    GrantDisabled,
    IdentityMismatch,
    CapacityExhausted,
    /// The checkout candidate was no longer available under the lock.
    ResourceTaken,
    ResourceMissing,
    NotOwned,
    /// The resource is leased and cannot be edited into another state.
    ResourceLeased,
}

impl Abort {
    pub(crate) fn marker(self) -> &'static str {
        match self {
            Abort::GrantMissing => "poolgate:grant_missing",
            Abort::GrantExpired => "poolgate:grant_expired",
            Abort::GrantDisabled => "poolgate:grant_disabled",
            Abort::IdentityMismatch => "poolgate:identity_mismatch",
            Abort::CapacityExhausted => "poolgate:capacity_exhausted",
            Abort::ResourceTaken => "poolgate:resource_taken",
            Abort::ResourceMissing => "poolgate:resource_missing",
            Abort::NotOwned => "poolgate:not_owned",
            Abort::ResourceLeased => "poolgate:resource_leased",
        }
    }

    const ALL: [Abort; 9] = [
        Abort::GrantMissing,
        Abort::GrantExpired,
        Abort::GrantDisabled,
        Abort::IdentityMismatch,
        Abort::CapacityExhausted,
        Abort::ResourceTaken,
        Abort::ResourceMissing,
        Abort::NotOwned,
        Abort::ResourceLeased,
    ];

    /// Finds the abort marker embedded in an error message, if any.
    pub(crate) fn from_message(message: &str) -> Option<Self> {
        let start = message.find(MARKER_PREFIX)?;
        let tail = &message[start..];
        let end = tail
            .char_indices()
            .skip(MARKER_PREFIX.len())
            .find(|(_, c)| !(c.is_ascii_lowercase() || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(tail.len());
        let marker = &tail[..end];
        Self::ALL.into_iter().find(|a| a.marker() == marker)
    }

    /// Context-free mapping; callers with ids at hand should prefer
    /// building the error themselves.
    pub(crate) fn into_error(self) -> PoolgateError {
        match self {
            Abort::GrantMissing => PoolgateError::NotFound {
                entity: "grant".into(),
                id: String::new(),
            },
            Abort::GrantExpired => PoolgateError::Expired,
            Abort::GrantDisabled => PoolgateError::Disabled,
            Abort::IdentityMismatch => PoolgateError::IdentityMismatch,
            Abort::CapacityExhausted => PoolgateError::CapacityExhausted { max_resources: 0 },
            Abort::ResourceTaken => {
                PoolgateError::Conflict("candidate resource was leased concurrently".into())
            }
            Abort::ResourceMissing => PoolgateError::NotFound {
                entity: "resource".into(),
                id: String::new(),
            },
            Abort::NotOwned => PoolgateError::NotOwned {
                resource_id: String::new(),
            },
            Abort::ResourceLeased => PoolgateError::Validation {
                message: "resource is leased; release it first".into(),
            },
        }
    }
}

/// Wraps owner fragments into one transaction script.
pub(crate) fn transaction(fragments: &[&str]) -> String {
    let mut script = String::from("BEGIN TRANSACTION;\n");
    for fragment in fragments {
        script.push_str(fragment);
        if !fragment.ends_with('\n') {
            script.push('\n');
        }
    }
    script.push_str("COMMIT TRANSACTION;");
    script
}

fn is_conflict_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("conflict") || lower.contains("can be retried")
}

fn is_unique_violation(message: &str) -> bool {
    message.contains("already contains")
}

/// Classifies the statement errors of a transaction response.
///
/// An abort marker wins over everything else, because the statements
/// after a `THROW` only report that they were not executed.
pub(crate) fn check_errors(errors: HashMap<usize, surrealdb::Error>) -> Result<(), DbError> {
    if errors.is_empty() {
        return Ok(());
    }
    let messages: Vec<String> = errors.into_values().map(|e| e.to_string()).collect();
    Err(classify(&messages))
}

/// Classifies an error raised while sending the query itself.
pub(crate) fn classify_query_error(err: surrealdb::Error) -> DbError {
    let message = err.to_string();
    if let Some(abort) = Abort::from_message(&message) {
        return DbError::Aborted(abort);
    }
    if is_conflict_message(&message) {
        return DbError::Conflict(message);
    }
    DbError::Surreal(err)
}

/// Maps a unique-index violation on `entity` to [`DbError::Duplicate`].
pub(crate) fn duplicate_or(entity: &str, err: DbError) -> DbError {
    match err {
        DbError::Transaction(ref msg) if is_unique_violation(msg) => DbError::Duplicate {
            entity: entity.into(),
        },
        other => other,
    }
}

fn classify(messages: &[String]) -> DbError {
    if let Some(abort) = messages.iter().find_map(|m| Abort::from_message(m)) {
        return DbError::Aborted(abort);
    }
    let joined = messages.join("; ");
    if messages.iter().any(|m| is_conflict_message(m)) {
        return DbError::Conflict(joined);
    }
    DbError::Transaction(joined)
}
