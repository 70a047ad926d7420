//! Composite source keys.
//!
//! A composite key `ownerId:sourceId` names one parent document (`sourceId`)
//! as seen by one subscription node (`ownerId`). The textual form splits on the
//! first delimiter, so source ids may themselves contain `:`.

use crate::document::DocId;
use crate::error::{Error, Result};
use core::fmt;
use core::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a subscription node.
pub type OwnerId = u64;

/// Delimiter between owner and source in the textual form.
pub const KEY_DELIMITER: char = ':';

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique owner id.
pub fn next_owner_id() -> OwnerId {
    NEXT_OWNER_ID.fetch_add(1, Ordering::SeqCst)
}

/// An `(owner, source)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey {
    owner: OwnerId,
    source: DocId,
}

impl CompositeKey {
    /// Creates a composite key.
    pub fn new(owner: OwnerId, source: impl Into<DocId>) -> Self {
        Self {
            owner,
            source: source.into(),
        }
    }

    /// Returns the owner portion.
    #[inline]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Returns the source portion.
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders the `owner:source` form.
    pub fn assemble(&self) -> String {
        self.to_string()
    }

    /// Splits an `owner:source` string. A missing delimiter, an empty source
    /// or a non-numeric owner is a contract violation.
    pub fn disassemble(key: &str) -> Result<Self> {
        let (owner, source) = key
            .split_once(KEY_DELIMITER)
            .ok_or_else(|| Error::malformed_key(key))?;
        if source.is_empty() {
            return Err(Error::malformed_key(key));
        }
        let owner = owner.parse::<OwnerId>().map_err(|_| Error::malformed_key(key))?;
        Ok(Self::new(owner, source))
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.owner, KEY_DELIMITER, self.source)
    }
}

impl FromStr for CompositeKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::disassemble(s)
    }
}
