//! Per-join options.

use rejoin_core::{Projection, Result};
use serde_json::Value;

/// Options of one join node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinkOptions {
    /// Projection applied to published documents and diffs.
    pub fields: Projection,
    /// Keep the bookkeeping of this node but publish nothing for it. Its
    /// sub-joins still publish.
    pub skip_publication: bool,
}

impl LinkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the projection.
    pub fn fields(mut self, fields: Projection) -> Self {
        self.fields = fields;
        self
    }

    /// Parses a `{field: 1}` / `{field: -1}` projection spec.
    pub fn fields_spec(self, spec: &Value) -> Result<Self> {
        Ok(self.fields(Projection::from_spec(spec)?))
    }

    pub fn skip_publication(mut self, skip: bool) -> Self {
        self.skip_publication = skip;
        self
    }
}
