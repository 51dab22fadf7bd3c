//! Input row validation.
//!
//! Every row needs a non-empty `id` that no earlier row used and a
//! non-blank `address`. Rows that fail are reported as
//! [`InputRowError`]s and excluded; the rest of the batch proceeds.

use std::collections::BTreeSet;

use address_geocoder_models::{AddressRecord, InputRowError, InputRowErrorKind};

/// A row as read from the input table, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    /// 1-based data row number (header excluded).
    pub line: u64,
    /// Raw `id` cell.
    pub id: Option<String>,
    /// Raw `address` cell.
    pub address: Option<String>,
}

impl InputRow {
    /// Convenience constructor for a fully populated row.
    #[must_use]
    pub fn new(line: u64, id: &str, address: &str) -> Self {
        Self {
            line,
            id: Some(id.to_string()),
            address: Some(address.to_string()),
        }
    }
}

/// Splits `rows` into valid records, in input order, and rejected rows.
///
/// Ids are trimmed; the address is kept verbatim so that `raw_address`
/// on the output row matches the input exactly.
#[must_use]
pub fn validate_rows(rows: Vec<InputRow>) -> (Vec<AddressRecord>, Vec<InputRowError>) {
    let mut seen = BTreeSet::new();
    let mut records = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();

    for row in rows {
        let id = row
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let reject = |kind| InputRowError {
            line: row.line,
            id: id.clone(),
            kind,
        };

        let Some(record_id) = id.clone() else {
            rejected.push(reject(InputRowErrorKind::MissingId));
            continue;
        };

        let Some(address) = row.address.as_deref().filter(|a| !a.trim().is_empty()) else {
            rejected.push(reject(InputRowErrorKind::MissingAddress));
            continue;
        };

        if !seen.insert(record_id.clone()) {
            rejected.push(reject(InputRowErrorKind::DuplicateId));
            continue;
        }

        records.push(AddressRecord {
            id: record_id,
            raw_address: address.to_string(),
        });
    }

    for err in &rejected {
        log::warn!("Rejected {err}");
    }

    (records, rejected)
}
