//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a dispatch batch.
///
/// Batch ids are sequential: each new batch takes `previous + 1`. The value
/// `0` is reserved for the "nothing dispatched yet" sentinel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(u64);

/// Internal identifier of a consignment, assigned by the repository.
///
/// Needed because courier-assigned numbers may collide across carriers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsignmentId(u64);

macro_rules! impl_sequential_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn from_raw(value: u64) -> Self {
                Self(value)
            }

            pub const fn value(&self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $t {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for u64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(raw))
            }
        }
    };
}

impl_sequential_newtype!(BatchId, "BatchId");
impl_sequential_newtype!(ConsignmentId, "ConsignmentId");

impl BatchId {
    /// Id carried by the sentinel batch returned when nothing was ever persisted.
    pub const SENTINEL: BatchId = BatchId(0);

    /// The id of the batch that follows this one.
    pub fn next(self) -> Result<BatchId, DomainError> {
        self.0
            .checked_add(1)
            .map(BatchId)
            .ok_or(DomainError::IdSpaceExhausted("batch"))
    }
}

/// A supported carrier.
///
/// The set of couriers is closed: adding a carrier means adding a variant and
/// configuring its transport and allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourierId {
    RoyalMail,
    Parcelforce,
    Dpd,
    Dhl,
    Ups,
}

impl CourierId {
    pub const ALL: [CourierId; 5] = [
        CourierId::RoyalMail,
        CourierId::Parcelforce,
        CourierId::Dpd,
        CourierId::Dhl,
        CourierId::Ups,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CourierId::RoyalMail => "royal_mail",
            CourierId::Parcelforce => "parcelforce",
            CourierId::Dpd => "dpd",
            CourierId::Dhl => "dhl",
            CourierId::Ups => "ups",
        }
    }
}

impl core::fmt::Display for CourierId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourierId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        CourierId::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| DomainError::UnknownCourier(s.to_string()))
    }
}
