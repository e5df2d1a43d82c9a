//! Random record identifiers with bounded collision retry.
//!
//! Ids are 12 alphanumeric characters (62^12 possibilities). Allocation
//! checks each candidate against the store and gives up after
//! [`MAX_ID_ATTEMPTS`] collisions instead of retrying forever.

use std::future::Future;

use rand::distr::{Alphanumeric, SampleString};

/// Length of generated identifiers.
pub const ID_LENGTH: usize = 12;

/// Maximum candidates tried before allocation fails.
pub const MAX_ID_ATTEMPTS: u32 = 8;

/// Errors from [`allocate_id`].
#[derive(Debug, thiserror::Error)]
pub enum IdAllocationError<E> {
    /// Every candidate collided with an existing record.
    #[error("No free identifier after {0} attempts")]
    Exhausted(u32),

    /// The collision check itself failed.
    #[error("Identifier collision check failed: {0}")]
    Check(E),
}

/// Generate a fresh random identifier. Does not check for collisions.
pub fn new_id() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), ID_LENGTH)
}

/// Allocate an identifier for which `is_taken` reports `false`.
pub async fn allocate_id<F, Fut, E>(mut is_taken: F) -> Result<String, IdAllocationError<E>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    for _ in 0..MAX_ID_ATTEMPTS {
        let candidate = new_id();
        if !is_taken(candidate.clone())
            .await
            .map_err(IdAllocationError::Check)?
        {
            return Ok(candidate);
        }
    }
    Err(IdAllocationError::Exhausted(MAX_ID_ATTEMPTS))
}
