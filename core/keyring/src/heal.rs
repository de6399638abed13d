//! Bounded auto-heal for cipher operations.
//!
//! An operation is run against a fixed, finite list of attempts. Only a
//! key-desync fault ([`Error::is_key_desync`]) moves on to the next attempt;
//! every other error is returned immediately. Each retry is logged at `warn`.

use std::fmt;
use tracing::{debug, warn};

use crate::config::HealPolicy;
use keywarden_common::{Error, Result};

/// Encrypt attempts, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptAttempt {
    /// Current CEK, with associated data.
    Primary,
    /// Freshly regenerated CEK, with associated data.
    RegeneratedCek,
    /// Current CEK, without associated data.
    WithoutAad,
}

/// Decrypt attempts, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptAttempt {
    /// Current CEK with the envelope's associated data.
    Primary,
    /// Same CEK once more; for envelopes without recorded associated data
    /// this attempt uses none.
    SameKeyRetry,
}

impl fmt::Display for EncryptAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncryptAttempt::Primary => "primary",
            EncryptAttempt::RegeneratedCek => "regenerated-cek",
            EncryptAttempt::WithoutAad => "without-aad",
        };
        f.write_str(name)
    }
}

impl fmt::Display for DecryptAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecryptAttempt::Primary => "primary",
            DecryptAttempt::SameKeyRetry => "same-key-retry",
        };
        f.write_str(name)
    }
}

impl HealPolicy {
    /// Attempts the encrypt path may make under this policy.
    pub fn encrypt_plan(&self) -> Vec<EncryptAttempt> {
        let mut plan = vec![EncryptAttempt::Primary];
        if self.regenerate_on_encrypt {
            plan.push(EncryptAttempt::RegeneratedCek);
        }
        if self.aadless_fallback {
            plan.push(EncryptAttempt::WithoutAad);
        }
        plan
    }

    /// Attempts the decrypt path may make under this policy.
    pub fn decrypt_plan(&self) -> Vec<DecryptAttempt> {
        let mut plan = vec![DecryptAttempt::Primary];
        if self.retry_decrypt {
            plan.push(DecryptAttempt::SameKeyRetry);
        }
        plan
    }
}

/// Run `operation` once per planned attempt until it succeeds.
///
/// # Postconditions
/// - `operation` is called at most `plan.len()` times
/// - A non-desync error stops the run immediately
///
/// # Errors
/// - The first non-desync error, or the last desync error once the plan is
///   exhausted
pub fn run_bounded<A, T, F>(operation: &str, plan: &[A], mut attempt: F) -> Result<T>
where
    A: Copy + fmt::Display,
    F: FnMut(A) -> Result<T>,
{
    let mut last_error = None;

    for (index, step) in plan.iter().copied().enumerate() {
        if let Some(err) = &last_error {
            warn!(
                operation,
                attempt = index + 1,
                step = %step,
                error = %err,
                "Retrying after key desync"
            );
        }

        match attempt(step) {
            Ok(value) => {
                if index > 0 {
                    debug!(operation, step = %step, "Recovered after {} retries", index);
                }
                return Ok(value);
            }
            Err(err) if err.is_key_desync() => last_error = Some(err),
            Err(err) => return Err(err),
        }
    }

    let err = last_error
        .unwrap_or_else(|| Error::InvalidInput(format!("No attempts planned for {}", operation)));
    warn!(operation, attempts = plan.len(), error = %err, "Giving up");
    Err(err)
}
