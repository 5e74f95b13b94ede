//! Credit ledger accounts and escrow arithmetic.
//!
//! `locked` is a reservation inside `credits`: reserved money stays in
//! the account until it is actually paid out. Every mutation preserves
//! `0 <= locked <= credits`; an operation that would break the invariant
//! returns [`LedgerViolation`] and the caller aborts the handler with no
//! partial mutation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper clamp on the pre-multiplier base stake.
pub const BASE_STAKE_CAP: u64 = 200;

/// Upper clamp on the final stake after the reputation multiplier.
pub const FINAL_STAKE_CAP: u64 = 500;

/// An arithmetic step that would leave an account outside its invariant.
///
/// These are internal inconsistencies, never user input errors: the
/// state machine checks spendable balances before reserving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LedgerViolation {
    /// A lock was requested beyond the spendable balance.
    #[error("cannot lock {amount}: spendable is {spendable}")]
    LockExceedsSpendable {
        /// Requested reservation.
        amount: u64,
        /// Spendable balance at the time of the attempt.
        spendable: u64,
    },

    /// A release or payment referenced more locked credits than exist.
    #[error("cannot release {amount}: locked is {locked}")]
    ReleaseExceedsLocked {
        /// Requested release.
        amount: u64,
        /// Locked balance at the time of the attempt.
        locked: u64,
    },

    /// A debit referenced more credits than exist.
    #[error("cannot debit {amount}: credits are {credits}")]
    DebitExceedsCredits {
        /// Requested debit.
        amount: u64,
        /// Credit balance at the time of the attempt.
        credits: u64,
    },
}

/// A per-agent ledger account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerAccount {
    /// Total credits owned by the agent.
    pub credits: u64,
    /// Credits reserved for open contracts (escrow + stake).
    pub locked: u64,
}

impl LedgerAccount {
    /// Opens an account with a starting grant and nothing locked.
    #[must_use]
    pub const fn with_credits(credits: u64) -> Self {
        Self { credits, locked: 0 }
    }

    /// Credits not reserved by any contract.
    #[must_use]
    pub const fn spendable(&self) -> u64 {
        self.credits - self.locked
    }

    /// Reserves `amount` inside the account.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerViolation::LockExceedsSpendable`] when the
    /// spendable balance cannot cover the reservation.
    pub fn lock(&mut self, amount: u64) -> Result<(), LedgerViolation> {
        let spendable = self.spendable();
        if amount > spendable {
            return Err(LedgerViolation::LockExceedsSpendable { amount, spendable });
        }
        self.locked += amount;
        Ok(())
    }

    /// Releases a reservation without moving money.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerViolation::ReleaseExceedsLocked`] when `amount`
    /// exceeds the locked balance.
    pub fn release(&mut self, amount: u64) -> Result<(), LedgerViolation> {
        if amount > self.locked {
            return Err(LedgerViolation::ReleaseExceedsLocked {
                amount,
                locked: self.locked,
            });
        }
        self.locked -= amount;
        Ok(())
    }

    /// Pays out `amount` from the locked reservation: both `locked` and
    /// `credits` decrease.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerViolation`] when either balance cannot cover
    /// the payment.
    pub fn pay_from_locked(&mut self, amount: u64) -> Result<(), LedgerViolation> {
        if amount > self.locked {
            return Err(LedgerViolation::ReleaseExceedsLocked {
                amount,
                locked: self.locked,
            });
        }
        if amount > self.credits {
            return Err(LedgerViolation::DebitExceedsCredits {
                amount,
                credits: self.credits,
            });
        }
        self.locked -= amount;
        self.credits -= amount;
        Ok(())
    }

    /// Debits unreserved credits (used for slashing after the stake
    /// reservation is released).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerViolation::DebitExceedsCredits`] when the balance
    /// cannot cover the debit.
    pub fn debit(&mut self, amount: u64) -> Result<(), LedgerViolation> {
        if amount > self.credits {
            return Err(LedgerViolation::DebitExceedsCredits {
                amount,
                credits: self.credits,
            });
        }
        self.credits -= amount;
        Ok(())
    }

    /// Adds credits to the account.
    pub fn deposit(&mut self, amount: u64) {
        self.credits += amount;
    }

    /// Whether the account currently satisfies `locked <= credits`.
    #[must_use]
    pub const fn is_sound(&self) -> bool {
        self.locked <= self.credits
    }
}

/// Stake and slash percentages from the configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakeParams {
    /// Base stake as a fraction of the budget.
    pub stake_pct: f64,
    /// Slashed fraction of the stake on failure.
    pub slash_pct: f64,
}

/// Computes the worker stake for a contract.
///
/// `base = clamp(floor(budget * stake_pct), 0, 200)`, scaled by the
/// reputation multiplier (inclusive upper bounds): score `>= 0.75` pays
/// 0.5x, `>= 0.60` pays 1.0x, `>= 0.45` pays 1.5x, anything lower pays
/// 2.0x. The final stake is clamped to `[0, 500]`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn compute_stake(budget: u64, rep_score: f64, params: StakeParams) -> u64 {
    let base = ((budget as f64) * params.stake_pct).floor().max(0.0) as u64;
    let base = base.min(BASE_STAKE_CAP);

    let multiplier = if rep_score >= 0.75 {
        0.5
    } else if rep_score >= 0.60 {
        1.0
    } else if rep_score >= 0.45 {
        1.5
    } else {
        2.0
    };

    let staked = ((base as f64) * multiplier).floor().max(0.0) as u64;
    staked.min(FINAL_STAKE_CAP)
}

/// Computes the slashed portion of a stake on settlement failure:
/// `clamp(ceil(stake * slash_pct), 0, stake)`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn compute_slash(stake: u64, params: StakeParams) -> u64 {
    let slash = ((stake as f64) * params.slash_pct).ceil().max(0.0) as u64;
    slash.min(stake)
}

/// Computes the upfront payment for accepted terms:
/// `clamp(floor(locked_budget * upfront_pct), 0, locked_budget)`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn compute_upfront(locked_budget: u64, upfront_pct: f64) -> u64 {
    let upfront = ((locked_budget as f64) * upfront_pct).floor().max(0.0) as u64;
    upfront.min(locked_budget)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: StakeParams = StakeParams {
        stake_pct: 0.05,
        slash_pct: 0.5,
    };

    #[test]
    fn test_lock_respects_spendable() {
        let mut account = LedgerAccount::with_credits(100);
        account.lock(60).expect("lock within spendable");
        assert_eq!(account.spendable(), 40);

        let err = account.lock(41).expect_err("lock beyond spendable");
        assert_eq!(
            err,
            LedgerViolation::LockExceedsSpendable {
                amount: 41,
                spendable: 40
            }
        );
        assert!(account.is_sound());
    }

    #[test]
    fn test_pay_from_locked_moves_both_balances() {
        let mut account = LedgerAccount::with_credits(100);
        account.lock(30).expect("lock");
        account.pay_from_locked(30).expect("pay");
        assert_eq!(account.credits, 70);
        assert_eq!(account.locked, 0);
        assert!(account.is_sound());
    }

    #[test]
    fn test_release_never_underflows() {
        let mut account = LedgerAccount::with_credits(10);
        account.lock(5).expect("lock");
        assert!(account.release(6).is_err());
        assert_eq!(account.locked, 5);
    }

    #[test]
    fn test_stake_multiplier_tiers() {
        // base = floor(100 * 0.05) = 5
        assert_eq!(compute_stake(100, 0.80, PARAMS), 2); // 0.5x
        assert_eq!(compute_stake(100, 0.75, PARAMS), 2); // inclusive bound
        assert_eq!(compute_stake(100, 0.60, PARAMS), 5); // 1.0x
        assert_eq!(compute_stake(100, 0.50, PARAMS), 7); // 1.5x
        assert_eq!(compute_stake(100, 0.10, PARAMS), 10); // 2.0x
    }

    #[test]
    fn test_stake_caps() {
        // Base cap: floor(10_000 * 0.05) = 500 -> clamped to 200.
        assert_eq!(compute_stake(10_000, 0.60, PARAMS), 200);
        // Worst multiplier on a capped base: 200 * 2.0, still under the
        // final cap.
        assert_eq!(compute_stake(10_000, 0.10, PARAMS), 400);
        assert!(compute_stake(10_000, 0.10, PARAMS) <= FINAL_STAKE_CAP);
    }

    #[test]
    fn test_slash_rounds_up_and_clamps() {
        assert_eq!(compute_slash(5, PARAMS), 3); // ceil(2.5)
        assert_eq!(compute_slash(0, PARAMS), 0);
        let full = StakeParams {
            stake_pct: 0.05,
            slash_pct: 2.0,
        };
        assert_eq!(compute_slash(5, full), 5); // clamped to the stake
    }

    #[test]
    fn test_upfront_floors_and_clamps() {
        assert_eq!(compute_upfront(70, 0.2), 14);
        assert_eq!(compute_upfront(100, 0.0), 0);
        assert_eq!(compute_upfront(100, 1.0), 100);
        assert_eq!(compute_upfront(3, 0.5), 1);
    }
}
