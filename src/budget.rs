//! Byte accounting for shared storage.
//!
//! `MemoryBudget` stands in for the shared-memory allocator the cache lives
//! in: every block a representation owns is charged against it before the
//! block is built, and credited back when the owning handle is released.
//! A `Charge` is the linear proof of one such debit; dropping it returns the
//! bytes.

use crate::error::AllocError;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounded pool of bytes shared by every handle built from one config.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: usize,
    used: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.used())
    }

    fn debit(&self, bytes: usize) -> Result<(), AllocError> {
        let mut cur = self.used.load(Ordering::Relaxed);
        loop {
            let next = match cur.checked_add(bytes) {
                Some(n) if n <= self.limit => n,
                _ => {
                    return Err(AllocError::BudgetExhausted {
                        requested: bytes,
                        remaining: self.limit.saturating_sub(cur),
                    })
                }
            };
            match self
                .used
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(actual) => cur = actual,
            }
        }
    }

    fn credit(&self, bytes: usize) {
        let prev = self.used.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(prev >= bytes, "MemoryBudget underflow");
    }
}

/// Bytes debited from a budget; credited back on drop.
#[derive(Debug)]
pub(crate) struct Charge {
    budget: Option<Arc<MemoryBudget>>,
    bytes: usize,
}

impl Charge {
    /// Debit `bytes` from `budget`. With no budget the charge only records
    /// the size.
    pub(crate) fn take(budget: Option<&Arc<MemoryBudget>>, bytes: usize) -> Result<Self, AllocError> {
        if let Some(b) = budget {
            b.debit(bytes)?;
        }
        Ok(Self {
            budget: budget.cloned(),
            bytes,
        })
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Charge {
    fn drop(&mut self) {
        if let Some(b) = self.budget.take() {
            b.credit(self.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_debits_and_credits_on_drop() {
        let budget = Arc::new(MemoryBudget::new(100));
        let c = Charge::take(Some(&budget), 40).unwrap();
        assert_eq!(budget.used(), 40);
        assert_eq!(budget.remaining(), 60);
        assert_eq!(c.bytes(), 40);
        drop(c);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn over_limit_is_rejected_without_side_effects() {
        let budget = Arc::new(MemoryBudget::new(100));
        let _held = Charge::take(Some(&budget), 90).unwrap();
        match Charge::take(Some(&budget), 11) {
            Err(AllocError::BudgetExhausted {
                requested,
                remaining,
            }) => {
                assert_eq!(requested, 11);
                assert_eq!(remaining, 10);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(budget.used(), 90);
    }

    #[test]
    fn unbounded_charge_records_size() {
        let c = Charge::take(None, 12).unwrap();
        assert_eq!(c.bytes(), 12);
    }
}
