//! Consignment number allocation strategies.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    /// The allocator's number range is used up.
    #[error("number range exhausted: {0}")]
    Exhausted(String),

    /// An external lookup service could not be reached.
    #[error("number service unavailable: {0}")]
    Unavailable(String),
}

/// Carrier-specific number allocation policy.
///
/// Must be `Send` so couriers can be flushed from worker threads.
pub trait NumberAllocator: Send {
    fn next_number(&mut self) -> Result<u64, AllocationError>;
}

impl<F> NumberAllocator for F
where
    F: FnMut() -> Result<u64, AllocationError> + Send,
{
    fn next_number(&mut self) -> Result<u64, AllocationError> {
        self()
    }
}

/// Plain counter: `start`, `start + step`, `start + 2 * step`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequentialAllocator {
    next: u64,
    step: u64,
}

impl SequentialAllocator {
    pub fn new(start: u64, step: u64) -> Self {
        Self {
            next: start,
            step: step.max(1),
        }
    }

    /// Continue after the highest number already issued, never going below `start`.
    pub fn resume_after(highest_issued: Option<u64>, start: u64, step: u64) -> Self {
        let step = step.max(1);
        let next = match highest_issued {
            Some(h) if h >= start => h.saturating_add(step),
            _ => start,
        };
        Self { next, step }
    }

    pub fn peek(&self) -> u64 {
        self.next
    }
}

impl NumberAllocator for SequentialAllocator {
    fn next_number(&mut self) -> Result<u64, AllocationError> {
        let n = self.next;
        self.next = n
            .checked_add(self.step)
            .ok_or_else(|| AllocationError::Exhausted(format!("counter overflow after {n}")))?;
        Ok(n)
    }
}

/// Carrier-issued ranges of the form `prefix` followed by a zero-padded
/// sequence of `width` digits, e.g. prefix 77, width 6 → 77000001.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixedAllocator {
    base: u64,
    limit: u64,
    /// Highest number in the range, inclusive.
    last: u64,
    seq: u64,
}

impl PrefixedAllocator {
    pub fn new(prefix: u64, width: u32) -> Result<Self, AllocationError> {
        let limit = 10u64
            .checked_pow(width)
            .ok_or_else(|| AllocationError::Exhausted(format!("width {width} too large")))?;
        let base = prefix
            .checked_mul(limit)
            .ok_or_else(|| AllocationError::Exhausted(format!("prefix {prefix} too large")))?;
        let last = base
            .checked_add(limit - 1)
            .ok_or_else(|| AllocationError::Exhausted(format!("prefix {prefix} with width {width} overflows u64")))?;
        Ok(Self {
            base,
            limit,
            last,
            seq: 0,
        })
    }

    /// Continue after a previously issued number in the same range.
    pub fn resume_after(
        prefix: u64,
        width: u32,
        highest_issued: Option<u64>,
    ) -> Result<Self, AllocationError> {
        let mut alloc = Self::new(prefix, width)?;
        if let Some(h) = highest_issued {
            if (alloc.base..=alloc.last).contains(&h) {
                alloc.seq = h - alloc.base;
            }
        }
        Ok(alloc)
    }
}

impl NumberAllocator for PrefixedAllocator {
    fn next_number(&mut self) -> Result<u64, AllocationError> {
        let seq = self.seq + 1;
        if seq >= self.limit {
            return Err(AllocationError::Exhausted(format!(
                "range {}..={} fully issued",
                self.base, self.last
            )));
        }
        self.seq = seq;
        Ok(self.base + seq)
    }
}
