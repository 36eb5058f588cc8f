use std::{cell::RefCell, rc::Rc};

use crate::{
    constants::{
        DEFAULT_INITIAL_MEMORY_CAPACITY, DEFAULT_MEMORY_LIMIT, MEMORY_EXPANSION_QUOTIENT,
        WORD_SIZE_IN_BYTES_U64, WORD_SIZE_IN_BYTES_USIZE,
    },
    errors::{ExceptionalHalt, InternalError, VMError},
};
use ExceptionalHalt::OutOfOffset;
use bytes::Bytes;
use kestrel_common::{U256, utils::{u256_from_big_endian_const, u256_to_big_endian}};

/// Linear memory cost per 32-byte word.
const MEMORY_WORD_COST: u64 = 3;

/// Pre-computed total expansion cost for small sizes (≤ 128 words = 4 KiB),
/// which covers the overwhelming majority of frames.
#[allow(clippy::arithmetic_side_effects, clippy::indexing_slicing)]
const SMALL_COST_TABLE: [u64; 129] = const {
    let mut table = [0u64; 129];
    let mut w = 0u64;
    while w <= 128 {
        table[w as usize] = MEMORY_WORD_COST * w + w * w / MEMORY_EXPANSION_QUOTIENT;
        w += 1;
    }
    table
};

/// A cheaply clonable memory buffer shared along one call tree.
///
/// The root frame owns the buffer; every child frame views the suffix that
/// starts at the buffer length at spawn time (`current_base`). Only the
/// innermost frame writes past its base, and `clean_from_base` wipes a
/// child's region when it returns so the parent's region is all that
/// survives.
#[derive(Debug, Clone)]
pub struct Memory {
    pub buffer: Rc<RefCell<Vec<u8>>>,
    pub len: usize,
    current_base: usize,
    /// Byte cap for the whole buffer (all frames of the tree combined).
    limit: usize,
    /// One-slot cache of the last total-cost computation above the table.
    last_cost: (u64, u64),
}

impl Memory {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MEMORY_LIMIT, DEFAULT_INITIAL_MEMORY_CAPACITY)
    }

    pub fn with_limits(limit: usize, initial_capacity: usize) -> Self {
        Self {
            buffer: Rc::new(RefCell::new(Vec::with_capacity(initial_capacity))),
            len: 0,
            current_base: 0,
            limit,
            last_cost: (0, 0),
        }
    }

    /// The memory view for a child call frame.
    pub fn next_memory(&self) -> Memory {
        let mut memory = self.clone();
        memory.current_base = memory.buffer.borrow().len();
        memory.len = 0;
        memory.last_cost = (0, 0);
        memory
    }

    /// Zero-wipe this frame's region. Call on a frame that is about to be
    /// dropped so the parent can hand out a clean region to the next child.
    pub fn clean_from_base(&self) {
        let mut buffer = self.buffer.borrow_mut();
        let end = self.current_base.saturating_add(self.len).min(buffer.len());
        if let Some(region) = buffer.get_mut(self.current_base..end) {
            region.fill(0);
        }
    }

    /// Active size of this frame's view, always a multiple of 32.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow the view to cover `new_memory_size` bytes, rounded up to the
    /// next word boundary. Shrinking never happens.
    pub fn resize(&mut self, new_memory_size: usize) -> Result<(), VMError> {
        if new_memory_size == 0 {
            return Ok(());
        }

        let new_memory_size = new_memory_size
            .checked_next_multiple_of(WORD_SIZE_IN_BYTES_USIZE)
            .ok_or(OutOfOffset)?;

        if new_memory_size <= self.len {
            return Ok(());
        }

        let real_new_size = new_memory_size
            .checked_add(self.current_base)
            .ok_or(OutOfOffset)?;
        if real_new_size > self.limit {
            return Err(ExceptionalHalt::MemoryLimitExceeded.into());
        }

        self.len = new_memory_size;

        let mut buffer = self.buffer.borrow_mut();
        if real_new_size > buffer.len() {
            // Grow in 64-byte steps to avoid a resize per touched word.
            buffer.resize(real_new_size.next_multiple_of(64), 0);
        }

        Ok(())
    }

    /// Expansion gas for growing this view to `new_memory_size` bytes.
    ///
    /// Total cost is `3·w + ⌊w²/512⌋`; the charge is the difference between
    /// the new and current totals. Sizes at or below the current view are
    /// free.
    pub fn expansion_cost(&mut self, new_memory_size: usize) -> Result<u64, VMError> {
        if new_memory_size <= self.len {
            return Ok(0);
        }
        let new_cost = self.total_cost(new_memory_size)?;
        let current_cost = self.total_cost(self.len)?;
        // Monotonic in the size, so the subtraction cannot underflow.
        Ok(new_cost.wrapping_sub(current_cost))
    }

    fn total_cost(&mut self, memory_size: usize) -> Result<u64, VMError> {
        let memory_size = u64::try_from(memory_size).map_err(|_| ExceptionalHalt::OutOfGas)?;
        let words = memory_size.div_ceil(WORD_SIZE_IN_BYTES_U64);

        if let Some(cost) = usize::try_from(words)
            .ok()
            .and_then(|words| SMALL_COST_TABLE.get(words))
        {
            return Ok(*cost);
        }

        let (cached_words, cached_cost) = self.last_cost;
        if cached_words == words {
            return Ok(cached_cost);
        }

        let quadratic = words
            .checked_mul(words)
            .map(|squared| squared / MEMORY_EXPANSION_QUOTIENT)
            .ok_or(ExceptionalHalt::OutOfGas)?;
        let cost = words
            .checked_mul(MEMORY_WORD_COST)
            .and_then(|linear| linear.checked_add(quadratic))
            .ok_or(ExceptionalHalt::OutOfGas)?;

        self.last_cost = (words, cost);
        Ok(cost)
    }

    /// Copy `size` bytes out of the view, expanding it first.
    pub fn load_range(&mut self, offset: usize, size: usize) -> Result<Bytes, VMError> {
        if size == 0 {
            return Ok(Bytes::new());
        }

        let new_size = offset.checked_add(size).ok_or(OutOfOffset)?;
        self.resize(new_size)?;

        let true_offset = offset.checked_add(self.current_base).ok_or(OutOfOffset)?;
        let true_end = true_offset.checked_add(size).ok_or(OutOfOffset)?;

        let buffer = self.buffer.borrow();
        let slice = buffer
            .get(true_offset..true_end)
            .ok_or(InternalError::Custom("memory resize out of sync".to_string()))?;
        Ok(Bytes::copy_from_slice(slice))
    }

    /// Copy `N` bytes out of the view, expanding it first.
    pub fn load_range_const<const N: usize>(&mut self, offset: usize) -> Result<[u8; N], VMError> {
        let new_size = offset.checked_add(N).ok_or(OutOfOffset)?;
        self.resize(new_size)?;

        let true_offset = offset.checked_add(self.current_base).ok_or(OutOfOffset)?;
        let true_end = true_offset.checked_add(N).ok_or(OutOfOffset)?;

        let buffer = self.buffer.borrow();
        let slice = buffer
            .get(true_offset..true_end)
            .ok_or(InternalError::Custom("memory resize out of sync".to_string()))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Load one word.
    pub fn load_word(&mut self, offset: usize) -> Result<U256, VMError> {
        let value: [u8; 32] = self.load_range_const(offset)?;
        Ok(u256_from_big_endian_const(value))
    }

    fn store(&self, data: &[u8], at_offset: usize) -> Result<(), VMError> {
        if data.is_empty() {
            return Ok(());
        }

        let real_offset = at_offset.checked_add(self.current_base).ok_or(OutOfOffset)?;
        let real_end = real_offset.checked_add(data.len()).ok_or(OutOfOffset)?;

        let mut buffer = self.buffer.borrow_mut();
        buffer
            .get_mut(real_offset..real_end)
            .ok_or(InternalError::Custom("memory resize out of sync".to_string()))?
            .copy_from_slice(data);
        Ok(())
    }

    /// Store `data` at `offset`, expanding the view as needed.
    pub fn store_data(&mut self, offset: usize, data: &[u8]) -> Result<(), VMError> {
        if data.is_empty() {
            return Ok(());
        }
        let new_size = offset.checked_add(data.len()).ok_or(OutOfOffset)?;
        self.resize(new_size)?;
        self.store(data, offset)
    }

    /// Store `data` and zero-pad the remainder up to `total_size`.
    pub fn store_data_zero_padded(
        &mut self,
        offset: usize,
        data: &[u8],
        total_size: usize,
    ) -> Result<(), VMError> {
        if total_size == 0 {
            return Ok(());
        }

        let new_size = offset.checked_add(total_size).ok_or(OutOfOffset)?;
        self.resize(new_size)?;

        let copy_size = data.len().min(total_size);
        if copy_size > 0 {
            self.store(data.get(..copy_size).unwrap_or_default(), offset)?;
        }

        if copy_size < total_size {
            // offset + total_size passed the overflow check above, so the
            // zero region bounds cannot overflow.
            let zero_offset = offset.wrapping_add(copy_size);
            let zero_size = total_size.wrapping_sub(copy_size);
            let real_offset = zero_offset.wrapping_add(self.current_base);
            let mut buffer = self.buffer.borrow_mut();
            buffer
                .get_mut(real_offset..real_offset.wrapping_add(zero_size))
                .ok_or(InternalError::Custom("memory resize out of sync".to_string()))?
                .fill(0);
        }

        Ok(())
    }

    /// Store a full word.
    pub fn store_word(&mut self, offset: usize, word: U256) -> Result<(), VMError> {
        let new_size = offset
            .checked_add(WORD_SIZE_IN_BYTES_USIZE)
            .ok_or(OutOfOffset)?;
        self.resize(new_size)?;
        self.store(&u256_to_big_endian(word), offset)
    }

    /// Overlapping-safe copy inside the view (MCOPY). Reads from expanded
    /// memory see zeroes, so the destination-or-source maximum is expanded
    /// first.
    pub fn copy_within(
        &mut self,
        from_offset: usize,
        to_offset: usize,
        size: usize,
    ) -> Result<(), VMError> {
        if size == 0 {
            return Ok(());
        }

        self.resize(
            to_offset
                .max(from_offset)
                .checked_add(size)
                .ok_or(OutOfOffset)?,
        )?;

        let true_from = from_offset.checked_add(self.current_base).ok_or(OutOfOffset)?;
        let true_to = to_offset.checked_add(self.current_base).ok_or(OutOfOffset)?;
        let from_end = true_from.checked_add(size).ok_or(OutOfOffset)?;

        let mut buffer = self.buffer.borrow_mut();
        buffer.copy_within(true_from..from_end, true_to);
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

/// Word-aligned memory size needed to touch `[offset, offset + size)`.
/// Zero-size accesses never expand memory, whatever the offset.
pub fn calculate_memory_size(offset: usize, size: usize) -> Result<usize, VMError> {
    if size == 0 {
        return Ok(0);
    }

    offset
        .checked_add(size)
        .and_then(|end| end.checked_next_multiple_of(WORD_SIZE_IN_BYTES_USIZE))
        .ok_or(OutOfOffset.into())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

    use super::*;

    #[test]
    fn expansion_cost_matches_formula_for_small_and_large_sizes() {
        let mut memory = Memory::new();
        for size_words in [0usize, 1, 2, 31, 32, 128, 129, 1000, 4096] {
            let size = size_words * 32;
            let w = u64::try_from(size_words).unwrap();
            let expected = 3 * w + w * w / 512;
            assert_eq!(memory.expansion_cost(size).unwrap(), expected, "words = {w}");
        }
    }

    #[test]
    fn expansion_is_charged_incrementally() {
        let mut memory = Memory::new();
        let first = memory.expansion_cost(32).unwrap();
        assert_eq!(first, 3);
        memory.resize(32).unwrap();
        assert_eq!(memory.expansion_cost(32).unwrap(), 0);
        let second = memory.expansion_cost(64).unwrap();
        assert_eq!(second, 3);
    }

    #[test]
    fn word_roundtrip_and_implicit_zero() {
        let mut memory = Memory::new();
        let word = U256::from(0xdeadbeef_u64);
        memory.store_word(0, word).unwrap();
        assert_eq!(memory.load_word(0).unwrap(), word);
        // Reading past what was written sees zeroes.
        assert_eq!(memory.load_word(64).unwrap(), U256::zero());
        assert_eq!(memory.len() % 32, 0);
    }

    #[test]
    fn child_view_starts_empty_and_wipes_on_exit() {
        let mut parent = Memory::new();
        parent.store_word(0, U256::from(7)).unwrap();

        let mut child = parent.next_memory();
        assert!(child.is_empty());
        child.store_word(0, U256::from(9)).unwrap();
        assert_eq!(child.load_word(0).unwrap(), U256::from(9));

        child.clean_from_base();
        // The parent's region is untouched.
        assert_eq!(parent.load_word(0).unwrap(), U256::from(7));
    }

    #[test]
    fn memory_limit_is_enforced() {
        let mut memory = Memory::with_limits(1024, 0);
        assert!(memory.resize(1024).is_ok());
        assert_eq!(
            memory.resize(1056),
            Err(ExceptionalHalt::MemoryLimitExceeded.into())
        );
    }

    #[test]
    fn copy_within_handles_overlap() {
        let mut memory = Memory::new();
        memory.store_data(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        memory.copy_within(0, 4, 8).unwrap();
        let copied = memory.load_range(4, 8).unwrap();
        assert_eq!(&copied[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn zero_size_access_never_expands() {
        assert_eq!(calculate_memory_size(usize::MAX, 0).unwrap(), 0);
        assert_eq!(calculate_memory_size(31, 1).unwrap(), 32);
        assert_eq!(calculate_memory_size(32, 1).unwrap(), 64);
    }
}
