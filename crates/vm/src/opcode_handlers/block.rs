use crate::{
    constants::LAST_AVAILABLE_BLOCK_LIMIT,
    errors::{OpcodeResult, VMError},
    utils::h256_to_u256,
    vm::VM,
};
use kestrel_common::types::Fork;

// Block Information (11)
// Opcodes: BLOCKHASH, COINBASE, TIMESTAMP, NUMBER, PREVRANDAO, GASLIMIT,
// CHAINID, SELFBALANCE, BASEFEE, BLOBHASH, BLOBBASEFEE

impl VM {
    // BLOCKHASH operation
    pub fn op_blockhash(&mut self) -> Result<OpcodeResult, VMError> {
        let requested = self.current_call_frame.stack.pop1()?;

        // Only the 256 most recent blocks, and never the current one.
        let block_number = self.env.block_number;
        let valid = u64::try_from(requested).ok().filter(|number| {
            *number < block_number
                && block_number.saturating_sub(*number) <= LAST_AVAILABLE_BLOCK_LIMIT
        });

        match valid {
            Some(number) => {
                let hash = self.host.block_hash(number)?;
                self.current_call_frame.stack.push(h256_to_u256(hash))?;
            }
            None => self.current_call_frame.stack.push_zero()?,
        }

        Ok(OpcodeResult::Continue)
    }

    // COINBASE operation
    pub fn op_coinbase(&mut self) -> Result<OpcodeResult, VMError> {
        let coinbase = self.env.coinbase;
        self.current_call_frame
            .stack
            .push(crate::utils::address_to_word(coinbase))?;
        Ok(OpcodeResult::Continue)
    }

    // TIMESTAMP operation
    pub fn op_timestamp(&mut self) -> Result<OpcodeResult, VMError> {
        let timestamp = self.env.timestamp;
        self.current_call_frame.stack.push(timestamp.into())?;
        Ok(OpcodeResult::Continue)
    }

    // NUMBER operation
    pub fn op_number(&mut self) -> Result<OpcodeResult, VMError> {
        let block_number = self.env.block_number;
        self.current_call_frame.stack.push(block_number.into())?;
        Ok(OpcodeResult::Continue)
    }

    // PREVRANDAO operation (DIFFICULTY before Paris, EIP-4399 after)
    pub fn op_prevrandao(&mut self) -> Result<OpcodeResult, VMError> {
        let value = if self.env.config.fork >= Fork::Paris {
            h256_to_u256(self.env.prev_randao.unwrap_or_default())
        } else {
            self.env.difficulty
        };
        self.current_call_frame.stack.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    // GASLIMIT operation
    pub fn op_gaslimit(&mut self) -> Result<OpcodeResult, VMError> {
        let block_gas_limit = self.env.block_gas_limit;
        self.current_call_frame.stack.push(block_gas_limit.into())?;
        Ok(OpcodeResult::Continue)
    }

    // CHAINID operation (EIP-1344)
    pub fn op_chainid(&mut self) -> Result<OpcodeResult, VMError> {
        let chain_id = self.env.chain_id;
        self.current_call_frame.stack.push(chain_id)?;
        Ok(OpcodeResult::Continue)
    }

    // SELFBALANCE operation (EIP-1884)
    pub fn op_selfbalance(&mut self) -> Result<OpcodeResult, VMError> {
        let address = self.current_call_frame.to;
        let balance = self.host.balance(address)?;
        self.current_call_frame.stack.push(balance)?;
        Ok(OpcodeResult::Continue)
    }

    // BASEFEE operation (EIP-3198)
    pub fn op_basefee(&mut self) -> Result<OpcodeResult, VMError> {
        let base_fee = self.env.base_fee_per_gas;
        self.current_call_frame.stack.push(base_fee)?;
        Ok(OpcodeResult::Continue)
    }

    // BLOBHASH operation (EIP-4844)
    pub fn op_blobhash(&mut self) -> Result<OpcodeResult, VMError> {
        let index = self.current_call_frame.stack.pop1()?;
        let hash = usize::try_from(index)
            .ok()
            .and_then(|index| self.env.tx_blob_hashes.get(index))
            .copied();
        match hash {
            Some(hash) => self.current_call_frame.stack.push(h256_to_u256(hash))?,
            None => self.current_call_frame.stack.push_zero()?,
        }
        Ok(OpcodeResult::Continue)
    }

    // BLOBBASEFEE operation (EIP-7516)
    pub fn op_blobbasefee(&mut self) -> Result<OpcodeResult, VMError> {
        let blob_base_fee = self.env.base_blob_fee_per_gas;
        self.current_call_frame.stack.push(blob_base_fee)?;
        Ok(OpcodeResult::Continue)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::arithmetic_side_effects)]

    use super::*;

    #[test]
    fn blockhash_window_arithmetic() {
        // Exactly 256 back is valid, 257 is not, and the current block
        // itself never is.
        let current = 1000u64;
        let in_window = |requested: u64| {
            requested < current && current.saturating_sub(requested) <= LAST_AVAILABLE_BLOCK_LIMIT
        };
        assert!(in_window(999));
        assert!(in_window(current - LAST_AVAILABLE_BLOCK_LIMIT));
        assert!(!in_window(current - LAST_AVAILABLE_BLOCK_LIMIT - 1));
        assert!(!in_window(current));
        assert!(!in_window(current + 1));
    }
}
