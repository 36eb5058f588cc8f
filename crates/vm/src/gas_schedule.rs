//! Fork-aware gas schedules.
//!
//! Costs that change across hard forks live here; costs that never changed
//! are plain constants in `gas_cost`.
//!
//! # Fork history (gas-relevant changes)
//!
//! - **Frontier/Homestead**: original costs
//! - **Tangerine Whistle (EIP-150)**: IO repricing, 63/64 rule
//! - **Spurious Dragon (EIP-160)**: EXP byte cost 10 → 50
//! - **Istanbul (EIP-1884/2200)**: SLOAD/BALANCE increases, net gas metering
//! - **Berlin (EIP-2929)**: cold/warm access pricing
//! - **London (EIP-3529)**: refund reductions

use kestrel_common::types::Fork;

/// Gas costs that vary by fork.
#[derive(Debug, Clone, Copy)]
pub struct GasSchedule {
    // Storage
    pub sload: u64,
    pub sstore_set: u64,
    pub sstore_reset: u64,
    pub sstore_clears_refund: u64,

    // Account access
    pub balance: u64,
    pub extcodesize: u64,
    pub extcodecopy_base: u64,
    pub extcodehash: u64,

    // CALL-family base cost (memory/value components excluded)
    pub call_base: u64,

    // Self-destruct
    pub selfdestruct: u64,
    pub selfdestruct_new_account: u64,
    pub selfdestruct_refund: u64,

    // CALL to an empty account with value
    pub call_new_account: u64,

    pub exp_byte: u64,

    // Refund cap divisor: gas_used / quotient
    pub refund_quotient: u64,

    // EIP-2929 cold/warm pricing (zeroes before Berlin)
    pub has_access_lists: bool,
    pub cold_sload: u64,
    pub warm_sload: u64,
    pub cold_account_access: u64,
    pub warm_account_access: u64,

    // EIP-150 63/64 forwarding rule
    pub has_63_64_rule: bool,

    // EIP-2200 net gas metering for SSTORE
    pub has_net_metering: bool,
}

impl GasSchedule {
    pub const fn for_fork(fork: Fork) -> &'static GasSchedule {
        match fork {
            Fork::Frontier | Fork::Homestead | Fork::DaoFork => &FRONTIER_SCHEDULE,
            Fork::Tangerine => &TANGERINE_WHISTLE_SCHEDULE,
            Fork::SpuriousDragon => &SPURIOUS_DRAGON_SCHEDULE,
            Fork::Byzantium | Fork::Constantinople | Fork::Petersburg => &BYZANTIUM_SCHEDULE,
            Fork::Istanbul | Fork::MuirGlacier => &ISTANBUL_SCHEDULE,
            Fork::Berlin => &BERLIN_SCHEDULE,
            // London and later keep Berlin access pricing with EIP-3529 refunds.
            _ => &LONDON_SCHEDULE,
        }
    }

    /// SLOAD cost, cold/warm-aware from Berlin.
    #[inline]
    pub const fn sload_cost(&self, is_cold: bool) -> u64 {
        if self.has_access_lists {
            if is_cold { self.cold_sload } else { self.warm_sload }
        } else {
            self.sload
        }
    }

    /// Account access cost (BALANCE, EXTCODESIZE, …), cold/warm-aware.
    #[inline]
    pub const fn account_access_cost(&self, is_cold: bool, base_cost: u64) -> u64 {
        if self.has_access_lists {
            if is_cold {
                self.cold_account_access
            } else {
                self.warm_account_access
            }
        } else {
            base_cost
        }
    }

    /// CALL-family address access cost, cold/warm-aware.
    #[inline]
    pub const fn call_cost(&self, is_cold: bool) -> u64 {
        self.account_access_cost(is_cold, self.call_base)
    }
}

/// Frontier/Homestead: original costs, no 63/64 rule, free SELFDESTRUCT.
pub static FRONTIER_SCHEDULE: GasSchedule = GasSchedule {
    sload: 50,
    sstore_set: 20000,
    sstore_reset: 5000,
    sstore_clears_refund: 15000,

    balance: 20,
    extcodesize: 20,
    extcodecopy_base: 20,
    extcodehash: 20,

    call_base: 40,

    selfdestruct: 0,
    selfdestruct_new_account: 0,
    selfdestruct_refund: 24000,

    call_new_account: 25000,

    exp_byte: 10,

    refund_quotient: 2,

    has_access_lists: false,
    cold_sload: 0,
    warm_sload: 0,
    cold_account_access: 0,
    warm_account_access: 0,

    has_63_64_rule: false,

    has_net_metering: false,
};

/// Tangerine Whistle (EIP-150): anti-DoS IO repricing.
pub static TANGERINE_WHISTLE_SCHEDULE: GasSchedule = GasSchedule {
    sload: 200,

    balance: 400,
    extcodesize: 700,
    extcodecopy_base: 700,
    extcodehash: 400,

    call_base: 700,

    selfdestruct: 5000,
    selfdestruct_new_account: 25000,

    has_63_64_rule: true,

    ..FRONTIER_SCHEDULE
};

/// Spurious Dragon (EIP-160): EXP byte repricing.
pub static SPURIOUS_DRAGON_SCHEDULE: GasSchedule = GasSchedule {
    exp_byte: 50,
    ..TANGERINE_WHISTLE_SCHEDULE
};

/// Byzantium through Petersburg: Spurious Dragon costs. Constantinople's
/// short-lived EIP-1283 metering was reverted by Petersburg and is not
/// modelled.
pub static BYZANTIUM_SCHEDULE: GasSchedule = SPURIOUS_DRAGON_SCHEDULE;

/// Istanbul (EIP-1884/2200): SLOAD/BALANCE increases, net gas metering.
pub static ISTANBUL_SCHEDULE: GasSchedule = GasSchedule {
    sload: 800,

    balance: 700,
    extcodehash: 700,

    has_net_metering: true,

    ..SPURIOUS_DRAGON_SCHEDULE
};

/// Berlin (EIP-2929): cold/warm access pricing. Base costs drop to zero;
/// the actual cost comes from the cold/warm fields.
pub static BERLIN_SCHEDULE: GasSchedule = GasSchedule {
    sload: 0,
    balance: 0,
    extcodesize: 0,
    extcodecopy_base: 0,
    extcodehash: 0,
    call_base: 0,

    sstore_reset: 2900,

    has_access_lists: true,
    cold_sload: 2100,
    warm_sload: 100,
    cold_account_access: 2600,
    warm_account_access: 100,

    ..ISTANBUL_SCHEDULE
};

/// London (EIP-3529): refund reductions.
pub static LONDON_SCHEDULE: GasSchedule = GasSchedule {
    sstore_clears_refund: 4800,
    selfdestruct_refund: 0,
    refund_quotient: 5,
    ..BERLIN_SCHEDULE
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontier_schedule() {
        let schedule = GasSchedule::for_fork(Fork::Frontier);
        assert_eq!(schedule.sload, 50);
        assert_eq!(schedule.balance, 20);
        assert_eq!(schedule.call_base, 40);
        assert!(!schedule.has_access_lists);
        assert!(!schedule.has_63_64_rule);
    }

    #[test]
    fn tangerine_whistle_schedule() {
        let schedule = GasSchedule::for_fork(Fork::Tangerine);
        assert_eq!(schedule.sload, 200);
        assert_eq!(schedule.call_base, 700);
        assert!(schedule.has_63_64_rule);
    }

    #[test]
    fn istanbul_schedule() {
        let schedule = GasSchedule::for_fork(Fork::Istanbul);
        assert_eq!(schedule.sload, 800);
        assert_eq!(schedule.balance, 700);
        assert!(schedule.has_net_metering);
    }

    #[test]
    fn berlin_cold_warm_pricing() {
        let schedule = GasSchedule::for_fork(Fork::Berlin);
        assert!(schedule.has_access_lists);
        assert_eq!(schedule.sload_cost(true), 2100);
        assert_eq!(schedule.sload_cost(false), 100);
        assert_eq!(schedule.call_cost(true), 2600);
        assert_eq!(schedule.call_cost(false), 100);
        // Berlin keeps the pre-London refunds.
        assert_eq!(schedule.sstore_clears_refund, 15000);
        assert_eq!(schedule.refund_quotient, 2);
    }

    #[test]
    fn london_refund_reductions() {
        let schedule = GasSchedule::for_fork(Fork::London);
        assert_eq!(schedule.sstore_clears_refund, 4800);
        assert_eq!(schedule.selfdestruct_refund, 0);
        assert_eq!(schedule.refund_quotient, 5);
    }

    #[test]
    fn pre_berlin_ignores_cold_warm() {
        let schedule = GasSchedule::for_fork(Fork::Istanbul);
        assert_eq!(schedule.sload_cost(true), 800);
        assert_eq!(schedule.sload_cost(false), 800);
    }
}
