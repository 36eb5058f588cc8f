use serde::{Deserialize, Serialize};

/// Ethereum hardfork identifiers, ordered by activation.
///
/// The ordering is load-bearing: feature gates and gas schedules are selected
/// with range comparisons (`fork >= Fork::Berlin`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Fork {
    Frontier = 0,
    Homestead = 1,
    DaoFork = 2,
    Tangerine = 3,
    SpuriousDragon = 4,
    Byzantium = 5,
    Constantinople = 6,
    Petersburg = 7,
    Istanbul = 8,
    MuirGlacier = 9,
    Berlin = 10,
    London = 11,
    ArrowGlacier = 12,
    GrayGlacier = 13,
    Paris = 14,
    Shanghai = 15,
    #[default]
    Cancun = 16,
}

impl Fork {
    /// Position in the activation order, usable as a table index.
    pub fn index(self) -> usize {
        #[allow(clippy::as_conversions)]
        {
            self as usize
        }
    }

    /// All forks, in activation order.
    pub const ALL: [Fork; 17] = [
        Fork::Frontier,
        Fork::Homestead,
        Fork::DaoFork,
        Fork::Tangerine,
        Fork::SpuriousDragon,
        Fork::Byzantium,
        Fork::Constantinople,
        Fork::Petersburg,
        Fork::Istanbul,
        Fork::MuirGlacier,
        Fork::Berlin,
        Fork::London,
        Fork::ArrowGlacier,
        Fork::GrayGlacier,
        Fork::Paris,
        Fork::Shanghai,
        Fork::Cancun,
    ];
}
