//! Amnesia fault injector
//!
//! Probabilistic pseudo-miss used to exercise downstream recovery paths.
//! Every layer rolls this at the entry of its `get`, before consulting
//! storage; writes and deletes are unaffected.

use rand::Rng;

/// Returns true with probability `chance`/100.
pub fn should_forget(chance: u8) -> bool {
    match chance {
        0 => false,
        100.. => true,
        _ => rand::rng().random_range(0..100) < chance,
    }
}
