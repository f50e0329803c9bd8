//! Client-side fault injection, test-only.
//!
//! Three environment variables drive an in-process fault injector applied to
//! inbound responses at the client, before decoding: `TEST_MODE`
//! (`true`/`false`), `TEST_DROP_RATE` and `TEST_CORRUPT_RATE` (floats in
//! `0.0..=1.0`). A dropped datagram surfaces to the client as an ordinary
//! timeout; a corrupted one flips every bit of one uniformly chosen octet,
//! so a checksum mismatch is the only way the client notices.

use rand::Rng;

/// What [`FaultInjector::apply`] decided to do with a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Deliver unchanged.
    Passthrough,
    /// Drop; caller should behave as if nothing arrived.
    Drop,
    /// Deliver after flipping one octet's bits.
    Corrupt,
}

#[derive(Debug, Clone, Copy)]
pub struct FaultInjector {
    enabled: bool,
    drop_rate: f64,
    corrupt_rate: f64,
}

impl FaultInjector {
    /// Read `TEST_MODE`/`TEST_DROP_RATE`/`TEST_CORRUPT_RATE` from the environment.
    pub fn from_env() -> Self {
        let enabled = std::env::var("TEST_MODE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let drop_rate = std::env::var("TEST_DROP_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let corrupt_rate = std::env::var("TEST_CORRUPT_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        Self {
            enabled,
            drop_rate: drop_rate.clamp(0.0, 1.0),
            corrupt_rate: corrupt_rate.clamp(0.0, 1.0),
        }
    }

    /// Construct directly, bypassing the environment. Useful for tests that
    /// want deterministic fault rates without mutating process-global state.
    pub fn new(enabled: bool, drop_rate: f64, corrupt_rate: f64) -> Self {
        Self {
            enabled,
            drop_rate: drop_rate.clamp(0.0, 1.0),
            corrupt_rate: corrupt_rate.clamp(0.0, 1.0),
        }
    }

    /// Decide what to do with one inbound datagram.
    pub fn decide(&self) -> FaultOutcome {
        if !self.enabled {
            return FaultOutcome::Passthrough;
        }
        let mut rng = rand::thread_rng();
        let roll: f64 = rng.gen();
        if roll < self.drop_rate {
            FaultOutcome::Drop
        } else if roll < self.drop_rate + self.corrupt_rate {
            FaultOutcome::Corrupt
        } else {
            FaultOutcome::Passthrough
        }
    }

    /// Flip every bit of one uniformly chosen octet of `datagram`, in place.
    pub fn corrupt(&self, datagram: &mut [u8]) {
        if datagram.is_empty() {
            return;
        }
        let mut rng = rand::thread_rng();
        let idx = rng.gen_range(0..datagram.len());
        datagram[idx] = !datagram[idx];
    }

    /// Apply the injector to `datagram`; `None` means drop.
    pub fn apply(&self, mut datagram: Vec<u8>) -> Option<Vec<u8>> {
        match self.decide() {
            FaultOutcome::Passthrough => Some(datagram),
            FaultOutcome::Drop => None,
            FaultOutcome::Corrupt => {
                self.corrupt(&mut datagram);
                Some(datagram)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_injector_never_drops_or_corrupts() {
        let injector = FaultInjector::new(false, 1.0, 1.0);
        let datagram = vec![1, 2, 3];
        assert_eq!(injector.apply(datagram.clone()), Some(datagram));
    }

    #[test]
    fn drop_rate_one_always_drops() {
        let injector = FaultInjector::new(true, 1.0, 0.0);
        assert_eq!(injector.apply(vec![1, 2, 3]), None);
    }

    #[test]
    fn corrupt_flips_exactly_one_octet() {
        let injector = FaultInjector::new(true, 0.0, 0.0);
        let original = vec![0x00u8; 8];
        let mut corrupted = original.clone();
        injector.corrupt(&mut corrupted);
        let diffs = original
            .iter()
            .zip(corrupted.iter())
            .filter(|(a, b)| a != b)
            .count();
        assert_eq!(diffs, 1);
        assert_eq!(corrupted.iter().filter(|&&b| b == 0xFF).count(), 1);
    }

    #[test]
    fn corrupt_on_empty_datagram_is_a_no_op() {
        let injector = FaultInjector::new(true, 0.0, 0.0);
        let mut datagram: Vec<u8> = Vec::new();
        injector.corrupt(&mut datagram);
        assert!(datagram.is_empty());
    }
}
