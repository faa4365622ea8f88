//! The static validator set.

use crate::crypto::Address;
use serde::{Deserialize, Serialize};

/// The known, static set of validators.
///
/// Addresses are kept sorted so that every node derives identical proposer
/// elections from the same membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    addresses: Vec<Address>,
}

impl ValidatorSet {
    pub fn new(mut addresses: Vec<Address>) -> Self {
        addresses.sort();
        addresses.dedup();
        ValidatorSet { addresses }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.binary_search(address).is_ok()
    }

    /// Sorted addresses.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// All validators except `exclude`.
    pub fn others<'a>(&'a self, exclude: &'a Address) -> impl Iterator<Item = &'a Address> + 'a {
        self.addresses.iter().filter(move |a| *a != exclude)
    }

    /// Maximum tolerated faulty validators: `f = (n - 1) / 3`.
    pub fn max_faulty(&self) -> usize {
        self.addresses.len().saturating_sub(1) / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_keypair;

    #[test]
    fn sorted_and_deduplicated() {
        let a = test_keypair(3).address();
        let b = test_keypair(1).address();
        let set = ValidatorSet::new(vec![a, b, a]);
        assert_eq!(set.len(), 2);
        let mut sorted = vec![a, b];
        sorted.sort();
        assert_eq!(set.addresses(), sorted.as_slice());
    }

    #[test]
    fn fault_tolerance() {
        let addrs: Vec<_> = (0..4).map(|i| test_keypair(i).address()).collect();
        assert_eq!(ValidatorSet::new(addrs).max_faulty(), 1);
        let addrs: Vec<_> = (0..7).map(|i| test_keypair(i).address()).collect();
        assert_eq!(ValidatorSet::new(addrs).max_faulty(), 2);
    }
}
