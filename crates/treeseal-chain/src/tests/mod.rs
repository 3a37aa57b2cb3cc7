//! Tests for the hash chain crate.


use ed25519_dalek::SigningKey;
use treeseal_types::{LinkHash, TreeHash};

use crate::link::{Link, sign_key_possession};

/// Deterministic signing key from a seed byte.
fn test_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// A recognizable tree hash for tests.
fn tree(n: u8) -> TreeHash {
    TreeHash::from_data(&[n])
}

/// Builds link sequences by hand, tracking the previous hash.
struct LinkBuilder {
    links: Vec<Link>,
    datum: u64,
}

impl LinkBuilder {
    /// Start with a genesis link signed by `key`.
    fn genesis(key: &SigningKey) -> Self {
        let link = Link::chain_start(1_000, key, [7u8; 24], Some("genesis")).unwrap();
        Self {
            links: vec![link],
            datum: 1_000,
        }
    }

    fn previous(&self) -> LinkHash {
        self.links.last().map(Link::hash).unwrap()
    }

    fn next_datum(&mut self) -> u64 {
        self.datum += 1;
        self.datum
    }

    fn push(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    fn add_key(mut self, new_key: &SigningKey, signer: &SigningKey) -> Self {
        let datum = self.next_datum();
        let pop = sign_key_possession(new_key, None);
        let link = Link::add_key(
            self.previous(),
            datum,
            new_key.verifying_key(),
            pop,
            None,
            signer,
        )
        .unwrap();
        self.push(link)
    }

    fn remove_key(mut self, key: &SigningKey, signer: &SigningKey) -> Self {
        let datum = self.next_datum();
        let link = Link::remove_key(self.previous(), datum, key.verifying_key(), signer);
        self.push(link)
    }

    fn threshold(mut self, m: usize, signer: &SigningKey) -> Self {
        let datum = self.next_datum();
        let link = Link::set_threshold(self.previous(), datum, m, signer);
        self.push(link)
    }

    fn record(mut self, tree_hash: TreeHash, signer: &SigningKey) -> Self {
        let datum = self.next_datum();
        let link = Link::record_tree(self.previous(), datum, tree_hash, None, signer).unwrap();
        self.push(link)
    }

    fn sign(mut self, tree_hash: TreeHash, signer: &SigningKey) -> Self {
        let datum = self.next_datum();
        let link = Link::sign_tree(self.previous(), datum, tree_hash, signer);
        self.push(link)
    }

    fn build(self) -> Vec<Link> {
        self.links
    }
}
