//! Replay of a link sequence into the authorization state it implies.
//!
//! [`ChainState::replay`] is a pure fold of [`ChainState::step`] over the
//! links in chain order. Loading the same links always yields the same
//! state; appending reuses `step` on a clone of the current state, so the
//! incremental path never drifts from a full replay.

use std::collections::HashMap;

use ed25519_dalek::VerifyingKey;
use treeseal_types::{LinkHash, TreeHash};

use crate::error::{ChainError, Violation};
use crate::link::{Link, LinkKind, key_hex};

/// A tree hash introduced by a `source` link and the signatures it collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRecord {
    /// The recorded tree hash.
    pub tree_hash: TreeHash,
    /// Chain position of the `source` link.
    pub recorded_at: usize,
    /// Distinct signers, in signing order, including keys removed since.
    pub signers: Vec<VerifyingKey>,
    /// Chain position of the signature that reached quorum.
    pub approved_at: Option<usize>,
}

impl TreeRecord {
    /// Whether this tree reached quorum.
    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }
}

/// Authorization state and tree history derived from a chain prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainState {
    len: usize,
    head: Option<LinkHash>,
    keys: Vec<VerifyingKey>,
    threshold: usize,
    trees: Vec<TreeRecord>,
    tree_index: HashMap<TreeHash, usize>,
    last_approved: Option<usize>,
}

impl ChainState {
    /// Replay `links` from genesis.
    ///
    /// Fails with [`ChainError::Invalid`] naming the first offending link.
    pub fn replay<'a>(links: impl IntoIterator<Item = &'a Link>) -> Result<Self, ChainError> {
        links
            .into_iter()
            .try_fold(Self::default(), |state, link| state.step(link))
    }

    /// Apply one link at position `self.len()`, returning the next state.
    pub fn step(mut self, link: &Link) -> Result<Self, ChainError> {
        let index = self.len;
        let invalid = |violation| ChainError::Invalid { index, violation };

        let expected_previous = self.head.unwrap_or_else(LinkHash::genesis_previous);
        if link.previous != expected_previous {
            return Err(invalid(Violation::BrokenLink {
                expected: expected_previous,
                actual: link.previous,
            }));
        }

        if let LinkKind::ChainStart { pubkey, .. } = &link.kind {
            if index != 0 {
                return Err(invalid(Violation::DuplicateGenesis));
            }
            if !link.verify_genesis_signature() {
                return Err(invalid(Violation::BadSignature(key_hex(pubkey))));
            }
            self.keys.push(*pubkey);
            self.threshold = 1;
            return Ok(self.advance(link));
        }

        if index == 0 {
            return Err(invalid(Violation::MissingGenesis));
        }

        // Every non-genesis link carries an endorsement.
        let Some(endorsement) = link.kind.endorsement() else {
            return Err(invalid(Violation::MissingGenesis));
        };
        let signer = endorsement.signer;
        if !self.is_authorized(&signer) {
            return Err(invalid(Violation::UnauthorizedSigner(key_hex(&signer))));
        }
        if !link.verify_endorsement() {
            return Err(invalid(Violation::BadSignature(key_hex(&signer))));
        }

        match &link.kind {
            LinkKind::ChainStart { .. } | LinkKind::Comment { .. } => {}
            LinkKind::AddKey { pubkey, .. } => {
                if self.is_authorized(pubkey) {
                    return Err(invalid(Violation::KeyAlreadyAuthorized(key_hex(pubkey))));
                }
                if !link.verify_key_possession() {
                    return Err(invalid(Violation::BadSignature(key_hex(pubkey))));
                }
                self.keys.push(*pubkey);
            }
            LinkKind::RemoveKey { pubkey, .. } => {
                let Some(pos) = self.keys.iter().position(|k| k == pubkey) else {
                    return Err(invalid(Violation::UnknownKey(key_hex(pubkey))));
                };
                let remaining = self.keys.len() - 1;
                if remaining < self.threshold {
                    return Err(invalid(Violation::ThresholdOutOfRange {
                        m: self.threshold,
                        keys: remaining,
                    }));
                }
                self.keys.remove(pos);
            }
            LinkKind::SetThreshold { m, .. } => {
                if *m < 1 || *m > self.keys.len() {
                    return Err(invalid(Violation::ThresholdOutOfRange {
                        m: *m,
                        keys: self.keys.len(),
                    }));
                }
                self.threshold = *m;
            }
            LinkKind::RecordTree { tree_hash, .. } => {
                if *tree_hash == TreeHash::empty() || self.tree_index.contains_key(tree_hash) {
                    return Err(invalid(Violation::TreeAlreadyRecorded(*tree_hash)));
                }
                self.tree_index.insert(*tree_hash, self.trees.len());
                self.trees.push(TreeRecord {
                    tree_hash: *tree_hash,
                    recorded_at: index,
                    signers: Vec::new(),
                    approved_at: None,
                });
            }
            LinkKind::SignTree { tree_hash, .. } => {
                let Some(&pos) = self.tree_index.get(tree_hash) else {
                    return Err(invalid(Violation::UnknownTree(*tree_hash)));
                };
                if self.trees[pos].is_approved() {
                    return Err(invalid(Violation::TreeAlreadyApproved(*tree_hash)));
                }
                if self.last_approved.is_some_and(|last| pos < last) {
                    return Err(invalid(Violation::TreeSuperseded(*tree_hash)));
                }
                let threshold = self.threshold;
                let record = &mut self.trees[pos];
                if record.signers.contains(&signer) {
                    return Err(invalid(Violation::DuplicateSignature {
                        signer: key_hex(&signer),
                        tree_hash: *tree_hash,
                    }));
                }
                record.signers.push(signer);
                // Signatures by keys removed since signing no longer count.
                let valid = record
                    .signers
                    .iter()
                    .filter(|k| self.keys.contains(k))
                    .count();
                if valid >= threshold {
                    record.approved_at = Some(index);
                    self.last_approved = Some(pos);
                }
            }
        }

        Ok(self.advance(link))
    }

    fn advance(mut self, link: &Link) -> Self {
        self.head = Some(link.hash());
        self.len += 1;
        self
    }

    /// Number of links replayed so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no link has been replayed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hash of the most recent link.
    pub fn head(&self) -> Option<LinkHash> {
        self.head
    }

    /// Currently authorized keys, in the order they were added.
    pub fn keys(&self) -> &[VerifyingKey] {
        &self.keys
    }

    /// Whether `key` is currently authorized.
    pub fn is_authorized(&self, key: &VerifyingKey) -> bool {
        self.keys.contains(key)
    }

    /// Current quorum threshold (0 before genesis).
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Every recorded tree, in chain order.
    pub fn trees(&self) -> &[TreeRecord] {
        &self.trees
    }

    /// Look up the record for `tree_hash`.
    pub fn tree(&self, tree_hash: &TreeHash) -> Option<&TreeRecord> {
        self.tree_index.get(tree_hash).map(|&i| &self.trees[i])
    }

    /// The most recently approved tree hash.
    pub fn last_approved(&self) -> Option<TreeHash> {
        self.last_approved.map(|i| self.trees[i].tree_hash)
    }

    /// Every recorded tree hash, in chain order.
    pub fn tree_hashes(&self) -> Vec<TreeHash> {
        self.trees.iter().map(|t| t.tree_hash).collect()
    }

    /// Trees recorded after the last approved one that still lack quorum.
    pub fn pending(&self) -> impl Iterator<Item = &TreeRecord> {
        let start = self.last_approved.map_or(0, |i| i + 1);
        self.trees[start..].iter()
    }
}
