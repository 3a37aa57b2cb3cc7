//! Tampering and missing data never leave a mirror half-updated.

use treeseal_chain::{HashChain, Link};
use treeseal_integration_tests::{Mirror, Origin, hash_of, key, write_file};
use treeseal_sync::{Distribution, PatchDir, SyncError};
use treeseal_types::TreeHash;

#[test]
fn test_missing_patch_leaves_mirror_unchanged() {
    let alice = key(1);
    let mut origin = Origin::start(&alice);
    origin.write("a", "1");
    let d1 = origin.publish("v1", &alice);
    origin.sign(d1, &alice);
    origin.write("a", "2");
    let d2 = origin.publish("v2", &alice);
    origin.sign(d2, &alice);

    // Drop the d1 -> d2 patch from the bundle.
    let (bundle, _) = origin.distribution();
    let mut contents = Distribution::decode(&bundle).unwrap();
    let missing = PatchDir::file_name(&d1, &d2);
    contents.patches.retain(|p| p.name != missing);
    let bundle = contents.encode().unwrap();

    let mirror = Mirror::new();
    assert!(matches!(
        mirror.apply(&bundle, None),
        Err(SyncError::MissingPatchPath { .. })
    ));
    assert_eq!(mirror.hash(), TreeHash::empty());
}

#[test]
fn test_forged_approval_rejected() {
    let alice = key(1);
    let mallory = key(66);
    let mut origin = Origin::start(&alice);
    origin.write("a", "1");
    origin.publish("v1", &alice);

    // Mallory signs with a key the chain never authorized.
    let (bundle, _) = origin.distribution();
    let mut contents = Distribution::decode(&bundle).unwrap();
    let tree = origin.chain.tree_hashes()[0];
    let forged = Link::sign_tree(origin.chain.head(), 0, tree, &mallory);
    contents.chain.push_str(&format!("{forged}\n"));
    let bundle = contents.encode().unwrap();

    let mirror = Mirror::new();
    assert!(matches!(mirror.apply(&bundle, None), Err(SyncError::Chain(_))));
    assert!(!mirror.layout.chain_path().exists());
}

#[test]
fn test_tampered_local_chain_blocks_apply() {
    let alice = key(1);
    let mut origin = Origin::start(&alice);
    origin.write("a", "1");
    let d1 = origin.publish("v1", &alice);
    origin.sign(d1, &alice);
    let (bundle, _) = origin.distribution();

    let mirror = Mirror::new();
    mirror.apply(&bundle, None).unwrap();

    let path = mirror.layout.chain_path();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replacen("v1", "v9", 1)).unwrap();
    assert!(HashChain::read_file(&path).is_err());
    assert!(mirror.apply(&bundle, None).is_err());
}

#[test]
fn test_divergent_mirror_is_not_overwritten() {
    let alice = key(1);
    let mut origin = Origin::start(&alice);
    origin.write("a", "1");
    let d1 = origin.publish("v1", &alice);
    origin.sign(d1, &alice);
    let (bundle, _) = origin.distribution();

    let mirror = Mirror::new();
    write_file(&mirror.dir, "local-change.txt", "mine");
    let before = hash_of(&mirror.dir);

    assert!(matches!(
        mirror.apply(&bundle, None),
        Err(SyncError::DivergentTree(hash)) if hash == before
    ));
    assert_eq!(mirror.read("local-change.txt"), "mine");
}
