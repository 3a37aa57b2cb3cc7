//! Quorum approval and synchronization across releases.

use treeseal_chain::HashChain;
use treeseal_integration_tests::{Mirror, Origin, hash_of, key};
use treeseal_sync::SyncOutcome;

#[test]
fn test_single_signer_release() {
    let alice = key(1);
    let mut origin = Origin::start(&alice);
    origin.write("README.md", "# project");
    let t1 = origin.publish("v1", &alice);
    origin.sign(t1, &alice);

    assert_eq!(origin.chain.last_approved_tree_hash(), Some(t1));
    assert_eq!(hash_of(&origin.dir), t1);
}

#[test]
fn test_two_of_two_quorum() {
    let alice = key(1);
    let bob = key(2);
    let mut origin = Origin::start(&alice);
    origin.add_signer(&bob, &alice);
    origin.chain.set_threshold(2, &alice).unwrap();

    origin.write("src/lib.rs", "pub fn answer() -> u32 { 42 }");
    let t2 = origin.publish("v1", &alice);

    origin.sign(t2, &alice);
    assert_eq!(origin.chain.last_approved_tree_hash(), None);

    origin.sign(t2, &bob);
    assert_eq!(origin.chain.last_approved_tree_hash(), Some(t2));
}

#[test]
fn test_mirror_waits_for_quorum() {
    let alice = key(1);
    let bob = key(2);
    let mut origin = Origin::start(&alice);
    origin.add_signer(&bob, &alice);
    origin.chain.set_threshold(2, &alice).unwrap();
    origin.write("a.txt", "alpha");
    let t1 = origin.publish("v1", &alice);
    origin.sign(t1, &alice);

    let mirror = Mirror::new();
    let (bundle, head) = origin.distribution();
    assert_eq!(mirror.apply(&bundle, Some(&head)).unwrap(), SyncOutcome::NoTarget);
    assert!(!mirror.dir.join("a.txt").exists());

    origin.sign(t1, &bob);
    let (bundle, head) = origin.distribution();
    assert!(matches!(
        mirror.apply(&bundle, Some(&head)).unwrap(),
        SyncOutcome::Applied { to, .. } if to == t1
    ));
    assert_eq!(mirror.read("a.txt"), "alpha");
}

#[test]
fn test_incremental_releases() {
    let alice = key(1);
    let mut origin = Origin::start(&alice);
    let mirror = Mirror::new();

    origin.write("keep.txt", "stable");
    origin.write("old/file.txt", "to be removed");
    let d1 = origin.publish("v1", &alice);
    origin.sign(d1, &alice);
    let (bundle, _) = origin.distribution();
    mirror.apply(&bundle, None).unwrap();
    assert_eq!(mirror.hash(), d1);

    origin.remove("old/file.txt");
    origin.write("new/file.txt", "added");
    let d2 = origin.publish("v2", &alice);
    origin.sign(d2, &alice);

    origin.write("keep.txt", "changed");
    let d3 = origin.publish("v3", &alice);
    origin.sign(d3, &alice);

    let (bundle, _) = origin.distribution();
    assert_eq!(
        mirror.apply(&bundle, None).unwrap(),
        SyncOutcome::Applied {
            from: d1,
            to: d3,
            patches: 2
        }
    );
    assert_eq!(mirror.hash(), hash_of(&origin.dir));
    assert!(!mirror.dir.join("old").exists());
    assert_eq!(mirror.read("new/file.txt"), "added");
    assert_eq!(mirror.read("keep.txt"), "changed");

    // Reapplying the same bundle is a no-op.
    assert_eq!(
        mirror.apply(&bundle, None).unwrap(),
        SyncOutcome::UpToDate(d3)
    );
}

#[test]
fn test_unapproved_release_is_not_synced() {
    let alice = key(1);
    let bob = key(2);
    let mut origin = Origin::start(&alice);
    origin.write("a.txt", "v1");
    let d1 = origin.publish("v1", &alice);
    origin.sign(d1, &alice);

    origin.add_signer(&bob, &alice);
    origin.chain.set_threshold(2, &alice).unwrap();
    origin.write("a.txt", "v2");
    let d2 = origin.publish("v2", &alice);
    origin.sign(d2, &alice);

    let mirror = Mirror::new();
    let (bundle, _) = origin.distribution();
    assert!(matches!(
        mirror.apply(&bundle, None).unwrap(),
        SyncOutcome::Applied { to, .. } if to == d1
    ));
    assert_eq!(mirror.read("a.txt"), "v1");
}

#[test]
fn test_removed_signer_keeps_past_approvals() {
    let alice = key(1);
    let bob = key(2);
    let mut origin = Origin::start(&alice);
    origin.add_signer(&bob, &alice);
    origin.write("a.txt", "v1");
    let d1 = origin.publish("v1", &alice);
    origin.sign(d1, &bob);
    origin.chain.remove_key(bob.verifying_key(), &alice).unwrap();

    let (bundle, _) = origin.distribution();
    let mirror = Mirror::new();
    mirror.apply(&bundle, None).unwrap();
    assert_eq!(mirror.hash(), d1);

    let reloaded = HashChain::read_file(mirror.layout.chain_path()).unwrap();
    assert_eq!(reloaded.last_approved_tree_hash(), Some(d1));
    assert!(!reloaded.state().is_authorized(&bob.verifying_key()));
}
