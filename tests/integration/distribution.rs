//! Distribution bundles between an origin and its mirrors.

use treeseal_chain::{ChainError, HashChain};
use treeseal_integration_tests::{Mirror, Origin, key};
use treeseal_sync::{SyncError, SyncOutcome};
use treeseal_types::LinkHash;

#[test]
fn test_mirror_chain_matches_origin() {
    let alice = key(1);
    let mut origin = Origin::start(&alice);
    origin.write("a", "1");
    let t1 = origin.publish("v1", &alice);
    origin.sign(t1, &alice);
    origin.chain.comment("released", &alice).unwrap();

    let mirror = Mirror::new();
    let (bundle, head) = origin.distribution();
    mirror.apply(&bundle, Some(&head)).unwrap();

    let mirrored = HashChain::read_file(mirror.layout.chain_path()).unwrap();
    assert_eq!(mirrored.to_text(), origin.chain.to_text());
    assert_eq!(mirrored.head(), head);
    assert_eq!(
        mirror.patches().edges().unwrap(),
        origin.patches().edges().unwrap()
    );
}

#[test]
fn test_pinned_head_must_match() {
    let alice = key(1);
    let mut origin = Origin::start(&alice);
    origin.write("a", "1");
    let t1 = origin.publish("v1", &alice);
    origin.sign(t1, &alice);

    let mirror = Mirror::new();
    let (bundle, _) = origin.distribution();
    let stale = LinkHash::from_data(b"an older head");
    assert!(matches!(
        mirror.apply(&bundle, Some(&stale)),
        Err(SyncError::Chain(ChainError::HeadMismatch { .. }))
    ));
    assert!(!mirror.layout.chain_path().exists());
    assert!(!mirror.dir.join("a").exists());
}

#[test]
fn test_replayed_old_bundle_is_rollback() {
    let alice = key(1);
    let mut origin = Origin::start(&alice);
    origin.write("a", "1");
    let t1 = origin.publish("v1", &alice);
    origin.sign(t1, &alice);
    let (old_bundle, _) = origin.distribution();

    origin.write("a", "2");
    let t2 = origin.publish("v2", &alice);
    origin.sign(t2, &alice);
    let (new_bundle, _) = origin.distribution();

    let mirror = Mirror::new();
    mirror.apply(&new_bundle, None).unwrap();
    assert_eq!(mirror.hash(), t2);

    assert!(matches!(
        mirror.apply(&old_bundle, None),
        Err(SyncError::Rollback { .. })
    ));
    assert_eq!(mirror.hash(), t2);
    assert_eq!(mirror.read("a"), "2");
}

#[test]
fn test_local_chain_stays_verifiable_after_extension() {
    let alice = key(1);
    let mut origin = Origin::start(&alice);
    let mirror = Mirror::new();

    for version in 1..=3 {
        origin.write("version.txt", &version.to_string());
        let tree = origin.publish(&format!("v{version}"), &alice);
        origin.sign(tree, &alice);
        let (bundle, head) = origin.distribution();
        assert!(matches!(
            mirror.apply(&bundle, Some(&head)).unwrap(),
            SyncOutcome::Applied { patches: 1, .. }
        ));
    }

    let mirrored = HashChain::read_file(mirror.layout.chain_path()).unwrap();
    assert_eq!(mirrored.len(), origin.chain.len());
    assert_eq!(mirror.read("version.txt"), "3");
}
