mod common;

use common::Trie;
use storage_proof_core::{lookup, verify_proof, Lookup, ProofError, TrieNode};

fn key(prefix: &[u8], fill: u8) -> [u8; 32] {
    let mut out = [fill; 32];
    out[..prefix.len()].copy_from_slice(prefix);
    out
}

fn tail_key(head: u8, last: u8) -> [u8; 32] {
    let mut out = [head; 32];
    out[31] = last;
    out
}

/// Extension over 62 shared nibbles, a branch, and two hashed leaves.
fn three_level_trie() -> (Trie, Vec<([u8; 32], Vec<u8>)>) {
    let entries = vec![
        (tail_key(0xab, 0x12), vec![0x11; 40]),
        (tail_key(0xab, 0x34), vec![0x22; 40]),
    ];
    (Trie::build(&entries), entries)
}

fn completeness_entries() -> Vec<([u8; 32], Vec<u8>)> {
    vec![
        ([0xaa; 32], b"first".to_vec()),
        (key(&[0xaa; 16], 0xbb), b"second".to_vec()),
        ([0x55; 32], b"third".to_vec()),
        ([0x5a; 32], b"fourth".to_vec()),
    ]
}

#[test]
fn three_level_proof_has_expected_shape() {
    let (trie, entries) = three_level_trie();
    let proof = trie.proof(&entries[0].0);
    assert_eq!(proof.len(), 3);
    assert!(matches!(TrieNode::decode(&proof[0]), Ok(TrieNode::Extension { .. })));
    assert!(matches!(TrieNode::decode(&proof[1]), Ok(TrieNode::Branch { .. })));
    assert!(matches!(TrieNode::decode(&proof[2]), Ok(TrieNode::Leaf { .. })));
}

#[test]
fn three_level_proof_verifies() {
    let (trie, entries) = three_level_trie();
    for (key, value) in &entries {
        let proof = trie.proof(key);
        assert_eq!(verify_proof(&trie.root, key, Some(value), &proof), Ok(()));
    }
}

#[test]
fn mutating_any_byte_of_any_node_is_rejected() {
    let (trie, entries) = three_level_trie();
    let (key, value) = &entries[1];
    let proof = trie.proof(key);

    for node in 0..proof.len() {
        for byte in 0..proof[node].len() {
            let mut tampered = proof.clone();
            tampered[node][byte] ^= 0x01;
            assert!(
                verify_proof(&trie.root, key, Some(value), &tampered).is_err(),
                "node {node} byte {byte} flipped and still accepted"
            );
        }
    }
}

#[test]
fn wrong_value_is_rejected() {
    let (trie, entries) = three_level_trie();
    let (key, _) = &entries[0];
    assert_eq!(
        verify_proof(&trie.root, key, Some(&[0x22; 40]), &trie.proof(key)),
        Err(ProofError::ValueMismatch)
    );
}

#[test]
fn every_present_key_verifies() {
    let entries = completeness_entries();
    let trie = Trie::build(&entries);
    for (key, value) in &entries {
        let proof = trie.proof(key);
        assert_eq!(verify_proof(&trie.root, key, Some(value), &proof), Ok(()), "{key:02x?}");
        assert_eq!(lookup(&trie.root, key, &proof), Ok(Lookup::Value(value.clone())));
    }
}

#[test]
fn absent_key_at_empty_branch_slot() {
    let trie = Trie::build(&completeness_entries());
    let absent = [0x33; 32];
    let proof = trie.proof(&absent);

    assert_eq!(proof.len(), 1);
    assert_eq!(lookup(&trie.root, &absent, &proof), Ok(Lookup::Empty));
    assert_eq!(verify_proof(&trie.root, &absent, None, &proof), Ok(()));
    assert_eq!(
        verify_proof(&trie.root, &absent, Some(b"anything"), &proof),
        Err(ProofError::ValueMismatch)
    );
}

#[test]
fn absent_key_diverging_from_extension() {
    let trie = Trie::build(&completeness_entries());
    let absent = [0xa0; 32];
    let proof = trie.proof(&absent);

    assert_eq!(lookup(&trie.root, &absent, &proof), Ok(Lookup::Diverged));
    assert_eq!(verify_proof(&trie.root, &absent, None, &proof), Ok(()));
    assert_eq!(
        verify_proof(&trie.root, &absent, Some(b"first"), &proof),
        Err(ProofError::PathMismatch)
    );
}

#[test]
fn proof_order_and_duplicates_do_not_matter() {
    let entries = completeness_entries();
    let trie = Trie::build(&entries);
    let (key, value) = &entries[1];

    let mut proof = trie.proof(key);
    proof.reverse();
    proof.extend(proof.clone());
    proof.extend(trie.proof(&entries[2].0));

    assert_eq!(verify_proof(&trie.root, key, Some(value), &proof), Ok(()));
}

#[test]
fn truncated_proof_is_missing_a_node() {
    let entries = completeness_entries();
    let trie = Trie::build(&entries);
    let (key, value) = &entries[0];

    let mut proof = trie.proof(key);
    proof.pop();
    assert_eq!(
        verify_proof(&trie.root, key, Some(value), &proof),
        Err(ProofError::ProofNodeMissing)
    );
}

#[test]
fn inline_children_are_followed() {
    // Keys differ only in the last nibble, so both leaves and the branch
    // holding them are short enough to be embedded.
    let entries = vec![(tail_key(0x11, 0x01), b"x".to_vec()), (tail_key(0x11, 0x02), b"y".to_vec())];
    let trie = Trie::build(&entries);

    for (key, value) in &entries {
        let proof = trie.proof(key);
        assert_eq!(proof.len(), 1);
        assert_eq!(verify_proof(&trie.root, key, Some(value), &proof), Ok(()));
    }

    let absent = tail_key(0x11, 0x03);
    assert_eq!(lookup(&trie.root, &absent, &trie.proof(&absent)), Ok(Lookup::Empty));
}

#[test]
fn garbage_root_node_is_malformed() {
    let root_node = vec![0xc1, 0x80];
    let root = storage_proof_core::keccak256(&root_node);
    assert_eq!(
        verify_proof(&root, &[0; 32], None, &[root_node]),
        Err(ProofError::MalformedNode)
    );
}
