mod common;

use common::{minime_word, word, MemoryStorage};
use num_bigint::BigUint;
use storage_proof_core::{
    array_element_slot, discover, holder_mapping_slot, DiscoveredSlot, LayoutKind, ProbeConfig,
    ProofError, StorageKey, StorageSource,
};

const HOLDER: [u8; 20] = [0x42; 20];

fn config(range: std::ops::Range<u64>, target_block: u64) -> ProbeConfig {
    ProbeConfig {
        slot_range: range,
        ..ProbeConfig::new(target_block)
    }
}

fn mapping_token() -> MemoryStorage {
    let mut storage = MemoryStorage::default();
    storage.set(StorageKey::from_index(0), word(1_000_000));
    storage.set(holder_mapping_slot(&[0x01; 20], 3), word(7));
    storage.set(holder_mapping_slot(&HOLDER, 3), word(42));
    storage
}

fn minime_token(base: u64) -> MemoryStorage {
    let length_slot = holder_mapping_slot(&HOLDER, base);
    let mut storage = MemoryStorage::default();
    storage.set(length_slot, word(2));
    storage.set(array_element_slot(&length_slot, 0), minime_word(100, 5));
    storage.set(array_element_slot(&length_slot, 1), minime_word(200, 9));
    storage
}

#[tokio::test]
async fn finds_mapping_slot_inside_the_range() {
    let storage = mapping_token();
    let found = discover(&storage, &HOLDER, &BigUint::from(42u32), &config(0..10, 1))
        .await
        .unwrap();
    assert_eq!(
        found,
        Some(DiscoveredSlot {
            layout: LayoutKind::Mapping,
            index: 3,
            balance: BigUint::from(42u32),
            checkpoint_index: None,
        })
    );
}

#[tokio::test]
async fn range_excluding_the_slot_finds_nothing() {
    let storage = mapping_token();
    let found = discover(&storage, &HOLDER, &BigUint::from(42u32), &config(4..10, 1))
        .await
        .unwrap();
    assert_eq!(found, None);
}

#[tokio::test]
async fn mapping_is_tried_on_every_slot_before_checkpoints() {
    let storage = mapping_token();
    discover(&storage, &HOLDER, &BigUint::from(42u32), &config(0..10, 1))
        .await
        .unwrap();
    // slots 0..=3 of the mapping layout and nothing else
    assert_eq!(storage.reads(), 4);
}

#[tokio::test]
async fn finds_minime_checkpoint_array() {
    let storage = minime_token(7);
    let found = discover(&storage, &HOLDER, &BigUint::from(5u32), &config(0..20, 150))
        .await
        .unwrap();
    assert_eq!(
        found,
        Some(DiscoveredSlot {
            layout: LayoutKind::Checkpoint,
            index: 7,
            balance: BigUint::from(5u32),
            checkpoint_index: Some(0),
        })
    );

    let latest = discover(&storage, &HOLDER, &BigUint::from(9u32), &config(0..20, 250))
        .await
        .unwrap();
    assert_eq!(latest.and_then(|slot| slot.checkpoint_index), Some(1));
}

#[tokio::test]
async fn checkpoint_balance_is_compared_at_the_target_block() {
    let storage = minime_token(7);
    let found = discover(&storage, &HOLDER, &BigUint::from(9u32), &config(0..20, 150))
        .await
        .unwrap();
    assert_eq!(found, None);
}

#[tokio::test]
async fn layout_hint_restricts_the_search() {
    let storage = mapping_token();
    let checkpoints_only = ProbeConfig {
        layouts: vec![LayoutKind::Checkpoint],
        ..config(0..10, 1)
    };
    let found = discover(&storage, &HOLDER, &BigUint::from(42u32), &checkpoints_only)
        .await
        .unwrap();
    assert_eq!(found, None);
}

#[tokio::test]
async fn slots_that_cannot_be_checkpoint_arrays_are_skipped() {
    let mut storage = minime_token(7);
    // a balance far above any plausible array length
    storage.set(holder_mapping_slot(&HOLDER, 2), [0xff; 32]);

    let found = discover(&storage, &HOLDER, &BigUint::from(5u32), &config(0..20, 150))
        .await
        .unwrap();
    assert_eq!(found.map(|slot| slot.index), Some(7));
}

#[tokio::test]
async fn zero_reference_balance_is_not_probed() {
    let storage = mapping_token();
    let found = discover(&storage, &[0x99; 20], &BigUint::from(0u32), &config(0..10, 1))
        .await
        .unwrap();
    assert_eq!(found, None);
    assert_eq!(storage.reads(), 0);
}

#[derive(Debug, PartialEq)]
enum FakeError {
    Offline,
    Proof(ProofError),
}

impl From<ProofError> for FakeError {
    fn from(err: ProofError) -> Self {
        FakeError::Proof(err)
    }
}

struct Offline;

impl StorageSource for Offline {
    type Error = FakeError;

    async fn storage_word(&self, _slot: &StorageKey) -> Result<[u8; 32], FakeError> {
        Err(FakeError::Offline)
    }
}

#[tokio::test]
async fn source_failures_are_returned() {
    let mapping = discover(&Offline, &HOLDER, &BigUint::from(1u32), &config(0..3, 1)).await;
    assert_eq!(mapping, Err(FakeError::Offline));

    let checkpoints = ProbeConfig {
        layouts: vec![LayoutKind::Checkpoint],
        ..config(0..3, 1)
    };
    let result = discover(&Offline, &HOLDER, &BigUint::from(1u32), &checkpoints).await;
    assert_eq!(result, Err(FakeError::Offline));
}
