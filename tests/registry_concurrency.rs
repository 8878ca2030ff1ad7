//! The registry under concurrent interning.

use std::sync::Arc;
use tilecraft::block_state::{BlockState, BlockStateRegistry};

#[test]
fn concurrent_interning_stays_consistent() {
    let registry = Arc::new(BlockStateRegistry::new());

    let states: Vec<BlockState> = (0..64)
        .map(|i| {
            BlockState::new(format!("minecraft:block_{}", i % 16))
                .with_property("variant", format!("v{}", i / 16))
        })
        .collect();

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let registry = registry.clone();
            let states = states.clone();
            std::thread::spawn(move || {
                let mut ids = Vec::new();
                // each worker walks the states in a different order
                for i in 0..states.len() {
                    let state = &states[(i + worker * 7) % states.len()];
                    ids.push((state.clone(), registry.get_block_id(state)));
                }
                ids
            })
        })
        .collect();

    let mut seen: Vec<(BlockState, u16)> = Vec::new();
    for handle in handles {
        seen.extend(handle.join().unwrap());
    }

    // every thread agrees on every state's id
    for (state, id) in &seen {
        assert_eq!(registry.get_block_id(state), *id);
        assert_eq!(registry.get_block_state(*id), *state);
    }
    // ids are dense
    assert_eq!(registry.len(), 64);
}
