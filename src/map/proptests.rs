//! Property-based tests for the map using proptest
//!
//! A plain `HashMap` serves as the model: any sequence of operations applied to
//! both must leave them with the same contents.

use super::ConcurrentMap;
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Op {
    Set(u8, i32),
    Delete(u8),
    Get(u8),
    Clear,
    Import(Vec<(u8, i32)>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<u8>(), any::<i32>()).prop_map(|(k, v)| Op::Set(k, v)),
        2 => any::<u8>().prop_map(Op::Delete),
        2 => any::<u8>().prop_map(Op::Get),
        1 => Just(Op::Clear),
        1 => prop::collection::vec((any::<u8>(), any::<i32>()), 0..8).prop_map(Op::Import),
    ]
}

fn to_std<K: std::hash::Hash + Eq, V, S>(entries: HashMap<K, V, S>) -> HashMap<K, V> {
    entries.into_iter().collect()
}

proptest! {
    #[test]
    fn test_matches_hashmap_model(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let map: ConcurrentMap<u8, i32> = ConcurrentMap::new();
        let mut model: HashMap<u8, i32> = HashMap::new();

        for op in ops {
            match op {
                Op::Set(k, v) => prop_assert_eq!(map.set(k, v), model.insert(k, v)),
                Op::Delete(k) => prop_assert_eq!(map.delete(&k), model.remove(&k)),
                Op::Get(k) => prop_assert_eq!(map.get(&k), model.get(&k).copied()),
                Op::Clear => {
                    map.clear();
                    model.clear();
                }
                Op::Import(entries) => {
                    model = entries.iter().copied().collect();
                    map.import(entries.into_iter().collect());
                }
            }
            prop_assert_eq!(map.len(), model.len());
        }

        prop_assert_eq!(to_std(map.export()), model);
    }

    #[test]
    fn test_overwrite_keeps_last_value(key in any::<u16>(), first in any::<u64>(), second in any::<u64>()) {
        let map: ConcurrentMap<u16, u64> = ConcurrentMap::new();
        map.set(key, first);
        map.set(key, second);
        prop_assert_eq!(map.get(&key), Some(second));
        prop_assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_delete_twice_same_as_once(
        entries in prop::collection::hash_map(any::<u8>(), any::<i16>(), 0..16),
        key in any::<u8>()
    ) {
        let once: ConcurrentMap<u8, i16> = entries.clone().into_iter().collect();
        let twice: ConcurrentMap<u8, i16> = entries.into_iter().collect();

        once.delete(&key);
        twice.delete(&key);
        twice.delete(&key);

        prop_assert_eq!(once.export(), twice.export());
    }

    #[test]
    fn test_import_replaces_never_merges(
        before in prop::collection::hash_map(any::<u8>(), any::<u8>(), 0..16),
        after in prop::collection::hash_map(any::<u8>(), any::<u8>(), 0..16)
    ) {
        let map: ConcurrentMap<u8, u8> = before.into_iter().collect();
        map.import(after.clone().into_iter().collect());
        prop_assert_eq!(to_std(map.export()), after);
    }
}

#[cfg(feature = "serde")]
mod codec_properties {
    use super::*;

    proptest! {
        #[test]
        fn test_encode_decode_round_trip(
            entries in prop::collection::hash_map(".{0,12}", prop::collection::vec(any::<i64>(), 0..4), 0..32)
        ) {
            let source: ConcurrentMap<String, Vec<i64>> = entries.clone().into_iter().collect();
            let bytes = source.encode().unwrap();

            let target: ConcurrentMap<String, Vec<i64>> = ConcurrentMap::new();
            target.set("stale".to_string(), vec![-1]);
            target.decode(&bytes).unwrap();

            prop_assert_eq!(to_std(target.export()), entries);
        }

        #[test]
        fn test_arbitrary_bytes_never_corrupt_state(
            bytes in prop::collection::vec(any::<u8>(), 0..128),
            entries in prop::collection::hash_map(any::<u32>(), any::<bool>(), 0..8)
        ) {
            let map: ConcurrentMap<u32, bool> = entries.clone().into_iter().collect();

            // Either the bytes happen to be a valid record, or nothing changes
            if map.decode(&bytes).is_err() {
                prop_assert_eq!(to_std(map.export()), entries);
            }
        }

        #[test]
        fn test_corrupted_record_preserves_state(
            entries in prop::collection::hash_map(any::<u16>(), ".{0,8}", 1..8),
            cut in any::<prop::sample::Index>()
        ) {
            let map: ConcurrentMap<u16, String> = entries.clone().into_iter().collect();
            let bytes = map.encode().unwrap();
            let len = cut.index(bytes.len());

            map.set(u16::MAX, "sentinel".to_string());
            prop_assert!(map.decode(&bytes[..len]).is_err());
            prop_assert_eq!(map.get(&u16::MAX), Some("sentinel".to_string()));
        }
    }
}
