#[cfg(test)]
pub mod test {
    use std::{sync::Arc, thread};

    use bytes::Bytes;

    use crate::{
        context::OpContext,
        error::Error,
        index::{IndexStorage, OrderedIndex, StorageIterator},
    };

    fn filled(keys: &[&str]) -> OrderedIndex {
        let index = OrderedIndex::new();
        let ctx = OpContext::background();
        for key in keys {
            index.insert(&ctx, key.as_bytes(), key.to_uppercase().as_bytes()).unwrap();
        }
        index
    }

    fn scan_keys(index: &OrderedIndex, start: &str, end: &str) -> Vec<Bytes> {
        index
            .range_scan(&OpContext::background(), start.as_bytes(), end.as_bytes())
            .unwrap()
            .map(|kv| kv.key)
            .collect()
    }

    #[test]
    fn insert_search_delete() {
        let index = OrderedIndex::new();
        let ctx = OpContext::background();

        index.insert(&ctx, b"a", b"1").unwrap();
        assert_eq!(index.search(&ctx, b"a").unwrap(), Bytes::from_static(b"1"));

        index.insert(&ctx, b"a", b"2").unwrap();
        assert_eq!(index.search(&ctx, b"a").unwrap(), Bytes::from_static(b"2"));
        assert_eq!(index.len().unwrap(), 1);

        index.delete(&ctx, b"a").unwrap();
        assert!(matches!(index.search(&ctx, b"a"), Err(Error::KeyNotFound)));
        assert!(matches!(index.delete(&ctx, b"a"), Err(Error::KeyNotFound)));
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn range_is_inclusive_and_ordered() {
        let index = filled(&["e", "a", "c", "b", "d", "ba"]);

        assert_eq!(scan_keys(&index, "b", "d"), vec!["b", "ba", "c", "d"]);
        assert_eq!(scan_keys(&index, "bb", "cz"), vec!["c"]);
        assert_eq!(scan_keys(&index, "a", "a"), vec!["a"]);
    }

    #[test]
    fn empty_end_is_unbounded() {
        let index = filled(&["k1", "k2", "k3", "z"]);
        assert_eq!(scan_keys(&index, "k2", ""), vec!["k2", "k3", "z"]);
        assert_eq!(scan_keys(&index, "", "").len(), 4);
    }

    #[test]
    fn inverted_range_is_empty() {
        let index = filled(&["a", "b", "c"]);
        assert!(scan_keys(&index, "c", "a").is_empty());
    }

    #[test]
    fn scan_is_a_snapshot() {
        let index = filled(&["a", "b", "c"]);
        let ctx = OpContext::background();

        let mut iter = index.range_scan(&ctx, b"a", b"").unwrap();
        index.insert(&ctx, b"bb", b"late").unwrap();
        index.delete(&ctx, b"c").unwrap();

        let mut seen = Vec::new();
        while iter.is_valid() {
            seen.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.advance();
        }
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"A".to_vec()),
                (b"b".to_vec(), b"B".to_vec()),
                (b"c".to_vec(), b"C".to_vec()),
            ]
        );
        assert!(iter.key().is_empty());
        assert_eq!(iter.remaining(), 0);
    }

    #[test]
    fn concurrent_writers() {
        let index = Arc::new(OrderedIndex::new());

        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    let ctx = OpContext::background();
                    for i in 0..250u32 {
                        let key = format!("{t}-{i:04}");
                        index.insert(&ctx, key.as_bytes(), b"v").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.len().unwrap(), 1000);
        let keys = scan_keys(&index, "", "");
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn expired_context_is_rejected() {
        let index = filled(&["a"]);
        let ctx = OpContext::background();
        ctx.cancel();
        assert!(matches!(index.search(&ctx, b"a"), Err(Error::Cancelled)));
    }
}
