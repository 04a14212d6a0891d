#[cfg(test)]
pub mod test {
    use std::{sync::Arc, thread, time::Duration};

    use bytes::Bytes;
    use tempfile::{tempdir, TempDir};

    use crate::{
        context::OpContext,
        error::Error,
        index::{IndexStorage, OrderedIndex},
        txn::{CommitMode, TransactionManager, TxState, WriteOp},
        wal::{
            record::{LogRecord, LogType},
            recovery::Recovery,
            Wal,
        },
    };

    struct Fixture {
        _dir: TempDir,
        wal: Arc<Wal>,
        index: Arc<dyn IndexStorage>,
        tm: TransactionManager,
    }

    fn setup(mode: CommitMode) -> Fixture {
        let dir = tempdir().unwrap();
        let wal = Arc::new(Wal::open(dir.path().join("txn.wal")).unwrap());
        let index: Arc<dyn IndexStorage> = Arc::new(OrderedIndex::new());
        let tm = TransactionManager::new(Arc::clone(&wal), Arc::clone(&index), mode).unwrap();
        Fixture {
            _dir: dir,
            wal,
            index,
            tm,
        }
    }

    fn value(index: &Arc<dyn IndexStorage>, key: &[u8]) -> Option<Bytes> {
        index.search(&OpContext::background(), key).ok()
    }

    fn log_types(wal: &Wal) -> Vec<LogType> {
        wal.read_from(&OpContext::background(), 1)
            .unwrap()
            .into_iter()
            .map(|r| r.log_type)
            .collect()
    }

    #[test]
    fn writes_are_deferred_until_commit() {
        for mode in [CommitMode::PerKey, CommitMode::Staged] {
            let f = setup(mode);
            let ctx = OpContext::background();

            let mut tx = f.tm.begin(&ctx).unwrap();
            f.tm.put(&ctx, &mut tx, b"a", b"1").unwrap();
            f.tm.put(&ctx, &mut tx, b"b", b"2").unwrap();
            assert_eq!(value(&f.index, b"a"), None);
            assert_eq!(log_types(&f.wal), vec![LogType::Begin]);

            f.tm.commit(&ctx, &mut tx).unwrap();
            assert_eq!(tx.state(), TxState::Committed);
            assert_eq!(value(&f.index, b"a"), Some(Bytes::from_static(b"1")));
            assert_eq!(value(&f.index, b"b"), Some(Bytes::from_static(b"2")));
            assert_eq!(
                log_types(&f.wal),
                vec![LogType::Begin, LogType::Insert, LogType::Insert, LogType::Commit],
                "{mode:?}"
            );
        }
    }

    #[test]
    fn rollback_leaves_index_unchanged() {
        let f = setup(CommitMode::default());
        let ctx = OpContext::background();
        f.index.insert(&ctx, b"keep", b"old").unwrap();

        let mut tx = f.tm.begin(&ctx).unwrap();
        f.tm.put(&ctx, &mut tx, b"keep", b"new").unwrap();
        f.tm.put(&ctx, &mut tx, b"fresh", b"x").unwrap();
        f.tm.delete(&ctx, &mut tx, b"keep").unwrap();
        f.tm.abort(&ctx, &mut tx).unwrap();

        assert_eq!(tx.state(), TxState::Aborted);
        assert!(tx.write_set().is_empty());
        assert_eq!(value(&f.index, b"keep"), Some(Bytes::from_static(b"old")));
        assert_eq!(value(&f.index, b"fresh"), None);
        assert_eq!(log_types(&f.wal), vec![LogType::Begin, LogType::Abort]);
    }

    #[test]
    fn last_write_wins_within_a_transaction() {
        for mode in [CommitMode::PerKey, CommitMode::Staged] {
            let f = setup(mode);
            let ctx = OpContext::background();
            f.index.insert(&ctx, b"gone", b"soon").unwrap();

            let mut tx = f.tm.begin(&ctx).unwrap();
            f.tm.put(&ctx, &mut tx, b"k", b"1").unwrap();
            f.tm.put(&ctx, &mut tx, b"k", b"2").unwrap();
            f.tm.delete(&ctx, &mut tx, b"gone").unwrap();
            f.tm.delete(&ctx, &mut tx, b"never-there").unwrap();
            f.tm.commit(&ctx, &mut tx).unwrap();

            assert_eq!(value(&f.index, b"k"), Some(Bytes::from_static(b"2")));
            assert_eq!(value(&f.index, b"gone"), None);
            assert_eq!(f.index.len().unwrap(), 1);
            // Commit leaves no lock entries behind
            assert!(f.tm.lock_manager().is_empty());
        }
    }

    #[test]
    fn write_set_records_before_images() {
        let f = setup(CommitMode::Staged);
        let ctx = OpContext::background();
        f.index.insert(&ctx, b"k", b"before").unwrap();

        let mut tx = f.tm.begin(&ctx).unwrap();
        f.tm.put(&ctx, &mut tx, b"k", b"after").unwrap();
        f.tm.delete(&ctx, &mut tx, b"missing").unwrap();

        let writes = tx.write_set();
        assert_eq!(writes[0].op, WriteOp::Put);
        assert_eq!(writes[0].old_value, Some(Bytes::from_static(b"before")));
        assert_eq!(writes[0].new_value, Some(Bytes::from_static(b"after")));
        assert_eq!(writes[1].op, WriteOp::Delete);
        assert_eq!(writes[1].old_value, None);

        f.tm.commit(&ctx, &mut tx).unwrap();
        let logged = f.wal.read_from(&ctx, 1).unwrap();
        assert_eq!(logged[1].old_value.as_deref(), Some(&b"before"[..]));
        assert_eq!(logged[1].new_value.as_deref(), Some(&b"after"[..]));
        assert_eq!(logged[2].key.as_deref(), Some(&b"missing"[..]));
    }

    #[test]
    fn terminal_states_reject_operations() {
        let f = setup(CommitMode::default());
        let ctx = OpContext::background();

        let mut committed = f.tm.begin(&ctx).unwrap();
        f.tm.commit(&ctx, &mut committed).unwrap();
        let id = committed.id();
        assert!(matches!(f.tm.put(&ctx, &mut committed, b"a", b"1"), Err(Error::NotActive(t)) if t == id));
        assert!(matches!(f.tm.commit(&ctx, &mut committed), Err(Error::NotActive(_))));
        assert!(matches!(f.tm.abort(&ctx, &mut committed), Err(Error::NotActive(_))));

        let mut aborted = f.tm.begin(&ctx).unwrap();
        f.tm.abort(&ctx, &mut aborted).unwrap();
        assert!(matches!(f.tm.delete(&ctx, &mut aborted, b"a"), Err(Error::NotActive(_))));
        assert!(matches!(f.tm.commit(&ctx, &mut aborted), Err(Error::NotActive(_))));
    }

    #[test]
    fn tx_ids_resume_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("txn.wal");
        let ctx = OpContext::background();

        let last = {
            let wal = Arc::new(Wal::open(&path).unwrap());
            let tm = TransactionManager::new(wal.clone(), Arc::new(OrderedIndex::new()), CommitMode::Staged)
                .unwrap();
            let mut first = tm.begin(&ctx).unwrap();
            let mut second = tm.begin(&ctx).unwrap();
            assert!(second.id() > first.id());
            tm.abort(&ctx, &mut first).unwrap();
            tm.commit(&ctx, &mut second).unwrap();
            second.id()
        };

        let wal = Arc::new(Wal::open(&path).unwrap());
        let tm = TransactionManager::new(wal, Arc::new(OrderedIndex::new()), CommitMode::Staged).unwrap();
        assert_eq!(tm.begin(&ctx).unwrap().id(), last + 1);
    }

    #[test]
    fn staged_commit_failing_before_flush_leaves_index_untouched() {
        let f = setup(CommitMode::Staged);
        let ctx = OpContext::background();

        let mut tx = f.tm.begin(&ctx).unwrap();
        f.tm.put(&ctx, &mut tx, b"a", b"1").unwrap();

        // Hold the key so the commit times out waiting for it
        let _held = f.tm.lock_manager().acquire(&ctx, b"a").unwrap();
        let short = OpContext::with_timeout(Duration::from_millis(50));
        assert!(matches!(f.tm.commit(&short, &mut tx), Err(Error::DeadlineExceeded)));

        assert_eq!(tx.state(), TxState::Active);
        assert_eq!(value(&f.index, b"a"), None);
        assert_eq!(log_types(&f.wal), vec![LogType::Begin]);

        // The caller may still abort
        drop(_held);
        f.tm.abort(&ctx, &mut tx).unwrap();
        assert_eq!(value(&f.index, b"a"), None);
    }

    #[test]
    fn conflicting_commits_serialize() {
        for mode in [CommitMode::PerKey, CommitMode::Staged] {
            let f = setup(mode);
            let tm = Arc::new(f.tm);

            let handles: Vec<_> = (0..4u32)
                .map(|t| {
                    let tm = Arc::clone(&tm);
                    thread::spawn(move || {
                        let ctx = OpContext::with_timeout(Duration::from_secs(10));
                        for i in 0..25u32 {
                            let mut tx = tm.begin(&ctx).unwrap();
                            // Opposite key orders across threads
                            let (x, y) = if t % 2 == 0 { (b"x", b"y") } else { (b"y", b"x") };
                            let val = format!("{t}-{i}");
                            tm.put(&ctx, &mut tx, x, val.as_bytes()).unwrap();
                            tm.put(&ctx, &mut tx, y, val.as_bytes()).unwrap();
                            tm.commit(&ctx, &mut tx).unwrap();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert!(tm.lock_manager().is_empty());
            let records = f.wal.read_from(&OpContext::background(), 1).unwrap();
            let commits = records.iter().filter(|r| r.log_type == LogType::Commit).count();
            assert_eq!(commits, 100);
            assert!(value(&f.index, b"x").is_some());
            assert!(value(&f.index, b"y").is_some());
        }
    }

    #[test]
    fn logged_commit_cannot_be_rolled_back() {
        let f = setup(CommitMode::Staged);
        let ctx = OpContext::background();

        let mut tx = f.tm.begin(&ctx).unwrap();
        f.tm.put(&ctx, &mut tx, b"a", b"1").unwrap();

        // Leave the transaction as a commit interrupted right after its Commit record
        for write in tx.write_set() {
            f.wal.append(&ctx, write.to_log_record(tx.id())).unwrap();
        }
        f.wal.append(&ctx, LogRecord::commit(tx.id())).unwrap();
        tx.mark_commit_logged();

        assert!(matches!(f.tm.abort(&ctx, &mut tx), Err(Error::InvalidOperation(_))));
        assert_eq!(tx.state(), TxState::Active);

        // A retry that times out on the key lock keeps the outcome pending
        let held = f.tm.lock_manager().acquire(&ctx, b"a").unwrap();
        let short = OpContext::with_timeout(Duration::from_millis(50));
        assert!(matches!(f.tm.commit(&short, &mut tx), Err(Error::DeadlineExceeded)));
        assert!(tx.commit_logged());
        drop(held);

        f.tm.commit(&ctx, &mut tx).unwrap();
        assert_eq!(tx.state(), TxState::Committed);
        assert_eq!(value(&f.index, b"a"), Some(Bytes::from_static(b"1")));
        assert_eq!(
            log_types(&f.wal),
            vec![LogType::Begin, LogType::Insert, LogType::Commit]
        );

        // Memory and the log agree after a restart
        let index: Arc<dyn IndexStorage> = Arc::new(OrderedIndex::new());
        Recovery::new(Arc::clone(&f.wal), Arc::clone(&index))
            .replay_committed(&ctx, 1)
            .unwrap();
        assert_eq!(value(&index, b"a"), Some(Bytes::from_static(b"1")));
    }

    #[test]
    fn cancelled_commit_leaves_no_abortable_commit_record() {
        for mode in [CommitMode::PerKey, CommitMode::Staged] {
            let f = setup(mode);
            let ctx = OpContext::background();

            let mut tx = f.tm.begin(&ctx).unwrap();
            f.tm.put(&ctx, &mut tx, b"a", b"1").unwrap();

            let cancelled = OpContext::background();
            cancelled.cancel();
            assert!(matches!(f.tm.commit(&cancelled, &mut tx), Err(Error::Cancelled)));
            assert!(!tx.commit_logged());

            f.tm.abort(&ctx, &mut tx).unwrap();
            f.wal.flush(&ctx).unwrap();
            assert!(!log_types(&f.wal).contains(&LogType::Commit), "{mode:?}");
        }
    }
}
