//! Utilities for testing against a scratch environment.

use crate::{Env, EnvFlags, EnvOptions, MEGABYTE};
use tempfile::TempDir;

/// A scratch environment in a temporary directory, removed on drop.
#[derive(Debug)]
pub struct TestEnv {
    /// The open environment.
    pub env: Env,
    _dir: TempDir,
}

/// Creates a scratch environment with room for a few named databases.
pub fn test_env() -> TestEnv {
    test_env_with(EnvOptions::new().map_size(256 * MEGABYTE).max_dbs(16))
}

/// Creates a scratch environment with the given options.
pub fn test_env_with(options: EnvOptions) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let env = options.open(dir.path()).unwrap();
    TestEnv { env, _dir: dir }
}

/// Creates a scratch environment whose path names the data file itself.
pub fn test_env_no_subdir(options: EnvOptions, flags: EnvFlags) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let env = options
        .flags(flags | EnvFlags::NO_SUB_DIR)
        .open(&dir.path().join("data.mdb"))
        .unwrap();
    TestEnv { env, _dir: dir }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CompareCtx, Cursor, Database, DbFlags, FromView, PutFlags, Ro, ToView, Transaction,
    };

    fn create_db(env: &Env, name: &str, flags: DbFlags) -> Database {
        let txn = env.write_txn().unwrap();
        let db = Database::open(&txn, name, flags | DbFlags::CREATE).unwrap();
        txn.commit().unwrap();
        db
    }

    #[test]
    fn put_get_del() {
        let t = test_env();
        let db = create_db(&t.env, "kv", DbFlags::empty());

        let txn = t.env.write_txn().unwrap();
        txn.put(db, b"alpha", b"1", PutFlags::empty()).unwrap();
        txn.put(db, b"beta", b"2", PutFlags::empty()).unwrap();
        txn.commit().unwrap();

        let txn = t.env.read_txn().unwrap();
        assert_eq!(txn.get(db, b"alpha").unwrap(), Some(&b"1"[..]));
        assert_eq!(txn.get(db, b"missing").unwrap(), None);
        assert!(txn.has_key(db, b"beta").unwrap());
        assert!(!txn.has_key(db, b"gamma").unwrap());
        drop(txn);

        let txn = t.env.write_txn().unwrap();
        assert!(txn.del(db, b"alpha", None).unwrap());
        assert!(!txn.del(db, b"alpha", None).unwrap());
        txn.commit().unwrap();

        let txn = t.env.read_txn().unwrap();
        assert_eq!(txn.get(db, b"alpha").unwrap(), None);
    }

    #[test]
    fn open_if_can_distinguishes_absence() {
        let t = test_env();
        let txn = t.env.write_txn().unwrap();
        assert!(Database::open_if_can(&txn, "nope", DbFlags::empty())
            .unwrap()
            .is_none());
        assert!(Database::open(&txn, "nope", DbFlags::empty()).is_err());
        assert!(Database::open_if_can(&txn, "yes", DbFlags::CREATE)
            .unwrap()
            .is_some());
    }

    #[test]
    fn aborted_writes_are_invisible() {
        let t = test_env();
        let db = create_db(&t.env, "kv", DbFlags::empty());

        {
            let txn = t.env.write_txn().unwrap();
            txn.put(db, b"k", b"v", PutFlags::empty()).unwrap();
            // Dropped without commit.
        }

        let txn = t.env.read_txn().unwrap();
        assert_eq!(txn.get(db, b"k").unwrap(), None);
    }

    #[test]
    fn readers_see_a_stable_snapshot() {
        let t = test_env();
        let db = create_db(&t.env, "kv", DbFlags::empty());

        let txn = t.env.write_txn().unwrap();
        txn.put(db, b"k", b"old", PutFlags::empty()).unwrap();
        txn.commit().unwrap();

        let reader = t.env.read_txn().unwrap();

        let txn = t.env.write_txn().unwrap();
        txn.put(db, b"k", b"new", PutFlags::empty()).unwrap();
        txn.put(db, b"k2", b"also new", PutFlags::empty()).unwrap();
        txn.commit().unwrap();

        // The old reader observes none of the later commit.
        assert_eq!(reader.get(db, b"k").unwrap(), Some(&b"old"[..]));
        assert_eq!(reader.get(db, b"k2").unwrap(), None);

        // A fresh reader observes all of it.
        let fresh = t.env.read_txn().unwrap();
        assert_eq!(fresh.get(db, b"k").unwrap(), Some(&b"new"[..]));
        assert_eq!(fresh.get(db, b"k2").unwrap(), Some(&b"also new"[..]));
    }

    #[test]
    fn reset_renew_takes_a_fresh_snapshot() {
        let t = test_env();
        let db = create_db(&t.env, "kv", DbFlags::empty());

        let reader = t.env.read_txn().unwrap();
        assert_eq!(reader.get(db, b"k").unwrap(), None);
        let inactive = reader.reset();

        let txn = t.env.write_txn().unwrap();
        txn.put(db, b"k", b"v", PutFlags::empty()).unwrap();
        txn.commit().unwrap();

        let reader = inactive.renew().unwrap();
        assert_eq!(reader.get(db, b"k").unwrap(), Some(&b"v"[..]));
    }

    #[test]
    fn no_overwrite_and_no_dup_data_report_key_exist() {
        let t = test_env();
        let plain = create_db(&t.env, "plain", DbFlags::empty());
        let dup = create_db(&t.env, "dup", DbFlags::DUP_SORT);

        let txn = t.env.write_txn().unwrap();
        txn.put(plain, b"k", b"v", PutFlags::empty()).unwrap();
        let err = txn
            .put(plain, b"k", b"other", PutFlags::NO_OVERWRITE)
            .unwrap_err();
        assert!(err.is_key_exist());

        txn.put(dup, b"k", b"v1", PutFlags::NO_DUP_DATA).unwrap();
        txn.put(dup, b"k", b"v2", PutFlags::NO_DUP_DATA).unwrap();
        let err = txn.put(dup, b"k", b"v1", PutFlags::NO_DUP_DATA).unwrap_err();
        assert!(err.is_key_exist());
        txn.commit().unwrap();
    }

    #[test]
    fn duplicate_cursor_traversal_is_ordered_and_complete() {
        let t = test_env();
        let db = create_db(&t.env, "dup", DbFlags::DUP_SORT);

        // Inserted out of order on purpose.
        let pairs: &[(&[u8], &[u8])] = &[
            (b"b", b"2"),
            (b"a", b"3"),
            (b"a", b"1"),
            (b"c", b"1"),
            (b"a", b"2"),
            (b"b", b"1"),
        ];
        let txn = t.env.write_txn().unwrap();
        for (k, v) in pairs {
            txn.put(db, k, v, PutFlags::empty()).unwrap();
        }
        txn.commit().unwrap();

        let sorted: Vec<(Vec<u8>, Vec<u8>)> = {
            let mut s: Vec<_> = pairs.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
            s.sort();
            s
        };

        let txn = t.env.read_txn().unwrap();
        let mut cursor = txn.cursor(db).unwrap();
        let mut forward = Vec::new();
        while let Some((k, v)) = cursor.next().unwrap() {
            forward.push((k.to_vec(), v.to_vec()));
        }
        assert_eq!(forward, sorted);

        let mut backward = Vec::new();
        while let Some((k, v)) = cursor.prev().unwrap() {
            backward.push((k.to_vec(), v.to_vec()));
        }
        let mut reversed = sorted.clone();
        reversed.reverse();
        assert_eq!(backward, reversed);
    }

    #[test]
    fn dup_positioning_operations() {
        let t = test_env();
        let db = create_db(&t.env, "dup", DbFlags::DUP_SORT);

        let txn = t.env.write_txn().unwrap();
        for v in [b"1", b"2", b"3"] {
            txn.put(db, b"a", v, PutFlags::empty()).unwrap();
        }
        txn.put(db, b"b", b"9", PutFlags::empty()).unwrap();
        txn.commit().unwrap();

        let txn = t.env.read_txn().unwrap();
        let mut cursor = txn.cursor(db).unwrap();

        assert!(cursor.seek(b"a").unwrap());
        assert_eq!(cursor.count_dups().unwrap(), 3);
        assert_eq!(cursor.last_dup().unwrap(), Some(&b"3"[..]));
        assert_eq!(cursor.first_dup().unwrap(), Some(&b"1"[..]));

        let (k, v) = cursor.next_nodup().unwrap().unwrap();
        assert_eq!((k, v), (&b"b"[..], &b"9"[..]));
        assert!(cursor.next_nodup().unwrap().is_none());

        let (k, v) = cursor.prev_nodup().unwrap().unwrap();
        // Stepping back over a key lands on its last duplicate.
        assert_eq!((k, v), (&b"a"[..], &b"3"[..]));

        assert_eq!(
            cursor.seek_both(b"a", b"2").unwrap().map(|(_, v)| v),
            Some(&b"2"[..])
        );
        assert_eq!(cursor.seek_both(b"a", b"4").unwrap(), None);

        let (_, v) = cursor.seek_both_range(b"a", b"15").unwrap().unwrap();
        assert_eq!(v, b"2");

        let (k, _) = cursor.seek_range(b"ab").unwrap().unwrap();
        assert_eq!(k, b"b");
        assert!(cursor.seek_range(b"c").unwrap().is_none());
    }

    #[test]
    fn cursor_mutation() {
        let t = test_env();
        let db = create_db(&t.env, "dup", DbFlags::DUP_SORT);

        let txn = t.env.write_txn().unwrap();
        {
            let mut cursor = txn.cursor(db).unwrap();
            cursor.put(b"a", b"1", PutFlags::empty()).unwrap();
            cursor.put(b"a", b"2", PutFlags::empty()).unwrap();
            cursor.put(b"b", b"3", PutFlags::empty()).unwrap();

            // Delete one duplicate; the other survives.
            assert!(cursor.seek_both(b"a", b"1").unwrap().is_some());
            cursor.del_current().unwrap();
            assert_eq!(cursor.seek_key(b"a").unwrap().map(|(_, v)| v), Some(&b"2"[..]));

            // Replace in place.
            assert!(cursor.seek_both(b"b", b"3").unwrap().is_some());
            cursor.replace_current(b"9").unwrap();

            // Drop all duplicates of a key at once.
            cursor.put(b"a", b"5", PutFlags::empty()).unwrap();
            assert!(cursor.seek(b"a").unwrap());
            cursor.del_current_all_dups().unwrap();
            assert!(!cursor.seek(b"a").unwrap());
        }
        txn.commit().unwrap();

        let txn = t.env.read_txn().unwrap();
        assert_eq!(txn.get(db, b"a").unwrap(), None);
        assert_eq!(txn.get(db, b"b").unwrap(), Some(&b"9"[..]));
    }

    #[test]
    fn reservation_returns_writable_region() {
        let t = test_env();
        let db = create_db(&t.env, "kv", DbFlags::empty());

        let txn = t.env.write_txn().unwrap();
        txn.with_reservation(db, b"doc", 5, PutFlags::empty(), |region| {
            assert_eq!(region.len(), 5);
            region.copy_from_slice(b"hello");
        })
        .unwrap();
        txn.commit().unwrap();

        let txn = t.env.read_txn().unwrap();
        assert_eq!(txn.get(db, b"doc").unwrap(), Some(&b"hello"[..]));
    }

    #[test]
    fn integer_keys_iterate_numerically() {
        let t = test_env();
        let db = create_db(&t.env, "ints", DbFlags::INTEGER_KEY);

        // 256 > 1 bytewise-lexicographically in little-endian form, but
        // INTEGER_KEY must iterate numerically.
        let txn = t.env.write_txn().unwrap();
        for id in [256u32, 1, 2, 512, 0] {
            txn.put(db, &id.to_view(), b"x", PutFlags::empty()).unwrap();
        }
        txn.commit().unwrap();

        let txn = t.env.read_txn().unwrap();
        let mut cursor = txn.cursor(db).unwrap();
        let mut keys = Vec::new();
        while let Some((k, _)) = cursor.next().unwrap() {
            keys.push(u32::from_view(k).unwrap());
        }
        assert_eq!(keys, vec![0, 1, 2, 256, 512]);
    }

    #[test]
    fn db_stat_and_clear() {
        let t = test_env();
        let db = create_db(&t.env, "kv", DbFlags::empty());

        let txn = t.env.write_txn().unwrap();
        assert!(txn.db_is_empty(db).unwrap());
        for i in 0..10u32 {
            txn.put(db, &i.to_view(), b"v", PutFlags::empty()).unwrap();
        }
        assert_eq!(txn.db_stat(db).unwrap().entries, 10);
        txn.clear_db(db).unwrap();
        assert!(txn.db_is_empty(db).unwrap());
        txn.commit().unwrap();
    }

    #[test]
    fn env_stat_and_info_report_pages() {
        let t = test_env();
        let db = create_db(&t.env, "kv", DbFlags::empty());

        let txn = t.env.write_txn().unwrap();
        for i in 0..1000u32 {
            txn.put(db, &i.to_view(), &[0u8; 64], PutFlags::empty()).unwrap();
        }
        txn.commit().unwrap();

        let stat = t.env.stat().unwrap();
        assert!(stat.page_size > 0);
        let info = t.env.info().unwrap();
        assert!(info.map_size >= 256 * MEGABYTE);
        assert!(info.last_page > 0);
        t.env.sync(true).unwrap();
    }

    // A comparator ordering keys by their little-endian u32 value, flipped
    // when the context says so.
    fn u32_cmp(a: &[u8], b: &[u8], ctx: CompareCtx) -> std::cmp::Ordering {
        let a = u32::from_le_bytes(a.try_into().unwrap());
        let b = u32::from_le_bytes(b.try_into().unwrap());
        let reverse = !ctx.is_null() && unsafe { *(ctx as *const bool) };
        if reverse {
            b.cmp(&a)
        } else {
            a.cmp(&b)
        }
    }

    static REVERSE: bool = true;

    #[test]
    fn custom_comparator_with_context() {
        let t = test_env();

        let txn = t.env.write_txn().unwrap();
        let db = Database::open(&txn, "custom", DbFlags::CREATE).unwrap();
        db.set_compare(&txn, u32_cmp).unwrap();
        db.set_compare_ctx(&txn, &REVERSE as *const bool as CompareCtx);
        txn.commit().unwrap();

        let txn = t.env.write_txn().unwrap();
        for id in [5u32, 1, 9, 3] {
            txn.put(db, &id.to_view(), b"x", PutFlags::empty()).unwrap();
        }
        txn.commit().unwrap();

        // Installed once, the comparator applies to every later
        // transaction; this read sees reverse numeric order.
        let txn = t.env.read_txn().unwrap();
        let mut cursor: Cursor<'_, Ro> = txn.cursor(db).unwrap();
        let mut keys = Vec::new();
        while let Some((k, _)) = cursor.next().unwrap() {
            keys.push(u32::from_view(k).unwrap());
        }
        assert_eq!(keys, vec![9, 5, 3, 1]);
    }

    #[test]
    fn append_fast_path() {
        let t = test_env();
        let db = create_db(&t.env, "ints", DbFlags::INTEGER_KEY);

        let txn = t.env.write_txn().unwrap();
        for i in 0..100u32 {
            txn.put(db, &i.to_view(), b"v", PutFlags::APPEND).unwrap();
        }
        // Appending a key that is not past the end fails cleanly.
        assert!(txn.put(db, &5u32.to_view(), b"v", PutFlags::APPEND).is_err());
        txn.commit().unwrap();
    }
}
