//! End-to-end checks against a real environment: a large integer-keyed
//! scan and nested-transaction visibility.

use quill_kv::test_utils::{test_env_no_subdir, test_env_with};
use quill_kv::{
    Database, DbFlags, EnvFlags, EnvOptions, FromView, PutFlags, ToView, Transaction, GIGABYTE,
};

const N: u32 = 1_000_000;

// A stand-in for a small serialized document: a 12-byte id plus a short
// string field.
fn doc(id: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(28);
    bytes.extend_from_slice(&[0xA5; 8]);
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes.extend_from_slice(b"some string\0");
    bytes
}

#[test]
fn million_integer_pairs_scan_once() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvOptions::new()
        .map_size(GIGABYTE)
        .flags(EnvFlags::NO_SUB_DIR | EnvFlags::NO_TLS | EnvFlags::WRITE_MAP)
        .open(&dir.path().join("data.mdb"))
        .unwrap();

    let txn = env.write_txn().unwrap();
    let db = Database::open(&txn, "DB", DbFlags::CREATE | DbFlags::INTEGER_KEY).unwrap();
    txn.commit().unwrap();

    let txn = env.write_txn().unwrap();
    for i in 0..N {
        txn.put(db, &i.to_view(), &doc(i), PutFlags::APPEND).unwrap();
    }
    txn.commit().unwrap();

    let txn = env.read_txn().unwrap();
    assert_eq!(txn.db_stat(db).unwrap().entries, N as usize);

    {
        let mut cursor = txn.cursor(db).unwrap();
        let mut count = 0u32;
        let mut expected = 0u32;
        while let Some((k, v)) = cursor.next_nodup().unwrap() {
            assert_eq!(u32::from_view(k).unwrap(), expected);
            assert_eq!(v.len(), doc(expected).len());
            expected += 1;
            count += 1;
        }
        assert_eq!(count, N);
    }

    // Point reads across reset/renew cycles keep working.
    let mut txn = txn;
    for i in [0u32, 1, N / 2, N - 1] {
        let inactive = txn.reset();
        txn = inactive.renew().unwrap();
        assert_eq!(txn.get(db, &i.to_view()).unwrap().map(|v| v.len()), Some(doc(i).len()));
    }
}

#[test]
fn nested_transactions_publish_to_parent_then_disk() {
    let t = test_env_no_subdir(EnvOptions::new(), EnvFlags::NO_TLS);
    let env = &t.env;

    let txn = env.write_txn().unwrap();
    let db = Database::open(&txn, "DB", DbFlags::CREATE).unwrap();
    txn.commit().unwrap();

    let mut outer = env.write_txn().unwrap();
    {
        let inner = outer.nested().unwrap();
        inner.put(db, b"hello", b"world", PutFlags::empty()).unwrap();
        inner.commit().unwrap();
    }

    // The child's writes are visible to the parent before it commits.
    assert_eq!(outer.get(db, b"hello").unwrap(), Some(&b"world"[..]));
    outer.commit().unwrap();

    let reader = env.read_txn().unwrap();
    assert_eq!(reader.get(db, b"hello").unwrap(), Some(&b"world"[..]));

    let mut cursor = reader.cursor(db).unwrap();
    let mut pairs = Vec::new();
    while let Some((k, v)) = cursor.next().unwrap() {
        pairs.push((k.to_vec(), v.to_vec()));
    }
    assert_eq!(pairs, vec![(b"hello".to_vec(), b"world".to_vec())]);
}

#[test]
fn aborted_child_leaves_no_trace() {
    let t = test_env_with(EnvOptions::new().max_dbs(4));
    let env = &t.env;

    let txn = env.write_txn().unwrap();
    let db = Database::open(&txn, "DB", DbFlags::CREATE).unwrap();
    txn.commit().unwrap();

    let mut outer = env.write_txn().unwrap();
    outer.put(db, b"kept", b"1", PutFlags::empty()).unwrap();
    {
        let inner = outer.nested().unwrap();
        inner.put(db, b"discarded", b"2", PutFlags::empty()).unwrap();
        // Dropped without commit.
    }
    assert_eq!(outer.get(db, b"discarded").unwrap(), None);
    assert_eq!(outer.get(db, b"kept").unwrap(), Some(&b"1"[..]));
    outer.commit().unwrap();

    // A parent abort also nullifies a committed child.
    let mut outer = env.write_txn().unwrap();
    {
        let inner = outer.nested().unwrap();
        inner.put(db, b"child", b"3", PutFlags::empty()).unwrap();
        inner.commit().unwrap();
    }
    outer.abort();

    let reader = env.read_txn().unwrap();
    assert_eq!(reader.get(db, b"kept").unwrap(), Some(&b"1"[..]));
    assert_eq!(reader.get(db, b"discarded").unwrap(), None);
    assert_eq!(reader.get(db, b"child").unwrap(), None);
}
