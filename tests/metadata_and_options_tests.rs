use replica_store::{BlockRequest, LocalFsBackend, Replica, WriteRequest};
use serial_test::serial;
use tempfile::TempDir;

#[test]
#[serial]
fn reopening_with_a_different_block_size_is_rejected() {
    let tmp = TempDir::new().unwrap();
    {
        let fs = LocalFsBackend::new(tmp.path());
        let replica = Replica::open(fs, "r", 4).unwrap();
        replica.fix_consistency().unwrap();
        replica.begin_transaction().unwrap();
        replica
            .write_data_blocks(vec![WriteRequest { id: 0, version: 1, data: b"AAAA".to_vec() }])
            .unwrap();
        replica.commit().unwrap();
    }

    let fs = LocalFsBackend::new(tmp.path());
    let err = Replica::open(fs, "r", 8);
    assert!(err.is_err(), "opening an existing replica with a mismatched block_size must fail");
}

#[test]
#[serial]
fn zero_block_size_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let fs = LocalFsBackend::new(tmp.path());
    assert!(Replica::open(fs, "r", 0).is_err());
}

#[test]
#[serial]
fn tail_block_may_be_shorter_than_block_size() {
    let tmp = TempDir::new().unwrap();
    let fs = LocalFsBackend::new(tmp.path());
    let replica = Replica::open(fs, "r", 8).unwrap();
    replica.fix_consistency().unwrap();

    replica.begin_transaction().unwrap();
    replica
        .write_data_blocks(vec![WriteRequest { id: 0, version: 1, data: b"AB".to_vec() }])
        .unwrap();
    replica.commit().unwrap();

    assert_eq!(replica.get_data_file_size().unwrap(), 2);
    let out = replica.read_data_blocks(vec![BlockRequest { id: 0, version: 1 }]).unwrap();
    assert_eq!(out[0].data.as_deref(), Some(b"AB".as_slice()));
}
