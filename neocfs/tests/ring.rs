// Circular log testing over simulated flash.

use neocfs::{CircFileSpec, Error, FileFlags, Neocfs};
use simflash::styles;

/// The canonical ring: 2048 slots of 30-byte records across 64 KiB.
const SENSOR_LOG: CircFileSpec = CircFileSpec {
    name: "log.sensor",
    record_size: 30,
    start_addr: 0x0000_0000,
    end_addr: 0x0000_FFFF,
    flags: FileFlags::empty(),
};

fn record(i: u32) -> Vec<u8> {
    let mut r = vec![(i & 0x7F) as u8 ^ 0xA5; 30];
    r[..4].copy_from_slice(&i.to_le_bytes());
    r
}

fn fresh_store(specs: &[CircFileSpec]) -> Neocfs<simflash::SimFlash> {
    let mut store = Neocfs::new(styles::RING_64K.build().unwrap(), specs).unwrap();
    store.format().unwrap();
    store.init().unwrap();
    store
}

#[test]
fn init_rejects_bad_slot_sizes() {
    let bad = CircFileSpec {
        name: "odd",
        record_size: 31, // slot of 33 bytes
        start_addr: 0,
        end_addr: 0xFFF,
        flags: FileFlags::empty(),
    };
    let mut store = Neocfs::new(styles::RING_64K.build().unwrap(), &[bad]).unwrap();
    assert_eq!(store.init().unwrap_err(), Error::InvalidArgument);
    // the store stays unusable
    assert_eq!(store.open_by_name("odd").unwrap_err(), Error::NotInitialized);
}

#[test]
fn init_rejects_unaligned_regions() {
    let unaligned = CircFileSpec {
        name: "askew",
        record_size: 14,
        start_addr: 0x100,
        end_addr: 0x10FF,
        flags: FileFlags::empty(),
    };
    let mut store = Neocfs::new(styles::RING_64K.build().unwrap(), &[unaligned]).unwrap();
    assert_eq!(store.init().unwrap_err(), Error::InvalidArgument);
}

#[test]
fn dir_and_missing_names() {
    let specs = [
        CircFileSpec {
            name: "log.a",
            record_size: 30,
            start_addr: 0x0000,
            end_addr: 0x3FFF,
            flags: FileFlags::empty(),
        },
        CircFileSpec {
            name: "log.b",
            record_size: 62,
            start_addr: 0x4000,
            end_addr: 0x7FFF,
            flags: FileFlags::empty(),
        },
        CircFileSpec {
            name: "log.c",
            record_size: 126,
            start_addr: 0x8000,
            end_addr: 0xFFFF,
            flags: FileFlags::empty(),
        },
    ];
    let store = fresh_store(&specs);
    let names: Vec<&str> = store.dir().unwrap().map(|s| s.name).collect();
    assert_eq!(names, vec!["log.a", "log.b", "log.c"]);

    let mut store = store;
    assert_eq!(store.open_by_name("log.d").unwrap_err(), Error::NotFound);
    store.open_by_name("log.b").unwrap();
}

#[test]
fn empty_ring_reads_empty() {
    let mut store = fresh_store(&[SENSOR_LOG]);
    let id = store.open_by_name("log.sensor").unwrap();
    assert_eq!(store.head(id).unwrap(), SENSOR_LOG.start_addr);
    assert_eq!(store.tail(id).unwrap(), SENSOR_LOG.start_addr);
    let mut buf = vec![0u8; 30];
    assert_eq!(store.read_record(id, &mut buf).unwrap_err(), Error::LogEmpty);
}

#[test]
fn fill_then_drain() {
    let mut store = fresh_store(&[SENSOR_LOG]);
    let id = store.open_by_name("log.sensor").unwrap();
    let slots = SENSOR_LOG.slots();
    assert_eq!(slots, 2048);

    for i in 0..slots {
        store.write_record(id, &record(i)).unwrap();
        // ring positions stay aligned and in range
        let head = store.head(id).unwrap();
        assert!(head >= SENSOR_LOG.start_addr && head <= SENSOR_LOG.end_addr);
        assert_eq!((head - SENSOR_LOG.start_addr) % SENSOR_LOG.slot_len(), 0);
    }
    // every slot is written and nothing was consumed
    assert_eq!(store.write_record(id, &record(slots)).unwrap_err(), Error::NoSpace);

    let mut buf = vec![0u8; 30];
    for i in 0..slots {
        assert_eq!(store.read_pos(id).unwrap(), store.tail(id).unwrap());
        store.read_record(id, &mut buf).unwrap();
        assert_eq!(buf, record(i), "record {} corrupted", i);
        store.mark_obsolete(id).unwrap();
        store.next_record(id).unwrap();
    }
    assert_eq!(
        (store.tail(id).unwrap() - SENSOR_LOG.start_addr) / SENSOR_LOG.slot_len(),
        0,
        "tail wrapped back to the start"
    );
}

#[test]
fn wraparound_after_draining_half() {
    let mut store = fresh_store(&[SENSOR_LOG]);
    let id = store.open_by_name("log.sensor").unwrap();
    let slots = SENSOR_LOG.slots();

    for i in 0..slots {
        store.write_record(id, &record(i)).unwrap();
    }
    let mut buf = vec![0u8; 30];
    for i in 0..slots / 2 {
        store.read_record(id, &mut buf).unwrap();
        assert_eq!(buf, record(i));
        store.mark_obsolete(id).unwrap();
        store.next_record(id).unwrap();
    }

    // the head wraps onto consumed sectors, which get reclaimed
    for j in 0..500 {
        store.write_record(id, &record(10_000 + j)).unwrap();
    }
    // 500 slots cover the first four sectors: format plus one reclaim each
    let sim = store.flash();
    for s in 0..4 {
        assert_eq!(sim.erase_count(s), 2, "sector {} erase count", s);
    }
    for s in 4..16 {
        assert_eq!(sim.erase_count(s), 1, "sector {} erase count", s);
    }

    // a sweep from the tail sees the remaining old records, then the new
    store.seek_from_tail(id, 0).unwrap();
    for i in slots / 2..slots {
        store.read_record(id, &mut buf).unwrap();
        assert_eq!(buf, record(i), "old record {} after wrap", i);
        store.next_record(id).unwrap();
    }
    for j in 0..500 {
        store.read_record(id, &mut buf).unwrap();
        assert_eq!(buf, record(10_000 + j), "new record {} after wrap", j);
        store.next_record(id).unwrap();
    }
    assert_eq!(store.read_record(id, &mut buf).unwrap_err(), Error::LogEmpty);
}

#[test]
fn reopen_rediscovers_cursors() {
    const SHORT: CircFileSpec = CircFileSpec {
        name: "log.short",
        record_size: 14,
        start_addr: 0x0000,
        end_addr: 0x0FFF,
        flags: FileFlags::empty(),
    };
    let mut store = fresh_store(&[SHORT]);
    let id = store.open_by_name("log.short").unwrap();

    let mut buf = vec![0u8; 14];
    for i in 0..10u32 {
        store.write_record(id, &vec![i as u8; 14]).unwrap();
    }
    for _ in 0..3 {
        store.read_record(id, &mut buf).unwrap();
        store.mark_obsolete(id).unwrap();
        store.next_record(id).unwrap();
    }
    store.close(id).unwrap();
    assert_eq!(store.head(id).unwrap_err(), Error::InvalidArgument);

    // everything is rebuilt from the tags on flash
    store.open(id).unwrap();
    assert_eq!(store.tail(id).unwrap(), SHORT.start_addr + 3 * 16);
    assert_eq!(store.head(id).unwrap(), SHORT.start_addr + 10 * 16);
    assert_eq!(store.read_pos(id).unwrap(), store.tail(id).unwrap());
    store.read_record(id, &mut buf).unwrap();
    assert_eq!(buf, vec![3u8; 14]);
}

#[test]
fn obsolete_only_advances_at_tail() {
    let mut store = fresh_store(&[SENSOR_LOG]);
    let id = store.open_by_name("log.sensor").unwrap();
    for i in 0..5 {
        store.write_record(id, &record(i)).unwrap();
    }

    // cursor away from the tail: marking is a no-op
    store.seek_from_tail(id, 2).unwrap();
    let tail = store.tail(id).unwrap();
    store.mark_obsolete(id).unwrap();
    assert_eq!(store.tail(id).unwrap(), tail);

    // cursor on the tail: the tail advances one slot
    store.seek_from_tail(id, 0).unwrap();
    store.mark_obsolete(id).unwrap();
    assert_eq!(store.tail(id).unwrap(), tail + SENSOR_LOG.slot_len());
}

#[test]
fn overwrite_oldest_wraps_forever() {
    const CHATTY: CircFileSpec = CircFileSpec {
        name: "log.chatty",
        record_size: 14,
        start_addr: 0x0000,
        end_addr: 0x1FFF,
        flags: FileFlags::OVERWRITE_OLDEST,
    };
    let mut store = fresh_store(&[CHATTY]);
    let id = store.open_by_name("log.chatty").unwrap();

    let slots = CHATTY.slots();
    assert_eq!(slots, 512);
    // one and a half times around the ring, nothing consumed
    for i in 0..slots + slots / 2 {
        store.write_record(id, &vec![(i & 0xFF) as u8; 14]).unwrap();
    }
    // the wrap chewed through the first sector again
    assert!(store.flash().erase_count(0) >= 2);
}

#[test]
fn device_failure_propagates() {
    let mut store = fresh_store(&[SENSOR_LOG]);
    let id = store.open_by_name("log.sensor").unwrap();
    store.flash_mut().set_write_failure(0);
    assert_eq!(
        store.write_record(id, &record(0)).unwrap_err(),
        Error::Device(storage::Error::Io)
    );
    store.flash_mut().clear_write_failure();
    store.write_record(id, &record(0)).unwrap();
}

#[test]
fn record_size_is_enforced() {
    let mut store = fresh_store(&[SENSOR_LOG]);
    let id = store.open_by_name("log.sensor").unwrap();
    assert_eq!(
        store.write_record(id, &[0u8; 12]).unwrap_err(),
        Error::InvalidArgument
    );
    store.write_record(id, &record(1)).unwrap();
    let mut small = [0u8; 12];
    assert_eq!(
        store.read_record(id, &mut small).unwrap_err(),
        Error::InvalidArgument
    );
}
