//! Integration tests for concurrent readers and writers on one ledger

use aplledger::blockchain::{Block, Blockchain};
use aplledger::config::ChainConfig;
use aplledger::error::ErrorKind;
use aplledger::persistence::{LedgerStore, StoreOptions};
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

type TestResult = Result<(), Box<dyn Error>>;

fn shared_ledger() -> Result<Arc<Blockchain>, Box<dyn Error>> {
    let store = LedgerStore::temporary(StoreOptions::default())?;
    let chain = Blockchain::open(store, &ChainConfig::default())?;
    {
        let guard = chain.write_lock()?;
        chain.set_last_block(&guard, Block::genesis(0, 1, vec![]))?;
    }
    Ok(Arc::new(chain))
}

#[test]
fn test_readers_never_see_height_apart_from_last_block() -> TestResult {
    let chain = shared_ledger()?;
    let done = Arc::new(AtomicBool::new(false));
    let blocks_to_append = 40;

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let chain = Arc::clone(&chain);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut observations = 0u64;
                while !done.load(Ordering::Acquire) {
                    let _guard = chain.read_lock();
                    let tip = chain.last_block().expect("genesis is present");
                    let height = chain.height().expect("genesis is present");
                    assert_eq!(height, tip.height());

                    // The stored chain agrees with the pointer while we hold the lock.
                    let stored = chain.all_blocks().unwrap().into_vec().unwrap();
                    assert_eq!(stored.len() as u64, height + 1);
                    assert_eq!(stored.last().map(|b| b.id), Some(tip.id));
                    observations += 1;
                }
                observations
            })
        })
        .collect();

    for i in 1..=blocks_to_append {
        let guard = chain.write_lock()?;
        let tip = chain.last_block().ok_or("missing tip")?;
        chain.set_last_block(&guard, tip.successor(i, 1, vec![]))?;
        drop(guard);
        thread::sleep(Duration::from_millis(1));
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().map_err(|_| "reader panicked")?;
    }
    assert_eq!(chain.height(), Some(blocks_to_append as u64));
    assert_eq!(chain.store().readers_in_use(), 0);
    Ok(())
}

#[test]
fn test_update_lock_serializes_check_then_append() -> TestResult {
    let chain = shared_ledger()?;
    let workers = 4;
    let rounds = 5;
    let barrier = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let chain = Arc::clone(&chain);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..rounds {
                    let update = chain.update_lock().unwrap();
                    // Decide on the tip seen under the update lock...
                    let tip = chain.last_block().unwrap();
                    let next = tip.successor((worker * 100 + round) as i64, worker as u64, vec![]);
                    // ...and commit without anyone moving it in between.
                    let write = update.escalate().unwrap();
                    chain.set_last_block(&write, next).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().map_err(|_| "worker panicked")?;
    }
    assert_eq!(chain.height(), Some((workers * rounds) as u64));

    let blocks = chain.all_blocks()?.into_vec()?;
    for pair in blocks.windows(2) {
        assert_eq!(pair[1].previous_block_id(), Some(pair[0].id));
        assert_eq!(pair[1].height(), pair[0].height() + 1);
    }
    Ok(())
}

#[test]
fn test_bounded_write_times_out_behind_reader() -> TestResult {
    let chain = shared_ledger()?;
    let holding = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));

    let reader = {
        let chain = Arc::clone(&chain);
        let holding = Arc::clone(&holding);
        let release = Arc::clone(&release);
        thread::spawn(move || {
            let _guard = chain.read_lock();
            holding.wait();
            release.wait();
        })
    };

    holding.wait();
    let err = chain
        .lock_manager()
        .try_write_for(Duration::from_millis(50))
        .err()
        .ok_or("write lock should not be granted")?;
    assert_eq!(err.kind(), ErrorKind::LockTimeout);
    release.wait();
    reader.join().map_err(|_| "reader panicked")?;

    // Once the reader is gone the writer gets in.
    let guard = chain.lock_manager().try_write_for(Duration::from_secs(5))?;
    assert!(guard.guards(chain.lock_manager()));
    Ok(())
}

#[test]
fn test_shutdown_waits_for_writer() -> TestResult {
    let chain = shared_ledger()?;
    let started = Arc::new(Barrier::new(2));

    let writer = {
        let chain = Arc::clone(&chain);
        let started = Arc::clone(&started);
        thread::spawn(move || {
            let guard = chain.write_lock().unwrap();
            started.wait();
            thread::sleep(Duration::from_millis(50));
            let tip = chain.last_block().unwrap();
            chain.set_last_block(&guard, tip.successor(1, 1, vec![])).unwrap();
        })
    };

    started.wait();
    chain.shutdown()?;
    writer.join().map_err(|_| "writer panicked")?;

    assert!(chain.is_closed());
    assert_eq!(chain.height(), Some(1));
    Ok(())
}
