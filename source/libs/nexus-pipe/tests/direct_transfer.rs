// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Large-write fast path, ring growth and budget accounting
//! OWNERS: @runtime
//! STATUS: Functional
//! TEST_COVERAGE: 11 integration tests
//!
//! TEST_SCENARIOS:
//!   - 1 MiB write against a concurrent reader in 4 KiB reads
//!   - write sizes around the direct threshold and chunk size
//!   - a refusing capability degrades every write to the ring
//!   - a capability mapping less than the chunk degrades to the ring
//!   - PIPE_BUF writes stay whole with the smallest accepted threshold
//!   - interrupting a writer mid-chunk returns the consumed count
//!   - ring grows for long writes and shrinks back under budget pressure
//!   - budget returns to zero after both ends close

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nexus_pipe::{
    ConfigError, DirectTransfer, LoanError, LoanWindow, PipeConfig, PipeError, PipeFactory,
    PollEvents, Wait, PIPE_BUF,
};

const KIB: usize = 1024;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Writes `data` from one thread, reads it back to EOF in `read_size` pieces.
fn pump(factory: &PipeFactory, data: &[u8], read_size: usize) -> Vec<u8> {
    let (reader, writer) = factory.create().unwrap();
    thread::scope(|s| {
        s.spawn(move || {
            assert_eq!(writer.write(data).unwrap(), data.len());
        });
        let mut out = Vec::with_capacity(data.len());
        let mut buf = vec![0u8; read_size];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    })
}

#[derive(Debug, Default)]
struct Refusing {
    attempts: AtomicUsize,
}

impl DirectTransfer for Refusing {
    fn map(&self, _window: &mut LoanWindow, _src: &[u8]) -> Result<(), LoanError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(LoanError::Unavailable)
    }

    fn unmap(&self, window: &mut LoanWindow) {
        window.clear();
    }
}

/// Claims success after exposing only the first half of each chunk.
#[derive(Debug)]
struct HalfMapping;

impl DirectTransfer for HalfMapping {
    fn map(&self, window: &mut LoanWindow, src: &[u8]) -> Result<(), LoanError> {
        window.reserve(src.len())?;
        window.install(&src[..src.len() / 2])
    }

    fn unmap(&self, window: &mut LoanWindow) {
        window.clear();
    }
}

#[test]
fn megabyte_through_concurrent_reader() {
    let factory = PipeFactory::new(PipeConfig::default()).unwrap();
    let data = pattern(1024 * KIB);
    let out = pump(&factory, &data, 4 * KIB);
    assert_eq!(out.len(), data.len());
    assert!(out == data, "stream corrupted");
}

#[test]
fn sizes_around_threshold_and_chunk() {
    let factory = PipeFactory::new(PipeConfig::default()).unwrap();
    let threshold = factory.config().direct_threshold;
    let chunk = factory.config().direct_chunk;
    for len in [threshold - 1, threshold, threshold + 1, chunk, chunk + 1, 3 * chunk + 17] {
        let data = pattern(len);
        let out = pump(&factory, &data, 3000);
        assert!(out == data, "stream corrupted at {len} bytes");
    }
    assert_eq!(factory.budget().charged(), 0);
}

#[test]
fn refused_mapping_falls_back_to_ring() {
    let refusing = Arc::new(Refusing::default());
    let factory = PipeFactory::new(PipeConfig::default())
        .unwrap()
        .with_transfer(Some(refusing.clone() as Arc<dyn DirectTransfer>));
    let data = pattern(300 * KIB);
    let out = pump(&factory, &data, 8 * KIB);
    assert!(out == data, "stream corrupted");
    assert!(refusing.attempts.load(Ordering::Relaxed) > 0);
    assert_eq!(factory.budget().charged(), 0);
}

#[test]
fn interrupted_direct_write_is_short() {
    let factory = PipeFactory::new(PipeConfig::default()).unwrap();
    let (reader, writer) = factory.create().unwrap();
    let data = pattern(1024 * KIB);
    let interrupter = writer.interrupter();
    let mut buf = vec![0u8; 4 * KIB];

    thread::scope(|s| {
        let sent = s.spawn(|| writer.write(&data));
        assert_eq!(reader.read(&mut buf).unwrap(), 4 * KIB);
        assert_eq!(&buf[..], &data[..4 * KIB]);
        while !sent.is_finished() {
            interrupter.interrupt();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sent.join().unwrap(), Ok(4 * KIB));
    });

    // Nothing past the consumed prefix was delivered; the pipe stays usable.
    assert_eq!(reader.read_with(&mut buf, Wait::NonBlocking), Err(PipeError::WouldBlock));
    writer.write(b"tail").unwrap();
    assert_eq!(reader.read(&mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"tail");
}

#[test]
fn unread_direct_write_times_out() {
    let factory = PipeFactory::new(PipeConfig::default()).unwrap();
    let (reader, writer) = factory.create().unwrap();
    let data = pattern(64 * KIB);
    assert_eq!(
        writer.write_with(&data, Wait::Timeout(Duration::from_millis(30))),
        Err(PipeError::Timeout)
    );
    assert_eq!(reader.bytes_readable().unwrap(), 0);
    assert_eq!(writer.poll(PollEvents::WRITABLE).unwrap(), PollEvents::WRITABLE);
}

#[test]
fn non_blocking_writes_skip_the_direct_path() {
    let refusing = Arc::new(Refusing::default());
    let factory = PipeFactory::new(PipeConfig::default())
        .unwrap()
        .with_transfer(Some(refusing.clone() as Arc<dyn DirectTransfer>));
    let (_reader, writer) = factory.create().unwrap();
    let written = writer.write_with(&pattern(32 * KIB), Wait::NonBlocking).unwrap();
    assert!(written > 0);
    assert_eq!(refusing.attempts.load(Ordering::Relaxed), 0);
}

#[test]
fn ring_grows_and_shrinks_under_pressure() {
    let config = PipeConfig { direct: false, map_budget: 100_000, ..PipeConfig::default() };
    let initial = config.initial_size;
    let big = config.big_size;
    let factory = PipeFactory::new(config).unwrap();
    let budget = Arc::clone(factory.budget());
    let (reader, writer) = factory.create().unwrap();
    assert_eq!(budget.charged(), initial);

    let data = pattern(20_000);
    assert_eq!(writer.write_with(&data, Wait::NonBlocking).unwrap(), data.len());
    assert_eq!(reader.stat().unwrap().size, big);
    assert_eq!(budget.big_pipes(), 1);
    assert_eq!(budget.charged(), big);

    let mut buf = vec![0u8; data.len()];
    assert_eq!(reader.read(&mut buf).unwrap(), data.len());
    assert!(buf == data);
    assert_eq!(reader.stat().unwrap().size, initial);
    assert_eq!(budget.big_pipes(), 0);
    assert_eq!(budget.charged(), initial);

    drop((reader, writer));
    assert_eq!(budget.charged(), 0);
}

#[test]
fn loan_window_is_cached_until_close() {
    let factory = PipeFactory::new(PipeConfig::default()).unwrap();
    let chunk = factory.config().direct_chunk;
    let initial = factory.config().initial_size;
    let budget = Arc::clone(factory.budget());
    let (reader, writer) = factory.create().unwrap();
    let data = pattern(chunk);

    thread::scope(|s| {
        s.spawn(|| assert_eq!(writer.write(&data).unwrap(), chunk));
        let mut buf = vec![0u8; 16 * KIB];
        let mut got = 0;
        while got < chunk {
            got += reader.read(&mut buf).unwrap();
        }
    });
    assert_eq!(budget.charged(), initial + chunk);
    assert_eq!(budget.big_pipes(), 0);

    drop(reader);
    assert_eq!(budget.charged(), 0);
    drop(writer);
    assert_eq!(budget.charged(), 0);
}

#[test]
fn short_mapping_falls_back_to_ring() {
    let factory = PipeFactory::new(PipeConfig::default())
        .unwrap()
        .with_transfer(Some(Arc::new(HalfMapping) as Arc<dyn DirectTransfer>));
    let data = pattern(100 * KIB);
    let out = pump(&factory, &data, 4 * KIB);
    assert!(out == data, "stream corrupted");
    assert_eq!(factory.budget().charged(), 0);
}

#[test]
fn threshold_must_exceed_pipe_buf() {
    let config = PipeConfig { direct_threshold: 128, direct_chunk: 128, ..PipeConfig::default() };
    assert!(matches!(
        PipeFactory::new(config),
        Err(ConfigError::Invalid { field: "direct_threshold", .. })
    ));
}

#[test]
fn pipe_buf_writes_stay_whole_with_small_threshold() {
    let config = PipeConfig {
        initial_size: 4096,
        big_size: 4096,
        direct_threshold: PIPE_BUF + 1,
        direct_chunk: PIPE_BUF + 1,
        ..PipeConfig::default()
    };
    let factory = PipeFactory::new(config).unwrap();
    let (reader, writer) = factory.create().unwrap();
    const BLOCKS: usize = 300;

    let received = thread::scope(|s| {
        for tag in [0x11u8, 0xEEu8] {
            let writer = &writer;
            s.spawn(move || {
                for _ in 0..BLOCKS {
                    assert_eq!(writer.write(&[tag; PIPE_BUF]).unwrap(), PIPE_BUF);
                }
            });
        }
        let mut out = Vec::new();
        let mut buf = [0u8; 700];
        while out.len() < 2 * BLOCKS * PIPE_BUF {
            let n = reader.read(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        out
    });

    let torn = received.chunks(PIPE_BUF).filter(|b| b.iter().any(|&x| x != b[0])).count();
    assert_eq!(torn, 0, "PIPE_BUF write interleaved");
}
