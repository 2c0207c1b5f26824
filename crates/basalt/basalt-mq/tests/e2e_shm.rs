//! End-to-end two-process integration test for the shared-memory queue.
//!
//! Spawns two independent OS processes (writer and reader) that communicate
//! through one descriptor-bound ring buffer **concurrently**. The test uses a
//! self-spawning pattern: the same test executable is re-invoked with
//! environment variables selecting the role of each child.
//!
//! ```text
//!                    Time -->
//!
//! [Writer]  --[provision + bind]--[write seq 0,1,2,...]--------[done]
//!                  |                  |    |    |
//!                  v                  v    v    v
//!             [shm object]      (concurrent reads)
//!                  |                  ^    ^    ^
//!                  v                  |    |    |
//! [Reader]  -----[open + join]---[read seq 0,1,2,...]---------[done]
//! ```
//!
//! Running both sides simultaneously is the point: it exercises the
//! acquire/release counter protocol under real cross-process contention, the
//! wraparound split under live flow control, and the all-or-nothing bulk
//! reads. The reader asserts the full sequence arrives with no gaps, no
//! duplicates and no reorderings.
//!
//! ```bash
//! cargo test -p basalt-mq --test e2e_shm -- --nocapture
//! ```

use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use basalt_mq::{MessageQueue, QueueConfig, provision};

/// Writes to stderr with immediate flush to bypass test output capture.
macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

/// Environment variable used to signal the role of a spawned process.
const ENV_ROLE: &str = "BASALT_E2E_ROLE";

const ENV_PATH: &str = "BASALT_E2E_PATH";

const ROLE_WRITER: &str = "writer";

const ROLE_READER: &str = "reader";

/// Number of records to push through the queue.
const EVENT_COUNT: u64 = 300_000;

/// Record width: each record is one `u32` sequence number.
const QUANTUM: u64 = 4;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Entry point for the writer child process.
///
/// Provisions the backing object, binds the first endpoint (zeroing the
/// counters) and pushes `EVENT_COUNT` sequence numbers, spinning whenever the
/// ring is full so the reader controls the pace.
fn run_writer(path: &str) {
    init_tracing();

    let cfg = QueueConfig::default();
    cfg.validate_for_quantum(QUANTUM)
        .expect("default capacity must hold whole records");

    log!("[WRITER] Provisioning queue");
    log!("[WRITER]   path: {path}");
    log!("[WRITER]   capacity: {} bytes", cfg.capacity_bytes);
    log!("[WRITER]   records to write: {EVENT_COUNT}");

    let desc = provision::create(path, cfg.capacity_bytes, QUANTUM)
        .expect("writer: failed to provision backing object");
    let mut queue = MessageQueue::<u32>::bind(desc);
    assert!(queue.is_valid(), "writer endpoint must be valid");

    let start = Instant::now();
    let stall_deadline = start + Duration::from_secs(30);

    for seq in 0..EVENT_COUNT as u32 {
        while !queue.write(&seq) {
            // Ring full: the reader is behind. Spin, but give up if it died.
            if Instant::now() > stall_deadline {
                panic!("[WRITER] reader stalled at seq {seq}");
            }
            std::hint::spin_loop();
        }

        if (seq + 1) % 100_000 == 0 {
            let elapsed = start.elapsed();
            let rate = (seq + 1) as f64 / elapsed.as_secs_f64();
            log!("[WRITER] Progress: {}/{EVENT_COUNT} records ({rate:.0} rec/s)", seq + 1);
        }
    }

    let elapsed = start.elapsed();
    let throughput = EVENT_COUNT as f64 / elapsed.as_secs_f64();
    log!("[WRITER] Complete");
    log!("[WRITER]   elapsed: {elapsed:?}");
    log!("[WRITER]   throughput: {throughput:.0} records/sec");
}

/// Entry point for the reader child process.
///
/// Waits for the writer to provision the object, joins without resetting the
/// stream, and drains records in bulk, checking that every sequence number
/// arrives exactly once and in order.
fn run_reader(path: &str) {
    init_tracing();

    log!("[READER] Waiting for backing object at {path}");

    let open_deadline = Instant::now() + Duration::from_secs(5);
    let desc = loop {
        match provision::open(path, QUANTUM) {
            Ok(desc) => break desc,
            Err(_) if Instant::now() < open_deadline => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("[READER] Failed to open backing object: {e}"),
        }
    };

    // Join, never bind: a second bind would reset the live stream.
    let mut queue = MessageQueue::<u32>::join(desc);
    assert!(queue.is_valid(), "reader endpoint must be valid");
    log!("[READER] Joined queue, draining...");

    let start = Instant::now();
    let read_deadline = start + Duration::from_secs(30);
    let mut next: u64 = 0;
    let mut buf = [0u32; 1024];

    while next < EVENT_COUNT {
        if Instant::now() > read_deadline {
            panic!("[READER] timed out at seq {next}/{EVENT_COUNT}");
        }

        let available = (queue.available_to_read() / QUANTUM) as usize;
        if available == 0 {
            std::hint::spin_loop();
            continue;
        }

        let n = available.min(buf.len()).min((EVENT_COUNT - next) as usize);
        assert!(queue.read_slice(&mut buf[..n]), "bulk read within occupancy must succeed");
        for &value in &buf[..n] {
            assert_eq!(value as u64, next, "sequence gap, duplicate or reorder");
            next += 1;
        }

        if next % 100_000 < n as u64 {
            let rate = next as f64 / start.elapsed().as_secs_f64();
            log!("[READER] Progress: {next}/{EVENT_COUNT} records ({rate:.0} rec/s)");
        }
    }

    let elapsed = start.elapsed();
    log!("[READER] Complete");
    log!("[READER]   records read: {next}");
    log!("[READER]   elapsed: {elapsed:?}");
    log!("[READER] Validation passed: dense sequence 0..{EVENT_COUNT}");
}

/// Two-process concurrent end-to-end test for the shared-memory queue.
#[test]
fn e2e_two_process_queue() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let path = env::var(ENV_PATH).expect("BASALT_E2E_PATH not set");
        match role.as_str() {
            ROLE_WRITER => run_writer(&path),
            ROLE_READER => run_reader(&path),
            other => panic!("Unknown role: {other}"),
        }
        return;
    }

    let path = format!("{}_{}", QueueConfig::default().shm_path, std::process::id());
    let exe = env::current_exe().expect("Failed to get current executable path");

    log!("");
    log!("{}", "=".repeat(70));
    log!("E2E Two-Process CONCURRENT Shared-Memory Queue Test");
    log!("{}", "=".repeat(70));
    log!("Backing object: {path}");
    log!("Records: {EVENT_COUNT}");
    log!("");

    log!("[ORCHESTRATOR] Spawning writer process...");
    let mut writer_proc = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_queue")
        .env(ENV_ROLE, ROLE_WRITER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("Failed to spawn writer process");

    // Just enough for the writer to provision; the reader retries anyway.
    std::thread::sleep(Duration::from_millis(5));

    log!("[ORCHESTRATOR] Spawning reader process (concurrent with writer)...");
    let mut reader_proc = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_queue")
        .env(ENV_ROLE, ROLE_READER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("Failed to spawn reader process");

    let writer_status = writer_proc.wait().expect("Failed to wait for writer");
    let reader_status = reader_proc.wait().expect("Failed to wait for reader");

    let _ = std::fs::remove_file(&path);

    assert!(
        writer_status.success(),
        "Writer process failed with status: {writer_status}"
    );
    assert!(
        reader_status.success(),
        "Reader process failed with status: {reader_status}"
    );

    log!("");
    log!("[ORCHESTRATOR] Concurrent test passed");
    log!("{}", "=".repeat(70));
}
