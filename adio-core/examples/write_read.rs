//! Callback-based write/read example.
//!
//! Opens a scratch file for direct I/O, preallocates a few blocks, writes
//! one aligned block through the engine, reads it back, then stops the
//! poller and closes the engine.

use adio_core::callback::from_fn;
use adio_core::{spawn_poller, AlignedBuf, FileEngine};
use std::fs;
use std::sync::mpsc;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let path = "/var/tmp/adio_example_write_read";
    let _ = fs::remove_file(path);

    println!("Opening {} for direct I/O...", path);
    let engine = Arc::new(FileEngine::open(path, 64)?);

    println!("Preallocating 16 blocks of 512 bytes...");
    engine.preallocate(0, 16, 512, 0)?;
    println!("File size is now {} bytes", engine.size()?);

    println!("Starting the completion poller...");
    let poller = spawn_poller(engine.clone(), None)?;

    // Write one block of 'A' bytes at offset 0.
    let wbuf = AlignedBuf::filled(512, b'A')?;
    let (tx, rx) = mpsc::channel();
    unsafe {
        engine.write(
            0,
            512,
            wbuf.as_ptr(),
            from_fn(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )?;
    }
    rx.recv()?.map_err(|err| anyhow::anyhow!("write failed: {}", err))?;
    println!("Write completed");

    // Read it back into a fresh buffer.
    let mut rbuf = AlignedBuf::zeroed(512)?;
    let (tx, rx) = mpsc::channel();
    unsafe {
        engine.read(
            0,
            512,
            rbuf.as_mut_ptr(),
            from_fn(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )?;
    }
    rx.recv()?.map_err(|err| anyhow::anyhow!("read failed: {}", err))?;
    println!(
        "Read completed; first 5 bytes: {:?}",
        &rbuf.as_slice()[..5]
    );

    println!("Stopping the poller...");
    engine.request_stop()?;
    poller.join()?;

    println!("Closing the engine...");
    engine.close()?;

    let _ = fs::remove_file(path);
    println!("Done");
    Ok(())
}
