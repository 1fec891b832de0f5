//! Future-adapter example.
//!
//! Same flow as `write_read`, but awaiting submissions through the
//! `async` feature instead of wiring callbacks by hand.

use adio_core::{spawn_poller, AlignedBuf, FileEngine};
use futures::executor::block_on;
use std::fs;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let path = "/var/tmp/adio_example_async_read";
    let _ = fs::remove_file(path);

    println!("Opening {} for direct I/O...", path);
    let engine = Arc::new(FileEngine::open(path, 64)?);
    let poller = spawn_poller(engine.clone(), None)?;

    block_on(async {
        let wbuf = AlignedBuf::filled(4096, b'x')?;
        println!("Writing 4096 bytes...");
        let write = unsafe { engine.write_async(0, 4096, wbuf.as_ptr()) }?;
        write
            .await
            .map_err(|err| anyhow::anyhow!("write failed: {}", err))?;

        let mut rbuf = AlignedBuf::zeroed(4096)?;
        println!("Reading 4096 bytes...");
        let read = unsafe { engine.read_async(0, 4096, rbuf.as_mut_ptr()) }?;
        read.await
            .map_err(|err| anyhow::anyhow!("read failed: {}", err))?;

        println!(
            "Read back {} bytes, all 'x': {}",
            rbuf.len(),
            rbuf.as_slice().iter().all(|&b| b == b'x')
        );
        anyhow::Ok(())
    })?;

    engine.request_stop()?;
    poller.join()?;
    engine.close()?;

    let _ = fs::remove_file(path);
    println!("Done");
    Ok(())
}
