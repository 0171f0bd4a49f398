//! srbhost: create a ring buffer region and keep it alive until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! srbhost /srb_video_test video_frames 8294400 10
//! ```
//!
//! On Ctrl+C the region is marked `STOPPING`, readers get `--grace-secs` to
//! disengage, then the region is closed and removed.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use shm_ringbuffers::{MIN_SLOT_COUNT, MIN_SLOT_SIZE, RingSpec, SrbError, SrbWriter};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "srbhost")]
#[command(about = "Creates shared memory SHMNAME with one ring per RINGNAME BUFFERSIZE NUMBUFFERS set")]
#[command(after_help = "Example:\n  srbhost /srb_video_test video_frames 8294400 10\n\n\
    ... creates /srb_video_test with one ring named video_frames of 10 buffers of 8294400 bytes.")]
struct Args {
    /// Shared memory name, e.g. /srb_video_test
    shm_name: String,

    /// Ring definitions, repeated: RINGNAME BUFFERSIZE NUMBUFFERS
    #[arg(required = true, num_args = 3.., value_name = "RINGNAME BUFFERSIZE NUMBUFFERS")]
    rings: Vec<String>,

    /// Seconds between signalling STOPPING and removing the region
    #[arg(long, default_value_t = 5)]
    grace_secs: u64,
}

/// Turn `name size count` triples into ring specs.
fn parse_ring_specs(args: &[String]) -> Result<Vec<RingSpec>, String> {
    if args.is_empty() || args.len() % 3 != 0 {
        return Err(format!(
            "expected RINGNAME BUFFERSIZE NUMBUFFERS triples, got {} values",
            args.len()
        ));
    }

    args.chunks_exact(3)
        .map(|triple| {
            let name = &triple[0];
            let size: u32 = triple[1]
                .parse()
                .map_err(|_| format!("{}: invalid BUFFERSIZE {:?}", name, triple[1]))?;
            let count: u32 = triple[2]
                .parse()
                .map_err(|_| format!("{}: invalid NUMBUFFERS {:?}", name, triple[2]))?;
            if size < MIN_SLOT_SIZE || count < MIN_SLOT_COUNT {
                return Err(format!(
                    "{}: need BUFFERSIZE >= {} and NUMBUFFERS >= {}",
                    name, MIN_SLOT_SIZE, MIN_SLOT_COUNT
                ));
            }
            Ok(RingSpec::new(name.clone(), size, count))
        })
        .collect()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let specs = match parse_ring_specs(&args.rings) {
        Ok(specs) => specs,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    let writer = match SrbWriter::create(&args.shm_name, &specs) {
        Ok(writer) => writer,
        Err(e) => {
            tracing::error!(error = %e, path = %args.shm_name, "failed to create region");
            return ExitCode::from(3);
        }
    };

    println!("Hosting (at \"{}\") buffers:", args.shm_name);
    for ring in writer.rings() {
        println!(
            "\t{} ({} bytes x {} buffers)",
            ring.name(),
            ring.slot_size(),
            ring.slot_count()
        );
    }
    println!("\nPress Ctrl+C to stop.");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create runtime");

    match rt.block_on(host_until_interrupted(
        writer,
        Duration::from_secs(args.grace_secs),
    )) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "failed to close region");
            ExitCode::FAILURE
        }
    }
}

async fn host_until_interrupted(writer: SrbWriter, grace: Duration) -> Result<(), SrbError> {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for Ctrl+C, shutting down");
    }
    shutdown(writer, grace).await
}

/// `STOPPING`, wait out the grace period, then close.
async fn shutdown(writer: SrbWriter, grace: Duration) -> Result<(), SrbError> {
    println!("Signalling that host is shutting down...");
    writer.signal_stopping();
    tokio::time::sleep(grace).await;
    println!("Closing shared buffers.");
    writer.close()
}
