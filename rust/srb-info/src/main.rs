//! srbinfo: attach to a hosted region and print what it contains.

use std::fmt::Write as _;
use std::process::ExitCode;

use clap::Parser;
use shm_ringbuffers::SrbReader;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "srbinfo")]
#[command(about = "Lists the rings of the shared memory ring buffer region at SHMNAME")]
struct Args {
    /// Shared memory name, e.g. /srb_video_test
    shm_name: String,
}

fn describe(reader: &SrbReader) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "SRB buffers at \"{}\" ({}):", reader.path(), reader.state());
    for ring in reader.rings() {
        let name = if ring.name().is_empty() {
            "(unnamed)"
        } else {
            ring.name()
        };
        let _ = writeln!(
            out,
            "\t{} ({} bytes x {} buffers, most recent id {})",
            name,
            ring.slot_size(),
            ring.slot_count(),
            ring.most_recent_id()
        );
    }
    out
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let reader = match SrbReader::attach(&args.shm_name) {
        Ok(reader) => reader,
        Err(e) => {
            eprintln!("Could not attach to \"{}\": {}", args.shm_name, e);
            return ExitCode::from(1);
        }
    };

    print!("{}", describe(&reader));
    reader.close();
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use shm_ringbuffers::{RingSpec, SrbWriter};

    #[test]
    fn test_describe_lists_rings() {
        let path = format!("/srb_info_test_{}", std::process::id());
        let mut writer = SrbWriter::create(
            &path,
            &[RingSpec::new("video", 64, 3), RingSpec::unnamed(8, 4)],
        )
        .unwrap();
        writer.rings_mut()[0].publish(b"frame");

        let reader = SrbReader::attach(&path).unwrap();
        let text = describe(&reader);
        assert_eq!(
            text,
            format!(
                "SRB buffers at \"{}\" (RUNNING):\n\
                 \tvideo (64 bytes x 3 buffers, most recent id 1)\n\
                 \t(unnamed) (8 bytes x 4 buffers, most recent id 0)\n",
                path
            )
        );
        reader.close();
        writer.close().unwrap();
    }
}
