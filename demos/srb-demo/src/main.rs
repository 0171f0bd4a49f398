//! Demo programs for shared memory ring buffers.
//!
//! ```bash
//! # terminal 1: type lines, `q` to quit
//! srb-demo producer
//! # terminal 2
//! srb-demo subscriber
//!
//! # 1920x1080 RGBA frames at 60 fps
//! srb-demo video
//! srb-demo video-sink
//! ```

mod video;
mod words;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use shm_ringbuffers::{RingSpec, SrbReader, SrbWriter};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use crate::video::RateMeter;
use crate::words::WordsFrame;

const WORDS_PATH: &str = "/srb_words";
const WORDS_RING: &str = "words";
const WORDS_SLOTS: u32 = 8;
const VIDEO_PATH: &str = "/srb_video_test";

type DemoResult = Result<(), Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "srb-demo")]
#[command(about = "Shared memory ring buffer demos")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host a words ring and publish each line typed on stdin
    Producer {
        #[arg(long, default_value = WORDS_PATH)]
        path: String,
        #[arg(long, default_value = WORDS_RING)]
        ring: String,
        #[arg(long, default_value_t = 5)]
        grace_secs: u64,
    },
    /// Print every words frame that has not been seen yet
    Subscriber {
        #[arg(long, default_value = WORDS_PATH)]
        path: String,
        #[arg(long, default_value = WORDS_RING)]
        ring: String,
    },
    /// Print the newest words frame whenever it changes
    Watch {
        #[arg(long, default_value = WORDS_PATH)]
        path: String,
        #[arg(long, default_value = WORDS_RING)]
        ring: String,
        #[arg(long, default_value_t = 100)]
        poll_ms: u64,
    },
    /// Host a video ring and render frames into it
    Video {
        #[arg(long, default_value = VIDEO_PATH)]
        path: String,
        #[arg(long, default_value_t = 60)]
        fps: u32,
        #[arg(long, default_value_t = 5)]
        grace_secs: u64,
    },
    /// Consume video frames and report throughput
    VideoSink {
        #[arg(long, default_value = VIDEO_PATH)]
        path: String,
    },
}

fn main() -> DemoResult {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().command {
        Command::Producer {
            path,
            ring,
            grace_secs,
        } => runtime()?.block_on(producer(&path, &ring, Duration::from_secs(grace_secs))),
        Command::Subscriber { path, ring } => subscriber(&path, &ring),
        Command::Watch {
            path,
            ring,
            poll_ms,
        } => watch(&path, &ring, Duration::from_millis(poll_ms)),
        Command::Video {
            path,
            fps,
            grace_secs,
        } => runtime()?.block_on(video(&path, fps.max(1), Duration::from_secs(grace_secs))),
        Command::VideoSink { path } => video_sink(&path),
    }
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

async fn shutdown(writer: SrbWriter, grace: Duration) -> DemoResult {
    tracing::info!(path = %writer.path(), grace = ?grace, "signalling readers to stop");
    writer.signal_stopping();
    tokio::time::sleep(grace).await;
    writer.close()?;
    Ok(())
}

async fn producer(path: &str, ring: &str, grace: Duration) -> DemoResult {
    let mut writer = SrbWriter::create(
        path,
        &[RingSpec::new(ring, words::FRAME_LEN as u32, WORDS_SLOTS)],
    )?;
    println!("Type lines to publish on \"{}\" ring {}, `q` to quit.", path, ring);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut total_bytes = 0u64;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim() == "q" {
                    break;
                }
                total_bytes += line.len() as u64;
                let frame = WordsFrame::new(total_bytes, &line);
                writer.ring_named_mut(ring)?.publish(&frame.encode());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    shutdown(writer, grace).await
}

fn subscriber(path: &str, ring: &str) -> DemoResult {
    let mut reader = SrbReader::attach(path)?;
    let index = reader.ring_named_mut(ring)?.index();

    while reader.state().is_running() {
        match reader.rings_mut()[index].next_unread() {
            Some(slot) => match WordsFrame::decode(slot) {
                Some(frame) => println!("[{}] {}", frame.total_bytes, frame.text),
                None => tracing::warn!(len = slot.len(), "slot too small for a words frame"),
            },
            None => std::thread::sleep(Duration::from_secs(1)),
        }
    }

    tracing::info!(state = %reader.state(), "host stopped publishing");
    reader.close();
    Ok(())
}

fn watch(path: &str, ring: &str, poll: Duration) -> DemoResult {
    let mut reader = SrbReader::attach(path)?;
    let index = reader.ring_named_mut(ring)?.index();
    let mut seen = 0;

    while reader.state().is_running() {
        let ring = &reader.rings()[index];
        let id = ring.most_recent_id();
        if id != seen {
            seen = id;
            if let Some(frame) = ring.most_recent().and_then(WordsFrame::decode) {
                println!("#{} [{}] {}", id, frame.total_bytes, frame.text);
            }
        }
        std::thread::sleep(poll);
    }

    reader.close();
    Ok(())
}

async fn video(path: &str, fps: u32, grace: Duration) -> DemoResult {
    let writer = SrbWriter::create(
        path,
        &[RingSpec::new(
            video::RING_NAME,
            video::FRAME_LEN as u32,
            video::SLOT_COUNT,
        )],
    )?;
    println!(
        "Hosting \"{}\" ring {} ({}x{} RGBA at {} fps), Ctrl+C to stop.",
        path,
        video::RING_NAME,
        video::WIDTH,
        video::HEIGHT,
        fps
    );

    let stop = Arc::new(AtomicBool::new(false));
    let render = tokio::task::spawn_blocking({
        let stop = stop.clone();
        move || render_frames(writer, fps, &stop)
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for Ctrl+C, stopping");
    }
    stop.store(true, Ordering::Relaxed);
    let writer = render.await??;

    shutdown(writer, grace).await
}

fn render_frames(
    mut writer: SrbWriter,
    fps: u32,
    stop: &AtomicBool,
) -> Result<SrbWriter, shm_ringbuffers::SrbError> {
    let frame_time = Duration::from_secs(1) / fps;
    let ring = writer.ring_named_mut(video::RING_NAME)?;

    let mut tick = 0u32;
    video::render_diamond(ring.first_slot(), video::WIDTH, video::HEIGHT, tick);

    let mut meter = RateMeter::new(Instant::now());
    let mut deadline = Instant::now() + frame_time;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now < deadline {
            std::thread::sleep(deadline - now);
        }
        deadline += frame_time;

        tick = tick.wrapping_add(1);
        let slot = ring.advance();
        video::render_diamond(slot, video::WIDTH, video::HEIGHT, tick);

        if let Some(rate) = meter.tick(Instant::now()) {
            tracing::info!(fps = format_args!("{:.1}", rate), published = tick, "rendering");
        }
    }

    Ok(writer)
}

fn video_sink(path: &str) -> DemoResult {
    let mut reader = SrbReader::attach(path)?;
    let index = reader.ring_named_mut(video::RING_NAME)?.index();

    let mut meter = RateMeter::new(Instant::now());
    let mut frames = 0u64;
    let mut skipped = 0u64;
    while reader.state().is_running() {
        let ring = &mut reader.rings_mut()[index];
        let before = ring.last_delivered_position();
        if ring.next_unread().is_none() {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }
        let jumped = ring.last_delivered_position().wrapping_sub(before);
        skipped += u64::from(jumped.saturating_sub(1));
        frames += 1;

        if let Some(rate) = meter.tick(Instant::now()) {
            tracing::info!(fps = format_args!("{:.1}", rate), frames, skipped, "receiving");
        }
    }

    tracing::info!(frames, skipped, state = %reader.state(), "host stopped publishing");
    reader.close();
    Ok(())
}
