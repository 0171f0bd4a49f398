//! Synthetic RGBA frames and frame-rate bookkeeping for the video demo.

use std::time::{Duration, Instant};

pub const RING_NAME: &str = "video_frames";
pub const WIDTH: usize = 1920;
pub const HEIGHT: usize = 1080;
pub const BYTES_PER_PIXEL: usize = 4;
pub const FRAME_LEN: usize = WIDTH * HEIGHT * BYTES_PER_PIXEL;
pub const SLOT_COUNT: u32 = 10;

/// Paint a diamond gradient centred on the frame, shifted by `tick`.
pub fn render_diamond(frame: &mut [u8], width: usize, height: usize, tick: u32) {
    let (cx, cy) = (width / 2, height / 2);
    for (y, row) in frame
        .chunks_exact_mut(width * BYTES_PER_PIXEL)
        .take(height)
        .enumerate()
    {
        let dy = y.abs_diff(cy);
        for (x, px) in row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let v = ((x.abs_diff(cx) + dy) as u32).wrapping_add(tick) as u8;
            px.copy_from_slice(&[v, v.wrapping_mul(2), 255 - v, 255]);
        }
    }
}

/// Counts events and reports a rate once per window.
#[derive(Debug)]
pub struct RateMeter {
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl RateMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            window: Duration::from_secs(1),
            window_start: now,
            count: 0,
        }
    }

    /// Record one event. Returns events per second when a window closes.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        let rate = f64::from(self.count) / elapsed.as_secs_f64();
        self.window_start = now;
        self.count = 0;
        Some(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diamond_centre_and_corner() {
        let (w, h) = (8, 6);
        let mut frame = vec![0u8; w * h * BYTES_PER_PIXEL];
        render_diamond(&mut frame, w, h, 0);

        let at = |x: usize, y: usize| {
            let i = (y * w + x) * BYTES_PER_PIXEL;
            [frame[i], frame[i + 1], frame[i + 2], frame[i + 3]]
        };
        assert_eq!(at(4, 3), [0, 0, 255, 255]);
        assert_eq!(at(0, 0), [7, 14, 248, 255]);
    }

    #[test]
    fn test_diamond_moves_with_tick() {
        let (w, h) = (4, 4);
        let mut a = vec![0u8; w * h * BYTES_PER_PIXEL];
        let mut b = a.clone();
        render_diamond(&mut a, w, h, 0);
        render_diamond(&mut b, w, h, 1);
        assert_eq!(b[0], a[0] + 1);
    }

    #[test]
    fn test_rate_meter_reports_once_per_window() {
        let start = Instant::now();
        let mut meter = RateMeter::new(start);
        for i in 1..60 {
            assert_eq!(meter.tick(start + Duration::from_millis(i * 16)), None);
        }
        let rate = meter.tick(start + Duration::from_secs(1)).unwrap();
        assert!((rate - 60.0).abs() < 0.001);
        assert_eq!(meter.tick(start + Duration::from_millis(1010)), None);
    }
}
