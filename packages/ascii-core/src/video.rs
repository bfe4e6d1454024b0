//! Video ingress handler: decompress, verify, frame-rate-limit, render.
//!
//! Steps per `ASCII_FRAME`, in order: parse header, decompress if flagged,
//! verify CRC32 against the decompressed bytes (dropping the frame on
//! mismatch), apply the client-side frame-rate limit, detect a reset
//! condition (first frame ever, or a `SERVER_STATE` change since the last
//! frame), then hand the buffer to the renderer.

use std::io::Write;
use std::time::{Duration, Instant};

use crate::error::{record_context, CoreError, CoreResult};
use crate::lifecycle::Lifecycle;

/// Frame Record header, per the data model: `{width, height, original_size,
/// compressed_size, checksum, flags}`.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub width: u16,
    pub height: u16,
    pub original_size: u32,
    pub compressed_size: u32,
    pub checksum: u32,
    pub flags: u16,
}

pub mod frame_flags {
    pub const COMPRESSED: u16 = 0b0001;
}

const FRAME_HEADER_LEN: usize = 2 + 2 + 4 + 4 + 4 + 2;

impl FrameHeader {
    /// Parses a big-endian frame header from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(record_context(CoreError::Protocol(
                "frame header truncated".into(),
            )));
        }
        Ok(Self {
            width: u16::from_be_bytes(bytes[0..2].try_into().unwrap()),
            height: u16::from_be_bytes(bytes[2..4].try_into().unwrap()),
            original_size: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
            compressed_size: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
            checksum: u32::from_be_bytes(bytes[12..16].try_into().unwrap()),
            flags: u16::from_be_bytes(bytes[16..18].try_into().unwrap()),
        })
    }
}

/// Client-side renderer sink; production code writes to stdout, tests
/// capture into a buffer.
pub trait FrameRenderer: Send {
    fn reset_screen(&mut self);
    fn render(&mut self, ascii: &[u8]);
    fn flush(&mut self);
}

/// Renders to the process's stdout.
pub struct StdoutRenderer {
    stdout: std::io::Stdout,
}

impl Default for StdoutRenderer {
    fn default() -> Self {
        Self {
            stdout: std::io::stdout(),
        }
    }
}

impl FrameRenderer for StdoutRenderer {
    fn reset_screen(&mut self) {
        // ANSI full-screen reset + cursor home.
        let _ = self.stdout.write_all(b"\x1b[2J\x1b[H");
    }

    fn render(&mut self, ascii: &[u8]) {
        let _ = self.stdout.write_all(ascii);
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }
}

/// Per-connection video ingress state: frame-rate limiter, reset tracking,
/// and snapshot-mode bookkeeping.
pub struct VideoHandler {
    fps_limit: u32,
    last_render_time: Option<Instant>,
    rendered_any: bool,
    last_server_state: Option<u32>,
    snapshot_mode: bool,
    snapshot_delay: Duration,
    snapshot_first_frame_at: Option<Instant>,
}

impl VideoHandler {
    #[must_use]
    pub fn new(fps_limit: u32, snapshot_mode: bool, snapshot_delay: Duration) -> Self {
        Self {
            fps_limit,
            last_render_time: None,
            rendered_any: false,
            last_server_state: None,
            snapshot_mode,
            snapshot_delay,
            snapshot_first_frame_at: None,
        }
    }

    /// Records a `SERVER_STATE` change (active participant count); the next
    /// rendered frame will trigger a screen reset.
    pub fn observe_server_state(&mut self, participant_count: u32) {
        if self.last_server_state != Some(participant_count) {
            self.last_server_state = Some(participant_count);
            self.rendered_any = false;
        }
    }

    /// Processes one `ASCII_FRAME` payload. Returns `true` if the frame was
    /// rendered (the dispatch loop uses this to drive snapshot-mode exit).
    pub fn handle_frame(
        &mut self,
        payload: &[u8],
        renderer: &mut dyn FrameRenderer,
        lifecycle: &dyn Lifecycle,
    ) -> CoreResult<bool> {
        let header = FrameHeader::parse(payload)?;
        let body = &payload[FRAME_HEADER_LEN..];

        let decompressed = if header.flags & frame_flags::COMPRESSED != 0 {
            if body.len() as u32 != header.compressed_size {
                return Err(record_context(CoreError::Protocol(
                    "compressed payload length mismatch".into(),
                )));
            }
            zstd::decode_all(body)
                .map_err(|e| record_context(CoreError::Compression(format!("zstd decode: {e}"))))?
        } else {
            body.to_vec()
        };

        if decompressed.len() as u32 != header.original_size {
            return Err(record_context(CoreError::Protocol(
                "decompressed size mismatch".into(),
            )));
        }

        let actual_crc = crc32fast::hash(&decompressed);
        if actual_crc != header.checksum {
            log::warn!(
                "ascii frame dropped: crc mismatch (header {:#x}, computed {:#x}, sample {:?})",
                header.checksum,
                actual_crc,
                &decompressed[..decompressed.len().min(8)]
            );
            return Ok(false);
        }

        if !self.snapshot_mode {
            if let Some(last) = self.last_render_time {
                let min_interval = Duration::from_secs_f64(1.0 / f64::from(self.fps_limit.max(1)));
                if last.elapsed() < min_interval {
                    return Ok(false);
                }
            }
        }

        if !self.rendered_any {
            renderer.reset_screen();
            self.rendered_any = true;
        }

        renderer.render(&decompressed);
        renderer.flush();
        self.last_render_time = Some(Instant::now());

        if self.snapshot_mode {
            let first_at = *self.snapshot_first_frame_at.get_or_insert_with(Instant::now);
            if first_at.elapsed() >= self.snapshot_delay {
                lifecycle.request_shutdown();
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::NoopLifecycle;

    struct CapturingRenderer {
        resets: usize,
        rendered: Vec<Vec<u8>>,
    }

    impl FrameRenderer for CapturingRenderer {
        fn reset_screen(&mut self) {
            self.resets += 1;
        }
        fn render(&mut self, ascii: &[u8]) {
            self.rendered.push(ascii.to_vec());
        }
        fn flush(&mut self) {}
    }

    fn build_frame(payload: &[u8], compressed: bool) -> Vec<u8> {
        let (body, compressed_size) = if compressed {
            let c = zstd::encode_all(payload, 3).unwrap();
            let len = c.len() as u32;
            (c, len)
        } else {
            (payload.to_vec(), 0)
        };
        let mut out = Vec::new();
        out.extend_from_slice(&80u16.to_be_bytes());
        out.extend_from_slice(&24u16.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&compressed_size.to_be_bytes());
        out.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
        let flags: u16 = if compressed { frame_flags::COMPRESSED } else { 0 };
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn renders_uncompressed_frame_and_resets_on_first_frame() {
        let mut handler = VideoHandler::new(30, false, Duration::ZERO);
        let mut renderer = CapturingRenderer {
            resets: 0,
            rendered: Vec::new(),
        };
        let payload = b"AAAA".repeat(120);
        let frame = build_frame(&payload, false);
        let rendered = handler
            .handle_frame(&frame, &mut renderer, &NoopLifecycle)
            .unwrap();
        assert!(rendered);
        assert_eq!(renderer.resets, 1);
        assert_eq!(renderer.rendered[0], payload);
    }

    #[test]
    fn renders_compressed_frame() {
        let mut handler = VideoHandler::new(30, false, Duration::ZERO);
        let mut renderer = CapturingRenderer {
            resets: 0,
            rendered: Vec::new(),
        };
        let payload = vec![b'B'; 1000];
        let frame = build_frame(&payload, true);
        assert!(handler
            .handle_frame(&frame, &mut renderer, &NoopLifecycle)
            .unwrap());
        assert_eq!(renderer.rendered[0], payload);
    }

    #[test]
    fn crc_mismatch_drops_frame_without_rendering() {
        let mut handler = VideoHandler::new(30, false, Duration::ZERO);
        let mut renderer = CapturingRenderer {
            resets: 0,
            rendered: Vec::new(),
        };
        let payload = b"hello".to_vec();
        let mut frame = build_frame(&payload, false);
        let crc_offset = 12;
        frame[crc_offset] ^= 0xFF;
        let rendered = handler
            .handle_frame(&frame, &mut renderer, &NoopLifecycle)
            .unwrap();
        assert!(!rendered);
        assert!(renderer.rendered.is_empty());
    }

    #[test]
    fn frame_rate_limiter_drops_frames_faster_than_limit() {
        let mut handler = VideoHandler::new(1, false, Duration::ZERO);
        let mut renderer = CapturingRenderer {
            resets: 0,
            rendered: Vec::new(),
        };
        let payload = b"x".to_vec();
        let frame = build_frame(&payload, false);
        assert!(handler
            .handle_frame(&frame, &mut renderer, &NoopLifecycle)
            .unwrap());
        // Second frame arrives immediately; at 1 fps it should be dropped.
        let frame2 = build_frame(&payload, false);
        assert!(!handler
            .handle_frame(&frame2, &mut renderer, &NoopLifecycle)
            .unwrap());
    }

    #[test]
    fn server_state_change_forces_a_reset_on_next_frame() {
        let mut handler = VideoHandler::new(30, false, Duration::ZERO);
        let mut renderer = CapturingRenderer {
            resets: 0,
            rendered: Vec::new(),
        };
        let payload = b"x".to_vec();
        handler
            .handle_frame(&build_frame(&payload, false), &mut renderer, &NoopLifecycle)
            .unwrap();
        handler.observe_server_state(3);
        handler
            .handle_frame(&build_frame(&payload, false), &mut renderer, &NoopLifecycle)
            .unwrap();
        assert_eq!(renderer.resets, 2);
    }
}
