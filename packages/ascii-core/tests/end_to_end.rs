//! End-to-end scenarios exercised over a real loopback `TcpListener`, one
//! per numbered scenario in the ingress/egress testable-properties list.
//! No real audio device or terminal is involved; the peer side is a plain
//! thread speaking the wire protocol directly.

use std::net::TcpListener;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ascii_core::audio::capture::ReferenceSource;
use ascii_core::audio::playback::{PlaybackPipeline, PlaybackSink};
use ascii_core::audio::AudioBatch;
use ascii_core::codec::{self, Envelope, PacketType};
use ascii_core::connection::{ConnectionFsm, ConnectionState, ReconnectPolicy};
use ascii_core::dispatch::{self, EnvelopeHandlers};
use ascii_core::handshake::{client_handshake, Identity};
use ascii_core::known_hosts::KnownHosts;
use ascii_core::lifecycle::{Lifecycle, NoopLifecycle};
use ascii_core::send_queue::SendQueue;
use ascii_core::transport::{Transport, TcpTransport};
use ascii_core::video::{frame_flags, FrameRenderer, VideoHandler};

struct CapturingRenderer {
    renders: Mutex<Vec<Vec<u8>>>,
}

impl FrameRenderer for CapturingRenderer {
    fn reset_screen(&mut self) {}
    fn render(&mut self, ascii: &[u8]) {
        self.renders.lock().unwrap().push(ascii.to_vec());
    }
    fn flush(&mut self) {}
}

fn build_ascii_frame(payload: &[u8], original_size: u32, compressed: Option<Vec<u8>>) -> Vec<u8> {
    let (body, compressed_size, flags) = match compressed {
        Some(c) => {
            let len = c.len() as u32;
            (c, len, frame_flags::COMPRESSED)
        }
        None => (payload.to_vec(), 0, 0u16),
    };
    let mut out = Vec::new();
    out.extend_from_slice(&80u16.to_be_bytes());
    out.extend_from_slice(&24u16.to_be_bytes());
    out.extend_from_slice(&original_size.to_be_bytes());
    out.extend_from_slice(&compressed_size.to_be_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Scenario 1: snapshot capture — one uncompressed frame renders exactly
/// once and `request_shutdown` fires once the snapshot delay has elapsed.
#[test]
fn scenario_1_snapshot_capture_renders_once_and_requests_shutdown() {
    let payload = b"AAAA".repeat(480); // 1920 bytes, matching the 80x24 frame size
    let frame = build_ascii_frame(&payload, payload.len() as u32, None);

    let mut handler = VideoHandler::new(30, true, Duration::ZERO);
    let mut renderer = CapturingRenderer {
        renders: Mutex::new(Vec::new()),
    };

    let started = Instant::now();
    let lifecycle = RequestedFlag::default();
    let rendered = handler.handle_frame(&frame, &mut renderer, &lifecycle).unwrap();
    assert!(rendered);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(renderer.renders.lock().unwrap().len(), 1);
    assert_eq!(renderer.renders.lock().unwrap()[0], payload);
    assert!(lifecycle.requested.load(Ordering::SeqCst));
}

#[derive(Default)]
struct RequestedFlag {
    requested: AtomicU32,
}

impl Lifecycle for RequestedFlag {
    fn request_shutdown(&self) {
        self.requested.store(1, Ordering::SeqCst);
    }
}

/// Scenario 2: compressed frame round-trip, plus its malformed-CRC sibling.
#[test]
fn scenario_2_compressed_frame_round_trip_and_malformed_crc_variant() {
    let payload = vec![b'Z'; 1000];
    let compressed = zstd::encode_all(&payload[..], 3).unwrap();

    let mut handler = VideoHandler::new(30, false, Duration::ZERO);
    let mut renderer = CapturingRenderer {
        renders: Mutex::new(Vec::new()),
    };
    let good_frame = build_ascii_frame(&payload, payload.len() as u32, Some(compressed.clone()));
    let rendered = handler
        .handle_frame(&good_frame, &mut renderer, &NoopLifecycle)
        .unwrap();
    assert!(rendered);
    assert_eq!(renderer.renders.lock().unwrap()[0], payload);

    // Same frame, CRC field XOR'd: the frame is dropped, not an error.
    let mut tampered = build_ascii_frame(&payload, payload.len() as u32, Some(compressed));
    let crc_offset = 2 + 2 + 4 + 4; // width, height, original_size, compressed_size
    tampered[crc_offset] ^= 0xFF;
    let rendered_again = handler
        .handle_frame(&tampered, &mut renderer, &NoopLifecycle)
        .unwrap();
    assert!(!rendered_again);
    assert_eq!(renderer.renders.lock().unwrap().len(), 1);
}

struct CapturingSink {
    frame_lens: Vec<usize>,
}

impl PlaybackSink for CapturingSink {
    fn write(&mut self, pcm: &[f32]) {
        self.frame_lens.push(pcm.len());
    }
}

/// Scenario 3: a 4-frame Opus batch decodes to 3840 PCM samples in one
/// `handle_batch` call.
#[test]
fn scenario_3_opus_batch_decode_yields_3840_samples_in_one_call() {
    let mut encoder = audiopus::coder::Encoder::new(
        audiopus::SampleRate::Hz48000,
        audiopus::Channels::Mono,
        audiopus::Application::Audio,
    )
    .unwrap();

    let silence = vec![0f32; 960];
    let mut opus_bytes = Vec::new();
    let mut frame_sizes = Vec::new();
    let mut scratch = [0u8; 4000];
    for _ in 0..4 {
        let n = encoder.encode_float(&silence, &mut scratch).unwrap();
        opus_bytes.extend_from_slice(&scratch[..n]);
        frame_sizes.push(n as u16);
    }

    let batch = AudioBatch {
        sample_rate: 48000,
        frame_duration_ms: 20,
        frame_sizes,
        opus_bytes,
    };
    assert!(batch.is_well_formed());
    assert_eq!(batch.frame_count(), 4);

    let sink = Box::new(CapturingSink { frame_lens: Vec::new() });
    let pipeline = PlaybackPipeline::new(sink).unwrap();
    pipeline.handle_batch(&batch).unwrap();

    // The reference window the AEC would pull reflects the whole batch.
    let reference = pipeline.latest_reference(3840).unwrap();
    assert_eq!(reference.len(), 3840);
}

/// Scenario 4: a server identity that doesn't match a pre-pinned
/// `known_hosts` fingerprint is refused, with no retry regardless of a
/// permissive reconnect policy, and the failure is classified non-retryable.
#[test]
fn scenario_4_auth_failure_is_refused_and_marked_non_retryable() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let transport = TcpTransport::from_stream(stream);
        run_fake_handshake_server(&transport);
    });

    let dir = tempfile::tempdir().unwrap();
    let known_hosts = KnownHosts::load(dir.path().join("known_hosts")).unwrap();
    // Pin a fingerprint that will not match whatever identity the fake
    // server actually presents.
    known_hosts.pin("127.0.0.1", addr.port(), b"a-completely-different-key").unwrap();

    let transport = TcpTransport::connect(addr).unwrap();
    let identity = Identity::generate();
    let result = client_handshake(&transport, Some(&identity), &known_hosts, "127.0.0.1", addr.port(), true);
    assert!(result.is_err());

    let fsm = ConnectionFsm::new();
    fsm.begin_attempt();
    fsm.record_error(result.as_ref().unwrap_err());
    assert_eq!(fsm.state(), ConnectionState::Failed);
    assert!(!fsm.may_retry(&ReconnectPolicy { max_attempts: -1 }));

    server.join().unwrap();
}

/// Minimal server side of the handshake in `handshake.rs`'s doc comment,
/// enough to produce a validly signed response the client will decode.
fn run_fake_handshake_server(transport: &dyn Transport) {
    use ed25519_dalek::{Signer, SigningKey};
    use rand_core::OsRng;
    use x25519_dalek::{EphemeralSecret, PublicKey};

    let mut client_transcript_prefix = [0u8; 32];
    transport.recv_exact(&mut client_transcript_prefix).unwrap();
    // The test client always carries an identity, so a 32-byte client
    // verifying key follows the ephemeral key.
    let mut client_identity = [0u8; 32];
    transport.recv_exact(&mut client_identity).unwrap();

    let server_ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let server_ephemeral_pub = PublicKey::from(&server_ephemeral);
    let server_identity = SigningKey::generate(&mut OsRng);

    let mut server_transcript = Vec::new();
    server_transcript.extend_from_slice(server_ephemeral_pub.as_bytes());
    server_transcript.extend_from_slice(&client_transcript_prefix);
    server_transcript.extend_from_slice(&client_identity);
    let signature = server_identity.sign(&server_transcript);
    let challenge = [7u8; 32];

    transport.send(server_ephemeral_pub.as_bytes()).unwrap();
    transport.send(server_identity.verifying_key().as_bytes()).unwrap();
    transport.send(&signature.to_bytes()).unwrap();
    transport.send(&challenge).unwrap();

    // The client will bail out of the handshake once `known_hosts.verify`
    // returns an error, before ever sending a challenge response or
    // reading HANDSHAKE_COMPLETE, so nothing further is read here.
}

/// Scenario 5: a bounded reconnect policy makes exactly initial + N
/// attempts against a refusing peer, each attempt separated by the fixed
/// reconnect delay.
#[test]
fn scenario_5_reconnect_bounded_makes_exactly_three_attempts() {
    // Bind and immediately drop to get a port nothing is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let policy = ReconnectPolicy { max_attempts: 2 };
    let fsm = ConnectionFsm::new();
    let mut attempts = 0u32;

    loop {
        fsm.begin_attempt();
        attempts += 1;

        match TcpTransport::connect(addr) {
            Ok(_) => panic!("expected connection refused"),
            Err(e) => fsm.record_error(&e),
        }

        if !fsm.may_retry(&policy) {
            break;
        }
        std::thread::sleep(ConnectionFsm::reconnect_delay());
    }

    assert_eq!(attempts, 3);
    assert_eq!(fsm.state(), ConnectionState::Failed);
    assert_eq!(fsm.attempt_counter(), 3);
}

struct NullReference;
impl ReferenceSource for NullReference {
    fn latest_reference(&self, _len: usize) -> Option<Vec<f32>> {
        None
    }
}

/// Scenario 6: 50 consecutive 20 ms capture frames reach the send queue as
/// at most `ceil(50 / MAX_BATCH_FRAMES) = 7` batches, with every sample
/// accounted for and in order.
#[test]
fn scenario_6_audio_capture_batches_fifty_frames_within_seven_batches() {
    let (tx, rx) = std::sync::mpsc::channel();
    for i in 0..50u32 {
        // Distinguishable-but-silent-enough content; encoder behavior on
        // exact values doesn't matter for this test, only frame counting.
        let sample = (i as f32) * 1e-6;
        tx.send(vec![sample; 960]).unwrap();
    }
    drop(tx); // closing the channel flushes the final partial batch and returns

    let queue = SendQueue::default();
    let cancel = tokio_util::sync::CancellationToken::new();
    let reference = NullReference;

    let started = Instant::now();
    ascii_core::audio::capture::run(&rx, Some(&reference), &queue, 64_000, &cancel).unwrap();

    cancel.cancel();
    let mut batches = Vec::new();
    while let Some(slot) = queue.dequeue(&cancel) {
        batches.push(AudioBatch::from_bytes(&slot.bytes).unwrap());
    }

    assert!(batches.len() <= 7, "expected at most 7 batches, got {}", batches.len());
    let total_frames: usize = batches.iter().map(AudioBatch::frame_count).sum();
    assert_eq!(total_frames, 50);
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// Sanity check that the ingress dispatcher (scenarios 1-2's delivery path)
/// actually drives envelopes end to end over a real socket, exercising the
/// same `EnvelopeHandlers` trait `ascii-chat-client` implements.
#[test]
fn dispatcher_delivers_ascii_frame_over_loopback() {
    struct Handlers {
        frames: Mutex<Vec<Vec<u8>>>,
    }
    impl EnvelopeHandlers for Handlers {
        fn on_ascii_frame(&self, envelope: &Envelope) {
            self.frames.lock().unwrap().push(envelope.payload.clone());
        }
        fn on_audio_opus(&self, _: &Envelope) {}
        fn on_audio_opus_batch(&self, _: &Envelope) {}
        fn on_server_state(&self, _: &Envelope) {}
        fn on_ping(&self, _: &Envelope) {}
        fn on_pong(&self, _: &Envelope) {}
        fn on_clear_console(&self, _: &Envelope) {}
        fn on_error_message(&self, _: &Envelope) {}
        fn on_remote_log(&self, _: &Envelope) {}
        fn on_stream_start(&self, _: &Envelope) {}
        fn on_stream_stop(&self, _: &Envelope) {}
        fn on_client_capabilities(&self, _: &Envelope) {}
        fn on_crypto_rekey(&self, _: &Envelope) {}
    }

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let payload = vec![9u8; 64];
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let transport = TcpTransport::from_stream(stream);
        let encoded = codec::encode(PacketType::AsciiFrame, 1, &payload, 3, None).unwrap();
        transport.send(&encoded).unwrap();
        transport.close();
    });

    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::connect(addr).unwrap());
    let handlers = Handlers {
        frames: Mutex::new(Vec::new()),
    };
    let cancel = tokio_util::sync::CancellationToken::new();
    let _ = dispatch::run(&transport, &handlers, &cancel);
    assert_eq!(handlers.frames.lock().unwrap().len(), 1);
    server.join().unwrap();
}
