//! RCU-published immutable configuration.
//!
//! Readers call [`ConfigHandle::get`] for a lock-free `Arc` load that never
//! returns null-equivalent state — a static default is published before the
//! first real `init`. Writers serialize through a mutex, copy-update the
//! current snapshot, and publish the new one with release semantics.

use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

/// Every tunable knob the core consumes, assembled by the (out-of-scope)
/// option parser and handed to [`ConfigHandle::init`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub audio_enabled: bool,
    pub fps_limit: u32,
    pub snapshot_mode: bool,
    pub snapshot_delay_secs: u64,
    pub reconnect_attempts: i32,
    pub encrypt_enabled: bool,
    pub server_key: Option<[u8; 32]>,
    pub address: String,
    pub port: u16,
    pub width: u16,
    pub height: u16,
    pub max_fps: u32,
    pub compression_level: i32,
    pub opus_bitrate: u32,
    pub advertise_ip: Option<IpAddr>,
    pub keepalive_interval_secs: u64,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            fps_limit: 30,
            snapshot_mode: false,
            snapshot_delay_secs: 0,
            reconnect_attempts: 5,
            encrypt_enabled: true,
            server_key: None,
            address: "127.0.0.1".to_string(),
            port: 27224,
            width: 80,
            height: 24,
            max_fps: 60,
            compression_level: 3,
            opus_bitrate: crate::protocol_constants::DEFAULT_OPUS_BITRATE,
            advertise_ip: None,
            keepalive_interval_secs: crate::protocol_constants::DEFAULT_KEEPALIVE_INTERVAL_SECS,
        }
    }
}

/// Field identities used by [`ConfigHandle::set_int`] and friends, matching
/// the source's dispatch-table-by-field-name contract instead of a macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    FpsLimit,
    SnapshotDelaySecs,
    ReconnectAttempts,
    Width,
    Height,
    MaxFps,
    CompressionLevel,
    OpusBitrate,
    KeepaliveIntervalSecs,
    AudioEnabled,
    SnapshotMode,
    EncryptEnabled,
}

/// RCU-published handle to a [`ConfigSnapshot`]. Cheap to clone (an `Arc` of
/// the inner `ArcSwap`); share one handle across every subsystem.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<ConfigSnapshot>>,
    write_lock: Arc<Mutex<()>>,
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(ConfigSnapshot::default())
    }
}

impl ConfigHandle {
    /// Publishes `initial` as the current snapshot.
    #[must_use]
    pub fn new(initial: ConfigSnapshot) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Lock-free acquire-load of the current snapshot. Never blocks, never
    /// returns a torn/partial snapshot: a reader sees one whole generation.
    #[must_use]
    pub fn get(&self) -> Arc<ConfigSnapshot> {
        self.inner.load_full()
    }

    /// Applies `mutate` to a copy of the current snapshot and publishes the
    /// result. Writers are serialized by an internal mutex; the publish
    /// itself is a single atomic store with release semantics. Old
    /// snapshots are not explicitly reclaimed (updates are rare in practice;
    /// `Arc` drops the old generation once the last reader releases it).
    pub fn update(&self, mutate: impl FnOnce(&mut ConfigSnapshot)) {
        let _guard = self.write_lock.lock();
        let mut next = (*self.inner.load_full()).clone();
        mutate(&mut next);
        self.inner.store(Arc::new(next));
    }

    /// Sets an integer-valued field by identity, matching the source's
    /// "dispatch table keyed on field identity" contract.
    pub fn set_int(&self, field: Field, value: i64) {
        self.update(|cfg| match field {
            Field::FpsLimit => cfg.fps_limit = value.max(0) as u32,
            Field::SnapshotDelaySecs => cfg.snapshot_delay_secs = value.max(0) as u64,
            Field::ReconnectAttempts => cfg.reconnect_attempts = value as i32,
            Field::Width => cfg.width = value.clamp(0, u16::MAX as i64) as u16,
            Field::Height => cfg.height = value.clamp(0, u16::MAX as i64) as u16,
            Field::MaxFps => cfg.max_fps = value.max(0) as u32,
            Field::CompressionLevel => cfg.compression_level = value as i32,
            Field::OpusBitrate => cfg.opus_bitrate = value.max(0) as u32,
            Field::KeepaliveIntervalSecs => cfg.keepalive_interval_secs = value.max(0) as u64,
            other => log::warn!("set_int called with non-integer field {other:?}"),
        });
    }

    /// Sets a boolean-valued field by identity.
    pub fn set_bool(&self, field: Field, value: bool) {
        self.update(|cfg| match field {
            Field::AudioEnabled => cfg.audio_enabled = value,
            Field::SnapshotMode => cfg.snapshot_mode = value,
            Field::EncryptEnabled => cfg.encrypt_enabled = value,
            other => log::warn!("set_bool called with non-boolean field {other:?}"),
        });
    }

    /// Sets the peer address.
    pub fn set_address(&self, address: String, port: u16) {
        self.update(|cfg| {
            cfg.address = address;
            cfg.port = port;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_reasonable() {
        let cfg = ConfigSnapshot::default();
        assert!(cfg.audio_enabled);
        assert_eq!(cfg.fps_limit, 30);
    }

    #[test]
    fn update_publishes_a_new_generation() {
        let handle = ConfigHandle::default();
        let before = handle.get();
        handle.set_int(Field::FpsLimit, 15);
        let after = handle.get();
        assert_eq!(before.fps_limit, 30);
        assert_eq!(after.fps_limit, 15);
    }

    #[test]
    fn reader_holds_a_stable_snapshot_across_a_concurrent_writer() {
        let handle = ConfigHandle::default();
        let snapshot = handle.get();
        handle.set_int(Field::FpsLimit, 1);
        // The snapshot taken before the update is untouched.
        assert_eq!(snapshot.fps_limit, 30);
    }

    #[test]
    fn set_bool_updates_the_right_field() {
        let handle = ConfigHandle::default();
        handle.set_bool(Field::SnapshotMode, true);
        assert!(handle.get().snapshot_mode);
    }

    #[test]
    fn concurrent_updates_never_panic_and_last_write_is_visible() {
        use std::sync::Arc as StdArc;
        let handle = StdArc::new(ConfigHandle::default());
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let handle = StdArc::clone(&handle);
            handles.push(std::thread::spawn(move || {
                handle.set_int(Field::FpsLimit, i64::from(i));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        // Some writer's value won; just verify it's one of the attempted values.
        assert!(handle.get().fps_limit < 8);
    }
}
