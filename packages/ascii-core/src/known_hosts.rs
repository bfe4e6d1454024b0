//! Trust-on-first-use known-hosts store.
//!
//! Lines are `host:port sha256:base64-fingerprint`. An unknown host is
//! either pinned on first use or rejected in non-interactive mode; a
//! mismatched fingerprint always refuses the connection.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{record_context, CoreError, CoreResult};
use crate::utils::fingerprint;

/// Outcome of checking a peer's public key against the store.
///
/// A mismatched fingerprint is not a variant here: it always refuses the
/// connection outright (`verify` returns `Err(CoreError::HostKey)`), so
/// there is no caller that needs to keep going after seeing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyVerdict {
    /// The fingerprint matched a previously pinned entry.
    Trusted,
    /// No entry existed for this host; it has now been pinned.
    PinnedNew,
}

/// In-memory known-hosts table, loaded from and persisted to a flat file.
pub struct KnownHosts {
    path: PathBuf,
    entries: parking_lot::Mutex<HashMap<String, String>>,
}

impl KnownHosts {
    /// Loads the store from `path`, treating a missing file as empty.
    pub fn load(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let mut entries = HashMap::new();
        match fs::read_to_string(&path) {
            Ok(contents) => {
                for line in contents.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((host, fp)) = line.split_once(' ') {
                        entries.insert(host.to_string(), fp.to_string());
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(record_context(CoreError::Platform(format!(
                    "reading known_hosts {}: {e}",
                    path.display()
                ))))
            }
        }
        Ok(Self {
            path,
            entries: parking_lot::Mutex::new(entries),
        })
    }

    fn key(host: &str, port: u16) -> String {
        format!("{host}:{port}")
    }

    /// Verifies `public_key` for `host:port`. If `pin_on_unknown` is false
    /// and the host is unknown, returns [`CoreError::HostKey`] instead of
    /// silently pinning (the non-interactive path named in §6).
    pub fn verify(
        &self,
        host: &str,
        port: u16,
        public_key: &[u8],
        pin_on_unknown: bool,
    ) -> CoreResult<HostKeyVerdict> {
        let key = Self::key(host, port);
        let fp = fingerprint(public_key);

        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(existing) if *existing == fp => Ok(HostKeyVerdict::Trusted),
            Some(existing) => Err(record_context(CoreError::HostKey(format!(
                "fingerprint mismatch for {key}: expected {existing}, got {fp}"
            )))),
            None if pin_on_unknown => {
                entries.insert(key.clone(), fp.clone());
                drop(entries);
                self.persist()?;
                Ok(HostKeyVerdict::PinnedNew)
            }
            None => Err(record_context(CoreError::HostKey(format!(
                "unknown host {key} and pinning disabled (non-interactive mode)"
            )))),
        }
    }

    /// Directly pins `public_key` for `host:port`, overwriting any prior entry.
    pub fn pin(&self, host: &str, port: u16, public_key: &[u8]) -> CoreResult<()> {
        let key = Self::key(host, port);
        self.entries.lock().insert(key, fingerprint(public_key));
        self.persist()
    }

    fn persist(&self) -> CoreResult<()> {
        let entries = self.entries.lock();
        let mut contents = String::new();
        let mut keys: Vec<_> = entries.keys().collect();
        keys.sort();
        for key in keys {
            contents.push_str(key);
            contents.push(' ');
            contents.push_str(&entries[key]);
            contents.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    record_context(CoreError::Platform(format!("creating {}: {e}", parent.display())))
                })?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)
            .map_err(|e| record_context(CoreError::Platform(format!("writing {}: {e}", tmp.display()))))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            record_context(CoreError::Platform(format!(
                "renaming {} to {}: {e}",
                tmp.display(),
                self.path.display()
            )))
        })
    }
}

/// Convenience wrapper matching a single `host:port` lookup without
/// constructing a [`KnownHosts`], used by the CLI's `--print-fingerprint`
/// style utilities.
#[must_use]
pub fn default_path(data_dir: &Path) -> PathBuf {
    data_dir.join("known_hosts")
}
