//! Durable secret for the self-managed engine.
//!
//! Generated once, published with an exclusive create, then reused for the
//! life of the data directory. The value itself is never logged.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::TryRngCore;
use tracing::{debug, info, warn};

use crate::error::CredentialError;

/// Length of generated credentials, in characters.
pub const CREDENTIAL_LEN: usize = 32;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Random URL-safe credential of exactly `len` characters.
///
/// Draws enough bytes that the encoding covers `len` before trimming, so the
/// result carries the full entropy `len` characters can hold.
pub fn generate(len: usize) -> Result<Credential, CredentialError> {
    let byte_count = (len * 3).div_ceil(4);
    let mut bytes = vec![0u8; byte_count];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CredentialError::Entropy {
            message: e.to_string(),
        })?;

    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    debug_assert!(encoded.len() >= len);
    encoded.truncate(len);
    Ok(Credential(encoded))
}

/// Return the credential stored at `path`, creating it on first use.
///
/// A present but blank file is an error, never a reason to regenerate.
pub fn get_or_create(path: &Path) -> Result<Credential, CredentialError> {
    if let Some(existing) = read_existing(path)? {
        info!(path = %path.display(), "credential=reused");
        return Ok(existing);
    }

    let credential = generate(CREDENTIAL_LEN)?;

    match publish(path, &credential) {
        Ok(()) => {
            info!(path = %path.display(), "credential=generated");
            Ok(credential)
        }
        Err(PublishError::Exists) => {
            warn!(path = %path.display(), "credential=race_lost reading concurrent writer's value");
            match read_existing(path)? {
                Some(winner) => Ok(winner),
                None => Err(CredentialError::RaceLost {
                    path: path.to_path_buf(),
                }),
            }
        }
        Err(PublishError::Failed(e)) => Err(e),
    }
}

fn read_existing(path: &Path) -> Result<Option<Credential>, CredentialError> {
    match fs::read_to_string(path) {
        Ok(data) => {
            let trimmed = data.trim();
            if trimmed.is_empty() {
                return Err(CredentialError::Corrupt {
                    path: path.to_path_buf(),
                });
            }
            Ok(Some(Credential(trimmed.to_string())))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CredentialError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

enum PublishError {
    Exists,
    Failed(CredentialError),
}

/// Write to a private scratch file, then hard-link it into place.
///
/// The link is the exclusive create: it fails if `path` already exists, and
/// readers never observe a partially written file.
fn publish(path: &Path, credential: &Credential) -> Result<(), PublishError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| {
            PublishError::Failed(CredentialError::Create {
                path: parent.to_path_buf(),
                source,
            })
        })?;
    }

    let scratch = scratch_path(path);
    let result = write_private(&scratch, credential.expose()).and_then(|()| {
        fs::hard_link(&scratch, path).map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                PublishError::Exists
            } else {
                PublishError::Failed(CredentialError::Create {
                    path: path.to_path_buf(),
                    source,
                })
            }
        })
    });

    if let Err(e) = fs::remove_file(&scratch) {
        debug!(error = %e, scratch = %scratch.display(), "failed to remove credential scratch file");
    }

    result
}

fn write_private(scratch: &Path, value: &str) -> Result<(), PublishError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(scratch).map_err(|source| {
        PublishError::Failed(CredentialError::Create {
            path: scratch.to_path_buf(),
            source,
        })
    })?;

    file.write_all(value.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|source| {
            PublishError::Failed(CredentialError::Write {
                path: scratch.to_path_buf(),
                source,
            })
        })
}

fn scratch_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credential".to_string());
    path.with_file_name(format!(
        "{name}.{}.{:08x}.tmp",
        process::id(),
        rand::random::<u32>()
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    #[test]
    fn generated_credentials_have_requested_length_and_alphabet() {
        for len in [1, 8, 10, 31, 32, 33, 64] {
            let c = generate(len).unwrap();
            assert_eq!(c.expose().len(), len);
            assert!(c
                .expose()
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'));
        }
        assert_ne!(generate(32).unwrap(), generate(32).unwrap());
    }

    #[test]
    fn first_run_generates_and_second_run_reuses() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".pgpassword");

        let first = get_or_create(&path).unwrap();
        let second = get_or_create(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.expose().len(), CREDENTIAL_LEN);
        assert_eq!(fs::read_to_string(&path).unwrap(), first.expose());
    }

    #[test]
    fn creates_missing_parent_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/dir/.pgpassword");

        get_or_create(&path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn existing_value_is_trimmed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".pgpassword");
        fs::write(&path, "  operator-chosen\n").unwrap();

        assert_eq!(get_or_create(&path).unwrap().expose(), "operator-chosen");
    }

    #[test]
    fn whitespace_only_file_is_corrupt_and_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".pgpassword");
        fs::write(&path, " \n\t ").unwrap();

        let err = get_or_create(&path).unwrap_err();
        assert!(matches!(err, CredentialError::Corrupt { .. }), "{err:?}");
        assert_eq!(fs::read_to_string(&path).unwrap(), " \n\t ");
    }

    #[test]
    fn concurrent_first_runs_agree_on_one_value() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Arc::new(tmp.path().join(".pgpassword"));
        let callers = 8;
        let barrier = Arc::new(Barrier::new(callers));

        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    get_or_create(&path).unwrap()
                })
            })
            .collect();

        let values: Vec<Credential> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let on_disk = fs::read_to_string(path.as_path()).unwrap();
        assert!(values.iter().all(|v| v.expose() == on_disk));
    }

    #[test]
    fn leaves_no_scratch_files_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".pgpassword");
        get_or_create(&path).unwrap();

        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_read_write_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".pgpassword");
        get_or_create(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn debug_does_not_reveal_secret() {
        let c = generate(32).unwrap();
        assert!(!format!("{c:?}").contains(c.expose()));
    }
}
