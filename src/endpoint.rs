use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::info;

#[derive(Debug, Error)]
pub enum EndpointError {
    /// Another group host owns this endpoint; the caller must abort startup
    /// and leave the existing listener alone.
    #[error("another group host is already listening on '{}'", path.display())]
    InUse {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not bind group endpoint '{}'", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Listen on `path` if no process is already listening there.
///
/// Socket files outlive the process that bound them, so after a crash the
/// endpoint file is left behind and a plain bind fails even though nobody
/// owns the address. Three situations have to be told apart:
///
/// 1. The endpoint does not exist yet: the bind simply succeeds.
/// 2. The endpoint file exists but nothing is listening (a stale leftover):
///    remove the file and bind again.
/// 3. Another process is listening: fail with [`EndpointError::InUse`] so
///    the caller can abort and leave the running group to handle requests.
///
/// Liveness is probed through the kernel's open-socket table rather than
/// any broker-side state, since the previous owner is by definition gone.
pub fn bind_group_endpoint(path: &Path) -> Result<UnixListener, EndpointError> {
    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(bind_err) => {
            let probe = std::fs::read_to_string("/proc/net/unix").unwrap_or_default();
            if endpoint_has_listener(&probe, path) {
                return Err(EndpointError::InUse {
                    path: path.to_path_buf(),
                    source: bind_err,
                });
            }

            info!(endpoint = %path.display(), "reclaiming stale group endpoint");
            std::fs::remove_file(path).map_err(|err| EndpointError::Bind {
                path: path.to_path_buf(),
                source: err,
            })?;
            UnixListener::bind(path).map_err(|err| EndpointError::Bind {
                path: path.to_path_buf(),
                source: err,
            })
        }
    }
}

/// Whether the open-socket table lists a live endpoint bound to `path`.
/// `probe` is the text of `/proc/net/unix`; bound paths sit in the last
/// column, so a live endpoint shows up as a line ending in the path.
fn endpoint_has_listener(probe: &str, path: &Path) -> bool {
    let needle = path.to_string_lossy();
    probe.lines().any(|line| line.ends_with(needle.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_matches_exact_path_suffix() {
        let probe = "Num       RefCount Protocol Flags    Type St Inode Path\n\
                     0000000000000000: 00000002 00000000 00010000 0001 01 12345 /tmp/grouphost-a-1-x64.sock\n\
                     0000000000000000: 00000002 00000000 00010000 0001 01 12346 @/abstract/socket\n";
        assert!(endpoint_has_listener(
            &probe,
            Path::new("/tmp/grouphost-a-1-x64.sock")
        ));
        assert!(!endpoint_has_listener(
            &probe,
            Path::new("/tmp/grouphost-b-1-x64.sock")
        ));
    }

    #[tokio::test]
    async fn reclaims_a_stale_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grouphost-stale-1-x64.sock");

        // a listener that went away without cleaning up its socket file
        let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());

        let listener = bind_group_endpoint(&path).unwrap();
        drop(listener);
    }

    #[tokio::test]
    async fn refuses_an_endpoint_with_a_live_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grouphost-live-1-x64.sock");

        let owner = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let err = bind_group_endpoint(&path).unwrap_err();
        assert!(matches!(err, EndpointError::InUse { .. }));

        // the existing listener is left undisturbed
        let probe = std::os::unix::net::UnixStream::connect(&path);
        assert!(probe.is_ok());
        drop(owner);
    }
}
