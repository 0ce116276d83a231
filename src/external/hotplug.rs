//! Blocking wait for HDMI cable events on the driver's `connected` node.

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Connected,
    Disconnected,
    /// The wait was cancelled from another thread, for example during
    /// shutdown. The cable state is unknown.
    Cancelled,
}

/// Poll in one-second slices so cancellation is observed promptly even
/// when the driver never signals.
const POLL_SLICE_MS: i32 = 1000;

/// Blocks until the node signals a state change and reads the new state.
///
/// Sysfs attributes signal changes via `POLLPRI`; the current value is
/// re-read from offset 0 after each wakeup. Returns `Disconnected` on any
/// node error and when `deadline` elapses without a connect.
pub fn wait_for_connect(
    path: &Path,
    cancel: &AtomicBool,
    deadline: Option<Duration>,
) -> ConnectStatus {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!("error opening {}: {err}", path.display());
            return ConnectStatus::Disconnected;
        }
    };

    let start = Instant::now();
    loop {
        if cancel.load(Ordering::Relaxed) {
            debug!("connect wait cancelled");
            return ConnectStatus::Cancelled;
        }
        if deadline.is_some_and(|limit| start.elapsed() >= limit) {
            debug!("connect wait timed out");
            return ConnectStatus::Disconnected;
        }

        let mut pfd = libc::pollfd {
            fd: file.as_raw_fd(),
            events: libc::POLLPRI | libc::POLLERR,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, POLL_SLICE_MS) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!("poll failed on {}: {err}", path.display());
            return ConnectStatus::Disconnected;
        }
        if ret == 0 {
            continue;
        }

        if pfd.revents & libc::POLLPRI != 0 {
            let mut buf = [0u8; 2];
            return match file.read_at(&mut buf, 0) {
                Ok(n) if n > 0 && buf[0] == b'1' => ConnectStatus::Connected,
                Ok(_) => ConnectStatus::Disconnected,
                Err(err) => {
                    warn!("error reading {}: {err}", path.display());
                    ConnectStatus::Disconnected
                }
            };
        }
        if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return ConnectStatus::Disconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_wins_before_polling() {
        let cancel = AtomicBool::new(true);
        let status = wait_for_connect(Path::new("/dev/null"), &cancel, None);
        assert_eq!(status, ConnectStatus::Cancelled);
    }

    #[test]
    fn missing_node_is_disconnected() {
        let cancel = AtomicBool::new(false);
        let status = wait_for_connect(
            Path::new("/nonexistent/connected"),
            &cancel,
            Some(Duration::from_millis(10)),
        );
        assert_eq!(status, ConnectStatus::Disconnected);
    }

    #[test]
    fn deadline_expires_without_event() {
        // A regular file only reports POLLIN, so the wait runs into the
        // deadline.
        let dir = std::env::temp_dir().join(format!("hotplug-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("connected");
        std::fs::write(&path, "0").unwrap();

        let cancel = AtomicBool::new(false);
        let start = Instant::now();
        let status = wait_for_connect(&path, &cancel, Some(Duration::from_millis(0)));
        assert_eq!(status, ConnectStatus::Disconnected);
        assert!(start.elapsed() < Duration::from_secs(2));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
