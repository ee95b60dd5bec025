use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::os::fd::{FromRawFd, RawFd};
use std::thread::JoinHandle;
use tracing::info;

/// Captures everything written to a process-wide output descriptor and
/// relays it line by line through the logger.
///
/// Plugins inherit this process's stdout and stderr and print to them
/// directly, so without the capture that output would bypass the logger
/// entirely. Installing a capture duplicates the current destination (so it
/// can be restored later), redirects the descriptor into a fresh pipe, and
/// hands the pipe's read end to a relay thread. Dropping the capture
/// restores the original destination on every exit path; that also closes
/// the last write end of the pipe, so the relay sees end-of-file and stops
/// on its own.
pub struct StdioCapture {
    target_fd: RawFd,
    original_fd: RawFd,
    relay: Option<JoinHandle<()>>,
}

impl StdioCapture {
    /// Capture the process's stdout, relaying lines as `[STDOUT] …`.
    pub fn stdout() -> io::Result<Self> {
        Self::install(libc::STDOUT_FILENO, "[STDOUT] ")
    }

    /// Capture the process's stderr, relaying lines as `[STDERR] …`.
    pub fn stderr() -> io::Result<Self> {
        Self::install(libc::STDERR_FILENO, "[STDERR] ")
    }

    pub fn install(target_fd: RawFd, prefix: &'static str) -> io::Result<Self> {
        let span = tracing::Span::current();
        Self::install_with(target_fd, move |line| {
            let _entered = span.enter();
            info!("{prefix}{line}");
        })
    }

    /// Install a capture that hands each relayed line to `emit` instead of
    /// the logger. The relay stops silently on end-of-file or a read error;
    /// neither is treated as a failure.
    pub fn install_with<F>(target_fd: RawFd, emit: F) -> io::Result<Self>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let original_fd = unsafe { libc::dup(target_fd) };
        if original_fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut pipe_fds = [0; 2];
        if unsafe { libc::pipe(pipe_fds.as_mut_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(original_fd) };
            return Err(err);
        }
        let [read_fd, write_fd] = pipe_fds;

        if unsafe { libc::dup2(write_fd, target_fd) } < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
                libc::close(original_fd);
            }
            return Err(err);
        }
        // the write side now lives on as `target_fd`
        unsafe { libc::close(write_fd) };

        let reader = unsafe { File::from_raw_fd(read_fd) };
        let relay = std::thread::spawn(move || relay_lines(reader, emit));

        Ok(Self {
            target_fd,
            original_fd,
            relay: Some(relay),
        })
    }
}

impl Drop for StdioCapture {
    fn drop(&mut self) {
        // Restoring the original destination closes the pipe's last write
        // end, which unblocks the relay thread with an end-of-file.
        unsafe {
            libc::dup2(self.original_fd, self.target_fd);
            libc::close(self.original_fd);
        }
        if let Some(relay) = self.relay.take() {
            let _ = relay.join();
        }
    }
}

/// Accumulate bytes from `reader` and emit one callback per complete line,
/// stripped of its terminator. Returns on end-of-file or any read error.
fn relay_lines<R: Read>(reader: R, mut emit: impl FnMut(&str)) {
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) | Err(_) => return,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                emit(line.trim_end_matches(['\n', '\r']));
            }
        }
    }
}
