//! One interactive process behind a serialized PTY surface.
//!
//! A session owns exactly one PTY pair and child process. All writes
//! pass through one async mutex, so no two callers' bytes interleave
//! in the channel. Exactly one background task drains the PTY output
//! into the session's buffer; callers only ever snapshot that buffer.
//! Resizes are debounced so a burst of window-drag notifications
//! collapses into one underlying resize.

use std::{
    io::{Read, Write},
    path::PathBuf,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

const READ_BUFFER_SIZE: usize = 8192;

/// Bound on waiting for the reader's final append during close. The
/// master only reaches EOF once every slave fd is closed, and a
/// descendant of the child may still hold one.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// PTY session error.
#[derive(Debug, Error)]
pub enum PtyError {
    /// The session is past its `Closing` state; re-establish a session.
    #[error("Session is closed")]
    Closed,
    /// The PTY or child process could not be set up.
    #[error("PTY spawn failed: {0}")]
    Spawn(String),
    /// The underlying channel failed; the session moves toward `Closing`.
    #[error("PTY channel error: {0}")]
    Channel(#[from] std::io::Error),
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Spawn requested, channel not yet attached.
    Starting,
    /// Idle, accepting input and resize.
    Ready,
    /// An input cycle is in flight.
    Busy,
    /// Close requested; new input/resize rejected, in-flight operations
    /// allowed to finish.
    Closing,
    /// Process exited or terminated, channel released.
    Closed,
}

/// Session configuration, resolved at construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
    /// Quiet period before a requested resize is applied to the PTY.
    pub resize_debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: crate::shell::default_interactive_shell(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            cols: 80,
            rows: 24,
            resize_debounce: Duration::from_millis(50),
        }
    }
}

impl SessionConfig {
    /// Configuration for a specific program instead of the default shell.
    #[must_use]
    pub fn command(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }
}

struct ResizeState {
    desired: PtySize,
    generation: u64,
    scheduled: bool,
}

struct Inner {
    id: Uuid,
    state: Mutex<SessionState>,
    /// Serialization point for writes and applied resizes.
    io_lock: tokio::sync::Mutex<()>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    output: Mutex<Vec<u8>>,
    output_notify: Notify,
    /// Set when the reader task has drained the channel to EOF.
    eof: AtomicBool,
    resize: Mutex<ResizeState>,
    resize_debounce: Duration,
    applied_resizes: AtomicUsize,
    applied_size: Mutex<Option<(u16, u16)>>,
}

impl Inner {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn ensure_open(&self) -> Result<(), PtyError> {
        match self.state() {
            SessionState::Closing | SessionState::Closed => Err(PtyError::Closed),
            _ => Ok(()),
        }
    }

    /// Return to `Ready` after an input cycle, unless a close crept in.
    fn restore_ready(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::Busy {
            *state = SessionState::Ready;
        }
    }

    fn begin_closing(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SessionState::Closed {
            *state = SessionState::Closing;
        }
    }

    async fn debounce_resize(self: Arc<Self>) {
        let mut seen = {
            self.resize
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .generation
        };
        loop {
            tokio::time::sleep(self.resize_debounce).await;
            let desired = {
                let mut resize = self.resize.lock().unwrap_or_else(PoisonError::into_inner);
                if resize.generation != seen {
                    // Not quiet yet; keep waiting for the burst to settle.
                    seen = resize.generation;
                    continue;
                }
                // Cleared under the same lock as the read of `desired`:
                // a request landing after this point sees
                // `scheduled == false` and schedules its own task, so
                // the last requested dimensions are never lost.
                resize.scheduled = false;
                resize.desired
            };

            let _io = self.io_lock.lock().await;
            if matches!(self.state(), SessionState::Closing | SessionState::Closed) {
                return;
            }
            let master = self.master.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(master) = master.as_ref() {
                match master.resize(desired) {
                    Ok(()) => {
                        self.applied_resizes.fetch_add(1, Ordering::Relaxed);
                        *self
                            .applied_size
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) =
                            Some((desired.cols, desired.rows));
                        tracing::debug!(
                            session = %self.id,
                            cols = desired.cols,
                            rows = desired.rows,
                            "applied pty resize"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(session = %self.id, %error, "pty resize failed");
                    }
                }
            }
            return;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Never leave the child orphaned if the session is dropped
        // without an explicit close.
        if let Some(mut child) = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = child.kill();
        }
    }
}

/// A managed interactive process and its bidirectional byte channel.
///
/// Cheap to clone; all clones refer to the same session.
#[derive(Clone)]
pub struct PtySession {
    inner: Arc<Inner>,
}

impl PtySession {
    /// Allocate a PTY, spawn the configured program, and start the
    /// single output reader task.
    ///
    /// # Errors
    /// [`PtyError::Spawn`] if PTY allocation or process spawn fails.
    pub fn spawn(config: SessionConfig) -> Result<Self, PtyError> {
        let id = Uuid::new_v4();
        let size = PtySize {
            rows: config.rows,
            cols: config.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.program);
        cmd.args(&config.args);
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        let inner = Arc::new(Inner {
            id,
            state: Mutex::new(SessionState::Starting),
            io_lock: tokio::sync::Mutex::new(()),
            writer: Mutex::new(Some(writer)),
            master: Mutex::new(Some(pair.master)),
            child: Mutex::new(Some(child)),
            reader: Mutex::new(None),
            output: Mutex::new(Vec::new()),
            output_notify: Notify::new(),
            eof: AtomicBool::new(false),
            resize: Mutex::new(ResizeState {
                desired: size,
                generation: 0,
                scheduled: false,
            }),
            resize_debounce: config.resize_debounce,
            applied_resizes: AtomicUsize::new(0),
            applied_size: Mutex::new(None),
        });

        // The one and only reader. Appends to the buffer until EOF.
        let reader_inner = Arc::clone(&inner);
        let handle = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        reader_inner
                            .output
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&buf[..n]);
                        reader_inner.output_notify.notify_waiters();
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
            reader_inner.eof.store(true, Ordering::SeqCst);
            reader_inner.output_notify.notify_waiters();
        });
        *inner.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        inner.set_state(SessionState::Ready);
        tracing::debug!(session = %id, program = %config.program.display(), "pty session ready");
        Ok(Self { inner })
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Whether the session still accepts input and resize.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(
            self.inner.state(),
            SessionState::Closing | SessionState::Closed
        )
    }

    /// Write bytes to the process's stdin.
    ///
    /// Serialized against every other write and against resize
    /// application; the bytes reach the channel as one unit.
    ///
    /// # Errors
    /// [`PtyError::Closed`] past `Closing`; [`PtyError::Channel`] on an
    /// underlying write failure, which moves the session toward
    /// `Closing`.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), PtyError> {
        self.inner.ensure_open()?;
        let _io = self.inner.io_lock.lock().await;
        // A close may have slipped in while we waited for the lock.
        self.inner.ensure_open()?;
        self.inner.set_state(SessionState::Busy);

        let result = {
            // Move the blocking write off the async threads; the io_lock
            // guarantees nobody else touches the writer concurrently.
            let inner = Arc::clone(&self.inner);
            let bytes = bytes.to_vec();
            tokio::task::spawn_blocking(move || {
                let mut writer = inner.writer.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(writer) = writer.as_mut() else {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "pty writer released",
                    ));
                };
                writer.write_all(&bytes)?;
                writer.flush()
            })
            .await
            .map_err(|e| PtyError::Channel(std::io::Error::other(e)))?
        };

        match result {
            Ok(()) => {
                self.inner.restore_ready();
                Ok(())
            }
            Err(error) => {
                tracing::warn!(session = %self.inner.id, %error, "pty write failed, closing");
                self.inner.begin_closing();
                Err(PtyError::Channel(error))
            }
        }
    }

    /// Request new terminal dimensions.
    ///
    /// The desired size is recorded immediately; the underlying resize
    /// is applied only after a quiet debounce window, so a burst of
    /// calls results in exactly one resize with the last dimensions.
    ///
    /// # Errors
    /// [`PtyError::Closed`] past `Closing`.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.inner.ensure_open()?;
        let mut resize = self
            .inner
            .resize
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        resize.desired = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        resize.generation += 1;
        if !resize.scheduled {
            resize.scheduled = true;
            tokio::spawn(Arc::clone(&self.inner).debounce_resize());
        }
        Ok(())
    }

    /// The most recently requested dimensions as `(cols, rows)`.
    #[must_use]
    pub fn dimensions(&self) -> (u16, u16) {
        let resize = self
            .inner
            .resize
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        (resize.desired.cols, resize.desired.rows)
    }

    /// How many resizes actually reached the PTY. Diagnostic.
    #[must_use]
    pub fn applied_resize_count(&self) -> usize {
        self.inner.applied_resizes.load(Ordering::Relaxed)
    }

    /// The dimensions most recently applied to the PTY as
    /// `(cols, rows)`, if any resize has been applied. Diagnostic.
    #[must_use]
    pub fn applied_dimensions(&self) -> Option<(u16, u16)> {
        *self
            .inner
            .applied_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of everything the process has emitted so far.
    #[must_use]
    pub fn output_snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(
            &self
                .inner
                .output
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Current length of the accumulated output buffer.
    #[must_use]
    pub fn output_len(&self) -> usize {
        self.inner
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait until at least `min_len` bytes have accumulated, the
    /// channel reaches EOF, or the session closes. Returns the buffer
    /// length at that point.
    pub async fn wait_for_output(&self, min_len: usize) -> usize {
        loop {
            let notified = self.inner.output_notify.notified();
            let len = self.output_len();
            if len >= min_len || self.inner.eof.load(Ordering::SeqCst) || !self.is_open() {
                return len;
            }
            notified.await;
        }
    }

    /// Close the session: wait out the in-flight write, terminate the
    /// process, wait (bounded) for the reader's final append, release
    /// the channel.
    ///
    /// Idempotent; closing an already-closed session is a no-op success.
    ///
    /// # Errors
    /// Currently infallible; the signature leaves room for reporting
    /// teardown failures.
    pub async fn close(&self) -> Result<(), PtyError> {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closing;
        }
        tracing::debug!(session = %self.inner.id, "closing pty session");

        // Waits out any in-flight write or resize application.
        let _io = self.inner.io_lock.lock().await;

        if let Some(mut child) = self
            .inner
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = child.kill();
                let _ = child.wait();
            })
            .await;
        }

        // Releasing the channel ends the reader at EOF; wait for its
        // current append to land before declaring the session closed.
        *self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        *self
            .inner
            .master
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        let reader = self
            .inner
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = reader {
            // A background process left behind by the child can keep a
            // slave fd open, in which case the reader never sees EOF;
            // close() must complete regardless.
            if tokio::time::timeout(READER_JOIN_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    session = %self.inner.id,
                    "pty reader did not reach eof, abandoning it"
                );
                handle.abort();
            }
        }

        self.inner.set_state(SessionState::Closed);
        self.inner.output_notify.notify_waiters();
        tracing::debug!(session = %self.inner.id, "pty session closed");
        Ok(())
    }
}
