// # Async Read Dispatcher
//
// A single dedicated I/O thread services all async read requests for
// OS-backed readers. Callers package a request into a token, push it onto a
// lock-free MPSC queue and release a counting semaphore; the I/O thread
// wakes, performs the positional read and invokes the user callback with the
// byte count, or -1 on error.
//
// Shutdown raises the exit flag and bulk-releases the semaphore; the thread
// drains remaining tokens without dispatching them, completing each with -1.

use crate::file::range::FileRange;
use crate::file::reader::ReadCallback;
use crossbeam::queue::SegQueue;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Send-safe wrapper for the destination pointer carried by a token.
/// The caller of `schedule_async` guarantees the pointed-at buffer stays
/// valid and unaliased until the callback fires.
#[derive(Clone, Copy)]
struct SendPtr(*mut u8);

unsafe impl Send for SendPtr {}

/// Per-request state owned by the I/O thread while a read is in flight.
struct Token {
    file: Arc<File>,
    range: FileRange,
    dest: SendPtr,
    callback: ReadCallback,
    index: u32,
}

/// Dispatcher for async file reads, owning the I/O thread.
pub struct AsyncReadDispatcher {
    shared: Arc<DispatcherShared>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

struct DispatcherShared {
    tokens: SegQueue<Token>,
    wakeup: crate::sync::Semaphore,
    exiting: AtomicBool,
    token_counter: AtomicU32,

    requests: AtomicU64,
    failed: AtomicU64,
    bytes_read: AtomicU64,
}

impl AsyncReadDispatcher {
    pub fn new() -> Self {
        let shared = Arc::new(DispatcherShared {
            tokens: SegQueue::new(),
            wakeup: crate::sync::Semaphore::new(0),
            exiting: AtomicBool::new(false),
            token_counter: AtomicU32::new(1),
            requests: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("io-dispatch".into())
            .spawn(move || io_thread_main(thread_shared))
            .expect("failed to spawn async IO thread");

        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Queue an async read of `range` from `file` into `dest`. The callback
    /// fires exactly once: byte count on success, -1 on error. Empty ranges
    /// complete inline with 0.
    ///
    /// # Safety
    ///
    /// `dest` must point to at least `range.size()` writable bytes and stay
    /// valid, untouched by anything else, until the callback fires.
    pub unsafe fn schedule_async(
        &self,
        file: Arc<File>,
        range: FileRange,
        dest: *mut u8,
        callback: ReadCallback,
    ) {
        if self.shared.exiting.load(Ordering::Acquire) {
            debug_assert!(false, "scheduling IO requests during exit");
            callback(-1);
            return;
        }

        // nothing to read
        if range.is_empty() {
            callback(0);
            return;
        }

        let index = self.shared.token_counter.fetch_add(1, Ordering::Relaxed);
        self.shared.tokens.push(Token {
            file,
            range,
            dest: SendPtr(dest),
            callback,
            index,
        });

        self.shared.wakeup.release(1);
    }
}

impl Default for AsyncReadDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AsyncReadDispatcher {
    fn drop(&mut self) {
        tracing::info!("closing async IO dispatcher");

        self.shared.exiting.store(true, Ordering::Release);
        self.shared.wakeup.release(1000);

        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }

        tracing::info!(
            requests = self.shared.requests.load(Ordering::Relaxed),
            failed = self.shared.failed.load(Ordering::Relaxed),
            bytes_read = self.shared.bytes_read.load(Ordering::Relaxed),
            "closed async IO dispatcher"
        );
    }
}

// ============================================================================
// I/O thread
// ============================================================================

fn io_thread_main(shared: Arc<DispatcherShared>) {
    while !shared.exiting.load(Ordering::Acquire) {
        shared.wakeup.acquire_timeout(Duration::from_millis(10));

        if let Some(token) = shared.tokens.pop() {
            process_token(&shared, token);
        }
    }

    // exit: abort outstanding tokens without dispatching them
    while let Some(token) = shared.tokens.pop() {
        tracing::warn!(index = token.index, "aborting async read at shutdown");
        (token.callback)(-1);
    }
}

fn process_token(shared: &DispatcherShared, token: Token) {
    shared.requests.fetch_add(1, Ordering::Relaxed);

    let size = token.range.size() as usize;
    // Safety: schedule_async's contract keeps dest valid and exclusive for
    // range.size() bytes until the callback runs
    let dest = unsafe { std::slice::from_raw_parts_mut(token.dest.0, size) };

    match read_at_exact(&token.file, dest, token.range.start()) {
        Ok(actual_read) => {
            if actual_read < size as u64 {
                tracing::warn!(
                    index = token.index,
                    read = actual_read,
                    requested = size,
                    "async read truncated"
                );
            }
            shared.bytes_read.fetch_add(actual_read, Ordering::Relaxed);
            (token.callback)(actual_read as i64);
        }
        Err(error) => {
            tracing::error!(index = token.index, %error, "async read failed");
            shared.failed.fetch_add(1, Ordering::Relaxed);
            (token.callback)(-1);
        }
    }
}

/// Positional read loop: keeps reading until the buffer is full or the file
/// ends. Returns the total byte count.
pub(crate) fn read_at_exact(file: &File, dest: &mut [u8], offset: u64) -> std::io::Result<u64> {
    let mut total = 0u64;
    while (total as usize) < dest.len() {
        let chunk = &mut dest[total as usize..];
        let read = positional_read(file, chunk, offset + total)?;
        if read == 0 {
            break;
        }
        total += read as u64;
    }
    Ok(total)
}

#[cfg(unix)]
fn positional_read(file: &File, dest: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(dest, offset)
}

#[cfg(windows)]
fn positional_read(file: &File, dest: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(dest, offset)
}

// ============================================================================
// Process-wide dispatcher
// ============================================================================

static ASYNC_DISPATCHER: Lazy<AsyncReadDispatcher> = Lazy::new(AsyncReadDispatcher::new);

/// The dispatcher shared by all OS-backed readers.
pub fn async_read_dispatcher() -> &'static AsyncReadDispatcher {
    &ASYNC_DISPATCHER
}

// ============================================================================
// Tests
// ============================================================================
