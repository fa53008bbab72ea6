//! Recording fake sink used by the supervisor and session tests.
//!
//! Every launched fake process shares one `FakeSinkControl`, which records
//! launches, kills and each write (tagged with the index of the process that
//! received it), and lets a test break the pipe, stall it like a sink that has
//! stopped reading, or report the process as exited.

use crate::error::{SessionError, SessionResult};
use crate::playback::sink::{SinkLauncher, SinkProcess};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use tokio::io::AsyncWrite;

#[derive(Debug, Default)]
pub struct FakeSinkControl {
    launches: AtomicUsize,
    kills: AtomicUsize,
    fail_launch: AtomicBool,
    fail_next_write: AtomicBool,
    exited: AtomicBool,
    stalled: AtomicBool,
    stalled_polls: AtomicUsize,
    waiter: Mutex<Option<Waker>>,
    writes: Mutex<Vec<(usize, Vec<u8>)>>,
}

impl FakeSinkControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launcher(self: &Arc<Self>) -> Arc<dyn SinkLauncher> {
        Arc::new(FakeLauncher {
            control: Arc::clone(self),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn set_fail_launch(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// The next write to any fake process fails with a broken pipe.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Writes stay pending, as if the sink stopped reading and the pipe is full.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Let stalled writes go through again.
    pub fn release(&self) {
        self.stalled.store(false, Ordering::SeqCst);
        if let Some(waker) = self.waiter.lock().unwrap().take() {
            waker.wake();
        }
    }

    /// Times a write was polled while stalled.
    pub fn stalled_polls(&self) -> usize {
        self.stalled_polls.load(Ordering::SeqCst)
    }

    /// Make the current process report that it has exited.
    pub fn set_exited(&self, exited: bool) {
        self.exited.store(exited, Ordering::SeqCst);
    }

    /// All bytes received by any process, in arrival order.
    pub fn written(&self) -> Vec<u8> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }

    /// Size of every individual write, in arrival order.
    pub fn write_sizes(&self) -> Vec<usize> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, bytes)| bytes.len())
            .collect()
    }

    /// Bytes received by the `index`-th launched process.
    pub fn writes_for(&self, index: usize) -> Vec<u8> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(process, _)| *process == index)
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }
}

struct FakeLauncher {
    control: Arc<FakeSinkControl>,
}

impl SinkLauncher for FakeLauncher {
    fn launch(&self) -> SessionResult<Box<dyn SinkProcess>> {
        if self.control.fail_launch.load(Ordering::SeqCst) {
            return Err(SessionError::ProcessSpawn(
                "fake-sink: No such file or directory".to_string(),
            ));
        }

        let index = self.control.launches.fetch_add(1, Ordering::SeqCst);
        self.control.exited.store(false, Ordering::SeqCst);

        Ok(Box::new(FakeSink {
            index,
            control: Arc::clone(&self.control),
            stdin: RecordingPipe {
                index,
                control: Arc::clone(&self.control),
            },
        }))
    }
}

struct FakeSink {
    index: usize,
    control: Arc<FakeSinkControl>,
    stdin: RecordingPipe,
}

impl SinkProcess for FakeSink {
    fn stdin(&mut self) -> &mut (dyn AsyncWrite + Unpin + Send) {
        &mut self.stdin
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.control.exited.load(Ordering::SeqCst))
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.control.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn id(&self) -> Option<u32> {
        Some(10_000 + self.index as u32)
    }
}

struct RecordingPipe {
    index: usize,
    control: Arc<FakeSinkControl>,
}

impl AsyncWrite for RecordingPipe {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.control.stalled.load(Ordering::SeqCst) {
            self.control.stalled_polls.fetch_add(1, Ordering::SeqCst);
            *self.control.waiter.lock().unwrap() = Some(cx.waker().clone());
            return Poll::Pending;
        }

        if self.control.fail_next_write.swap(false, Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Broken pipe (os error 32)",
            )));
        }

        self.control
            .writes
            .lock()
            .unwrap()
            .push((self.index, buf.to_vec()));
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
