use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{OwnedMutexGuard, oneshot};

/// A handoff of the peer's read half from the background read loop to
/// whichever caller is waiting for the next stream frame. The read loop
/// sends one of these instead of consuming the `0x02` tag's payload itself,
/// since only the caller knows how many bytes to expect.
pub(crate) struct StreamHandoff {
    pub(crate) guard: OwnedMutexGuard<OwnedReadHalf>,
    pub(crate) resume: oneshot::Sender<OwnedMutexGuard<OwnedReadHalf>>,
}

/// A reader over one stream frame's raw bytes. Reading from this goes
/// straight to the TCP socket; dropping it (after the caller has read
/// exactly as many bytes as it expected, typically via
/// `AsyncReadExt::take`) hands the read half back to the peer's background
/// read loop so it can resume reading message frames.
pub struct StreamBody {
    guard: Option<OwnedMutexGuard<OwnedReadHalf>>,
    resume: Option<oneshot::Sender<OwnedMutexGuard<OwnedReadHalf>>>,
}

impl StreamBody {
    pub(crate) fn new(handoff: StreamHandoff) -> Self {
        Self {
            guard: Some(handoff.guard),
            resume: Some(handoff.resume),
        }
    }
}

impl AsyncRead for StreamBody {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let guard = this
            .guard
            .as_mut()
            .expect("StreamBody polled after being dropped");
        Pin::new(&mut **guard).poll_read(cx, buf)
    }
}

impl Drop for StreamBody {
    fn drop(&mut self) {
        if let (Some(guard), Some(resume)) = (self.guard.take(), self.resume.take()) {
            let _ = resume.send(guard);
        }
    }
}
