//! Frame loop for blocking camera backends. The device is read on its own
//! thread for the whole session and frames are handed out on request.

use std::sync::mpsc::{Receiver, TryRecvError};

use image::RgbImage;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::errors::AppResult;

pub(crate) type FrameReply = oneshot::Sender<AppResult<RgbImage>>;

/// Reads frames until every request sender is dropped.
///
/// `grab(true)` returns the next converted frame; `grab(false)` dequeues one
/// without converting it, which keeps the driver queue fresh while nobody is
/// asking. A request is answered with the first frame grabbed after it was
/// received. A grab error ends the loop and is handed to the pending
/// request, or to the next one if none is pending.
pub(crate) fn serve_frames<G>(mut grab: G, requests: Receiver<FrameReply>)
where
    G: FnMut(bool) -> AppResult<Option<RgbImage>>,
{
    let mut waiting: Vec<FrameReply> = Vec::new();
    loop {
        loop {
            match requests.try_recv() {
                Ok(reply) => waiting.push(reply),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("frame source dropped; stopping capture loop");
                    return;
                }
            }
        }
        waiting.retain(|reply| !reply.is_closed());

        match grab(!waiting.is_empty()) {
            Ok(Some(image)) => {
                for reply in waiting.drain(..) {
                    let _ = reply.send(Ok(image.clone()));
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!(error = %err, "capture loop failed");
                let reply = waiting.pop().or_else(|| requests.recv().ok());
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err));
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    /// Simulated camera: every grab is one new frame whose width is its
    /// sequence number. Only wanted frames are converted.
    fn camera(grabbed: Arc<AtomicU32>) -> impl FnMut(bool) -> AppResult<Option<RgbImage>> {
        move |wanted| {
            let seq = grabbed.fetch_add(1, Ordering::SeqCst) + 1;
            thread::sleep(Duration::from_millis(1));
            Ok(wanted.then(|| RgbImage::new(seq, 1)))
        }
    }

    #[test]
    fn request_gets_a_frame_grabbed_after_it() {
        let grabbed = Arc::new(AtomicU32::new(0));
        let (requests, incoming) = mpsc::channel();
        let grab = camera(Arc::clone(&grabbed));
        let handle = thread::spawn(move || serve_frames(grab, incoming));

        for _ in 0..3 {
            thread::sleep(Duration::from_millis(10));
            let before = grabbed.load(Ordering::SeqCst);
            let (reply, frame) = oneshot::channel();
            requests.send(reply).unwrap();
            let frame = frame.blocking_recv().unwrap().unwrap();
            assert!(frame.width() > before, "served {} after {before}", frame.width());
        }
        // Frames kept flowing between requests.
        assert!(grabbed.load(Ordering::SeqCst) > 3);

        drop(requests);
        handle.join().unwrap();
    }

    #[test]
    fn abandoned_requests_are_skipped() {
        let grabbed = Arc::new(AtomicU32::new(0));
        let (requests, incoming) = mpsc::channel();
        let (abandoned, dropped) = oneshot::channel();
        drop(dropped);
        requests.send(abandoned).unwrap();
        let (reply, frame) = oneshot::channel();
        requests.send(reply).unwrap();
        let handle = thread::spawn(move || serve_frames(camera(grabbed), incoming));

        assert!(frame.blocking_recv().unwrap().is_ok());

        drop(requests);
        handle.join().unwrap();
    }

    #[test]
    fn grab_failure_is_reported_to_the_next_request() {
        let (requests, incoming) = mpsc::channel();
        let handle = thread::spawn(move || {
            serve_frames(
                |_| {
                    Err(AppError::FrameCapture {
                        device: "/dev/video0".into(),
                        message: "device unplugged".into(),
                    })
                },
                incoming,
            )
        });

        let (reply, frame) = oneshot::channel();
        requests.send(reply).unwrap();
        let err = frame.blocking_recv().unwrap().unwrap_err();

        assert!(matches!(err, AppError::FrameCapture { message, .. } if message == "device unplugged"));
        handle.join().unwrap();
        let (reply, _frame) = oneshot::channel();
        assert!(requests.send(reply).is_err());
    }
}
