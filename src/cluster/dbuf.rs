//! Two-slot double buffering: render on the caller, fetch on a worker.
//!
//! Frame `N + 1` may render while frame `N` is still being fetched; a slot
//! is only handed back to the renderer once its fetch has finished, so at
//! most two frames are ever in flight.

use std::sync::mpsc::sync_channel;
use std::thread;

use crate::util::Result;

/// Double-buffered frame driver over two frame slots.
pub struct DoubleBuffering<F> {
    slots: [F; 2],
}

impl<F: Send> DoubleBuffering<F> {
    pub fn new(front: F, back: F) -> Self {
        Self {
            slots: [front, back],
        }
    }

    /// Build both slots with `make`.
    pub fn from_fn(mut make: impl FnMut() -> Result<F>) -> Result<Self> {
        Ok(Self::new(make()?, make()?))
    }

    /// Run until `should_stop` returns true.
    ///
    /// `should_stop` is checked before each frame. `render` fills a free
    /// slot for frame `idx`; `fetch` then runs on a worker thread with the
    /// same slot and index. Errors from either stage end the loop after
    /// in-flight fetches drain. Returns the number of frames rendered.
    pub fn run<S, R, H>(self, mut should_stop: S, mut render: R, mut fetch: H) -> Result<u64>
    where
        S: FnMut() -> Result<bool>,
        R: FnMut(&mut F, u64) -> Result<()>,
        H: FnMut(&mut F, u64) -> Result<()> + Send,
    {
        let (free_tx, free_rx) = sync_channel::<F>(2);
        let (full_tx, full_rx) = sync_channel::<(F, u64)>(2);
        for slot in self.slots {
            // capacity 2, cannot block
            let _ = free_tx.send(slot);
        }

        thread::scope(|s| {
            let fetcher = s.spawn(move || -> Result<()> {
                for (mut frame, idx) in full_rx {
                    fetch(&mut frame, idx)?;
                    if free_tx.send(frame).is_err() {
                        break;
                    }
                }
                Ok(())
            });

            let mut frames = 0u64;
            let rendered = loop {
                match should_stop() {
                    Ok(true) => break Ok(frames),
                    Ok(false) => {}
                    Err(e) => break Err(e),
                }
                // Fails only when the fetcher has exited with an error
                let Ok(mut frame) = free_rx.recv() else {
                    break Ok(frames);
                };
                if let Err(e) = render(&mut frame, frames) {
                    break Err(e);
                }
                if full_tx.send((frame, frames)).is_err() {
                    break Ok(frames);
                }
                frames += 1;
            };
            drop(full_tx);

            let fetched = fetcher
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            let frames = rendered?;
            fetched?;
            tracing::debug!(frames, "dbuf: loop finished");
            Ok(frames)
        })
    }
}
