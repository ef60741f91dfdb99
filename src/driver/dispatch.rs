//! The serial dispatch queue (§5): a dedicated OS thread that owns all generator mutable state,
//! realising the source's cooperative single-executor model without introducing real concurrency
//! into the mutation path.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A command posted to the dispatch thread. Boxed so the channel stays a fixed-size handle
/// regardless of what a caller captures in its closure.
type Command = Box<dyn FnOnce() + Send + 'static>;

/// A dedicated thread draining a command queue in order, one at a time, with no interleaving --
/// the hosted analogue of a bare-metal cooperative executor.
pub struct DispatchQueue {
    /// `None` once the queue has been torn down: the dispatch thread only exits once every
    /// `Sender` is dropped, so tearing down must drop this field itself, not a clone of it.
    sender: Option<mpsc::Sender<Command>>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchQueue {
    /// Spawns the dispatch thread. `tick` is invoked between drains of the command queue, at most
    /// once per `tick_interval`, for periodic work (the watchdog, deferred stream-progress
    /// checks) that must also run without interleaving mutation commands.
    pub fn spawn<F>(tick_interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Command>();
        let handle = std::thread::Builder::new()
            .name("dcc-gen-dispatch".to_owned())
            .spawn(move || loop {
                match receiver.recv_timeout(tick_interval) {
                    Ok(command) => command(),
                    Err(mpsc::RecvTimeoutError::Timeout) => tick(),
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("failed to spawn dispatch thread");

        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// Posts `command` to run on the dispatch thread, without waiting for it to run.
    pub fn post(&self, command: impl FnOnce() + Send + 'static) {
        // The receiver only disconnects once this queue is torn down, at which point nobody can
        // call `post` anymore; a missing sender or a send failure here would be a programmer error.
        let sender = self.sender.as_ref().expect("post called after dispatch queue was torn down");
        let _ = sender.send(Box::new(command));
    }

    /// Posts `command` and blocks the caller until it has run, returning its result.
    pub fn post_and_wait<T, F>(&self, command: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.post(move || {
            let _ = reply_tx.send(command());
        });
        reply_rx.recv().expect("dispatch thread dropped the reply channel before responding")
    }

    /// Stops the dispatch thread once its queue has drained, joining it. The hosted equivalent of
    /// draining a wait group of scheduled deferred checks before shutdown completes.
    pub fn drain_and_stop(mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
