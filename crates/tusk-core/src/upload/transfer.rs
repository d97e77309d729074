//! Bounded pool of chunk workers for one upload.
//!
//! Workers pull chunks from a shared queue and send them (with retry); the
//! calling thread owns the ledger and reports each advance of the contiguous
//! confirmed offset. After the first terminal failure the queue is drained
//! and no new chunk is started; chunks already in flight run to completion.
//!
//! A single session only accepts bytes at its current offset, so chunks for
//! [`ChunkTarget::Session`] go out one at a time. Parallel transfers use one
//! partial session per chunk ([`ChunkTarget::Partials`]).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use crate::retry::{run_with_retry, RequestError, RetryPolicy};
use crate::transport::ProgressHandler;

use super::chunk::{Chunk, ChunkLedger};
use super::partial::PartialSet;
use super::payload::Payload;
use super::session::{ResumeProbe, SessionClient};

/// A chunk that could not be delivered.
#[derive(Debug)]
pub struct ChunkFailure {
    pub chunk: Chunk,
    /// The request that gave up, e.g. `PATCH <url> @<offset> [<start>, <end>)`.
    pub request: String,
    pub attempts: u32,
    pub error: RequestError,
}

struct Outcome {
    chunk: Chunk,
    request: String,
    attempts: u32,
    result: Result<(), RequestError>,
}

/// Where chunk bytes are sent.
#[derive(Clone, Copy)]
pub enum ChunkTarget<'a> {
    /// One session; each chunk is PATCHed at its payload offset, in order.
    Session(&'a str),
    /// One partial session per chunk, created on demand.
    Partials(&'a PartialSet),
}

pub struct ChunkTransfer<'a> {
    pub client: &'a SessionClient,
    pub target: ChunkTarget<'a>,
    pub payload: &'a dyn Payload,
    pub policy: &'a RetryPolicy,
    pub parallel: usize,
}

impl ChunkTransfer<'_> {
    /// Upload the `pending` chunks of `ledger`'s plan. `on_advance(confirmed,
    /// in_flight)` is called each time the contiguous confirmed offset moves
    /// forward.
    pub fn run<F>(
        &self,
        ledger: &mut ChunkLedger,
        pending: Vec<Chunk>,
        mut on_advance: F,
    ) -> Result<u64, ChunkFailure>
    where
        F: FnMut(u64, u64),
    {
        let count = pending.len();
        if count == 0 {
            return Ok(ledger.confirmed_offset());
        }
        let num_workers = match self.target {
            ChunkTarget::Session(_) => 1,
            ChunkTarget::Partials(_) => self.parallel.max(1).min(count),
        };
        let work: Mutex<VecDeque<Chunk>> = Mutex::new(pending.into_iter().collect());
        let stop = AtomicBool::new(false);
        let in_flight: Arc<Vec<AtomicU64>> =
            Arc::new((0..num_workers).map(|_| AtomicU64::new(0)).collect());
        let (tx, rx) = mpsc::channel::<Outcome>();

        std::thread::scope(|scope| {
            for worker in 0..num_workers {
                let tx = tx.clone();
                let work = &work;
                let stop = &stop;
                let in_flight = Arc::clone(&in_flight);
                scope.spawn(move || loop {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let chunk = match work.lock().unwrap().pop_front() {
                        Some(c) => c,
                        None => break,
                    };
                    let outcome = self.send_one(chunk, stop, &in_flight, worker);
                    in_flight[worker].store(0, Ordering::Relaxed);
                    let failed = outcome.result.is_err();
                    if tx.send(outcome).is_err() {
                        break;
                    }
                    if failed {
                        stop.store(true, Ordering::SeqCst);
                    }
                });
            }
            drop(tx);

            let mut failure: Option<ChunkFailure> = None;
            let mut to_receive = count;
            while to_receive > 0 {
                let Outcome {
                    chunk,
                    request,
                    attempts,
                    result,
                } = match rx.recv() {
                    Ok(o) => o,
                    Err(_) => break,
                };
                to_receive -= 1;
                match result {
                    Ok(()) => {
                        tracing::debug!(index = chunk.index, start = chunk.start, end = chunk.end, attempts, "chunk confirmed");
                        if let Some(offset) = ledger.confirm(chunk.index) {
                            let sending: u64 = in_flight.iter().map(|b| b.load(Ordering::Relaxed)).sum();
                            on_advance(offset, sending);
                        }
                    }
                    Err(error) => {
                        stop.store(true, Ordering::Relaxed);
                        let drained = {
                            let mut q = work.lock().unwrap();
                            let n = q.len();
                            q.clear();
                            n
                        };
                        to_receive = to_receive.saturating_sub(drained);
                        tracing::warn!(index = chunk.index, start = chunk.start, attempts, %error, drained, "chunk failed, stopping upload");
                        if failure.is_none() {
                            failure = Some(ChunkFailure {
                                chunk,
                                request,
                                attempts,
                                error,
                            });
                        }
                    }
                }
            }

            match failure {
                Some(f) => Err(f),
                None if ledger.all_confirmed() => Ok(ledger.confirmed_offset()),
                None => {
                    let at = ledger.confirmed_offset();
                    Err(ChunkFailure {
                        chunk: Chunk { index: 0, start: at, end: at },
                        request: "chunk worker".into(),
                        attempts: 0,
                        error: RequestError::Protocol("chunk worker exited without reporting".into()),
                    })
                }
            }
        })
    }

    fn send_one(
        &self,
        chunk: Chunk,
        stop: &AtomicBool,
        in_flight: &Arc<Vec<AtomicU64>>,
        worker: usize,
    ) -> Outcome {
        let outcome = |request: String, attempts: u32, result: Result<(), RequestError>| Outcome {
            chunk,
            request,
            attempts,
            result,
        };

        // (session url, session offset of chunk byte 0, bytes the session already holds, session length)
        let (url, base, mut held, session_len) = match self.target {
            ChunkTarget::Session(url) => (url.to_string(), chunk.start, 0, self.payload.len()),
            ChunkTarget::Partials(parts) => {
                let slot = parts.slot(chunk.index);
                match slot.url {
                    Some(url) => (url, 0, slot.offset.min(chunk.len()), chunk.len()),
                    None => {
                        let what = format!("POST partial [{}, {})", chunk.start, chunk.end);
                        let mut attempts = 0u32;
                        let created = run_with_retry(self.policy, &what, stop, || {
                            attempts += 1;
                            self.client.create_partial(chunk.len())
                        });
                        match created {
                            Ok(url) => {
                                parts.created(chunk.index, &url);
                                (url, 0, 0, chunk.len())
                            }
                            Err(e) => return outcome(what, attempts, Err(e)),
                        }
                    }
                }
            }
        };
        let what = format!("PATCH {} @{} [{}, {})", url, base + held, chunk.start, chunk.end);

        let body = match usize::try_from(chunk.len())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "chunk too large"))
            .and_then(|len| self.payload.read_at(chunk.start, len))
        {
            Ok(b) => b,
            Err(e) => return outcome(what, 0, Err(RequestError::Payload(e))),
        };

        let mut attempts = 0u32;
        let res = run_with_retry(self.policy, &what, stop, || {
            if held >= chunk.len() {
                return Ok(());
            }
            attempts += 1;
            let slots = Arc::clone(in_flight);
            let progress: ProgressHandler =
                Box::new(move |sent: u64| slots[worker].store(sent, Ordering::Relaxed));
            let sent = self
                .client
                .patch(&url, base + held, &body[held as usize..], Some(progress));
            match sent {
                Ok(_) => {
                    held = chunk.len();
                    Ok(())
                }
                Err(RequestError::PartialTransfer { expected, received }) => {
                    held += received;
                    Err(RequestError::PartialTransfer { expected, received })
                }
                Err(RequestError::Http(409)) => {
                    // The session is elsewhere than we think; ask where before retrying.
                    if let Ok(ResumeProbe::Offset(k)) = self.client.probe_offset(&url, session_len) {
                        if (base..=base + chunk.len()).contains(&k) {
                            held = k - base;
                        }
                    }
                    if held >= chunk.len() {
                        Ok(())
                    } else {
                        Err(RequestError::Http(409))
                    }
                }
                Err(e) => Err(e),
            }
        });
        outcome(what, attempts, res)
    }
}
