//! Group commit of transactions into the log.
//!
//! Callers enqueue their encoded transaction and wait. Whenever no round is being
//! written, one waiting caller becomes the writer for everything queued so far: it
//! assigns ids, writes all entries with one `write_all`, forces once and hands every
//! caller of the round its result. Queued callers that arrive during a round form the
//! next one.

use crate::error::{Error, Result};
use crate::health::HealthRegister;
use crate::log::entry::{encode_entry, encoded_len};
use crate::log::{ActiveSegmentGuard, LogPosition, LogSegmentStore, TransactionIdStore};
use crate::tx::{CommandCodec, Committed, TransactionRepresentation};
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

pub struct TransactionAppender {
    log: Arc<LogSegmentStore>,
    codec: Arc<dyn CommandCodec>,
    health: Arc<HealthRegister>,
    tx_ids: Arc<dyn TransactionIdStore>,
    queue: Mutex<Queue>,
    round_done: Condvar,
}

struct Queue {
    next_ticket: u64,
    pending: Vec<Pending>,
    writing: bool,
    results: HashMap<u64, Result<Committed>>,
}

struct Pending {
    ticket: u64,
    timestamp: u64,
    payload: Vec<u8>,
}

impl TransactionAppender {
    /// Appender over a full log context. Health and the id source come from the context.
    pub fn new(log: Arc<LogSegmentStore>, codec: Arc<dyn CommandCodec>) -> Result<Self> {
        let tx_ids = log.context().transaction_id_store()?.clone();
        let health = log.context().health().clone();
        Ok(TransactionAppender {
            log,
            codec,
            health,
            tx_ids,
            queue: Mutex::new(Queue {
                next_ticket: 0,
                pending: Vec::new(),
                writing: false,
                results: HashMap::new(),
            }),
            round_done: Condvar::new(),
        })
    }

    pub fn health(&self) -> &Arc<HealthRegister> {
        &self.health
    }

    pub fn log(&self) -> &Arc<LogSegmentStore> {
        &self.log
    }

    /// The most recent durable commit, or the base id if nothing has been committed.
    pub fn last_committed(&self) -> Committed {
        Committed {
            tx_id: self.tx_ids.last_committed_transaction_id(),
            position: self.tx_ids.last_committed_position(),
        }
    }

    /// Durably appends `transaction`, returning its id and the position of its entry.
    ///
    /// Blocks until the round holding the transaction is forced. Every failure is
    /// returned as [`Error::Append`] with the fault as its source.
    pub fn append(&self, transaction: &TransactionRepresentation) -> Result<Committed> {
        self.health.assert_healthy().map_err(append_error)?;
        let payload = self.codec.encode(&transaction.commands).map_err(append_error)?;

        let mut queue = self.queue.lock();
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        queue.pending.push(Pending {
            ticket,
            timestamp: transaction.timestamp,
            payload,
        });

        loop {
            if let Some(result) = queue.results.remove(&ticket) {
                return result;
            }
            if !queue.writing && !queue.pending.is_empty() {
                queue.writing = true;
                let round = std::mem::take(&mut queue.pending);
                drop(queue);

                let outcome = self.write_round(&round);

                queue = self.queue.lock();
                match outcome {
                    Ok(committed) => {
                        for (pending, committed) in round.iter().zip(committed) {
                            queue.results.insert(pending.ticket, Ok(committed));
                        }
                    }
                    Err(err) => {
                        for pending in &round {
                            queue.results.insert(pending.ticket, Err(err.clone()));
                        }
                    }
                }
                queue.writing = false;
                self.round_done.notify_all();
            } else {
                self.round_done.wait(&mut queue);
            }
        }
    }

    /// Writes one round. On failure every member gets the same error and, unless the
    /// database had already panicked, health is panicked with the fault.
    fn write_round(&self, round: &[Pending]) -> Result<Vec<Committed>> {
        let mut segment = self.log.lock_active().map_err(append_error)?;
        self.health.assert_healthy().map_err(append_error)?;

        let mut rollback_to = None;
        match self.write_locked(&mut segment, round, &mut rollback_to) {
            Ok(committed) => {
                for c in &committed {
                    self.tx_ids.transaction_committed(c.tx_id, c.position);
                }
                debug!(
                    "group commit of {} transactions ending at tx {}",
                    committed.len(),
                    committed.last().map(|c| c.tx_id).unwrap_or_default()
                );
                Ok(committed)
            }
            Err(fault) => {
                if let Some(offset) = rollback_to {
                    if let Err(e) = segment.truncate(offset) {
                        warn!("could not cut failed round back to offset {}: {}", offset, e);
                    }
                }
                error!(
                    "append round of {} transactions failed: {}",
                    round.len(),
                    fault
                );
                let cause = Arc::new(fault);
                self.health.panic(cause.clone());
                Err(Error::Append { cause })
            }
        }
    }

    fn write_locked(
        &self,
        segment: &mut ActiveSegmentGuard<'_>,
        round: &[Pending],
        rollback_to: &mut Option<u64>,
    ) -> Result<Vec<Committed>> {
        let round_len: u64 = round.iter().map(|p| encoded_len(p.payload.len())).sum();
        if segment.rotation_needed(round_len)? {
            segment.rotate()?;
        }

        let start = segment.position()?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(round_len as usize)?;
        let mut committed = Vec::new();
        committed.try_reserve_exact(round.len())?;

        let mut tx_id = self.tx_ids.last_committed_transaction_id();
        let mut offset = start.offset;
        for pending in round {
            tx_id += 1;
            committed.push(Committed {
                tx_id,
                position: LogPosition::new(start.version, offset),
            });
            encode_entry(&mut buf, tx_id, pending.timestamp, &pending.payload)?;
            offset += encoded_len(pending.payload.len());
        }

        *rollback_to = Some(start.offset);
        segment.write_all(&buf)?;
        segment.force()?;
        Ok(committed)
    }
}

fn append_error(err: Error) -> Error {
    Error::Append {
        cause: Arc::new(err),
    }
}
