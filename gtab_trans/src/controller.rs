/// Coordination of block projection between tasks
///
/// The reader runs in the calling thread and hands blocks out to a pool of process tasks
/// (threads) over a bounded job channel.  Each job carries its own single slot reply channel,
/// and the controller keeps the reply channels in dispatch order.  When the number of jobs in
/// flight reaches the pool size (or the input is exhausted), the controller waits on the
/// oldest job and merges its results into the global table, so the merged table is the same
/// whatever the number of tasks.
///
/// If a block fails, the controller returns the error.  Dropping the job channel causes the
/// tasks to exit once they finish their current job; their replies are discarded.
///
use std::{
    collections::{HashMap, VecDeque},
    io::BufRead,
    sync::Arc,
    thread,
};

use anyhow::Context;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{
    annotation::AnnotationMapper,
    gtab::{Block, GTabReader, RecordDecoder},
    project::{project_block, MapStats, Projection, SignalTable},
    signal::Signal,
};

/// Sent to a child task: a block to be projected and the channel for the results
pub struct Job<T> {
    block: Block<T>,
    reply: Sender<anyhow::Result<Projection<T>>>,
}

/// Global table built by merging the results from each block
#[derive(Debug)]
pub struct MergedTable<T> {
    table: SignalTable<T>,
    // Transcript id -> index of the block it came from
    origin: HashMap<Arc<str>, usize>,
    // Block labels and statistics in merge order
    blocks: Vec<(String, MapStats)>,
}

impl<T> Default for MergedTable<T> {
    fn default() -> Self {
        Self {
            table: Vec::new(),
            origin: HashMap::new(),
            blocks: Vec::new(),
        }
    }
}

impl<T: Signal> MergedTable<T> {
    /// Add the results from a block.  A transcript that is already present is an error
    pub fn merge(&mut self, p: Projection<T>) -> anyhow::Result<()> {
        let label = p.label();
        let bix = self.blocks.len();
        for (id, _) in p.table.iter() {
            if let Some(ix) = self.origin.get(id) {
                return Err(anyhow!(
                    "Transcript {} found in blocks {} and {}",
                    id,
                    self.blocks[*ix].0,
                    label
                ));
            }
        }
        for (id, v) in p.table {
            self.origin.insert(Arc::clone(&id), bix);
            self.table.push((id, v))
        }
        self.blocks.push((label, p.stats));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Per block statistics sorted on label (chromosome then strand)
    pub fn stats(&self) -> Vec<(String, MapStats)> {
        let mut v = self.blocks.clone();
        v.sort_by(|(a, _), (b, _)| a.cmp(b));
        v
    }

    pub fn into_table(self) -> SignalTable<T> {
        self.table
    }
}

fn process_task<T: Signal, M: AnnotationMapper + ?Sized>(
    ix: usize,
    mapper: &M,
    min_valid: usize,
    recv: Receiver<Job<T>>,
) {
    debug!("Process task {} starting up", ix);
    while let Ok(job) = recv.recv() {
        trace!("Task {} received block {}", ix, job.block.label());
        let res = project_block(job.block, mapper, min_valid);
        // An error here means the controller has given up, so the result is not needed
        if job.reply.send(res).is_err() {
            trace!("Task {}: controller not listening", ix);
        }
    }
    debug!("Process task {} closing down", ix);
}

/// Main loop.  Reads blocks from rdr, dispatches them to the tasks and merges the
/// results in dispatch order
fn controller<R, D>(
    rdr: &mut GTabReader<R, D>,
    send_job: Sender<Job<D::Value>>,
    n_tasks: usize,
) -> anyhow::Result<MergedTable<D::Value>>
where
    R: BufRead,
    D: RecordDecoder,
{
    debug!("Controller starting up");
    let mut in_flight = VecDeque::with_capacity(n_tasks);
    let mut merged = MergedTable::default();
    let mut finished = false;
    let mut n_blocks = 0;
    loop {
        while !finished && in_flight.len() < n_tasks {
            match rdr.next_block()? {
                Some(block) => {
                    let label = block.label();
                    let (s, r) = bounded(1);
                    trace!("Controller sending block {} ({} records)", label, block.len());
                    send_job
                        .send(Job { block, reply: s })
                        .map_err(|_| anyhow!("Process tasks exited unexpectedly"))?;
                    in_flight.push_back((label, r));
                }
                None => finished = true,
            }
        }
        let Some((label, r)) = in_flight.pop_front() else {
            break;
        };
        let p = r
            .recv()
            .map_err(|_| anyhow!("No results returned for block {}", label))?
            .with_context(|| format!("Error processing block {}", label))?;
        n_blocks += 1;
        info!(
            "Block {} ({}) processed: {} transcripts",
            n_blocks,
            label,
            p.table.len()
        );
        merged.merge(p)?;
    }
    debug!(
        "Controller closing down: {} blocks, {} transcripts",
        n_blocks,
        merged.len()
    );
    Ok(merged)
}

/// Project all blocks from rdr onto the transcripts of mapper using n_tasks threads
pub fn project_blocks<R, D, M>(
    rdr: &mut GTabReader<R, D>,
    mapper: &M,
    n_tasks: usize,
    min_valid: usize,
) -> anyhow::Result<MergedTable<D::Value>>
where
    R: BufRead,
    D: RecordDecoder,
    M: AnnotationMapper + ?Sized,
{
    let nt = n_tasks.max(1);
    thread::scope(|sc| {
        let (send_job, recv_job) = bounded(nt);
        for ix in 0..nt {
            let r = recv_job.clone();
            sc.spawn(move || process_task(ix + 1, mapper, min_valid, r));
        }
        drop(recv_job);
        // send_job is dropped when the controller returns, which closes down the tasks
        controller(rdr, send_job, nt)
    })
}
