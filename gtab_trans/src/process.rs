use std::{
    collections::{HashMap, HashSet},
    io::{self, BufRead, Write},
    sync::Arc,
};

use crate::{
    config::{Config, Mode, Target},
    controller::project_blocks,
    expression::ExpressionTable,
    filter::{filter_vector, FilterParams},
    gtab::{ColumnDecoder, GTabReader, RecordDecoder, ShapeDecoder},
    output::{open_output, write_column_vector, write_shape_vector, write_stats_report},
    project::place_on_chromosome,
    signal::{ColumnValues, Signal, SignalVector, Site, Strand},
};

/// Post processing and output of finished vectors
trait SignalOutput<T: Signal> {
    /// Minimum number of valid positions for a transcript to be kept by the projector
    const MIN_VALID: usize;

    /// Quality check (and possibly modify) a finished vector.  Returns false if the vector
    /// should be dropped
    fn keep(&self, id: &str, v: &mut SignalVector<T>) -> bool;

    fn write<W: Write>(&self, w: &mut W, id: &str, v: &SignalVector<T>) -> anyhow::Result<()>;
}

struct ShapeOutput<'a> {
    params: &'a FilterParams,
    expr: Option<&'a ExpressionTable>,
    with_rt: bool,
}

impl SignalOutput<Site> for ShapeOutput<'_> {
    const MIN_VALID: usize = 3;

    fn keep(&self, id: &str, v: &mut SignalVector<Site>) -> bool {
        filter_vector(id, v, self.params, self.expr)
    }

    fn write<W: Write>(&self, w: &mut W, id: &str, v: &SignalVector<Site>) -> anyhow::Result<()> {
        write_shape_vector(w, id, v, self.expr, self.with_rt)
    }
}

struct ColumnOutput;

impl SignalOutput<ColumnValues> for ColumnOutput {
    const MIN_VALID: usize = 10;

    fn keep(&self, _id: &str, _v: &mut SignalVector<ColumnValues>) -> bool {
        true
    }

    fn write<W: Write>(
        &self,
        w: &mut W,
        id: &str,
        v: &SignalVector<ColumnValues>,
    ) -> anyhow::Result<()> {
        write_column_vector(w, id, v)
    }
}

/// Project onto transcripts, write out the vectors that pass and print the mapping report.
/// The output is only opened once all blocks have been projected
fn to_transcripts<R, D, O>(
    cfg: &Config,
    rdr: &mut GTabReader<R, D>,
    idx: &crate::annotation::AnnotationIndex,
    out: &O,
) -> anyhow::Result<()>
where
    R: BufRead,
    D: RecordDecoder,
    O: SignalOutput<D::Value>,
{
    let merged = project_blocks(rdr, idx, cfg.threads(), O::MIN_VALID)?;
    if merged.is_empty() {
        warn!("No transcripts found with sufficient coverage")
    }
    let stats = merged.stats();
    let mut table = merged.into_table();
    let n = table.len();
    table.retain_mut(|(id, v)| out.keep(id, v));
    info!("{} out of {} transcripts passed filters", table.len(), n);
    let mut wrt = open_output(cfg.output(), cfg.append())?;
    for (id, v) in table.iter() {
        out.write(&mut wrt, id, v)?
    }
    wrt.flush()?;

    let mut so = io::stdout().lock();
    write_stats_report(&mut so, &stats)?;
    so.flush()?;
    Ok(())
}

/// Project + strand records onto whole chromosomes.  Each chromosome is written
/// out as soon as its first block has been read.  A chromosome with only - strand
/// records gives an empty vector
fn to_chromosomes<R, D, O, W>(
    rdr: &mut GTabReader<R, D>,
    sizes: &HashMap<Arc<str>, usize>,
    out: &O,
    wrt: &mut W,
) -> anyhow::Result<()>
where
    R: BufRead,
    D: RecordDecoder,
    O: SignalOutput<D::Value>,
    W: Write,
{
    let mut seen = HashSet::new();
    let (mut n_in, mut n_out) = (0, 0);
    while let Some(block) = rdr.next_block()? {
        let chrom = Arc::clone(block.chrom());
        let Some(size) = sizes.get(&chrom) else {
            warn!("Chromosome for block {} not in chromosome size file; skipping", block.label());
            continue;
        };
        let minus = block.strand() == Strand::Minus;
        if !seen.insert(Arc::clone(&chrom)) {
            if minus {
                trace!("Skipping block {}", block.label());
                continue;
            }
            return Err(anyhow!(
                "Records for {}+ are not contiguous; input should be sorted on chromosome and strand",
                chrom
            ));
        }
        n_in += 1;
        let mut v = if minus {
            SignalVector::new(*size)
        } else {
            place_on_chromosome(block, *size)
        };
        if out.keep(&chrom, &mut v) {
            out.write(wrt, &chrom, &v)?;
            n_out += 1;
        }
        info!("Chromosome {} processed", chrom);
    }
    info!("{} out of {} chromosomes passed filters", n_out, n_in);
    wrt.flush()?;
    Ok(())
}

fn run<R, D, O>(cfg: &Config, mut rdr: GTabReader<R, D>, out: &O) -> anyhow::Result<()>
where
    R: BufRead,
    D: RecordDecoder,
    O: SignalOutput<D::Value>,
{
    match cfg.target() {
        Target::Transcripts(idx) => to_transcripts(cfg, &mut rdr, idx, out),
        Target::Chromosomes(sizes) => {
            let mut wrt = open_output(cfg.output(), cfg.append())?;
            to_chromosomes(&mut rdr, sizes, out, &mut wrt)
        }
    }
}

/// Read the gTab input, project it, and write out the results
pub fn process_input(cfg: &Config) -> anyhow::Result<()> {
    debug!("Starting processing of {}", cfg.input().display());
    match cfg.mode() {
        Mode::Shape { min_depth, with_rt } => {
            let rdr = GTabReader::open(cfg.input(), |h| ShapeDecoder::new(h, *min_depth))?;
            let out = ShapeOutput {
                params: cfg.filter(),
                expr: cfg.expression(),
                with_rt: *with_rt,
            };
            run(cfg, rdr, &out)
        }
        Mode::Columns(cols) => {
            let rdr = GTabReader::open(cfg.input(), |h| ColumnDecoder::new(h, cols))?;
            run(cfg, rdr, &ColumnOutput)
        }
    }
}
