use std::{
    collections::{HashMap, HashSet},
    ops::AddAssign,
    sync::Arc,
};

use anyhow::Context;

use crate::{
    annotation::AnnotationMapper,
    gtab::Block,
    signal::{Signal, SignalVector, Strand},
};

/// Transcripts shorter than this are never materialized
pub const MIN_TRANS_LEN: usize = 40;

/// Signal table: vectors in the order they were first created
pub type SignalTable<T> = Vec<(Arc<str>, SignalVector<T>)>;

/// Counts of records by genomic context
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapStats {
    pub exon: usize,
    pub intron: usize,
    pub intergenic: usize,
}

impl MapStats {
    pub fn total(&self) -> usize {
        self.exon + self.intron + self.intergenic
    }
}

impl AddAssign for MapStats {
    fn add_assign(&mut self, o: Self) {
        self.exon += o.exon;
        self.intron += o.intron;
        self.intergenic += o.intergenic;
    }
}

/// Result of projecting one block onto the transcriptome
#[derive(Debug)]
pub struct Projection<T> {
    pub chrom: Arc<str>,
    pub strand: Strand,
    pub table: SignalTable<T>,
    pub stats: MapStats,
}

impl<T> Projection<T> {
    pub fn label(&self) -> String {
        format!("{}{}", self.chrom, self.strand)
    }
}

/// Per transcript vectors under construction for a block
struct TransBuilder<T> {
    table: SignalTable<T>,
    index: HashMap<Arc<str>, usize>,
    too_short: HashSet<Arc<str>>,
}

impl<T: Signal> TransBuilder<T> {
    fn new() -> Self {
        Self {
            table: Vec::new(),
            index: HashMap::new(),
            too_short: HashSet::new(),
        }
    }

    /// Get the vector for a transcript, creating it on first use.
    /// Returns None for transcripts that are too short
    fn vector<M: AnnotationMapper + ?Sized>(
        &mut self,
        tid: &Arc<str>,
        mapper: &M,
    ) -> anyhow::Result<Option<&mut SignalVector<T>>> {
        if let Some(ix) = self.index.get(tid).copied() {
            return Ok(Some(&mut self.table[ix].1));
        }
        if self.too_short.contains(tid) {
            return Ok(None);
        }
        let len = mapper
            .trans_len(tid)
            .with_context(|| format!("Could not get length of transcript {}", tid))?;
        if len < MIN_TRANS_LEN {
            trace!("Skipping short transcript {} (length {})", tid, len);
            self.too_short.insert(Arc::clone(tid));
            return Ok(None);
        }
        let ix = self.table.len();
        self.index.insert(Arc::clone(tid), ix);
        self.table.push((Arc::clone(tid), SignalVector::new(len)));
        Ok(Some(&mut self.table[ix].1))
    }
}

/// Map the records of a block onto transcripts
///
/// Records where the annotation query fails are skipped.  Each record that is kept is
/// counted once as exonic, intronic or intergenic.  Only transcripts with at least
/// min_valid valid positions are returned
pub fn project_block<T: Signal, M: AnnotationMapper + ?Sized>(
    block: Block<T>,
    mapper: &M,
    min_valid: usize,
) -> anyhow::Result<Projection<T>> {
    let chrom = Arc::clone(block.chrom());
    let strand = block.strand();
    let mut stats = MapStats::default();
    let mut builder = TransBuilder::new();

    for rec in block.into_records() {
        let hits = match mapper.trans_coords(&chrom, rec.pos, rec.pos, strand) {
            Ok(h) => h,
            Err(e) => {
                trace!("Skipping {}:{}{} - {}", chrom, rec.pos, strand, e);
                continue;
            }
        };
        if hits.is_empty() {
            match mapper.gene_hits(&chrom, rec.pos, rec.pos, strand) {
                Ok(g) if g.is_empty() => stats.intergenic += 1,
                Ok(_) => stats.intron += 1,
                Err(e) => trace!("Skipping {}:{}{} - {}", chrom, rec.pos, strand, e),
            }
            continue;
        }
        stats.exon += 1;
        for hit in hits {
            if let Some(v) = builder.vector(&hit.trans_id, mapper)? {
                let set = hit.pos > 0 && v.set(hit.pos - 1, rec.value.clone());
                if !set {
                    warn!(
                        "Position {} outside of transcript {} (length {})",
                        hit.pos,
                        hit.trans_id,
                        v.len()
                    )
                }
            }
        }
    }
    let mut table = builder.table;
    table.retain(|(_, v)| v.n_valid() >= min_valid);

    debug!(
        "{}{}: {} transcripts retained, {:?}",
        chrom,
        strand,
        table.len(),
        stats
    );
    Ok(Projection {
        chrom,
        strand,
        table,
        stats,
    })
}

/// Place the records of a block directly onto a chromosome vector of length size.
/// Records beyond the end of the chromosome are skipped
pub fn place_on_chromosome<T: Signal>(block: Block<T>, size: usize) -> SignalVector<T> {
    let label = block.label();
    let mut v = SignalVector::new(size);
    let mut skipped = 0;
    for rec in block.into_records() {
        if !v.set(rec.pos as usize - 1, rec.value) {
            skipped += 1
        }
    }
    if skipped > 0 {
        warn!(
            "{}: {} records beyond the chromosome size ({}) were skipped",
            label, skipped, size
        )
    }
    v
}
