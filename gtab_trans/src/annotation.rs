use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    path::Path,
    sync::Arc,
};

use anyhow::Context;
use compress_io::compress::CompressIo;
use utils::get_next_line;

use crate::signal::Strand;

/// A genomic position found on a transcript.  pos is the 1 based position
/// in the spliced transcript, counting from the 5' end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransHit {
    pub trans_id: Arc<str>,
    pub pos: usize,
}

/// Coordinate mapping between the genome and an annotation
///
/// Queries for positions outside of the annotation (i.e., on unknown contigs) or
/// for malformed regions return an error
pub trait AnnotationMapper: Sync {
    /// Transcript positions for the genomic region start..=end (1 based)
    fn trans_coords(
        &self,
        chrom: &str,
        start: u32,
        end: u32,
        strand: Strand,
    ) -> anyhow::Result<Vec<TransHit>>;

    /// Genes overlapping the genomic region start..=end (1 based)
    fn gene_hits(
        &self,
        chrom: &str,
        start: u32,
        end: u32,
        strand: Strand,
    ) -> anyhow::Result<Vec<Arc<str>>>;

    /// Length of the spliced transcript
    fn trans_len(&self, trans_id: &str) -> anyhow::Result<usize>;
}

/// Transcript model
///
/// exons - 1 based, inclusive, sorted and non overlapping genomic intervals
///
#[derive(Debug, Clone)]
pub struct TranscriptModel {
    id: Arc<str>,
    gene: Arc<str>,
    chrom: Arc<str>,
    strand: Strand,
    exons: Vec<(u32, u32)>,
    len: usize,
}

impl TranscriptModel {
    pub fn new(
        id: &str,
        gene: &str,
        chrom: &str,
        strand: Strand,
        mut exons: Vec<(u32, u32)>,
    ) -> anyhow::Result<Self> {
        exons.sort_unstable();
        if exons.is_empty() {
            return Err(anyhow!("Transcript {} has no exons", id));
        }
        if exons.iter().any(|(a, b)| *a == 0 || b < a) {
            return Err(anyhow!("Transcript {} has an illegal exon", id));
        }
        if exons.windows(2).any(|w| w[1].0 <= w[0].1) {
            return Err(anyhow!("Transcript {} has overlapping exons", id));
        }
        let len = exons.iter().map(|(a, b)| (b - a + 1) as usize).sum();
        Ok(Self {
            id: Arc::from(id),
            gene: Arc::from(gene),
            chrom: Arc::from(chrom),
            strand,
            exons,
            len,
        })
    }

    fn start(&self) -> u32 {
        self.exons[0].0
    }

    fn end(&self) -> u32 {
        self.exons[self.exons.len() - 1].1
    }

    /// Position of genomic coordinate x in the spliced transcript (1 based) if x is exonic
    fn local_pos(&self, x: u32) -> Option<usize> {
        let mut before = 0;
        for (a, b) in self.exons.iter() {
            if x < *a {
                return None;
            }
            if x <= *b {
                let p = before + (x - a) as usize + 1;
                return Some(match self.strand {
                    Strand::Plus => p,
                    Strand::Minus => self.len + 1 - p,
                });
            }
            before += (b - a + 1) as usize;
        }
        None
    }
}

/// Transcripts for one chromosome and strand, sorted on start position
#[derive(Debug, Default)]
struct Locus {
    models: Vec<TranscriptModel>,
    max_span: u32,
}

impl Locus {
    /// Transcripts whose genomic span covers x
    fn covering(&self, x: u32) -> impl Iterator<Item = &TranscriptModel> {
        let hi = self.models.partition_point(|m| m.start() <= x);
        let lo = self.models[..hi]
            .partition_point(|m| (m.start() as u64) + (self.max_span as u64) < x as u64);
        self.models[lo..hi].iter().filter(move |m| m.end() >= x)
    }
}

/// In memory annotation index
#[derive(Debug, Default)]
pub struct AnnotationIndex {
    loci: HashMap<Arc<str>, [Locus; 2]>,
    trans_len: HashMap<Arc<str>, usize>,
}

impl AnnotationIndex {
    pub fn new(models: Vec<TranscriptModel>) -> anyhow::Result<Self> {
        let mut idx = Self::default();
        for m in models {
            match idx.trans_len.entry(Arc::clone(&m.id)) {
                Entry::Occupied(_) => return Err(anyhow!("Duplicate transcript {}", m.id)),
                Entry::Vacant(e) => {
                    e.insert(m.len);
                }
            }
            let loci = idx.loci.entry(Arc::clone(&m.chrom)).or_default();
            let locus = &mut loci[m.strand.index()];
            locus.max_span = locus.max_span.max(m.end() - m.start());
            locus.models.push(m);
        }
        for loci in idx.loci.values_mut() {
            for l in loci.iter_mut() {
                l.models.sort_by_key(|m| (m.start(), m.end()));
            }
        }
        debug!(
            "Annotation index built with {} transcripts on {} contigs",
            idx.trans_len.len(),
            idx.loci.len()
        );
        Ok(idx)
    }

    /// Read transcript models from a BED12 file.  If a 13th column is present
    /// it is taken as the gene id, otherwise the transcript id is used
    pub fn from_bed12<P: AsRef<Path>>(fname: P) -> anyhow::Result<Self> {
        let fname = fname.as_ref();
        debug!("Reading in transcript models from {}", fname.display());
        let mut rdr = CompressIo::new()
            .path(fname)
            .bufreader()
            .with_context(|| format!("Error opening annotation file {}", fname.display()))?;

        let mut buf = String::new();
        let mut line = 0;
        let mut models = Vec::new();

        while let Some(fields) = get_next_line(&mut rdr, &mut buf).with_context(|| {
            format!(
                "Error after reading {} lines from {}",
                line,
                fname.display()
            )
        })? {
            line += 1;
            // Skip blank, comment and track lines
            if fields[0].is_empty()
                || fields[0].starts_with('#')
                || fields[0].starts_with("track")
                || fields[0].starts_with("browser")
            {
                continue;
            }
            let m = parse_bed12(&fields).with_context(|| {
                format!("{}:{} Error parsing BED12 record", fname.display(), line)
            })?;
            models.push(m)
        }
        debug!(
            "Finished reading in {} lines; found {} transcripts",
            line,
            models.len()
        );
        Self::new(models)
    }

    fn locus(&self, chrom: &str, strand: Strand) -> anyhow::Result<&Locus> {
        self.loci
            .get(chrom)
            .map(|l| &l[strand.index()])
            .ok_or_else(|| anyhow!("Contig {} not found in annotation", chrom))
    }
}

fn check_region(start: u32, end: u32) -> anyhow::Result<()> {
    if start == 0 || end < start {
        Err(anyhow!("Illegal region {}-{}", start, end))
    } else {
        Ok(())
    }
}

impl AnnotationMapper for AnnotationIndex {
    fn trans_coords(
        &self,
        chrom: &str,
        start: u32,
        end: u32,
        strand: Strand,
    ) -> anyhow::Result<Vec<TransHit>> {
        check_region(start, end)?;
        let locus = self.locus(chrom, strand)?;
        let mut v = Vec::new();
        for x in start..=end {
            for m in locus.covering(x) {
                if let Some(pos) = m.local_pos(x) {
                    v.push(TransHit {
                        trans_id: Arc::clone(&m.id),
                        pos,
                    })
                }
            }
        }
        Ok(v)
    }

    fn gene_hits(
        &self,
        chrom: &str,
        start: u32,
        end: u32,
        strand: Strand,
    ) -> anyhow::Result<Vec<Arc<str>>> {
        check_region(start, end)?;
        let locus = self.locus(chrom, strand)?;
        let mut seen = HashSet::new();
        let mut v = Vec::new();
        for x in start..=end {
            for m in locus.covering(x) {
                if seen.insert(Arc::clone(&m.gene)) {
                    v.push(Arc::clone(&m.gene))
                }
            }
        }
        Ok(v)
    }

    fn trans_len(&self, trans_id: &str) -> anyhow::Result<usize> {
        self.trans_len
            .get(trans_id)
            .copied()
            .ok_or_else(|| anyhow!("Transcript {} not found in annotation", trans_id))
    }
}

fn parse_list(s: &str) -> anyhow::Result<Vec<u32>> {
    s.split(',')
        .filter(|x| !x.is_empty())
        .map(|x| {
            x.parse::<u32>()
                .with_context(|| format!("Illegal block entry {}", x))
        })
        .collect()
}

fn parse_bed12(fields: &[&str]) -> anyhow::Result<TranscriptModel> {
    if fields.len() < 12 {
        return Err(anyhow!("Expected 12 columns, found {}", fields.len()));
    }
    let chrom_start = fields[1]
        .parse::<u32>()
        .with_context(|| "Error reading chromStart")?;
    let strand = fields[5].parse::<Strand>()?;
    let n = fields[9]
        .parse::<usize>()
        .with_context(|| "Error reading blockCount")?;
    let sizes = parse_list(fields[10])?;
    let starts = parse_list(fields[11])?;
    if sizes.len() != n || starts.len() != n {
        return Err(anyhow!("blockSizes and blockStarts do not match blockCount"));
    }
    let exons = starts
        .iter()
        .zip(sizes.iter())
        .filter(|(_, sz)| **sz > 0)
        .map(|(st, sz)| {
            chrom_start
                .checked_add(*st)
                .and_then(|a| a.checked_add(*sz).map(|b| (a + 1, b)))
                .ok_or_else(|| {
                    anyhow!("Block {} + {} (size {}) out of range", chrom_start, st, sz)
                })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let id = fields[3];
    let gene = fields.get(12).copied().unwrap_or(id);
    TranscriptModel::new(id, gene, fields[0], strand, exons)
}
