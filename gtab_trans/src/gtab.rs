/// Streaming reader for gTab files
///
/// A gTab file starts with optional header lines of the form `@<Tag> <column>` giving
/// the (1 based) column of each field, followed by whitespace delimited data lines
/// sorted on chromosome and strand.  The reader returns the data one block at a time,
/// where a block is a maximal run of records with the same chromosome and strand.
///
use std::{
    collections::{HashMap, HashSet},
    fmt,
    io::BufRead,
    path::Path,
    str::FromStr,
    sync::Arc,
};

use anyhow::Context;
use compress_io::compress::CompressIo;

use crate::signal::{ColumnValues, Score, Signal, Site, Strand};

/// Column tags recognized in the gTab header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    ChrId,
    Strand,
    ChrPos,
    NRt,
    NBd,
    DRt,
    DBd,
    Shape,
    ShapeNum,
    WindowShape,
    Base,
    ColNum,
}

impl FromStr for Tag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ChrID" => Ok(Self::ChrId),
            "Strand" => Ok(Self::Strand),
            "ChrPos" => Ok(Self::ChrPos),
            "N_RT" => Ok(Self::NRt),
            "N_BD" => Ok(Self::NBd),
            "D_RT" => Ok(Self::DRt),
            "D_BD" => Ok(Self::DBd),
            "Shape" => Ok(Self::Shape),
            "ShapeNum" => Ok(Self::ShapeNum),
            "WindowShape" => Ok(Self::WindowShape),
            "Base" => Ok(Self::Base),
            "ColNum" => Ok(Self::ColNum),
            _ => Err(anyhow!("Unknown head tag {}", s)),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::ChrId => "ChrID",
            Self::Strand => "Strand",
            Self::ChrPos => "ChrPos",
            Self::NRt => "N_RT",
            Self::NBd => "N_BD",
            Self::DRt => "D_RT",
            Self::DBd => "D_BD",
            Self::Shape => "Shape",
            Self::ShapeNum => "ShapeNum",
            Self::WindowShape => "WindowShape",
            Self::Base => "Base",
            Self::ColNum => "ColNum",
        };
        f.write_str(s)
    }
}

/// Mapping from header tags to 1 based column numbers
#[derive(Debug, Default, Clone)]
pub struct GTabHeader {
    cols: HashMap<Tag, usize>,
}

impl GTabHeader {
    /// Parse a header line (without the leading '@').  Unknown tags are logged and ignored
    fn add_line(&mut self, s: &str) -> anyhow::Result<()> {
        let mut it = s.split_whitespace();
        let (tag, num) = match (it.next(), it.next(), it.next()) {
            (Some(t), Some(n), None) => (t, n),
            _ => return Err(anyhow!("Malformed header line @{}", s.trim_end())),
        };
        match tag.parse::<Tag>() {
            Ok(t) => {
                let x = num
                    .parse::<usize>()
                    .with_context(|| format!("Illegal column number for tag {}", tag))?;
                if x == 0 {
                    return Err(anyhow!("Column numbers start from 1 (tag {})", tag));
                }
                self.cols.insert(t, x);
            }
            Err(_) => warn!("Unknown head tag: @{}", s.trim_end()),
        }
        Ok(())
    }

    /// Get 1 based column for tag
    pub fn column(&self, tag: Tag) -> Option<usize> {
        self.cols.get(&tag).copied()
    }

    /// Get 0 based index for tag, giving an error if the tag is not present
    pub fn required(&self, tag: Tag) -> anyhow::Result<usize> {
        self.column(tag)
            .map(|x| x - 1)
            .ok_or_else(|| anyhow!("Tag @{} missing from gTab header", tag))
    }

    pub fn n_cols(&self) -> Option<usize> {
        self.column(Tag::ColNum)
    }
}

/// A decoded data line.  The chromosome and strand are held by the enclosing Block
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    pub pos: u32,
    pub value: T,
}

/// Run of records from the same chromosome and strand, in input order
#[derive(Debug)]
pub struct Block<T> {
    chrom: Arc<str>,
    strand: Strand,
    records: Vec<Record<T>>,
}

impl<T> Block<T> {
    pub fn new(chrom: Arc<str>, strand: Strand) -> Self {
        Self {
            chrom,
            strand,
            records: Vec::new(),
        }
    }

    pub fn chrom(&self) -> &Arc<str> {
        &self.chrom
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    pub fn into_records(self) -> Vec<Record<T>> {
        self.records
    }

    pub fn push(&mut self, pos: u32, value: T) {
        self.records.push(Record { pos, value })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Chromosome and strand, i.e. chr1+
    pub fn label(&self) -> String {
        format!("{}{}", self.chrom, self.strand)
    }
}

/// Converts the fields of a data line into a record value.
/// Returning Ok(None) drops the record
pub trait RecordDecoder {
    type Value: Signal;

    fn decode(&self, fields: &[&str]) -> anyhow::Result<Option<Self::Value>>;
}

/// Raw score used in gTab files to indicate no score
const NO_SCORE: &str = "-1";

/// Decoder for SHAPE mode
///
/// A score is kept only if the coverage depth is at least min_depth and
/// the score is not the missing marker.  Records with no RT counts and no confident
/// score are dropped
#[derive(Debug)]
pub struct ShapeDecoder {
    depth_ix: usize,
    rt_ix: usize,
    shape_ix: usize,
    min_depth: u64,
}

impl ShapeDecoder {
    pub fn new(hdr: &GTabHeader, min_depth: u64) -> anyhow::Result<Self> {
        let depth_ix = match hdr.column(Tag::DBd) {
            Some(x) => x - 1,
            None => hdr.required(Tag::NBd)?,
        };
        // The field count check relies on ColNum
        hdr.required(Tag::ColNum)?;
        Ok(Self {
            depth_ix,
            rt_ix: hdr.required(Tag::NRt)?,
            shape_ix: hdr.required(Tag::Shape)?,
            min_depth,
        })
    }
}

impl RecordDecoder for ShapeDecoder {
    type Value = Site;

    fn decode(&self, fields: &[&str]) -> anyhow::Result<Option<Site>> {
        let f = |ix: usize| {
            fields
                .get(ix)
                .copied()
                .ok_or_else(|| anyhow!("Missing column {} ({} fields)", ix + 1, fields.len()))
        };
        let s = f(self.depth_ix)?;
        let depth = s
            .parse::<u64>()
            .with_context(|| format!("Error reading depth ({})", s))?;
        let s = f(self.rt_ix)?;
        let rt = s
            .parse::<u32>()
            .with_context(|| format!("Error reading RT count ({})", s))?;
        let raw = f(self.shape_ix)?;
        let score = if depth >= self.min_depth && raw != NO_SCORE {
            let x = raw
                .parse::<f64>()
                .with_context(|| format!("Error reading shape score ({})", raw))?;
            Score::from_f64(x)
        } else {
            None
        };
        Ok(if rt >= 1 || score.is_some() {
            Some(Site::new(score, rt))
        } else {
            None
        })
    }
}

/// Decoder for column mode: the selected columns are kept verbatim
#[derive(Debug)]
pub struct ColumnDecoder {
    cols: Vec<usize>,
}

impl ColumnDecoder {
    /// cols are 1 based column numbers
    pub fn new(hdr: &GTabHeader, cols: &[usize]) -> anyhow::Result<Self> {
        if cols.is_empty() {
            return Err(anyhow!("No columns selected for output"));
        }
        if let Some(n) = hdr.n_cols() {
            if let Some(x) = cols.iter().find(|x| **x > n) {
                return Err(anyhow!(
                    "Selected column {} is beyond the last column ({})",
                    x,
                    n
                ));
            }
        }
        if cols.contains(&0) {
            return Err(anyhow!("Column numbers start from 1"));
        }
        Ok(Self {
            cols: cols.iter().map(|x| x - 1).collect(),
        })
    }
}

impl RecordDecoder for ColumnDecoder {
    type Value = ColumnValues;

    fn decode(&self, fields: &[&str]) -> anyhow::Result<Option<ColumnValues>> {
        let mut s = String::new();
        for (i, ix) in self.cols.iter().enumerate() {
            let f = fields
                .get(*ix)
                .ok_or_else(|| anyhow!("Missing column {} ({} fields)", ix + 1, fields.len()))?;
            if i > 0 {
                s.push(',')
            }
            s.push_str(f)
        }
        Ok(Some(ColumnValues::new(&s)))
    }
}

/// Streaming gTab reader
///
/// One line of look ahead is kept: when a line from a new chromosome or strand
/// is read it is held in the buffer and becomes the first line of the next block
pub struct GTabReader<R, D> {
    rdr: R,
    name: String,
    header: GTabHeader,
    decoder: D,
    buf: String,
    pending: bool,
    line: usize,
    chrom_ix: usize,
    strand_ix: usize,
    pos_ix: usize,
    seen: HashSet<(Arc<str>, Strand)>,
}

impl<D: RecordDecoder> GTabReader<Box<dyn BufRead>, D> {
    /// Open a (possibly compressed) gTab file.  The decoder is constructed from the header
    pub fn open<P, F>(path: P, f: F) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
        F: FnOnce(&GTabHeader) -> anyhow::Result<D>,
    {
        let path = path.as_ref();
        debug!("Opening gTab file {}", path.display());
        let rdr: Box<dyn BufRead> = Box::new(
            CompressIo::new()
                .path(path)
                .bufreader()
                .with_context(|| format!("Error opening input file {}", path.display()))?,
        );
        Self::from_reader(rdr, &path.display().to_string(), f)
    }
}

impl<R: BufRead, D: RecordDecoder> GTabReader<R, D> {
    pub fn from_reader<F>(mut rdr: R, name: &str, f: F) -> anyhow::Result<Self>
    where
        F: FnOnce(&GTabHeader) -> anyhow::Result<D>,
    {
        let mut buf = String::new();
        let mut line = 0;
        let (header, pending) = read_header(&mut rdr, name, &mut buf, &mut line)?;
        let decoder = f(&header).with_context(|| format!("Error reading {}", name))?;
        let col = |tag: Tag, default: usize| header.column(tag).map(|x| x - 1).unwrap_or(default);
        let (chrom_ix, strand_ix, pos_ix) = (
            col(Tag::ChrId, 0),
            col(Tag::Strand, 1),
            col(Tag::ChrPos, 2),
        );
        Ok(Self {
            rdr,
            name: name.to_owned(),
            header,
            decoder,
            buf,
            pending,
            line,
            chrom_ix,
            strand_ix,
            pos_ix,
            seen: HashSet::new(),
        })
    }

    /// Read the next block of records.  Returns None at the end of input
    pub fn next_block(&mut self) -> anyhow::Result<Option<Block<D::Value>>> {
        let mut block: Option<Block<D::Value>> = None;
        loop {
            if !self.pending {
                self.buf.clear();
                if self
                    .rdr
                    .read_line(&mut self.buf)
                    .with_context(|| {
                        format!("Error after reading {} lines from {}", self.line, self.name)
                    })?
                    == 0
                {
                    break;
                }
                self.line += 1;
            }
            self.pending = false;
            let fields: Vec<&str> = self.buf.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if let Some(n) = self.header.n_cols() {
                if fields.len() != n {
                    return Err(anyhow!(
                        "{}:{} actual column number ({}) != labeled number ({})",
                        self.name,
                        self.line,
                        fields.len(),
                        n
                    ));
                }
            }
            let (chrom, strand, pos) = self.locus(&fields)?;
            let b = block.get_or_insert_with(|| Block::new(Arc::from(chrom), strand));
            if b.chrom.as_ref() != chrom || b.strand != strand {
                // Start of next block; keep line for the next call
                self.pending = true;
                break;
            }
            if let Some(v) = self
                .decoder
                .decode(&fields)
                .with_context(|| format!("{}:{} Error decoding record", self.name, self.line))?
            {
                b.push(pos, v)
            }
        }
        if let Some(b) = block.as_ref() {
            if !self.seen.insert((Arc::clone(&b.chrom), b.strand)) {
                warn!(
                    "{}: records for {} are not contiguous; input should be sorted on chromosome and strand",
                    self.name,
                    b.label()
                )
            }
        }
        // An empty block is only returned if there is more input to come
        Ok(block.filter(|b| self.pending || !b.is_empty()))
    }

    fn locus<'a>(&self, fields: &[&'a str]) -> anyhow::Result<(&'a str, Strand, u32)> {
        let get = |ix: usize| {
            fields.get(ix).copied().ok_or_else(|| {
                anyhow!("{}:{} Missing column {}", self.name, self.line, ix + 1)
            })
        };
        let chrom = get(self.chrom_ix)?;
        let strand = get(self.strand_ix)?
            .parse::<Strand>()
            .with_context(|| format!("{}:{} Error reading strand", self.name, self.line))?;
        let s = get(self.pos_ix)?;
        let pos = s
            .parse::<u32>()
            .ok()
            .filter(|x| *x > 0)
            .ok_or_else(|| anyhow!("{}:{} Illegal position {}", self.name, self.line, s))?;
        Ok((chrom, strand, pos))
    }
}

/// Read header lines until the first data line, which is left in buf.
/// Returns the header and whether a data line is pending
fn read_header<R: BufRead>(
    rdr: &mut R,
    name: &str,
    buf: &mut String,
    line: &mut usize,
) -> anyhow::Result<(GTabHeader, bool)> {
    let mut header = GTabHeader::default();
    loop {
        buf.clear();
        if rdr
            .read_line(buf)
            .with_context(|| format!("Error reading header from {}", name))?
            == 0
        {
            break;
        }
        *line += 1;
        if let Some(s) = buf.strip_prefix('@') {
            header
                .add_line(s)
                .with_context(|| format!("{}:{} Error reading header", name, *line))?
        } else if !buf.trim().is_empty() {
            debug!("gTab header for {}: {:?}", name, header);
            return Ok((header, true));
        }
    }
    debug!("gTab header for {}: {:?} (no data lines)", name, header);
    Ok((header, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const HEADER: &str = "@ColNum 8\n@ChrID 1\n@Strand 2\n@ChrPos 3\n@N_RT 4\n@N_BD 5\n@D_RT 6\n@D_BD 7\n@Shape 8\n";

    fn shape_reader(s: &str, min_depth: u64) -> GTabReader<Cursor<String>, ShapeDecoder> {
        GTabReader::from_reader(Cursor::new(s.to_owned()), "test", |h| {
            ShapeDecoder::new(h, min_depth)
        })
        .unwrap()
    }

    fn site(score: Option<f64>, rt: u32) -> Site {
        Site::new(score.and_then(Score::from_f64), rt)
    }

    #[test]
    fn header_tags() {
        let input = format!("{}@Base 9\n@Wibble 3\n", HEADER.replace("ColNum 8", "ColNum 9"));
        let rdr = shape_reader(&input, 200);
        let h = &rdr.header;
        assert_eq!(h.n_cols(), Some(9));
        assert_eq!(h.column(Tag::DBd), Some(7));
        assert_eq!(h.column(Tag::Base), Some(9));
        assert_eq!(h.column(Tag::ShapeNum), None);
        assert!(h.required(Tag::WindowShape).is_err());
    }

    #[test]
    fn malformed_header_is_fatal() {
        let r = GTabReader::from_reader(Cursor::new("@ColNum\n"), "test", |h| {
            ShapeDecoder::new(h, 200)
        });
        assert!(r.is_err());
        let r = GTabReader::from_reader(Cursor::new("@ColNum 3\n@ChrID 1\n"), "test", |h| {
            ShapeDecoder::new(h, 200)
        });
        assert!(r.is_err(), "Shape columns are required");
    }

    #[test]
    fn low_depth_record_dropped() {
        let input = format!(
            "{}chr1\t+\t10\t3\t250\t0\t250\t0.5\nchr1\t+\t11\t0\t50\t0\t50\t0.9\n",
            HEADER
        );
        let mut rdr = shape_reader(&input, 200);
        let b = rdr.next_block().unwrap().unwrap();
        assert_eq!(b.label(), "chr1+");
        assert_eq!(b.len(), 1);
        let r = &b.records[0];
        assert_eq!(r.pos, 10);
        assert_eq!(r.value.score().unwrap().to_string(), "0.500");
        assert_eq!(r.value.rt(), 3);
        assert!(rdr.next_block().unwrap().is_none());
    }

    #[test]
    fn coverage_confidence_rule() {
        let input = format!(
            "{}chr1 + 1 1 199 0 199 0.8\nchr1 + 2 1 200 0 200 -1\nchr1 + 3 0 200 0 200 1.2345\n",
            HEADER
        );
        let mut rdr = shape_reader(&input, 200);
        let b = rdr.next_block().unwrap().unwrap();
        let v: Vec<_> = b.records.iter().map(|r| r.value).collect();
        assert_eq!(v[0], site(None, 1));
        assert_eq!(v[1], site(None, 1));
        assert_eq!(v[2].score().unwrap().to_string(), "1.234");
    }

    #[test]
    fn depth_falls_back_to_n_bd() {
        let input = "@ColNum 6\n@ChrID 1\n@Strand 2\n@ChrPos 3\n@N_RT 4\n@N_BD 5\n@Shape 6\nchr2\t-\t5\t0\t300\t0.25\n";
        let mut rdr = shape_reader(input, 200);
        let b = rdr.next_block().unwrap().unwrap();
        assert_eq!(b.strand(), Strand::Minus);
        assert_eq!(b.records[0].value, site(Some(0.25), 0));
    }

    #[test]
    fn column_count_mismatch_is_fatal() {
        let input = format!("{}chr1\t+\t10\t3\t250\t0\t250\n", HEADER);
        let mut rdr = shape_reader(&input, 200);
        let e = rdr.next_block().unwrap_err();
        assert!(format!("{}", e).contains("actual column number (7) != labeled number (8)"));
    }

    #[test]
    fn blocks_partition_input() {
        let mut input = String::from(HEADER);
        let mut expected = Vec::new();
        let mut x = 0;
        for (chrom, strand) in [("chr1", "+"), ("chr1", "-"), ("chr2", "+"), ("chrM", "-")] {
            for pos in 1..=20u32 {
                x += 1;
                let rt = x % 3;
                let depth = if x % 4 == 0 { 100 } else { 300 };
                input.push_str(&format!(
                    "{}\t{}\t{}\t{}\t{}\t0\t{}\t0.{}\n",
                    chrom, strand, pos, rt, depth, depth, x % 10
                ));
                if rt >= 1 || depth >= 200 {
                    expected.push((format!("{}{}", chrom, strand), pos));
                }
            }
        }
        let mut rdr = shape_reader(&input, 200);
        let mut found = Vec::new();
        let mut n_blocks = 0;
        while let Some(b) = rdr.next_block().unwrap() {
            n_blocks += 1;
            let l = b.label();
            found.extend(b.into_records().into_iter().map(|r| (l.clone(), r.pos)));
        }
        assert_eq!(n_blocks, 4);
        assert_eq!(found, expected);
    }

    #[test]
    fn empty_block_kept_until_end_of_input() {
        let input = format!(
            "{}chr1\t+\t1\t0\t10\t0\t10\t0.1\nchr2\t+\t1\t2\t10\t0\t10\t0.1\nchr3\t+\t1\t0\t10\t0\t10\t0.1\n",
            HEADER
        );
        let mut rdr = shape_reader(&input, 200);
        let b = rdr.next_block().unwrap().unwrap();
        assert_eq!((b.label().as_str(), b.len()), ("chr1+", 0));
        let b = rdr.next_block().unwrap().unwrap();
        assert_eq!((b.label().as_str(), b.len()), ("chr2+", 1));
        assert!(rdr.next_block().unwrap().is_none());
    }

    #[test]
    fn column_mode_keeps_all_records() {
        let input = format!("{}\nchr1\t+\t7\t0\t10\t0\t12\t-1\n", HEADER);
        let mut rdr = GTabReader::from_reader(Cursor::new(input), "test", |h| {
            ColumnDecoder::new(h, &[4, 5, 6, 7])
        })
        .unwrap();
        let b = rdr.next_block().unwrap().unwrap();
        assert_eq!(b.records[0].value.as_str(), "0,10,0,12");
        let h = GTabHeader::default();
        assert!(ColumnDecoder::new(&h, &[]).is_err());
        assert!(ColumnDecoder::new(&rdr.header, &[9]).is_err());
    }

    type Blocks = Vec<(String, Vec<(u32, Site)>)>;

    fn all_blocks<R: BufRead>(rdr: &mut GTabReader<R, ShapeDecoder>) -> Blocks {
        let mut v = Vec::new();
        while let Some(b) = rdr.next_block().unwrap() {
            let l = b.label();
            v.push((l, b.into_records().into_iter().map(|r| (r.pos, r.value)).collect()))
        }
        v
    }

    #[test]
    fn gzip_input() {
        let mut input = String::from(HEADER);
        for (chrom, strand) in [("chr1", "+"), ("chr1", "-"), ("chr2", "+")] {
            for pos in 1..=5 {
                input.push_str(&format!(
                    "{}\t{}\t{}\t{}\t300\t0\t300\t0.{}\n",
                    chrom, strand, pos, pos, pos
                ));
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.gTab.gz");
        {
            let mut w = CompressIo::new().path(&p).bufwriter().unwrap();
            w.write_all(input.as_bytes()).unwrap();
            w.flush().unwrap();
        }
        assert_eq!(&std::fs::read(&p).unwrap()[..2], &[0x1f, 0x8b]);

        let mut rdr = GTabReader::open(&p, |h| ShapeDecoder::new(h, 200)).unwrap();
        let blocks = all_blocks(&mut rdr);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].0, "chr1-");
        assert_eq!(blocks[2].1[4], (5, site(Some(0.5), 5)));
        assert_eq!(blocks, all_blocks(&mut shape_reader(&input, 200)));
    }
}
