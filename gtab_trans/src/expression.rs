use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::Context;
use compress_io::compress::CompressIo;

use utils::get_next_fields;

// 0 based columns in the expression tables
const ID_COL: usize = 0;
const FPKM_COL: usize = 9;
const STATUS_COL: usize = 12;

/// Mean expression (FPKM) per transcript
#[derive(Debug, Default)]
pub struct ExpressionTable {
    fpkm: HashMap<Arc<str>, f64>,
}

impl ExpressionTable {
    /// Read one or more expression tables.  Only rows with status OK are used.
    /// The value for a transcript is the mean across the files where it was found
    pub fn from_files<P: AsRef<Path>>(files: &[P]) -> anyhow::Result<Self> {
        let mut sums: HashMap<Arc<str>, (f64, usize)> = HashMap::new();
        for f in files {
            for (id, x) in read_expression_file(f.as_ref())? {
                let e = sums.entry(id).or_insert((0.0, 0));
                e.0 += x;
                e.1 += 1;
            }
        }
        let fpkm: HashMap<_, _> = sums
            .into_iter()
            .map(|(id, (s, n))| (id, s / (n as f64)))
            .collect();
        debug!(
            "Expression values read for {} transcripts from {} files",
            fpkm.len(),
            files.len()
        );
        Ok(Self { fpkm })
    }

    pub fn get(&self, trans_id: &str) -> Option<f64> {
        self.fpkm.get(trans_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.fpkm.is_empty()
    }
}

/// Read a single expression table.  The first line is a header and is skipped
fn read_expression_file(fname: &Path) -> anyhow::Result<HashMap<Arc<str>, f64>> {
    debug!("Reading in expression values from {}", fname.display());
    let mut rdr = CompressIo::new()
        .path(fname)
        .bufreader()
        .with_context(|| format!("Error opening expression file {}", fname.display()))?;

    let mut buf = String::new();
    let mut line = 0;
    let mut h = HashMap::new();
    while let Some(fields) = get_next_fields(&mut rdr, &mut buf).with_context(|| {
        format!(
            "Error after reading {} lines from {}",
            line,
            fname.display()
        )
    })? {
        line += 1;
        if line == 1 || fields.is_empty() {
            continue;
        }
        if fields.len() <= STATUS_COL {
            return Err(anyhow!(
                "{}:{} Expected at least {} columns, found {}",
                fname.display(),
                line,
                STATUS_COL + 1,
                fields.len()
            ));
        }
        if fields[STATUS_COL] != "OK" {
            continue;
        }
        let x = fields[FPKM_COL].parse::<f64>().with_context(|| {
            format!("{}:{} Error reading FPKM value", fname.display(), line)
        })?;
        if h.insert(Arc::from(fields[ID_COL]), x).is_some() {
            warn!(
                "{}: multiple entries for {}; using the last",
                fname.display(),
                fields[ID_COL]
            )
        }
    }
    debug!(
        "Finished reading in {} lines; found {} transcripts",
        line,
        h.len()
    );
    Ok(h)
}
