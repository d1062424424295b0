use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::Context;
use compress_io::compress::CompressIo;

use utils::get_next_fields;

/// Read in chromosome sizes from file
///
/// Expects two whitespace separated columns: the chromosome name and its size.
/// Blank lines and lines starting with '#' are skipped
pub fn read_chrom_sizes<P: AsRef<Path>>(fname: P) -> anyhow::Result<HashMap<Arc<str>, usize>> {
    let fname = fname.as_ref();
    debug!("Reading in chromosome sizes from {}", fname.display());

    let mut rdr = CompressIo::new()
        .path(fname)
        .bufreader()
        .with_context(|| format!("Error opening chromosome size file {}", fname.display()))?;

    let mut buf = String::new();
    let mut line = 0;
    let mut ctg_hash = HashMap::new();

    while let Some(fields) = get_next_fields(&mut rdr, &mut buf).with_context(|| {
        format!(
            "Error after reading {} lines from {}",
            line,
            fname.display()
        )
    })? {
        line += 1;
        if fields.is_empty() || fields[0].starts_with('#') {
            continue;
        }
        if fields.len() < 2 {
            return Err(anyhow!("{}:{} Missing chromosome size", fname.display(), line));
        }
        let size = fields[1].parse::<usize>().with_context(|| {
            format!("{}:{} Error reading chromosome size", fname.display(), line)
        })?;
        if ctg_hash.insert(Arc::from(fields[0]), size).is_some() {
            return Err(anyhow!(
                "{}:{} Duplicate entry for {}",
                fname.display(),
                line,
                fields[0]
            ));
        }
    }

    debug!(
        "Finished reading in {} lines; found {} chromosomes",
        line,
        ctg_hash.len()
    );
    Ok(ctg_hash)
}
