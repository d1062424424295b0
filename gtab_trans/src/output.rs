use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::Context;
use compress_io::compress::CompressIo;

use crate::{
    expression::ExpressionTable,
    project::MapStats,
    signal::{ColumnValues, Score, SignalVector, Site},
};

const MISSING: &str = "NULL";

/// Open output file (or stdout if path is None).  If append is set, output is
/// added to the end of an existing file
pub fn open_output(path: Option<&Path>, append: bool) -> anyhow::Result<Box<dyn Write>> {
    match (path, append) {
        (Some(p), true) => {
            debug!("Appending output to {}", p.display());
            let f = OpenOptions::new()
                .append(true)
                .create(true)
                .open(p)
                .with_context(|| {
                    format!("Failed to open output file {} for appending", p.display())
                })?;
            Ok(Box::new(BufWriter::new(f)))
        }
        (None, true) => Err(anyhow!("Cannot append when writing to stdout")),
        (p, false) => {
            let wrt = CompressIo::new()
                .opt_path(p)
                .bufwriter()
                .with_context(|| "Failed to open output file")?;
            Ok(Box::new(wrt))
        }
    }
}

fn write_score<W: Write>(w: &mut W, s: Option<Score>) -> std::io::Result<()> {
    match s {
        Some(x) => write!(w, "{}", x),
        None => w.write_all(MISSING.as_bytes()),
    }
}

/// Write a SHAPE vector as a single line:
///
/// id, length, expression (or '*' if not known), then one value per position.
/// If with_rt is set, values are written as score,rt pairs
pub fn write_shape_vector<W: Write>(
    w: &mut W,
    id: &str,
    v: &SignalVector<Site>,
    expr: Option<&ExpressionTable>,
    with_rt: bool,
) -> anyhow::Result<()> {
    write!(w, "{}\t{}\t", id, v.len())?;
    match expr.and_then(|e| e.get(id)) {
        Some(x) => write!(w, "{:.3}", x)?,
        None => w.write_all(b"*")?,
    }
    for s in v.slots() {
        w.write_all(b"\t")?;
        match s {
            Some(x) => {
                write_score(w, x.score())?;
                if with_rt {
                    write!(w, ",{}", x.rt())?
                }
            }
            None if with_rt => write!(w, "{},{}", MISSING, MISSING)?,
            None => w.write_all(MISSING.as_bytes())?,
        }
    }
    writeln!(w)?;
    Ok(())
}

/// Write vector of selected columns as a single line: id, length then one value per position
pub fn write_column_vector<W: Write>(
    w: &mut W,
    id: &str,
    v: &SignalVector<ColumnValues>,
) -> anyhow::Result<()> {
    write!(w, "{}\t{}", id, v.len())?;
    for s in v.slots() {
        let x = s.as_ref().map(|c| c.as_str()).unwrap_or(MISSING);
        write!(w, "\t{}", x)?;
    }
    writeln!(w)?;
    Ok(())
}

/// Mapping statistics per chromosome and strand followed by the totals
pub fn write_stats_report<W: Write>(w: &mut W, stats: &[(String, MapStats)]) -> anyhow::Result<()> {
    writeln!(w, "chr_id\texon\tintergenic\tintron\texon_ratio")?;
    let mut tot = MapStats::default();
    for (label, s) in stats {
        let ratio = 100.0 * (s.exon as f64) / ((s.total() + 1) as f64);
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{:.3}%",
            label, s.exon, s.intergenic, s.intron, ratio
        )?;
        tot += *s;
    }
    let ratio = match tot.total() {
        0 => 0.0,
        n => 100.0 * (tot.exon as f64) / (n as f64),
    };
    writeln!(
        w,
        "\n###Total\t{}\t{}\t{}\t{:.3}%",
        tot.exon, tot.intergenic, tot.intron, ratio
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape_vec() -> SignalVector<Site> {
        let mut v = SignalVector::new(4);
        v.set(1, Site::new(Score::from_f64(0.5), 3));
        v.set(2, Site::new(None, 7));
        v
    }

    #[test]
    fn shape_lines() {
        let v = shape_vec();
        let mut w = Vec::new();
        write_shape_vector(&mut w, "T1", &v, None, false).unwrap();
        write_shape_vector(&mut w, "T1", &v, None, true).unwrap();
        assert_eq!(
            String::from_utf8(w).unwrap(),
            "T1\t4\t*\tNULL\t0.500\tNULL\tNULL\n\
             T1\t4\t*\tNULL,NULL\t0.500,3\tNULL,7\tNULL,NULL\n"
        );
    }

    #[test]
    fn column_lines() {
        let mut v = SignalVector::new(3);
        v.set(0, ColumnValues::new("0,10,0,12"));
        let mut w = Vec::new();
        write_column_vector(&mut w, "chr1", &v).unwrap();
        assert_eq!(String::from_utf8(w).unwrap(), "chr1\t3\t0,10,0,12\tNULL\tNULL\n");
    }

    #[test]
    fn report() {
        let stats = vec![
            (
                "chr1+".to_owned(),
                MapStats {
                    exon: 3,
                    intron: 0,
                    intergenic: 0,
                },
            ),
            (
                "chr1-".to_owned(),
                MapStats {
                    exon: 1,
                    intron: 2,
                    intergenic: 1,
                },
            ),
        ];
        let mut w = Vec::new();
        write_stats_report(&mut w, &stats).unwrap();
        assert_eq!(
            String::from_utf8(w).unwrap(),
            "chr_id\texon\tintergenic\tintron\texon_ratio\n\
             chr1+\t3\t0\t0\t75.000%\n\
             chr1-\t1\t1\t2\t20.000%\n\
             \n###Total\t4\t1\t2\t57.143%\n"
        );
        let mut w = Vec::new();
        write_stats_report(&mut w, &[]).unwrap();
        assert!(String::from_utf8(w).unwrap().ends_with("###Total\t0\t0\t0\t0.000%\n"));
    }

    #[test]
    fn append_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.txt");
        for _ in 0..2 {
            let mut w = open_output(Some(&p), true).unwrap();
            writeln!(w, "line").unwrap();
            w.flush().unwrap();
        }
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "line\nline\n");
        let mut w = open_output(Some(&p), false).unwrap();
        writeln!(w, "new").unwrap();
        w.flush().unwrap();
        drop(w);
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "new\n");
    }
}
