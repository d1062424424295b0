/// Quality filtering of finished SHAPE vectors
///
/// The first and last positions of a transcript are not reliable, so the coverage
/// and RT statistics are calculated over an interior window, and the edges of
/// vectors that pass are blanked.
use std::ops::Range;

use crate::{
    expression::ExpressionTable,
    signal::{Signal, SignalVector, Site},
};

/// Positions blanked at the 5' end
pub const HEAD_TRIM: usize = 5;
/// Positions blanked at the 3' end
pub const TAIL_TRIM: usize = 30;

#[derive(Debug, Clone)]
pub struct FilterParams {
    pub min_cov_ratio: f64,
    pub min_cov_num: usize,
    pub min_ave_rt: f64,
    pub min_expression: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            min_cov_ratio: 0.1,
            min_cov_num: 10,
            min_ave_rt: 2.0,
            min_expression: 5.0,
        }
    }
}

fn interior(len: usize) -> Range<usize> {
    if len <= HEAD_TRIM + TAIL_TRIM {
        0..0
    } else {
        HEAD_TRIM..len - TAIL_TRIM
    }
}

/// Check whether a vector passes the quality thresholds
pub fn passes(
    id: &str,
    v: &SignalVector<Site>,
    params: &FilterParams,
    expr: Option<&ExpressionTable>,
) -> bool {
    let l = v.len();
    let r = interior(l);
    let n_int = r.len();
    let n_valid = v.n_valid_in(r.clone());
    if l == 0 || (n_valid as f64) / (l as f64) < params.min_cov_ratio {
        return false;
    }
    let ave_rt = if n_int > 0 {
        let s: u64 = v.slots()[r]
            .iter()
            .flatten()
            .map(|x| x.rt() as u64)
            .sum();
        s as f64 / n_int as f64
    } else {
        0.0
    };
    if ave_rt < params.min_ave_rt || n_valid < params.min_cov_num {
        return false;
    }
    match expr {
        Some(e) => e.get(id).map(|x| x >= params.min_expression).unwrap_or(false),
        None => true,
    }
}

/// Blank the edges of a vector
pub fn trim_edges<T: Signal>(v: &mut SignalVector<T>) {
    let l = v.len();
    v.blank(0..HEAD_TRIM);
    v.blank(l.saturating_sub(TAIL_TRIM)..l);
}

/// Filter a single vector, trimming it if it passes
pub fn filter_vector(
    id: &str,
    v: &mut SignalVector<Site>,
    params: &FilterParams,
    expr: Option<&ExpressionTable>,
) -> bool {
    if passes(id, v, params, expr) {
        trim_edges(v);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{project::SignalTable, signal::Score};
    use std::{io::Write, sync::Arc};

    fn filter_table(table: &mut SignalTable<Site>, p: &FilterParams) {
        table.retain_mut(|(id, v)| filter_vector(id, v, p, None))
    }

    fn params() -> FilterParams {
        FilterParams {
            min_cov_ratio: 0.5,
            min_cov_num: 10,
            min_ave_rt: 2.0,
            min_expression: 5.0,
        }
    }

    // Vector of length l where every position has a score and the given RT count
    fn full(l: usize, rt: u32) -> SignalVector<Site> {
        let mut v = SignalVector::new(l);
        for i in 0..l {
            v.set(i, Site::new(Score::from_f64(0.5), rt));
        }
        v
    }

    #[test]
    fn edges_trimmed() {
        let mut v = full(100, 3);
        assert!(filter_vector("T1", &mut v, &params(), None));
        assert!(v.slots()[..5].iter().all(|s| s.is_none()));
        assert!(v.slots()[70..].iter().all(|s| s.is_none()));
        assert_eq!(v.n_valid(), 65);
    }

    #[test]
    fn filtering_is_idempotent() {
        let mut table: SignalTable<Site> = vec![
            (Arc::from("A"), full(100, 3)),
            (Arc::from("B"), full(100, 1)),
            (Arc::from("C"), full(80, 2)),
        ];
        filter_table(&mut table, &params());
        let ids: Vec<_> = table.iter().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        let before = table.clone();
        filter_table(&mut table, &params());
        assert_eq!(table, before);
    }

    #[test]
    fn thresholds() {
        let p = params();
        // Interior coverage below ratio
        let mut v = full(100, 3);
        v.blank(5..60);
        assert!(!passes("T", &v, &p, None));
        // Too few confident positions
        let mut v = full(50, 3);
        for i in 5..20 {
            v.set(i, Site::new(None, 3));
        }
        assert_eq!(v.n_valid_in(interior(50)), 0);
        assert!(!passes("T", &v, &p, None));
        // RT average uses all interior positions
        let mut v = full(100, 0);
        for i in 5..70 {
            v.set(i, Site::new(if i < 20 { None } else { Score::from_f64(0.1) }, 2));
        }
        assert!(passes("T", &v, &p, None));
    }

    #[test]
    fn short_vectors_fail() {
        let p = FilterParams {
            min_cov_ratio: 0.0,
            min_cov_num: 0,
            min_ave_rt: 0.1,
            min_expression: 0.0,
        };
        assert!(!passes("T", &full(35, 10), &p, None));
        assert!(passes("T", &full(36, 10), &p, None));
        let mut v = full(20, 10);
        trim_edges(&mut v);
        assert_eq!(v.n_valid(), 0);
    }

    #[test]
    fn expression_threshold() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "tracking_id\t2\t3\t4\t5\t6\t7\t8\t9\tFPKM\t11\t12\tstatus").unwrap();
        for (id, x) in [("T1", 5.0), ("T2", 4.9)] {
            writeln!(f, "{}\t-\t-\t-\t-\t-\t-\t-\t-\t{}\t0\t0\tOK", id, x).unwrap();
        }
        f.flush().unwrap();
        let e = ExpressionTable::from_files(&[f.path()]).unwrap();
        let (p, v) = (params(), full(100, 3));
        assert!(passes("T1", &v, &p, None));
        assert!(passes("T1", &v, &p, Some(&e)));
        assert!(!passes("T2", &v, &p, Some(&e)));
        // Transcripts missing from the table are rejected
        assert!(!passes("T3", &v, &p, Some(&e)));
    }
}
