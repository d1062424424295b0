use std::{num::NonZeroUsize, path::PathBuf};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_parser, Arg, ArgAction,
    ArgGroup, ArgMatches, Command,
};

use anyhow::Context;
use regex::Regex;

use utils::{init_log, LogLevel};

use crate::{
    annotation::AnnotationIndex,
    config::{Config, Mode, Target},
    contig::read_chrom_sizes,
    expression::ExpressionTable,
    filter::FilterParams,
};

/// Set up definition of command options for clap
fn cli_model() -> Command {
    Command::new(crate_name!())
        .about(crate_description!())
        .version(crate_version!())
        .author(crate_authors!())
        .arg(
            Arg::new("timestamp")
                .short('X')
                .long("timestamp")
                .value_parser(value_parser!(stderrlog::Timestamp))
                .value_name("GRANULARITY")
                .default_value("none")
                .help("Prepend log entries with a timestamp"),
        )
        .arg(
            Arg::new("loglevel")
                .short('l')
                .long("loglevel")
                .value_name("LOGLEVEL")
                .value_parser(value_parser!(LogLevel))
                .ignore_case(true)
                .default_value("info")
                .help("Set log level"),
        )
        .arg(
            Arg::new("quiet")
                .action(ArgAction::SetTrue)
                .long("quiet")
                .conflicts_with("loglevel")
                .help("Silence all output"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .default_value("5")
                .help("Set number of worker threads"),
        )
        .arg(
            Arg::new("min_depth")
                .short('c')
                .long("min-depth")
                .value_parser(value_parser!(u64))
                .value_name("INT")
                .default_value("200")
                .help("Minimum coverage depth for a confident score"),
        )
        .arg(
            Arg::new("min_ave_rt")
                .short('T')
                .long("min-ave-rt")
                .value_parser(value_parser!(f64))
                .value_name("FLOAT")
                .default_value("2.0")
                .help("Minimum average RT count over the transcript interior"),
        )
        .arg(
            Arg::new("min_fpkm")
                .short('M')
                .long("min-fpkm")
                .value_parser(value_parser!(f64))
                .value_name("FLOAT")
                .default_value("5.0")
                .help("Minimum expression (FPKM) if expression tables are given"),
        )
        .arg(
            Arg::new("min_cov_num")
                .short('n')
                .long("min-cov-num")
                .value_parser(value_parser!(usize))
                .value_name("INT")
                .default_value("10")
                .help("Minimum number of confident positions over the transcript interior"),
        )
        .arg(
            Arg::new("min_cov_ratio")
                .short('m')
                .long("min-cov-ratio")
                .value_parser(value_parser!(f64))
                .value_name("FLOAT")
                .default_value("0.1")
                .help("Minimum proportion of confident positions (0-1)"),
        )
        .arg(
            Arg::new("fpkm")
                .short('r')
                .long("fpkm")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .help("Expression table(s), comma separated"),
        )
        .arg(
            Arg::new("columns")
                .short('C')
                .long("columns")
                .value_parser(value_parser!(String))
                .value_name("RANGES")
                .conflicts_with_all(["with_rt", "fpkm"])
                .help("Output selected gTab columns instead of SHAPE scores (i.e., 4-7,9)"),
        )
        .arg(
            Arg::new("with_rt")
                .short('R')
                .long("with-rt")
                .action(ArgAction::SetTrue)
                .help("Output score,RT count pairs"),
        )
        .arg(
            Arg::new("append")
                .long("append")
                .action(ArgAction::SetTrue)
                .requires("output")
                .help("Append to output file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Set output file [default: <stdout>]"),
        )
        .arg(
            Arg::new("annotation")
                .short('g')
                .long("annotation")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("BED12 file with transcript models"),
        )
        .arg(
            Arg::new("chrom_sizes")
                .short('s')
                .long("chrom-sizes")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Chromosome size file (project onto chromosomes)"),
        )
        .group(
            ArgGroup::new("target")
                .args(["annotation", "chrom_sizes"])
                .required(true),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .required(true)
                .help("Input gTab file"),
        )
}

fn parse_col(s: &str) -> anyhow::Result<usize> {
    match s.parse::<usize>() {
        Ok(0) => Err(anyhow!("Column numbers start from 1")),
        Ok(x) => Ok(x),
        Err(e) => Err(anyhow!("Error parsing column {}: {}", s, e)),
    }
}

/// Parse a comma delimited set of columns or column ranges (i.e., 4-7,9)
/// into a list of 1 based columns, keeping the order given
pub fn parse_columns(s: &str) -> anyhow::Result<Vec<usize>> {
    let r = Regex::new(r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$")?;
    let mut v = Vec::new();
    for s1 in s.split(',') {
        let c = r
            .captures(s1)
            .ok_or_else(|| anyhow!("Illegal column range: {}", s1))?;
        let a = parse_col(&c[1])?;
        let b = match c.get(2) {
            Some(m) => parse_col(m.as_str())?,
            None => a,
        };
        if b < a {
            return Err(anyhow!("Range error - {} > {}", a, b));
        }
        v.extend(a..=b)
    }
    Ok(v)
}

fn check_threshold(m: &ArgMatches, name: &str, max: Option<f64>) -> anyhow::Result<f64> {
    let x = *m
        .get_one::<f64>(name)
        .with_context(|| format!("Missing default for {}", name))?;
    if !x.is_finite() || x < 0.0 || max.map(|y| x > y).unwrap_or(false) {
        Err(anyhow!("Illegal value for {}: {}", name, x))
    } else {
        Ok(x)
    }
}

/// Set up Config from the command line matches
fn make_config(m: &ArgMatches) -> anyhow::Result<Config> {
    let input = m
        .get_one::<PathBuf>("input")
        .expect("Missing input file")
        .to_owned();

    let filter = FilterParams {
        min_cov_ratio: check_threshold(m, "min_cov_ratio", Some(1.0))?,
        min_cov_num: *m.get_one::<usize>("min_cov_num").expect("Missing default"),
        min_ave_rt: check_threshold(m, "min_ave_rt", None)?,
        min_expression: check_threshold(m, "min_fpkm", None)?,
    };

    let mode = match m.get_one::<String>("columns") {
        Some(s) => Mode::Columns(
            parse_columns(s).with_context(|| format!("Could not parse column list {}", s))?,
        ),
        None => Mode::Shape {
            min_depth: *m.get_one::<u64>("min_depth").expect("Missing default"),
            with_rt: m.get_flag("with_rt"),
        },
    };

    let expression = match m.get_many::<PathBuf>("fpkm") {
        Some(files) => {
            let files: Vec<_> = files.collect();
            let e = ExpressionTable::from_files(&files)
                .with_context(|| "Could not read expression tables")?;
            if e.is_empty() {
                warn!("No transcripts with status OK found in expression tables")
            }
            Some(e)
        }
        None => None,
    };

    let target = if let Some(p) = m.get_one::<PathBuf>("annotation") {
        Target::Transcripts(
            AnnotationIndex::from_bed12(p).with_context(|| "Could not read annotation")?,
        )
    } else {
        let p = m
            .get_one::<PathBuf>("chrom_sizes")
            .expect("Missing chromosome size file");
        Target::Chromosomes(
            read_chrom_sizes(p).with_context(|| "Could not read chromosome sizes")?,
        )
    };

    let threads = usize::from(*m.get_one::<NonZeroUsize>("threads").expect("Missing default"));
    let output = m.get_one::<PathBuf>("output").map(|p| p.to_owned());

    debug!("Mode: {:?}, filter: {:?}, threads: {}", mode, filter, threads);
    Ok(Config::new(
        input,
        output,
        m.get_flag("append"),
        target,
        mode,
        filter,
        expression,
        threads,
    ))
}

/// Handle command line options.  Set up Config structure
pub fn handle_cli() -> anyhow::Result<Config> {
    // Get matches from command line
    let m = cli_model().get_matches();

    // Setup logging
    init_log(&m);

    debug!("Processing command line options");
    make_config(&m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn matches(args: &[&str]) -> Result<ArgMatches, clap::Error> {
        cli_model().try_get_matches_from(std::iter::once("gtab_trans").chain(args.iter().copied()))
    }

    #[test]
    fn column_ranges() {
        assert_eq!(parse_columns("4-7,9").unwrap(), vec![4, 5, 6, 7, 9]);
        assert_eq!(parse_columns(" 9 , 2 - 3").unwrap(), vec![9, 2, 3]);
        assert!(parse_columns("7-4").is_err());
        assert!(parse_columns("0-3").is_err());
        assert!(parse_columns("4,").is_err());
        assert!(parse_columns("a-b").is_err());
    }

    #[test]
    fn target_required_and_exclusive() {
        assert!(matches(&["-i", "in.gTab"]).is_err());
        assert!(matches(&["-i", "in.gTab", "-g", "a.bed", "-s", "chrom.sizes"]).is_err());
        assert!(matches(&["-g", "a.bed"]).is_err());
        assert!(matches(&["-i", "in.gTab", "-s", "chrom.sizes", "--append"]).is_err());
        assert!(matches(&["-i", "in.gTab", "-s", "c", "-C", "4-7", "-R"]).is_err());
        let m = matches(&["-i", "in.gTab", "-s", "c", "-r", "a.txt,b.txt"]).unwrap();
        assert_eq!(m.get_many::<PathBuf>("fpkm").unwrap().count(), 2);
    }

    #[test]
    fn config_from_args() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "chr1\t1000\n").unwrap();
        f.flush().unwrap();
        let sizes = f.path().to_str().unwrap();

        let m = matches(&["-i", "in.gTab", "-s", sizes, "-t", "3", "-R"]).unwrap();
        let cfg = make_config(&m).unwrap();
        assert_eq!(cfg.threads(), 3);
        assert_eq!(
            cfg.mode(),
            &Mode::Shape {
                min_depth: 200,
                with_rt: true
            }
        );
        assert!(cfg.output().is_none());
        assert!(matches!(cfg.target(), Target::Chromosomes(h) if h.len() == 1));
        assert_eq!(cfg.filter().min_cov_num, 10);

        let m = matches(&["-i", "in.gTab", "-s", sizes, "-C", "4-5"]).unwrap();
        assert_eq!(make_config(&m).unwrap().mode(), &Mode::Columns(vec![4, 5]));

        let m = matches(&["-i", "in.gTab", "-s", sizes, "-m", "1.5"]).unwrap();
        assert!(make_config(&m).is_err());
    }
}
