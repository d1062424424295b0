use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{annotation::AnnotationIndex, expression::ExpressionTable, filter::FilterParams};

/// What the genomic records are projected onto
pub enum Target {
    /// Transcripts from an annotation
    Transcripts(AnnotationIndex),
    /// Whole chromosomes (+ strand only), with the chromosome sizes
    Chromosomes(HashMap<Arc<str>, usize>),
}

/// What is carried for each position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Confidence filtered SHAPE scores with RT counts
    Shape { min_depth: u64, with_rt: bool },
    /// Selected gTab columns (1 based)
    Columns(Vec<usize>),
}

pub struct Config {
    input: PathBuf,
    output: Option<PathBuf>,
    append: bool,
    target: Target,
    mode: Mode,
    filter: FilterParams,
    expression: Option<ExpressionTable>,
    threads: usize,
}

impl Config {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: PathBuf,
        output: Option<PathBuf>,
        append: bool,
        target: Target,
        mode: Mode,
        filter: FilterParams,
        expression: Option<ExpressionTable>,
        threads: usize,
    ) -> Self {
        Self {
            input,
            output,
            append,
            target,
            mode,
            filter,
            expression,
            threads,
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn append(&self) -> bool {
        self.append
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn filter(&self) -> &FilterParams {
        &self.filter
    }

    pub fn expression(&self) -> Option<&ExpressionTable> {
        self.expression.as_ref()
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}
