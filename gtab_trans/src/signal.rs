use std::{fmt, ops::Range, str::FromStr};

/// Strand of a genomic record or transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strand {
    Plus,
    Minus,
}

impl Strand {
    pub fn index(&self) -> usize {
        match self {
            Self::Plus => 0,
            Self::Minus => 1,
        }
    }
}

impl FromStr for Strand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Self::Plus),
            "-" => Ok(Self::Minus),
            _ => Err(anyhow!("Illegal strand {}", s)),
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
        }
    }
}

/// Normalized reactivity score, held to 3 decimal places (stored in thousandths)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Score(i32);

impl Score {
    /// Round x to 3 decimal places.  Returns None for non-finite or out of range values
    ///
    /// Rounding goes through the decimal formatter, so ties are resolved on the exact
    /// binary value (0.1235 gives 0.123)
    pub fn from_f64(x: f64) -> Option<Self> {
        if !x.is_finite() || x.abs() >= (i32::MAX / 1000) as f64 {
            return None;
        }
        format!("{:.3}", x).replace('.', "").parse::<i32>().ok().map(Self)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let a = self.0.unsigned_abs();
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:03}", sign, a / 1000, a % 1000)
    }
}

/// Values that can be placed in a SignalVector slot
pub trait Signal: Clone + Send + 'static {
    /// Does this value count as a valid (confident) observation?
    fn is_valid(&self) -> bool;
}

/// Signal at a single site: a confident score (if any) and the raw RT count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    score: Option<Score>,
    rt: u32,
}

impl Site {
    pub fn new(score: Option<Score>, rt: u32) -> Self {
        Self { score, rt }
    }

    pub fn score(&self) -> Option<Score> {
        self.score
    }

    pub fn rt(&self) -> u32 {
        self.rt
    }
}

impl Signal for Site {
    fn is_valid(&self) -> bool {
        self.score.is_some()
    }
}

/// Selected gTab columns for a site, joined with commas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnValues(Box<str>);

impl ColumnValues {
    pub fn new(s: &str) -> Self {
        Self(Box::from(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Signal for ColumnValues {
    fn is_valid(&self) -> bool {
        true
    }
}

/// Fixed length vector of optional signal values, indexed from 0
#[derive(Debug, Clone, PartialEq)]
pub struct SignalVector<T> {
    slots: Vec<Option<T>>,
}

impl<T: Signal> SignalVector<T> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Set slot ix, overwriting any previous value.  Returns false if ix is out of range
    pub fn set(&mut self, ix: usize, v: T) -> bool {
        match self.slots.get_mut(ix) {
            Some(s) => {
                *s = Some(v);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn get(&self, ix: usize) -> Option<&T> {
        self.slots.get(ix).and_then(|s| s.as_ref())
    }

    pub fn slots(&self) -> &[Option<T>] {
        &self.slots
    }

    /// Number of valid values in the vector
    pub fn n_valid(&self) -> usize {
        self.n_valid_in(0..self.slots.len())
    }

    /// Number of valid values in a range of slots
    pub fn n_valid_in(&self, r: Range<usize>) -> usize {
        self.slots[r]
            .iter()
            .filter(|s| s.as_ref().map(|v| v.is_valid()).unwrap_or(false))
            .count()
    }

    /// Set a range of slots to missing.  The range is clamped to the vector length
    pub fn blank(&mut self, r: Range<usize>) {
        let l = self.slots.len();
        let (a, b) = (r.start.min(l), r.end.min(l));
        for s in self.slots[a..b].iter_mut() {
            *s = None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_rounding_and_display() {
        assert_eq!(Score::from_f64(0.5).unwrap().to_string(), "0.500");
        assert_eq!(Score::from_f64(2.0).unwrap().to_string(), "2.000");
        assert_eq!(Score::from_f64(-0.0456).unwrap().to_string(), "-0.046");
        assert_eq!(Score::from_f64(12.3456).unwrap().to_string(), "12.346");
        let s = Score::from_f64(1.2345).unwrap().to_string();
        assert_eq!(s, "1.234");
        for (x, s) in [(0.1235, "0.123"), (1.0005, "1.000"), (0.8885, "0.888")] {
            assert_eq!(Score::from_f64(x).unwrap().to_string(), s);
        }
        assert_eq!(Score::from_f64(-0.0004).unwrap().to_string(), "0.000");
        assert!(Score::from_f64(f64::NAN).is_none());
        assert!(Score::from_f64(f64::INFINITY).is_none());
    }

    #[test]
    fn strand_parsing() {
        assert_eq!("+".parse::<Strand>().unwrap(), Strand::Plus);
        assert_eq!("-".parse::<Strand>().unwrap(), Strand::Minus);
        assert!(".".parse::<Strand>().is_err());
        assert_eq!(Strand::Minus.to_string(), "-");
    }

    #[test]
    fn vector_set_and_blank() {
        let mut v = SignalVector::new(10);
        assert!(v.set(0, Site::new(Score::from_f64(0.1), 1)));
        assert!(v.set(9, Site::new(None, 4)));
        assert!(!v.set(10, Site::new(None, 4)));
        assert_eq!(v.n_valid(), 1);
        // Last write wins
        assert!(v.set(9, Site::new(Score::from_f64(0.7), 2)));
        assert_eq!(v.get(9).unwrap().rt(), 2);
        assert_eq!(v.n_valid(), 2);
        assert_eq!(v.n_valid_in(1..9), 0);
        v.blank(8..20);
        assert!(v.get(9).is_none());
        assert_eq!(v.len(), 10);
    }
}
