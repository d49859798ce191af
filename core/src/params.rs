use crate::config::{DEFAULT_B, DEFAULT_K1};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// BM25 tuning parameters.
///
/// `k1` controls term-frequency saturation, `b` controls how strongly scores
/// are normalized by document length (0 = not at all, 1 = fully).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: DEFAULT_K1, b: DEFAULT_B }
    }
}

impl Bm25Params {
    /// Validated constructor.
    pub fn new(k1: f32, b: f32) -> Result<Self> {
        let params = Self { k1, b };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(Error::InvalidParameter(format!("k1 must be a finite value >= 0, got {}", self.k1)));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(Error::InvalidParameter(format!("b must lie in [0, 1], got {}", self.b)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Bm25Params::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(Bm25Params::new(-0.1, 0.75), Err(Error::InvalidParameter(_))));
        assert!(matches!(Bm25Params::new(1.2, 1.5), Err(Error::InvalidParameter(_))));
        assert!(matches!(Bm25Params::new(1.2, -0.01), Err(Error::InvalidParameter(_))));
        assert!(matches!(Bm25Params::new(f32::NAN, 0.5), Err(Error::InvalidParameter(_))));
        assert!(Bm25Params::new(0.0, 0.0).is_ok());
        assert!(Bm25Params::new(2.0, 1.0).is_ok());
    }
}
