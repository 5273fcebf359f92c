//! Score derivations: pure functions turning seven dimension scores into the
//! composite, priority tier, and convergence flag stored with each article.

use sieve_common::{RelevanceScores, DIMENSION_COUNT};

/// Highest score a single dimension can take.
pub const MAX_DIMENSION_SCORE: u8 = 3;

/// Dimensions scoring at least this count towards convergence.
const CONVERGENCE_SCORE: u8 = 2;

/// Dimensions needed at `CONVERGENCE_SCORE` or above to flag convergence.
const CONVERGENCE_MIN_DIMENSIONS: usize = 5;

/// Raw model output for one article, before derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionScores {
    pub dimensions: [u8; DIMENSION_COUNT],
    pub rationale: Option<String>,
}

/// Sum of all dimensions, 0–21.
pub fn composite(dimensions: &[u8; DIMENSION_COUNT]) -> u8 {
    dimensions.iter().sum()
}

/// Priority tier from a composite score: 1 is the most relevant, 5 the least.
pub fn tier(composite: u8) -> u8 {
    match composite {
        15.. => 1,
        10..=14 => 2,
        5..=9 => 3,
        1..=4 => 4,
        0 => 5,
    }
}

/// True when at least five dimensions scored 2 or higher.
pub fn convergence(dimensions: &[u8; DIMENSION_COUNT]) -> bool {
    dimensions.iter().filter(|&&d| d >= CONVERGENCE_SCORE).count() >= CONVERGENCE_MIN_DIMENSIONS
}

/// Clamp raw dimensions and derive the stored score set.
pub fn derive(raw: DimensionScores) -> RelevanceScores {
    let dimensions = raw.dimensions.map(|d| d.min(MAX_DIMENSION_SCORE));
    let composite = composite(&dimensions);
    RelevanceScores {
        dimensions,
        composite,
        tier: tier(composite),
        convergence: convergence(&dimensions),
        rationale: raw.rationale,
    }
}
