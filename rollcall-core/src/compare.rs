use crate::encoder::Embedding;

/// Result of matching a probe encoding against a reference set
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Index of the nearest reference
    pub best_index: usize,
    /// Distance to the nearest reference
    pub distance: f32,
    /// Whether the nearest reference is within the threshold
    pub matched: bool,
    /// Distance to every reference, in input order
    pub distances: Vec<f32>,
}

/// Euclidean distance between two encodings.
/// Encodings of different lengths never match.
pub fn face_distance(a: &Embedding, b: &Embedding) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Find the nearest reference and decide whether it is a match.
/// Returns `None` when there are no references.
pub fn match_faces<'a, I>(probe: &Embedding, references: I, threshold: f32) -> Option<MatchOutcome>
where
    I: IntoIterator<Item = &'a Embedding>,
{
    let distances: Vec<f32> = references
        .into_iter()
        .map(|reference| face_distance(probe, reference))
        .collect();

    // First minimum wins on ties
    let (best_index, distance) = distances
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (idx, d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ => Some((idx, d)),
        })?;

    Some(MatchOutcome {
        best_index,
        distance,
        matched: distance <= threshold,
        distances,
    })
}
