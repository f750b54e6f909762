//! Verdict aggregation.
//!
//! The ensemble label is the plurality vote across successful verdicts.
//! Ties are broken by summed class-probability mass over all verdicts,
//! never by label ordering, so a 3-3 split goes to whichever label the
//! ensemble as a whole considers more probable.

use super::ModelVerdict;

/// The aggregated vote outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Index of the winning label
    pub label_index: usize,
    /// Mean probability assigned to the winning label by its voters
    pub confidence: f32,
    /// Voters for the winning label / successful verdicts
    pub agreement_ratio: f32,
}

/// Aggregates a non-empty slice of verdicts over `class_count` labels.
///
/// Callers guarantee at least one verdict; an exhausted ensemble is
/// rejected before aggregation.
pub fn aggregate(verdicts: &[ModelVerdict], class_count: usize) -> Aggregate {
    debug_assert!(!verdicts.is_empty());

    let mut votes = vec![0usize; class_count];
    let mut mass = vec![0f32; class_count];
    for verdict in verdicts {
        votes[verdict.label_index] += 1;
        for (i, &p) in verdict.probabilities.iter().enumerate() {
            mass[i] += p;
        }
    }

    let top_votes = *votes.iter().max().unwrap_or(&0);
    let winner = (0..class_count)
        .filter(|&i| votes[i] == top_votes)
        .max_by(|&a, &b| mass[a].total_cmp(&mass[b]))
        .unwrap_or(0);

    let voters: Vec<&ModelVerdict> = verdicts
        .iter()
        .filter(|v| v.label_index == winner)
        .collect();
    let confidence =
        voters.iter().map(|v| v.probabilities[winner]).sum::<f32>() / voters.len() as f32;
    let agreement_ratio = voters.len() as f32 / verdicts.len() as f32;

    Aggregate {
        label_index: winner,
        confidence,
        agreement_ratio,
    }
}
