//! Majority voting over normalised node predictions.
//!
//! The engine is pure and strictly numeric: predictions arrive already
//! coerced to class 0 or 1 (see `predict::normalise`), and the outcome
//! carries everything a caller needs to build its response, including the
//! tie case as `decision: None`.

use serde::Serialize;

/// One normalised, successful node answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vote {
    pub model: String,
    pub prediction: u8,
    pub confidence: f64,
}

impl Vote {
    pub fn new(model: impl Into<String>, prediction: u8, confidence: f64) -> Self {
        Self {
            model: model.into(),
            prediction,
            confidence,
        }
    }
}

/// Ballots per class, keyed `"0"`/`"1"` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VoteTally {
    #[serde(rename = "0")]
    pub normal: u32,
    #[serde(rename = "1")]
    pub anomaly: u32,
}

/// The aggregate decision over one fan-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub votes: VoteTally,
    pub total_votes: usize,
    pub total_models: usize,
    pub decision: Option<u8>,
    pub confidence: f64,
    pub message: String,
}

/// Tally votes into a decision.
///
/// `total_models` counts every node that was dispatched to, including the
/// ones whose responses did not survive normalisation.
pub fn tally(votes: &[Vote], total_models: usize) -> VoteOutcome {
    if votes.is_empty() {
        return VoteOutcome {
            votes: VoteTally::default(),
            total_votes: 0,
            total_models,
            decision: None,
            confidence: 0.0,
            message: "No models returned valid predictions".to_string(),
        };
    }

    let mut counts = VoteTally::default();
    let mut confidence_sums = [0.0_f64; 2];
    for vote in votes {
        match vote.prediction {
            1 => {
                counts.anomaly += 1;
                confidence_sums[1] += vote.confidence;
            }
            _ => {
                counts.normal += 1;
                confidence_sums[0] += vote.confidence;
            }
        }
    }

    if counts.normal == counts.anomaly {
        return VoteOutcome {
            votes: counts,
            total_votes: votes.len(),
            total_models,
            decision: None,
            confidence: 0.0,
            message: format!("Tie between classes with {} votes each", counts.normal),
        };
    }

    let decision: u8 = if counts.anomaly > counts.normal { 1 } else { 0 };
    let winning_votes = if decision == 1 {
        counts.anomaly
    } else {
        counts.normal
    };
    let confidence = confidence_sums[decision as usize] / f64::from(winning_votes);

    VoteOutcome {
        votes: counts,
        total_votes: votes.len(),
        total_models,
        decision: Some(decision),
        confidence,
        message: format!("Class {decision} won by {winning_votes} votes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_votes_yields_null_decision() {
        let outcome = tally(&[], 3);
        assert_eq!(outcome.decision, None);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.total_votes, 0);
        assert_eq!(outcome.total_models, 3);
        assert_eq!(outcome.message, "No models returned valid predictions");
    }

    #[test]
    fn tie_yields_null_decision() {
        let votes = vec![Vote::new("a", 1, 0.8), Vote::new("b", 0, 0.9)];
        let outcome = tally(&votes, 2);
        assert_eq!(outcome.decision, None);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(
            outcome.votes,
            VoteTally {
                normal: 1,
                anomaly: 1
            }
        );
        assert!(outcome.message.starts_with("Tie"));
    }

    #[test]
    fn majority_averages_winning_confidences() {
        // A→1/0.6, B→1/0.8, C→0/0.7: class 1 wins with mean confidence 0.7.
        let votes = vec![
            Vote::new("a", 1, 0.6),
            Vote::new("b", 1, 0.8),
            Vote::new("c", 0, 0.7),
        ];
        let outcome = tally(&votes, 3);
        assert_eq!(outcome.decision, Some(1));
        assert!((outcome.confidence - 0.7).abs() < 1e-9);
        assert_eq!(
            outcome.votes,
            VoteTally {
                normal: 1,
                anomaly: 2
            }
        );
        assert_eq!(outcome.message, "Class 1 won by 2 votes");
    }

    #[test]
    fn normal_class_can_win() {
        let votes = vec![
            Vote::new("a", 0, 0.5),
            Vote::new("b", 0, 1.0),
            Vote::new("c", 1, 0.99),
        ];
        let outcome = tally(&votes, 3);
        assert_eq!(outcome.decision, Some(0));
        assert!((outcome.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn single_vote_decides() {
        let outcome = tally(&[Vote::new("solo", 1, 0.42)], 1);
        assert_eq!(outcome.decision, Some(1));
        assert!((outcome.confidence - 0.42).abs() < 1e-9);
        assert_eq!(outcome.total_votes, 1);
    }

    #[test]
    fn loser_confidences_do_not_leak_into_mean() {
        let votes = vec![
            Vote::new("a", 1, 0.2),
            Vote::new("b", 1, 0.4),
            Vote::new("c", 0, 1.0),
        ];
        let outcome = tally(&votes, 3);
        assert_eq!(outcome.decision, Some(1));
        assert!((outcome.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn tally_serializes_class_keys() {
        let outcome = tally(&[Vote::new("a", 1, 1.0)], 1);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["votes"]["0"], 0);
        assert_eq!(json["votes"]["1"], 1);
        assert_eq!(json["totalVotes"], 1);
        assert_eq!(json["decision"], 1);
    }
}
