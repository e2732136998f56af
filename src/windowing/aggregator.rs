use crate::error::RestoreError;
use crate::types::{argmax_first, Margin, ProbabilityVector, Segment};
use crate::windowing::margin::unmasked_range;

/// Floor for the fallback scores of a token whose exact product is zero for
/// every class.
const MIN_PROBABILITY: f64 = 1e-30;

/// One segment's outputs, aligned with its tokens, plus the margins that
/// apply to it.
#[derive(Debug, Clone, Copy)]
pub struct Contribution<'a> {
    pub segment: Segment,
    pub margin: Margin,
    pub probabilities: &'a [ProbabilityVector],
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedQuery {
    /// Winning label index per query token.
    pub labels: Vec<usize>,
    /// Normalized product of every kept vector per query token.
    pub probabilities: Vec<ProbabilityVector>,
}

/// Merges overlapping segment outputs into one label per query token.
///
/// Kept vectors for a token are multiplied elementwise (summed in log space,
/// so a zero from any window vetoes that class) and re-normalized; the label
/// is the arg-max, smallest index on ties. If the product is zero for every
/// class, the token falls back to the product of probabilities floored at
/// `1e-30`.
/// Contributions are folded in `start_offset` order whatever order they
/// arrive in, so the result is bit-identical for any arrival order.
pub fn aggregate<'a>(
    query_length: usize,
    contributions: impl IntoIterator<Item = Contribution<'a>>,
) -> Result<AggregatedQuery, RestoreError> {
    let mut contributions: Vec<Contribution<'a>> = contributions.into_iter().collect();
    contributions.sort_by_key(|c| (c.segment.start_offset, c.segment.length));

    let mut accumulator = Accumulator::new(query_length);
    for contribution in &contributions {
        accumulator.add(contribution)?;
    }
    accumulator.finish()
}

struct Accumulator {
    query_length: usize,
    num_labels: Option<usize>,
    /// Row-major `query_length x num_labels`, allocated on first vector.
    log_sums: Vec<f64>,
    /// Same layout, with every probability floored at `MIN_PROBABILITY`.
    floored_sums: Vec<f64>,
    counts: Vec<u32>,
}

impl Accumulator {
    fn new(query_length: usize) -> Self {
        Self {
            query_length,
            num_labels: None,
            log_sums: Vec::new(),
            floored_sums: Vec::new(),
            counts: vec![0; query_length],
        }
    }

    fn add(&mut self, contribution: &Contribution<'_>) -> Result<(), RestoreError> {
        let segment = &contribution.segment;
        if contribution.probabilities.len() != segment.length {
            return Err(RestoreError::model_output(format!(
                "segment at offset {} has {} tokens but {} output vectors",
                segment.start_offset,
                segment.length,
                contribution.probabilities.len()
            )));
        }
        if segment.end_offset() > self.query_length {
            return Err(RestoreError::invalid_input(format!(
                "segment {}..{} exceeds query length {}",
                segment.start_offset,
                segment.end_offset(),
                self.query_length
            )));
        }

        for token_index in unmasked_range(segment, contribution.margin) {
            let vector = &contribution.probabilities[token_index - segment.start_offset];
            let k = self.label_count(vector.len())?;
            let row = token_index * k..(token_index + 1) * k;
            let exact = self.log_sums[row.clone()].iter_mut();
            let floored = self.floored_sums[row].iter_mut();
            for ((acc, floor_acc), &p) in exact.zip(floored).zip(vector.as_slice()) {
                let p = p as f64;
                *acc += p.ln();
                *floor_acc += p.max(MIN_PROBABILITY).ln();
            }
            self.counts[token_index] += 1;
        }
        Ok(())
    }

    fn label_count(&mut self, len: usize) -> Result<usize, RestoreError> {
        match self.num_labels {
            Some(k) if k == len => Ok(k),
            Some(k) => Err(RestoreError::model_output(format!(
                "probability vector has {len} classes, expected {k}"
            ))),
            None => {
                self.num_labels = Some(len);
                self.log_sums = vec![0.0; self.query_length * len];
                self.floored_sums = vec![0.0; self.query_length * len];
                Ok(len)
            }
        }
    }

    fn finish(self) -> Result<AggregatedQuery, RestoreError> {
        if let Some(token_index) = self.counts.iter().position(|&c| c == 0) {
            tracing::error!(
                token_index,
                query_length = self.query_length,
                "token has no unmasked segment output"
            );
            return Err(RestoreError::Coverage { token_index });
        }
        let Some(k) = self.num_labels else {
            return Ok(AggregatedQuery {
                labels: Vec::new(),
                probabilities: Vec::new(),
            });
        };

        let mut labels = Vec::with_capacity(self.query_length);
        let mut probabilities = Vec::with_capacity(self.query_length);
        let rows = self
            .log_sums
            .chunks_exact(k)
            .zip(self.floored_sums.chunks_exact(k));
        for (exact, floored) in rows {
            let row = if exact.iter().all(|s| *s == f64::NEG_INFINITY) {
                floored
            } else {
                exact
            };
            labels.push(argmax_first(row.iter().copied()));
            probabilities.push(ProbabilityVector::from_log_scores(row));
        }
        Ok(AggregatedQuery {
            labels,
            probabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::windowing::margin::mask;
    use crate::windowing::segmenter::segment;

    fn pv(values: &[f32]) -> ProbabilityVector {
        ProbabilityVector::new(values.to_vec()).unwrap()
    }

    fn seg(start_offset: usize, length: usize, is_first: bool, is_last: bool) -> Segment {
        Segment {
            start_offset,
            length,
            is_first,
            is_last,
        }
    }

    #[test]
    fn single_segment_passes_labels_through() {
        let probs = vec![pv(&[0.9, 0.1]), pv(&[0.2, 0.8])];
        let out = aggregate(
            2,
            [Contribution {
                segment: seg(0, 2, true, true),
                margin: Margin::default(),
                probabilities: &probs,
            }],
        )
        .unwrap();
        assert_eq!(out.labels, vec![0, 1]);
        assert!((out.probabilities[1].as_slice()[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn overlapping_windows_multiply_probabilities() {
        // Token 1 is covered by both windows: 0.6 * 0.1 vs 0.4 * 0.9.
        let a = vec![pv(&[0.9, 0.1]), pv(&[0.6, 0.4])];
        let b = vec![pv(&[0.1, 0.9]), pv(&[0.3, 0.7])];
        let out = aggregate(
            3,
            [
                Contribution {
                    segment: seg(0, 2, true, false),
                    margin: Margin::default(),
                    probabilities: &a,
                },
                Contribution {
                    segment: seg(1, 2, false, true),
                    margin: Margin::default(),
                    probabilities: &b,
                },
            ],
        )
        .unwrap();
        assert_eq!(out.labels, vec![0, 1, 1]);
        let combined = out.probabilities[1].as_slice();
        let expected = 0.36 / (0.06 + 0.36);
        assert!((combined[1] as f64 - expected).abs() < 1e-6);
    }

    #[test]
    fn masked_positions_do_not_vote() {
        // Second window is confident but its left margin hides token 1.
        let a = vec![pv(&[0.9, 0.1]), pv(&[0.6, 0.4]), pv(&[0.5, 0.5])];
        let b = vec![pv(&[0.0, 1.0]), pv(&[0.5, 0.5]), pv(&[0.2, 0.8])];
        let first = seg(0, 3, true, false);
        let last = seg(1, 3, false, true);
        let out = aggregate(
            4,
            [
                Contribution {
                    segment: first,
                    margin: mask(&first, 1),
                    probabilities: &a,
                },
                Contribution {
                    segment: last,
                    margin: mask(&last, 1),
                    probabilities: &b,
                },
            ],
        )
        .unwrap();
        assert_eq!(out.labels, vec![0, 0, 0, 1]);
    }

    #[test]
    fn ties_resolve_to_smallest_label() {
        let probs = vec![pv(&[0.25, 0.25, 0.5]), pv(&[0.4, 0.4, 0.2])];
        let out = aggregate(
            2,
            [Contribution {
                segment: seg(0, 2, true, true),
                margin: Margin::default(),
                probabilities: &probs,
            }],
        )
        .unwrap();
        assert_eq!(out.labels, vec![2, 0]);
    }

    #[test]
    fn arrival_order_does_not_change_the_result() {
        let query = [0u32; 7];
        let segments = segment(&query, 3, 1).unwrap();
        let outputs: Vec<Vec<ProbabilityVector>> = segments
            .iter()
            .map(|s| {
                (0..s.length)
                    .map(|p| {
                        let x = 0.1 + 0.1 * ((s.start_offset * 3 + p) % 8) as f32;
                        pv(&[x, 1.0 - x])
                    })
                    .collect()
            })
            .collect();
        let contributions: Vec<Contribution<'_>> = segments
            .iter()
            .zip(&outputs)
            .map(|(s, probs)| Contribution {
                segment: *s,
                margin: mask(s, 1),
                probabilities: probs,
            })
            .collect();
        let forward = aggregate(query.len(), contributions.iter().copied()).unwrap();
        let reversed = aggregate(query.len(), contributions.iter().rev().copied()).unwrap();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn uncovered_token_is_a_coverage_error() {
        let probs = vec![pv(&[1.0, 0.0]); 2];
        let err = aggregate(
            3,
            [Contribution {
                segment: seg(0, 2, true, false),
                margin: Margin::default(),
                probabilities: &probs,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, RestoreError::Coverage { token_index: 2 }));
    }

    #[test]
    fn mismatched_output_count_is_rejected() {
        let probs = vec![pv(&[1.0, 0.0])];
        let err = aggregate(
            2,
            [Contribution {
                segment: seg(0, 2, true, true),
                margin: Margin::default(),
                probabilities: &probs,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, RestoreError::ModelOutput { .. }));
    }

    #[test]
    fn inconsistent_class_counts_are_rejected() {
        let probs = vec![pv(&[1.0, 0.0]), pv(&[0.2, 0.3, 0.5])];
        let err = aggregate(
            2,
            [Contribution {
                segment: seg(0, 2, true, true),
                margin: Margin::default(),
                probabilities: &probs,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, RestoreError::ModelOutput { .. }));
    }

    #[test]
    fn empty_query_yields_no_labels() {
        let out = aggregate(
            0,
            [Contribution {
                segment: seg(0, 0, true, true),
                margin: Margin::default(),
                probabilities: &[],
            }],
        )
        .unwrap();
        assert!(out.labels.is_empty());
        assert!(out.probabilities.is_empty());
    }

    #[test]
    fn hard_zero_vetoes_a_class_against_a_tiny_probability() {
        let a = vec![pv(&[0.0, 1.0])];
        let b = vec![pv(&[1.0, 1e-35])];
        let out = aggregate(
            1,
            [
                Contribution {
                    segment: seg(0, 1, true, true),
                    margin: Margin::default(),
                    probabilities: &a,
                },
                Contribution {
                    segment: seg(0, 1, true, true),
                    margin: Margin::default(),
                    probabilities: &b,
                },
            ],
        )
        .unwrap();
        assert_eq!(out.labels, vec![1]);
        assert_eq!(out.probabilities[0].as_slice().to_vec(), vec![0.0f32, 1.0]);
    }

    #[test]
    fn all_zero_product_falls_back_to_floored_scores() {
        let a = vec![pv(&[0.0, 1.0])];
        let b = vec![pv(&[0.9, 0.0])];
        let out = aggregate(
            1,
            [
                Contribution {
                    segment: seg(0, 1, true, true),
                    margin: Margin::default(),
                    probabilities: &a,
                },
                Contribution {
                    segment: seg(0, 1, true, true),
                    margin: Margin::default(),
                    probabilities: &b,
                },
            ],
        )
        .unwrap();
        // Floored: 1e-30 * 0.9 against 1.0 * 1e-30.
        assert_eq!(out.labels, vec![1]);
        let total: f32 = out.probabilities[0].as_slice().iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn hard_zero_does_not_underflow_long_products() {
        let zero_heavy = vec![pv(&[0.0, 1.0])];
        let contributions: Vec<Contribution<'_>> = (0..500)
            .map(|_| Contribution {
                segment: seg(0, 1, true, true),
                margin: Margin::default(),
                probabilities: &zero_heavy,
            })
            .collect();
        let out = aggregate(1, contributions).unwrap();
        assert_eq!(out.labels, vec![1]);
        assert!(out.probabilities[0].as_slice().iter().all(|p| p.is_finite()));
    }
}
