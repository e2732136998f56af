use std::borrow::Cow;

use crate::error::RestoreError;
use crate::pipeline::traits::TokenClassifier;
use crate::types::{ProbabilityVector, Segment};

/// Token ids wrapped around every segment before it reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    pub cls_id: u32,
    pub sep_id: u32,
}

impl Framing {
    pub const LEN: usize = 2;
}

/// A segment of query `query_index`, with the tokens it spans.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRequest<'a> {
    pub query_index: usize,
    pub segment: Segment,
    pub tokens: &'a [u32],
}

/// Model outputs for one segment, one vector per segment token.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOutput {
    pub query_index: usize,
    pub segment: Segment,
    pub probabilities: Vec<ProbabilityVector>,
}

/// Feeds `requests` to `model` in consecutive batches of at most
/// `batch_size` segments and returns their outputs in request order.
///
/// Framing outputs are stripped before returning. Empty segments are never
/// sent to the model. Model errors are returned as-is.
pub fn run_batches(
    requests: &[SegmentRequest<'_>],
    batch_size: usize,
    model: &dyn TokenClassifier,
    framing: Option<Framing>,
) -> Result<Vec<SegmentOutput>, RestoreError> {
    if batch_size == 0 {
        return Err(RestoreError::configuration("batch_size must be >= 1"));
    }

    let mut outputs: Vec<Vec<ProbabilityVector>> = vec![Vec::new(); requests.len()];
    let pending: Vec<usize> = requests
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.tokens.is_empty())
        .map(|(i, _)| i)
        .collect();

    for (batch_idx, chunk) in pending.chunks(batch_size).enumerate() {
        let inputs: Vec<Cow<'_, [u32]>> = chunk
            .iter()
            .map(|&i| frame(requests[i].tokens, framing))
            .collect();
        let input_refs: Vec<&[u32]> = inputs.iter().map(|t| t.as_ref()).collect();

        tracing::debug!(
            batch = batch_idx,
            segments = chunk.len(),
            max_len = input_refs.iter().map(|t| t.len()).max().unwrap_or(0),
            "running token classifier batch"
        );
        let predicted = model.predict(&input_refs)?;
        if predicted.len() != chunk.len() {
            return Err(RestoreError::model_output(format!(
                "batch of {} segments produced {} outputs",
                chunk.len(),
                predicted.len()
            )));
        }

        for ((&request_idx, input), output) in chunk.iter().zip(&input_refs).zip(predicted) {
            outputs[request_idx] = unframe(output, input.len(), framing)?;
        }
    }

    Ok(requests
        .iter()
        .zip(outputs)
        .map(|(request, probabilities)| SegmentOutput {
            query_index: request.query_index,
            segment: request.segment,
            probabilities,
        })
        .collect())
}

fn frame(tokens: &[u32], framing: Option<Framing>) -> Cow<'_, [u32]> {
    match framing {
        None => Cow::Borrowed(tokens),
        Some(f) => {
            let mut framed = Vec::with_capacity(tokens.len() + Framing::LEN);
            framed.push(f.cls_id);
            framed.extend_from_slice(tokens);
            framed.push(f.sep_id);
            Cow::Owned(framed)
        }
    }
}

fn unframe(
    mut output: Vec<ProbabilityVector>,
    input_len: usize,
    framing: Option<Framing>,
) -> Result<Vec<ProbabilityVector>, RestoreError> {
    if output.len() != input_len {
        return Err(RestoreError::model_output(format!(
            "sequence of {input_len} tokens produced {} output vectors",
            output.len()
        )));
    }
    if framing.is_some() {
        output.pop();
        output.remove(0);
    }
    Ok(output)
}
