use crate::error::RestoreError;
use crate::types::Segment;

/// Splits `query` into windows of `max_length` tokens starting every `step`
/// tokens.
///
/// Strided windows stop once a full window no longer fits; if the last one
/// does not reach the end of the query, a final window right-aligned to the
/// last token is appended. A query no longer than `max_length` (including
/// the empty query) yields a single segment spanning it.
pub fn segment<T>(
    query: &[T],
    max_length: usize,
    step: usize,
) -> Result<Vec<Segment>, RestoreError> {
    if max_length == 0 {
        return Err(RestoreError::configuration("max_length must be >= 1"));
    }
    if step == 0 || step > max_length {
        return Err(RestoreError::configuration(format!(
            "step must be in 1..={max_length}, got {step}"
        )));
    }

    let n = query.len();
    if n <= max_length {
        return Ok(vec![Segment {
            start_offset: 0,
            length: n,
            is_first: true,
            is_last: true,
        }]);
    }

    let mut segments = Vec::with_capacity((n - max_length) / step + 2);
    let mut offset = 0usize;
    while offset + max_length <= n {
        segments.push(Segment {
            start_offset: offset,
            length: max_length,
            is_first: false,
            is_last: false,
        });
        offset += step;
    }
    let covered_to = segments.last().map_or(0, Segment::end_offset);
    if covered_to < n {
        segments.push(Segment {
            start_offset: n - max_length,
            length: max_length,
            is_first: false,
            is_last: false,
        });
    }

    if let Some(first) = segments.first_mut() {
        first.is_first = true;
    }
    if let Some(last) = segments.last_mut() {
        last.is_last = true;
    }
    Ok(segments)
}
