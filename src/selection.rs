//! Parsing of the terminal front end's "which videos?" answer

use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no videos were selected; enter numbers from the list")]
    Empty,
    #[error("invalid number '{0}', please enter a valid integer")]
    InvalidNumber(String),
    #[error("invalid range format '{0}', please use 'start-end'")]
    InvalidRange(String),
    #[error("start of range '{start}' cannot be greater than end '{end}'")]
    ReversedRange { start: usize, end: usize },
    #[error("'{part}' is out of bounds (1-{max})")]
    OutOfBounds { part: String, max: usize },
}

/// Parse `1, 3-5 7` or `all` into sorted, zero-based indices below `count`.
///
/// Numbers in the input are one-based, ranges are inclusive and parts may be
/// separated by commas and/or whitespace.
pub fn parse_selection(input: &str, count: usize) -> Result<Vec<usize>, SelectionError> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return Ok((0..count).collect());
    }

    let mut selected = BTreeSet::new();
    for part in input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
    {
        let (start, end) = match part.split_once('-') {
            Some((start, end)) => {
                if start.is_empty() || end.is_empty() {
                    return Err(SelectionError::InvalidRange(part.to_string()));
                }
                let parse = |s: &str| {
                    s.parse::<usize>()
                        .map_err(|_| SelectionError::InvalidRange(part.to_string()))
                };
                let (start, end) = (parse(start)?, parse(end)?);
                if start > end {
                    return Err(SelectionError::ReversedRange { start, end });
                }
                (start, end)
            }
            None => {
                let index = part
                    .parse::<usize>()
                    .map_err(|_| SelectionError::InvalidNumber(part.to_string()))?;
                (index, index)
            }
        };
        if start == 0 || end > count {
            return Err(SelectionError::OutOfBounds {
                part: part.to_string(),
                max: count,
            });
        }
        selected.extend((start - 1)..end);
    }

    if selected.is_empty() {
        return Err(SelectionError::Empty);
    }
    Ok(selected.into_iter().collect())
}
