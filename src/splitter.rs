//! Overlapping-window text splitter.
//!
//! Splits normalized document text into chunks of at most `max_chunk_chars`
//! characters, with adjacent chunks sharing roughly `overlap_chars` of
//! context across the boundary. Cut points prefer paragraph breaks (`\n\n`),
//! then sentence ends, then line breaks, then word breaks, falling back to
//! a hard cut when a window contains none of those.
//!
//! All positions are `char` offsets, so multi-byte UTF-8 input can never be
//! split inside a code point. Chunks are never re-trimmed after the initial
//! trim of the whole input: concatenating each chunk's fresh region (the
//! chunk minus its overlap prefix) reconstructs the trimmed input exactly.

/// Split `text` into an ordered sequence of overlapping chunks.
///
/// Returns an empty vector only when `text` is empty after trimming.
/// Callers must ensure `max_chunk_chars > 0` and
/// `overlap_chars < max_chunk_chars`; config validation enforces this
/// before the pipeline runs.
pub fn split(text: &str, max_chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= max_chunk_chars {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let window_end = (start + max_chunk_chars).min(chars.len());
        let cut = if window_end == chars.len() {
            window_end
        } else {
            // A cut at or before start + overlap would make the next fresh
            // region empty, so boundaries below that floor are ignored.
            let floor = start + overlap_chars;
            find_boundary(&chars, start, window_end, floor).unwrap_or(window_end)
        };

        chunks.push(chars[start..cut].iter().collect());

        if cut == chars.len() {
            break;
        }

        start = overlap_start(&chars, cut, overlap_chars);
    }

    chunks
}

/// Best cut position in `(floor, window_end]`, searched by boundary quality:
/// paragraph break, sentence end, line break, word break. `None` means the
/// window has no usable boundary and the caller should hard-cut.
fn find_boundary(chars: &[char], start: usize, window_end: usize, floor: usize) -> Option<usize> {
    debug_assert!(start <= floor && floor < window_end);

    let mut paragraph = None;
    let mut sentence = None;
    let mut line = None;
    let mut word = None;

    // Scan backward so the first hit of each kind is the latest one.
    for pos in (start..window_end).rev() {
        // Cut after the paragraph break so the break stays with the earlier
        // chunk.
        if paragraph.is_none() && chars[pos] == '\n' && pos + 1 < window_end && chars[pos + 1] == '\n'
        {
            let cut = pos + 2;
            if cut > floor {
                paragraph = Some(cut);
            }
        }
        if sentence.is_none() && matches!(chars[pos], '.' | '!' | '?') {
            let followed_by_space = chars
                .get(pos + 1)
                .map(|c| c.is_whitespace())
                .unwrap_or(true);
            let cut = pos + 1;
            if followed_by_space && cut > floor {
                sentence = Some(cut);
            }
        }
        if line.is_none() && chars[pos] == '\n' {
            let cut = pos + 1;
            if cut > floor {
                line = Some(cut);
            }
        }
        if word.is_none() && chars[pos].is_whitespace() {
            let cut = pos + 1;
            if cut > floor {
                word = Some(cut);
            }
        }
    }

    paragraph.or(sentence).or(line).or(word)
}

/// Start of the next chunk: `overlap_chars` before the cut, advanced to the
/// next word start when the desired position lands mid-word. The overlap
/// only ever shrinks from the budget, never grows past it.
fn overlap_start(chars: &[char], cut: usize, overlap_chars: usize) -> usize {
    let desired = cut.saturating_sub(overlap_chars);
    if desired == 0 || chars[desired - 1].is_whitespace() || chars[desired].is_whitespace() {
        return desired;
    }
    for pos in desired..cut {
        if chars[pos].is_whitespace() {
            // First char after the whitespace run begins the next word.
            return chars[pos..cut]
                .iter()
                .position(|c| !c.is_whitespace())
                .map(|off| pos + off)
                .unwrap_or(cut);
        }
    }
    desired
}
