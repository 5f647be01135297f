/// Hard ceiling on the bytes a single translation request may carry. The
/// provider is driven through a GET endpoint, so the whole chunk has to fit
/// in a URL.
pub const CHUNK_BYTE_LIMIT: usize = 4700;

/// A line-bounded slice of a chapter's markup.
///
/// Chunks are disjoint, cover every line of the input, and (except for a
/// single overlong line) stay under the byte limit counting one separator
/// byte per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub lines: Vec<String>,
    pub start_line: usize,
    pub end_line: usize,
}

impl Chunk {
    pub fn byte_len(&self) -> usize {
        self.lines.iter().map(|line| line.len() + 1).sum()
    }

    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.byte_len());
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Greedily accumulates whole lines into chunks of at most `limit` bytes.
///
/// A line that alone exceeds `limit` is never split: it becomes its own
/// chunk, over the limit for that one chunk. Strictly single pass, no
/// lookahead. Empty input yields no chunks.
pub fn chunk_lines(input: &str, limit: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_bytes = 0usize;
    let mut start_line = 0usize;

    for (idx, line) in input.lines().enumerate() {
        let line_bytes = line.len() + 1;

        if !current.is_empty() && current_bytes + line_bytes > limit {
            chunks.push(Chunk {
                lines: std::mem::take(&mut current),
                start_line,
                end_line: idx,
            });
            current_bytes = 0;
            start_line = idx;
        }

        current.push(line.to_owned());
        current_bytes += line_bytes;
    }

    if !current.is_empty() {
        let end_line = start_line + current.len();
        chunks.push(Chunk {
            lines: current,
            start_line,
            end_line,
        });
    }

    chunks
}
