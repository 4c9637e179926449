use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Longest line kept intact (1 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One line of process output with its terminator removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CappedLine {
    pub text: String,
    /// The line exceeded the cap and its tail was discarded
    pub truncated: bool,
}

/// Read the next newline-delimited line, keeping at most `max_bytes` of it.
///
/// Bytes beyond the cap are consumed and dropped up to the next newline, so the
/// pipe keeps draining no matter how long a line is. A trailing `\r` is
/// stripped and invalid UTF-8 is replaced. Returns `Ok(None)` at EOF; a final
/// line without a terminator is still returned.
pub async fn read_capped_line<R>(reader: &mut R, max_bytes: usize) -> io::Result<Option<CappedLine>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut truncated = false;
    let mut read_any = false;

    loop {
        let (consumed, complete) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if !read_any {
                    return Ok(None);
                }
                break;
            }
            read_any = true;

            let (chunk, consumed, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (&available[..pos], pos + 1, true),
                None => (available, available.len(), false),
            };

            let room = max_bytes.saturating_sub(buf.len());
            if chunk.len() > room {
                truncated = true;
                buf.extend_from_slice(&chunk[..room]);
            } else {
                buf.extend_from_slice(chunk);
            }
            (consumed, complete)
        };

        reader.consume(consumed);
        if complete {
            break;
        }
    }

    if !truncated && buf.last() == Some(&b'\r') {
        buf.pop();
    }

    Ok(Some(CappedLine {
        text: String::from_utf8_lossy(&buf).into_owned(),
        truncated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn collect(input: &[u8], max: usize, capacity: usize) -> Vec<CappedLine> {
        let mut reader = BufReader::with_capacity(capacity, input);
        let mut lines = Vec::new();
        while let Some(line) = read_capped_line(&mut reader, max).await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_reads_lines_in_order() {
        let lines = collect(b"alpha\nbeta\n\ngamma", 1024, 8).await;
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "beta", "", "gamma"]);
        assert!(lines.iter().all(|l| !l.truncated));
    }

    #[tokio::test]
    async fn test_strips_carriage_return() {
        let lines = collect(b"windows\r\nunix\n", 1024, 4).await;
        assert_eq!(lines[0].text, "windows");
        assert_eq!(lines[1].text, "unix");
    }

    #[tokio::test]
    async fn test_overlong_line_is_truncated_and_reading_continues() {
        let mut input = vec![b'x'; 50];
        input.extend_from_slice(b"\nnext\n");

        let lines = collect(&input, 16, 7).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "x".repeat(16));
        assert!(lines[0].truncated);
        assert_eq!(lines[1].text, "next");
        assert!(!lines[1].truncated);
    }

    #[tokio::test]
    async fn test_line_exactly_at_cap_is_kept() {
        let lines = collect(b"abcd\n", 4, 2).await;
        assert_eq!(lines[0].text, "abcd");
        assert!(!lines[0].truncated);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let lines = collect(b"ok\xffok\n", 1024, 16).await;
        assert_eq!(lines[0].text, "ok\u{fffd}ok");
    }

    #[tokio::test]
    async fn test_empty_input_is_eof() {
        assert!(collect(b"", 1024, 16).await.is_empty());
    }
}
