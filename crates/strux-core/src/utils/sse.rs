use async_stream::stream;
use futures::{Stream, StreamExt, pin_mut};

use crate::error::ExtractError;

/// Parse a Server-Sent-Events byte stream into its `data:` payloads.
///
/// Event blocks are delimited by blank lines; `data:` lines inside a block
/// are yielded individually, other fields are ignored, and the `[DONE]`
/// sentinel is filtered out. CRLF delimiters are normalized and payloads
/// split across chunk boundaries are reassembled.
pub fn sse_data_lines<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, ExtractError>>
where
    S: Stream<Item = Result<bytes::Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    stream! {
        let mut buffer = String::new();
        let mut failed = false;
        pin_mut!(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            match chunk {
                Ok(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        buffer.push_str(&text.replace("\r\n", "\n"));
                        while let Some(pos) = buffer.find("\n\n") {
                            let block: String = buffer.drain(..pos + 2).collect();
                            for data in data_lines(&block) {
                                yield Ok(data);
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ExtractError::serialization(
                            "Invalid UTF-8 in event stream",
                            e,
                        ));
                        failed = true;
                        break;
                    }
                },
                Err(e) => {
                    yield Err(ExtractError::transport_with_source("Event stream failed", e));
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            for data in data_lines(&buffer) {
                yield Ok(data);
            }
        }
    }
}

fn data_lines(block: &str) -> Vec<String> {
    block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim_start().to_string())
        .filter(|data| data != "[DONE]")
        .collect()
}
