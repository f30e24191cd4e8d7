//! 最小 STOMP 1.2 帧编解码。
//!
//! QueueBroker 适配器只用到 CONNECT / CONNECTED / SUBSCRIBE / SEND /
//! MESSAGE / ERROR / DISCONNECT 这几种帧。二进制帧体一律带
//! `content-length`，按 NUL 结尾切帧；心跳换行在读取侧跳过。

use crate::error::TransportError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// 一帧 STOMP 报文。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StompFrame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// 取首个同名头的值。
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }
}

/// STOMP 1.2 头部转义（`\` `:` CR LF）。
fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ':' => out.push_str("\\c"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('c') => out.push(':'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

/// 编码一帧（自动补 content-length，NUL 结尾）。
pub fn encode_frame(frame: &StompFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + frame.body.len());
    out.extend_from_slice(frame.command.as_bytes());
    out.push(b'\n');
    for (name, value) in &frame.headers {
        out.extend_from_slice(escape_header(name).as_bytes());
        out.push(b':');
        out.extend_from_slice(escape_header(value).as_bytes());
        out.push(b'\n');
    }
    if !frame.body.is_empty() {
        out.extend_from_slice(format!("content-length:{}\n", frame.body.len()).as_bytes());
    }
    out.push(b'\n');
    out.extend_from_slice(&frame.body);
    out.push(0);
    out
}

/// 从缓冲读取器读一帧；连接关闭返回 None。
pub async fn read_frame<R>(
    reader: &mut BufReader<R>,
) -> Result<Option<StompFrame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    // 跳过心跳产生的空行，读到命令行为止
    let command = loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = trim_line(&line);
        if !trimmed.is_empty() {
            break String::from_utf8_lossy(trimmed).to_string();
        }
    };

    let mut frame = StompFrame::new(&command);
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(TransportError::Frame("eof in headers".to_string()));
        }
        let trimmed = trim_line(&line);
        if trimmed.is_empty() {
            break;
        }
        let text = String::from_utf8_lossy(trimmed);
        let Some((name, value)) = text.split_once(':') else {
            return Err(TransportError::Frame(format!("bad header '{}'", text)));
        };
        let name = unescape_header(name);
        let value = unescape_header(value);
        if name == "content-length" {
            content_length = value.parse::<usize>().ok();
        }
        frame.headers.push((name, value));
    }

    match content_length {
        Some(length) => {
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).await?;
            let mut nul = [0u8; 1];
            reader.read_exact(&mut nul).await?;
            if nul[0] != 0 {
                return Err(TransportError::Frame("missing NUL terminator".to_string()));
            }
            frame.body = body;
        }
        None => {
            let mut body = Vec::new();
            reader.read_until(0, &mut body).await?;
            if body.last() == Some(&0) {
                body.pop();
            }
            frame.body = body;
        }
    }
    Ok(Some(frame))
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trips_with_binary_body() {
        let frame = StompFrame::new("SEND")
            .header("destination", "/queue/openusp/agent/a-1/in")
            .header("endpoint-id", "proto::a-1")
            .body(vec![0x0a, 0x00, 0xff, 0x42]);
        let encoded = encode_frame(&frame);

        let mut reader = BufReader::new(encoded.as_slice());
        let parsed = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(parsed.command, "SEND");
        assert_eq!(
            parsed.header_value("destination"),
            Some("/queue/openusp/agent/a-1/in")
        );
        assert_eq!(parsed.body, vec![0x0a, 0x00, 0xff, 0x42]);
    }

    #[tokio::test]
    async fn heartbeat_newlines_skipped() {
        let mut bytes = vec![b'\n', b'\n'];
        bytes.extend_from_slice(&encode_frame(&StompFrame::new("CONNECTED").header(
            "version",
            "1.2",
        )));
        let mut reader = BufReader::new(bytes.as_slice());
        let parsed = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(parsed.command, "CONNECTED");
    }

    #[test]
    fn header_escaping_round_trips() {
        let raw = "a:b\\c\nd";
        assert_eq!(unescape_header(&escape_header(raw)), raw);
    }
}
