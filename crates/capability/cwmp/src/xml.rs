//! 面向 CWMP 报文的极简 XML 解析与生成。
//!
//! SOAP 信封的元素集合是封闭的，这里只实现需要的子集：
//! 元素 / 属性 / 文本 / 注释 / 处理指令，命名空间前缀在解析时剥掉，
//! 按本地名匹配。不支持 DTD 与 CDATA 之外的扩展。

use crate::error::CwmpError;

/// 解析后的元素节点。
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    /// 本地名（前缀已剥离）
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    /// 找第一个本地名匹配的直接子元素。
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|node| node.name == name)
    }

    /// 深度优先找第一个本地名匹配的后代元素。
    pub fn descendant(&self, name: &str) -> Option<&XmlNode> {
        for node in &self.children {
            if node.name == name {
                return Some(node);
            }
            if let Some(found) = node.descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// 所有本地名匹配的直接子元素。
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |node| node.name == name)
    }

    /// 子元素文本（缺失时为空串）。
    pub fn child_text(&self, name: &str) -> String {
        self.child(name).map(|node| node.text.clone()).unwrap_or_default()
    }

    /// 按属性本地名取值。
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(attr, _)| local_name(attr) == name)
            .map(|(_, value)| value.as_str())
    }
}

fn local_name(qname: &str) -> &str {
    qname.rsplit(':').next().unwrap_or(qname)
}

/// 文本实体转义。
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(index) = rest.find('&') {
        out.push_str(&rest[..index]);
        rest = &rest[index..];
        let Some(end) = rest.find(';') else {
            out.push_str(rest);
            return out;
        };
        match &rest[..=end] {
            "&amp;" => out.push('&'),
            "&lt;" => out.push('<'),
            "&gt;" => out.push('>'),
            "&quot;" => out.push('"'),
            "&apos;" => out.push('\''),
            entity => out.push_str(entity),
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> CwmpError {
        CwmpError::Parse(format!("{} at byte {}", message, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn skip_prolog_and_misc(&mut self) -> Result<(), CwmpError> {
        loop {
            self.skip_whitespace();
            if self.input[self.pos..].starts_with(b"<?") {
                let end = self.find("?>")?;
                self.pos = end + 2;
            } else if self.input[self.pos..].starts_with(b"<!--") {
                let end = self.find("-->")?;
                self.pos = end + 3;
            } else {
                return Ok(());
            }
        }
    }

    fn find(&self, needle: &str) -> Result<usize, CwmpError> {
        let bytes = needle.as_bytes();
        self.input[self.pos..]
            .windows(bytes.len())
            .position(|window| window == bytes)
            .map(|offset| self.pos + offset)
            .ok_or_else(|| self.error("unterminated markup"))
    }

    fn parse_name(&mut self) -> Result<String, CwmpError> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b':' | b'_' | b'-' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("expected name"));
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).to_string())
    }

    fn parse_element(&mut self) -> Result<XmlNode, CwmpError> {
        if self.peek() != Some(b'<') {
            return Err(self.error("expected '<'"));
        }
        self.pos += 1;
        let qname = self.parse_name()?;
        let mut node = XmlNode {
            name: local_name(&qname).to_string(),
            ..XmlNode::default()
        };

        // 属性
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(b'/') => {
                    self.pos += 1;
                    if self.peek() != Some(b'>') {
                        return Err(self.error("malformed self-closing tag"));
                    }
                    self.pos += 1;
                    return Ok(node);
                }
                Some(_) => {
                    let attr_name = self.parse_name()?;
                    self.skip_whitespace();
                    if self.peek() != Some(b'=') {
                        return Err(self.error("expected '=' in attribute"));
                    }
                    self.pos += 1;
                    self.skip_whitespace();
                    let quote = self
                        .peek()
                        .filter(|byte| matches!(byte, b'"' | b'\''))
                        .ok_or_else(|| self.error("expected quoted attribute value"))?;
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek() != Some(quote) {
                        if self.peek().is_none() {
                            return Err(self.error("unterminated attribute"));
                        }
                        self.pos += 1;
                    }
                    let value =
                        unescape(&String::from_utf8_lossy(&self.input[start..self.pos]));
                    self.pos += 1;
                    node.attrs.push((attr_name, value));
                }
                None => return Err(self.error("unterminated start tag")),
            }
        }

        // 内容：文本与子元素
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated element")),
                Some(b'<') => {
                    if self.input[self.pos..].starts_with(b"</") {
                        self.pos += 2;
                        let close = self.parse_name()?;
                        if local_name(&close) != node.name {
                            return Err(self.error("mismatched close tag"));
                        }
                        self.skip_whitespace();
                        if self.peek() != Some(b'>') {
                            return Err(self.error("malformed close tag"));
                        }
                        self.pos += 1;
                        node.text = text.trim().to_string();
                        return Ok(node);
                    } else if self.input[self.pos..].starts_with(b"<!--") {
                        let end = self.find("-->")?;
                        self.pos = end + 3;
                    } else {
                        node.children.push(self.parse_element()?);
                    }
                }
                Some(_) => {
                    let start = self.pos;
                    while let Some(byte) = self.peek() {
                        if byte == b'<' {
                            break;
                        }
                        self.pos += 1;
                    }
                    text.push_str(&unescape(&String::from_utf8_lossy(
                        &self.input[start..self.pos],
                    )));
                }
            }
        }
    }
}

/// 解析一份 XML 文档，返回根元素。
pub fn parse(input: &str) -> Result<XmlNode, CwmpError> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
    };
    parser.skip_prolog_and_misc()?;
    let root = parser.parse_element()?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespaced_elements() {
        let doc = r#"<?xml version="1.0"?>
            <soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
              <soap:Body><cwmp:Inform xmlns:cwmp="urn:dslforum-org:cwmp-1-2">
                <MaxEnvelopes>1</MaxEnvelopes>
              </cwmp:Inform></soap:Body>
            </soap:Envelope>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.name, "Envelope");
        let inform = root.descendant("Inform").unwrap();
        assert_eq!(inform.child_text("MaxEnvelopes"), "1");
    }

    #[test]
    fn entities_unescaped_in_text_and_attrs() {
        let doc = r#"<Value type="a&amp;b">x &lt; y</Value>"#;
        let node = parse(doc).unwrap();
        assert_eq!(node.attr("type"), Some("a&b"));
        assert_eq!(node.text, "x < y");
    }

    #[test]
    fn self_closing_and_comments() {
        let doc = "<a><!-- note --><b/><c>t</c></a>";
        let node = parse(doc).unwrap();
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.child_text("c"), "t");
    }

    #[test]
    fn mismatched_close_is_parse_error() {
        assert!(parse("<a><b></a></b>").is_err());
    }
}
