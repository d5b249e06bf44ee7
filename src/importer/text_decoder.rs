// ==========================================
// 药品登记数据同步系统 - 文本解码
// ==========================================
// 职责: 按数据集配置的编码逐行解码（UTF-8 / Windows-1250）
// 说明: 两种编码中 '\n' 都不会出现在多字节序列内部，可先按字节切行再解码
// ==========================================

use encoding_rs::{Encoding, UTF_8, WINDOWS_1250};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

// ==========================================
// SourceEncoding - 源文件编码
// ==========================================
// 按数据集固定配置，不做自动探测
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceEncoding {
    #[default]
    Utf8,
    Windows1250, // 旧数据集使用的 8 位代码页
}

impl SourceEncoding {
    fn encoding(&self) -> &'static Encoding {
        match self {
            SourceEncoding::Utf8 => UTF_8,
            SourceEncoding::Windows1250 => WINDOWS_1250,
        }
    }

    /// 解码一段字节（不处理 BOM）
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, had_errors) = self.encoding().decode_without_bom_handling(bytes);
        if had_errors {
            tracing::debug!(encoding = ?self, "存在无法解码的字节，已替换为 U+FFFD");
        }
        text.into_owned()
    }
}

// ==========================================
// DecodedLines - 逐行解码读取器
// ==========================================
pub struct DecodedLines<R: BufRead> {
    reader: R,
    encoding: SourceEncoding,
    buf: Vec<u8>,
    first_line: bool,
}

impl<R: BufRead> DecodedLines<R> {
    pub fn new(reader: R, encoding: SourceEncoding) -> Self {
        Self {
            reader,
            encoding,
            buf: Vec::with_capacity(256),
            first_line: true,
        }
    }

    /// 读取下一行（去掉行尾 \r\n；首行去掉 UTF-8 BOM）
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }

        let mut bytes: &[u8] = &self.buf;
        if self.first_line {
            self.first_line = false;
            if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
                bytes = rest;
            }
        }
        while let Some((last, rest)) = bytes.split_last() {
            if *last == b'\n' || *last == b'\r' {
                bytes = rest;
            } else {
                break;
            }
        }

        Ok(Some(self.encoding.decode(bytes)))
    }
}
