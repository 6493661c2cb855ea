use crate::buffer::IoBuffer;

impl IoBuffer {
    /// 以大写十六进制、空格分隔的形式输出 `[position, limit)` 的前 `max_len` 字节。
    ///
    /// 内容被截断时末尾追加 `...`；没有未读字节时返回 `empty`。
    pub fn hex_dump(&self, max_len: usize) -> String {
        let remaining = self.remaining();
        if remaining == 0 || max_len == 0 {
            return "empty".to_owned();
        }
        let shown = remaining.min(max_len);
        let mut dump = self.with_remaining(|data| {
            data[..shown]
                .iter()
                .map(|byte| hex::encode_upper([*byte]))
                .collect::<Vec<_>>()
                .join(" ")
        });
        if shown < remaining {
            dump.push_str("...");
        }
        dump
    }
}
