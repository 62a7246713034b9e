//! 协作者响应解析工具集
//!
//! 纯函数模块：剥离 markdown 围栏、清理包装文本、从自由文本中抽取 JSON。
//! 模型可能把 JSON 包在 ``` 围栏或寒暄语里，调用方解析前必须先清理。

use log::{debug, warn};
use regex::Regex;
use std::sync::LazyLock;

static RE_CODE_FENCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*```[\w-]*\s*$").expect("static regex"));
static RE_TILDE_FENCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*~~~[\w-]*\s*$").expect("static regex"));
static RE_BACKTICK_INLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```").expect("static regex"));

/// 清理模型返回的 JSON 响应内容
pub(crate) fn clean_json_response(content: &str) -> String {
    let mut cleaned = content.trim().to_string();

    // 移除 markdown 代码块围栏（整行与行内残留）
    cleaned = RE_CODE_FENCE_LINE.replace_all(&cleaned, "").to_string();
    cleaned = RE_TILDE_FENCE_LINE.replace_all(&cleaned, "").to_string();
    cleaned = RE_BACKTICK_INLINE.replace_all(&cleaned, "").to_string();
    if cleaned.starts_with("json") {
        cleaned = cleaned
            .strip_prefix("json")
            .unwrap_or(&cleaned)
            .trim()
            .to_string();
    }

    // 移除常见的包装前缀
    let prefixes = [
        "Here is the JSON:",
        "JSON:",
        "Result:",
        "Output:",
        "以下がJSONです：",
        "結果：",
    ];
    for prefix in &prefixes {
        if cleaned.starts_with(prefix) {
            cleaned = cleaned
                .strip_prefix(prefix)
                .unwrap_or(&cleaned)
                .trim()
                .to_string();
        }
    }

    cleaned.trim().to_string()
}

/// 从自由文本中抽取第一个括号配平的 JSON 对象
pub(crate) fn extract_json_object(text: &str) -> Option<String> {
    let mut brace_depth = 0;
    let mut start_pos = None;

    for (i, ch) in text.char_indices() {
        match ch {
            '{' => {
                if brace_depth == 0 {
                    start_pos = Some(i);
                }
                brace_depth += 1;
            }
            '}' => {
                if brace_depth > 0 {
                    brace_depth -= 1;
                    if brace_depth == 0 {
                        if let Some(start) = start_pos {
                            return Some(text[start..=i].to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// 解析协作者的结构化响应：先清理，直接解析失败后再尝试抽取 JSON 对象
///
/// 返回 None 表示结构化载荷无法解析——调用方按各自的降级策略处理
/// （评分/总结降级为固定兜底值，而不是让请求失败）。
pub(crate) fn parse_structured<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    let cleaned = clean_json_response(raw);
    match serde_json::from_str::<T>(&cleaned) {
        Ok(value) => Some(value),
        Err(first_err) => {
            debug!(
                "[ConversationParser] direct parse failed ({}), trying brace extraction",
                first_err
            );
            let candidate = extract_json_object(&cleaned)?;
            match serde_json::from_str::<T>(&candidate) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(
                        "[ConversationParser] structured payload unparseable: {} (payload head: {})",
                        e,
                        raw.chars().take(80).collect::<String>()
                    );
                    None
                }
            }
        }
    }
}
