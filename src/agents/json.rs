//! LLM 输出中的 JSON 提取
//!
//! 兼容 ```json ... ``` 代码块、普通 ``` 代码块与夹杂说明文字的裸 JSON。

use serde::de::DeserializeOwned;

/// 截取输出中的 JSON 片段；找不到对象时返回 None
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let block = rest[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 提取并反序列化；错误信息带原文片段
pub fn parse_json<T: DeserializeOwned>(output: &str) -> Result<T, String> {
    let json_str = extract_json(output).ok_or_else(|| format!("no JSON object in: {}", preview(output)))?;
    serde_json::from_str(json_str).map_err(|e| format!("{e}: {}", preview(json_str)))
}

fn preview(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}
