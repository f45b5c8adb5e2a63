//! DeepSeek 后端（OpenAI 兼容端点）
//!
//! deepseek-reasoner 不接受 response_format，结构化输出完全交给 structured 模块恢复。

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 模型名：参数 > `DEEPSEEK_MODEL` 环境变量 > deepseek-chat
pub fn resolve_model(model: Option<&str>) -> String {
    model
        .filter(|m| !m.trim().is_empty())
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok().filter(|m| !m.is_empty()))
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string())
}

/// 创建 DeepSeek 客户端；`base_url` 为空时使用官方端点
pub fn create_deepseek_client(model: Option<&str>, api_key: &str, base_url: Option<&str>) -> OpenAiClient {
    let model = resolve_model(model);
    let client = OpenAiClient::new(Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)), &model, Some(api_key));
    if model == DEEPSEEK_REASONER {
        client.without_json_mode()
    } else {
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_model_wins() {
        assert_eq!(resolve_model(Some(DEEPSEEK_REASONER)), DEEPSEEK_REASONER);
    }

    #[test]
    fn test_reasoner_disables_json_mode() {
        let chat = create_deepseek_client(Some(DEEPSEEK_CHAT), "sk-test", None);
        let reasoner = create_deepseek_client(Some(DEEPSEEK_REASONER), "sk-test", None);
        assert!(chat.json_mode());
        assert!(!reasoner.json_mode());
        assert_eq!(reasoner.model(), DEEPSEEK_REASONER);
    }
}
