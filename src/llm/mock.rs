//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 三种应答来源，按优先级：自定义 responder → 预置脚本队列 → 默认回复；都没有时返回 EmptyResponse。
//! 记录调用次数与每次请求的目的 / prompt，便于断言重试次数与调用顺序。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError, Purpose};

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync>;

/// Mock 客户端
#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    default_reply: Option<String>,
    responder: Option<Responder>,
    calls: AtomicUsize,
    log: Mutex<Vec<(Purpose, String)>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条成功回复（按调用顺序消费）
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// 追加一次失败
    pub fn with_failure(self, err: LlmError) -> Self {
        self.push(Err(err));
        self
    }

    /// 脚本耗尽后的回复
    pub fn with_default_reply(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(text.into());
        self
    }

    /// 按请求内容动态应答（优先于脚本）
    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    fn push(&self, item: Result<String, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 指定目的的调用次数
    pub fn calls_for(&self, purpose: Purpose) -> usize {
        self.log
            .lock()
            .map(|log| log.iter().filter(|(p, _)| *p == purpose).count())
            .unwrap_or(0)
    }

    /// 所有请求的 (目的, prompt)
    pub fn requests(&self) -> Vec<(Purpose, String)> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.log.lock() {
            log.push((request.purpose, request.prompt().to_string()));
        }

        if let Some(responder) = &self.responder {
            return responder(request);
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(item) => item,
            None => self.default_reply.clone().ok_or(LlmError::EmptyResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_default() {
        let mock = MockLlmClient::new()
            .with_failure(LlmError::Timeout(1))
            .with_reply("first")
            .with_default_reply("fallback");
        let req = CompletionRequest::new(Purpose::General, "hi");
        assert!(mock.complete(&req).await.is_err());
        assert_eq!(mock.complete(&req).await.unwrap(), "first");
        assert_eq!(mock.complete(&req).await.unwrap(), "fallback");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_responder_routes_by_purpose() {
        let mock = MockLlmClient::new().with_responder(|req| match req.purpose {
            Purpose::PageContent => Ok("page".to_string()),
            _ => Err(LlmError::Request("unexpected".into())),
        });
        let page = CompletionRequest::new(Purpose::PageContent, "p1");
        let other = CompletionRequest::new(Purpose::OutlineDraft, "o");
        assert_eq!(mock.complete(&page).await.unwrap(), "page");
        assert!(mock.complete(&other).await.is_err());
        assert_eq!(mock.calls_for(Purpose::PageContent), 1);
    }

    #[tokio::test]
    async fn test_empty_mock_reports_empty_response() {
        let mock = MockLlmClient::new();
        let req = CompletionRequest::new(Purpose::General, "hi");
        assert_eq!(mock.complete(&req).await, Err(LlmError::EmptyResponse));
    }
}
