//! 覆盖率与相关性匹配策略
//!
//! 判断「某个语义单元是否已被页面文本覆盖」是近似问题：默认用字符前缀包含，
//! 也可换成分词后的 Jaccard 相似度。校验器、内容映射、逐页生成都通过 CoverageMatcher 调用。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 可替换的匹配策略
pub trait CoverageMatcher: Send + Sync {
    fn name(&self) -> &str;

    /// `needle` 是否被 `haystack` 覆盖
    fn covers(&self, needle: &str, haystack: &str) -> bool;

    /// 任一候选文本覆盖即可
    fn covered_by_any(&self, needle: &str, candidates: &[&str]) -> bool {
        candidates.iter().any(|c| self.covers(needle, c))
    }
}

fn char_prefix(text: &str, n: usize) -> &str {
    let text = text.trim();
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// needle 的前 N 个字符（按字符而非字节）出现在 haystack 中
#[derive(Debug, Clone, Copy)]
pub struct PrefixMatcher {
    pub prefix_chars: usize,
}

impl PrefixMatcher {
    pub fn new(prefix_chars: usize) -> Self {
        Self { prefix_chars }
    }
}

impl Default for PrefixMatcher {
    fn default() -> Self {
        Self::new(15)
    }
}

impl CoverageMatcher for PrefixMatcher {
    fn name(&self) -> &str {
        "prefix"
    }

    fn covers(&self, needle: &str, haystack: &str) -> bool {
        let prefix = char_prefix(needle, self.prefix_chars);
        !prefix.is_empty() && haystack.contains(prefix)
    }
}

/// 双向前缀：任一方的前 N 个字符出现在另一方中（内容映射用）
#[derive(Debug, Clone, Copy)]
pub struct MutualPrefixMatcher {
    pub prefix_chars: usize,
}

impl Default for MutualPrefixMatcher {
    fn default() -> Self {
        Self { prefix_chars: 10 }
    }
}

impl CoverageMatcher for MutualPrefixMatcher {
    fn name(&self) -> &str {
        "mutual_prefix"
    }

    fn covers(&self, needle: &str, haystack: &str) -> bool {
        let inner = PrefixMatcher::new(self.prefix_chars);
        inner.covers(needle, haystack) || inner.covers(haystack, needle)
    }
}

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}'
    )
}

/// 中英文混合分词；含 CJK 时用 jieba 搜索引擎模式
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    let text = text.trim();
    if text.is_empty() {
        return HashSet::new();
    }
    if text.chars().any(is_cjk) {
        jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| s.chars().count() > 1 || s.chars().next().is_some_and(is_cjk))
            .filter(|s| !s.chars().all(|c| c.is_ascii_punctuation() || "，。、；：！？（）".contains(c)))
            .collect()
    } else {
        text.split(|c: char| !c.is_alphanumeric() && c != '%' && c != '.')
            .map(str::to_lowercase)
            .filter(|s| s.len() > 1)
            .collect()
    }
}

pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// 分词后 Jaccard 相似度不低于阈值即视为覆盖，能容忍改写
#[derive(Debug, Clone, Copy)]
pub struct TokenOverlapMatcher {
    pub threshold: f64,
}

impl Default for TokenOverlapMatcher {
    fn default() -> Self {
        Self { threshold: 0.4 }
    }
}

impl CoverageMatcher for TokenOverlapMatcher {
    fn name(&self) -> &str {
        "token_overlap"
    }

    fn covers(&self, needle: &str, haystack: &str) -> bool {
        jaccard_similarity(&tokenize_to_set(needle), &tokenize_to_set(haystack)) >= self.threshold
    }
}
