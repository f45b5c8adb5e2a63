//! 逐页内容生成、生成后的修改请求与演讲稿

mod edit;
mod generator;
mod speech;
mod types;

pub use edit::{EditOutcome, PageEdit};
pub(crate) use generator::PageContext;
pub use generator::{
    direct_content, placeholder_content, relevant_unit_types, GenerationSettings, PageContentGenerator,
    MAX_BULLET_CHARS, MAX_TITLE_CHARS,
};
pub use speech::{
    estimate_seconds, page_seconds, speech_path, SpeechGenerator, SpeechScript, SpeechSource, CLOSING_SECONDS,
    OPENING_SECONDS,
};
pub use types::{GenerationResult, PageContent, PageRecord, PageStatus, SourceNote};
