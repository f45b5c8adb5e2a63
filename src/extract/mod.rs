//! 语义单元提取
//!
//! - **types**: SemanticUnit / DocumentProfile / ExtractionResult
//! - **chunker**: 按标题 / 页 / 幻灯片 / 段落批次分块
//! - **cross_check**: 百分比、金额、日期的确定性交叉验证
//! - **extractor**: 两遍提取（画像 + 分块提取）

pub mod chunker;
pub mod cross_check;
mod extractor;
mod types;

pub use chunker::{chunk_document, Chunk, ChunkLimits};
pub use cross_check::{cross_validate, extract_data_points, DataKind, DataPoint};
pub use extractor::{heuristic_profile, heuristic_units, merge_documents, SemanticExtractor};
pub use types::{
    Confidence, DataCheck, DocumentProfile, ExtractionResult, Granularity, SemanticUnit, UnitType,
};
