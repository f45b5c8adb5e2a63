//! 模板版式目录与渲染接口
//!
//! TemplateLayoutCatalog 列出模板的版式（下标、名称、类别、容量），大纲规划与校验只依赖这些元数据；
//! 版式清单可由 TOML 描述文件提供，未提供时使用内置的通用版式。

mod render;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::PipelineError;
use crate::planning::ContentType;

pub use render::{JsonDeckRenderer, PresentationRenderer};

/// 版式类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutCategory {
    Cover,
    SectionDivider,
    TwoColumn,
    ImageContent,
    ChartContent,
    TableContent,
    Blank,
    TitleAndContent,
    TitleOnly,
    Custom,
}

impl LayoutCategory {
    /// 按版式名称归类（中英文关键词）
    pub fn classify(name: &str) -> Self {
        let lower = name.to_lowercase();
        let has = |keys: &[&str]| keys.iter().any(|k| lower.contains(k));

        if has(&["封面", "标题幻灯片"]) || (lower.contains("title") && lower.contains("slide")) {
            LayoutCategory::Cover
        } else if has(&["section", "divider", "章节", "过渡"]) {
            LayoutCategory::SectionDivider
        } else if has(&["two", "comparison", "对比", "两栏"]) {
            LayoutCategory::TwoColumn
        } else if has(&["picture", "image", "图片"]) {
            LayoutCategory::ImageContent
        } else if has(&["chart", "图表"]) {
            LayoutCategory::ChartContent
        } else if has(&["table", "表格"]) {
            LayoutCategory::TableContent
        } else if has(&["blank", "空白"]) {
            LayoutCategory::Blank
        } else if has(&["title only", "仅标题"]) {
            LayoutCategory::TitleOnly
        } else if has(&["content", "内容", "正文"]) {
            LayoutCategory::TitleAndContent
        } else {
            LayoutCategory::Custom
        }
    }

    pub fn default_capacity(self) -> usize {
        match self {
            LayoutCategory::Cover
            | LayoutCategory::SectionDivider
            | LayoutCategory::Blank
            | LayoutCategory::TitleOnly => 0,
            LayoutCategory::ImageContent | LayoutCategory::ChartContent => 3,
            LayoutCategory::Custom => 4,
            LayoutCategory::TwoColumn
            | LayoutCategory::TableContent
            | LayoutCategory::TitleAndContent => 5,
        }
    }

    pub fn usage(self) -> &'static str {
        match self {
            LayoutCategory::Cover => "封面页、标题页",
            LayoutCategory::SectionDivider => "章节分隔页、过渡页",
            LayoutCategory::TwoColumn => "对比分析、并列展示、优劣势对比",
            LayoutCategory::ImageContent => "图片展示、视觉内容、案例展示",
            LayoutCategory::ChartContent => "数据图表、统计展示、趋势分析",
            LayoutCategory::TableContent => "数据表格、详细对比、清单列表",
            LayoutCategory::Blank => "自定义内容、灵活布局、全图页面",
            LayoutCategory::TitleAndContent => "标准内容页、要点列举、成果展示、计划说明",
            LayoutCategory::TitleOnly => "标题页、过渡页、强调页",
            LayoutCategory::Custom => "自定义布局",
        }
    }
}

impl fmt::Display for LayoutCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayoutCategory::Cover => "cover",
            LayoutCategory::SectionDivider => "section_divider",
            LayoutCategory::TwoColumn => "two_column",
            LayoutCategory::ImageContent => "image_content",
            LayoutCategory::ChartContent => "chart_content",
            LayoutCategory::TableContent => "table_content",
            LayoutCategory::Blank => "blank",
            LayoutCategory::TitleAndContent => "title_and_content",
            LayoutCategory::TitleOnly => "title_only",
            LayoutCategory::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// 单个版式
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub index: usize,
    pub name: String,
    pub category: LayoutCategory,
    /// 可容纳的要点数
    pub capacity_hint: usize,
    pub best_for: String,
}

impl LayoutInfo {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        let name = name.into();
        let category = LayoutCategory::classify(&name);
        Self {
            index,
            name,
            category,
            capacity_hint: category.default_capacity(),
            best_for: category.usage().to_string(),
        }
    }
}

/// 版式目录
pub trait TemplateLayoutCatalog: Send + Sync {
    fn name(&self) -> &str;

    fn list_layouts(&self) -> Result<Vec<LayoutInfo>, PipelineError>;

    /// 模板气质（如「简约商务」），用于推断语言风格
    fn temperament(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    temperament: Option<String>,
    #[serde(default)]
    layouts: Vec<ManifestLayout>,
}

#[derive(Debug, Deserialize)]
struct ManifestLayout {
    name: String,
    #[serde(default)]
    category: Option<LayoutCategory>,
    #[serde(default)]
    max_bullets: Option<usize>,
    #[serde(default)]
    best_for: Option<String>,
}

/// 由 TOML 清单描述的模板
///
/// ```toml
/// name = "商务蓝"
/// temperament = "简约商务"
///
/// [[layouts]]
/// name = "Title Slide"
///
/// [[layouts]]
/// name = "Title and Content"
/// max_bullets = 6
/// ```
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    name: String,
    temperament: Option<String>,
    layouts: Vec<LayoutInfo>,
}

impl ManifestCatalog {
    pub fn from_toml(name: &str, content: &str) -> Result<Self, PipelineError> {
        let manifest: ManifestFile =
            toml::from_str(content).map_err(|e| PipelineError::Template(format!("{name}: {e}")))?;
        if manifest.layouts.is_empty() {
            return Err(PipelineError::Template(format!("{name}: 模板没有任何版式")));
        }
        let layouts = manifest
            .layouts
            .into_iter()
            .enumerate()
            .map(|(index, l)| {
                let category = l.category.unwrap_or_else(|| LayoutCategory::classify(&l.name));
                LayoutInfo {
                    index,
                    capacity_hint: l.max_bullets.unwrap_or_else(|| category.default_capacity()),
                    best_for: l.best_for.unwrap_or_else(|| category.usage().to_string()),
                    name: l.name,
                    category,
                }
            })
            .collect();
        Ok(Self {
            name: manifest.name.unwrap_or_else(|| name.to_string()),
            temperament: manifest.temperament,
            layouts,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::Template(format!("{}: {e}", path.display())))?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "template".to_string());
        Self::from_toml(&stem, &content)
    }

    /// 内置通用版式（无模板时使用）
    pub fn builtin() -> Self {
        let names = [
            "Title Slide",
            "Title and Content",
            "Section Header",
            "Two Content",
            "Chart",
            "Title Only",
        ];
        Self {
            name: "builtin".to_string(),
            temperament: None,
            layouts: names
                .iter()
                .enumerate()
                .map(|(i, n)| LayoutInfo::new(i, *n))
                .collect(),
        }
    }
}

impl TemplateLayoutCatalog for ManifestCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_layouts(&self) -> Result<Vec<LayoutInfo>, PipelineError> {
        Ok(self.layouts.clone())
    }

    fn temperament(&self) -> Option<&str> {
        self.temperament.as_deref()
    }
}

/// 模板分析结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateProfile {
    pub name: String,
    pub temperament: Option<String>,
    pub layouts: Vec<LayoutInfo>,
}

impl TemplateProfile {
    pub fn from_catalog(catalog: &dyn TemplateLayoutCatalog) -> Result<Self, PipelineError> {
        let layouts = catalog.list_layouts()?;
        if layouts.is_empty() {
            return Err(PipelineError::Template(format!("{}: 模板没有任何版式", catalog.name())));
        }
        Ok(Self {
            name: catalog.name().to_string(),
            temperament: catalog.temperament().map(String::from),
            layouts,
        })
    }

    pub fn total_layouts(&self) -> usize {
        self.layouts.len()
    }

    pub fn layout(&self, index: i64) -> Option<&LayoutInfo> {
        usize::try_from(index).ok().and_then(|i| self.layouts.get(i))
    }

    /// 第 0 个版式一般是封面
    pub fn cover_index(&self) -> usize {
        self.find(&[LayoutCategory::Cover]).unwrap_or(0)
    }

    /// 兜底内容页版式：下标 1（只有一个版式时为 0）
    pub fn content_index(&self) -> usize {
        1.min(self.total_layouts().saturating_sub(1))
    }

    /// 为内容类型推荐版式
    pub fn recommend(&self, content_type: ContentType) -> usize {
        use LayoutCategory as C;
        let preferred: &[LayoutCategory] = match content_type {
            ContentType::Cover | ContentType::Ending => &[C::Cover, C::TitleOnly],
            ContentType::SectionDivider => &[C::SectionDivider, C::TitleOnly],
            ContentType::Comparison => &[C::TwoColumn, C::TitleAndContent],
            ContentType::DataShowcase => &[C::ChartContent, C::TableContent, C::TitleAndContent],
            _ => &[C::TitleAndContent, C::Custom],
        };
        self.find(preferred).unwrap_or_else(|| {
            if content_type.is_structural() {
                self.cover_index()
            } else {
                self.content_index()
            }
        })
    }

    fn find(&self, categories: &[LayoutCategory]) -> Option<usize> {
        categories
            .iter()
            .find_map(|c| self.layouts.iter().find(|l| l.category == *c))
            .map(|l| l.index)
    }

    /// 版式可容纳的要点数；越界下标按 0 处理
    pub fn capacity(&self, index: i64) -> usize {
        self.layout(index).map(|l| l.capacity_hint).unwrap_or(0)
    }
}
