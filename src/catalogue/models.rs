//! 目录条目数据模型。

use std::collections::BTreeMap;
use std::fmt;

use image::RgbaImage;

use crate::base_system::library_paths::LibraryPaths;

/// 目录分区。新增分区只需追加变体，不影响已有变体。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    MagPi,
    Books,
    HackSpace,
    Wireframe,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::MagPi,
        Category::Books,
        Category::HackSpace,
        Category::Wireframe,
    ];

    pub fn section_tag(self) -> &'static str {
        match self {
            Category::MagPi => "<MAGPI>",
            Category::Books => "<BOOKS>",
            Category::HackSpace => "<HACKSPACE>",
            Category::Wireframe => "<WIREFRAME>",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::MagPi => "The MagPi",
            Category::Books => "Books",
            Category::HackSpace => "HackSpace",
            Category::Wireframe => "Wireframe",
        }
    }

    /// 行内出现分区标记则返回对应分区。
    pub fn from_line(line: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|c| line.contains(c.section_tag()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Downloaded,
    Locked,
}

impl Availability {
    /// 有本地副本（预装或用户下载）即为已下载；仅有受限引用且无副本时为锁定。
    pub fn classify(paths: &LibraryPaths, doc_ref: Option<&str>, alt_ref: Option<&str>) -> Self {
        let local_ref = doc_ref.or(alt_ref);
        if local_ref.and_then(|r| paths.resolve_document(r)).is_some() {
            return Availability::Downloaded;
        }
        if doc_ref.is_none() && alt_ref.is_some() {
            Availability::Locked
        } else {
            Availability::Available
        }
    }
}

/// 合成后的封面图（不持久化）。
#[derive(Clone, PartialEq)]
pub struct CoverImage(pub RgbaImage);

impl fmt::Debug for CoverImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoverImage({}x{})", self.0.width(), self.0.height())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub category: Category,
    pub title: String,
    pub description: String,
    pub cover_ref: String,
    pub doc_ref: Option<String>,
    pub alt_ref: Option<String>,
    pub availability: Availability,
    pub cover: Option<CoverImage>,
}

impl CatalogItem {
    /// 用于定位本地副本的引用：优先正式文档引用。
    pub fn local_ref(&self) -> Option<&str> {
        self.doc_ref.as_deref().or(self.alt_ref.as_deref())
    }

    pub fn reclassify(&mut self, paths: &LibraryPaths) {
        self.availability =
            Availability::classify(paths, self.doc_ref.as_deref(), self.alt_ref.as_deref());
    }
}

/// 各分区条目数；所有分区都有条目（可能为 0）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCounts(BTreeMap<Category, usize>);

impl Default for CategoryCounts {
    fn default() -> Self {
        Self(Category::ALL.into_iter().map(|c| (c, 0)).collect())
    }
}

impl CategoryCounts {
    pub fn increment(&mut self, category: Category) {
        *self.0.entry(category).or_insert(0) += 1;
    }

    pub fn get(&self, category: Category) -> usize {
        self.0.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    /// 没有任何条目的分区，界面可据此隐藏对应页。
    pub fn empty_categories(&self) -> Vec<Category> {
        self.0
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, usize)> + '_ {
        self.0.iter().map(|(c, n)| (*c, *n))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCatalogue {
    pub items: Vec<CatalogItem>,
    pub counts: CategoryCounts,
}

impl ParsedCatalogue {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
