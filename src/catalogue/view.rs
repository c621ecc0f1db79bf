//! 搜索过滤：只读投影，不修改条目集合。

use super::models::{CatalogItem, CategoryCounts};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterView {
    pub visible: Vec<usize>,
    pub counts: CategoryCounts,
}

/// 标题或描述包含 `text`（不区分大小写）的条目下标；空串匹配全部。
pub fn apply_filter(items: &[CatalogItem], text: &str) -> FilterView {
    let needle = text.trim().to_lowercase();
    let mut view = FilterView::default();
    for (idx, item) in items.iter().enumerate() {
        if needle.is_empty()
            || item.title.to_lowercase().contains(&needle)
            || item.description.to_lowercase().contains(&needle)
        {
            view.visible.push(idx);
            view.counts.increment(item.category);
        }
    }
    view
}
