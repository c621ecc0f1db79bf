//! 目录文本解析：按行单遍扫描，生成有序的目录条目。
//!
//! 格式示例：
//! ```text
//! <MAGPI>
//! <ITEM>
//! <TITLE>The MagPi 100</TITLE>
//! <TITLE_de>Das MagPi 100</TITLE_de>
//! <DESC>Issue 100</DESC>
//! <COVER>https://host/covers/100.jpg</COVER>
//! <PDF>https://host/issues/MagPi100.pdf</PDF>
//! </ITEM>
//! ```
//! 带两位语言后缀的字段仅在语言匹配时生效，并在提交条目时覆盖基础字段。

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::models::{Availability, CatalogItem, Category, ParsedCatalogue};
use crate::base_system::library_paths::LibraryPaths;

const ITEM_OPEN: &str = "<ITEM>";
const ITEM_CLOSE: &str = "</ITEM>";

static FIELD_RE: OnceLock<Regex> = OnceLock::new();

// 字段值从开标签结束处一直到同一行的下一个 `<`；`<` 不计入匹配，留给后续字段
fn field_re() -> &'static Regex {
    FIELD_RE.get_or_init(|| {
        Regex::new(r"<(TITLE|DESC|COVER|PDF|FILE)(?:_([A-Za-z]{2}))?>([^<]*)")
            .expect("compile FIELD_RE")
    })
}

/// 书籍分区的旧标题 -> 规范标题；目标为 `None` 表示保持原样。
static TITLE_REMAP: &[(&str, Option<&str>)] = &[
    (
        "Raspberry Pi Beginners Guide",
        Some("The Official Raspberry Pi Beginner's Guide"),
    ),
    (
        "Beginner's Guide 4th Edition",
        Some("The Official Raspberry Pi Beginner's Guide"),
    ),
    (
        "Projects Book",
        Some("The Official Raspberry Pi Projects Book"),
    ),
    ("Camera Guide", Some("The Official Raspberry Pi Camera Guide")),
    ("Code the Classics", None),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Desc,
    Cover,
    Pdf,
    File,
}

impl Field {
    const COUNT: usize = 5;

    fn from_tag(tag: &str) -> Option<Field> {
        match tag {
            "TITLE" => Some(Field::Title),
            "DESC" => Some(Field::Desc),
            "COVER" => Some(Field::Cover),
            "PDF" => Some(Field::Pdf),
            "FILE" => Some(Field::File),
            _ => None,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// 单条记录的解析中间态，每个 `<ITEM>` 重新创建。
#[derive(Debug, Default)]
struct RecordDraft {
    base: [Option<String>; Field::COUNT],
    localized: [Option<String>; Field::COUNT],
}

impl RecordDraft {
    fn absorb(&mut self, line: &str, language: Option<&str>) {
        for cap in field_re().captures_iter(line) {
            // 值后面没有 `<` 说明字段未闭合，忽略
            if cap.get(0).is_none_or(|m| m.end() >= line.len()) {
                continue;
            }
            let Some(field) = cap.get(1).and_then(|m| Field::from_tag(m.as_str())) else {
                continue;
            };
            let value = cap.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
            if value.is_empty() {
                continue;
            }
            match cap.get(2) {
                None => self.base[field.slot()] = Some(value.to_string()),
                Some(lang) => {
                    if language.is_some_and(|l| l.eq_ignore_ascii_case(lang.as_str())) {
                        self.localized[field.slot()] = Some(value.to_string());
                    }
                }
            }
        }
    }

    fn take(&mut self, field: Field) -> Option<String> {
        let slot = field.slot();
        self.localized[slot].take().or_else(|| self.base[slot].take())
    }
}

#[derive(Debug, Clone)]
pub struct CatalogueParser {
    paths: LibraryPaths,
    language: Option<String>,
}

impl CatalogueParser {
    pub fn new(paths: LibraryPaths, language: Option<String>) -> Self {
        Self { paths, language }
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn parse(&self, text: &str) -> ParsedCatalogue {
        let mut out = ParsedCatalogue::default();
        let mut category: Option<Category> = None;
        let mut draft: Option<RecordDraft> = None;
        let mut dropped = 0usize;

        for line in text.lines() {
            if let Some(record) = draft.as_mut() {
                if line.contains(ITEM_OPEN) && !line.contains(ITEM_CLOSE) {
                    // 上一条未闭合，丢弃并重新开始
                    dropped += 1;
                    *record = RecordDraft::default();
                    continue;
                }
                record.absorb(line, self.language());
                if line.contains(ITEM_CLOSE) {
                    let finished = draft.take();
                    match finished.and_then(|r| self.commit(category, r)) {
                        Some(item) => {
                            out.counts.increment(item.category);
                            out.items.push(item);
                        }
                        None => dropped += 1,
                    }
                }
                continue;
            }

            if let Some(c) = Category::from_line(line) {
                category = Some(c);
            }
            if line.contains(ITEM_OPEN) {
                let mut record = RecordDraft::default();
                // 单行记录：<ITEM><TITLE>..</TITLE>...</ITEM>
                if line.contains(ITEM_CLOSE) {
                    record.absorb(line, self.language());
                    match self.commit(category, record) {
                        Some(item) => {
                            out.counts.increment(item.category);
                            out.items.push(item);
                        }
                        None => dropped += 1,
                    }
                } else {
                    draft = Some(record);
                }
            }
        }

        if draft.is_some() {
            dropped += 1;
        }
        debug!(
            target: "catalogue",
            items = out.items.len(),
            dropped,
            "目录解析完成"
        );
        out
    }

    fn commit(&self, category: Option<Category>, mut record: RecordDraft) -> Option<CatalogItem> {
        let category = category?;
        let title = record.take(Field::Title)?;
        let description = record.take(Field::Desc)?;
        let cover_ref = record.take(Field::Cover)?;
        let doc_ref = record.take(Field::Pdf);
        let alt_ref = record.take(Field::File);
        if doc_ref.is_none() && alt_ref.is_none() {
            return None;
        }

        let title = if category == Category::Books {
            remap_title(title)
        } else {
            title
        };
        let availability =
            Availability::classify(&self.paths, doc_ref.as_deref(), alt_ref.as_deref());

        Some(CatalogItem {
            category,
            title,
            description,
            cover_ref,
            doc_ref,
            alt_ref,
            availability,
            cover: None,
        })
    }
}

fn remap_title(title: String) -> String {
    match TITLE_REMAP.iter().find(|(from, _)| *from == title) {
        Some((_, Some(to))) => (*to).to_string(),
        _ => title,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const SAMPLE: &str = "\
<MAGPI>
<ITEM>
<TITLE>The MagPi 100</TITLE>
<DESC>Issue 100</DESC>
<COVER>https://h/covers/100.jpg</COVER>
<PDF>https://h/issues/MagPi100.pdf</PDF>
</ITEM>
<ITEM>
<TITLE>The MagPi 101</TITLE>
<DESC>Issue 101</DESC>
<COVER>https://h/covers/101.jpg</COVER>
<PDF>https://h/issues/MagPi101.pdf</PDF>
</ITEM>
</MAGPI>
<BOOKS>
<ITEM>
<TITLE>Projects Book</TITLE>
<DESC>Projects</DESC>
<COVER>https://h/covers/projects.jpg</COVER>
<FILE>https://h/members/projects.pdf</FILE>
</ITEM>
</BOOKS>
";

    fn parser(root: &std::path::Path, language: Option<&str>) -> CatalogueParser {
        let paths = LibraryPaths::under(root);
        paths.ensure_dirs().unwrap();
        CatalogueParser::new(paths, language.map(str::to_string))
    }

    #[test]
    fn items_keep_catalogue_order_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = parser(dir.path(), None).parse(SAMPLE);

        let titles: Vec<_> = parsed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "The MagPi 100",
                "The MagPi 101",
                "The Official Raspberry Pi Projects Book"
            ]
        );
        assert_eq!(parsed.counts.get(Category::MagPi), 2);
        assert_eq!(parsed.counts.get(Category::Books), 1);
        assert_eq!(
            parsed.counts.empty_categories(),
            vec![Category::HackSpace, Category::Wireframe]
        );
        assert_eq!(parsed.items[2].availability, Availability::Locked);
        assert_eq!(parsed.items[0].availability, Availability::Available);
    }

    #[test]
    fn parsing_twice_gives_identical_items() {
        let dir = tempfile::tempdir().unwrap();
        let p = parser(dir.path(), Some("de"));
        assert_eq!(p.parse(SAMPLE), p.parse(SAMPLE));
    }

    #[test]
    fn record_missing_description_is_dropped_and_section_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\
<HACKSPACE>
<ITEM>
<TITLE>HackSpace 1</TITLE>
<COVER>https://h/hs1.jpg</COVER>
<PDF>https://h/hs1.pdf</PDF>
</ITEM>
";
        let parsed = parser(dir.path(), None).parse(text);
        assert!(parsed.is_empty());
        assert_eq!(parsed.counts.get(Category::HackSpace), 0);
        assert!(parsed.counts.empty_categories().contains(&Category::HackSpace));
    }

    #[test]
    fn localized_field_overrides_base_in_either_order() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\
<WIREFRAME>
<ITEM>
<TITLE_de>Wireframe Eins</TITLE_de>
<TITLE>Wireframe One</TITLE>
<DESC>First</DESC>
<DESC_de>Erste</DESC_de>
<DESC_fr>Premier</DESC_fr>
<COVER>https://h/wf1.jpg</COVER>
<PDF>https://h/wf1.pdf</PDF>
</ITEM>
";
        let de = parser(dir.path(), Some("de")).parse(text);
        assert_eq!(de.items[0].title, "Wireframe Eins");
        assert_eq!(de.items[0].description, "Erste");

        let en = parser(dir.path(), None).parse(text);
        assert_eq!(en.items[0].title, "Wireframe One");
        assert_eq!(en.items[0].description, "First");
    }

    #[test]
    fn unterminated_field_is_ignored_for_that_field_only() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\
<MAGPI>
<ITEM>
<TITLE>The MagPi 5</TITLE>
<TITLE_de>Kaputt
<DESC>Issue 5</DESC>
<COVER>https://h/5.jpg</COVER>
<PDF>https://h/5.pdf</PDF>
</ITEM>
<ITEM>
<TITLE>The MagPi 6</TITLE>
<DESC>Issue 6
<COVER>https://h/6.jpg</COVER>
<PDF>https://h/6.pdf</PDF>
</ITEM>
";
        let parsed = parser(dir.path(), Some("de")).parse(text);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].title, "The MagPi 5");
    }

    #[test]
    fn field_without_closing_tag_does_not_swallow_next_field() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\
<MAGPI>
<ITEM>
<TITLE>The MagPi 7</TITLE>
<TITLE_de>Kaputt<DESC>Issue 7</DESC>
<COVER>https://h/7.jpg</COVER><PDF>https://h/7.pdf
<FILE>https://h/members/7.pdf</FILE>
</ITEM>
";
        let parsed = parser(dir.path(), None).parse(text);
        assert_eq!(parsed.items.len(), 1);
        let item = &parsed.items[0];
        assert_eq!(item.title, "The MagPi 7");
        assert_eq!(item.description, "Issue 7");
        assert_eq!(item.cover_ref, "https://h/7.jpg");
        assert_eq!(item.doc_ref, None);
        assert_eq!(item.alt_ref.as_deref(), Some("https://h/members/7.pdf"));
    }

    #[test]
    fn record_state_does_not_leak_between_items() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\
<MAGPI>
<ITEM>
<TITLE>A</TITLE>
<DESC>a</DESC>
<COVER>https://h/a.jpg</COVER>
<PDF>https://h/a.pdf</PDF>
</ITEM>
<ITEM>
<TITLE>B</TITLE>
<DESC>b</DESC>
<COVER>https://h/b.jpg</COVER>
</ITEM>
";
        let parsed = parser(dir.path(), None).parse(text);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].title, "A");
    }

    #[test]
    fn records_outside_sections_or_unclosed_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\
<ITEM>
<TITLE>Orphan</TITLE>
<DESC>o</DESC>
<COVER>https://h/o.jpg</COVER>
<PDF>https://h/o.pdf</PDF>
</ITEM>
<BOOKS>
<ITEM><TITLE>Inline</TITLE><DESC>i</DESC><COVER>https://h/i.jpg</COVER><PDF>https://h/i.pdf</PDF></ITEM>
<ITEM>
<TITLE>Unclosed</TITLE>
";
        let parsed = parser(dir.path(), None).parse(text);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].title, "Inline");
        assert_eq!(parsed.items[0].category, Category::Books);
    }

    #[test]
    fn title_remap_applies_to_books_only() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\
<MAGPI>
<ITEM>
<TITLE>Projects Book</TITLE>
<DESC>x</DESC>
<COVER>https://h/x.jpg</COVER>
<PDF>https://h/x.pdf</PDF>
</ITEM>
<BOOKS>
<ITEM>
<TITLE>Code the Classics</TITLE>
<DESC>y</DESC>
<COVER>https://h/y.jpg</COVER>
<PDF>https://h/y.pdf</PDF>
</ITEM>
";
        let parsed = parser(dir.path(), None).parse(text);
        assert_eq!(parsed.items[0].title, "Projects Book");
        assert_eq!(parsed.items[1].title, "Code the Classics");
    }

    #[test]
    fn existing_local_copy_marks_item_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let p = parser(dir.path(), None);
        fs::write(dir.path().join("documents/MagPi101.pdf"), b"pdf").unwrap();

        let parsed = p.parse(SAMPLE);
        assert_eq!(parsed.items[0].availability, Availability::Available);
        assert_eq!(parsed.items[1].availability, Availability::Downloaded);
    }
}
