//! 无 UI（控制台）交互入口。
//!
//! 标准输入由独立线程逐行读取，经通道送回主线程；主线程按 `poll_interval_ms`
//! 的节拍驱动书架，所有状态变化都在主线程打印。

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, select, tick, unbounded};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{debug, info};

use crate::base_system::context::Config;
use crate::catalogue::{CatalogItem, Category, CategoryCounts, CoverImage};
use crate::download::Progress;
use crate::shelf::{Intent, Shelf, ShelfObserver};

const HELP: &str = "命令: r 刷新目录 | o N 打开 | d N 删除本地副本 | c 取消下载 | /文本 过滤 | l 列表 | q 退出";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Intent(Intent),
    List,
    Help,
}

fn parse_command(line: &str) -> Option<Command> {
    let text = line.trim();
    if let Some(filter) = text.strip_prefix('/') {
        return Some(Command::Intent(Intent::Filter(filter.trim().to_string())));
    }
    let mut parts = text.split_whitespace();
    let head = parts.next()?;
    let index = parts.next().and_then(|n| n.parse::<usize>().ok());
    let cmd = match (head.to_ascii_lowercase().as_str(), index) {
        ("r", None) => Command::Intent(Intent::Refresh),
        ("o", Some(i)) => Command::Intent(Intent::Activate(i)),
        ("d", Some(i)) => Command::Intent(Intent::Delete(i)),
        ("c", None) => Command::Intent(Intent::Cancel),
        ("l", None) => Command::List,
        ("q", None) => Command::Intent(Intent::Quit),
        ("h" | "?", None) => Command::Help,
        _ => return None,
    };
    Some(cmd)
}

fn spawn_stdin_reader() -> Result<Receiver<Command>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let cmd = parse_command(&line).unwrap_or(Command::Help);
                if tx.send(cmd).is_err() {
                    return;
                }
            }
            // 输入结束视为退出
            let _ = tx.send(Command::Intent(Intent::Quit));
        })
        .context("启动输入线程失败")?;
    Ok(rx)
}

pub fn run(config: &Config) -> Result<()> {
    println!(
        "Bookshelf v{}\n数据目录: {}\n{HELP}\n",
        env!("CARGO_PKG_VERSION"),
        config.base_dir().display()
    );

    let mut shelf = Shelf::from_config(config, Box::new(ConsoleObserver::default()))?;
    let commands = spawn_stdin_reader()?;
    let ticker = tick(Duration::from_millis(config.poll_interval_ms.max(10)));

    shelf.handle(Intent::Refresh);
    loop {
        select! {
            recv(commands) -> cmd => {
                let Ok(cmd) = cmd else { break };
                match cmd {
                    Command::Intent(intent) => {
                        debug!(target: "ui", ?intent, "用户操作");
                        if !shelf.handle(intent) {
                            break;
                        }
                    }
                    Command::List => {
                        print_items(shelf.items(), None);
                        print_counts(shelf.counts());
                        if shelf.covers().is_active() {
                            println!("封面同步中（第 {} 项）", shelf.covers().cursor());
                        }
                        if let Some(idx) = shelf.pending_document() {
                            println!("等待下载: {idx}");
                        }
                    }
                    Command::Help => println!("{HELP}"),
                }
            }
            recv(ticker) -> _ => shelf.tick(),
        }
    }

    info!(target: "ui", "已退出");
    println!("已退出。");
    Ok(())
}

fn availability_mark(item: &CatalogItem) -> &'static str {
    use crate::catalogue::Availability::*;
    match item.availability {
        Available => " ",
        Downloaded => "*",
        Locked => "#",
    }
}

fn print_items(items: &[CatalogItem], only: Option<&[usize]>) {
    let mut current: Option<Category> = None;
    for (idx, item) in items.iter().enumerate() {
        if only.is_some_and(|v| !v.contains(&idx)) {
            continue;
        }
        if current != Some(item.category) {
            current = Some(item.category);
            println!("== {} ==", item.category.label());
        }
        println!("{idx:>4} [{}] {} - {}", availability_mark(item), item.title, item.description);
    }
    let _ = io::stdout().flush();
}

fn print_counts(counts: &CategoryCounts) {
    let summary: Vec<String> = counts
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(c, n)| format!("{} {n}", c.label()))
        .collect();
    println!("共 {} 项 ({})", counts.total(), summary.join(", "));
}

// ── 观察者 ──────────────────────────────────────────────────────

#[derive(Default)]
struct ConsoleObserver {
    items: Vec<CatalogItem>,
    bar: Option<ProgressBar>,
}

impl ConsoleObserver {
    fn bar(&mut self) -> &ProgressBar {
        self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::with_draw_target(Some(1000), ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template("{prefix} [{elapsed_precise}] {wide_bar} {percent}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-");
            bar.set_style(style);
            bar.set_prefix("下载");
            bar
        })
    }
}

impl ShelfObserver for ConsoleObserver {
    fn items_changed(&mut self, items: &[CatalogItem], counts: &CategoryCounts) {
        self.items = items.to_vec();
        print_items(&self.items, None);
        print_counts(counts);
    }

    fn cover_updated(&mut self, index: usize, image: &CoverImage) {
        debug!(target: "ui", index, ?image, "封面已更新");
    }

    fn progress(&mut self, progress: Progress) {
        let bar = self.bar();
        match progress {
            Progress::Fraction(f) => bar.set_position((f * 1000.0).round() as u64),
            Progress::Indeterminate => bar.tick(),
        }
    }

    fn message(&mut self, text: &str, blocking: bool) {
        if blocking {
            println!("!! {text}");
        } else {
            println!("{text}");
        }
    }

    fn dismiss_message(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn document_ready(&mut self, path: &Path) {
        println!("文档已就绪: {}", path.display());
    }

    fn filter_changed(&mut self, visible: &[usize], counts: &CategoryCounts) {
        print_items(&self.items, Some(visible));
        print_counts(counts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_map_to_intents() {
        assert_eq!(parse_command("r"), Some(Command::Intent(Intent::Refresh)));
        assert_eq!(parse_command(" o 12 "), Some(Command::Intent(Intent::Activate(12))));
        assert_eq!(parse_command("D 3"), Some(Command::Intent(Intent::Delete(3))));
        assert_eq!(
            parse_command("/ raspberry pi"),
            Some(Command::Intent(Intent::Filter("raspberry pi".to_string())))
        );
        assert_eq!(parse_command("/"), Some(Command::Intent(Intent::Filter(String::new()))));
        assert_eq!(parse_command("l"), Some(Command::List));
        assert_eq!(parse_command("q"), Some(Command::Intent(Intent::Quit)));
    }

    #[test]
    fn malformed_commands_are_rejected() {
        assert_eq!(parse_command("o"), None);
        assert_eq!(parse_command("o x"), None);
        assert_eq!(parse_command("r 3"), None);
        assert_eq!(parse_command("zzz"), None);
        assert_eq!(parse_command(""), None);
    }
}
