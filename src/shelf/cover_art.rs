//! 封面合成：缩放、变暗与角标。
//!
//! 角标优先从 `assets_dir/{cloud,padlock,new,nocover}.png` 读取，缺失时按尺寸生成。

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::catalogue::models::{Availability, CoverImage};

// ── 角标 ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Badges {
    cloud: RgbaImage,
    padlock: RgbaImage,
    fresh: RgbaImage,
    placeholder: RgbaImage,
}

impl Badges {
    fn load(assets_dir: &Path, size: u32) -> Self {
        let badge = (size / 2).max(1);
        let corner = (size / 4).max(1);
        Self {
            cloud: load_asset(assets_dir, "cloud.png", badge).unwrap_or_else(|| cloud_badge(badge)),
            padlock: load_asset(assets_dir, "padlock.png", badge)
                .unwrap_or_else(|| padlock_badge(badge)),
            fresh: load_asset(assets_dir, "new.png", corner).unwrap_or_else(|| fresh_badge(corner)),
            placeholder: load_asset(assets_dir, "nocover.png", size)
                .unwrap_or_else(|| placeholder_cover(size)),
        }
    }
}

fn load_asset(assets_dir: &Path, name: &str, longest: u32) -> Option<RgbaImage> {
    let path = assets_dir.join(name);
    if !path.is_file() {
        return None;
    }
    match image::open(&path) {
        Ok(img) => Some(fit_longest(img.to_rgba8(), longest)),
        Err(err) => {
            debug!(target: "cover", "角标读取失败 {}: {err}", path.display());
            None
        }
    }
}

fn within_circle(x: u32, y: u32, cx: f32, cy: f32, r: f32) -> bool {
    let dx = x as f32 + 0.5 - cx;
    let dy = y as f32 + 0.5 - cy;
    dx * dx + dy * dy <= r * r
}

fn cloud_badge(size: u32) -> RgbaImage {
    let s = size as f32;
    let white = Rgba([250, 250, 250, 255]);
    RgbaImage::from_fn(size, size, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        // 三个圆 + 底部矩形
        let hit = within_circle(x, y, s * 0.35, s * 0.6, s * 0.22)
            || within_circle(x, y, s * 0.55, s * 0.45, s * 0.28)
            || within_circle(x, y, s * 0.72, s * 0.62, s * 0.2)
            || (fy >= s * 0.6 && fy < s * 0.82 && fx >= s * 0.35 && fx < s * 0.72);
        if hit { white } else { Rgba([0, 0, 0, 0]) }
    })
}

fn padlock_badge(size: u32) -> RgbaImage {
    let s = size as f32;
    let body = Rgba([230, 190, 60, 255]);
    RgbaImage::from_fn(size, size, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        let in_body = fx >= s * 0.2 && fx < s * 0.8 && fy >= s * 0.45 && fy < s * 0.9;
        let in_ring = within_circle(x, y, s * 0.5, s * 0.45, s * 0.28)
            && !within_circle(x, y, s * 0.5, s * 0.45, s * 0.18)
            && fy < s * 0.45;
        if in_body || in_ring { body } else { Rgba([0, 0, 0, 0]) }
    })
}

fn fresh_badge(size: u32) -> RgbaImage {
    let s = size as f32;
    RgbaImage::from_fn(size, size, |x, y| {
        if within_circle(x, y, s / 2.0, s / 2.0, s / 2.0) {
            Rgba([220, 40, 40, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

fn placeholder_cover(size: u32) -> RgbaImage {
    let border = (size / 32).max(1);
    RgbaImage::from_fn(size, size, |x, y| {
        if x < border || y < border || x >= size - border || y >= size - border {
            Rgba([120, 120, 120, 255])
        } else {
            Rgba([200, 200, 200, 255])
        }
    })
}

// ── 合成 ────────────────────────────────────────────────────────

fn fit_longest(img: RgbaImage, longest: u32) -> RgbaImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || w.max(h) == longest {
        return img;
    }
    let scale = longest as f32 / w.max(h) as f32;
    let nw = ((w as f32) * scale).round().max(1.0) as u32;
    let nh = ((h as f32) * scale).round().max(1.0) as u32;
    imageops::resize(&img, nw, nh, FilterType::Triangle)
}

/// 每个通道向中灰靠拢一半，保留透明度。
fn dim(img: &mut RgbaImage) {
    for px in img.pixels_mut() {
        for c in &mut px.0[..3] {
            *c = *c / 2 + 64;
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoverArt {
    size: u32,
    badges: Badges,
}

impl CoverArt {
    pub fn new(assets_dir: &Path, size: u32) -> Self {
        let size = size.max(8);
        Self {
            size,
            badges: Badges::load(assets_dir, size),
        }
    }

    /// 合成显示用封面。`cover` 不存在或无法解码时使用占位图。
    pub fn compose(&self, cover: Option<&Path>, availability: Availability, fresh: bool) -> CoverImage {
        let base = cover
            .and_then(|p| match image::open(p) {
                Ok(img) => Some(img.to_rgba8()),
                Err(err) => {
                    debug!(target: "cover", "封面解码失败 {}: {err}", p.display());
                    None
                }
            })
            .unwrap_or_else(|| self.badges.placeholder.clone());
        let mut img = fit_longest(base, self.size);
        let (w, h) = img.dimensions();

        let centre_badge = match availability {
            Availability::Downloaded => None,
            Availability::Available => Some(&self.badges.cloud),
            Availability::Locked => Some(&self.badges.padlock),
        };
        if let Some(badge) = centre_badge {
            dim(&mut img);
            let (bw, _) = badge.dimensions();
            let x = w.saturating_sub(bw) / 2;
            let y = h / 4;
            imageops::overlay(&mut img, badge, x as i64, y as i64);
        }
        if fresh {
            let (bw, _) = self.badges.fresh.dimensions();
            imageops::overlay(&mut img, &self.badges.fresh, w.saturating_sub(bw) as i64, 0);
        }
        CoverImage(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, v: u8) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255]))
    }

    #[test]
    fn longest_side_is_scaled_to_cover_size() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("c.png");
        solid(200, 400, 255).save(&cover).unwrap();

        let art = CoverArt::new(dir.path(), 128);
        let out = art.compose(Some(&cover), Availability::Downloaded, false);
        assert_eq!(out.0.dimensions(), (64, 128));
    }

    #[test]
    fn downloaded_cover_is_not_dimmed() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("c.png");
        solid(128, 128, 255).save(&cover).unwrap();

        let art = CoverArt::new(dir.path(), 128);
        let plain = art.compose(Some(&cover), Availability::Downloaded, false);
        assert_eq!(plain.0.get_pixel(2, 2).0, [255, 255, 255, 255]);

        let dimmed = art.compose(Some(&cover), Availability::Available, false);
        assert_eq!(dimmed.0.get_pixel(2, 2).0, [191, 191, 191, 255]);
    }

    #[test]
    fn missing_or_corrupt_cover_uses_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.jpg");
        std::fs::write(&broken, b"not an image").unwrap();

        let art = CoverArt::new(dir.path(), 64);
        let a = art.compose(None, Availability::Locked, false);
        let b = art.compose(Some(&broken), Availability::Locked, false);
        assert_eq!(a.0.dimensions(), (64, 64));
        assert_eq!(a, b);
    }

    #[test]
    fn fresh_badge_marks_top_right_corner() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("c.png");
        solid(128, 128, 0).save(&cover).unwrap();

        let art = CoverArt::new(dir.path(), 128);
        let out = art.compose(Some(&cover), Availability::Downloaded, true);
        let [r, g, _, _] = out.0.get_pixel(112, 16).0;
        assert!(r > 200 && g < 60);
        assert_eq!(out.0.get_pixel(16, 16).0, [0, 0, 0, 255]);
    }

    #[test]
    fn asset_badges_override_generated_ones() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(10, 10, Rgba([1, 2, 3, 255]))
            .save(dir.path().join("nocover.png"))
            .unwrap();

        let art = CoverArt::new(dir.path(), 32);
        let out = art.compose(None, Availability::Downloaded, false);
        assert_eq!(out.0.dimensions(), (32, 32));
        let [r, g, b, _] = out.0.get_pixel(16, 16).0;
        assert!(r <= 2 && (1..=3).contains(&g) && (2..=4).contains(&b));
    }
}
