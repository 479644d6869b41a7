//! Renders defect annotations (boxes around nodes) and exploration GIFs.

use crate::error::Result;
use crate::node::{Bounds, Node};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{Delay, DynamicImage, Frame, Rgba, RgbaImage};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

const BOX_COLOR: Rgba<u8> = Rgba([255, 69, 58, 255]);
const LABEL_BG: Rgba<u8> = Rgba([255, 69, 58, 200]);
const LABEL_FG: Rgba<u8> = Rgba([255, 255, 255, 255]);
const GIF_MAX_WIDTH: u32 = 480;
const GIF_FRAME_MS: u32 = 1000;

/// Copy `base` to `out` with a numbered box around every node.
pub fn annotate_nodes(base: &Path, out: &Path, nodes: &[Node]) -> Result<()> {
    let mut img = image::open(base)?.to_rgba8();
    draw_nodes(&mut img, nodes);
    ensure_parent_dir(out)?;
    DynamicImage::ImageRgba8(img).save(out)?;
    debug!(out = %out.display(), count = nodes.len(), "annotated nodes");
    Ok(())
}

/// One frame per screenshot, each with the nodes visited on it boxed.
pub fn create_gif(frames: &[(PathBuf, Vec<Node>)], out: &Path) -> Result<()> {
    ensure_parent_dir(out)?;
    let mut encoder = GifEncoder::new(File::create(out)?);
    encoder.set_repeat(Repeat::Infinite)?;

    for (path, nodes) in frames {
        let mut img = image::open(path)?.to_rgba8();
        draw_nodes(&mut img, nodes);
        let img = shrink_to_width(img, GIF_MAX_WIDTH);
        encoder.encode_frame(Frame::from_parts(
            img,
            0,
            0,
            Delay::from_numer_denom_ms(GIF_FRAME_MS, 1),
        ))?;
    }
    debug!(out = %out.display(), frames = frames.len(), "wrote gif");
    Ok(())
}

fn draw_nodes(img: &mut RgbaImage, nodes: &[Node]) {
    let scale = (img.width() / 360).max(1);
    for (idx, node) in nodes.iter().enumerate() {
        let Some((x, y, w, h)) = clip(node.bounds, img.width(), img.height()) else {
            continue;
        };
        draw_rect_outline(img, x, y, w, h, BOX_COLOR, 2 * scale);
        let label = format!("{}", idx + 1);
        let label_w = label.len() as u32 * 8 * scale + 4;
        let label_h = 8 * scale + 4;
        let ly = y.saturating_sub(label_h);
        fill_rect(img, x, ly, label_w, label_h, LABEL_BG);
        draw_bitmap_text(img, x as i32 + 2, ly as i32 + 2, &label, LABEL_FG, scale);
    }
}

/// Intersect bounds with the image; `None` if nothing is left.
fn clip(bounds: Bounds, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = bounds.x.clamp(0, i64::from(img_w));
    let y0 = bounds.y.clamp(0, i64::from(img_h));
    let x1 = bounds.right().clamp(0, i64::from(img_w));
    let y1 = bounds.bottom().clamp(0, i64::from(img_h));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

fn shrink_to_width(img: RgbaImage, max_width: u32) -> RgbaImage {
    if img.width() <= max_width {
        return img;
    }
    let height = (u64::from(img.height()) * u64::from(max_width) / u64::from(img.width())) as u32;
    imageops::resize(&img, max_width, height.max(1), FilterType::Triangle)
}

fn draw_rect_outline(
    img: &mut RgbaImage,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    color: Rgba<u8>,
    thickness: u32,
) {
    if w == 0 || h == 0 || img.width() == 0 || img.height() == 0 {
        return;
    }
    let img_w = img.width();
    let img_h = img.height();

    let x0 = x.min(img_w - 1);
    let y0 = y.min(img_h - 1);
    let x1 = (x + w - 1).min(img_w - 1);
    let y1 = (y + h - 1).min(img_h - 1);

    for t in 0..thickness.max(1) {
        let tx0 = (x0 + t).min(x1);
        let ty0 = (y0 + t).min(y1);
        let tx1 = x1.saturating_sub(t).max(tx0);
        let ty1 = y1.saturating_sub(t).max(ty0);

        for xx in tx0..=tx1 {
            img.put_pixel(xx, ty0, color);
            img.put_pixel(xx, ty1, color);
        }
        for yy in ty0..=ty1 {
            img.put_pixel(tx0, yy, color);
            img.put_pixel(tx1, yy, color);
        }
    }
}

fn fill_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    let x1 = (x + w).min(img.width());
    let y1 = (y + h).min(img.height());
    for yy in y..y1 {
        for xx in x..x1 {
            let dst = *img.get_pixel(xx, yy);
            img.put_pixel(xx, yy, blend_pixel(dst, color));
        }
    }
}

fn draw_bitmap_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, scale: u32) {
    let scale_i = scale.max(1) as i32;
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            cursor_x += 8 * scale_i;
            continue;
        };
        for (row_idx, row) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (*row >> col_idx) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col_idx * scale_i;
                let py = y + row_idx as i32 * scale_i;
                for sy in 0..scale_i {
                    for sx in 0..scale_i {
                        let (tx, ty) = (px + sx, py + sy);
                        if tx >= 0 && ty >= 0 && tx < img.width() as i32 && ty < img.height() as i32
                        {
                            img.put_pixel(tx as u32, ty as u32, color);
                        }
                    }
                }
            }
        }
        cursor_x += 8 * scale_i;
    }
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| (f64::from(d) * inv + f64::from(s) * a).round().clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), dst[3].max(src[3])])
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
