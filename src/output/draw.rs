// 该文件是 Tianmu （天目） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::HashMap;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{debug, warn};

use crate::model::Detection;

/// 归一化坐标空间的上限
pub const NORMALIZED_MAX: f64 = 1000.0;

/// 按标签首次出现顺序分配的 10 色调色板
pub const PALETTE: [Rgb<u8>; 10] = [
  Rgb([0xFF, 0x6B, 0x6B]), // 珊瑚红
  Rgb([0x4E, 0xCD, 0xC4]), // 青绿
  Rgb([0x45, 0xB7, 0xD1]), // 天蓝
  Rgb([0x96, 0xCE, 0xB4]), // 灰绿
  Rgb([0xF7, 0xDC, 0x6F]), // 金
  Rgb([0xDD, 0xA0, 0xDD]), // 梅紫
  Rgb([0xF0, 0xB2, 0x7A]), // 桃
  Rgb([0x98, 0xD8, 0xC8]), // 薄荷
  Rgb([0xBB, 0x8F, 0xCE]), // 薰衣草
  Rgb([0xF1, 0x94, 0x8A]), // 鲑鱼粉
];

pub const DEFAULT_COLOR: Rgb<u8> = Rgb([0xFF, 0x91, 0x00]);

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 15.0;
const LABEL_PADDING: i32 = 2;
const FILL_ALPHA: f32 = 50.0 / 255.0;
const MODEL_LABEL_PADDING: i32 = 3;
const MODEL_LABEL_MARGIN: i32 = 6;

// 候选字体路径，按顺序尝试
const FONT_CANDIDATES: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:/Windows/Fonts/arial.ttf",
  "C:/Windows/Fonts/segoeui.ttf",
];

/// 指定字体文件的环境变量
pub const FONT_ENV: &str = "TIANMU_FONT";

/// 归一化边界框 `[y_min, x_min, y_max, x_max]`，取值范围 0-1000
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
  pub y_min: f64,
  pub x_min: f64,
  pub y_max: f64,
  pub x_max: f64,
}

impl NormalizedBox {
  /// 从线格式数组构造，元素个数不是 4 时返回 `None`
  pub fn from_slice(values: &[f64]) -> Option<Self> {
    match values {
      &[y_min, x_min, y_max, x_max] => Some(Self {
        y_min,
        x_min,
        y_max,
        x_max,
      }),
      _ => None,
    }
  }

  pub fn clamped(&self) -> Self {
    let c = |v: f64| {
      if v.is_nan() {
        0.0
      } else {
        v.clamp(0.0, NORMALIZED_MAX)
      }
    };
    Self {
      y_min: c(self.y_min),
      x_min: c(self.x_min),
      y_max: c(self.y_max),
      x_max: c(self.x_max),
    }
  }

  /// 裁剪后面积为零或坐标颠倒
  pub fn is_degenerate(&self) -> bool {
    let c = self.clamped();
    c.y_min >= c.y_max || c.x_min >= c.x_max
  }
}

/// 像素坐标边界框
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub left: u32,
  pub top: u32,
  pub right: u32,
  pub bottom: u32,
}

/// 将归一化坐标换算为像素坐标，结果位于 `[0, width] × [0, height]`
pub fn to_pixel_box(bbox: &NormalizedBox, width: u32, height: u32) -> PixelBox {
  let c = bbox.clamped();
  let scale = |v: f64, dim: u32| -> u32 {
    let px = (v * dim as f64 / NORMALIZED_MAX) as u32;
    px.min(dim)
  };
  PixelBox {
    left: scale(c.x_min, width),
    top: scale(c.y_min, height),
    right: scale(c.x_max, width),
    bottom: scale(c.y_max, height),
  }
}

/// 标签到颜色的映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorMap {
  colors: HashMap<String, Rgb<u8>>,
}

impl ColorMap {
  /// 固定颜色表，标签不区分大小写
  pub fn from_pairs(pairs: &[(&str, Rgb<u8>)]) -> Self {
    Self {
      colors: pairs
        .iter()
        .map(|(label, color)| (label.to_lowercase(), *color))
        .collect(),
    }
  }

  pub fn get(&self, label: &str) -> Option<Rgb<u8>> {
    self.colors.get(&label.to_lowercase()).copied()
  }

  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }
}

/// 按标签首次出现的顺序依次分配调色板颜色，标签数超过调色板大小时循环使用
pub fn build_color_map(items: &[Detection], palette: &[Rgb<u8>]) -> ColorMap {
  let mut colors = HashMap::new();
  if palette.is_empty() {
    return ColorMap { colors };
  }

  let mut next = 0usize;
  for item in items {
    colors.entry(item.color_key()).or_insert_with(|| {
      let color = palette[next % palette.len()];
      next += 1;
      color
    });
  }
  ColorMap { colors }
}

fn load_system_font() -> Option<FontVec> {
  let from_env = std::env::var(FONT_ENV).ok();
  let candidates = from_env
    .as_deref()
    .into_iter()
    .chain(FONT_CANDIDATES.iter().copied());

  for path in candidates {
    let Ok(data) = std::fs::read(path) else {
      continue;
    };
    match FontVec::try_from_vec(data) {
      Ok(font) => {
        debug!("使用字体: {}", path);
        return Some(font);
      }
      Err(e) => warn!("字体文件无效 {}: {}", path, e),
    }
  }

  warn!("未找到可用字体，标注将不包含文字");
  None
}

pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self::with_font(load_system_font())
  }
}

impl Draw {
  pub fn with_font(font: Option<FontVec>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
    }
  }

  /// 不渲染文字，只画边框
  pub fn without_font() -> Self {
    Self::with_font(None)
  }

  /// 在图像上绘制全部检测框，返回实际绘制的数量。
  ///
  /// 格式错误或退化的边界框会被跳过并记录警告，不影响其他检测框。
  pub fn draw_boxes(
    &self,
    image: &mut RgbImage,
    items: &[Detection],
    colors: &ColorMap,
    default_color: Rgb<u8>,
  ) -> usize {
    let (width, height) = image.dimensions();
    let border = (width.min(height) / 300).max(2) as i32;
    let mut drawn = 0;

    for item in items {
      let Some(bbox) = item.normalized_box() else {
        warn!(
          "跳过格式错误的边界框: label={}, bbox={:?}",
          item.label, item.bbox
        );
        continue;
      };
      if bbox.is_degenerate() {
        warn!("跳过退化的边界框: label={}, bbox={:?}", item.label, item.bbox);
        continue;
      }

      let px = to_pixel_box(&bbox, width, height);
      if px.right <= px.left || px.bottom <= px.top {
        warn!("边界框小于一个像素: label={}, {:?}", item.label, px);
        continue;
      }

      let color = colors.get(&item.color_key()).unwrap_or(default_color);
      blend_rect(image, &px, color, FILL_ALPHA);
      draw_border(image, &px, color, border);
      self.draw_tag(image, &px, &item.caption(), color, border);
      drawn += 1;
    }

    debug!("绘制检测框 {}/{}", drawn, items.len());
    drawn
  }

  fn draw_tag(&self, image: &mut RgbImage, px: &PixelBox, text: &str, color: Rgb<u8>, border: i32) {
    let Some(font) = self.font.as_ref() else {
      return;
    };
    if text.is_empty() {
      return;
    }

    let scale = PxScale::from(self.font_size);
    let (tw, th) = text_size(scale, font, text);
    let tag_w = tw + 2 * LABEL_PADDING as u32;
    let tag_h = th + 2 * LABEL_PADDING as u32;

    // 标签默认放在边框上方，空间不足时放在框内
    let left = px.left as i32;
    let mut top = px.top as i32 - tag_h as i32 - border;
    if top < 0 {
      top = px.top as i32 + border;
    }

    draw_filled_rect_mut(image, Rect::at(left, top).of_size(tag_w, tag_h), color);
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      left + LABEL_PADDING,
      top + LABEL_PADDING,
      scale,
      font,
      text,
    );
  }

  /// 在右下角标注生成结果的模型名称，字号随图像尺寸缩放
  pub fn draw_model_label(&self, image: &mut RgbImage, model_name: &str) {
    if model_name.is_empty() {
      return;
    }
    let Some(font) = self.font.as_ref() else {
      warn!("没有可用字体，跳过模型标注");
      return;
    };

    let (width, height) = image.dimensions();
    let text = format!("AI: {}", model_name);
    let scale = PxScale::from((width.min(height) as f32 / 40.0).clamp(12.0, 64.0));
    let (tw, th) = text_size(scale, font, &text);
    let badge_w = tw + 2 * MODEL_LABEL_PADDING as u32;
    let badge_h = th + 2 * MODEL_LABEL_PADDING as u32;

    let x = (width as i32 - badge_w as i32 - MODEL_LABEL_MARGIN).max(0);
    let y = (height as i32 - badge_h as i32 - MODEL_LABEL_MARGIN).max(0);

    draw_filled_rect_mut(image, Rect::at(x, y).of_size(badge_w, badge_h), Rgb([0, 0, 0]));
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      x + MODEL_LABEL_PADDING,
      y + MODEL_LABEL_PADDING,
      scale,
      font,
      &text,
    );
  }
}

// 半透明填充
fn blend_rect(image: &mut RgbImage, px: &PixelBox, color: Rgb<u8>, alpha: f32) {
  let right = px.right.min(image.width());
  let bottom = px.bottom.min(image.height());
  for y in px.top..bottom {
    for x in px.left..right {
      let pixel = image.get_pixel_mut(x, y);
      for c in 0..3 {
        let blended = pixel[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha;
        pixel[c] = blended.round() as u8;
      }
    }
  }
}

fn draw_border(image: &mut RgbImage, px: &PixelBox, color: Rgb<u8>, thickness: i32) {
  let w = (px.right - px.left) as i32;
  let h = (px.bottom - px.top) as i32;
  for i in 0..thickness {
    let (inner_w, inner_h) = (w - 2 * i, h - 2 * i);
    if inner_w <= 0 || inner_h <= 0 {
      break;
    }
    let rect = Rect::at(px.left as i32 + i, px.top as i32 + i).of_size(inner_w as u32, inner_h as u32);
    draw_hollow_rect_mut(image, rect, color);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(bbox: &[f64], label: &str, confidence: f64) -> Detection {
    Detection::new(label, bbox.to_vec()).with_confidence(confidence)
  }

  #[test]
  fn test_pixel_box_roundtrip_on_square_image() {
    let items = [
      detection(&[100.0, 100.0, 200.0, 200.0], "car", 0.9),
      detection(&[500.0, 500.0, 900.0, 900.0], "person", 0.8),
    ];
    let boxes: Vec<_> = items
      .iter()
      .map(|d| to_pixel_box(&d.normalized_box().unwrap(), 1000, 1000))
      .map(|p| (p.left, p.top, p.right, p.bottom))
      .collect();

    assert_eq!(boxes, [(100, 100, 200, 200), (500, 500, 900, 900)]);
  }

  #[test]
  fn test_pixel_box_axes() {
    // y 对应垂直方向，x 对应水平方向
    let bbox = NormalizedBox::from_slice(&[250.0, 100.0, 500.0, 400.0]).unwrap();
    let px = to_pixel_box(&bbox, 200, 400);
    assert_eq!(
      px,
      PixelBox {
        left: 20,
        top: 100,
        right: 80,
        bottom: 200
      }
    );
  }

  #[test]
  fn test_pixel_box_stays_inside_image() {
    let sizes = [(1, 1), (7, 3), (640, 480), (1920, 1080), (333, 999)];
    let coords = [0.0, 1.0, 333.0, 500.0, 999.0, 1000.0];
    for (w, h) in sizes {
      for &a in &coords {
        for &b in &coords {
          let bbox = NormalizedBox::from_slice(&[a, b, 1000.0 - a, 1000.0 - b]).unwrap();
          let px = to_pixel_box(&bbox, w, h);
          assert!(px.left <= w && px.right <= w, "{:?} in {}x{}", px, w, h);
          assert!(px.top <= h && px.bottom <= h, "{:?} in {}x{}", px, w, h);
        }
      }
    }
  }

  #[test]
  fn test_pixel_box_clamps_model_noise() {
    let bbox = NormalizedBox::from_slice(&[-20.0, -5.0, 1200.0, f64::NAN]).unwrap();
    let px = to_pixel_box(&bbox, 640, 480);
    assert_eq!(
      px,
      PixelBox {
        left: 0,
        top: 0,
        right: 0,
        bottom: 480
      }
    );
  }

  #[test]
  fn test_degenerate_and_malformed_boxes() {
    assert!(NormalizedBox::from_slice(&[1.0, 2.0, 3.0]).is_none());
    assert!(NormalizedBox::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]).is_none());
    assert!(
      NormalizedBox::from_slice(&[200.0, 100.0, 100.0, 300.0])
        .unwrap()
        .is_degenerate()
    );
    assert!(
      NormalizedBox::from_slice(&[1100.0, 0.0, 1200.0, 10.0])
        .unwrap()
        .is_degenerate()
    );
    assert!(
      !NormalizedBox::from_slice(&[0.0, 0.0, 10.0, 10.0])
        .unwrap()
        .is_degenerate()
    );
  }

  #[test]
  fn test_color_map_reuses_and_distinguishes() {
    let items = [
      detection(&[0.0, 0.0, 1.0, 1.0], "car", 0.9),
      detection(&[0.0, 0.0, 1.0, 1.0], "person", 0.9),
      detection(&[0.0, 0.0, 1.0, 1.0], "Car", 0.9),
      detection(&[0.0, 0.0, 1.0, 1.0], "dog", 0.9),
    ];
    let map = build_color_map(&items, &PALETTE);

    assert_eq!(map.len(), 3);
    assert_eq!(map.get("car"), Some(PALETTE[0]));
    assert_eq!(map.get("CAR"), Some(PALETTE[0]));
    assert_eq!(map.get("person"), Some(PALETTE[1]));
    assert_eq!(map.get("dog"), Some(PALETTE[2]));
    assert_eq!(map, build_color_map(&items, &PALETTE));
  }

  #[test]
  fn test_color_map_cycles_past_palette() {
    let items: Vec<_> = (0..12)
      .map(|i| detection(&[0.0, 0.0, 1.0, 1.0], &format!("label{}", i), 0.5))
      .collect();
    let map = build_color_map(&items, &PALETTE);

    let first_ten: std::collections::HashSet<_> =
      (0..10).map(|i| map.get(&format!("label{}", i)).unwrap().0).collect();
    assert_eq!(first_ten.len(), 10);
    assert_eq!(map.get("label10"), Some(PALETTE[0]));
    assert_eq!(map.get("label11"), Some(PALETTE[1]));
  }

  #[test]
  fn test_color_map_empty_palette() {
    let items = [detection(&[0.0, 0.0, 1.0, 1.0], "car", 0.9)];
    assert!(build_color_map(&items, &[]).is_empty());
  }

  #[test]
  fn test_draw_boxes_skips_bad_items() {
    let mut image = RgbImage::new(1000, 1000);
    let items = [
      detection(&[100.0, 100.0, 200.0, 200.0], "car", 0.9),
      detection(&[100.0, 100.0], "broken", 0.9),
      detection(&[300.0, 300.0, 300.0, 400.0], "flat", 0.9),
    ];
    let colors = ColorMap::from_pairs(&[("car", Rgb([0, 255, 0]))]);

    let drawn = Draw::without_font().draw_boxes(&mut image, &items, &colors, DEFAULT_COLOR);

    assert_eq!(drawn, 1);
    // 左边框
    assert_eq!(*image.get_pixel(100, 150), Rgb([0, 255, 0]));
    // 框外保持原样
    assert_eq!(*image.get_pixel(50, 50), Rgb([0, 0, 0]));
    // 框内为半透明填充
    let inner = image.get_pixel(150, 150);
    assert!(inner[1] > 0 && inner[1] < 255);
  }

  #[test]
  fn test_draw_boxes_unknown_label_uses_default_color() {
    let mut image = RgbImage::new(100, 100);
    let items = [detection(&[100.0, 100.0, 900.0, 900.0], "mystery", 0.9)];
    Draw::without_font().draw_boxes(&mut image, &items, &ColorMap::default(), DEFAULT_COLOR);
    assert_eq!(*image.get_pixel(10, 50), DEFAULT_COLOR);
  }

  #[test]
  fn test_model_label_without_font_is_noop() {
    let mut image = RgbImage::new(64, 64);
    Draw::without_font().draw_model_label(&mut image, "gemini");
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  /// 右侧最后一列徽标像素的数量，即徽标高度
  fn badge_height(image: &RgbImage) -> u32 {
    let x = image.width() - MODEL_LABEL_MARGIN as u32 - 1;
    (0..image.height())
      .filter(|&y| *image.get_pixel(x, y) == Rgb([0, 0, 0]))
      .count() as u32
  }

  #[test]
  fn test_model_label_bottom_right_and_scaled() {
    let Some(font) = load_system_font() else {
      eprintln!("没有可用字体，跳过");
      return;
    };
    let draw = Draw::with_font(Some(font));
    let white = Rgb([255, 255, 255]);

    let mut small = RgbImage::from_pixel(400, 300, white);
    draw.draw_model_label(&mut small, "gemini");
    let (w, h) = small.dimensions();
    let margin = MODEL_LABEL_MARGIN as u32;

    // 徽标右下角贴着边距，边距本身不被覆盖
    assert_eq!(*small.get_pixel(w - margin - 1, h - margin - 1), Rgb([0, 0, 0]));
    assert_eq!(*small.get_pixel(w - 1, h - 1), white);
    assert_eq!(*small.get_pixel(0, 0), white);
    for (x, y, p) in small.enumerate_pixels() {
      if *p != white {
        assert!(x >= w / 2 && y >= h / 2, "({}, {}) 不在右下角", x, y);
      }
    }

    let mut large = RgbImage::from_pixel(1600, 1200, white);
    draw.draw_model_label(&mut large, "gemini");
    assert!(badge_height(&large) > badge_height(&small));
  }
}
