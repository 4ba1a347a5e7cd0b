use image::{Rgb, RgbImage};
use shaomiao::{
  label::LabelTable,
  model::{DetectResult, Detection},
  output::draw::{DrawError, DrawStyle, annotate},
};
use url::Url;

const FONT: &str = concat!(
  env!("CARGO_MANIFEST_DIR"),
  "/tests/fixtures/DejaVuSansMono-Oblique.ttf"
);

fn labelled_style() -> DrawStyle {
  DrawStyle::default().with_font_file(FONT).unwrap()
}

fn detection(cx: f32, cy: f32, w: f32, h: f32, class_index: i64) -> Detection {
  Detection {
    center_x: cx,
    center_y: cy,
    width: w,
    height: h,
    score: 0.9,
    class_index,
  }
}

fn gradient() -> RgbImage {
  RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8 * 5, y as u8 * 7, 99]))
}

#[test]
fn empty_result_returns_the_input_image() {
  let image = gradient();
  let labels: LabelTable = ["person", "car"].into_iter().collect();
  let out = annotate(&image, &DetectResult::empty(), &labels, &DrawStyle::default());
  assert_eq!(out, image);
}

#[test]
fn out_of_range_and_negative_classes_do_not_panic() {
  let image = gradient();
  let labels: LabelTable = ["person"].into_iter().collect();
  let result: DetectResult = vec![
    detection(10.0, 10.0, 6.0, 6.0, 80),
    detection(20.0, 15.0, 6.0, 6.0, -3),
    detection(30.0, 20.0, 6.0, 6.0, i64::MAX),
  ]
  .into();
  let out = annotate(&image, &result, &labels, &DrawStyle::default());
  assert_eq!(out.dimensions(), image.dimensions());
  assert_ne!(out, image);
}

#[test]
fn degenerate_and_offscreen_boxes_are_safe() {
  let image = gradient();
  let result: DetectResult = vec![
    detection(-100.0, -100.0, 10.0, 10.0, 0),
    detection(5.0, 5.0, 0.0, 0.0, 0),
    detection(39.0, 29.0, 500.0, 500.0, 0),
    detection(10.0, 10.0, -4.0, -4.0, 0),
  ]
  .into();
  let out = annotate(&image, &result, &LabelTable::default(), &DrawStyle::default());
  assert_eq!(out.dimensions(), image.dimensions());
}

#[test]
fn rendering_is_deterministic() {
  let image = gradient();
  let result: DetectResult = vec![detection(20.0, 15.0, 12.0, 8.0, 1)].into();
  let labels = LabelTable::default();
  let style = DrawStyle::default();
  assert_eq!(
    annotate(&image, &result, &labels, &style),
    annotate(&image, &result, &labels, &style)
  );
}

#[test]
fn labels_for_unknown_classes_are_drawn_above_the_box() {
  let labels: LabelTable = ["person", "bicycle"].into_iter().collect();
  let style = labelled_style();
  let black = RgbImage::new(200, 120);

  for class_index in [80, -3, i64::MAX, 1] {
    // 框的上边在 y = 70，标签位于其上方
    let result: DetectResult = vec![detection(60.0, 80.0, 40.0, 20.0, class_index)].into();
    let out = annotate(&black, &result, &labels, &style);
    let text_pixels = (0..200)
      .flat_map(|x| (0..66).map(move |y| (x, y)))
      .filter(|&(x, y)| out.get_pixel(x, y) != &Rgb([0, 0, 0]))
      .count();
    assert!(text_pixels > 0, "类别 {} 的标签没有绘制", class_index);
  }
}

#[test]
fn labels_near_the_top_edge_are_clamped() {
  let labels = LabelTable::default();
  let result: DetectResult = vec![
    detection(10.0, 2.0, 8.0, 4.0, -1),
    detection(190.0, 5.0, 30.0, 10.0, i64::MIN),
  ]
  .into();
  let out = annotate(&RgbImage::new(200, 40), &result, &labels, &labelled_style());
  assert_eq!(out.dimensions(), (200, 40));
}

#[test]
fn oversized_font_is_rejected_from_url() {
  let url = Url::parse(&format!("image:///tmp/x.png?font={}&font_size=1e10", FONT)).unwrap();
  assert!(matches!(
    DrawStyle::from_url(&url),
    Err(DrawError::InvalidFontSize(_))
  ));
}

#[test]
fn invalid_font_size_set_directly_skips_the_label() {
  let mut style = labelled_style();
  style.font_size = 1e10;
  let result: DetectResult = vec![detection(60.0, 80.0, 40.0, 20.0, 0)].into();
  let out = annotate(&RgbImage::new(200, 120), &result, &LabelTable::default(), &style);
  assert!(
    (0..200)
      .flat_map(|x| (0..60).map(move |y| (x, y)))
      .all(|(x, y)| out.get_pixel(x, y) == &Rgb([0, 0, 0]))
  );
}

#[test]
fn label_text_requires_a_font() {
  use std::sync::Arc;

  use shaomiao::output::draw::Draw;

  let labels: Arc<LabelTable> = Arc::new(["person"].into_iter().collect());
  let boxes_only = Draw::default().with_labels(labels.clone());
  assert!(!boxes_only.draws_labels());

  let with_text = Draw::new(labelled_style(), Arc::default()).with_labels(labels);
  assert!(with_text.draws_labels());
  assert_eq!(with_text.labels().get(0), Some("person"));
}
