use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::Array3;
use std::cell::RefCell;
use std::io::Write;
use tinyyolo_detect::{
    Anchor, BoundingBox, Config, DetectError, DetectOptions, Detector, GreedyNms, GridDecoder,
    NetInput, Suppressor, TinyYolo,
};
use tinyyolo_model::expected_param_count;

fn plain_config(classes: &[&str], with_class_scores: bool) -> Config {
    Config {
        classes: classes.iter().map(|c| c.to_string()).collect(),
        anchors: vec![Anchor::new(1.0, 1.0)],
        mean_rgb: Some([100.0, 100.0, 100.0]),
        is_first_layer_conv2d: false,
        with_separable_convs: false,
        with_class_scores,
        iou_threshold: 0.5,
        filter_sizes: Some(vec![3, 2, 2, 2, 2, 2, 2, 2, 2]),
    }
}

/// Zero weights except the output bias, so every cell emits `bias`.
fn weights_with_output_bias(config: &Config, bias: &[f32]) -> Vec<f32> {
    let mut raw = vec![0.0; expected_param_count(config)];
    let n = raw.len();
    raw[n - bias.len()..].copy_from_slice(bias);
    raw
}

fn loaded(config: Config, bias: &[f32]) -> TinyYolo {
    let raw = weights_with_output_bias(&config, bias);
    let mut det = TinyYolo::new(config).unwrap();
    det.load_parameters(&raw).unwrap();
    det
}

fn gray(w: u32, h: u32) -> NetInput {
    NetInput::from_image(RgbImage::from_pixel(w, h, Rgb([128, 128, 128]))).unwrap()
}

fn options() -> DetectOptions {
    DetectOptions::default().with_input_size(64)
}

#[test]
fn detect_tiles_the_grid() {
    let det = loaded(plain_config(&["object"], false), &[0.0, 0.0, 0.0, 0.0, 10.0]);
    let out = det.detect(&gray(64, 64), &options()).unwrap();

    // 2×2 grid, anchor width of one cell: four disjoint boxes, row-major
    assert_eq!(out.len(), 4);
    let centers: Vec<_> = out.iter().map(|d| d.bbox.center()).collect();
    assert_eq!(centers, vec![(16.0, 16.0), (48.0, 16.0), (16.0, 48.0), (48.0, 48.0)]);
    for d in &out {
        assert_eq!(d.class_name, "object");
        assert_eq!(d.class_score, d.score);
        assert_eq!((d.image_width, d.image_height), (64, 64));
        assert!((d.bbox.width() - 32.0).abs() < 1e-4);
    }
}

#[test]
fn forward_returns_raw_grid() {
    let config = plain_config(&["a", "b"], true);
    let channels = config.output_channels();
    let det = loaded(config, &[0.5; 7]);
    let raw = det.forward(&gray(30, 50), 64).unwrap();
    assert_eq!(raw.shape(), &[1, 2, 2, channels]);
    assert!(raw.iter().all(|&v| (v - 0.5).abs() < 1e-6));
}

#[test]
fn score_threshold_filters_strictly() {
    let det = loaded(plain_config(&["object"], false), &[0.0, 0.0, 0.0, 0.0, 10.0]);
    let objectness = 1.0 / (1.0 + (-10.0f32).exp());

    let none = det
        .detect(&gray(64, 64), &options().with_score_threshold(Some(objectness)))
        .unwrap();
    assert!(none.is_empty());

    let low = options().with_score_threshold(Some(0.9));
    for d in det.detect(&gray(64, 64), &low).unwrap() {
        assert!(d.score > 0.9);
    }
}

#[test]
fn no_threshold_keeps_low_scores() {
    let det = loaded(plain_config(&["object"], false), &[0.0, 0.0, 0.0, 0.0, -10.0]);
    assert!(det.detect(&gray(64, 64), &options()).unwrap().is_empty());
    let all = det
        .detect(&gray(64, 64), &options().with_score_threshold(None))
        .unwrap();
    assert_eq!(all.len(), 4);
    let zero = det
        .detect(&gray(64, 64), &options().with_score_threshold(Some(0.0)))
        .unwrap();
    assert_eq!(zero.len(), 4);
}

#[test]
fn neighbouring_cells_suppressed_by_iou_threshold() {
    // tw = ln 3: boxes 1.5 cells wide, neighbours in a row overlap with IoU 0.5
    let bias = [0.0, 0.0, 3f32.ln(), 0.0, 10.0, 5.0, -5.0];
    let det = loaded(plain_config(&["cat", "dog"], true), &bias);

    let strict = det.detect(&gray(64, 64), &options().with_iou_threshold(0.4)).unwrap();
    assert_eq!(strict.len(), 2);
    for (i, a) in strict.iter().enumerate() {
        for b in &strict[i + 1..] {
            assert!(a.bbox.iou(&b.bbox) <= 0.4);
        }
    }

    let loose = det.detect(&gray(64, 64), &options().with_iou_threshold(0.6)).unwrap();
    assert_eq!(loose.len(), 4);
}

/// Forwards to greedy NMS and remembers what it was asked to suppress.
#[derive(Default)]
struct RecordingNms {
    calls: RefCell<Vec<(Vec<usize>, bool)>>,
}

impl Suppressor for RecordingNms {
    fn suppress(
        &self,
        boxes: &[BoundingBox],
        scores: &[f32],
        labels: &[usize],
        iou_threshold: f32,
        class_agnostic: bool,
    ) -> Vec<usize> {
        self.calls.borrow_mut().push((labels.to_vec(), class_agnostic));
        GreedyNms::default().suppress(boxes, scores, labels, iou_threshold, class_agnostic)
    }
}

#[test]
fn suppression_crosses_class_labels() {
    // two anchors with identical boxes: anchor 0 says cat, anchor 1 says dog
    let mut config = plain_config(&["cat", "dog"], true);
    config.anchors = vec![Anchor::new(1.0, 1.0); 2];
    let bias = [
        0.0, 0.0, 0.0, 0.0, 10.0, 5.0, -5.0, //
        0.0, 0.0, 0.0, 0.0, 9.0, -5.0, 5.0,
    ];
    let raw = weights_with_output_bias(&config, &bias);
    let mut det = TinyYolo::with_suppressor(config, RecordingNms::default()).unwrap();
    det.load_parameters(&raw).unwrap();

    let out = det.detect(&gray(64, 64), &options()).unwrap();
    assert_eq!(out.len(), 4);
    assert!(out.iter().all(|d| d.class_name == "cat"));

    let calls = det.suppressor().calls.borrow();
    assert_eq!(calls.len(), 1);
    let (labels, class_agnostic) = &calls[0];
    assert!(*class_agnostic);
    assert_eq!(labels, &vec![0, 1, 0, 1, 0, 1, 0, 1]);
}

#[test]
fn class_scores_pick_best_class() {
    let det = loaded(plain_config(&["cat", "dog"], true), &[0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 1.0]);
    let out = det
        .detect(&gray(64, 64), &options().with_score_threshold(None))
        .unwrap();
    assert_eq!(out.len(), 4);
    let objectness = 1.0 / (1.0 + (-2.0f32).exp());
    let dog = 1f32.exp() / (1.0 + 1f32.exp());
    for d in &out {
        assert_eq!(d.class_name, "dog");
        assert!((d.score - objectness).abs() < 1e-5);
        assert!((d.class_score - objectness * dog).abs() < 1e-5);
    }
}

#[test]
fn detect_is_idempotent() {
    let det = loaded(plain_config(&["a", "b"], true), &[0.3, -0.2, 0.1, 0.4, 1.0, 0.2, 0.2]);
    let input = gray(50, 40);
    let opts = options().with_score_threshold(None);
    let first = det.detect(&input, &opts).unwrap();
    let second = det.detect(&input, &opts).unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn non_square_input_uses_correction_factor() {
    let det = loaded(plain_config(&["object"], false), &[0.0, 0.0, 0.0, 0.0, 10.0]);
    let out = det.detect(&gray(64, 48), &options()).unwrap();
    assert_eq!(out.len(), 4);

    // reshaped 64×48: x factor 1, y factor 4/3
    let bottom_left = &out[2];
    let (cx, cy) = bottom_left.relative_box.center();
    assert!((cx - 0.25).abs() < 1e-5);
    assert!((cy - 0.75 * 4.0 / 3.0).abs() < 1e-5);
    assert!((bottom_left.relative_box.height() - 0.5 * 4.0 / 3.0).abs() < 1e-5);
    assert_eq!((bottom_left.image_width, bottom_left.image_height), (64, 48));
    assert!((bottom_left.bbox.center().1 - 48.0).abs() < 1e-3);
}

#[test]
fn mobile_stack_end_to_end() {
    let mut config = Config::tiny_face_detector();
    config.anchors = vec![Anchor::new(1.0, 1.0)];
    config.filter_sizes = Some(vec![3, 2, 2, 2, 2, 2, 2]);
    let det = loaded(config, &[0.0, 0.0, 0.0, 0.0, 4.0]);
    let out = det
        .detect(&gray(40, 40), &DetectOptions::default().with_input_size(32))
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].class_name, "face");
    let (cx, cy) = out[0].bbox.center();
    assert!((cx - 20.0).abs() < 1e-3 && (cy - 20.0).abs() < 1e-3);
}

#[test]
fn detector_trait_object() {
    let det = loaded(plain_config(&["object"], false), &[0.0, 0.0, 0.0, 0.0, 10.0]);
    let dyn_det: &dyn Detector = &det;
    assert_eq!(dyn_det.detect(&gray(64, 64), &options()).unwrap().len(), 4);
}

#[test]
fn reload_replaces_parameters() {
    let config = plain_config(&["object"], false);
    let mut det = loaded(config.clone(), &[0.0, 0.0, 0.0, 0.0, 10.0]);
    det.load_parameters(&weights_with_output_bias(&config, &[0.0, 0.0, 0.0, 0.0, -10.0]))
        .unwrap();
    assert!(det.detect(&gray(64, 64), &options()).unwrap().is_empty());

    // a failed load leaves the previous parameters in place
    assert!(det.load_parameters(&[0.0; 3]).is_err());
    assert!(det.is_loaded());
}

#[test]
fn invalid_options_fail_before_inference() {
    let det = loaded(plain_config(&["object"], false), &[0.0; 5]);
    let err = det
        .detect(&gray(64, 64), &DetectOptions::default().with_input_size(50))
        .unwrap_err();
    assert_eq!(err.field(), Some("inputSize"));

    let err = det
        .detect(&gray(2, 2), &DetectOptions::default().with_input_size(40_000))
        .unwrap_err();
    assert_eq!(err.field(), Some("inputSize"));
}

// Scenario: single class, one anchor, one hot cell in a 13×13 grid.
#[test]
fn single_hot_cell_yields_one_detection() {
    let config = plain_config(&["object"], false);
    let mut grid = Array3::<f32>::from_elem((13, 13, 5), -10.0);
    grid[[6, 4, 4]] = 10.0;
    let candidates = GridDecoder::new(&config)
        .decode(grid.view(), (416, 416), Some(0.5))
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].label, 0);
    assert_eq!(candidates[0].class_score, candidates[0].score);
    assert_eq!((candidates[0].row, candidates[0].col), (6, 4));
}

// Scenario: two boxes with IoU 0.9, scores 0.9 and 0.5, threshold 0.5.
#[test]
fn overlapping_pair_keeps_higher_score() {
    let boxes = [
        BoundingBox::new(0.0, 0.0, 100.0, 90.0),
        BoundingBox::new(0.0, 0.0, 100.0, 100.0),
    ];
    let keep = GreedyNms::default().suppress(&boxes, &[0.9, 0.5], &[0, 0], 0.5, true);
    assert_eq!(keep, vec![0]);
}

// Scenario: detect before load.
#[test]
fn detect_before_load_fails() {
    let det = TinyYolo::new(plain_config(&["object"], false)).unwrap();
    let err = det.detect(&gray(64, 64), &options()).unwrap_err();
    assert!(matches!(err, DetectError::NotLoaded));
}

// Scenario: 320×240 input, fixed logits, hand-computed center.
#[test]
fn non_square_decode_matches_hand_computation() {
    let config = plain_config(&["object"], false);
    let mut grid = Array3::<f32>::zeros((10, 10, 5));
    grid[[3, 7, 0]] = 1.0;
    grid[[3, 7, 1]] = -0.5;
    let candidates = GridDecoder::new(&config)
        .decode(grid.view(), (320, 240), None)
        .unwrap();
    let c = &candidates[3 * 10 + 7];
    let sig = |x: f32| 1.0 / (1.0 + (-x).exp());
    let expected_x = (7.0 + sig(1.0)) / 10.0 * 1.0;
    let expected_y = (3.0 + sig(-0.5)) / 10.0 * (320.0 / 240.0);
    let (cx, cy) = c.bbox.center();
    assert!((cx - expected_x).abs() < 1e-5);
    assert!((cy - expected_y).abs() < 1e-5);
}

#[tokio::test]
async fn load_weights_and_detect_file() -> anyhow::Result<()> {
    let config = plain_config(&["object"], false);
    let dir = tempfile::tempdir()?;

    let weights_path = dir.path().join("model.weights");
    let mut file = std::fs::File::create(&weights_path)?;
    for v in weights_with_output_bias(&config, &[0.0, 0.0, 0.0, 0.0, 10.0]) {
        file.write_all(&v.to_le_bytes())?;
    }
    drop(file);

    let image_path = dir.path().join("frame.png");
    DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([90, 90, 90])))
        .save_with_format(&image_path, ImageFormat::Png)?;

    let mut det = TinyYolo::new(config)?;
    assert!(matches!(
        det.detect_file(&image_path, &options()).await,
        Err(DetectError::NotLoaded)
    ));

    det.load_weights_file(&weights_path).await?;
    assert!(det.is_loaded());
    let out = det.detect_file(&image_path, &options()).await?;
    assert_eq!(out.len(), 4);

    let json = serde_json::to_string(&out[0])?;
    assert!(json.contains("\"class_name\":\"object\""));
    Ok(())
}
