mod proptest_helpers;

use detbatch::filter::{filter_detections, FilterOptions, SuppressionPolicy};
use detbatch::ir::{Detection, RawDetection, ReferenceFrame};
use proptest::prelude::*;
use proptest_helpers::{arb_disjoint_detections, arb_raw_detections, proptest_config};

fn frame() -> ReferenceFrame {
    ReferenceFrame::resolution(640, 640)
}

fn refilter_input(detections: &[Detection]) -> Vec<RawDetection> {
    detections
        .iter()
        .map(|d| RawDetection::merged(d.bbox.to_center(), d.confidence, d.class_id))
        .collect()
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn confidences_are_non_increasing(
        raw in arb_raw_detections(40),
        conf in 0.0f64..=1.0,
        iou in 0.0f64..=1.0,
    ) {
        let options = FilterOptions::new(conf, iou, SuppressionPolicy::ClassAgnostic).unwrap();
        let out = filter_detections(&raw, frame(), &options).unwrap();
        for pair in out.items.windows(2) {
            prop_assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn every_kept_detection_meets_the_threshold(
        raw in arb_raw_detections(40),
        conf in 0.0f64..=1.0,
    ) {
        let options = FilterOptions::new(conf, 0.45, SuppressionPolicy::ClassAgnostic).unwrap();
        let out = filter_detections(&raw, frame(), &options).unwrap();
        prop_assert!(out.len() <= raw.len());
        for det in &out.items {
            prop_assert!(det.confidence >= conf);
        }
    }

    #[test]
    fn class_agnostic_output_has_no_overlap_at_or_above_threshold(
        raw in arb_raw_detections(40),
        iou in 0.05f64..=1.0,
    ) {
        let options = FilterOptions::new(0.0, iou, SuppressionPolicy::ClassAgnostic).unwrap();
        let out = filter_detections(&raw, frame(), &options).unwrap();
        for (i, a) in out.items.iter().enumerate() {
            for b in &out.items[i + 1..] {
                prop_assert!(a.bbox.iou(&b.bbox) < iou);
            }
        }
    }

    #[test]
    fn per_class_output_has_no_same_class_overlap(
        raw in arb_raw_detections(40),
        iou in 0.05f64..=1.0,
    ) {
        let options = FilterOptions::new(0.0, iou, SuppressionPolicy::PerClass).unwrap();
        let out = filter_detections(&raw, frame(), &options).unwrap();
        for (i, a) in out.items.iter().enumerate() {
            for b in out.items[i + 1..].iter().filter(|b| b.class_id == a.class_id) {
                prop_assert!(a.bbox.iou(&b.bbox) < iou);
            }
        }
    }

    #[test]
    fn full_confidence_threshold_drops_imperfect_detections(raw in arb_raw_detections(40)) {
        let raw: Vec<RawDetection> = raw
            .into_iter()
            .filter(|d| d.confidence_and_class().0 < 1.0)
            .collect();
        let options = FilterOptions::new(1.0, 0.45, SuppressionPolicy::ClassAgnostic).unwrap();
        let out = filter_detections(&raw, frame(), &options).unwrap();
        prop_assert!(out.is_empty());
    }

    #[test]
    fn zero_threshold_keeps_all_disjoint_detections(raw in arb_disjoint_detections(60)) {
        let options = FilterOptions::new(0.0, 0.45, SuppressionPolicy::ClassAgnostic).unwrap();
        let out = filter_detections(&raw, frame(), &options).unwrap();
        prop_assert_eq!(out.len(), raw.len());
    }

    #[test]
    fn filtering_is_idempotent(
        raw in arb_raw_detections(40),
        conf in 0.0f64..=1.0,
        iou in 0.05f64..=1.0,
        per_class in any::<bool>(),
    ) {
        let policy = if per_class {
            SuppressionPolicy::PerClass
        } else {
            SuppressionPolicy::ClassAgnostic
        };
        let options = FilterOptions::new(conf, iou, policy).unwrap();
        let once = filter_detections(&raw, frame(), &options).unwrap();
        let twice = filter_detections(&refilter_input(&once.items), frame(), &options).unwrap();

        prop_assert_eq!(once.len(), twice.len());
        for (a, b) in once.items.iter().zip(&twice.items) {
            prop_assert_eq!(a.class_id, b.class_id);
            prop_assert_eq!(a.confidence, b.confidence);
            prop_assert!((a.bbox.x1 - b.bbox.x1).abs() < 1e-9);
            prop_assert!((a.bbox.y1 - b.bbox.y1).abs() < 1e-9);
            prop_assert!((a.bbox.x2 - b.bbox.x2).abs() < 1e-9);
            prop_assert!((a.bbox.y2 - b.bbox.y2).abs() < 1e-9);
        }
    }
}
