#![allow(dead_code)]

use detbatch::ir::{CenterBox, RawDetection};
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub const EPS_ROUNDTRIP: f64 = 1e-9;

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// A center box with non-negative extent inside a 640x640 frame.
pub fn arb_center_box() -> BoxedStrategy<CenterBox> {
    (0.0f64..640.0, 0.0f64..640.0, 0.0f64..320.0, 0.0f64..320.0)
        .prop_map(|(cx, cy, w, h)| CenterBox::new(cx, cy, w, h))
        .boxed()
}

pub fn arb_raw_detection() -> BoxedStrategy<RawDetection> {
    (arb_center_box(), 0.0f64..=1.0, 0u32..8)
        .prop_map(|(center, confidence, class_id)| {
            RawDetection::merged(center, confidence, class_id)
        })
        .boxed()
}

pub fn arb_raw_detections(max: usize) -> BoxedStrategy<Vec<RawDetection>> {
    prop::collection::vec(arb_raw_detection(), 0..max).boxed()
}

/// Detections laid out on a grid so that no two boxes overlap.
pub fn arb_disjoint_detections(max: usize) -> BoxedStrategy<Vec<RawDetection>> {
    prop::collection::vec((0.0f64..=1.0, 0u32..8), 0..max)
        .prop_map(|scores| {
            scores
                .into_iter()
                .enumerate()
                .map(|(i, (confidence, class_id))| {
                    let col = (i % 10) as f64;
                    let row = (i / 10) as f64;
                    let center = CenterBox::new(30.0 + col * 60.0, 30.0 + row * 60.0, 40.0, 40.0);
                    RawDetection::merged(center, confidence, class_id)
                })
                .collect()
        })
        .boxed()
}
