mod common;

use std::cell::RefCell;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use common::{centered_detection, one_detection_each, png_bytes, read_zip, zip_bytes, FnInference};
use detbatch::batch::{
    BatchOptions, BatchProcessor, CancelToken, EntryOutcome, FailureKind, StopReason,
};
use detbatch::infer::{ImageCrateDecoder, InferenceError};
use detbatch::ir::io_export_csv::from_export_csv_str;
use detbatch::DetbatchError;

const SCORED_HEADER: &str = "class_id,confidence,x1,y1,x2,y2\n";

fn options(workers: usize) -> BatchOptions {
    BatchOptions {
        workers,
        ..BatchOptions::default()
    }
}

#[test]
fn three_images_and_a_text_file_yield_three_exports() {
    let input = zip_bytes(&[
        ("a.jpg", png_bytes(1280, 1280)),
        ("notes.txt", b"not an image".to_vec()),
        ("b.PNG", png_bytes(1280, 720)),
        ("nested/c.jpeg", png_bytes(640, 640)),
    ]);
    let inference = one_detection_each();
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(1));

    let (output, report) = processor.process_archive_bytes(&input).expect("batch");
    let entries = read_zip(&output);

    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["a_result.csv", "b_result.csv", "nested/c_result.csv"]
    );
    assert_eq!(report.total, 3);
    assert_eq!(report.skipped, vec!["notes.txt".to_string()]);
    assert!(report.is_complete());

    // Each export is in its own image's pixel space.
    let a = from_export_csv_str(&entries[0].1).expect("parse a");
    assert_eq!((a[0].x1, a[0].y1, a[0].x2, a[0].y2), (540, 540, 740, 740));
    let b = from_export_csv_str(&entries[1].1).expect("parse b");
    assert_eq!((b[0].x1, b[0].y1, b[0].x2, b[0].y2), (540, 304, 740, 416));
    let c = from_export_csv_str(&entries[2].1).expect("parse c");
    assert_eq!((c[0].x1, c[0].y1, c[0].x2, c[0].y2), (270, 270, 370, 370));
}

#[test]
fn zero_detections_give_a_header_only_entry() {
    let input = zip_bytes(&[("empty.png", png_bytes(32, 32))]);
    let inference = FnInference::new(|_| Ok(Vec::new()));
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(1));

    let (output, report) = processor.process_archive_bytes(&input).expect("batch");
    let entries = read_zip(&output);

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "empty_result.csv");
    assert_eq!(entries[0].1, SCORED_HEADER);
    assert_eq!(
        report.outcomes[0],
        EntryOutcome::Exported {
            entry: "empty.png".to_string(),
            output: "empty_result.csv".to_string(),
            detections: 0,
        }
    );
}

#[test]
fn inference_failure_becomes_a_marker_and_the_batch_continues() {
    let input = zip_bytes(&[
        ("one.png", png_bytes(10, 10)),
        ("two.png", png_bytes(20, 20)),
        ("three.png", png_bytes(30, 30)),
    ]);
    let inference = FnInference::new(|image: &image::RgbImage| {
        if image.width() == 20 {
            Err(InferenceError::Status { code: 503 })
        } else {
            Ok(vec![centered_detection()])
        }
    });
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(1));

    let (output, report) = processor.process_archive_bytes(&input).expect("batch");
    let entries = read_zip(&output);

    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["one_result.csv", "three_result.csv"]);
    assert_eq!(report.exported_count(), 2);
    assert_eq!(report.failed_count(), 1);
    assert!(report.stop_reason.is_none());
    match &report.outcomes[1] {
        EntryOutcome::Failed { entry, kind, message } => {
            assert_eq!(entry, "two.png");
            assert_eq!(*kind, FailureKind::Inference);
            assert!(message.contains("503"));
        }
        other => panic!("expected failure marker, got {other:?}"),
    }
}

#[test]
fn panicking_backend_fails_its_entry_without_stalling_the_batch() {
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        let names = ["a.png", "b.png", "c.png", "d.png", "e.png", "f.png"];
        let entries: Vec<(&str, Vec<u8>)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (*n, png_bytes(if i == 1 { 4 } else { 8 }, 8)))
            .collect();
        let input = zip_bytes(&entries);
        let inference = FnInference::new(|image: &image::RgbImage| {
            if image.width() == 4 {
                panic!("backend crashed");
            }
            Ok(vec![centered_detection()])
        });
        let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(3));
        let result = processor
            .process_archive_bytes(&input)
            .map(|(output, report)| (read_zip(&output), report))
            .map_err(|err| err.to_string());
        let _ = done_tx.send(result);
    });

    let (entries, report) = done_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("batch returned after a worker panic")
        .expect("batch");

    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "a_result.csv",
            "c_result.csv",
            "d_result.csv",
            "e_result.csv",
            "f_result.csv"
        ]
    );
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.not_processed(), 0);
    match &report.outcomes[1] {
        EntryOutcome::Failed { entry, kind, message } => {
            assert_eq!(entry, "b.png");
            assert_eq!(*kind, FailureKind::Inference);
            assert!(message.contains("backend crashed"));
        }
        other => panic!("expected failure marker, got {other:?}"),
    }
}

#[test]
fn undecodable_entry_is_a_decode_failure() {
    let input = zip_bytes(&[
        ("broken.jpg", b"definitely not a jpeg".to_vec()),
        ("ok.png", png_bytes(8, 8)),
    ]);
    let inference = one_detection_each();
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(1));

    let (output, report) = processor.process_archive_bytes(&input).expect("batch");

    assert_eq!(read_zip(&output).len(), 1);
    assert!(matches!(
        report.outcomes[0],
        EntryOutcome::Failed {
            kind: FailureKind::Decode,
            ..
        }
    ));
}

#[test]
fn output_order_mirrors_input_order_with_several_workers() {
    let names: Vec<String> = (0..16).map(|i| format!("img_{i:02}.png")).collect();
    let entries: Vec<(&str, Vec<u8>)> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), png_bytes(8 + i as u32, 8)))
        .collect();
    let input = zip_bytes(&entries);

    // Smaller images take longer, so results complete out of order.
    let inference = FnInference::new(|image: &image::RgbImage| {
        let delay = 30u64.saturating_sub(image.width() as u64);
        std::thread::sleep(std::time::Duration::from_millis(delay));
        Ok(vec![centered_detection()])
    });
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(4));

    let (output, report) = processor.process_archive_bytes(&input).expect("batch");
    let written: Vec<String> = read_zip(&output).into_iter().map(|(n, _)| n).collect();
    let expected: Vec<String> = (0..16).map(|i| format!("img_{i:02}_result.csv")).collect();

    assert_eq!(written, expected);
    let reported: Vec<&str> = report.outcomes.iter().map(|o| o.entry()).collect();
    assert_eq!(reported, names.iter().map(String::as_str).collect::<Vec<_>>());
}

#[test]
fn progress_is_reported_once_per_entry_in_order() {
    let input = zip_bytes(&[
        ("a.png", png_bytes(4, 4)),
        ("b.png", png_bytes(4, 4)),
        ("c.png", png_bytes(4, 4)),
    ]);
    let inference = one_detection_each();
    let seen = RefCell::new(Vec::new());
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(2))
        .on_progress(|p| seen.borrow_mut().push((p.completed, p.total, p.entry.to_string())));

    processor.process_archive_bytes(&input).expect("batch");

    assert_eq!(
        *seen.borrow(),
        vec![
            (1, 3, "a.png".to_string()),
            (2, 3, "b.png".to_string()),
            (3, 3, "c.png".to_string()),
        ]
    );
}

#[test]
fn cancelled_before_start_processes_nothing() {
    let input = zip_bytes(&[("a.png", png_bytes(4, 4)), ("b.png", png_bytes(4, 4))]);
    let inference = one_detection_each();
    let cancel = CancelToken::new();
    cancel.cancel();
    let processor =
        BatchProcessor::new(&inference, &ImageCrateDecoder, options(1)).with_cancel_token(cancel);

    let (output, report) = processor.process_archive_bytes(&input).expect("batch");

    assert!(read_zip(&output).is_empty());
    assert_eq!(report.not_processed(), 2);
    assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
}

#[test]
fn cancellation_stops_before_remaining_entries() {
    let names: Vec<String> = (0..12).map(|i| format!("{i}.png")).collect();
    let entries: Vec<(&str, Vec<u8>)> = names
        .iter()
        .map(|n| (n.as_str(), png_bytes(4, 4)))
        .collect();
    let input = zip_bytes(&entries);

    let inference = one_detection_each();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(1))
        .with_cancel_token(cancel)
        .on_progress(move |_| trigger.cancel());

    let (output, report) = processor.process_archive_bytes(&input).expect("batch");

    let written = read_zip(&output);
    assert!(!written.is_empty());
    assert!(written.len() < 12);
    assert_eq!(written.len(), report.outcomes.len());
    assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
}

#[test]
fn fail_fast_stops_feeding_but_keeps_completed_entries() {
    let names: Vec<String> = (0..12).map(|i| format!("{i}.png")).collect();
    let mut entries: Vec<(&str, Vec<u8>)> = names
        .iter()
        .map(|n| (n.as_str(), png_bytes(4, 4)))
        .collect();
    entries[1].1 = png_bytes(5, 5);
    let input = zip_bytes(&entries);

    let inference = FnInference::new(|image: &image::RgbImage| {
        if image.width() == 5 {
            Err(InferenceError::Timeout)
        } else {
            Ok(vec![centered_detection()])
        }
    });
    let processor = BatchProcessor::new(
        &inference,
        &ImageCrateDecoder,
        BatchOptions {
            fail_fast: true,
            ..options(1)
        },
    );

    let (output, report) = processor.process_archive_bytes(&input).expect("batch");

    assert_eq!(
        report.stop_reason,
        Some(StopReason::FailFast {
            entry: "1.png".to_string()
        })
    );
    assert!(report.outcomes.len() < 12);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(read_zip(&output).len(), report.exported_count());
    assert_eq!(read_zip(&output)[0].0, "0_result.csv");
}

#[test]
fn colliding_output_names_are_reported_not_overwritten() {
    let input = zip_bytes(&[("cat.jpg", png_bytes(4, 4)), ("cat.png", png_bytes(4, 4))]);
    let inference = one_detection_each();
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(1));

    let (output, report) = processor.process_archive_bytes(&input).expect("batch");

    assert_eq!(read_zip(&output).len(), 1);
    assert!(matches!(
        report.outcomes[1],
        EntryOutcome::Failed {
            kind: FailureKind::DuplicateOutput,
            ..
        }
    ));
}

#[test]
fn custom_suffix_and_extension_are_used() {
    let input = zip_bytes(&[("a.jpg", png_bytes(4, 4))]);
    let inference = one_detection_each();
    let processor = BatchProcessor::new(
        &inference,
        &ImageCrateDecoder,
        BatchOptions {
            result_suffix: "_det".to_string(),
            export_extension: "txt".to_string(),
            ..BatchOptions::default()
        },
    );

    let (output, _) = processor.process_archive_bytes(&input).expect("batch");
    assert_eq!(read_zip(&output)[0].0, "a_det.txt");
}

#[test]
fn not_a_zip_is_an_archive_error() {
    let inference = one_detection_each();
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(1));
    let err = processor.process_archive_bytes(b"plain bytes").unwrap_err();
    assert!(matches!(err, DetbatchError::ArchiveRead { .. }));
}

#[test]
fn unreadable_input_leaves_no_output_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input_path = dir.path().join("in.zip");
    let output_path = dir.path().join("out.zip");
    std::fs::write(&input_path, b"plain bytes").expect("write input");

    let inference = one_detection_each();
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(1));
    let err = processor
        .process_archive_file(&input_path, &output_path)
        .unwrap_err();

    assert!(matches!(err, DetbatchError::ArchiveRead { .. }));
    assert!(!output_path.exists());
}

#[test]
fn archive_files_on_disk_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input_path = dir.path().join("in.zip");
    let output_path = dir.path().join("out.zip");
    std::fs::write(&input_path, zip_bytes(&[("a.png", png_bytes(4, 4))])).expect("write input");

    let inference = one_detection_each();
    let processor = BatchProcessor::new(&inference, &ImageCrateDecoder, options(1));
    let report = processor
        .process_archive_file(&input_path, &output_path)
        .expect("batch");

    assert!(report.is_complete());
    let written = read_zip(&std::fs::read(&output_path).expect("read output"));
    assert_eq!(written[0].0, "a_result.csv");
}
