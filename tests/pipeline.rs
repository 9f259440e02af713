mod common;

use std::fs;

use common::{
    blank_image, hand_image, png_bytes, train_config, write_corpus, RedHand, TempDir,
};
use rayon::prelude::*;
use signage::{
    artifacts::{ArtifactPair, VOCABULARY_FILE},
    classifier::train::Trainer,
    dataset::{Dataset, DatasetBuilder, MissReason},
    error::{ArtifactLoadError, PredictError},
    extract::Extractor,
    image::{Color, Image},
    landmark::FEATURE_LEN,
    service::{InferenceService, Prediction, Response},
};

fn trained_artifacts(dir: &TempDir) -> ArtifactPair {
    let corpus = dir.path().join("corpus");
    write_corpus(&corpus, 10, 1);

    let dataset = DatasetBuilder::new(RedHand::default())
        .build(&corpus)
        .unwrap();
    let outcome = Trainer::new(train_config())
        .fit(dataset.examples())
        .unwrap();
    ArtifactPair::from(outcome)
}

fn label_of(prediction: Prediction) -> String {
    match prediction {
        Prediction::Label { label, .. } => label,
        Prediction::NoHand => panic!("expected a label, got no hand"),
    }
}

#[test]
fn corpus_to_prediction() {
    let dir = TempDir::new("end-to-end");
    let corpus = dir.path().join("corpus");
    write_corpus(&corpus, 10, 1);

    let mut builder = DatasetBuilder::new(RedHand::default());
    let dataset = builder.build(&corpus).unwrap();
    assert_eq!(builder.into_detector().calls, 20);
    assert_eq!(dataset.len(), 20);
    assert!(dataset.misses().is_empty());
    assert_eq!(
        dataset.label_counts().into_iter().collect::<Vec<_>>(),
        [("A", 10), ("B", 10)]
    );

    let csv = dir.path().join("landmarks_dataset.csv");
    dataset.write_csv(&csv).unwrap();
    let header = fs::read_to_string(&csv).unwrap();
    let header = header.lines().next().unwrap();
    assert!(header.starts_with("0,1,2,"));
    assert!(header.ends_with(",62,label"));

    let reread = Dataset::read_csv(&csv).unwrap();
    assert_eq!(reread.examples(), dataset.examples());

    let outcome = Trainer::new(train_config())
        .fit(reread.examples())
        .unwrap();
    assert_eq!(outcome.report.test_rows, 4);
    assert_eq!(outcome.vocabulary.labels(), ["A", "B"]);
    assert_eq!(outcome.vocabulary.encode("A"), Some(0));
    assert_eq!(outcome.vocabulary.encode("B"), Some(1));
    assert_eq!(outcome.classifier.input_width(), FEATURE_LEN);
    assert_eq!(outcome.classifier.output_width(), 2);
    let test = outcome.report.test.unwrap();
    assert!(test.loss.is_finite());
    assert!((0.0..=1.0).contains(&test.accuracy));

    let model = dir.path().join("model");
    ArtifactPair::from(outcome).save(&model).unwrap();

    let service = InferenceService::load(&model, [RedHand::default()]).unwrap();
    assert_eq!(service.detector_count(), 1);

    // Images that were not part of the corpus.
    let a = service.predict(&png_bytes(&hand_image("A", (4, 3)))).unwrap();
    let b = service.predict(&png_bytes(&hand_image("B", (2, 7)))).unwrap();
    assert_eq!(label_of(a), "A");
    assert_eq!(label_of(b), "B");
}

#[test]
fn predictions_are_deterministic() {
    let dir = TempDir::new("deterministic");
    let service = InferenceService::new(trained_artifacts(&dir), [RedHand::default()]);

    let bytes = png_bytes(&hand_image("A", (5, 5)));
    let first = service.predict(&bytes).unwrap();
    let second = service.predict(&bytes).unwrap();
    assert_eq!(first, second);

    let Prediction::Label { confidence, .. } = first else {
        panic!("expected a label");
    };
    assert!(confidence > 0.5 && confidence <= 1.0);
}

#[test]
fn missing_hands_and_garbage_input() {
    let dir = TempDir::new("no-hand");
    let service = InferenceService::new(trained_artifacts(&dir), [RedHand::default()]);

    let tiny = Image::from_fn(1, 1, |_, _| Color::WHITE);
    let result = service.predict(&png_bytes(&tiny));
    assert_eq!(result.as_ref().unwrap(), &Prediction::NoHand);
    assert_eq!(
        Response::from(&result),
        Response::NoHand {
            error: "No hand detected",
            no_hand: true
        }
    );

    let result = service.predict(b"definitely not an image");
    assert!(matches!(result, Err(PredictError::Decode(_))));
    assert!(matches!(Response::from(&result), Response::Error { .. }));

    assert!(matches!(service.predict(&[]), Err(PredictError::Decode(_))));

    // The service is still usable after failed requests.
    let ok = service.predict(&png_bytes(&hand_image("B", (0, 0)))).unwrap();
    assert_eq!(label_of(ok), "B");
}

#[test]
fn misses_are_recorded() {
    let dir = TempDir::new("misses");
    let corpus = dir.path().join("corpus");
    write_corpus(&corpus, 3, 2);
    blank_image().save(corpus.join("A").join("blank.png")).unwrap();
    fs::write(corpus.join("B").join("broken.jpg"), b"not a jpeg").unwrap();
    fs::write(corpus.join("B").join("notes.txt"), b"ignored").unwrap();
    fs::create_dir_all(corpus.join(".hidden")).unwrap();
    hand_image("A", (0, 0))
        .save(corpus.join(".hidden").join("a.png"))
        .unwrap();
    hand_image("A", (0, 0)).save(corpus.join("root.png")).unwrap();

    let dataset = DatasetBuilder::new(RedHand::default())
        .build(&corpus)
        .unwrap();
    assert_eq!(dataset.len(), 6);

    let reasons = dataset
        .misses()
        .iter()
        .map(|miss| (miss.path.file_name().unwrap().to_str().unwrap(), miss.reason))
        .collect::<Vec<_>>();
    assert_eq!(
        reasons,
        [
            ("blank.png", MissReason::NoHand),
            ("broken.jpg", MissReason::Undecodable)
        ]
    );

    let misses = dir.path().join("no_hand_detected.txt");
    dataset.write_misses(&misses).unwrap();
    let text = fs::read_to_string(&misses).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("blank.png\tno-hand"));
    assert!(lines[1].ends_with("broken.jpg\tundecodable"));
}

#[cfg(target_os = "linux")]
#[test]
fn unreadable_and_unlabeled_files_are_recorded() {
    use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

    let dir = TempDir::new("unreadable");
    let corpus = dir.path().join("corpus");
    write_corpus(&corpus, 2, 3);
    std::os::unix::fs::symlink(
        dir.path().join("does-not-exist.png"),
        corpus.join("A").join("dangling.png"),
    )
    .unwrap();

    // Two directories whose names only differ in bytes that are not valid UTF-8.
    for name in [&b"C\xff"[..], &b"C\xfe"[..]] {
        let label_dir = corpus.join(OsStr::from_bytes(name));
        fs::create_dir_all(&label_dir).unwrap();
        hand_image("A", (0, 0)).save(label_dir.join("c.png")).unwrap();
    }

    let mut builder = DatasetBuilder::new(RedHand::default());
    let dataset = builder.build(&corpus).unwrap();
    assert_eq!(builder.into_detector().calls, 4);
    assert_eq!(dataset.len(), 4);
    assert_eq!(
        dataset.label_counts().into_iter().collect::<Vec<_>>(),
        [("A", 2), ("B", 2)]
    );

    let reasons = dataset
        .misses()
        .iter()
        .map(|miss| miss.reason)
        .collect::<Vec<_>>();
    assert_eq!(
        reasons,
        [
            MissReason::Unreadable,
            MissReason::InvalidLabel,
            MissReason::InvalidLabel
        ]
    );
    assert!(dataset.misses()[0].path.ends_with("A/dangling.png"));

    let misses = dir.path().join("no_hand_detected.txt");
    dataset.write_misses(&misses).unwrap();
    let text = fs::read_to_string(&misses).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("dangling.png\tunreadable"));
    assert!(lines[1].ends_with("c.png\tinvalid-label"));
    assert!(lines[2].ends_with("c.png\tinvalid-label"));
}

#[test]
fn extraction_is_repeatable() {
    let image = hand_image("B", (3, 1));
    let mut extractor = Extractor::new(RedHand::default());

    let first = extractor.extract(&image).unwrap().unwrap();
    let second = extractor.extract(&image).unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.as_slice().len(), FEATURE_LEN);
    for landmark in (0..21).map(|i| first.landmark(i)) {
        assert!((0.0..=1.0).contains(&landmark.x()));
        assert!((0.0..=1.0).contains(&landmark.y()));
    }

    // Decoding the encoded image gives the same features as the in-memory image.
    let decoded = Image::decode(&png_bytes(&image)).unwrap();
    assert_eq!(extractor.extract(&decoded).unwrap().unwrap(), first);

    assert_eq!(extractor.extract(&blank_image()).unwrap(), None);
}

#[test]
fn rejects_vocabulary_of_other_run() {
    let dir = TempDir::new("mismatch");
    let (a, b) = (dir.path().join("a"), dir.path().join("b"));
    let artifacts = trained_artifacts(&dir);
    artifacts.save(&a).unwrap();

    let other = ArtifactPair::new(
        artifacts.classifier().clone(),
        artifacts.vocabulary().clone(),
    );
    other.save(&b).unwrap();
    fs::copy(b.join(VOCABULARY_FILE), a.join(VOCABULARY_FILE)).unwrap();

    let result = InferenceService::load(&a, [RedHand::default()]);
    assert!(matches!(
        result.err(),
        Some(ArtifactLoadError::RunMismatch { .. })
    ));
}

#[test]
fn concurrent_requests() {
    let dir = TempDir::new("concurrent");
    let service = InferenceService::new(trained_artifacts(&dir), vec![RedHand::default(); 3]);
    assert_eq!(service.detector_count(), 3);

    let requests = (0..24u32)
        .map(|i| {
            let label = if i % 2 == 0 { "A" } else { "B" };
            let bytes = png_bytes(&hand_image(label, (i % 10, (i * 3) % 10)));
            (label, bytes)
        })
        .collect::<Vec<_>>();

    let labels = requests
        .par_iter()
        .map(|(_, bytes)| label_of(service.predict(bytes).unwrap()))
        .collect::<Vec<_>>();

    for ((expected, _), label) in requests.iter().zip(&labels) {
        assert_eq!(label, expected);
    }
}
