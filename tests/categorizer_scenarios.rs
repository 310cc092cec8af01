use std::collections::HashMap;

use doccat::categorization::{
    Categorizer, CategorizerConfig, CategorizerState, InMemoryFeatures, Method,
};
use doccat::error::{DocCatError, Result};
use doccat::matrix::SampleMatrix;
use doccat::partition::{unzip_relevant, zip_relevant};
use tempfile::TempDir;

/// Two topics over a six-term vocabulary, L2-normalized.
fn corpus() -> Result<InMemoryFeatures> {
    let raw = [
        [3.0, 2.0, 1.0, 0.0, 0.0, 0.0],
        [2.0, 3.0, 0.0, 0.0, 1.0, 0.0],
        [1.0, 2.0, 2.0, 0.0, 0.0, 0.0],
        [2.0, 1.0, 3.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 3.0, 2.0, 1.0],
        [0.0, 1.0, 0.0, 2.0, 3.0, 2.0],
        [0.0, 0.0, 0.0, 1.0, 2.0, 3.0],
        [1.0, 0.0, 0.0, 3.0, 1.0, 2.0],
        [2.0, 2.0, 2.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 2.0, 2.0, 2.0],
    ];
    let mut triplets = Vec::new();
    for (i, row) in raw.iter().enumerate() {
        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        for (j, &v) in row.iter().enumerate() {
            if v != 0.0 {
                triplets.push((i, j, v / norm));
            }
        }
    }
    let matrix = SampleMatrix::from_triplets((raw.len(), 6), &triplets)?;
    let vocabulary: HashMap<String, usize> = ["merger", "contract", "invoice", "lunch", "party", "weekend"]
        .iter()
        .enumerate()
        .map(|(i, t)| (t.to_string(), i))
        .collect();
    Ok(InMemoryFeatures::new("emails", matrix).with_vocabulary(vocabulary))
}

fn config(dir: &TempDir) -> CategorizerConfig {
    CategorizerConfig {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    }
}

/// Documents 0-3 are relevant, 4-7 are not; 8 and 9 are unlabelled.
fn training_set() -> (Vec<usize>, Vec<u8>) {
    zip_relevant(&[0, 1, 2, 3], &[4, 5, 6, 7])
}

#[test]
fn every_backend_separates_the_unlabelled_documents() -> Result<()> {
    let dir = TempDir::new()?;
    let (index, y) = training_set();

    let mut methods = vec!["LinearSVC", "LogisticRegression", "NearestNeighbor"];
    if cfg!(feature = "gradient-boosting") {
        methods.push("xgboost");
    }
    for method in methods {
        let mut categorizer = Categorizer::new(config(&dir), corpus()?)?;
        let summary = categorizer.train(&index, &y, method, None)?;
        assert_eq!(summary.n_positive, 4);
        assert_eq!(summary.n_negative, 4);

        let prediction = categorizer.predict(None)?;
        assert_eq!(prediction.scores.len(), 10);
        assert!(
            prediction.scores[8] > prediction.scores[9],
            "{method}: {:?}",
            prediction.scores
        );
    }
    Ok(())
}

#[test]
fn nearest_neighbor_prediction_carries_diagnostics() -> Result<()> {
    let dir = TempDir::new()?;
    let (index, y) = training_set();
    let mut categorizer = Categorizer::new(config(&dir), corpus()?)?;
    categorizer.train(&index, &y, "NearestNeighbor", None)?;

    let prediction = categorizer.predict(Some(3))?;
    let neighbors = prediction.neighbors.expect("neighbor diagnostics");
    assert_eq!(neighbors.len(), 10);
    // Training documents map back to dataset ids.
    assert_eq!(neighbors[5].nearest_negative_id, Some(5));
    assert_eq!(neighbors[2].winning_global_index, 2);
    assert!(neighbors[8].score > 0.0);
    assert!(neighbors[9].score < 0.0);

    let (relevant, non_relevant) = unzip_relevant(&(0..10).collect::<Vec<_>>(), &prediction.scores)?;
    assert!(relevant.contains(&8));
    assert!(non_relevant.contains(&9));
    Ok(())
}

#[test]
fn trained_model_reloads_with_identical_predictions() -> Result<()> {
    let dir = TempDir::new()?;
    let (index, y) = training_set();

    let mut categorizer = Categorizer::new(config(&dir), corpus()?)?;
    let summary = categorizer.train(&index, &y, "LogisticRegression", None)?;
    let before = categorizer.predict(None)?;

    let mut reloaded = Categorizer::load(config(&dir), corpus()?, &summary.mid)?;
    assert_eq!(reloaded.state(), CategorizerState::Trained);
    assert_eq!(reloaded.mid(), Some(summary.mid.as_str()));
    assert_eq!(reloaded.predict(None)?, before);

    let pars = reloaded.load_pars(&summary.mid)?;
    assert_eq!(pars.method, Method::LogisticRegression);
    assert_eq!(pars.index, index);
    assert_eq!(pars.y, y);
    assert_eq!(pars.options["C"], 1.0);
    Ok(())
}

#[test]
fn models_are_listed_and_deleted() -> Result<()> {
    let dir = TempDir::new()?;
    let (index, y) = training_set();
    let mut categorizer = Categorizer::new(config(&dir), corpus()?)?;

    let first = categorizer.train(&index, &y, "NearestCentroid", None)?.mid;
    let second = categorizer.train(&index, &y, "NearestNeighbor", None)?.mid;
    let mut expected = vec![first.clone(), second.clone()];
    expected.sort();
    assert_eq!(categorizer.list_models()?, expected);

    categorizer.delete()?;
    assert_eq!(categorizer.list_models()?, vec![first.clone()]);
    assert!(matches!(
        Categorizer::load(config(&dir), corpus()?, &second),
        Err(DocCatError::ModelNotFound(_))
    ));
    assert!(Categorizer::load(config(&dir), corpus()?, &first).is_ok());
    Ok(())
}

#[test]
fn invalid_training_requests_are_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let (index, y) = training_set();
    let mut categorizer = Categorizer::new(config(&dir), corpus()?)?;

    assert!(matches!(
        categorizer.train(&index, &y, "MLPClassifier", None),
        Err(DocCatError::UnsupportedMethod(_))
    ));
    assert!(matches!(
        categorizer.train(&index, &y, "ensemble-stacking", None),
        Err(DocCatError::UnsupportedMethod(_))
    ));
    assert!(matches!(
        categorizer.train(&index, &y, "SVC", None),
        Err(DocCatError::UnsupportedMethod(_))
    ));
    assert!(matches!(
        categorizer.train(&index, &y, "LinearSVC", Some("thorough")),
        Err(DocCatError::InvalidParameter(_))
    ));
    assert!(matches!(
        categorizer.train(&index, &y, "NearestNeighbor", Some("fast")),
        Err(DocCatError::InvalidParameter(_))
    ));
    assert!(matches!(
        categorizer.train(&index, &y, "LinearSVC", Some("full")),
        Err(DocCatError::MissingOptionalDependency(_))
    ));
    assert!(matches!(
        categorizer.train(&index, &y[..3], "LinearSVC", None),
        Err(DocCatError::ShapeMismatch(_))
    ));
    assert!(matches!(
        categorizer.train(&[0, 42], &[1, 0], "LinearSVC", None),
        Err(DocCatError::InvalidParameter(_))
    ));
    assert!(matches!(
        categorizer.train(&[4, 5], &[0, 0], "NearestNeighbor", None),
        Err(DocCatError::InvalidTrainingSet(_))
    ));

    // Nothing was stored by the failed attempts.
    assert_eq!(categorizer.state(), CategorizerState::Untrained);
    assert!(categorizer.list_models()?.is_empty());
    assert!(matches!(
        categorizer.predict(None),
        Err(DocCatError::NotTrained(_))
    ));
    Ok(())
}

#[test]
fn logistic_model_explains_its_terms() -> Result<()> {
    let dir = TempDir::new()?;
    let (index, y) = training_set();
    let mut categorizer = Categorizer::new(config(&dir), corpus()?)?;
    categorizer.train(&index, &y, "LogisticRegression", None)?;

    let weights = categorizer.explain(8)?;
    assert_eq!(weights.len(), 3);
    assert!(weights["merger"] > 0.0);

    categorizer.train(&index, &y, "NearestNeighbor", None)?;
    assert!(matches!(
        categorizer.explain(8),
        Err(DocCatError::NotImplemented(_))
    ));
    Ok(())
}

#[test]
fn dataset_ids_cannot_escape_the_cache_dir() -> Result<()> {
    let dir = TempDir::new()?;
    let matrix = SampleMatrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]])?;
    assert!(matches!(
        Categorizer::new(config(&dir), InMemoryFeatures::new("../elsewhere", matrix)),
        Err(DocCatError::InvalidParameter(_))
    ));
    Ok(())
}
