use approx::assert_relative_eq;
use stereo_calib_core::{BoardGeometry, CorpusSet, DistortionModel, RadialTerms};
use stereo_calib_optim::synthetic::SyntheticRig;
use stereo_calib_optim::{
    CalibrationEngine, CalibrationError, CalibrationOptions, CalibrationResult,
    ResultStoreError, SkipPrecalibration, SoloPrecalibration,
};

fn calibrate(rig: &SyntheticRig, corpus: &CorpusSet, iterations: usize) -> CalibrationResult {
    CalibrationEngine::default()
        .calibrate(
            corpus,
            &rig.geometry,
            &rig.model,
            iterations,
            &SkipPrecalibration,
            None,
        )
        .expect("calibration")
}

#[test]
fn six_observations_calibrate_within_the_iteration_cap() {
    let rig = SyntheticRig::with_views(DistortionModel::default(), 6);
    let corpus = rig.corpus();
    assert_eq!(corpus.len(), 6);

    let result = calibrate(&rig, &corpus, 30);
    assert!(result.iteration_count <= 30);
    assert!(result.reprojection_error >= 0.0);
    assert!(
        result.reprojection_error < 0.05,
        "rms {}",
        result.reprojection_error
    );
    assert_eq!(result.left.distortion.len(), 5);
    assert_eq!(result.right.distortion.len(), 5);
    assert_eq!(result.image_size, Some([640, 480]));

    assert_relative_eq!(result.left.intrinsics.fx, 800.0, max_relative = 0.01);
    assert_relative_eq!(result.right.intrinsics.fy, 790.0, max_relative = 0.01);
    assert_relative_eq!(result.baseline(), 0.1, max_relative = 0.01);
    assert_relative_eq!(result.translation.x, -0.1, epsilon = 2e-3);
    result.validate().expect("valid result");
}

#[test]
fn iteration_cap_is_a_hard_bound() {
    let rig = SyntheticRig::new(DistortionModel::default()).with_noise(0.2);
    let corpus = rig.corpus();
    for cap in [0, 1, 3] {
        let result = calibrate(&rig, &corpus, cap);
        assert!(result.iteration_count <= cap);
        assert!(result.reprojection_error.is_finite());
    }
}

#[test]
fn empty_corpus_is_insufficient_data() {
    let rig = SyntheticRig::new(DistortionModel::default());
    let empty = CorpusSet::new(rig.geometry);
    let err = CalibrationEngine::default()
        .calibrate(&empty, &rig.geometry, &rig.model, 30, &SkipPrecalibration, None)
        .unwrap_err();
    assert_eq!(
        err,
        CalibrationError::InsufficientData {
            available: 0,
            required: 4
        }
    );
}

#[test]
fn minimum_observation_count_is_configurable() {
    let rig = SyntheticRig::with_views(DistortionModel::default(), 3);
    let corpus = rig.corpus();
    let engine = CalibrationEngine::new(CalibrationOptions {
        min_observations: 3,
    });
    let result = engine
        .calibrate(&corpus, &rig.geometry, &rig.model, 30, &SkipPrecalibration, None)
        .expect("three views are enough when allowed");
    assert!(result.reprojection_error < 0.5);

    let err = CalibrationEngine::default()
        .calibrate(&corpus, &rig.geometry, &rig.model, 30, &SkipPrecalibration, None)
        .unwrap_err();
    assert!(matches!(err, CalibrationError::InsufficientData { available: 3, .. }));
}

#[test]
fn board_mismatch_is_reported_with_the_frame() {
    let rig = SyntheticRig::new(DistortionModel::default());
    let corpus = rig.corpus();
    let other = BoardGeometry::new(8, 6, 0.03).expect("board");
    let err = CalibrationEngine::default()
        .calibrate(&corpus, &other, &rig.model, 30, &SkipPrecalibration, None)
        .unwrap_err();
    assert_eq!(
        err,
        CalibrationError::ObservationShape {
            frame_index: 0,
            expected: 48
        }
    );
}

#[test]
fn identical_inputs_give_identical_results() {
    let rig = SyntheticRig::new(DistortionModel::default()).with_noise(0.3);
    let corpus = rig.corpus();
    let a = calibrate(&rig, &corpus, 20);
    let b = calibrate(&rig, &corpus, 20);
    assert_eq!(a.iteration_count, b.iteration_count);
    assert_eq!(a.distortion_model, b.distortion_model);
    assert_relative_eq!(a.reprojection_error, b.reprojection_error, max_relative = 1e-9);
    assert_relative_eq!(a.rotation, b.rotation, epsilon = 1e-9);
    assert_relative_eq!(a.translation, b.translation, epsilon = 1e-9);
    assert_relative_eq!(
        a.left.intrinsics.k_matrix(),
        b.left.intrinsics.k_matrix(),
        max_relative = 1e-9
    );
    for (x, y) in a.right.distortion.iter().zip(&b.right.distortion) {
        assert_relative_eq!(x, y, epsilon = 1e-9);
    }
}

#[test]
fn coefficient_vectors_follow_the_selected_model() {
    let models = [
        DistortionModel::Standard {
            radial: RadialTerms::Four,
            tangential: false,
        },
        DistortionModel::Standard {
            radial: RadialTerms::Five,
            tangential: true,
        },
        DistortionModel::Extended { tangential: false },
        DistortionModel::Extended { tangential: true },
        DistortionModel::Fisheye,
    ];
    for model in models {
        let rig = SyntheticRig::new(model);
        let corpus = rig.corpus();
        let result = calibrate(&rig, &corpus, 30);
        assert_eq!(result.distortion_model, model);
        assert_eq!(result.left.distortion.len(), model.coefficient_count());
        assert_eq!(result.right.distortion.len(), model.coefficient_count());
        assert!(
            result.reprojection_error < 1.0,
            "{model}: rms {}",
            result.reprojection_error
        );
    }
}

#[test]
fn solo_precalibration_seeds_the_stereo_solve() {
    let rig = SyntheticRig::new(DistortionModel::default()).with_noise(0.1);
    let corpus = rig.corpus();
    let result = CalibrationEngine::default()
        .calibrate(
            &corpus,
            &rig.geometry,
            &rig.model,
            30,
            &SoloPrecalibration::default(),
            None,
        )
        .expect("calibration");
    assert!(result.reprojection_error < 0.2);
    assert_relative_eq!(result.left.intrinsics.fx, 800.0, max_relative = 0.02);
}

#[test]
fn a_previous_result_seeds_a_new_run() {
    let rig = SyntheticRig::new(DistortionModel::default());
    let corpus = rig.corpus();
    let first = calibrate(&rig, &corpus, 30);

    let seeded = CalibrationEngine::default()
        .calibrate(
            &corpus,
            &rig.geometry,
            &rig.model,
            5,
            &SkipPrecalibration,
            Some(&first),
        )
        .expect("seeded calibration");
    assert!(seeded.iteration_count <= 5);
    assert!(seeded.reprojection_error < 0.1, "rms {}", seeded.reprojection_error);
}

#[test]
fn seed_from_another_model_is_refused() {
    let rig = SyntheticRig::new(DistortionModel::default());
    let corpus = rig.corpus();
    let first = calibrate(&rig, &corpus, 30);
    let err = CalibrationEngine::default()
        .calibrate(
            &corpus,
            &rig.geometry,
            &DistortionModel::Fisheye,
            30,
            &SkipPrecalibration,
            Some(&first),
        )
        .unwrap_err();
    assert!(matches!(err, CalibrationError::SeedMismatch { .. }));
}

#[test]
fn stored_extended_result_cannot_seed_a_fisheye_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("calib.json");
    let model = DistortionModel::Extended { tangential: false };
    let rig = SyntheticRig::new(model);
    let result = calibrate(&rig, &rig.corpus(), 30);
    result.write_json(&path).expect("write");

    let err = CalibrationResult::load_seed(&path, &DistortionModel::Fisheye).unwrap_err();
    match err {
        ResultStoreError::ModelMismatch { stored, requested } => {
            assert_eq!(stored, model);
            assert_eq!(requested, DistortionModel::Fisheye);
        }
        other => panic!("unexpected error {other}"),
    }
    let seed = CalibrationResult::load_seed(&path, &model).expect("same model");
    assert_eq!(seed.left.distortion.len(), 8);
}
