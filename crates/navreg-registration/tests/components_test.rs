use navreg_core::spatial::FVector;
use navreg_core::{DisplacementFieldTransform, GridSize, VectorField};
use navreg_registration::{
    ModelKind, MultiResolutionRegistration, NavierConfig, RegistrationConfig, RegistrationModel,
    RelaxationMode, TimeStepConfig, TimeStepController, TimeStepKind, VectorFieldRegularizer,
};
use proptest::prelude::*;

#[test]
fn test_config_json_round_trip() {
    let config = RegistrationConfig::default()
        .with_levels(4)
        .with_model(
            ModelKind::Elastic,
            NavierConfig::default()
                .with_lame(1.0, 2.0)
                .with_mode(RelaxationMode::GaussSouthwell),
        )
        .with_time_step(TimeStepConfig::new(TimeStepKind::Direct).with_bounds(0.2, 1.0));

    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"gauss-southwell\""));
    assert!(json.contains("\"elastic\""));
    let parsed: RegistrationConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_partial_json_uses_defaults() {
    let parsed: RegistrationConfig = serde_json::from_str(
        r#"{"levels": 2, "navier": {"lambda": 3.0}, "time_step": {"kind": "direct"}}"#,
    )
    .unwrap();
    assert_eq!(parsed.levels, 2);
    assert_eq!(parsed.navier.lambda, 3.0);
    assert_eq!(parsed.navier.mu, NavierConfig::default().mu);
    assert_eq!(parsed.time_step.kind, TimeStepKind::Direct);
    assert_eq!(parsed.start_size, RegistrationConfig::default().start_size);
    assert!(MultiResolutionRegistration::<2>::from_config(parsed).is_ok());
}

#[test]
fn test_invalid_parameters_fail_before_any_work() {
    let bad = RegistrationConfig::default()
        .with_model(ModelKind::Fluid, NavierConfig::default().with_epsilon(-1.0));
    assert!(MultiResolutionRegistration::<2>::from_config(bad).unwrap_err().is_configuration());
    assert!(TimeStepController::fluid(1.0, 0.5).is_err());
    assert!(RegistrationModel::<3>::from_descriptor("navier:maxiter=0").is_err());
    assert!(VectorFieldRegularizer::<2>::from_descriptor("laplace:mu=0").is_err());
    let config = RegistrationConfig::default();
    assert!(MultiResolutionRegistration::<2>::from_descriptors("navier", "euler", config).is_err());
}

#[test]
fn test_zero_force_fixed_point_3d() {
    let size = GridSize::new([6, 5, 4]);
    for text in ["navier:mu=1,lambda=2", "naviera:mu=2,lambda=0.5,kind=elastic"] {
        let model = RegistrationModel::<3>::from_descriptor(text).unwrap();
        let v = model.solve_fresh(&VectorField::new(size)).unwrap();
        assert_eq!(v.max_norm(), 0.0);
    }
}

#[test]
fn test_direct_controller_never_regrids() {
    let size = GridSize::new([7, 7]);
    let folded = DisplacementFieldTransform::from_field(VectorField::from_fn(size, |[x, _]| {
        FVector::<2>::new(-0.9 * x as f32, 0.0)
    }));
    let velocity = VectorField::from_fn(size, |[x, _]| FVector::<2>::new(-(x as f32), 0.0));
    for (min, max) in [(0.1, 2.0), (0.5, 0.5), (0.01, 10.0)] {
        let ts = TimeStepController::direct(min, max).unwrap();
        assert!(!ts.has_regrid());
        assert!(!ts.regrid_requested(&folded, &velocity, 5.0));
    }
}

proptest! {
    #[test]
    fn test_regrid_follows_jacobian_threshold(scale in 0.05f32..3.0, delta in 0.01f32..2.0) {
        // det(I + delta J_v) = 1 - delta * scale for v = (-scale x, 0).
        let det = 1.0 - delta * scale;
        prop_assume!((det - 0.5).abs() > 1e-3);

        let size = GridSize::new([8, 8]);
        let identity = DisplacementFieldTransform::identity(size);
        let velocity =
            VectorField::from_fn(size, |[x, _]| FVector::<2>::new(-scale * x as f32, 0.0));
        let ts = TimeStepController::fluid(0.1, 2.0).unwrap();
        prop_assert_eq!(ts.regrid_requested(&identity, &velocity, delta), det < 0.5);
    }
}
