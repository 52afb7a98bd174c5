//! End-to-end solves of a bar stretched along x, periodic in y.
//!
//! With displacement `0.1` on `xhi` and zero on `xlo` the exact solution is
//! `u = (0.1 x, 0)`, which every stencil reproduces exactly, so the computed
//! field can be compared node by node on every level.

use amrel_model::{LinearIsotropic, Model};
use amrel_solver::{
    AmrHierarchy, BcConfig, ElasticBc, ElasticOperator, FabArray, Geometry, Multigrid, MultigridConfig, MultiFab,
    NewtonConfig, Newton, NodalOperator, NodeBox, OperatorInfo, load_json, save_json,
};

const SLOPE: f64 = 0.1;

fn bar_bc() -> BcConfig {
    serde_json::from_str(
        r#"{"type": {"xlo": ["disp", "disp"], "xhi": ["disp", "disp"]},
            "val": {"xhi": [0.1, 0.0]}}"#,
    )
    .expect("bc config should parse")
}

/// 16×16 base level, optionally refined over the middle half.
fn bar_operator(refined: bool) -> ElasticOperator<2> {
    let geom = Geometry::new([16, 16], [0.0; 2], [1.0; 2], [false, true]).expect("geometry");
    let mut amr = AmrHierarchy::new(geom.clone(), 8).expect("hierarchy");
    if refined {
        amr.refine(NodeBox::new([8, 8], [24, 24])).expect("refine");
    }
    let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).expect("operator");
    let bc = ElasticBc::from_config(&bar_bc(), geom.periodic()).expect("bc");
    op.set_bc(bc).expect("set_bc");
    op
}

fn fields(op: &ElasticOperator<2>) -> (Vec<MultiFab<2>>, Vec<MultiFab<2>>) {
    let mut sol = Vec::new();
    let mut rhs = Vec::new();
    for l in 0..op.num_amr_levels() {
        let level = op.level(l, 0);
        sol.push(MultiFab::new(&level.ba, &level.dm, 2, 1, 0.0));
        let mut b = MultiFab::new(&level.ba, &level.dm, 2, 1, 0.0);
        op.init_rhs(l, &mut b).expect("init_rhs");
        rhs.push(b);
    }
    (sol, rhs)
}

fn assert_linear(op: &ElasticOperator<2>, sol: &[MultiFab<2>], tol: f64) {
    for (l, s) in sol.iter().enumerate() {
        let level = op.level(l, 0);
        for box_ in level.ba.boxes() {
            for p in box_.iter() {
                let x = level.geom.node_position(&p)[0];
                let ux = s.value_at(&p, 0).expect("valid node");
                let uy = s.value_at(&p, 1).expect("valid node");
                assert!((ux - SLOPE * x).abs() < tol, "level {l} {p:?}: u_x = {ux}, expected {}", SLOPE * x);
                assert!(uy.abs() < tol, "level {l} {p:?}: u_y = {uy}");
            }
        }
    }
}

#[test]
fn composite_multigrid_solves_two_levels() {
    let mut op = bar_operator(true);
    op.set_uniform_model(&LinearIsotropic::new(1.0, 1.0));
    op.prepare_for_solve().expect("prepare");
    let (mut sol, rhs) = fields(&op);

    let config = MultigridConfig {
        max_iter: 500,
        ..MultigridConfig::default()
    };
    let info = Multigrid::new(&op, config)
        .solve(&mut sol, &rhs, 1e-12, 1e-10)
        .expect("solve");
    assert!(info.converged, "not converged: {info:?}");
    assert!(info.final_residual <= 1e-10);
    assert_linear(&op, &sol, 1e-6);
}

#[test]
fn newton_on_two_levels_with_blended_phases() {
    let mut op = bar_operator(true);
    let (mut u, b) = fields(&op);
    // both phases identical, so the exact solution is unchanged
    let phase = Model::<2>::IsotropicLinear(LinearIsotropic::new(1.0, 1.0));
    let mut models: Vec<FabArray<Model<2>, 2>> = (0..op.num_amr_levels())
        .map(|l| {
            let level = op.level(l, 0);
            let mut eta = MultiFab::new(&level.ba, &level.dm, 1, 1, 0.0);
            let geom = level.geom.clone();
            eta.fill_valid(|p, _| geom.node_position(p)[0]);
            amrel_solver::blend_models(&[phase, phase], &eta, &level.geom).expect("blend")
        })
        .collect();

    let config = NewtonConfig {
        tol_rel: 1e-12,
        tol_abs: 1e-10,
        max_iter: 500,
        ..NewtonConfig::default()
    };
    let mut newton = Newton::new(&mut op, config);
    let results = newton.solve(&mut u, &b, &mut models).expect("newton");
    assert_eq!(results.iterations, 1);
    assert!(results.linear_solves[0].converged);
    assert_linear(newton.operator(), &u, 1e-6);

    let residual = newton.comp_residual(&mut u, &b, &mut models).expect("residual");
    for r in &residual {
        assert!(r.norm0_all() < 1e-8, "residual {}", r.norm0_all());
    }
}

#[test]
fn boundary_conditions_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bc.json");
    save_json(&path, &bar_bc()).expect("save");
    let cfg: BcConfig = load_json(&path).expect("load");

    let geom = Geometry::new([8, 8], [0.0; 2], [1.0; 2], [false, true]).expect("geometry");
    let amr = AmrHierarchy::new(geom.clone(), 8).expect("hierarchy");
    let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).expect("operator");
    op.set_bc(ElasticBc::from_config(&cfg, geom.periodic()).expect("bc"))
        .expect("set_bc");
    op.set_uniform_model(&LinearIsotropic::new(2.0, 0.5));
    op.prepare_for_solve().expect("prepare");

    let (mut sol, rhs) = fields(&op);
    let info = Multigrid::new(&op, MultigridConfig::default())
        .solve(&mut sol, &rhs, 1e-12, 1e-10)
        .expect("solve");
    assert!(info.converged);
    assert_linear(&op, &sol, 1e-7);
}
