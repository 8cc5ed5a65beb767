use approx::assert_abs_diff_eq;
use crimecrf::admm::{AdmmConfig, AdmmOutcome, solve_l1_regression};
use crimecrf::median::solve_abs_deviation;
use ndarray::{Array1, Array2, array};

#[test]
fn sparse_outliers_do_not_move_the_fit() {
    let rows = 30;
    let slope_true = 2.0;
    let intercept_true = 1.5;
    let x = Array2::from_shape_fn((rows, 2), |(i, k)| if k == 0 { 1.0 } else { i as f64 / 10.0 });
    let mut y = Array1::from_shape_fn(rows, |i| intercept_true + slope_true * i as f64 / 10.0);
    y[5] += 8.0;
    y[17] -= 6.0;
    y[26] += 10.0;

    let config = AdmmConfig {
        max_iterations: 5000,
        ..AdmmConfig::default()
    };
    let outcome = solve_l1_regression(x.view(), y.view(), &config).unwrap();
    let (alpha, iterations, residual) = match outcome {
        AdmmOutcome::Converged {
            alpha,
            iterations,
            residual,
        } => (alpha, iterations, residual),
        other => panic!("ADMM did not converge: {:?}", other),
    };

    assert!(iterations <= 5000);
    assert!(residual <= config.tolerance);
    assert_abs_diff_eq!(alpha[0], intercept_true, epsilon = 0.1);
    assert_abs_diff_eq!(alpha[1], slope_true, epsilon = 0.1);
}

#[test]
fn crime_scale_targets_are_recovered_despite_outliers() {
    // Targets sit far above X·1, where the first ADMM step already has a zero
    // primal residual.
    let rows = 30;
    let x = Array2::from_shape_fn((rows, 2), |(i, k)| if k == 0 { 1.0 } else { i as f64 / 10.0 });
    let mut y = Array1::from_shape_fn(rows, |i| 300.0 + 25.0 * i as f64 / 10.0);
    y[5] += 80.0;
    y[17] -= 60.0;
    y[26] += 100.0;

    let outcome = solve_l1_regression(x.view(), y.view(), &AdmmConfig::default()).unwrap();
    assert!(outcome.is_converged(), "outcome: {:?}", outcome);
    assert!(outcome.iterations() > 1);
    assert_abs_diff_eq!(outcome.alpha()[0], 300.0, epsilon = 0.1);
    assert_abs_diff_eq!(outcome.alpha()[1], 25.0, epsilon = 0.1);

    let objective = |alpha: &Array1<f64>| (x.dot(alpha) - &y).mapv(f64::abs).sum();
    let generating = Array1::from(vec![300.0, 25.0]);
    assert!(objective(outcome.alpha()) <= objective(&generating) + 0.5);
}

#[test]
fn four_unit_scenario_solves_and_takes_the_median() {
    let x = array![[1.0], [2.0], [3.0], [10.0]];
    let y = array![1.0, 2.0, 3.0, 10.0];
    let outcome = solve_l1_regression(x.view(), y.view(), &AdmmConfig::default()).unwrap();
    assert!(outcome.is_converged());
    assert_abs_diff_eq!(outcome.alpha()[0], 1.0, epsilon = 0.1);

    let minimum = solve_abs_deviation(&[1.0, 2.0, 3.0, 100.0]).unwrap();
    assert_eq!(minimum.value, 2.0);
    assert_ne!(minimum.value, 26.5);
}

#[test]
fn least_squares_would_chase_the_outliers() {
    // Same data as above, solved in the 2-norm by normal equations; the L1 fit
    // is closer to the generating line.
    let rows = 30;
    let t: Vec<f64> = (0..rows).map(|i| i as f64 / 10.0).collect();
    let mut y: Vec<f64> = t.iter().map(|v| 1.5 + 2.0 * v).collect();
    y[5] += 8.0;
    y[17] -= 6.0;
    y[26] += 10.0;

    let n = rows as f64;
    let st: f64 = t.iter().sum();
    let stt: f64 = t.iter().map(|v| v * v).sum();
    let sy: f64 = y.iter().sum();
    let sty: f64 = t.iter().zip(&y).map(|(a, b)| a * b).sum();
    let det = n * stt - st * st;
    let ols_intercept = (stt * sy - st * sty) / det;

    let x = Array2::from_shape_fn((rows, 2), |(i, k)| if k == 0 { 1.0 } else { t[i] });
    let outcome =
        solve_l1_regression(x.view(), Array1::from(y).view(), &AdmmConfig::default()).unwrap();
    assert!(outcome.is_converged());
    assert!((outcome.alpha()[0] - 1.5).abs() < (ols_intercept - 1.5).abs());
}
