use std::process::ExitCode;

use chrono::Utc;
use tracing::Level;

mod problem;

use problem::{ProblemConfig, Report};

fn usage() {
    eprintln!("usage: amrel-cli solve <problem.json> [-v]... [--json]");
}

#[derive(Debug, PartialEq)]
struct Args {
    problem: String,
    verbosity: u32,
    json: bool,
}

fn parse_args(args: &[String]) -> Option<Args> {
    let (command, rest) = args.split_first()?;
    if command != "solve" {
        return None;
    }
    let mut problem = None;
    let mut verbosity = 0;
    let mut json = false;
    for arg in rest {
        match arg.as_str() {
            "--json" => json = true,
            "-v" | "--verbose" => verbosity += 1,
            "-vv" => verbosity += 2,
            flag if flag.starts_with('-') => return None,
            path if problem.is_none() => problem = Some(path.to_string()),
            _ => return None,
        }
    }
    Some(Args {
        problem: problem?,
        verbosity,
        json,
    })
}

fn init_logging(verbosity: u32) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_summary(report: &Report) {
    println!("dim: {}", report.dim);
    println!("amr_levels: {}", report.levels);
    println!("nodes: {}", report.nodes);
    println!("newton_iterations: {}", report.newton_iterations);
    for (i, (relnorm, mg)) in report
        .relnorm_history
        .iter()
        .zip(&report.multigrid_iterations)
        .enumerate()
    {
        println!("  iteration {}: relnorm {relnorm:.6e}, multigrid cycles {mg}", i + 1);
    }
    if report.converged_early {
        println!("stopped on nr_tolerance");
    }
    println!("final_residual: {:.6e}", report.final_residual);
    println!("total_energy: {:.6e}", report.total_energy);
    println!("max_displacement: {:.6e}", report.max_displacement);
}

fn json_report(report: &Report) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(report)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("generated_at".to_string(), Utc::now().to_rfc3339().into());
    }
    serde_json::to_string_pretty(&value)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(args) = parse_args(&args) else {
        usage();
        return ExitCode::from(2);
    };
    init_logging(args.verbosity);

    let mut config = match ProblemConfig::load(&args.problem) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error reading {}: {err}", args.problem);
            return ExitCode::from(1);
        }
    };
    config.newton.verbose = config.newton.verbose.max(args.verbosity);
    tracing::info!("solving {} ({}D)", args.problem, config.dim);

    let report = match config.solve() {
        Ok(report) => report,
        Err(err) => {
            eprintln!("solve failed: {err}");
            return ExitCode::from(1);
        }
    };
    if args.json {
        match json_report(&report) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("could not write report: {err}");
                return ExitCode::from(1);
            }
        }
    } else {
        print_summary(&report);
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_flags_in_any_order() {
        let args = parse_args(&strings(&["solve", "-v", "bar.json", "--json", "-v"])).unwrap();
        assert_eq!(
            args,
            Args {
                problem: "bar.json".into(),
                verbosity: 2,
                json: true
            }
        );
    }

    #[test]
    fn rejects_bad_command_lines() {
        assert!(parse_args(&strings(&[])).is_none());
        assert!(parse_args(&strings(&["analyze", "bar.json"])).is_none());
        assert!(parse_args(&strings(&["solve"])).is_none());
        assert!(parse_args(&strings(&["solve", "a.json", "b.json"])).is_none());
        assert!(parse_args(&strings(&["solve", "a.json", "--quiet"])).is_none());
    }

    #[test]
    fn problem_file_to_json_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bar.json");
        std::fs::write(
            &path,
            r#"{"ncells": [8, 8], "periodic": [false, true],
                "matrix": {"type": "isotropic", "shear": 1.0, "lame": 1.0},
                "bc": {"type": {"xlo": ["disp", "disp"], "xhi": ["disp", "disp"]},
                       "val": {"xhi": [0.05, 0.0]}},
                "newton": {"tol_rel": 1e-12, "tol_abs": 1e-10, "max_iter": 500}}"#,
        )
        .unwrap();
        let report = ProblemConfig::load(&path).unwrap().solve().unwrap();
        let text = json_report(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["newton_iterations"], 1);
        assert!(value["generated_at"].is_string());
        assert!((value["max_displacement"].as_f64().unwrap() - 0.05).abs() < 1e-8);
    }
}
