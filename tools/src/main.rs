//! scenario-runner: headless runner for the housing market engine.
//!
//! Usage:
//!   scenario-runner --data-dir ./data --horizon 10 --seed 42
//!   scenario-runner --data-dir ./data --advanced --calibrate --scope state:NSW
//!   scenario-runner --data-dir ./data --db runs.db --json

use anyhow::{Context, Result};
use housing_core::{
    aggregate::{AggregatePoint, Scope},
    advanced::AdvancedConfig,
    calibration::{calibrate, CalibrationOptions, CalibrationReport},
    config::SimConfig,
    engine::SimEngine,
    store::ResultStore,
};
use std::env;

#[derive(serde::Serialize)]
struct RunSummary<'a> {
    scope:       String,
    mode:        String,
    start:       Option<&'a AggregatePoint>,
    end:         Option<&'a AggregatePoint>,
    calibration: Option<&'a CalibrationReport>,
    warnings:    Vec<String>,
    run_id:      Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let db = string_arg(&args, "--db");
    let scope: Scope = string_arg(&args, "--scope").unwrap_or("national").parse()?;
    let advanced = args.iter().any(|a| a == "--advanced");
    let run_calibration = args.iter().any(|a| a == "--calibrate");
    let json = args.iter().any(|a| a == "--json");

    let mut config = SimConfig::load(data_dir).with_context(|| format!("loading {data_dir}"))?;
    config.horizon_years = parse_arg(&args, "--horizon", config.horizon_years);
    config.seed = parse_arg(&args, "--seed", config.seed);
    if advanced {
        config.advanced = AdvancedConfig::all_enabled();
    }

    if !json {
        println!("housing scenario-runner");
        println!("  started:   {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
        println!("  data_dir:  {data_dir}");
        println!("  cities:    {}", config.cities.len());
        println!("  horizon:   {} years", config.horizon_years);
        println!("  seed:      {}", config.seed);
        println!("  scope:     {scope}");
        println!("  advanced:  {advanced}");
        println!();
    }

    let mut report = None;
    if run_calibration {
        let history = SimEngine::new(config.clone())?.prepare_history()?;
        match history {
            Some(bundle) => {
                let options = CalibrationOptions::default();
                let fitted = calibrate(&bundle, &config.cities, &config.methodology, &options)?;
                config.methodology = fitted.apply_to(&config.methodology);
                report = Some(fitted);
            }
            None => log::warn!("--calibrate given but no history or growth profile configured"),
        }
    }

    let engine = SimEngine::new(config.clone())?;
    let result = engine.run()?;
    let series = result.aggregate(&scope)?;

    let run_id = match db {
        Some(path) => {
            let store = ResultStore::open(path)?;
            store.migrate()?;
            let run_id = store.save_scenario(&result, config.seed, &config.levers)?;
            if let Some(r) = &report {
                store.save_calibration(r, Some(&run_id))?;
            }
            Some(run_id)
        }
        None => None,
    };

    let mut warnings: Vec<String> = result.warnings.iter().map(|w| w.to_string()).collect();
    warnings.extend(series.warnings.iter().map(|w| w.to_string()));
    if let Some(r) = &report {
        warnings.extend(r.warnings.iter().map(|w| w.to_string()));
    }

    if json {
        let summary = RunSummary {
            scope: scope.to_string(),
            mode: format!("{:?}", result.mode).to_lowercase(),
            start: series.points.first(),
            end: series.last(),
            calibration: report.as_ref(),
            warnings,
            run_id,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if let Some(r) = &report {
        println!("Calibration: {} = {:.3} (default {:.3})", r.param_name, r.fitted_value, r.default_value);
        match r.grid_rmse {
            Some(rmse) => println!("  rmse {rmse:.4} over {}/{} cities", r.eligible_cities, r.requested_cities),
            None => println!("  no eligible cities; defaults kept"),
        }
        for fit in &r.city_fits {
            println!(
                "  {:<6} rmse {:.4} (p/inc {:.4}, r/inc {:.4}, {} years)",
                fit.city_id, fit.rmse, fit.rmse_price_to_income, fit.rmse_rent_to_income, fit.years
            );
        }
        if let Some(h) = &r.holdout {
            println!("  holdout rmse {:.4} (last {} years, {} cities)", h.rmse, h.years, h.cities);
        }
        println!();
    }

    println!("{:<6} {:>14} {:>10} {:>8} {:>8} {:>9} {:>8}", "year", "price", "rent", "p/inc", "r/inc", "gap", "stock");
    for p in &series.points {
        println!(
            "{:<6} {:>14.0} {:>10.0} {:>8.2} {:>8.3} {:>+9.4} {:>8.0}",
            p.year, p.median_price, p.median_rent, p.price_to_income, p.rent_to_income, p.supply_gap, p.dwelling_stock
        );
    }

    println!();
    println!("Per city, final year:");
    for (city, states) in &result.cities {
        if let Some(last) = states.last() {
            println!(
                "  {:<6} price {:>12.0}  rent {:>8.0}  p/inc {:>5.2}  repay/inc {:>5.3}",
                city, last.median_price, last.median_rent, last.price_to_income, last.repayment_to_income
            );
            for t in &last.tenure_stress {
                println!("         {:<10} stress {:>5.1}%", t.tenure.name(), t.stress_share * 100.0);
            }
        }
    }

    if !warnings.is_empty() {
        println!();
        println!("Warnings ({}):", warnings.len());
        for w in &warnings {
            println!("  {w}");
        }
    }
    if let Some(id) = run_id {
        println!();
        println!("Saved run {id} to {}", db.unwrap_or_default());
    }
    Ok(())
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
