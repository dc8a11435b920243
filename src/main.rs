/*
    Quakeloc, robust seismic event relocation
    Copyright (C) 2026 Quakeloc Developers

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

#[macro_use]
extern crate log;

use clap::Parser;
use quakeloc::config::EngineConfig;
use quakeloc::errors::ExitCode;
use quakeloc::io::{LocationRequest, LocationResponse};
use quakeloc::solver::driver::LocatorEngine;
use quakeloc::ttime::{TravelTimeModel, UniformModel};
use std::fs;
use std::path::{Path, PathBuf};

/// Relocates earthquake hypocenters from JSON phase-pick requests.
#[derive(Parser, Debug)]
#[command(name = "quakeloc", version, about)]
struct Args {
    /// Earth model path, reserved for table-driven predictors.
    #[arg(long = "modelPath")]
    model_path: Option<PathBuf>,
    /// Request file for single mode.
    #[arg(long = "filePath")]
    file_path: Option<PathBuf>,
    /// Input format; only json is handled here.
    #[arg(long = "fileType", default_value = "json")]
    file_type: String,
    /// single or batch.
    #[arg(long, default_value = "single")]
    mode: String,
    /// Directory swept for *.json requests in batch mode.
    #[arg(long = "inputDir")]
    input_dir: Option<PathBuf>,
    /// Directory receiving responses in batch mode.
    #[arg(long = "outputDir")]
    output_dir: Option<PathBuf>,
    /// Processed requests are moved here when set.
    #[arg(long = "archiveDir")]
    archive_dir: Option<PathBuf>,
    /// Engine configuration YAML.
    #[arg(long = "configPath")]
    config_path: Option<PathBuf>,
    #[arg(long = "logLevel", default_value = "info")]
    log_level: String,
}

fn locate_file(path: &Path, cfg: &EngineConfig) -> (Option<LocationResponse>, i32) {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            error!("cannot read {}: {err}", path.display());
            return (None, ExitCode::BadEventInput.value());
        }
    };
    let request = match LocationRequest::from_json(&text) {
        Ok(request) => request,
        Err(err) => {
            error!("cannot parse {}: {err}", path.display());
            return (None, ExitCode::BadEventInput.value());
        }
    };
    let mut event = match request.assemble() {
        Ok(event) => event,
        Err(err) => {
            error!("bad event input in {}: {err}", path.display());
            return (None, ExitCode::from(&err).value());
        }
    };

    let mut model = UniformModel::default();
    if let Err(err) = model.set_session(&request.earth_model) {
        error!("travel-time session failed: {err}");
        return (None, ExitCode::BadReadTTData.value());
    }

    let mut engine = LocatorEngine::new(cfg.clone(), model);
    let summary = engine.locate(&mut event);
    let response = LocationResponse::from_event(&request.id, &event, &summary);
    let code = summary.exit.value();
    (Some(response), code)
}

fn single(args: &Args, cfg: &EngineConfig) -> i32 {
    let Some(path) = args.file_path.as_deref() else {
        error!("single mode requires --filePath");
        return ExitCode::BadEventInput.value();
    };
    let (response, code) = locate_file(path, cfg);
    if let Some(response) = response {
        match response.to_json() {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!("cannot serialize response: {err}");
                return ExitCode::LocationFailed.value();
            }
        }
    }
    code
}

fn batch(args: &Args, cfg: &EngineConfig) -> i32 {
    let (Some(input_dir), Some(output_dir)) = (args.input_dir.as_deref(), args.output_dir.as_deref())
    else {
        error!("batch mode requires --inputDir and --outputDir");
        return ExitCode::BadEventInput.value();
    };

    let mut worst = 0;
    let mut entries: Vec<PathBuf> = match fs::read_dir(input_dir) {
        Ok(dir) => dir
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
            .collect(),
        Err(err) => {
            error!("cannot sweep {}: {err}", input_dir.display());
            return ExitCode::BadEventInput.value();
        }
    };
    entries.sort();

    for path in entries {
        info!("locating {}", path.display());
        let (response, code) = locate_file(&path, cfg);
        worst = worst.max(code);

        if let Some(response) = response {
            let out = output_dir.join(path.file_name().unwrap());
            match response.to_json() {
                Ok(json) => {
                    if let Err(err) = fs::write(&out, json) {
                        error!("cannot write {}: {err}", out.display());
                        worst = worst.max(ExitCode::LocationFailed.value());
                    }
                }
                Err(err) => error!("cannot serialize {}: {err}", out.display()),
            }
        }

        if let Some(archive) = args.archive_dir.as_deref() {
            let dest = archive.join(path.file_name().unwrap());
            if let Err(err) = fs::rename(&path, &dest) {
                warn!("cannot archive {}: {err}", path.display());
            }
        }
    }
    worst
}

fn main() {
    let args = Args::parse();
    std::env::set_var("RUST_LOG", &args.log_level);
    pretty_env_logger::init();

    if args.file_type != "json" {
        // The Hydra parser lives with the acquisition system, not here.
        error!("unsupported file type {}", args.file_type);
        std::process::exit(ExitCode::BadEventInput.value());
    }
    if let Some(model_path) = args.model_path.as_deref() {
        if !model_path.exists() {
            error!("model path {} does not exist", model_path.display());
            std::process::exit(ExitCode::BadReadTTData.value());
        }
    }

    let cfg = match args.config_path.as_deref() {
        Some(path) => match EngineConfig::from_yaml(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!("cannot load {}: {err}", path.display());
                std::process::exit(ExitCode::from(&err).value());
            }
        },
        None => EngineConfig::default(),
    };

    let code = match args.mode.as_str() {
        "single" => single(&args, &cfg),
        "batch" => batch(&args, &cfg),
        other => {
            error!("unknown mode {other}");
            ExitCode::BadEventInput.value()
        }
    };
    std::process::exit(code);
}
