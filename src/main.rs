extern crate log;
extern crate pretty_env_logger;

use std::path::Path;
use std::process::exit;

use clap::{arg, command, Command};
use log::error;
use rayon::prelude::*;
use serde::Serialize;

use omr_scan::config::PipelineConfig;
use omr_scan::debug::ImageDebugWriter;
use omr_scan::marks::AnswerMatrix;
use omr_scan::pipeline::interpret_sheet;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SheetReport {
    sheet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    answers: Option<AnswerMatrix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detection_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    corner_estimator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mark_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    let debug = matches.get_flag("debug");
    let rectified_dir = matches.get_one::<String>("rectified-dir").cloned();

    let config = match matches.get_one::<String>("config") {
        Some(config_path) => {
            let config_json = match std::fs::read_to_string(config_path) {
                Ok(json) => json,
                Err(e) => {
                    eprintln!("Error reading pipeline configuration: {}", e);
                    exit(1);
                }
            };
            match serde_json::from_str::<PipelineConfig>(&config_json) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error parsing pipeline configuration: {}", e);
                    exit(1);
                }
            }
        }
        None => PipelineConfig::default(),
    };

    let sheets = matches
        .get_many::<String>("sheets")
        .expect("at least one sheet image path is required")
        .cloned()
        .collect::<Vec<String>>();

    // one task per image; a failed sheet never disturbs its siblings
    let reports = sheets
        .par_iter()
        .map(|sheet| process_sheet(sheet, &config, debug, rectified_dir.as_deref()))
        .collect::<Vec<SheetReport>>();

    for report in &reports {
        match serde_json::to_string(report) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error serializing report for {}: {}", report.sheet, e),
        }
    }

    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        eprintln!("{} of {} sheets failed", failed, reports.len());
        exit(1);
    }
}

fn process_sheet(
    sheet: &str,
    config: &PipelineConfig,
    debug: bool,
    rectified_dir: Option<&str>,
) -> SheetReport {
    let path = Path::new(sheet);
    let debug_writer = if debug {
        ImageDebugWriter::new(path.to_path_buf())
    } else {
        ImageDebugWriter::disabled()
    };

    match interpret_sheet(path, config, &debug_writer) {
        Ok(result) => {
            if let Some(dir) = rectified_dir {
                let stem = path.file_stem().unwrap_or_default().to_string_lossy();
                let out = Path::new(dir).join(format!("{}_rectified.png", stem));
                if let Err(e) = result.rectified.save(&out) {
                    error!("error saving rectified image {}: {}", out.display(), e);
                }
            }
            SheetReport {
                sheet: sheet.to_string(),
                answers: Some(result.answers),
                detection_method: Some(format!("{:?}", result.detection_method)),
                corner_estimator: Some(format!("{:?}", result.corner_estimator)),
                mark_path: Some(format!("{:?}", result.mark_path)),
                error: None,
            }
        }
        Err(e) => {
            error!("error processing {}: {}", path.display(), e);
            SheetReport {
                sheet: sheet.to_string(),
                answers: None,
                detection_method: None,
                corner_estimator: None,
                mark_path: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn cli() -> Command {
    command!()
        .arg(arg!(-c --config <PATH> "Path to pipeline configuration JSON"))
        .arg(arg!(-d --debug "Write per-stage debug overlay images"))
        .arg(arg!(-r --"rectified-dir" <DIR> "Directory to store rectified sheet images"))
        .arg(arg!(sheets: <SHEET_IMAGE> "Path to a sheet image").num_args(1..).required(true))
}
