use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};
use visionredact::{
    config::{VisionConfig, ENDPOINT_ENV, KEY_ENV},
    matcher::{self, VIN_PATTERN},
    parse_color,
    util::redacted_file_path,
    vision::{AnalysisOptions, Feature, ImageAnalyzer, VisionClient},
    AnalysisDocument, BoundingBox, BoundingPolygon, MatchPredicate, RedactorBuilder,
};

const CROP_ASPECT_RATIOS: [f32; 2] = [0.9, 1.33];

/// Finds text (VINs by default) in an image with a vision service and paints it out.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Image to redact
    #[arg(short, long)]
    file: PathBuf,

    /// Folder for `<name>-redacted.<ext>`; defaults to the image's folder
    #[arg(short, long)]
    output_folder: Option<PathBuf>,

    /// Exact output path, overrides --output-folder
    #[arg(long, conflicts_with = "output_folder")]
    output: Option<PathBuf>,

    /// Saved analysis result to use instead of calling the service
    #[arg(short, long)]
    document: Option<PathBuf>,

    /// Vision service endpoint, https://<resource>.cognitiveservices.azure.com
    #[arg(short, long, env = ENDPOINT_ENV)]
    endpoint: Option<String>,

    /// Vision service key
    #[arg(short, long, env = KEY_ENV, hide_env_values = true)]
    key: Option<String>,

    /// Redact lines containing this text (repeatable)
    #[arg(short, long)]
    literal: Vec<String>,

    /// Redact every match of this regular expression, whitespace removed (repeatable)
    #[arg(short, long)]
    pattern: Vec<String>,

    /// Also redact VINs, keeping only those whose check digit is valid
    #[arg(long)]
    vin_check_digit: bool,

    /// Redact detected objects with this name, e.g. "Vehicle registration plate" (repeatable)
    #[arg(long)]
    object: Vec<String>,

    /// black, white, #RRGGBB or #RRGGBBAA
    #[arg(long, default_value = "black")]
    fill: String,

    /// Grow each region by this many pixels
    #[arg(long, default_value_t = 0.0)]
    padding: f32,

    /// Also request and print dense captions, tags, people, crop suggestions, lines and words
    #[arg(short = 'A', long)]
    show_all_analysis: bool,

    /// Print the analysis document as JSON
    #[arg(short = 'R', long)]
    show_detailed_results: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let fill_color = parse_color(&args.fill)?;

    let document = match &args.document {
        Some(path) => AnalysisDocument::from_json_file(path)?,
        None => {
            let config = VisionConfig::new(args.endpoint.clone(), args.key.clone())
                .with_context(|| format!("set --endpoint/--key or {ENDPOINT_ENV}/{KEY_ENV}"))?;
            let mut options = AnalysisOptions::default().with_feature(Feature::Caption);
            if args.show_all_analysis {
                options = options
                    .with_feature(Feature::DenseCaptions)
                    .with_feature(Feature::Tags)
                    .with_feature(Feature::People)
                    .with_feature(Feature::SmartCrops)
                    .with_crop_aspect_ratios(&CROP_ASPECT_RATIOS);
            }
            let client = VisionClient::new(config, options)?;
            println!(" Please wait for image analysis results...");
            client.analyze(&args.file)?
        }
    };

    print_analysis(&document, args.show_all_analysis);
    if args.show_detailed_results {
        print_details(&document)?;
    }

    let polygons = collect_polygons(&args, &document)?;

    let destination = match (&args.output, &args.output_folder) {
        (Some(output), _) => output.clone(),
        (None, Some(folder)) => redacted_file_path(&args.file, folder)?,
        (None, None) => redacted_file_path(
            &args.file,
            args.file.parent().unwrap_or_else(|| Path::new("")),
        )?,
    };

    let redactor = RedactorBuilder::new()
        .fill_color(fill_color)
        .padding(args.padding)
        .build();
    let summary = redactor.redact(&args.file, &polygons, &destination)?;
    println!(
        " Redacted {} region(s), image located at {}",
        summary.polygons,
        summary.destination.display()
    );
    Ok(())
}

/// Literals and patterns as given. `--vin-check-digit` adds the checked VIN search next to them;
/// with nothing else asked for, plain VINs are searched.
fn predicates(args: &Args) -> visionredact::Result<Vec<MatchPredicate>> {
    let mut predicates = args
        .literal
        .iter()
        .map(|literal| Ok(MatchPredicate::literal(literal.as_str())))
        .chain(args.pattern.iter().map(|it| MatchPredicate::pattern(it)))
        .collect::<visionredact::Result<Vec<_>>>()?;
    if args.vin_check_digit {
        predicates.push(MatchPredicate::vin_with_check_digit());
    } else if predicates.is_empty() && args.object.is_empty() {
        log::debug!("No predicates given, looking for VINs ({VIN_PATTERN})");
        predicates.push(MatchPredicate::vin());
    }
    Ok(predicates)
}

fn collect_polygons(
    args: &Args,
    document: &AnalysisDocument,
) -> anyhow::Result<Vec<BoundingPolygon>> {
    let predicates = predicates(args)?;

    let mut polygons = Vec::new();
    for predicate in &predicates {
        for found in matcher::find_matches(document, predicate, predicate.default_normalization()) {
            println!(" Found a match:");
            println!("   {}", found.text);
            polygons.push(found.bounds);
        }
    }
    for name in &args.object {
        let objects = matcher::extract_objects(document, name);
        if !objects.is_empty() {
            println!(" Found {} object(s) named '{name}'", objects.len());
        }
        polygons.extend(objects);
    }
    Ok(polygons)
}

fn points_string(polygon: &BoundingPolygon) -> String {
    let points = polygon
        .to_flat()
        .iter()
        .map(|it| (*it as i32).to_string())
        .collect::<Vec<_>>();
    format!("{{{}}}", points.join(", "))
}

fn box_string(b: &BoundingBox) -> String {
    format!("{{x: {}, y: {}, w: {}, h: {}}}", b.x, b.y, b.w, b.h)
}

fn print_analysis(document: &AnalysisDocument, show_all: bool) {
    if let Some(metadata) = document.metadata {
        println!(" Image height: {}", metadata.height);
        println!(" Image width: {}", metadata.width);
    }
    if let Some(model_version) = &document.model_version {
        println!(" Model version: {model_version}");
    }
    if let Some(caption) = &document.caption {
        println!(" Caption:");
        println!("   '{}', Confidence {:.4}", caption.content, caption.confidence);
    }
    if !document.objects.is_empty() {
        println!(" Objects:");
        for object in &document.objects {
            println!(
                "   '{}', {}, Confidence: {:.4}",
                object.name,
                box_string(&object.bounds),
                object.confidence
            );
        }
    }
    if !show_all {
        return;
    }
    if !document.dense_captions.is_empty() {
        println!(" Dense Captions:");
        for caption in &document.dense_captions {
            println!(
                "   '{}', {}, Confidence: {:.4}",
                caption.content,
                box_string(&caption.bounds),
                caption.confidence
            );
        }
    }
    if !document.tags.is_empty() {
        println!(" Tags:");
        for tag in &document.tags {
            println!("   '{}', Confidence {:.4}", tag.name, tag.confidence);
        }
    }
    if !document.people.is_empty() {
        println!(" People:");
        for person in &document.people {
            println!(
                "   {}, Confidence {:.4}",
                box_string(&person.bounds),
                person.confidence
            );
        }
    }
    if !document.crop_suggestions.is_empty() {
        println!(" Crop Suggestions:");
        for crop in &document.crop_suggestions {
            println!(
                "   Aspect ratio {}: Crop suggestion {}",
                crop.aspect_ratio,
                box_string(&crop.bounds)
            );
        }
    }
    if !document.lines.is_empty() {
        println!(" Text:");
        for line in &document.lines {
            println!(
                "   Line: '{}', Bounding polygon {}",
                line.content,
                points_string(&line.bounds)
            );
            for word in &line.words {
                println!(
                    "     Word: '{}', Bounding polygon {}, Confidence {:.4}",
                    word.content,
                    points_string(&word.bounds),
                    word.confidence
                );
            }
        }
    }
}

fn print_details(document: &AnalysisDocument) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&[serde_json::json!({
        "lines": document.lines,
        "objects": document.objects,
    })])?;
    println!(" JSON result:");
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(["visionredact", "--file", "car.png"].iter().chain(extra))
    }

    fn checked_vin(predicate: &MatchPredicate) -> bool {
        matches!(
            predicate,
            MatchPredicate::Vin {
                verify_check_digit: true
            }
        )
    }

    #[test]
    fn plain_vins_by_default() {
        let found = predicates(&args(&[])).unwrap();
        assert_eq!(found.len(), 1);
        assert!(matches!(
            found[0],
            MatchPredicate::Vin {
                verify_check_digit: false
            }
        ));
    }

    #[test]
    fn objects_alone_search_no_text() {
        let found = predicates(&args(&["--object", "Vehicle registration plate"])).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn check_digit_joins_other_predicates() {
        let found = predicates(&args(&[
            "--literal",
            "GRANITE RIDGE LP",
            "--pattern",
            "[0-9]{4}",
            "--vin-check-digit",
        ]))
        .unwrap();
        assert_eq!(found.len(), 3);
        assert!(matches!(found[0], MatchPredicate::Literal(_)));
        assert!(matches!(found[1], MatchPredicate::Pattern(_)));
        assert!(checked_vin(&found[2]));

        let found = predicates(&args(&["--object", "plate", "--vin-check-digit"])).unwrap();
        assert_eq!(found.len(), 1);
        assert!(checked_vin(&found[0]));
    }

    #[test]
    fn check_digit_vins_found_next_to_literals() {
        let document = AnalysisDocument::from_json_str(
            r#"{"lines": [
                {"content": "GRANITE RIDGE LP", "boundingBox": [0,0,10,0,10,10,0,10]},
                {"content": "VIN 1HGCM82633A004352", "boundingBox": [0,20,10,20,10,30,0,30]},
                {"content": "VIN 5YJSA1E26HF000337", "boundingBox": [0,40,10,40,10,50,0,50]}
            ]}"#,
        )
        .unwrap();
        let args = args(&["--literal", "GRANITE", "--vin-check-digit"]);
        let polygons = collect_polygons(&args, &document).unwrap();
        assert_eq!(
            polygons,
            vec![document.lines[0].bounds, document.lines[1].bounds]
        );
    }

    #[test]
    fn bad_pattern_is_rejected() {
        assert!(predicates(&args(&["--pattern", "("])).is_err());
    }
}
