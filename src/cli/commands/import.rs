//! Import command implementation.

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use std::path::PathBuf;

use super::{connect, read_input};
use crate::cli::output::get_formatter;
use crate::models::{Config, Metadata, NewKnowledgePoint, OutputFormat};

/// Arguments for the import command.
#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Knowledge base id or name
    #[arg()]
    pub base: String,

    /// Path to JSON or JSONL file (use - for stdin)
    #[arg()]
    pub file: Option<PathBuf>,

    /// Only validate the import file without storing anything
    #[arg(long)]
    pub validate_only: bool,
}

/// One imported point. Accepts the common spellings of the content field.
#[derive(Debug, Deserialize)]
struct ImportPoint {
    #[serde(rename = "pageContent", alias = "page_content", alias = "content")]
    content: String,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct PointsEnvelope {
    points: Vec<ImportPoint>,
}

impl ImportPoint {
    fn into_point(self) -> NewKnowledgePoint {
        NewKnowledgePoint::new(self.content).with_metadata(self.metadata.unwrap_or_default())
    }
}

pub async fn handle_import(args: ImportArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    let input = read_input(args.file.as_deref())?;
    let points = parse_import_points(&input)?;

    if points.is_empty() {
        print!("{}", formatter.format_message("No points found in input."));
        return Ok(());
    }

    if verbose || args.validate_only {
        eprintln!("Found {} points to import", points.len());
    }

    if args.validate_only {
        print!(
            "{}",
            formatter.format_message(&format!(
                "Validation successful: {} points ready for import",
                points.len()
            ))
        );
        return Ok(());
    }

    let config = Config::load()?;
    let service = connect(&config).await?;
    let created = service.import_points(&args.base, points).await?;

    print!(
        "{}",
        formatter.format_message(&format!(
            "Imported {} points into \"{}\". Run `kbsync sync {}` to index them.",
            created.len(),
            args.base,
            args.base
        ))
    );

    Ok(())
}

/// Parse a JSON array, a `{"points": [...]}` object, or JSONL.
fn parse_import_points(input: &str) -> Result<Vec<NewKnowledgePoint>> {
    let input = input.trim();

    if input.is_empty() {
        return Ok(Vec::new());
    }

    if input.starts_with('[') {
        let points: Vec<ImportPoint> =
            serde_json::from_str(input).context("failed to parse JSON array")?;
        return Ok(points.into_iter().map(ImportPoint::into_point).collect());
    }

    if let Ok(envelope) = serde_json::from_str::<PointsEnvelope>(input) {
        return Ok(envelope.points.into_iter().map(ImportPoint::into_point).collect());
    }

    let mut points = Vec::new();
    for (i, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let point: ImportPoint = serde_json::from_str(line)
            .with_context(|| format!("failed to parse JSON at line {}", i + 1))?;
        points.push(point.into_point());
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let points = parse_import_points(
            r#"[
                {"pageContent": "first", "metadata": {"source": "faq"}},
                {"page_content": "second"},
                {"content": "third", "metadata": null}
            ]"#,
        )
        .unwrap();

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].content, "first");
        assert_eq!(points[0].metadata["source"], "faq");
        assert_eq!(points[1].content, "second");
        assert!(points[2].metadata.is_empty());
    }

    #[test]
    fn test_parse_points_envelope() {
        let points =
            parse_import_points(r#"{"points": [{"pageContent": "a"}, {"pageContent": "b"}]}"#)
                .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].content, "b");
    }

    #[test]
    fn test_parse_jsonl() {
        let input = "{\"pageContent\": \"one\"}\n\n{\"content\": \"two\", \"metadata\": {\"n\": 2}}\n";
        let points = parse_import_points(input).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].metadata["n"], 2);

        // A single JSONL line is not mistaken for an envelope.
        let points = parse_import_points("{\"pageContent\": \"only\"}").unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let err = parse_import_points("{\"pageContent\": \"ok\"}\n{\"title\": \"no content\"}")
            .unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(parse_import_points("  \n ").unwrap().is_empty());
    }
}
